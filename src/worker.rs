//! Worker launcher
//!
//! Forks one worker, sets up its signal posture inside the child, runs the
//! `after_fork` hook and hands the process over to the configured script.

use crate::config::{Config, Script, WorkerContext, WORKER_INDEX_ENV};
use crate::error::{Result, SupervisorError};
use crate::platform::{self, Forked};
use crate::signal;
use nix::sys::signal::Signal;
use nix::unistd;
use std::ffi::CString;
use std::process;
use tracing::{error, info};

/// Exit status of a worker whose script could not be started
pub const EXEC_FAILURE_CODE: i32 = 127;

/// Spawn worker `index` and return its pid
///
/// Only the calling side returns; the child never leaves this function.
pub fn spawn(index: usize, config: &Config) -> Result<u32> {
    match platform::fork_process()? {
        Forked::Parent(pid) => {
            info!(
                name = %config.name,
                index,
                pid,
                "Spawned {} worker[{}] pid={}",
                config.name,
                index,
                pid
            );
            Ok(pid)
        }
        Forked::Child => run_worker(index, config),
    }
}

fn run_worker(index: usize, config: &Config) -> ! {
    signal::reset();
    if let Err(err) = prepare_signals().and_then(|_| platform::unblock_admin_signals()) {
        error!("worker[{}] could not set up signals: {}", index, err);
        process::exit(1);
    }
    std::env::set_var(WORKER_INDEX_ENV, index.to_string());

    config.after_fork.run("after_fork");
    hand_off(index, config)
}

/// Signal posture of a worker
///
/// Interactive interrupts are ignored, so only the supervisor decides when a
/// worker goes away; that disposition survives `exec`. Everything the parent
/// customised is put back to default, which makes SIGTERM terminate at once.
/// Runs while the fork still blocks the administrative signals, so a TERMINATE
/// sent during start-up is delivered to the default action right after.
fn prepare_signals() -> nix::Result<()> {
    signal::ignore(Signal::SIGINT)?;
    signal::restore_default(Signal::SIGTERM)?;
    signal::restore_default(Signal::SIGHUP)?;
    signal::restore_default(Signal::SIGCHLD)?;
    Ok(())
}

fn hand_off(index: usize, config: &Config) -> ! {
    match &config.script {
        Script::Exec(argv) => {
            let err = exec(argv);
            error!("worker[{}] failed to exec {:?}: {}", index, argv, err);
            process::exit(EXEC_FAILURE_CODE)
        }
        Script::Function(entry) => {
            let context = WorkerContext {
                index,
                name: config.name.clone(),
                environment: config.environment.clone(),
            };
            entry(&context);
            process::exit(0)
        }
    }
}

/// Replace the current image with `argv`, searching `PATH`
///
/// Returns only on failure.
fn exec(argv: &[String]) -> SupervisorError {
    let args = match to_c_strings(argv) {
        Ok(args) => args,
        Err(err) => return err,
    };
    let Some(program) = args.first() else {
        return SupervisorError::InvalidScript("script is empty".to_string());
    };
    match unistd::execvp(program, &args) {
        Ok(never) => match never {},
        Err(errno) => SupervisorError::Sys(errno),
    }
}

fn to_c_strings(argv: &[String]) -> Result<Vec<CString>> {
    argv.iter()
        .map(|arg| {
            CString::new(arg.as_bytes()).map_err(|_| {
                SupervisorError::InvalidScript(format!("argument contains a NUL byte: {:?}", arg))
            })
        })
        .collect()
}
