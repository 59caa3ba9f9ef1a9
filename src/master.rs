//! Master controller
//!
//! Top of the tree. The master owns exactly one parent per generation,
//! translates administrative signals into intents and drives the optional
//! detach into the background.

use crate::config::{Config, ConfigSource, ENVIRONMENT_ENV};
use crate::error::{Result, SupervisorError};
use crate::pidfile;
use crate::platform::{self, Forked};
use crate::registry::{ProcessRecord, ProcessRegistry};
use crate::signal::{self, SignalKind};
use crate::supervisor::{LoopExit, ParentSupervisor};
use std::fs::File;
use std::process;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const EXIT_POLL_STEP: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartMode {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    /// The master now runs in the background under `pid`
    Detached { pid: u32 },
    /// The foreground master has shut down cleanly
    Finished,
}

pub struct Master<S: ConfigSource> {
    config: Config,
    source: S,
    registry: ProcessRegistry,
}

impl<S: ConfigSource> Master<S> {
    /// `config` drives the first generation; `source` supplies every
    /// generation after a reload.
    pub fn new(config: Config, source: S) -> Self {
        Self {
            config,
            source,
            registry: ProcessRegistry::new(),
        }
    }

    pub fn start(mut self, mode: StartMode) -> Result<StartOutcome> {
        ensure_not_running(&self.config)?;
        std::env::set_var(ENVIRONMENT_ENV, &self.config.environment);

        match mode {
            StartMode::Foreground => {
                self.supervise()?;
                Ok(StartOutcome::Finished)
            }
            StartMode::Background => self.daemonize(),
        }
    }

    fn daemonize(self) -> Result<StartOutcome> {
        let log_path = self
            .config
            .log_path
            .clone()
            .ok_or(SupervisorError::LogPathMissing)?;
        let log = platform::open_log(&log_path)?;

        match platform::fork_process()? {
            Forked::Parent(pid) => {
                match &self.config.pid_path {
                    Some(path) => {
                        if let Err(err) = pidfile::write(path, pid) {
                            platform::terminate_process(pid);
                            return Err(err);
                        }
                    }
                    None => warn!("No pid_path configured; stop and reload will not find pid {}", pid),
                }
                Ok(StartOutcome::Detached { pid })
            }
            Forked::Child => self.run_detached(log),
        }
    }

    fn run_detached(mut self, log: File) -> ! {
        let result = platform::new_session()
            .map_err(SupervisorError::from)
            .and_then(|_| platform::redirect_stdio(&log).map_err(SupervisorError::from));
        drop(log);

        let code = match result.and_then(|_| self.supervise()) {
            Ok(()) => 0,
            Err(err) => {
                error!("{} master failed: {}", self.config.name, err);
                self.cascade_terminate();
                1
            }
        };
        process::exit(code)
    }

    /// The supervision loop proper
    fn supervise(&mut self) -> Result<()> {
        signal::install(&[
            SignalKind::Reload,
            SignalKind::Terminate,
            SignalKind::InteractiveTerminate,
        ])?;
        platform::unblock_admin_signals()?;
        platform::detach_children()?;

        info!(
            "{} master pid={} environment={}",
            self.config.name,
            platform::current_pid(),
            self.config.environment
        );
        self.spawn_parent()?;

        let exit = loop {
            if let Some(exit) = self.tick(platform::process_alive)? {
                break exit;
            }
            if !signal::pending() {
                platform::sleep_interruptible(self.config.poll_interval);
            }
        };
        info!("{} master exiting: {:?}", self.config.name, exit);
        self.release_pid_file();
        Ok(())
    }

    /// One polling tick: drain intents, then probe the parent
    fn tick<F>(&mut self, is_alive: F) -> Result<Option<LoopExit>>
    where
        F: Fn(u32) -> bool,
    {
        let mut reloaded = false;
        for intent in signal::drain() {
            debug!("intent {:?} received at {:?}", intent.kind, intent.received_at);
            match intent.kind {
                // Back-to-back reloads in one batch collapse into one.
                SignalKind::Reload if reloaded => {}
                SignalKind::Reload => {
                    self.reload()?;
                    reloaded = true;
                }
                SignalKind::Terminate | SignalKind::InteractiveTerminate => {
                    info!("{} master received {:?}", self.config.name, intent.kind);
                    self.cascade_terminate();
                    return Ok(Some(LoopExit::Terminated));
                }
            }
        }

        for record in self.registry.sweep_dead(is_alive) {
            info!("{} {} pid={} is gone", self.config.name, record.role, record.pid);
        }
        if self.registry.is_empty() {
            return Ok(Some(LoopExit::Drained));
        }
        Ok(None)
    }

    fn spawn_parent(&mut self) -> Result<()> {
        match platform::fork_process()? {
            Forked::Child => {
                signal::reset();
                ParentSupervisor::new(self.config.clone()).run()
            }
            Forked::Parent(pid) => {
                self.registry.record_spawn(ProcessRecord::parent(pid));
                info!("{} spawned parent pid={}", self.config.name, pid);
                Ok(())
            }
        }
    }

    /// Replace the running generation
    ///
    /// The old parent gets TERMINATE and up to `reload_timeout` to disappear
    /// before the new one is forked. Past that bound both generations overlap
    /// until the old one finishes its own cascade.
    fn reload(&mut self) -> Result<()> {
        info!("{} master reloading", self.config.name);
        let previous = self.registry.pids();
        self.cascade_terminate();
        for pid in previous {
            if !self.wait_for_exit(pid) {
                warn!(
                    "{} old parent pid={} still alive after {:?}; starting new generation alongside it",
                    self.config.name, pid, self.config.reload_timeout
                );
            }
        }

        match self.source.load() {
            Ok(config) => self.config = config,
            Err(err) => error!(
                "{} reload failed, restarting with previous configuration: {}",
                self.config.name, err
            ),
        }
        std::env::set_var(ENVIRONMENT_ENV, &self.config.environment);
        self.spawn_parent()
    }

    fn wait_for_exit(&self, pid: u32) -> bool {
        let deadline = Instant::now() + self.config.reload_timeout;
        while platform::process_alive(pid) {
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(EXIT_POLL_STEP);
        }
        true
    }

    fn cascade_terminate(&mut self) {
        for record in self.registry.drain() {
            if !platform::terminate_process(record.pid) {
                debug!("{} pid={} already gone", record.role, record.pid);
            }
        }
    }

    fn release_pid_file(&self) {
        let Some(path) = &self.config.pid_path else {
            return;
        };
        match pidfile::remove_if_owned(path, platform::current_pid()) {
            Ok(true) => debug!("removed pid file {}", path.display()),
            Ok(false) => {}
            Err(err) => warn!("could not remove pid file {}: {}", path.display(), err),
        }
    }
}

/// Refuse to start while the pid file names a live process
///
/// A pid file naming a dead process is stale and does not block the start.
pub fn ensure_not_running(config: &Config) -> Result<()> {
    let Some(path) = &config.pid_path else {
        return Ok(());
    };
    if !path.exists() {
        return Ok(());
    }
    match pidfile::read(path) {
        Ok(pid) if platform::process_alive(pid) => Err(SupervisorError::AlreadyRunning {
            pid,
            path: path.clone(),
        }),
        Ok(pid) => {
            warn!("Stale pid file {} names dead pid {}", path.display(), pid);
            Ok(())
        }
        Err(err) => {
            warn!("Ignoring pid file: {}", err);
            Ok(())
        }
    }
}

/// Ask the running master to shut down
pub fn stop(config: &Config) -> Result<u32> {
    signal_master(config, SignalKind::Terminate)
}

/// Ask the running master to replace its generation
pub fn reload(config: &Config) -> Result<u32> {
    signal_master(config, SignalKind::Reload)
}

fn signal_master(config: &Config, kind: SignalKind) -> Result<u32> {
    let path = config
        .pid_path
        .as_ref()
        .ok_or(SupervisorError::PidPathMissing)?;
    let pid = pidfile::read(path)?;
    platform::send_signal(pid, kind.signal())
        .map_err(|_| SupervisorError::ProcessNotFound { pid })?;
    info!("Sent {:?} to master pid={}", kind, pid);
    Ok(pid)
}
