//! Parent supervisor
//!
//! The mid tier of the tree. One parent owns the workers of one generation:
//! it spawns them, watches them with the liveness probe and takes them down
//! when the master asks it to terminate.

use crate::config::Config;
use crate::error::Result;
use crate::platform;
use crate::registry::{ProcessRecord, ProcessRegistry};
use crate::signal::{self, SignalKind};
use crate::worker;
use nix::sys::signal::Signal;
use std::process;
use tracing::{debug, error, info, warn};

/// Why a polling loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// A TERMINATE intent arrived and the cascade has been sent
    Terminated,
    /// Every supervised process is gone
    Drained,
}

pub struct ParentSupervisor {
    config: Config,
    registry: ProcessRegistry,
}

impl ParentSupervisor {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            registry: ProcessRegistry::new(),
        }
    }

    /// Run this generation to completion and exit the process
    ///
    /// Called in the freshly forked parent; never returns to the master's
    /// code.
    pub fn run(mut self) -> ! {
        let code = match self.supervise() {
            Ok(exit) => {
                debug!("{} parent leaving loop: {:?}", self.config.name, exit);
                0
            }
            Err(err) => {
                error!("{} parent failed: {}", self.config.name, err);
                self.cascade_terminate();
                1
            }
        };
        process::exit(code)
    }

    fn supervise(&mut self) -> Result<LoopExit> {
        signal::ignore(Signal::SIGINT)?;
        // Only the master reacts to administrative signals.
        signal::ignore(Signal::SIGHUP)?;
        signal::install(&[SignalKind::Terminate])?;
        platform::unblock_admin_signals()?;

        // The hook may wait on its own children, so SIGCHLD has to be at its
        // default until it returns.
        signal::restore_default(Signal::SIGCHLD)?;
        self.config.before_fork.run("before_fork");
        platform::detach_children()?;

        info!(
            "{} parent pid={} spawning {} worker(s)",
            self.config.name,
            platform::current_pid(),
            self.config.workers
        );
        self.spawn_workers()?;
        Ok(self.poll())
    }

    fn spawn_workers(&mut self) -> Result<()> {
        for index in 0..self.config.workers {
            let pid = worker::spawn(index, &self.config)?;
            self.registry.record_spawn(ProcessRecord::worker(pid, index));
        }
        Ok(())
    }

    fn poll(&mut self) -> LoopExit {
        loop {
            if let Some(exit) = self.tick(platform::process_alive) {
                return exit;
            }
            if !signal::pending() {
                platform::sleep_interruptible(self.config.poll_interval);
            }
        }
    }

    /// One polling tick: intents first, then liveness
    fn tick<F>(&mut self, is_alive: F) -> Option<LoopExit>
    where
        F: Fn(u32) -> bool,
    {
        if signal::drain().iter().any(|intent| intent.kind.is_terminate()) {
            info!("{} parent received TERMINATE", self.config.name);
            self.cascade_terminate();
            return Some(LoopExit::Terminated);
        }

        for record in self.registry.sweep_dead(is_alive) {
            warn!(
                "{} {} pid={} is gone ({} remaining)",
                self.config.name,
                record.role,
                record.pid,
                self.registry.len()
            );
        }

        if self.registry.is_empty() {
            info!("{} parent has no workers left", self.config.name);
            return Some(LoopExit::Drained);
        }
        None
    }

    /// Send TERMINATE to every worker and forget them
    fn cascade_terminate(&mut self) {
        for record in self.registry.drain() {
            if !platform::terminate_process(record.pid) {
                debug!("{} pid={} already gone", record.role, record.pid);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Script;
    use serial_test::serial;
    use std::process::{Child, Command};

    fn supervisor_with(children: &[u32]) -> ParentSupervisor {
        let mut supervisor = ParentSupervisor::new(Config::new(Script::shell("true")));
        for (index, pid) in children.iter().enumerate() {
            supervisor
                .registry
                .record_spawn(ProcessRecord::worker(*pid, index));
        }
        supervisor
    }

    fn sleeper() -> Child {
        Command::new("sleep").arg("30").spawn().expect("spawn sleep")
    }

    #[test]
    #[serial]
    fn test_tick_removes_dead_workers_and_keeps_live_ones() {
        signal::reset();
        let mut supervisor = supervisor_with(&[10, 11, 12]);

        let exit = supervisor.tick(|pid| pid != 11);
        assert_eq!(exit, None);
        assert_eq!(supervisor.registry.pids(), vec![10, 12]);
    }

    #[test]
    #[serial]
    fn test_tick_drains_when_every_worker_died() {
        signal::reset();
        let mut supervisor = supervisor_with(&[10, 11]);
        assert_eq!(supervisor.tick(|_| false), Some(LoopExit::Drained));
        assert!(supervisor.registry.is_empty());
    }

    #[test]
    #[serial]
    fn test_zero_workers_drains_on_first_tick() {
        signal::reset();
        let mut supervisor = supervisor_with(&[]);
        assert_eq!(supervisor.tick(|_| true), Some(LoopExit::Drained));
    }

    #[test]
    #[serial]
    fn test_terminate_intent_wins_over_liveness() {
        signal::reset();
        let mut first = sleeper();
        let mut second = sleeper();
        let mut supervisor = supervisor_with(&[first.id(), second.id()]);

        signal::enqueue(SignalKind::Terminate);
        // The probe says everything is dead, but the intent is handled first.
        assert_eq!(supervisor.tick(|_| false), Some(LoopExit::Terminated));
        assert!(supervisor.registry.is_empty());

        assert!(!first.wait().expect("wait").success());
        assert!(!second.wait().expect("wait").success());
    }

    #[test]
    #[serial]
    fn test_reload_intent_is_ignored_by_parent() {
        signal::reset();
        let mut supervisor = supervisor_with(&[10]);
        signal::enqueue(SignalKind::Reload);
        assert_eq!(supervisor.tick(|_| true), None);
        assert_eq!(supervisor.registry.len(), 1);
    }

    #[test]
    #[serial]
    fn test_cascade_swallows_missing_processes() {
        signal::reset();
        let mut gone = Command::new("true").spawn().expect("spawn true");
        let gone_pid = gone.id();
        gone.wait().expect("wait");
        let mut live = sleeper();

        let mut supervisor = supervisor_with(&[gone_pid, live.id()]);
        supervisor.cascade_terminate();

        assert!(supervisor.registry.is_empty());
        assert!(!live.wait().expect("wait").success());
    }
}
