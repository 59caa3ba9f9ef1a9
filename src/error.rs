//! Unified error handling for forkwarden
//!
//! Every administrative failure surfaces to the command dispatcher as one of
//! these variants and terminates the invoking command with exit code 1.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the supervisor
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Config file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(#[from] ::config::ConfigError),

    #[error("Already running (pid {pid}, pid file {})", path.display())]
    AlreadyRunning { pid: u32, path: PathBuf },

    #[error("Cannot run in the background without a log_path")]
    LogPathMissing,

    #[error("No pid_path configured; stop and reload need one")]
    PidPathMissing,

    #[error("PID file not found or unreadable: {}", path.display())]
    PidFileNotFound { path: PathBuf },

    #[error("PID file {} does not contain a process id: {content:?}", path.display())]
    InvalidPidFile { path: PathBuf, content: String },

    #[error("Process not found: {pid}")]
    ProcessNotFound { pid: u32 },

    #[error("Invalid script: {0}")]
    InvalidScript(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[cfg(unix)]
    #[error("System call failed: {0}")]
    Sys(#[from] nix::Error),
}

pub type Result<T, E = SupervisorError> = std::result::Result<T, E>;
