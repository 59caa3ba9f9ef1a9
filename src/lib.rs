//! forkwarden library
//!
//! Three-tier prefork supervisor: a master owns one parent per generation,
//! the parent owns a fixed fleet of workers, and administrative signals
//! cascade down the tree.

#[cfg(not(unix))]
compile_error!("forkwarden relies on fork(2) and POSIX signals and only builds on unix targets");

pub mod commands;
pub mod config;
pub mod error;
pub mod master;
pub mod pidfile;
pub mod platform;
pub mod registry;
pub mod signal;
pub mod supervisor;
pub mod utils;
pub mod worker;

// Re-export commonly used types for convenience
pub use config::{Config, ConfigSource, FileConfigSource, Hook, Script, WorkerContext};
pub use error::{Result, SupervisorError};
pub use master::{Master, StartMode, StartOutcome};
pub use registry::{ProcessRecord, ProcessRegistry, Role};
pub use signal::{SignalIntent, SignalKind};
pub use supervisor::ParentSupervisor;
