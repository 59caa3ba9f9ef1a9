//! Supervisor configuration
//!
//! `Config` is the fixed schema the supervision levels consume. It is built
//! once per generation, either by hand or by a [`ConfigSource`] such as
//! [`FileConfigSource`], and replaced wholesale on reload.

use crate::error::{Result, SupervisorError};
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

pub const DEFAULT_CONFIG_PATH: &str = "forkwarden.toml";
pub const DEFAULT_NAME: &str = "forkwarden";
pub const DEFAULT_ENVIRONMENT: &str = "development";

/// Environment label exported to every process of the tree
pub const ENVIRONMENT_ENV: &str = "FORKWARDEN_ENV";
/// Worker index exported to each worker
pub const WORKER_INDEX_ENV: &str = "FORKWARDEN_WORKER_INDEX";
/// Prefix of environment variables overriding config file keys
pub const CONFIG_ENV_PREFIX: &str = "FORKWARDEN";

pub const POLL_INTERVAL_DEFAULT: Duration = Duration::from_secs(2);
pub const RELOAD_TIMEOUT_DEFAULT: Duration = Duration::from_secs(4);

/// What a worker knows about itself when a function entry point runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerContext {
    pub index: usize,
    pub name: String,
    pub environment: String,
}

/// Worker entry point
///
/// Control never comes back to the supervisor: `Exec` replaces the worker's
/// image, and the worker exits as soon as a `Function` returns.
#[derive(Clone)]
pub enum Script {
    Exec(Vec<String>),
    Function(Arc<dyn Fn(&WorkerContext) + Send + Sync>),
}

impl Script {
    /// Run `command` through `/bin/sh`, which then replaces itself with it
    ///
    /// The `exec` prefix means only the first command of a `;` list runs.
    /// Use the argv form for compound scripts.
    pub fn shell(command: impl AsRef<str>) -> Self {
        Script::Exec(vec![
            "/bin/sh".to_string(),
            "-c".to_string(),
            format!("exec {}", command.as_ref()),
        ])
    }

    pub fn function<F>(entry: F) -> Self
    where
        F: Fn(&WorkerContext) + Send + Sync + 'static,
    {
        Script::Function(Arc::new(entry))
    }
}

impl fmt::Debug for Script {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Script::Exec(argv) => f.debug_tuple("Exec").field(argv).finish(),
            Script::Function(_) => f.write_str("Function(..)"),
        }
    }
}

/// Zero-argument lifecycle hook
#[derive(Clone, Default)]
pub enum Hook {
    #[default]
    Noop,
    /// Shell command, run to completion with `/bin/sh -c`
    Shell(String),
    Callback(Arc<dyn Fn() + Send + Sync>),
}

impl Hook {
    pub fn callback<F>(hook: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Hook::Callback(Arc::new(hook))
    }

    /// Run the hook, logging rather than propagating a failure
    ///
    /// A `Shell` hook waits for its child, so it must run while `SIGCHLD`
    /// still has its default disposition.
    pub fn run(&self, label: &str) {
        match self {
            Hook::Noop => {}
            Hook::Callback(hook) => hook(),
            Hook::Shell(command) => {
                debug!("Running {} hook: {}", label, command);
                match Command::new("/bin/sh").arg("-c").arg(command).status() {
                    Ok(status) if status.success() => {}
                    Ok(status) => warn!("{} hook exited with {}", label, status),
                    Err(err) => warn!("{} hook could not run: {}", label, err),
                }
            }
        }
    }
}

impl fmt::Debug for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Hook::Noop => f.write_str("Noop"),
            Hook::Shell(command) => f.debug_tuple("Shell").field(command).finish(),
            Hook::Callback(_) => f.write_str("Callback(..)"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub name: String,
    pub workers: usize,
    pub script: Script,
    pub before_fork: Hook,
    pub after_fork: Hook,
    pub log_path: Option<PathBuf>,
    pub pid_path: Option<PathBuf>,
    pub environment: String,
    pub poll_interval: Duration,
    /// Upper bound on waiting for the old parent during a reload
    pub reload_timeout: Duration,
}

impl Config {
    pub fn new(script: Script) -> Self {
        Self {
            name: DEFAULT_NAME.to_string(),
            workers: 1,
            script,
            before_fork: Hook::Noop,
            after_fork: Hook::Noop,
            log_path: None,
            pid_path: None,
            environment: DEFAULT_ENVIRONMENT.to_string(),
            poll_interval: POLL_INTERVAL_DEFAULT,
            reload_timeout: RELOAD_TIMEOUT_DEFAULT,
        }
    }
}

/// Where a master gets a fresh `Config` from, at start and on every reload
pub trait ConfigSource {
    fn load(&self) -> Result<Config>;
}

/// A fixed configuration, reloaded as-is
impl ConfigSource for Config {
    fn load(&self) -> Result<Config> {
        Ok(self.clone())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ScriptSpec {
    Command(String),
    Argv(Vec<String>),
}

/// On-disk schema
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default = "default_name")]
    name: String,
    #[serde(default = "default_workers")]
    workers: usize,
    script: ScriptSpec,
    #[serde(default)]
    before_fork: Option<String>,
    #[serde(default)]
    after_fork: Option<String>,
    #[serde(default)]
    log_path: Option<PathBuf>,
    #[serde(default)]
    pid_path: Option<PathBuf>,
    #[serde(default)]
    poll_interval_ms: Option<u64>,
    #[serde(default)]
    reload_timeout_ms: Option<u64>,
}

fn default_name() -> String {
    DEFAULT_NAME.to_string()
}

fn default_workers() -> usize {
    1
}

impl ConfigFile {
    fn into_config(self, base_dir: &Path, environment: &str) -> Result<Config> {
        let script = match self.script {
            ScriptSpec::Command(command) if command.trim().is_empty() => {
                return Err(SupervisorError::InvalidScript("script is empty".to_string()));
            }
            ScriptSpec::Command(command) => Script::shell(command),
            ScriptSpec::Argv(argv) if argv.is_empty() => {
                return Err(SupervisorError::InvalidScript("script is empty".to_string()));
            }
            ScriptSpec::Argv(argv) => Script::Exec(argv),
        };

        let resolve = |path: PathBuf| {
            if path.is_relative() && !base_dir.as_os_str().is_empty() {
                base_dir.join(path)
            } else {
                path
            }
        };

        Ok(Config {
            name: self.name,
            workers: self.workers,
            script,
            before_fork: self.before_fork.map(Hook::Shell).unwrap_or_default(),
            after_fork: self.after_fork.map(Hook::Shell).unwrap_or_default(),
            log_path: self.log_path.map(resolve),
            pid_path: self.pid_path.map(resolve),
            environment: environment.to_string(),
            poll_interval: self
                .poll_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(POLL_INTERVAL_DEFAULT),
            reload_timeout: self
                .reload_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(RELOAD_TIMEOUT_DEFAULT),
        })
    }
}

/// Loads `Config` from a TOML, YAML or JSON file
///
/// Layers, lowest priority first: the file itself, an optional
/// `<stem>.<environment>.<ext>` overlay next to it, then `FORKWARDEN_*`
/// environment variables.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    environment: String,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>, environment: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            environment: environment.into(),
        }
    }

    fn overlay_path(&self) -> Option<PathBuf> {
        let stem = self.path.file_stem()?.to_string_lossy();
        let file_name = match self.path.extension() {
            Some(ext) => format!("{}.{}.{}", stem, self.environment, ext.to_string_lossy()),
            None => format!("{}.{}", stem, self.environment),
        };
        Some(self.path.with_file_name(file_name))
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<Config> {
        if !self.path.is_file() {
            return Err(SupervisorError::ConfigNotFound {
                path: self.path.clone(),
            });
        }

        let mut builder =
            ::config::Config::builder().add_source(::config::File::from(self.path.as_path()));
        if let Some(overlay) = self.overlay_path() {
            builder = builder.add_source(::config::File::from(overlay.as_path()).required(false));
        }
        let settings = builder
            .add_source(::config::Environment::with_prefix(CONFIG_ENV_PREFIX).try_parsing(true))
            .build()?;

        let file: ConfigFile = settings.try_deserialize()?;
        let base_dir = self.path.parent().unwrap_or_else(|| Path::new(""));
        file.into_config(base_dir, &self.environment)
    }
}
