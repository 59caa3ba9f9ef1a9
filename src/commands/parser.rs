//! CLI 命令行参数解析
//!
//! 使用 clap 定义命令行接口并进行参数解析

use crate::config::{DEFAULT_CONFIG_PATH, DEFAULT_ENVIRONMENT, ENVIRONMENT_ENV};
use clap::{Parser, Subcommand};
use std::ffi::OsString;
use std::path::PathBuf;

/// forkwarden - prefork 进程监控
#[derive(Parser, Debug, Clone)]
#[command(
    name = "forkwarden",
    about = "Three-tier prefork process supervisor",
    version
)]
pub struct Cli {
    /// Configuration file (TOML, YAML or JSON)
    #[arg(short = 'c', long = "config", global = true, value_name = "CONFIG_FILE", default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Environment label exported to workers (default: $FORKWARDEN_ENV or development)
    #[arg(short = 'E', long = "environment", visible_short_alias = 'e', global = true, value_name = "ENVIRONMENT")]
    pub environment: Option<String>,

    /// Log filter, e.g. info or forkwarden=debug (default: $RUST_LOG)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commands {
    /// Supervise in the foreground
    Run,
    /// Detach into the background and write the pid file
    Start,
    /// Send TERMINATE to the running master
    Stop,
    /// Send RELOAD to the running master
    #[command(visible_alias = "restart")]
    Reload,
}

impl Cli {
    /// 尝试解析命令行参数（用于测试或自定义 argv）
    pub fn try_parse_command_from<I, T>(iter: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Self::try_parse_from(iter)
    }

    /// 解析后的环境：命令行优先，其次环境变量，最后默认值
    pub fn resolved_environment(&self) -> String {
        self.environment
            .clone()
            .or_else(|| std::env::var(ENVIRONMENT_ENV).ok().filter(|v| !v.is_empty()))
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }
}
