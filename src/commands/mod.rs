//! CLI 命令处理模块
//!
//! 把 run / start / stop / reload 转换为对 Master 的调用

pub mod parser;

pub use parser::{Cli, Commands};

use crate::config::{ConfigSource, FileConfigSource};
use crate::error::Result;
use crate::master::{self, Master, StartMode, StartOutcome};

/// 执行一条命令，错误交给 main 统一报告
pub fn dispatch(cli: &Cli) -> Result<()> {
    let source = FileConfigSource::new(&cli.config, cli.resolved_environment());
    let config = source.load()?;

    match cli.command {
        Commands::Run => {
            Master::new(config, source).start(StartMode::Foreground)?;
        }
        Commands::Start => {
            let name = config.name.clone();
            if let StartOutcome::Detached { pid } =
                Master::new(config, source).start(StartMode::Background)?
            {
                println!("Started {} master (pid {})", name, pid);
            }
        }
        Commands::Stop => {
            let pid = master::stop(&config)?;
            println!("Sent TERMINATE to {} master (pid {})", config.name, pid);
        }
        Commands::Reload => {
            let pid = master::reload(&config)?;
            println!("Sent RELOAD to {} master (pid {})", config.name, pid);
        }
    }
    Ok(())
}
