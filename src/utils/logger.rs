//! 日志系统
//!
//! 提供统一的日志记录功能

use anyhow::Result;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// 初始化日志系统
///
/// # Arguments
/// * `log_level` - 日志级别 (trace, debug, info, warn, error)，如果为 None 则使用环境变量 RUST_LOG
/// * `ansi` - 是否启用 ANSI 颜色；后台运行时输出写入日志文件，应关闭
///
/// # Examples
/// ```no_run
/// use forkwarden::utils::logger::init_logger;
///
/// // 使用默认配置（从环境变量读取）
/// init_logger(None, true).unwrap();
/// ```
pub fn init_logger(log_level: Option<&str>, ansi: bool) -> Result<()> {
    // 构建 EnvFilter，优先使用参数指定的级别，其次使用 RUST_LOG 环境变量
    let env_filter = if let Some(level) = log_level {
        EnvFilter::try_new(level)?
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            // 默认级别：库代码 info，应用代码 debug
            EnvFilter::new("info,forkwarden=debug")
        })
    };

    // 每条日志都重新获取 stdout，dup2 重定向之后仍然写入日志文件
    let fmt_layer = fmt::layer()
        .with_writer(std::io::stdout)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_ansi(ansi)
        .compact();

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_level_is_rejected() {
        assert!(init_logger(Some("forkwarden=notalevel"), false).is_err());
    }
}
