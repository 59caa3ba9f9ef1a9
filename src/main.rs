use clap::Parser;
use forkwarden::commands::{dispatch, Cli, Commands};
use forkwarden::utils::logger::init_logger;
use std::io::IsTerminal;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // 后台运行时日志写入文件，关闭颜色
    let ansi = cli.command != Commands::Start && std::io::stdout().is_terminal();
    if let Err(err) = init_logger(cli.log_level.as_deref(), ansi) {
        eprintln!("Failed to initialize logger: {}", err);
        return ExitCode::from(1);
    }

    match dispatch(&cli) {
        Ok(()) => ExitCode::from(0),
        Err(err) => {
            eprintln!("{}", err);
            ExitCode::from(1)
        }
    }
}
