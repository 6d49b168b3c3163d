//! Spray CLI Binary Entry Point

use clap::Parser;
use spray_cli::{exit_code, init_logging, report_failure, run_cli, Args, LoggingConfig};
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Initialize logging
    if let Err(e) = init_logging(&LoggingConfig::from_flags(args.debug, args.json_logs)) {
        eprintln!("Failed to initialize logging: {:#}", e);
        return ExitCode::FAILURE;
    }

    match run_cli(args).await {
        Ok(report) => ExitCode::from(exit_code(&report.status)),
        Err(e) => {
            report_failure(&e);
            ExitCode::FAILURE
        }
    }
}
