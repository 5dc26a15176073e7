use std::process::ExitCode;

use clap::Parser;
use docbase_cli::Cli;
use docbase_telemetry::LogFormat;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let format = if cli.json_logs { LogFormat::Json } else { LogFormat::Pretty };
    if let Err(e) = docbase_telemetry::init("docbase", cli.log_level, format) {
        eprintln!("warning: logging disabled: {e}");
    }

    match docbase_cli::cli::run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}
