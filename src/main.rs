//! linkbroker - WebSocket message broker for named instances.

use clap::Parser;
use std::process::ExitCode;

use linkbroker::Commands;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Commands::parse();

    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
