mod cli;
mod commands;
mod error;
mod logging;

use std::io::Write;
use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use crate::cli::Cli;
use crate::error::CliError;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.log_format);

    match run(&cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(failure) => {
            error!(error = %failure, "pricefetch failed");
            eprintln!("error: {failure}");
            ExitCode::from(failure.exit_code())
        }
    }
}

async fn run(cli: &Cli) -> Result<(), CliError> {
    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted; finishing in-flight fetches");
            on_interrupt.cancel();
        }
    });

    let output = commands::run(cli, &cancel).await?;
    render(&output.data, cli.pretty)?;

    match output.failure {
        Some(failure) => Err(failure),
        None => Ok(()),
    }
}

fn render(data: &serde_json::Value, pretty: bool) -> Result<(), CliError> {
    let mut stdout = std::io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut stdout, data)?;
    } else {
        serde_json::to_writer(&mut stdout, data)?;
    }
    writeln!(stdout)?;
    Ok(())
}
