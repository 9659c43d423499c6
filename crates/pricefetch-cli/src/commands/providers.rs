use pricefetch_core::{Capability, UtcDateTime};
use serde_json::json;

use crate::cli::Cli;
use crate::error::CliError;

use super::{build_engine, CommandOutput};

pub fn run(cli: &Cli) -> Result<CommandOutput, CliError> {
    let engine = build_engine(cli, None)?;
    let now = UtcDateTime::now();

    let providers: Vec<_> = engine
        .provider_report()
        .into_iter()
        .map(|descriptor| {
            let capabilities: Vec<&str> = descriptor
                .capabilities
                .to_list()
                .into_iter()
                .map(Capability::as_str)
                .collect();
            json!({
                "name": descriptor.name,
                "priority": descriptor.priority,
                "capabilities": capabilities,
                "status": descriptor.status_label(now),
                "usage": descriptor.usage,
            })
        })
        .collect();

    Ok(CommandOutput::ok(json!({
        "providers": providers,
        "max_concurrency": engine.config().max_concurrency,
        "failure_threshold": engine.config().failure_threshold,
        "call_timeout_ms": engine.config().call_timeout_ms,
    })))
}
