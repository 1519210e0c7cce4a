use std::sync::Arc;
use std::time::Instant;

use feedrelay_core::{CoreError, EnvelopeError, FanOutEngine, FetchOrchestrator};
use serde_json::json;

use crate::cli::FanoutArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(
    args: &FanoutArgs,
    orchestrator: Arc<FetchOrchestrator>,
) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let source_chain = vec![args.source_id.clone()];
    let engine = FanOutEngine::new(orchestrator);

    let result = match engine
        .fetch_all_jurisdictions(&args.source_id, args.target)
        .await
    {
        Ok(result) => result,
        // Missing credentials are reported in the envelope like any fetch failure.
        Err(CoreError::Fetch(error)) => {
            let data = json!({ "rows": [], "meta": null });
            return Ok(CommandResult::ok(data, source_chain)
                .with_errors(vec![EnvelopeError::from_fetch_error(&error, &args.source_id)]));
        }
        Err(error) => return Err(error.into()),
    };

    let mut warnings = Vec::new();
    if !result.meta.failed_states.is_empty() {
        warnings.push(format!(
            "{} of {} attempted states failed: {}",
            result.meta.failed_states.len(),
            result.meta.attempted_states,
            result.meta.failed_states.join(",")
        ));
    }

    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
    let mut command = CommandResult::ok(serde_json::to_value(result)?, source_chain)
        .with_latency(latency_ms);
    for warning in warnings {
        command = command.with_warning(warning);
    }
    Ok(command)
}
