use std::sync::Arc;
use std::time::Instant;

use feedrelay_core::{
    EnvelopeError, FetchOrchestrator, MoneyFlowAggregator, MoneyFlowQuery, MoneyFlowReport,
};

use crate::cli::MoneyFlowArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(
    args: &MoneyFlowArgs,
    orchestrator: Arc<FetchOrchestrator>,
) -> Result<CommandResult, CliError> {
    let started = Instant::now();
    let query = MoneyFlowQuery {
        query: args.query.clone(),
        start: args.start.clone(),
        end: args.end.clone(),
        limit: args.limit,
    };
    let aggregator = MoneyFlowAggregator::new(orchestrator);
    let report = aggregator.aggregate_money_flows(&query).await?;

    let source_chain = report
        .source_status
        .values()
        .map(|status| status.source_id.clone())
        .fold(Vec::new(), |mut chain, id| {
            if !chain.contains(&id) {
                chain.push(id);
            }
            chain
        });
    let errors = source_errors(&report)?;
    let cache_hit = report.source_status.values().all(|status| status.cache_hit);
    let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let mut result = CommandResult::ok(serde_json::to_value(report)?, source_chain)
        .with_errors(errors)
        .with_latency(latency_ms)
        .with_cache_hit(cache_hit);
    if !result.errors.is_empty() {
        result = result.with_warning("partial results: some money-flow sources failed");
    }
    Ok(result)
}

/// One envelope error per failed source, labelled by task.
fn source_errors(report: &MoneyFlowReport) -> Result<Vec<EnvelopeError>, CliError> {
    report
        .source_status
        .iter()
        .filter(|(_, status)| !status.ok)
        .map(|(label, status)| {
            let code = status.error_code.as_deref().unwrap_or("fetch_failed");
            let message = status.error.as_deref().unwrap_or("source failed");
            Ok(EnvelopeError::new(code, message)?.with_source(label.clone()))
        })
        .collect()
}
