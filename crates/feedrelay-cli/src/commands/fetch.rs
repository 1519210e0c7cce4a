use feedrelay_core::{
    EnvelopeError, FetchOrchestrator, FetchRequest, UtcDateTime, ValidationError, LIVE_CACHE,
    STALE_CACHE,
};
use serde_json::json;

use crate::cli::FetchArgs;
use crate::error::CliError;

use super::CommandResult;

pub async fn run(
    args: &FetchArgs,
    orchestrator: &FetchOrchestrator,
) -> Result<CommandResult, CliError> {
    let request = build_request(args)?;
    let source_chain = vec![request.source_id.clone()];

    match orchestrator.fetch_source(&request).await {
        Ok(success) => {
            let warning = match success.proxy_used.as_deref() {
                Some(STALE_CACHE) => Some("served from stale cache after retries were exhausted"),
                Some(LIVE_CACHE) => Some("served from the published live snapshot"),
                _ if success.fallback_used => Some("served from the legacy endpoint"),
                _ => None,
            };
            let latency_ms = success.latency_ms;
            let cache_hit = success.cache_hit;
            let mut result = CommandResult::ok(serde_json::to_value(success)?, source_chain)
                .with_latency(latency_ms)
                .with_cache_hit(cache_hit);
            if let Some(warning) = warning {
                result = result.with_warning(warning);
            }
            Ok(result)
        }
        Err(failure) => {
            let error = EnvelopeError::from_fetch_error(&failure.error, &failure.source_id);
            let data = json!({
                "source_id": failure.source_id,
                "fetched_url": failure.fetched_url,
                "tries": failure.tries,
                "attempts": failure.attempts,
            });
            Ok(CommandResult::ok(data, source_chain)
                .with_errors(vec![error])
                .with_latency(failure.latency_ms))
        }
    }
}

fn build_request(args: &FetchArgs) -> Result<FetchRequest, CliError> {
    let source_id = args.source_id.trim();
    if source_id.is_empty() {
        return Err(ValidationError::EmptySourceId.into());
    }

    let mut request = FetchRequest::new(source_id);
    if let Some(query) = args.query.as_deref() {
        request = request.with_query(query);
    }
    for raw in &args.params {
        let (name, value) = parse_param(raw)?;
        request = request.with_param(name, value);
    }
    if let Some(code) = args.jurisdiction.as_deref() {
        request = request.with_jurisdiction(code.trim().to_ascii_uppercase());
    }
    if let (Some(start), Some(end)) = (args.start.as_deref(), args.end.as_deref()) {
        let (start_at, end_at) = (UtcDateTime::parse(start)?, UtcDateTime::parse(end)?);
        if start_at > end_at {
            return Err(ValidationError::InvalidDateRange {
                start: start.to_owned(),
                end: end.to_owned(),
            }
            .into());
        }
    }
    request.start = args.start.clone();
    request.end = args.end.clone();
    if let Some(key) = args.api_key.as_deref() {
        request = request.with_api_key(key);
    }
    if args.force {
        request = request.forced();
    }
    Ok(request)
}

fn parse_param(raw: &str) -> Result<(&str, &str), ValidationError> {
    raw.split_once('=')
        .map(|(name, value)| (name.trim(), value.trim()))
        .filter(|(name, _)| !name.is_empty())
        .ok_or_else(|| ValidationError::InvalidParam {
            value: raw.to_owned(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(source_id: &str) -> FetchArgs {
        FetchArgs {
            source_id: source_id.to_owned(),
            query: None,
            params: Vec::new(),
            jurisdiction: None,
            start: None,
            end: None,
            api_key: None,
            force: false,
        }
    }

    #[test]
    fn params_must_be_key_value() {
        assert_eq!(parse_param("series_id=UNRATE").expect("valid"), ("series_id", "UNRATE"));
        assert_eq!(parse_param("empty=").expect("valid"), ("empty", ""));
        assert!(parse_param("novalue").is_err());
        assert!(parse_param("=x").is_err());
    }

    #[test]
    fn request_carries_every_flag() {
        let mut fetch = args("acled");
        fetch.params = vec![String::from("country=Sudan")];
        fetch.jurisdiction = Some(String::from("ca"));
        fetch.start = Some(String::from("2024-01-01"));
        fetch.end = Some(String::from("2024-02-01"));
        fetch.api_key = Some(String::from("k"));
        fetch.force = true;

        let request = build_request(&fetch).expect("valid request");

        assert_eq!(request.params.get("country").map(String::as_str), Some("Sudan"));
        assert_eq!(request.jurisdiction.as_deref(), Some("CA"));
        assert_eq!(request.start.as_deref(), Some("2024-01-01"));
        assert!(request.force);
    }

    #[test]
    fn inverted_range_is_rejected_before_fetching() {
        let mut fetch = args("fred");
        fetch.start = Some(String::from("2024-03-01"));
        fetch.end = Some(String::from("2024-01-01"));

        let error = build_request(&fetch).expect_err("inverted range");

        assert_eq!(error.exit_code(), 2);
    }
}
