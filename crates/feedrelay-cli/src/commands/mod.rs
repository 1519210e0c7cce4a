mod fanout;
mod fetch;
mod money_flow;
mod sources;

use std::path::Path;
use std::sync::Arc;

use feedrelay_core::{
    ApiKeys, Catalog, Envelope, EnvelopeError, FetchConfig, FetchOrchestrator, ReqwestHttpClient,
};
use serde_json::Value;

use crate::cli::{Cli, Command};
use crate::error::CliError;
use crate::metadata::Metadata;

pub struct CommandResult {
    pub data: Value,
    pub warnings: Vec<String>,
    pub errors: Vec<EnvelopeError>,
    pub latency_ms: u64,
    pub cache_hit: bool,
    pub source_chain: Vec<String>,
}

impl CommandResult {
    pub fn ok(data: Value, source_chain: Vec<String>) -> Self {
        Self {
            data,
            warnings: Vec::new(),
            errors: Vec::new(),
            latency_ms: 0,
            cache_hit: false,
            source_chain,
        }
    }

    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        self.warnings.push(warning.into());
        self
    }

    pub fn with_errors(mut self, errors: Vec<EnvelopeError>) -> Self {
        self.errors.extend(errors);
        self
    }

    pub fn with_latency(mut self, latency_ms: u64) -> Self {
        self.latency_ms = latency_ms;
        self
    }

    pub fn with_cache_hit(mut self, cache_hit: bool) -> Self {
        self.cache_hit = cache_hit;
        self
    }
}

pub async fn run(cli: &Cli) -> Result<Envelope<Value>, CliError> {
    let catalog = Arc::new(load_catalog(&cli.catalog)?);
    tracing::debug!(
        catalog = %cli.catalog.display(),
        sources = catalog.len(),
        "catalog loaded"
    );

    let command_result = match &cli.command {
        Command::Fetch(args) => fetch::run(args, &orchestrator(&catalog)).await?,
        Command::Fanout(args) => fanout::run(args, orchestrator(&catalog)).await?,
        Command::MoneyFlow(args) => money_flow::run(args, orchestrator(&catalog)).await?,
        Command::Sources(args) => sources::run(args, &catalog)?,
    };

    let CommandResult {
        data,
        warnings,
        errors,
        latency_ms,
        cache_hit,
        source_chain,
    } = command_result;

    let mut metadata = Metadata::new(source_chain, latency_ms, cache_hit);
    for warning in warnings {
        metadata.push_warning(warning);
    }
    let meta = metadata.into_envelope_meta()?;

    Envelope::with_errors(meta, data, errors).map_err(CliError::from)
}

/// Live orchestrator: relays, deadline and server keys come from the environment.
fn orchestrator(catalog: &Arc<Catalog>) -> Arc<FetchOrchestrator> {
    Arc::new(
        FetchOrchestrator::new(
            Arc::clone(catalog),
            FetchConfig::from_env(),
            Arc::new(ReqwestHttpClient::new()),
        )
        .with_keys(ApiKeys::from_env()),
    )
}

pub fn load_catalog(path: &Path) -> Result<Catalog, CliError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|error| CliError::Catalog(format!("{}: {error}", path.display())))?;
    Catalog::from_json_str(&raw)
        .map_err(|error| CliError::Catalog(format!("{}: {error}", path.display())))
}
