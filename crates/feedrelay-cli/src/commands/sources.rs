use feedrelay_core::{Catalog, FeedDefinition, FeedFormat, JurisdictionLevel, KeySource, RetryMode};
use serde::Serialize;

use crate::cli::SourcesArgs;
use crate::error::CliError;

use super::CommandResult;

#[derive(Debug, Serialize)]
struct SourceEntry<'a> {
    id: &'a str,
    format: FeedFormat,
    configured: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    key: Option<KeySource>,
    supports_query: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    proxy: Option<&'a str>,
    retry: RetryMode,
    ttl_minutes: u64,
    jurisdictional: bool,
}

impl<'a> From<&'a FeedDefinition> for SourceEntry<'a> {
    fn from(definition: &'a FeedDefinition) -> Self {
        Self {
            id: &definition.id,
            format: definition.format,
            configured: definition.is_configured(),
            key: definition.requires_key.then_some(definition.key_source),
            supports_query: definition.supports_query,
            proxy: definition.proxy.as_deref(),
            retry: definition.retry,
            ttl_minutes: definition.ttl_minutes,
            jurisdictional: definition.jurisdiction_level == Some(JurisdictionLevel::State),
        }
    }
}

#[derive(Debug, Serialize)]
struct SourcesResponseData<'a> {
    sources: Vec<SourceEntry<'a>>,
}

pub fn run(args: &SourcesArgs, catalog: &Catalog) -> Result<CommandResult, CliError> {
    let sources: Vec<SourceEntry<'_>> = catalog
        .iter()
        .map(SourceEntry::from)
        .filter(|entry| !args.jurisdictional || entry.jurisdictional)
        .collect();
    let source_chain = sources.iter().map(|entry| entry.id.to_owned()).collect();
    let unconfigured: Vec<&str> = sources
        .iter()
        .filter(|entry| !entry.configured)
        .map(|entry| entry.id)
        .collect();

    let data = serde_json::to_value(SourcesResponseData { sources })?;
    let mut result = CommandResult::ok(data, source_chain).with_cache_hit(true);
    if !unconfigured.is_empty() {
        result = result.with_warning(format!(
            "sources without a URL: {}",
            unconfigured.join(",")
        ));
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> Catalog {
        Catalog::from_definitions(vec![
            FeedDefinition::new("openstates", "https://bills.test/{jurisdiction}", FeedFormat::Json)
                .with_jurisdiction_level(JurisdictionLevel::State),
            FeedDefinition::new("gdelt", "https://feeds.test/rss", FeedFormat::Rss),
            FeedDefinition::new("pending", "", FeedFormat::Json),
        ])
        .expect("valid catalog")
    }

    #[test]
    fn lists_every_source_and_warns_about_unconfigured_ones() {
        let result = run(&SourcesArgs { jurisdictional: false }, &catalog()).expect("runs");

        assert_eq!(result.source_chain.len(), 3);
        assert_eq!(result.warnings, vec![String::from("sources without a URL: pending")]);
    }

    #[test]
    fn jurisdictional_filter_keeps_state_sources() {
        let result = run(&SourcesArgs { jurisdictional: true }, &catalog()).expect("runs");

        assert_eq!(result.source_chain, vec![String::from("openstates")]);
        assert_eq!(result.data["sources"][0]["jurisdictional"], true);
    }
}
