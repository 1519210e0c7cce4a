//! Static source catalog.
//!
//! The catalog is read-only input to the core: definitions are loaded once,
//! validated for unique ids, and never mutated by fetches.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, ValidationError};
use crate::retry::RetryMode;

/// Wire format of a source. Drives response validation in the relay chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedFormat {
    Rss,
    Json,
    Arcgis,
    Csv,
}

impl FeedFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Rss => "rss",
            Self::Json => "json",
            Self::Arcgis => "arcgis",
            Self::Csv => "csv",
        }
    }

    /// JSON-style APIs answer 4xx authoritatively; relays cannot fix them.
    pub const fn client_errors_are_authoritative(self) -> bool {
        matches!(self, Self::Json | Self::Arcgis)
    }

    pub const fn default_content_type(self) -> &'static str {
        match self {
            Self::Rss => "application/rss+xml",
            Self::Json | Self::Arcgis => "application/json",
            Self::Csv => "text/csv",
        }
    }
}

impl Display for FeedFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a required API key comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    /// Read from the process environment by key group.
    #[default]
    Server,
    /// Supplied by the caller with each request.
    Client,
}

/// How request parameters map onto the source's own vocabulary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParamStrategy {
    #[default]
    Template,
    QueryString,
    JurisdictionName,
    JurisdictionLower,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JurisdictionLevel {
    State,
    Federal,
}

/// One upstream source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeedDefinition {
    pub id: String,
    #[serde(default)]
    pub url: String,
    pub format: FeedFormat,
    #[serde(default)]
    pub requires_key: bool,
    #[serde(default)]
    pub key_source: KeySource,
    #[serde(default)]
    pub key_group: Option<String>,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u64,
    #[serde(default)]
    pub error_ttl_seconds: Option<u64>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub proxy: Option<String>,
    #[serde(default)]
    pub supports_query: bool,
    #[serde(default)]
    pub supports_params: bool,
    #[serde(default)]
    pub param_strategy: ParamStrategy,
    #[serde(default)]
    pub acled_mode: Option<String>,
    #[serde(default)]
    pub jurisdiction_level: Option<JurisdictionLevel>,
    #[serde(default)]
    pub retry: RetryMode,
    #[serde(default = "default_cache_errors")]
    pub cache_errors: bool,
    #[serde(default)]
    pub legacy_url: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
}

const fn default_ttl_minutes() -> u64 {
    10
}

const fn default_timeout_ms() -> u64 {
    12_000
}

const fn default_cache_errors() -> bool {
    true
}

impl FeedDefinition {
    pub fn new(id: impl Into<String>, url: impl Into<String>, format: FeedFormat) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            format,
            requires_key: false,
            key_source: KeySource::Server,
            key_group: None,
            ttl_minutes: default_ttl_minutes(),
            error_ttl_seconds: None,
            timeout_ms: default_timeout_ms(),
            proxy: None,
            supports_query: false,
            supports_params: false,
            param_strategy: ParamStrategy::Template,
            acled_mode: None,
            jurisdiction_level: None,
            retry: RetryMode::None,
            cache_errors: true,
            legacy_url: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_key(mut self, source: KeySource, group: impl Into<String>) -> Self {
        self.requires_key = true;
        self.key_source = source;
        self.key_group = Some(group.into());
        self
    }

    pub fn with_proxy(mut self, relay: impl Into<String>) -> Self {
        self.proxy = Some(relay.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_ttl_minutes(mut self, ttl_minutes: u64) -> Self {
        self.ttl_minutes = ttl_minutes;
        self
    }

    pub fn with_error_ttl_seconds(mut self, seconds: u64) -> Self {
        self.error_ttl_seconds = Some(seconds);
        self
    }

    pub fn with_retry(mut self, retry: RetryMode) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_param_strategy(mut self, strategy: ParamStrategy) -> Self {
        self.supports_params = true;
        self.param_strategy = strategy;
        self
    }

    pub fn with_jurisdiction_level(mut self, level: JurisdictionLevel) -> Self {
        self.jurisdiction_level = Some(level);
        self
    }

    pub fn with_legacy_url(mut self, url: impl Into<String>) -> Self {
        self.legacy_url = Some(url.into());
        self
    }

    pub fn supporting_query(mut self) -> Self {
        self.supports_query = true;
        self
    }

    pub fn supporting_params(mut self) -> Self {
        self.supports_params = true;
        self
    }

    pub fn without_error_cache(mut self) -> Self {
        self.cache_errors = false;
        self
    }

    pub fn is_configured(&self) -> bool {
        !self.url.trim().is_empty()
    }

    /// Expands the URL template for one request.
    pub fn render_url(&self, ctx: &RenderContext<'_>) -> String {
        render_template(&self.url, self, ctx)
    }

    pub fn render_legacy_url(&self, ctx: &RenderContext<'_>) -> Option<String> {
        self.legacy_url
            .as_deref()
            .filter(|template| !template.trim().is_empty())
            .map(|template| render_template(template, self, ctx))
    }
}

/// Values available to URL placeholders.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderContext<'a> {
    pub key: Option<&'a str>,
    pub query: Option<&'a str>,
    pub start: Option<&'a str>,
    pub end: Option<&'a str>,
    pub jurisdiction: Option<&'a str>,
    pub params: Option<&'a BTreeMap<String, String>>,
}

fn render_template(template: &str, definition: &FeedDefinition, ctx: &RenderContext<'_>) -> String {
    let params = ctx
        .params
        .filter(|_| definition.supports_params);
    let mut consumed = BTreeSet::new();
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        output.push_str(&rest[..open]);
        let name = &rest[open + 1..open + close];
        let value = match name {
            "key" => ctx.key.map(str::to_owned),
            "query" => ctx
                .query
                .filter(|_| definition.supports_query)
                .map(str::to_owned),
            "start" => ctx.start.map(str::to_owned),
            "end" => ctx.end.map(str::to_owned),
            "mode" => definition.acled_mode.clone(),
            "jurisdiction" => ctx
                .jurisdiction
                .map(|code| map_jurisdiction(code, definition.param_strategy)),
            "year" => params
                .and_then(|params| params.get("year").cloned())
                .or_else(|| ctx.start.and_then(|start| start.get(..4)).map(str::to_owned)),
            other => params.and_then(|params| params.get(other).cloned()),
        };
        consumed.insert(name.to_owned());
        if let Some(value) = value {
            output.push_str(&urlencoding::encode(&value));
        }
        rest = &rest[open + close + 1..];
    }
    output.push_str(rest);

    if definition.param_strategy == ParamStrategy::QueryString {
        if let Some(params) = params {
            let extra: Vec<String> = params
                .iter()
                .filter(|(name, _)| !consumed.contains(name.as_str()))
                .map(|(name, value)| {
                    format!("{}={}", urlencoding::encode(name), urlencoding::encode(value))
                })
                .collect();
            if !extra.is_empty() {
                output.push(if output.contains('?') { '&' } else { '?' });
                output.push_str(&extra.join("&"));
            }
        }
    }

    output
}

fn map_jurisdiction(code: &str, strategy: ParamStrategy) -> String {
    match strategy {
        ParamStrategy::JurisdictionName => state_name(code)
            .map(str::to_owned)
            .unwrap_or_else(|| code.to_owned()),
        ParamStrategy::JurisdictionLower => code.to_ascii_lowercase(),
        ParamStrategy::Template | ParamStrategy::QueryString => code.to_ascii_uppercase(),
    }
}

/// The 50 US states as (postal code, name), alphabetical by code.
pub const US_STATES: [(&str, &str); 50] = [
    ("AK", "Alaska"),
    ("AL", "Alabama"),
    ("AR", "Arkansas"),
    ("AZ", "Arizona"),
    ("CA", "California"),
    ("CO", "Colorado"),
    ("CT", "Connecticut"),
    ("DE", "Delaware"),
    ("FL", "Florida"),
    ("GA", "Georgia"),
    ("HI", "Hawaii"),
    ("IA", "Iowa"),
    ("ID", "Idaho"),
    ("IL", "Illinois"),
    ("IN", "Indiana"),
    ("KS", "Kansas"),
    ("KY", "Kentucky"),
    ("LA", "Louisiana"),
    ("MA", "Massachusetts"),
    ("MD", "Maryland"),
    ("ME", "Maine"),
    ("MI", "Michigan"),
    ("MN", "Minnesota"),
    ("MO", "Missouri"),
    ("MS", "Mississippi"),
    ("MT", "Montana"),
    ("NC", "North Carolina"),
    ("ND", "North Dakota"),
    ("NE", "Nebraska"),
    ("NH", "New Hampshire"),
    ("NJ", "New Jersey"),
    ("NM", "New Mexico"),
    ("NV", "Nevada"),
    ("NY", "New York"),
    ("OH", "Ohio"),
    ("OK", "Oklahoma"),
    ("OR", "Oregon"),
    ("PA", "Pennsylvania"),
    ("RI", "Rhode Island"),
    ("SC", "South Carolina"),
    ("SD", "South Dakota"),
    ("TN", "Tennessee"),
    ("TX", "Texas"),
    ("UT", "Utah"),
    ("VA", "Virginia"),
    ("VT", "Vermont"),
    ("WA", "Washington"),
    ("WI", "Wisconsin"),
    ("WV", "West Virginia"),
    ("WY", "Wyoming"),
];

pub fn state_name(code: &str) -> Option<&'static str> {
    US_STATES
        .iter()
        .find(|(candidate, _)| candidate.eq_ignore_ascii_case(code))
        .map(|(_, name)| *name)
}

/// Immutable id → definition table.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    definitions: BTreeMap<String, FeedDefinition>,
}

impl Catalog {
    pub fn from_definitions(definitions: Vec<FeedDefinition>) -> Result<Self, ValidationError> {
        let mut map = BTreeMap::new();
        for definition in definitions {
            let id = definition.id.trim().to_owned();
            if id.is_empty() {
                return Err(ValidationError::EmptySourceId);
            }
            if map.contains_key(&id) {
                return Err(ValidationError::DuplicateSourceId { id });
            }
            map.insert(id, definition);
        }
        Ok(Self { definitions: map })
    }

    /// Parses a JSON array of definitions.
    pub fn from_json_str(json: &str) -> Result<Self, CoreError> {
        let definitions: Vec<FeedDefinition> = serde_json::from_str(json)?;
        Ok(Self::from_definitions(definitions)?)
    }

    pub fn get(&self, id: &str) -> Option<&FeedDefinition> {
        self.definitions.get(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &FeedDefinition> {
        self.definitions.values()
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_placeholders_with_percent_encoding() {
        let definition = FeedDefinition::new(
            "fred",
            "https://api.test/series?id={series}&api_key={key}&q={query}",
            FeedFormat::Json,
        )
        .supporting_query()
        .supporting_params();
        let mut params = BTreeMap::new();
        params.insert(String::from("series"), String::from("GDP"));

        let url = definition.render_url(&RenderContext {
            key: Some("k1"),
            query: Some("crude oil"),
            params: Some(&params),
            ..RenderContext::default()
        });

        assert_eq!(url, "https://api.test/series?id=GDP&api_key=k1&q=crude%20oil");
    }

    #[test]
    fn query_is_dropped_for_sources_without_query_support() {
        let definition =
            FeedDefinition::new("usgs", "https://quakes.test/feed?q={query}", FeedFormat::Json);

        let url = definition.render_url(&RenderContext {
            query: Some("ignored"),
            ..RenderContext::default()
        });

        assert_eq!(url, "https://quakes.test/feed?q=");
    }

    #[test]
    fn query_string_strategy_appends_unconsumed_params() {
        let definition = FeedDefinition::new(
            "acled",
            "https://acled.test/read?mode={mode}",
            FeedFormat::Json,
        )
        .with_param_strategy(ParamStrategy::QueryString);
        let definition = FeedDefinition {
            acled_mode: Some(String::from("events")),
            ..definition
        };
        let mut params = BTreeMap::new();
        params.insert(String::from("country"), String::from("Sudan"));

        let url = definition.render_url(&RenderContext {
            params: Some(&params),
            ..RenderContext::default()
        });

        assert_eq!(url, "https://acled.test/read?mode=events&country=Sudan");
    }

    #[test]
    fn jurisdiction_strategies_map_codes_to_source_vocabulary() {
        let by_name =
            FeedDefinition::new("legis", "https://l.test/{jurisdiction}", FeedFormat::Json)
                .with_param_strategy(ParamStrategy::JurisdictionName);
        let lower = FeedDefinition::new("legis", "https://l.test/{jurisdiction}", FeedFormat::Json)
            .with_param_strategy(ParamStrategy::JurisdictionLower);
        let ctx = RenderContext {
            jurisdiction: Some("NM"),
            ..RenderContext::default()
        };

        assert_eq!(by_name.render_url(&ctx), "https://l.test/New%20Mexico");
        assert_eq!(lower.render_url(&ctx), "https://l.test/nm");
    }

    #[test]
    fn year_falls_back_to_start_date() {
        let definition =
            FeedDefinition::new("lda", "https://lda.test/?filing_year={year}", FeedFormat::Json);

        let url = definition.render_url(&RenderContext {
            start: Some("2024-11-02"),
            ..RenderContext::default()
        });

        assert_eq!(url, "https://lda.test/?filing_year=2024");
    }

    #[test]
    fn catalog_rejects_duplicate_ids() {
        let err = Catalog::from_definitions(vec![
            FeedDefinition::new("a", "https://a.test", FeedFormat::Rss),
            FeedDefinition::new("a", "https://b.test", FeedFormat::Rss),
        ])
        .expect_err("duplicate ids must fail");

        assert_eq!(err, ValidationError::DuplicateSourceId { id: String::from("a") });
    }

    #[test]
    fn catalog_parses_camel_case_json_with_defaults() {
        let catalog = Catalog::from_json_str(
            r#"[{"id":"eia","url":"https://eia.test/?api_key={key}","format":"json",
                 "requiresKey":true,"keyGroup":"eia","retry":"fixed_attempt",
                 "cacheErrors":false}]"#,
        )
        .expect("catalog parses");

        let eia = catalog.get("eia").expect("eia present");
        assert!(eia.requires_key);
        assert_eq!(eia.key_source, KeySource::Server);
        assert_eq!(eia.retry, RetryMode::FixedAttempt);
        assert!(!eia.cache_errors);
        assert_eq!(eia.ttl_minutes, 10);
        assert_eq!(eia.timeout_ms, 12_000);
    }

    #[test]
    fn state_table_has_fifty_unique_codes() {
        let codes: BTreeSet<&str> = US_STATES.iter().map(|(code, _)| *code).collect();
        assert_eq!(codes.len(), 50);
        assert_eq!(state_name("tx"), Some("Texas"));
    }
}
