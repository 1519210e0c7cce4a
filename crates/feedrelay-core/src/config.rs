//! Runtime configuration for the fetch core.
//!
//! # Environment Variables
//!
//! | Variable | Format | Purpose |
//! |----------|--------|---------|
//! | `FEEDRELAY_RELAYS` | `name=template;name=template` | Relay URL templates, `{url}` is the encoded target |
//! | `FEEDRELAY_GENERIC_RELAYS` | `name,name` | Relays tried after a source's own relay |
//! | `FEEDRELAY_SNAPSHOT_BASE` | URL | Static site publishing last-known-good snapshots |
//! | `FEEDRELAY_TOTAL_DEADLINE_MS` | integer | Upper bound for one whole fetch |
//! | `FEEDRELAY_<GROUP>_API_KEY` / `<GROUP>_API_KEY` | string | Server-side source keys |

use std::collections::BTreeMap;
use std::env;
use std::time::Duration;

use crate::retry::{FixedAttemptPolicy, RateLimitPolicy};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub relays: BTreeMap<String, String>,
    pub generic_relays: Vec<String>,
    pub snapshot_base: Option<String>,
    pub snapshot_timeout_ms: u64,
    pub default_error_ttl: Duration,
    pub total_deadline: Option<Duration>,
    pub fixed_attempt: FixedAttemptPolicy,
    pub rate_limit: RateLimitPolicy,
    pub fan_out: FanOutConfig,
    pub money_flow: MoneyFlowSources,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            relays: BTreeMap::new(),
            generic_relays: Vec::new(),
            snapshot_base: None,
            snapshot_timeout_ms: 5_000,
            default_error_ttl: Duration::from_secs(60),
            total_deadline: None,
            fixed_attempt: FixedAttemptPolicy::default(),
            rate_limit: RateLimitPolicy::default(),
            fan_out: FanOutConfig::default(),
            money_flow: MoneyFlowSources::default(),
        }
    }
}

impl FetchConfig {
    /// Defaults overlaid with whatever `FEEDRELAY_*` variables are set.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(raw) = env::var("FEEDRELAY_RELAYS") {
            config.relays = parse_relays(&raw);
        }
        if let Ok(raw) = env::var("FEEDRELAY_GENERIC_RELAYS") {
            config.generic_relays = parse_list(&raw);
        }
        if let Ok(base) = env::var("FEEDRELAY_SNAPSHOT_BASE") {
            let base = base.trim().trim_end_matches('/').to_owned();
            if !base.is_empty() {
                config.snapshot_base = Some(base);
            }
        }
        if let Some(ms) = env::var("FEEDRELAY_TOTAL_DEADLINE_MS")
            .ok()
            .and_then(|raw| raw.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
        {
            config.total_deadline = Some(Duration::from_millis(ms));
        }

        config
    }

    pub fn with_relay(mut self, name: impl Into<String>, template: impl Into<String>) -> Self {
        self.relays.insert(name.into(), template.into());
        self
    }

    pub fn with_generic_relays<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.generic_relays = names.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_snapshot_base(mut self, base: impl Into<String>) -> Self {
        self.snapshot_base = Some(base.into().trim_end_matches('/').to_owned());
        self
    }

    pub fn with_total_deadline(mut self, deadline: Duration) -> Self {
        self.total_deadline = Some(deadline);
        self
    }
}

/// Bounded fan-out settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FanOutConfig {
    /// Hard ceiling on concurrent jurisdiction requests.
    pub workers: usize,
    /// Width of the time bucket that rotates the queue's starting state.
    pub rotation_bucket: Duration,
    pub request_timeout_ms: u64,
}

impl Default for FanOutConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            rotation_bucket: Duration::from_secs(15 * 60),
            request_timeout_ms: 8_000,
        }
    }
}

/// Catalog ids of the sources behind each money-flow role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoneyFlowSources {
    pub lobbying: String,
    pub spending: String,
    pub campaign: String,
    pub registry: String,
}

impl Default for MoneyFlowSources {
    fn default() -> Self {
        Self {
            lobbying: String::from("senate-lda"),
            spending: String::from("usaspending"),
            campaign: String::from("fec"),
            registry: String::from("opensanctions"),
        }
    }
}

/// Server-side API keys by key group.
#[derive(Debug, Clone, Default)]
pub struct ApiKeys {
    keys: BTreeMap<String, String>,
    read_env: bool,
}

impl ApiKeys {
    /// Explicit keys first, then `FEEDRELAY_<GROUP>_API_KEY`, then `<GROUP>_API_KEY`.
    pub fn from_env() -> Self {
        Self {
            keys: BTreeMap::new(),
            read_env: true,
        }
    }

    pub fn with_key(mut self, group: impl Into<String>, key: impl Into<String>) -> Self {
        self.keys
            .insert(group.into().to_ascii_lowercase(), key.into());
        self
    }

    pub fn resolve(&self, group: &str) -> Option<String> {
        if let Some(key) = self.keys.get(&group.to_ascii_lowercase()) {
            return Some(key.clone());
        }
        if !self.read_env {
            return None;
        }

        let var_group = group.to_ascii_uppercase().replace('-', "_");
        env::var(format!("FEEDRELAY_{var_group}_API_KEY"))
            .or_else(|_| env::var(format!("{var_group}_API_KEY")))
            .ok()
            .filter(|key| !key.trim().is_empty())
    }
}

fn parse_relays(raw: &str) -> BTreeMap<String, String> {
    raw.split(';')
        .filter_map(|entry| entry.split_once('='))
        .map(|(name, template)| (name.trim().to_owned(), template.trim().to_owned()))
        .filter(|(name, template)| !name.is_empty() && !template.is_empty())
        .collect()
}

fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|name| !name.is_empty())
        .map(str::to_owned)
        .collect()
}
