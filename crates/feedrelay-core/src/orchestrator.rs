//! Resilient fetch orchestration.
//!
//! ```text
//! fetch_source
//!   ├─ validate: catalog entry, configured URL, API key
//!   ├─ fresh cache entry ─────────────────────────────► return
//!   ├─ retry mode
//!   │    none          → relay chain
//!   │    fixed_attempt → relay chain ×5 → stale cache → legacy URL
//!   │    rate_limited  → relay chain, repeated on 429 ×3
//!   ├─ success → cache for ttl_minutes ───────────────► return
//!   └─ failure → live snapshot → cache error response → return
//! ```
//!
//! Credential and configuration errors return before any network call and
//! never reach the fallback tiers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::cache::{cache_key, CacheEntry, CacheStore, CachedPayload};
use crate::catalog::{Catalog, FeedDefinition, KeySource, RenderContext};
use crate::config::{ApiKeys, FetchConfig};
use crate::error::FetchError;
use crate::http_client::{HttpClient, HttpResponse};
use crate::redact::redact_url;
use crate::relay::{
    elapsed_ms, plan_relays, run_chain, AttemptRecord, ChainFailure, ChainRequest, ChainResult,
    ChainSuccess,
};
use crate::retry::RetryMode;
use crate::snapshot::{fetch_snapshot, snapshot_url};

/// `proxy_used` marker for a stale last-good cache entry.
pub const STALE_CACHE: &str = "stale-cache";
/// `proxy_used` marker for a published live snapshot.
pub const LIVE_CACHE: &str = "live-cache";

/// One fetch of a catalog source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchRequest {
    pub source_id: String,
    pub query: Option<String>,
    pub params: BTreeMap<String, String>,
    pub jurisdiction: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    /// Skip the fresh-cache check. The result is still cached.
    pub force: bool,
    /// Caller-supplied key for client-keyed sources.
    pub api_key: Option<String>,
}

impl FetchRequest {
    pub fn new(source_id: impl Into<String>) -> Self {
        Self {
            source_id: source_id.into(),
            ..Self::default()
        }
    }

    pub fn with_query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    pub fn with_jurisdiction(mut self, code: impl Into<String>) -> Self {
        self.jurisdiction = Some(code.into());
        self
    }

    pub fn with_range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn forced(mut self) -> Self {
        self.force = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchSuccess {
    pub source_id: String,
    pub body: String,
    pub http_status: u16,
    pub content_type: String,
    /// Upstream URL with secrets redacted.
    pub fetched_url: String,
    /// Relay name, [`STALE_CACHE`], [`LIVE_CACHE`], or `None` for a direct hit.
    pub proxy_used: Option<String>,
    pub fallback_used: bool,
    pub cache_hit: bool,
    /// Passes made by the retry policy, including a legacy-endpoint pass.
    pub tries: u32,
    pub attempts: Vec<AttemptRecord>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchFailure {
    pub source_id: String,
    pub error: FetchError,
    pub fetched_url: Option<String>,
    pub tries: u32,
    pub attempts: Vec<AttemptRecord>,
    pub latency_ms: u64,
}

impl FetchFailure {
    fn early(source_id: &str, error: FetchError, started: Instant) -> Self {
        Self {
            source_id: source_id.to_owned(),
            error,
            fetched_url: None,
            tries: 0,
            attempts: Vec::new(),
            latency_ms: elapsed_ms(started),
        }
    }
}

impl AsRef<FetchError> for FetchFailure {
    fn as_ref(&self) -> &FetchError {
        &self.error
    }
}

pub type FetchResult = Result<FetchSuccess, FetchFailure>;

/// A validated request bound to its rendered URLs.
struct Target<'a> {
    definition: &'a FeedDefinition,
    url: String,
    legacy_url: Option<String>,
    cache_key: String,
}

enum Attempted {
    Fetched {
        chain: ChainSuccess,
        tries: u32,
        fallback: bool,
    },
    Stale {
        entry: CacheEntry,
        failure: ChainFailure,
        tries: u32,
    },
    Failed {
        failure: ChainFailure,
        tries: u32,
    },
}

/// Fetches catalog sources through cache, relays, retries and fallbacks.
pub struct FetchOrchestrator {
    catalog: Arc<Catalog>,
    config: FetchConfig,
    client: Arc<dyn HttpClient>,
    cache: CacheStore,
    keys: ApiKeys,
}

impl FetchOrchestrator {
    pub fn new(catalog: Arc<Catalog>, config: FetchConfig, client: Arc<dyn HttpClient>) -> Self {
        Self {
            catalog,
            config,
            client,
            cache: CacheStore::new(),
            keys: ApiKeys::default(),
        }
    }

    pub fn with_cache(mut self, cache: CacheStore) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_keys(mut self, keys: ApiKeys) -> Self {
        self.keys = keys;
        self
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    pub fn client(&self) -> &dyn HttpClient {
        self.client.as_ref()
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    /// Fetches one source, bounded by `total_deadline` when configured.
    pub async fn fetch_source(&self, request: &FetchRequest) -> FetchResult {
        let started = Instant::now();
        let Some(deadline) = self.config.total_deadline else {
            return self.fetch_unbounded(request, started).await;
        };

        match tokio::time::timeout(deadline, self.fetch_unbounded(request, started)).await {
            Ok(result) => result,
            Err(_) => {
                let deadline_ms = u64::try_from(deadline.as_millis()).unwrap_or(u64::MAX);
                tracing::warn!(source = %request.source_id, deadline_ms, "fetch deadline exceeded");
                Err(FetchFailure::early(
                    &request.source_id,
                    FetchError::fetch_failed(format!("fetch exceeded deadline of {deadline_ms}ms")),
                    started,
                ))
            }
        }
    }

    async fn fetch_unbounded(&self, request: &FetchRequest, started: Instant) -> FetchResult {
        let source_id = request.source_id.as_str();
        let definition = self
            .catalog
            .get(source_id)
            .ok_or_else(|| {
                FetchFailure::early(source_id, FetchError::unknown_source(source_id), started)
            })?;
        if !definition.is_configured() {
            return Err(FetchFailure::early(
                source_id,
                FetchError::requires_config(source_id),
                started,
            ));
        }
        let key = self
            .resolve_key(definition, request)
            .map_err(|error| FetchFailure::early(source_id, error, started))?;

        let target = bind_target(definition, request, key.as_deref());

        if !request.force {
            if let Some(entry) = self.cache.get_fresh(&target.cache_key).await {
                tracing::debug!(source = source_id, key = %target.cache_key, "cache hit");
                return from_cache_entry(&target, entry, started);
            }
        }

        let attempted = match definition.retry {
            RetryMode::None => match self.walk(&target, &target.url, definition.timeout_ms).await {
                Ok(chain) => Attempted::Fetched {
                    chain,
                    tries: 1,
                    fallback: false,
                },
                Err(failure) => Attempted::Failed { failure, tries: 1 },
            },
            RetryMode::FixedAttempt => self.fetch_fixed_attempt(&target).await,
            RetryMode::RateLimited => self.fetch_rate_limited(&target).await,
        };

        match attempted {
            Attempted::Fetched {
                chain,
                tries,
                fallback,
            } => {
                self.store_response(&target, &chain.response, success_ttl(definition))
                    .await;
                Ok(FetchSuccess {
                    source_id: definition.id.clone(),
                    content_type: content_type_of(definition, &chain.response),
                    body: chain.response.body,
                    http_status: chain.response.status,
                    fetched_url: chain.fetched_url,
                    proxy_used: chain.proxy_used,
                    fallback_used: fallback,
                    cache_hit: false,
                    tries,
                    attempts: chain.attempts,
                    latency_ms: elapsed_ms(started),
                })
            }
            Attempted::Stale {
                entry,
                failure,
                tries,
            } => {
                tracing::warn!(
                    source = source_id,
                    age_ms = entry.age_ms(self.cache.clock().now_ms()),
                    error = %failure.error,
                    "serving stale cache after retries were exhausted"
                );
                Ok(FetchSuccess {
                    source_id: definition.id.clone(),
                    content_type: entry
                        .payload
                        .content_type
                        .unwrap_or_else(|| definition.format.default_content_type().to_owned()),
                    body: entry.payload.body,
                    http_status: entry.payload.http_status,
                    fetched_url: failure.fetched_url,
                    proxy_used: Some(STALE_CACHE.to_owned()),
                    fallback_used: true,
                    cache_hit: true,
                    tries,
                    attempts: failure.attempts,
                    latency_ms: elapsed_ms(started),
                })
            }
            Attempted::Failed { failure, tries } => {
                self.recover(&target, failure, tries, started).await
            }
        }
    }

    pub(crate) fn resolve_key(
        &self,
        definition: &FeedDefinition,
        request: &FetchRequest,
    ) -> Result<Option<String>, FetchError> {
        if !definition.requires_key {
            return Ok(None);
        }
        match definition.key_source {
            KeySource::Client => request
                .api_key
                .clone()
                .filter(|key| !key.trim().is_empty())
                .map(Some)
                .ok_or_else(|| FetchError::missing_key(&definition.id)),
            KeySource::Server => {
                let group = definition.key_group.as_deref().unwrap_or(&definition.id);
                self.keys
                    .resolve(group)
                    .map(Some)
                    .ok_or_else(|| FetchError::missing_server_key(&definition.id, group))
            }
        }
    }

    async fn walk(&self, target: &Target<'_>, url: &str, total_timeout_ms: u64) -> ChainResult {
        let plan = plan_relays(target.definition, &self.config);
        let request = ChainRequest {
            source_id: &target.definition.id,
            url,
            headers: &target.definition.headers,
            format: target.definition.format,
            total_timeout_ms,
        };
        run_chain(self.client.as_ref(), &request, &plan).await
    }

    async fn fetch_fixed_attempt(&self, target: &Target<'_>) -> Attempted {
        let policy = self.config.fixed_attempt;
        let (result, tries) = policy
            .run(target.definition.timeout_ms, |_, timeout_ms| {
                self.walk(target, &target.url, timeout_ms)
            })
            .await;
        let failure = match result {
            Ok(chain) => {
                return Attempted::Fetched {
                    chain,
                    tries,
                    fallback: false,
                }
            }
            Err(failure) => failure,
        };

        if let Some(entry) = self
            .cache
            .get_stale(&target.cache_key)
            .await
            .filter(|entry| entry.payload.is_success())
        {
            return Attempted::Stale {
                entry,
                failure,
                tries,
            };
        }

        let Some(legacy_url) = target.legacy_url.as_deref() else {
            return Attempted::Failed { failure, tries };
        };
        tracing::info!(
            source = %target.definition.id,
            error = %failure.error,
            "primary endpoint exhausted; trying legacy endpoint"
        );
        match self
            .walk(target, legacy_url, target.definition.timeout_ms)
            .await
        {
            Ok(chain) => Attempted::Fetched {
                chain,
                tries: tries + 1,
                fallback: true,
            },
            Err(failure) => Attempted::Failed {
                failure,
                tries: tries + 1,
            },
        }
    }

    async fn fetch_rate_limited(&self, target: &Target<'_>) -> Attempted {
        let policy = self.config.rate_limit;
        let (result, tries) = policy
            .run(|_| self.walk(target, &target.url, target.definition.timeout_ms))
            .await;
        match result {
            Ok(chain) => Attempted::Fetched {
                chain,
                tries,
                fallback: false,
            },
            Err(failure) => Attempted::Failed { failure, tries },
        }
    }

    /// Live-snapshot tier, then error caching.
    async fn recover(
        &self,
        target: &Target<'_>,
        failure: ChainFailure,
        tries: u32,
        started: Instant,
    ) -> FetchResult {
        let definition = target.definition;

        if let Some(base) = self.config.snapshot_base.as_deref() {
            if let Some(snapshot) = fetch_snapshot(
                self.client.as_ref(),
                base,
                &definition.id,
                self.config.snapshot_timeout_ms,
            )
            .await
            {
                tracing::info!(
                    source = %definition.id,
                    error = %failure.error,
                    "serving live snapshot"
                );
                return Ok(FetchSuccess {
                    source_id: definition.id.clone(),
                    body: snapshot.body,
                    http_status: snapshot.http_status,
                    content_type: snapshot
                        .content_type
                        .unwrap_or_else(|| definition.format.default_content_type().to_owned()),
                    fetched_url: redact_url(&snapshot_url(base, &definition.id)),
                    proxy_used: Some(LIVE_CACHE.to_owned()),
                    fallback_used: true,
                    cache_hit: false,
                    tries,
                    attempts: failure.attempts,
                    latency_ms: elapsed_ms(started),
                });
            }
        }

        let cacheable = failure.authoritative || definition.retry == RetryMode::RateLimited;
        if definition.cache_errors && cacheable {
            if let Some(response) = failure.response.as_ref() {
                self.store_response(target, response, self.error_ttl(definition))
                    .await;
            }
        }

        Err(FetchFailure {
            source_id: definition.id.clone(),
            error: failure.error,
            fetched_url: Some(failure.fetched_url),
            tries,
            attempts: failure.attempts,
            latency_ms: elapsed_ms(started),
        })
    }

    async fn store_response(&self, target: &Target<'_>, response: &HttpResponse, ttl: Duration) {
        let payload = CachedPayload {
            body: response.body.clone(),
            http_status: response.status,
            content_type: response.content_type().map(str::to_owned),
            retry_after_secs: response.retry_after_secs(),
        };
        self.cache
            .put(target.cache_key.clone(), payload, ttl)
            .await;
    }

    fn error_ttl(&self, definition: &FeedDefinition) -> Duration {
        definition
            .error_ttl_seconds
            .map(Duration::from_secs)
            .unwrap_or(self.config.default_error_ttl)
    }
}

fn bind_target<'a>(
    definition: &'a FeedDefinition,
    request: &FetchRequest,
    key: Option<&str>,
) -> Target<'a> {
    let ctx = RenderContext {
        key,
        query: request.query.as_deref(),
        start: request.start.as_deref(),
        end: request.end.as_deref(),
        jurisdiction: request.jurisdiction.as_deref(),
        params: Some(&request.params),
    };

    let mut key_params = if definition.supports_params {
        request.params.clone()
    } else {
        BTreeMap::new()
    };
    if let Some(code) = request.jurisdiction.as_deref() {
        key_params.insert(String::from("jurisdiction"), code.to_ascii_uppercase());
    }
    let query = request
        .query
        .as_deref()
        .filter(|_| definition.supports_query);

    Target {
        definition,
        url: definition.render_url(&ctx),
        legacy_url: definition.render_legacy_url(&ctx),
        cache_key: cache_key(
            &definition.id,
            query,
            &key_params,
            (request.start.as_deref(), request.end.as_deref()),
        ),
    }
}

fn from_cache_entry(target: &Target<'_>, entry: CacheEntry, started: Instant) -> FetchResult {
    let definition = target.definition;
    let status = entry.payload.http_status;
    if entry.payload.is_success() {
        return Ok(FetchSuccess {
            source_id: definition.id.clone(),
            content_type: entry
                .payload
                .content_type
                .unwrap_or_else(|| definition.format.default_content_type().to_owned()),
            body: entry.payload.body,
            http_status: status,
            fetched_url: redact_url(&target.url),
            proxy_used: None,
            fallback_used: false,
            cache_hit: true,
            tries: 0,
            attempts: Vec::new(),
            latency_ms: elapsed_ms(started),
        });
    }

    let error = if status == 429 {
        FetchError::rate_limited(
            "upstream rate limit (cached)",
            entry.payload.retry_after_secs,
        )
    } else {
        FetchError::upstream_status(status, format!("upstream answered HTTP {status} (cached)"))
    };
    Err(FetchFailure {
        source_id: definition.id.clone(),
        error,
        fetched_url: Some(redact_url(&target.url)),
        tries: 0,
        attempts: Vec::new(),
        latency_ms: elapsed_ms(started),
    })
}

fn success_ttl(definition: &FeedDefinition) -> Duration {
    Duration::from_secs(definition.ttl_minutes.saturating_mul(60))
}

fn content_type_of(definition: &FeedDefinition, response: &HttpResponse) -> String {
    response
        .content_type()
        .unwrap_or(definition.format.default_content_type())
        .to_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::FeedFormat;
    use crate::http_client::ScriptedHttpClient;

    fn orchestrator(definitions: Vec<FeedDefinition>, keys: ApiKeys) -> FetchOrchestrator {
        let catalog = Catalog::from_definitions(definitions).expect("valid catalog");
        let client = ScriptedHttpClient::new(|_| Ok(HttpResponse::ok_json("{}")));
        FetchOrchestrator::new(Arc::new(catalog), FetchConfig::default(), Arc::new(client))
            .with_keys(keys)
    }

    #[test]
    fn server_key_group_defaults_to_source_id() {
        let definition = FeedDefinition::new("fred", "https://f.test/?k={key}", FeedFormat::Json)
            .with_key(KeySource::Server, "fred");
        let orchestrator = orchestrator(
            vec![definition.clone()],
            ApiKeys::default().with_key("fred", "k1"),
        );

        let key = orchestrator
            .resolve_key(&definition, &FetchRequest::new("fred"))
            .expect("key resolves");

        assert_eq!(key.as_deref(), Some("k1"));
    }

    #[test]
    fn blank_client_key_counts_as_missing() {
        let definition = FeedDefinition::new("acled", "https://a.test/?k={key}", FeedFormat::Json)
            .with_key(KeySource::Client, "acled");
        let orchestrator = orchestrator(vec![definition.clone()], ApiKeys::default());

        let error = orchestrator
            .resolve_key(&definition, &FetchRequest::new("acled").with_api_key("  "))
            .expect_err("blank key rejected");

        assert_eq!(error.code(), "missing_key");
    }

    #[test]
    fn jurisdiction_and_query_shape_the_cache_key() {
        let definition = FeedDefinition::new(
            "bills",
            "https://b.test/{jurisdiction}?q={query}",
            FeedFormat::Json,
        )
        .supporting_query();
        let request = FetchRequest::new("bills")
            .with_query("  Water  Rights ")
            .with_jurisdiction("ca");

        let target = bind_target(&definition, &request, None);

        assert_eq!(target.url, "https://b.test/CA?q=%20%20Water%20%20Rights%20");
        assert_eq!(target.cache_key, "bills|q=water rights|jurisdiction=CA");
    }
}
