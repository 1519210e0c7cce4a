//! Proxy fallback chain.
//!
//! A fetch walks an ordered, de-duplicated list of relay strategies:
//! direct first, then the source's own relay, then generic relays. The first
//! acceptable response wins; if none is acceptable the **last** failure is
//! reported, since it is the one closest to the live upstream.

use std::collections::{BTreeMap, HashSet};
use std::time::Instant;

use serde::Serialize;

use crate::catalog::{FeedDefinition, FeedFormat};
use crate::config::FetchConfig;
use crate::error::FetchError;
use crate::http_client::{send_with_deadline, HttpClient, HttpRequest, HttpResponse};
use crate::redact::redact_url;

/// Share of the total budget given to the first attempt when relays follow.
const FIRST_ATTEMPT_SHARE_PERCENT: u64 = 70;
const MIN_ATTEMPT_TIMEOUT_MS: u64 = 500;

/// One way of reaching the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RelayStrategy {
    Direct,
    Relay { name: String, template: String },
}

impl RelayStrategy {
    pub fn label(&self) -> &str {
        match self {
            Self::Direct => "direct",
            Self::Relay { name, .. } => name,
        }
    }

    /// Relay name for `proxy_used`; `None` for direct calls.
    pub fn proxy_name(&self) -> Option<&str> {
        match self {
            Self::Direct => None,
            Self::Relay { name, .. } => Some(name),
        }
    }

    /// URL actually requested for `target` through this strategy.
    pub fn request_url(&self, target: &str) -> String {
        match self {
            Self::Direct => target.to_owned(),
            Self::Relay { template, .. } => {
                let encoded = urlencoding::encode(target);
                if template.contains("{url}") {
                    template.replace("{url}", &encoded)
                } else {
                    format!("{template}{encoded}")
                }
            }
        }
    }
}

/// Direct, then the source's relay, then generic relays, without duplicates.
/// Relay names missing from the config are skipped.
pub fn plan_relays(definition: &FeedDefinition, config: &FetchConfig) -> Vec<RelayStrategy> {
    let mut names: Vec<&str> = Vec::new();
    if let Some(proxy) = definition.proxy.as_deref() {
        names.push(proxy);
    }
    names.extend(config.generic_relays.iter().map(String::as_str));

    let mut seen = HashSet::new();
    let mut plan = vec![RelayStrategy::Direct];
    for name in names {
        if !seen.insert(name) {
            continue;
        }
        match config.relays.get(name) {
            Some(template) => plan.push(RelayStrategy::Relay {
                name: name.to_owned(),
                template: template.clone(),
            }),
            None => tracing::warn!(
                source = %definition.id,
                relay = name,
                "relay is not configured; skipping"
            ),
        }
    }
    plan
}

/// Per-attempt deadlines for `count` candidates sharing `total_ms`.
///
/// A lone candidate gets everything. Otherwise the first gets 70% and the
/// rest split the remainder evenly, each at least 500ms.
pub fn attempt_timeouts(total_ms: u64, count: usize) -> Vec<u64> {
    match count {
        0 => Vec::new(),
        1 => vec![total_ms.max(MIN_ATTEMPT_TIMEOUT_MS)],
        _ => {
            let first = total_ms * FIRST_ATTEMPT_SHARE_PERCENT / 100;
            let remainder = total_ms.saturating_sub(first);
            let each = remainder / (count as u64 - 1);
            std::iter::once(first)
                .chain(std::iter::repeat(each).take(count - 1))
                .map(|ms| ms.max(MIN_ATTEMPT_TIMEOUT_MS))
                .collect()
        }
    }
}

/// RSS/Atom/RDF bodies must open with an XML or feed root marker.
pub fn looks_like_feed(body: &str) -> bool {
    let head: String = body
        .trim_start_matches('\u{feff}')
        .trim_start()
        .chars()
        .take(16)
        .collect::<String>()
        .to_ascii_lowercase();
    ["<?xml", "<rss", "<feed", "<rdf:rdf"]
        .iter()
        .any(|marker| head.starts_with(marker))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AttemptOutcome {
    Accepted { status: u16 },
    HttpStatus { status: u16 },
    InvalidBody { status: u16 },
    TransportError { message: String },
    TimedOut { timeout_ms: u64 },
}

/// One physical call made while walking the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub relay: String,
    /// Redacted.
    pub url: String,
    pub timeout_ms: u64,
    #[serde(flatten)]
    pub outcome: AttemptOutcome,
}

/// What to fetch and how to judge the answer.
#[derive(Debug, Clone)]
pub struct ChainRequest<'a> {
    pub source_id: &'a str,
    pub url: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub format: FeedFormat,
    pub total_timeout_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ChainSuccess {
    pub response: HttpResponse,
    pub proxy_used: Option<String>,
    /// Redacted URL of the upstream target.
    pub fetched_url: String,
    pub attempts: Vec<AttemptRecord>,
    pub latency_ms: u64,
}

#[derive(Debug, Clone)]
pub struct ChainFailure {
    pub error: FetchError,
    /// Error response behind `error`, when the last failure had one.
    pub response: Option<HttpResponse>,
    /// Set when a JSON/ArcGIS client error ended the chain early.
    pub authoritative: bool,
    pub fetched_url: String,
    pub attempts: Vec<AttemptRecord>,
    pub latency_ms: u64,
}

impl AsRef<FetchError> for ChainFailure {
    fn as_ref(&self) -> &FetchError {
        &self.error
    }
}

pub type ChainResult = Result<ChainSuccess, ChainFailure>;

/// Walks `candidates` in order until one returns an acceptable response.
pub async fn run_chain(
    client: &dyn HttpClient,
    request: &ChainRequest<'_>,
    candidates: &[RelayStrategy],
) -> ChainResult {
    let started = Instant::now();
    let fetched_url = redact_url(request.url);
    let timeouts = attempt_timeouts(request.total_timeout_ms, candidates.len());
    let mut attempts = Vec::with_capacity(candidates.len());
    let mut last_failure: Option<(FetchError, Option<HttpResponse>)> = None;

    for (strategy, timeout_ms) in candidates.iter().zip(timeouts) {
        let target = strategy.request_url(request.url);
        let redacted = redact_url(&target);
        let http_request = HttpRequest::get(target)
            .with_headers(request.headers)
            .with_timeout_ms(timeout_ms);

        tracing::debug!(
            source = request.source_id,
            relay = strategy.label(),
            url = %redacted,
            timeout_ms,
            "relay attempt"
        );

        match send_with_deadline(client, http_request).await {
            Ok(response) if response.is_success() => {
                if request.format == FeedFormat::Rss && !looks_like_feed(&response.body) {
                    attempts.push(AttemptRecord {
                        relay: strategy.label().to_owned(),
                        url: redacted,
                        timeout_ms,
                        outcome: AttemptOutcome::InvalidBody {
                            status: response.status,
                        },
                    });
                    last_failure = Some((
                        FetchError::invalid_rss(format!(
                            "{} returned {} without feed markup",
                            strategy.label(),
                            response.status
                        )),
                        None,
                    ));
                    continue;
                }

                attempts.push(AttemptRecord {
                    relay: strategy.label().to_owned(),
                    url: redacted,
                    timeout_ms,
                    outcome: AttemptOutcome::Accepted {
                        status: response.status,
                    },
                });
                if strategy.proxy_name().is_some() {
                    tracing::info!(
                        source = request.source_id,
                        relay = strategy.label(),
                        failed_attempts = attempts.len() - 1,
                        "served through relay"
                    );
                }
                return Ok(ChainSuccess {
                    response,
                    proxy_used: strategy.proxy_name().map(str::to_owned),
                    fetched_url,
                    attempts,
                    latency_ms: elapsed_ms(started),
                });
            }
            Ok(response) => {
                let status = response.status;
                attempts.push(AttemptRecord {
                    relay: strategy.label().to_owned(),
                    url: redacted,
                    timeout_ms,
                    outcome: AttemptOutcome::HttpStatus { status },
                });
                let error = status_error(strategy, &response);

                let authoritative = request.format.client_errors_are_authoritative()
                    && (400..500).contains(&status)
                    && status != 429;
                if authoritative {
                    tracing::debug!(
                        source = request.source_id,
                        status,
                        "client error is authoritative; stopping relay chain"
                    );
                    return Err(ChainFailure {
                        error,
                        response: Some(response),
                        authoritative: true,
                        fetched_url,
                        attempts,
                        latency_ms: elapsed_ms(started),
                    });
                }
                last_failure = Some((error, Some(response)));
            }
            Err(error) => {
                let outcome = if error.timed_out() {
                    AttemptOutcome::TimedOut { timeout_ms }
                } else {
                    AttemptOutcome::TransportError {
                        message: error.message().to_owned(),
                    }
                };
                attempts.push(AttemptRecord {
                    relay: strategy.label().to_owned(),
                    url: redacted,
                    timeout_ms,
                    outcome,
                });
                last_failure = Some((
                    FetchError::fetch_failed(format!("{}: {}", strategy.label(), error.message())),
                    None,
                ));
            }
        }
    }

    let (error, response) = last_failure
        .unwrap_or_else(|| (FetchError::fetch_failed("no relay candidates available"), None));
    tracing::warn!(
        source = request.source_id,
        attempts = attempts.len(),
        error = %error,
        "relay chain exhausted"
    );

    Err(ChainFailure {
        error,
        response,
        authoritative: false,
        fetched_url,
        attempts,
        latency_ms: elapsed_ms(started),
    })
}

fn status_error(strategy: &RelayStrategy, response: &HttpResponse) -> FetchError {
    if response.status == 429 {
        FetchError::rate_limited(
            format!("{} answered 429", strategy.label()),
            response.retry_after_secs(),
        )
    } else {
        FetchError::upstream_status(
            response.status,
            format!("{} answered HTTP {}", strategy.label(), response.status),
        )
    }
}

pub(crate) fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().min(u128::from(u64::MAX)) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::{HttpError, ScriptedHttpClient};

    fn config() -> FetchConfig {
        FetchConfig::default()
            .with_relay("railway", "https://railway.test/fetch?url={url}")
            .with_relay("cors", "https://cors.test/")
            .with_generic_relays(["railway", "cors"])
    }

    #[test]
    fn plan_is_direct_then_own_relay_then_generics_deduplicated() {
        let definition =
            FeedDefinition::new("f", "https://up.test/", FeedFormat::Rss).with_proxy("railway");

        let labels: Vec<String> = plan_relays(&definition, &config())
            .iter()
            .map(|strategy| strategy.label().to_owned())
            .collect();

        assert_eq!(labels, vec!["direct", "railway", "cors"]);
    }

    #[test]
    fn plan_skips_unknown_relays() {
        let definition =
            FeedDefinition::new("f", "https://up.test/", FeedFormat::Rss).with_proxy("ghost");

        let plan = plan_relays(&definition, &FetchConfig::default());

        assert_eq!(plan, vec![RelayStrategy::Direct]);
    }

    #[test]
    fn relay_url_embeds_encoded_target() {
        let strategy = RelayStrategy::Relay {
            name: String::from("railway"),
            template: String::from("https://railway.test/fetch?url={url}"),
        };
        let appended = RelayStrategy::Relay {
            name: String::from("cors"),
            template: String::from("https://cors.test/"),
        };

        assert_eq!(
            strategy.request_url("https://up.test/a?b=1"),
            "https://railway.test/fetch?url=https%3A%2F%2Fup.test%2Fa%3Fb%3D1"
        );
        assert_eq!(
            appended.request_url("https://up.test/"),
            "https://cors.test/https%3A%2F%2Fup.test%2F"
        );
    }

    #[test]
    fn first_attempt_gets_seventy_percent_of_budget() {
        assert_eq!(attempt_timeouts(10_000, 1), vec![10_000]);
        assert_eq!(attempt_timeouts(10_000, 3), vec![7_000, 1_500, 1_500]);
        assert_eq!(attempt_timeouts(1_000, 3), vec![700, 500, 500]);
        assert!(attempt_timeouts(10_000, 0).is_empty());
    }

    #[test]
    fn feed_markers_are_detected_case_insensitively() {
        assert!(looks_like_feed("\u{feff}  <?xml version=\"1.0\"?><rss/>"));
        assert!(looks_like_feed("<RSS version=\"2.0\">"));
        assert!(looks_like_feed("<feed xmlns=\"http://www.w3.org/2005/Atom\">"));
        assert!(looks_like_feed("<rdf:RDF>"));
        assert!(!looks_like_feed("<!DOCTYPE html><html>"));
        assert!(!looks_like_feed(""));
    }

    #[tokio::test(start_paused = true)]
    async fn reports_last_failure_when_every_candidate_fails() {
        let client = ScriptedHttpClient::new(|request| {
            if request.url.starts_with("https://up.test") {
                Err(HttpError::new("connection refused"))
            } else {
                Ok(HttpResponse::new(502, "bad gateway"))
            }
        });
        let definition =
            FeedDefinition::new("f", "https://up.test/", FeedFormat::Json).with_proxy("railway");
        let plan = plan_relays(&definition, &config());
        let headers = BTreeMap::new();

        let failure = run_chain(
            &client,
            &ChainRequest {
                source_id: "f",
                url: "https://up.test/",
                headers: &headers,
                format: FeedFormat::Json,
                total_timeout_ms: 10_000,
            },
            &plan,
        )
        .await
        .expect_err("all candidates fail");

        assert_eq!(failure.attempts.len(), 3);
        assert_eq!(failure.error.http_status(), Some(502));
        assert!(failure.error.message().contains("cors"));
        assert!(!failure.authoritative);
    }

    #[tokio::test(start_paused = true)]
    async fn html_interstitial_is_rejected_for_rss_sources() {
        let client = ScriptedHttpClient::new(|request| {
            if request.url.starts_with("https://up.test") {
                Ok(HttpResponse::new(200, "<!DOCTYPE html><p>checking your browser</p>"))
            } else {
                Ok(HttpResponse::new(200, "<?xml version=\"1.0\"?><rss></rss>"))
            }
        });
        let definition =
            FeedDefinition::new("f", "https://up.test/", FeedFormat::Rss).with_proxy("railway");
        let plan = plan_relays(&definition, &config());
        let headers = BTreeMap::new();

        let success = run_chain(
            &client,
            &ChainRequest {
                source_id: "f",
                url: "https://up.test/",
                headers: &headers,
                format: FeedFormat::Rss,
                total_timeout_ms: 10_000,
            },
            &plan,
        )
        .await
        .expect("relay serves the real feed");

        assert_eq!(success.proxy_used.as_deref(), Some("railway"));
        assert_eq!(
            success.attempts[0].outcome,
            AttemptOutcome::InvalidBody { status: 200 }
        );
    }
}
