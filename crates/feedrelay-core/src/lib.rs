//! # Feedrelay Core
//!
//! Resilient fetching for public-data feeds that fail in ordinary ways:
//! geo-blocks, rate limits, slow legacy endpoints, HTML interstitials where a
//! feed should be.
//!
//! ## Overview
//!
//! - **Fetch orchestrator** serving one source through cache, relays,
//!   retries and last-resort snapshots
//! - **Proxy fallback chain** walking direct and relay candidates in order
//! - **Retry policies** for legacy time-series and rate-limited search APIs
//! - **Bounded fan-out** over US state jurisdictions with early stop
//! - **Money-flow aggregator** merging, scoring and summarizing four sources
//!
//! ## Modules
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | Last-good payload cache with injectable clock |
//! | [`catalog`] | Source definitions and URL templating |
//! | [`clock`] | Wall-clock abstraction |
//! | [`config`] | Relays, snapshot base, deadlines, API keys |
//! | [`envelope`] | Response envelope with metadata |
//! | [`error`] | Validation and fetch error types |
//! | [`fanout`] | Per-jurisdiction fan-out engine |
//! | [`http_client`] | HTTP client abstraction and deadline wrapper |
//! | [`money_flow`] | Lobbying, spending, campaign and registry aggregation |
//! | [`orchestrator`] | `fetch_source` and its fallback tiers |
//! | [`redact`] | Secret scrubbing for URLs |
//! | [`relay`] | Proxy fallback chain |
//! | [`retry`] | Fixed-attempt and rate-limit policies |
//! | [`snapshot`] | Published live-snapshot fallback |
//! | [`timestamp`] | UTC timestamps |
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use feedrelay_core::{Catalog, FetchConfig, FetchOrchestrator, FetchRequest, ReqwestHttpClient};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let catalog = Catalog::from_json_str(&std::fs::read_to_string("catalog.json")?)?;
//!     let orchestrator = FetchOrchestrator::new(
//!         Arc::new(catalog),
//!         FetchConfig::from_env(),
//!         Arc::new(ReqwestHttpClient::new()),
//!     );
//!
//!     match orchestrator.fetch_source(&FetchRequest::new("gdelt")).await {
//!         Ok(success) => println!("{} bytes via {:?}", success.body.len(), success.proxy_used),
//!         Err(failure) => eprintln!("{}", failure.error),
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐   ┌─────────────────┐
//! │ FanOutEngine    │   │ MoneyFlow       │
//! │ (3 workers)     │   │ Aggregator      │
//! └────────┬────────┘   └────────┬────────┘
//!          │                     │
//!          ▼                     ▼
//! ┌──────────────────────────────────────┐     ┌──────────────┐
//! │ FetchOrchestrator                    │────▶│ CacheStore   │
//! │ (retry mode, stale, legacy, snapshot)│     └──────────────┘
//! └────────┬─────────────────────────────┘
//!          │
//!          ▼
//! ┌─────────────────┐     ┌──────────────────┐
//! │ Relay chain     │────▶│ HTTP Client      │
//! │ (direct, relays)│     │ (reqwest/script) │
//! └─────────────────┘     └──────────────────┘
//! ```
//!
//! ## Security
//!
//! - Server API keys are read from the environment and never logged
//! - Every URL returned or logged passes through [`redact::redact_url`]

pub mod cache;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod envelope;
pub mod error;
pub mod fanout;
pub mod http_client;
pub mod money_flow;
pub mod orchestrator;
pub mod redact;
pub mod relay;
pub mod retry;
pub mod snapshot;
pub mod timestamp;

pub use cache::{cache_key, CacheEntry, CacheStore, CachedPayload};
pub use catalog::{
    Catalog, FeedDefinition, FeedFormat, JurisdictionLevel, KeySource, ParamStrategy,
    RenderContext, US_STATES,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ApiKeys, FanOutConfig, FetchConfig, MoneyFlowSources};
pub use envelope::{Envelope, EnvelopeError, EnvelopeMeta};
pub use error::{CoreError, FetchError, FetchErrorKind, ValidationError};
pub use fanout::{AggregateMeta, FanOutEngine, FanOutResult};
pub use http_client::{
    HttpClient, HttpError, HttpRequest, HttpResponse, ReqwestHttpClient, ScriptedHttpClient,
};
pub use money_flow::{
    Bucket, BucketSummary, MoneyFlowAggregator, MoneyFlowItem, MoneyFlowQuery, MoneyFlowReport,
    SourceRole, SourceStatus,
};
pub use orchestrator::{
    FetchFailure, FetchOrchestrator, FetchRequest, FetchResult, FetchSuccess, LIVE_CACHE,
    STALE_CACHE,
};
pub use redact::redact_url;
pub use relay::{AttemptOutcome, AttemptRecord, RelayStrategy};
pub use retry::{Backoff, FixedAttemptPolicy, RateLimitPolicy, RetryMode};
pub use timestamp::UtcDateTime;
