//! Behavior-driven tests for the per-jurisdiction fan-out engine
//!
//! These tests verify HOW a state-level query is spread over the worker
//! pool, when it stops early, and how failing states are reported.

use std::sync::Arc;
use std::time::Duration;

use feedrelay_core::{
    ApiKeys, CacheStore, Catalog, CoreError, FanOutEngine, FeedDefinition, FeedFormat,
    FetchConfig, FetchErrorKind, FetchOrchestrator, HttpError, HttpRequest, HttpResponse,
    JurisdictionLevel, KeySource, ManualClock, ScriptedHttpClient, ValidationError,
};

const BILLS_URL: &str = "https://bills.test/{jurisdiction}";
const FAILING: [&str; 5] = ["CA", "FL", "NY", "TX", "WA"];

fn state_of(request: &HttpRequest) -> String {
    request
        .url
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_owned()
}

fn one_bill(request: &HttpRequest) -> Result<HttpResponse, HttpError> {
    let state = state_of(request);
    Ok(HttpResponse::ok_json(format!(
        r#"{{"results":[{{
            "id":"{state}-1","title":"Water rights","updated_at":"2024-03-01T00:00:00Z"
        }}]}}"#
    )))
}

fn bills_source() -> FeedDefinition {
    FeedDefinition::new("openstates", BILLS_URL, FeedFormat::Json)
        .with_jurisdiction_level(JurisdictionLevel::State)
}

fn engine(
    definitions: Vec<FeedDefinition>,
    config: FetchConfig,
    client: &Arc<ScriptedHttpClient>,
) -> FanOutEngine {
    let catalog = Catalog::from_definitions(definitions).expect("catalog should be valid");
    let orchestrator = FetchOrchestrator::new(Arc::new(catalog), config, client.clone())
        .with_cache(CacheStore::with_clock(Arc::new(ManualClock::new(0))));
    FanOutEngine::new(Arc::new(orchestrator))
}

// =============================================================================
// Early stop
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_target_is_reached_the_remaining_states_are_never_asked() {
    // Given: Every state answers one bill after a short delay
    let client = Arc::new(
        ScriptedHttpClient::new(one_bill).with_latency(|_| Duration::from_millis(50)),
    );
    let engine = engine(vec![bills_source()], FetchConfig::default(), &client);

    // When: Ten rows are requested
    let result = engine
        .fetch_all_jurisdictions("openstates", 10)
        .await
        .expect("fan-out should run");

    // Then: Exactly ten rows come back and at most one round of workers overshot
    assert_eq!(result.rows.len(), 10);
    assert!(result.meta.attempted_states >= 10);
    assert!(result.meta.attempted_states <= 12);
    assert_eq!(client.call_count(), result.meta.attempted_states);
    assert_eq!(result.meta.requested_states, 50);
    assert!(result.meta.partial);
    assert!(result.meta.failed_states.is_empty());
}

#[tokio::test(start_paused = true)]
async fn when_queue_starts_at_the_rotation_offset_the_first_state_comes_from_the_clock() {
    // Given: A clock at time zero, so the queue starts with the first state
    let client = Arc::new(ScriptedHttpClient::new(one_bill));
    let mut config = FetchConfig::default();
    config.fan_out.workers = 1;
    let engine = engine(vec![bills_source()], config, &client);

    // When: A single row is requested with a single worker
    let result = engine
        .fetch_all_jurisdictions("openstates", 1)
        .await
        .expect("fan-out should run");

    // Then: Only the first state in the rotated queue was asked
    assert_eq!(client.call_count(), 1);
    assert_eq!(client.calls()[0].url, "https://bills.test/AK");
    assert_eq!(result.rows[0]["jurisdiction"], "AK");
}

// =============================================================================
// Partial failure
// =============================================================================

#[tokio::test(start_paused = true)]
async fn when_some_states_fail_the_rest_are_still_collected() {
    // Given: Five states answer 500 and the target exceeds every row available
    let client = Arc::new(ScriptedHttpClient::new(|request| {
        if FAILING.contains(&state_of(request).as_str()) {
            Ok(HttpResponse::new(500, "upstream error"))
        } else {
            one_bill(request)
        }
    }));
    let engine = engine(vec![bills_source()], FetchConfig::default(), &client);

    // When: The fan-out runs to completion
    let result = engine
        .fetch_all_jurisdictions("openstates", 1_000)
        .await
        .expect("fan-out should run");

    // Then: Every state was asked and the failures are listed in order
    assert_eq!(result.meta.attempted_states, 50);
    assert_eq!(result.meta.succeeded_states, 45);
    assert_eq!(result.meta.failed_states, FAILING.to_vec());
    assert!(result.meta.partial);
    assert_eq!(result.rows.len(), 45);
}

#[tokio::test(start_paused = true)]
async fn when_states_share_a_record_id_it_is_returned_once() {
    // Given: Every state returns the same multi-state record
    let client = Arc::new(ScriptedHttpClient::new(|_| {
        Ok(HttpResponse::ok_json(r#"[{"id":"compact-7","title":"Interstate compact"}]"#))
    }));
    let engine = engine(vec![bills_source()], FetchConfig::default(), &client);

    // When: More rows are requested than distinct records exist
    let result = engine
        .fetch_all_jurisdictions("openstates", 5)
        .await
        .expect("fan-out should run");

    // Then: Duplicates collapse to one row
    assert_eq!(result.rows.len(), 1);
    assert_eq!(result.rows[0]["id"], "compact-7");
}

#[tokio::test(start_paused = true)]
async fn when_direct_call_fails_the_source_relay_is_tried() {
    // Given: Direct calls are refused but the source's relay works
    let client = Arc::new(ScriptedHttpClient::new(|request| {
        if request.url.starts_with("https://relay.test") {
            Ok(HttpResponse::ok_json(r#"[{"id":"via-relay"}]"#))
        } else {
            Err(HttpError::new("geo-blocked"))
        }
    }));
    let config = FetchConfig::default().with_relay("relay", "https://relay.test/?url={url}");
    let engine = engine(
        vec![bills_source().with_proxy("relay")],
        config,
        &client,
    );

    // When: One row is requested
    let result = engine
        .fetch_all_jurisdictions("openstates", 1)
        .await
        .expect("fan-out should run");

    // Then: The row arrived through the relay
    assert_eq!(result.rows[0]["id"], "via-relay");
    assert!(client.calls_matching("relay.test") >= 1);
}

#[tokio::test(start_paused = true)]
async fn when_json_state_answers_404_the_relay_is_skipped() {
    // Given: Every state answers 404 directly
    let client = Arc::new(ScriptedHttpClient::new(|_| Ok(HttpResponse::new(404, "nope"))));
    let config = FetchConfig::default().with_relay("relay", "https://relay.test/?url={url}");
    let engine = engine(
        vec![bills_source().with_proxy("relay")],
        config,
        &client,
    );

    // When: The fan-out runs
    let result = engine
        .fetch_all_jurisdictions("openstates", 3)
        .await
        .expect("fan-out should run");

    // Then: No relay call was made and every state failed
    assert_eq!(client.calls_matching("relay.test"), 0);
    assert_eq!(result.meta.failed_states.len(), 50);
    assert!(result.rows.is_empty());
}

// =============================================================================
// Rejected requests
// =============================================================================

#[tokio::test]
async fn when_request_cannot_be_fanned_out_an_error_is_returned_before_any_call() {
    // Given: A national source, a state source, and a keyed state source without a key
    let client = Arc::new(ScriptedHttpClient::new(one_bill));
    let definitions = vec![
        bills_source(),
        FeedDefinition::new("usgs", "https://quakes.test/feed.json", FeedFormat::Json),
        FeedDefinition::new(
            "legiscan",
            "https://legiscan.test/{jurisdiction}?key={key}",
            FeedFormat::Json,
        )
        .with_jurisdiction_level(JurisdictionLevel::State)
        .with_key(KeySource::Server, "legiscan"),
    ];
    let catalog = Catalog::from_definitions(definitions).expect("catalog should be valid");
    let orchestrator =
        FetchOrchestrator::new(Arc::new(catalog), FetchConfig::default(), client.clone())
            .with_keys(ApiKeys::default());
    let engine = FanOutEngine::new(Arc::new(orchestrator));

    // When: Each invalid request is made
    let national = engine.fetch_all_jurisdictions("usgs", 10).await;
    let zero = engine.fetch_all_jurisdictions("openstates", 0).await;
    let unknown = engine.fetch_all_jurisdictions("nope", 10).await;
    let keyless = engine.fetch_all_jurisdictions("legiscan", 10).await;

    // Then: Each is rejected with its own error and nothing left the process
    assert!(matches!(
        national,
        Err(CoreError::Validation(ValidationError::NotJurisdictional { .. }))
    ));
    assert!(matches!(
        zero,
        Err(CoreError::Validation(ValidationError::EmptyTarget))
    ));
    assert!(matches!(
        unknown,
        Err(CoreError::Validation(ValidationError::UnknownSource { .. }))
    ));
    match keyless {
        Err(CoreError::Fetch(error)) => assert_eq!(error.kind(), FetchErrorKind::MissingServerKey),
        other => panic!("expected missing server key, got {other:?}"),
    }
    assert_eq!(client.call_count(), 0);
}
