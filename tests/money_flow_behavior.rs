//! Behavior-driven tests for money-flow aggregation
//!
//! These tests verify HOW the lobbying, spending, campaign and registry
//! sources are merged into one ranked, summarized report.

use std::sync::Arc;

use feedrelay_core::money_flow::normalize_entity;
use feedrelay_core::{
    Bucket, CacheStore, Catalog, FeedDefinition, FeedFormat, FetchConfig, FetchOrchestrator,
    HttpError, HttpRequest, HttpResponse, ManualClock, MoneyFlowAggregator, MoneyFlowQuery,
    ScriptedHttpClient, ValidationError,
};

/// 2024-03-15T00:00:00Z
const NOW_MS: u64 = 1_710_460_800_000;

fn catalog() -> Catalog {
    Catalog::from_definitions(vec![
        FeedDefinition::new(
            "senate-lda",
            "https://lda.test/filings/?client_name={query}&filing_year={year}",
            FeedFormat::Json,
        )
        .supporting_query()
        .supporting_params(),
        FeedDefinition::new(
            "usaspending",
            "https://spend.test/awards?keyword={query}&start={start}&end={end}",
            FeedFormat::Json,
        )
        .supporting_query(),
        FeedDefinition::new(
            "fec",
            "https://fec.test/schedule_a/?contributor_name={query}",
            FeedFormat::Json,
        )
        .supporting_query(),
        FeedDefinition::new(
            "opensanctions",
            "https://registry.test/search?q={query}",
            FeedFormat::Json,
        )
        .supporting_query(),
    ])
    .expect("catalog should be valid")
}

fn aggregator(client: &Arc<ScriptedHttpClient>) -> MoneyFlowAggregator {
    let orchestrator =
        FetchOrchestrator::new(Arc::new(catalog()), FetchConfig::default(), client.clone())
            .with_cache(CacheStore::with_clock(Arc::new(ManualClock::new(NOW_MS))));
    MoneyFlowAggregator::new(Arc::new(orchestrator))
}

fn lobbying(request: &HttpRequest) -> String {
    let year = if request.url.contains("filing_year=2023") {
        "2023"
    } else {
        "2024"
    };
    format!(
        r#"{{"results":[{{
            "filing_uuid":"lda-{year}","filing_type_display":"Quarterly filing",
            "filing_year":{year},"income":"$120,000","dt_posted":"{year}-02-20T12:00:00Z",
            "registrant":{{"name":"Capitol Partners"}},"client":{{"name":"Acme Corp."}}
        }}]}}"#
    )
}

fn spending(awards: usize) -> String {
    let rows: Vec<String> = (0..awards)
        .map(|index| {
            format!(
                r#"{{"Award ID":"AW-{index}","Recipient Name":"ACME CORP",
                    "Award Amount":250000,"Awarding Agency":"DOE","Start Date":"2024-03-01"}}"#
            )
        })
        .collect();
    format!(r#"{{"results":[{}]}}"#, rows.join(","))
}

const CONTRIBUTIONS: &str = r#"{"results":[{
    "sub_id":991,"contributor_name":"Acme Corp PAC","committee":{"name":"Friends of Water"},
    "contribution_receipt_amount":5000,"contribution_receipt_date":"2024-01-10"
}]}"#;
const REGISTRY: &str = r#"{"results":[{
    "id":"os-1","caption":"Acme Corporation","schema":"Company",
    "datasets":["us_ofac_sdn"],"last_change":"2023-12-01T00:00:00"
}]}"#;

fn healthy(spending_awards: usize) -> impl Fn(&HttpRequest) -> Result<HttpResponse, HttpError> {
    move |request: &HttpRequest| {
        let body = if request.url.starts_with("https://lda.test") {
            lobbying(request)
        } else if request.url.starts_with("https://spend.test") {
            spending(spending_awards)
        } else if request.url.starts_with("https://fec.test") {
            CONTRIBUTIONS.to_owned()
        } else {
            REGISTRY.to_owned()
        };
        Ok(HttpResponse::ok_json(body))
    }
}

// =============================================================================
// Fan-in
// =============================================================================

#[tokio::test]
async fn when_every_source_answers_all_four_buckets_are_filled() {
    // Given: Healthy lobbying, spending, campaign and registry sources
    let client = Arc::new(ScriptedHttpClient::new(healthy(2)));
    let aggregator = aggregator(&client);

    // When: A query is aggregated with the default window
    let report = aggregator
        .aggregate_money_flows(&MoneyFlowQuery::new("Acme"))
        .await
        .expect("query is valid");

    // Then: Two lobbying years plus three other sources were asked
    assert_eq!(client.call_count(), 5);
    assert_eq!(client.calls_matching("lda.test"), 2);
    assert!(!report.partial);
    assert_eq!(report.items.len(), 2 + 2 + 1 + 1);
    assert_eq!(report.start, "2023-09-17");
    assert_eq!(report.end, "2024-03-15");
    assert!(report.source_status.contains_key("senate-lda:2023"));
    assert!(report.source_status.contains_key("senate-lda:2024"));

    let buckets: Vec<(Bucket, usize)> = report
        .summary
        .iter()
        .map(|summary| (summary.bucket, summary.count))
        .collect();
    assert_eq!(
        buckets,
        vec![
            (Bucket::Contributions, 1),
            (Bucket::Spending, 2),
            (Bucket::Lobbying, 2),
            (Bucket::Registry, 1),
        ]
    );
}

#[tokio::test]
async fn when_two_sources_fail_the_rest_still_produce_items() {
    // Given: Campaign finance answers 500 and the registry is unreachable
    let working = healthy(3);
    let client = Arc::new(ScriptedHttpClient::new(move |request| {
        if request.url.starts_with("https://fec.test") {
            Ok(HttpResponse::new(500, "internal error"))
        } else if request.url.starts_with("https://registry.test") {
            Err(HttpError::new("connection refused"))
        } else {
            working(request)
        }
    }));
    let aggregator = aggregator(&client);

    // When: The query is aggregated
    let report = aggregator
        .aggregate_money_flows(&MoneyFlowQuery::new("acme"))
        .await
        .expect("source failures are not request failures");

    // Then: Items from the healthy sources are returned and failures are recorded
    assert!(report.partial);
    assert_eq!(report.items.len(), 2 + 3);
    let fec = &report.source_status["fec"];
    assert!(!fec.ok);
    assert_eq!(fec.error_code.as_deref(), Some("upstream_status"));
    let registry = &report.source_status["opensanctions"];
    assert!(!registry.ok);
    assert_eq!(registry.error_code.as_deref(), Some("fetch_failed"));
    assert!(report.source_status["usaspending"].ok);
    assert_eq!(report.source_status["usaspending"].item_count, 3);
}

#[tokio::test]
async fn when_a_source_returns_an_unexpected_shape_it_is_marked_unparsable() {
    // Given: The registry answers HTML with a 200
    let working = healthy(1);
    let client = Arc::new(ScriptedHttpClient::new(move |request| {
        if request.url.starts_with("https://registry.test") {
            Ok(HttpResponse::new(200, "<html>maintenance</html>"))
        } else {
            working(request)
        }
    }));
    let aggregator = aggregator(&client);

    // When: The query is aggregated
    let report = aggregator
        .aggregate_money_flows(&MoneyFlowQuery::new("acme"))
        .await
        .expect("query is valid");

    // Then: The registry is reported as unparsable
    let registry = &report.source_status["opensanctions"];
    assert_eq!(registry.error_code.as_deref(), Some("unparsable"));
    assert!(report.partial);
}

#[tokio::test]
async fn when_query_is_blank_no_source_is_asked() {
    // Given: A healthy aggregator
    let client = Arc::new(ScriptedHttpClient::new(healthy(1)));
    let aggregator = aggregator(&client);

    // When: A whitespace query is aggregated
    let error = aggregator
        .aggregate_money_flows(&MoneyFlowQuery::new("   "))
        .await
        .expect_err("blank query");

    // Then: It is rejected before any call
    assert_eq!(error, ValidationError::EmptyQuery);
    assert_eq!(client.call_count(), 0);
}

// =============================================================================
// Ranking and summary
// =============================================================================

#[tokio::test]
async fn when_the_same_query_runs_twice_the_ranking_is_identical() {
    // Given: Two aggregators over the same data
    let first_client = Arc::new(ScriptedHttpClient::new(healthy(4)));
    let second_client = Arc::new(ScriptedHttpClient::new(healthy(4)));

    // When: Each aggregates the same query
    let first = aggregator(&first_client)
        .aggregate_money_flows(&MoneyFlowQuery::new("acme"))
        .await
        .expect("query is valid");
    let second = aggregator(&second_client)
        .aggregate_money_flows(&MoneyFlowQuery::new("acme"))
        .await
        .expect("query is valid");

    // Then: Ids, scores and order match exactly
    let ranking = |report: &feedrelay_core::MoneyFlowReport| -> Vec<(String, u8)> {
        report
            .items
            .iter()
            .map(|item| (item.source_id.clone(), item.score))
            .collect()
    };
    assert_eq!(ranking(&first), ranking(&second));
    assert!(first
        .items
        .windows(2)
        .all(|pair| pair[0].score >= pair[1].score));
}

#[tokio::test]
async fn when_items_tie_on_score_they_keep_source_order() {
    // Given: Identical spending awards that differ only by id
    let client = Arc::new(ScriptedHttpClient::new(healthy(3)));
    let aggregator = aggregator(&client);

    // When: The query is aggregated
    let report = aggregator
        .aggregate_money_flows(&MoneyFlowQuery::new("acme"))
        .await
        .expect("query is valid");

    // Then: The awards appear in the order the source returned them
    let awards: Vec<&str> = report
        .items
        .iter()
        .filter(|item| item.bucket == Bucket::Spending)
        .map(|item| item.source_id.as_str())
        .collect();
    assert_eq!(awards, vec!["AW-0", "AW-1", "AW-2"]);
}

#[tokio::test]
async fn when_results_are_truncated_the_summary_still_counts_everything() {
    // Given: More spending awards than the smallest allowed limit
    let client = Arc::new(ScriptedHttpClient::new(healthy(8)));
    let aggregator = aggregator(&client);

    // When: The query asks for fewer items than the minimum
    let report = aggregator
        .aggregate_money_flows(&MoneyFlowQuery::new("acme").with_limit(1))
        .await
        .expect("query is valid");

    // Then: The limit is clamped and the summary covers every mapped item
    assert_eq!(report.limit, 5);
    assert_eq!(report.items.len(), 5);
    let spending = report
        .summary
        .iter()
        .find(|summary| summary.bucket == Bucket::Spending)
        .expect("spending bucket");
    assert_eq!(spending.count, 8);
    assert_eq!(spending.total_amount, 2_000_000.0);
    assert_eq!(spending.top_entity.as_deref(), Some("ACME CORP"));
}

#[tokio::test]
async fn when_range_is_inverted_the_query_is_rejected() {
    // Given: A healthy aggregator
    let client = Arc::new(ScriptedHttpClient::new(healthy(1)));
    let aggregator = aggregator(&client);

    // When: Start falls after end
    let error = aggregator
        .aggregate_money_flows(&MoneyFlowQuery::new("acme").with_range("2024-06-01", "2024-01-01"))
        .await
        .expect_err("inverted range");

    // Then: Nothing was fetched
    assert!(matches!(error, ValidationError::InvalidDateRange { .. }));
    assert_eq!(client.call_count(), 0);
}

// =============================================================================
// Entity normalization
// =============================================================================

#[test]
fn when_entity_names_differ_only_in_punctuation_and_case_they_normalize_equal() {
    // Given: Variants of one organisation's name
    let variants = ["Acme Corp.", "ACME  CORP", "acme corp", " Acme, Corp "];

    // When: Each is normalized
    let normalized: Vec<String> = variants.iter().map(|name| normalize_entity(name)).collect();

    // Then: All agree and normalizing again changes nothing
    assert!(normalized.iter().all(|name| name == "ACME CORP"));
    for name in &normalized {
        assert_eq!(&normalize_entity(name), name);
    }
    assert_eq!(normalize_entity("Smith & Wesson"), "SMITH AND WESSON");
}
