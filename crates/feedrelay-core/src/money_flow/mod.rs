//! Multi-source money-flow aggregation.
//!
//! A free-text query fans out to the lobbying, spending, campaign-finance
//! and entity-registry sources concurrently. Each source's failure lands in
//! [`MoneyFlowReport::source_status`]; partial results are normal.
//!
//! ```text
//! query ─┬─ lobbying (year N-1) ─┐
//!        ├─ lobbying (year N)   ─┤
//!        ├─ spending            ─┼─ map ─ score ─ sort ─ truncate
//!        ├─ campaign            ─┤              └─ summarize
//!        └─ registry            ─┘
//! ```

pub mod model;
pub mod normalize;
pub mod scoring;
pub mod sources;
pub mod summary;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::task::JoinSet;

use crate::error::ValidationError;
use crate::orchestrator::{FetchOrchestrator, FetchRequest, FetchResult};
use crate::timestamp::UtcDateTime;

pub use model::{Bucket, MoneyFlowItem, SourceRole};
pub use normalize::normalize_entity;
pub use scoring::{rank_items, score_item};
pub use summary::{summarize, BucketSummary};

pub const DEFAULT_WINDOW_DAYS: i64 = 180;
pub const DEFAULT_LIMIT: usize = 40;
pub const MIN_LIMIT: usize = 5;
pub const MAX_LIMIT: usize = 100;
/// Lobbying disclosures are queried per filing year, newest years only.
pub const MAX_LOBBYING_YEARS: usize = 2;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoneyFlowQuery {
    pub query: String,
    /// `YYYY-MM-DD` or RFC3339; defaults to `end - 180 days`.
    pub start: Option<String>,
    /// Defaults to now.
    pub end: Option<String>,
    pub limit: Option<usize>,
}

impl MoneyFlowQuery {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_range(mut self, start: impl Into<String>, end: impl Into<String>) -> Self {
        self.start = Some(start.into());
        self.end = Some(end.into());
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Validated query window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    pub start: UtcDateTime,
    pub end: UtcDateTime,
    pub limit: usize,
}

impl QueryWindow {
    pub fn resolve(query: &MoneyFlowQuery, now: UtcDateTime) -> Result<Self, ValidationError> {
        let end = match query.end.as_deref() {
            Some(raw) => UtcDateTime::parse(raw)?,
            None => now,
        };
        let start = match query.start.as_deref() {
            Some(raw) => UtcDateTime::parse(raw)?,
            None => end.minus_days(DEFAULT_WINDOW_DAYS),
        };
        if start > end {
            return Err(ValidationError::InvalidDateRange {
                start: start.format_date(),
                end: end.format_date(),
            });
        }

        Ok(Self {
            start,
            end,
            limit: clamp_limit(query.limit),
        })
    }

    /// Calendar years the window touches, newest [`MAX_LOBBYING_YEARS`] only.
    pub fn lobbying_years(&self) -> Vec<i32> {
        let first = self.start.date().year();
        let last = self.end.date().year();
        let mut years: Vec<i32> = (first..=last).rev().take(MAX_LOBBYING_YEARS).collect();
        years.reverse();
        years
    }
}

pub fn clamp_limit(limit: Option<usize>) -> usize {
    limit.unwrap_or(DEFAULT_LIMIT).clamp(MIN_LIMIT, MAX_LIMIT)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceStatus {
    pub source_id: String,
    pub ok: bool,
    pub item_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub fallback_used: bool,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoneyFlowReport {
    pub query: String,
    pub start: String,
    pub end: String,
    pub limit: usize,
    pub items: Vec<MoneyFlowItem>,
    /// Keyed by task label, e.g. `senate-lda:2024`.
    pub source_status: BTreeMap<String, SourceStatus>,
    /// Computed over every mapped item, before truncation.
    pub summary: Vec<BucketSummary>,
    pub partial: bool,
}

struct SourceTask {
    label: String,
    role: SourceRole,
    request: FetchRequest,
}

pub struct MoneyFlowAggregator {
    orchestrator: Arc<FetchOrchestrator>,
}

impl MoneyFlowAggregator {
    pub fn new(orchestrator: Arc<FetchOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Queries every money-flow source and merges what comes back.
    ///
    /// Only an invalid query returns `Err`; source failures are reported
    /// per source.
    pub async fn aggregate_money_flows(
        &self,
        query: &MoneyFlowQuery,
    ) -> Result<MoneyFlowReport, ValidationError> {
        let text = query.query.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyQuery);
        }
        let now = UtcDateTime::from_offset_datetime(self.orchestrator.cache().clock().now_utc());
        let window = QueryWindow::resolve(query, now)?;
        let tasks = self.plan_tasks(text, &window);

        let mut join_set = JoinSet::new();
        for (index, task) in tasks.iter().enumerate() {
            let orchestrator = Arc::clone(&self.orchestrator);
            let request = task.request.clone();
            join_set.spawn(async move { (index, orchestrator.fetch_source(&request).await) });
        }
        let mut outcomes: Vec<Option<FetchResult>> = vec![None; tasks.len()];
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => outcomes[index] = Some(result),
                Err(error) => tracing::error!(error = %error, "money-flow task panicked"),
            }
        }

        // Task order, not completion order, so equal scores tie-break the same way every run.
        let mut items = Vec::new();
        let mut source_status = BTreeMap::new();
        for (task, outcome) in tasks.into_iter().zip(outcomes) {
            let status = match outcome {
                Some(Ok(success)) => match sources::map_records(task.role, &success.body) {
                    Ok(mapped) => {
                        let status = SourceStatus {
                            source_id: task.request.source_id.clone(),
                            ok: true,
                            item_count: mapped.len(),
                            error_code: None,
                            error: None,
                            fallback_used: success.fallback_used,
                            cache_hit: success.cache_hit,
                        };
                        items.extend(mapped);
                        status
                    }
                    Err(error) => failed_status(&task, "unparsable", error.to_string()),
                },
                Some(Err(failure)) => {
                    failed_status(&task, failure.error.code(), failure.error.message().to_owned())
                }
                None => failed_status(&task, "task_failed", String::from("task did not complete")),
            };
            if !status.ok {
                tracing::warn!(
                    source = %task.label,
                    error = status.error.as_deref().unwrap_or_default(),
                    "money-flow source failed"
                );
            }
            source_status.insert(task.label, status);
        }

        let summary = summarize(&items);
        rank_items(&mut items, now);
        items.truncate(window.limit);
        let partial = source_status.values().any(|status| !status.ok);

        Ok(MoneyFlowReport {
            query: text.to_owned(),
            start: window.start.format_date(),
            end: window.end.format_date(),
            limit: window.limit,
            items,
            source_status,
            summary,
            partial,
        })
    }

    fn plan_tasks(&self, text: &str, window: &QueryWindow) -> Vec<SourceTask> {
        let ids = &self.orchestrator.config().money_flow;
        let start = window.start.format_date();
        let end = window.end.format_date();
        let request = |source_id: &str| {
            FetchRequest::new(source_id)
                .with_query(text)
                .with_range(start.as_str(), end.as_str())
        };

        let mut tasks: Vec<SourceTask> = window
            .lobbying_years()
            .into_iter()
            .map(|year| SourceTask {
                label: format!("{}:{year}", ids.lobbying),
                role: SourceRole::Lobbying,
                request: request(ids.lobbying.as_str()).with_param("year", year.to_string()),
            })
            .collect();
        for (role, source_id) in [
            (SourceRole::Spending, &ids.spending),
            (SourceRole::Campaign, &ids.campaign),
            (SourceRole::Registry, &ids.registry),
        ] {
            tasks.push(SourceTask {
                label: source_id.clone(),
                role,
                request: request(source_id.as_str()),
            });
        }
        tasks
    }
}

fn failed_status(task: &SourceTask, code: &str, message: String) -> SourceStatus {
    SourceStatus {
        source_id: task.request.source_id.clone(),
        ok: false,
        item_count: 0,
        error_code: Some(code.to_owned()),
        error: Some(message),
        fallback_used: false,
        cache_hit: false,
    }
}
