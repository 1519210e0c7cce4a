//! Bounded fan-out across US state jurisdictions.
//!
//! One logical query becomes up to 50 per-state requests served by a small
//! worker pool. Workers pop state codes from a shared queue and stop as soon
//! as the collector holds enough rows, so a satisfied query never touches the
//! tail of the queue. The queue start rotates with a coarse time bucket so
//! repeated calls sample different states first.

use std::cmp::Reverse;
use std::collections::{HashSet, VecDeque};
use std::slice;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinSet;

use crate::catalog::{FeedDefinition, JurisdictionLevel, RenderContext, US_STATES};
use crate::error::{CoreError, FetchError, ValidationError};
use crate::orchestrator::{FetchOrchestrator, FetchRequest};
use crate::relay::{run_chain, ChainRequest, RelayStrategy};
use crate::timestamp::UtcDateTime;

const ROW_ARRAY_FIELDS: [&str; 4] = ["results", "data", "items", "bills"];
const IDENTITY_FIELDS: [&str; 3] = ["id", "bill_id", "identifier"];
const RECENCY_FIELDS: [&str; 5] = [
    "updated_at",
    "latest_action_date",
    "last_action_date",
    "first_action_date",
    "created_at",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AggregateMeta {
    pub source_id: String,
    pub requested_states: usize,
    pub attempted_states: usize,
    pub succeeded_states: usize,
    pub failed_states: Vec<String>,
    /// Some state failed, or the early stop left states unasked.
    pub partial: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FanOutResult {
    pub rows: Vec<Value>,
    pub meta: AggregateMeta,
}

/// Everything a worker needs to fetch one state.
struct Job {
    definition: FeedDefinition,
    key: Option<String>,
    candidates: Vec<RelayStrategy>,
    timeout_ms: u64,
    target: usize,
}

#[derive(Default)]
struct Collector {
    queue: VecDeque<&'static str>,
    rows: Vec<Value>,
    attempted: usize,
    succeeded: usize,
    failed: Vec<String>,
}

impl Collector {
    /// Next state to ask, or `None` once the target is met or the queue is dry.
    fn claim(&mut self, target: usize) -> Option<&'static str> {
        if self.rows.len() >= target {
            return None;
        }
        let code = self.queue.pop_front()?;
        self.attempted += 1;
        Some(code)
    }
}

pub struct FanOutEngine {
    orchestrator: Arc<FetchOrchestrator>,
}

impl FanOutEngine {
    pub fn new(orchestrator: Arc<FetchOrchestrator>) -> Self {
        Self { orchestrator }
    }

    /// Collects up to `target_count` rows from a state-level source.
    ///
    /// Upstream failures only mark states failed; `Err` is reserved for an
    /// unknown or non-state source, a zero target, or missing credentials.
    pub async fn fetch_all_jurisdictions(
        &self,
        source_id: &str,
        target_count: usize,
    ) -> Result<FanOutResult, CoreError> {
        let job = Arc::new(self.prepare(source_id, target_count)?);
        let queue = rotated_states(
            self.orchestrator.cache().clock().now_ms(),
            self.orchestrator.config().fan_out.rotation_bucket.as_millis(),
        );
        let requested_states = queue.len();
        let collector = Arc::new(Mutex::new(Collector {
            queue,
            ..Collector::default()
        }));

        let workers = self.orchestrator.config().fan_out.workers.max(1);
        let mut join_set = JoinSet::new();
        for worker in 0..workers {
            let orchestrator = Arc::clone(&self.orchestrator);
            let job = Arc::clone(&job);
            let collector = Arc::clone(&collector);
            join_set.spawn(async move { run_worker(worker, orchestrator, job, collector).await });
        }
        while let Some(joined) = join_set.join_next().await {
            if let Err(error) = joined {
                tracing::error!(source = source_id, error = %error, "fan-out worker panicked");
            }
        }

        let collector =
            std::mem::take(&mut *collector.lock().unwrap_or_else(PoisonError::into_inner));
        let mut failed_states = collector.failed;
        failed_states.sort_unstable();
        let mut rows = dedupe_rows(collector.rows);
        sort_by_recency(&mut rows);
        rows.truncate(target_count);

        let meta = AggregateMeta {
            source_id: source_id.to_owned(),
            requested_states,
            attempted_states: collector.attempted,
            succeeded_states: collector.succeeded,
            partial: !failed_states.is_empty() || collector.attempted < requested_states,
            failed_states,
        };
        tracing::info!(
            source = source_id,
            rows = rows.len(),
            attempted = meta.attempted_states,
            failed = meta.failed_states.len(),
            "fan-out complete"
        );

        Ok(FanOutResult { rows, meta })
    }

    fn prepare(&self, source_id: &str, target_count: usize) -> Result<Job, CoreError> {
        if target_count == 0 {
            return Err(ValidationError::EmptyTarget.into());
        }
        let definition = self
            .orchestrator
            .catalog()
            .get(source_id)
            .ok_or_else(|| ValidationError::UnknownSource {
                id: source_id.to_owned(),
            })?;
        if definition.jurisdiction_level != Some(JurisdictionLevel::State) {
            return Err(ValidationError::NotJurisdictional {
                id: source_id.to_owned(),
            }
            .into());
        }
        if !definition.is_configured() {
            return Err(FetchError::requires_config(source_id).into());
        }
        let key = self
            .orchestrator
            .resolve_key(definition, &FetchRequest::new(source_id))?;

        let config = self.orchestrator.config();
        let mut candidates = vec![RelayStrategy::Direct];
        if let Some((name, template)) = definition
            .proxy
            .as_deref()
            .and_then(|name| config.relays.get_key_value(name))
        {
            candidates.push(RelayStrategy::Relay {
                name: name.clone(),
                template: template.clone(),
            });
        }

        Ok(Job {
            definition: definition.clone(),
            key,
            candidates,
            timeout_ms: config.fan_out.request_timeout_ms,
            target: target_count,
        })
    }
}

async fn run_worker(
    worker: usize,
    orchestrator: Arc<FetchOrchestrator>,
    job: Arc<Job>,
    collector: Arc<Mutex<Collector>>,
) {
    loop {
        let claimed = {
            let mut state = collector.lock().unwrap_or_else(PoisonError::into_inner);
            state.claim(job.target)
        };
        let Some(code) = claimed else {
            break;
        };

        let outcome = fetch_state(orchestrator.as_ref(), &job, code).await;

        let mut state = collector.lock().unwrap_or_else(PoisonError::into_inner);
        match outcome {
            Ok(rows) => {
                state.succeeded += 1;
                state.rows.extend(rows);
            }
            Err(error) => {
                tracing::debug!(
                    worker,
                    source = %job.definition.id,
                    state = code,
                    error = %error,
                    "jurisdiction failed"
                );
                state.failed.push(code.to_owned());
            }
        }
    }
}

/// One state: direct, then the source's relay, each with the full request timeout.
async fn fetch_state(
    orchestrator: &FetchOrchestrator,
    job: &Job,
    code: &str,
) -> Result<Vec<Value>, FetchError> {
    let url = job.definition.render_url(&RenderContext {
        key: job.key.as_deref(),
        jurisdiction: Some(code),
        ..RenderContext::default()
    });
    let request = ChainRequest {
        source_id: &job.definition.id,
        url: &url,
        headers: &job.definition.headers,
        format: job.definition.format,
        total_timeout_ms: job.timeout_ms,
    };

    let mut last_error = FetchError::fetch_failed("no candidates");
    for candidate in &job.candidates {
        match run_chain(orchestrator.client(), &request, slice::from_ref(candidate)).await {
            Ok(success) => {
                return parse_rows(&success.response.body, code)
                    .ok_or_else(|| FetchError::fetch_failed(format!("{code}: unparsable body")));
            }
            Err(failure) if failure.authoritative => return Err(failure.error),
            Err(failure) => last_error = failure.error,
        }
    }
    Err(last_error)
}

/// The 50 states starting at `(now / bucket) % 50`.
pub fn rotated_states(now_ms: u64, bucket_ms: u128) -> VecDeque<&'static str> {
    let bucket_ms = u64::try_from(bucket_ms).unwrap_or(u64::MAX).max(1);
    let offset = usize::try_from((now_ms / bucket_ms) % US_STATES.len() as u64).unwrap_or(0);
    let mut queue: VecDeque<&'static str> = US_STATES.iter().map(|(code, _)| *code).collect();
    queue.rotate_left(offset);
    queue
}

/// Rows from a top-level array or the first known array field. Objects are
/// tagged with `jurisdiction` when they lack one.
pub fn parse_rows(body: &str, jurisdiction: &str) -> Option<Vec<Value>> {
    let document: Value = serde_json::from_str(body).ok()?;
    let rows = match document {
        Value::Array(rows) => rows,
        Value::Object(mut object) => ROW_ARRAY_FIELDS
            .iter()
            .find_map(|field| match object.remove(*field) {
                Some(Value::Array(rows)) => Some(rows),
                _ => None,
            })?,
        _ => return None,
    };

    Some(
        rows.into_iter()
            .map(|mut row| {
                if let Value::Object(object) = &mut row {
                    object
                        .entry("jurisdiction")
                        .or_insert_with(|| Value::String(jurisdiction.to_owned()));
                }
                row
            })
            .collect(),
    )
}

/// Record id when present, else `jurisdiction|title|updated_at`.
pub fn row_identity(row: &Value) -> String {
    for field in IDENTITY_FIELDS {
        match row.get(field) {
            Some(Value::String(id)) if !id.is_empty() => return format!("id:{id}"),
            Some(Value::Number(id)) => return format!("id:{id}"),
            _ => {}
        }
    }
    let text = |field: &str| row.get(field).and_then(Value::as_str).unwrap_or_default();
    format!(
        "{}|{}|{}",
        text("jurisdiction"),
        text("title"),
        text("updated_at")
    )
}

/// First-seen wins.
pub fn dedupe_rows(rows: Vec<Value>) -> Vec<Value> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| seen.insert(row_identity(row)))
        .collect()
}

/// Best available timestamp, checking fields in priority order.
pub fn row_recency(row: &Value) -> Option<UtcDateTime> {
    RECENCY_FIELDS
        .iter()
        .filter_map(|field| row.get(*field).and_then(Value::as_str))
        .find_map(UtcDateTime::parse_lenient)
}

/// Newest first; undated rows last, in arrival order.
pub fn sort_by_recency(rows: &mut [Value]) {
    rows.sort_by_key(|row| Reverse(row_recency(row)));
}
