//! Last-resort live snapshots published as static JSON.
//!
//! A snapshot lives at `{base}/data/feeds/{id}.json` and has the shape
//! `{"body": ..., "httpStatus": 200, "contentType": "..."}`. `body` may be a
//! string or an embedded JSON document.

use serde::Deserialize;
use serde_json::Value;

use crate::http_client::{send_with_deadline, HttpClient, HttpRequest};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveSnapshot {
    pub body: String,
    pub http_status: u16,
    pub content_type: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SnapshotDocument {
    body: Value,
    #[serde(default = "default_status")]
    http_status: u16,
    #[serde(default)]
    content_type: Option<String>,
}

const fn default_status() -> u16 {
    200
}

pub fn snapshot_url(base: &str, source_id: &str) -> String {
    format!(
        "{}/data/feeds/{}.json",
        base.trim_end_matches('/'),
        urlencoding::encode(source_id)
    )
}

/// Parses a snapshot document; `None` unless it holds a 2xx payload.
pub fn parse_snapshot(raw: &str) -> Option<LiveSnapshot> {
    let document: SnapshotDocument = serde_json::from_str(raw).ok()?;
    if !(200..300).contains(&document.http_status) {
        return None;
    }
    let body = match document.body {
        Value::String(text) => text,
        Value::Null => return None,
        other => other.to_string(),
    };
    Some(LiveSnapshot {
        body,
        http_status: document.http_status,
        content_type: document.content_type,
    })
}

/// Fetches and validates the snapshot for `source_id`. Every failure is
/// logged and collapsed to `None`.
pub async fn fetch_snapshot(
    client: &dyn HttpClient,
    base: &str,
    source_id: &str,
    timeout_ms: u64,
) -> Option<LiveSnapshot> {
    let url = snapshot_url(base, source_id);
    let request = HttpRequest::get(url.as_str())
        .with_header("accept", "application/json")
        .with_timeout_ms(timeout_ms);

    match send_with_deadline(client, request).await {
        Ok(response) if response.is_success() => {
            let snapshot = parse_snapshot(&response.body);
            if snapshot.is_none() {
                tracing::debug!(source = source_id, url = %url, "snapshot unusable");
            }
            snapshot
        }
        Ok(response) => {
            tracing::debug!(source = source_id, status = response.status, "snapshot missing");
            None
        }
        Err(error) => {
            tracing::debug!(source = source_id, error = %error, "snapshot fetch failed");
            None
        }
    }
}
