//! Deterministic 0–100 relevance score.
//!
//! | Component | Points |
//! |-----------|--------|
//! | magnitude | `min(50, log10(amount + 1) * 15)` |
//! | recency | ≤30 days 20, ≤90 days 12, ≤180 days 6 |
//! | source trust | fixed per source role |
//! | keywords | filing/registration 4, contribution/donation 3 |

use std::cmp::Reverse;

use super::model::{MoneyFlowItem, SourceRole};
use crate::timestamp::UtcDateTime;

pub const MAGNITUDE_SCALE: f64 = 15.0;
pub const MAGNITUDE_CAP: f64 = 50.0;
/// `(max age in days, points)`, checked in order.
pub const RECENCY_STEPS: [(i64, f64); 3] = [(30, 20.0), (90, 12.0), (180, 6.0)];
pub const FILING_BONUS: f64 = 4.0;
pub const CONTRIBUTION_BONUS: f64 = 3.0;
pub const MAX_SCORE: f64 = 100.0;

const FILING_KEYWORDS: [&str; 2] = ["filing", "registration"];
const CONTRIBUTION_KEYWORDS: [&str; 2] = ["contribution", "donation"];

pub const fn trust_weight(role: SourceRole) -> f64 {
    match role {
        SourceRole::Spending => 15.0,
        SourceRole::Lobbying => 14.0,
        SourceRole::Campaign => 13.0,
        SourceRole::Registry => 10.0,
    }
}

pub fn magnitude_points(amount: Option<f64>) -> f64 {
    match amount {
        Some(amount) if amount.is_finite() && amount > 0.0 => {
            ((amount + 1.0).log10() * MAGNITUDE_SCALE).min(MAGNITUDE_CAP)
        }
        _ => 0.0,
    }
}

/// Future-dated records count as brand new.
pub fn recency_points(published_at: Option<UtcDateTime>, now: UtcDateTime) -> f64 {
    let Some(published_at) = published_at else {
        return 0.0;
    };
    let age_days = published_at.days_until(now).max(0);
    RECENCY_STEPS
        .iter()
        .find(|(max_age, _)| age_days <= *max_age)
        .map_or(0.0, |(_, points)| *points)
}

pub fn keyword_points(item: &MoneyFlowItem) -> f64 {
    let text = format!("{} {}", item.item_type, item.title).to_lowercase();
    let mut points = 0.0;
    if FILING_KEYWORDS.iter().any(|word| text.contains(word)) {
        points += FILING_BONUS;
    }
    if CONTRIBUTION_KEYWORDS.iter().any(|word| text.contains(word)) {
        points += CONTRIBUTION_BONUS;
    }
    points
}

pub fn score_item(item: &MoneyFlowItem, now: UtcDateTime) -> u8 {
    let total = magnitude_points(item.amount)
        + recency_points(item.published_at, now)
        + trust_weight(item.source)
        + keyword_points(item);
    total.round().clamp(0.0, MAX_SCORE) as u8
}

/// Scores every item, then sorts by score descending. Ties keep input order.
pub fn rank_items(items: &mut [MoneyFlowItem], now: UtcDateTime) {
    for item in items.iter_mut() {
        item.score = score_item(item, now);
    }
    items.sort_by_key(|item| Reverse(item.score));
}
