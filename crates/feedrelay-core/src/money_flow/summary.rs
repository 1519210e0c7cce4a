use std::collections::BTreeMap;

use serde::Serialize;

use super::model::{Bucket, MoneyFlowItem};
use super::normalize::normalize_entity;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketSummary {
    pub bucket: Bucket,
    pub count: usize,
    pub total_amount: f64,
    /// Normalized name of the entity with the largest summed amount.
    pub top_entity: Option<String>,
    pub top_entity_amount: Option<f64>,
}

/// Per-bucket totals for every bucket, in [`Bucket::ALL`] order.
pub fn summarize(items: &[MoneyFlowItem]) -> Vec<BucketSummary> {
    Bucket::ALL
        .iter()
        .map(|bucket| summarize_bucket(*bucket, items))
        .collect()
}

fn summarize_bucket(bucket: Bucket, items: &[MoneyFlowItem]) -> BucketSummary {
    let mut count = 0;
    let mut total_amount = 0.0;
    let mut by_entity: BTreeMap<String, f64> = BTreeMap::new();

    for item in items.iter().filter(|item| item.bucket == bucket) {
        count += 1;
        let amount = item.amount.filter(|amount| amount.is_finite()).unwrap_or(0.0);
        total_amount += amount;
        if let Some(entity) = item.entity().map(normalize_entity).filter(|name| !name.is_empty()) {
            *by_entity.entry(entity).or_insert(0.0) += amount;
        }
    }

    // BTreeMap order makes ties resolve to the alphabetically first name.
    let top = by_entity
        .into_iter()
        .filter(|(_, amount)| *amount > 0.0)
        .fold(None::<(String, f64)>, |best, (name, amount)| match best {
            Some((_, best_amount)) if best_amount >= amount => best,
            _ => Some((name, amount)),
        });

    BucketSummary {
        bucket,
        count,
        total_amount,
        top_entity_amount: top.as_ref().map(|(_, amount)| *amount),
        top_entity: top.map(|(name, _)| name),
    }
}
