//! Native record shapes of the money-flow sources, mapped to [`MoneyFlowItem`].
//!
//! Every mapper accepts a `{"results": [...]}` envelope; unknown fields are
//! ignored and missing ones default, so a sparse record still maps.

use serde::Deserialize;
use serde_json::Value;

use super::model::{MoneyFlowItem, SourceRole};
use crate::error::CoreError;
use crate::timestamp::UtcDateTime;

#[derive(Debug, Deserialize)]
struct ResultsEnvelope<T> {
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Default, Deserialize)]
struct NamedRef {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LobbyingFiling {
    #[serde(default)]
    filing_uuid: Option<String>,
    #[serde(default)]
    filing_type_display: Option<String>,
    #[serde(default)]
    filing_year: Option<Value>,
    #[serde(default)]
    income: Option<Value>,
    #[serde(default)]
    expenses: Option<Value>,
    #[serde(default)]
    dt_posted: Option<String>,
    #[serde(default)]
    filing_document_url: Option<String>,
    #[serde(default)]
    registrant: NamedRef,
    #[serde(default)]
    client: NamedRef,
}

#[derive(Debug, Deserialize)]
struct SpendingAward {
    #[serde(default, rename = "generated_internal_id")]
    internal_id: Option<Value>,
    #[serde(default, rename = "Award ID")]
    award_id: Option<String>,
    #[serde(default, rename = "Recipient Name")]
    recipient: Option<String>,
    #[serde(default, rename = "Award Amount")]
    amount: Option<Value>,
    #[serde(default, rename = "Awarding Agency")]
    agency: Option<String>,
    #[serde(default, rename = "Start Date")]
    start_date: Option<String>,
    #[serde(default, rename = "Description")]
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Contribution {
    #[serde(default)]
    sub_id: Option<Value>,
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    contributor_name: Option<String>,
    #[serde(default)]
    committee: NamedRef,
    #[serde(default)]
    committee_name: Option<String>,
    #[serde(default)]
    contribution_receipt_amount: Option<Value>,
    #[serde(default)]
    contribution_receipt_date: Option<String>,
    #[serde(default)]
    receipt_type_full: Option<String>,
    #[serde(default)]
    pdf_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RegistryEntity {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    schema: Option<String>,
    #[serde(default)]
    datasets: Vec<String>,
    #[serde(default)]
    last_change: Option<String>,
    #[serde(default)]
    first_seen: Option<String>,
}

/// Dispatches on role.
pub fn map_records(role: SourceRole, body: &str) -> Result<Vec<MoneyFlowItem>, CoreError> {
    match role {
        SourceRole::Lobbying => map_lobbying(body),
        SourceRole::Spending => map_spending(body),
        SourceRole::Campaign => map_contributions(body),
        SourceRole::Registry => map_registry(body),
    }
}

pub fn map_lobbying(body: &str) -> Result<Vec<MoneyFlowItem>, CoreError> {
    let envelope: ResultsEnvelope<LobbyingFiling> = serde_json::from_str(body)?;
    Ok(envelope
        .results
        .into_iter()
        .enumerate()
        .map(|(index, filing)| {
            let client = filing.client.name.filter(|name| !name.trim().is_empty());
            let registrant = filing.registrant.name.filter(|name| !name.trim().is_empty());
            let kind = filing
                .filing_type_display
                .unwrap_or_else(|| String::from("Lobbying filing"));
            let title = match (&client, &registrant) {
                (Some(client), Some(registrant)) => format!("{registrant} lobbying for {client}"),
                (Some(client), None) => format!("Lobbying for {client}"),
                (None, Some(registrant)) => format!("{registrant} lobbying"),
                (None, None) => kind.clone(),
            };
            let year = filing.filing_year.as_ref().map(value_text).unwrap_or_default();

            let mut item = MoneyFlowItem::new(
                SourceRole::Lobbying,
                filing.filing_uuid.unwrap_or_else(|| format!("lda-{index}")),
                title,
            );
            item.summary = format!("{kind} {year}").trim().to_owned();
            item.item_type = kind;
            item.amount = filing
                .income
                .as_ref()
                .and_then(parse_amount)
                .or_else(|| filing.expenses.as_ref().and_then(parse_amount));
            item.client = client;
            item.registrant = registrant;
            item.published_at = filing.dt_posted.as_deref().and_then(UtcDateTime::parse_lenient);
            item.external_url = filing.filing_document_url;
            item
        })
        .collect())
}

pub fn map_spending(body: &str) -> Result<Vec<MoneyFlowItem>, CoreError> {
    let envelope: ResultsEnvelope<SpendingAward> = serde_json::from_str(body)?;
    Ok(envelope
        .results
        .into_iter()
        .enumerate()
        .map(|(index, award)| {
            let id = award
                .internal_id
                .as_ref()
                .map(value_text)
                .or_else(|| award.award_id.clone())
                .unwrap_or_else(|| format!("award-{index}"));
            let recipient = award.recipient.filter(|name| !name.trim().is_empty());
            let title = match (&recipient, &award.agency) {
                (Some(recipient), Some(agency)) => format!("{agency} award to {recipient}"),
                (Some(recipient), None) => format!("Federal award to {recipient}"),
                _ => award.award_id.clone().unwrap_or_else(|| String::from("Federal award")),
            };

            let mut item = MoneyFlowItem::new(SourceRole::Spending, id.clone(), title);
            item.item_type = String::from("award");
            item.summary = award.description.unwrap_or_default();
            item.amount = award.amount.as_ref().and_then(parse_amount);
            item.recipient = recipient;
            item.published_at = award.start_date.as_deref().and_then(UtcDateTime::parse_lenient);
            item.external_url = Some(format!(
                "https://www.usaspending.gov/award/{}",
                urlencoding::encode(&id)
            ));
            item
        })
        .collect())
}

pub fn map_contributions(body: &str) -> Result<Vec<MoneyFlowItem>, CoreError> {
    let envelope: ResultsEnvelope<Contribution> = serde_json::from_str(body)?;
    Ok(envelope
        .results
        .into_iter()
        .enumerate()
        .map(|(index, receipt)| {
            let id = receipt
                .sub_id
                .as_ref()
                .map(value_text)
                .or(receipt.transaction_id)
                .unwrap_or_else(|| format!("receipt-{index}"));
            let donor = receipt.contributor_name.filter(|name| !name.trim().is_empty());
            let committee = receipt
                .committee
                .name
                .or(receipt.committee_name)
                .filter(|name| !name.trim().is_empty());
            let title = match (&donor, &committee) {
                (Some(donor), Some(committee)) => format!("{donor} contribution to {committee}"),
                (Some(donor), None) => format!("Contribution from {donor}"),
                (None, Some(committee)) => format!("Contribution to {committee}"),
                (None, None) => String::from("Campaign contribution"),
            };

            let mut item = MoneyFlowItem::new(SourceRole::Campaign, id, title);
            item.item_type = receipt
                .receipt_type_full
                .unwrap_or_else(|| String::from("contribution"));
            item.amount = receipt.contribution_receipt_amount.as_ref().and_then(parse_amount);
            item.donor = donor;
            item.committee = committee;
            item.published_at = receipt
                .contribution_receipt_date
                .as_deref()
                .and_then(UtcDateTime::parse_lenient);
            item.external_url = receipt.pdf_url;
            item
        })
        .collect())
}

pub fn map_registry(body: &str) -> Result<Vec<MoneyFlowItem>, CoreError> {
    let envelope: ResultsEnvelope<RegistryEntity> = serde_json::from_str(body)?;
    Ok(envelope
        .results
        .into_iter()
        .enumerate()
        .map(|(index, entity)| {
            let id = entity.id.unwrap_or_else(|| format!("entity-{index}"));
            let name = entity.caption.filter(|name| !name.trim().is_empty());
            let schema = entity.schema.unwrap_or_else(|| String::from("Entity"));

            let mut item = MoneyFlowItem::new(
                SourceRole::Registry,
                id.clone(),
                name.clone().unwrap_or_else(|| schema.clone()),
            );
            item.summary = if entity.datasets.is_empty() {
                format!("{schema} registration")
            } else {
                format!("{schema} registration in {}", entity.datasets.join(", "))
            };
            item.item_type = format!("{} registration", schema.to_lowercase());
            item.registry_entity = name;
            item.published_at = entity
                .last_change
                .as_deref()
                .or(entity.first_seen.as_deref())
                .and_then(UtcDateTime::parse_lenient);
            item.external_url = Some(format!(
                "https://www.opensanctions.org/entities/{}/",
                urlencoding::encode(&id)
            ));
            item
        })
        .collect())
}

/// Numbers, or strings like `"$1,250.00"`.
fn parse_amount(value: &Value) -> Option<f64> {
    let amount = match value {
        Value::Number(number) => number.as_f64(),
        Value::String(text) => text
            .chars()
            .filter(|ch| ch.is_ascii_digit() || matches!(ch, '.' | '-'))
            .collect::<String>()
            .parse()
            .ok(),
        _ => None,
    };
    amount.filter(|amount| amount.is_finite())
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
