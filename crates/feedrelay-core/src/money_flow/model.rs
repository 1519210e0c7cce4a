use std::fmt::{Display, Formatter};

use serde::Serialize;

use crate::timestamp::UtcDateTime;

/// Coarse category used for summarization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Bucket {
    Contributions,
    Spending,
    Lobbying,
    Registry,
}

impl Bucket {
    pub const ALL: [Self; 4] = [
        Self::Contributions,
        Self::Spending,
        Self::Lobbying,
        Self::Registry,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Contributions => "contributions",
            Self::Spending => "spending",
            Self::Lobbying => "lobbying",
            Self::Registry => "registry",
        }
    }
}

impl Display for Bucket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which money-flow role a record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceRole {
    Lobbying,
    Spending,
    Campaign,
    Registry,
}

impl SourceRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Lobbying => "lobbying",
            Self::Spending => "spending",
            Self::Campaign => "campaign",
            Self::Registry => "registry",
        }
    }

    pub const fn bucket(self) -> Bucket {
        match self {
            Self::Lobbying => Bucket::Lobbying,
            Self::Spending => Bucket::Spending,
            Self::Campaign => Bucket::Contributions,
            Self::Registry => Bucket::Registry,
        }
    }
}

/// One financial, lobbying or registry record in canonical shape.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoneyFlowItem {
    pub source: SourceRole,
    /// Record id within the originating source.
    pub source_id: String,
    pub item_type: String,
    pub title: String,
    pub summary: String,
    pub amount: Option<f64>,
    pub bucket: Bucket,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub donor: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registrant: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub committee: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry_entity: Option<String>,
    pub published_at: Option<UtcDateTime>,
    pub external_url: Option<String>,
    pub score: u8,
}

impl MoneyFlowItem {
    pub fn new(source: SourceRole, source_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            source,
            source_id: source_id.into(),
            item_type: String::new(),
            title: title.into(),
            summary: String::new(),
            amount: None,
            bucket: source.bucket(),
            donor: None,
            recipient: None,
            client: None,
            registrant: None,
            committee: None,
            registry_entity: None,
            published_at: None,
            external_url: None,
            score: 0,
        }
    }

    /// Party the bucket summary credits with this item's amount.
    pub fn entity(&self) -> Option<&str> {
        let candidates = match self.bucket {
            Bucket::Contributions => [&self.donor, &self.committee],
            Bucket::Spending => [&self.recipient, &self.registrant],
            Bucket::Lobbying => [&self.client, &self.registrant],
            Bucket::Registry => [&self.registry_entity, &self.client],
        };
        candidates
            .into_iter()
            .filter_map(Option::as_deref)
            .find(|name| !name.trim().is_empty())
    }
}
