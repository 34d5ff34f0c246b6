use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A catalog entry: the indexed unit of the search engine.
///
/// Records are owned by the document store. The vector store and the search
/// pipeline hold copies only and must tolerate staleness; the identifier is
/// immutable and everything else is read-only outside the seeder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub long_description: Option<String>,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub functionality: Vec<String>,
    #[serde(default)]
    pub search_keywords: Vec<String>,
    #[serde(default)]
    pub use_cases: Vec<String>,
    /// Interface tags: cli / web / api / desktop.
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub deployment: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub technical: Option<TechnicalAttributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingSchedule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TechnicalAttributes {
    #[serde(default)]
    pub languages: Vec<String>,
    #[serde(default)]
    pub integrations: Vec<String>,
    #[serde(default)]
    pub semantic_tags: Vec<String>,
}

/// Tier -> price, ordered. `has_free_tier` is denormalised so structured
/// filters can push `pricing.hasFreeTier = true` down without joins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PricingSchedule {
    pub has_free_tier: bool,
    #[serde(default)]
    pub tiers: Vec<PricingTier>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricingTier {
    pub tier: String,
    pub price: f64,
}

/// The payload stored on every vector point, mirroring the projectable
/// fields of the record plus the indexing timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointPayload {
    pub id: String,
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub functionality: Vec<String>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    #[serde(default)]
    pub deployment: Vec<String>,
    #[serde(default)]
    pub has_free_tier: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub indexed_at: DateTime<Utc>,
}

impl PointPayload {
    pub fn from_record(record: &Record, indexed_at: DateTime<Utc>) -> Self {
        Self {
            id: record.id.clone(),
            name: record.name.clone(),
            description: record.description.clone(),
            categories: record.categories.clone(),
            functionality: record.functionality.clone(),
            interfaces: record.interfaces.clone(),
            deployment: record.deployment.clone(),
            has_free_tier: record.pricing.as_ref().map(|p| p.has_free_tier).unwrap_or(false),
            url: record.url.clone(),
            indexed_at,
        }
    }
}
