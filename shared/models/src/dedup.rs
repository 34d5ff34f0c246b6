use serde::{Deserialize, Serialize};

/// Built-in duplicate-detection strategies, applied in priority order.
/// Custom rules slot in at a host-chosen priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuplicateStrategy {
    ExactId,
    ExactUrl,
    ContentSimilarity,
    VersionAware,
    FuzzyMatch,
    Combined,
    CustomRule,
}

impl DuplicateStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DuplicateStrategy::ExactId => "EXACT_ID",
            DuplicateStrategy::ExactUrl => "EXACT_URL",
            DuplicateStrategy::ContentSimilarity => "CONTENT_SIMILARITY",
            DuplicateStrategy::VersionAware => "VERSION_AWARE",
            DuplicateStrategy::FuzzyMatch => "FUZZY_MATCH",
            DuplicateStrategy::Combined => "COMBINED",
            DuplicateStrategy::CustomRule => "CUSTOM_RULE",
        }
    }
}

/// A set of record ids judged equivalent by one strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateGroup {
    /// Non-empty; includes the representative.
    pub members: Vec<String>,
    pub strategy: DuplicateStrategy,
    pub similarity: f32,
    /// The member with the highest pre-dedup rank.
    pub representative: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_type: Option<String>,
    /// Label of the custom rule that fired, when strategy = CUSTOM_RULE.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_label: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DedupStats {
    pub processing_time_ms: u64,
    pub items_in: usize,
    pub items_out: usize,
    pub duplicates_removed: usize,
    pub comparisons: usize,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Strategy names that threw and were skipped for a pair.
    #[serde(default)]
    pub strategy_errors: Vec<String>,
}

impl DedupStats {
    pub fn cache_hit_rate(&self) -> f64 {
        let total = self.cache_hits + self.cache_misses;
        if total == 0 {
            0.0
        } else {
            self.cache_hits as f64 / total as f64
        }
    }
}
