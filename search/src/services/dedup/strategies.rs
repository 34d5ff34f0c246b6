use serde_json::Value;
use std::sync::Arc;

use toolhub_models::{DuplicateStrategy, MergedResult};

use super::similarity::{
    canonicalize_url, token_set_jaccard, trigram_similarity, version_stem,
};

/// Comparable view of one result, extracted once per detection run.
#[derive(Debug, Clone)]
pub struct DedupItem {
    pub id: String,
    pub name: String,
    pub description: String,
    pub url: Option<String>,
    pub canonical_url: Option<String>,
    pub categories: Vec<String>,
    /// Pre-dedup rank; the representative of a group is its minimum.
    pub rank: usize,
}

impl DedupItem {
    pub fn from_result(result: &MergedResult) -> Self {
        let payload = &result.payload;
        let string_of = |key: &str| {
            payload.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
        };
        let url = payload.get("url").and_then(Value::as_str).map(str::to_string);
        let categories = payload
            .get("categories")
            .and_then(Value::as_array)
            .map(|items| {
                items.iter().filter_map(Value::as_str).map(str::to_string).collect()
            })
            .unwrap_or_default();

        Self {
            id: result.id.clone(),
            name: string_of("name"),
            description: string_of("description"),
            canonical_url: url.as_deref().and_then(canonicalize_url),
            url,
            categories,
            rank: result.final_rank,
        }
    }
}

/// Per-field weights for CONTENT_SIMILARITY.
#[derive(Debug, Clone, Copy)]
pub struct FieldWeights {
    pub name: f32,
    pub description: f32,
    pub url: f32,
    pub category: f32,
}

impl Default for FieldWeights {
    fn default() -> Self {
        Self { name: 0.5, description: 0.3, url: 0.15, category: 0.05 }
    }
}

/// What a strategy concluded for one pair.
#[derive(Debug, Clone)]
pub struct StrategyVerdict {
    pub strategy: DuplicateStrategy,
    pub similarity: f32,
    pub duplicate_type: Option<String>,
    pub rule_label: Option<String>,
}

/// Host-supplied predicate slotted into the pipeline at a priority index.
#[derive(Clone)]
pub struct CustomRule {
    pub label: String,
    pub priority: usize,
    pub predicate: Arc<dyn Fn(&DedupItem, &DedupItem) -> bool + Send + Sync>,
}

impl std::fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CustomRule")
            .field("label", &self.label)
            .field("priority", &self.priority)
            .finish()
    }
}

#[derive(Debug, Clone, Copy)]
pub struct StrategyThresholds {
    pub content: f32,
    pub version: f32,
    pub fuzzy: f32,
    pub combined: f32,
}

impl Default for StrategyThresholds {
    fn default() -> Self {
        Self { content: 0.8, version: 0.85, fuzzy: 0.7, combined: 0.8 }
    }
}

pub fn exact_id(left: &DedupItem, right: &DedupItem) -> Option<StrategyVerdict> {
    (left.id == right.id).then(|| StrategyVerdict {
        strategy: DuplicateStrategy::ExactId,
        similarity: 1.0,
        duplicate_type: None,
        rule_label: None,
    })
}

pub fn exact_url(left: &DedupItem, right: &DedupItem) -> Option<StrategyVerdict> {
    match (&left.canonical_url, &right.canonical_url) {
        (Some(a), Some(b)) if a == b => Some(StrategyVerdict {
            strategy: DuplicateStrategy::ExactUrl,
            similarity: 1.0,
            duplicate_type: None,
            rule_label: None,
        }),
        _ => None,
    }
}

/// Weighted sum of per-field token-set similarities.
pub fn content_similarity_score(
    left: &DedupItem,
    right: &DedupItem,
    weights: &FieldWeights,
) -> f32 {
    let name_sim = token_set_jaccard(&left.name, &right.name);
    let description_sim = token_set_jaccard(&left.description, &right.description);
    let url_sim = match (&left.canonical_url, &right.canonical_url) {
        (Some(a), Some(b)) => {
            if a == b {
                1.0
            } else {
                0.0
            }
        }
        _ => 0.0,
    };
    let category_sim =
        token_set_jaccard(&left.categories.join(" "), &right.categories.join(" "));

    weights.name * name_sim
        + weights.description * description_sim
        + weights.url * url_sim
        + weights.category * category_sim
}

pub fn content_similarity(
    left: &DedupItem,
    right: &DedupItem,
    weights: &FieldWeights,
    threshold: f32,
) -> Option<StrategyVerdict> {
    let score = content_similarity_score(left, right, weights);
    (score >= threshold).then(|| StrategyVerdict {
        strategy: DuplicateStrategy::ContentSimilarity,
        similarity: score,
        duplicate_type: None,
        rule_label: None,
    })
}

/// Same-stem similarity ignoring the version tokens; used by VERSION_AWARE
/// and as a partial signal for COMBINED.
pub fn version_signal(left: &DedupItem, right: &DedupItem) -> Option<f32> {
    let (left_stem, left_stripped) = version_stem(&left.name);
    let (right_stem, right_stripped) = version_stem(&right.name);
    if left_stem.is_empty() || left_stem != right_stem {
        return None;
    }
    // At least one side must actually carry a version token, and the stems
    // must look like the same tool, not a coincidence of tokenising.
    if !(left_stripped || right_stripped) {
        return None;
    }
    let stem_confidence = strsim::jaro_winkler(&left_stem, &right_stem) as f32;
    let non_version = token_set_jaccard(&left.description, &right.description)
        .max(trigram_similarity(&left.description, &right.description));
    // The shared stem carries most of the signal; descriptions refine it.
    Some((0.7 * stem_confidence + 0.3 * non_version).clamp(0.0, 1.0))
}

pub fn version_aware(
    left: &DedupItem,
    right: &DedupItem,
    threshold: f32,
) -> Option<StrategyVerdict> {
    let score = version_signal(left, right)?;
    (score >= threshold).then(|| StrategyVerdict {
        strategy: DuplicateStrategy::VersionAware,
        similarity: score,
        duplicate_type: Some("version-variant".to_string()),
        rule_label: None,
    })
}

pub fn fuzzy_score(left: &DedupItem, right: &DedupItem) -> f32 {
    let left_text = format!("{} {}", left.name, left.description);
    let right_text = format!("{} {}", right.name, right.description);
    trigram_similarity(&left_text, &right_text)
}

pub fn fuzzy_match(
    left: &DedupItem,
    right: &DedupItem,
    threshold: f32,
) -> Option<StrategyVerdict> {
    let score = fuzzy_score(left, right);
    (score >= threshold).then(|| StrategyVerdict {
        strategy: DuplicateStrategy::FuzzyMatch,
        similarity: score,
        duplicate_type: None,
        rule_label: None,
    })
}

/// Fall-through when single strategies were inconclusive. By default the
/// partial signals are weight-summed against the combined threshold; the
/// `or_mode` reading fires when any single partial crosses it.
pub fn combined(
    left: &DedupItem,
    right: &DedupItem,
    weights: &FieldWeights,
    threshold: f32,
    or_mode: bool,
) -> Option<StrategyVerdict> {
    let content = content_similarity_score(left, right, weights);
    let version = version_signal(left, right).unwrap_or(0.0);
    let fuzzy = fuzzy_score(left, right);

    let score = if or_mode {
        content.max(version).max(fuzzy)
    } else {
        0.5 * content + 0.2 * version + 0.3 * fuzzy
    };

    (score >= threshold).then(|| StrategyVerdict {
        strategy: DuplicateStrategy::Combined,
        similarity: score,
        duplicate_type: None,
        rule_label: None,
    })
}
