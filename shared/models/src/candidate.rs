use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::plan::{FieldPredicate, QueryVectorSource};
use crate::spaces::VectorSpace;

/// How a candidate was obtained: which space, which filters, which query
/// vector. Structured candidates leave the space empty.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub space: Option<VectorSpace>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<FieldPredicate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_vector_source: Option<QueryVectorSource>,
}

/// One ranked entry from a single source, pre-fusion.
///
/// `source` is an opaque label (`vector:<space>` or `structured:<collection>`)
/// so additional sources can be added without format changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub source: String,
    /// Normalised score in [0,1] within the candidate's own source.
    pub score: f32,
    pub payload: Value,
    /// 1-based rank within the originating source.
    pub rank: usize,
    #[serde(default)]
    pub provenance: Provenance,
}

/// Per-source rank and raw score recorded on a fused result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceRanking {
    pub rank: usize,
    pub score: f32,
}

/// A candidate enriched with cross-source fusion metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergedResult {
    pub id: String,
    pub payload: Value,
    /// Final normalised score for the response.
    pub score: f32,
    pub rrf_score: f64,
    /// Every source that contributed, with its rank and raw score.
    pub original_rankings: BTreeMap<String, SourceRanking>,
    pub source_count: usize,
    /// Position in the returned sequence, 1-based.
    pub final_rank: usize,
    /// Deduplicated contributing source labels, in first-seen order.
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub provenance: Provenance,
}

impl MergedResult {
    pub fn max_raw_score(&self) -> f32 {
        self.original_rankings
            .values()
            .map(|r| r.score)
            .fold(f32::MIN, f32::max)
    }

    /// Payload name, used by sorting and duplicate detection.
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }
}
