use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

use crate::candidate::MergedResult;
use crate::dedup::{DedupStats, DuplicateGroup};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnhancedSearchResponse {
    pub request_id: String,
    pub results: Vec<MergedResult>,
    pub summary: SearchSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_attribution: Option<SourceAttribution>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duplicate_detection: Option<DuplicateDetectionReport>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ExecutionMetrics>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<ConfidenceBreakdown>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub debug: Option<Value>,
    pub pagination: PaginationInfo,
    /// Per-source failures on a partially successful request.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<SourceErrorEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchSummary {
    pub total_results: usize,
    pub returned: usize,
    pub processing_time_ms: u64,
    pub sources_searched: Vec<String>,
    pub duplicates_removed: usize,
    pub search_strategy: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceAttribution {
    pub per_source: BTreeMap<String, SourceContribution>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContribution {
    pub result_count: usize,
    pub avg_score: f32,
    pub weight: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DuplicateDetectionReport {
    pub groups: Vec<DuplicateGroup>,
    pub stats: DedupStats,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    /// Stage names in the order they ran.
    pub execution_path: Vec<String>,
    /// Stage name -> elapsed milliseconds.
    pub node_execution_times: BTreeMap<String, u64>,
    /// Per-space fan-out metrics from the retriever.
    #[serde(default)]
    pub per_space: BTreeMap<String, SpaceMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpaceMetrics {
    pub search_time_ms: u64,
    pub result_count: usize,
    pub avg_score: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ConfidenceBreakdown {
    pub intent: f32,
    pub plan: f32,
    pub execution: f32,
    pub overall: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceErrorEntry {
    pub source: String,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PaginationInfo {
    pub page: usize,
    pub limit: usize,
    pub total_pages: usize,
    pub total_results: usize,
}

impl PaginationInfo {
    pub fn new(page: usize, limit: usize, total_results: usize) -> Self {
        let total_pages = if total_results == 0 {
            0
        } else {
            total_results.div_ceil(limit.max(1))
        };
        Self { page, limit, total_pages, total_results }
    }
}

/// Body returned on a terminal error: a stable code, a human message, the
/// request id, and (in debug mode) the stage that failed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
    pub request_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,
}
