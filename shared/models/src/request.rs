use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use validator::Validate;

use crate::dedup::DuplicateStrategy;
use crate::plan::FieldPredicate;
use crate::spaces::VectorSpace;

/// Inbound search operation. The HTTP layer deserializes into this and the
/// facade rejects it with `InputInvalid` before any external call is made.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct EnhancedSearchRequest {
    #[validate(length(min = 1, max = 500))]
    pub query: String,
    #[serde(default)]
    #[validate(nested)]
    pub options: SearchOptions,
}

impl EnhancedSearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self { query: query.into(), options: SearchOptions::default() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SearchOptions {
    pub sources: SourceFlags,
    #[validate(nested)]
    pub vector_options: VectorOptions,
    #[validate(nested)]
    pub merge_options: MergeOptions,
    #[validate(nested)]
    pub duplicate_detection: DuplicateDetectionOptions,
    #[validate(nested)]
    pub pagination: Pagination,
    pub sort: SortOptions,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filters: Option<Vec<FieldPredicate>>,
    #[validate(nested)]
    pub performance: PerformanceOptions,
    pub context_enrichment: FeatureBlock,
    pub local_nlp: FeatureBlock,
    pub multi_vector_search: FeatureBlock,
    pub debug: bool,
    pub include_metadata: bool,
    pub include_source_attribution: bool,
    pub include_execution_metrics: bool,
    pub include_confidence_breakdown: bool,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self {
            sources: SourceFlags::default(),
            vector_options: VectorOptions::default(),
            merge_options: MergeOptions::default(),
            duplicate_detection: DuplicateDetectionOptions::default(),
            pagination: Pagination::default(),
            sort: SortOptions::default(),
            filters: None,
            performance: PerformanceOptions::default(),
            context_enrichment: FeatureBlock { enabled: true, ..FeatureBlock::default() },
            local_nlp: FeatureBlock::default(),
            multi_vector_search: FeatureBlock { enabled: true, ..FeatureBlock::default() },
            debug: false,
            include_metadata: true,
            include_source_attribution: false,
            include_execution_metrics: false,
            include_confidence_breakdown: false,
        }
    }
}

/// Which source families participate in the request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceFlags {
    pub vector: bool,
    pub traditional: bool,
    pub hybrid: bool,
}

impl Default for SourceFlags {
    fn default() -> Self {
        Self { vector: true, traditional: true, hybrid: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct VectorOptions {
    /// Spaces to fan out over; empty means the planner decides.
    pub vector_types: Vec<VectorSpace>,
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<FieldPredicate>>,
}

impl Default for VectorOptions {
    fn default() -> Self {
        Self { vector_types: vec![], limit: 20, filter: None }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategyKind {
    ReciprocalRankFusion,
    WeightedAverage,
    Hybrid,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct MergeOptions {
    pub strategy: MergeStrategyKind,
    #[validate(range(min = 1, max = 200))]
    pub rrf_k_value: u32,
    #[validate(range(min = 1, max = 200))]
    pub max_results: usize,
    /// Per-source-label weight overrides.
    pub source_weights: HashMap<String, f32>,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            strategy: MergeStrategyKind::ReciprocalRankFusion,
            rrf_k_value: 60,
            max_results: 50,
            source_weights: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DuplicateDetectionOptions {
    pub enabled: bool,
    pub use_enhanced_detection: bool,
    #[validate(range(min = 0.0, max = 1.0))]
    pub threshold: f32,
    /// Strategy pipeline in priority order; empty means the default set.
    pub strategies: Vec<DuplicateStrategy>,
}

impl Default for DuplicateDetectionOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            use_enhanced_detection: false,
            threshold: 0.8,
            strategies: vec![],
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Pagination {
    #[validate(range(min = 1))]
    pub page: usize,
    #[validate(range(min = 1, max = 100))]
    pub limit: usize,
}

impl Default for Pagination {
    fn default() -> Self {
        Self { page: 1, limit: 20 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    Relevance,
    Name,
    Category,
    Score,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    Desc,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SortOptions {
    pub field: SortField,
    pub order: SortOrder,
}

impl Default for SortOptions {
    fn default() -> Self {
        Self { field: SortField::Relevance, order: SortOrder::Desc }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PerformanceOptions {
    #[validate(range(min = 100, max = 30000))]
    pub timeout_ms: u64,
    pub enable_cache: bool,
    pub enable_parallel: bool,
}

impl Default for PerformanceOptions {
    fn default() -> Self {
        Self { timeout_ms: 10_000, enable_cache: true, enable_parallel: true }
    }
}

/// Generic feature toggle block with an optional threshold knob.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureBlock {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threshold: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_entities: Option<usize>,
}
