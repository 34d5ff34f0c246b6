pub mod candidate;
pub mod context;
pub mod dedup;
pub mod intent;
pub mod plan;
pub mod record;
pub mod request;
pub mod response;
pub mod spaces;

pub use candidate::{Candidate, MergedResult, Provenance, SourceRanking};
pub use context::{EntityFrequency, EntityStatistics, QueryContext};
pub use dedup::{DedupStats, DuplicateGroup, DuplicateStrategy};
pub use intent::{ComparisonMode, Intent, PricingFilter, PrimaryGoal};
pub use plan::{
    FieldPredicate, FilterOperator, FusionKind, QueryVectorSource, RetrievalPlan,
    StructuredSourceSpec, VectorSourceSpec,
};
pub use record::{PointPayload, PricingSchedule, Record, TechnicalAttributes};
pub use request::{
    DuplicateDetectionOptions, EnhancedSearchRequest, FeatureBlock, MergeOptions,
    MergeStrategyKind, Pagination, PerformanceOptions, SearchOptions, SortField, SortOptions,
    SortOrder, SourceFlags, VectorOptions,
};
pub use response::{
    ConfidenceBreakdown, DuplicateDetectionReport, EnhancedSearchResponse, ErrorResponse,
    ExecutionMetrics, PaginationInfo, SearchSummary, SourceAttribution, SourceContribution,
    SourceErrorEntry, SpaceMetrics,
};
pub use spaces::VectorSpace;
