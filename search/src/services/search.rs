use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

use toolhub_models::{
    ConfidenceBreakdown, DuplicateDetectionReport, DuplicateStrategy, EnhancedSearchRequest,
    EnhancedSearchResponse, ErrorResponse, ExecutionMetrics, MergeStrategyKind, MergedResult,
    PaginationInfo, SearchSummary, SortField, SortOrder, SourceAttribution, SourceContribution,
    VectorSpace,
};

use crate::errors::SearchError;
use crate::services::dedup::strategies::StrategyThresholds;
use crate::services::dedup::{DetectorConfig, DuplicateDetector};
use crate::services::fusion::{weight_for_label, MergeConfig, MergeStrategy};
use crate::services::pipeline::{PipelineOptions, SearchPipeline};

/// Process-level defaults the facade folds into every request.
#[derive(Debug, Clone)]
pub struct SearchDefaults {
    pub source_weights: HashMap<String, f32>,
    pub dedup: DetectorConfig,
    pub request_deadline: Duration,
}

impl Default for SearchDefaults {
    fn default() -> Self {
        Self {
            source_weights: HashMap::new(),
            dedup: DetectorConfig::default(),
            request_deadline: Duration::from_secs(10),
        }
    }
}

/// The search operation: request validation, pipeline execution under the
/// request deadline, sorting, pagination, and response assembly.
pub struct SearchService {
    pipeline: SearchPipeline,
    defaults: SearchDefaults,
}

impl SearchService {
    pub fn new(pipeline: SearchPipeline, defaults: SearchDefaults) -> Self {
        Self { pipeline, defaults }
    }

    pub async fn search(
        &self,
        request: EnhancedSearchRequest,
    ) -> Result<EnhancedSearchResponse, Box<ErrorResponse>> {
        let request_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        // Reject bad input before any external call is made.
        if let Err(validation) = request.validate() {
            let error = SearchError::InputInvalid(validation.to_string());
            return Err(self.error_response(&error, &request_id, None, request.options.debug));
        }

        let options = self.pipeline_options(&request);
        let deadline = Duration::from_millis(request.options.performance.timeout_ms)
            .min(self.defaults.request_deadline.max(Duration::from_millis(100)));

        let outcome =
            match tokio::time::timeout(deadline, self.pipeline.run(&request.query, options)).await
            {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(failure)) => {
                    warn!("pipeline failed at {:?}", failure.telemetry.failed_stage);
                    return Err(self.error_response(
                        &failure.error,
                        &request_id,
                        failure.telemetry.failed_stage.clone(),
                        request.options.debug,
                    ));
                }
                Err(_) => {
                    let error = SearchError::Timeout(deadline);
                    return Err(self.error_response(
                        &error,
                        &request_id,
                        Some("deadline".to_string()),
                        request.options.debug,
                    ));
                }
            };

        if outcome.output.all_failed {
            // Escalate with the first source's error class.
            let code = outcome
                .output
                .errors
                .first()
                .map(|e| e.code.clone())
                .unwrap_or_else(|| "TIMEOUT".to_string());
            return Err(Box::new(ErrorResponse {
                code,
                message: "all sources failed".to_string(),
                request_id,
                stage: request.options.debug.then(|| "execution".to_string()),
            }));
        }

        let mut results = outcome.output.results;
        sort_results(&mut results, &request);
        for (index, result) in results.iter_mut().enumerate() {
            result.final_rank = index + 1;
        }

        let total_results = results.len();
        let pagination = &request.options.pagination;
        let page_start = (pagination.page - 1).saturating_mul(pagination.limit);
        let page: Vec<MergedResult> =
            results.into_iter().skip(page_start).take(pagination.limit).collect();

        let duplicates_removed = outcome
            .output
            .dedup_stats
            .as_ref()
            .map(|stats| stats.duplicates_removed)
            .unwrap_or(0);

        let effective_weights = self.effective_weights(&request);
        let source_attribution = request.options.include_source_attribution.then(|| {
            let mut attribution = SourceAttribution::default();
            for (label, metrics) in &outcome.output.source_metrics {
                if metrics.error.is_some() {
                    continue;
                }
                attribution.per_source.insert(
                    label.clone(),
                    SourceContribution {
                        result_count: metrics.result_count,
                        avg_score: metrics.avg_score,
                        weight: weight_for_label(&effective_weights, label),
                    },
                );
            }
            attribution
        });

        let metrics = request.options.include_execution_metrics.then(|| ExecutionMetrics {
            execution_path: outcome.telemetry.execution_path.clone(),
            node_execution_times: outcome.telemetry.node_execution_times.clone(),
            per_space: outcome.output.source_metrics.clone(),
        });

        let confidence = request.options.include_confidence_breakdown.then(|| {
            let intent = outcome.intent.confidence;
            let plan = outcome.plan.confidence;
            let execution = outcome.output.confidence;
            ConfidenceBreakdown {
                intent,
                plan,
                execution,
                overall: ((intent + plan + execution) / 3.0).clamp(0.0, 1.0),
            }
        });

        let debug = request.options.debug.then(|| {
            serde_json::json!({
                "intent": outcome.intent,
                "plan": outcome.plan,
                "context": outcome.context,
                "execution_path": outcome.telemetry.execution_path,
            })
        });

        let duplicate_detection =
            request.options.duplicate_detection.enabled.then(|| DuplicateDetectionReport {
                groups: outcome.output.duplicate_groups.clone(),
                stats: outcome.output.dedup_stats.clone().unwrap_or_default(),
            });

        info!(
            "search completed: {} results, {} sources, {}ms",
            total_results,
            outcome.output.sources_searched.len(),
            started.elapsed().as_millis()
        );

        Ok(EnhancedSearchResponse {
            request_id,
            summary: SearchSummary {
                total_results,
                returned: page.len(),
                processing_time_ms: started.elapsed().as_millis() as u64,
                sources_searched: outcome.output.sources_searched.clone(),
                duplicates_removed,
                search_strategy: outcome.plan.strategy.clone(),
            },
            results: page,
            source_attribution,
            duplicate_detection,
            metrics,
            confidence,
            debug,
            pagination: PaginationInfo::new(pagination.page, pagination.limit, total_results),
            errors: outcome.output.errors,
        })
    }

    fn pipeline_options(&self, request: &EnhancedSearchRequest) -> PipelineOptions {
        let options = &request.options;
        let merge_config = MergeConfig {
            strategy: match options.merge_options.strategy {
                MergeStrategyKind::ReciprocalRankFusion => MergeStrategy::ReciprocalRankFusion,
                MergeStrategyKind::WeightedAverage => MergeStrategy::WeightedAverage,
                MergeStrategyKind::Hybrid => MergeStrategy::Hybrid,
            },
            rrf_k: options.merge_options.rrf_k_value,
            max_results: options.merge_options.max_results,
            source_weights: self.effective_weights(request),
            preserve_metadata: options.include_metadata,
        };

        let detector = options.duplicate_detection.enabled.then(|| {
            let requested = &options.duplicate_detection;
            let mut strategies: Vec<DuplicateStrategy> = if requested.strategies.is_empty() {
                self.defaults.dedup.strategies.clone()
            } else {
                requested.strategies.clone()
            };
            if requested.use_enhanced_detection
                && !strategies.contains(&DuplicateStrategy::Combined)
            {
                strategies.push(DuplicateStrategy::Combined);
            }
            Arc::new(DuplicateDetector::new(DetectorConfig {
                strategies,
                thresholds: StrategyThresholds {
                    content: requested.threshold,
                    combined: requested.threshold,
                    ..self.defaults.dedup.thresholds
                },
                parallel: options.performance.enable_parallel,
                ..self.defaults.dedup.clone()
            }))
        });

        // With multi-vector search switched off, the fan-out collapses to
        // the semantic space unless the request pinned spaces explicitly.
        let vector_types = if !options.multi_vector_search.enabled
            && options.vector_options.vector_types.is_empty()
        {
            vec![VectorSpace::Semantic]
        } else {
            options.vector_options.vector_types.clone()
        };

        PipelineOptions {
            merge_config,
            detector,
            extra_filter: options.filters.clone().unwrap_or_default(),
            structured_limit: options.vector_options.limit.max(options.pagination.limit),
            enrich_context: options.context_enrichment.enabled,
            allow_vector: options.sources.vector || options.sources.hybrid,
            allow_structured: options.sources.traditional || options.sources.hybrid,
            vector_types,
            vector_limit: options.vector_options.limit,
            vector_filter: options.vector_options.filter.clone().unwrap_or_default(),
        }
    }

    fn effective_weights(&self, request: &EnhancedSearchRequest) -> HashMap<String, f32> {
        let mut weights = self.defaults.source_weights.clone();
        for (label, weight) in &request.options.merge_options.source_weights {
            weights.insert(label.clone(), *weight);
        }
        weights
    }

    fn error_response(
        &self,
        error: &SearchError,
        request_id: &str,
        stage: Option<String>,
        debug: bool,
    ) -> Box<ErrorResponse> {
        Box::new(ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
            request_id: request_id.to_string(),
            stage: if debug { stage } else { None },
        })
    }
}

fn sort_results(results: &mut [MergedResult], request: &EnhancedSearchRequest) {
    let sort = request.options.sort;
    match sort.field {
        // Relevance and score are the fused order, already descending.
        SortField::Relevance | SortField::Score => {
            if sort.order == SortOrder::Asc {
                results.reverse();
            }
        }
        SortField::Name => {
            results.sort_by_key(|r| {
                r.payload_str("name").unwrap_or_default().to_lowercase()
            });
            if sort.order == SortOrder::Desc {
                results.reverse();
            }
        }
        SortField::Category => {
            results.sort_by_key(|r| {
                r.payload
                    .get("categories")
                    .and_then(|v| v.as_array())
                    .and_then(|a| a.first())
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_lowercase()
            });
            if sort.order == SortOrder::Desc {
                results.reverse();
            }
        }
    }
}
