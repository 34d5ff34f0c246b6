use futures::future::join_all;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use toolhub_embedding::EmbeddingProvider;
use toolhub_models::{
    Candidate, ComparisonMode, DedupStats, DuplicateGroup, FieldPredicate, Intent,
    MergedResult, Provenance, QueryVectorSource, RetrievalPlan, SourceErrorEntry, SpaceMetrics,
    StructuredSourceSpec,
};

use crate::errors::SearchError;
use crate::services::dedup::DuplicateDetector;
use crate::services::document_store::DocumentStore;
use crate::services::fusion::{MergeConfig, MergeStrategy, ResultMerger, SourceResults};
use crate::services::multi_vector::{MultiVectorRetriever, SpaceQuery};
use crate::services::vector_store::VectorFilter;

pub struct ExecutionRequest<'a> {
    pub plan: &'a RetrievalPlan,
    pub intent: &'a Intent,
    pub query: &'a str,
    pub merge_config: MergeConfig,
    pub detector: Option<&'a DuplicateDetector>,
    /// Request-level filters pushed into every source.
    pub extra_filter: Vec<FieldPredicate>,
    pub structured_limit: usize,
}

#[derive(Debug, Default)]
pub struct ExecutionOutput {
    pub results: Vec<MergedResult>,
    pub duplicate_groups: Vec<DuplicateGroup>,
    pub dedup_stats: Option<DedupStats>,
    pub source_metrics: BTreeMap<String, SpaceMetrics>,
    pub errors: Vec<SourceErrorEntry>,
    pub sources_searched: Vec<String>,
    pub strategy_used: String,
    pub confidence: f32,
    /// True when every planned source failed; the facade escalates this.
    pub all_failed: bool,
}

/// Runs a retrieval plan: vector sources through the parallel retriever and
/// structured sources through the document store, all concurrently, then
/// fusion and duplicate detection. Per-source failures are recorded, never
/// propagated, unless every source fails.
pub struct QueryExecutor {
    retriever: MultiVectorRetriever,
    documents: Arc<dyn DocumentStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    document_timeout: Duration,
}

impl QueryExecutor {
    pub fn new(
        retriever: MultiVectorRetriever,
        documents: Arc<dyn DocumentStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        document_timeout: Duration,
    ) -> Self {
        Self { retriever, documents, embeddings, document_timeout }
    }

    pub async fn execute(
        &self,
        request: ExecutionRequest<'_>,
    ) -> Result<ExecutionOutput, SearchError> {
        let plan = request.plan;
        if plan.is_empty() {
            debug!("plan is empty, skipping retrieval");
            return Ok(ExecutionOutput {
                strategy_used: plan.strategy.clone(),
                ..ExecutionOutput::default()
            });
        }

        let planned_sources = plan.vector_sources.len() + plan.structured_sources.len();
        let mut errors: Vec<SourceErrorEntry> = Vec::new();
        let mut source_metrics: BTreeMap<String, SpaceMetrics> = BTreeMap::new();

        // Resolve the query vector for every vector source up front; one
        // batched embedding call covers all distinct texts.
        let (space_queries, embed_errors) =
            self.build_space_queries(plan, request.query, &request.extra_filter).await;
        errors.extend(embed_errors);

        let vector_future = self.retriever.retrieve(space_queries);
        let structured_future = self.run_structured_sources(
            &plan.structured_sources,
            &request.extra_filter,
            request.structured_limit,
        );
        let (vector_results, structured_results) =
            tokio::join!(vector_future, structured_future);

        let mut sources: Vec<SourceResults> = Vec::new();
        let mut sources_searched: Vec<String> = Vec::new();

        for (label, metrics) in vector_results.metrics {
            if let Some(error) = &metrics.error {
                errors.push(SourceErrorEntry {
                    source: label.clone(),
                    code: error_code_for(error),
                    message: error.clone(),
                });
            } else {
                sources_searched.push(label.clone());
            }
            source_metrics.insert(label, metrics);
        }
        for (label, candidates) in vector_results.per_source {
            if !candidates.is_empty() {
                sources.push(SourceResults { label, candidates });
            }
        }

        for outcome in structured_results {
            match outcome {
                StructuredOutcome::Hit { label, candidates, metrics } => {
                    sources_searched.push(label.clone());
                    source_metrics.insert(label.clone(), metrics);
                    if !candidates.is_empty() {
                        sources.push(SourceResults { label, candidates });
                    }
                }
                StructuredOutcome::Failed { label, code, message, metrics } => {
                    source_metrics.insert(label.clone(), metrics);
                    errors.push(SourceErrorEntry { source: label, code, message });
                }
            }
        }

        let failed = errors
            .iter()
            .map(|e| e.source.clone())
            .collect::<HashSet<_>>()
            .len();
        if failed >= planned_sources && sources.is_empty() {
            warn!("all {planned_sources} sources failed");
            return Ok(ExecutionOutput {
                errors,
                source_metrics,
                strategy_used: plan.strategy.clone(),
                confidence: 0.0,
                all_failed: true,
                ..ExecutionOutput::default()
            });
        }

        // Single-source plans bypass fusion entirely.
        let effective_strategy = if planned_sources <= 1 {
            MergeStrategy::None
        } else {
            request.merge_config.strategy
        };
        let merger = ResultMerger::new(MergeConfig {
            strategy: effective_strategy,
            ..request.merge_config.clone()
        })?;
        let single_source = sources.len() <= 1;
        let mut merged = merger.merge(sources);

        if let Some(reference_tool) = &request.intent.reference_tool {
            if request.intent.comparison_mode == Some(ComparisonMode::AlternativeTo) {
                merged.retain(|result| {
                    !result
                        .payload_str("name")
                        .map(|name| name.eq_ignore_ascii_case(reference_tool))
                        .unwrap_or(false)
                });
            }
        }

        let (mut results, duplicate_groups, dedup_stats) = match request.detector {
            Some(detector) => {
                let outcome = detector.detect(&merged);
                (outcome.deduplicated, outcome.groups, Some(outcome.stats))
            }
            None => (merged, Vec::new(), None),
        };

        // Re-rank after exclusion and dedup so finalRank matches position;
        // a lone source reports the positional score instead of its RRF sum.
        let total = results.len();
        for (index, result) in results.iter_mut().enumerate() {
            result.final_rank = index + 1;
            result.score = if single_source {
                1.0 - (index as f32 / total.max(1) as f32)
            } else {
                result.rrf_score as f32
            };
        }

        let confidence = if planned_sources == 0 {
            0.0
        } else {
            (planned_sources - failed.min(planned_sources)) as f32 / planned_sources as f32
        };

        Ok(ExecutionOutput {
            results,
            duplicate_groups,
            dedup_stats,
            source_metrics,
            errors,
            sources_searched,
            strategy_used: effective_strategy.as_str().to_string(),
            confidence,
            all_failed: false,
        })
    }

    /// Build one SpaceQuery per plan vector source. Returns error entries for
    /// sources whose query vector could not be produced.
    async fn build_space_queries(
        &self,
        plan: &RetrievalPlan,
        query: &str,
        extra_filter: &[FieldPredicate],
    ) -> (Vec<SpaceQuery>, Vec<SourceErrorEntry>) {
        let mut texts: Vec<String> = Vec::new();
        let mut text_index: HashMap<String, usize> = HashMap::new();
        let mut requested: Vec<(usize, String)> = Vec::new();

        for source in &plan.vector_sources {
            let text = match source.query_vector_source {
                QueryVectorSource::QueryText => query.to_string(),
                QueryVectorSource::SemanticVariant | QueryVectorSource::ReferenceToolEmbedding => {
                    source.embedding_hint.clone().unwrap_or_else(|| query.to_string())
                }
            };
            let index = *text_index.entry(text.clone()).or_insert_with(|| {
                texts.push(text.clone());
                texts.len() - 1
            });
            requested.push((index, text));
        }

        let embeddings = match self.embeddings.embed_batch(&texts).await {
            Ok(vectors) => vectors,
            Err(error) => {
                warn!("query embedding failed: {error}");
                let errors = plan
                    .vector_sources
                    .iter()
                    .map(|source| SourceErrorEntry {
                        source: vector_label(source),
                        code: "EMBEDDING_UNAVAILABLE".to_string(),
                        message: error.to_string(),
                    })
                    .collect();
                return (Vec::new(), errors);
            }
        };

        let mut used_labels: HashSet<String> = HashSet::new();
        let queries = plan
            .vector_sources
            .iter()
            .zip(requested)
            .map(|(source, (text_slot, _))| {
                let mut label = vector_label(source);
                let mut suffix = 2;
                while !used_labels.insert(label.clone()) {
                    label = format!("{}#{suffix}", source.space.source_label());
                    suffix += 1;
                }

                let mut predicates = source.filter.clone().unwrap_or_default();
                predicates.extend(extra_filter.iter().cloned());
                let filter = (!predicates.is_empty())
                    .then(|| VectorFilter { predicates, exclude_ids: Vec::new() });

                SpaceQuery {
                    label,
                    space: source.space,
                    vector: embeddings[text_slot].clone(),
                    top_k: source.top_k,
                    filter,
                    query_vector_source: Some(source.query_vector_source),
                }
            })
            .collect();

        (queries, Vec::new())
    }

    async fn run_structured_sources(
        &self,
        specs: &[StructuredSourceSpec],
        extra_filter: &[FieldPredicate],
        limit: usize,
    ) -> Vec<StructuredOutcome> {
        let tasks = specs.iter().map(|spec| {
            let documents = Arc::clone(&self.documents);
            let label = spec.source_label();
            let mut predicates = spec.predicates.clone();
            predicates.extend(extra_filter.iter().cloned());
            let timeout = self.document_timeout;
            async move {
                let started = Instant::now();
                let outcome =
                    tokio::time::timeout(timeout, documents.search(&predicates, limit)).await;
                let elapsed = started.elapsed();
                match outcome {
                    Ok(Ok(records)) => {
                        let candidates = structured_candidates(&label, records, &predicates);
                        let metrics = SpaceMetrics {
                            search_time_ms: elapsed.as_millis() as u64,
                            result_count: candidates.len(),
                            avg_score: if candidates.is_empty() {
                                0.0
                            } else {
                                candidates.iter().map(|c| c.score).sum::<f32>()
                                    / candidates.len() as f32
                            },
                            error: None,
                        };
                        StructuredOutcome::Hit { label, candidates, metrics }
                    }
                    Ok(Err(error)) => StructuredOutcome::Failed {
                        label,
                        code: "DOCUMENT_STORE_ERROR".to_string(),
                        message: error.to_string(),
                        metrics: SpaceMetrics {
                            search_time_ms: elapsed.as_millis() as u64,
                            error: Some(error.to_string()),
                            ..SpaceMetrics::default()
                        },
                    },
                    Err(_) => StructuredOutcome::Failed {
                        label,
                        code: "TIMEOUT".to_string(),
                        message: format!("timed out after {timeout:?}"),
                        metrics: SpaceMetrics {
                            search_time_ms: elapsed.as_millis() as u64,
                            error: Some(format!("timed out after {timeout:?}")),
                            ..SpaceMetrics::default()
                        },
                    },
                }
            }
        });
        join_all(tasks).await
    }
}

enum StructuredOutcome {
    Hit { label: String, candidates: Vec<Candidate>, metrics: SpaceMetrics },
    Failed { label: String, code: String, message: String, metrics: SpaceMetrics },
}

/// Structured results arrive unordered; sort by id for determinism and
/// assign positional scores descending from 1.0.
fn structured_candidates(
    label: &str,
    mut records: Vec<toolhub_models::Record>,
    predicates: &[FieldPredicate],
) -> Vec<Candidate> {
    records.sort_by(|a, b| a.id.cmp(&b.id));
    let total = records.len().max(1);
    records
        .into_iter()
        .enumerate()
        .map(|(index, record)| Candidate {
            id: record.id.clone(),
            source: label.to_string(),
            score: 1.0 - index as f32 / total as f32,
            payload: serde_json::to_value(&record).unwrap_or_default(),
            rank: index + 1,
            provenance: Provenance {
                space: None,
                filters: predicates.to_vec(),
                query_vector_source: None,
            },
        })
        .collect()
}

fn vector_label(source: &toolhub_models::VectorSourceSpec) -> String {
    let base = source.space.source_label();
    match source.query_vector_source {
        QueryVectorSource::SemanticVariant => format!("{base}#variant"),
        _ => base,
    }
}

fn error_code_for(message: &str) -> String {
    if message.contains("timed out") {
        "TIMEOUT".to_string()
    } else {
        "VECTOR_STORE_ERROR".to_string()
    }
}
