use futures::future::join_all;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use toolhub_models::{Candidate, Provenance, QueryVectorSource, SpaceMetrics, VectorSpace};

use crate::services::vector_store::{VectorFilter, VectorSearcher};

/// One space's slice of a fan-out. The label names the source in fusion and
/// telemetry; two queries may hit the same space under different labels
/// (e.g. the query text and a semantic variant).
#[derive(Debug, Clone)]
pub struct SpaceQuery {
    pub label: String,
    pub space: VectorSpace,
    pub vector: Vec<f32>,
    pub top_k: usize,
    pub filter: Option<VectorFilter>,
    pub query_vector_source: Option<QueryVectorSource>,
}

impl SpaceQuery {
    pub fn new(space: VectorSpace, vector: Vec<f32>, top_k: usize) -> Self {
        Self {
            label: space.source_label(),
            space,
            vector,
            top_k,
            filter: None,
            query_vector_source: Some(QueryVectorSource::QueryText),
        }
    }
}

#[derive(Debug, Default)]
pub struct MultiSpaceResults {
    /// Source label -> ranked candidates, empty on failure.
    pub per_source: BTreeMap<String, Vec<Candidate>>,
    pub metrics: BTreeMap<String, SpaceMetrics>,
}

impl MultiSpaceResults {
    pub fn failed_sources(&self) -> Vec<String> {
        self.metrics
            .iter()
            .filter(|(_, m)| m.error.is_some())
            .map(|(label, _)| label.clone())
            .collect()
    }
}

/// Fans one query out across named spaces in parallel. Every space gets an
/// independent timeout; a failing or slow space contributes an empty list
/// and an error metric while its siblings proceed.
pub struct MultiVectorRetriever {
    searcher: Arc<dyn VectorSearcher>,
    per_space_timeout: Duration,
}

impl MultiVectorRetriever {
    pub fn new(searcher: Arc<dyn VectorSearcher>, per_space_timeout: Duration) -> Self {
        Self { searcher, per_space_timeout }
    }

    pub fn searcher(&self) -> Arc<dyn VectorSearcher> {
        Arc::clone(&self.searcher)
    }

    pub async fn retrieve(&self, queries: Vec<SpaceQuery>) -> MultiSpaceResults {
        let tasks = queries.into_iter().map(|query| {
            let searcher = Arc::clone(&self.searcher);
            let timeout = self.per_space_timeout;
            async move {
                let started = Instant::now();
                let outcome = tokio::time::timeout(
                    timeout,
                    searcher.search_space(
                        query.space,
                        &query.vector,
                        query.top_k,
                        query.filter.as_ref(),
                    ),
                )
                .await;
                let elapsed = started.elapsed();

                match outcome {
                    Ok(Ok(hits)) => {
                        debug!(
                            "source {} returned {} hits in {elapsed:?}",
                            query.label,
                            hits.len()
                        );
                        let avg_score = if hits.is_empty() {
                            0.0
                        } else {
                            hits.iter().map(|h| h.score).sum::<f32>() / hits.len() as f32
                        };
                        let candidates: Vec<Candidate> = hits
                            .into_iter()
                            .enumerate()
                            .map(|(index, hit)| Candidate {
                                id: hit.id,
                                source: query.label.clone(),
                                score: hit.score.clamp(0.0, 1.0),
                                payload: hit.payload,
                                rank: index + 1,
                                provenance: Provenance {
                                    space: Some(query.space),
                                    filters: query
                                        .filter
                                        .as_ref()
                                        .map(|f| f.predicates.clone())
                                        .unwrap_or_default(),
                                    query_vector_source: query.query_vector_source,
                                },
                            })
                            .collect();
                        let metrics = SpaceMetrics {
                            search_time_ms: elapsed.as_millis() as u64,
                            result_count: candidates.len(),
                            avg_score,
                            error: None,
                        };
                        (query.label, candidates, metrics)
                    }
                    Ok(Err(error)) => {
                        warn!("source {} search failed: {error}", query.label);
                        let metrics = SpaceMetrics {
                            search_time_ms: elapsed.as_millis() as u64,
                            result_count: 0,
                            avg_score: 0.0,
                            error: Some(error.to_string()),
                        };
                        (query.label, Vec::new(), metrics)
                    }
                    Err(_) => {
                        warn!("source {} timed out after {timeout:?}", query.label);
                        let metrics = SpaceMetrics {
                            search_time_ms: elapsed.as_millis() as u64,
                            result_count: 0,
                            avg_score: 0.0,
                            error: Some(format!("timed out after {timeout:?}")),
                        };
                        (query.label, Vec::new(), metrics)
                    }
                }
            }
        });

        let mut results = MultiSpaceResults::default();
        for (label, candidates, metrics) in join_all(tasks).await {
            results.metrics.insert(label.clone(), metrics);
            results.per_source.insert(label, candidates);
        }
        results
    }
}
