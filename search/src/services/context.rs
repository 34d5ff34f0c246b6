use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use toolhub_models::{EntityFrequency, EntityStatistics, QueryContext, VectorSpace};

use crate::services::vector_store::{RawHit, VectorSearcher};

/// Strategy label of the healthy path.
const STRATEGY_MULTI_VECTOR: &str = "multi_vector";
/// Distinct label for the degraded path, so consumers can tell the
/// difference between "enriched" and "enrichment failed".
const STRATEGY_FALLBACK: &str = "fallback";

#[derive(Debug, Clone)]
pub struct ContextConfig {
    /// Top entities kept per dimension; the sample is twice this deep.
    pub max_entities_per_query: usize,
    /// Values below this share of the sample are dropped.
    pub min_frequency: f32,
    pub cache_ttl: Duration,
    pub cache_max_entries: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_entities_per_query: 5,
            min_frequency: 0.10,
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 256,
        }
    }
}

/// Builds entity-distribution statistics for a query by sampling the
/// dimension-bearing spaces. Failures are never fatal: the degraded result
/// carries zero confidence and an assumption recording what happened.
pub struct ContextEnrichmentService {
    searcher: Arc<dyn VectorSearcher>,
    config: ContextConfig,
    cache: Mutex<HashMap<String, (Instant, QueryContext)>>,
}

/// Which payload field feeds each dimension, and which space to sample.
const DIMENSIONS: [(&str, VectorSpace, &str); 4] = [
    ("categories", VectorSpace::EntityCategories, "categories"),
    ("functionality", VectorSpace::EntityFunctionality, "functionality"),
    ("interfaces", VectorSpace::CompositeToolType, "interfaces"),
    ("pricing", VectorSpace::Semantic, "has_free_tier"),
];

impl ContextEnrichmentService {
    pub fn new(searcher: Arc<dyn VectorSearcher>, config: ContextConfig) -> Self {
        Self { searcher, config, cache: Mutex::new(HashMap::new()) }
    }

    pub async fn enrich(&self, query: &str, embedding: &[f32]) -> QueryContext {
        if let Some(cached) = self.cache_get(query) {
            debug!("context cache hit for query");
            return cached;
        }

        let context = match self.build_statistics(embedding).await {
            Ok(statistics) => {
                let mut assumptions = heuristic_assumptions(query);
                if statistics.dimensions_with_data() == 0 {
                    assumptions.push("no entity signal in the sampled spaces".to_string());
                }
                let confidence = statistics.confidence;
                QueryContext {
                    entity_statistics: statistics,
                    assumptions,
                    metadata_confidence: confidence,
                    strategy: STRATEGY_MULTI_VECTOR.to_string(),
                }
            }
            Err(error) => {
                warn!("context enrichment failed: {error}");
                QueryContext {
                    entity_statistics: EntityStatistics::default(),
                    assumptions: vec![format!("entity statistics unavailable: {error}")],
                    metadata_confidence: 0.0,
                    strategy: STRATEGY_FALLBACK.to_string(),
                }
            }
        };

        self.cache_put(query.to_string(), context.clone());
        context
    }

    async fn build_statistics(
        &self,
        embedding: &[f32],
    ) -> Result<EntityStatistics, crate::errors::SearchError> {
        let sample_depth = self.config.max_entities_per_query * 2;
        let mut dimensions = BTreeMap::new();
        let mut similarity_sum = 0.0f32;
        let mut similarity_count = 0usize;
        let mut sample_size = 0usize;
        let mut any_success = false;
        let mut last_error = None;

        for (dimension, space, payload_field) in DIMENSIONS {
            match self.searcher.search_space(space, embedding, sample_depth, None).await {
                Ok(hits) => {
                    any_success = true;
                    sample_size = sample_size.max(hits.len());
                    for hit in &hits {
                        similarity_sum += hit.score;
                        similarity_count += 1;
                    }
                    let frequencies = self.frequencies(&hits, payload_field);
                    dimensions.insert(dimension.to_string(), frequencies);
                }
                Err(error) => {
                    warn!("dimension {dimension} sample failed: {error}");
                    last_error = Some(error);
                }
            }
        }

        if !any_success {
            return Err(last_error.unwrap_or_else(|| {
                crate::errors::SearchError::vector_transport("all dimension samples failed")
            }));
        }

        let mean_similarity = if similarity_count == 0 {
            0.0
        } else {
            similarity_sum / similarity_count as f32
        };
        let mut statistics = EntityStatistics { dimensions, confidence: 0.0, sample_size };
        let with_data = statistics.dimensions_with_data();
        statistics.confidence =
            (mean_similarity * (with_data as f32 / 3.0)).clamp(0.0, 1.0);
        Ok(statistics)
    }

    /// Frequency of payload values across the sample, keeping anything at or
    /// above the minimum share, strongest first, capped at the per-query max.
    fn frequencies(&self, hits: &[RawHit], payload_field: &str) -> Vec<EntityFrequency> {
        if hits.is_empty() {
            return Vec::new();
        }
        let mut counts: HashMap<String, (usize, f32)> = HashMap::new();
        for hit in hits {
            for value in payload_values(&hit.payload, payload_field) {
                let entry = counts.entry(value).or_insert((0, 0.0));
                entry.0 += 1;
                entry.1 += hit.score;
            }
        }

        let sample = hits.len() as f32;
        let mut frequencies: Vec<EntityFrequency> = counts
            .into_iter()
            .map(|(value, (count, score_sum))| EntityFrequency {
                value,
                count,
                percentage: count as f32 / sample,
                avg_similarity: score_sum / count as f32,
            })
            .filter(|f| f.percentage >= self.config.min_frequency)
            .collect();

        frequencies.sort_by(|a, b| {
            b.count.cmp(&a.count).then_with(|| a.value.cmp(&b.value))
        });
        frequencies.truncate(self.config.max_entities_per_query);
        frequencies
    }

    fn cache_get(&self, query: &str) -> Option<QueryContext> {
        let mut cache = self.cache.lock().ok()?;
        match cache.get(query) {
            Some((stored, context)) if stored.elapsed() < self.config.cache_ttl => {
                Some(context.clone())
            }
            Some(_) => {
                cache.remove(query);
                None
            }
            None => None,
        }
    }

    fn cache_put(&self, query: String, context: QueryContext) {
        if let Ok(mut cache) = self.cache.lock() {
            if cache.len() >= self.config.cache_max_entries {
                // Simple max-size eviction: drop the oldest entry.
                if let Some(oldest) = cache
                    .iter()
                    .min_by_key(|(_, (stored, _))| *stored)
                    .map(|(key, _)| key.clone())
                {
                    cache.remove(&oldest);
                }
            }
            cache.insert(query, (Instant::now(), context));
        }
    }
}

/// Extract the comparable values a payload field contributes to a dimension.
/// Booleans fold into the pricing vocabulary.
fn payload_values(payload: &Value, field: &str) -> Vec<String> {
    match payload.get(field) {
        Some(Value::Array(items)) => {
            items.iter().filter_map(Value::as_str).map(str::to_string).collect()
        }
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Bool(flag)) => {
            vec![if *flag { "free".to_string() } else { "paid".to_string() }]
        }
        _ => Vec::new(),
    }
}

fn heuristic_assumptions(query: &str) -> Vec<String> {
    let lowered = query.to_lowercase();
    let mut assumptions = Vec::new();
    if lowered.contains("free") {
        assumptions.push("query mentions 'free': user prefers a free tier".to_string());
    }
    if lowered.contains("open source") || lowered.contains("self-hosted") {
        assumptions.push("query suggests self-hosted deployment".to_string());
    }
    if lowered.contains("alternative") || lowered.contains(" vs ") {
        assumptions.push("query compares against a reference tool".to_string());
    }
    if lowered.contains("cheap") || lowered.contains("cheaper") {
        assumptions.push("price is a ranking constraint".to_string());
    }
    assumptions
}
