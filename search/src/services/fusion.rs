use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

use toolhub_config::ConfigError;
use toolhub_models::{Candidate, MergedResult, Provenance, SourceRanking};

/// How several ranked lists become one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    ReciprocalRankFusion,
    WeightedAverage,
    /// RRF followed by a multiplicative per-source-weight boost.
    Hybrid,
    /// Single input passed through untouched.
    None,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::ReciprocalRankFusion => "reciprocal_rank_fusion",
            MergeStrategy::WeightedAverage => "weighted_average",
            MergeStrategy::Hybrid => "hybrid",
            MergeStrategy::None => "none",
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeConfig {
    pub strategy: MergeStrategy,
    pub rrf_k: u32,
    pub max_results: usize,
    /// Weight per source label; falls back through the label family.
    pub source_weights: HashMap<String, f32>,
    pub preserve_metadata: bool,
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            strategy: MergeStrategy::ReciprocalRankFusion,
            rrf_k: 60,
            max_results: 50,
            source_weights: HashMap::new(),
            preserve_metadata: true,
        }
    }
}

/// One source's ranked candidate list, ordered best-first.
#[derive(Debug, Clone)]
pub struct SourceResults {
    pub label: String,
    pub candidates: Vec<Candidate>,
}

pub struct ResultMerger {
    config: MergeConfig,
}

impl ResultMerger {
    /// Out-of-range knobs are rejected here, never at merge time.
    pub fn new(config: MergeConfig) -> Result<Self, ConfigError> {
        if config.rrf_k == 0 || config.rrf_k > 1000 {
            return Err(ConfigError::OutOfRange {
                name: "rrf_k",
                value: config.rrf_k.to_string(),
                range: "(0, 1000]",
            });
        }
        if config.max_results == 0 || config.max_results > 10_000 {
            return Err(ConfigError::OutOfRange {
                name: "max_results",
                value: config.max_results.to_string(),
                range: "(0, 10000]",
            });
        }
        for (source, weight) in &config.source_weights {
            if *weight < 0.0 || !weight.is_finite() {
                return Err(ConfigError::Invalid {
                    name: "source_weight",
                    value: format!("{source}={weight}"),
                });
            }
        }
        Ok(Self { config })
    }

    pub fn strategy(&self) -> MergeStrategy {
        self.config.strategy
    }

    fn weight_for(&self, label: &str) -> f32 {
        weight_for_label(&self.config.source_weights, label)
    }

    pub fn merge(&self, sources: Vec<SourceResults>) -> Vec<MergedResult> {
        let mut accumulators: HashMap<String, Accumulator> = HashMap::new();

        for source in &sources {
            let weight = self.weight_for(&source.label);
            let source_max = source
                .candidates
                .iter()
                .map(|c| c.score)
                .fold(f32::MIN, f32::max)
                .max(f32::EPSILON);

            for candidate in &source.candidates {
                let rank = candidate.rank.max(1);
                let entry = accumulators
                    .entry(candidate.id.clone())
                    .or_insert_with(|| Accumulator::new(candidate));

                entry.record(
                    &source.label,
                    candidate,
                    weight,
                    source_max,
                    rank,
                    self.config.rrf_k,
                    self.config.preserve_metadata,
                );
            }
        }

        let mut merged: Vec<MergedResult> = accumulators
            .into_values()
            .map(|acc| acc.finish(self.config.strategy))
            .collect();

        match self.config.strategy {
            MergeStrategy::None => {
                // Order is the single input's order; everything else sorts.
                merged.sort_by_key(|r| {
                    r.original_rankings.values().map(|s| s.rank).min().unwrap_or(usize::MAX)
                });
            }
            _ => {
                merged.sort_by(|a, b| {
                    b.rrf_score
                        .partial_cmp(&a.rrf_score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| b.source_count.cmp(&a.source_count))
                        .then_with(|| {
                            b.max_raw_score()
                                .partial_cmp(&a.max_raw_score())
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| a.id.cmp(&b.id))
                });
            }
        }

        merged.truncate(self.config.max_results);
        for (index, result) in merged.iter_mut().enumerate() {
            result.final_rank = index + 1;
        }

        debug!(
            "merged {} sources into {} results via {}",
            sources.len(),
            merged.len(),
            self.config.strategy.as_str()
        );
        merged
    }
}

struct Accumulator {
    id: String,
    payload: Value,
    provenance: Provenance,
    rankings: BTreeMap<String, SourceRanking>,
    sources: Vec<String>,
    rrf_sum: f64,
    normalised_sum: f64,
    weight_sum: f64,
}

impl Accumulator {
    fn new(candidate: &Candidate) -> Self {
        Self {
            id: candidate.id.clone(),
            payload: candidate.payload.clone(),
            provenance: candidate.provenance.clone(),
            rankings: BTreeMap::new(),
            sources: Vec::new(),
            rrf_sum: 0.0,
            normalised_sum: 0.0,
            weight_sum: 0.0,
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn record(
        &mut self,
        label: &str,
        candidate: &Candidate,
        weight: f32,
        source_max: f32,
        rank: usize,
        rrf_k: u32,
        preserve_metadata: bool,
    ) {
        self.rrf_sum += weight as f64 / (rrf_k as f64 + rank as f64);
        self.normalised_sum += (candidate.score / source_max) as f64;
        self.weight_sum += weight as f64;
        self.rankings
            .insert(label.to_string(), SourceRanking { rank, score: candidate.score });
        if !self.sources.iter().any(|s| s == label) {
            self.sources.push(label.to_string());
        }
        if preserve_metadata {
            merge_payloads(&mut self.payload, &candidate.payload);
        }
    }

    fn finish(self, strategy: MergeStrategy) -> MergedResult {
        let source_count = self.rankings.len();
        let rrf_score = match strategy {
            MergeStrategy::ReciprocalRankFusion | MergeStrategy::None => self.rrf_sum,
            MergeStrategy::WeightedAverage => {
                self.normalised_sum / source_count.max(1) as f64
            }
            MergeStrategy::Hybrid => {
                let mean_weight = self.weight_sum / source_count.max(1) as f64;
                self.rrf_sum * mean_weight
            }
        };

        MergedResult {
            id: self.id,
            payload: self.payload,
            score: rrf_score as f32,
            rrf_score,
            original_rankings: self.rankings,
            source_count,
            final_rank: 0,
            sources: self.sources,
            provenance: self.provenance,
        }
    }
}

/// Weight for a source label: exact match, then the part after the family
/// prefix, then the family default (vector -> semantic, structured ->
/// traditional), then 1.0.
pub fn weight_for_label(weights: &HashMap<String, f32>, label: &str) -> f32 {
    if let Some(weight) = weights.get(label) {
        return *weight;
    }
    if let Some((family, rest)) = label.split_once(':') {
        if let Some(weight) = weights.get(rest) {
            return *weight;
        }
        let family_key = match family {
            "vector" => "semantic",
            "structured" => "traditional",
            other => other,
        };
        if let Some(weight) = weights.get(family_key) {
            return *weight;
        }
    }
    1.0
}

/// Union of payload fields; the first-seen value wins on conflicts.
fn merge_payloads(target: &mut Value, addition: &Value) {
    if let (Value::Object(target_map), Value::Object(addition_map)) = (target, addition) {
        for (key, value) in addition_map {
            target_map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn candidate(id: &str, rank: usize, score: f32, source: &str) -> Candidate {
        Candidate {
            id: id.to_string(),
            source: source.to_string(),
            score,
            payload: json!({"id": id}),
            rank,
            provenance: Provenance::default(),
        }
    }

    fn source(label: &str, ids: &[(&str, f32)]) -> SourceResults {
        SourceResults {
            label: label.to_string(),
            candidates: ids
                .iter()
                .enumerate()
                .map(|(index, (id, score))| candidate(id, index + 1, *score, label))
                .collect(),
        }
    }

    fn merger(config: MergeConfig) -> ResultMerger {
        ResultMerger::new(config).unwrap()
    }

    #[test]
    fn rrf_proof_two_sources() {
        // A: [x, y, z]; B: [y, z, w]; K = 60, weights 1.0.
        let merger = merger(MergeConfig::default());
        let merged = merger.merge(vec![
            source("vector:semantic", &[("x", 0.9), ("y", 0.8), ("z", 0.7)]),
            source("structured:tools", &[("y", 0.9), ("z", 0.8), ("w", 0.7)]),
        ]);

        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["y", "z", "x", "w"]);

        let by_id = |id: &str| merged.iter().find(|r| r.id == id).unwrap();
        assert!((by_id("y").rrf_score - (1.0 / 62.0 + 1.0 / 61.0)).abs() < 1e-12);
        assert!((by_id("z").rrf_score - (1.0 / 63.0 + 1.0 / 62.0)).abs() < 1e-12);
        assert!((by_id("x").rrf_score - 1.0 / 61.0).abs() < 1e-12);
        assert!((by_id("w").rrf_score - 1.0 / 63.0).abs() < 1e-12);
    }

    #[test]
    fn disjoint_sources_keep_single_source_contributions() {
        let merger = merger(MergeConfig::default());
        let merged = merger.merge(vec![
            source("vector:semantic", &[("a", 0.9)]),
            source("structured:tools", &[("b", 0.8)]),
        ]);
        for result in &merged {
            assert_eq!(result.source_count, 1);
            let rank = result.original_rankings.values().next().unwrap().rank;
            assert!((result.rrf_score - 1.0 / (60.0 + rank as f64)).abs() < 1e-12);
        }
    }

    #[test]
    fn final_rank_matches_position_and_scores_decrease() {
        let merger = merger(MergeConfig::default());
        let merged = merger.merge(vec![
            source("vector:semantic", &[("a", 0.9), ("b", 0.8), ("c", 0.7)]),
            source("vector:entities.aliases", &[("c", 0.95), ("a", 0.6)]),
        ]);
        for (index, result) in merged.iter().enumerate() {
            assert_eq!(result.final_rank, index + 1);
            if index > 0 {
                assert!(merged[index - 1].rrf_score >= result.rrf_score);
            }
        }
    }

    #[test]
    fn equal_scores_break_ties_lexicographically() {
        let merger = merger(MergeConfig::default());
        // Same rank, same score, single identical source each.
        let merged = merger.merge(vec![
            source("vector:semantic", &[("zeta", 0.5)]),
            source("vector:entities.aliases", &[("alpha", 0.5)]),
        ]);
        assert_eq!(merged[0].id, "alpha");
        assert_eq!(merged[1].id, "zeta");
    }

    #[test]
    fn equal_rrf_prefers_more_sources() {
        // A zero-weight source adds presence without score, so "a" and "b"
        // tie on rrf (rank 1 in one full-weight source each) while "b"
        // carries the larger source count.
        let mut weights = HashMap::new();
        weights.insert("vector:entities.categories".to_string(), 0.0);
        let merger = ResultMerger::new(MergeConfig {
            source_weights: weights,
            ..MergeConfig::default()
        })
        .unwrap();
        let merged = merger.merge(vec![
            source("vector:semantic", &[("a", 0.5)]),
            source("vector:entities.aliases", &[("b", 0.5)]),
            source("vector:entities.categories", &[("b", 0.9)]),
        ]);
        assert_eq!(merged[0].id, "b");
        assert_eq!(merged[0].source_count, 2);
        assert_eq!(merged[1].id, "a");
    }

    #[test]
    fn none_strategy_preserves_input_order() {
        let merger = merger(MergeConfig {
            strategy: MergeStrategy::None,
            ..MergeConfig::default()
        });
        let merged = merger.merge(vec![source(
            "vector:semantic",
            &[("m", 0.9), ("a", 0.8), ("z", 0.7)],
        )]);
        let ids: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["m", "a", "z"]);
        for (index, result) in merged.iter().enumerate() {
            assert_eq!(result.final_rank, index + 1);
        }
    }

    #[test]
    fn weighted_average_normalises_by_source_max() {
        let merger = merger(MergeConfig {
            strategy: MergeStrategy::WeightedAverage,
            ..MergeConfig::default()
        });
        let merged = merger.merge(vec![
            source("vector:semantic", &[("a", 0.8), ("b", 0.4)]),
        ]);
        let by_id = |id: &str| merged.iter().find(|r| r.id == id).unwrap();
        assert!((by_id("a").rrf_score - 1.0).abs() < 1e-6);
        assert!((by_id("b").rrf_score - 0.5).abs() < 1e-6);
    }

    #[test]
    fn hybrid_boosts_by_source_weight() {
        let mut weights = HashMap::new();
        weights.insert("semantic".to_string(), 1.0);
        weights.insert("traditional".to_string(), 0.5);
        let merger = merger(MergeConfig {
            strategy: MergeStrategy::Hybrid,
            source_weights: weights,
            ..MergeConfig::default()
        });
        let merged = merger.merge(vec![
            source("vector:semantic", &[("a", 0.9)]),
            source("structured:tools", &[("b", 0.9)]),
        ]);
        let by_id = |id: &str| merged.iter().find(|r| r.id == id).unwrap();
        // Both sit at rank 1; hybrid multiplies the weighted rrf by the mean
        // weight, so "b" carries 0.5 * 0.5 of "a"'s contribution.
        assert!(by_id("a").rrf_score > by_id("b").rrf_score);
        assert!((by_id("b").rrf_score / by_id("a").rrf_score - 0.25).abs() < 1e-6);
    }

    #[test]
    fn max_results_truncates_after_ordering() {
        let merger = merger(MergeConfig { max_results: 1, ..MergeConfig::default() });
        let merged = merger.merge(vec![source(
            "vector:semantic",
            &[("a", 0.9), ("b", 0.8)],
        )]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].final_rank, 1);
    }

    #[test]
    fn preserve_metadata_unions_payloads() {
        let merger = merger(MergeConfig::default());
        let mut left = source("vector:semantic", &[("a", 0.9)]);
        left.candidates[0].payload = json!({"id": "a", "name": "Alpha"});
        let mut right = source("structured:tools", &[("a", 0.7)]);
        right.candidates[0].payload = json!({"id": "a", "url": "https://alpha.dev"});

        let merged = merger.merge(vec![left, right]);
        assert_eq!(merged[0].payload["name"], "Alpha");
        assert_eq!(merged[0].payload["url"], "https://alpha.dev");
        assert_eq!(merged[0].sources.len(), 2);
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        assert!(ResultMerger::new(MergeConfig { rrf_k: 0, ..MergeConfig::default() }).is_err());
        assert!(ResultMerger::new(MergeConfig {
            rrf_k: 1001,
            ..MergeConfig::default()
        })
        .is_err());
        assert!(ResultMerger::new(MergeConfig {
            max_results: 0,
            ..MergeConfig::default()
        })
        .is_err());
        let mut weights = HashMap::new();
        weights.insert("semantic".to_string(), -1.0);
        assert!(ResultMerger::new(MergeConfig {
            source_weights: weights,
            ..MergeConfig::default()
        })
        .is_err());
    }
}
