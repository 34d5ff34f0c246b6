pub mod similarity;
pub mod strategies;

use lru::LruCache;
use rayon::prelude::*;
use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Instant;
use tracing::{debug, warn};

use toolhub_models::{DedupStats, DuplicateGroup, DuplicateStrategy, MergedResult};

use self::strategies::{
    combined, content_similarity, exact_id, exact_url, fuzzy_match, version_aware, CustomRule,
    DedupItem, FieldWeights, StrategyThresholds, StrategyVerdict,
};

#[derive(Debug, Clone)]
pub struct DetectorConfig {
    /// Built-in strategies in priority order; first match wins.
    pub strategies: Vec<DuplicateStrategy>,
    pub thresholds: StrategyThresholds,
    pub field_weights: FieldWeights,
    /// OR-aggregation for COMBINED instead of the weight-sum reading.
    pub combined_or: bool,
    /// Above this many items, bucketing replaces full pairwise comparison.
    pub max_comparison_items: usize,
    pub parallel: bool,
    pub workers: usize,
    pub cache_size: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                DuplicateStrategy::ExactId,
                DuplicateStrategy::ExactUrl,
                DuplicateStrategy::ContentSimilarity,
                DuplicateStrategy::VersionAware,
                DuplicateStrategy::FuzzyMatch,
            ],
            thresholds: StrategyThresholds::default(),
            field_weights: FieldWeights::default(),
            combined_or: false,
            max_comparison_items: 1_000,
            parallel: true,
            workers: 4,
            cache_size: 10_000,
        }
    }
}

#[derive(Debug)]
pub struct DedupOutcome {
    /// Group representatives plus ungrouped items, in original order.
    pub deduplicated: Vec<MergedResult>,
    pub groups: Vec<DuplicateGroup>,
    pub stats: DedupStats,
}

enum PipelineEntry {
    Builtin(DuplicateStrategy),
    Custom(usize),
}

struct Edge {
    left: usize,
    right: usize,
    verdict: StrategyVerdict,
}

type PairKey = (String, String, DuplicateStrategy);

pub struct DuplicateDetector {
    config: DetectorConfig,
    custom_rules: Vec<CustomRule>,
    pipeline: Vec<PipelineEntry>,
    cache: Mutex<LruCache<PairKey, Option<f32>>>,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl DuplicateDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self::with_rules(config, Vec::new())
    }

    pub fn with_rules(config: DetectorConfig, custom_rules: Vec<CustomRule>) -> Self {
        let mut pipeline: Vec<PipelineEntry> =
            config.strategies.iter().copied().map(PipelineEntry::Builtin).collect();
        // Custom rules slot in at their declared priority index.
        let mut ordered_rules: Vec<(usize, usize)> = custom_rules
            .iter()
            .enumerate()
            .map(|(index, rule)| (rule.priority, index))
            .collect();
        ordered_rules.sort();
        for (priority, index) in ordered_rules {
            let at = priority.min(pipeline.len());
            pipeline.insert(at, PipelineEntry::Custom(index));
        }

        let cache_size = NonZeroUsize::new(config.cache_size.max(1)).unwrap();
        Self {
            config,
            custom_rules,
            pipeline,
            cache: Mutex::new(LruCache::new(cache_size)),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    /// Detect duplicates and keep one representative per group. Idempotent:
    /// running it on its own output changes nothing.
    pub fn detect(&self, results: &[MergedResult]) -> DedupOutcome {
        let started = Instant::now();
        let items: Vec<DedupItem> = results
            .iter()
            .enumerate()
            .map(|(index, result)| {
                let mut item = DedupItem::from_result(result);
                // Pre-dedup rank falls back to list position when the input
                // has not been ranked yet.
                if item.rank == 0 {
                    item.rank = index + 1;
                }
                item
            })
            .collect();

        let buckets = self.bucketize(&items);
        let errors = Mutex::new(Vec::new());

        let compare_bucket = |bucket: &Vec<usize>| -> (Vec<Edge>, usize) {
            let mut edges = Vec::new();
            let mut comparisons = 0;
            for (offset, &left) in bucket.iter().enumerate() {
                for &right in &bucket[offset + 1..] {
                    comparisons += 1;
                    if let Some(verdict) =
                        self.evaluate_pair(&items[left], &items[right], &errors)
                    {
                        edges.push(Edge { left, right, verdict });
                    }
                }
            }
            (edges, comparisons)
        };

        let per_bucket: Vec<(Vec<Edge>, usize)> =
            if self.config.parallel && buckets.len() > 1 {
                match rayon::ThreadPoolBuilder::new()
                    .num_threads(self.config.workers.max(1))
                    .build()
                {
                    Ok(pool) => {
                        pool.install(|| buckets.par_iter().map(compare_bucket).collect())
                    }
                    Err(error) => {
                        warn!("falling back to sequential dedup: {error}");
                        buckets.iter().map(compare_bucket).collect()
                    }
                }
            } else {
                buckets.iter().map(compare_bucket).collect()
            };

        let mut comparisons = 0;
        let mut union_find = UnionFind::new(items.len());
        let mut group_verdicts: Vec<(usize, StrategyVerdict)> = Vec::new();
        for (edges, bucket_comparisons) in per_bucket {
            comparisons += bucket_comparisons;
            for edge in edges {
                union_find.union(edge.left, edge.right);
                group_verdicts.push((edge.left, edge.verdict));
            }
        }

        // Collect members per root, choose representatives, build groups.
        let mut members_by_root: HashMap<usize, Vec<usize>> = HashMap::new();
        for index in 0..items.len() {
            members_by_root.entry(union_find.find(index)).or_default().push(index);
        }

        let mut groups = Vec::new();
        let mut keep = vec![true; items.len()];
        for (root, members) in &members_by_root {
            if members.len() < 2 {
                continue;
            }
            let representative = *members
                .iter()
                .min_by_key(|&&index| (items[index].rank, index))
                .unwrap();
            for &member in members {
                if member != representative {
                    keep[member] = false;
                }
            }

            // Annotate the group with the verdict of the first edge that
            // touched it; similarity reports the strongest edge seen.
            let verdicts: Vec<&StrategyVerdict> = group_verdicts
                .iter()
                .filter(|(left, _)| union_find.find(*left) == *root)
                .map(|(_, verdict)| verdict)
                .collect();
            let first = verdicts.first().copied();
            let similarity = verdicts
                .iter()
                .map(|v| v.similarity)
                .fold(0.0f32, f32::max);

            if let Some(first) = first {
                groups.push(DuplicateGroup {
                    members: members.iter().map(|&i| items[i].id.clone()).collect(),
                    strategy: first.strategy,
                    similarity,
                    representative: items[representative].id.clone(),
                    duplicate_type: first.duplicate_type.clone(),
                    rule_label: first.rule_label.clone(),
                });
            }
        }
        groups.sort_by(|a, b| a.representative.cmp(&b.representative));

        let deduplicated: Vec<MergedResult> = results
            .iter()
            .zip(&keep)
            .filter(|(_, &kept)| kept)
            .map(|(result, _)| result.clone())
            .collect();

        let stats = DedupStats {
            processing_time_ms: started.elapsed().as_millis() as u64,
            items_in: results.len(),
            items_out: deduplicated.len(),
            duplicates_removed: results.len() - deduplicated.len(),
            comparisons,
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            cache_misses: self.cache_misses.load(Ordering::Relaxed),
            strategy_errors: errors.into_inner().unwrap_or_default(),
        };

        debug!(
            "dedup: {} in, {} out, {} groups, {} comparisons",
            stats.items_in,
            stats.items_out,
            groups.len(),
            stats.comparisons
        );

        DedupOutcome { deduplicated, groups, stats }
    }

    /// Everything in one bucket under the comparison cap; above it, bucket
    /// by the lowercased first token of the name so the pairwise cost stays
    /// bounded.
    fn bucketize(&self, items: &[DedupItem]) -> Vec<Vec<usize>> {
        if items.len() <= self.config.max_comparison_items {
            return vec![(0..items.len()).collect()];
        }
        let mut buckets: HashMap<String, Vec<usize>> = HashMap::new();
        for (index, item) in items.iter().enumerate() {
            let key = item
                .name
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_lowercase();
            buckets.entry(key).or_default().push(index);
        }
        let mut ordered: Vec<(String, Vec<usize>)> = buckets.into_iter().collect();
        ordered.sort_by(|a, b| a.0.cmp(&b.0));
        ordered.into_iter().map(|(_, bucket)| bucket).collect()
    }

    fn evaluate_pair(
        &self,
        left: &DedupItem,
        right: &DedupItem,
        errors: &Mutex<Vec<String>>,
    ) -> Option<StrategyVerdict> {
        for entry in &self.pipeline {
            match entry {
                PipelineEntry::Builtin(strategy) => {
                    if let Some(verdict) = self.evaluate_builtin(*strategy, left, right) {
                        return Some(verdict);
                    }
                }
                PipelineEntry::Custom(index) => {
                    let rule = &self.custom_rules[*index];
                    let matched = catch_unwind(AssertUnwindSafe(|| {
                        (rule.predicate)(left, right)
                    }));
                    match matched {
                        Ok(true) => {
                            return Some(StrategyVerdict {
                                strategy: DuplicateStrategy::CustomRule,
                                similarity: 1.0,
                                duplicate_type: None,
                                rule_label: Some(rule.label.clone()),
                            })
                        }
                        Ok(false) => {}
                        Err(_) => {
                            warn!("custom rule '{}' panicked, skipping pair", rule.label);
                            if let Ok(mut errors) = errors.lock() {
                                errors.push(rule.label.clone());
                            }
                        }
                    }
                }
            }
        }
        None
    }

    fn evaluate_builtin(
        &self,
        strategy: DuplicateStrategy,
        left: &DedupItem,
        right: &DedupItem,
    ) -> Option<StrategyVerdict> {
        let key = pair_key(&left.id, &right.id, strategy);
        if let Some(cached) = self.cache.lock().ok().and_then(|mut c| c.get(&key).copied()) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            return cached.map(|similarity| rebuild_verdict(strategy, similarity));
        }
        self.cache_misses.fetch_add(1, Ordering::Relaxed);

        let thresholds = &self.config.thresholds;
        let verdict = match strategy {
            DuplicateStrategy::ExactId => exact_id(left, right),
            DuplicateStrategy::ExactUrl => exact_url(left, right),
            DuplicateStrategy::ContentSimilarity => {
                content_similarity(left, right, &self.config.field_weights, thresholds.content)
            }
            DuplicateStrategy::VersionAware => version_aware(left, right, thresholds.version),
            DuplicateStrategy::FuzzyMatch => fuzzy_match(left, right, thresholds.fuzzy),
            DuplicateStrategy::Combined => combined(
                left,
                right,
                &self.config.field_weights,
                thresholds.combined,
                self.config.combined_or,
            ),
            // Custom rules run through the pipeline, never through here.
            DuplicateStrategy::CustomRule => None,
        };

        if let Ok(mut cache) = self.cache.lock() {
            cache.put(key, verdict.as_ref().map(|v| v.similarity));
        }
        verdict
    }
}

fn pair_key(left: &str, right: &str, strategy: DuplicateStrategy) -> PairKey {
    if left <= right {
        (left.to_string(), right.to_string(), strategy)
    } else {
        (right.to_string(), left.to_string(), strategy)
    }
}

/// Rebuild a verdict from a cached similarity; duplicate_type is a pure
/// function of the strategy.
fn rebuild_verdict(strategy: DuplicateStrategy, similarity: f32) -> StrategyVerdict {
    StrategyVerdict {
        strategy,
        similarity,
        duplicate_type: (strategy == DuplicateStrategy::VersionAware)
            .then(|| "version-variant".to_string()),
        rule_label: None,
    }
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self { parent: (0..size).collect() }
    }

    fn find(&mut self, index: usize) -> usize {
        if self.parent[index] != index {
            let root = self.find(self.parent[index]);
            self.parent[index] = root;
        }
        self.parent[index]
    }

    fn union(&mut self, left: usize, right: usize) {
        let left_root = self.find(left);
        let right_root = self.find(right);
        if left_root != right_root {
            // Smaller index wins the root so grouping stays deterministic.
            let (keep, fold) = if left_root < right_root {
                (left_root, right_root)
            } else {
                (right_root, left_root)
            };
            self.parent[fold] = keep;
        }
    }
}
