use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One value of an entity dimension with its observed distribution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityFrequency {
    pub value: String,
    pub count: usize,
    /// Share of the sample carrying this value, in [0,1].
    pub percentage: f32,
    pub avg_similarity: f32,
}

/// Per-dimension frequency distributions over the sample retrieved for a
/// query, built by the context-enrichment service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EntityStatistics {
    /// Dimension name (categories, interfaces, pricing, functionality) to
    /// its top values by frequency.
    pub dimensions: BTreeMap<String, Vec<EntityFrequency>>,
    pub confidence: f32,
    pub sample_size: usize,
}

impl EntityStatistics {
    pub fn dimensions_with_data(&self) -> usize {
        self.dimensions.values().filter(|v| !v.is_empty()).count()
    }
}

/// What the pipeline knows about the query beyond its text: entity
/// distributions plus heuristic assumptions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryContext {
    pub entity_statistics: EntityStatistics,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub metadata_confidence: f32,
    /// Which enrichment path produced this context; the failure path
    /// reports the distinct `fallback` label.
    pub strategy: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_only_populated_dimensions() {
        let mut stats = EntityStatistics::default();
        stats.dimensions.insert("categories".into(), vec![EntityFrequency {
            value: "ide".into(),
            count: 4,
            percentage: 0.4,
            avg_similarity: 0.8,
        }]);
        stats.dimensions.insert("pricing".into(), vec![]);
        assert_eq!(stats.dimensions_with_data(), 1);
    }
}
