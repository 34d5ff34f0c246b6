use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::spaces::VectorSpace;

/// Operators of the abstract filter language. The vector-store and
/// document-store adapters each translate these to their native shapes;
/// nothing above the adapters speaks a store-specific filter dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FilterOperator {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "contains")]
    Contains,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldPredicate {
    pub field: String,
    pub op: FilterOperator,
    pub value: Value,
}

impl FieldPredicate {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { field: field.into(), op: FilterOperator::Eq, value: value.into() }
    }

    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { field: field.into(), op: FilterOperator::Contains, value: value.into() }
    }
}

/// Where the query vector for a vector source comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryVectorSource {
    QueryText,
    ReferenceToolEmbedding,
    SemanticVariant,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorSourceSpec {
    pub space: VectorSpace,
    pub query_vector_source: QueryVectorSource,
    pub top_k: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Vec<FieldPredicate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding_hint: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredSourceSpec {
    pub collection: String,
    pub predicates: Vec<FieldPredicate>,
}

impl StructuredSourceSpec {
    pub fn source_label(&self) -> String {
        format!("structured:{}", self.collection)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionKind {
    Rrf,
    Weighted,
    Hybrid,
    None,
}

/// Output of the query planner: which sources to hit and how to fuse them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalPlan {
    pub strategy: String,
    #[serde(default)]
    pub vector_sources: Vec<VectorSourceSpec>,
    #[serde(default)]
    pub structured_sources: Vec<StructuredSourceSpec>,
    pub fusion: FusionKind,
    pub confidence: f32,
}

impl RetrievalPlan {
    /// An empty plan carries no sources at all; legal only below the
    /// planner's intent-confidence threshold.
    pub fn is_empty(&self) -> bool {
        self.vector_sources.is_empty() && self.structured_sources.is_empty()
    }

    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("plan confidence {} out of [0,1]", self.confidence));
        }
        for source in &self.vector_sources {
            if source.top_k == 0 {
                return Err(format!("vector source {} has top_k = 0", source.space));
            }
            if source.query_vector_source == QueryVectorSource::ReferenceToolEmbedding
                && source.embedding_hint.is_none()
            {
                // The hint carries the reference tool name to embed.
                return Err(format!(
                    "vector source {} uses reference_tool_embedding without a hint",
                    source.space
                ));
            }
        }
        for source in &self.structured_sources {
            if source.collection.is_empty() {
                return Err("structured source with empty collection".to_string());
            }
        }
        Ok(())
    }
}
