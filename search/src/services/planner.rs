use std::sync::Arc;
use tracing::{debug, warn};

use toolhub_models::{
    ComparisonMode, FieldPredicate, FusionKind, Intent, PricingFilter, QueryVectorSource,
    RetrievalPlan, StructuredSourceSpec, VectorSourceSpec, VectorSpace,
};

use crate::errors::SearchError;
use crate::services::llm::{parse_llm_json, ChatClient, LlmJson};

/// Collection the structured sources read from.
const STRUCTURED_COLLECTION: &str = "tools";

#[derive(Debug, Clone)]
pub struct PlannerConfig {
    /// Below this intent confidence the planner emits an empty plan and the
    /// executor returns nothing.
    pub min_intent_confidence: f32,
    pub default_top_k: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { min_intent_confidence: 0.3, default_top_k: 20 }
    }
}

/// Decides which spaces and structured filters serve an intent and how the
/// results fuse. LLM-planned when a chat provider is wired in, rule-based
/// otherwise; the rules also back the LLM path up when it misbehaves.
pub struct QueryPlanner {
    chat: Option<Arc<dyn ChatClient>>,
    config: PlannerConfig,
}

impl QueryPlanner {
    pub fn new(chat: Option<Arc<dyn ChatClient>>, config: PlannerConfig) -> Self {
        Self { chat, config }
    }

    pub fn rule_based() -> Self {
        Self { chat: None, config: PlannerConfig::default() }
    }

    pub async fn plan(&self, intent: &Intent, query: &str) -> Result<RetrievalPlan, SearchError> {
        if intent.confidence < self.config.min_intent_confidence {
            debug!(
                "intent confidence {} below {}, emitting empty plan",
                intent.confidence, self.config.min_intent_confidence
            );
            return Ok(RetrievalPlan {
                strategy: "low_confidence".to_string(),
                vector_sources: vec![],
                structured_sources: vec![],
                fusion: FusionKind::None,
                confidence: intent.confidence,
            });
        }

        if let Some(chat) = &self.chat {
            match self.plan_via_chat(chat, intent, query).await {
                Ok(plan) => return Ok(plan),
                Err(error) => {
                    warn!("LLM planning failed ({error}), using rule-based plan");
                }
            }
        }

        let plan = self.rule_based_plan(intent);
        plan.validate().map_err(SearchError::PlanInvalid)?;
        Ok(plan)
    }

    async fn plan_via_chat(
        &self,
        chat: &Arc<dyn ChatClient>,
        intent: &Intent,
        query: &str,
    ) -> Result<RetrievalPlan, SearchError> {
        let user_prompt = format!(
            "Query: {query}\nIntent: {}",
            serde_json::to_string(intent).unwrap_or_default()
        );
        let reply = chat.complete(&plan_system_prompt(), &user_prompt).await?;

        let value = match parse_llm_json(&reply) {
            LlmJson::Parsed(value) | LlmJson::Repaired(value) => value,
            LlmJson::Invalid { error } => {
                return Err(SearchError::PlanInvalid(format!("reply is not JSON: {error}")))
            }
        };

        let plan: RetrievalPlan = serde_json::from_value(value)
            .map_err(|e| SearchError::PlanInvalid(e.to_string()))?;
        plan.validate().map_err(SearchError::PlanInvalid)?;

        // An empty plan from the LLM contradicts the confident intent that
        // got us here; the rules take over instead.
        if plan.is_empty() {
            return Err(SearchError::PlanInvalid(
                "empty plan for a confident intent".to_string(),
            ));
        }
        Ok(plan)
    }

    fn rule_based_plan(&self, intent: &Intent) -> RetrievalPlan {
        let top_k = self.config.default_top_k;
        let mut vector_sources = vec![VectorSourceSpec {
            space: VectorSpace::Semantic,
            query_vector_source: QueryVectorSource::QueryText,
            top_k,
            filter: None,
            embedding_hint: None,
        }];

        // A reference tool is matched in the aliases space by embedding the
        // tool name itself, not the whole query.
        if let Some(reference_tool) = &intent.reference_tool {
            vector_sources.push(VectorSourceSpec {
                space: VectorSpace::EntityAliases,
                query_vector_source: QueryVectorSource::ReferenceToolEmbedding,
                top_k,
                filter: None,
                embedding_hint: Some(reference_tool.clone()),
            });
        }
        if intent.category.is_some() {
            vector_sources.push(VectorSourceSpec {
                space: VectorSpace::EntityCategories,
                query_vector_source: QueryVectorSource::QueryText,
                top_k,
                filter: None,
                embedding_hint: None,
            });
        }
        if !intent.features.is_empty() {
            vector_sources.push(VectorSourceSpec {
                space: VectorSpace::EntityFunctionality,
                query_vector_source: QueryVectorSource::QueryText,
                top_k,
                filter: None,
                embedding_hint: None,
            });
        }
        if intent.platform.is_some() {
            vector_sources.push(VectorSourceSpec {
                space: VectorSpace::CompositeToolType,
                query_vector_source: QueryVectorSource::QueryText,
                top_k,
                filter: None,
                embedding_hint: None,
            });
        }
        if let Some(variant) = intent.semantic_variants.first() {
            if intent.reference_tool.is_none() {
                vector_sources.push(VectorSourceSpec {
                    space: VectorSpace::Semantic,
                    query_vector_source: QueryVectorSource::SemanticVariant,
                    top_k,
                    filter: None,
                    embedding_hint: Some(variant.clone()),
                });
            }
        }

        let mut predicates = Vec::new();
        match intent.pricing {
            Some(PricingFilter::Free) | Some(PricingFilter::Freemium) => {
                predicates.push(FieldPredicate::eq("pricing.hasFreeTier", true));
            }
            _ => {}
        }
        if let Some(category) = &intent.category {
            predicates.push(FieldPredicate::eq("category", category.clone()));
        }
        if let Some(platform) = &intent.platform {
            predicates.push(FieldPredicate::eq("interface", platform.clone()));
        }

        let structured_sources = if predicates.is_empty() {
            vec![]
        } else {
            vec![StructuredSourceSpec {
                collection: STRUCTURED_COLLECTION.to_string(),
                predicates,
            }]
        };

        let total_sources = vector_sources.len() + structured_sources.len();
        let fusion = if total_sources > 1 { FusionKind::Rrf } else { FusionKind::None };

        let strategy = if intent.reference_tool.is_some() {
            match intent.comparison_mode {
                Some(ComparisonMode::AlternativeTo) => "alternative_comparison",
                _ => "reference_comparison",
            }
        } else if !structured_sources.is_empty() {
            "filtered_semantic"
        } else {
            "semantic"
        };

        RetrievalPlan {
            strategy: strategy.to_string(),
            vector_sources,
            structured_sources,
            fusion,
            confidence: intent.confidence,
        }
    }
}

fn plan_system_prompt() -> String {
    let spaces: Vec<&str> = VectorSpace::ALL.iter().map(|s| s.as_str()).collect();
    format!(
        "You plan catalog retrievals. Reply with ONLY a JSON object:\n\
- strategy: short label for the chosen approach\n\
- vector_sources: array of {{space, query_vector_source, top_k, filter?, embedding_hint?}}\n\
  where space is one of [{spaces}] and query_vector_source is one of\n\
  query_text | reference_tool_embedding | semantic_variant. When using\n\
  reference_tool_embedding, put the referenced tool name in embedding_hint.\n\
- structured_sources: array of {{collection, predicates}} where predicates are\n\
  {{field, op, value}} and op is one of \"=\", \"contains\", \"<\", \"<=\", \">\", \">=\".\n\
  A free-pricing intent becomes {{field: \"pricing.hasFreeTier\", op: \"=\", value: true}}.\n\
- fusion: rrf | weighted | hybrid | none\n\
- confidence: 0.0-1.0",
        spaces = spaces.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use toolhub_models::PrimaryGoal;

    fn intent(confidence: f32) -> Intent {
        Intent {
            primary_goal: PrimaryGoal::Find,
            reference_tool: None,
            comparison_mode: None,
            pricing: None,
            category: None,
            platform: None,
            features: vec![],
            constraints: vec![],
            semantic_variants: vec![],
            confidence,
        }
    }

    #[tokio::test]
    async fn low_confidence_yields_empty_plan() {
        let planner = QueryPlanner::rule_based();
        let plan = planner.plan(&intent(0.1), "???").await.unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.strategy, "low_confidence");
        assert_eq!(plan.fusion, FusionKind::None);
    }

    #[tokio::test]
    async fn reference_tool_plans_alias_embedding() {
        let planner = QueryPlanner::rule_based();
        let mut intent = intent(0.9);
        intent.reference_tool = Some("Cursor".to_string());
        intent.comparison_mode = Some(ComparisonMode::AlternativeTo);
        intent.constraints = vec!["cheaper".to_string()];

        let plan = planner.plan(&intent, "Cursor alternative but cheaper").await.unwrap();
        assert_eq!(plan.strategy, "alternative_comparison");
        let alias_source = plan
            .vector_sources
            .iter()
            .find(|s| s.space == VectorSpace::EntityAliases)
            .expect("aliases source");
        assert_eq!(
            alias_source.query_vector_source,
            QueryVectorSource::ReferenceToolEmbedding
        );
        assert_eq!(alias_source.embedding_hint.as_deref(), Some("Cursor"));
        assert_eq!(plan.fusion, FusionKind::Rrf);
    }

    #[tokio::test]
    async fn free_pricing_pushes_structured_filter() {
        let planner = QueryPlanner::rule_based();
        let mut intent = intent(0.85);
        intent.pricing = Some(PricingFilter::Free);

        let plan = planner.plan(&intent, "free AI tools").await.unwrap();
        let structured = &plan.structured_sources[0];
        assert_eq!(structured.collection, "tools");
        let predicate = &structured.predicates[0];
        assert_eq!(predicate.field, "pricing.hasFreeTier");
        assert_eq!(predicate.value, serde_json::json!(true));
    }

    #[tokio::test]
    async fn single_source_plan_uses_no_fusion() {
        let planner = QueryPlanner::rule_based();
        let plan = planner.plan(&intent(0.9), "code editor").await.unwrap();
        assert_eq!(plan.vector_sources.len(), 1);
        assert!(plan.structured_sources.is_empty());
        assert_eq!(plan.fusion, FusionKind::None);
    }

    struct ScriptedChat {
        reply: String,
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn complete(&self, _s: &str, _u: &str) -> Result<String, SearchError> {
            Ok(self.reply.clone())
        }
    }

    #[tokio::test]
    async fn llm_plan_is_used_when_valid() {
        let reply = r#"{
            "strategy": "llm_semantic",
            "vector_sources": [
                {"space": "semantic", "query_vector_source": "query_text", "top_k": 15}
            ],
            "structured_sources": [],
            "fusion": "rrf",
            "confidence": 0.8
        }"#;
        let planner = QueryPlanner::new(
            Some(Arc::new(ScriptedChat { reply: reply.to_string() })),
            PlannerConfig::default(),
        );
        let plan = planner.plan(&intent(0.9), "code editor").await.unwrap();
        assert_eq!(plan.strategy, "llm_semantic");
        assert_eq!(plan.vector_sources[0].top_k, 15);
    }

    #[tokio::test]
    async fn malformed_llm_plan_falls_back_to_rules() {
        let planner = QueryPlanner::new(
            Some(Arc::new(ScriptedChat { reply: "no json here".to_string() })),
            PlannerConfig::default(),
        );
        let plan = planner.plan(&intent(0.9), "code editor").await.unwrap();
        assert_eq!(plan.strategy, "semantic");
    }

    #[tokio::test]
    async fn unknown_space_in_llm_plan_falls_back() {
        let reply = r#"{
            "strategy": "bad",
            "vector_sources": [
                {"space": "entities.unknown", "query_vector_source": "query_text", "top_k": 5}
            ],
            "structured_sources": [],
            "fusion": "rrf",
            "confidence": 0.8
        }"#;
        let planner = QueryPlanner::new(
            Some(Arc::new(ScriptedChat { reply: reply.to_string() })),
            PlannerConfig::default(),
        );
        // Unknown space fails deserialization, so the rules take over.
        let plan = planner.plan(&intent(0.9), "code editor").await.unwrap();
        assert_eq!(plan.strategy, "semantic");
    }
}
