use std::sync::Arc;
use tracing::debug;

use toolhub_models::intent::{CATEGORY_VOCABULARY, FEATURE_VOCABULARY, PLATFORM_VOCABULARY};
use toolhub_models::Intent;

use crate::errors::SearchError;
use crate::services::llm::{parse_llm_json, ChatClient, LlmJson};

/// Turns a raw query into a schema-validated Intent. There is no silent
/// best-effort parse: an unusable reply fails the request.
pub struct IntentExtractor {
    chat: Arc<dyn ChatClient>,
    system_prompt: String,
}

impl IntentExtractor {
    pub fn new(chat: Arc<dyn ChatClient>) -> Self {
        Self { chat, system_prompt: build_system_prompt() }
    }

    pub async fn extract(&self, query: &str) -> Result<Intent, SearchError> {
        let reply = self.chat.complete(&self.system_prompt, query).await?;

        let value = match parse_llm_json(&reply) {
            LlmJson::Parsed(value) => value,
            LlmJson::Repaired(value) => {
                debug!("intent reply needed trailing-comma repair");
                value
            }
            LlmJson::Invalid { error } => {
                return Err(SearchError::IntentUnparseable(format!(
                    "reply is not JSON: {error}"
                )))
            }
        };

        let intent: Intent = serde_json::from_value(value)
            .map_err(|e| SearchError::IntentUnparseable(e.to_string()))?;
        intent.validate().map_err(SearchError::IntentUnparseable)?;

        debug!(
            "intent: goal {:?}, reference {:?}, confidence {}",
            intent.primary_goal, intent.reference_tool, intent.confidence
        );
        Ok(intent)
    }
}

fn build_system_prompt() -> String {
    format!(
        "You interpret queries against a catalog of developer tools. \
Reply with ONLY a JSON object, no prose, with these fields:\n\
- primary_goal: one of find, compare, recommend, explore, analyze, explain\n\
- reference_tool: named tool the user compares against, or omit\n\
- comparison_mode: similar_to | vs | alternative_to, or omit\n\
- pricing: free | freemium | paid | enterprise, or omit\n\
- category: one of [{categories}], or omit\n\
- platform: one of [{platforms}], or omit\n\
- features: array drawn from [{features}]\n\
- constraints: free-text constraints like \"cheaper\" or \"offline\"\n\
- semantic_variants: 2-3 rephrasings of the query\n\
- confidence: 0.0-1.0\n\
Use only the listed vocabulary values. Omit optional fields you are not \
sure about rather than guessing.",
        categories = CATEGORY_VOCABULARY.join(", "),
        platforms = PLATFORM_VOCABULARY.join(", "),
        features = FEATURE_VOCABULARY.join(", "),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use toolhub_models::{ComparisonMode, PricingFilter, PrimaryGoal};

    struct ScriptedChat {
        reply: String,
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn complete(&self, _system: &str, _user: &str) -> Result<String, SearchError> {
            Ok(self.reply.clone())
        }
    }

    fn extractor(reply: &str) -> IntentExtractor {
        IntentExtractor::new(Arc::new(ScriptedChat { reply: reply.to_string() }))
    }

    #[tokio::test]
    async fn extracts_alternative_to_intent() {
        let reply = r#"{
            "primary_goal": "compare",
            "reference_tool": "Cursor",
            "comparison_mode": "alternative_to",
            "pricing": "free",
            "constraints": ["cheaper"],
            "semantic_variants": ["cursor replacement", "cheaper cursor-like editor"],
            "confidence": 0.92
        }"#;
        let intent = extractor(reply).extract("Cursor alternative but cheaper").await.unwrap();
        assert_eq!(intent.primary_goal, PrimaryGoal::Compare);
        assert_eq!(intent.reference_tool.as_deref(), Some("Cursor"));
        assert_eq!(intent.comparison_mode, Some(ComparisonMode::AlternativeTo));
        assert_eq!(intent.pricing, Some(PricingFilter::Free));
        assert!(intent.constraints.contains(&"cheaper".to_string()));
    }

    #[tokio::test]
    async fn repairs_trailing_comma_once() {
        let reply = r#"{"primary_goal": "find", "semantic_variants": ["a", "b",], "confidence": 0.8,}"#;
        let intent = extractor(reply).extract("free CLI for coding").await.unwrap();
        assert_eq!(intent.primary_goal, PrimaryGoal::Find);
    }

    #[tokio::test]
    async fn unparseable_reply_is_terminal() {
        let error = extractor("I could not help with that.")
            .extract("free CLI")
            .await
            .unwrap_err();
        assert!(matches!(error, SearchError::IntentUnparseable(_)));
    }

    #[tokio::test]
    async fn schema_violation_is_terminal() {
        // Confidence out of range fails validation even though it parses.
        let reply = r#"{"primary_goal": "find", "confidence": 1.5}"#;
        let error = extractor(reply).extract("query").await.unwrap_err();
        assert!(matches!(error, SearchError::IntentUnparseable(_)));
    }

    #[tokio::test]
    async fn chat_failure_propagates() {
        struct FailingChat;
        #[async_trait]
        impl ChatClient for FailingChat {
            async fn complete(&self, _s: &str, _u: &str) -> Result<String, SearchError> {
                Err(SearchError::ChatUnavailable("offline".to_string()))
            }
        }
        let extractor = IntentExtractor::new(Arc::new(FailingChat));
        let error = extractor.extract("query").await.unwrap_err();
        assert!(matches!(error, SearchError::ChatUnavailable(_)));
    }
}
