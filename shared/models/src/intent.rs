use serde::{Deserialize, Serialize};

/// Closed category vocabulary the extractor is pinned to.
pub const CATEGORY_VOCABULARY: &[&str] = &[
    "ai-coding-assistant",
    "code-editor",
    "ide",
    "framework",
    "library",
    "devops",
    "testing",
    "database",
    "api-tool",
    "design",
    "productivity",
    "analytics",
];

/// Closed platform vocabulary.
pub const PLATFORM_VOCABULARY: &[&str] = &[
    "cli", "web", "api", "desktop", "mobile", "vscode", "jetbrains",
];

/// Closed feature-tag vocabulary.
pub const FEATURE_VOCABULARY: &[&str] = &[
    "autocomplete",
    "chat",
    "refactoring",
    "code-review",
    "api-access",
    "self-hosted",
    "offline",
    "realtime-collaboration",
    "version-control",
    "debugging",
    "code-generation",
    "templates",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryGoal {
    Find,
    Compare,
    Recommend,
    Explore,
    Analyze,
    Explain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    SimilarTo,
    Vs,
    AlternativeTo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PricingFilter {
    Free,
    Freemium,
    Paid,
    Enterprise,
}

/// Structured interpretation of the user query, produced by the intent
/// extractor and schema-validated before anything downstream runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intent {
    pub primary_goal: PrimaryGoal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_tool: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comparison_mode: Option<ComparisonMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pricing: Option<PricingFilter>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub constraints: Vec<String>,
    #[serde(default)]
    pub semantic_variants: Vec<String>,
    pub confidence: f32,
}

impl Intent {
    /// Post-deserialization schema checks: ranges and closed vocabularies.
    pub fn validate(&self) -> Result<(), String> {
        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(format!("confidence {} out of [0,1]", self.confidence));
        }
        if self.semantic_variants.len() > 3 {
            return Err(format!(
                "expected at most 3 semantic variants, got {}",
                self.semantic_variants.len()
            ));
        }
        if let Some(category) = &self.category {
            if !CATEGORY_VOCABULARY.contains(&category.as_str()) {
                return Err(format!("category '{category}' not in vocabulary"));
            }
        }
        if let Some(platform) = &self.platform {
            if !PLATFORM_VOCABULARY.contains(&platform.as_str()) {
                return Err(format!("platform '{platform}' not in vocabulary"));
            }
        }
        for feature in &self.features {
            if !FEATURE_VOCABULARY.contains(&feature.as_str()) {
                return Err(format!("feature '{feature}' not in vocabulary"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_intent() -> Intent {
        Intent {
            primary_goal: PrimaryGoal::Find,
            reference_tool: None,
            comparison_mode: None,
            pricing: None,
            category: None,
            platform: None,
            features: vec![],
            constraints: vec![],
            semantic_variants: vec!["a".into(), "b".into()],
            confidence: 0.9,
        }
    }

    #[test]
    fn accepts_well_formed_intent() {
        assert!(base_intent().validate().is_ok());
    }

    #[test]
    fn rejects_confidence_out_of_range() {
        let mut intent = base_intent();
        intent.confidence = 1.2;
        assert!(intent.validate().is_err());
    }

    #[test]
    fn rejects_unknown_category() {
        let mut intent = base_intent();
        intent.category = Some("time-travel".into());
        assert!(intent.validate().is_err());
    }

    #[test]
    fn comparison_mode_uses_snake_case() {
        let intent: Intent = serde_json::from_str(
            r#"{"primary_goal":"compare","comparison_mode":"alternative_to","confidence":0.8}"#,
        )
        .unwrap();
        assert_eq!(intent.comparison_mode, Some(ComparisonMode::AlternativeTo));
    }
}
