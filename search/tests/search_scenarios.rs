//! End-to-end scenarios over the full pipeline with in-process fakes for
//! the vector store, document store, embedding provider, and chat provider.

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use toolhub_embedding::{EmbeddingError, EmbeddingProvider};
use toolhub_models::{
    DuplicateStrategy, EnhancedSearchRequest, FieldPredicate, Record, VectorSpace,
};
use toolhub_search::services::document_store::DocumentStore;
use toolhub_search::services::executor::QueryExecutor;
use toolhub_search::services::intent::IntentExtractor;
use toolhub_search::services::llm::ChatClient;
use toolhub_search::services::multi_vector::MultiVectorRetriever;
use toolhub_search::services::pipeline::SearchPipeline;
use toolhub_search::services::planner::QueryPlanner;
use toolhub_search::services::search::{SearchDefaults, SearchService};
use toolhub_search::services::vector_store::{RawHit, VectorFilter, VectorSearcher};
use toolhub_search::SearchError;

struct CatalogSearcher {
    timeout_spaces: Vec<VectorSpace>,
    calls: Arc<AtomicUsize>,
}

fn editor_hit(id: &str, name: &str, score: f32, free: bool) -> RawHit {
    RawHit {
        id: id.to_string(),
        score,
        payload: json!({
            "id": id,
            "name": name,
            "description": format!("{name} is a code editor"),
            "categories": ["code-editor"],
            "interfaces": ["desktop"],
            "has_free_tier": free,
        }),
    }
}

#[async_trait]
impl VectorSearcher for CatalogSearcher {
    async fn search_space(
        &self,
        space: VectorSpace,
        _vector: &[f32],
        top_k: usize,
        _filter: Option<&VectorFilter>,
    ) -> Result<Vec<RawHit>, SearchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.timeout_spaces.contains(&space) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        let hits = match space {
            VectorSpace::Semantic => vec![
                editor_hit("tool-zed", "Zed", 0.92, true),
                editor_hit("tool-vscode", "VS Code", 0.88, true),
                editor_hit("tool-cursor", "Cursor", 0.85, false),
            ],
            VectorSpace::EntityAliases => vec![
                editor_hit("tool-cursor", "Cursor", 0.97, false),
                editor_hit("tool-zed", "Zed", 0.71, true),
            ],
            _ => vec![editor_hit("tool-vscode", "VS Code", 0.6, true)],
        };
        Ok(hits.into_iter().take(top_k).collect())
    }
}

struct CatalogDocuments;

fn catalog_record(id: &str, name: &str, free: bool) -> Record {
    Record {
        id: id.to_string(),
        name: name.to_string(),
        description: format!("{name} is a code editor"),
        long_description: None,
        categories: vec!["code-editor".into()],
        functionality: vec!["editing".into()],
        search_keywords: vec![],
        use_cases: vec![],
        interfaces: vec!["desktop".into()],
        deployment: vec![],
        technical: None,
        pricing: Some(toolhub_models::PricingSchedule { has_free_tier: free, tiers: vec![] }),
        url: None,
    }
}

#[async_trait]
impl DocumentStore for CatalogDocuments {
    async fn find_by_ids(&self, _ids: &[String]) -> Result<Vec<Record>, SearchError> {
        Ok(vec![])
    }

    async fn search(
        &self,
        predicates: &[FieldPredicate],
        limit: usize,
    ) -> Result<Vec<Record>, SearchError> {
        let all = vec![
            catalog_record("tool-zed", "Zed", true),
            catalog_record("tool-vscode", "VS Code", true),
            catalog_record("tool-cursor", "Cursor", false),
        ];
        let wants_free = predicates
            .iter()
            .any(|p| p.field == "pricing.hasFreeTier" && p.value == json!(true));
        Ok(all
            .into_iter()
            .filter(|r| {
                !wants_free || r.pricing.as_ref().map(|p| p.has_free_tier).unwrap_or(false)
            })
            .take(limit)
            .collect())
    }

    fn stream_all(&self) -> BoxStream<'_, Result<Record, SearchError>> {
        Box::pin(futures::stream::empty())
    }
}

struct FixedEmbeddings;

#[async_trait]
impl EmbeddingProvider for FixedEmbeddings {
    async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
        Ok(vec![0.1; 8])
    }
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|_| vec![0.1; 8]).collect())
    }
}

/// Chat double that answers intent extraction from a canned table and
/// panics if it is ever reached when it must not be.
struct CannedChat {
    panic_on_call: bool,
}

#[async_trait]
impl ChatClient for CannedChat {
    async fn complete(&self, _system: &str, user: &str) -> Result<String, SearchError> {
        assert!(!self.panic_on_call, "chat provider must not be called");
        let reply = if user.contains("Cursor alternative") {
            json!({
                "primary_goal": "compare",
                "reference_tool": "Cursor",
                "comparison_mode": "alternative_to",
                "constraints": ["cheaper"],
                "semantic_variants": ["editor like cursor but cheaper", "cursor replacement"],
                "confidence": 0.93,
            })
        } else if user.contains("free AI tools") {
            json!({
                "primary_goal": "find",
                "pricing": "free",
                "semantic_variants": ["no-cost ai tooling", "free ai developer tools"],
                "confidence": 0.88,
            })
        } else {
            json!({
                "primary_goal": "find",
                "semantic_variants": ["code editing software", "programmer's editor"],
                "confidence": 0.9,
            })
        };
        Ok(reply.to_string())
    }
}

fn service(timeout_spaces: Vec<VectorSpace>, panic_on_chat: bool) -> SearchService {
    let searcher = Arc::new(CatalogSearcher {
        timeout_spaces,
        calls: Arc::new(AtomicUsize::new(0)),
    });
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(FixedEmbeddings);
    let chat: Arc<dyn ChatClient> = Arc::new(CannedChat { panic_on_call: panic_on_chat });

    let executor = QueryExecutor::new(
        MultiVectorRetriever::new(searcher, Duration::from_millis(250)),
        Arc::new(CatalogDocuments),
        Arc::clone(&embeddings),
        Duration::from_secs(1),
    );
    let pipeline = SearchPipeline::new(
        IntentExtractor::new(chat),
        QueryPlanner::rule_based(),
        executor,
        None,
        embeddings,
    );
    SearchService::new(pipeline, SearchDefaults::default())
}

#[tokio::test]
async fn plain_keyword_search_returns_ranked_editors() {
    let service = service(vec![], false);
    let mut request = EnhancedSearchRequest::new("code editor");
    request.options.vector_options.vector_types = vec![VectorSpace::Semantic];
    request.options.duplicate_detection.enabled = false;
    request.options.include_execution_metrics = true;

    let response = service.search(request).await.unwrap();

    assert!(!response.results.is_empty());
    let top_name = response.results[0].payload_str("name").unwrap();
    assert!(top_name.contains("Zed") || top_name.contains("Code"));
    assert_eq!(response.summary.duplicates_removed, 0);
    let path = &response.metrics.as_ref().unwrap().execution_path;
    assert_eq!(path.last().map(String::as_str), Some("completed"));

    // Ranks and fused scores obey the ordering invariants.
    for (index, result) in response.results.iter().enumerate() {
        assert_eq!(result.final_rank, index + 1);
        if index > 0 {
            assert!(response.results[index - 1].rrf_score >= result.rrf_score);
        }
    }
}

#[tokio::test]
async fn free_tier_query_pushes_structured_filter() {
    let service = service(vec![], false);
    let mut request = EnhancedSearchRequest::new("free AI tools");
    request.options.duplicate_detection.strategies =
        vec![DuplicateStrategy::ContentSimilarity];
    request.options.debug = true;

    let response = service.search(request).await.unwrap();

    // The plan pushed the free-tier predicate down to the document store.
    let debug = response.debug.as_ref().unwrap();
    let structured = &debug["plan"]["structured_sources"][0];
    assert_eq!(structured["predicates"][0]["field"], "pricing.hasFreeTier");
    assert_eq!(structured["predicates"][0]["value"], json!(true));

    // Every structured contribution satisfies the filter.
    for result in &response.results {
        if result.original_rankings.keys().any(|s| s.starts_with("structured:")) {
            assert_eq!(result.payload["pricing"]["has_free_tier"], json!(true));
        }
    }
}

#[tokio::test]
async fn alternative_to_excludes_reference_and_uses_alias_space() {
    let service = service(vec![], false);
    let mut request = EnhancedSearchRequest::new("Cursor alternative but cheaper");
    request.options.debug = true;

    let response = service.search(request).await.unwrap();

    let debug = response.debug.as_ref().unwrap();
    assert_eq!(debug["intent"]["reference_tool"], json!("Cursor"));
    assert_eq!(debug["intent"]["comparison_mode"], json!("alternative_to"));
    let constraints = debug["intent"]["constraints"].as_array().unwrap();
    assert!(constraints.contains(&json!("cheaper")));

    let vector_sources = debug["plan"]["vector_sources"].as_array().unwrap();
    assert!(vector_sources.iter().any(|s| {
        s["space"] == json!("entities.aliases")
            && s["query_vector_source"] == json!("reference_tool_embedding")
    }));

    // Cursor itself never comes back.
    assert!(!response.results.is_empty());
    for result in &response.results {
        assert_ne!(result.payload_str("name"), Some("Cursor"));
    }
}

#[tokio::test]
async fn partial_failure_returns_survivor_results_with_errors() {
    let service = service(vec![VectorSpace::EntityAliases], false);
    let mut request = EnhancedSearchRequest::new("Cursor alternative but cheaper");
    request.options.sources.traditional = false;
    request.options.include_source_attribution = true;

    let response = service.search(request).await.unwrap();

    assert!(!response.results.is_empty());
    assert_eq!(response.errors.len(), 1);
    assert_eq!(response.errors[0].source, "vector:entities.aliases");
    assert_eq!(response.errors[0].code, "TIMEOUT");

    // Attribution only covers the surviving sources.
    let attribution = response.source_attribution.as_ref().unwrap();
    assert!(!attribution.per_source.contains_key("vector:entities.aliases"));
    assert!(attribution.per_source.keys().any(|k| k.starts_with("vector:semantic")));

    // And the failed source contributes no rankings.
    for result in &response.results {
        assert!(!result.original_rankings.contains_key("vector:entities.aliases"));
    }
}

#[tokio::test]
async fn empty_query_fails_before_any_external_call() {
    // The panicking chat double proves no external call is made.
    let service = service(vec![], true);
    let response = service.search(EnhancedSearchRequest::new("")).await;
    let error = response.err().unwrap();
    assert_eq!(error.code, "INPUT_INVALID");
}

#[tokio::test]
async fn query_at_the_length_limit_is_accepted() {
    let service = service(vec![], false);
    let response = service.search(EnhancedSearchRequest::new("x".repeat(500))).await;
    assert!(response.is_ok());
}

#[tokio::test]
async fn max_results_one_returns_exactly_one() {
    let service = service(vec![], false);
    let mut request = EnhancedSearchRequest::new("code editor");
    request.options.merge_options.max_results = 1;

    let response = service.search(request).await.unwrap();
    assert_eq!(response.results.len(), 1);
    assert_eq!(response.results[0].final_rank, 1);
}

#[tokio::test]
async fn rrf_k_extremes_still_order_monotonically() {
    for rrf_k in [1u32, 200] {
        let service = service(vec![], false);
        let mut request = EnhancedSearchRequest::new("code editor");
        request.options.merge_options.rrf_k_value = rrf_k;

        let response = service.search(request).await.unwrap();
        for (index, result) in response.results.iter().enumerate() {
            assert_eq!(result.final_rank, index + 1);
            if index > 0 {
                assert!(response.results[index - 1].rrf_score >= result.rrf_score);
            }
        }
    }
}

#[tokio::test]
async fn pagination_slices_the_fused_list() {
    let service = service(vec![], false);
    let mut request = EnhancedSearchRequest::new("code editor");
    request.options.pagination.limit = 2;
    request.options.pagination.page = 2;

    let response = service.search(request).await.unwrap();
    assert_eq!(response.pagination.page, 2);
    assert_eq!(response.pagination.limit, 2);
    assert!(response.results.len() <= 2);
    assert_eq!(response.summary.returned, response.results.len());
    assert!(response.summary.total_results >= response.results.len());
}
