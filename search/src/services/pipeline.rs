use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

use toolhub_embedding::EmbeddingProvider;
use toolhub_models::{FieldPredicate, Intent, QueryContext, RetrievalPlan};

use crate::errors::SearchError;
use crate::services::context::ContextEnrichmentService;
use crate::services::dedup::DuplicateDetector;
use crate::services::executor::{ExecutionOutput, ExecutionRequest, QueryExecutor};
use crate::services::fusion::MergeConfig;
use crate::services::intent::IntentExtractor;
use crate::services::planner::QueryPlanner;

/// Linear pipeline states. FAILED is reachable from any of them and carries
/// the failing stage's name in the telemetry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Initialised,
    IntentExtracted,
    Planned,
    Executed,
    Completed,
    Failed,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Initialised => "initialised",
            PipelineState::IntentExtracted => "intent_extracted",
            PipelineState::Planned => "planned",
            PipelineState::Executed => "executed",
            PipelineState::Completed => "completed",
            PipelineState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineTelemetry {
    pub state: PipelineState,
    /// Stage names in execution order, ending in `completed` or `failed`.
    pub execution_path: Vec<String>,
    pub node_execution_times: BTreeMap<String, u64>,
    /// Append-only; never cleared between stages.
    pub errors: Vec<String>,
    pub failed_stage: Option<String>,
    pub total_time_ms: u64,
}

impl PipelineTelemetry {
    fn new() -> Self {
        Self {
            state: PipelineState::Initialised,
            execution_path: vec![PipelineState::Initialised.as_str().to_string()],
            node_execution_times: BTreeMap::new(),
            errors: Vec::new(),
            failed_stage: None,
            total_time_ms: 0,
        }
    }

    fn advance(&mut self, state: PipelineState, stage: &str, elapsed_ms: u64) {
        self.state = state;
        self.execution_path.push(state.as_str().to_string());
        self.node_execution_times.insert(stage.to_string(), elapsed_ms);
    }

    fn fail(&mut self, stage: &str, error: &SearchError, elapsed_ms: u64) {
        self.state = PipelineState::Failed;
        self.execution_path.push(PipelineState::Failed.as_str().to_string());
        self.node_execution_times.insert(stage.to_string(), elapsed_ms);
        self.errors.push(format!("{stage}: {error}"));
        self.failed_stage = Some(stage.to_string());
    }
}

pub struct PipelineOptions {
    pub merge_config: MergeConfig,
    pub detector: Option<Arc<DuplicateDetector>>,
    pub extra_filter: Vec<FieldPredicate>,
    pub structured_limit: usize,
    pub enrich_context: bool,
    /// Source-family toggles from the request.
    pub allow_vector: bool,
    pub allow_structured: bool,
    /// Restrict (or force) the spaces the plan may fan out over.
    pub vector_types: Vec<toolhub_models::VectorSpace>,
    pub vector_limit: usize,
    /// Filter applied to vector sources only.
    pub vector_filter: Vec<FieldPredicate>,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            merge_config: MergeConfig::default(),
            detector: None,
            extra_filter: vec![],
            structured_limit: 20,
            enrich_context: false,
            allow_vector: true,
            allow_structured: true,
            vector_types: vec![],
            vector_limit: 20,
            vector_filter: vec![],
        }
    }
}

/// Reshape the plan to honour the request's source toggles: drop disallowed
/// families, restrict to the requested spaces (synthesising plain
/// query-text sources when the plan has none of them), and push the
/// vector-only filter down.
fn apply_source_options(plan: &mut RetrievalPlan, options: &PipelineOptions) {
    if !options.allow_vector {
        plan.vector_sources.clear();
    } else if !options.vector_types.is_empty() {
        plan.vector_sources.retain(|s| options.vector_types.contains(&s.space));
        if plan.vector_sources.is_empty() {
            for &space in &options.vector_types {
                plan.vector_sources.push(toolhub_models::VectorSourceSpec {
                    space,
                    query_vector_source: toolhub_models::QueryVectorSource::QueryText,
                    top_k: options.vector_limit,
                    filter: None,
                    embedding_hint: None,
                });
            }
        }
    }
    if !options.vector_filter.is_empty() {
        for source in &mut plan.vector_sources {
            source
                .filter
                .get_or_insert_with(Vec::new)
                .extend(options.vector_filter.iter().cloned());
        }
    }
    if !options.allow_structured {
        plan.structured_sources.clear();
    }
}

pub struct PipelineOutcome {
    pub intent: Intent,
    pub plan: RetrievalPlan,
    pub context: Option<QueryContext>,
    pub output: ExecutionOutput,
    pub telemetry: PipelineTelemetry,
}

pub struct PipelineFailure {
    pub error: SearchError,
    pub telemetry: PipelineTelemetry,
}

/// Stitches intent extraction, planning, context enrichment, and execution
/// into one run with per-stage timings. Intent and plan failures are
/// terminal; the planner's internal rule fallback is its declared recovery,
/// and enrichment failure only degrades the context.
pub struct SearchPipeline {
    intent_extractor: IntentExtractor,
    planner: QueryPlanner,
    executor: QueryExecutor,
    context: Option<Arc<ContextEnrichmentService>>,
    embeddings: Arc<dyn EmbeddingProvider>,
}

impl SearchPipeline {
    pub fn new(
        intent_extractor: IntentExtractor,
        planner: QueryPlanner,
        executor: QueryExecutor,
        context: Option<Arc<ContextEnrichmentService>>,
        embeddings: Arc<dyn EmbeddingProvider>,
    ) -> Self {
        Self { intent_extractor, planner, executor, context, embeddings }
    }

    pub async fn run(
        &self,
        query: &str,
        options: PipelineOptions,
    ) -> Result<PipelineOutcome, Box<PipelineFailure>> {
        let run_started = Instant::now();
        let mut telemetry = PipelineTelemetry::new();

        // Stage 1: intent extraction.
        let stage_started = Instant::now();
        let intent = match self.intent_extractor.extract(query).await {
            Ok(intent) => intent,
            Err(error) => {
                telemetry.fail(
                    "intent_extraction",
                    &error,
                    stage_started.elapsed().as_millis() as u64,
                );
                telemetry.total_time_ms = run_started.elapsed().as_millis() as u64;
                return Err(Box::new(PipelineFailure { error, telemetry }));
            }
        };
        telemetry.advance(
            PipelineState::IntentExtracted,
            "intent_extraction",
            stage_started.elapsed().as_millis() as u64,
        );

        // Stage 2: planning, with context enrichment alongside it. Both only
        // need the intent and the query, so they share the wall clock.
        let stage_started = Instant::now();
        let (plan_result, context) = tokio::join!(
            self.planner.plan(&intent, query),
            self.enrich(query, options.enrich_context),
        );
        let mut plan = match plan_result {
            Ok(plan) => plan,
            Err(error) => {
                telemetry.fail("planning", &error, stage_started.elapsed().as_millis() as u64);
                telemetry.total_time_ms = run_started.elapsed().as_millis() as u64;
                return Err(Box::new(PipelineFailure { error, telemetry }));
            }
        };
        apply_source_options(&mut plan, &options);
        telemetry.advance(
            PipelineState::Planned,
            "planning",
            stage_started.elapsed().as_millis() as u64,
        );
        debug!("plan '{}' with {} vector / {} structured sources",
            plan.strategy,
            plan.vector_sources.len(),
            plan.structured_sources.len()
        );

        // Stage 3: execution.
        let stage_started = Instant::now();
        let execution = self
            .executor
            .execute(ExecutionRequest {
                plan: &plan,
                intent: &intent,
                query,
                merge_config: options.merge_config,
                detector: options.detector.as_deref(),
                extra_filter: options.extra_filter,
                structured_limit: options.structured_limit,
            })
            .await;
        let output = match execution {
            Ok(output) => output,
            Err(error) => {
                telemetry.fail("execution", &error, stage_started.elapsed().as_millis() as u64);
                telemetry.total_time_ms = run_started.elapsed().as_millis() as u64;
                return Err(Box::new(PipelineFailure { error, telemetry }));
            }
        };
        telemetry.advance(
            PipelineState::Executed,
            "execution",
            stage_started.elapsed().as_millis() as u64,
        );

        for entry in &output.errors {
            telemetry.errors.push(format!("{}: {}", entry.source, entry.message));
        }

        telemetry.state = PipelineState::Completed;
        telemetry.execution_path.push(PipelineState::Completed.as_str().to_string());
        telemetry.total_time_ms = run_started.elapsed().as_millis() as u64;

        Ok(PipelineOutcome { intent, plan, context, output, telemetry })
    }

    async fn enrich(&self, query: &str, enabled: bool) -> Option<QueryContext> {
        let service = self.context.as_ref()?;
        if !enabled {
            return None;
        }
        match self.embeddings.embed(query).await {
            Ok(embedding) => Some(service.enrich(query, &embedding).await),
            Err(error) => {
                warn!("context embedding failed: {error}");
                Some(QueryContext {
                    entity_statistics: Default::default(),
                    assumptions: vec![format!("entity statistics unavailable: {error}")],
                    metadata_confidence: 0.0,
                    strategy: "fallback".to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use serde_json::json;
    use std::time::Duration;
    use toolhub_models::{Record, VectorSpace};

    use crate::services::document_store::DocumentStore;
    use crate::services::llm::ChatClient;
    use crate::services::multi_vector::MultiVectorRetriever;
    use crate::services::vector_store::{RawHit, VectorFilter, VectorSearcher};
    use toolhub_embedding::EmbeddingError;

    struct OkSearcher;

    #[async_trait]
    impl VectorSearcher for OkSearcher {
        async fn search_space(
            &self,
            _space: VectorSpace,
            _vector: &[f32],
            top_k: usize,
            _filter: Option<&VectorFilter>,
        ) -> Result<Vec<RawHit>, SearchError> {
            Ok((0..top_k.min(2))
                .map(|i| RawHit {
                    id: format!("tool-{i}"),
                    score: 0.8 - i as f32 * 0.1,
                    payload: json!({"id": format!("tool-{i}"), "name": format!("Tool {i}")}),
                })
                .collect())
        }
    }

    struct EmptyDocuments;

    #[async_trait]
    impl DocumentStore for EmptyDocuments {
        async fn find_by_ids(&self, _ids: &[String]) -> Result<Vec<Record>, SearchError> {
            Ok(vec![])
        }
        async fn search(
            &self,
            _predicates: &[FieldPredicate],
            _limit: usize,
        ) -> Result<Vec<Record>, SearchError> {
            Ok(vec![])
        }
        fn stream_all(&self) -> BoxStream<'_, Result<Record, SearchError>> {
            Box::pin(futures::stream::empty())
        }
    }

    struct OkEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for OkEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.1, 0.2])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.1, 0.2]).collect())
        }
    }

    struct ScriptedChat {
        reply: Result<String, String>,
    }

    #[async_trait]
    impl ChatClient for ScriptedChat {
        async fn complete(&self, _s: &str, _u: &str) -> Result<String, SearchError> {
            self.reply
                .clone()
                .map_err(SearchError::ChatUnavailable)
        }
    }

    fn pipeline(intent_reply: Result<String, String>) -> SearchPipeline {
        let chat: Arc<dyn ChatClient> = Arc::new(ScriptedChat { reply: intent_reply });
        let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(OkEmbeddings);
        let executor = QueryExecutor::new(
            MultiVectorRetriever::new(Arc::new(OkSearcher), Duration::from_secs(1)),
            Arc::new(EmptyDocuments),
            Arc::clone(&embeddings),
            Duration::from_secs(1),
        );
        SearchPipeline::new(
            IntentExtractor::new(chat),
            QueryPlanner::rule_based(),
            executor,
            None,
            embeddings,
        )
    }

    fn options() -> PipelineOptions {
        PipelineOptions::default()
    }

    #[tokio::test]
    async fn happy_path_walks_all_states() {
        let reply = r#"{"primary_goal": "find", "confidence": 0.9}"#.to_string();
        let outcome = pipeline(Ok(reply)).run("code editor", options()).await.ok().unwrap();

        assert_eq!(outcome.telemetry.state, PipelineState::Completed);
        assert_eq!(
            outcome.telemetry.execution_path,
            vec!["initialised", "intent_extracted", "planned", "executed", "completed"]
        );
        assert!(outcome.telemetry.node_execution_times.contains_key("intent_extraction"));
        assert!(outcome.telemetry.node_execution_times.contains_key("planning"));
        assert!(outcome.telemetry.node_execution_times.contains_key("execution"));
        assert!(!outcome.output.results.is_empty());
    }

    #[tokio::test]
    async fn intent_failure_is_terminal_with_stage_name() {
        let failure = pipeline(Ok("not json at all".to_string()))
            .run("code editor", options())
            .await
            .err()
            .unwrap();

        assert!(matches!(failure.error, SearchError::IntentUnparseable(_)));
        assert_eq!(failure.telemetry.state, PipelineState::Failed);
        assert_eq!(failure.telemetry.failed_stage.as_deref(), Some("intent_extraction"));
        assert_eq!(failure.telemetry.errors.len(), 1);
    }

    #[tokio::test]
    async fn chat_outage_fails_the_request() {
        let failure = pipeline(Err("provider offline".to_string()))
            .run("code editor", options())
            .await
            .err()
            .unwrap();
        assert!(matches!(failure.error, SearchError::ChatUnavailable(_)));
        assert_eq!(failure.telemetry.failed_stage.as_deref(), Some("intent_extraction"));
    }
}
