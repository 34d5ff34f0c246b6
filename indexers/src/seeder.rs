use chrono::Utc;
use futures::StreamExt;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, warn};

use toolhub_embedding::EmbeddingProvider;
use toolhub_models::{PointPayload, Record, VectorSpace};
use toolhub_search::services::document_store::DocumentStore;
use toolhub_search::services::vector_store::VectorIndexWriter;

use crate::assembly::assemble_text;

#[derive(Debug, Error)]
pub enum SeederError {
    #[error("vector store preparation failed: {0}")]
    Prepare(String),

    #[error("record stream failed: {0}")]
    Stream(String),
}

#[derive(Debug, Clone)]
pub struct SeederConfig {
    pub batch_size: usize,
    /// Spaces to index; defaults to all of them.
    pub vector_types: Vec<VectorSpace>,
    pub limit: Option<usize>,
    /// Empty all owned collections before seeding.
    pub clear: bool,
}

impl Default for SeederConfig {
    fn default() -> Self {
        Self {
            batch_size: 25,
            vector_types: VectorSpace::ALL.to_vec(),
            limit: None,
            clear: false,
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct SeedReport {
    pub processed: usize,
    pub successful: usize,
    pub failed: usize,
    /// Points written per space, for post-seed validation.
    pub per_space: HashMap<VectorSpace, usize>,
}

/// Writes weighted per-space embeddings for every record. Batched; a failing
/// record is logged and the batch continues. I/O is expected to be bound on
/// the embedding call, so records inside a batch run sequentially and only
/// the per-record texts share one embedding request.
pub struct MultiVectorSeeder {
    documents: Arc<dyn DocumentStore>,
    embeddings: Arc<dyn EmbeddingProvider>,
    writer: Arc<dyn VectorIndexWriter>,
    config: SeederConfig,
}

impl MultiVectorSeeder {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        embeddings: Arc<dyn EmbeddingProvider>,
        writer: Arc<dyn VectorIndexWriter>,
        config: SeederConfig,
    ) -> Self {
        Self { documents, embeddings, writer, config }
    }

    pub async fn run(&self) -> Result<SeedReport, SeederError> {
        if self.config.clear {
            info!("clearing vector collections before seeding");
            self.writer.clear_all().await.map_err(|e| SeederError::Prepare(e.to_string()))?;
        } else {
            self.writer
                .ensure_collections()
                .await
                .map_err(|e| SeederError::Prepare(e.to_string()))?;
        }

        let mut report = SeedReport::default();
        let mut batch: Vec<Record> = Vec::with_capacity(self.config.batch_size);
        let mut stream = self.documents.stream_all();

        while let Some(next) = stream.next().await {
            let record = next.map_err(|e| SeederError::Stream(e.to_string()))?;
            batch.push(record);
            if batch.len() >= self.config.batch_size {
                self.process_batch(&mut batch, &mut report).await;
            }
            if let Some(limit) = self.config.limit {
                if report.processed + batch.len() >= limit {
                    break;
                }
            }
        }
        drop(stream);
        if !batch.is_empty() {
            self.process_batch(&mut batch, &mut report).await;
        }

        self.validate_counts(&report).await;
        info!(
            "seeding finished: processed {} successful {} failed {}",
            report.processed, report.successful, report.failed
        );
        Ok(report)
    }

    /// Seed an explicit list of records instead of streaming the store.
    pub async fn seed_records(&self, records: &[Record]) -> Result<SeedReport, SeederError> {
        if self.config.clear {
            self.writer.clear_all().await.map_err(|e| SeederError::Prepare(e.to_string()))?;
        } else {
            self.writer
                .ensure_collections()
                .await
                .map_err(|e| SeederError::Prepare(e.to_string()))?;
        }

        let mut report = SeedReport::default();
        let limited: Vec<Record> = match self.config.limit {
            Some(limit) => records.iter().take(limit).cloned().collect(),
            None => records.to_vec(),
        };
        let mut batch = Vec::with_capacity(self.config.batch_size);
        for record in limited {
            batch.push(record);
            if batch.len() >= self.config.batch_size {
                self.process_batch(&mut batch, &mut report).await;
            }
        }
        if !batch.is_empty() {
            self.process_batch(&mut batch, &mut report).await;
        }

        self.validate_counts(&report).await;
        Ok(report)
    }

    async fn process_batch(&self, batch: &mut Vec<Record>, report: &mut SeedReport) {
        for record in batch.drain(..) {
            report.processed += 1;
            match self.seed_one(&record).await {
                Ok(spaces_written) => {
                    report.successful += 1;
                    for space in spaces_written {
                        *report.per_space.entry(space).or_insert(0) += 1;
                    }
                }
                Err(message) => {
                    report.failed += 1;
                    error!("record {} failed: {message}", record.id);
                }
            }
        }
        info!(
            "progress: processed {} successful {} failed {}",
            report.processed, report.successful, report.failed
        );
    }

    async fn seed_one(&self, record: &Record) -> Result<Vec<VectorSpace>, String> {
        let mut spaces = Vec::new();
        let mut texts = Vec::new();
        for &space in &self.config.vector_types {
            if let Some(text) = assemble_text(record, space) {
                spaces.push(space);
                texts.push(text);
            }
        }
        if spaces.is_empty() {
            // Nothing assembles for this record; not a failure.
            return Ok(Vec::new());
        }

        let embeddings =
            self.embeddings.embed_batch(&texts).await.map_err(|e| e.to_string())?;
        let vectors: HashMap<VectorSpace, Vec<f32>> =
            spaces.iter().copied().zip(embeddings).collect();

        let payload = PointPayload::from_record(record, Utc::now());
        self.writer
            .upsert_named(&record.id, &vectors, &payload)
            .await
            .map_err(|e| e.to_string())?;
        Ok(spaces)
    }

    /// Count points per space and compare to what we wrote. A mismatch is a
    /// warning, never a failure: soft deletes and partial reseeds are legal.
    async fn validate_counts(&self, report: &SeedReport) {
        for &space in &self.config.vector_types {
            let expected = report.per_space.get(&space).copied().unwrap_or(0) as u64;
            match self.writer.count(space).await {
                Ok(actual) if actual < expected => {
                    warn!(
                        "post-seed validation: {space} holds {actual} points, expected at least {expected}"
                    );
                }
                Ok(_) => {}
                Err(error) => warn!("post-seed count for {space} failed: {error}"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use futures::stream::BoxStream;
    use std::sync::Mutex;
    use toolhub_embedding::EmbeddingError;
    use toolhub_models::FieldPredicate;
    use toolhub_search::SearchError;

    struct FakeDocuments {
        records: Vec<Record>,
    }

    #[async_trait]
    impl DocumentStore for FakeDocuments {
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
            Box::pin(futures::stream::iter(
                self.records.clone().into_iter().map(Ok).collect::<Vec<_>>(),
            ))
        }
    }

    #[derive(Default)]
    struct RecordingWriter {
        upserts: Mutex<Vec<(String, Vec<VectorSpace>)>>,
        cleared: Mutex<bool>,
        fail_record: Option<String>,
    }

    #[async_trait]
    impl VectorIndexWriter for RecordingWriter {
        async fn ensure_collections(&self) -> Result<(), SearchError> {
            Ok(())
        }
        async fn clear_all(&self) -> Result<(), SearchError> {
            *self.cleared.lock().unwrap() = true;
            Ok(())
        }
        async fn upsert_named(
            &self,
            record_id: &str,
            vectors: &HashMap<VectorSpace, Vec<f32>>,
            _payload: &PointPayload,
        ) -> Result<(), SearchError> {
            if self.fail_record.as_deref() == Some(record_id) {
                return Err(SearchError::vector_transport("write refused"));
            }
            let mut spaces: Vec<VectorSpace> = vectors.keys().copied().collect();
            spaces.sort();
            self.upserts.lock().unwrap().push((record_id.to_string(), spaces));
            Ok(())
        }
        async fn count(&self, space: VectorSpace) -> Result<u64, SearchError> {
            let upserts = self.upserts.lock().unwrap();
            Ok(upserts.iter().filter(|(_, spaces)| spaces.contains(&space)).count() as u64)
        }
    }

    struct FixedEmbeddings;

    #[async_trait]
    impl EmbeddingProvider for FixedEmbeddings {
        async fn embed(&self, _text: &str) -> Result<Vec<f32>, EmbeddingError> {
            Ok(vec![0.5; 4])
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![0.5; 4]).collect())
        }
    }

    fn record(id: &str, with_categories: bool) -> Record {
        Record {
            id: id.to_string(),
            name: format!("Tool {id}"),
            description: "does things".to_string(),
            long_description: None,
            categories: if with_categories { vec!["ide".into()] } else { vec![] },
            functionality: vec!["editing".into()],
            search_keywords: vec![id.to_string()],
            use_cases: vec![],
            interfaces: vec!["cli".into()],
            deployment: vec![],
            technical: None,
            pricing: None,
            url: None,
        }
    }

    fn seeder(records: Vec<Record>, config: SeederConfig) -> (MultiVectorSeeder, Arc<RecordingWriter>) {
        let writer = Arc::new(RecordingWriter::default());
        let seeder = MultiVectorSeeder::new(
            Arc::new(FakeDocuments { records }),
            Arc::new(FixedEmbeddings),
            Arc::clone(&writer) as Arc<dyn VectorIndexWriter>,
            config,
        );
        (seeder, writer)
    }

    #[tokio::test]
    async fn seeds_every_assemblable_space() {
        let (seeder, writer) = seeder(vec![record("a", true)], SeederConfig::default());
        let report = seeder.run().await.unwrap();

        assert_eq!(report.processed, 1);
        assert_eq!(report.successful, 1);
        let upserts = writer.upserts.lock().unwrap();
        let (id, spaces) = &upserts[0];
        assert_eq!(id, "a");
        assert_eq!(spaces.len(), 5);
    }

    #[tokio::test]
    async fn record_without_categories_skips_that_space_only() {
        let (seeder, writer) = seeder(vec![record("a", false)], SeederConfig::default());
        let report = seeder.run().await.unwrap();

        assert_eq!(report.successful, 1);
        let upserts = writer.upserts.lock().unwrap();
        let (_, spaces) = &upserts[0];
        assert!(!spaces.contains(&VectorSpace::EntityCategories));
        assert!(spaces.contains(&VectorSpace::Semantic));
        assert!(spaces.contains(&VectorSpace::EntityAliases));
    }

    #[tokio::test]
    async fn failed_record_does_not_stop_the_batch() {
        let writer = Arc::new(RecordingWriter {
            fail_record: Some("bad".to_string()),
            ..RecordingWriter::default()
        });
        let seeder = MultiVectorSeeder::new(
            Arc::new(FakeDocuments {
                records: vec![record("good", true), record("bad", true), record("late", true)],
            }),
            Arc::new(FixedEmbeddings),
            Arc::clone(&writer) as Arc<dyn VectorIndexWriter>,
            SeederConfig::default(),
        );
        let report = seeder.run().await.unwrap();

        assert_eq!(report.processed, 3);
        assert_eq!(report.successful, 2);
        assert_eq!(report.failed, 1);
        assert_eq!(writer.upserts.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn clear_flag_empties_collections_first() {
        let (seeder, writer) = seeder(
            vec![record("a", true)],
            SeederConfig { clear: true, ..SeederConfig::default() },
        );
        seeder.run().await.unwrap();
        assert!(*writer.cleared.lock().unwrap());
    }

    #[tokio::test]
    async fn limit_caps_processed_records() {
        let records: Vec<Record> = (0..10).map(|i| record(&format!("t{i}"), true)).collect();
        let (seeder, _) = seeder(
            records,
            SeederConfig { limit: Some(4), batch_size: 2, ..SeederConfig::default() },
        );
        let report = seeder.run().await.unwrap();
        assert!(report.processed <= 4);
    }

    #[tokio::test]
    async fn restricted_vector_types_only_write_those_spaces() {
        let (seeder, writer) = seeder(
            vec![record("a", true)],
            SeederConfig {
                vector_types: vec![VectorSpace::Semantic, VectorSpace::EntityAliases],
                ..SeederConfig::default()
            },
        );
        seeder.run().await.unwrap();
        let upserts = writer.upserts.lock().unwrap();
        let (_, spaces) = &upserts[0];
        assert_eq!(spaces, &vec![VectorSpace::Semantic, VectorSpace::EntityAliases]);
    }
}
