use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::cache::{CacheStats, EmbeddingCache};

#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("embedding provider returned {returned} vectors for {requested} texts")]
    CountMismatch { requested: usize, returned: usize },
}

/// Text in, dense vector out. Deterministic per (text, model): a cache hit
/// must be identical to a cache miss.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError>;

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;
}

#[derive(Debug, Clone)]
pub struct EmbeddingClientConfig {
    pub base_url: String,
    pub model: String,
    pub dimension: usize,
    pub timeout: Duration,
    /// Batch requests are split into chunks of this many texts.
    pub chunk_size: usize,
    /// How many chunks may be in flight at once.
    pub max_concurrent_chunks: usize,
}

impl Default for EmbeddingClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8082".to_string(),
            model: "bge-m3".to_string(),
            dimension: 1024,
            timeout: Duration::from_secs(5),
            chunk_size: 16,
            max_concurrent_chunks: 4,
        }
    }
}

#[derive(Debug, Serialize)]
struct EmbedRequest<'a> {
    text: &'a [String],
    normalize: bool,
    model: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP client for the embedding service.
pub struct HttpEmbeddingClient {
    http_client: reqwest::Client,
    config: EmbeddingClientConfig,
}

impl HttpEmbeddingClient {
    pub fn new(config: EmbeddingClientConfig) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_default();
        Self { http_client, config }
    }

    async fn request_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let url = format!("{}/embed", self.config.base_url);
        let request = EmbedRequest { text: texts, normalize: true, model: &self.config.model };

        debug!("requesting {} embeddings from {}", texts.len(), url);

        let response = self
            .http_client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::Unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EmbeddingError::Unavailable(format!(
                "embedding service returned {}",
                response.status()
            )));
        }

        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::Unavailable(format!("bad embed response: {e}")))?;

        if body.embeddings.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                requested: texts.len(),
                returned: body.embeddings.len(),
            });
        }
        for vector in &body.embeddings {
            if vector.len() != self.config.dimension {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: vector.len(),
                });
            }
        }

        Ok(body.embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let texts = [text.to_string()];
        let mut embeddings = self.request_embeddings(&texts).await?;
        Ok(embeddings.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts).await
    }
}

/// Caching front for any provider. Single lookups go through the LRU;
/// batch lookups only send cache misses to the provider, split into
/// chunks pipelined with bounded parallelism, and come back in input order.
pub struct CachedEmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    chunk_size: usize,
    max_concurrent_chunks: usize,
}

impl CachedEmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, cache_capacity: usize) -> Self {
        Self {
            provider,
            cache: EmbeddingCache::new(cache_capacity),
            chunk_size: 16,
            max_concurrent_chunks: 4,
        }
    }

    pub fn with_chunking(mut self, chunk_size: usize, max_concurrent_chunks: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self.max_concurrent_chunks = max_concurrent_chunks.max(1);
        self
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }
}

#[async_trait]
impl EmbeddingProvider for CachedEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        if let Some(vector) = self.cache.get(text) {
            return Ok(vector);
        }
        let vector = self.provider.embed(text).await?;
        self.cache.put(text.to_string(), vector.clone());
        Ok(vector)
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut results: Vec<Option<Vec<f32>>> = vec![None; texts.len()];
        let mut missing: Vec<(usize, String)> = Vec::new();

        for (index, text) in texts.iter().enumerate() {
            match self.cache.get(text) {
                Some(vector) => results[index] = Some(vector),
                None => missing.push((index, text.clone())),
            }
        }

        if !missing.is_empty() {
            let chunks: Vec<Vec<(usize, String)>> = missing
                .chunks(self.chunk_size)
                .map(|chunk| chunk.to_vec())
                .collect();

            let provider = Arc::clone(&self.provider);
            let mut chunk_stream = stream::iter(chunks.into_iter().map(move |chunk| {
                let provider = Arc::clone(&provider);
                async move {
                    let texts: Vec<String> =
                        chunk.iter().map(|(_, text)| text.clone()).collect();
                    let vectors = provider.embed_batch(&texts).await?;
                    Ok::<_, EmbeddingError>((chunk, vectors))
                }
            }))
            .buffered(self.max_concurrent_chunks);

            while let Some(outcome) = chunk_stream.next().await {
                let (chunk, vectors) = outcome?;
                for ((index, text), vector) in chunk.into_iter().zip(vectors) {
                    self.cache.put(text, vector.clone());
                    results[index] = Some(vector);
                }
            }
        }

        // Every slot is filled: cache hits up front, provider results above.
        Ok(results.into_iter().map(|slot| slot.unwrap_or_default()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct CountingProvider {
        calls: AtomicUsize,
        dimension: usize,
    }

    #[async_trait]
    impl EmbeddingProvider for CountingProvider {
        async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(deterministic_vector(text, self.dimension))
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(texts.iter().map(|t| deterministic_vector(t, self.dimension)).collect())
        }
    }

    fn deterministic_vector(text: &str, dimension: usize) -> Vec<f32> {
        let seed = text.bytes().map(|b| b as f32).sum::<f32>();
        (0..dimension).map(|i| (seed + i as f32).sin()).collect()
    }

    #[tokio::test]
    async fn cache_hit_is_identical_to_miss() {
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0), dimension: 8 });
        let client = CachedEmbeddingClient::new(provider.clone(), 16);

        let first = client.embed("rust ide").await.unwrap();
        let second = client.embed("rust ide").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn batch_only_fetches_misses_and_preserves_order() {
        let provider = Arc::new(CountingProvider { calls: AtomicUsize::new(0), dimension: 4 });
        let client = CachedEmbeddingClient::new(provider.clone(), 16).with_chunking(2, 2);

        client.embed("b").await.unwrap();
        let texts: Vec<String> = ["a", "b", "c"].iter().map(|s| s.to_string()).collect();
        let vectors = client.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 3);
        for (text, vector) in texts.iter().zip(&vectors) {
            assert_eq!(vector, &deterministic_vector(text, 4));
        }
    }

    #[tokio::test]
    async fn http_client_rejects_wrong_dimension() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "embeddings": [[0.1, 0.2]],
            })))
            .mount(&server)
            .await;

        let client = HttpEmbeddingClient::new(EmbeddingClientConfig {
            base_url: server.uri(),
            dimension: 4,
            ..EmbeddingClientConfig::default()
        });

        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::DimensionMismatch { expected: 4, actual: 2 }));
    }

    #[tokio::test]
    async fn http_client_maps_transport_failure_to_unavailable() {
        let client = HttpEmbeddingClient::new(EmbeddingClientConfig {
            base_url: "http://127.0.0.1:1".to_string(),
            timeout: Duration::from_millis(200),
            ..EmbeddingClientConfig::default()
        });
        let err = client.embed("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Unavailable(_)));
    }
}
