use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Configuration failures are fatal at startup; thresholds and weights are
/// rejected here so call sites never re-validate them.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{name} = {value} out of range {range}")]
    OutOfRange { name: &'static str, value: String, range: &'static str },

    #[error("{name} must not be empty")]
    Empty { name: &'static str },

    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    // Stores
    pub database_url: Option<String>,
    pub qdrant_url: String,

    // Embedding provider
    pub embedding_service_url: String,
    pub embedding_model: String,
    pub embedding_dimension: usize,

    // Chat provider (intent extraction and planning)
    pub chat_service_url: String,
    pub chat_model: String,
    pub chat_api_key: Option<String>,

    // Vector store layout
    pub use_enhanced_collection: bool,
    pub enhanced_collection_name: String,
    /// Namespace folded into every deterministic point ID. Changing it
    /// between indexer and reader is a reindex, so it is pinned here.
    pub point_id_namespace: String,

    // Caches
    pub embedding_cache_size: usize,
    pub dedup_cache_size: usize,
    pub context_cache_ttl_secs: u64,
    pub context_cache_max_entries: usize,

    // Timeouts (milliseconds)
    pub embedding_timeout_ms: u64,
    pub vector_search_timeout_ms: u64,
    pub document_timeout_ms: u64,
    pub chat_timeout_ms: u64,
    pub request_deadline_ms: u64,

    // Fusion defaults
    pub rrf_k: u32,
    pub max_results: usize,
    pub source_weights: HashMap<String, f32>,

    // Dedup defaults
    pub dedup_threshold: f32,
    pub max_comparison_items: usize,
    pub dedup_workers: usize,

    // Seeder
    pub seed_batch_size: usize,
    pub embed_batch_chunk: usize,
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();

        let mut source_weights = HashMap::new();
        source_weights.insert("semantic".to_string(), env_f32("SOURCE_WEIGHT_SEMANTIC", 1.0));
        source_weights.insert("traditional".to_string(), env_f32("SOURCE_WEIGHT_TRADITIONAL", 0.9));
        source_weights.insert("hybrid".to_string(), env_f32("SOURCE_WEIGHT_HYBRID", 0.95));
        source_weights.insert("fulltext".to_string(), env_f32("SOURCE_WEIGHT_FULLTEXT", 0.8));

        Self {
            database_url: env::var("DATABASE_URL").ok(),
            qdrant_url: env::var("QDRANT_URL")
                .unwrap_or_else(|_| "http://localhost:6334".to_string()),

            embedding_service_url: env::var("EMBEDDING_SERVICE_URL")
                .unwrap_or_else(|_| "http://localhost:8082".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "bge-m3".to_string()),
            embedding_dimension: env_usize("EMBEDDING_DIMENSION", 1024),

            chat_service_url: env::var("CHAT_SERVICE_URL")
                .unwrap_or_else(|_| "https://api.openai.com".to_string()),
            chat_model: env::var("CHAT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
            chat_api_key: env::var("CHAT_API_KEY").ok(),

            use_enhanced_collection: env_bool("USE_ENHANCED_COLLECTION", false),
            enhanced_collection_name: env::var("ENHANCED_COLLECTION_NAME")
                .unwrap_or_else(|_| "tools_enhanced".to_string()),
            point_id_namespace: env::var("POINT_ID_NAMESPACE")
                .unwrap_or_else(|_| "toolhub.points.v1".to_string()),

            embedding_cache_size: env_usize("EMBEDDING_CACHE_SIZE", 1024),
            dedup_cache_size: env_usize("DEDUP_CACHE_SIZE", 10_000),
            context_cache_ttl_secs: env_u64("CONTEXT_CACHE_TTL_SECS", 300),
            context_cache_max_entries: env_usize("CONTEXT_CACHE_MAX_ENTRIES", 256),

            embedding_timeout_ms: env_u64("EMBEDDING_TIMEOUT_MS", 5_000),
            vector_search_timeout_ms: env_u64("VECTOR_SEARCH_TIMEOUT_MS", 5_000),
            document_timeout_ms: env_u64("DOCUMENT_TIMEOUT_MS", 2_000),
            chat_timeout_ms: env_u64("CHAT_TIMEOUT_MS", 8_000),
            request_deadline_ms: env_u64("REQUEST_DEADLINE_MS", 10_000),

            rrf_k: env_u64("RRF_K", 60) as u32,
            max_results: env_usize("MAX_RESULTS", 50),
            source_weights,

            dedup_threshold: env_f32("DEDUP_THRESHOLD", 0.8),
            max_comparison_items: env_usize("MAX_COMPARISON_ITEMS", 1_000),
            dedup_workers: env_usize("DEDUP_WORKERS", 4),

            seed_batch_size: env_usize("SEED_BATCH_SIZE", 25),
            embed_batch_chunk: env_usize("EMBED_BATCH_CHUNK", 16),
        }
    }

    /// Reject out-of-range knobs before any component is built.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.rrf_k == 0 || self.rrf_k > 1000 {
            return Err(ConfigError::OutOfRange {
                name: "RRF_K",
                value: self.rrf_k.to_string(),
                range: "(0, 1000]",
            });
        }
        if self.max_results == 0 || self.max_results > 10_000 {
            return Err(ConfigError::OutOfRange {
                name: "MAX_RESULTS",
                value: self.max_results.to_string(),
                range: "(0, 10000]",
            });
        }
        if !(0.0..=1.0).contains(&self.dedup_threshold) {
            return Err(ConfigError::OutOfRange {
                name: "DEDUP_THRESHOLD",
                value: self.dedup_threshold.to_string(),
                range: "[0, 1]",
            });
        }
        if self.point_id_namespace.is_empty() {
            return Err(ConfigError::Empty { name: "POINT_ID_NAMESPACE" });
        }
        if self.embedding_dimension == 0 {
            return Err(ConfigError::OutOfRange {
                name: "EMBEDDING_DIMENSION",
                value: "0".to_string(),
                range: "(0, ..)",
            });
        }
        for (source, weight) in &self.source_weights {
            if *weight < 0.0 || !weight.is_finite() {
                return Err(ConfigError::Invalid {
                    name: "SOURCE_WEIGHT",
                    value: format!("{source}={weight}"),
                });
            }
        }
        if self.embed_batch_chunk == 0 || self.seed_batch_size == 0 {
            return Err(ConfigError::OutOfRange {
                name: "SEED_BATCH_SIZE/EMBED_BATCH_CHUNK",
                value: format!("{}/{}", self.seed_batch_size, self.embed_batch_chunk),
                range: "(0, ..)",
            });
        }
        Ok(())
    }

    pub fn embedding_timeout(&self) -> Duration {
        Duration::from_millis(self.embedding_timeout_ms)
    }

    pub fn vector_search_timeout(&self) -> Duration {
        Duration::from_millis(self.vector_search_timeout_ms)
    }

    pub fn document_timeout(&self) -> Duration {
        Duration::from_millis(self.document_timeout_ms)
    }

    pub fn chat_timeout(&self) -> Duration {
        Duration::from_millis(self.chat_timeout_ms)
    }

    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }
}

fn env_usize(name: &str, default: usize) -> usize {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(name: &str, default: u64) -> u64 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_f32(name: &str, default: f32) -> f32 {
    env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(name: &str, default: bool) -> bool {
    env::var(name)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}
