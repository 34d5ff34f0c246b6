pub mod cache;
pub mod client;

pub use cache::{CacheStats, EmbeddingCache};
pub use client::{
    CachedEmbeddingClient, EmbeddingClientConfig, EmbeddingError, EmbeddingProvider,
    HttpEmbeddingClient,
};
