use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use toolhub_config::AppConfig;
use toolhub_embedding::{
    CachedEmbeddingClient, EmbeddingClientConfig, EmbeddingProvider, HttpEmbeddingClient,
};
use toolhub_indexers::{MultiVectorSeeder, SeederConfig};
use toolhub_models::VectorSpace;
use toolhub_search::services::document_store::PostgresDocumentStore;
use toolhub_search::services::vector_store::{CollectionLayout, QdrantVectorStore};

/// Seed the named-vector collections from the document store.
#[derive(Debug, Parser)]
#[command(name = "seeder", version, about)]
struct Args {
    /// Stop after this many records.
    #[arg(long)]
    limit: Option<usize>,

    /// Empty all vector collections before seeding.
    #[arg(long)]
    clear: bool,

    /// Debug-level logging.
    #[arg(long)]
    verbose: bool,

    /// Comma-separated space names (e.g. semantic,entities.aliases).
    #[arg(long = "vector-types", value_delimiter = ',')]
    vector_types: Vec<String>,

    /// Records per batch.
    #[arg(long = "batch-size")]
    batch_size: Option<usize>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let default_filter = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    let config = AppConfig::from_env();
    if let Err(error) = config.validate() {
        error!("configuration invalid: {error}");
        return ExitCode::from(2);
    }

    let vector_types = if args.vector_types.is_empty() {
        VectorSpace::ALL.to_vec()
    } else {
        let mut spaces = Vec::new();
        for name in &args.vector_types {
            match name.parse::<VectorSpace>() {
                Ok(space) => spaces.push(space),
                Err(error) => {
                    error!("{error}");
                    return ExitCode::from(2);
                }
            }
        }
        spaces
    };

    let Some(database_url) = config.database_url.clone() else {
        error!("DATABASE_URL must be set for seeding");
        return ExitCode::from(2);
    };

    match run(args, config, database_url, vector_types).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            error!("seeding failed: {error:#}");
            ExitCode::from(1)
        }
    }
}

async fn run(
    args: Args,
    config: AppConfig,
    database_url: String,
    vector_types: Vec<VectorSpace>,
) -> anyhow::Result<()> {
    info!("seeder starting against {}", config.qdrant_url);

    let documents =
        Arc::new(PostgresDocumentStore::connect(&database_url, config.document_timeout()).await?);

    let provider = Arc::new(HttpEmbeddingClient::new(EmbeddingClientConfig {
        base_url: config.embedding_service_url.clone(),
        model: config.embedding_model.clone(),
        dimension: config.embedding_dimension,
        timeout: config.embedding_timeout(),
        chunk_size: config.embed_batch_chunk,
        max_concurrent_chunks: 4,
    }));
    let embeddings: Arc<dyn EmbeddingProvider> = Arc::new(
        CachedEmbeddingClient::new(provider, config.embedding_cache_size)
            .with_chunking(config.embed_batch_chunk, 4),
    );

    let layout = if config.use_enhanced_collection {
        CollectionLayout::Enhanced { collection: config.enhanced_collection_name.clone() }
    } else {
        CollectionLayout::PerSpace
    };
    let store = Arc::new(
        QdrantVectorStore::connect(
            &config.qdrant_url,
            layout,
            config.point_id_namespace.clone(),
            config.embedding_dimension,
            config.vector_search_timeout(),
        )
        .await?,
    );

    let seeder = MultiVectorSeeder::new(
        documents,
        embeddings,
        store,
        SeederConfig {
            batch_size: args.batch_size.unwrap_or(config.seed_batch_size),
            vector_types,
            limit: args.limit,
            clear: args.clear,
        },
    );

    let report = seeder.run().await?;
    info!(
        "done: {} processed, {} successful, {} failed",
        report.processed, report.successful, report.failed
    );
    Ok(())
}
