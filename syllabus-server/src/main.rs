use std::sync::Arc;

use clap::Parser;
use sqlx::PgPool;
use syllabus_core::embeddings::{backend_from_settings, EmbeddingBackend};
use syllabus_core::generator::{AnthropicConfig, AnthropicGenerator, Generator};
use syllabus_core::session::{InMemorySessionStore, SessionStore};
use syllabus_core::vector_store::{MemoryVectorStore, PgVectorStore, VectorStore};
use syllabus_core::SyllabusConfig;
use tokio::sync::broadcast;
use tracing_subscriber::{fmt, EnvFilter};

use syllabus_server::subsystems::answer::RagSystem;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(short, long, default_value = "syllabus.toml")]
    config: String,

    /// Check the vector store and exit
    #[arg(long)]
    health: bool,

    /// Skip ingesting the docs folder at startup
    #[arg(long)]
    no_ingest: bool,
}

/// The store, plus its pool when it is Postgres-backed.
async fn build_store(
    config: &SyllabusConfig,
    dimensions: usize,
) -> anyhow::Result<(Arc<dyn VectorStore>, Option<PgPool>)> {
    match config.vector_store.backend.as_str() {
        "memory" => {
            let store: Arc<dyn VectorStore> = Arc::new(MemoryVectorStore::new());
            Ok((store, None))
        }
        "pgvector" => {
            let pool = syllabus_core::db::create_pool(&config.database).await?;
            let store: Arc<dyn VectorStore> =
                Arc::new(PgVectorStore::connect(pool.clone(), dimensions).await?);
            Ok((store, Some(pool)))
        }
        other => Err(anyhow::anyhow!("Unknown vector store backend: {}", other)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present (API keys in development)
    dotenvy::dotenv().ok();

    let args = Args::parse();

    // Load config
    let config = match SyllabusConfig::load(&args.config) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config from {}: {}", args.config, e);
            std::process::exit(1);
        }
    };

    // Init logging
    let default_level = config
        .service
        .log_level
        .parse()
        .unwrap_or(tracing::Level::INFO);
    fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(default_level.into()))
        .init();

    let embedder: Arc<dyn EmbeddingBackend> = match backend_from_settings(&config.embedding) {
        Ok(b) => Arc::from(b),
        Err(e) => {
            eprintln!("Failed to create embedding backend: {}", e);
            std::process::exit(1);
        }
    };

    let (store, pool) = match build_store(&config, embedder.dimensions()).await {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to open vector store: {}", e);
            std::process::exit(1);
        }
    };

    if args.health {
        if let Some(pool) = &pool {
            match syllabus_core::db::health_check(pool).await {
                Ok(v) => println!("✅ PostgreSQL connected: {}", v),
                Err(e) => {
                    println!("❌ PostgreSQL connection failed: {}", e);
                    std::process::exit(1);
                }
            }
            match syllabus_core::db::check_pgvector(pool).await {
                Ok(v) => println!("✅ pgvector version: {}", v),
                Err(e) => {
                    println!("❌ pgvector check failed: {}", e);
                    std::process::exit(1);
                }
            }
        }
        match store.chunk_count().await {
            Ok(n) => println!("✅ {} vector store reachable: {} chunks", store.name(), n),
            Err(e) => {
                println!("❌ {} vector store check failed: {}", store.name(), e);
                std::process::exit(1);
            }
        }
        println!("✅ Embedding backend: {} ({} dims)", embedder.name(), embedder.dimensions());
        return Ok(());
    }

    let generator: Arc<dyn Generator> =
        match AnthropicGenerator::new(AnthropicConfig::from_settings(&config.generation)) {
            Ok(g) => Arc::new(g),
            Err(e) => {
                eprintln!("Failed to create generator: {}", e);
                std::process::exit(1);
            }
        };
    let sessions: Arc<dyn SessionStore> = Arc::new(InMemorySessionStore::new());

    let rag = Arc::new(RagSystem::new(
        embedder,
        store,
        generator,
        sessions,
        &config,
    )?);

    if config.ingest.on_startup && !args.no_ingest {
        match rag.ingest_folder(None, false).await {
            Ok(report) => tracing::info!(
                courses = report.courses_added,
                chunks = report.chunks_added,
                skipped = report.skipped,
                "Startup ingestion complete"
            ),
            Err(e) => tracing::warn!("Startup ingestion failed: {}", e),
        }
    }

    let (tx, _rx) = broadcast::channel(1);
    let shutdown_tx = tx.clone();

    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            return;
        }
        tracing::info!("Shutdown signal received");
        let _ = shutdown_tx.send(());
    });

    syllabus_server::http::start_http_server(rag, &config, tx.subscribe()).await?;

    Ok(())
}
