use std::time::Duration;

use crate::config::DatabaseConfig;
use sqlx::{postgres::PgPoolOptions, PgPool};

pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_seconds))
        .connect(&config.url)
        .await
}

pub async fn health_check(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) = sqlx::query_as("SELECT version()").fetch_one(pool).await?;
    Ok(row.0)
}

pub async fn check_pgvector(pool: &PgPool) -> Result<String, sqlx::Error> {
    let row: (String,) =
        sqlx::query_as("SELECT extversion FROM pg_extension WHERE extname = 'vector'")
            .fetch_one(pool)
            .await?;
    Ok(row.0)
}

/// Creates the extension and tables if missing. The embedding column is typed
/// `vector(dimensions)` on first creation; an existing table keeps its width.
pub async fn ensure_schema(pool: &PgPool, dimensions: usize) -> Result<(), sqlx::Error> {
    sqlx::query("CREATE EXTENSION IF NOT EXISTS vector")
        .execute(pool)
        .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS courses (
            title       TEXT PRIMARY KEY,
            link        TEXT,
            instructor  TEXT,
            lessons     JSONB NOT NULL DEFAULT '[]'::jsonb,
            ingested_at TIMESTAMPTZ NOT NULL DEFAULT now()
        )
        "#,
    )
    .execute(pool)
    .await?;

    // dimensions is a usize, not user text
    sqlx::query(&format!(
        r#"
        CREATE TABLE IF NOT EXISTS course_chunks (
            seq            BIGSERIAL PRIMARY KEY,
            source_id      TEXT NOT NULL,
            sequence_index INTEGER NOT NULL,
            lesson_number  INTEGER,
            text           TEXT NOT NULL,
            embedding      vector({dimensions}) NOT NULL,
            UNIQUE (source_id, sequence_index)
        )
        "#
    ))
    .execute(pool)
    .await?;

    // tables created before lesson tracking
    sqlx::query("ALTER TABLE course_chunks ADD COLUMN IF NOT EXISTS lesson_number INTEGER")
        .execute(pool)
        .await?;

    tracing::info!(dimensions, "Database schema ready");
    Ok(())
}
