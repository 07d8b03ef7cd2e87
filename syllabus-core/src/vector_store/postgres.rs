use async_trait::async_trait;
use pgvector::Vector;
use sqlx::types::Json;
use sqlx::PgPool;

use super::VectorStore;
use crate::error::StoreError;
use crate::models::{Chunk, Course, Embedding, Lesson, QueryResult, ScoredChunk};

/// pgvector-backed store. Similarity is `1 - cosine distance`; ties are broken
/// by the `seq` serial, i.e. first insertion.
#[derive(Clone)]
pub struct PgVectorStore {
    pool: PgPool,
    dimensions: usize,
}

#[derive(sqlx::FromRow)]
struct ChunkRow {
    text: String,
    source_id: String,
    sequence_index: i32,
    lesson_number: Option<i32>,
    score: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct CourseRow {
    title: String,
    link: Option<String>,
    instructor: Option<String>,
    lessons: Json<Vec<Lesson>>,
}

impl PgVectorStore {
    pub fn new(pool: PgPool, dimensions: usize) -> Self {
        Self { pool, dimensions }
    }

    /// `new` followed by `db::ensure_schema`.
    pub async fn connect(pool: PgPool, dimensions: usize) -> Result<Self, StoreError> {
        crate::db::ensure_schema(&pool, dimensions).await?;
        Ok(Self::new(pool, dimensions))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn check_dimensions(&self, embedding: &Embedding) -> Result<(), StoreError> {
        if embedding.len() != self.dimensions {
            return Err(StoreError::DimensionMismatch {
                expected: self.dimensions,
                actual: embedding.len(),
            });
        }
        Ok(())
    }
}

fn to_i32(value: u32, column: &str) -> Result<i32, StoreError> {
    i32::try_from(value)
        .map_err(|_| StoreError::Malformed(format!("{column} {value} exceeds INTEGER range")))
}

const UPSERT_CHUNK: &str = r#"
    INSERT INTO course_chunks (source_id, sequence_index, lesson_number, text, embedding)
    VALUES ($1, $2, $3, $4, $5)
    ON CONFLICT (source_id, sequence_index)
    DO UPDATE SET lesson_number = EXCLUDED.lesson_number,
                  text = EXCLUDED.text,
                  embedding = EXCLUDED.embedding
"#;

const UPSERT_COURSE: &str = r#"
    INSERT INTO courses (title, link, instructor, lessons)
    VALUES ($1, $2, $3, $4)
    ON CONFLICT (title)
    DO UPDATE SET link = EXCLUDED.link,
                  instructor = EXCLUDED.instructor,
                  lessons = EXCLUDED.lessons,
                  ingested_at = now()
"#;

fn into_result(rows: Vec<ChunkRow>) -> Result<QueryResult, StoreError> {
    rows.into_iter()
        .map(|row| {
            let sequence_index = u32::try_from(row.sequence_index).map_err(|_| {
                StoreError::Malformed(format!("negative sequence_index {}", row.sequence_index))
            })?;
            let lesson_number = row
                .lesson_number
                .map(u32::try_from)
                .transpose()
                .map_err(|_| StoreError::Malformed("negative lesson_number".to_string()))?;
            Ok(ScoredChunk {
                chunk: Chunk::new(row.text, row.source_id, sequence_index).in_lesson(lesson_number),
                score: row.score.unwrap_or(0.0) as f32,
            })
        })
        .collect()
}

#[async_trait]
impl VectorStore for PgVectorStore {
    async fn upsert(&self, chunk: &Chunk, embedding: &Embedding) -> Result<(), StoreError> {
        self.check_dimensions(embedding)?;
        let sequence_index = to_i32(chunk.sequence_index, "sequence_index")?;
        let lesson_number = chunk
            .lesson_number
            .map(|n| to_i32(n, "lesson_number"))
            .transpose()?;

        sqlx::query(UPSERT_CHUNK)
            .bind(&chunk.source_id)
            .bind(sequence_index)
            .bind(lesson_number)
            .bind(&chunk.text)
            .bind(Vector::from(embedding.clone()))
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn query(&self, embedding: &Embedding, k: usize) -> Result<QueryResult, StoreError> {
        self.check_dimensions(embedding)?;
        let vector = Vector::from(embedding.clone());

        let rows: Vec<ChunkRow> = sqlx::query_as(
            r#"
            SELECT text, source_id, sequence_index, lesson_number,
                   1 - (embedding <=> $1::vector) AS score
            FROM course_chunks
            ORDER BY embedding <=> $1::vector, seq
            LIMIT $2
            "#,
        )
        .bind(&vector)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        into_result(rows)
    }

    async fn query_source(
        &self,
        embedding: &Embedding,
        source_id: &str,
        lesson_number: Option<u32>,
        k: usize,
    ) -> Result<QueryResult, StoreError> {
        self.check_dimensions(embedding)?;
        let vector = Vector::from(embedding.clone());
        let lesson_number = lesson_number
            .map(|n| to_i32(n, "lesson_number"))
            .transpose()?;

        let rows: Vec<ChunkRow> = sqlx::query_as(
            r#"
            SELECT text, source_id, sequence_index, lesson_number,
                   1 - (embedding <=> $1::vector) AS score
            FROM course_chunks
            WHERE source_id = $2
              AND ($3::INTEGER IS NULL OR lesson_number = $3)
            ORDER BY embedding <=> $1::vector, seq
            LIMIT $4
            "#,
        )
        .bind(&vector)
        .bind(source_id)
        .bind(lesson_number)
        .bind(k as i64)
        .fetch_all(&self.pool)
        .await?;

        into_result(rows)
    }

    async fn replace_source(
        &self,
        course: &Course,
        pairs: &[(Chunk, Embedding)],
    ) -> Result<(), StoreError> {
        for (_, embedding) in pairs {
            self.check_dimensions(embedding)?;
        }

        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM course_chunks WHERE source_id = $1")
            .bind(&course.title)
            .execute(&mut *tx)
            .await?;

        for (chunk, embedding) in pairs {
            let sequence_index = to_i32(chunk.sequence_index, "sequence_index")?;
            let lesson_number = chunk
                .lesson_number
                .map(|n| to_i32(n, "lesson_number"))
                .transpose()?;
            sqlx::query(UPSERT_CHUNK)
                .bind(&course.title)
                .bind(sequence_index)
                .bind(lesson_number)
                .bind(&chunk.text)
                .bind(Vector::from(embedding.clone()))
                .execute(&mut *tx)
                .await?;
        }

        sqlx::query(UPSERT_COURSE)
            .bind(&course.title)
            .bind(&course.link)
            .bind(&course.instructor)
            .bind(Json(&course.lessons))
            .execute(&mut *tx)
            .await?;

        // dropping tx without commit rolls back
        tx.commit().await?;
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM course_chunks WHERE source_id = $1")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM courses WHERE title = $1")
            .bind(source_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        sqlx::query("TRUNCATE course_chunks, courses RESTART IDENTITY")
            .execute(&self.pool)
            .await?;
        tracing::info!("Cleared course_chunks and courses");
        Ok(())
    }

    async fn register_course(&self, course: &Course) -> Result<(), StoreError> {
        sqlx::query(UPSERT_COURSE)
            .bind(&course.title)
            .bind(&course.link)
            .bind(&course.instructor)
            .bind(Json(&course.lessons))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn courses(&self) -> Result<Vec<Course>, StoreError> {
        let rows: Vec<CourseRow> = sqlx::query_as(
            "SELECT title, link, instructor, lessons FROM courses ORDER BY title",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Course {
                title: row.title,
                link: row.link,
                instructor: row.instructor,
                lessons: row.lessons.0,
            })
            .collect())
    }

    async fn chunk_count(&self) -> Result<usize, StoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM course_chunks")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0 as usize)
    }

    fn name(&self) -> &str {
        "pgvector"
    }
}

// ============================================================================
// TESTS - need a live Postgres with pgvector; skipped when unavailable
// ============================================================================
