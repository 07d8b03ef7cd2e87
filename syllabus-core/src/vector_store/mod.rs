//! Vector store - persists (chunk, embedding) pairs and the course catalog,
//! and answers nearest-neighbour queries by cosine similarity.
//!
//! Results are ordered by descending similarity; equal scores keep insertion
//! order. The store only accepts a chunk together with its embedding, so
//! nothing is queryable without a vector.

mod memory;
mod postgres;

pub use self::memory::MemoryVectorStore;
pub use self::postgres::PgVectorStore;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::models::{Chunk, Course, Embedding, QueryResult};

#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, chunk: &Chunk, embedding: &Embedding) -> Result<(), StoreError>;

    /// Top `k` chunks across the whole corpus.
    async fn query(&self, embedding: &Embedding, k: usize) -> Result<QueryResult, StoreError>;

    /// Top `k` chunks of a single course, optionally of one lesson.
    async fn query_source(
        &self,
        embedding: &Embedding,
        source_id: &str,
        lesson_number: Option<u32>,
        k: usize,
    ) -> Result<QueryResult, StoreError>;

    /// Replaces a course's chunks and catalog entry in one step. On error
    /// the store keeps whatever it held for the course before the call.
    async fn replace_source(
        &self,
        course: &Course,
        pairs: &[(Chunk, Embedding)],
    ) -> Result<(), StoreError>;

    /// Drops every chunk of a course and its catalog entry.
    async fn delete_source(&self, source_id: &str) -> Result<(), StoreError>;

    async fn clear(&self) -> Result<(), StoreError>;

    async fn register_course(&self, course: &Course) -> Result<(), StoreError>;

    /// Registered courses ordered by title.
    async fn courses(&self) -> Result<Vec<Course>, StoreError>;

    async fn chunk_count(&self) -> Result<usize, StoreError>;

    fn name(&self) -> &str;
}

/// Cosine similarity; 0.0 when either vector has zero norm.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}
