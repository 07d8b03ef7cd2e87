use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{cosine_similarity, VectorStore};
use crate::error::StoreError;
use crate::models::{Chunk, Course, Embedding, QueryResult, ScoredChunk};

#[derive(Default)]
struct Inner {
    /// Insertion order is the tie-breaker for equal scores.
    rows: Vec<(Chunk, Embedding)>,
    /// (source_id, sequence_index) → position in `rows`.
    index: HashMap<(String, u32), usize>,
    courses: BTreeMap<String, Course>,
    dimensions: Option<usize>,
}

impl Inner {
    fn push(&mut self, chunk: Chunk, embedding: Embedding) {
        let key = (chunk.source_id.clone(), chunk.sequence_index);
        match self.index.get(&key) {
            Some(&pos) => self.rows[pos] = (chunk, embedding),
            None => {
                self.index.insert(key, self.rows.len());
                self.rows.push((chunk, embedding));
            }
        }
    }

    fn remove_source(&mut self, source_id: &str) {
        self.rows.retain(|(c, _)| c.source_id != source_id);
        self.index = self
            .rows
            .iter()
            .enumerate()
            .map(|(pos, (c, _))| ((c.source_id.clone(), c.sequence_index), pos))
            .collect();
        self.courses.remove(source_id);
    }
}

/// Process-local store. Used with `vector_store.backend = "memory"` and in tests.
#[derive(Default)]
pub struct MemoryVectorStore {
    inner: RwLock<Inner>,
}

impl MemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn rank<'a>(
    rows: impl Iterator<Item = &'a (Chunk, Embedding)>,
    embedding: &Embedding,
    k: usize,
) -> QueryResult {
    let mut scored: Vec<ScoredChunk> = rows
        .map(|(chunk, vector)| ScoredChunk {
            chunk: chunk.clone(),
            score: cosine_similarity(embedding, vector),
        })
        .collect();
    // sort_by is stable, so equal scores stay in insertion order
    scored.sort_by(|a, b| b.score.total_cmp(&a.score));
    scored.truncate(k);
    scored
}

fn check_dimensions(expected: Option<usize>, actual: usize) -> Result<(), StoreError> {
    match expected {
        Some(expected) if expected != actual => {
            Err(StoreError::DimensionMismatch { expected, actual })
        }
        _ => Ok(()),
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(&self, chunk: &Chunk, embedding: &Embedding) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        check_dimensions(inner.dimensions, embedding.len())?;
        inner.dimensions = Some(embedding.len());
        inner.push(chunk.clone(), embedding.clone());
        Ok(())
    }

    async fn query(&self, embedding: &Embedding, k: usize) -> Result<QueryResult, StoreError> {
        let inner = self.inner.read().await;
        check_dimensions(inner.dimensions, embedding.len())?;
        Ok(rank(inner.rows.iter(), embedding, k))
    }

    async fn query_source(
        &self,
        embedding: &Embedding,
        source_id: &str,
        lesson_number: Option<u32>,
        k: usize,
    ) -> Result<QueryResult, StoreError> {
        let inner = self.inner.read().await;
        check_dimensions(inner.dimensions, embedding.len())?;
        Ok(rank(
            inner.rows.iter().filter(|(c, _)| {
                c.source_id == source_id
                    && lesson_number.map_or(true, |n| c.lesson_number == Some(n))
            }),
            embedding,
            k,
        ))
    }

    async fn replace_source(
        &self,
        course: &Course,
        pairs: &[(Chunk, Embedding)],
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;

        // validate everything before the first mutation
        let mut dimensions = inner.dimensions;
        for (chunk, embedding) in pairs {
            if chunk.source_id != course.title {
                return Err(StoreError::Malformed(format!(
                    "chunk of '{}' stored under '{}'",
                    chunk.source_id, course.title
                )));
            }
            check_dimensions(dimensions, embedding.len())?;
            dimensions = Some(embedding.len());
        }

        inner.remove_source(&course.title);
        inner.dimensions = dimensions;
        for (chunk, embedding) in pairs {
            inner.push(chunk.clone(), embedding.clone());
        }
        inner.courses.insert(course.title.clone(), course.clone());
        Ok(())
    }

    async fn delete_source(&self, source_id: &str) -> Result<(), StoreError> {
        self.inner.write().await.remove_source(source_id);
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        *self.inner.write().await = Inner::default();
        Ok(())
    }

    async fn register_course(&self, course: &Course) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .courses
            .insert(course.title.clone(), course.clone());
        Ok(())
    }

    async fn courses(&self) -> Result<Vec<Course>, StoreError> {
        Ok(self.inner.read().await.courses.values().cloned().collect())
    }

    async fn chunk_count(&self) -> Result<usize, StoreError> {
        Ok(self.inner.read().await.rows.len())
    }

    fn name(&self) -> &str {
        "memory"
    }
}
