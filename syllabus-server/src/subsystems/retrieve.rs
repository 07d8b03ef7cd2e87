//! Retrieval subsystem - query text → top-k course chunks
//!
//! - Embeds the query with the configured backend (`embed_query`)
//! - Asks the vector store for the `k` nearest chunks
//! - Returns them most similar first; equal scores keep insertion order
//!
//! Embedding and store failures are surfaced as `RetrievalError`. There is no
//! retry and no partial result.

use std::sync::Arc;

use syllabus_core::embeddings::EmbeddingBackend;
use syllabus_core::error::RetrievalError;
use syllabus_core::models::QueryResult;
use syllabus_core::vector_store::VectorStore;

#[derive(Clone)]
pub struct Retriever {
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn VectorStore>,
}

impl Retriever {
    pub fn new(embedder: Arc<dyn EmbeddingBackend>, store: Arc<dyn VectorStore>) -> Self {
        Self { embedder, store }
    }

    /// At most `k` chunks across all courses. `k == 0` returns an empty
    /// result without calling the embedder or the store.
    pub async fn retrieve(&self, query: &str, k: usize) -> Result<QueryResult, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed_query(query).await?;
        let mut results = self.store.query(&embedding, k).await?;
        results.truncate(k);

        tracing::debug!(
            k,
            returned = results.len(),
            store = self.store.name(),
            "Retrieved chunks"
        );
        Ok(results)
    }

    /// Same as `retrieve`, restricted to one course and optionally one lesson.
    pub async fn retrieve_from(
        &self,
        query: &str,
        source_id: &str,
        lesson_number: Option<u32>,
        k: usize,
    ) -> Result<QueryResult, RetrievalError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let embedding = self.embedder.embed_query(query).await?;
        let mut results = self
            .store
            .query_source(&embedding, source_id, lesson_number, k).await?;
        results.truncate(k);
        Ok(results)
    }
}
