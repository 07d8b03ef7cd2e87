//! Deterministic collaborators for server tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use syllabus_core::embeddings::{EmbeddingBackend, EmbeddingError};
use syllabus_core::error::{GenerationError, StoreError};
use syllabus_core::generator::{GenerationRequest, Generator};
use syllabus_core::models::{Chunk, Course, Embedding, QueryResult, Turn};
use syllabus_core::session::InMemorySessionStore;
use syllabus_core::vector_store::{MemoryVectorStore, VectorStore};
use syllabus_core::SyllabusConfig;
use syllabus_server::subsystems::answer::RagSystem;

pub const DIMS: usize = 16;

/// Bag-of-words hashed into `DIMS` buckets, plus a bias so no vector is zero.
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    /// Fail every call whose text contains this marker.
    pub fail_on: Option<String>,
}

impl HashEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: None,
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: Some(marker.to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; DIMS];
    v[0] = 0.1;
    for word in text.split_whitespace() {
        let word = word.to_lowercase();
        let bucket = word.bytes().map(|b| b as usize).sum::<usize>() % DIMS;
        v[bucket] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingBackend for HashEmbedder {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(marker) = &self.fail_on {
            if text.contains(marker.as_str()) {
                return Err(EmbeddingError::Api {
                    code: 503,
                    message: "embedding service down".to_string(),
                });
            }
        }
        Ok(hash_embed(text))
    }

    fn dimensions(&self) -> usize {
        DIMS
    }

    fn name(&self) -> &str {
        "hash"
    }
}

/// Every call fails as if the database were down.
pub struct DownStore;

fn down() -> StoreError {
    StoreError::Unavailable("connection refused (os error 111)".to_string())
}

#[async_trait]
impl VectorStore for DownStore {
    async fn upsert(&self, _: &Chunk, _: &Embedding) -> Result<(), StoreError> {
        Err(down())
    }
    async fn query(&self, _: &Embedding, _: usize) -> Result<QueryResult, StoreError> {
        Err(down())
    }
    async fn query_source(
        &self,
        _: &Embedding,
        _: &str,
        _: Option<u32>,
        _: usize,
    ) -> Result<QueryResult, StoreError> {
        Err(down())
    }
    async fn replace_source(&self, _: &Course, _: &[(Chunk, Embedding)]) -> Result<(), StoreError> {
        Err(down())
    }
    async fn delete_source(&self, _: &str) -> Result<(), StoreError> {
        Err(down())
    }
    async fn clear(&self) -> Result<(), StoreError> {
        Err(down())
    }
    async fn register_course(&self, _: &Course) -> Result<(), StoreError> {
        Err(down())
    }
    async fn courses(&self) -> Result<Vec<Course>, StoreError> {
        Err(down())
    }
    async fn chunk_count(&self) -> Result<usize, StoreError> {
        Err(down())
    }
    fn name(&self) -> &str {
        "down"
    }
}

/// Store that turns unavailable once `healthy_writes` writes have gone
/// through. Every write goes through `replace_source`, so a failing write
/// must leave the wrapped store untouched.
pub struct FlakyStore {
    pub inner: MemoryVectorStore,
    pub healthy_writes: usize,
    pub writes: AtomicUsize,
}

impl FlakyStore {
    pub fn failing_after(healthy_writes: usize) -> Self {
        Self {
            inner: MemoryVectorStore::new(),
            healthy_writes,
            writes: AtomicUsize::new(0),
        }
    }

    fn write(&self) -> Result<(), StoreError> {
        if self.writes.fetch_add(1, Ordering::SeqCst) >= self.healthy_writes {
            return Err(StoreError::Unavailable("down".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStore for FlakyStore {
    async fn upsert(&self, chunk: &Chunk, embedding: &Embedding) -> Result<(), StoreError> {
        self.write()?;
        self.inner.upsert(chunk, embedding).await
    }
    async fn query(&self, embedding: &Embedding, k: usize) -> Result<QueryResult, StoreError> {
        self.inner.query(embedding, k).await
    }
    async fn query_source(
        &self,
        embedding: &Embedding,
        source_id: &str,
        lesson_number: Option<u32>,
        k: usize,
    ) -> Result<QueryResult, StoreError> {
        self.inner.query_source(embedding, source_id, lesson_number, k).await
    }
    async fn replace_source(
        &self,
        course: &Course,
        pairs: &[(Chunk, Embedding)],
    ) -> Result<(), StoreError> {
        self.write()?;
        self.inner.replace_source(course, pairs).await
    }
    async fn delete_source(&self, source_id: &str) -> Result<(), StoreError> {
        self.write()?;
        self.inner.delete_source(source_id).await
    }
    async fn clear(&self) -> Result<(), StoreError> {
        self.write()?;
        self.inner.clear().await
    }
    async fn register_course(&self, course: &Course) -> Result<(), StoreError> {
        self.write()?;
        self.inner.register_course(course).await
    }
    async fn courses(&self) -> Result<Vec<Course>, StoreError> {
        self.inner.courses().await
    }
    async fn chunk_count(&self) -> Result<usize, StoreError> {
        self.inner.chunk_count().await
    }
    fn name(&self) -> &str {
        "flaky"
    }
}

/// What the generator was asked.
#[derive(Debug, Clone)]
pub struct SeenRequest {
    pub query: String,
    pub context_sources: Vec<String>,
    pub history: Vec<Turn>,
    pub had_tools: bool,
    pub tool_output: Option<String>,
}

/// Answers "answer: <query>". Optionally calls one tool first and returns its output.
pub struct ScriptedGenerator {
    pub seen: Mutex<Vec<SeenRequest>>,
    pub tool_call: Option<(String, Value)>,
    pub fail: bool,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            tool_call: None,
            fail: false,
        }
    }

    pub fn calling_tool(name: &str, input: Value) -> Self {
        Self {
            tool_call: Some((name.to_string(), input)),
            ..Self::new()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, request: GenerationRequest<'_>) -> Result<String, GenerationError> {
        let mut tool_output = None;
        if let (Some((name, input)), Some(tools)) = (&self.tool_call, request.tools) {
            tool_output = Some(match tools.execute(name, input).await {
                Ok(out) => out,
                Err(e) => format!("Error executing tool: {e}"),
            });
        }

        self.seen.lock().unwrap().push(SeenRequest {
            query: request.query.to_string(),
            context_sources: request
                .context
                .iter()
                .map(|s| s.chunk.source_id.clone())
                .collect(),
            history: request.history.to_vec(),
            had_tools: request.tools.is_some(),
            tool_output: tool_output.clone(),
        });

        if self.fail {
            return Err(GenerationError::Api {
                status: 401,
                message: "invalid x-api-key sk-secret".to_string(),
            });
        }
        Ok(tool_output.unwrap_or_else(|| format!("answer: {}", request.query)))
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

pub const RUST_COURSE: &str = "Course Title: Rust Fundamentals
Course Link: https://example.com/rust
Course Instructor: Ferris

Lesson 0: Ownership
Lesson Link: https://example.com/rust/0
Every value in Rust has a single owner. When the owner goes out of scope the value is dropped.

Lesson 1: Borrowing
References borrow values without taking ownership. The borrow checker enforces the rules.
";

pub const MCP_COURSE: &str = "Course Title: MCP: Build Rich-Context AI Apps
Course Link: https://example.com/mcp

Lesson 1: Servers
An MCP server exposes tools resources and prompts to a client application.

Lesson 2: Clients
The client connects to servers and forwards tool calls from the model.
";

pub fn test_config() -> SyllabusConfig {
    let mut config = SyllabusConfig::default();
    config.chunking.chunk_size = 120;
    config.retrieval.max_results = 3;
    config
}

pub fn write_courses(dir: &std::path::Path) {
    std::fs::write(dir.join("course1_rust.txt"), RUST_COURSE).unwrap();
    std::fs::write(dir.join("course2_mcp.txt"), MCP_COURSE).unwrap();
}

pub struct Harness {
    pub rag: Arc<RagSystem>,
    pub store: Arc<MemoryVectorStore>,
    pub embedder: Arc<HashEmbedder>,
    pub generator: Arc<ScriptedGenerator>,
    pub sessions: Arc<InMemorySessionStore>,
}

pub fn harness_with(generator: ScriptedGenerator, config: &SyllabusConfig) -> Harness {
    let store = Arc::new(MemoryVectorStore::new());
    let embedder = Arc::new(HashEmbedder::new());
    let generator = Arc::new(generator);
    let sessions = Arc::new(InMemorySessionStore::new());
    let rag = RagSystem::new(
        embedder.clone(),
        store.clone(),
        generator.clone(),
        sessions.clone(),
        config,
    )
    .unwrap();
    Harness {
        rag: Arc::new(rag),
        store,
        embedder,
        generator,
        sessions,
    }
}

pub fn harness() -> Harness {
    harness_with(ScriptedGenerator::new(), &test_config())
}

/// Harness with both sample courses already ingested.
pub async fn ingested_harness(generator: ScriptedGenerator) -> Harness {
    let h = harness_with(generator, &test_config());
    let dir = tempfile::tempdir().unwrap();
    write_courses(dir.path());
    h.rag
        .ingest_folder(Some(dir.path().to_str().unwrap()), false)
        .await
        .unwrap();
    h
}
