//! Ingestion subsystem - course files → (chunk, embedding) pairs in the store
//!
//! Every chunk of a course is embedded before anything is written, and the
//! write itself is a single `replace_source`, so a course is either stored
//! completely or left as it was. Documents that cannot be read or parsed are
//! skipped in folder mode and reported.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use syllabus_core::embeddings::EmbeddingBackend;
use syllabus_core::error::IngestionError;
use syllabus_core::models::Chunk;
use syllabus_core::vector_store::VectorStore;
use syllabus_ingest::{list_course_files, load_course_document, ChunkPolicy, CourseDocument};

/// Outcome of an ingestion run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IngestReport {
    pub courses_added: usize,
    pub chunks_added: usize,
    /// Courses already in the store and left untouched.
    pub skipped: usize,
    /// Files that could not be read or parsed.
    pub failed: Vec<String>,
}

#[derive(Clone)]
pub struct Ingestor {
    embedder: Arc<dyn EmbeddingBackend>,
    store: Arc<dyn VectorStore>,
    policy: ChunkPolicy,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn EmbeddingBackend>,
        store: Arc<dyn VectorStore>,
        policy: ChunkPolicy,
    ) -> Self {
        Self {
            embedder,
            store,
            policy,
        }
    }

    /// Chunks, embeds and stores one parsed document, replacing whatever the
    /// store held for that course. Returns the number of chunks written.
    pub async fn ingest_document(&self, doc: &CourseDocument) -> Result<usize, IngestionError> {
        let source_id = doc.course.title.as_str();

        let mut pairs: Vec<(Chunk, Vec<f32>)> = Vec::new();
        for chunk in doc.chunks(self.policy) {
            let embedding = self.embedder.embed(&chunk.text).await.map_err(|error| {
                IngestionError::Embedding {
                    source_id: source_id.to_string(),
                    sequence_index: chunk.sequence_index,
                    error,
                }
            })?;
            pairs.push((chunk, embedding));
        }

        self.store.replace_source(&doc.course, &pairs).await?;

        tracing::info!(
            course = %source_id,
            chunks = pairs.len(),
            lessons = doc.course.lessons.len(),
            "Ingested course"
        );
        Ok(pairs.len())
    }

    /// Loads a single course file and replaces its chunks.
    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport, IngestionError> {
        let doc = load_course_document(path)?;
        let chunks_added = self.ingest_document(&doc).await?;
        Ok(IngestReport {
            courses_added: 1,
            chunks_added,
            ..Default::default()
        })
    }

    /// Ingests every course file in `dir`. Courses already registered are
    /// skipped unless `clear_existing`, which empties the store first.
    pub async fn ingest_folder(
        &self,
        dir: &Path,
        clear_existing: bool,
    ) -> Result<IngestReport, IngestionError> {
        if clear_existing {
            tracing::info!("Clearing existing course data");
            self.store.clear().await?;
        }

        let files = list_course_files(dir)?;
        let mut known: HashSet<String> = self
            .store
            .courses()
            .await?
            .into_iter()
            .map(|c| c.title)
            .collect();

        let mut report = IngestReport::default();
        for path in files {
            let doc = match load_course_document(&path) {
                Ok(doc) => doc,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Skipping course file");
                    report.failed.push(path.display().to_string());
                    continue;
                }
            };

            if known.contains(&doc.course.title) {
                tracing::debug!(course = %doc.course.title, "Course already ingested");
                report.skipped += 1;
                continue;
            }

            report.chunks_added += self.ingest_document(&doc).await?;
            report.courses_added += 1;
            known.insert(doc.course.title);
        }

        tracing::info!(
            dir = %dir.display(),
            courses_added = report.courses_added,
            chunks_added = report.chunks_added,
            skipped = report.skipped,
            failed = report.failed.len(),
            "Folder ingestion finished"
        );
        Ok(report)
    }
}
