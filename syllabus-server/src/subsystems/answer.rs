//! Online query path and the course tools offered to the model.
//!
//! `RagSystem::query` runs retrieve → generate sequentially, reading the
//! session history before the model call and appending the new exchange
//! after it. All collaborators are injected as trait objects.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use syllabus_core::config::SyllabusConfig;
use syllabus_core::embeddings::EmbeddingBackend;
use syllabus_core::error::{ChunkPolicyError, IngestionError};
use syllabus_core::generator::{GenerationRequest, Generator, ToolDefinition, ToolExecutor};
use syllabus_core::models::{Chunk, Course, ScoredChunk, Turn};
use syllabus_core::session::SessionStore;
use syllabus_core::vector_store::VectorStore;
use syllabus_ingest::{expand_dir, resolve_docs_dir, ChunkPolicy};

use super::ingest::{IngestReport, Ingestor};
use super::retrieve::Retriever;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Source {
    pub text: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub answer: String,
    pub sources: Vec<Source>,
    pub session_id: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct CourseAnalytics {
    pub total_courses: usize,
    pub course_titles: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RagSettings {
    pub max_results: usize,
    pub max_history: usize,
    pub tools_enabled: bool,
    pub docs_path: String,
}

impl From<&SyllabusConfig> for RagSettings {
    fn from(config: &SyllabusConfig) -> Self {
        Self {
            max_results: config.retrieval.max_results as usize,
            max_history: config.session.max_history,
            tools_enabled: config.generation.tools_enabled,
            docs_path: config.ingest.docs_path.clone(),
        }
    }
}

pub struct RagSystem {
    retriever: Retriever,
    ingestor: Ingestor,
    generator: Arc<dyn Generator>,
    sessions: Arc<dyn SessionStore>,
    store: Arc<dyn VectorStore>,
    settings: RagSettings,
}

impl RagSystem {
    pub fn new(
        embedder: Arc<dyn EmbeddingBackend>,
        store: Arc<dyn VectorStore>,
        generator: Arc<dyn Generator>,
        sessions: Arc<dyn SessionStore>,
        config: &SyllabusConfig,
    ) -> Result<Self, ChunkPolicyError> {
        let policy = ChunkPolicy::from_config(&config.chunking)?;
        Ok(Self {
            retriever: Retriever::new(Arc::clone(&embedder), Arc::clone(&store)),
            ingestor: Ingestor::new(embedder, Arc::clone(&store), policy),
            generator,
            sessions,
            store,
            settings: RagSettings::from(config),
        })
    }

    pub fn settings(&self) -> &RagSettings {
        &self.settings
    }

    pub fn store(&self) -> &dyn VectorStore {
        self.store.as_ref()
    }

    pub fn sessions(&self) -> &dyn SessionStore {
        self.sessions.as_ref()
    }

    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answers `query`, creating a session when none is given.
    pub async fn query(&self, query: &str, session_id: Option<&str>) -> Result<Answer> {
        let session_id = match session_id {
            Some(id) => id.to_string(),
            None => self.sessions.create_session().await,
        };

        let history: Vec<Turn> = self
            .sessions
            .get(&session_id)
            .await
            .map(|s| s.recent(self.settings.max_history).to_vec())
            .unwrap_or_default();

        let context = self
            .retriever
            .retrieve(query, self.settings.max_results)
            .await?;

        let courses = self.store.courses().await?;
        let tools = CourseTools::new(self.retriever.clone(), courses.clone(), self.settings.max_results);

        let answer = self
            .generator
            .generate(GenerationRequest {
                query,
                context: &context,
                history: &history,
                tools: self
                    .settings
                    .tools_enabled
                    .then_some(&tools as &dyn ToolExecutor),
            })
            .await?;

        self.sessions
            .append(&session_id, vec![Turn::user(query), Turn::assistant(answer.clone())])
            .await;

        let mut sources = sources_for(&context, &courses);
        for source in tools.take_sources() {
            if !sources.contains(&source) {
                sources.push(source);
            }
        }

        tracing::info!(
            session_id = %session_id,
            context = context.len(),
            sources = sources.len(),
            generator = self.generator.name(),
            "Answered query"
        );

        Ok(Answer {
            answer,
            sources,
            session_id,
        })
    }

    pub async fn course_analytics(&self) -> Result<CourseAnalytics> {
        let courses = self.store.courses().await?;
        Ok(CourseAnalytics {
            total_courses: courses.len(),
            course_titles: courses.into_iter().map(|c| c.title).collect(),
        })
    }

    /// Ingests `dir`, or the configured docs folder when `None`. The path
    /// is trusted; requests from clients go through `ingest_docs`.
    pub async fn ingest_folder(
        &self,
        dir: Option<&str>,
        clear_existing: bool,
    ) -> Result<IngestReport, IngestionError> {
        let dir = expand_dir(dir.unwrap_or(&self.settings.docs_path));
        self.ingestor.ingest_folder(&dir, clear_existing).await
    }

    /// Where a client-requested folder lives, confined to the docs folder.
    pub fn resolve_docs_path(&self, requested: Option<&str>) -> Result<PathBuf, IngestionError> {
        resolve_docs_dir(&self.settings.docs_path, requested)
    }

    /// Ingests a folder named by a client. Paths that leave the docs folder
    /// are refused with `IngestionError::OutsideDocs`.
    pub async fn ingest_docs(
        &self,
        requested: Option<&str>,
        clear_existing: bool,
    ) -> Result<IngestReport, IngestionError> {
        let dir = self.resolve_docs_path(requested)?;
        self.ingestor.ingest_folder(&dir, clear_existing).await
    }

    pub async fn ingest_file(&self, path: &Path) -> Result<IngestReport, IngestionError> {
        self.ingestor.ingest_file(path).await
    }
}

/// "<course> - Lesson N", or the bare course title for text outside a lesson.
fn source_label(chunk: &Chunk) -> String {
    match chunk.lesson_number {
        Some(n) => format!("{} - Lesson {}", chunk.source_id, n),
        None => chunk.source_id.clone(),
    }
}

/// One source per course lesson, in retrieval order. Links point at the
/// lesson when it has one and at the course otherwise.
fn sources_for(context: &[ScoredChunk], courses: &[Course]) -> Vec<Source> {
    let mut sources: Vec<Source> = Vec::new();
    for scored in context {
        let text = source_label(&scored.chunk);
        if sources.iter().any(|s| s.text == text) {
            continue;
        }
        let link = courses
            .iter()
            .find(|c| c.title == scored.chunk.source_id)
            .and_then(|c| c.link_for(scored.chunk.lesson_number));
        sources.push(Source { text, link });
    }
    sources
}

// ============================================================================
// Course tools
// ============================================================================

pub const SEARCH_TOOL: &str = "search_course_content";
pub const OUTLINE_TOOL: &str = "get_course_outline";

/// Tools for a single query. Search results are remembered as sources.
pub struct CourseTools {
    retriever: Retriever,
    courses: Vec<Course>,
    max_results: usize,
    sources: Mutex<Vec<Source>>,
}

impl CourseTools {
    pub fn new(retriever: Retriever, courses: Vec<Course>, max_results: usize) -> Self {
        Self {
            retriever,
            courses,
            max_results,
            sources: Mutex::new(Vec::new()),
        }
    }

    pub fn take_sources(&self) -> Vec<Source> {
        self.sources
            .lock()
            .map(|mut s| std::mem::take(&mut *s))
            .unwrap_or_default()
    }

    fn find_course(&self, name: &str) -> Option<&Course> {
        self.courses.iter().find(|c| c.matches_name(name))
    }

    async fn search(&self, input: &Value) -> Result<String> {
        let query = input["query"]
            .as_str()
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| anyhow::anyhow!("Missing 'query'"))?;
        let course_name = input["course_name"].as_str().filter(|n| !n.trim().is_empty());
        let lesson_number = match input.get("lesson_number").filter(|v| !v.is_null()) {
            Some(value) => Some(
                value
                    .as_u64()
                    .and_then(|n| u32::try_from(n).ok())
                    .ok_or_else(|| anyhow::anyhow!("'lesson_number' must be a non-negative integer"))?,
            ),
            None => None,
        };

        let (results, course) = match course_name {
            Some(name) => {
                let Some(course) = self.find_course(name) else {
                    return Ok(format!("No course found matching '{name}'"));
                };
                let results = self
                    .retriever
                    .retrieve_from(query, &course.title, lesson_number, self.max_results)
                    .await?;
                (results, Some(course))
            }
            None if lesson_number.is_some() => {
                return Err(anyhow::anyhow!("'lesson_number' requires 'course_name'"));
            }
            None => (self.retriever.retrieve(query, self.max_results).await?, None),
        };

        if results.is_empty() {
            return Ok(match (course, lesson_number) {
                (Some(c), Some(n)) => {
                    format!("No relevant content found in course '{}' lesson {}.", c.title, n)
                }
                (Some(c), None) => format!("No relevant content found in course '{}'.", c.title),
                _ => "No relevant content found.".to_string(),
            });
        }

        let found = sources_for(&results, &self.courses);
        if let Ok(mut sources) = self.sources.lock() {
            for source in found {
                if !sources.contains(&source) {
                    sources.push(source);
                }
            }
        }

        Ok(results
            .iter()
            .map(|r| format!("[{}]\n{}", source_label(&r.chunk), r.chunk.text))
            .collect::<Vec<_>>()
            .join("\n\n"))
    }

    fn outline(&self, input: &Value) -> Result<String> {
        let name = input["course_name"]
            .as_str()
            .ok_or_else(|| anyhow::anyhow!("Missing 'course_name'"))?;
        Ok(match self.find_course(name) {
            Some(course) => course.outline(),
            None => format!("No course found matching '{name}'"),
        })
    }
}

#[async_trait]
impl ToolExecutor for CourseTools {
    fn definitions(&self) -> Vec<ToolDefinition> {
        vec![
            ToolDefinition {
                name: SEARCH_TOOL.to_string(),
                description: "Search course materials, optionally within one course or lesson"
                    .to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "query": {
                            "type": "string",
                            "description": "What to search for in the course content"
                        },
                        "course_name": {
                            "type": "string",
                            "description": "Course title; partial matches work (e.g. 'MCP', 'Computer Use')"
                        },
                        "lesson_number": {
                            "type": "integer",
                            "description": "Lesson number within the course (e.g. 1, 2, 3); needs course_name"
                        }
                    },
                    "required": ["query"]
                }),
            },
            ToolDefinition {
                name: OUTLINE_TOOL.to_string(),
                description: "Get a course's title, link and complete lesson list".to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": {
                        "course_name": {
                            "type": "string",
                            "description": "Course title; partial matches work"
                        }
                    },
                    "required": ["course_name"]
                }),
            },
        ]
    }

    async fn execute(&self, name: &str, input: &Value) -> Result<String> {
        tracing::debug!(tool = %name, "Executing course tool");
        match name {
            SEARCH_TOOL => self.search(input).await,
            OUTLINE_TOOL => self.outline(input),
            other => Err(anyhow::anyhow!("Unknown tool '{other}'")),
        }
    }
}
