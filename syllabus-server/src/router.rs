use serde_json::json;
use syllabus_core::error::IngestionError;
use syllabus_core::protocol::{SyllabusRequest, SyllabusResponse};

use crate::subsystems::answer::RagSystem;

pub const QUERY_FAILED: &str = "Failed to answer the question";
pub const INGEST_FAILED: &str = "Failed to ingest course materials";
pub const COURSES_FAILED: &str = "Failed to list courses";
pub const STORE_UNAVAILABLE: &str = "Vector store unavailable";
pub const PATH_OUTSIDE_DOCS: &str = "Ingest path must be inside the course docs folder";

/// Dispatches a request. Internal errors are logged and replaced by a
/// generic message in the response.
pub async fn handle_request(request: SyllabusRequest, rag: &RagSystem) -> SyllabusResponse {
    match request {
        SyllabusRequest::Health => {
            let store = rag.store();
            match store.chunk_count().await {
                Ok(chunks) => SyllabusResponse::ok(json!({
                    "status": "healthy",
                    "vector_store": store.name(),
                    "chunks": chunks,
                })),
                Err(e) => {
                    tracing::error!(error = %e, "Health check failed");
                    SyllabusResponse::err(STORE_UNAVAILABLE)
                }
            }
        }
        SyllabusRequest::Ask { query, session_id } => {
            match rag.query(&query, session_id.as_deref()).await {
                Ok(answer) => SyllabusResponse::ok(json!(answer)),
                Err(e) => {
                    tracing::error!(error = %e, "Query failed");
                    SyllabusResponse::err(QUERY_FAILED)
                }
            }
        }
        SyllabusRequest::Ingest {
            path,
            clear_existing,
        } => match rag.ingest_docs(path.as_deref(), clear_existing).await {
            Ok(report) => SyllabusResponse::ok(json!(report)),
            Err(e @ IngestionError::OutsideDocs { .. }) => {
                tracing::warn!(error = %e, "Refused ingest path");
                SyllabusResponse::err(PATH_OUTSIDE_DOCS)
            }
            Err(e) => {
                tracing::error!(error = %e, "Ingestion failed");
                SyllabusResponse::err(INGEST_FAILED)
            }
        },
        SyllabusRequest::Courses => match rag.course_analytics().await {
            Ok(analytics) => SyllabusResponse::ok(json!(analytics)),
            Err(e) => {
                tracing::error!(error = %e, "Course listing failed");
                SyllabusResponse::err(COURSES_FAILED)
            }
        },
        SyllabusRequest::ClearSession { session_id } => {
            if let Some(id) = session_id.as_deref() {
                rag.sessions().clear(id).await;
            }
            let new_id = rag.sessions().create_session().await;
            SyllabusResponse::ok(json!({ "session_id": new_id }))
        }
    }
}
