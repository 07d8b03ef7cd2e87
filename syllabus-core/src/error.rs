use std::path::PathBuf;

use thiserror::Error;

use crate::embeddings::EmbeddingError;

/// Failures of the vector store collaborator.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Vector store unavailable: {0}")]
    Unavailable(String),

    #[error("Vector store returned malformed data: {0}")]
    Malformed(String),

    #[error("Embedding dimension mismatch: store holds {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::ColumnNotFound(_)
            | sqlx::Error::Decode(_)
            | sqlx::Error::TypeNotFound { .. } => StoreError::Malformed(err.to_string()),
            other => StoreError::Unavailable(other.to_string()),
        }
    }
}

/// Rejected when a chunk policy is constructed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChunkPolicyError {
    #[error("max_len must be at least 1")]
    ZeroLength,

    #[error("overlap ({overlap}) must be smaller than max_len ({max_len})")]
    OverlapTooLarge { max_len: usize, overlap: usize },
}

/// A course document could not be turned into stored chunks.
#[derive(Error, Debug)]
pub enum IngestionError {
    #[error("Cannot read {path}: {source}")]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed course document {path}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("{path} is outside the course docs folder")]
    OutsideDocs { path: PathBuf },

    #[error("Embedding failed for {source_id} chunk {sequence_index}: {error}")]
    Embedding {
        source_id: String,
        sequence_index: u32,
        #[source]
        error: EmbeddingError,
    },

    #[error("Storing chunks failed: {0}")]
    Store(#[from] StoreError),

    #[error(transparent)]
    Policy(#[from] ChunkPolicyError),
}

/// The online retrieval path failed; no partial result is returned.
#[derive(Error, Debug)]
pub enum RetrievalError {
    #[error("Failed to embed query: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Vector search failed: {0}")]
    Store(#[from] StoreError),
}

/// The hosted model call failed.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    #[error("Model call timed out")]
    Timeout,

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Missing API key")]
    MissingApiKey,

    #[error("Malformed model response: {0}")]
    Malformed(String),

    #[error("No text content in model response")]
    NoText,
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GenerationError::Timeout
        } else {
            GenerationError::Http(err)
        }
    }
}

#[derive(Error, Debug)]
pub enum SyllabusError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ingestion(#[from] IngestionError),

    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Embedding(#[from] EmbeddingError),

    #[error(transparent)]
    ChunkPolicy(#[from] ChunkPolicyError),

    #[error("Other error: {0}")]
    Other(String),
}
