pub mod config;
pub mod db;
pub mod embeddings;
pub mod error;
pub mod generator;
pub mod models;
pub mod onnx_embedder;
pub mod protocol;
pub mod session;
pub mod vector_store;

pub use config::SyllabusConfig;
pub use embeddings::{
    backend_from_settings, create_backend, BackendConfig, EmbeddingBackend, EmbeddingError,
    GeminiConfig, GeminiEmbeddingClient, OnnxConfig, GEMINI_DIMENSIONS, ONNX_DIMENSIONS,
};
pub use error::{
    ChunkPolicyError, GenerationError, IngestionError, RetrievalError, StoreError, SyllabusError,
};
pub use generator::{
    AnthropicConfig, AnthropicGenerator, GenerationRequest, Generator, ToolDefinition,
    ToolExecutor,
};
pub use onnx_embedder::OnnxEmbeddingClient;
pub use session::{InMemorySessionStore, SessionStore};
pub use vector_store::{MemoryVectorStore, PgVectorStore, VectorStore};
