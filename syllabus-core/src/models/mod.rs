pub mod chunk;
pub mod course;
pub mod session;

pub use chunk::{Chunk, Embedding, QueryResult, ScoredChunk};
pub use course::{Course, Lesson};
pub use session::{Role, Session, Turn};
