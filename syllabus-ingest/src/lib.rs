//! Offline half of the pipeline: course files on disk → chunks ready to embed.

pub mod chunker;
pub mod document;

pub use chunker::{chunk_text, reassemble, ChunkPolicy, Chunks};
pub use document::{
    expand_dir, list_course_files, load_course_document, parse_course_document, resolve_docs_dir,
    CourseDocument, CourseSection,
};
