use serde::{Deserialize, Serialize};

/// Fixed-length vector produced by the embedding backend for one chunk.
pub type Embedding = Vec<f32>;

/// A bounded-length segment of course text with its position in the source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub text: String,
    /// Course title the chunk was cut from.
    pub source_id: String,
    pub sequence_index: u32,
    /// Lesson the text belongs to; `None` for text before the first lesson.
    #[serde(default)]
    pub lesson_number: Option<u32>,
}

impl Chunk {
    pub fn new(text: impl Into<String>, source_id: impl Into<String>, sequence_index: u32) -> Self {
        Self {
            text: text.into(),
            source_id: source_id.into(),
            sequence_index,
            lesson_number: None,
        }
    }

    pub fn in_lesson(mut self, lesson_number: Option<u32>) -> Self {
        self.lesson_number = lesson_number;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub chunk: Chunk,
    /// Cosine similarity, higher is closer.
    pub score: f32,
}

/// Most similar first.
pub type QueryResult = Vec<ScoredChunk>;
