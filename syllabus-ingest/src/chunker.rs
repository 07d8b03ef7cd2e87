//! Fixed-size text splitter.
//!
//! Lengths are counted in `char`s so a chunk never splits a character. With
//! `overlap == 0` the chunks are disjoint and their concatenation is the
//! input. With `overlap > 0` every chunk after the first repeats the last
//! `overlap` characters of its predecessor; `reassemble` strips them again.

use std::iter::FusedIterator;

use syllabus_core::config::ChunkingConfig;
use syllabus_core::error::ChunkPolicyError;
use syllabus_core::models::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPolicy {
    max_len: usize,
    overlap: usize,
}

impl ChunkPolicy {
    pub fn new(max_len: usize, overlap: usize) -> Result<Self, ChunkPolicyError> {
        if max_len == 0 {
            return Err(ChunkPolicyError::ZeroLength);
        }
        if overlap >= max_len {
            return Err(ChunkPolicyError::OverlapTooLarge { max_len, overlap });
        }
        Ok(Self { max_len, overlap })
    }

    pub fn disjoint(max_len: usize) -> Result<Self, ChunkPolicyError> {
        Self::new(max_len, 0)
    }

    pub fn from_config(config: &ChunkingConfig) -> Result<Self, ChunkPolicyError> {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn max_len(&self) -> usize {
        self.max_len
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    fn step(&self) -> usize {
        self.max_len - self.overlap
    }
}

/// Lazy chunk sequence over borrowed text. Cloning restarts from the
/// clone point without re-reading anything.
#[derive(Debug, Clone)]
pub struct Chunks<'a> {
    text: &'a str,
    source_id: &'a str,
    policy: ChunkPolicy,
    // byte offset of the next chunk start
    pos: usize,
    next_index: u32,
    lesson_number: Option<u32>,
}

pub fn chunk_text<'a>(text: &'a str, source_id: &'a str, policy: ChunkPolicy) -> Chunks<'a> {
    Chunks {
        text,
        source_id,
        policy,
        pos: 0,
        next_index: 0,
        lesson_number: None,
    }
}

impl Chunks<'_> {
    /// Numbers chunks from `index` instead of 0.
    pub fn starting_at(mut self, index: u32) -> Self {
        self.next_index = index;
        self
    }

    /// Tags every chunk with `lesson_number`.
    pub fn in_lesson(mut self, lesson_number: Option<u32>) -> Self {
        self.lesson_number = lesson_number;
        self
    }
}

/// Byte offset of the `n`th char of `s`, or `s.len()` if it has fewer.
fn byte_offset(s: &str, n: usize) -> usize {
    s.char_indices().nth(n).map(|(i, _)| i).unwrap_or(s.len())
}

impl Iterator for Chunks<'_> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.pos >= self.text.len() {
            return None;
        }

        let rest = &self.text[self.pos..];
        let end = byte_offset(rest, self.policy.max_len);
        let chunk = Chunk::new(&rest[..end], self.source_id, self.next_index)
            .in_lesson(self.lesson_number);

        self.pos = if end == rest.len() {
            self.text.len()
        } else {
            self.pos + byte_offset(rest, self.policy.step())
        };
        self.next_index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.pos >= self.text.len() {
            return (0, Some(0));
        }
        let remaining = self.text.len() - self.pos;
        // at least one chunk left; at most one per remaining byte
        (1, Some(remaining))
    }
}

impl FusedIterator for Chunks<'_> {}

/// Inverse of chunking: concatenates chunk texts in order, dropping the
/// first `overlap` characters of every chunk after the first.
pub fn reassemble<'c>(chunks: impl IntoIterator<Item = &'c Chunk>, overlap: usize) -> String {
    let mut out = String::new();
    for (i, chunk) in chunks.into_iter().enumerate() {
        if i == 0 {
            out.push_str(&chunk.text);
        } else {
            out.push_str(&chunk.text[byte_offset(&chunk.text, overlap)..]);
        }
    }
    out
}
