//! Course files on disk.
//!
//! A course document is plain text with an optional header:
//!
//! ```text
//! Course Title: Building Towards Computer Use
//! Course Link: https://example.com/computer-use
//! Course Instructor: Colt Steele
//!
//! Lesson 0: Introduction
//! Lesson Link: https://example.com/computer-use/lesson0
//! ...
//! ```
//!
//! Header lines are lifted into the `Course`; everything else is the body.
//! Lesson markers stay in the body, are recorded as `Lesson`s for the outline
//! tool, and split the body into sections that are chunked separately so
//! every chunk knows its lesson.

use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use syllabus_core::error::IngestionError;
use syllabus_core::models::{Chunk, Course, Lesson};

use crate::chunker::{chunk_text, ChunkPolicy};

const COURSE_EXTENSIONS: &[&str] = &["txt", "md"];

static LESSON_MARKER: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"^Lesson\s+(\d+)\s*:\s*(.*)$") {
        Ok(regex) => regex,
        Err(err) => panic!("Lesson marker regex is invalid: {err}"),
    });

/// Text of one lesson, from its marker line up to the next marker. Text
/// before the first marker has no lesson number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseSection {
    pub lesson_number: Option<u32>,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CourseDocument {
    pub course: Course,
    pub body: String,
    /// Non-empty sections in document order.
    pub sections: Vec<CourseSection>,
}

impl CourseDocument {
    /// Chunks every section on its own. Sequence indices run across the
    /// whole course; each chunk carries its section's lesson number.
    pub fn chunks(&self, policy: ChunkPolicy) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = Vec::new();
        for section in &self.sections {
            let next = chunks.len() as u32;
            chunks.extend(
                chunk_text(&section.text, &self.course.title, policy)
                    .starting_at(next)
                    .in_lesson(section.lesson_number),
            );
        }
        chunks
    }
}

fn push_section(sections: &mut Vec<CourseSection>, lesson_number: Option<u32>, lines: &[&str]) {
    let text = lines.join("\n").trim().to_string();
    if !text.is_empty() {
        sections.push(CourseSection {
            lesson_number,
            text,
        });
    }
}

fn header_value<'a>(line: &'a str, key: &str) -> Option<&'a str> {
    let (k, v) = line.split_once(':')?;
    k.trim().eq_ignore_ascii_case(key).then(|| v.trim())
}

fn non_empty(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}

/// Parses document text; `fallback_title` is used when no `Course Title:` line exists.
pub fn parse_course_document(
    text: &str,
    fallback_title: &str,
    path: &Path,
) -> Result<CourseDocument, IngestionError> {
    let malformed = |reason: String| IngestionError::Malformed {
        path: path.to_path_buf(),
        reason,
    };

    let mut title = None;
    let mut link = None;
    let mut instructor = None;
    let mut lessons: Vec<Lesson> = Vec::new();
    let mut body_lines = Vec::new();
    let mut sections: Vec<CourseSection> = Vec::new();
    let mut section_lines: Vec<&str> = Vec::new();
    let mut seen_lesson = false;

    for line in text.lines() {
        let trimmed = line.trim();

        // header lines only count before the first lesson
        if !seen_lesson {
            if let Some(v) = header_value(trimmed, "Course Title") {
                title = non_empty(v);
                continue;
            }
            if let Some(v) = header_value(trimmed, "Course Link") {
                link = non_empty(v);
                continue;
            }
            if let Some(v) = header_value(trimmed, "Course Instructor") {
                instructor = non_empty(v);
                continue;
            }
        }

        if let Some(caps) = LESSON_MARKER.captures(trimmed) {
            let number: u32 = caps[1]
                .parse()
                .map_err(|_| malformed(format!("lesson number out of range: {}", &caps[1])))?;
            push_section(&mut sections, lessons.last().map(|l| l.number), &section_lines);
            section_lines.clear();
            lessons.push(Lesson {
                number,
                title: caps[2].trim().to_string(),
                link: None,
            });
            seen_lesson = true;
        } else if let Some(v) = header_value(trimmed, "Lesson Link") {
            if let Some(lesson) = lessons.last_mut() {
                if lesson.link.is_none() {
                    lesson.link = non_empty(v);
                }
            }
        }

        body_lines.push(line);
        section_lines.push(line);
    }
    push_section(&mut sections, lessons.last().map(|l| l.number), &section_lines);

    let title = title.unwrap_or_else(|| fallback_title.to_string());
    if title.trim().is_empty() {
        return Err(malformed("course has no title".to_string()));
    }

    let body = body_lines.join("\n").trim().to_string();

    Ok(CourseDocument {
        course: Course {
            title,
            link,
            instructor,
            lessons,
        },
        body,
        sections,
    })
}

/// Reads and parses one course file. Non-UTF-8 content is rejected.
pub fn load_course_document(path: &Path) -> Result<CourseDocument, IngestionError> {
    let bytes = std::fs::read(path).map_err(|source| IngestionError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;
    let text = String::from_utf8(bytes).map_err(|e| IngestionError::Malformed {
        path: path.to_path_buf(),
        reason: format!("not valid UTF-8: {e}"),
    })?;

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default();

    let doc = parse_course_document(&text, &stem, path)?;
    tracing::debug!(
        path = %path.display(),
        course = %doc.course.title,
        lessons = doc.course.lessons.len(),
        "Parsed course document"
    );
    Ok(doc)
}

/// Expands `~` and environment variables; unexpandable input is used as is.
pub fn expand_dir(dir: &str) -> PathBuf {
    shellexpand::full(dir)
        .map(|s| PathBuf::from(s.as_ref()))
        .unwrap_or_else(|_| PathBuf::from(dir))
}

/// Resolves a requested ingest folder against `docs_root`. Relative requests
/// are joined onto the root; the result must canonicalize to the root or a
/// folder below it. `None` means the root itself.
pub fn resolve_docs_dir(docs_root: &str, requested: Option<&str>) -> Result<PathBuf, IngestionError> {
    let root = expand_dir(docs_root);
    let root = root
        .canonicalize()
        .map_err(|source| IngestionError::Unreadable { path: root, source })?;

    let Some(requested) = requested.filter(|r| !r.trim().is_empty()) else {
        return Ok(root);
    };
    let candidate = root.join(expand_dir(requested));
    let outside = || IngestionError::OutsideDocs {
        path: PathBuf::from(requested),
    };

    match candidate.canonicalize() {
        Ok(resolved) if resolved.starts_with(&root) => Ok(resolved),
        Ok(_) => Err(outside()),
        Err(source) => {
            // only report a missing folder when it would have been inside the root
            let escapes = candidate
                .components()
                .any(|c| matches!(c, Component::ParentDir));
            if candidate.starts_with(&root) && !escapes {
                Err(IngestionError::Unreadable {
                    path: candidate,
                    source,
                })
            } else {
                Err(outside())
            }
        }
    }
}

/// `.txt` / `.md` files directly inside `dir`, sorted by file name.
pub fn list_course_files(dir: &Path) -> Result<Vec<PathBuf>, IngestionError> {
    let unreadable = |source: std::io::Error| IngestionError::Unreadable {
        path: dir.to_path_buf(),
        source,
    };

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(unreadable)? {
        let path = entry.map_err(unreadable)?.path();
        let is_course_file = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| COURSE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false);
        if path.is_file() && is_course_file {
            files.push(path);
        }
    }
    files.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(files)
}
