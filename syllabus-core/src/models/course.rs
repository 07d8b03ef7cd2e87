use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lesson {
    pub number: u32,
    pub title: String,
    pub link: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Course {
    pub title: String,
    pub link: Option<String>,
    pub instructor: Option<String>,
    #[serde(default)]
    pub lessons: Vec<Lesson>,
}

impl Course {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            link: None,
            instructor: None,
            lessons: Vec::new(),
        }
    }

    /// Case-insensitive substring match used by the course tools.
    pub fn matches_name(&self, name: &str) -> bool {
        let needle = name.trim().to_lowercase();
        !needle.is_empty() && self.title.to_lowercase().contains(&needle)
    }

    pub fn lesson(&self, number: u32) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.number == number)
    }

    /// Lesson link when the lesson has one, the course link otherwise.
    pub fn link_for(&self, lesson_number: Option<u32>) -> Option<String> {
        lesson_number
            .and_then(|n| self.lesson(n))
            .and_then(|l| l.link.clone())
            .or_else(|| self.link.clone())
    }

    /// Title, link and the numbered lesson list.
    pub fn outline(&self) -> String {
        let mut out = format!("Course: {}\n", self.title);
        if let Some(link) = &self.link {
            out.push_str(&format!("Link: {}\n", link));
        }
        if let Some(instructor) = &self.instructor {
            out.push_str(&format!("Instructor: {}\n", instructor));
        }
        if self.lessons.is_empty() {
            out.push_str("No lessons listed.");
        } else {
            out.push_str("Lessons:");
            for lesson in &self.lessons {
                out.push_str(&format!("\n{}. {}", lesson.number, lesson.title));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_name_is_case_insensitive_substring() {
        let course = Course::new("Building Towards Computer Use");
        assert!(course.matches_name("computer use"));
        assert!(course.matches_name("BUILDING"));
        assert!(!course.matches_name("databases"));
        assert!(!course.matches_name("   "));
    }

    #[test]
    fn test_outline_lists_lessons_in_order() {
        let mut course = Course::new("Python 101");
        course.link = Some("https://example.com/python".to_string());
        course.lessons = vec![
            Lesson { number: 0, title: "Introduction".into(), link: None },
            Lesson { number: 1, title: "Variables".into(), link: None },
        ];

        let outline = course.outline();
        assert!(outline.starts_with("Course: Python 101\nLink: https://example.com/python"));
        assert!(outline.ends_with("Lessons:\n0. Introduction\n1. Variables"));
    }

    #[test]
    fn test_link_for_prefers_lesson_link() {
        let mut course = Course::new("MCP");
        course.link = Some("https://example.com/mcp".to_string());
        course.lessons = vec![
            Lesson { number: 1, title: "Hosts".into(), link: Some("https://example.com/mcp/1".into()) },
            Lesson { number: 2, title: "Clients".into(), link: None },
        ];

        assert_eq!(course.link_for(Some(1)).as_deref(), Some("https://example.com/mcp/1"));
        assert_eq!(course.link_for(Some(2)).as_deref(), Some("https://example.com/mcp"));
        assert_eq!(course.link_for(Some(9)).as_deref(), Some("https://example.com/mcp"));
        assert_eq!(course.link_for(None).as_deref(), Some("https://example.com/mcp"));
    }

    #[test]
    fn test_outline_without_lessons() {
        let outline = Course::new("Empty").outline();
        assert!(outline.contains("No lessons listed."));
    }
}
