use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn label(&self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub message: String,
}

impl Turn {
    pub fn user(message: impl Into<String>) -> Self {
        Self { role: Role::User, message: message.into() }
    }

    pub fn assistant(message: impl Into<String>) -> Self {
        Self { role: Role::Assistant, message: message.into() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub started_at: DateTime<Utc>,
    pub last_active_at: DateTime<Utc>,
    pub turns: Vec<Turn>,
}

impl Session {
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            started_at: now,
            last_active_at: now,
            turns: Vec::new(),
        }
    }

    /// The last `max_exchanges` user/assistant pairs, oldest first.
    pub fn recent(&self, max_exchanges: usize) -> &[Turn] {
        let keep = max_exchanges.saturating_mul(2);
        let start = self.turns.len().saturating_sub(keep);
        &self.turns[start..]
    }
}

/// Renders turns as `User: ...` / `Assistant: ...` lines.
pub fn format_history(turns: &[Turn]) -> String {
    turns
        .iter()
        .map(|t| format!("{}: {}", t.role.label(), t.message))
        .collect::<Vec<_>>()
        .join("\n")
}
