//! Session store - append-only conversation log per session id.
//!
//! Logs are never trimmed; callers pick a window with `Session::recent`.
//! Nothing survives a process restart. Appends to one session are atomic,
//! but concurrent requests on the same id have no ordering guarantee.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Session, Turn};

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Creates an empty session and returns its id.
    async fn create_session(&self) -> String;

    /// Snapshot of a session, `None` when unknown.
    async fn get(&self, session_id: &str) -> Option<Session>;

    /// Appends turns in order, creating the session if it does not exist yet.
    async fn append(&self, session_id: &str, turns: Vec<Turn>);

    /// Removes the session. Unknown ids are ignored.
    async fn clear(&self, session_id: &str);
}

#[derive(Default)]
pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait]
impl SessionStore for InMemorySessionStore {
    async fn create_session(&self) -> String {
        let id = format!("session_{}", Uuid::new_v4().simple());
        self.sessions
            .write()
            .await
            .insert(id.clone(), Session::new(id.clone()));
        tracing::debug!(session_id = %id, "Created session");
        id
    }

    async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    async fn append(&self, session_id: &str, turns: Vec<Turn>) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id));
        session.turns.extend(turns);
        session.last_active_at = Utc::now();
    }

    async fn clear(&self, session_id: &str) {
        if self.sessions.write().await.remove(session_id).is_some() {
            tracing::debug!(session_id = %session_id, "Cleared session");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_create_returns_distinct_ids() {
        let store = InMemorySessionStore::new();
        let a = store.create_session().await;
        let b = store.create_session().await;
        assert_ne!(a, b);
        assert!(a.starts_with("session_"));
        assert_eq!(store.len().await, 2);
        assert!(store.get(&a).await.unwrap().turns.is_empty());
    }

    #[tokio::test]
    async fn test_append_is_ordered_and_unbounded() {
        let store = InMemorySessionStore::new();
        let id = store.create_session().await;
        for i in 0..50 {
            store
                .append(&id, vec![Turn::user(format!("q{i}")), Turn::assistant(format!("a{i}"))])
                .await;
        }

        let session = store.get(&id).await.unwrap();
        assert_eq!(session.turns.len(), 100);
        assert_eq!(session.turns[0], Turn::user("q0"));
        assert_eq!(session.turns[99], Turn::assistant("a49"));
    }

    #[tokio::test]
    async fn test_append_to_unknown_id_creates_it() {
        let store = InMemorySessionStore::new();
        store.append("client-chosen", vec![Turn::user("hi")]).await;
        assert_eq!(store.get("client-chosen").await.unwrap().turns.len(), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_and_ignores_unknown() {
        let store = InMemorySessionStore::new();
        let id = store.create_session().await;
        store.append(&id, vec![Turn::user("hi")]).await;

        store.clear(&id).await;
        store.clear("never-existed").await;
        assert!(store.get(&id).await.is_none());
    }

    /// Concurrent requests on one session keep every turn, and each
    /// append's pair stays adjacent, but the order between requests is undefined.
    #[tokio::test]
    async fn test_concurrent_appends_keep_all_turns_without_ordering() {
        let store = Arc::new(InMemorySessionStore::new());
        let id = store.create_session().await;

        let tasks = (0..20).map(|i| {
            let store = Arc::clone(&store);
            let id = id.clone();
            tokio::spawn(async move {
                store
                    .append(&id, vec![Turn::user(format!("q{i}")), Turn::assistant(format!("a{i}"))])
                    .await;
            })
        });
        for result in futures::future::join_all(tasks).await {
            result.unwrap();
        }

        let turns = store.get(&id).await.unwrap().turns;
        assert_eq!(turns.len(), 40);
        for pair in turns.chunks(2) {
            let q = pair[0].message.trim_start_matches('q');
            let a = pair[1].message.trim_start_matches('a');
            assert_eq!(q, a, "an append's turns must stay adjacent");
        }
        for i in 0..20 {
            assert!(turns.contains(&Turn::user(format!("q{i}"))));
        }
    }
}
