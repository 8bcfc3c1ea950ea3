//! Persisted daemon state: one JSON document holding session histories, the
//! cleanup queue, and digest tracking.
//!
//! The document is small and single-user, so it is read-modify-written whole.
//! `update()` re-reads the file immediately before every write — callers never
//! hold a parsed copy across an await and write it back later. Concurrent
//! writers (scheduled path vs. inbound path) are serialized by an in-process
//! lock; across that, last-writer-wins is accepted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

/// One conversation turn. Content is either plain text or a structured
/// payload (e.g. a digest snapshot), so it is kept as a raw JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: String,
    pub content: Value,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: Value::String(text.into()),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: Value::String(text.into()),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CleanupState {
    #[serde(default)]
    pub queue: Vec<String>,
    #[serde(default)]
    pub cursor: usize,
    #[serde(default)]
    pub rebuilt_at: Option<DateTime<Utc>>,
}

impl CleanupState {
    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.queue.len()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_days: i64) -> bool {
        match self.rebuilt_at {
            Some(at) => now - at >= Duration::days(stale_days),
            None => true,
        }
    }

    /// Remove an id from the queue. Returns false when the id was already
    /// gone — resolving twice is a safe no-op. The cursor never moves
    /// backwards within a queue generation; an index shifted by the removal
    /// at worst skips one item until the next rebuild.
    pub fn remove(&mut self, id: &str) -> bool {
        match self.queue.iter().position(|q| q == id) {
            Some(pos) => {
                self.queue.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Move an id to the end of the queue ("later"). Returns false when the
    /// id was already gone.
    pub fn move_to_end(&mut self, id: &str) -> bool {
        if !self.remove(id) {
            return false;
        }
        self.queue.push(id.to_string());
        true
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DigestState {
    /// Chat message id of the last digest sent or edited.
    #[serde(default)]
    pub message_id: Option<i64>,
    #[serde(default)]
    pub last_digest_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_interaction_at: Option<DateTime<Utc>>,
}

impl DigestState {
    /// Whether the user has seen the previous digest: any message or button
    /// tap after it counts. With no prior digest or no recorded interaction
    /// the answer defaults to "read" so a fresh message is sent.
    pub fn user_has_read(&self) -> bool {
        match (self.last_interaction_at, self.last_digest_at) {
            (Some(interaction), Some(digest)) => interaction > digest,
            _ => true,
        }
    }
}

/// The whole persisted document. Every field defaults so a first run with no
/// file on disk behaves correctly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StateDoc {
    #[serde(default)]
    pub sessions: HashMap<String, Vec<Turn>>,
    #[serde(default)]
    pub cleanup: CleanupState,
    #[serde(default)]
    pub digest: DigestState,
}

impl StateDoc {
    pub fn session(&self, conversation: &str) -> &[Turn] {
        self.sessions
            .get(conversation)
            .map(|turns| turns.as_slice())
            .unwrap_or_default()
    }

    /// Append turns to a conversation, then trim to the sliding window of
    /// `cap_pairs` user+assistant pairs, oldest dropped first.
    pub fn push_turns(&mut self, conversation: &str, turns: Vec<Turn>, cap_pairs: usize) {
        let history = self.sessions.entry(conversation.to_string()).or_default();
        history.extend(turns);
        let cap = cap_pairs * 2;
        if history.len() > cap {
            history.drain(..history.len() - cap);
        }
    }
}

pub struct StateStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl StateStore {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            path: state_dir.join("state.json"),
            write_lock: Mutex::new(()),
        }
    }

    pub async fn load(&self) -> anyhow::Result<StateDoc> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(StateDoc::default()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, doc: &StateDoc) -> anyhow::Result<()> {
        let content = serde_json::to_string_pretty(doc)?;
        tokio::fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Read-modify-write as one step: re-reads the document fresh, applies
    /// the mutation, writes it back. Returns the document after mutation.
    pub async fn update<F>(&self, mutate: F) -> anyhow::Result<StateDoc>
    where
        F: FnOnce(&mut StateDoc),
    {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        mutate(&mut doc);
        self.save(&doc).await?;
        Ok(doc)
    }

    /// Stamp the last-interaction time (inbound message or button tap).
    pub async fn touch_interaction(&self) -> anyhow::Result<()> {
        self.update(|doc| doc.digest.last_interaction_at = Some(Utc::now()))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn store() -> (tempfile::TempDir, StateStore) {
        let dir = tempfile::TempDir::new().unwrap();
        let store = StateStore::new(dir.path());
        (dir, store)
    }

    #[tokio::test]
    async fn absent_file_loads_defaults() {
        let (_dir, store) = store();
        let doc = store.load().await.unwrap();
        assert!(doc.sessions.is_empty());
        assert!(doc.cleanup.queue.is_empty());
        assert_eq!(doc.cleanup.cursor, 0);
        assert!(doc.digest.message_id.is_none());
    }

    #[tokio::test]
    async fn partial_document_fills_defaults() {
        let (dir, store) = store();
        tokio::fs::write(
            dir.path().join("state.json"),
            r#"{"cleanup": {"queue": ["a"]}}"#,
        )
        .await
        .unwrap();
        let doc = store.load().await.unwrap();
        assert_eq!(doc.cleanup.queue, vec!["a"]);
        assert_eq!(doc.cleanup.cursor, 0);
        assert!(doc.sessions.is_empty());
    }

    #[tokio::test]
    async fn update_round_trips() {
        let (_dir, store) = store();
        store
            .update(|doc| {
                doc.cleanup.queue = vec!["x".into(), "y".into()];
                doc.cleanup.cursor = 1;
            })
            .await
            .unwrap();
        let doc = store.load().await.unwrap();
        assert_eq!(doc.cleanup.queue, vec!["x", "y"]);
        assert_eq!(doc.cleanup.cursor, 1);
    }

    #[test]
    fn session_window_drops_oldest_first() {
        let mut doc = StateDoc::default();
        for i in 0..6 {
            doc.push_turns(
                "42",
                vec![
                    Turn::user(format!("u{}", i)),
                    Turn::assistant(format!("a{}", i)),
                ],
                4,
            );
        }
        let history = doc.session("42");
        assert_eq!(history.len(), 8);
        assert_eq!(history[0].content, json!("u2"));
        assert_eq!(history[7].content, json!("a5"));
    }

    #[test]
    fn cleanup_remove_is_idempotent_and_never_moves_cursor_back() {
        let mut state = CleanupState {
            queue: vec!["a".into(), "b".into(), "c".into()],
            cursor: 2,
            rebuilt_at: None,
        };
        assert!(state.remove("a"));
        assert_eq!(state.cursor, 2);
        assert!(!state.remove("a"));
        assert_eq!(state.queue, vec!["b", "c"]);
    }

    #[test]
    fn cleanup_move_to_end() {
        let mut state = CleanupState {
            queue: vec!["a".into(), "b".into(), "c".into()],
            cursor: 1,
            rebuilt_at: None,
        };
        assert!(state.move_to_end("b"));
        assert_eq!(state.queue, vec!["a", "c", "b"]);
        assert!(!state.move_to_end("missing"));
    }

    #[test]
    fn exhaustion_and_staleness() {
        let now = Utc::now();
        let mut state = CleanupState::default();
        assert!(state.is_exhausted());
        assert!(state.is_stale(now, 7));

        state.queue = vec!["a".into()];
        state.cursor = 0;
        state.rebuilt_at = Some(now - Duration::days(8));
        assert!(!state.is_exhausted());
        assert!(state.is_stale(now, 7));

        state.rebuilt_at = Some(now - Duration::days(2));
        assert!(!state.is_stale(now, 7));
    }

    #[test]
    fn digest_read_detection() {
        let now = Utc::now();
        let mut digest = DigestState::default();
        // No prior digest: treated as read.
        assert!(digest.user_has_read());

        digest.last_digest_at = Some(now);
        digest.last_interaction_at = Some(now - Duration::minutes(5));
        assert!(!digest.user_has_read());

        digest.last_interaction_at = Some(now + Duration::minutes(5));
        assert!(digest.user_has_read());
    }
}
