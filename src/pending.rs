//! Ephemeral registry bridging a confirmation button tap back to the exact
//! state change it approves.
//!
//! Keys come from a monotonically increasing counter, never from intent
//! content — the same intent registered twice gets two keys. Resolution is
//! pop-once: of two near-simultaneous taps on the same key, exactly one
//! observes the intent and the other observes "already handled". Entries do
//! not survive restarts; a tap on a stale key resolves to absent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::Mutex;

/// One state change awaiting a single user confirmation tap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingIntent {
    pub record_id: String,
    pub new_status: String,
    pub title: String,
}

#[derive(Default)]
pub struct PendingActions {
    counter: AtomicU64,
    entries: Mutex<HashMap<String, PendingIntent>>,
}

impl PendingActions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an intent and hand back its opaque key.
    pub async fn register(&self, intent: PendingIntent) -> String {
        let key = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        let key = key.to_string();
        self.entries.lock().await.insert(key.clone(), intent);
        key
    }

    /// Consume the intent for a key. The removal and the return happen under
    /// one lock, so a second resolution of the same key gets `None`.
    pub async fn resolve(&self, key: &str) -> Option<PendingIntent> {
        self.entries.lock().await.remove(key)
    }

    #[cfg(test)]
    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn intent(id: &str) -> PendingIntent {
        PendingIntent {
            record_id: id.to_string(),
            new_status: "Done".to_string(),
            title: "Ship it".to_string(),
        }
    }

    #[tokio::test]
    async fn second_resolution_observes_already_handled() {
        let registry = PendingActions::new();
        let key = registry.register(intent("p1")).await;

        assert_eq!(registry.resolve(&key).await, Some(intent("p1")));
        assert_eq!(registry.resolve(&key).await, None);
    }

    #[tokio::test]
    async fn keys_are_unique_even_for_duplicate_intents() {
        let registry = PendingActions::new();
        let k1 = registry.register(intent("p1")).await;
        let k2 = registry.register(intent("p1")).await;
        assert_ne!(k1, k2);
        assert_eq!(registry.len().await, 2);
    }

    #[tokio::test]
    async fn unknown_key_is_absent() {
        let registry = PendingActions::new();
        assert_eq!(registry.resolve("999").await, None);
    }

    #[tokio::test]
    async fn concurrent_resolutions_pop_exactly_once() {
        let registry = Arc::new(PendingActions::new());
        let key = registry.register(intent("p1")).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let key = key.clone();
            handles.push(tokio::spawn(
                async move { registry.resolve(&key).await },
            ));
        }

        let mut hits = 0;
        for handle in handles {
            if handle.await.unwrap().is_some() {
                hits += 1;
            }
        }
        assert_eq!(hits, 1, "exactly one resolution may observe the intent");
    }
}
