//! Cleanup queue: a persisted rotation over stale-candidate records.
//!
//! Lifecycle per scheduled run: rebuild the queue when it is empty, exhausted
//! (cursor past the end), or older than the staleness threshold; then drain a
//! bounded number of items, each offered to the user with resolution buttons.
//! Resolutions arrive later as independent button taps and must be idempotent
//! — an id already gone from the queue resolves to "already handled" with no
//! second store write.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{error, info, warn};

use crate::channels::{Button, Channel};
use crate::config::CleanupConfig;
use crate::state::StateStore;
use crate::store::{fetch_body_text, Filter, Sort, SortKey, Status, TaskQuery, TaskStore};

/// Callback-data prefix for cleanup buttons: "clean:<action>:<record id>".
pub const CALLBACK_PREFIX: &str = "clean";

const CONTENT_SUMMARY_CHARS: usize = 160;

/// The four ways a user can resolve an offered item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupAction {
    /// Still valid — drop from the queue, no store write.
    Keep,
    /// Write completed status, then drop from the queue.
    Done,
    /// Write terminal status ("Won't do"), then drop from the queue.
    Discard,
    /// Ask again in a future pass — move to the end of the queue.
    Later,
}

impl CleanupAction {
    pub fn from_callback(action: &str) -> Option<CleanupAction> {
        match action {
            "keep" => Some(CleanupAction::Keep),
            "done" => Some(CleanupAction::Done),
            "discard" => Some(CleanupAction::Discard),
            "later" => Some(CleanupAction::Later),
            _ => None,
        }
    }

    fn callback_data(&self, id: &str) -> String {
        let action = match self {
            CleanupAction::Keep => "keep",
            CleanupAction::Done => "done",
            CleanupAction::Discard => "discard",
            CleanupAction::Later => "later",
        };
        format!("{}:{}:{}", CALLBACK_PREFIX, action, id)
    }
}

pub struct CleanupManager {
    store: Arc<dyn TaskStore>,
    channel: Arc<dyn Channel>,
    state: Arc<StateStore>,
    config: CleanupConfig,
}

impl CleanupManager {
    pub fn new(
        store: Arc<dyn TaskStore>,
        channel: Arc<dyn Channel>,
        state: Arc<StateStore>,
        config: CleanupConfig,
    ) -> Self {
        Self {
            store,
            channel,
            state,
            config,
        }
    }

    /// One scheduled invocation: rebuild if needed, then drain up to the
    /// per-run cap. A per-item send failure is logged and skipped — the
    /// cursor advances regardless, never retrying within the same run.
    pub async fn run_drain(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let mut doc = self.state.load().await?;

        let needs_rebuild = doc.cleanup.queue.is_empty()
            || doc.cleanup.is_exhausted()
            || doc.cleanup.is_stale(now, self.config.queue_stale_days);

        if needs_rebuild {
            let queue = self.build_queue().await;
            info!(candidates = queue.len(), "Rebuilt cleanup queue");
            doc = self
                .state
                .update(|d| {
                    d.cleanup.queue = queue;
                    d.cleanup.cursor = 0;
                    d.cleanup.rebuilt_at = Some(now);
                })
                .await?;
        }

        if doc.cleanup.queue.is_empty() {
            info!("No cleanup candidates found");
            return Ok(());
        }

        let queue = doc.cleanup.queue.clone();
        let mut cursor = doc.cleanup.cursor;
        let mut sent = 0;
        while sent < self.config.drain_per_run && cursor < queue.len() {
            let id = &queue[cursor];
            match self.send_cleanup_item(id).await {
                Ok(()) => sent += 1,
                Err(e) => warn!(id = %id, error = %e, "Failed to send cleanup item, skipping"),
            }
            cursor += 1;
        }

        self.state.update(|d| d.cleanup.cursor = cursor).await?;

        if sent > 0 {
            info!(sent, cursor, "Cleanup drain complete");
        }
        Ok(())
    }

    /// Query the store for aged open candidates, oldest first, paging to the
    /// end. A query failure yields an empty queue — the next run retries.
    async fn build_queue(&self) -> Vec<String> {
        let cutoff = Utc::now() - Duration::days(self.config.candidate_age_days);
        let filter = Filter::And(vec![
            Filter::Or(vec![
                Filter::StatusEquals(Status::Todo),
                Filter::StatusEquals(Status::ToSchedule),
            ]),
            Filter::CreatedBefore(cutoff),
        ]);

        let mut ids = Vec::new();
        let mut cursor: Option<String> = None;
        loop {
            let query = TaskQuery::new(filter.clone())
                .sorted(Sort::asc(SortKey::CreatedTime))
                .page_size(100)
                .after(cursor.take());
            match self.store.query(&query).await {
                Ok(page) => {
                    ids.extend(page.records.into_iter().map(|r| r.id));
                    if !page.has_more {
                        break;
                    }
                    cursor = page.next_cursor;
                    if cursor.is_none() {
                        break;
                    }
                }
                Err(e) => {
                    error!(error = %e, "Failed to build cleanup queue");
                    return Vec::new();
                }
            }
        }
        ids
    }

    /// Fetch fresh record state and offer it with resolution buttons.
    async fn send_cleanup_item(&self, id: &str) -> anyhow::Result<()> {
        let record = self.store.get(id).await?;
        let age_days = (Utc::now() - record.created_at).num_days();

        let summary = match fetch_body_text(self.store.as_ref(), id).await {
            Ok(body) if !body.is_empty() => {
                let mut s: String = body.chars().take(CONTENT_SUMMARY_CHARS).collect();
                if body.chars().count() > CONTENT_SUMMARY_CHARS {
                    s.push('…');
                }
                Some(s)
            }
            _ => None,
        };

        let mut text = format!(
            "🧹 *Cleanup candidate*\n*{}*\nStatus: {} | Created {} days ago",
            record.title, record.status, age_days
        );
        if let Some(summary) = summary {
            text.push('\n');
            text.push_str(&summary);
        }

        let buttons = vec![
            vec![
                Button::new("Keep ✓", CleanupAction::Keep.callback_data(id)),
                Button::new("Done ☑", CleanupAction::Done.callback_data(id)),
                Button::new("Discard ✗", CleanupAction::Discard.callback_data(id)),
            ],
            vec![Button::new("Later ⏭", CleanupAction::Later.callback_data(id))],
        ];

        self.channel.send_with_buttons(&text, &buttons).await?;
        Ok(())
    }

    /// Resolve a button tap. Returns the label for the edited message.
    ///
    /// Store-write failures on done/discard leave the queue unchanged so the
    /// item stays eligible for a future view.
    pub async fn resolve(&self, action: CleanupAction, id: &str) -> String {
        let doc = match self.state.load().await {
            Ok(doc) => doc,
            Err(e) => {
                error!(error = %e, "Failed to load state for cleanup resolution");
                return "⚠️ State unavailable — please try again.".to_string();
            }
        };
        if !doc.cleanup.queue.iter().any(|q| q == id) {
            return "⏳ Already handled.".to_string();
        }

        match action {
            CleanupAction::Keep => {
                let title = self.title_of(id).await;
                if let Err(e) = self.state.update(|d| {
                    d.cleanup.remove(id);
                }).await {
                    error!(id, error = %e, "Failed to remove kept item from queue");
                }
                format!("✅ Kept: {}", title)
            }
            CleanupAction::Later => {
                let title = self.title_of(id).await;
                if let Err(e) = self.state.update(|d| {
                    d.cleanup.move_to_end(id);
                }).await {
                    error!(id, error = %e, "Failed to defer item in queue");
                }
                format!("⏭ Will ask again later: {}", title)
            }
            CleanupAction::Done => self.resolve_with_write(id, Status::Done, "☑ Done").await,
            CleanupAction::Discard => {
                self.resolve_with_write(id, Status::WontDo, "🗑 Discarded").await
            }
        }
    }

    async fn resolve_with_write(&self, id: &str, status: Status, label: &str) -> String {
        match self
            .store
            .update(id, &crate::store::TaskPatch::status(status))
            .await
        {
            Ok(()) => {
                let title = self.title_of(id).await;
                if let Err(e) = self.state.update(|d| {
                    d.cleanup.remove(id);
                }).await {
                    error!(id, error = %e, "Failed to remove resolved item from queue");
                }
                format!("{}: {} (set to {})", label, title, status)
            }
            Err(e) => {
                error!(id, error = %e, "Cleanup status write failed — leaving item queued");
                "❌ Task database update failed. Please try again.".to_string()
            }
        }
    }

    async fn title_of(&self, id: &str) -> String {
        match self.store.get(id).await {
            Ok(record) if !record.title.is_empty() => record.title,
            _ => "task".to_string(),
        }
    }
}
