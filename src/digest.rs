//! Digest dedup controller.
//!
//! A scheduled run asks the agent for one helpful check-in message grounded
//! on the workspace snapshot. Whether that message becomes a new chat message
//! or an in-place edit of the previous one depends on a single consistent
//! read of the digest state taken before any mutation: if the user has not
//! interacted since the last digest, the old message is still unread and gets
//! edited instead of stacking a new one. The "nothing notable" sentinel
//! suppresses sending entirely without moving the stamped baseline.

use std::sync::Arc;

use chrono::{Local, Utc};
use tracing::{error, info, warn};

use crate::agent::{prompt::SKIP_SENTINEL, Agent};
use crate::channels::Channel;
use crate::runlog::{RunLog, RunLogWriter};
use crate::snapshot::build_workspace_snapshot;
use crate::state::{StateStore, Turn};
use crate::store::TaskStore;
use crate::types::RunMode;

const CHECK_IN_MARKER: &str = "[scheduled check-in]";

pub struct DigestController {
    agent: Arc<Agent>,
    store: Arc<dyn TaskStore>,
    channel: Arc<dyn Channel>,
    state: Arc<StateStore>,
    runlog: Arc<RunLogWriter>,
    /// Session key of the authorized conversation.
    conversation: String,
    history_pairs: usize,
}

impl DigestController {
    pub fn new(
        agent: Arc<Agent>,
        store: Arc<dyn TaskStore>,
        channel: Arc<dyn Channel>,
        state: Arc<StateStore>,
        runlog: Arc<RunLogWriter>,
        conversation: String,
        history_pairs: usize,
    ) -> Self {
        Self {
            agent,
            store,
            channel,
            state,
            runlog,
            conversation,
            history_pairs,
        }
    }

    /// One scheduled digest run.
    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Running digest check-in");
        let mut log = RunLog::new(CHECK_IN_MARKER, RunMode::Proactive);

        let snapshot = build_workspace_snapshot(self.store.as_ref(), Local::now()).await;

        let mut prompt = String::from("Do a scheduled check-in.");
        if snapshot.is_empty() {
            prompt.push_str(" Look at the current task state and send something helpful.");
        } else {
            prompt.push_str(&format!(
                "\nHere is the current workspace snapshot:\n\n{}\n\nBased on this data and the time of day, send ONE helpful message.",
                snapshot
            ));
        }
        let messages = vec![serde_json::json!({"role": "user", "content": prompt})];

        let reply = match self.agent.run(messages, RunMode::Proactive, &mut log).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "Digest agent run failed");
                self.runlog
                    .append(&log.finalize("", false, Some(&e.to_string())))
                    .await;
                return Ok(());
            }
        };

        let text = reply.text.trim().to_string();
        if text.is_empty() || text == SKIP_SENTINEL {
            // Suppressed: the stamped baseline stays put so the next run
            // re-evaluates from the same state.
            info!("Digest check-in: nothing to send (SKIP)");
            self.runlog
                .append(&log.finalize(SKIP_SENTINEL, false, None))
                .await;
            return Ok(());
        }

        // One consistent snapshot of the digest state, read before any
        // mutation in this run.
        let digest = self.state.load().await?.digest;

        let delivered = if digest.user_has_read() || digest.message_id.is_none() {
            self.send_new(&text).await
        } else {
            let prev_id = digest.message_id.unwrap();
            match self.channel.edit_text(prev_id, &text).await {
                Ok(()) => Some(prev_id),
                Err(e) => {
                    warn!(message_id = prev_id, error = %e, "Digest edit failed, sending new message");
                    self.send_new(&text).await
                }
            }
        };

        let Some(message_id) = delivered else {
            self.runlog
                .append(&log.finalize(&text, false, Some("chat delivery failed")))
                .await;
            return Ok(());
        };

        // Stamp only after a successful send/edit.
        self.state
            .update(|doc| {
                doc.digest.message_id = Some(message_id);
                doc.digest.last_digest_at = Some(Utc::now());
            })
            .await?;

        // Make the check-in part of the conversation so a follow-up chat
        // message can reference the record ids the digest showed.
        let history_user = if snapshot.is_empty() {
            CHECK_IN_MARKER.to_string()
        } else {
            format!("{}\n\n{}", CHECK_IN_MARKER, snapshot)
        };
        let conversation = self.conversation.clone();
        let history_pairs = self.history_pairs;
        let text_for_history = text.clone();
        self.state
            .update(move |doc| {
                doc.push_turns(
                    &conversation,
                    vec![Turn::user(history_user), Turn::assistant(text_for_history)],
                    history_pairs,
                );
            })
            .await?;

        self.runlog.append(&log.finalize(&text, true, None)).await;
        info!("Digest check-in: message delivered");
        Ok(())
    }

    async fn send_new(&self, text: &str) -> Option<i64> {
        match self.channel.send_text(text).await {
            Ok(id) => Some(id),
            Err(e) => {
                error!(error = %e, "Failed to send digest message");
                None
            }
        }
    }
}
