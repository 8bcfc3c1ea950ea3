//! Process wiring and the event paths.
//!
//! One explicit [`App`] context owns every shared component — there are no
//! module-level registries. Two paths run through it: the inbound chat path
//! (message → agent loop → reply/confirmation) and the scheduled path
//! (scheduler → digest / cleanup). Both share persisted state only through
//! the whole-document store.

use std::path::PathBuf;
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::agent::{Agent, ToolDispatcher};
use crate::channels::{Button, Channel, TelegramChannel};
use crate::cleanup::{self, CleanupAction, CleanupManager};
use crate::config::AppConfig;
use crate::digest::DigestController;
use crate::pending::{PendingActions, PendingIntent};
use crate::providers::{AnthropicProvider, CompletionProvider};
use crate::runlog::{RunLog, RunLogWriter};
use crate::scheduler::Scheduler;
use crate::state::{StateStore, Turn};
use crate::store::{notion::NotionStore, Status, TaskFields, TaskPatch, TaskStore};
use crate::types::{ConfirmationRequest, JobKind, RunMode};

/// Callback-data prefix for confirmation buttons: "act:<yes|no>:<key>".
pub const ACTION_CALLBACK_PREFIX: &str = "act";

/// Title cap for the degraded raw-task fallback.
const RAW_TITLE_CAP: usize = 2000;

/// At most this many confirmation buttons are rendered per payload.
const CONFIRMATION_RENDER_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmDecision {
    Confirm,
    Skip,
}

pub struct App {
    pub config: AppConfig,
    pub state: Arc<StateStore>,
    pub store: Arc<dyn TaskStore>,
    pub agent: Arc<Agent>,
    pub pending: PendingActions,
    pub channel: Arc<dyn Channel>,
    pub cleanup: CleanupManager,
    pub digest: DigestController,
    pub runlog: Arc<RunLogWriter>,
    conversation: String,
}

impl App {
    /// Inbound chat message: run the agent over the session history and
    /// deliver the reply. Never panics out — every failure path ends in some
    /// acknowledgment to the user.
    pub async fn handle_message(&self, text: &str) {
        if let Err(e) = self.state.touch_interaction().await {
            warn!(error = %e, "Failed to stamp interaction time");
        }

        let mut log = RunLog::new(text, RunMode::Chat);

        let history = match self.state.load().await {
            Ok(doc) => doc.session(&self.conversation).to_vec(),
            Err(e) => {
                warn!(error = %e, "Failed to load session history, starting fresh");
                Vec::new()
            }
        };
        let mut messages: Vec<Value> = history
            .iter()
            .map(|t| json!({"role": t.role, "content": t.content}))
            .collect();
        messages.push(json!({"role": "user", "content": text}));

        let reply = match self.agent.run(messages, RunMode::Chat, &mut log).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(error = %e, "Agent run failed");
                self.runlog
                    .append(&log.finalize("", false, Some(&e.to_string())))
                    .await;
                self.degraded_fallback(text).await;
                return;
            }
        };

        // Save the turn (text only) before delivery, so a delivery failure
        // doesn't lose conversational context.
        {
            let conversation = self.conversation.clone();
            let pairs = self.config.agent.history_pairs;
            let user_text = text.to_string();
            let assistant_text = reply.text.clone();
            if let Err(e) = self
                .state
                .update(move |doc| {
                    doc.push_turns(
                        &conversation,
                        vec![Turn::user(user_text), Turn::assistant(assistant_text)],
                        pairs,
                    );
                })
                .await
            {
                warn!(error = %e, "Failed to persist conversation turn");
            }
        }

        let has_output = reply.confirmation.is_some() || !reply.text.is_empty();
        let mut response_sent = false;
        let mut send_error = None;
        let delivery = if let Some(ref confirmation) = reply.confirmation {
            self.render_confirmation(confirmation, &reply.text).await
        } else if !reply.text.is_empty() {
            self.channel.send_text(&reply.text).await.map(|_| ())
        } else {
            Ok(())
        };
        match delivery {
            Ok(()) => response_sent = has_output,
            Err(e) => {
                error!(error = %e, "Failed to deliver reply");
                send_error = Some(e.to_string());
            }
        }

        self.runlog
            .append(&log.finalize(&reply.text, response_sent, send_error.as_deref()))
            .await;
    }

    /// The agent is down — the user's input must still land somewhere. Create
    /// a raw task from the verbatim message and acknowledge plainly.
    async fn degraded_fallback(&self, text: &str) {
        let title: String = text.chars().take(RAW_TITLE_CAP).collect();
        let fields = TaskFields {
            title,
            ..Default::default()
        };
        match self.store.create(&fields).await {
            Ok(record) => {
                info!(id = %record.id, "Created raw fallback task");
                let _ = self
                    .channel
                    .send_text("⚠️ Assistant failed. Created a task from the raw message instead.")
                    .await;
            }
            Err(e) => {
                error!(error = %e, "Raw task fallback also failed");
                let _ = self
                    .channel
                    .send_text("❌ Something went wrong. Please try again.")
                    .await;
            }
        }
    }

    /// Render a confirmation payload: optional header, one buttoned message
    /// per task, then the agent's own text.
    async fn render_confirmation(
        &self,
        confirmation: &ConfirmationRequest,
        agent_text: &str,
    ) -> anyhow::Result<()> {
        if let Some(header) = confirmation.header_message.as_deref() {
            if !header.is_empty() {
                self.channel.send_text(header).await?;
            }
        }

        for task in confirmation.tasks.iter().take(CONFIRMATION_RENDER_CAP) {
            let key = self
                .pending
                .register(PendingIntent {
                    record_id: task.page_id.clone(),
                    new_status: confirmation.new_status.clone(),
                    title: task.title.clone(),
                })
                .await;
            let text = format!(
                "*{}*\nStatus: {}",
                task.title,
                task.current_status.as_deref().unwrap_or("?")
            );
            let buttons = vec![vec![
                Button::new(
                    format!("{} ✓", confirmation.new_status),
                    format!("{}:yes:{}", ACTION_CALLBACK_PREFIX, key),
                ),
                Button::new("Skip", format!("{}:no:{}", ACTION_CALLBACK_PREFIX, key)),
            ]];
            self.channel.send_with_buttons(&text, &buttons).await?;
        }

        if !agent_text.is_empty() {
            self.channel.send_text(agent_text).await?;
        }
        Ok(())
    }

    /// Resolve a confirmation tap. The pop from the registry and the status
    /// write happen at most once per key; a second tap gets "already handled".
    pub async fn resolve_confirmation(&self, decision: ConfirmDecision, key: &str) -> String {
        let Some(intent) = self.pending.resolve(key).await else {
            return "⏳ Already handled.".to_string();
        };

        match decision {
            ConfirmDecision::Skip => format!("⏭ Skipped: {}", intent.title),
            ConfirmDecision::Confirm => {
                let Some(status) = Status::parse(&intent.new_status) else {
                    warn!(status = %intent.new_status, "Confirmation with unknown target status");
                    return "❌ No valid target status.".to_string();
                };
                match self
                    .store
                    .update(&intent.record_id, &TaskPatch::status(status))
                    .await
                {
                    Ok(()) => format!("✅ {} → {}", intent.title, status),
                    Err(e) => {
                        error!(id = %intent.record_id, error = %e, "Confirmed status write failed");
                        format!("❌ Failed to update: {}", intent.title)
                    }
                }
            }
        }
    }

    /// Route an inbound button tap by its opaque callback token. Returns the
    /// label to edit into the tapped message, or None for foreign tokens.
    pub async fn handle_callback(&self, data: &str) -> Option<String> {
        if let Err(e) = self.state.touch_interaction().await {
            warn!(error = %e, "Failed to stamp interaction time");
        }

        let mut parts = data.splitn(3, ':');
        let namespace = parts.next()?;
        let action = parts.next()?;
        let id = parts.next()?;

        match namespace {
            ACTION_CALLBACK_PREFIX => {
                let decision = match action {
                    "yes" => ConfirmDecision::Confirm,
                    "no" => ConfirmDecision::Skip,
                    _ => return None,
                };
                Some(self.resolve_confirmation(decision, id).await)
            }
            cleanup::CALLBACK_PREFIX => {
                let action = CleanupAction::from_callback(action)?;
                Some(self.cleanup.resolve(action, id).await)
            }
            _ => None,
        }
    }

    /// Run a scheduled job. Also the body of the manual /scan command.
    pub async fn run_job(&self, kind: JobKind) -> anyhow::Result<()> {
        info!(job = kind.as_str(), "Starting scheduled job");
        match kind {
            JobKind::Daily => {
                self.digest.run().await?;
                self.cleanup.run_drain().await?;
            }
            JobKind::HourlyDigest => {
                self.digest.run().await?;
            }
        }
        info!(job = kind.as_str(), "Finished scheduled job");
        Ok(())
    }
}

/// Build every component, start the scheduler, and run the chat dispatcher
/// until shutdown.
pub async fn run(config: AppConfig) -> anyhow::Result<()> {
    let state_dir = PathBuf::from(&config.state.dir);
    std::fs::create_dir_all(&state_dir)?;

    let state = Arc::new(StateStore::new(&state_dir));
    let runlog = Arc::new(RunLogWriter::new(&state_dir));

    let store: Arc<dyn TaskStore> = Arc::new(NotionStore::new(
        &config.store.api_key,
        &config.store.database_id,
        &config.store.data_source_id,
        &config.store.source_tag,
    )?);
    let provider: Arc<dyn CompletionProvider> = Arc::new(AnthropicProvider::new(
        &config.provider.api_key,
        &config.provider.base_url,
        &config.provider.model,
        config.provider.max_tokens,
    )?);
    let agent = Arc::new(Agent::new(
        provider,
        ToolDispatcher::new(store.clone()),
        &config.agent,
    ));

    let bot = teloxide::Bot::new(config.telegram.bot_token.clone());
    let channel: Arc<dyn Channel> =
        Arc::new(TelegramChannel::new(bot.clone(), config.telegram.chat_id));
    let conversation = config.telegram.chat_id.to_string();

    let cleanup = CleanupManager::new(
        store.clone(),
        channel.clone(),
        state.clone(),
        config.cleanup.clone(),
    );
    let digest = DigestController::new(
        agent.clone(),
        store.clone(),
        channel.clone(),
        state.clone(),
        runlog.clone(),
        conversation.clone(),
        config.agent.history_pairs,
    );

    let scheduler_config = config.scheduler.clone();
    let app = Arc::new(App {
        config,
        state,
        store,
        agent,
        pending: PendingActions::new(),
        channel,
        cleanup,
        digest,
        runlog,
        conversation,
    });

    if scheduler_config.enabled {
        let (tx, mut rx) = mpsc::channel::<JobKind>(8);
        Scheduler::new(&scheduler_config, tx)?.spawn();
        let job_app = app.clone();
        tokio::spawn(async move {
            while let Some(kind) = rx.recv().await {
                if let Err(e) = job_app.run_job(kind).await {
                    error!(job = kind.as_str(), error = %e, "Scheduled job failed");
                }
            }
        });
    }

    info!("taskdaemon is starting");
    crate::channels::telegram::run_dispatcher(bot, app).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::tool_defs;
    use crate::testing::{MemoryStore, MockProvider, TestChannel};

    struct Fixture {
        _dir: tempfile::TempDir,
        store: Arc<MemoryStore>,
        channel: Arc<TestChannel>,
        app: App,
    }

    fn test_config() -> AppConfig {
        toml::from_str(
            r#"
            [provider]
            api_key = "sk-test"

            [telegram]
            bot_token = "123:abc"
            chat_id = 42

            [store]
            api_key = "secret"
            database_id = "db"
            data_source_id = "ds"
            "#,
        )
        .unwrap()
    }

    fn fixture(provider: MockProvider) -> Fixture {
        let dir = tempfile::TempDir::new().unwrap();
        let config = test_config();
        let store = Arc::new(MemoryStore::new());
        let channel = Arc::new(TestChannel::new());
        let state = Arc::new(StateStore::new(dir.path()));
        let runlog = Arc::new(RunLogWriter::new(dir.path()));
        let agent = Arc::new(Agent::new(
            Arc::new(provider),
            ToolDispatcher::new(store.clone()),
            &config.agent,
        ));
        let cleanup = CleanupManager::new(
            store.clone(),
            channel.clone(),
            state.clone(),
            config.cleanup.clone(),
        );
        let digest = DigestController::new(
            agent.clone(),
            store.clone(),
            channel.clone(),
            state.clone(),
            runlog.clone(),
            "42".to_string(),
            config.agent.history_pairs,
        );
        let app = App {
            config,
            state,
            store: store.clone(),
            agent,
            pending: PendingActions::new(),
            channel: channel.clone(),
            cleanup,
            digest,
            runlog,
            conversation: "42".to_string(),
        };
        Fixture {
            _dir: dir,
            store,
            channel,
            app,
        }
    }

    #[tokio::test]
    async fn plain_reply_is_delivered_and_history_saved() {
        let f = fixture(MockProvider::with_responses(vec![Ok(MockProvider::text(
            "Noted!",
        ))]));

        f.app.handle_message("remember to stretch").await;

        assert_eq!(f.channel.sent_texts(), vec!["Noted!"]);
        let doc = f.app.state.load().await.unwrap();
        let history = doc.session("42");
        assert_eq!(history.len(), 2);
        assert!(doc.digest.last_interaction_at.is_some());
    }

    #[tokio::test]
    async fn agent_failure_creates_raw_task_and_acknowledges() {
        let f = fixture(MockProvider::with_responses(vec![Err(
            "provider exploded".to_string()
        )]));

        f.app.handle_message("buy milk tomorrow").await;

        let records = f.store.all_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].title, "buy milk tomorrow");
        assert_eq!(records[0].status, Status::Todo);
        let texts = f.channel.sent_texts();
        assert_eq!(texts.len(), 1);
        assert!(texts[0].contains("raw message"));
    }

    #[tokio::test]
    async fn confirmation_flow_renders_buttons_then_applies_exactly_once() {
        // MemoryStore ids are deterministic: the first seeded record is "task-1".
        let f = fixture(MockProvider::with_responses(vec![
            Ok(MockProvider::tool_use(
                "tu_1",
                tool_defs::REQUEST_USER_CONFIRMATION,
                serde_json::json!({
                    "tasks": [{"page_id": "task-1", "title": "Ship release", "current_status": "In progress"}],
                    "new_status": "Done",
                    "header_message": "Mark as done?"
                }),
            )),
            Ok(MockProvider::text("Tap to confirm.")),
        ]));
        let record_id = f.store.seed("Ship release", Status::InProgress);
        assert_eq!(record_id, "task-1");

        f.app.handle_message("mark the release as done").await;

        // Header + one buttoned message + agent text.
        let (confirm_data, sent_count) = {
            let sent = f.channel.sent.lock().unwrap();
            assert_eq!(sent[0].text, "Mark as done?");
            assert!(sent[1].buttons[0][0].data.starts_with("act:yes:"));
            assert_eq!(sent[2].text, "Tap to confirm.");
            (sent[1].buttons[0][0].data.clone(), sent.len())
        };
        assert_eq!(sent_count, 3);

        // Tap confirm on the rendered button.
        let label = f.app.handle_callback(&confirm_data).await.unwrap();
        assert!(label.contains("✅"));
        assert_eq!(f.store.get_record(&record_id).unwrap().status, Status::Done);
        assert_eq!(f.store.update_count(), 1);

        // Second tap on the same key: already handled, no second write.
        let label = f.app.handle_callback(&confirm_data).await.unwrap();
        assert_eq!(label, "⏳ Already handled.");
        assert_eq!(f.store.update_count(), 1);
    }

    #[tokio::test]
    async fn skip_tap_consumes_without_store_write() {
        let f = fixture(MockProvider::with_responses(vec![]));
        let id = f.store.seed("Ship release", Status::InProgress);
        let key = f
            .app
            .pending
            .register(PendingIntent {
                record_id: id,
                new_status: "Done".to_string(),
                title: "Ship release".to_string(),
            })
            .await;

        let label = f
            .app
            .handle_callback(&format!("act:no:{}", key))
            .await
            .unwrap();
        assert!(label.contains("Skipped"));
        assert_eq!(f.store.update_count(), 0);
    }

    #[tokio::test]
    async fn foreign_callback_tokens_are_ignored() {
        let f = fixture(MockProvider::with_responses(vec![]));
        assert_eq!(f.app.handle_callback("other:whatever:1").await, None);
        assert_eq!(f.app.handle_callback("garbage").await, None);
    }

    #[tokio::test]
    async fn daily_job_runs_digest_then_cleanup() {
        let f = fixture(MockProvider::with_responses(vec![Ok(MockProvider::text(
            "Daily digest text.",
        ))]));
        // An aged candidate so the cleanup drain has something to offer.
        f.store.seed_aged(
            "ancient todo",
            Status::Todo,
            chrono::Utc::now() - chrono::Duration::days(365),
        );

        f.app.run_job(JobKind::Daily).await.unwrap();

        let texts = f.channel.sent_texts();
        // Digest message followed by one cleanup item.
        assert_eq!(texts.len(), 2);
        assert!(texts[0].contains("Daily digest text."));
        assert!(texts[1].contains("ancient todo"));
    }
}
