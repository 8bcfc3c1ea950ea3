//! Telegram transport: outbound sends/edits for the single authorized chat,
//! and the inbound dispatcher routing messages, commands, and button taps
//! into the app.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::{ChatAction, InlineKeyboardButton, InlineKeyboardMarkup, ParseMode};
use tracing::{info, warn};

use super::{Button, Channel, MessageId};
use crate::core::App;
use crate::types::JobKind;

const MAX_MESSAGE_CHARS: usize = 4000;
const MANUAL_SCAN_TIMEOUT: Duration = Duration::from_secs(120);
const LOGS_DEFAULT_COUNT: usize = 10;
const LOGS_MAX_COUNT: usize = 50;

pub struct TelegramChannel {
    bot: Bot,
    chat: ChatId,
}

impl TelegramChannel {
    pub fn new(bot: Bot, chat_id: i64) -> Self {
        Self {
            bot,
            chat: ChatId(chat_id),
        }
    }
}

/// Messages longer than Telegram's limit get truncated with an ellipsis.
fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_MESSAGE_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_MESSAGE_CHARS - 1).collect();
    clipped.push('…');
    clipped
}

fn keyboard(buttons: &[Vec<Button>]) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(buttons.iter().map(|row| {
        row.iter()
            .map(|b| InlineKeyboardButton::callback(b.label.clone(), b.data.clone()))
            .collect::<Vec<_>>()
    }))
}

#[async_trait]
impl Channel for TelegramChannel {
    async fn send_text(&self, text: &str) -> anyhow::Result<MessageId> {
        let text = clip(text);
        // Markdown first; the model's formatting is not guaranteed to parse,
        // so fall back to plain text rather than dropping the reply.
        match self
            .bot
            .send_message(self.chat, text.as_str())
            .parse_mode(ParseMode::Markdown)
            .await
        {
            Ok(msg) => Ok(msg.id.0 as MessageId),
            Err(e) => {
                warn!(error = %e, "Markdown send failed, retrying as plain text");
                let msg = self.bot.send_message(self.chat, text.as_str()).await?;
                Ok(msg.id.0 as MessageId)
            }
        }
    }

    async fn send_with_buttons(
        &self,
        text: &str,
        buttons: &[Vec<Button>],
    ) -> anyhow::Result<MessageId> {
        let text = clip(text);
        let markup = keyboard(buttons);
        match self
            .bot
            .send_message(self.chat, text.as_str())
            .parse_mode(ParseMode::Markdown)
            .reply_markup(markup.clone())
            .await
        {
            Ok(msg) => Ok(msg.id.0 as MessageId),
            Err(e) => {
                warn!(error = %e, "Markdown send failed, retrying as plain text");
                let msg = self
                    .bot
                    .send_message(self.chat, text.as_str())
                    .reply_markup(markup)
                    .await?;
                Ok(msg.id.0 as MessageId)
            }
        }
    }

    async fn edit_text(&self, message_id: MessageId, text: &str) -> anyhow::Result<()> {
        let text = clip(text);
        let id = teloxide::types::MessageId(message_id as i32);
        match self
            .bot
            .edit_message_text(self.chat, id, text.as_str())
            .parse_mode(ParseMode::Markdown)
            .await
        {
            Ok(_) => Ok(()),
            Err(markdown_err) => {
                // Distinguish "bad markdown" from "message not editable": a
                // plain retry succeeds for the former only.
                match self.bot.edit_message_text(self.chat, id, text.as_str()).await {
                    Ok(_) => Ok(()),
                    Err(_) => Err(markdown_err.into()),
                }
            }
        }
    }
}

/// Run the long-polling dispatcher until shutdown.
pub async fn run_dispatcher(bot: Bot, app: Arc<App>) {
    let handler = teloxide::dptree::entry()
        .branch(Update::filter_message().endpoint(on_message))
        .branch(Update::filter_callback_query().endpoint(on_callback));

    Dispatcher::builder(bot, handler)
        .dependencies(teloxide::dptree::deps![app])
        .enable_ctrlc_handler()
        .build()
        .dispatch()
        .await;
}

async fn on_message(bot: Bot, msg: Message, app: Arc<App>) -> ResponseResult<()> {
    // Single-user daemon: anything outside the authorized chat is ignored.
    if msg.chat.id.0 != app.config.telegram.chat_id {
        return Ok(());
    }
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if let Some(command) = text.strip_prefix('/') {
        handle_command(&app, command).await;
        return Ok(());
    }

    let _ = bot.send_chat_action(msg.chat.id, ChatAction::Typing).await;
    app.handle_message(text).await;
    Ok(())
}

async fn handle_command(app: &Arc<App>, command: &str) {
    let mut parts = command.split_whitespace();
    // Group-style suffixes ("scan@mybot") resolve to the bare command.
    let name = parts
        .next()
        .unwrap_or_default()
        .split('@')
        .next()
        .unwrap_or_default();
    let args: Vec<&str> = parts.collect();

    let reply = match name {
        "start" => "🤖 Task assistant here!\n\
                    Send a message and I'll help manage your tasks.\n\
                    Scheduled check-ins run through the day; /scan triggers one now."
            .to_string(),
        "scan" => {
            let _ = app.channel.send_text("🔄 Running manual scan...").await;
            let outcome =
                match tokio::time::timeout(MANUAL_SCAN_TIMEOUT, app.run_job(JobKind::Daily)).await {
                    Ok(Ok(())) => "✅ Scan complete.",
                    Ok(Err(e)) => {
                        warn!(error = %e, "Manual scan failed");
                        "❌ Scan failed. Check logs for details."
                    }
                    Err(_) => {
                        warn!("Manual scan timed out");
                        "⏰ Scan timed out. Check logs for details."
                    }
                };
            outcome.to_string()
        }
        "logs" => format_logs(app, &args).await,
        _ => return,
    };

    let _ = app.channel.send_text(&reply).await;
}

/// Compact rendering of recent run-log entries: `/logs [errors] [count]`.
async fn format_logs(app: &Arc<App>, args: &[&str]) -> String {
    let mut count = LOGS_DEFAULT_COUNT;
    let mut errors_only = false;
    for arg in args {
        match arg.to_lowercase().as_str() {
            "error" | "errors" => errors_only = true,
            other => {
                if let Ok(n) = other.parse::<usize>() {
                    count = n.min(LOGS_MAX_COUNT);
                }
            }
        }
    }

    let records = app.runlog.read_recent(count, errors_only).await;
    if records.is_empty() {
        return if errors_only {
            "📋 No error entries found.".to_string()
        } else {
            "📋 No log entries yet.".to_string()
        };
    }

    let label = if errors_only { "error" } else { "log" };
    let entries: Vec<String> = records
        .iter()
        .map(|entry| {
            let ts: String = entry["ts"].as_str().unwrap_or("?").chars().take(19).collect();
            let mode = entry["mode"].as_str().unwrap_or("?");
            let sent = if entry["response_sent"].as_bool().unwrap_or(false) {
                "✅"
            } else {
                "❌"
            };
            let duration = entry["duration_ms"].as_u64().unwrap_or(0);
            let steps = entry["steps"].as_array().map(|s| s.len()).unwrap_or(0);
            let user_msg: String = entry["user_message"]
                .as_str()
                .unwrap_or("")
                .chars()
                .take(60)
                .collect();
            let mut line = format!("[{}] {} {} {}ms {}steps", ts, mode, sent, duration, steps);
            if let Some(err) = entry["error"].as_str() {
                let err: String = err.chars().take(80).collect();
                line.push_str(&format!(" ERR:{}", err));
            }
            line.push_str(&format!("\n  → {}", user_msg));
            line
        })
        .collect();

    clip(&format!(
        "📋 Last {} {} entries:\n\n{}",
        records.len(),
        label,
        entries.join("\n\n")
    ))
}

async fn on_callback(bot: Bot, q: CallbackQuery, app: Arc<App>) -> ResponseResult<()> {
    let Some(teloxide::types::MaybeInaccessibleMessage::Regular(message)) = q.message else {
        // Can't verify the originating chat; fail closed.
        let _ = bot.answer_callback_query(q.id).await;
        return Ok(());
    };
    if message.chat.id.0 != app.config.telegram.chat_id {
        warn!(chat_id = message.chat.id.0, "Callback from unauthorized chat");
        let _ = bot.answer_callback_query(q.id).await;
        return Ok(());
    }

    let Some(data) = q.data else {
        let _ = bot.answer_callback_query(q.id).await;
        return Ok(());
    };

    let label = app.handle_callback(&data).await;
    let _ = bot.answer_callback_query(q.id).await;

    if let Some(label) = label {
        info!(data = %data, label = %label, "Resolved button tap");
        let _ = bot
            .edit_message_text(message.chat.id, message.id, label.as_str())
            .await;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clip_truncates_long_messages() {
        let long = "x".repeat(5000);
        let clipped = clip(&long);
        assert_eq!(clipped.chars().count(), MAX_MESSAGE_CHARS);
        assert!(clipped.ends_with('…'));

        assert_eq!(clip("short"), "short");
    }

    #[test]
    fn keyboard_preserves_rows_and_data() {
        let markup = keyboard(&[
            vec![
                Button::new("Keep ✓", "clean:keep:p1"),
                Button::new("Done ☑", "clean:done:p1"),
            ],
            vec![Button::new("Later ⏭", "clean:later:p1")],
        ]);
        assert_eq!(markup.inline_keyboard.len(), 2);
        assert_eq!(markup.inline_keyboard[0].len(), 2);
        assert_eq!(markup.inline_keyboard[0][0].text, "Keep ✓");
    }
}
