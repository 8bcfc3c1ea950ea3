//! Chat transport boundary.
//!
//! The daemon talks to exactly one authorized conversation, so the outbound
//! trait carries no addressing — the implementation owns the chat id.
//! Inbound events (messages, commands, button taps) are wired up by the
//! concrete channel's dispatcher in [`telegram`].

use async_trait::async_trait;

pub mod telegram;

pub use telegram::TelegramChannel;

/// Identifier of a delivered outbound message, used for later in-place edits.
pub type MessageId = i64;

/// One inline button: a label and the opaque callback token delivered back
/// when tapped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Button {
    pub label: String,
    pub data: String,
}

impl Button {
    pub fn new(label: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            data: data.into(),
        }
    }
}

/// Outbound message delivery to the authorized conversation.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send a plain text message; returns its id.
    async fn send_text(&self, text: &str) -> anyhow::Result<MessageId>;

    /// Send a message with inline button rows; returns its id.
    async fn send_with_buttons(
        &self,
        text: &str,
        buttons: &[Vec<Button>],
    ) -> anyhow::Result<MessageId>;

    /// Edit a previously sent message in place.
    async fn edit_text(&self, message_id: MessageId, text: &str) -> anyhow::Result<()>;
}
