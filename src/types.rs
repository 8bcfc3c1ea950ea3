use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Which instruction prefix the agent loop runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Replying to an inbound user message.
    Chat,
    /// A scheduled check-in grounded on a workspace snapshot.
    Proactive,
}

impl RunMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunMode::Chat => "chat",
            RunMode::Proactive => "proactive",
        }
    }
}

/// What an agent run produced: the reply text plus any confirmation payload
/// captured during the loop.
#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub text: String,
    pub confirmation: Option<ConfirmationRequest>,
}

/// A structured request asking the user to approve a pending status change
/// before it is applied. Produced by the request_user_confirmation tool;
/// rendered as inline buttons by the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub tasks: Vec<ConfirmationTask>,
    pub new_status: String,
    #[serde(default)]
    pub header_message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfirmationTask {
    pub page_id: String,
    pub title: String,
    #[serde(default)]
    pub current_status: Option<String>,
}

impl ConfirmationRequest {
    /// Parse a confirmation payload out of raw tool input. Tasks missing the
    /// required fields are dropped rather than failing the whole payload.
    pub fn from_tool_input(input: &Value) -> Option<Self> {
        let parsed: ConfirmationRequest = serde_json::from_value(input.clone()).ok()?;
        if parsed.tasks.is_empty() || parsed.new_status.is_empty() {
            return None;
        }
        Some(parsed)
    }
}

/// Jobs the scheduler can fire. Both are also reachable through the manual
/// /scan command path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    /// Digest check-in + cleanup drain.
    Daily,
    /// Digest check-in only.
    HourlyDigest,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Daily => "daily",
            JobKind::HourlyDigest => "hourly_digest",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn confirmation_parses_from_tool_input() {
        let input = json!({
            "tasks": [
                {"page_id": "p1", "title": "Ship release", "current_status": "In progress"},
                {"page_id": "p2", "title": "Old idea"}
            ],
            "new_status": "Done",
            "header_message": "Mark these done?"
        });
        let req = ConfirmationRequest::from_tool_input(&input).unwrap();
        assert_eq!(req.tasks.len(), 2);
        assert_eq!(req.new_status, "Done");
        assert_eq!(req.tasks[1].current_status, None);
    }

    #[test]
    fn confirmation_rejects_empty_payloads() {
        assert!(ConfirmationRequest::from_tool_input(&json!({"tasks": [], "new_status": "Done"}))
            .is_none());
        assert!(ConfirmationRequest::from_tool_input(&json!({"new_status": "Done"})).is_none());
    }
}
