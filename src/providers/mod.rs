use async_trait::async_trait;
use serde_json::Value;

pub mod anthropic;

pub use anthropic::AnthropicProvider;

/// One ordered block of model output: free text or a structured tool
/// invocation request.
#[derive(Debug, Clone)]
pub enum ContentPart {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
}

/// The completion service's response: ordered content parts.
#[derive(Debug, Clone, Default)]
pub struct CompletionResponse {
    pub parts: Vec<ContentPart>,
}

/// A tool invocation request pulled out of a response.
#[derive(Debug, Clone)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

impl CompletionResponse {
    /// Partition one round of output into its free-text segments and its
    /// tool invocation requests, preserving order within each.
    pub fn partition(&self) -> (Vec<String>, Vec<ToolUse>) {
        let mut texts = Vec::new();
        let mut tool_uses = Vec::new();
        for part in &self.parts {
            match part {
                ContentPart::Text { text } => texts.push(text.clone()),
                ContentPart::ToolUse { id, name, input } => tool_uses.push(ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                }),
            }
        }
        (texts, tool_uses)
    }

    /// The assistant turn to append to the message history, in content-block
    /// form so tool invocations survive the round trip.
    pub fn as_assistant_content(&self) -> Value {
        let blocks: Vec<Value> = self
            .parts
            .iter()
            .map(|part| match part {
                ContentPart::Text { text } => {
                    serde_json::json!({"type": "text", "text": text})
                }
                ContentPart::ToolUse { id, name, input } => {
                    serde_json::json!({"type": "tool_use", "id": id, "name": name, "input": input})
                }
            })
            .collect();
        Value::Array(blocks)
    }
}

/// Completion service — sends a system prompt, ordered message history, and
/// tool schemas to the hosted model; returns ordered content parts. Callers
/// wrap the call in a hard timeout; a timeout or transport failure is a run
/// failure, never silently swallowed.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    async fn complete(
        &self,
        system: &str,
        messages: &[Value],
        tools: &[Value],
    ) -> anyhow::Result<CompletionResponse>;
}
