//! The agent loop: drives the completion service through bounded rounds of
//! tool execution until a turn produces plain text or the round budget runs
//! out.
//!
//! Failure boundaries, in order of severity:
//! - A completion-call timeout or transport failure aborts the whole run and
//!   surfaces to the caller as an error.
//! - A single tool failure is folded into that tool's result envelope and fed
//!   back to the model; it never aborts sibling invocations or the loop.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tracing::warn;

pub mod dispatch;
pub mod prompt;
pub mod tool_defs;

pub use dispatch::ToolDispatcher;

use crate::config::AgentConfig;
use crate::providers::CompletionProvider;
use crate::runlog::RunLog;
use crate::types::{AgentReply, ConfirmationRequest, RunMode};

/// Returned when the round budget runs out without any free text to show.
pub const FALLBACK_REPLY: &str =
    "I hit my iteration limit while working on that. Some steps may have completed — please check.";

pub struct Agent {
    provider: Arc<dyn CompletionProvider>,
    dispatcher: ToolDispatcher,
    max_rounds: usize,
    call_timeout: Duration,
    tool_concurrency: usize,
}

impl Agent {
    pub fn new(
        provider: Arc<dyn CompletionProvider>,
        dispatcher: ToolDispatcher,
        config: &AgentConfig,
    ) -> Self {
        Self {
            provider,
            dispatcher,
            max_rounds: config.max_rounds,
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            tool_concurrency: config.tool_concurrency.max(1),
        }
    }

    /// Run the loop over an ordered message history. The caller owns session
    /// trimming and delivery; this returns the final text plus any
    /// confirmation payload captured along the way.
    pub async fn run(
        &self,
        mut messages: Vec<Value>,
        mode: RunMode,
        log: &mut RunLog,
    ) -> anyhow::Result<AgentReply> {
        let system = prompt::build_system_prompt(mode, Local::now());
        let tools = tool_defs::definitions();

        let mut confirmation: Option<ConfirmationRequest> = None;
        let mut last_text = String::new();

        for _round in 0..self.max_rounds {
            let response = timeout(
                self.call_timeout,
                self.provider.complete(&system, &messages, &tools),
            )
            .await
            .map_err(|_| {
                anyhow::anyhow!(
                    "completion call timed out after {}s",
                    self.call_timeout.as_secs()
                )
            })??;

            let (texts, tool_uses) = response.partition();
            last_text = texts.join("\n");

            if tool_uses.is_empty() {
                return Ok(AgentReply {
                    text: last_text,
                    confirmation,
                });
            }

            // Execute the round's invocations independently: capped
            // concurrency, order preserved, every outcome an envelope.
            let invocations: Vec<(String, Value)> = tool_uses
                .iter()
                .map(|tu| (tu.name.clone(), tu.input.clone()))
                .collect();
            let results: Vec<Value> = stream::iter(invocations.into_iter().map(|(name, input)| {
                async move { self.dispatcher.dispatch(&name, &input).await }
            }))
            .buffered(self.tool_concurrency)
            .collect()
            .await;

            let mut tool_results = Vec::with_capacity(results.len());
            for (tu, result) in tool_uses.iter().zip(results) {
                if tu.name == tool_defs::REQUEST_USER_CONFIRMATION {
                    match ConfirmationRequest::from_tool_input(&tu.input) {
                        Some(parsed) => confirmation = Some(parsed),
                        None => {
                            warn!("Discarding malformed confirmation payload");
                        }
                    }
                }
                log.add_step(&tu.name, &tu.input, &result);
                tool_results.push(json!({
                    "type": "tool_result",
                    "tool_use_id": tu.id,
                    "content": result.to_string(),
                }));
            }

            messages.push(json!({
                "role": "assistant",
                "content": response.as_assistant_content(),
            }));
            messages.push(json!({"role": "user", "content": tool_results}));
        }

        warn!(rounds = self.max_rounds, "Agent round budget exhausted");
        let text = if last_text.trim().is_empty() {
            FALLBACK_REPLY.to_string()
        } else {
            last_text
        };
        Ok(AgentReply { text, confirmation })
    }
}
