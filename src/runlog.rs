//! Structured per-run interaction log.
//!
//! Each agent run (chat or proactive) becomes one JSON line in
//! `<state dir>/logs/agent_log.jsonl`: the inbound message, every tool step
//! with a compact result summary, the final response, delivery outcome, and
//! duration. The file is rotated by keeping the newer half once it passes
//! 5 MB. Lines are mirrored to tracing so the run history shows up in the
//! process logs too.

use std::path::{Path, PathBuf};
use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::types::RunMode;

const LOG_FILE_NAME: &str = "agent_log.jsonl";
const MAX_LOG_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// One tool invocation inside a run: the envelope, summarized.
#[derive(Debug, Clone, Serialize)]
pub struct ToolStep {
    pub tool: String,
    pub input: Value,
    pub result_summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Collects the story of one agent run; turned into a JSON record on finalize.
#[derive(Debug)]
pub struct RunLog {
    user_message: String,
    mode: RunMode,
    steps: Vec<ToolStep>,
    started: Instant,
}

impl RunLog {
    pub fn new(user_message: &str, mode: RunMode) -> Self {
        Self {
            user_message: user_message.to_string(),
            mode,
            steps: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Record one tool envelope. The summary keeps only the small
    /// identifying keys instead of full store payloads.
    pub fn add_step(&mut self, tool: &str, input: &Value, result: &Value) {
        let error = result["error"].as_str().map(|e| e.to_string());

        let mut summary = serde_json::Map::new();
        for key in ["count", "success", "page_id", "name", "status", "appended"] {
            if let Some(v) = result.get(key) {
                summary.insert(key.to_string(), v.clone());
            }
        }
        let result_summary = if summary.is_empty() {
            let keys: Vec<&str> = result
                .as_object()
                .map(|o| o.keys().take(5).map(|k| k.as_str()).collect())
                .unwrap_or_default();
            json!({ "keys": keys }).to_string()
        } else {
            Value::Object(summary).to_string()
        };

        self.steps.push(ToolStep {
            tool: tool.to_string(),
            input: input.clone(),
            result_summary,
            error,
        });
    }

    pub fn step_count(&self) -> usize {
        self.steps.len()
    }

    /// Build the final record for this run.
    pub fn finalize(self, response_text: &str, response_sent: bool, error: Option<&str>) -> Value {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        let truncated: String = response_text.chars().take(500).collect();
        let mut record = json!({
            "ts": Utc::now().to_rfc3339(),
            "mode": self.mode.as_str(),
            "user_message": self.user_message,
            "steps": self.steps,
            "response_text": truncated,
            "response_sent": response_sent,
            "duration_ms": duration_ms,
        });
        if let Some(error) = error {
            record["error"] = json!(error);
        }
        record
    }
}

/// Appends run records to the JSONL file and reads them back for /logs.
pub struct RunLogWriter {
    log_file: PathBuf,
}

impl RunLogWriter {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            log_file: state_dir.join("logs").join(LOG_FILE_NAME),
        }
    }

    /// Append one record. Logging must never take the run down, so failures
    /// are warned and dropped.
    pub async fn append(&self, record: &Value) {
        info!(target: "interaction_log", "{}", record);

        if let Some(dir) = self.log_file.parent() {
            if let Err(e) = tokio::fs::create_dir_all(dir).await {
                warn!(error = %e, "Failed to create run log directory");
                return;
            }
        }
        if let Err(e) = self.rotate_if_needed().await {
            warn!(error = %e, "Failed to rotate run log");
        }

        let line = format!("{}\n", record);
        let result = async {
            use tokio::io::AsyncWriteExt;
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.log_file)
                .await?;
            file.write_all(line.as_bytes()).await?;
            Ok::<_, std::io::Error>(())
        }
        .await;
        if let Err(e) = result {
            warn!(error = %e, "Failed to write run log entry");
        }
    }

    /// Keep the file under the size cap by dropping the older half.
    async fn rotate_if_needed(&self) -> std::io::Result<()> {
        let meta = match tokio::fs::metadata(&self.log_file).await {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if meta.len() <= MAX_LOG_SIZE_BYTES {
            return Ok(());
        }

        let content = tokio::fs::read_to_string(&self.log_file).await?;
        let lines: Vec<&str> = content.lines().collect();
        let keep_from = lines.len() / 2;
        let kept = lines[keep_from..].join("\n");
        tokio::fs::write(&self.log_file, format!("{}\n", kept)).await?;
        info!(
            kept = lines.len() - keep_from,
            total = lines.len(),
            "Rotated run log"
        );
        Ok(())
    }

    /// Read the most recent `count` records, optionally only failed runs
    /// (a recorded error or an undelivered response).
    pub async fn read_recent(&self, count: usize, errors_only: bool) -> Vec<Value> {
        let content = match tokio::fs::read_to_string(&self.log_file).await {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        let mut records: Vec<Value> = content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect();

        if errors_only {
            records.retain(|r| {
                r.get("error").is_some()
                    || !r["response_sent"].as_bool().unwrap_or(true)
                    || r["steps"]
                        .as_array()
                        .is_some_and(|steps| steps.iter().any(|s| s.get("error").is_some()))
            });
        }

        let skip = records.len().saturating_sub(count);
        records.split_off(skip)
    }
}
