//! Tool dispatcher: maps a structured tool invocation onto a task-store
//! effect and folds the outcome — success or failure — into a plain JSON
//! envelope. Nothing here ever propagates a fault out of a single tool call;
//! a failing invocation must not take down its siblings or the loop.

use std::sync::Arc;

use chrono::NaiveDate;
use futures::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::warn;

use super::tool_defs;
use crate::store::{
    fetch_body_text, Category, ContentBlock, Filter, Level, Sort, SortKey, Status, StoreError,
    StoreErrorKind, TaskFields, TaskPatch, TaskQuery, TaskStore,
};

/// Results returned by a title search, and the enrichment concurrency budget
/// that respects the store's rate limit.
const SEARCH_RESULT_CAP: usize = 10;
const SEARCH_PAGE_SIZE: u32 = 20;
const CONTENT_FETCH_CONCURRENCY: usize = 3;

/// Closed set of tools. Adding a tool is a compile-checked change here plus a
/// schema in `tool_defs` — there is no string-keyed fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    CreateTask,
    SearchTasks,
    UpdateTaskStatus,
    UpdateTaskFields,
    GetTaskDetail,
    AppendTaskContent,
    RequestUserConfirmation,
}

impl ToolKind {
    pub fn from_name(name: &str) -> Option<ToolKind> {
        match name {
            tool_defs::CREATE_TASK => Some(ToolKind::CreateTask),
            tool_defs::SEARCH_TASKS => Some(ToolKind::SearchTasks),
            tool_defs::UPDATE_TASK_STATUS => Some(ToolKind::UpdateTaskStatus),
            tool_defs::UPDATE_TASK_FIELDS => Some(ToolKind::UpdateTaskFields),
            tool_defs::GET_TASK_DETAIL => Some(ToolKind::GetTaskDetail),
            tool_defs::APPEND_TASK_CONTENT => Some(ToolKind::AppendTaskContent),
            tool_defs::REQUEST_USER_CONFIRMATION => Some(ToolKind::RequestUserConfirmation),
            _ => None,
        }
    }
}

/// A tool failure, carried as data so it can be folded into the envelope.
struct ToolError {
    kind: &'static str,
    message: String,
}

impl ToolError {
    fn invalid(message: impl Into<String>) -> Self {
        Self {
            kind: "invalid_input",
            message: message.into(),
        }
    }
}

impl From<StoreError> for ToolError {
    fn from(e: StoreError) -> Self {
        let kind = match e.kind {
            StoreErrorKind::NotFound => "not_found",
            StoreErrorKind::RateLimit => "rate_limited",
            StoreErrorKind::Validation => "validation",
            StoreErrorKind::Timeout | StoreErrorKind::Network => "unreachable",
            _ => "store_error",
        };
        Self {
            kind,
            message: e.to_string(),
        }
    }
}

pub struct ToolDispatcher {
    store: Arc<dyn TaskStore>,
}

impl ToolDispatcher {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    /// Execute one tool invocation. Always returns an envelope: a result map
    /// on success, `{"error": ..., "kind": ...}` on any failure, including an
    /// unrecognized tool name.
    pub async fn dispatch(&self, name: &str, input: &Value) -> Value {
        let Some(kind) = ToolKind::from_name(name) else {
            return json!({
                "error": format!("unknown tool: {}", name),
                "kind": "unknown_tool",
            });
        };

        match self.execute(kind, input).await {
            Ok(result) => result,
            Err(e) => {
                warn!(tool = name, kind = e.kind, error = %e.message, "Tool invocation failed");
                json!({"error": e.message, "kind": e.kind})
            }
        }
    }

    async fn execute(&self, kind: ToolKind, input: &Value) -> Result<Value, ToolError> {
        match kind {
            ToolKind::CreateTask => self.create_task(input).await,
            ToolKind::SearchTasks => self.search_tasks(input).await,
            ToolKind::UpdateTaskStatus => self.update_task_status(input).await,
            ToolKind::UpdateTaskFields => self.update_task_fields(input).await,
            ToolKind::GetTaskDetail => self.get_task_detail(input).await,
            ToolKind::AppendTaskContent => self.append_task_content(input).await,
            // Pure side-channel: no store effect. The loop captures the input
            // as the confirmation payload; the model just sees an ack.
            ToolKind::RequestUserConfirmation => Ok(json!({"status": "confirmation_sent"})),
        }
    }

    async fn create_task(&self, input: &Value) -> Result<Value, ToolError> {
        let fields = TaskFields {
            title: required_str(input, "name")?.to_string(),
            status: optional_status(input, "status")?,
            importance: optional_level(input, "importance")?,
            urgency: optional_level(input, "urgency")?,
            category: optional_category(input)?,
            tags: string_list(input, "tags"),
            products: string_list(input, "product"),
            action_date: optional_date(input, "action_date")?,
            link: input["link"].as_str().map(|s| s.to_string()),
        };

        let record = self.store.create(&fields).await?;
        Ok(json!({"success": true, "page_id": record.id, "name": record.title}))
    }

    async fn search_tasks(&self, input: &Value) -> Result<Value, ToolError> {
        let query = required_str(input, "query")?;
        let active_only = input["active_only"].as_bool().unwrap_or(true);

        let filter = if active_only {
            Filter::And(vec![
                Filter::TitleContains(query.to_string()),
                Filter::StatusNotIn(Status::TERMINAL.to_vec()),
            ])
        } else {
            Filter::TitleContains(query.to_string())
        };
        let page = self
            .store
            .query(
                &TaskQuery::new(filter)
                    .sorted(Sort::desc(SortKey::EditedTime))
                    .page_size(SEARCH_PAGE_SIZE),
            )
            .await?;

        let total = page.records.len();
        let store = self.store.clone();
        let tasks: Vec<Value> = stream::iter(page.records.into_iter().take(SEARCH_RESULT_CAP))
            .map(|record| {
                let store = store.clone();
                async move {
                    let body = fetch_body_text(store.as_ref(), &record.id)
                        .await
                        .unwrap_or_default();
                    json!({
                        "page_id": record.id,
                        "title": record.title,
                        "status": record.status.as_str(),
                        "action_date": record.action_date.map(|d| d.to_string()),
                        "body_content": if body.is_empty() { "(no body content)".to_string() } else { body },
                    })
                }
            })
            .buffered(CONTENT_FETCH_CONCURRENCY)
            .collect()
            .await;

        Ok(json!({"count": total, "tasks": tasks}))
    }

    async fn update_task_status(&self, input: &Value) -> Result<Value, ToolError> {
        let page_id = required_str(input, "page_id")?;
        let new_status = required_status(input, "new_status")?;
        self.store
            .update(page_id, &TaskPatch::status(new_status))
            .await?;
        Ok(json!({"success": true, "page_id": page_id, "status": new_status.as_str()}))
    }

    async fn update_task_fields(&self, input: &Value) -> Result<Value, ToolError> {
        let page_id = required_str(input, "page_id")?;

        let patch = TaskPatch {
            title: input["name"].as_str().map(|s| s.to_string()),
            status: optional_status(input, "status")?,
            importance: optional_level(input, "importance")?,
            urgency: optional_level(input, "urgency")?,
            category: optional_category(input)?,
            tags: input.get("tags").and_then(|v| v.as_array()).map(|_| string_list(input, "tags")),
            products: input
                .get("product")
                .and_then(|v| v.as_array())
                .map(|_| string_list(input, "product")),
            action_date: optional_date(input, "action_date")?,
            link: input["link"].as_str().map(|s| s.to_string()),
        };
        if patch.is_empty() {
            return Err(ToolError::invalid("no fields to update"));
        }

        let updated: Vec<&str> = [
            patch.title.is_some().then_some("name"),
            patch.status.is_some().then_some("status"),
            patch.importance.is_some().then_some("importance"),
            patch.urgency.is_some().then_some("urgency"),
            patch.category.is_some().then_some("category"),
            patch.tags.is_some().then_some("tags"),
            patch.products.is_some().then_some("product"),
            patch.action_date.is_some().then_some("action_date"),
            patch.link.is_some().then_some("link"),
        ]
        .into_iter()
        .flatten()
        .collect();

        self.store.update(page_id, &patch).await?;
        Ok(json!({"success": true, "page_id": page_id, "updated": updated}))
    }

    async fn get_task_detail(&self, input: &Value) -> Result<Value, ToolError> {
        let page_id = required_str(input, "page_id")?;
        let record = self.store.get(page_id).await?;
        let body = fetch_body_text(self.store.as_ref(), page_id).await?;

        Ok(json!({
            "page_id": record.id,
            "title": record.title,
            "status": record.status.as_str(),
            "action_date": record.action_date.map(|d| d.to_string()),
            "importance": record.importance.map(|l| l.as_str()),
            "urgency": record.urgency.map(|l| l.as_str()),
            "category": record.category.map(|c| c.as_str()),
            "tags": record.tags,
            "product": record.products,
            "link": record.link,
            "body_content": if body.is_empty() { "(no body content)".to_string() } else { body },
        }))
    }

    async fn append_task_content(&self, input: &Value) -> Result<Value, ToolError> {
        let page_id = required_str(input, "page_id")?;
        let raw_blocks = input["blocks"]
            .as_array()
            .ok_or_else(|| ToolError::invalid("missing required parameter: blocks"))?;

        let mut blocks = Vec::with_capacity(raw_blocks.len());
        for raw in raw_blocks {
            blocks.push(parse_content_block(raw)?);
        }
        if blocks.is_empty() {
            return Err(ToolError::invalid("blocks must not be empty"));
        }

        let appended = self.store.append_children(page_id, &blocks).await?;
        Ok(json!({"success": true, "page_id": page_id, "appended": appended}))
    }
}

fn parse_content_block(raw: &Value) -> Result<ContentBlock, ToolError> {
    let block_type = raw["type"]
        .as_str()
        .ok_or_else(|| ToolError::invalid("block missing type"))?;
    let text = || raw["text"].as_str().unwrap_or("").to_string();
    match block_type {
        "heading_1" => Ok(ContentBlock::Heading1 { text: text() }),
        "heading_2" => Ok(ContentBlock::Heading2 { text: text() }),
        "heading_3" => Ok(ContentBlock::Heading3 { text: text() }),
        "paragraph" => Ok(ContentBlock::Paragraph { text: text() }),
        "divider" => Ok(ContentBlock::Divider),
        other => Err(ToolError::invalid(format!("unsupported block type: {}", other))),
    }
}

// ── Input parsing helpers ───────────────────────────────────────

fn required_str<'a>(input: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    input[key]
        .as_str()
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| ToolError::invalid(format!("missing required parameter: {}", key)))
}

fn required_status(input: &Value, key: &str) -> Result<Status, ToolError> {
    let raw = required_str(input, key)?;
    Status::parse(raw).ok_or_else(|| ToolError::invalid(format!("invalid status: {}", raw)))
}

fn optional_status(input: &Value, key: &str) -> Result<Option<Status>, ToolError> {
    match input[key].as_str() {
        None => Ok(None),
        Some(raw) => Status::parse(raw)
            .map(Some)
            .ok_or_else(|| ToolError::invalid(format!("invalid status: {}", raw))),
    }
}

fn optional_level(input: &Value, key: &str) -> Result<Option<Level>, ToolError> {
    match input[key].as_str() {
        None => Ok(None),
        Some(raw) => Level::parse(raw)
            .map(Some)
            .ok_or_else(|| ToolError::invalid(format!("invalid {}: {}", key, raw))),
    }
}

fn optional_category(input: &Value) -> Result<Option<Category>, ToolError> {
    match input["category"].as_str() {
        None => Ok(None),
        Some(raw) => Category::parse(raw)
            .map(Some)
            .ok_or_else(|| ToolError::invalid(format!("invalid category: {}", raw))),
    }
}

fn optional_date(input: &Value, key: &str) -> Result<Option<NaiveDate>, ToolError> {
    match input[key].as_str() {
        None => Ok(None),
        Some(raw) => raw
            .parse::<NaiveDate>()
            .map(Some)
            .map_err(|_| ToolError::invalid(format!("invalid date (expected YYYY-MM-DD): {}", raw))),
    }
}

fn string_list(input: &Value, key: &str) -> Vec<String> {
    input[key]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}
