//! Test infrastructure: MockProvider, MemoryStore, and TestChannel.
//!
//! Scripted fakes for the three external collaborators, so tests can exercise
//! the real agent loop, cleanup queue, and digest controller without network.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;

use crate::channels::{Button, Channel, MessageId};
use crate::providers::{CompletionProvider, CompletionResponse, ContentPart};
use crate::store::{
    BlockPage, ContentBlock, Filter, QueryPage, Sort, SortDir, SortKey, Status, StoreError,
    TaskFields, TaskPatch, TaskQuery, TaskRecord, TaskStore,
};

// ---------------------------------------------------------------------------
// MockProvider
// ---------------------------------------------------------------------------

/// A recorded call to `MockProvider::complete()`.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct MockCall {
    pub system: String,
    pub messages: Vec<Value>,
    pub tools: Vec<Value>,
}

/// Completion provider returning a FIFO queue of scripted responses.
pub struct MockProvider {
    responses: Mutex<Vec<Result<CompletionResponse, String>>>,
    calls: Arc<Mutex<Vec<MockCall>>>,
}

impl MockProvider {
    pub fn with_responses(responses: Vec<Result<CompletionResponse, String>>) -> Self {
        Self {
            responses: Mutex::new(responses),
            calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the call log, usable after the provider moves into
    /// the agent.
    pub fn calls(&self) -> Arc<Mutex<Vec<MockCall>>> {
        self.calls.clone()
    }

    /// Helper: a text-only response.
    pub fn text(text: &str) -> CompletionResponse {
        CompletionResponse {
            parts: vec![ContentPart::Text {
                text: text.to_string(),
            }],
        }
    }

    /// Helper: a single tool invocation response.
    pub fn tool_use(id: &str, name: &str, input: Value) -> CompletionResponse {
        Self::tool_uses(vec![(id, name, input)])
    }

    /// Helper: a response with several tool invocations in one round.
    pub fn tool_uses(uses: Vec<(&str, &str, Value)>) -> CompletionResponse {
        CompletionResponse {
            parts: uses
                .into_iter()
                .map(|(id, name, input)| ContentPart::ToolUse {
                    id: id.to_string(),
                    name: name.to_string(),
                    input,
                })
                .collect(),
        }
    }
}

#[async_trait]
impl CompletionProvider for MockProvider {
    async fn complete(
        &self,
        system: &str,
        messages: &[Value],
        tools: &[Value],
    ) -> anyhow::Result<CompletionResponse> {
        self.calls.lock().unwrap().push(MockCall {
            system: system.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
        });

        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Ok(Self::text("Mock response"));
        }
        responses.remove(0).map_err(|e| anyhow::anyhow!(e))
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory task store with filter evaluation, failure injection, and write
/// counters for exactly-once assertions.
pub struct MemoryStore {
    records: Mutex<Vec<TaskRecord>>,
    children: Mutex<HashMap<String, Vec<ContentBlock>>>,
    next_id: AtomicU64,
    update_count: AtomicUsize,
    fail_updates: AtomicBool,
    fail_queries: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            children: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            update_count: AtomicUsize::new(0),
            fail_updates: AtomicBool::new(false),
            fail_queries: AtomicBool::new(false),
        }
    }

    fn fresh_id(&self) -> String {
        format!("task-{}", self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn seed(&self, title: &str, status: Status) -> String {
        self.seed_record(title, status, Utc::now(), None)
    }

    pub fn seed_aged(&self, title: &str, status: Status, created_at: DateTime<Utc>) -> String {
        self.seed_record(title, status, created_at, None)
    }

    pub fn seed_due(&self, title: &str, status: Status, due: NaiveDate) -> String {
        self.seed_record(title, status, Utc::now(), Some(due))
    }

    pub fn seed_record(
        &self,
        title: &str,
        status: Status,
        created_at: DateTime<Utc>,
        action_date: Option<NaiveDate>,
    ) -> String {
        let id = self.fresh_id();
        self.records.lock().unwrap().push(TaskRecord {
            id: id.clone(),
            title: title.to_string(),
            status,
            action_date,
            importance: None,
            urgency: None,
            category: None,
            tags: Vec::new(),
            products: Vec::new(),
            link: None,
            created_at,
            edited_at: created_at,
        });
        id
    }

    pub fn set_body(&self, id: &str, blocks: Vec<ContentBlock>) {
        self.children.lock().unwrap().insert(id.to_string(), blocks);
    }

    pub fn get_record(&self, id: &str) -> Option<TaskRecord> {
        self.records
            .lock()
            .unwrap()
            .iter()
            .find(|r| r.id == id)
            .cloned()
    }

    pub fn all_records(&self) -> Vec<TaskRecord> {
        self.records.lock().unwrap().clone()
    }

    /// Number of `update` calls that reached the store.
    pub fn update_count(&self) -> usize {
        self.update_count.load(Ordering::Relaxed)
    }

    pub fn set_fail_updates(&self, fail: bool) {
        self.fail_updates.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_queries(&self, fail: bool) {
        self.fail_queries.store(fail, Ordering::Relaxed);
    }

    fn matches(record: &TaskRecord, filter: &Filter) -> bool {
        match filter {
            Filter::TitleContains(q) => {
                record.title.to_lowercase().contains(&q.to_lowercase())
            }
            Filter::StatusEquals(s) => record.status == *s,
            Filter::StatusNotIn(set) => !set.contains(&record.status),
            Filter::DueBefore(d) => record.action_date.is_some_and(|due| due < *d),
            Filter::DueOn(d) => record.action_date == Some(*d),
            Filter::DueAfter(d) => record.action_date.is_some_and(|due| due > *d),
            Filter::DueOnOrBefore(d) => record.action_date.is_some_and(|due| due <= *d),
            Filter::CreatedBefore(ts) => record.created_at < *ts,
            Filter::EditedBefore(ts) => record.edited_at < *ts,
            Filter::And(filters) => filters.iter().all(|f| Self::matches(record, f)),
            Filter::Or(filters) => filters.iter().any(|f| Self::matches(record, f)),
        }
    }

    fn apply_sorts(records: &mut [TaskRecord], sorts: &[Sort]) {
        if let Some(sort) = sorts.first() {
            records.sort_by(|a, b| {
                let ord = match sort.key {
                    SortKey::ActionDate => a.action_date.cmp(&b.action_date),
                    SortKey::CreatedTime => a.created_at.cmp(&b.created_at),
                    SortKey::EditedTime => a.edited_at.cmp(&b.edited_at),
                    SortKey::Status => a.status.as_str().cmp(b.status.as_str()),
                };
                match sort.dir {
                    SortDir::Ascending => ord,
                    SortDir::Descending => ord.reverse(),
                }
            });
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for MemoryStore {
    async fn create(&self, fields: &TaskFields) -> Result<TaskRecord, StoreError> {
        let now = Utc::now();
        let record = TaskRecord {
            id: self.fresh_id(),
            title: fields.title.clone(),
            status: fields.status.unwrap_or(Status::Todo),
            action_date: fields.action_date,
            importance: fields.importance,
            urgency: fields.urgency,
            category: fields.category,
            tags: fields.tags.clone(),
            products: fields.products.clone(),
            link: fields.link.clone(),
            created_at: now,
            edited_at: now,
        };
        self.records.lock().unwrap().push(record.clone());
        Ok(record)
    }

    async fn query(&self, query: &TaskQuery) -> Result<QueryPage, StoreError> {
        if self.fail_queries.load(Ordering::Relaxed) {
            return Err(StoreError::from_status(503, "injected query failure"));
        }

        let mut matched: Vec<TaskRecord> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter(|r| Self::matches(r, &query.filter))
            .cloned()
            .collect();
        Self::apply_sorts(&mut matched, &query.sorts);

        let offset: usize = query
            .cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let end = (offset + query.page_size as usize).min(matched.len());
        let has_more = end < matched.len();
        let records = matched[offset.min(end)..end].to_vec();

        Ok(QueryPage {
            records,
            next_cursor: has_more.then(|| end.to_string()),
            has_more,
        })
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<(), StoreError> {
        if self.fail_updates.load(Ordering::Relaxed) {
            return Err(StoreError::from_status(503, "injected update failure"));
        }

        let mut records = self.records.lock().unwrap();
        let record = records
            .iter_mut()
            .find(|r| r.id == id)
            .ok_or_else(|| StoreError::not_found(id))?;

        if let Some(ref title) = patch.title {
            record.title = title.clone();
        }
        if let Some(status) = patch.status {
            record.status = status;
        }
        if let Some(importance) = patch.importance {
            record.importance = Some(importance);
        }
        if let Some(urgency) = patch.urgency {
            record.urgency = Some(urgency);
        }
        if let Some(category) = patch.category {
            record.category = Some(category);
        }
        if let Some(ref tags) = patch.tags {
            record.tags = tags.clone();
        }
        if let Some(ref products) = patch.products {
            record.products = products.clone();
        }
        if let Some(date) = patch.action_date {
            record.action_date = Some(date);
        }
        if let Some(ref link) = patch.link {
            record.link = Some(link.clone());
        }
        record.edited_at = Utc::now();

        self.update_count.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<TaskRecord, StoreError> {
        self.get_record(id).ok_or_else(|| StoreError::not_found(id))
    }

    async fn list_children(
        &self,
        id: &str,
        _cursor: Option<&str>,
    ) -> Result<BlockPage, StoreError> {
        let blocks = self
            .children
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .unwrap_or_default();
        Ok(BlockPage {
            blocks,
            next_cursor: None,
            has_more: false,
        })
    }

    async fn append_children(
        &self,
        id: &str,
        blocks: &[ContentBlock],
    ) -> Result<usize, StoreError> {
        let mut children = self.children.lock().unwrap();
        children
            .entry(id.to_string())
            .or_default()
            .extend(blocks.iter().cloned());
        Ok(blocks.len())
    }
}

// ---------------------------------------------------------------------------
// TestChannel
// ---------------------------------------------------------------------------

/// Captured outbound message.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct SentMessage {
    pub id: MessageId,
    pub text: String,
    pub buttons: Vec<Vec<Button>>,
}

/// Chat channel that records every send and edit; sends and edits can be made
/// to fail on demand.
pub struct TestChannel {
    pub sent: Mutex<Vec<SentMessage>>,
    pub edits: Mutex<Vec<(MessageId, String)>>,
    next_id: AtomicI64,
    fail_sends: AtomicBool,
    fail_edits: AtomicBool,
}

impl TestChannel {
    pub fn new() -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            edits: Mutex::new(Vec::new()),
            next_id: AtomicI64::new(1),
            fail_sends: AtomicBool::new(false),
            fail_edits: AtomicBool::new(false),
        }
    }

    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    pub fn set_fail_edits(&self, fail: bool) {
        self.fail_edits.store(fail, Ordering::Relaxed);
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|m| m.text.clone()).collect()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn edit_count(&self) -> usize {
        self.edits.lock().unwrap().len()
    }
}

impl Default for TestChannel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for TestChannel {
    async fn send_text(&self, text: &str) -> anyhow::Result<MessageId> {
        self.send_with_buttons(text, &[]).await
    }

    async fn send_with_buttons(
        &self,
        text: &str,
        buttons: &[Vec<Button>],
    ) -> anyhow::Result<MessageId> {
        if self.fail_sends.load(Ordering::Relaxed) {
            anyhow::bail!("injected send failure");
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.sent.lock().unwrap().push(SentMessage {
            id,
            text: text.to_string(),
            buttons: buttons.to_vec(),
        });
        Ok(id)
    }

    async fn edit_text(&self, message_id: MessageId, text: &str) -> anyhow::Result<()> {
        if self.fail_edits.load(Ordering::Relaxed) {
            anyhow::bail!("injected edit failure");
        }
        self.edits
            .lock()
            .unwrap()
            .push((message_id, text.to_string()));
        Ok(())
    }
}
