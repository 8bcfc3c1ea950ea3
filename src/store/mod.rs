//! Task store boundary: the typed interface the daemon needs from the hosted
//! task database, plus the record/query model shared by every component.
//!
//! The concrete client lives in [`notion`]; everything else depends only on
//! the [`TaskStore`] trait so tests can substitute an in-memory store.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod notion;

pub use error::{StoreError, StoreErrorKind};

/// Record status. Open statuses are everything outside the terminal set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    Todo,
    ToSchedule,
    InProgress,
    Done,
    WontDo,
}

impl Status {
    pub const TERMINAL: [Status; 2] = [Status::Done, Status::WontDo];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "TODO",
            Status::ToSchedule => "To Schedule",
            Status::InProgress => "In progress",
            Status::Done => "Done",
            Status::WontDo => "Won't do",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "TODO" => Some(Status::Todo),
            "To Schedule" => Some(Status::ToSchedule),
            "In progress" => Some(Status::InProgress),
            "Done" => Some(Status::Done),
            "Won't do" => Some(Status::WontDo),
            _ => None,
        }
    }

    pub fn is_open(&self) -> bool {
        !matches!(self, Status::Done | Status::WontDo)
    }
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Importance / urgency level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    High,
    Medium,
    Low,
}

impl Level {
    pub fn as_str(&self) -> &'static str {
        match self {
            Level::High => "High",
            Level::Medium => "Medium",
            Level::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Level> {
        match s {
            "High" => Some(Level::High),
            "Medium" => Some(Level::Medium),
            "Low" => Some(Level::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Category {
    MustDo,
    NiceToHave,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::MustDo => "Must Do",
            Category::NiceToHave => "Nice to have",
        }
    }

    pub fn parse(s: &str) -> Option<Category> {
        match s {
            "Must Do" => Some(Category::MustDo),
            "Nice to have" => Some(Category::NiceToHave),
            _ => None,
        }
    }
}

/// One task record as read back from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: String,
    pub title: String,
    pub status: Status,
    pub action_date: Option<NaiveDate>,
    pub importance: Option<Level>,
    pub urgency: Option<Level>,
    pub category: Option<Category>,
    pub tags: Vec<String>,
    pub products: Vec<String>,
    pub link: Option<String>,
    pub created_at: DateTime<Utc>,
    pub edited_at: DateTime<Utc>,
}

/// Fields for creating a record. Only `title` is required; `status` defaults
/// to the open TODO state when unset.
#[derive(Debug, Clone, Default)]
pub struct TaskFields {
    pub title: String,
    pub status: Option<Status>,
    pub importance: Option<Level>,
    pub urgency: Option<Level>,
    pub category: Option<Category>,
    pub tags: Vec<String>,
    pub products: Vec<String>,
    pub action_date: Option<NaiveDate>,
    pub link: Option<String>,
}

/// Partial update. Only `Some` fields are written; unset fields are left
/// untouched in the store, never nulled out.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<Status>,
    pub importance: Option<Level>,
    pub urgency: Option<Level>,
    pub category: Option<Category>,
    pub tags: Option<Vec<String>>,
    pub products: Option<Vec<String>>,
    pub action_date: Option<NaiveDate>,
    pub link: Option<String>,
}

impl TaskPatch {
    pub fn status(status: Status) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.status.is_none()
            && self.importance.is_none()
            && self.urgency.is_none()
            && self.category.is_none()
            && self.tags.is_none()
            && self.products.is_none()
            && self.action_date.is_none()
            && self.link.is_none()
    }
}

/// A typed body content block (heading levels, paragraph, divider).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Heading1 { text: String },
    Heading2 { text: String },
    Heading3 { text: String },
    Paragraph { text: String },
    Divider,
}

impl ContentBlock {
    /// Plain-text rendering used when flattening body content for the model.
    pub fn plain_text(&self) -> Option<&str> {
        match self {
            ContentBlock::Heading1 { text }
            | ContentBlock::Heading2 { text }
            | ContentBlock::Heading3 { text }
            | ContentBlock::Paragraph { text } => Some(text),
            ContentBlock::Divider => None,
        }
    }
}

/// Closed filter model serialized to the wire format by the concrete client.
#[derive(Debug, Clone)]
pub enum Filter {
    TitleContains(String),
    StatusEquals(Status),
    StatusNotIn(Vec<Status>),
    DueBefore(NaiveDate),
    DueOn(NaiveDate),
    DueAfter(NaiveDate),
    DueOnOrBefore(NaiveDate),
    CreatedBefore(DateTime<Utc>),
    EditedBefore(DateTime<Utc>),
    And(Vec<Filter>),
    Or(Vec<Filter>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortKey {
    ActionDate,
    CreatedTime,
    EditedTime,
    Status,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDir {
    Ascending,
    Descending,
}

#[derive(Debug, Clone)]
pub struct Sort {
    pub key: SortKey,
    pub dir: SortDir,
}

impl Sort {
    pub fn asc(key: SortKey) -> Self {
        Self {
            key,
            dir: SortDir::Ascending,
        }
    }

    pub fn desc(key: SortKey) -> Self {
        Self {
            key,
            dir: SortDir::Descending,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskQuery {
    pub filter: Filter,
    pub sorts: Vec<Sort>,
    pub page_size: u32,
    pub cursor: Option<String>,
}

impl TaskQuery {
    pub fn new(filter: Filter) -> Self {
        Self {
            filter,
            sorts: Vec::new(),
            page_size: 50,
            cursor: None,
        }
    }

    pub fn sorted(mut self, sort: Sort) -> Self {
        self.sorts.push(sort);
        self
    }

    pub fn page_size(mut self, size: u32) -> Self {
        self.page_size = size;
        self
    }

    pub fn after(mut self, cursor: Option<String>) -> Self {
        self.cursor = cursor;
        self
    }
}

/// One page of query results plus continuation state.
#[derive(Debug, Clone)]
pub struct QueryPage {
    pub records: Vec<TaskRecord>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// One page of body content blocks plus continuation state.
#[derive(Debug, Clone)]
pub struct BlockPage {
    pub blocks: Vec<ContentBlock>,
    pub next_cursor: Option<String>,
    pub has_more: bool,
}

/// The task database interface the daemon needs.
///
/// Rate-limit failures surface as `StoreError` with `RateLimit` kind and an
/// optional retry hint; implementations retry those internally with bounded
/// backoff before propagating.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Create a record and return it as stored.
    async fn create(&self, fields: &TaskFields) -> Result<TaskRecord, StoreError>;

    /// Run a filtered, sorted, paged query.
    async fn query(&self, query: &TaskQuery) -> Result<QueryPage, StoreError>;

    /// Apply a partial update to an existing record.
    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<(), StoreError>;

    /// Fetch a single record. Absent ids yield a typed not-found error.
    async fn get(&self, id: &str) -> Result<TaskRecord, StoreError>;

    /// List body content blocks, one page at a time.
    async fn list_children(
        &self,
        id: &str,
        cursor: Option<&str>,
    ) -> Result<BlockPage, StoreError>;

    /// Append body content blocks; returns the number appended.
    async fn append_children(
        &self,
        id: &str,
        blocks: &[ContentBlock],
    ) -> Result<usize, StoreError>;
}

/// Fetch the full body content of a record as plain text, following
/// continuation cursors to the end.
pub async fn fetch_body_text(store: &dyn TaskStore, id: &str) -> Result<String, StoreError> {
    let mut parts: Vec<String> = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = store.list_children(id, cursor.as_deref()).await?;
        parts.extend(
            page.blocks
                .iter()
                .filter_map(|b| b.plain_text())
                .map(|t| t.to_string()),
        );
        if !page.has_more {
            break;
        }
        cursor = page.next_cursor;
        if cursor.is_none() {
            break;
        }
    }
    Ok(parts.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_and_classifies() {
        for s in [
            Status::Todo,
            Status::ToSchedule,
            Status::InProgress,
            Status::Done,
            Status::WontDo,
        ] {
            assert_eq!(Status::parse(s.as_str()), Some(s));
        }
        assert!(Status::Todo.is_open());
        assert!(Status::InProgress.is_open());
        assert!(!Status::Done.is_open());
        assert!(!Status::WontDo.is_open());
        assert_eq!(Status::parse("Cancelled"), None);
    }

    #[test]
    fn empty_patch_is_detected() {
        assert!(TaskPatch::default().is_empty());
        assert!(!TaskPatch::status(Status::Done).is_empty());
    }

    #[test]
    fn content_block_plain_text() {
        assert_eq!(
            ContentBlock::Paragraph {
                text: "body".into()
            }
            .plain_text(),
            Some("body")
        );
        assert_eq!(ContentBlock::Divider.plain_text(), None);
    }
}
