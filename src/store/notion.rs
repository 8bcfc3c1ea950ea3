//! Concrete task-store client for the Notion API.
//!
//! Thin typed wrapper: builds wire-format filters/properties from the typed
//! query model, parses pages back into [`TaskRecord`], and retries
//! rate-limited calls with bounded backoff before surfacing the error.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{info, warn};

use super::error::{StoreError, StoreErrorKind};
use super::{
    BlockPage, ContentBlock, Filter, QueryPage, Sort, SortDir, SortKey, Status, TaskFields,
    TaskPatch, TaskQuery, TaskRecord, TaskStore,
};

const API_VERSION: &str = "2025-09-03";
const MAX_RETRIES: u32 = 3;

pub struct NotionStore {
    client: Client,
    base_url: String,
    api_key: String,
    database_id: String,
    data_source_id: String,
    /// Value written to the Source property so records created by the daemon
    /// are distinguishable in the database.
    source_tag: String,
}

impl NotionStore {
    pub fn new(
        api_key: &str,
        database_id: &str,
        data_source_id: &str,
        source_tag: &str,
    ) -> anyhow::Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        Ok(Self {
            client,
            base_url: "https://api.notion.com/v1".to_string(),
            api_key: api_key.to_string(),
            database_id: database_id.to_string(),
            data_source_id: data_source_id.to_string(),
            source_tag: source_tag.to_string(),
        })
    }

    /// Run a store call, retrying rate-limited failures with the server's
    /// retry hint when present, else doubling backoff (1s, 2s, 4s).
    async fn with_retry<T, Fut, F>(&self, make: F) -> Result<T, StoreError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let mut attempt: u32 = 0;
        loop {
            match make().await {
                Ok(v) => return Ok(v),
                Err(e) if e.kind == StoreErrorKind::RateLimit && attempt < MAX_RETRIES => {
                    let wait = e.retry_after_secs.unwrap_or(1u64 << attempt);
                    warn!(
                        wait_secs = wait,
                        attempt = attempt + 1,
                        max = MAX_RETRIES,
                        "Store rate limited, backing off"
                    );
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn execute(&self, req: reqwest::RequestBuilder) -> Result<Value, StoreError> {
        let resp = req
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Notion-Version", API_VERSION)
            .send()
            .await
            .map_err(|e| StoreError::network(&e))?;

        let status = resp.status().as_u16();
        let retry_header = resp
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<f64>().ok())
            .map(|v| v.ceil() as u64);
        let body = resp.text().await.map_err(|e| StoreError::network(&e))?;

        if !(200..300).contains(&status) {
            let mut err = StoreError::from_status(status, &body);
            if err.retry_after_secs.is_none() {
                err.retry_after_secs = retry_header;
            }
            return Err(err);
        }

        serde_json::from_str(&body)
            .map_err(|e| StoreError::other(format!("unparseable store response: {}", e)))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn build_create_properties(&self, fields: &TaskFields) -> Value {
        let mut props = json!({
            "Name": {"title": [{"text": {"content": fields.title}}]},
            "Status": {"select": {"name": fields.status.unwrap_or(Status::Todo).as_str()}},
            "Source": {"select": {"name": self.source_tag}},
        });
        if let Some(importance) = fields.importance {
            props["Importance"] = json!({"select": {"name": importance.as_str()}});
        }
        if let Some(urgency) = fields.urgency {
            props["Urgency"] = json!({"select": {"name": urgency.as_str()}});
        }
        if let Some(category) = fields.category {
            props["Category"] = json!({"select": {"name": category.as_str()}});
        }
        if !fields.tags.is_empty() {
            props["Tags"] = multi_select(&fields.tags);
        }
        if !fields.products.is_empty() {
            props["Product"] = multi_select(&fields.products);
        }
        if let Some(date) = fields.action_date {
            props["Action Date"] = json!({"date": {"start": date.to_string()}});
        }
        if let Some(ref link) = fields.link {
            props["Link"] = json!({"url": link});
        }
        props
    }
}

fn multi_select(values: &[String]) -> Value {
    json!({"multi_select": values.iter().map(|v| json!({"name": v})).collect::<Vec<_>>()})
}

/// Only `Some` fields end up in the property map, so the store never sees
/// (and never nulls) the fields the caller left unset.
fn build_patch_properties(patch: &TaskPatch) -> Value {
    let mut props = json!({});
    if let Some(ref title) = patch.title {
        props["Name"] = json!({"title": [{"text": {"content": title}}]});
    }
    if let Some(status) = patch.status {
        props["Status"] = json!({"select": {"name": status.as_str()}});
    }
    if let Some(importance) = patch.importance {
        props["Importance"] = json!({"select": {"name": importance.as_str()}});
    }
    if let Some(urgency) = patch.urgency {
        props["Urgency"] = json!({"select": {"name": urgency.as_str()}});
    }
    if let Some(category) = patch.category {
        props["Category"] = json!({"select": {"name": category.as_str()}});
    }
    if let Some(ref tags) = patch.tags {
        props["Tags"] = multi_select(tags);
    }
    if let Some(ref products) = patch.products {
        props["Product"] = multi_select(products);
    }
    if let Some(date) = patch.action_date {
        props["Action Date"] = json!({"date": {"start": date.to_string()}});
    }
    if let Some(ref link) = patch.link {
        props["Link"] = json!({"url": link});
    }
    props
}

/// Serialize the closed filter model to the wire format. Nested `And`s are
/// flattened into one `and` list, matching what the API expects for the
/// compound filters the daemon builds.
fn serialize_filter(filter: &Filter) -> Value {
    match filter {
        Filter::TitleContains(q) => json!({"property": "Name", "title": {"contains": q}}),
        Filter::StatusEquals(s) => {
            json!({"property": "Status", "select": {"equals": s.as_str()}})
        }
        Filter::StatusNotIn(statuses) => {
            let clauses: Vec<Value> = statuses
                .iter()
                .map(|s| json!({"property": "Status", "select": {"does_not_equal": s.as_str()}}))
                .collect();
            if clauses.len() == 1 {
                clauses.into_iter().next().unwrap()
            } else {
                json!({"and": clauses})
            }
        }
        Filter::DueBefore(d) => date_filter("before", *d),
        Filter::DueOn(d) => date_filter("equals", *d),
        Filter::DueAfter(d) => date_filter("after", *d),
        Filter::DueOnOrBefore(d) => date_filter("on_or_before", *d),
        Filter::CreatedBefore(ts) => {
            json!({"timestamp": "created_time", "created_time": {"before": ts.to_rfc3339()}})
        }
        Filter::EditedBefore(ts) => {
            json!({"timestamp": "last_edited_time", "last_edited_time": {"before": ts.to_rfc3339()}})
        }
        Filter::And(filters) => {
            let mut clauses = Vec::new();
            for f in filters {
                let v = serialize_filter(f);
                match v.get("and").and_then(|a| a.as_array()) {
                    Some(inner) => clauses.extend(inner.iter().cloned()),
                    None => clauses.push(v),
                }
            }
            json!({"and": clauses})
        }
        Filter::Or(filters) => {
            let clauses: Vec<Value> = filters.iter().map(serialize_filter).collect();
            json!({"or": clauses})
        }
    }
}

fn date_filter(op: &str, date: NaiveDate) -> Value {
    json!({"property": "Action Date", "date": {op: date.to_string()}})
}

fn serialize_sorts(sorts: &[Sort]) -> Vec<Value> {
    sorts
        .iter()
        .map(|s| {
            let direction = match s.dir {
                SortDir::Ascending => "ascending",
                SortDir::Descending => "descending",
            };
            match s.key {
                SortKey::ActionDate => {
                    json!({"property": "Action Date", "direction": direction})
                }
                SortKey::Status => json!({"property": "Status", "direction": direction}),
                SortKey::CreatedTime => {
                    json!({"timestamp": "created_time", "direction": direction})
                }
                SortKey::EditedTime => {
                    json!({"timestamp": "last_edited_time", "direction": direction})
                }
            }
        })
        .collect()
}

// ── Page parsing ────────────────────────────────────────────────

fn select_name(props: &Value, name: &str) -> Option<String> {
    props[name]["select"]["name"].as_str().map(|s| s.to_string())
}

fn multi_select_names(props: &Value, name: &str) -> Vec<String> {
    props[name]["multi_select"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|v| v["name"].as_str().map(|s| s.to_string()))
                .collect()
        })
        .unwrap_or_default()
}

fn parse_timestamp(page: &Value, field: &str) -> DateTime<Utc> {
    page[field]
        .as_str()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now)
}

pub(crate) fn parse_page(page: &Value) -> Result<TaskRecord, StoreError> {
    let id = page["id"]
        .as_str()
        .ok_or_else(|| StoreError::other("page without id"))?
        .to_string();
    let props = &page["properties"];

    let title = props["Name"]["title"]
        .as_array()
        .and_then(|t| t.first())
        .and_then(|t| t["plain_text"].as_str())
        .unwrap_or("")
        .to_string();

    let status = select_name(props, "Status")
        .as_deref()
        .and_then(Status::parse)
        .unwrap_or(Status::Todo);

    let action_date = props["Action Date"]["date"]["start"]
        .as_str()
        .and_then(|s| s.get(..10))
        .and_then(|s| s.parse::<NaiveDate>().ok());

    Ok(TaskRecord {
        id,
        title,
        status,
        action_date,
        importance: select_name(props, "Importance")
            .as_deref()
            .and_then(super::Level::parse),
        urgency: select_name(props, "Urgency")
            .as_deref()
            .and_then(super::Level::parse),
        category: select_name(props, "Category")
            .as_deref()
            .and_then(super::Category::parse),
        tags: multi_select_names(props, "Tags"),
        products: multi_select_names(props, "Product"),
        link: props["Link"]["url"].as_str().map(|s| s.to_string()),
        created_at: parse_timestamp(page, "created_time"),
        edited_at: parse_timestamp(page, "last_edited_time"),
    })
}

fn serialize_block(block: &ContentBlock) -> Value {
    fn rich_text(text: &str) -> Value {
        json!([{"type": "text", "text": {"content": text}}])
    }
    match block {
        ContentBlock::Heading1 { text } => {
            json!({"object": "block", "type": "heading_1", "heading_1": {"rich_text": rich_text(text)}})
        }
        ContentBlock::Heading2 { text } => {
            json!({"object": "block", "type": "heading_2", "heading_2": {"rich_text": rich_text(text)}})
        }
        ContentBlock::Heading3 { text } => {
            json!({"object": "block", "type": "heading_3", "heading_3": {"rich_text": rich_text(text)}})
        }
        ContentBlock::Paragraph { text } => {
            json!({"object": "block", "type": "paragraph", "paragraph": {"rich_text": rich_text(text)}})
        }
        ContentBlock::Divider => json!({"object": "block", "type": "divider", "divider": {}}),
    }
}

fn parse_block(block: &Value) -> Option<ContentBlock> {
    let block_type = block["type"].as_str()?;
    if block_type == "divider" {
        return Some(ContentBlock::Divider);
    }
    let text: String = block[block_type]["rich_text"]
        .as_array()?
        .iter()
        .filter_map(|rt| rt["plain_text"].as_str())
        .collect();
    match block_type {
        "heading_1" => Some(ContentBlock::Heading1 { text }),
        "heading_2" => Some(ContentBlock::Heading2 { text }),
        "heading_3" => Some(ContentBlock::Heading3 { text }),
        "paragraph" => Some(ContentBlock::Paragraph { text }),
        // Unsupported block types are flattened to paragraphs so body text
        // written by other clients still reaches the model.
        _ if !text.is_empty() => Some(ContentBlock::Paragraph { text }),
        _ => None,
    }
}

#[async_trait]
impl TaskStore for NotionStore {
    async fn create(&self, fields: &TaskFields) -> Result<TaskRecord, StoreError> {
        let body = json!({
            "parent": {"database_id": self.database_id},
            "properties": self.build_create_properties(fields),
        });
        let page = self
            .with_retry(|| async {
                self.execute(self.client.post(self.url("/pages")).json(&body))
                    .await
            })
            .await?;
        let record = parse_page(&page)?;
        info!(id = %record.id, title = %record.title, "Created task record");
        Ok(record)
    }

    async fn query(&self, query: &TaskQuery) -> Result<QueryPage, StoreError> {
        let mut body = json!({
            "filter": serialize_filter(&query.filter),
            "page_size": query.page_size,
        });
        if !query.sorts.is_empty() {
            body["sorts"] = Value::Array(serialize_sorts(&query.sorts));
        }
        if let Some(ref cursor) = query.cursor {
            body["start_cursor"] = json!(cursor);
        }

        let url = self.url(&format!("/data_sources/{}/query", self.data_source_id));
        let resp = self
            .with_retry(|| async { self.execute(self.client.post(&url).json(&body)).await })
            .await?;

        let records = resp["results"]
            .as_array()
            .map(|pages| pages.iter().filter_map(|p| parse_page(p).ok()).collect())
            .unwrap_or_default();

        Ok(QueryPage {
            records,
            next_cursor: resp["next_cursor"].as_str().map(|s| s.to_string()),
            has_more: resp["has_more"].as_bool().unwrap_or(false),
        })
    }

    async fn update(&self, id: &str, patch: &TaskPatch) -> Result<(), StoreError> {
        let body = json!({"properties": build_patch_properties(patch)});
        let url = self.url(&format!("/pages/{}", id));
        self.with_retry(|| async { self.execute(self.client.patch(&url).json(&body)).await })
            .await?;
        info!(id, "Updated task record");
        Ok(())
    }

    async fn get(&self, id: &str) -> Result<TaskRecord, StoreError> {
        let url = self.url(&format!("/pages/{}", id));
        let page = self
            .with_retry(|| async { self.execute(self.client.get(&url)).await })
            .await?;
        parse_page(&page)
    }

    async fn list_children(
        &self,
        id: &str,
        cursor: Option<&str>,
    ) -> Result<BlockPage, StoreError> {
        let mut url = format!(
            "{}?page_size=100",
            self.url(&format!("/blocks/{}/children", id))
        );
        if let Some(cursor) = cursor {
            url.push_str(&format!("&start_cursor={}", cursor));
        }
        let resp = self
            .with_retry(|| async { self.execute(self.client.get(&url)).await })
            .await?;

        let blocks = resp["results"]
            .as_array()
            .map(|arr| arr.iter().filter_map(parse_block).collect())
            .unwrap_or_default();

        Ok(BlockPage {
            blocks,
            next_cursor: resp["next_cursor"].as_str().map(|s| s.to_string()),
            has_more: resp["has_more"].as_bool().unwrap_or(false),
        })
    }

    async fn append_children(
        &self,
        id: &str,
        blocks: &[ContentBlock],
    ) -> Result<usize, StoreError> {
        let children: Vec<Value> = blocks.iter().map(serialize_block).collect();
        let body = json!({"children": children});
        let url = self.url(&format!("/blocks/{}/children", id));
        let resp = self
            .with_retry(|| async { self.execute(self.client.patch(&url).json(&body)).await })
            .await?;
        let appended = resp["results"]
            .as_array()
            .map(|a| a.len())
            .unwrap_or(blocks.len());
        Ok(appended)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Category, Level};

    #[test]
    fn parses_a_full_page() {
        let page = json!({
            "id": "abc-123",
            "created_time": "2026-01-02T09:00:00.000Z",
            "last_edited_time": "2026-02-03T10:00:00.000Z",
            "properties": {
                "Name": {"title": [{"plain_text": "Write release notes"}]},
                "Status": {"select": {"name": "In progress"}},
                "Action Date": {"date": {"start": "2026-02-06"}},
                "Importance": {"select": {"name": "High"}},
                "Urgency": {"select": null},
                "Category": {"select": {"name": "Must Do"}},
                "Tags": {"multi_select": [{"name": "Documentation"}]},
                "Product": {"multi_select": [{"name": "UIKit"}]},
                "Link": {"url": "https://example.com/pr/142"}
            }
        });
        let record = parse_page(&page).unwrap();
        assert_eq!(record.id, "abc-123");
        assert_eq!(record.title, "Write release notes");
        assert_eq!(record.status, Status::InProgress);
        assert_eq!(record.action_date, Some("2026-02-06".parse().unwrap()));
        assert_eq!(record.importance, Some(Level::High));
        assert_eq!(record.urgency, None);
        assert_eq!(record.category, Some(Category::MustDo));
        assert_eq!(record.tags, vec!["Documentation"]);
        assert_eq!(record.link.as_deref(), Some("https://example.com/pr/142"));
    }

    #[test]
    fn parses_a_sparse_page_with_defaults() {
        let page = json!({
            "id": "sparse",
            "properties": {
                "Name": {"title": []},
                "Status": {"select": null}
            }
        });
        let record = parse_page(&page).unwrap();
        assert_eq!(record.title, "");
        assert_eq!(record.status, Status::Todo);
        assert!(record.action_date.is_none());
        assert!(record.tags.is_empty());
    }

    #[test]
    fn patch_properties_only_include_present_fields() {
        let patch = TaskPatch {
            status: Some(Status::Done),
            link: Some("https://example.com".into()),
            ..Default::default()
        };
        let props = build_patch_properties(&patch);
        let keys: Vec<&String> = props.as_object().unwrap().keys().collect();
        assert_eq!(keys.len(), 2);
        assert!(props.get("Status").is_some());
        assert!(props.get("Link").is_some());
        assert!(props.get("Name").is_none());
        assert!(props.get("Action Date").is_none());
    }

    #[test]
    fn and_filters_flatten() {
        let filter = Filter::And(vec![
            Filter::TitleContains("login".into()),
            Filter::StatusNotIn(vec![Status::Done, Status::WontDo]),
        ]);
        let wire = serialize_filter(&filter);
        let clauses = wire["and"].as_array().unwrap();
        // 1 title clause + 2 flattened status clauses
        assert_eq!(clauses.len(), 3);
        assert_eq!(clauses[0]["title"]["contains"], "login");
        assert_eq!(clauses[1]["select"]["does_not_equal"], "Done");
        assert_eq!(clauses[2]["select"]["does_not_equal"], "Won't do");
    }

    #[test]
    fn block_round_trip() {
        let block = serialize_block(&ContentBlock::Heading2 {
            text: "Context".into(),
        });
        assert_eq!(block["type"], "heading_2");
        assert_eq!(
            block["heading_2"]["rich_text"][0]["text"]["content"],
            "Context"
        );

        let parsed = parse_block(&json!({
            "type": "paragraph",
            "paragraph": {"rich_text": [{"plain_text": "hello "}, {"plain_text": "world"}]}
        }));
        assert_eq!(
            parsed,
            Some(ContentBlock::Paragraph {
                text: "hello world".into()
            })
        );

        assert_eq!(
            parse_block(&json!({"type": "divider", "divider": {}})),
            Some(ContentBlock::Divider)
        );
    }
}
