//! Workspace snapshot builder.
//!
//! Issues the fixed set of read-only queries concurrently and assembles a
//! compact, id-annotated text digest used as grounding context for proactive
//! runs. On timeout or any query failure the snapshot degrades to empty —
//! the caller proceeds without grounding rather than failing the run.

use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, Local, Utc};
use tracing::error;

use crate::store::{
    Filter, Sort, SortKey, Status, StoreError, TaskQuery, TaskRecord, TaskStore,
};

const SNAPSHOT_TIMEOUT: Duration = Duration::from_secs(30);
const SECTION_CAP: usize = 10;
const STALE_SECTION_CAP: usize = 5;
const STALE_EDIT_AGE_WEEKS: i64 = 2;

/// Fetch live workspace state and render the snapshot block. Empty string on
/// timeout or failure.
pub async fn build_workspace_snapshot(store: &dyn TaskStore, now: DateTime<Local>) -> String {
    let today = now.date_naive();

    // Rest of this week: tomorrow through Sunday.
    let days_until_sunday = 6 - today.weekday().num_days_from_monday() as i64;
    let end_of_week = today + ChronoDuration::days(days_until_sunday.max(0));
    let stale_cutoff = Utc::now() - ChronoDuration::weeks(STALE_EDIT_AGE_WEEKS);

    let open_filter = Filter::StatusNotIn(Status::TERMINAL.to_vec());

    let overdue_query = TaskQuery::new(Filter::And(vec![
        Filter::DueBefore(today),
        open_filter.clone(),
    ]))
    .sorted(Sort::asc(SortKey::ActionDate));

    let today_query = TaskQuery::new(Filter::And(vec![
        Filter::DueOn(today),
        open_filter.clone(),
    ]))
    .sorted(Sort::asc(SortKey::Status));

    let week_query = TaskQuery::new(Filter::And(vec![
        Filter::DueAfter(today),
        Filter::DueOnOrBefore(end_of_week),
        open_filter,
    ]))
    .sorted(Sort::asc(SortKey::ActionDate));

    // Stale: actionable statuses only, untouched for 2+ weeks.
    let stale_query = TaskQuery::new(Filter::And(vec![
        Filter::StatusNotIn(vec![Status::Done, Status::WontDo, Status::ToSchedule]),
        Filter::EditedBefore(stale_cutoff),
    ]))
    .sorted(Sort::asc(SortKey::EditedTime));

    let fetched = tokio::time::timeout(SNAPSHOT_TIMEOUT, async {
        tokio::try_join!(
            store.query(&overdue_query),
            store.query(&today_query),
            store.query(&week_query),
            store.query(&stale_query),
            count_open(store),
        )
    })
    .await;

    let (overdue, due_today, week, stale, (in_progress, todo)) = match fetched {
        Ok(Ok(results)) => results,
        Ok(Err(e)) => {
            error!(error = %e, "Workspace snapshot query failed");
            return String::new();
        }
        Err(_) => {
            error!("Workspace snapshot fetch timed out after 30s");
            return String::new();
        }
    };

    let sections = [
        format!("📊 Active tasks: {} in progress, {} TODO", in_progress, todo),
        String::new(),
        format!("🔴 Overdue ({}):", overdue.records.len()),
        format_section(&overdue.records, SECTION_CAP),
        String::new(),
        format!("🟡 Due today ({}):", due_today.records.len()),
        format_section(&due_today.records, SECTION_CAP),
        String::new(),
        format!("🔵 Rest of this week ({}):", week.records.len()),
        format_section(&week.records, SECTION_CAP),
        String::new(),
        format!(
            "⚪ Stale (no update for {}+ weeks) ({}):",
            STALE_EDIT_AGE_WEEKS,
            stale.records.len()
        ),
        format_section(&stale.records, STALE_SECTION_CAP),
    ];

    format!(
        "## Current workspace snapshot (live from the task database)\n\
         (body content not included — call get_task_detail when content is needed)\n\n{}",
        sections.join("\n")
    )
}

/// Count open records per status, paging through to the end.
async fn count_open(store: &dyn TaskStore) -> Result<(usize, usize), StoreError> {
    let mut counts = [0usize; 2];
    for (slot, status) in [Status::InProgress, Status::Todo].into_iter().enumerate() {
        let mut cursor: Option<String> = None;
        loop {
            let page = store
                .query(
                    &TaskQuery::new(Filter::StatusEquals(status))
                        .page_size(100)
                        .after(cursor.take()),
                )
                .await?;
            counts[slot] += page.records.len();
            if !page.has_more {
                break;
            }
            cursor = page.next_cursor;
            if cursor.is_none() {
                break;
            }
        }
    }
    Ok((counts[0], counts[1]))
}

/// Render one bounded section. Every line carries the record's store id so a
/// follow-up tool call can reference it without a second search round.
fn format_section(records: &[TaskRecord], cap: usize) -> String {
    if records.is_empty() {
        return "  (none)".to_string();
    }
    let mut lines: Vec<String> = records
        .iter()
        .take(cap)
        .map(|r| {
            let due = r
                .action_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "no date".to_string());
            format!("  - {} [{}] (due: {}) [id:{}]", r.title, r.status, due, r.id)
        })
        .collect();
    if records.len() > cap {
        lines.push(format!("  ... and {} more", records.len() - cap));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn snapshot_groups_by_category_and_annotates_ids() {
        let store = MemoryStore::new();
        let today = Local::now().date_naive();
        let overdue_id = store.seed_due("Fix login bug", Status::Todo, today - ChronoDuration::days(3));
        store.seed_due("Ship release", Status::InProgress, today);
        store.seed("No deadline", Status::Todo);

        let text = build_workspace_snapshot(&store, Local::now()).await;
        assert!(text.contains("🔴 Overdue (1):"));
        assert!(text.contains(&format!("[id:{}]", overdue_id)));
        assert!(text.contains("🟡 Due today (1):"));
        assert!(text.contains("Ship release"));
        assert!(text.contains("Active tasks: 1 in progress, 2 TODO"));
    }

    #[tokio::test]
    async fn sections_cap_with_and_n_more() {
        let store = MemoryStore::new();
        let today = Local::now().date_naive();
        for i in 0..13 {
            store.seed_due(&format!("overdue {}", i), Status::Todo, today - ChronoDuration::days(2));
        }

        let text = build_workspace_snapshot(&store, Local::now()).await;
        assert!(text.contains("🔴 Overdue (13):"));
        assert!(text.contains("... and 3 more"));
    }

    #[tokio::test]
    async fn empty_workspace_renders_none_markers() {
        let store = MemoryStore::new();
        let text = build_workspace_snapshot(&store, Local::now()).await;
        assert!(text.contains("  (none)"));
        assert!(text.contains("Active tasks: 0 in progress, 0 TODO"));
    }

    #[tokio::test]
    async fn query_failure_degrades_to_empty() {
        let store = MemoryStore::new();
        store.seed("whatever", Status::Todo);
        store.set_fail_queries(true);
        let text = build_workspace_snapshot(&store, Local::now()).await;
        assert!(text.is_empty());
    }
}
