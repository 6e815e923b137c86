use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::db;
use crate::domain::activity::{ActivityAction, ActivityEntry};

/// Read side of the audit trail. Rows are written only by item transitions.
pub struct ActivityLog<'a> {
    conn: &'a Connection,
    owner_id: &'a str,
}

impl<'a> ActivityLog<'a> {
    pub fn new(conn: &'a Connection, owner_id: &'a str) -> Self {
        Self { conn, owner_id }
    }

    /// Newest first; ties keep reverse insertion order.
    pub fn list_for_item(&self, item_id: &str) -> rusqlite::Result<Vec<ActivityEntry>> {
        db::list_activities(self.conn, self.owner_id, item_id)
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimelineLine {
    pub at: String,
    pub action: String,
    pub summary: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

pub fn timeline(entries: &[ActivityEntry]) -> Vec<TimelineLine> {
    entries
        .iter()
        .map(|entry| TimelineLine {
            at: entry.created_at.clone(),
            action: entry.action.to_string(),
            summary: describe(entry),
            note: entry.note.clone(),
        })
        .collect()
}

pub fn describe(entry: &ActivityEntry) -> String {
    let meta = &entry.metadata;
    match entry.action {
        ActivityAction::Created => format!("captured via {}", text(meta, "source", "unknown")),
        ActivityAction::Routed => {
            let mut line = format!(
                "routed {} -> {}",
                text(meta, "from_destination", "inbox"),
                text(meta, "to_destination", "inbox")
            );
            if meta.get("reason").and_then(Value::as_str) == Some("destination_deleted") {
                line.push_str(" (destination deleted)");
            }
            line
        }
        ActivityAction::Scheduled => match meta.get("scheduled_at").and_then(Value::as_str) {
            Some(at) if meta.get("is_all_day").and_then(Value::as_bool) == Some(true) => {
                format!("scheduled all day {}", &at[..at.len().min(10)])
            }
            Some(at) => match meta.get("duration_minutes").and_then(Value::as_u64) {
                Some(minutes) => format!("scheduled for {at} ({minutes} min)"),
                None => format!("scheduled for {at}"),
            },
            None => "unscheduled".to_string(),
        },
        ActivityAction::Completed => "marked complete".to_string(),
        ActivityAction::Uncompleted => "reopened".to_string(),
        ActivityAction::Archived => "archived".to_string(),
        ActivityAction::Unarchived => "restored from archive".to_string(),
        ActivityAction::FieldChanged => format!(
            "{}: {} -> {}",
            text(meta, "field", "field"),
            render(meta.get("from")),
            render(meta.get("to"))
        ),
        ActivityAction::NoteAdded => "note added".to_string(),
    }
}

fn text<'m>(meta: &'m Map<String, Value>, key: &str, fallback: &'m str) -> &'m str {
    meta.get(key).and_then(Value::as_str).unwrap_or(fallback)
}

fn render(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "(empty)".to_string(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::{describe, timeline};
    use crate::domain::activity::{ActivityAction, ActivityDraft, ActivityEntry};
    use serde_json::Value;

    fn entry(draft: ActivityDraft) -> ActivityEntry {
        ActivityEntry {
            id: "act-1".to_string(),
            seq: 1,
            item_id: "itm-000001".to_string(),
            owner_id: "owner-1".to_string(),
            action: draft.action,
            metadata: draft.metadata,
            note: draft.note,
            created_at: "2026-03-01T09:00:00.000000Z".to_string(),
        }
    }

    #[test]
    fn describes_routes_from_the_inbox() {
        let line = describe(&entry(
            ActivityDraft::new(ActivityAction::Routed)
                .with("from_destination", Value::Null)
                .with("to_destination", "waiting"),
        ));
        assert_eq!(line, "routed inbox -> waiting");
    }

    #[test]
    fn describes_orphaning_and_unscheduling() {
        let orphaned = describe(&entry(
            ActivityDraft::new(ActivityAction::Routed)
                .with("from_destination", "waiting")
                .with("to_destination", Value::Null)
                .with("reason", "destination_deleted"),
        ));
        assert_eq!(orphaned, "routed waiting -> inbox (destination deleted)");

        let cleared = describe(&entry(
            ActivityDraft::new(ActivityAction::Scheduled).with("scheduled_at", Value::Null),
        ));
        assert_eq!(cleared, "unscheduled");
    }

    #[test]
    fn field_changes_render_empty_values() {
        let line = describe(&entry(
            ActivityDraft::new(ActivityAction::FieldChanged)
                .with("field", "notes")
                .with("from", Value::Null)
                .with("to", "call after 3pm"),
        ));
        assert_eq!(line, "notes: (empty) -> call after 3pm");
    }

    #[test]
    fn timeline_keeps_notes() {
        let lines = timeline(&[entry(
            ActivityDraft::new(ActivityAction::NoteAdded).with_note(Some("left voicemail".into())),
        )]);
        assert_eq!(lines[0].action, "note_added");
        assert_eq!(lines[0].note.as_deref(), Some("left voicemail"));
    }
}
