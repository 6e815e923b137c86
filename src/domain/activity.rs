use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityAction {
    Created,
    Routed,
    Scheduled,
    Completed,
    Uncompleted,
    Archived,
    Unarchived,
    FieldChanged,
    NoteAdded,
}

impl ActivityAction {
    pub const ALL: [ActivityAction; 9] = [
        ActivityAction::Created,
        ActivityAction::Routed,
        ActivityAction::Scheduled,
        ActivityAction::Completed,
        ActivityAction::Uncompleted,
        ActivityAction::Archived,
        ActivityAction::Unarchived,
        ActivityAction::FieldChanged,
        ActivityAction::NoteAdded,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActivityAction::Created => "created",
            ActivityAction::Routed => "routed",
            ActivityAction::Scheduled => "scheduled",
            ActivityAction::Completed => "completed",
            ActivityAction::Uncompleted => "uncompleted",
            ActivityAction::Archived => "archived",
            ActivityAction::Unarchived => "unarchived",
            ActivityAction::FieldChanged => "field_changed",
            ActivityAction::NoteAdded => "note_added",
        }
    }
}

impl fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActivityAction {
    type Err = ParseActivityActionError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        ActivityAction::ALL
            .into_iter()
            .find(|action| action.as_str() == normalized)
            .ok_or_else(|| ParseActivityActionError {
                value: value.to_string(),
            })
    }
}

impl Serialize for ActivityAction {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for ActivityAction {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        ActivityAction::from_str(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown activity action '{value}'")]
pub struct ParseActivityActionError {
    value: String,
}

/// Activity row produced by a transition, before it is persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityDraft {
    pub action: ActivityAction,
    pub metadata: Map<String, Value>,
    pub note: Option<String>,
}

impl ActivityDraft {
    pub fn new(action: ActivityAction) -> Self {
        Self {
            action,
            metadata: Map::new(),
            note: None,
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.to_string(), value.into());
        self
    }

    pub fn with_note(mut self, note: Option<String>) -> Self {
        self.note = note;
        self
    }
}

/// Persisted, immutable audit row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityEntry {
    pub id: String,
    pub seq: i64,
    pub item_id: String,
    pub owner_id: String,
    pub action: ActivityAction,
    pub metadata: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub created_at: String,
}
