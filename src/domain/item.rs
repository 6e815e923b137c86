use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::activity::{ActivityAction, ActivityDraft};
use super::layer::Layer;
use crate::clock::normalize_timestamp;

pub const TITLE_MAX_CHARS: usize = 500;
pub const NOTES_MAX_CHARS: usize = 5000;
pub const CUSTOM_KEY_MAX_CHARS: usize = 64;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentKind {
    Image,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    pub kind: AttachmentKind,
    pub object_ref: String,
    pub size_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<u32>,
}

impl FromStr for Attachment {
    type Err = ItemError;

    /// `kind[/seconds]:size:object-ref`, e.g. `audio/35:20480:voice/memo.m4a`.
    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut parts = raw.trim().splitn(3, ':');
        let head = parts.next().unwrap_or_default();
        let size = parts.next().ok_or_else(|| invalid_attachment(raw))?;
        let object_ref = parts.next().ok_or_else(|| invalid_attachment(raw))?;

        let (kind, duration) = match head.split_once('/') {
            Some((kind, secs)) => (
                kind,
                Some(secs.parse::<u32>().map_err(|_| invalid_attachment(raw))?),
            ),
            None => (head, None),
        };
        let kind = match kind.to_ascii_lowercase().as_str() {
            "image" => AttachmentKind::Image,
            "audio" => AttachmentKind::Audio,
            _ => return Err(invalid_attachment(raw)),
        };

        let attachment = Attachment {
            kind,
            object_ref: object_ref.trim().to_string(),
            size_bytes: size.parse().map_err(|_| invalid_attachment(raw))?,
            duration_seconds: duration,
        };
        attachment.validate()?;
        Ok(attachment)
    }
}

impl Attachment {
    fn validate(&self) -> Result<(), ItemError> {
        if self.object_ref.trim().is_empty() {
            return Err(ItemError::InvalidAttachment(
                "object reference is required".to_string(),
            ));
        }
        if self.size_bytes == 0 {
            return Err(ItemError::InvalidAttachment(format!(
                "'{}' has zero size",
                self.object_ref
            )));
        }
        if self.kind == AttachmentKind::Image && self.duration_seconds.is_some() {
            return Err(ItemError::InvalidAttachment(format!(
                "image '{}' cannot carry a duration",
                self.object_ref
            )));
        }
        Ok(())
    }
}

fn invalid_attachment(raw: &str) -> ItemError {
    ItemError::InvalidAttachment(format!(
        "'{raw}' must look like kind[/seconds]:size:object-ref"
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Item {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub notes: Option<String>,
    pub attachments: Vec<Attachment>,
    pub source: String,
    pub layer: Layer,
    pub destination_id: Option<String>,
    pub is_completed: bool,
    pub completed_at: Option<String>,
    pub archived_at: Option<String>,
    pub scheduled_at: Option<String>,
    pub is_all_day: bool,
    pub duration_minutes: Option<u32>,
    pub space_id: Option<String>,
    pub project_id: Option<String>,
    pub custom_values: BTreeMap<String, Value>,
    pub sort_order: String,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Default)]
pub struct CaptureInput {
    pub title: String,
    pub notes: Option<String>,
    pub attachments: Vec<Attachment>,
    pub source: String,
    pub space_id: Option<String>,
    pub project_id: Option<String>,
    pub custom_values: BTreeMap<String, Value>,
}

/// A destination as seen from an item: enough to route and to audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestinationRef {
    pub id: String,
    pub slug: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Schedule {
    pub at: String,
    pub is_all_day: bool,
    pub duration_minutes: Option<u32>,
}

/// Result of applying one transition: the full new row plus its audit draft.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub item: Item,
    pub activity: ActivityDraft,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ItemField {
    Title,
    Notes,
    SpaceId,
    ProjectId,
    Custom(String),
}

impl ItemField {
    pub fn name(&self) -> String {
        match self {
            ItemField::Title => "title".to_string(),
            ItemField::Notes => "notes".to_string(),
            ItemField::SpaceId => "space_id".to_string(),
            ItemField::ProjectId => "project_id".to_string(),
            ItemField::Custom(key) => format!("custom.{key}"),
        }
    }

    /// Interprets raw command-line text for this field. Only custom values
    /// are typed; built-in text fields take the text as written, and an
    /// empty string clears the optional ones.
    pub fn parse_input(&self, raw: &str) -> Value {
        match self {
            ItemField::Custom(_) => parse_field_value(raw),
            ItemField::Title => Value::String(raw.to_string()),
            ItemField::Notes | ItemField::SpaceId | ItemField::ProjectId => {
                if raw.trim().is_empty() {
                    Value::Null
                } else {
                    Value::String(raw.to_string())
                }
            }
        }
    }
}

impl fmt::Display for ItemField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name())
    }
}

const LIFECYCLE_FIELDS: [&str; 10] = [
    "layer",
    "destination_id",
    "scheduled_at",
    "is_all_day",
    "duration_minutes",
    "is_completed",
    "completed_at",
    "archived_at",
    "sort_order",
    "updated_at",
];

impl FromStr for ItemField {
    type Err = ItemError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let trimmed = raw.trim();
        match trimmed {
            "title" => return Ok(ItemField::Title),
            "notes" => return Ok(ItemField::Notes),
            "space_id" | "space" => return Ok(ItemField::SpaceId),
            "project_id" | "project" => return Ok(ItemField::ProjectId),
            _ => {}
        }
        if LIFECYCLE_FIELDS.contains(&trimmed) {
            return Err(ItemError::InvalidField(format!(
                "'{trimmed}' is managed by lifecycle transitions and cannot be edited directly"
            )));
        }
        let key = trimmed.strip_prefix("custom.").unwrap_or(trimmed);
        validate_custom_key(key)?;
        Ok(ItemField::Custom(key.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ItemError {
    #[error("title is required")]
    TitleRequired,
    #[error("title is {0} characters; the limit is {}", TITLE_MAX_CHARS)]
    TitleTooLong(usize),
    #[error("notes are {0} characters; the limit is {}", NOTES_MAX_CHARS)]
    NotesTooLong(usize),
    #[error("source is required")]
    SourceRequired,
    #[error("invalid attachment: {0}")]
    InvalidAttachment(String),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
    #[error("invalid field: {0}")]
    InvalidField(String),
    #[error("field '{field}' expects {expected}")]
    InvalidFieldValue { field: String, expected: &'static str },
    #[error("note text is required")]
    NoteRequired,
    #[error("item '{id}' is already {state}")]
    AlreadyInState { id: String, state: &'static str },
    #[error("item '{0}' must be archived before it can be purged")]
    NotArchived(String),
    #[error("field '{field}' changed concurrently: expected {expected}, found {actual}")]
    StaleField {
        field: String,
        expected: Value,
        actual: Value,
    },
}

impl Item {
    /// Builds a freshly captured item. Arrival is always in the inbox.
    pub fn capture(
        id: &str,
        owner_id: &str,
        input: CaptureInput,
        sort_order: &str,
        at: &str,
    ) -> Result<Transition, ItemError> {
        let title = validate_title(&input.title)?;
        let notes = validate_notes(input.notes.as_deref())?;
        let source = input.source.trim().to_ascii_lowercase();
        if source.is_empty() {
            return Err(ItemError::SourceRequired);
        }
        for attachment in &input.attachments {
            attachment.validate()?;
        }
        for (key, value) in &input.custom_values {
            validate_custom_key(key)?;
            validate_custom_value(key, value)?;
        }

        let item = Item {
            id: id.to_string(),
            owner_id: owner_id.to_string(),
            title,
            notes,
            attachments: input.attachments,
            source: source.clone(),
            layer: Layer::Capture,
            destination_id: None,
            is_completed: false,
            completed_at: None,
            archived_at: None,
            scheduled_at: None,
            is_all_day: false,
            duration_minutes: None,
            space_id: non_empty(input.space_id.as_deref()),
            project_id: non_empty(input.project_id.as_deref()),
            custom_values: input
                .custom_values
                .into_iter()
                .filter(|(_, value)| !value.is_null())
                .collect(),
            sort_order: sort_order.to_string(),
            created_at: at.to_string(),
            updated_at: at.to_string(),
        };
        let activity = ActivityDraft::new(ActivityAction::Created).with("source", source);
        Ok(Transition { item, activity })
    }

    pub fn derived_layer(&self) -> Layer {
        Layer::derive(self.destination_id.is_some(), self.scheduled_at.is_some())
    }

    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    pub fn route(
        &self,
        to: &DestinationRef,
        from: Option<&DestinationRef>,
        note: Option<String>,
        at: &str,
    ) -> Transition {
        let mut item = self.touched(at);
        item.destination_id = Some(to.id.clone());
        item.layer = item.derived_layer();

        let activity = ActivityDraft::new(ActivityAction::Routed)
            .with("from_destination", from.map(|dest| dest.slug.clone()))
            .with("to_destination", to.slug.clone())
            .with("from_destination_id", from.map(|dest| dest.id.clone()))
            .with("to_destination_id", to.id.clone())
            .with_note(non_empty(note.as_deref()));
        Transition { item, activity }
    }

    /// Detaches the item from a destination that is being deleted.
    pub fn orphan(&self, from: &DestinationRef, at: &str) -> Transition {
        let mut item = self.touched(at);
        item.destination_id = None;
        item.layer = item.derived_layer();

        let activity = ActivityDraft::new(ActivityAction::Routed)
            .with("from_destination", from.slug.clone())
            .with("to_destination", Value::Null)
            .with("from_destination_id", from.id.clone())
            .with("to_destination_id", Value::Null)
            .with("reason", "destination_deleted");
        Transition { item, activity }
    }

    pub fn schedule(&self, schedule: &Schedule, at: &str) -> Result<Transition, ItemError> {
        let scheduled_at = normalize_timestamp(&schedule.at).ok_or_else(|| {
            ItemError::InvalidSchedule(format!("'{}' is not an RFC3339 timestamp", schedule.at))
        })?;
        if schedule.duration_minutes == Some(0) {
            return Err(ItemError::InvalidSchedule(
                "duration must be at least one minute".to_string(),
            ));
        }

        let mut item = self.touched(at);
        item.scheduled_at = Some(scheduled_at.clone());
        item.is_all_day = schedule.is_all_day;
        item.duration_minutes = schedule.duration_minutes;
        item.layer = item.derived_layer();

        let activity = ActivityDraft::new(ActivityAction::Scheduled)
            .with("scheduled_at", scheduled_at)
            .with("is_all_day", schedule.is_all_day)
            .with("duration_minutes", schedule.duration_minutes);
        Ok(Transition { item, activity })
    }

    pub fn unschedule(&self, at: &str) -> Transition {
        let mut item = self.touched(at);
        item.scheduled_at = None;
        item.is_all_day = false;
        item.duration_minutes = None;
        item.layer = item.derived_layer();

        let activity = ActivityDraft::new(ActivityAction::Scheduled)
            .with("scheduled_at", Value::Null)
            .with("previous_scheduled_at", self.scheduled_at.clone());
        Transition { item, activity }
    }

    /// Flips completion. Calling it twice is a net no-op on the flag.
    pub fn toggle_completed(&self, at: &str) -> Transition {
        let mut item = self.touched(at);
        item.is_completed = !self.is_completed;
        item.completed_at = item.is_completed.then(|| at.to_string());

        let action = if item.is_completed {
            ActivityAction::Completed
        } else {
            ActivityAction::Uncompleted
        };
        let activity = ActivityDraft::new(action).with("layer", item.layer.as_str());
        Transition { item, activity }
    }

    /// Flips the archive marker. Layer, destination and schedule are kept.
    pub fn toggle_archived(&self, at: &str) -> Transition {
        let mut item = self.touched(at);
        let action = if self.is_archived() {
            item.archived_at = None;
            ActivityAction::Unarchived
        } else {
            item.archived_at = Some(at.to_string());
            ActivityAction::Archived
        };
        let activity = ActivityDraft::new(action).with("layer", item.layer.as_str());
        Transition { item, activity }
    }

    /// Directional form of `toggle_completed`; asking for the current state is an error.
    pub fn set_completed(&self, completed: bool, at: &str) -> Result<Transition, ItemError> {
        if self.is_completed == completed {
            return Err(ItemError::AlreadyInState {
                id: self.id.clone(),
                state: if completed { "completed" } else { "open" },
            });
        }
        Ok(self.toggle_completed(at))
    }

    pub fn set_archived(&self, archived: bool, at: &str) -> Result<Transition, ItemError> {
        if self.is_archived() == archived {
            return Err(ItemError::AlreadyInState {
                id: self.id.clone(),
                state: if archived { "archived" } else { "active" },
            });
        }
        Ok(self.toggle_archived(at))
    }

    pub fn field_value(&self, field: &ItemField) -> Value {
        match field {
            ItemField::Title => Value::String(self.title.clone()),
            ItemField::Notes => self.notes.clone().map_or(Value::Null, Value::String),
            ItemField::SpaceId => self.space_id.clone().map_or(Value::Null, Value::String),
            ItemField::ProjectId => self.project_id.clone().map_or(Value::Null, Value::String),
            ItemField::Custom(key) => self.custom_values.get(key).cloned().unwrap_or(Value::Null),
        }
    }

    /// Generic attribute edit with optional compare-and-set on the old value.
    pub fn edit_field(
        &self,
        field: &ItemField,
        expected: Option<&Value>,
        value: Value,
        at: &str,
    ) -> Result<Transition, ItemError> {
        let current = self.field_value(field);
        if let Some(expected) = expected {
            if expected != &current {
                return Err(ItemError::StaleField {
                    field: field.name(),
                    expected: expected.clone(),
                    actual: current,
                });
            }
        }

        let mut item = self.touched(at);
        let stored = match field {
            ItemField::Title => {
                let title = validate_title(expect_text(field, &value)?.unwrap_or_default())?;
                item.title = title.clone();
                Value::String(title)
            }
            ItemField::Notes => {
                item.notes = validate_notes(expect_text(field, &value)?)?;
                item.notes.clone().map_or(Value::Null, Value::String)
            }
            ItemField::SpaceId => {
                item.space_id = non_empty(expect_text(field, &value)?);
                item.space_id.clone().map_or(Value::Null, Value::String)
            }
            ItemField::ProjectId => {
                item.project_id = non_empty(expect_text(field, &value)?);
                item.project_id.clone().map_or(Value::Null, Value::String)
            }
            ItemField::Custom(key) => {
                validate_custom_value(key, &value)?;
                if value.is_null() {
                    item.custom_values.remove(key);
                } else {
                    item.custom_values.insert(key.clone(), value.clone());
                }
                value
            }
        };

        let activity = ActivityDraft::new(ActivityAction::FieldChanged)
            .with("field", field.name())
            .with("from", current)
            .with("to", stored);
        Ok(Transition { item, activity })
    }

    pub fn add_note(&self, note: &str, at: &str) -> Result<Transition, ItemError> {
        let note = note.trim();
        if note.is_empty() {
            return Err(ItemError::NoteRequired);
        }
        if note.chars().count() > NOTES_MAX_CHARS {
            return Err(ItemError::NotesTooLong(note.chars().count()));
        }
        let item = self.touched(at);
        let activity =
            ActivityDraft::new(ActivityAction::NoteAdded).with_note(Some(note.to_string()));
        Ok(Transition { item, activity })
    }

    pub fn reorder(&self, sort_order: &str, at: &str) -> Transition {
        let mut item = self.touched(at);
        item.sort_order = sort_order.to_string();
        let activity = ActivityDraft::new(ActivityAction::FieldChanged)
            .with("field", "sort_order")
            .with("from", self.sort_order.clone())
            .with("to", sort_order.to_string());
        Transition { item, activity }
    }

    pub fn ensure_purgeable(&self) -> Result<(), ItemError> {
        if self.is_archived() {
            Ok(())
        } else {
            Err(ItemError::NotArchived(self.id.clone()))
        }
    }

    /// Lifecycle invariants every persisted item satisfies.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.destination_id.is_some() && self.layer == Layer::Capture {
            return Err(format!("{}: routed item left in capture", self.id));
        }
        if self.scheduled_at.is_some() && self.layer != Layer::Commit {
            return Err(format!("{}: scheduled item outside commit", self.id));
        }
        if self.layer != self.derived_layer() {
            return Err(format!(
                "{}: layer {} disagrees with derived {}",
                self.id,
                self.layer,
                self.derived_layer()
            ));
        }
        if self.is_completed != self.completed_at.is_some() {
            return Err(format!("{}: completion flag and timestamp diverge", self.id));
        }
        Ok(())
    }

    fn touched(&self, at: &str) -> Item {
        let mut item = self.clone();
        item.updated_at = at.to_string();
        item
    }
}

pub fn validate_title(raw: &str) -> Result<String, ItemError> {
    let title = raw.trim();
    if title.is_empty() {
        return Err(ItemError::TitleRequired);
    }
    let length = title.chars().count();
    if length > TITLE_MAX_CHARS {
        return Err(ItemError::TitleTooLong(length));
    }
    Ok(title.to_string())
}

fn validate_notes(raw: Option<&str>) -> Result<Option<String>, ItemError> {
    let notes = non_empty(raw);
    if let Some(text) = notes.as_deref() {
        let length = text.chars().count();
        if length > NOTES_MAX_CHARS {
            return Err(ItemError::NotesTooLong(length));
        }
    }
    Ok(notes)
}

fn validate_custom_key(key: &str) -> Result<(), ItemError> {
    let key = key.trim();
    if key.is_empty() || key.chars().count() > CUSTOM_KEY_MAX_CHARS {
        return Err(ItemError::InvalidField(format!(
            "custom keys must be 1-{CUSTOM_KEY_MAX_CHARS} characters"
        )));
    }
    Ok(())
}

fn validate_custom_value(key: &str, value: &Value) -> Result<(), ItemError> {
    match value {
        Value::Array(_) | Value::Object(_) => Err(ItemError::InvalidFieldValue {
            field: format!("custom.{key}"),
            expected: "a string, number, boolean or null",
        }),
        _ => Ok(()),
    }
}

fn expect_text<'a>(field: &ItemField, value: &'a Value) -> Result<Option<&'a str>, ItemError> {
    match value {
        Value::Null => Ok(None),
        Value::String(text) => Ok(Some(text.as_str())),
        _ => Err(ItemError::InvalidFieldValue {
            field: field.name(),
            expected: "a string or null",
        }),
    }
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Parses a CLI-supplied value: JSON scalars when they parse, text otherwise.
pub fn parse_field_value(raw: &str) -> Value {
    match serde_json::from_str::<Value>(raw) {
        Ok(value @ (Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_))) => value,
        _ => Value::String(raw.to_string()),
    }
}

#[cfg(test)]
mod tests;
