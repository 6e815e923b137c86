use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::clock::{now_utc, parse_timestamp};
use crate::domain::item::Item;

pub const FEED_DIR: &str = "feed";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    Upsert,
    Delete,
}

impl ChangeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChangeKind::Upsert => "upsert",
            ChangeKind::Delete => "delete",
        }
    }
}

/// One committed mutation as seen by feed consumers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: String,
    pub kind: ChangeKind,
    pub item_id: String,
    pub owner_id: String,
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<Item>,
}

impl ChangeEvent {
    pub fn upsert(item: &Item) -> Self {
        Self {
            event_id: new_event_id(),
            kind: ChangeKind::Upsert,
            item_id: item.id.clone(),
            owner_id: item.owner_id.clone(),
            updated_at: item.updated_at.clone(),
            item: Some(item.clone()),
        }
    }

    pub fn delete(owner_id: &str, item_id: &str) -> Self {
        Self {
            event_id: new_event_id(),
            kind: ChangeKind::Delete,
            item_id: item_id.to_string(),
            owner_id: owner_id.to_string(),
            updated_at: now_utc(),
            item: None,
        }
    }
}

pub fn new_event_id() -> String {
    Uuid::now_v7().to_string()
}

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("invalid RFC3339 timestamp '{value}': {source}")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: time::error::Parse,
    },
    #[error("invalid {field} '{value}': use only ASCII letters, numbers, '.', '-', '_'")]
    InvalidFileComponent { field: &'static str, value: String },
    #[error("I/O error in change feed: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize change event as JSON: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("malformed change event {}: {source}", path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone)]
pub struct FeedWriter {
    root: PathBuf,
}

impl FeedWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Writes the event once; a second write of the same id fails.
    pub fn publish(&self, event: &ChangeEvent) -> Result<PathBuf, FeedError> {
        let rel_path = relative_path_for_event(event)?;
        let abs_path = self.root.join(&rel_path);
        if let Some(parent) = abs_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&abs_path)?;
        serde_json::to_writer_pretty(&mut file, event)?;
        file.write_all(b"\n")?;
        file.sync_all()?;

        tracing::debug!(event_id = %event.event_id, kind = event.kind.as_str(), item_id = %event.item_id, "change event published");
        Ok(rel_path)
    }
}

pub fn relative_path_for_event(event: &ChangeEvent) -> Result<PathBuf, FeedError> {
    validate_filename_component("event_id", &event.event_id)?;

    let timestamp =
        parse_timestamp(&event.updated_at).map_err(|source| FeedError::InvalidTimestamp {
            value: event.updated_at.clone(),
            source,
        })?;

    Ok(Path::new(FEED_DIR)
        .join(format!("{:04}", timestamp.year()))
        .join(format!("{:02}", u8::from(timestamp.month())))
        .join(format!("{:02}", timestamp.day()))
        .join(format!("{}-{}.json", event.event_id, event.kind.as_str())))
}

fn validate_filename_component(field: &'static str, value: &str) -> Result<(), FeedError> {
    let is_valid = !value.is_empty()
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));

    if is_valid {
        Ok(())
    } else {
        Err(FeedError::InvalidFileComponent {
            field,
            value: value.to_string(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct FeedReader {
    root: PathBuf,
}

impl FeedReader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Events for `owner_id` with an id after `cursor`, oldest first.
    pub fn read_since(
        &self,
        cursor: Option<&str>,
        owner_id: &str,
    ) -> Result<Vec<ChangeEvent>, FeedError> {
        let feed_root = self.root.join(FEED_DIR);
        if !feed_root.exists() {
            return Ok(Vec::new());
        }

        let floor = cursor.and_then(earliest_day_after);
        let mut files = Vec::new();
        collect_json_files(&feed_root, &[], floor, &mut files)?;

        let mut events = Vec::new();
        for path in files {
            if cursor.is_some_and(|cursor| file_event_id(&path).is_some_and(|id| id <= cursor)) {
                continue;
            }
            let bytes = fs::read(&path)?;
            let event: ChangeEvent = serde_json::from_slice(&bytes)
                .map_err(|source| FeedError::Malformed { path: path.clone(), source })?;
            if event.owner_id != owner_id {
                continue;
            }
            if cursor.is_some_and(|cursor| event.event_id.as_str() <= cursor) {
                continue;
            }
            events.push(event);
        }
        events.sort_by(|left, right| left.event_id.cmp(&right.event_id));
        Ok(events)
    }
}

/// Oldest `[year, month, day]` directory that may hold events after `cursor`.
///
/// Directories are dated by `updated_at`, which is stamped just before the
/// event id is minted, so one day of slack covers midnight and clock skew.
/// Cursors that are not v7 ids prune nothing.
fn earliest_day_after(cursor: &str) -> Option<[u32; 3]> {
    let (secs, _) = Uuid::parse_str(cursor).ok()?.get_timestamp()?.to_unix();
    let minted = OffsetDateTime::from_unix_timestamp(i64::try_from(secs).ok()?).ok()?;
    let day = minted.checked_sub(time::Duration::days(1))?;
    Some([
        u32::try_from(day.year()).ok()?,
        u32::from(u8::from(day.month())),
        u32::from(day.day()),
    ])
}

fn file_event_id(path: &Path) -> Option<&str> {
    let stem = path.file_stem()?.to_str()?;
    Some(stem.rsplit_once('-')?.0)
}

/// Walks the feed, skipping dated directories that sort before `floor`.
fn collect_json_files(
    dir: &Path,
    date: &[u32],
    floor: Option<[u32; 3]>,
    out: &mut Vec<PathBuf>,
) -> Result<(), FeedError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            let part = path
                .file_name()
                .and_then(|name| name.to_str())
                .and_then(|name| name.parse::<u32>().ok());
            let mut child = date.to_vec();
            match part {
                Some(part) if date.len() < 3 => {
                    child.push(part);
                    if floor.is_some_and(|floor| child.as_slice() < &floor[..child.len()]) {
                        continue;
                    }
                }
                // Outside the dated layout nothing is pruned below this point.
                _ => child = vec![u32::MAX; 3],
            }
            collect_json_files(&path, &child, floor, out)?;
        } else if path.extension().is_some_and(|ext| ext == "json") {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests;
