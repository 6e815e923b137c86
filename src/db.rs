use std::collections::BTreeMap;
use std::str::FromStr;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, DatabaseName, OptionalExtension, Result, Row};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::clock::now_utc;
use crate::domain::activity::{ActivityAction, ActivityDraft, ActivityEntry};
use crate::domain::destination::Destination;
use crate::domain::item::{Attachment, Item};
use crate::domain::layer::Layer;

pub const CURRENT_SCHEMA_VERSION: i64 = 1;

struct Migration {
    version: i64,
    name: &'static str,
    sql: &'static str,
}

const MIGRATIONS: [Migration; 1] = [Migration {
    version: 1,
    name: "item_lifecycle_v1",
    sql: r#"
CREATE TABLE IF NOT EXISTS meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS destinations (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    slug TEXT NOT NULL,
    name TEXT NOT NULL,
    icon TEXT,
    color TEXT,
    sort_order TEXT NOT NULL,
    schema_keys_json TEXT NOT NULL DEFAULT '[]',
    is_system INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    deleted_at TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_destinations_live_slug
    ON destinations(owner_id, slug) WHERE deleted_at IS NULL;

CREATE TABLE IF NOT EXISTS items (
    id TEXT PRIMARY KEY,
    owner_id TEXT NOT NULL,
    title TEXT NOT NULL,
    notes TEXT,
    attachments_json TEXT NOT NULL DEFAULT '[]',
    source TEXT NOT NULL,
    layer TEXT NOT NULL CHECK (layer IN ('capture', 'process', 'commit')),
    destination_id TEXT REFERENCES destinations(id) ON DELETE SET NULL,
    is_completed INTEGER NOT NULL DEFAULT 0,
    completed_at TEXT,
    archived_at TEXT,
    scheduled_at TEXT,
    is_all_day INTEGER NOT NULL DEFAULT 0,
    duration_minutes INTEGER,
    space_id TEXT,
    project_id TEXT,
    custom_values_json TEXT NOT NULL DEFAULT '{}',
    sort_order TEXT NOT NULL,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK ((is_completed = 1) = (completed_at IS NOT NULL)),
    CHECK (destination_id IS NULL OR layer <> 'capture'),
    CHECK (scheduled_at IS NULL OR layer = 'commit')
);

CREATE INDEX IF NOT EXISTS idx_items_view
    ON items(owner_id, layer, destination_id, sort_order);
CREATE INDEX IF NOT EXISTS idx_items_owner_created ON items(owner_id, created_at);
CREATE INDEX IF NOT EXISTS idx_items_destination ON items(destination_id);

CREATE TABLE IF NOT EXISTS item_activities (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    item_id TEXT NOT NULL REFERENCES items(id) ON DELETE CASCADE,
    owner_id TEXT NOT NULL,
    action TEXT NOT NULL,
    metadata_json TEXT NOT NULL DEFAULT '{}',
    note TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_item_activities_item
    ON item_activities(item_id, created_at);

CREATE TRIGGER IF NOT EXISTS item_activities_append_only
BEFORE UPDATE ON item_activities
BEGIN
    SELECT RAISE(ABORT, 'item_activities is append-only');
END;
"#,
}];

pub fn open_connection(path: &str, busy_timeout: Duration) -> Result<Connection> {
    let mut conn = Connection::open(path)?;
    configure(&conn, busy_timeout)?;
    apply_migrations(&mut conn)?;
    Ok(conn)
}

fn configure(conn: &Connection, busy_timeout: Duration) -> Result<()> {
    conn.pragma_update(None::<DatabaseName>, "journal_mode", "WAL")?;
    conn.pragma_update(None::<DatabaseName>, "synchronous", "NORMAL")?;
    conn.pragma_update(None::<DatabaseName>, "foreign_keys", "ON")?;
    conn.pragma_update(None::<DatabaseName>, "temp_store", "MEMORY")?;
    conn.busy_timeout(busy_timeout)?;
    Ok(())
}

fn apply_migrations(conn: &mut Connection) -> Result<()> {
    let tx = conn.transaction()?;
    tx.execute_batch(
        r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    applied_at TEXT NOT NULL
);
"#,
    )?;

    for migration in MIGRATIONS {
        let already_applied: Option<i64> = tx
            .query_row(
                "SELECT version FROM schema_migrations WHERE version = ?1",
                params![migration.version],
                |row| row.get(0),
            )
            .optional()?;

        if already_applied.is_some() {
            continue;
        }

        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_migrations (version, name, applied_at) VALUES (?1, ?2, ?3)",
            params![migration.version, migration.name, now_utc()],
        )?;
    }

    tx.execute(
        r#"
INSERT INTO meta (key, value)
VALUES ('schema_version', ?1)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![CURRENT_SCHEMA_VERSION.to_string()],
    )?;

    tx.commit()
}

pub fn get_meta(conn: &Connection, key: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM meta WHERE key = ?1",
        params![key],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_meta(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        r#"
INSERT INTO meta (key, value)
VALUES (?1, ?2)
ON CONFLICT(key) DO UPDATE SET value = excluded.value
"#,
        params![key, value],
    )?;
    Ok(())
}

const ITEM_COLUMNS: &str = "id, owner_id, title, notes, attachments_json, source, layer, \
     destination_id, is_completed, completed_at, archived_at, scheduled_at, is_all_day, \
     duration_minutes, space_id, project_id, custom_values_json, sort_order, created_at, \
     updated_at";

fn item_from_row(row: &Row<'_>) -> Result<Item> {
    let layer_raw: String = row.get(6)?;
    let layer = Layer::from_str(&layer_raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(err)))?;
    let attachments: Vec<Attachment> = json_column(row, 4)?;
    let custom_values: BTreeMap<String, Value> = json_column(row, 16)?;
    Ok(Item {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        title: row.get(2)?,
        notes: row.get(3)?,
        attachments,
        source: row.get(5)?,
        layer,
        destination_id: row.get(7)?,
        is_completed: row.get(8)?,
        completed_at: row.get(9)?,
        archived_at: row.get(10)?,
        scheduled_at: row.get(11)?,
        is_all_day: row.get(12)?,
        duration_minutes: row.get(13)?,
        space_id: row.get(14)?,
        project_id: row.get(15)?,
        custom_values,
        sort_order: row.get(17)?,
        created_at: row.get(18)?,
        updated_at: row.get(19)?,
    })
}

fn json_column<T: DeserializeOwned>(row: &Row<'_>, index: usize) -> Result<T> {
    let raw: String = row.get(index)?;
    serde_json::from_str(&raw)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(index, Type::Text, Box::new(err)))
}

fn to_json(value: &impl serde::Serialize) -> Result<String> {
    serde_json::to_string(value).map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))
}

pub fn insert_item(conn: &Connection, item: &Item) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO items ({ITEM_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)"
        ),
        params![
            item.id,
            item.owner_id,
            item.title,
            item.notes,
            to_json(&item.attachments)?,
            item.source,
            item.layer.as_str(),
            item.destination_id,
            item.is_completed,
            item.completed_at,
            item.archived_at,
            item.scheduled_at,
            item.is_all_day,
            item.duration_minutes,
            item.space_id,
            item.project_id,
            to_json(&item.custom_values)?,
            item.sort_order,
            item.created_at,
            item.updated_at,
        ],
    )?;
    Ok(())
}

pub fn update_item(conn: &Connection, item: &Item) -> Result<usize> {
    conn.execute(
        r#"
UPDATE items SET
    title = ?3,
    notes = ?4,
    attachments_json = ?5,
    layer = ?6,
    destination_id = ?7,
    is_completed = ?8,
    completed_at = ?9,
    archived_at = ?10,
    scheduled_at = ?11,
    is_all_day = ?12,
    duration_minutes = ?13,
    space_id = ?14,
    project_id = ?15,
    custom_values_json = ?16,
    sort_order = ?17,
    updated_at = ?18
WHERE id = ?1 AND owner_id = ?2
"#,
        params![
            item.id,
            item.owner_id,
            item.title,
            item.notes,
            to_json(&item.attachments)?,
            item.layer.as_str(),
            item.destination_id,
            item.is_completed,
            item.completed_at,
            item.archived_at,
            item.scheduled_at,
            item.is_all_day,
            item.duration_minutes,
            item.space_id,
            item.project_id,
            to_json(&item.custom_values)?,
            item.sort_order,
            item.updated_at,
        ],
    )
}

pub fn get_item(conn: &Connection, owner_id: &str, id: &str) -> Result<Option<Item>> {
    conn.query_row(
        &format!("SELECT {ITEM_COLUMNS} FROM items WHERE owner_id = ?1 AND id = ?2"),
        params![owner_id, id],
        item_from_row,
    )
    .optional()
}

pub fn item_id_exists(conn: &Connection, id: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM items WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub fn list_items(conn: &Connection, owner_id: &str, include_archived: bool) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(&format!(
        r#"
SELECT {ITEM_COLUMNS}
FROM items
WHERE owner_id = ?1 AND (?2 OR archived_at IS NULL)
ORDER BY layer, destination_id, sort_order, id
"#
    ))?;
    let rows = stmt.query_map(params![owner_id, include_archived], item_from_row)?;
    rows.collect()
}

/// The non-archived items of one view, in display order.
pub fn list_view_items(
    conn: &Connection,
    owner_id: &str,
    layer: Option<Layer>,
    destination_id: Option<&str>,
) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(&format!(
        r#"
SELECT {ITEM_COLUMNS}
FROM items
WHERE owner_id = ?1
  AND archived_at IS NULL
  AND (?2 IS NULL OR layer = ?2)
  AND (?3 IS NULL OR destination_id = ?3)
ORDER BY sort_order, id
"#
    ))?;
    let rows = stmt.query_map(
        params![owner_id, layer.map(Layer::as_str), destination_id],
        item_from_row,
    )?;
    rows.collect()
}

pub fn items_for_destination(
    conn: &Connection,
    owner_id: &str,
    destination_id: &str,
) -> Result<Vec<Item>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ITEM_COLUMNS} FROM items WHERE owner_id = ?1 AND destination_id = ?2 ORDER BY sort_order, id"
    ))?;
    let rows = stmt.query_map(params![owner_id, destination_id], item_from_row)?;
    rows.collect()
}

/// Identifies the ordered column an active item sits in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ViewSlot<'a> {
    pub owner_id: &'a str,
    pub layer: Layer,
    pub destination_id: Option<&'a str>,
}

impl<'a> ViewSlot<'a> {
    pub fn of(item: &'a Item) -> Self {
        Self {
            owner_id: &item.owner_id,
            layer: item.layer,
            destination_id: item.destination_id.as_deref(),
        }
    }
}

pub fn last_sort_key(conn: &Connection, slot: ViewSlot<'_>, exclude_id: &str) -> Result<Option<String>> {
    conn.query_row(
        r#"
SELECT MAX(sort_order)
FROM items
WHERE owner_id = ?1 AND layer = ?2 AND destination_id IS ?3
  AND archived_at IS NULL AND id <> ?4
"#,
        params![slot.owner_id, slot.layer.as_str(), slot.destination_id, exclude_id],
        |row| row.get(0),
    )
}

/// Smallest key in the slot strictly greater than `key`.
pub fn successor_sort_key(
    conn: &Connection,
    slot: ViewSlot<'_>,
    key: &str,
    exclude_id: &str,
) -> Result<Option<String>> {
    conn.query_row(
        r#"
SELECT MIN(sort_order)
FROM items
WHERE owner_id = ?1 AND layer = ?2 AND destination_id IS ?3
  AND archived_at IS NULL AND id <> ?4 AND sort_order > ?5
"#,
        params![
            slot.owner_id,
            slot.layer.as_str(),
            slot.destination_id,
            exclude_id,
            key
        ],
        |row| row.get(0),
    )
}

/// Largest key in the slot strictly less than `key`.
pub fn predecessor_sort_key(
    conn: &Connection,
    slot: ViewSlot<'_>,
    key: &str,
    exclude_id: &str,
) -> Result<Option<String>> {
    conn.query_row(
        r#"
SELECT MAX(sort_order)
FROM items
WHERE owner_id = ?1 AND layer = ?2 AND destination_id IS ?3
  AND archived_at IS NULL AND id <> ?4 AND sort_order < ?5
"#,
        params![
            slot.owner_id,
            slot.layer.as_str(),
            slot.destination_id,
            exclude_id,
            key
        ],
        |row| row.get(0),
    )
}

pub fn sort_key_taken(
    conn: &Connection,
    slot: ViewSlot<'_>,
    key: &str,
    exclude_id: &str,
) -> Result<bool> {
    let taken: i64 = conn.query_row(
        r#"
SELECT EXISTS(
    SELECT 1 FROM items
    WHERE owner_id = ?1 AND layer = ?2 AND destination_id IS ?3
      AND archived_at IS NULL AND id <> ?4 AND sort_order = ?5
)
"#,
        params![
            slot.owner_id,
            slot.layer.as_str(),
            slot.destination_id,
            exclude_id,
            key
        ],
        |row| row.get(0),
    )?;
    Ok(taken == 1)
}

pub fn count_captures_since(conn: &Connection, owner_id: &str, since: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM items WHERE owner_id = ?1 AND created_at >= ?2",
        params![owner_id, since],
        |row| row.get(0),
    )
}

pub fn delete_item(conn: &Connection, owner_id: &str, id: &str) -> Result<usize> {
    conn.execute(
        "DELETE FROM items WHERE owner_id = ?1 AND id = ?2",
        params![owner_id, id],
    )
}

pub fn insert_activity(
    conn: &Connection,
    item: &Item,
    draft: &ActivityDraft,
) -> Result<ActivityEntry> {
    let id = Uuid::now_v7().to_string();
    conn.execute(
        r#"
INSERT INTO item_activities (id, item_id, owner_id, action, metadata_json, note, created_at)
VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
"#,
        params![
            id,
            item.id,
            item.owner_id,
            draft.action.as_str(),
            to_json(&draft.metadata)?,
            draft.note,
            item.updated_at,
        ],
    )?;
    Ok(ActivityEntry {
        id,
        seq: conn.last_insert_rowid(),
        item_id: item.id.clone(),
        owner_id: item.owner_id.clone(),
        action: draft.action,
        metadata: draft.metadata.clone(),
        note: draft.note.clone(),
        created_at: item.updated_at.clone(),
    })
}

pub fn list_activities(conn: &Connection, owner_id: &str, item_id: &str) -> Result<Vec<ActivityEntry>> {
    let mut stmt = conn.prepare(
        r#"
SELECT id, seq, item_id, owner_id, action, metadata_json, note, created_at
FROM item_activities
WHERE owner_id = ?1 AND item_id = ?2
ORDER BY created_at DESC, seq DESC
"#,
    )?;
    let rows = stmt.query_map(params![owner_id, item_id], |row| {
        let action_raw: String = row.get(4)?;
        let action = ActivityAction::from_str(&action_raw).map_err(|err| {
            rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(err))
        })?;
        let metadata: Map<String, Value> = json_column(row, 5)?;
        Ok(ActivityEntry {
            id: row.get(0)?,
            seq: row.get(1)?,
            item_id: row.get(2)?,
            owner_id: row.get(3)?,
            action,
            metadata,
            note: row.get(6)?,
            created_at: row.get(7)?,
        })
    })?;
    rows.collect()
}

#[cfg(test)]
pub fn count_activities(conn: &Connection, item_id: &str) -> Result<i64> {
    conn.query_row(
        "SELECT COUNT(*) FROM item_activities WHERE item_id = ?1",
        params![item_id],
        |row| row.get(0),
    )
}

const DESTINATION_COLUMNS: &str = "id, owner_id, slug, name, icon, color, sort_order, \
     schema_keys_json, is_system, created_at, updated_at, deleted_at";

fn destination_from_row(row: &Row<'_>) -> Result<Destination> {
    Ok(Destination {
        id: row.get(0)?,
        owner_id: row.get(1)?,
        slug: row.get(2)?,
        name: row.get(3)?,
        icon: row.get(4)?,
        color: row.get(5)?,
        sort_order: row.get(6)?,
        schema_keys: json_column(row, 7)?,
        is_system: row.get(8)?,
        created_at: row.get(9)?,
        updated_at: row.get(10)?,
        deleted_at: row.get(11)?,
    })
}

pub fn insert_destination(conn: &Connection, destination: &Destination) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO destinations ({DESTINATION_COLUMNS}) VALUES \
             (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            destination.id,
            destination.owner_id,
            destination.slug,
            destination.name,
            destination.icon,
            destination.color,
            destination.sort_order,
            to_json(&destination.schema_keys)?,
            destination.is_system,
            destination.created_at,
            destination.updated_at,
            destination.deleted_at,
        ],
    )?;
    Ok(())
}

pub fn update_destination(conn: &Connection, destination: &Destination) -> Result<usize> {
    conn.execute(
        r#"
UPDATE destinations SET
    name = ?3,
    icon = ?4,
    color = ?5,
    sort_order = ?6,
    schema_keys_json = ?7,
    updated_at = ?8,
    deleted_at = ?9
WHERE id = ?1 AND owner_id = ?2
"#,
        params![
            destination.id,
            destination.owner_id,
            destination.name,
            destination.icon,
            destination.color,
            destination.sort_order,
            to_json(&destination.schema_keys)?,
            destination.updated_at,
            destination.deleted_at,
        ],
    )
}

pub fn get_live_destination_by_slug(
    conn: &Connection,
    owner_id: &str,
    slug: &str,
) -> Result<Option<Destination>> {
    conn.query_row(
        &format!(
            "SELECT {DESTINATION_COLUMNS} FROM destinations \
             WHERE owner_id = ?1 AND slug = ?2 AND deleted_at IS NULL"
        ),
        params![owner_id, slug],
        destination_from_row,
    )
    .optional()
}

/// Looks a destination up by id, including soft-deleted rows.
pub fn get_destination(conn: &Connection, owner_id: &str, id: &str) -> Result<Option<Destination>> {
    conn.query_row(
        &format!("SELECT {DESTINATION_COLUMNS} FROM destinations WHERE owner_id = ?1 AND id = ?2"),
        params![owner_id, id],
        destination_from_row,
    )
    .optional()
}

pub fn destination_id_exists(conn: &Connection, id: &str) -> Result<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM destinations WHERE id = ?1)",
        params![id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

pub fn list_live_destinations(conn: &Connection, owner_id: &str) -> Result<Vec<Destination>> {
    let mut stmt = conn.prepare(&format!(
        r#"
SELECT {DESTINATION_COLUMNS}
FROM destinations
WHERE owner_id = ?1 AND deleted_at IS NULL
ORDER BY sort_order, id
"#
    ))?;
    let rows = stmt.query_map(params![owner_id], destination_from_row)?;
    rows.collect()
}
