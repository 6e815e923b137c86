use std::fmt;
use std::path::{Path, PathBuf};

use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;

use crate::activity::ActivityLog;
use crate::clock::{format_timestamp, next_update_stamp};
use crate::config::{Config, ConfigError};
use crate::db::{self, ViewSlot};
use crate::destinations::{DestinationPatch, NewDestination, Registry, RegistryError};
use crate::domain::activity::ActivityEntry;
use crate::domain::destination::{Destination, KeyAdvice};
use crate::domain::item::{
    CaptureInput, DestinationRef, Item, ItemError, ItemField, Schedule, Transition,
};
use crate::domain::layer::Layer;
use crate::feed::{ChangeEvent, FeedError, FeedReader, FeedWriter};
use crate::item_id::generate_item_id;
use crate::locks::{item_lock_path, FileLock, LockError};
use crate::ordering::key_between;
use crate::suggest::{Suggester, Suggestion};
use crate::sync::{ItemGateway, Mutation, SyncError, View};

pub struct App {
    conn: Connection,
    root: PathBuf,
    owner_id: String,
    config: Config,
    feed: FeedWriter,
}

/// Neighbors in the target view, by item id. Empty means "append".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Placement {
    pub before: Option<String>,
    pub after: Option<String>,
}

impl Placement {
    pub fn new(before: Option<String>, after: Option<String>) -> Self {
        Self { before, after }
    }

    pub fn is_empty(&self) -> bool {
        self.before.is_none() && self.after.is_none()
    }
}

/// What a transition closure sees while its transaction is open.
struct Step<'c> {
    conn: &'c Connection,
    at: String,
    retry: bool,
}

impl App {
    pub fn open(db_path: &str, root: PathBuf, owner_id: &str, config: Config) -> Result<Self, AppError> {
        let owner_id = owner_id.trim();
        if owner_id.is_empty() {
            return Err(AppError::Unauthenticated);
        }
        ensure_parent_dir(db_path)?;
        let conn = db::open_connection(db_path, config.capture_timeout())?;
        let feed = FeedWriter::new(root.clone());
        Ok(Self {
            conn,
            root,
            owner_id: owner_id.to_string(),
            config,
            feed,
        })
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    fn lock_item(&self, id: &str) -> Result<FileLock, LockError> {
        FileLock::acquire(
            &item_lock_path(&self.root, id),
            self.config.lock_timeout(),
            self.config.lock_stale_after(),
        )
    }

    fn registry(&self) -> Registry<'_> {
        Registry::new(&self.conn, &self.owner_id)
    }

    /// Seeds the system and configured destinations. Safe to repeat.
    pub fn init(&self) -> Result<Vec<Destination>, AppError> {
        let registry = self.registry();
        let seeded = registry.seed_defaults(&self.config.destinations)?;
        registry.ensure_system_destinations()?;
        Ok(seeded)
    }

    pub fn capture(&self, input: CaptureInput) -> Result<Item, AppError> {
        let span = tracing::info_span!("capture", owner = %self.owner_id, source = %input.source);
        let _guard = span.enter();

        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let now = OffsetDateTime::now_utc();
        let window_start = format_timestamp(now - time::Duration::minutes(1));
        let recent = db::count_captures_since(&tx, &self.owner_id, &window_start)?;
        let limit = self.config.capture_rate_per_minute;
        if recent >= i64::from(limit) {
            tracing::warn!(recent, limit, "capture rate limit reached");
            return Err(AppError::RateLimited { limit });
        }

        let id = generate_item_id(|candidate| db::item_id_exists(&tx, candidate).unwrap_or(true));
        let inbox = ViewSlot {
            owner_id: &self.owner_id,
            layer: Layer::Capture,
            destination_id: None,
        };
        let last = db::last_sort_key(&tx, inbox, &id)?;
        let sort_order = key_between(last.as_deref(), None);
        let Transition { item, activity } =
            Item::capture(&id, &self.owner_id, input, &sort_order, &format_timestamp(now))?;

        db::insert_item(&tx, &item)?;
        db::insert_activity(&tx, &item, &activity)?;
        tx.commit()?;

        tracing::info!(item_id = %item.id, "item captured");
        self.publish(ChangeEvent::upsert(&item));
        Ok(item)
    }

    pub fn route(
        &self,
        id: &str,
        destination: &str,
        note: Option<&str>,
        placement: Option<&Placement>,
    ) -> Result<Item, AppError> {
        self.transition("route", id, placement, |step, current| {
            let registry = Registry::new(step.conn, &self.owner_id);
            let to = registry.get_by_slug(destination)?;
            let from = match current.destination_id.as_deref() {
                Some(from_id) => registry.get_by_id(from_id)?.map(|dest| dest.to_ref()),
                None => None,
            };
            Ok(current.route(&to.to_ref(), from.as_ref(), note.map(str::to_string), &step.at))
        })
    }

    pub fn schedule(
        &self,
        id: &str,
        schedule: &Schedule,
        placement: Option<&Placement>,
    ) -> Result<Item, AppError> {
        self.transition("schedule", id, placement, |step, current| {
            Ok(current.schedule(schedule, &step.at)?)
        })
    }

    pub fn unschedule(&self, id: &str, placement: Option<&Placement>) -> Result<Item, AppError> {
        self.transition("unschedule", id, placement, |step, current| {
            Ok(current.unschedule(&step.at))
        })
    }

    /// Flips completion; `complete` and `reopen` both land here.
    pub fn toggle_completed(&self, id: &str) -> Result<Item, AppError> {
        self.transition("toggle_completed", id, None, |step, current| {
            Ok(current.toggle_completed(&step.at))
        })
    }

    /// Flips the archive marker; `archive` and `restore` both land here.
    pub fn toggle_archived(&self, id: &str) -> Result<Item, AppError> {
        self.transition("toggle_archived", id, None, |step, current| {
            Ok(current.toggle_archived(&step.at))
        })
    }

    /// Directional completion for `complete`/`reopen`. The current state is
    /// read under the item lock, so a repeated request cannot flip it back.
    pub fn set_completed(&self, id: &str, completed: bool) -> Result<Item, AppError> {
        self.transition("set_completed", id, None, |step, current| {
            Ok(current.set_completed(completed, &step.at)?)
        })
    }

    pub fn set_archived(&self, id: &str, archived: bool) -> Result<Item, AppError> {
        self.transition("set_archived", id, None, |step, current| {
            Ok(current.set_archived(archived, &step.at)?)
        })
    }

    /// Edits one field; `expected` turns the edit into a compare-and-set.
    pub fn edit_field(
        &self,
        id: &str,
        field: &ItemField,
        expected: Option<&Value>,
        value: Value,
    ) -> Result<Item, AppError> {
        self.transition("edit_field", id, None, |step, current| {
            Ok(current.edit_field(field, expected, value.clone(), &step.at)?)
        })
    }

    pub fn add_note(&self, id: &str, note: &str) -> Result<Item, AppError> {
        self.transition("add_note", id, None, |step, current| {
            Ok(current.add_note(note, &step.at)?)
        })
    }

    pub fn reorder(&self, id: &str, placement: &Placement) -> Result<Item, AppError> {
        if placement.is_empty() {
            return Err(AppError::InvalidArgument(
                "move needs --before and/or --after".to_string(),
            ));
        }
        self.transition("reorder", id, None, |step, current| {
            if current.is_archived() {
                return Err(AppError::InvalidArgument(format!(
                    "item '{}' is archived and has no position",
                    current.id
                )));
            }
            let key = self.key_for_placement(
                step.conn,
                ViewSlot::of(current),
                &current.id,
                placement,
                step.retry,
            )?;
            Ok(current.reorder(&key, &step.at))
        })
    }

    /// Removes an archived item and, by cascade, its activity rows.
    pub fn purge(&self, id: &str) -> Result<Item, AppError> {
        let span = tracing::info_span!("purge", item_id = %id);
        let _guard = span.enter();

        let lock = self.lock_item(id)?;
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let item = self.load(&tx, id)?;
        item.ensure_purgeable()?;
        db::delete_item(&tx, &self.owner_id, id)?;
        tx.commit()?;
        drop(lock);

        tracing::info!("item purged");
        self.publish(ChangeEvent::delete(&self.owner_id, id));
        Ok(item)
    }

    pub fn get(&self, id: &str) -> Result<Item, AppError> {
        self.load(&self.conn, id)
    }

    pub fn list_view(&self, view: &View) -> Result<Vec<Item>, AppError> {
        Ok(db::list_view_items(
            &self.conn,
            &self.owner_id,
            view.layer,
            view.destination_id.as_deref(),
        )?)
    }

    pub fn list_all(&self, include_archived: bool) -> Result<Vec<Item>, AppError> {
        Ok(db::list_items(&self.conn, &self.owner_id, include_archived)?)
    }

    /// Builds a view from CLI-style filters, resolving the destination slug.
    pub fn resolve_view(&self, layer: Option<Layer>, destination: Option<&str>) -> Result<View, AppError> {
        let destination_id = match destination {
            Some(slug) => Some(self.registry().get_by_slug(slug)?.id),
            None => None,
        };
        Ok(View {
            layer,
            destination_id,
        })
    }

    pub fn activities(&self, id: &str) -> Result<Vec<ActivityEntry>, AppError> {
        self.get(id)?;
        Ok(ActivityLog::new(&self.conn, &self.owner_id).list_for_item(id)?)
    }

    pub fn suggest(&self, id: &str, suggester: &dyn Suggester) -> Result<Option<Suggestion>, AppError> {
        let item = self.get(id)?;
        let candidates: Vec<Destination> = self
            .registry()
            .list()?
            .into_iter()
            .filter(|dest| !dest.is_system)
            .collect();
        Ok(suggester.suggest(&item, &candidates))
    }

    /// Advice for a custom key on a routed item; `None` for unrouted items.
    pub fn key_advice(&self, item: &Item, key: &str) -> Result<Option<KeyAdvice>, AppError> {
        let Some(destination_id) = item.destination_id.as_deref() else {
            return Ok(None);
        };
        let registry = self.registry();
        let Some(destination) = registry.get_by_id(destination_id)? else {
            return Ok(None);
        };
        Ok(Some(registry.validate_custom_key(&destination.slug, key)?))
    }

    pub fn destination_ref(&self, slug: &str) -> Result<DestinationRef, AppError> {
        Ok(self.registry().get_by_slug(slug)?.to_ref())
    }

    pub fn destination_name(&self, destination_id: &str) -> Result<Option<String>, AppError> {
        Ok(self
            .registry()
            .get_by_id(destination_id)?
            .map(|dest| dest.slug))
    }

    pub fn list_destinations(&self) -> Result<Vec<Destination>, AppError> {
        Ok(self.registry().list()?)
    }

    pub fn create_destination(&self, input: NewDestination) -> Result<Destination, AppError> {
        Ok(self.registry().create(input)?)
    }

    pub fn update_destination(&self, slug: &str, patch: DestinationPatch) -> Result<Destination, AppError> {
        Ok(self.registry().update(slug, patch)?)
    }

    pub fn reorder_destination(
        &self,
        slug: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Destination, AppError> {
        Ok(self.registry().reorder(slug, before, after)?)
    }

    /// Soft-deletes the destination and publishes every detached item.
    pub fn delete_destination(&self, slug: &str) -> Result<Vec<Item>, AppError> {
        let orphaned = self.registry().delete(slug)?;
        for item in &orphaned {
            self.publish(ChangeEvent::upsert(item));
        }
        Ok(orphaned)
    }

    pub fn check_custom_key(&self, slug: &str, key: &str) -> Result<KeyAdvice, AppError> {
        Ok(self.registry().validate_custom_key(slug, key)?)
    }

    pub fn feed_reader(&self) -> FeedReader {
        FeedReader::new(self.root.clone())
    }

    pub fn feed_since(&self, cursor: Option<&str>) -> Result<Vec<ChangeEvent>, AppError> {
        Ok(self.feed_reader().read_since(cursor, &self.owner_id)?)
    }

    pub fn sync_cursor(&self) -> Result<Option<String>, AppError> {
        Ok(db::get_meta(&self.conn, &self.sync_cursor_key())?)
    }

    pub fn set_sync_cursor(&self, cursor: &str) -> Result<(), AppError> {
        Ok(db::set_meta(&self.conn, &self.sync_cursor_key(), cursor)?)
    }

    fn sync_cursor_key(&self) -> String {
        format!("sync_cursor:{}", self.owner_id)
    }

    fn load(&self, conn: &Connection, id: &str) -> Result<Item, AppError> {
        db::get_item(conn, &self.owner_id, id)?.ok_or_else(|| AppError::NotFound(id.to_string()))
    }

    fn publish(&self, event: ChangeEvent) {
        if let Err(err) = self.feed.publish(&event) {
            tracing::warn!(error = %err, item_id = %event.item_id, "change event not published");
        }
    }

    fn transition<F>(
        &self,
        op: &'static str,
        id: &str,
        placement: Option<&Placement>,
        apply: F,
    ) -> Result<Item, AppError>
    where
        F: Fn(&Step<'_>, &Item) -> Result<Transition, AppError>,
    {
        let span = tracing::info_span!("transition", op, item_id = %id);
        let _guard = span.enter();

        match self.attempt_transition(id, placement, false, &apply) {
            Err(err) if err.is_retryable_conflict() => {
                tracing::warn!(error = %err, "transition conflicted; retrying once");
                self.attempt_transition(id, placement, true, &apply)
            }
            result => result,
        }
    }

    fn attempt_transition<F>(
        &self,
        id: &str,
        placement: Option<&Placement>,
        retry: bool,
        apply: &F,
    ) -> Result<Item, AppError>
    where
        F: Fn(&Step<'_>, &Item) -> Result<Transition, AppError>,
    {
        let lock = self.lock_item(id)?;
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)?;
        let current = self.load(&tx, id)?;
        let step = Step {
            conn: &tx,
            at: next_update_stamp(&current.updated_at),
            retry,
        };

        let Transition { mut item, activity } = apply(&step, &current)?;
        if !item.is_archived() {
            item.sort_order = self.resolve_sort_key(&tx, &current, &item, placement, retry)?;
        }
        item.check_invariants().map_err(AppError::Internal)?;

        db::update_item(&tx, &item)?;
        let entry = db::insert_activity(&tx, &item, &activity)?;
        tx.commit()?;
        drop(lock);

        tracing::info!(action = %entry.action, layer = %item.layer, retry, "transition committed");
        self.publish(ChangeEvent::upsert(&item));
        Ok(item)
    }

    fn resolve_sort_key(
        &self,
        conn: &Connection,
        current: &Item,
        next: &Item,
        placement: Option<&Placement>,
        retry: bool,
    ) -> Result<String, AppError> {
        let slot = ViewSlot::of(next);
        let key = match placement.filter(|placement| !placement.is_empty()) {
            Some(placement) => self.key_for_placement(conn, slot, &next.id, placement, retry)?,
            None if next.sort_order != current.sort_order => next.sort_order.clone(),
            None => {
                let unchanged_view = ViewSlot::of(current) == slot;
                if unchanged_view && !db::sort_key_taken(conn, slot, &current.sort_order, &next.id)? {
                    current.sort_order.clone()
                } else {
                    let last = db::last_sort_key(conn, slot, &next.id)?;
                    key_between(last.as_deref(), None)
                }
            }
        };

        if db::sort_key_taken(conn, slot, &key, &next.id)? {
            return Err(AppError::Conflict(format!(
                "sort key '{key}' is already used in this view"
            )));
        }
        Ok(key)
    }

    /// On retry the `after` neighbor is re-read as the live successor of `before`.
    fn key_for_placement(
        &self,
        conn: &Connection,
        slot: ViewSlot<'_>,
        item_id: &str,
        placement: &Placement,
        retry: bool,
    ) -> Result<String, AppError> {
        let low = placement
            .before
            .as_deref()
            .map(|neighbor| self.neighbor_key(conn, slot, item_id, neighbor))
            .transpose()?;
        let high = match (&low, placement.after.as_deref()) {
            (Some(low), after) if retry || after.is_none() => {
                db::successor_sort_key(conn, slot, low, item_id)?
            }
            (_, Some(after)) => Some(self.neighbor_key(conn, slot, item_id, after)?),
            (_, None) => None,
        };
        let low = match (low, &high) {
            (None, Some(high)) => db::predecessor_sort_key(conn, slot, high, item_id)?,
            (low, _) => low,
        };

        if let (Some(low), Some(high)) = (&low, &high) {
            if low >= high {
                return Err(AppError::Conflict(format!(
                    "neighbors are out of order ('{low}' is not before '{high}')"
                )));
            }
        }
        Ok(key_between(low.as_deref(), high.as_deref()))
    }

    fn neighbor_key(
        &self,
        conn: &Connection,
        slot: ViewSlot<'_>,
        item_id: &str,
        neighbor_id: &str,
    ) -> Result<String, AppError> {
        if neighbor_id == item_id {
            return Err(AppError::InvalidArgument(
                "an item cannot be placed next to itself".to_string(),
            ));
        }
        let neighbor = db::get_item(conn, &self.owner_id, neighbor_id)?.ok_or_else(|| {
            AppError::Conflict(format!("neighbor '{neighbor_id}' no longer exists"))
        })?;
        if neighbor.is_archived() || ViewSlot::of(&neighbor) != slot {
            return Err(AppError::Conflict(format!(
                "neighbor '{neighbor_id}' is not in the target view"
            )));
        }
        Ok(neighbor.sort_order)
    }
}

impl ItemGateway for App {
    fn fetch_view(&self, view: &View) -> Result<Vec<Item>, AppError> {
        self.list_view(view)
    }

    fn apply(&self, mutation: &Mutation) -> Result<Item, AppError> {
        match mutation {
            Mutation::Route {
                item_id,
                destination,
                note,
                placement,
            } => self.route(item_id, &destination.slug, note.as_deref(), Some(placement)),
            Mutation::Schedule {
                item_id,
                schedule,
                placement,
            } => self.schedule(item_id, schedule, Some(placement)),
            Mutation::Unschedule { item_id, placement } => self.unschedule(item_id, Some(placement)),
            Mutation::ToggleCompleted { item_id } => self.toggle_completed(item_id),
            Mutation::ToggleArchived { item_id } => self.toggle_archived(item_id),
            Mutation::SetCompleted { item_id, completed } => self.set_completed(item_id, *completed),
            Mutation::SetArchived { item_id, archived } => self.set_archived(item_id, *archived),
            Mutation::EditField {
                item_id,
                field,
                expected,
                value,
            } => self.edit_field(item_id, field, expected.as_ref(), value.clone()),
            Mutation::AddNote { item_id, note } => self.add_note(item_id, note),
            Mutation::Move { item_id, placement } => self.reorder(item_id, placement),
        }
    }

    fn retries_conflicts(&self) -> bool {
        true
    }
}

fn ensure_parent_dir(path: &str) -> Result<(), AppError> {
    if let Some(parent) = Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Validation,
    Conflict,
    NotFound,
    Transport,
    RateLimited,
    Unauthenticated,
    Unavailable,
    Internal,
}

impl ErrorClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorClass::Validation => "validation",
            ErrorClass::Conflict => "conflict",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Transport => "transport",
            ErrorClass::RateLimited => "rate_limited",
            ErrorClass::Unauthenticated => "unauthenticated",
            ErrorClass::Unavailable => "unavailable",
            ErrorClass::Internal => "internal",
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorClass::Conflict | ErrorClass::Transport | ErrorClass::Unavailable
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Item(#[from] ItemError),
    #[error("invalid input: {0}")]
    InvalidArgument(String),
    #[error("item '{0}' not found")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("owner id is required (set --owner or ITEMFLOW_OWNER)")]
    Unauthenticated,
    #[error("capture limit of {limit} items per minute reached")]
    RateLimited { limit: u32 },
    #[error("database is busy: {0}")]
    Unavailable(#[source] rusqlite::Error),
    #[error("database error: {0}")]
    Db(#[source] rusqlite::Error),
    #[error("{0}")]
    Registry(#[source] RegistryError),
    #[error("change feed unavailable: {0}")]
    Feed(#[from] FeedError),
    #[error("item lock unavailable: {0}")]
    Lock(#[source] std::io::Error),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal invariant violated: {0}")]
    Internal(String),
}

impl AppError {
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::Item(ItemError::StaleField { .. }) => ErrorClass::Conflict,
            AppError::Item(_) | AppError::InvalidArgument(_) | AppError::Config(_) => {
                ErrorClass::Validation
            }
            AppError::NotFound(_) => ErrorClass::NotFound,
            AppError::Conflict(_) => ErrorClass::Conflict,
            AppError::Unauthenticated => ErrorClass::Unauthenticated,
            AppError::RateLimited { .. } => ErrorClass::RateLimited,
            AppError::Unavailable(_) => ErrorClass::Unavailable,
            AppError::Registry(RegistryError::NotFound(_)) => ErrorClass::NotFound,
            AppError::Registry(RegistryError::Db(_)) => ErrorClass::Internal,
            AppError::Registry(_) => ErrorClass::Validation,
            AppError::Feed(_) | AppError::Lock(_) => ErrorClass::Transport,
            AppError::Sync(err) => err.class(),
            AppError::Db(_) | AppError::Io(_) | AppError::Internal(_) => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class().is_retryable()
    }

    /// Conflicts worth a second attempt; a failed compare-and-set is not one.
    fn is_retryable_conflict(&self) -> bool {
        matches!(self, AppError::Conflict(_))
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        match value.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked) => AppError::Unavailable(value),
            _ => AppError::Db(value),
        }
    }
}

impl From<RegistryError> for AppError {
    fn from(value: RegistryError) -> Self {
        match value {
            RegistryError::Db(err) => AppError::from(err),
            other => AppError::Registry(other),
        }
    }
}

impl From<LockError> for AppError {
    fn from(value: LockError) -> Self {
        match value {
            LockError::Busy(path) => AppError::Conflict(format!(
                "another transition holds {}",
                path.display()
            )),
            LockError::Io(err) => AppError::Lock(err),
        }
    }
}

#[cfg(test)]
mod tests_errors;
