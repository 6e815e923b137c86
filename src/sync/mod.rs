mod view;

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::app::{AppError, ErrorClass, Placement};
use crate::clock::next_update_stamp;
use crate::domain::item::{DestinationRef, Item, ItemError, ItemField, Schedule};
use crate::feed::{ChangeEvent, ChangeKind, FeedReader};
use crate::ordering::key_between;

pub use view::View;

/// Server side of the coordinator: the Item Store, or a stand-in for it.
pub trait ItemGateway {
    fn fetch_view(&self, view: &View) -> Result<Vec<Item>, AppError>;
    fn apply(&self, mutation: &Mutation) -> Result<Item, AppError>;

    /// True when `apply` already retried a `Conflict` before returning it.
    fn retries_conflicts(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Route {
        item_id: String,
        destination: DestinationRef,
        note: Option<String>,
        placement: Placement,
    },
    Schedule {
        item_id: String,
        schedule: Schedule,
        placement: Placement,
    },
    Unschedule {
        item_id: String,
        placement: Placement,
    },
    ToggleCompleted {
        item_id: String,
    },
    ToggleArchived {
        item_id: String,
    },
    SetCompleted {
        item_id: String,
        completed: bool,
    },
    SetArchived {
        item_id: String,
        archived: bool,
    },
    EditField {
        item_id: String,
        field: ItemField,
        expected: Option<Value>,
        value: Value,
    },
    AddNote {
        item_id: String,
        note: String,
    },
    Move {
        item_id: String,
        placement: Placement,
    },
}

impl Mutation {
    /// Field edit from command-line text; see `ItemField::parse_input`.
    pub fn edit_field(
        item_id: impl Into<String>,
        field: &str,
        value: &str,
        expected: Option<&str>,
    ) -> Result<Self, ItemError> {
        let field = ItemField::from_str(field)?;
        Ok(Mutation::EditField {
            item_id: item_id.into(),
            expected: expected.map(|raw| field.parse_input(raw)),
            value: field.parse_input(value),
            field,
        })
    }

    pub fn item_id(&self) -> &str {
        match self {
            Mutation::Route { item_id, .. }
            | Mutation::Schedule { item_id, .. }
            | Mutation::Unschedule { item_id, .. }
            | Mutation::ToggleCompleted { item_id }
            | Mutation::ToggleArchived { item_id }
            | Mutation::SetCompleted { item_id, .. }
            | Mutation::SetArchived { item_id, .. }
            | Mutation::EditField { item_id, .. }
            | Mutation::AddNote { item_id, .. }
            | Mutation::Move { item_id, .. } => item_id,
        }
    }

    /// Local prediction of the confirmed item, via the same pure transitions.
    pub fn preview(&self, current: &Item, local: &[Item], at: &str) -> Result<Item, ItemError> {
        let item = match self {
            Mutation::Route {
                destination, note, ..
            } => current.route(destination, None, note.clone(), at).item,
            Mutation::Schedule { schedule, .. } => current.schedule(schedule, at)?.item,
            Mutation::Unschedule { .. } => current.unschedule(at).item,
            Mutation::ToggleCompleted { .. } => current.toggle_completed(at).item,
            Mutation::ToggleArchived { .. } => current.toggle_archived(at).item,
            Mutation::SetCompleted { completed, .. } => current.set_completed(*completed, at)?.item,
            Mutation::SetArchived { archived, .. } => current.set_archived(*archived, at)?.item,
            Mutation::EditField {
                field,
                expected,
                value,
                ..
            } => current.edit_field(field, expected.as_ref(), value.clone(), at)?.item,
            Mutation::AddNote { note, .. } => current.add_note(note, at)?.item,
            Mutation::Move { placement, .. } => match local_key(local, current, placement) {
                Some(key) => current.reorder(&key, at).item,
                None => current.clone(),
            },
        };
        Ok(item)
    }
}

/// Sort key between the named local neighbors, when they are known and ordered.
fn local_key(local: &[Item], current: &Item, placement: &Placement) -> Option<String> {
    let low = local_neighbor(local, current, placement.before.as_deref())?;
    let high = local_neighbor(local, current, placement.after.as_deref())?;
    match (low, high) {
        (Some(low), Some(high)) if low >= high => None,
        (None, None) => None,
        (low, high) => Some(key_between(low, high)),
    }
}

/// `None` when the neighbor is named but not cached; `Some(None)` when unnamed.
fn local_neighbor<'l>(
    local: &'l [Item],
    current: &Item,
    neighbor_id: Option<&str>,
) -> Option<Option<&'l str>> {
    match neighbor_id {
        Some(id) => local
            .iter()
            .find(|item| item.id == id && item.id != current.id)
            .map(|item| Some(item.sort_order.as_str())),
        None => Some(None),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplyOutcome {
    Applied,
    Inserted,
    Removed,
    Ignored,
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("{0}")]
    Gateway(#[source] Box<AppError>),
    #[error("change was rolled back; refresh required ({source})")]
    RefreshRequired {
        #[source]
        source: Box<AppError>,
    },
}

impl SyncError {
    pub fn class(&self) -> ErrorClass {
        match self {
            SyncError::Gateway(err) => err.class(),
            SyncError::RefreshRequired { source } => source.class(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PullSummary {
    pub applied: usize,
    pub inserted: usize,
    pub removed: usize,
    pub ignored: usize,
    pub refreshed: bool,
    pub cursor: Option<String>,
}

impl PullSummary {
    fn record(&mut self, outcome: ApplyOutcome) {
        match outcome {
            ApplyOutcome::Applied => self.applied += 1,
            ApplyOutcome::Inserted => self.inserted += 1,
            ApplyOutcome::Removed => self.removed += 1,
            ApplyOutcome::Ignored => self.ignored += 1,
        }
    }
}

/// Local cache of one view, reconciled against the change feed.
#[derive(Debug, Clone)]
pub struct SyncCoordinator {
    owner_id: String,
    view: View,
    items: Vec<Item>,
    confirmed: HashMap<String, String>,
    tombstones: HashSet<String>,
    pending: HashSet<String>,
    stale: bool,
}

impl SyncCoordinator {
    pub fn new(owner_id: impl Into<String>, view: View) -> Self {
        Self {
            owner_id: owner_id.into(),
            view,
            items: Vec::new(),
            confirmed: HashMap::new(),
            tombstones: HashSet::new(),
            pending: HashSet::new(),
            stale: true,
        }
    }

    pub fn view(&self) -> &View {
        &self.view
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn is_stale(&self) -> bool {
        self.stale
    }

    #[cfg(test)]
    pub fn is_pending(&self, item_id: &str) -> bool {
        self.pending.contains(item_id)
    }

    /// Replaces the cache with a full fetch; the source of truth.
    pub fn refresh(&mut self, items: Vec<Item>) {
        self.items = items
            .into_iter()
            .filter(|item| item.owner_id == self.owner_id && self.view.matches(item))
            .collect();
        self.sort();
        for item in &self.items {
            self.confirmed
                .insert(item.id.clone(), item.updated_at.clone());
        }
        self.pending.clear();
        self.stale = false;
        tracing::debug!(items = self.items.len(), "view refreshed");
    }

    pub fn apply_event(&mut self, event: &ChangeEvent) -> ApplyOutcome {
        if event.owner_id != self.owner_id {
            return ApplyOutcome::Ignored;
        }
        match event.kind {
            ChangeKind::Delete => {
                self.tombstones.insert(event.item_id.clone());
                self.confirmed.remove(&event.item_id);
                self.pending.remove(&event.item_id);
                if self.remove(&event.item_id).is_some() {
                    ApplyOutcome::Removed
                } else {
                    ApplyOutcome::Ignored
                }
            }
            ChangeKind::Upsert => match event.item.as_ref() {
                Some(item) if item.id == event.item_id => self.reconcile(item),
                _ => ApplyOutcome::Ignored,
            },
        }
    }

    /// Last-write-wins on `updated_at` against the last confirmed version.
    fn reconcile(&mut self, item: &Item) -> ApplyOutcome {
        if self.tombstones.contains(&item.id) {
            return ApplyOutcome::Ignored;
        }
        if let Some(known) = self.confirmed.get(&item.id) {
            if item.updated_at.as_str() <= known.as_str() {
                return ApplyOutcome::Ignored;
            }
        }
        self.confirmed
            .insert(item.id.clone(), item.updated_at.clone());
        self.pending.remove(&item.id);

        let existed = self.remove(&item.id).is_some();
        if !self.view.matches(item) {
            return if existed {
                ApplyOutcome::Removed
            } else {
                ApplyOutcome::Ignored
            };
        }
        self.items.push(item.clone());
        self.sort();
        if existed {
            ApplyOutcome::Applied
        } else {
            ApplyOutcome::Inserted
        }
    }

    /// Optimistic mutation with one retry and rollback on failure. A conflict
    /// the gateway has already retried goes straight to `RefreshRequired`.
    pub fn mutate(
        &mut self,
        gateway: &impl ItemGateway,
        mutation: Mutation,
    ) -> Result<Item, SyncError> {
        let item_id = mutation.item_id().to_string();
        let previous = self.items.iter().find(|item| item.id == item_id).cloned();

        if let Some(current) = previous.as_ref() {
            let at = next_update_stamp(&current.updated_at);
            match mutation.preview(current, &self.items, &at) {
                Ok(predicted) => {
                    self.remove(&item_id);
                    if self.view.matches(&predicted) {
                        self.items.push(predicted);
                        self.sort();
                    }
                    self.pending.insert(item_id.clone());
                }
                Err(err) => {
                    return Err(SyncError::Gateway(Box::new(AppError::from(err))));
                }
            }
        }

        let result = match gateway.apply(&mutation) {
            Err(err) if err.class() == ErrorClass::Conflict && gateway.retries_conflicts() => {
                Err(SyncError::RefreshRequired {
                    source: Box::new(err),
                })
            }
            Err(err) if err.is_retryable() => {
                tracing::warn!(item_id = %item_id, error = %err, "mutation failed; retrying once");
                gateway.apply(&mutation).map_err(|err| {
                    if err.is_retryable() {
                        SyncError::RefreshRequired {
                            source: Box::new(err),
                        }
                    } else {
                        SyncError::Gateway(Box::new(err))
                    }
                })
            }
            other => other.map_err(|err| SyncError::Gateway(Box::new(err))),
        };

        match result {
            Ok(confirmed) => {
                self.reconcile(&confirmed);
                self.pending.remove(&item_id);
                Ok(confirmed)
            }
            Err(err) => {
                self.rollback(&item_id, previous);
                if err.class() == ErrorClass::Transport {
                    self.disconnect();
                }
                Err(err)
            }
        }
    }

    fn rollback(&mut self, item_id: &str, previous: Option<Item>) {
        self.remove(item_id);
        self.pending.remove(item_id);
        if let Some(previous) = previous {
            self.items.push(previous);
            self.sort();
        }
        tracing::debug!(item_id, "optimistic change rolled back");
    }

    pub fn disconnect(&mut self) {
        self.stale = true;
    }

    pub fn reconnect(&mut self, gateway: &impl ItemGateway) -> Result<(), SyncError> {
        let items = gateway
            .fetch_view(&self.view)
            .map_err(|err| SyncError::Gateway(Box::new(err)))?;
        self.refresh(items);
        Ok(())
    }

    /// Applies feed events after `cursor`; an unreadable feed falls back to a refresh.
    pub fn pull(
        &mut self,
        gateway: &impl ItemGateway,
        feed: &FeedReader,
        cursor: Option<&str>,
    ) -> Result<PullSummary, SyncError> {
        let mut summary = PullSummary {
            cursor: cursor.map(str::to_string),
            ..PullSummary::default()
        };
        let events = match feed.read_since(cursor, &self.owner_id) {
            Ok(events) => events,
            Err(err) => {
                tracing::warn!(error = %err, "change feed unreadable; refreshing view");
                self.reconnect(gateway)?;
                summary.refreshed = true;
                return Ok(summary);
            }
        };

        if self.stale {
            self.reconnect(gateway)?;
            summary.refreshed = true;
        }
        for event in &events {
            summary.record(self.apply_event(event));
            summary.cursor = Some(event.event_id.clone());
        }
        Ok(summary)
    }

    fn remove(&mut self, item_id: &str) -> Option<Item> {
        let index = self.items.iter().position(|item| item.id == item_id)?;
        Some(self.items.remove(index))
    }

    fn sort(&mut self) {
        self.items.sort_by(|left, right| {
            left.sort_order
                .cmp(&right.sort_order)
                .then_with(|| left.id.cmp(&right.id))
        });
    }
}
