use std::collections::HashSet;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use thiserror::Error;

use crate::clock::{next_update_stamp, now_utc};
use crate::config::DestinationSeed;
use crate::db::{self, ViewSlot};
use crate::domain::destination::{
    is_hex_color, slugify, suggest_keys, Destination, KeyAdvice, NAME_MAX_CHARS, TRASH_SLUG,
};
use crate::domain::item::{Item, CUSTOM_KEY_MAX_CHARS};
use crate::item_id::generate_destination_id;
use crate::ordering::{evenly_spaced, key_between};

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("invalid destination: {0}")]
    Validation(String),
    #[error("destination '{0}' not found")]
    NotFound(String),
    #[error("destination '{0}' already exists")]
    Duplicate(String),
    #[error("destination '{0}' is a system destination and cannot be changed")]
    SystemDestination(String),
    #[error(transparent)]
    Db(#[from] rusqlite::Error),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewDestination {
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub schema_keys: Vec<String>,
}

impl From<&DestinationSeed> for NewDestination {
    fn from(seed: &DestinationSeed) -> Self {
        Self {
            name: seed.name.clone(),
            icon: seed.icon.clone(),
            color: seed.color.clone(),
            schema_keys: seed.schema_keys.clone(),
        }
    }
}

/// Partial update; `None` leaves the field alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DestinationPatch {
    pub name: Option<String>,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub schema_keys: Option<Vec<String>>,
}

pub struct Registry<'a> {
    conn: &'a Connection,
    owner_id: &'a str,
}

impl<'a> Registry<'a> {
    pub fn new(conn: &'a Connection, owner_id: &'a str) -> Self {
        Self { conn, owner_id }
    }

    pub fn list(&self) -> Result<Vec<Destination>, RegistryError> {
        Ok(db::list_live_destinations(self.conn, self.owner_id)?)
    }

    pub fn get_by_slug(&self, slug: &str) -> Result<Destination, RegistryError> {
        let slug = slug.trim().to_ascii_lowercase();
        db::get_live_destination_by_slug(self.conn, self.owner_id, &slug)?
            .ok_or(RegistryError::NotFound(slug))
    }

    /// Includes soft-deleted destinations, for rendering history.
    pub fn get_by_id(&self, id: &str) -> Result<Option<Destination>, RegistryError> {
        Ok(db::get_destination(self.conn, self.owner_id, id)?)
    }

    pub fn create(&self, input: NewDestination) -> Result<Destination, RegistryError> {
        self.insert(input, false, None)
    }

    /// `sort_order` of `None` appends after the last live destination.
    fn insert(
        &self,
        input: NewDestination,
        is_system: bool,
        sort_order: Option<String>,
    ) -> Result<Destination, RegistryError> {
        let name = validate_name(&input.name)?;
        let slug = slugify(&name);
        if slug.is_empty() {
            return Err(RegistryError::Validation(format!(
                "name '{name}' has no letters or digits to build a slug from"
            )));
        }
        let color = validate_color(input.color.as_deref())?;
        let schema_keys = normalize_schema_keys(&input.schema_keys)?;

        if db::get_live_destination_by_slug(self.conn, self.owner_id, &slug)?.is_some() {
            return Err(RegistryError::Duplicate(slug));
        }

        let sort_order = match sort_order {
            Some(key) => key,
            None => {
                let last = self.list()?.last().map(|dest| dest.sort_order.clone());
                key_between(last.as_deref(), None)
            }
        };
        let now = now_utc();
        let destination = Destination {
            id: generate_destination_id(|candidate| {
                db::destination_id_exists(self.conn, candidate).unwrap_or(true)
            }),
            owner_id: self.owner_id.to_string(),
            slug,
            name,
            icon: non_empty(input.icon.as_deref()),
            color,
            sort_order,
            schema_keys,
            is_system,
            created_at: now.clone(),
            updated_at: now,
            deleted_at: None,
        };
        db::insert_destination(self.conn, &destination)?;
        tracing::info!(slug = %destination.slug, id = %destination.id, "destination created");
        Ok(destination)
    }

    pub fn update(&self, slug: &str, patch: DestinationPatch) -> Result<Destination, RegistryError> {
        let mut destination = self.get_mutable(slug)?;
        if let Some(name) = patch.name.as_deref() {
            destination.name = validate_name(name)?;
        }
        if let Some(icon) = patch.icon.as_deref() {
            destination.icon = non_empty(Some(icon));
        }
        if patch.color.is_some() {
            destination.color = validate_color(patch.color.as_deref())?;
        }
        if let Some(keys) = patch.schema_keys.as_deref() {
            destination.schema_keys = normalize_schema_keys(keys)?;
        }
        destination.updated_at = next_update_stamp(&destination.updated_at);
        db::update_destination(self.conn, &destination)?;
        Ok(destination)
    }

    /// Moves `slug` between the named neighbors in the sidebar order.
    pub fn reorder(
        &self,
        slug: &str,
        before: Option<&str>,
        after: Option<&str>,
    ) -> Result<Destination, RegistryError> {
        let mut destination = self.get_mutable(slug)?;
        let siblings: Vec<Destination> = self
            .list()?
            .into_iter()
            .filter(|dest| dest.id != destination.id)
            .collect();
        let find = |neighbor: &str| {
            siblings
                .iter()
                .find(|dest| dest.slug == neighbor.trim().to_ascii_lowercase())
                .map(|dest| dest.sort_order.clone())
                .ok_or_else(|| RegistryError::NotFound(neighbor.to_string()))
        };

        let (low, high) = match (before, after) {
            (Some(before), Some(after)) => (Some(find(before)?), Some(find(after)?)),
            (Some(before), None) => {
                let low = find(before)?;
                let high = siblings
                    .iter()
                    .map(|dest| dest.sort_order.clone())
                    .find(|key| key.as_str() > low.as_str());
                (Some(low), high)
            }
            (None, Some(after)) => {
                let high = find(after)?;
                let low = siblings
                    .iter()
                    .rev()
                    .map(|dest| dest.sort_order.clone())
                    .find(|key| key.as_str() < high.as_str());
                (low, Some(high))
            }
            (None, None) => (siblings.last().map(|dest| dest.sort_order.clone()), None),
        };
        if let (Some(low), Some(high)) = (&low, &high) {
            if low >= high {
                return Err(RegistryError::Validation(format!(
                    "'{}' must sort before '{}'",
                    before.unwrap_or_default(),
                    after.unwrap_or_default()
                )));
            }
        }

        destination.sort_order = key_between(low.as_deref(), high.as_deref());
        destination.updated_at = next_update_stamp(&destination.updated_at);
        db::update_destination(self.conn, &destination)?;
        Ok(destination)
    }

    /// Soft-deletes `slug` and detaches every item that referenced it.
    ///
    /// Returns the detached items so callers can publish them.
    pub fn delete(&self, slug: &str) -> Result<Vec<Item>, RegistryError> {
        let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
        let mut destination = self.get_mutable(slug)?;
        let from = destination.to_ref();

        let mut orphaned = Vec::new();
        for item in db::items_for_destination(&tx, self.owner_id, &destination.id)? {
            let at = next_update_stamp(&item.updated_at);
            let mut transition = item.orphan(&from, &at);
            if !transition.item.is_archived() {
                let last = db::last_sort_key(&tx, ViewSlot::of(&transition.item), &item.id)?;
                transition.item.sort_order = key_between(last.as_deref(), None);
            }
            db::update_item(&tx, &transition.item)?;
            db::insert_activity(&tx, &transition.item, &transition.activity)?;
            orphaned.push(transition.item);
        }

        let now = now_utc();
        destination.deleted_at = Some(now.clone());
        destination.updated_at = next_update_stamp(&destination.updated_at).max(now);
        db::update_destination(&tx, &destination)?;
        tx.commit()?;

        tracing::info!(slug = %destination.slug, orphaned = orphaned.len(), "destination deleted");
        Ok(orphaned)
    }

    /// Advisory only: unknown keys are reported, never rejected.
    pub fn validate_custom_key(&self, slug: &str, key: &str) -> Result<KeyAdvice, RegistryError> {
        let destination = self.get_by_slug(slug)?;
        if destination.knows_key(key.trim()) {
            return Ok(KeyAdvice::Known);
        }
        Ok(KeyAdvice::Unknown {
            suggestions: suggest_keys(&destination.schema_keys, key),
        })
    }

    pub fn ensure_system_destinations(&self) -> Result<(), RegistryError> {
        if db::get_live_destination_by_slug(self.conn, self.owner_id, TRASH_SLUG)?.is_none() {
            self.insert(
                NewDestination {
                    name: "Trash".to_string(),
                    ..NewDestination::default()
                },
                true,
                None,
            )?;
        }
        Ok(())
    }

    /// Creates the configured destinations that do not exist yet. An empty
    /// sidebar gets evenly spaced keys instead of a run of appends.
    pub fn seed_defaults(&self, seeds: &[DestinationSeed]) -> Result<Vec<Destination>, RegistryError> {
        let mut slugs = HashSet::new();
        let mut missing = Vec::new();
        for seed in seeds {
            let slug = slugify(&seed.name);
            if !slugs.insert(slug.clone()) {
                continue;
            }
            if db::get_live_destination_by_slug(self.conn, self.owner_id, &slug)?.is_none() {
                missing.push(seed);
            }
        }

        let mut keys = if self.list()?.is_empty() {
            evenly_spaced(missing.len()).into_iter()
        } else {
            Vec::new().into_iter()
        };
        let mut created = Vec::new();
        for seed in missing {
            created.push(self.insert(NewDestination::from(seed), false, keys.next())?);
        }
        Ok(created)
    }

    fn get_mutable(&self, slug: &str) -> Result<Destination, RegistryError> {
        let destination = self.get_by_slug(slug)?;
        if destination.is_system {
            return Err(RegistryError::SystemDestination(destination.slug));
        }
        Ok(destination)
    }
}

fn validate_name(raw: &str) -> Result<String, RegistryError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(RegistryError::Validation("name is required".to_string()));
    }
    if name.chars().count() > NAME_MAX_CHARS {
        return Err(RegistryError::Validation(format!(
            "name is longer than {NAME_MAX_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

fn validate_color(raw: Option<&str>) -> Result<Option<String>, RegistryError> {
    match non_empty(raw) {
        Some(color) if is_hex_color(&color) => Ok(Some(color.to_ascii_lowercase())),
        Some(color) => Err(RegistryError::Validation(format!(
            "color '{color}' must look like #rrggbb"
        ))),
        None => Ok(None),
    }
}

fn normalize_schema_keys(raw: &[String]) -> Result<Vec<String>, RegistryError> {
    let mut keys: Vec<String> = Vec::new();
    for key in raw {
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        if key.chars().count() > CUSTOM_KEY_MAX_CHARS {
            return Err(RegistryError::Validation(format!(
                "schema key '{key}' is longer than {CUSTOM_KEY_MAX_CHARS} characters"
            )));
        }
        if !keys.iter().any(|existing| existing == key) {
            keys.push(key.to_string());
        }
    }
    Ok(keys)
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}
