use serde_json::Value;

use crate::domain::item::Item;
use crate::item_id::display_id;

/// Refinements applied after the view query: the view picks layer and
/// destination, these narrow by status, producer and text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemListFilter {
    pub status: Option<String>,
    pub source: Option<String>,
    pub query: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Open,
    Done,
}

pub fn apply_filters(items: Vec<Item>, filter: &ItemListFilter) -> Vec<Item> {
    let normalized = NormalizedFilter::from(filter);
    if normalized.is_empty() {
        return items;
    }

    items
        .into_iter()
        .filter(|item| matches_filter(item, &normalized))
        .collect()
}

pub fn is_known_status(raw: &str) -> bool {
    parse_status(raw).is_some()
}

#[derive(Debug, Clone, Default)]
struct NormalizedFilter {
    status: Option<Status>,
    source: Option<String>,
    query: Option<String>,
}

impl NormalizedFilter {
    fn is_empty(&self) -> bool {
        self.status.is_none() && self.source.is_none() && self.query.is_none()
    }
}

impl From<&ItemListFilter> for NormalizedFilter {
    fn from(value: &ItemListFilter) -> Self {
        Self {
            status: value.status.as_deref().and_then(parse_status),
            source: normalize_scalar(value.source.as_deref()),
            query: normalize_scalar(value.query.as_deref()),
        }
    }
}

fn parse_status(raw: &str) -> Option<Status> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "open" | "todo" => Some(Status::Open),
        "done" | "completed" => Some(Status::Done),
        _ => None,
    }
}

fn matches_filter(item: &Item, filter: &NormalizedFilter) -> bool {
    match filter.status {
        Some(Status::Open) if item.is_completed => return false,
        Some(Status::Done) if !item.is_completed => return false,
        _ => {}
    }

    if let Some(source) = filter.source.as_deref() {
        if item.source.to_ascii_lowercase() != source {
            return false;
        }
    }

    match filter.query.as_deref() {
        Some(query) => matches_query(item, query),
        None => true,
    }
}

fn matches_query(item: &Item, query: &str) -> bool {
    let notes = item.notes.as_deref().unwrap_or("").to_ascii_lowercase();
    item.id.to_ascii_lowercase().contains(query)
        || display_id(&item.id).eq_ignore_ascii_case(query)
        || item.title.to_ascii_lowercase().contains(query)
        || notes.contains(query)
        || item.custom_values.values().any(|value| match value {
            Value::String(text) => text.to_ascii_lowercase().contains(query),
            _ => false,
        })
}

fn normalize_scalar(raw: Option<&str>) -> Option<String> {
    let trimmed = raw?.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_ascii_lowercase())
    }
}
