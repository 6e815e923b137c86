use serde::{Deserialize, Serialize};

use super::item::DestinationRef;

pub const TRASH_SLUG: &str = "trash";
pub const NAME_MAX_CHARS: usize = 80;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Destination {
    pub id: String,
    pub owner_id: String,
    pub slug: String,
    pub name: String,
    pub icon: Option<String>,
    pub color: Option<String>,
    pub sort_order: String,
    pub schema_keys: Vec<String>,
    pub is_system: bool,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<String>,
}

impl Destination {
    pub fn to_ref(&self) -> DestinationRef {
        DestinationRef {
            id: self.id.clone(),
            slug: self.slug.clone(),
        }
    }

    pub fn knows_key(&self, key: &str) -> bool {
        self.schema_keys.iter().any(|known| known == key)
    }
}

/// Advisory answer for a custom-attribute key. Never used to reject writes.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum KeyAdvice {
    Known,
    Unknown { suggestions: Vec<String> },
}

pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut pending_dash = false;
    for ch in name.trim().chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(ch.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

pub fn is_hex_color(raw: &str) -> bool {
    let Some(hex) = raw.strip_prefix('#') else {
        return false;
    };
    hex.len() == 6 && hex.chars().all(|ch| ch.is_ascii_hexdigit())
}

/// Schema keys close to `key`: shared prefix or edit distance of at most two.
pub fn suggest_keys(schema_keys: &[String], key: &str) -> Vec<String> {
    let needle = key.trim().to_ascii_lowercase();
    schema_keys
        .iter()
        .filter(|candidate| {
            let candidate = candidate.to_ascii_lowercase();
            (needle.len() >= 3 && candidate.starts_with(&needle))
                || (candidate.len() >= 3 && needle.starts_with(&candidate))
                || edit_distance(&candidate, &needle) <= 2
        })
        .cloned()
        .collect()
}

fn edit_distance(left: &str, right: &str) -> usize {
    let right: Vec<char> = right.chars().collect();
    let mut previous: Vec<usize> = (0..=right.len()).collect();
    for (i, lch) in left.chars().enumerate() {
        let mut current = vec![i + 1; right.len() + 1];
        for (j, rch) in right.iter().enumerate() {
            let substitution = previous[j] + usize::from(lch != *rch);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        previous = current;
    }
    previous[right.len()]
}
