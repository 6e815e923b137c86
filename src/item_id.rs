use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const ITEM_PREFIX: &str = "itm";
pub const DESTINATION_PREFIX: &str = "dst";

pub fn generate_item_id<F>(exists: F) -> String
where
    F: FnMut(&str) -> bool,
{
    generate_id(ITEM_PREFIX, exists)
}

pub fn generate_destination_id<F>(exists: F) -> String
where
    F: FnMut(&str) -> bool,
{
    generate_id(DESTINATION_PREFIX, exists)
}

fn generate_id<F>(prefix: &str, mut exists: F) -> String
where
    F: FnMut(&str) -> bool,
{
    for _ in 0..64 {
        let seed = Uuid::now_v7().to_string();
        let mut hasher = Sha256::new();
        hasher.update(seed.as_bytes());
        let digest = format!("{:x}", hasher.finalize());
        let candidate = format!("{}-{}", prefix, &digest[..6]);
        if !exists(&candidate) {
            return candidate;
        }
    }

    format!("{}-{}", prefix, &Uuid::now_v7().simple().to_string()[..12])
}

pub fn display_id(id: &str) -> &str {
    id.split_once('-').map_or(id, |(_, suffix)| suffix)
}

/// Accepts either `itm-a1b2c3` or the bare `a1b2c3` that listings print.
pub fn qualify_item_id(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with(&format!("{ITEM_PREFIX}-")) {
        trimmed.to_string()
    } else {
        format!("{ITEM_PREFIX}-{trimmed}")
    }
}
