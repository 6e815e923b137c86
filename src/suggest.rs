use serde::Serialize;

use crate::domain::destination::Destination;
use crate::domain::item::Item;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Suggestion {
    pub destination_slug: String,
    /// 0.0 to 1.0.
    pub confidence: f64,
    pub reasoning: String,
}

/// Proposes a destination for an item. Implementations never mutate anything.
pub trait Suggester {
    fn suggest(&self, item: &Item, destinations: &[Destination]) -> Option<Suggestion>;
}

/// Deterministic default: matches title and notes against destination
/// names, schema keys and a small table of cue words.
#[derive(Debug, Clone, Default)]
pub struct KeywordSuggester;

const CUES: [(&str, &[&str]); 4] = [
    (
        "waiting",
        &["wait", "waiting", "reply", "hear", "heard", "follow", "pending", "response"],
    ),
    (
        "next",
        &["call", "email", "buy", "fix", "send", "book", "pay", "schedule", "write"],
    ),
    (
        "someday",
        &["someday", "maybe", "idea", "learn", "travel", "explore", "eventually"],
    ),
    (
        "reference",
        &["article", "link", "http", "https", "docs", "recipe", "manual", "reference"],
    ),
];

impl Suggester for KeywordSuggester {
    fn suggest(&self, item: &Item, destinations: &[Destination]) -> Option<Suggestion> {
        let words = tokenize(&format!(
            "{} {}",
            item.title,
            item.notes.as_deref().unwrap_or_default()
        ));
        if words.is_empty() {
            return None;
        }

        let mut best: Option<(usize, &Destination, Vec<String>)> = None;
        for destination in destinations {
            let mut vocabulary = tokenize(&destination.name);
            vocabulary.extend(destination.schema_keys.iter().flat_map(|key| tokenize(key)));
            if let Some((_, cues)) = CUES.iter().find(|(slug, _)| *slug == destination.slug) {
                vocabulary.extend(cues.iter().map(|cue| cue.to_string()));
            }

            let hits: Vec<String> = words
                .iter()
                .filter(|word| vocabulary.contains(word))
                .cloned()
                .collect();
            let better = match &best {
                Some((score, _, _)) => hits.len() > *score,
                None => !hits.is_empty(),
            };
            if better {
                best = Some((hits.len(), destination, hits));
            }
        }

        let (score, destination, hits) = best?;
        Some(Suggestion {
            destination_slug: destination.slug.clone(),
            confidence: (0.35 + 0.2 * score as f64).min(0.95),
            reasoning: format!("matched {} for {}", hits.join(", "), destination.name),
        })
    }
}

fn tokenize(raw: &str) -> Vec<String> {
    let mut words: Vec<String> = raw
        .split(|ch: char| !ch.is_alphanumeric())
        .filter(|word| word.len() >= 3)
        .map(str::to_lowercase)
        .collect();
    words.dedup();
    words
}

#[cfg(test)]
mod tests {
    use super::{KeywordSuggester, Suggester};
    use crate::domain::destination::Destination;
    use crate::domain::item::{CaptureInput, Item};

    fn destination(slug: &str, name: &str, keys: &[&str]) -> Destination {
        Destination {
            id: format!("dst-{slug}"),
            owner_id: "owner-1".to_string(),
            slug: slug.to_string(),
            name: name.to_string(),
            icon: None,
            color: None,
            sort_order: "V".to_string(),
            schema_keys: keys.iter().map(|key| key.to_string()).collect(),
            is_system: false,
            created_at: "2026-03-01T09:00:00.000000Z".to_string(),
            updated_at: "2026-03-01T09:00:00.000000Z".to_string(),
            deleted_at: None,
        }
    }

    fn item(title: &str) -> Item {
        Item::capture(
            "itm-000001",
            "owner-1",
            CaptureInput {
                title: title.to_string(),
                source: "cli".to_string(),
                ..CaptureInput::default()
            },
            "V",
            "2026-03-01T09:00:00.000000Z",
        )
        .expect("capture should validate")
        .item
    }

    fn destinations() -> Vec<Destination> {
        vec![
            destination("next", "Next", &["priority"]),
            destination("waiting", "Waiting", &[]),
            destination("groceries", "Groceries", &["store"]),
        ]
    }

    #[test]
    fn cue_words_pick_the_builtin_destination() {
        let suggestion = KeywordSuggester
            .suggest(&item("Waiting to hear back from Sarah"), &destinations())
            .expect("a suggestion");
        assert_eq!(suggestion.destination_slug, "waiting");
        assert!(suggestion.confidence > 0.5 && suggestion.confidence <= 0.95);
        assert!(suggestion.reasoning.contains("hear"));
    }

    #[test]
    fn destination_names_and_schema_keys_count() {
        let suggestion = KeywordSuggester
            .suggest(&item("groceries from the store"), &destinations())
            .expect("a suggestion");
        assert_eq!(suggestion.destination_slug, "groceries");
    }

    #[test]
    fn no_overlap_means_no_suggestion() {
        assert!(KeywordSuggester
            .suggest(&item("zzz qqq"), &destinations())
            .is_none());
    }
}
