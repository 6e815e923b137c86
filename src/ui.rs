use std::collections::HashMap;
use std::io::{self, IsTerminal};

use crate::activity::TimelineLine;
use crate::domain::destination::{Destination, KeyAdvice};
use crate::domain::item::Item;
use crate::domain::layer::Layer;
use crate::feed::{ChangeEvent, ChangeKind};
use crate::item_id::display_id;
use crate::listing::ItemListFilter;
use crate::suggest::Suggestion;
use crate::sync::{PullSummary, View};

/// Destination id to slug, for rendering rows without extra lookups.
pub type DestinationNames = HashMap<String, String>;

pub fn destination_names(destinations: &[Destination]) -> DestinationNames {
    destinations
        .iter()
        .map(|dest| (dest.id.clone(), dest.slug.clone()))
        .collect()
}

pub fn print_item_list(
    items: &[Item],
    view_label: &str,
    filter: &ItemListFilter,
    names: &DestinationNames,
) {
    let palette = Palette::auto();
    println!("{}", palette.heading(view_label));
    if let Some(summary) = filter_summary(filter) {
        println!("{}", palette.dim(&format!("filters: {summary}")));
    }

    if items.is_empty() {
        println!("{}", palette.dim("no items matched"));
        return;
    }

    for item in items {
        println!("{}", format_item_row(item, names, &palette));
    }
    println!("{}", palette.dim(&format!("{} item(s)", items.len())));
}

pub fn view_label(view: &View, destination_slug: Option<&str>) -> String {
    match (view.layer, destination_slug) {
        (Some(layer), Some(slug)) => format!("{} / {slug}", layer_title(layer)),
        (Some(layer), None) => layer_title(layer).to_string(),
        (None, Some(slug)) => format!("Destination {slug}"),
        (None, None) => "Items".to_string(),
    }
}

fn layer_title(layer: Layer) -> &'static str {
    match layer {
        Layer::Capture => "Inbox",
        Layer::Process => "Processing",
        Layer::Commit => "Committed",
    }
}

fn format_item_row(item: &Item, names: &DestinationNames, palette: &Palette) -> String {
    let mut line = format!(
        "{} {} {}",
        palette.id(display_id(&item.id)),
        palette.layer(item.layer),
        item.title
    );

    if let Some(slug) = item
        .destination_id
        .as_deref()
        .and_then(|id| names.get(id))
    {
        line.push(' ');
        line.push_str(&palette.destination(&format!("@{slug}")));
    }
    if let Some(at) = item.scheduled_at.as_deref() {
        line.push(' ');
        let when = if item.is_all_day {
            at.get(..10).unwrap_or(at).to_string()
        } else {
            at.to_string()
        };
        line.push_str(&palette.dim(&when));
    }
    if item.is_completed {
        line.push(' ');
        line.push_str(&palette.done("done"));
    }
    if item.is_archived() {
        line.push(' ');
        line.push_str(&palette.dim("(archived)"));
    }
    line
}

pub fn print_item(item: &Item, destination: Option<&str>) {
    let palette = Palette::auto();
    println!(
        "{} {} {}",
        palette.id(&item.id),
        palette.layer(item.layer),
        palette.heading(&item.title)
    );
    print_field(&palette, "source", &item.source);
    print_field(&palette, "destination", destination.unwrap_or("-"));
    if let Some(at) = item.scheduled_at.as_deref() {
        let mut when = at.to_string();
        if item.is_all_day {
            when.push_str(" (all day)");
        }
        if let Some(minutes) = item.duration_minutes {
            when.push_str(&format!(" for {minutes}m"));
        }
        print_field(&palette, "scheduled", &when);
    }
    if let Some(at) = item.completed_at.as_deref() {
        print_field(&palette, "completed", at);
    }
    if let Some(at) = item.archived_at.as_deref() {
        print_field(&palette, "archived", at);
    }
    if let Some(space) = item.space_id.as_deref() {
        print_field(&palette, "space", space);
    }
    if let Some(project) = item.project_id.as_deref() {
        print_field(&palette, "project", project);
    }
    for attachment in &item.attachments {
        let mut text = format!(
            "{:?} {} ({} bytes)",
            attachment.kind, attachment.object_ref, attachment.size_bytes
        )
        .to_ascii_lowercase();
        if let Some(secs) = attachment.duration_seconds {
            text.push_str(&format!(" {secs}s"));
        }
        print_field(&palette, "attachment", &text);
    }
    for (key, value) in &item.custom_values {
        print_field(&palette, &format!("custom.{key}"), &value.to_string());
    }
    print_field(&palette, "created", &item.created_at);
    print_field(&palette, "updated", &item.updated_at);
    if let Some(notes) = item.notes.as_deref() {
        println!();
        println!("{notes}");
    }
}

fn print_field(palette: &Palette, label: &str, value: &str) {
    println!("  {} {value}", palette.dim(&format!("{label}:")));
}

pub fn print_key_advice(key: &str, advice: &KeyAdvice) {
    let palette = Palette::auto();
    match advice {
        KeyAdvice::Known => {}
        KeyAdvice::Unknown { suggestions } if suggestions.is_empty() => {
            println!("{}", palette.warn(&format!("note: '{key}' is not in the destination schema")));
        }
        KeyAdvice::Unknown { suggestions } => {
            println!(
                "{}",
                palette.warn(&format!(
                    "note: '{key}' is not in the destination schema; did you mean {}?",
                    suggestions.join(", ")
                ))
            );
        }
    }
}

pub fn print_timeline(item: &Item, lines: &[TimelineLine]) {
    let palette = Palette::auto();
    println!("{} {}", palette.id(display_id(&item.id)), palette.heading(&item.title));
    for line in lines {
        let mut row = format!("{} {}", palette.dim(&line.at), line.summary);
        if let Some(note) = line.note.as_deref() {
            row.push_str(&format!(" {}", palette.dim(&format!("\"{note}\""))));
        }
        println!("  {row}");
    }
}

pub fn print_destinations(destinations: &[Destination]) {
    let palette = Palette::auto();
    println!("{}", palette.heading("Destinations"));
    for dest in destinations {
        let mut line = format!("{} {}", palette.destination(&dest.slug), dest.name);
        if let Some(icon) = dest.icon.as_deref() {
            line = format!("{icon} {line}");
        }
        if let Some(color) = dest.color.as_deref() {
            line.push(' ');
            line.push_str(&palette.dim(color));
        }
        if !dest.schema_keys.is_empty() {
            line.push(' ');
            line.push_str(&palette.dim(&format!("[{}]", dest.schema_keys.join(", "))));
        }
        if dest.is_system {
            line.push(' ');
            line.push_str(&palette.dim("(system)"));
        }
        println!("{line}");
    }
}

pub fn print_suggestion(item: &Item, suggestion: Option<&Suggestion>) {
    let palette = Palette::auto();
    match suggestion {
        Some(suggestion) => println!(
            "{} -> {} {} {}",
            palette.id(display_id(&item.id)),
            palette.destination(&suggestion.destination_slug),
            palette.dim(&format!("({:.0}%)", suggestion.confidence * 100.0)),
            suggestion.reasoning
        ),
        None => println!("{}", palette.dim("no suggestion")),
    }
}

pub fn print_feed(events: &[ChangeEvent]) {
    let palette = Palette::auto();
    if events.is_empty() {
        println!("{}", palette.dim("no new changes"));
        return;
    }
    for event in events {
        let kind = match event.kind {
            ChangeKind::Upsert => palette.done(event.kind.as_str()),
            ChangeKind::Delete => palette.warn(event.kind.as_str()),
        };
        let title = event
            .item
            .as_ref()
            .map(|item| item.title.as_str())
            .unwrap_or("");
        println!(
            "{} {kind} {} {title}",
            palette.dim(&event.event_id),
            palette.id(display_id(&event.item_id))
        );
    }
}

pub fn print_pull(summary: &PullSummary) {
    let palette = Palette::auto();
    let mut line = format!(
        "applied {} inserted {} removed {} ignored {}",
        summary.applied, summary.inserted, summary.removed, summary.ignored
    );
    if summary.refreshed {
        line.push_str(" (full refresh)");
    }
    println!("{line}");
    if let Some(cursor) = summary.cursor.as_deref() {
        println!("{}", palette.dim(&format!("cursor: {cursor}")));
    }
}

fn filter_summary(filter: &ItemListFilter) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(status) = filter.status.as_deref().and_then(non_empty) {
        parts.push(format!("status={status}"));
    }
    if let Some(source) = filter.source.as_deref().and_then(non_empty) {
        parts.push(format!("source={source}"));
    }
    if let Some(query) = filter.query.as_deref().and_then(non_empty) {
        parts.push(format!("query={query}"));
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

fn non_empty(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed)
    }
}

pub struct Palette {
    enabled: bool,
}

impl Palette {
    pub fn auto() -> Self {
        let enabled = std::env::var_os("NO_COLOR").is_none() && io::stdout().is_terminal();
        Self { enabled }
    }

    fn paint(&self, code: &str, text: &str) -> String {
        if self.enabled {
            format!("\x1b[{code}m{text}\x1b[0m")
        } else {
            text.to_string()
        }
    }

    pub fn heading(&self, text: &str) -> String {
        self.paint("1;36", text)
    }

    pub fn dim(&self, text: &str) -> String {
        self.paint("2", text)
    }

    pub fn id(&self, text: &str) -> String {
        self.paint("1;94", text)
    }

    pub fn warn(&self, text: &str) -> String {
        self.paint("33", text)
    }

    fn done(&self, text: &str) -> String {
        self.paint("32", text)
    }

    fn destination(&self, text: &str) -> String {
        self.paint("35", text)
    }

    pub fn layer(&self, layer: Layer) -> String {
        let upper = layer.as_str().to_ascii_uppercase();
        self.paint(layer_color_code(layer), &format!("[{upper}]"))
    }
}

fn layer_color_code(layer: Layer) -> &'static str {
    match layer {
        Layer::Capture => "34",
        Layer::Process => "33",
        Layer::Commit => "32",
    }
}

#[cfg(test)]
mod tests {
    use super::{filter_summary, format_item_row, view_label, DestinationNames, Palette};
    use crate::domain::item::{CaptureInput, DestinationRef, Item};
    use crate::domain::layer::Layer;
    use crate::listing::ItemListFilter;
    use crate::sync::View;

    fn plain() -> Palette {
        Palette { enabled: false }
    }

    #[test]
    fn filter_summary_formats_only_active_filters() {
        let filter = ItemListFilter {
            status: Some("open".to_string()),
            source: Some("".to_string()),
            query: Some("sarah".to_string()),
        };
        let summary = filter_summary(&filter).expect("summary should exist");
        assert_eq!(summary, "status=open query=sarah");
    }

    #[test]
    fn filter_summary_is_none_for_empty_filters() {
        assert!(filter_summary(&ItemListFilter::default()).is_none());
    }

    #[test]
    fn rows_show_layer_destination_and_completion() {
        let captured = Item::capture(
            "itm-abc123",
            "owner-1",
            CaptureInput {
                title: "Call Sarah".to_string(),
                source: "web".to_string(),
                ..CaptureInput::default()
            },
            "V",
            "2026-03-01T09:00:00.000000Z",
        )
        .expect("capture should validate")
        .item;
        let waiting = DestinationRef {
            id: "dst-000001".to_string(),
            slug: "waiting".to_string(),
        };
        let routed = captured
            .route(&waiting, None, None, "2026-03-01T09:01:00.000000Z")
            .item
            .toggle_completed("2026-03-01T09:02:00.000000Z")
            .item;

        let mut names = DestinationNames::new();
        names.insert("dst-000001".to_string(), "waiting".to_string());
        assert_eq!(
            format_item_row(&routed, &names, &plain()),
            "abc123 [PROCESS] Call Sarah @waiting done"
        );
    }

    #[test]
    fn view_labels_name_the_layer() {
        assert_eq!(view_label(&View::layer(Layer::Capture), None), "Inbox");
        assert_eq!(
            view_label(&View::layer(Layer::Process), Some("waiting")),
            "Processing / waiting"
        );
        assert_eq!(view_label(&View::default(), None), "Items");
    }
}
