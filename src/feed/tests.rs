use super::{relative_path_for_event, ChangeEvent, ChangeKind, FeedError, FeedReader, FeedWriter};
use crate::domain::item::{CaptureInput, Item};
use std::path::PathBuf;
use uuid::Uuid;

fn unique_tmp_dir() -> PathBuf {
    std::env::temp_dir().join(format!("itemflow-feed-{}", Uuid::now_v7()))
}

fn sample_item(owner: &str) -> Item {
    Item::capture(
        "itm-0a1b2c",
        owner,
        CaptureInput {
            title: "Call Sarah".to_string(),
            source: "bot".to_string(),
            ..CaptureInput::default()
        },
        "V",
        "2026-02-22T17:00:00.000000Z",
    )
    .expect("capture should validate")
    .item
}

#[test]
fn builds_date_partitioned_paths() {
    let mut event = ChangeEvent::upsert(&sample_item("owner-1"));
    event.event_id = "018f4f7f-7dc7-7f4e-954b-64f8a2273ec8".to_string();
    let path = relative_path_for_event(&event).expect("path should build");
    assert_eq!(
        path.to_string_lossy(),
        "feed/2026/02/22/018f4f7f-7dc7-7f4e-954b-64f8a2273ec8-upsert.json"
    );
}

#[test]
fn rejects_unsafe_event_ids() {
    let mut event = ChangeEvent::upsert(&sample_item("owner-1"));
    event.event_id = "../escape".to_string();
    assert!(matches!(
        relative_path_for_event(&event),
        Err(FeedError::InvalidFileComponent { .. })
    ));
}

#[test]
fn publish_is_create_once() {
    let root = unique_tmp_dir();
    let writer = FeedWriter::new(&root);
    let event = ChangeEvent::upsert(&sample_item("owner-1"));
    let relative = writer.publish(&event).expect("first publish should succeed");
    assert!(root.join(&relative).exists());
    assert!(matches!(writer.publish(&event), Err(FeedError::Io(_))));
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn reader_filters_by_owner_and_cursor() {
    let root = unique_tmp_dir();
    let writer = FeedWriter::new(&root);
    let reader = FeedReader::new(&root);
    assert!(reader
        .read_since(None, "owner-1")
        .expect("empty feed should read")
        .is_empty());

    let mut first = ChangeEvent::upsert(&sample_item("owner-1"));
    first.event_id = "018f4f7f-0000-7000-8000-000000000001".to_string();
    let mut foreign = ChangeEvent::upsert(&sample_item("owner-2"));
    foreign.event_id = "018f4f7f-0000-7000-8000-000000000002".to_string();
    let mut second = ChangeEvent::delete("owner-1", "itm-0a1b2c");
    second.event_id = "018f4f7f-0000-7000-8000-000000000003".to_string();
    for event in [&first, &foreign, &second] {
        writer.publish(event).expect("publish should succeed");
    }

    let all = reader.read_since(None, "owner-1").expect("feed should read");
    let ids: Vec<&str> = all.iter().map(|event| event.event_id.as_str()).collect();
    assert_eq!(ids, vec![first.event_id.as_str(), second.event_id.as_str()]);
    assert_eq!(all[1].kind, ChangeKind::Delete);
    assert!(all[1].item.is_none());

    let rest = reader
        .read_since(Some(&first.event_id), "owner-1")
        .expect("feed should read");
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].event_id, second.event_id);

    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn malformed_files_surface_as_errors() {
    let root = unique_tmp_dir();
    let day = root.join("feed/2026/02/22");
    std::fs::create_dir_all(&day).expect("feed dir should be creatable");
    std::fs::write(day.join("garbage-upsert.json"), b"{not json").expect("write");
    let err = FeedReader::new(&root)
        .read_since(None, "owner-1")
        .expect_err("garbage should not parse");
    assert!(matches!(err, FeedError::Malformed { .. }));
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn cursor_skips_day_directories_before_it() {
    let root = unique_tmp_dir();
    let writer = FeedWriter::new(&root);
    let reader = FeedReader::new(&root);

    // 2026-02-20T00:00:00Z and a day later.
    let cursor =
        Uuid::new_v7(uuid::Timestamp::from_unix(uuid::NoContext, 1_771_545_600, 0)).to_string();
    let mut later = ChangeEvent::upsert(&sample_item("owner-1"));
    later.event_id =
        Uuid::new_v7(uuid::Timestamp::from_unix(uuid::NoContext, 1_771_632_000, 0)).to_string();
    writer.publish(&later).expect("publish should succeed");

    let old_day = root.join("feed/2025/12/31");
    std::fs::create_dir_all(&old_day).expect("old day dir");
    std::fs::write(old_day.join("garbage-upsert.json"), b"{not json").expect("write");

    let events = reader
        .read_since(Some(&cursor), "owner-1")
        .expect("days before the cursor are never opened");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].event_id, later.event_id);
    assert!(matches!(
        reader.read_since(None, "owner-1"),
        Err(FeedError::Malformed { .. })
    ));

    let _ = std::fs::remove_dir_all(root);
}
