use super::{
    parse_field_value, Attachment, AttachmentKind, CaptureInput, DestinationRef, Item, ItemError,
    ItemField, Schedule, TITLE_MAX_CHARS,
};
use crate::domain::activity::ActivityAction;
use crate::domain::layer::Layer;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::str::FromStr;

const T0: &str = "2026-03-01T08:00:00.000000Z";
const T1: &str = "2026-03-01T08:05:00.000000Z";
const T2: &str = "2026-03-01T08:10:00.000000Z";

fn captured(title: &str) -> Item {
    Item::capture(
        "itm-test01",
        "owner-1",
        CaptureInput {
            title: title.to_string(),
            source: "web".to_string(),
            ..CaptureInput::default()
        },
        "V",
        T0,
    )
    .expect("capture should succeed")
    .item
}

fn waiting() -> DestinationRef {
    DestinationRef {
        id: "dst-wait".to_string(),
        slug: "waiting".to_string(),
    }
}

fn tomorrow_nine() -> Schedule {
    Schedule {
        at: "2026-03-02T09:00:00Z".to_string(),
        is_all_day: false,
        duration_minutes: Some(30),
    }
}

#[test]
fn capture_starts_in_inbox_without_destination() {
    let transition = Item::capture(
        "itm-test01",
        "owner-1",
        CaptureInput {
            title: "  Call Sarah ".to_string(),
            source: "Web".to_string(),
            ..CaptureInput::default()
        },
        "V",
        T0,
    )
    .expect("capture should succeed");

    assert_eq!(transition.item.title, "Call Sarah");
    assert_eq!(transition.item.layer, Layer::Capture);
    assert!(transition.item.destination_id.is_none());
    assert_eq!(transition.item.source, "web");
    assert_eq!(transition.activity.action, ActivityAction::Created);
    assert_eq!(transition.activity.metadata["source"], "web");
}

#[test]
fn capture_rejects_missing_and_oversized_titles() {
    let blank = Item::capture(
        "itm-x",
        "owner-1",
        CaptureInput {
            title: "   ".to_string(),
            source: "web".to_string(),
            ..CaptureInput::default()
        },
        "V",
        T0,
    );
    assert_eq!(blank.unwrap_err(), ItemError::TitleRequired);

    let long = Item::capture(
        "itm-x",
        "owner-1",
        CaptureInput {
            title: "x".repeat(TITLE_MAX_CHARS + 1),
            source: "web".to_string(),
            ..CaptureInput::default()
        },
        "V",
        T0,
    );
    assert!(matches!(long, Err(ItemError::TitleTooLong(501))));
}

#[test]
fn capture_requires_source() {
    let result = Item::capture(
        "itm-x",
        "owner-1",
        CaptureInput {
            title: "idea".to_string(),
            ..CaptureInput::default()
        },
        "V",
        T0,
    );
    assert_eq!(result.unwrap_err(), ItemError::SourceRequired);
}

#[test]
fn route_sets_destination_and_process_layer() {
    let item = captured("Call Sarah");
    let routed = item.route(&waiting(), None, Some("after lunch".to_string()), T1);
    assert_eq!(routed.item.layer, Layer::Process);
    assert_eq!(routed.item.destination_id.as_deref(), Some("dst-wait"));
    assert_eq!(routed.item.updated_at, T1);
    assert_eq!(routed.activity.action, ActivityAction::Routed);
    assert!(routed.activity.metadata["from_destination"].is_null());
    assert_eq!(routed.activity.metadata["to_destination"], "waiting");
    assert_eq!(routed.activity.note.as_deref(), Some("after lunch"));
}

#[test]
fn routing_a_scheduled_item_keeps_it_committed() {
    let scheduled = captured("Dentist")
        .schedule(&tomorrow_nine(), T1)
        .expect("schedule should succeed")
        .item;
    let routed = scheduled.route(&waiting(), None, None, T2).item;
    assert_eq!(routed.layer, Layer::Commit);
    assert!(routed.check_invariants().is_ok());
}

#[test]
fn schedule_from_capture_commits_without_destination() {
    let scheduled = captured("Dentist")
        .schedule(&tomorrow_nine(), T1)
        .expect("schedule should succeed");
    assert_eq!(scheduled.item.layer, Layer::Commit);
    assert!(scheduled.item.destination_id.is_none());
    assert_eq!(
        scheduled.item.scheduled_at.as_deref(),
        Some("2026-03-02T09:00:00.000000Z")
    );
    assert_eq!(scheduled.activity.metadata["duration_minutes"], 30);
}

#[test]
fn schedule_rejects_garbage_timestamps_and_zero_duration() {
    let item = captured("Dentist");
    let bad_time = item.schedule(
        &Schedule {
            at: "next tuesday".to_string(),
            is_all_day: true,
            duration_minutes: None,
        },
        T1,
    );
    assert!(matches!(bad_time, Err(ItemError::InvalidSchedule(_))));

    let zero = item.schedule(
        &Schedule {
            duration_minutes: Some(0),
            ..tomorrow_nine()
        },
        T1,
    );
    assert!(matches!(zero, Err(ItemError::InvalidSchedule(_))));
}

#[test]
fn unschedule_falls_back_to_destination_layer() {
    let item = captured("Dentist").route(&waiting(), None, None, T1).item;
    let scheduled = item.schedule(&tomorrow_nine(), T1).expect("schedule").item;
    let cleared = scheduled.unschedule(T2).item;
    assert_eq!(cleared.layer, Layer::Process);
    assert!(cleared.scheduled_at.is_none());
    assert!(cleared.duration_minutes.is_none());

    let inbox = captured("Dentist")
        .schedule(&tomorrow_nine(), T1)
        .expect("schedule")
        .item
        .unschedule(T2)
        .item;
    assert_eq!(inbox.layer, Layer::Capture);
}

#[test]
fn completion_toggle_is_not_idempotent() {
    let item = captured("Call Sarah");
    let first = item.toggle_completed(T1);
    assert!(first.item.is_completed);
    assert_eq!(first.item.completed_at.as_deref(), Some(T1));
    assert_eq!(first.activity.action, ActivityAction::Completed);

    let second = first.item.toggle_completed(T2);
    assert!(!second.item.is_completed);
    assert!(second.item.completed_at.is_none());
    assert_eq!(second.activity.action, ActivityAction::Uncompleted);
}

#[test]
fn archive_then_restore_returns_original_classification() {
    let item = captured("Call Sarah")
        .route(&waiting(), None, None, T1)
        .item
        .schedule(&tomorrow_nine(), T1)
        .expect("schedule")
        .item;

    let archived = item.toggle_archived(T2);
    assert_eq!(archived.activity.action, ActivityAction::Archived);
    assert_eq!(archived.item.archived_at.as_deref(), Some(T2));
    assert_eq!(archived.item.layer, item.layer);

    let restored = archived.item.toggle_archived("2026-03-01T09:00:00.000000Z");
    assert_eq!(restored.activity.action, ActivityAction::Unarchived);
    let mut expected = item.clone();
    expected.updated_at = restored.item.updated_at.clone();
    assert_eq!(restored.item, expected);
}

#[test]
fn edit_field_records_old_and_new_values() {
    let item = captured("Call Sarah");
    let edited = item
        .edit_field(
            &ItemField::Title,
            Some(&json!("Call Sarah")),
            json!("Call Sarah back"),
            T1,
        )
        .expect("edit should succeed");
    assert_eq!(edited.item.title, "Call Sarah back");
    assert_eq!(edited.activity.action, ActivityAction::FieldChanged);
    assert_eq!(edited.activity.metadata["field"], "title");
    assert_eq!(edited.activity.metadata["from"], "Call Sarah");
    assert_eq!(edited.activity.metadata["to"], "Call Sarah back");
}

#[test]
fn edit_field_detects_stale_expected_value() {
    let item = captured("Call Sarah");
    let err = item
        .edit_field(
            &ItemField::Title,
            Some(&json!("Something else")),
            json!("New"),
            T1,
        )
        .expect_err("stale expectation should fail");
    assert!(matches!(err, ItemError::StaleField { .. }));
}

#[test]
fn custom_values_accept_unknown_keys_and_null_removes() {
    let item = captured("Call Sarah");
    let field = ItemField::from_str("waiting_contact").expect("custom key should parse");
    let set = item
        .edit_field(&field, None, json!("Sarah"), T1)
        .expect("custom edit should succeed")
        .item;
    assert_eq!(set.custom_values["waiting_contact"], "Sarah");

    let cleared = set
        .edit_field(&field, Some(&json!("Sarah")), Value::Null, T2)
        .expect("clearing should succeed")
        .item;
    assert!(!cleared.custom_values.contains_key("waiting_contact"));

    let nested = item.edit_field(&field, None, json!({"a": 1}), T1);
    assert!(matches!(nested, Err(ItemError::InvalidFieldValue { .. })));
}

#[test]
fn lifecycle_fields_cannot_be_edited_directly() {
    assert!(ItemField::from_str("layer").is_err());
    assert!(ItemField::from_str("archived_at").is_err());
    assert_eq!(
        ItemField::from_str("custom.priority").unwrap(),
        ItemField::Custom("priority".to_string())
    );
    assert_eq!(ItemField::from_str("space").unwrap(), ItemField::SpaceId);
}

#[test]
fn notes_are_trimmed_and_blank_clears() {
    let item = captured("Call Sarah");
    let cleared = item
        .edit_field(&ItemField::Notes, None, json!("   "), T1)
        .expect("blank notes should clear")
        .item;
    assert!(cleared.notes.is_none());
}

#[test]
fn add_note_only_touches_updated_at() {
    let item = captured("Call Sarah");
    let noted = item.add_note("left voicemail", T1).expect("note should add");
    assert_eq!(noted.activity.action, ActivityAction::NoteAdded);
    assert_eq!(noted.activity.note.as_deref(), Some("left voicemail"));
    let mut expected = item.clone();
    expected.updated_at = T1.to_string();
    assert_eq!(noted.item, expected);
    assert_eq!(item.add_note("  ", T1).unwrap_err(), ItemError::NoteRequired);
}

#[test]
fn orphaning_returns_unscheduled_items_to_inbox() {
    let routed = captured("Call Sarah").route(&waiting(), None, None, T1).item;
    let orphaned = routed.orphan(&waiting(), T2);
    assert_eq!(orphaned.item.layer, Layer::Capture);
    assert!(orphaned.item.destination_id.is_none());
    assert_eq!(orphaned.activity.metadata["reason"], "destination_deleted");
}

#[test]
fn purge_requires_archive() {
    let item = captured("Call Sarah");
    assert!(matches!(
        item.ensure_purgeable(),
        Err(ItemError::NotArchived(_))
    ));
    let archived = item.toggle_archived(T1).item;
    assert!(archived.ensure_purgeable().is_ok());
}

#[test]
fn parses_attachment_specs() {
    let audio = Attachment::from_str("audio/35:20480:voice/memo.m4a").expect("audio parses");
    assert_eq!(audio.kind, AttachmentKind::Audio);
    assert_eq!(audio.duration_seconds, Some(35));
    assert_eq!(audio.object_ref, "voice/memo.m4a");

    let image = Attachment::from_str("image:4096:s3://bucket/a.jpg").expect("image parses");
    assert_eq!(image.object_ref, "s3://bucket/a.jpg");

    assert!(Attachment::from_str("image/3:4096:a.jpg").is_err());
    assert!(Attachment::from_str("video:1:a.mp4").is_err());
    assert!(Attachment::from_str("image:0:a.jpg").is_err());
}

#[test]
fn field_values_parse_json_scalars_or_fall_back_to_text() {
    assert_eq!(parse_field_value("3"), json!(3));
    assert_eq!(parse_field_value("true"), json!(true));
    assert_eq!(parse_field_value("null"), Value::Null);
    assert_eq!(parse_field_value("high"), json!("high"));
    assert_eq!(parse_field_value("[1]"), json!("[1]"));
}

#[test]
fn builtin_text_fields_take_input_verbatim() {
    assert_eq!(ItemField::Title.parse_input("2025"), json!("2025"));
    assert_eq!(ItemField::Title.parse_input("true"), json!("true"));
    assert_eq!(ItemField::Notes.parse_input("null"), json!("null"));
    assert_eq!(ItemField::ProjectId.parse_input("  "), Value::Null);
    assert_eq!(
        ItemField::Custom("effort".to_string()).parse_input("3"),
        json!(3)
    );

    let item = captured("2024");
    let edited = item
        .edit_field(
            &ItemField::Title,
            Some(&ItemField::Title.parse_input("2024")),
            ItemField::Title.parse_input("2025"),
            T1,
        )
        .expect("numeric-looking titles are plain text")
        .item;
    assert_eq!(edited.title, "2025");
}

#[derive(Debug, Clone)]
enum Step {
    Route(bool),
    Schedule,
    Unschedule,
    Complete,
    Archive,
    Orphan,
    Note,
}

fn step_strategy() -> impl Strategy<Value = Step> {
    prop_oneof![
        any::<bool>().prop_map(Step::Route),
        Just(Step::Schedule),
        Just(Step::Unschedule),
        Just(Step::Complete),
        Just(Step::Archive),
        Just(Step::Orphan),
        Just(Step::Note),
    ]
}

proptest! {
    #[test]
    fn layer_invariants_hold_after_any_transition_sequence(
        steps in proptest::collection::vec(step_strategy(), 0..40)
    ) {
        let other = DestinationRef { id: "dst-next".to_string(), slug: "next".to_string() };
        let mut item = captured("invariant check");
        prop_assert!(item.check_invariants().is_ok());
        for (index, step) in steps.iter().enumerate() {
            let at = format!("2026-03-01T10:{:02}:00.000000Z", index);
            item = match step {
                Step::Route(pick) => {
                    let to = if *pick { waiting() } else { other.clone() };
                    item.route(&to, None, None, &at).item
                }
                Step::Schedule => item.schedule(&tomorrow_nine(), &at).expect("valid schedule").item,
                Step::Unschedule => item.unschedule(&at).item,
                Step::Complete => item.toggle_completed(&at).item,
                Step::Archive => item.toggle_archived(&at).item,
                Step::Orphan => item.orphan(&waiting(), &at).item,
                Step::Note => item.add_note("step note", &at).expect("note").item,
            };
            prop_assert!(item.check_invariants().is_ok(), "{:?}", item.check_invariants());
            if item.destination_id.is_some() {
                prop_assert_ne!(item.layer, Layer::Capture);
            }
            if item.scheduled_at.is_some() {
                prop_assert_eq!(item.layer, Layer::Commit);
            }
        }
    }
}
