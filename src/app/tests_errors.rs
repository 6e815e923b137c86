use super::{App, AppError, ErrorClass};
use crate::config::Config;
use crate::domain::item::{CaptureInput, ItemError};
use crate::locks::{item_lock_path, FileLock};
use std::path::{Path, PathBuf};
use std::time::Duration;
use uuid::Uuid;

fn unique_workspace() -> PathBuf {
    let root = std::env::temp_dir().join(format!("itemflow-app-errors-{}", Uuid::now_v7()));
    std::fs::create_dir_all(&root).expect("temp workspace should be creatable");
    root
}

fn db_path(root: &Path) -> String {
    root.join("itemflow.sqlite").display().to_string()
}

fn open(root: &Path, config: Config) -> App {
    App::open(&db_path(root), root.to_path_buf(), "owner-1", config).expect("app should open")
}

fn input(title: &str) -> CaptureInput {
    CaptureInput {
        title: title.to_string(),
        source: "api".to_string(),
        ..CaptureInput::default()
    }
}

#[test]
fn blank_owner_is_unauthenticated() {
    let root = unique_workspace();
    let err = App::open(&db_path(&root), root.clone(), "  ", Config::default())
        .err()
        .expect("blank owner should be rejected");
    assert!(matches!(err, AppError::Unauthenticated));
    assert_eq!(err.class(), ErrorClass::Unauthenticated);
    assert!(!err.is_retryable());
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn capture_validation_reports_the_reason() {
    let root = unique_workspace();
    let app = open(&root, Config::default());

    let err = app.capture(input("   ")).expect_err("blank title");
    assert!(matches!(err, AppError::Item(ItemError::TitleRequired)));
    assert_eq!(err.class(), ErrorClass::Validation);

    let err = app
        .capture(CaptureInput {
            source: String::new(),
            ..input("No source")
        })
        .expect_err("source is required");
    assert!(matches!(err, AppError::Item(ItemError::SourceRequired)));

    let err = app
        .capture(input(&"x".repeat(501)))
        .expect_err("title too long");
    assert!(err.to_string().contains("501"));
    assert!(app.list_all(true).expect("list").is_empty());
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn capture_rate_is_limited_per_owner() {
    let root = unique_workspace();
    let app = open(
        &root,
        Config {
            capture_rate_per_minute: 2,
            ..Config::default()
        },
    );
    app.capture(input("one")).expect("first capture");
    app.capture(input("two")).expect("second capture");
    let err = app.capture(input("three")).expect_err("third is limited");
    assert!(matches!(err, AppError::RateLimited { limit: 2 }));
    assert_eq!(err.class(), ErrorClass::RateLimited);

    let other = App::open(&db_path(&root), root.clone(), "owner-2", Config::default())
        .expect("second owner opens");
    other
        .capture(input("someone else"))
        .expect("limits are per owner");
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn held_item_lock_surfaces_as_conflict() {
    let root = unique_workspace();
    let app = open(
        &root,
        Config {
            lock_timeout_ms: 20,
            ..Config::default()
        },
    );
    let item = app.capture(input("Locked")).expect("capture");
    let guard = FileLock::acquire(
        &item_lock_path(&root, &item.id),
        Duration::from_millis(20),
        Duration::from_secs(60),
    )
    .expect("lock should be free");

    let err = app
        .toggle_completed(&item.id)
        .expect_err("transition cannot take the lock");
    assert_eq!(err.class(), ErrorClass::Conflict);
    assert!(err.is_retryable());
    assert_eq!(app.activities(&item.id).expect("log").len(), 1);

    drop(guard);
    app.toggle_completed(&item.id)
        .expect("released lock lets the transition through");
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn busy_database_is_unavailable_not_queued() {
    let root = unique_workspace();
    let app = open(
        &root,
        Config {
            capture_timeout_ms: 50,
            ..Config::default()
        },
    );

    let blocker = rusqlite::Connection::open(db_path(&root)).expect("second connection");
    blocker
        .execute_batch("BEGIN IMMEDIATE;")
        .expect("blocker takes the write lock");

    let err = app
        .capture(input("Blocked"))
        .expect_err("capture should not wait forever");
    assert!(matches!(err, AppError::Unavailable(_)));
    assert!(err.is_retryable());

    blocker.execute_batch("ROLLBACK;").expect("release");
    app.capture(input("Unblocked")).expect("capture after release");
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn sqlite_busy_codes_map_to_unavailable() {
    let busy = rusqlite::Error::SqliteFailure(
        rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
        None,
    );
    assert_eq!(AppError::from(busy).class(), ErrorClass::Unavailable);

    let other = rusqlite::Error::QueryReturnedNoRows;
    assert_eq!(AppError::from(other).class(), ErrorClass::Internal);
}

#[test]
fn retryable_classes_are_exactly_the_transient_ones() {
    let retryable: Vec<ErrorClass> = [
        ErrorClass::Validation,
        ErrorClass::Conflict,
        ErrorClass::NotFound,
        ErrorClass::Transport,
        ErrorClass::RateLimited,
        ErrorClass::Unauthenticated,
        ErrorClass::Unavailable,
        ErrorClass::Internal,
    ]
    .into_iter()
    .filter(|class| class.is_retryable())
    .collect();
    assert_eq!(
        retryable,
        vec![
            ErrorClass::Conflict,
            ErrorClass::Transport,
            ErrorClass::Unavailable
        ]
    );
}

#[test]
fn missing_items_are_not_found() {
    let root = unique_workspace();
    let app = open(&root, Config::default());
    let err = app.toggle_archived("itm-nothere").expect_err("missing");
    assert_eq!(err.class(), ErrorClass::NotFound);
    let _ = std::fs::remove_dir_all(root);
}

#[test]
fn busy_timeout_follows_the_capture_deadline() {
    let root = unique_workspace();
    let _app = open(
        &root,
        Config {
            capture_timeout_ms: 1234,
            ..Config::default()
        },
    );
    let conn = crate::db::open_connection(&db_path(&root), Duration::from_millis(1234))
        .expect("db reopens");
    let busy: i64 = conn
        .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
        .expect("pragma");
    assert_eq!(busy, 1234);
    let _ = std::fs::remove_dir_all(root);
}
