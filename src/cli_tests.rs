use clap::Parser;
use clap_complete::Shell;

use super::{Cli, Commands, DestSubcommands, ToggleFlag};

fn parse(args: &[&str]) -> Cli {
    Cli::try_parse_from(args).expect("arguments should parse")
}

#[test]
fn capture_collects_repeated_attachments_and_values() {
    let cli = parse(&[
        "itemflow",
        "--owner",
        "owner-1",
        "capture",
        "Call Sarah",
        "--source",
        "bot",
        "--attach",
        "audio/35:20480:memo.m4a",
        "--attach",
        "image:100:photo.png",
        "--set",
        "priority=2",
    ]);
    assert_eq!(cli.owner, "owner-1");
    match cli.command {
        Commands::Capture(args) => {
            assert_eq!(args.title, "Call Sarah");
            assert_eq!(args.source, "bot");
            assert_eq!(args.attachments.len(), 2);
            assert_eq!(args.custom, vec!["priority=2".to_string()]);
        }
        other => panic!("expected Capture, got {:?}", other),
    }
}

#[test]
fn capture_source_defaults_to_cli() {
    let cli = parse(&["itemflow", "capture", "Buy milk"]);
    match cli.command {
        Commands::Capture(args) => assert_eq!(args.source, "cli"),
        other => panic!("expected Capture, got {:?}", other),
    }
}

#[test]
fn route_accepts_placement_and_note() {
    let cli = parse(&[
        "itemflow",
        "route",
        "abc123",
        "waiting",
        "--note",
        "left voicemail",
        "--before",
        "itm-111111",
    ]);
    match cli.command {
        Commands::Route(args) => {
            assert_eq!(args.destination, "waiting");
            assert_eq!(args.note.as_deref(), Some("left voicemail"));
            assert_eq!(args.placement.before.as_deref(), Some("itm-111111"));
            assert!(args.placement.after.is_none());
        }
        other => panic!("expected Route, got {:?}", other),
    }
}

#[test]
fn schedule_flags_parse() {
    let cli = parse(&[
        "itemflow",
        "schedule",
        "abc123",
        "2026-03-02T15:00:00Z",
        "--all-day",
        "--duration",
        "30",
    ]);
    match cli.command {
        Commands::Schedule(args) => {
            assert!(args.all_day);
            assert_eq!(args.duration, Some(30));
        }
        other => panic!("expected Schedule, got {:?}", other),
    }
}

#[test]
fn edit_takes_expected_value() {
    let cli = parse(&["itemflow", "edit", "abc123", "title", "New", "--expect", "Old"]);
    match cli.command {
        Commands::Edit(args) => {
            assert_eq!(args.field, "title");
            assert_eq!(args.expect.as_deref(), Some("Old"));
        }
        other => panic!("expected Edit, got {:?}", other),
    }
}

#[test]
fn toggle_names_the_flag() {
    let cli = parse(&["itemflow", "toggle", "abc123", "archived", "--json"]);
    match cli.command {
        Commands::Toggle(args) => {
            assert_eq!(args.flag, ToggleFlag::Archived);
            assert!(args.json);
        }
        other => panic!("expected Toggle, got {:?}", other),
    }
    assert!(Cli::try_parse_from(["itemflow", "toggle", "abc123", "pinned"]).is_err());
}

#[test]
fn dest_subcommands_parse() {
    let cli = parse(&["itemflow", "dest", "add", "Errands", "-k", "store", "-c", "#AABBCC"]);
    match cli.command {
        Commands::Dest(args) => match args.command {
            DestSubcommands::Add(add) => {
                assert_eq!(add.name, "Errands");
                assert_eq!(add.keys, vec!["store".to_string()]);
                assert_eq!(add.color.as_deref(), Some("#AABBCC"));
            }
            other => panic!("expected Add, got {:?}", other),
        },
        other => panic!("expected Dest, got {:?}", other),
    }

    let cli = parse(&["itemflow", "dest", "list"]);
    match cli.command {
        Commands::Dest(args) => assert!(matches!(args.command, DestSubcommands::Ls(_))),
        other => panic!("expected Dest, got {:?}", other),
    }
}

#[test]
fn global_options_work_after_the_subcommand() {
    let cli = parse(&["itemflow", "ls", "--layer", "capture", "--root", "/tmp/flow", "-j"]);
    assert_eq!(cli.root, std::path::PathBuf::from("/tmp/flow"));
    assert_eq!(cli.db_path(), "/tmp/flow/state/itemflow.sqlite");
    assert_eq!(
        cli.config_path(),
        std::path::PathBuf::from("/tmp/flow/config.toml")
    );
    match cli.command {
        Commands::Ls(args) => {
            assert_eq!(args.layer.as_deref(), Some("capture"));
            assert!(args.json);
        }
        other => panic!("expected Ls, got {:?}", other),
    }
}

#[test]
fn explicit_db_path_wins() {
    let cli = parse(&["itemflow", "--db", "/tmp/other.sqlite", "init"]);
    assert_eq!(cli.db_path(), "/tmp/other.sqlite");
    assert!(matches!(cli.command, Commands::Init));
}

#[test]
fn completions_take_a_shell_name() {
    let cli = parse(&["itemflow", "completions", "zsh"]);
    match cli.command {
        Commands::Completions(args) => assert_eq!(args.shell, Some(Shell::Zsh)),
        other => panic!("expected Completions, got {:?}", other),
    }
}

#[test]
fn unknown_commands_are_rejected() {
    assert!(Cli::try_parse_from(["itemflow", "shipit"]).is_err());
    assert!(Cli::try_parse_from(["itemflow", "route", "abc123"]).is_err());
}
