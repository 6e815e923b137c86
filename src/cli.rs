use std::path::PathBuf;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;

fn cli_styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::BrightCyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::BrightYellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::BrightGreen.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::BrightMagenta.on_default())
}

pub fn styled_command() -> clap::Command {
    Cli::command()
}

#[derive(Debug, Parser)]
#[command(name = "itemflow")]
#[command(bin_name = "itemflow")]
#[command(version)]
#[command(about = "Capture, route, schedule and order personal work items")]
#[command(styles = cli_styles())]
pub struct Cli {
    #[arg(
        short = 'd',
        long,
        global = true,
        env = "ITEMFLOW_DB_PATH",
        help = "Path to the SQLite store (defaults to <root>/state/itemflow.sqlite)."
    )]
    pub db: Option<String>,

    #[arg(
        short = 'C',
        long,
        global = true,
        env = "ITEMFLOW_ROOT",
        default_value = ".itemflow",
        help = "Workspace root holding config, locks and the change feed."
    )]
    pub root: PathBuf,

    #[arg(
        short = 'o',
        long,
        global = true,
        env = "ITEMFLOW_OWNER",
        default_value = "",
        hide_default_value = true,
        help = "Owner id every operation is scoped to."
    )]
    pub owner: String,

    #[arg(
        long,
        global = true,
        env = "ITEMFLOW_CONFIG",
        help = "Config file (defaults to <root>/config.toml)."
    )]
    pub config: Option<PathBuf>,

    #[arg(short = 'v', long, global = true, help = "Log debug events to stderr.")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    pub fn db_path(&self) -> String {
        match self.db.as_deref() {
            Some(path) => path.to_string(),
            None => self
                .root
                .join("state")
                .join("itemflow.sqlite")
                .display()
                .to_string(),
        }
    }

    pub fn config_path(&self) -> PathBuf {
        self.config
            .clone()
            .unwrap_or_else(|| self.root.join(crate::config::CONFIG_FILE_NAME))
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    #[command(about = "Create the store and seed default destinations.")]
    Init,
    #[command(about = "Capture a new item into the inbox.")]
    Capture(CaptureArgs),
    #[command(about = "Route an item to a destination.")]
    Route(RouteArgs),
    #[command(about = "Schedule an item (moves it to the commit layer).")]
    Schedule(ScheduleArgs),
    #[command(about = "Clear an item's schedule.")]
    Unschedule(UnscheduleArgs),
    #[command(about = "Mark an item completed.")]
    Complete(IdArgs),
    #[command(about = "Mark a completed item open again.")]
    Reopen(IdArgs),
    #[command(about = "Archive an item, hiding it from active views.")]
    Archive(IdArgs),
    #[command(about = "Restore an archived item.")]
    Restore(IdArgs),
    #[command(about = "Flip an item's completed or archived flag.")]
    Toggle(ToggleArgs),
    #[command(about = "Permanently delete an archived item and its history.")]
    Purge(IdArgs),
    #[command(about = "Edit one content field or custom value.")]
    Edit(EditArgs),
    #[command(about = "Attach a note to an item's history.")]
    Note(NoteArgs),
    #[command(about = "Move an item between neighbors in its view.")]
    Move(MoveArgs),
    #[command(about = "List items in a view.")]
    Ls(ListArgs),
    #[command(about = "Show one item.")]
    Show(ShowArgs),
    #[command(about = "Show an item's activity history.")]
    Log(ShowArgs),
    #[command(about = "Manage destinations.")]
    Dest(DestArgs),
    #[command(about = "Suggest a destination for an item.")]
    Suggest(ShowArgs),
    #[command(about = "Print change events after a cursor.")]
    Feed(FeedArgs),
    #[command(about = "Bring a view up to date from the change feed.")]
    Sync(SyncArgs),
    #[command(about = "Generate shell completions.")]
    Completions(CompletionsArgs),
}

#[derive(Debug, Args)]
pub struct PlacementArgs {
    #[arg(
        short = 'b',
        long,
        value_name = "ID",
        help = "Neighbor that ends up directly before the item."
    )]
    pub before: Option<String>,

    #[arg(
        short = 'a',
        long,
        value_name = "ID",
        help = "Neighbor that ends up directly after the item."
    )]
    pub after: Option<String>,
}

#[derive(Debug, Args)]
pub struct IdArgs {
    #[arg(help = "Item id (with or without the itm- prefix).")]
    pub id: String,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ToggleFlag {
    Completed,
    Archived,
}

#[derive(Debug, Args)]
pub struct ToggleArgs {
    #[arg(help = "Item id (with or without the itm- prefix).")]
    pub id: String,

    #[arg(value_enum, help = "Which flag to flip.")]
    pub flag: ToggleFlag,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CaptureArgs {
    #[arg(help = "Item title.")]
    pub title: String,

    #[arg(short = 'n', long, help = "Optional notes.")]
    pub notes: Option<String>,

    #[arg(
        short = 's',
        long,
        default_value = "cli",
        help = "Producer recorded on the item."
    )]
    pub source: String,

    #[arg(
        long = "attach",
        value_name = "KIND[/SECS]:SIZE:REF",
        help = "Attachment reference (repeatable), e.g. audio/35:20480:memo.m4a."
    )]
    pub attachments: Vec<String>,

    #[arg(long, help = "Space id.")]
    pub space: Option<String>,

    #[arg(long, help = "Project id.")]
    pub project: Option<String>,

    #[arg(
        long = "set",
        value_name = "KEY=VALUE",
        help = "Custom value (repeatable)."
    )]
    pub custom: Vec<String>,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct RouteArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[arg(help = "Destination slug.")]
    pub destination: String,

    #[arg(short = 'm', long, help = "Note recorded with the routing.")]
    pub note: Option<String>,

    #[command(flatten)]
    pub placement: PlacementArgs,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ScheduleArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[arg(help = "RFC3339 timestamp, e.g. 2026-03-02T15:00:00Z.")]
    pub at: String,

    #[arg(long, help = "Treat the schedule as an all-day entry.")]
    pub all_day: bool,

    #[arg(long, value_name = "MINUTES", help = "Planned duration in minutes.")]
    pub duration: Option<u32>,

    #[command(flatten)]
    pub placement: PlacementArgs,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct UnscheduleArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[command(flatten)]
    pub placement: PlacementArgs,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct EditArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[arg(help = "title, notes, space, project, or a custom key.")]
    pub field: String,

    #[arg(help = "New value; JSON scalars are parsed, anything else is text.")]
    pub value: String,

    #[arg(
        short = 'e',
        long = "expect",
        value_name = "OLD",
        help = "Only write if the current value equals this."
    )]
    pub expect: Option<String>,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct NoteArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[arg(help = "Note text.")]
    pub text: String,
}

#[derive(Debug, Args)]
pub struct MoveArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[command(flatten)]
    pub placement: PlacementArgs,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    #[arg(short = 'l', long, help = "Layer: capture, process or commit.")]
    pub layer: Option<String>,

    #[arg(short = 'D', long = "dest", help = "Destination slug.")]
    pub destination: Option<String>,

    #[arg(short = 'A', long, help = "List archived items as well.")]
    pub archived: bool,

    #[arg(short = 's', long, help = "Filter by status: open or done.")]
    pub status: Option<String>,

    #[arg(long, help = "Filter by producer.")]
    pub source: Option<String>,

    #[arg(short = 'q', long, help = "Text query over id, title, notes and custom values.")]
    pub query: Option<String>,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct ShowArgs {
    #[arg(help = "Item id.")]
    pub id: String,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DestArgs {
    #[command(subcommand)]
    pub command: DestSubcommands,
}

#[derive(Debug, Subcommand)]
pub enum DestSubcommands {
    #[command(about = "List destinations.", alias = "list")]
    Ls(DestListArgs),
    #[command(about = "Create a destination.")]
    Add(DestAddArgs),
    #[command(about = "Update a destination.")]
    Edit(DestEditArgs),
    #[command(about = "Delete a destination, returning its items to the inbox.")]
    Rm(DestRmArgs),
    #[command(about = "Reorder a destination between neighbors.")]
    Move(DestMoveArgs),
    #[command(about = "Check a custom key against a destination schema.")]
    Check(DestCheckArgs),
}

#[derive(Debug, Args)]
pub struct DestListArgs {
    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DestAddArgs {
    #[arg(help = "Display name; the slug is derived from it.")]
    pub name: String,

    #[arg(short = 'i', long, help = "Icon.")]
    pub icon: Option<String>,

    #[arg(short = 'c', long, help = "Hex color, e.g. #3366ff.")]
    pub color: Option<String>,

    #[arg(short = 'k', long = "key", help = "Schema key (repeatable).")]
    pub keys: Vec<String>,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DestEditArgs {
    #[arg(help = "Destination slug.")]
    pub slug: String,

    #[arg(short = 'n', long, help = "New display name.")]
    pub name: Option<String>,

    #[arg(short = 'i', long, help = "Icon.")]
    pub icon: Option<String>,

    #[arg(short = 'c', long, help = "Hex color.")]
    pub color: Option<String>,

    #[arg(
        short = 'k',
        long = "key",
        help = "Replace the schema keys (repeatable)."
    )]
    pub keys: Vec<String>,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct DestRmArgs {
    #[arg(help = "Destination slug.")]
    pub slug: String,
}

#[derive(Debug, Args)]
pub struct DestMoveArgs {
    #[arg(help = "Destination slug.")]
    pub slug: String,

    #[arg(short = 'b', long, value_name = "SLUG", help = "Destination that ends up before it.")]
    pub before: Option<String>,

    #[arg(short = 'a', long, value_name = "SLUG", help = "Destination that ends up after it.")]
    pub after: Option<String>,
}

#[derive(Debug, Args)]
pub struct DestCheckArgs {
    #[arg(help = "Destination slug.")]
    pub slug: String,

    #[arg(help = "Custom key to check.")]
    pub key: String,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct FeedArgs {
    #[arg(long, value_name = "CURSOR", help = "Only events after this event id.")]
    pub since: Option<String>,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct SyncArgs {
    #[arg(short = 'l', long, help = "Layer to follow.")]
    pub layer: Option<String>,

    #[arg(short = 'D', long = "dest", help = "Destination slug to follow.")]
    pub destination: Option<String>,

    #[arg(short = 'j', long, help = "Render machine-readable JSON.")]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    #[arg(value_enum, help = "Shell to generate for. Auto-detected if omitted.")]
    pub shell: Option<Shell>,
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
