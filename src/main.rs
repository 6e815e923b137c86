mod activity;
mod app;
mod cli;
mod clock;
mod completions;
mod config;
mod db;
mod destinations;
mod domain;
mod feed;
mod item_id;
mod listing;
mod locks;
mod logging;
mod ordering;
mod suggest;
mod sync;
mod ui;

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::Value;

use app::{AppError, Placement};
use cli::{Commands, DestSubcommands, PlacementArgs, ToggleFlag};
use domain::item::{parse_field_value, Attachment, CaptureInput, Item, ItemField, Schedule};
use domain::layer::Layer;
use item_id::{display_id, qualify_item_id};
use sync::Mutation;

fn main() {
    if let Err(err) = run() {
        for line in error_lines(&err) {
            eprintln!("{line}");
        }
        std::process::exit(1);
    }
}

fn error_lines(err: &AppError) -> Vec<String> {
    let mut lines = vec![format!("error: {err}")];
    if err.is_retryable() {
        lines.push("hint: refresh and retry".to_string());
    }
    lines
}

fn print_json(value: &impl serde::Serialize) -> Result<(), AppError> {
    let rendered = serde_json::to_string_pretty(value)
        .map_err(|err| AppError::Internal(format!("json rendering failed: {err}")))?;
    println!("{rendered}");
    Ok(())
}

fn run() -> Result<(), AppError> {
    use clap::Parser;

    let cli = cli::Cli::parse();
    logging::init(cli.verbose);

    if let Commands::Completions(args) = &cli.command {
        return completions::run_completions_command(args.shell);
    }

    let config = config::Config::load(&cli.config_path())?;
    let app = app::App::open(&cli.db_path(), cli.root.clone(), &cli.owner, config)?;
    let palette = ui::Palette::auto();

    match cli.command {
        Commands::Init => {
            let seeded = app.init()?;
            println!(
                "itemflow initialized for {} ({} destination(s) seeded)",
                app.owner_id(),
                seeded.len()
            );
        }
        Commands::Capture(args) => {
            let attachments = args
                .attachments
                .iter()
                .map(|raw| Attachment::from_str(raw))
                .collect::<Result<Vec<_>, _>>()?;
            let item = app.capture(CaptureInput {
                title: args.title,
                notes: args.notes,
                attachments,
                source: args.source,
                space_id: args.space,
                project_id: args.project,
                custom_values: parse_custom_values(&args.custom)?,
            })?;
            report_item(&palette, "captured", &item, args.json)?;
        }
        Commands::Route(args) => {
            let id = qualify_item_id(&args.id);
            let placement = placement_from(&args.placement);
            let item = mutate(
                &app,
                Mutation::Route {
                    item_id: id,
                    destination: app.destination_ref(&args.destination)?,
                    note: args.note,
                    placement,
                },
            )?;
            report_item(&palette, "routed", &item, args.json)?;
        }
        Commands::Schedule(args) => {
            let id = qualify_item_id(&args.id);
            let schedule = Schedule {
                at: args.at,
                is_all_day: args.all_day,
                duration_minutes: args.duration,
            };
            let item = mutate(
                &app,
                Mutation::Schedule {
                    item_id: id,
                    schedule,
                    placement: placement_from(&args.placement),
                },
            )?;
            report_item(&palette, "scheduled", &item, args.json)?;
        }
        Commands::Unschedule(args) => {
            let id = qualify_item_id(&args.id);
            let item = mutate(
                &app,
                Mutation::Unschedule {
                    item_id: id,
                    placement: placement_from(&args.placement),
                },
            )?;
            report_item(&palette, "unscheduled", &item, args.json)?;
        }
        Commands::Complete(args) => {
            let item = mutate(
                &app,
                Mutation::SetCompleted {
                    item_id: qualify_item_id(&args.id),
                    completed: true,
                },
            )?;
            report_item(&palette, "completed", &item, args.json)?;
        }
        Commands::Reopen(args) => {
            let item = mutate(
                &app,
                Mutation::SetCompleted {
                    item_id: qualify_item_id(&args.id),
                    completed: false,
                },
            )?;
            report_item(&palette, "reopened", &item, args.json)?;
        }
        Commands::Archive(args) => {
            let item = mutate(
                &app,
                Mutation::SetArchived {
                    item_id: qualify_item_id(&args.id),
                    archived: true,
                },
            )?;
            report_item(&palette, "archived", &item, args.json)?;
        }
        Commands::Restore(args) => {
            let item = mutate(
                &app,
                Mutation::SetArchived {
                    item_id: qualify_item_id(&args.id),
                    archived: false,
                },
            )?;
            report_item(&palette, "restored", &item, args.json)?;
        }
        Commands::Toggle(args) => {
            let item_id = qualify_item_id(&args.id);
            let (mutation, verb) = match args.flag {
                ToggleFlag::Completed => (Mutation::ToggleCompleted { item_id }, "toggled completion of"),
                ToggleFlag::Archived => (Mutation::ToggleArchived { item_id }, "toggled archive of"),
            };
            let item = mutate(&app, mutation)?;
            report_item(&palette, verb, &item, args.json)?;
        }
        Commands::Purge(args) => {
            let item = app.purge(&qualify_item_id(&args.id))?;
            if args.json {
                print_json(&item)?;
            } else {
                println!("purged {} {}", palette.id(display_id(&item.id)), item.title);
            }
        }
        Commands::Edit(args) => {
            let id = qualify_item_id(&args.id);
            let mutation = Mutation::edit_field(id, &args.field, &args.value, args.expect.as_deref())?;
            let item = mutate(&app, mutation)?;
            report_item(&palette, "updated", &item, args.json)?;
            if let ItemField::Custom(key) = ItemField::from_str(&args.field)? {
                if let Some(advice) = app.key_advice(&item, &key)? {
                    if !args.json {
                        ui::print_key_advice(&key, &advice);
                    }
                }
            }
        }
        Commands::Note(args) => {
            let item = mutate(
                &app,
                Mutation::AddNote {
                    item_id: qualify_item_id(&args.id),
                    note: args.text,
                },
            )?;
            println!("noted {}", palette.id(display_id(&item.id)));
        }
        Commands::Move(args) => {
            let id = qualify_item_id(&args.id);
            let item = mutate(
                &app,
                Mutation::Move {
                    item_id: id,
                    placement: placement_from(&args.placement),
                },
            )?;
            report_item(&palette, "moved", &item, args.json)?;
        }
        Commands::Ls(args) => {
            if let Some(status) = args.status.as_deref() {
                if !listing::is_known_status(status) {
                    return Err(AppError::InvalidArgument(format!(
                        "unknown status '{status}'; use open or done"
                    )));
                }
            }
            let layer = parse_layer(args.layer.as_deref())?;
            let view = app.resolve_view(layer, args.destination.as_deref())?;
            let items = if args.archived {
                app.list_all(true)?
                    .into_iter()
                    .filter(|item| in_view_or_archived(&view, item))
                    .collect()
            } else {
                app.list_view(&view)?
            };
            let filter = listing::ItemListFilter {
                status: args.status,
                source: args.source,
                query: args.query,
            };
            let items = listing::apply_filters(items, &filter);
            if args.json {
                print_json(&items)?;
            } else {
                let names = ui::destination_names(&app.list_destinations()?);
                let label = ui::view_label(&view, args.destination.as_deref());
                ui::print_item_list(&items, &label, &filter, &names);
            }
        }
        Commands::Show(args) => {
            let item = app.get(&qualify_item_id(&args.id))?;
            if args.json {
                print_json(&item)?;
            } else {
                let destination = match item.destination_id.as_deref() {
                    Some(id) => app.destination_name(id)?,
                    None => None,
                };
                ui::print_item(&item, destination.as_deref());
            }
        }
        Commands::Log(args) => {
            let id = qualify_item_id(&args.id);
            let entries = app.activities(&id)?;
            if args.json {
                print_json(&entries)?;
            } else {
                let item = app.get(&id)?;
                ui::print_timeline(&item, &activity::timeline(&entries));
            }
        }
        Commands::Dest(args) => run_dest_command(&app, &palette, args.command)?,
        Commands::Suggest(args) => {
            let item = app.get(&qualify_item_id(&args.id))?;
            let suggestion = app.suggest(&item.id, &suggest::KeywordSuggester)?;
            if args.json {
                print_json(&suggestion)?;
            } else {
                ui::print_suggestion(&item, suggestion.as_ref());
            }
        }
        Commands::Feed(args) => {
            let events = app.feed_since(args.since.as_deref())?;
            if args.json {
                print_json(&events)?;
            } else {
                ui::print_feed(&events);
            }
        }
        Commands::Sync(args) => {
            let layer = parse_layer(args.layer.as_deref())?;
            let view = app.resolve_view(layer, args.destination.as_deref())?;
            let mut coordinator = sync::SyncCoordinator::new(app.owner_id(), view);
            coordinator.reconnect(&app)?;
            let cursor = app.sync_cursor()?;
            let summary = coordinator.pull(&app, &app.feed_reader(), cursor.as_deref())?;
            if let Some(next) = summary.cursor.as_deref() {
                app.set_sync_cursor(next)?;
            }
            if args.json {
                print_json(&serde_json::json!({
                    "summary": summary,
                    "items": coordinator.items(),
                }))?;
            } else {
                ui::print_pull(&summary);
                let names = ui::destination_names(&app.list_destinations()?);
                let label = ui::view_label(coordinator.view(), args.destination.as_deref());
                ui::print_item_list(
                    coordinator.items(),
                    &label,
                    &listing::ItemListFilter::default(),
                    &names,
                );
            }
        }
        Commands::Completions(_) => {
            unreachable!("completions are handled before the store is opened")
        }
    }

    Ok(())
}

fn run_dest_command(
    app: &app::App,
    palette: &ui::Palette,
    command: DestSubcommands,
) -> Result<(), AppError> {
    match command {
        DestSubcommands::Ls(args) => {
            let destinations = app.list_destinations()?;
            if args.json {
                print_json(&destinations)?;
            } else {
                ui::print_destinations(&destinations);
            }
        }
        DestSubcommands::Add(args) => {
            let destination = app.create_destination(destinations::NewDestination {
                name: args.name,
                icon: args.icon,
                color: args.color,
                schema_keys: args.keys,
            })?;
            if args.json {
                print_json(&destination)?;
            } else {
                println!("created destination {}", palette.id(&destination.slug));
            }
        }
        DestSubcommands::Edit(args) => {
            let patch = destinations::DestinationPatch {
                name: args.name,
                icon: args.icon,
                color: args.color,
                schema_keys: (!args.keys.is_empty()).then_some(args.keys),
            };
            let destination = app.update_destination(&args.slug, patch)?;
            if args.json {
                print_json(&destination)?;
            } else {
                println!("updated destination {}", palette.id(&destination.slug));
            }
        }
        DestSubcommands::Rm(args) => {
            let orphaned = app.delete_destination(&args.slug)?;
            println!(
                "deleted destination {}; {} item(s) returned to the inbox",
                palette.id(&args.slug),
                orphaned.len()
            );
        }
        DestSubcommands::Move(args) => {
            let destination =
                app.reorder_destination(&args.slug, args.before.as_deref(), args.after.as_deref())?;
            println!("moved destination {}", palette.id(&destination.slug));
        }
        DestSubcommands::Check(args) => {
            let advice = app.check_custom_key(&args.slug, &args.key)?;
            if args.json {
                print_json(&advice)?;
            } else {
                match &advice {
                    domain::destination::KeyAdvice::Known => {
                        println!("'{}' is part of the {} schema", args.key, args.slug)
                    }
                    unknown => ui::print_key_advice(&args.key, unknown),
                }
            }
        }
    }
    Ok(())
}

fn report_item(palette: &ui::Palette, verb: &str, item: &Item, json: bool) -> Result<(), AppError> {
    if json {
        return print_json(item);
    }
    println!(
        "{verb} {} {} {}",
        palette.id(display_id(&item.id)),
        palette.layer(item.layer),
        item.title
    );
    Ok(())
}

/// `complete`/`reopen` name a direction; the store only knows how to flip.
/// Sends one change through a coordinator scoped to the item's current
/// view, so the local prediction is validated before the store is touched.
fn mutate(app: &app::App, mutation: Mutation) -> Result<Item, AppError> {
    let current = app.get(mutation.item_id())?;
    let mut coordinator = sync::SyncCoordinator::new(app.owner_id(), sync::View::around(&current));
    coordinator.reconnect(app)?;
    let result = coordinator.mutate(app, mutation);
    if coordinator.is_stale() {
        tracing::debug!(view = ?coordinator.view(), "view cache marked stale");
    }
    Ok(result?)
}

fn placement_from(args: &PlacementArgs) -> Placement {
    Placement::new(
        args.before.as_deref().map(qualify_item_id),
        args.after.as_deref().map(qualify_item_id),
    )
}

fn parse_layer(raw: Option<&str>) -> Result<Option<Layer>, AppError> {
    raw.map(Layer::from_str)
        .transpose()
        .map_err(|err| AppError::InvalidArgument(err.to_string()))
}

fn in_view_or_archived(view: &sync::View, item: &Item) -> bool {
    let layer_ok = view.layer.map_or(true, |layer| layer == item.layer);
    let destination_ok = view
        .destination_id
        .as_deref()
        .map_or(true, |id| item.destination_id.as_deref() == Some(id));
    layer_ok && destination_ok
}

fn parse_custom_values(raw: &[String]) -> Result<BTreeMap<String, Value>, AppError> {
    let mut values = BTreeMap::new();
    for entry in raw {
        let (key, value) = entry.split_once('=').ok_or_else(|| {
            AppError::InvalidArgument(format!("custom value '{entry}' must look like key=value"))
        })?;
        match ItemField::from_str(key)? {
            ItemField::Custom(key) => {
                values.insert(key, parse_field_value(value));
            }
            other => {
                return Err(AppError::InvalidArgument(format!(
                    "'{other}' is a built-in field; use its own flag"
                )))
            }
        }
    }
    Ok(values)
}
