use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::io::{self, Read};
use std::time::Instant;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time;

mod autosave;
mod clock;
mod config;
mod logger;
mod settings;
mod storage;
mod timestamps;

use crate::autosave::{AutosaveController, EditorEvent, FlushOutcome};
use crate::settings::{Rgb, SettingsStore};
use crate::storage::{NoteRef, NoteStore};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// List notes, newest first
    List,
    /// Print a note's body
    Show { name: String },
    /// Create a note (body is read from stdin when omitted)
    New {
        #[arg(short, long)]
        title: Option<String>,
        body: Vec<String>,
    },
    /// Append lines from stdin to a note, autosaving as you go (default)
    Edit { name: Option<String> },
    /// Rename a note
    Rename { name: String, new_name: String },
    /// Delete a note
    Delete { name: String },
    /// Show or change preferences
    Settings {
        #[command(subcommand)]
        action: Option<SettingsAction>,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    Show,
    Set { key: SettingKey, value: String },
}

#[derive(Clone, Copy, ValueEnum)]
enum SettingKey {
    UseDebounce,
    FontSize,
    Background,
    AutoTitle,
    SortByModified,
}

const EDIT_HELP: &str =
    "Type to append lines. Commands: :title <text>, :list, :new, :open <name>, :delete, :q";

const PREVIEW_CHARS: usize = 40;

fn lookup(store: &NoteStore, name: &str) -> Result<NoteRef> {
    store
        .find(name)
        .ok_or_else(|| anyhow::anyhow!("No note named {:?}", name))
}

fn report(outcome: &FlushOutcome) {
    match outcome {
        FlushOutcome::Skipped => {}
        FlushOutcome::Created(note) => println!("Created {}", note.file_name()),
        FlushOutcome::Saved {
            note,
            renamed: true,
            ..
        } => println!("Saved as {}", note.file_name()),
        FlushOutcome::Saved {
            note,
            written: true,
            ..
        } => println!("Saved {}", note.file_name()),
        FlushOutcome::Saved { .. } => {}
        FlushOutcome::Failed => eprintln!("Save failed, your text is still in the buffer."),
    }
}

fn format_time(at: Option<chrono::DateTime<chrono::Local>>) -> String {
    at.map(|t| t.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| "-".repeat(16))
}

fn list_notes(store: &NoteStore, sort_by_modified: bool) {
    let notes = store.list(sort_by_modified);
    if notes.is_empty() {
        println!("No notes in {}", store.dir().display());
        return;
    }
    for reference in notes {
        if let Some(note) = store.note(&reference) {
            let preview: String = note
                .body
                .lines()
                .next()
                .unwrap_or_default()
                .chars()
                .take(PREVIEW_CHARS)
                .collect();
            println!(
                "{}  {}  {:<30}  {}",
                format_time(note.created_at),
                format_time(note.modified_at),
                note.base_name,
                preview
            );
        }
    }
}

fn new_note(
    store: NoteStore,
    settings: &SettingsStore,
    title: Option<String>,
    body: Vec<String>,
) -> Result<()> {
    let body = if body.is_empty() {
        let mut buf = String::new();
        io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read note body from stdin")?;
        buf
    } else {
        body.join(" ")
    };

    let mut editor = AutosaveController::new(store, settings.subscribe());
    if let Some(title) = title {
        editor.dispatch(EditorEvent::TitleChanged(title));
    }
    editor.dispatch(EditorEvent::ContentChanged(body));
    match editor.dispatch(EditorEvent::SessionEnding) {
        Some(FlushOutcome::Skipped) => anyhow::bail!("Nothing to save: title and body are empty"),
        Some(FlushOutcome::Failed) => anyhow::bail!("Failed to save note, see the log for details"),
        Some(outcome) => report(&outcome),
        None => {}
    }
    Ok(())
}

async fn wait_for(deadline: Option<Instant>) {
    match deadline {
        Some(at) => time::sleep_until(time::Instant::from_std(at)).await,
        None => std::future::pending::<()>().await,
    }
}

fn print_session(editor: &AutosaveController) {
    let title = if editor.title().is_empty() {
        format!("({})", editor.placeholder())
    } else {
        editor.title().to_string()
    };
    println!("== {} ==", title);
    if !editor.body().is_empty() {
        println!("{}", editor.body());
    }
}

/// Returns `false` once the session should end.
fn handle_edit_line(editor: &mut AutosaveController, line: String) -> bool {
    let outcome = if let Some(title) = line.strip_prefix(":title ") {
        if let Some(outcome) = editor.dispatch(EditorEvent::TitleChanged(title.to_string())) {
            report(&outcome);
        }
        editor.dispatch(EditorEvent::TitleCommitted)
    } else if line == ":list" {
        for note in editor.notes() {
            let marker = if editor.current() == Some(note) { "*" } else { " " };
            println!("{} {}", marker, note.base_name());
        }
        None
    } else if line == ":new" {
        let outcome = editor.dispatch(EditorEvent::CreateRequested);
        print_session(editor);
        outcome
    } else if let Some(name) = line.strip_prefix(":open ") {
        match editor.store().find(name.trim()) {
            Some(note) => {
                let outcome = editor.dispatch(EditorEvent::NoteSelected(note));
                print_session(editor);
                outcome
            }
            None => {
                eprintln!("No note named {:?}", name.trim());
                None
            }
        }
    } else if line == ":delete" {
        if let Some(note) = editor.current().cloned() {
            editor.dispatch(EditorEvent::DeleteRequested(note.clone()));
            if note.path().exists() {
                eprintln!("Could not delete {}", note.file_name());
            } else {
                println!("Deleted {}", note.file_name());
                print_session(editor);
            }
        }
        None
    } else if line == ":q" {
        return false;
    } else {
        let mut body = editor.body().to_string();
        if !body.is_empty() && !body.ends_with('\n') {
            body.push('\n');
        }
        body.push_str(&line);
        editor.dispatch(EditorEvent::ContentChanged(body))
    };

    if let Some(outcome) = outcome {
        report(&outcome);
    }
    true
}

async fn edit_session(store: NoteStore, settings: &SettingsStore, name: Option<String>) -> Result<()> {
    let target = name.map(|n| lookup(&store, &n)).transpose()?;
    let mut editor = AutosaveController::new(store, settings.subscribe());
    match target {
        Some(note) => {
            editor.open(note);
        }
        None => editor.start(),
    }

    println!("{}", EDIT_HELP);
    print_session(&editor);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let deadline = editor.deadline();
        tokio::select! {
            line = lines.next_line() => {
                match line.context("Failed to read from stdin")? {
                    Some(line) => {
                        if !handle_edit_line(&mut editor, line) {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = wait_for(deadline) => {
                if let Some(outcome) = editor.tick() {
                    report(&outcome);
                }
            }
        }
    }

    if let Some(outcome) = editor.dispatch(EditorEvent::SessionEnding) {
        report(&outcome);
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "true" | "on" | "yes" | "1" => Ok(true),
        "false" | "off" | "no" | "0" => Ok(false),
        _ => anyhow::bail!("Expected true/false, got {:?}", value),
    }
}

fn print_settings(settings: &SettingsStore) {
    let s = settings.settings();
    println!("use-debounce      {}", s.use_debounce);
    println!("font-size         {}", s.font_size);
    println!("background        {}", s.background);
    println!("auto-title        {}", s.auto_title_from_first_sentence);
    println!("sort-by-modified  {}", s.sort_by_modified);
    println!("(stored in {})", settings.path().display());
}

fn set_setting(settings: &mut SettingsStore, key: SettingKey, value: &str) -> Result<()> {
    match key {
        SettingKey::UseDebounce => settings.set_use_debounce(parse_bool(value)?),
        SettingKey::FontSize => {
            let size: f64 = value
                .parse()
                .with_context(|| format!("Invalid font size {:?}", value))?;
            settings.set_font_size(size)
        }
        SettingKey::Background => settings.set_background(value.parse::<Rgb>()?),
        SettingKey::AutoTitle => settings.set_auto_title_from_first_sentence(parse_bool(value)?),
        SettingKey::SortByModified => settings.set_sort_by_modified(parse_bool(value)?),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let home = config::get_data_home();
    let app_config = config::load_config_from(&home);
    let paths = app_config.resolve(&home);

    if let Err(e) = logger::init(&paths.log_file) {
        eprintln!("Logging disabled: {:#}", e);
    }
    logger::info(&format!("quicknotes {} starting", config::APP_VERSION));

    let args = Args::parse();

    let mut settings = SettingsStore::open(&paths.settings_file);
    let store = NoteStore::new(&paths.notes_dir);

    match args.command.unwrap_or(Commands::Edit { name: None }) {
        Commands::List => list_notes(&store, settings.settings().sort_by_modified),
        Commands::Show { name } => {
            let note = lookup(&store, &name)?;
            let body = store.read(&note).unwrap_or_default();
            print!("{}", body);
            if !body.ends_with('\n') {
                println!();
            }
        }
        Commands::New { title, body } => new_note(store, &settings, title, body)?,
        Commands::Edit { name } => edit_session(store, &settings, name).await?,
        Commands::Rename { name, new_name } => {
            let note = lookup(&store, &name)?;
            let renamed = store.rename(&note, &new_name)?;
            println!("Renamed {} to {}", note.file_name(), renamed.file_name());
        }
        Commands::Delete { name } => {
            let note = lookup(&store, &name)?;
            store.delete(&note)?;
            println!("Deleted {}", note.file_name());
        }
        Commands::Settings { action } => match action.unwrap_or(SettingsAction::Show) {
            SettingsAction::Show => print_settings(&settings),
            SettingsAction::Set { key, value } => {
                set_setting(&mut settings, key, &value)?;
                print_settings(&settings);
            }
        },
    }

    Ok(())
}
