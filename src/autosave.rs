use anyhow::Result;
use tokio::sync::watch;

use crate::clock::{Clock, Debouncer, SystemClock};
use crate::logger;
use crate::settings::Settings;
use crate::storage::{sanitize_base_name, timestamp_name, NoteRef, NoteStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditorEvent {
    ContentChanged(String),
    TitleChanged(String),
    /// The title field lost focus or the user hit enter.
    TitleCommitted,
    NoteSelected(NoteRef),
    CreateRequested,
    DeleteRequested(NoteRef),
    SessionEnding,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Title and body were both blank.
    Skipped,
    Created(NoteRef),
    Saved {
        note: NoteRef,
        renamed: bool,
        written: bool,
    },
    /// Logged; the buffer is still in memory.
    Failed,
}

/// Text before the first `.`, `!`, `?` or newline, trimmed.
pub fn first_sentence(body: &str) -> Option<&str> {
    let first = body.split(['.', '!', '?', '\n']).next()?.trim();
    (!first.is_empty()).then_some(first)
}

/// An explicit title always wins; otherwise the first sentence when
/// auto-titling is on. `None` leaves naming to the store.
pub fn derive_base_name(title: &str, body: &str, auto_title: bool) -> Option<String> {
    if !title.trim().is_empty() {
        return sanitize_base_name(title);
    }
    if auto_title {
        return first_sentence(body).and_then(sanitize_base_name);
    }
    None
}

pub struct AutosaveController<C: Clock = SystemClock> {
    store: NoteStore,
    settings: watch::Receiver<Settings>,
    clock: C,
    debouncer: Debouncer,
    notes: Vec<NoteRef>,
    current: Option<NoteRef>,
    body: String,
    title: String,
    placeholder: String,
    manual_title_edited: bool,
}

impl AutosaveController<SystemClock> {
    pub fn new(store: NoteStore, settings: watch::Receiver<Settings>) -> Self {
        Self::with_clock(store, settings, SystemClock)
    }
}

impl<C: Clock> AutosaveController<C> {
    pub fn with_clock(store: NoteStore, settings: watch::Receiver<Settings>, clock: C) -> Self {
        Self {
            store,
            settings,
            clock,
            debouncer: Debouncer::default(),
            notes: Vec::new(),
            current: None,
            body: String::new(),
            title: String::new(),
            placeholder: timestamp_name(),
            manual_title_edited: false,
        }
    }

    /// Opens the session on the newest note, creating an empty one first if
    /// the directory has none.
    pub fn start(&mut self) {
        self.refresh_notes();
        if self.notes.is_empty() {
            match self.store.create_new("", None) {
                Ok(note) => logger::info(&format!("Created initial note {}", note.file_name())),
                Err(e) => logger::error(&format!("Failed to create initial note: {:#}", e)),
            }
        }
        self.show(None);
    }

    pub fn open(&mut self, note: NoteRef) -> Option<FlushOutcome> {
        self.dispatch(EditorEvent::NoteSelected(note))
    }

    /// Returns the outcome when the event caused an immediate save.
    pub fn dispatch(&mut self, event: EditorEvent) -> Option<FlushOutcome> {
        match event {
            EditorEvent::ContentChanged(body) => {
                self.body = body;
                self.schedule_save()
            }
            EditorEvent::TitleChanged(title) => {
                self.manual_title_edited = !title.trim().is_empty();
                self.title = title;
                self.schedule_save()
            }
            EditorEvent::TitleCommitted | EditorEvent::SessionEnding => Some(self.save_now()),
            EditorEvent::NoteSelected(note) => {
                let outcome = self.save_now();
                // A flush may have renamed the note the caller is pointing at.
                let target = match (&outcome, self.current.as_ref()) {
                    (FlushOutcome::Saved { renamed: true, .. }, Some(current))
                        if !note.path().exists() =>
                    {
                        current.clone()
                    }
                    _ => note,
                };
                self.show(Some(target));
                Some(outcome)
            }
            EditorEvent::CreateRequested => {
                let outcome = self.save_now();
                match self.store.create_new("", None) {
                    Ok(note) => {
                        self.show(Some(note));
                        self.title.clear();
                        self.placeholder = timestamp_name();
                        self.manual_title_edited = false;
                    }
                    Err(e) => logger::error(&format!("Failed to create new note: {:#}", e)),
                }
                Some(outcome)
            }
            EditorEvent::DeleteRequested(note) => {
                self.delete(&note);
                None
            }
        }
    }

    /// Fires the pending debounced save if its deadline has passed.
    pub fn tick(&mut self) -> Option<FlushOutcome> {
        if self.debouncer.fire_if_due(self.clock.now()) {
            Some(self.flush())
        } else {
            None
        }
    }

    pub fn deadline(&self) -> Option<std::time::Instant> {
        self.debouncer.deadline()
    }

    pub fn save_now(&mut self) -> FlushOutcome {
        self.debouncer.cancel();
        self.flush()
    }

    pub fn desired_base_name(&self) -> Option<String> {
        let auto_title = self.settings.borrow().auto_title_from_first_sentence;
        derive_base_name(&self.title, &self.body, auto_title)
    }

    pub fn notes(&self) -> &[NoteRef] {
        &self.notes
    }

    pub fn current(&self) -> Option<&NoteRef> {
        self.current.as_ref()
    }

    pub fn body(&self) -> &str {
        &self.body
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn placeholder(&self) -> &str {
        &self.placeholder
    }

    #[allow(dead_code)]
    pub fn manual_title_edited(&self) -> bool {
        self.manual_title_edited
    }

    pub fn store(&self) -> &NoteStore {
        &self.store
    }

    fn schedule_save(&mut self) -> Option<FlushOutcome> {
        self.debouncer.cancel();
        if self.settings.borrow().use_debounce {
            self.debouncer.arm(self.clock.now());
            None
        } else {
            Some(self.flush())
        }
    }

    fn flush(&mut self) -> FlushOutcome {
        self.debouncer.cancel();
        if self.body.trim().is_empty() && self.title.trim().is_empty() {
            return FlushOutcome::Skipped;
        }
        match self.try_flush() {
            Ok(outcome) => outcome,
            Err(e) => {
                logger::error(&format!("Failed to save note: {:#}", e));
                FlushOutcome::Failed
            }
        }
    }

    fn try_flush(&mut self) -> Result<FlushOutcome> {
        let desired = self.desired_base_name();

        let Some(note) = self.current.clone() else {
            let note = self.store.create_new(&self.body, desired.as_deref())?;
            self.bind_to(note.clone());
            self.refresh_notes();
            return Ok(FlushOutcome::Created(note));
        };

        let mut target = note.clone();
        if let Some(base) = desired.filter(|base| *base != note.base_name()) {
            target = self.store.rename(&note, &base)?;
            // Rename may have de-duplicated the name; show what is on disk.
            self.bind_to(target.clone());
        }
        let renamed = target != note;
        let written = self.store.overwrite(&target, &self.body)?;
        if renamed || written {
            self.refresh_notes();
        }
        Ok(FlushOutcome::Saved {
            note: target,
            renamed,
            written,
        })
    }

    fn bind_to(&mut self, note: NoteRef) {
        self.title = note.base_name();
        self.placeholder = self.title.clone();
        self.manual_title_edited = self.manual_title_edited && !self.title.is_empty();
        self.current = Some(note);
    }

    fn delete(&mut self, note: &NoteRef) {
        let is_current = self.current.as_ref() == Some(note);
        if is_current {
            self.debouncer.cancel();
        }
        if let Err(e) = self.store.delete(note) {
            logger::error(&format!("Failed to delete note: {:#}", e));
            return;
        }
        if is_current {
            self.current = None;
            self.show(None);
        } else {
            self.refresh_notes();
        }
    }

    fn refresh_notes(&mut self) {
        let sort_by_modified = self.settings.borrow().sort_by_modified;
        self.notes = self.store.list(sort_by_modified);
    }

    /// Loads `target` (or the newest note) into the session. An empty body
    /// leaves the title blank so the note can pick up an automatic name.
    fn show(&mut self, target: Option<NoteRef>) {
        self.debouncer.cancel();
        self.refresh_notes();
        let chosen = target
            .filter(|t| self.notes.contains(t))
            .or_else(|| self.notes.first().cloned());

        self.manual_title_edited = false;
        match chosen {
            Some(note) => {
                self.body = self.store.read(&note).unwrap_or_default();
                let base = note.base_name();
                self.title = if self.body.trim().is_empty() {
                    String::new()
                } else {
                    base.clone()
                };
                self.placeholder = base;
                self.current = Some(note);
            }
            None => {
                self.current = None;
                self.body.clear();
                self.title.clear();
                self.placeholder = timestamp_name();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::testing::ManualClock;
    use crate::clock::SAVE_DEBOUNCE;
    use crate::settings::SettingsStore;
    use crate::timestamps::testing::RecordedStamps;
    use std::fs;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        dir: TempDir,
        settings: SettingsStore,
        clock: ManualClock,
        editor: AutosaveController<ManualClock>,
    }

    fn fixture(use_debounce: bool, auto_title: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let mut settings = SettingsStore::open(dir.path().join("settings.json"));
        settings.set_use_debounce(use_debounce).unwrap();
        settings.set_auto_title_from_first_sentence(auto_title).unwrap();

        let store = NoteStore::with_stamps(dir.path().join("notes"), RecordedStamps::default());
        let clock = ManualClock::new();
        let editor = AutosaveController::with_clock(store, settings.subscribe(), clock.clone());
        Fixture {
            dir,
            settings,
            clock,
            editor,
        }
    }

    impl Fixture {
        fn files(&self) -> Vec<String> {
            let notes_dir = self.dir.path().join("notes");
            let mut names: Vec<String> = fs::read_dir(&notes_dir)
                .map(|entries| {
                    entries
                        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
                        .collect()
                })
                .unwrap_or_default();
            names.sort();
            names
        }

        fn type_text(&mut self, body: &str) -> Option<FlushOutcome> {
            self.editor
                .dispatch(EditorEvent::ContentChanged(body.to_string()))
        }
    }

    #[test]
    fn test_first_sentence() {
        assert_eq!(first_sentence("Hello world. More text"), Some("Hello world"));
        assert_eq!(first_sentence("  Wow! yes"), Some("Wow"));
        assert_eq!(first_sentence("line one\nline two"), Some("line one"));
        assert_eq!(first_sentence("Why? because"), Some("Why"));
        assert_eq!(first_sentence(". leading dot"), None);
        assert_eq!(first_sentence(""), None);
    }

    #[test]
    fn test_title_precedence() {
        let body = "Hello world. More text";
        assert_eq!(derive_base_name("", body, true).as_deref(), Some("Hello world"));
        assert_eq!(derive_base_name("My Note", body, true).as_deref(), Some("My Note"));
        assert_eq!(derive_base_name("My Note", body, false).as_deref(), Some("My Note"));
        assert_eq!(derive_base_name("   ", body, false), None);
        assert_eq!(derive_base_name("", "<?>. rest", true), None);
    }

    #[test]
    fn test_blank_session_writes_nothing() {
        let mut fx = fixture(true, true);
        fx.editor.dispatch(EditorEvent::TitleChanged("   ".into()));
        fx.type_text("  \n ");

        assert_eq!(
            fx.editor.dispatch(EditorEvent::SessionEnding),
            Some(FlushOutcome::Skipped)
        );
        assert!(fx.files().is_empty());
    }

    #[test]
    fn test_rapid_edits_coalesce_into_one_save() {
        let mut fx = fixture(true, false);
        let mut saves = 0;

        for text in ["H", "He", "Hel", "Hell", "Hello"] {
            assert_eq!(fx.type_text(text), None);
            fx.clock.advance(Duration::from_millis(300));
            if fx.editor.tick().is_some() {
                saves += 1;
            }
        }
        assert_eq!(saves, 0);
        assert!(fx.files().is_empty());

        fx.clock.advance(Duration::from_millis(499));
        assert_eq!(fx.editor.tick(), None);
        fx.clock.advance(Duration::from_millis(1));
        assert!(matches!(fx.editor.tick(), Some(FlushOutcome::Created(_))));
        assert_eq!(fx.editor.tick(), None);
        assert_eq!(fx.files().len(), 1);

        fx.type_text("Hello again");
        fx.clock.advance(SAVE_DEBOUNCE);
        assert!(matches!(
            fx.editor.tick(),
            Some(FlushOutcome::Saved { written: true, .. })
        ));
        assert_eq!(fx.files().len(), 1);
        let current = fx.editor.current().unwrap().clone();
        assert_eq!(fx.editor.store().read(&current).unwrap(), "Hello again");
    }

    #[test]
    fn test_without_debounce_every_change_saves() {
        let mut fx = fixture(false, false);

        assert!(matches!(fx.type_text("first"), Some(FlushOutcome::Created(_))));
        assert_eq!(fx.editor.deadline(), None);
        assert!(matches!(
            fx.type_text("first!"),
            Some(FlushOutcome::Saved { written: true, renamed: false, .. })
        ));
    }

    #[test]
    fn test_settings_changes_reach_open_editor() {
        let mut fx = fixture(true, false);
        assert_eq!(fx.type_text("draft"), None);

        fx.settings.set_use_debounce(false).unwrap();
        assert!(matches!(fx.type_text("draft 2"), Some(FlushOutcome::Created(_))));
    }

    #[test]
    fn test_new_note_is_named_from_title_or_first_sentence() {
        let mut fx = fixture(false, true);
        fx.type_text("Hello world. More text");
        assert_eq!(fx.files(), vec!["Hello world.txt"]);
        assert_eq!(fx.editor.title(), "Hello world");

        let mut fx = fixture(true, true);
        fx.editor.dispatch(EditorEvent::TitleChanged("My Note".into()));
        fx.type_text("Hello world. More text");
        fx.editor.dispatch(EditorEvent::SessionEnding);
        assert_eq!(fx.files(), vec!["My Note.txt"]);
        assert!(fx.editor.manual_title_edited());
    }

    #[test]
    fn test_untitled_note_gets_timestamp_name() {
        let mut fx = fixture(false, false);
        fx.type_text("no title here. none at all");
        let files = fx.files();
        assert_eq!(files.len(), 1);
        assert!(files[0].ends_with(".txt"));
        assert!(!files[0].starts_with("no title"));
        assert_eq!(fx.editor.title(), files[0].trim_end_matches(".txt"));
    }

    #[test]
    fn test_start_creates_and_opens_initial_note() {
        let mut fx = fixture(true, false);
        fx.editor.start();

        assert_eq!(fx.files().len(), 1);
        assert_eq!(fx.editor.notes().len(), 1);
        let current = fx.editor.current().unwrap();
        assert_eq!(fx.editor.title(), "");
        assert_eq!(fx.editor.placeholder(), current.base_name());
        assert_eq!(fx.editor.body(), "");
    }

    #[test]
    fn test_title_change_renames_existing_note() {
        let mut fx = fixture(true, false);
        fx.editor.start();
        let initial = fx.editor.current().unwrap().clone();

        fx.type_text("milk, eggs");
        fx.editor.dispatch(EditorEvent::TitleChanged("Groceries".into()));
        let outcome = fx.editor.dispatch(EditorEvent::TitleCommitted);

        assert!(matches!(
            outcome,
            Some(FlushOutcome::Saved { renamed: true, written: true, .. })
        ));
        assert_eq!(fx.files(), vec!["Groceries.txt"]);
        assert!(!initial.path().exists());
        let current = fx.editor.current().unwrap().clone();
        assert_eq!(fx.editor.store().read(&current).unwrap(), "milk, eggs");

        // Nothing changed since: no rename, no write.
        assert_eq!(
            fx.editor.dispatch(EditorEvent::SessionEnding),
            Some(FlushOutcome::Saved {
                note: current,
                renamed: false,
                written: false,
            })
        );
    }

    #[test]
    fn test_colliding_title_shows_deduplicated_name() {
        let mut fx = fixture(true, false);
        fx.editor.store().create_new("older", Some("Ideas")).unwrap();
        fx.editor.dispatch(EditorEvent::CreateRequested);

        fx.type_text("newer");
        fx.editor.dispatch(EditorEvent::TitleChanged("Ideas".into()));
        fx.editor.dispatch(EditorEvent::SessionEnding);

        assert_eq!(fx.editor.title(), "Ideas-1");
        assert_eq!(fx.files(), vec!["Ideas-1.txt", "Ideas.txt"]);

        // A second flush must not keep bumping the suffix.
        fx.type_text("newer still");
        fx.editor.dispatch(EditorEvent::SessionEnding);
        assert_eq!(fx.files(), vec!["Ideas-1.txt", "Ideas.txt"]);
    }

    #[test]
    fn test_switching_notes_flushes_pending_edit() {
        let mut fx = fixture(true, false);
        let store = fx.editor.store();
        let a = store.create_new("alpha", Some("A")).unwrap();
        let b = store.create_new("beta", Some("B")).unwrap();
        let empty = store.create_new("", Some("Blank")).unwrap();
        fx.editor.open(a.clone());
        assert_eq!(fx.editor.title(), "A");

        fx.type_text("alpha edited");
        assert!(fx.editor.deadline().is_some());
        let outcome = fx.editor.dispatch(EditorEvent::NoteSelected(b.clone()));

        assert!(matches!(outcome, Some(FlushOutcome::Saved { written: true, .. })));
        assert_eq!(fx.editor.store().read(&a).unwrap(), "alpha edited");
        assert_eq!(fx.editor.deadline(), None);
        assert_eq!(fx.editor.current(), Some(&b));
        assert_eq!(fx.editor.body(), "beta");
        assert_eq!(fx.editor.title(), "B");

        fx.editor.dispatch(EditorEvent::NoteSelected(empty.clone()));
        assert_eq!(fx.editor.title(), "");
        assert_eq!(fx.editor.placeholder(), "Blank");
    }

    #[test]
    fn test_create_requested_opens_blank_note() {
        let mut fx = fixture(true, false);
        fx.editor.start();
        fx.editor.dispatch(EditorEvent::TitleChanged("Kept".into()));
        fx.type_text("pending");

        fx.editor.dispatch(EditorEvent::CreateRequested);

        assert_eq!(fx.editor.notes().len(), 2);
        assert!(fx.files().contains(&"Kept.txt".to_string()));
        assert_eq!(fx.editor.body(), "");
        assert_eq!(fx.editor.title(), "");
        assert!(!fx.editor.placeholder().is_empty());
        assert_ne!(fx.editor.current().unwrap().base_name(), "Kept");
    }

    #[test]
    fn test_deleting_current_note_opens_newest_remaining() {
        let mut fx = fixture(true, false);
        let store = fx.editor.store();
        let old = store.create_new("old", Some("Old")).unwrap();
        let new = store.create_new("new", Some("New")).unwrap();
        fx.editor.open(new.clone());

        fx.type_text("never saved");
        assert_eq!(fx.editor.dispatch(EditorEvent::DeleteRequested(new.clone())), None);

        assert!(!new.path().exists());
        assert_eq!(fx.editor.deadline(), None);
        assert_eq!(fx.editor.current(), Some(&old));
        assert_eq!(fx.editor.body(), "old");
        assert_eq!(fx.files(), vec!["Old.txt"]);

        fx.editor.dispatch(EditorEvent::DeleteRequested(old));
        assert_eq!(fx.editor.current(), None);
        assert!(fx.files().is_empty());
    }

    #[test]
    fn test_deleting_other_note_keeps_pending_edit() {
        let mut fx = fixture(true, false);
        let store = fx.editor.store();
        let keep = store.create_new("keep", Some("Keep")).unwrap();
        let other = store.create_new("other", Some("Other")).unwrap();
        fx.editor.open(keep.clone());

        fx.type_text("keep edited");
        fx.editor.dispatch(EditorEvent::DeleteRequested(other));
        assert!(fx.editor.deadline().is_some());

        fx.clock.advance(SAVE_DEBOUNCE);
        fx.editor.tick();
        assert_eq!(fx.editor.store().read(&keep).unwrap(), "keep edited");
        assert_eq!(fx.editor.notes(), &[keep]);
    }

    #[test]
    fn test_failed_save_keeps_buffer() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("notes");
        fs::write(&blocker, "not a directory").unwrap();
        let settings = SettingsStore::open(dir.path().join("settings.json"));
        let mut editor = AutosaveController::with_clock(
            NoteStore::new(&blocker),
            settings.subscribe(),
            ManualClock::new(),
        );

        editor.dispatch(EditorEvent::ContentChanged("precious words".into()));
        assert_eq!(editor.save_now(), FlushOutcome::Failed);
        assert_eq!(editor.body(), "precious words");
        assert_eq!(editor.current(), None);
    }
}
