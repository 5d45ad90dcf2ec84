use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use unicode_segmentation::UnicodeSegmentation;

use crate::logger;
use crate::timestamps::{DiskStamps, FileStamps};

pub const NOTE_EXTENSION: &str = "txt";

const MAX_BASE_NAME_CHARS: usize = 80;
const INVALID_NAME_CHARS: &[char] = &['/', '\\', '?', '%', '*', '|', '"', '<', '>'];

/// Handle to a note file inside the notes directory. A rename invalidates
/// the old handle.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NoteRef {
    path: PathBuf,
}

impl NoteRef {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn base_name(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone)]
pub struct Note {
    pub base_name: String,
    pub body: String,
    pub created_at: Option<DateTime<Local>>,
    pub modified_at: Option<DateTime<Local>>,
}

pub struct NoteStore {
    dir: PathBuf,
    stamps: Box<dyn FileStamps>,
}

impl NoteStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self::with_stamps(dir, DiskStamps)
    }

    pub fn with_stamps(dir: impl Into<PathBuf>, stamps: impl FileStamps + 'static) -> Self {
        Self {
            dir: dir.into(),
            stamps: Box::new(stamps),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create notes directory {:?}", self.dir))
    }

    /// Notes newest first. Never fails: a directory error is logged and
    /// yields an empty list.
    pub fn list(&self, sort_by_modified: bool) -> Vec<NoteRef> {
        match self.try_list(sort_by_modified) {
            Ok(notes) => notes,
            Err(e) => {
                logger::error(&format!("Failed to list notes: {:#}", e));
                Vec::new()
            }
        }
    }

    fn try_list(&self, sort_by_modified: bool) -> Result<Vec<NoteRef>> {
        self.ensure_dir()?;

        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !is_note_file(&path) {
                continue;
            }
            let created = self.stamps.created(&path).ok();
            let key = if sort_by_modified {
                self.stamps.modified(&path).ok().or(created)
            } else {
                created
            };
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            entries.push((key, name, path));
        }

        // None sorts below every timestamp, so undated notes land last.
        entries.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));

        Ok(entries
            .into_iter()
            .map(|(_, _, path)| NoteRef { path })
            .collect())
    }

    pub fn read(&self, note: &NoteRef) -> Option<String> {
        fs::read_to_string(note.path()).ok()
    }

    pub fn note(&self, note: &NoteRef) -> Option<Note> {
        let body = self.read(note)?;
        Some(Note {
            base_name: note.base_name(),
            body,
            created_at: self.stamps.created(note.path()).ok().map(DateTime::from),
            modified_at: self.stamps.modified(note.path()).ok().map(DateTime::from),
        })
    }

    /// Looks a note up by its title, with or without the `.txt` suffix.
    /// Names that would leave the notes directory never match.
    pub fn find(&self, base_name: &str) -> Option<NoteRef> {
        let suffix = format!(".{}", NOTE_EXTENSION);
        let base = base_name.strip_suffix(&suffix).unwrap_or(base_name);
        if base.is_empty() || base.contains(['/', '\\']) || base == ".." {
            return None;
        }
        let path = self.dir.join(format!("{}{}", base, suffix));
        path.is_file().then_some(NoteRef { path })
    }

    pub fn create_new(&self, body: &str, preferred_base_name: Option<&str>) -> Result<NoteRef> {
        self.ensure_dir()?;

        let name = self.unique_file_name(preferred_base_name.unwrap_or_default(), None);
        let path = self.dir.join(&name);

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .with_context(|| format!("Failed to create note {}", name))?;

        if let Err(e) = file.write_all(body.as_bytes()).and_then(|_| file.sync_all()) {
            drop(file);
            let _ = fs::remove_file(&path);
            return Err(e).with_context(|| format!("Failed to write note {}", name));
        }
        drop(file);

        self.stamp_created(&path, SystemTime::now());
        Ok(NoteRef { path })
    }

    /// Replaces the body in place. Returns `false` without touching the file
    /// when the content is already identical.
    pub fn overwrite(&self, note: &NoteRef, body: &str) -> Result<bool> {
        if let Ok(existing) = fs::read(note.path()) {
            if existing == body.as_bytes() {
                return Ok(false);
            }
        }

        let created = self.stamps.created(note.path()).ok();
        fs::write(note.path(), body)
            .with_context(|| format!("Failed to write note {}", note.file_name()))?;
        if let Some(created) = created {
            self.stamp_created(note.path(), created);
        }
        Ok(true)
    }

    pub fn rename(&self, note: &NoteRef, new_base_name: &str) -> Result<NoteRef> {
        let target = self.unique_file_name(new_base_name, Some(note.path()));
        let new_path = self.dir.join(&target);
        if new_path.as_path() == note.path() {
            return Ok(note.clone());
        }

        let created = self.stamps.created(note.path()).ok();
        fs::rename(note.path(), &new_path).with_context(|| {
            format!("Failed to rename note {} to {}", note.file_name(), target)
        })?;
        if let Some(created) = created {
            self.stamp_created(&new_path, created);
        }
        Ok(NoteRef { path: new_path })
    }

    pub fn delete(&self, note: &NoteRef) -> Result<()> {
        fs::remove_file(note.path())
            .with_context(|| format!("Failed to delete note {}", note.file_name()))
    }

    /// `base.txt`, `base-1.txt`, `base-2.txt`, ... The note at `own` never
    /// counts as taken, so renaming a note onto its current name is a no-op.
    fn unique_file_name(&self, base: &str, own: Option<&Path>) -> String {
        let safe_base = sanitize_base_name(base).unwrap_or_else(timestamp_name);
        let is_free = |candidate: &str| {
            let path = self.dir.join(candidate);
            own.is_some_and(|own| own == path.as_path()) || !path.exists()
        };

        let mut candidate = format!("{}.{}", safe_base, NOTE_EXTENSION);
        let mut counter = 1;
        while !is_free(&candidate) {
            candidate = format!("{}-{}.{}", safe_base, counter, NOTE_EXTENSION);
            counter += 1;
        }
        candidate
    }

    fn stamp_created(&self, path: &Path, at: SystemTime) {
        match self.stamps.set_created(path, at) {
            Ok(()) => {}
            // The kernel owns birth time here and keeps it across in-place
            // writes and renames.
            Err(e) if e.kind() == io::ErrorKind::Unsupported => {}
            Err(e) => logger::warn(&format!(
                "Failed to preserve creation time of {:?}: {}",
                path.file_name().unwrap_or_default(),
                e
            )),
        }
    }
}

fn is_note_file(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .map(|n| n.to_string_lossy().starts_with('.'))
        .unwrap_or(true);
    let is_txt = path
        .extension()
        .map(|e| e.to_string_lossy().eq_ignore_ascii_case(NOTE_EXTENSION))
        .unwrap_or(false);
    !hidden && is_txt && path.is_file()
}

/// Strips characters that are illegal in file names and leading dots,
/// trims, and caps the length at 80 visible characters. `None` when nothing
/// usable is left.
pub fn sanitize_base_name(raw: &str) -> Option<String> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !INVALID_NAME_CHARS.contains(c))
        .collect();
    // A leading dot would hide the note from listings.
    let trimmed = cleaned.trim().trim_start_matches('.').trim_start();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.graphemes(true).take(MAX_BASE_NAME_CHARS).collect())
}

/// Default title for new notes, e.g. `19-10-2026 14:03:07.512`.
pub fn timestamp_name() -> String {
    format_timestamp_name(Local::now())
}

pub fn format_timestamp_name(at: DateTime<Local>) -> String {
    at.format("%d-%m-%Y %H:%M:%S%.3f").to_string()
}
