use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::sync::watch;

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

use crate::logger;

pub const MIN_FONT_SIZE: f64 = 10.0;
pub const MAX_FONT_SIZE: f64 = 28.0;
pub const DEFAULT_FONT_SIZE: f64 = 14.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub const WHITE: Rgb = Rgb {
        r: 0xFF,
        g: 0xFF,
        b: 0xFF,
    };

    pub fn to_hex(self) -> String {
        format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }

    pub fn from_hex(hex: &str) -> Option<Rgb> {
        let cleaned = hex.trim().trim_matches('#');
        if cleaned.len() != 6 {
            return None;
        }
        let val = u32::from_str_radix(cleaned, 16).ok()?;
        Some(Rgb {
            r: ((val >> 16) & 0xFF) as u8,
            g: ((val >> 8) & 0xFF) as u8,
            b: (val & 0xFF) as u8,
        })
    }
}

impl std::fmt::Display for Rgb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl FromStr for Rgb {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Rgb::from_hex(s).ok_or_else(|| anyhow::anyhow!("Expected a #RRGGBB colour, got {:?}", s))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub use_debounce: bool,
    pub font_size: f64,
    pub background: Rgb,
    pub auto_title_from_first_sentence: bool,
    pub sort_by_modified: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            use_debounce: true,
            font_size: DEFAULT_FONT_SIZE,
            background: Rgb::WHITE,
            auto_title_from_first_sentence: false,
            sort_by_modified: false,
        }
    }
}

pub fn clamp_font_size(value: f64) -> f64 {
    if value.is_nan() {
        return DEFAULT_FONT_SIZE;
    }
    value.clamp(MIN_FONT_SIZE, MAX_FONT_SIZE)
}

/// On-disk shape. Absent fields take their defaults.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Payload {
    use_debounce: bool,
    font_size: f64,
    background_hex: String,
    auto_title_from_first_sentence: bool,
    sort_by_modified: bool,
}

impl Default for Payload {
    fn default() -> Self {
        Payload::from(&Settings::default())
    }
}

impl From<&Settings> for Payload {
    fn from(s: &Settings) -> Self {
        Self {
            use_debounce: s.use_debounce,
            font_size: s.font_size,
            background_hex: s.background.to_hex(),
            auto_title_from_first_sentence: s.auto_title_from_first_sentence,
            sort_by_modified: s.sort_by_modified,
        }
    }
}

impl From<Payload> for Settings {
    fn from(p: Payload) -> Self {
        Self {
            use_debounce: p.use_debounce,
            font_size: clamp_font_size(p.font_size),
            background: Rgb::from_hex(&p.background_hex).unwrap_or(Rgb::WHITE),
            auto_title_from_first_sentence: p.auto_title_from_first_sentence,
            sort_by_modified: p.sort_by_modified,
        }
    }
}

pub struct SettingsStore {
    path: PathBuf,
    settings: Settings,
    tx: watch::Sender<Settings>,
}

impl SettingsStore {
    /// Creates the store and loads whatever is on disk.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let (tx, _rx) = watch::channel(Settings::default());
        let mut store = Self {
            path: path.into(),
            settings: Settings::default(),
            tx,
        };
        store.load();
        store
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Every receiver starts at the current snapshot and is marked changed
    /// by each later setter call.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.tx.subscribe()
    }

    /// Best-effort read of the settings file. A missing or malformed file
    /// leaves the current values alone. Never notifies subscribers.
    pub fn load(&mut self) {
        let Ok(data) = fs::read(&self.path) else {
            return;
        };
        let Ok(payload) = serde_json::from_slice::<Payload>(&data) else {
            return;
        };
        self.settings = Settings::from(payload);
        let snapshot = self.settings.clone();
        self.tx.send_if_modified(|current| {
            *current = snapshot;
            false
        });
    }

    pub fn set_use_debounce(&mut self, value: bool) -> Result<()> {
        self.update(|s| s.use_debounce = value)
    }

    pub fn set_font_size(&mut self, value: f64) -> Result<()> {
        self.update(|s| s.font_size = clamp_font_size(value))
    }

    pub fn set_background(&mut self, value: Rgb) -> Result<()> {
        self.update(|s| s.background = value)
    }

    pub fn set_auto_title_from_first_sentence(&mut self, value: bool) -> Result<()> {
        self.update(|s| s.auto_title_from_first_sentence = value)
    }

    pub fn set_sort_by_modified(&mut self, value: bool) -> Result<()> {
        self.update(|s| s.sort_by_modified = value)
    }

    fn update(&mut self, apply: impl FnOnce(&mut Settings)) -> Result<()> {
        apply(&mut self.settings);
        let saved = self.persist();
        if let Err(e) = &saved {
            logger::error(&format!("Failed to save settings: {:#}", e));
        }
        self.tx.send_replace(self.settings.clone());
        saved
    }

    fn persist(&self) -> Result<()> {
        let json = serde_json::to_vec_pretty(&Payload::from(&self.settings))?;
        atomic_write(&self.path, &json)
            .with_context(|| format!("Failed to write settings to {:?}", self.path))
    }
}

/// Writes to a sibling temp file and renames it over `path`, so readers only
/// ever see the old or the new document.
fn atomic_write(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "settings.json".to_string());
    let tmp_path = dir.join(format!(".{}.tmp", file_name));

    let result = (|| -> std::io::Result<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let mut file = options.open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
        fs::rename(&tmp_path, path)
    })();

    if result.is_err() {
        let _ = fs::remove_file(&tmp_path);
    }
    result
}
