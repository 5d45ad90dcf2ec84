use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

pub const APP_VERSION: &str = concat!("v", env!("CARGO_PKG_VERSION"));

const HOME_ENV: &str = "QUICKNOTES_HOME";

#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub paths: PathsConfig,
}

/// Optional overrides. Relative paths are resolved against the data home.
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
pub struct PathsConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes_dir: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settings_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_file: Option<PathBuf>,
}

/// Fully resolved locations the rest of the app works with.
#[derive(Debug, Clone, PartialEq)]
pub struct DataPaths {
    pub notes_dir: PathBuf,
    pub settings_file: PathBuf,
    pub log_file: PathBuf,
}

impl AppConfig {
    pub fn resolve(&self, home: &Path) -> DataPaths {
        let pick = |over: &Option<PathBuf>, default: PathBuf| match over {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => home.join(p),
            None => default,
        };
        DataPaths {
            notes_dir: pick(&self.paths.notes_dir, home.join("notes")),
            settings_file: pick(&self.paths.settings_file, home.join("settings.json")),
            log_file: pick(
                &self.paths.log_file,
                home.join("logs").join("quicknotes.log"),
            ),
        }
    }
}

pub fn get_data_home() -> PathBuf {
    if let Some(dir) = std::env::var_os(HOME_ENV) {
        return PathBuf::from(dir);
    }
    let mut path = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
    path.push(".quicknotes");
    path
}

pub fn load_config_from(home: &Path) -> AppConfig {
    fs::create_dir_all(home).ok();
    let path = home.join("config.toml");

    if !path.exists() {
        let default_config = AppConfig::default();
        if let Ok(toml_str) = toml::to_string_pretty(&default_config) {
            let _ = write_private(&path, toml_str.as_bytes());
        }
        return default_config;
    }

    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("Failed to parse config.toml: {}.", e);
                let backup_path = path.with_extension("toml.bak");
                if let Err(backup_err) = fs::rename(&path, &backup_path) {
                    eprintln!("Failed to backup corrupted config: {}", backup_err);
                } else {
                    eprintln!("Corrupted config backed up to {:?}", backup_path);
                }
                eprintln!("Using default configuration.");
                AppConfig::default()
            }
        },
        Err(e) => {
            eprintln!("Failed to read config file: {}. Using default.", e);
            AppConfig::default()
        }
    }
}

fn write_private(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)
}
