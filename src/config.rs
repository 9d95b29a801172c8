use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Tool configuration. Loaded from a JSON file; every field falls back to a
/// platform default under the user's data directory, so a missing config
/// file is not an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub database_path: PathBuf,
    pub templates_dir: PathBuf,
    pub letters_output_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = default_data_dir();
        Config {
            database_path: data_dir.join("dossier.db"),
            templates_dir: data_dir.join("templates"),
            letters_output_dir: data_dir.join("letters"),
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the platform config file when
    /// no override is given. A missing file yields the defaults; a file that
    /// exists but does not parse is an error.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => default_config_path(),
        };
        if !path.exists() {
            return Ok(Config::default());
        }
        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }
}

fn default_data_dir() -> PathBuf {
    // Use XDG data directory or fallback
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "dossier") {
        proj_dirs.data_dir().to_path_buf()
    } else {
        PathBuf::from(".")
    }
}

pub fn default_config_path() -> PathBuf {
    if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "dossier") {
        proj_dirs.config_dir().join("config.json")
    } else {
        PathBuf::from("dossier.config.json")
    }
}
