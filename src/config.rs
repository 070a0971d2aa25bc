use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

/// Desktop-file id the chooser is installed under.
pub const APP_ID: &str = "crossroads.desktop";

/// User configuration for the chooser itself (not the per-domain preferences).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChooserSettings {
    /// Offer to register Crossroads as the default browser.
    #[serde(default = "bool_true")]
    pub ask_default: bool,
    /// Content types Crossroads claims when set as default.
    #[serde(default = "ChooserSettings::default_content_types")]
    pub content_types: Vec<String>,
    /// Content type queried for candidate browsers.
    #[serde(default = "ChooserSettings::default_browse_content_type")]
    pub browse_content_type: String,
    /// Display name of the browser family that carries multiple profiles.
    #[serde(default = "ChooserSettings::default_multi_profile_family")]
    pub multi_profile_family: String,
    /// Optional override for the Chrome user-data directory.
    #[serde(default)]
    pub chrome_profile_root: Option<PathBuf>,
    #[serde(default)]
    pub logging: LoggingSettings,
}

fn bool_true() -> bool {
    true
}

impl ChooserSettings {
    fn default_content_types() -> Vec<String> {
        vec![
            "x-scheme-handler/http".into(),
            "x-scheme-handler/https".into(),
            "text/html".into(),
        ]
    }

    fn default_browse_content_type() -> String {
        "x-scheme-handler/https".into()
    }

    fn default_multi_profile_family() -> String {
        "Google Chrome".into()
    }

    /// Load settings from disk, writing defaults if missing.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("Unable to read config at {}", path.display()))?;
            let parsed: Self = serde_json::from_str(&raw)
                .with_context(|| format!("Malformed config at {}", path.display()))?;
            Ok(parsed)
        } else {
            let settings = Self::default();
            settings.save(path)?;
            Ok(settings)
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory {}", parent.display())
            })?;
        }
        let serialised = serde_json::to_string_pretty(self)?;
        fs::write(path, serialised)
            .with_context(|| format!("Failed to persist config to {}", path.display()))
    }

    /// Resolve the Chrome user-data directory holding per-profile folders.
    pub fn resolve_chrome_profile_root(&self) -> Option<PathBuf> {
        if let Some(path) = &self.chrome_profile_root {
            return Some(path.clone());
        }
        directories::BaseDirs::new()
            .map(|dirs| dirs.home_dir().join(".config").join("google-chrome"))
    }
}

impl Default for ChooserSettings {
    fn default() -> Self {
        Self {
            ask_default: true,
            content_types: Self::default_content_types(),
            browse_content_type: Self::default_browse_content_type(),
            multi_profile_family: Self::default_multi_profile_family(),
            chrome_profile_root: None,
            logging: LoggingSettings::default(),
        }
    }
}

/// Optional JSON log capture next to stderr output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSettings {
    #[serde(default)]
    pub file_enabled: bool,
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl LoggingSettings {
    pub fn resolve_directory(&self) -> Result<PathBuf> {
        if let Some(dir) = &self.directory {
            return Ok(dir.clone());
        }
        let dirs = ProjectDirs::from("sh", "ghostkellz", "Crossroads")
            .context("Unable to resolve platform cache directory")?;
        Ok(dirs.cache_dir().join("logs"))
    }
}

/// Compute the default path to the chooser configuration file.
pub fn default_config_path() -> Result<PathBuf> {
    let dirs = ProjectDirs::from("sh", "ghostkellz", "Crossroads")
        .context("Unable to resolve platform config directory")?;
    Ok(dirs.config_dir().join("config.json"))
}
