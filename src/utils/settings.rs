//! Settings file fallback for environment variables.
//!
//! Values are read from `$HOME/.codemood/settings.json` when the variable is
//! not set in the process environment.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Settings loaded from `$HOME/.codemood/settings.json`.
#[derive(Debug, Default, Deserialize)]
pub struct Settings {
    /// Environment variable overrides.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Settings {
    /// Loads settings from the default location.
    pub fn load() -> Result<Self> {
        let settings_path = Self::get_settings_path()?;
        Self::load_from_path(&settings_path)
    }

    /// Loads settings from a specific path; a missing file is empty settings.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;

        serde_json::from_str::<Self>(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))
    }

    /// Returns the default settings path.
    pub fn get_settings_path() -> Result<PathBuf> {
        let home_dir = dirs::home_dir().context("Failed to determine home directory")?;
        Ok(home_dir.join(".codemood").join("settings.json"))
    }

    /// Returns an environment variable with fallback to these settings.
    pub fn get_env_var(&self, key: &str) -> Option<String> {
        env::var(key).ok().or_else(|| self.env.get(key).cloned())
    }
}

/// Returns an environment variable with fallback to the settings file.
pub fn get_env_var(key: &str) -> Result<String> {
    if let Ok(value) = env::var(key) {
        return Ok(value);
    }

    let settings = Settings::load()
        .with_context(|| format!("Environment variable not found: {key}"))?;
    settings
        .env
        .get(key)
        .cloned()
        .ok_or_else(|| anyhow::anyhow!("Environment variable not found: {key}"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_settings(dir: &TempDir) -> PathBuf {
        let settings_path = dir.path().join("settings.json");
        let settings_json = r#"{
            "env": {
                "CODEMOOD_TEST_ONLY_IN_FILE": "from_file",
                "OPENAI_API_KEY": "sk-from-file"
            }
        }"#;
        fs::write(&settings_path, settings_json).unwrap();
        settings_path
    }

    #[test]
    fn settings_load_from_path() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from_path(write_settings(&dir)).unwrap();
        assert_eq!(settings.env.get("OPENAI_API_KEY").unwrap(), "sk-from-file");
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from_path(dir.path().join("absent.json")).unwrap();
        assert!(settings.env.is_empty());
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{not json").unwrap();
        assert!(Settings::load_from_path(&path).is_err());
    }

    #[test]
    fn environment_takes_precedence() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from_path(write_settings(&dir)).unwrap();

        env::set_var("CODEMOOD_TEST_ONLY_IN_FILE", "from_env");
        assert_eq!(
            settings.get_env_var("CODEMOOD_TEST_ONLY_IN_FILE").unwrap(),
            "from_env"
        );

        env::remove_var("CODEMOOD_TEST_ONLY_IN_FILE");
        assert_eq!(
            settings.get_env_var("CODEMOOD_TEST_ONLY_IN_FILE").unwrap(),
            "from_file"
        );
        assert!(settings.get_env_var("CODEMOOD_TEST_UNSET").is_none());
    }
}
