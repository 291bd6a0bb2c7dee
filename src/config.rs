use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// Optional overrides for the model and API endpoint. The credential itself
/// is environment-only and never written here.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Config {
    pub model: Option<String>,
    pub base_url: Option<String>,
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the config file, writing a default one on first run so the user
    /// has something to edit.
    pub fn load_or_init() -> Result<Self> {
        let path = Self::config_path()?;
        if !path.exists() {
            let config = Self::new();
            config.save_to(&path)?;
            return Ok(config);
        }
        Self::load_from(&path)
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&content)?;
        Ok(config)
    }

    fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content)?;
        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir =
            dirs::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("alchemist").join("config.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn round_trips_through_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");

        let config = Config {
            model: Some("gemini-2.5-flash".to_string()),
            base_url: None,
        };
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.model.as_deref(), Some("gemini-2.5-flash"));
        assert!(loaded.base_url.is_none());
    }

    #[test]
    fn default_config_has_no_overrides() {
        let config = Config::new();
        assert!(config.model.is_none());
        assert!(config.base_url.is_none());
    }
}
