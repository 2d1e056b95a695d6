//! Demo settings with persistence
//!
//! Settings are saved to `~/.config/retinue/settings.toml`

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// All demo settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DemoSettings {
    /// Default log filter when `RUST_LOG` is not set
    pub log_level: String,
    /// Name given to the simulated world
    pub world_name: String,
    /// Number of simulation ticks to run
    pub ticks: u32,
    /// Seed for piece values and destruction, so runs are repeatable
    pub seed: u64,
    pub board: BoardSettings,
}

impl Default for DemoSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            world_name: "Match3".to_string(),
            ticks: 10,
            seed: 42,
            board: BoardSettings::default(),
        }
    }
}

impl DemoSettings {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("retinue"))
    }

    /// Get the settings file path
    pub fn settings_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("settings.toml"))
    }

    /// Load settings from disk, falling back to defaults on any failure
    pub fn load() -> Self {
        let Some(path) = Self::settings_path() else {
            warn!("Could not determine config directory");
            return Self::default();
        };

        if !path.exists() {
            info!("No settings file found, using defaults");
            return Self::default();
        }

        match Self::read_from(&path) {
            Ok(settings) => {
                info!("Loaded settings from {:?}", path);
                settings
            }
            Err(e) => {
                warn!("{:#}, using defaults", e);
                Self::default()
            }
        }
    }

    pub fn read_from(path: &Path) -> anyhow::Result<Self> {
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {:?}", path))?;
        Self::from_toml_str(&content).with_context(|| format!("Failed to parse {:?}", path))
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save settings to the config directory
    pub fn save(&self) -> anyhow::Result<()> {
        let path = Self::settings_path().context("Could not determine config directory")?;
        self.write_to(&path)?;
        info!("Saved settings to {:?}", path);
        Ok(())
    }

    pub fn write_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {:?}", dir))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
    }
}

/// Board layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BoardSettings {
    pub width: i32,
    pub height: i32,
    /// Chance (0.0 to 1.0) that a piece is marked for destruction each tick
    pub destroy_chance: f64,
    /// Highest score value a piece can carry
    pub max_piece_value: u32,
}

impl Default for BoardSettings {
    fn default() -> Self {
        Self {
            width: 8,
            height: 8,
            destroy_chance: 0.2,
            max_piece_value: 5,
        }
    }
}

impl BoardSettings {
    pub fn cell_count(&self) -> usize {
        (self.width.max(0) * self.height.max(0)) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_file_keeps_defaults() {
        let settings = DemoSettings::from_toml_str(
            r#"
            ticks = 3

            [board]
            width = 4
            "#,
        )
        .unwrap();
        assert_eq!(settings.ticks, 3);
        assert_eq!(settings.board.width, 4);
        assert_eq!(settings.board.height, 8);
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn defaults_survive_serialization() {
        let content = toml::to_string_pretty(&DemoSettings::default()).unwrap();
        let settings = DemoSettings::from_toml_str(&content).unwrap();
        assert_eq!(settings.seed, 42);
        assert_eq!(settings.board.cell_count(), 64);
    }

    #[test]
    fn malformed_file_is_an_error() {
        assert!(DemoSettings::from_toml_str("ticks = \"many\"").is_err());
    }

    #[test]
    fn written_file_reads_back() {
        let path = std::env::temp_dir()
            .join(format!("retinue-settings-{}", std::process::id()))
            .join("settings.toml");
        let mut settings = DemoSettings::default();
        settings.seed = 7;
        settings.write_to(&path).unwrap();
        assert_eq!(DemoSettings::read_from(&path).unwrap().seed, 7);

        fs::write(&path, "seed = [").unwrap();
        let err = DemoSettings::read_from(&path).unwrap_err();
        assert!(format!("{:#}", err).starts_with("Failed to parse"));
        let _ = fs::remove_dir_all(path.parent().unwrap());
    }

    #[test]
    fn missing_file_names_the_path() {
        let path = std::env::temp_dir().join("retinue-no-such-dir/settings.toml");
        let err = DemoSettings::read_from(&path).unwrap_err();
        assert!(err.to_string().contains("retinue-no-such-dir"));
    }
}
