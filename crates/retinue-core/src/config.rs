//! World configuration loaded from TOML

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{CreationIndex, WorldMetadata};

/// Errors that can occur while loading or saving a world configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read world config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse world config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize world config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("world config '{0}' declares no component types")]
    NoComponents(String),

    #[error("world config '{world}' names component '{name}' more than once")]
    DuplicateComponent { world: String, name: String },
}

/// Configuration for a world instance.
///
/// The number of component types is the length of `component_names`.
///
/// ```toml
/// name = "Game"
/// component_names = ["Position", "Score", "ScoreValue"]
/// start_creation_index = 0
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// World name used in diagnostics
    pub name: String,
    /// One name per component index
    pub component_names: Vec<String>,
    /// Creation index handed to the first entity
    pub start_creation_index: CreationIndex,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            name: WorldMetadata::UNNAMED.to_string(),
            component_names: Vec::new(),
            start_creation_index: 0,
        }
    }
}

impl WorldConfig {
    /// Parse and validate a configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check that the config describes a usable world
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.component_names.is_empty() {
            return Err(ConfigError::NoComponents(self.name.clone()));
        }
        for (i, name) in self.component_names.iter().enumerate() {
            if self.component_names[..i].contains(name) {
                return Err(ConfigError::DuplicateComponent {
                    world: self.name.clone(),
                    name: name.clone(),
                });
            }
        }
        Ok(())
    }

    /// Number of component types this config declares
    pub fn total_components(&self) -> usize {
        self.component_names.len()
    }

    pub fn metadata(&self) -> WorldMetadata {
        WorldMetadata::new(self.name.clone(), self.component_names.clone())
    }
}
