//! Bridge configuration
//!
//! Options are plain structs with defaults. They can be loaded from TOML:
//!
//! ```toml
//! main_level = "scene"
//! shutdown_sweeps = 2
//!
//! [frame]
//! max_args = 16
//! max_words = 128
//! ```

use std::path::Path;

use gdbridge_sdk::{BridgeError, InitializationLevel};
use serde::Deserialize;
use thiserror::Error;

use crate::callframe::{DEFAULT_MAX_ARGS, DEFAULT_MAX_WORDS};

/// Environment variable naming a config file for [`BridgeOptions::from_env`].
pub const CONFIG_ENV: &str = "GDBRIDGE_CONFIG";

/// Errors that can occur while loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File could not be read
    #[error("failed to read {path}: {source}")]
    Io {
        /// Path that was attempted
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Contents are not valid TOML for these options
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Values parse but make no sense together
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for BridgeError {
    fn from(err: ConfigError) -> Self {
        BridgeError::Config(err.to_string())
    }
}

/// Capacity of the call frames the bridge creates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FrameOptions {
    /// Maximum arguments per call
    pub max_args: usize,
    /// Maximum argument words per call
    pub max_words: usize,
}

impl Default for FrameOptions {
    fn default() -> Self {
        Self {
            max_args: DEFAULT_MAX_ARGS,
            max_words: DEFAULT_MAX_WORDS,
        }
    }
}

/// Options for creating a bridge context
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct BridgeOptions {
    /// Lowest level the host must initialize before calling in
    pub minimum_level: InitializationLevel,

    /// Level whose deinitialization tears the bridge down
    pub main_level: InitializationLevel,

    /// Reclamation sweeps run at shutdown
    pub shutdown_sweeps: usize,

    /// Call frame capacity
    pub frame: FrameOptions,

    /// Keep method-name StringNames pinned for the process lifetime
    pub intern_method_names: bool,
}

impl Default for BridgeOptions {
    fn default() -> Self {
        Self {
            minimum_level: InitializationLevel::Core,
            main_level: InitializationLevel::Scene,
            shutdown_sweeps: 2,
            frame: FrameOptions::default(),
            intern_method_names: true,
        }
    }
}

impl BridgeOptions {
    /// Parse options from TOML text. Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let options: BridgeOptions = toml::from_str(text)?;
        options.validate()?;
        Ok(options)
    }

    /// Load options from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Load from the file named by `GDBRIDGE_CONFIG`, or defaults when unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.main_level < self.minimum_level {
            return Err(ConfigError::Invalid(format!(
                "main_level {:?} is below minimum_level {:?}",
                self.main_level, self.minimum_level
            )));
        }
        if self.frame.max_args == 0 || self.frame.max_words < self.frame.max_args {
            return Err(ConfigError::Invalid(format!(
                "frame capacity {} args / {} words is too small",
                self.frame.max_args, self.frame.max_words
            )));
        }
        Ok(())
    }
}
