//! Configuration management for the Graft launcher.
//!
//! This module handles loading and validation of the launcher configuration
//! from TOML files. Configuration is read before any host class exists, so it
//! lives in the bootstrap layer.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

use graft_classfile::is_valid_class_name;

use crate::runtime::DEFAULT_MAX_CALL_DEPTH;

/// Errors raised while reading or writing the configuration file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Failed to serialize default config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

fn default_verify() -> bool {
    true
}

fn default_max_call_depth() -> usize {
    DEFAULT_MAX_CALL_DEPTH
}

/// Launcher configuration loaded from a TOML file.
///
/// This is the main configuration structure covering class paths, definition
/// discovery, transformation options and logging.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraftConfig {
    /// Class path and entrypoint settings
    pub launch: LaunchSettings,
    /// Transformation pipeline settings
    #[serde(default)]
    pub transform: TransformSettings,
    /// Logging configuration settings
    pub logging: LoggingSettings,
    /// Interpreter limits
    #[serde(default)]
    pub runtime: RuntimeSettings,
}

/// Where classes and definitions come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LaunchSettings {
    /// Directory holding the host application's class images
    pub host_classpath: String,
    /// Directory holding accessor facade interfaces
    #[serde(default)]
    pub accessor_classpath: Option<String>,
    /// Directory holding mixin classes
    #[serde(default)]
    pub transformer_classpath: Option<String>,
    /// Manifest files or directories scanned for `*.graft.json`
    pub definition_paths: Vec<String>,
    /// Host class whose static `main()V` starts the application
    pub entrypoint: String,
}

/// Transformation pipeline settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransformSettings {
    /// Run binary-compatibility verification after every transformation
    #[serde(default = "default_verify")]
    pub verify: bool,
    /// Write transformed classes to this directory for inspection
    #[serde(default)]
    pub export_dir: Option<String>,
    /// Load every host class in parallel before running the entrypoint
    #[serde(default)]
    pub preload: bool,
}

impl Default for TransformSettings {
    fn default() -> Self {
        Self {
            verify: true,
            export_dir: None,
            preload: false,
        }
    }
}

/// Logging system configuration.
///
/// Controls log output format, levels, and destination settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
    /// Optional file path for log output (None means stdout only)
    pub file_path: Option<String>,
}

/// Interpreter limits.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeSettings {
    /// Maximum nesting of method invocations
    #[serde(default = "default_max_call_depth")]
    pub max_call_depth: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }
}

impl Default for GraftConfig {
    fn default() -> Self {
        Self {
            launch: LaunchSettings {
                host_classpath: "host".to_string(),
                accessor_classpath: Some("accessors".to_string()),
                transformer_classpath: Some("mixins".to_string()),
                definition_paths: vec!["definitions".to_string()],
                entrypoint: "net/example/Main".to_string(),
            },
            transform: TransformSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
                file_path: None,
            },
            runtime: RuntimeSettings::default(),
        }
    }
}

impl GraftConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let io = |source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await.map_err(io)?;
            Self::from_toml(path, &content)
        } else {
            let default_config = GraftConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await.map_err(io)?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    fn from_toml(path: &Path, content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.launch.host_classpath.is_empty() {
            return Err("Host classpath cannot be empty".to_string());
        }
        if self.launch.definition_paths.iter().any(String::is_empty) {
            return Err("Definition paths cannot contain empty entries".to_string());
        }
        if !is_valid_class_name(&self.launch.entrypoint) {
            return Err(format!("Invalid entrypoint class name: {}", self.launch.entrypoint));
        }
        if self.transform.export_dir.as_deref() == Some("") {
            return Err("Export directory cannot be empty when set".to_string());
        }
        if self.runtime.max_call_depth == 0 {
            return Err("max_call_depth must be greater than zero".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }

    /// Like [`GraftConfig::validate`], wrapped as a [`ConfigError`].
    pub fn ensure_valid(&self) -> Result<(), ConfigError> {
        self.validate().map_err(ConfigError::Invalid)
    }

    /// Resolved definition search paths.
    pub fn definition_paths(&self) -> Vec<PathBuf> {
        self.launch.definition_paths.iter().map(PathBuf::from).collect()
    }
}
