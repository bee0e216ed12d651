//! Logging system setup.
//!
//! Initializes the global `tracing` subscriber before any host class exists.
//! `RUST_LOG` overrides the configured level.

use std::fs::OpenOptions;
use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingSettings;
use crate::error::BootstrapError;

/// Installs the global subscriber.
///
/// # Arguments
///
/// * `config` - Logging section of the launcher configuration
/// * `json_format` - Force JSON output regardless of the configuration
///
/// # Returns
///
/// An error if the log file cannot be opened or a subscriber is already set.
pub fn setup_logging(config: &LoggingSettings, json_format: bool) -> Result<(), BootstrapError> {
    let log_level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let file = match &config.file_path {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .map_err(|e| BootstrapError::Logging(format!("cannot open log file {path}: {e}")))?;
            Some(Arc::new(file))
        }
        None => None,
    };

    let json = json_format || config.json_format;
    let json_layer = json.then(|| {
        fmt::layer()
            .json()
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(true)
            .with_thread_names(true)
    });
    let text_layer = (!json).then(|| {
        fmt::layer()
            .with_ansi(true)
            .with_file(false)
            .with_line_number(false)
            .with_thread_ids(true)
            .with_thread_names(true)
    });
    let file_layer = file.map(|file| fmt::layer().with_ansi(false).with_writer(file));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| BootstrapError::Logging(e.to_string()))?;

    info!("🔧 Logging initialized with level: {}", log_level);
    Ok(())
}
