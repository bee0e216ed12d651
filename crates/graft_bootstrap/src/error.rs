use crate::config::ConfigError;
use crate::hook::HookInstallationError;
use crate::runtime::RuntimeError;

/// Failures of the bootstrap sequence. All of them abort startup.
#[derive(Debug, thiserror::Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Logging setup failed: {0}")]
    Logging(String),
    #[error(transparent)]
    Hook(#[from] HookInstallationError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}
