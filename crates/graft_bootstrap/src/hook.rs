//! The class loader hook SPI.
//!
//! The runtime exposes exactly one extension point: a [`ClassFileTransformer`]
//! that sees every transformable class image before it is defined. Bootstrap
//! is the only caller of [`install`], and it must run before the runtime
//! resolves its first host class. After that point the hook can no longer be
//! installed, because classes already defined would never be transformed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::layer::ClassLoadRequest;
use crate::runtime::Runtime;

/// Boxed error returned by transformers; the runtime does not know the
/// concrete error types of the layers above it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A transforming class loader installed into the runtime.
///
/// Implementations must be deterministic and must return the same bytes for
/// every call with the same request and input.
pub trait ClassFileTransformer: Send + Sync {
    /// Name used in logs and status queries.
    fn name(&self) -> &str;

    /// Produces the final bytes for a class about to be defined.
    ///
    /// Returning an error aborts the load; the runtime never falls back to
    /// the original bytes.
    fn transform(&self, request: &ClassLoadRequest, original: &[u8]) -> Result<Arc<[u8]>, BoxError>;
}

/// Errors raised while installing the hook. All of them are fatal.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HookInstallationError {
    /// The runtime already resolved host classes without a hook
    #[error("Hook '{hook}' installed too late: host class '{first_host_class}' was already resolved")]
    TooLate {
        hook: String,
        first_host_class: String,
    },
    /// A different transformer already owns the hook point
    #[error("Hook point already taken by '{existing}', refusing to install '{requested}'")]
    AlreadyInstalled { existing: String, requested: String },
}

/// Shared status of an installed hook.
pub(crate) struct HookState {
    pub(crate) transformer: Arc<dyn ClassFileTransformer>,
    pub(crate) intercepted: AtomicU64,
}

/// Explicit handle to the installed hook.
///
/// Components that need loader status receive this handle instead of looking
/// up process state.
#[derive(Clone)]
pub struct HookHandle {
    state: Arc<HookState>,
}

impl HookHandle {
    pub(crate) fn new(state: Arc<HookState>) -> Self {
        Self { state }
    }

    /// Name of the installed transformer.
    pub fn name(&self) -> &str {
        self.state.transformer.name()
    }

    /// Number of class images passed through the hook so far.
    pub fn classes_intercepted(&self) -> u64 {
        self.state.intercepted.load(Ordering::Relaxed)
    }

    /// Whether this handle refers to the given transformer instance.
    pub fn is(&self, transformer: &Arc<dyn ClassFileTransformer>) -> bool {
        Arc::ptr_eq(&self.state.transformer, transformer)
    }
}

impl std::fmt::Debug for HookHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookHandle")
            .field("name", &self.name())
            .field("classes_intercepted", &self.classes_intercepted())
            .finish()
    }
}

/// Installs `transformer` as the runtime's class loader hook.
///
/// Installing the same transformer instance twice returns the existing handle.
///
/// # Errors
///
/// * [`HookInstallationError::TooLate`] if a host class was resolved already
/// * [`HookInstallationError::AlreadyInstalled`] if another transformer holds
///   the hook point
pub fn install(
    runtime: &Runtime,
    transformer: Arc<dyn ClassFileTransformer>,
) -> Result<HookHandle, HookInstallationError> {
    let (handle, fresh) = runtime.install_hook(transformer)?;
    if fresh {
        info!("🪝 Class loader hook '{}' installed", handle.name());
    } else {
        debug!("Hook '{}' already installed, reusing handle", handle.name());
    }
    Ok(handle)
}
