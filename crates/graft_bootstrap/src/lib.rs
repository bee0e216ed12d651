//! # Graft Bootstrap
//!
//! The first layer of the Graft pipeline. Everything in this crate runs before
//! the host application resolves a single class of its own:
//!
//! * [`config`] - TOML launcher configuration
//! * [`logging`] - `tracing` subscriber setup
//! * [`runtime`] - the layered host runtime, its class sources and interpreter
//! * [`hook`] - the one class loader hook point and [`install`]
//!
//! Nothing here depends on the launch, accessor or transformer layers; they
//! plug in through [`ClassFileTransformer`].

pub mod config;
pub mod error;
pub mod hook;
pub mod layer;
pub mod logging;
pub mod runtime;

pub use config::{ConfigError, GraftConfig, LaunchSettings, LoggingSettings, RuntimeSettings, TransformSettings};
pub use error::BootstrapError;
pub use hook::{install, BoxError, ClassFileTransformer, HookHandle, HookInstallationError};
pub use layer::{ClassLoadRequest, Layer};
pub use logging::setup_logging;
pub use runtime::{
    ClassSource, DirectoryClassSource, MemoryClassSource, NativeMethod, Object, ObjectRef, Runtime,
    RuntimeBuilder, RuntimeClass, RuntimeError, Value, DEFAULT_MAX_CALL_DEPTH,
};
