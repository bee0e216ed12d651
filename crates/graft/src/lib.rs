//! # Graft
//!
//! Launcher of the Graft load-time class transformation pipeline. The
//! `graft` binary is a thin CLI over this library:
//!
//! * [`Launcher`] boots the runtime, discovers definitions and installs the
//!   transforming class loader before any host class is resolved
//! * [`natives`] are the console natives available to host code
//! * [`tooling`] converts class images to and from JSON

pub mod launcher;
pub mod natives;
pub mod tooling;

pub use launcher::{discover_definitions, plan_class, Launcher, LauncherError, ENTRYPOINT_METHOD};
pub use tooling::{assemble, dump, ToolingError};
