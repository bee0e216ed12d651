use std::sync::Arc;

use graft_classfile::ClassFormatError;

use crate::layer::Layer;

/// Errors raised by the host runtime while resolving, defining or running
/// classes.
///
/// Load failures are cached alongside successful definitions, so the type is
/// cheaply cloneable.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RuntimeError {
    #[error("Class not found: {0}")]
    ClassNotFound(String),
    #[error("Class '{class}' in layer {layer} is not visible from layer {requester}")]
    NotVisible {
        class: String,
        layer: Layer,
        requester: Layer,
    },
    #[error("Failed to read class '{class}' from {location}: {message}")]
    SourceRead {
        class: String,
        location: String,
        message: String,
    },
    #[error("Malformed class image for '{class}': {source}")]
    Format {
        class: String,
        #[source]
        source: ClassFormatError,
    },
    #[error("Class image defines '{found}' but '{requested}' was requested")]
    NameMismatch { requested: String, found: String },
    #[error("Transformation of '{class}' failed: {source}")]
    Transform {
        class: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync>,
    },
    #[error("No such method {owner}.{name}{descriptor}")]
    NoSuchMethod {
        owner: String,
        name: String,
        descriptor: String,
    },
    #[error("No such field {owner}.{name}")]
    NoSuchField { owner: String, name: String },
    #[error("Method {0} has no code")]
    AbstractMethod(String),
    #[error("Class '{class}' does not implement interface '{interface}'")]
    IncompatibleClassChange { class: String, interface: String },
    #[error("Null reference in {0}")]
    NullPointer(String),
    #[error("Type mismatch in {site}: {message}")]
    TypeMismatch { site: String, message: String },
    #[error("Operand stack underflow in {0}")]
    StackUnderflow(String),
    #[error("Undefined label {label} in {site}")]
    UndefinedLabel { site: String, label: u16 },
    #[error("Local slot {slot} out of range in {site}")]
    BadLocal { site: String, slot: u16 },
    #[error("Execution fell off the end of {0}")]
    FellOffEnd(String),
    #[error("Call depth limit {0} exceeded")]
    CallDepthExceeded(usize),
    #[error("Class hierarchy of '{0}' is circular")]
    ClassCircularity(String),
    #[error("Native method {method} failed: {message}")]
    Native { method: String, message: String },
}
