//! Error taxonomy of the launch pipeline.
//!
//! Every error here is fatal for the class or the process it concerns; none
//! of them is retried. Each carries enough context (manifest, definition id,
//! class name, join point) to find the offending definition.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use graft_classfile::ClassFormatError;

use crate::definition::DefinitionId;

/// A malformed or conflicting manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{file}: {entry}: {reason}", file = .manifest.display())]
pub struct DefinitionError {
    /// Manifest file the entry came from
    pub manifest: PathBuf,
    /// Entry id, or a location description when no id could be formed
    pub entry: String,
    pub reason: String,
}

impl DefinitionError {
    pub fn new(manifest: impl Into<PathBuf>, entry: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            manifest: manifest.into(),
            entry: entry.into(),
            reason: reason.into(),
        }
    }
}

/// Every definition error found during one discovery run.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub struct DiscoveryErrors(pub Vec<DefinitionError>);

impl DiscoveryErrors {
    pub fn errors(&self) -> &[DefinitionError] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for DiscoveryErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} invalid definition(s)", self.0.len())?;
        for error in &self.0 {
            write!(f, "\n  - {error}")?;
        }
        Ok(())
    }
}

/// Before/after hints among the definitions of one class form a cycle.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Ordering cycle for class {class}: {}", format_cycle(.cycle))]
pub struct OrderingCycleError {
    pub class: String,
    /// The cycle, first id repeated at the end
    pub cycle: Vec<DefinitionId>,
}

fn format_cycle(cycle: &[DefinitionId]) -> String {
    cycle.iter().map(DefinitionId::as_str).collect::<Vec<_>>().join(" -> ")
}

/// A declared join point or member does not exist in the observed class.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Target mismatch in {class} for {definition} at {join_point}: {reason}")]
pub struct TargetMismatchError {
    pub class: String,
    pub definition: DefinitionId,
    pub join_point: String,
    pub reason: String,
}

/// Failure to execute a plan step.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    TargetMismatch(#[from] TargetMismatchError),
    #[error("Malformed class image for {class}: {source}")]
    Format {
        class: String,
        #[source]
        source: ClassFormatError,
    },
    #[error("Mixin class {mixin} of {definition} is unavailable: {reason}")]
    MixinUnavailable {
        definition: DefinitionId,
        mixin: String,
        reason: String,
    },
    #[error("Invalid handler {handler} in {definition}: {reason}")]
    InvalidHandler {
        definition: DefinitionId,
        handler: String,
        reason: String,
    },
    #[error("Transformation of {class} broke binary compatibility: {}", .violations.join("; "))]
    CompatibilityViolation { class: String, violations: Vec<String> },
}

/// Failure of the transforming class loader for one class.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LoadError {
    #[error(transparent)]
    Ordering(#[from] OrderingCycleError),
    #[error("Failed to transform {class}: {source}")]
    Transform {
        class: String,
        #[source]
        source: TransformError,
    },
    #[error("Class {class} was presented again with different bytes; redefinition is not supported")]
    Redefinition { class: String },
    #[error("Failed to export {class} to {location}: {source}", location = .path.display())]
    Export {
        class: String,
        path: PathBuf,
        #[source]
        source: Arc<std::io::Error>,
    },
}
