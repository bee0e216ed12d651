//! # Graft Launch
//!
//! The launch layer sits between the bootstrap hook and the bytecode engine.
//!
//! 1. [`discover`] reads `*.graft.json` manifests into an immutable
//!    [`DefinitionSet`], reporting every malformed entry at once.
//! 2. [`Planner::plan_for`] selects and orders the definitions that apply to
//!    one class, memoised per class.
//! 3. [`TransformingClassLoader`] implements the bootstrap
//!    [`ClassFileTransformer`](graft_bootstrap::ClassFileTransformer): it
//!    plans each intercepted class and delegates non-empty plans to a
//!    [`PlanExecutor`], recording what it did in a [`LoadedClassRecord`].
//!
//! The executor is supplied by the transformer layer, which depends on this
//! crate and not the other way round.

pub mod definition;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod planner;
pub mod record;
pub mod registry;

pub use definition::{
    AccessorDefinition, AccessorKind, AccessorMember, AccessorSet, At, Band, DefinitionId, FieldAccess,
    FieldAddition, Injection, InjectionAction, MemberSig, MixinSpec, Shift, TargetPattern,
    TransformDefinition, TransformKind, WidenRule, WidenTarget, DEFAULT_PRIORITY,
};
pub use error::{
    DefinitionError, DiscoveryErrors, LoadError, OrderingCycleError, TargetMismatchError, TransformError,
};
pub use loader::{PlanExecutor, TransformingClassLoader, LOADER_NAME};
pub use manifest::{Manifest, MANIFEST_SUFFIX};
pub use planner::{Planner, TransformationPlan};
pub use record::{LoadedClassRecord, RecordTable};
pub use registry::{discover, redirect_shapes, DefinitionSet};
