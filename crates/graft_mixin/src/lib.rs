//! # Graft Mixin
//!
//! The transformer layer: executes transformation plans against class images.
//!
//! [`MixinEngine`] is the [`PlanExecutor`](graft_launch::PlanExecutor) handed
//! to the transforming class loader. For every step of a plan it either
//! generates accessor members, widens access, or applies a mixin: handler
//! copies, injections, redirects, overwrites, added fields, methods and
//! interfaces. With verification enabled each output is checked by
//! [`check_compatibility`] before it is encoded.

mod engine;
mod mixin;
mod splice;
mod verify;
mod widen;

pub use engine::MixinEngine;
pub use verify::check_compatibility;
