//! The bytecode transformation engine.
//!
//! [`MixinEngine::apply`] executes a [`TransformationPlan`] against the
//! original image of its class. Steps run in plan order on one decoded
//! class, so every step observes the output of the steps before it. The
//! result is deterministic: the same plan over the same bytes always yields
//! the same image.

use std::sync::Arc;

use dashmap::DashMap;
use graft_bootstrap::ClassSource;
use graft_classfile::{decode, encode, ClassFile};
use graft_launch::{
    DefinitionId, MixinSpec, PlanExecutor, TransformDefinition, TransformError, TransformKind, TransformationPlan,
};
use tracing::{debug, trace};

use crate::mixin::{mismatch, MixinStep};
use crate::splice::Provenance;
use crate::verify::check_compatibility;
use crate::widen;

/// Applies transformation plans, reading mixin classes from the transformer
/// layer.
pub struct MixinEngine {
    mixins: Arc<dyn ClassSource>,
    verify: bool,
    /// Decoded mixin classes by name
    cache: DashMap<String, Arc<ClassFile>>,
}

impl MixinEngine {
    /// Creates an engine with compatibility verification enabled.
    pub fn new(mixins: Arc<dyn ClassSource>) -> Self {
        Self {
            mixins,
            verify: true,
            cache: DashMap::new(),
        }
    }

    /// Enables or disables the binary compatibility check of every output.
    pub fn with_verification(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn verifies(&self) -> bool {
        self.verify
    }

    /// Executes `plan` over `original`.
    ///
    /// # Arguments
    ///
    /// * `plan` - The ordered steps for the class
    /// * `original` - The untransformed image of `plan.class`
    ///
    /// # Returns
    ///
    /// The transformed image. An empty plan returns `original` unchanged.
    ///
    /// # Errors
    ///
    /// The first step that fails aborts the whole plan; nothing partial is
    /// ever returned.
    pub fn apply(&self, plan: &TransformationPlan, original: &[u8]) -> Result<Vec<u8>, TransformError> {
        if plan.is_empty() {
            return Ok(original.to_vec());
        }
        let source = decode(original).map_err(|source| TransformError::Format {
            class: plan.class.clone(),
            source,
        })?;
        if source.name != plan.class {
            let first = &plan.steps[0];
            return Err(mismatch(
                &first.id,
                &plan.class,
                "class",
                format!("image declares class {}", source.name),
            ));
        }

        let mut class = source.clone();
        let mut provenance = Provenance::default();
        for (index, step) in plan.steps.iter().enumerate() {
            trace!("Applying step {} ({}) to {}", index, step.id, plan.class);
            class = self.apply_step(index, step, class, &mut provenance)?;
        }

        if self.verify {
            check_compatibility(&source, &class)?;
        }
        debug!("🔧 Applied {} step(s) to {}", plan.len(), plan.class);
        encode(&class).map_err(|source| TransformError::Format {
            class: plan.class.clone(),
            source,
        })
    }

    fn apply_step(
        &self,
        index: usize,
        step: &TransformDefinition,
        mut class: ClassFile,
        provenance: &mut Provenance,
    ) -> Result<ClassFile, TransformError> {
        match &step.kind {
            TransformKind::Accessor(accessors) => graft_accessor::generate(&step.id, accessors, class),
            TransformKind::Widen(rules) => {
                widen::apply(&step.id, rules, &mut class)?;
                Ok(class)
            }
            TransformKind::Mixin(spec) => {
                let mixin = self.mixin_class(&step.id, spec)?;
                MixinStep {
                    index,
                    id: &step.id,
                    spec,
                    mixin: &mixin,
                }
                .apply(&mut class, provenance)?;
                Ok(class)
            }
        }
    }

    fn mixin_class(&self, id: &DefinitionId, spec: &MixinSpec) -> Result<Arc<ClassFile>, TransformError> {
        let name = &spec.mixin_class;
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.value().clone());
        }
        let unavailable = |reason: String| TransformError::MixinUnavailable {
            definition: id.clone(),
            mixin: name.clone(),
            reason,
        };
        let bytes = self
            .mixins
            .read(name)
            .map_err(|err| unavailable(err.to_string()))?
            .ok_or_else(|| unavailable(format!("not found in {}", self.mixins.location())))?;
        let class = decode(&bytes).map_err(|err| unavailable(err.to_string()))?;
        if class.name != *name {
            return Err(unavailable(format!("image declares class {}", class.name)));
        }
        let class = Arc::new(class);
        self.cache.insert(name.clone(), class.clone());
        Ok(class)
    }
}

impl PlanExecutor for MixinEngine {
    fn execute(&self, plan: &TransformationPlan, original: &[u8]) -> Result<Vec<u8>, TransformError> {
        self.apply(plan, original)
    }
}
