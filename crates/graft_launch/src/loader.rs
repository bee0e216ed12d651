//! The transforming class loader.
//!
//! [`TransformingClassLoader`] is the launch layer's implementation of the
//! bootstrap hook. For every intercepted class it asks the planner for the
//! class plan and, if the plan has steps, hands the original bytes to a
//! [`PlanExecutor`]. The bytecode work itself lives in the transformer layer;
//! this crate only knows the executor trait.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use graft_bootstrap::{BoxError, ClassFileTransformer, ClassLoadRequest};
use graft_classfile::class_path;
use tracing::{debug, info, trace};

use crate::error::{LoadError, TransformError};
use crate::planner::{Planner, TransformationPlan};
use crate::record::{LoadedClassRecord, RecordTable};

/// Name the loader registers under.
pub const LOADER_NAME: &str = "graft-transforming-loader";

/// Executes a non-empty plan on the original image of its class.
///
/// Implementations must be pure: the same plan and bytes always give the same
/// output bytes.
pub trait PlanExecutor: Send + Sync {
    fn execute(&self, plan: &TransformationPlan, original: &[u8]) -> Result<Vec<u8>, TransformError>;
}

/// Plans and transforms classes as the runtime defines them.
pub struct TransformingClassLoader {
    planner: Arc<Planner>,
    executor: Arc<dyn PlanExecutor>,
    records: RecordTable,
    export_dir: Option<PathBuf>,
}

impl TransformingClassLoader {
    pub fn new(planner: Arc<Planner>, executor: Arc<dyn PlanExecutor>) -> Self {
        Self {
            planner,
            executor,
            records: RecordTable::new(),
            export_dir: None,
        }
    }

    /// Writes every transformed image below `dir`. The directory is never
    /// read back.
    pub fn with_export_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.export_dir = Some(dir.into());
        self
    }

    pub fn planner(&self) -> &Arc<Planner> {
        &self.planner
    }

    pub fn records(&self) -> &RecordTable {
        &self.records
    }

    /// Produces the final image of `class` from its original bytes.
    ///
    /// The plan is executed at most once per class; later calls with the same
    /// bytes return the recorded output.
    ///
    /// # Errors
    ///
    /// * [`LoadError::Ordering`] if the class plan has a cycle
    /// * [`LoadError::Transform`] if a step fails
    /// * [`LoadError::Redefinition`] if the class was already presented with
    ///   different bytes
    pub fn load(&self, class: &str, original: &[u8]) -> Result<Arc<LoadedClassRecord>, LoadError> {
        let record = self.records.get_or_compute(class, || self.transform_once(class, original))?;
        record.check_original(original)?;
        Ok(record)
    }

    fn transform_once(&self, class: &str, original: &[u8]) -> Result<LoadedClassRecord, LoadError> {
        let plan = self.planner.plan_for(class)?;
        let original: Arc<[u8]> = Arc::from(original);

        if plan.is_empty() {
            trace!("No transformations for {}", class);
            return Ok(LoadedClassRecord {
                class: class.to_string(),
                output: Arc::clone(&original),
                original,
                plan_len: 0,
                applications: 0,
            });
        }

        let output = self
            .executor
            .execute(&plan, &original)
            .map_err(|source| LoadError::Transform {
                class: class.to_string(),
                source,
            })?;
        info!("🔧 Transformed {} with {} step(s)", class, plan.len());

        if let Some(dir) = &self.export_dir {
            export(dir, class, &output)?;
        }

        Ok(LoadedClassRecord {
            class: class.to_string(),
            original,
            output: Arc::from(output),
            plan_len: plan.len(),
            applications: 1,
        })
    }
}

fn export(dir: &Path, class: &str, bytes: &[u8]) -> Result<(), LoadError> {
    let path = dir.join(class_path(class));
    let write = || -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&path, bytes)
    };
    write().map_err(|source| LoadError::Export {
        class: class.to_string(),
        path: path.clone(),
        source: Arc::new(source),
    })?;
    debug!("Exported {} to {}", class, path.display());
    Ok(())
}

impl ClassFileTransformer for TransformingClassLoader {
    fn name(&self) -> &str {
        LOADER_NAME
    }

    fn transform(&self, request: &ClassLoadRequest, original: &[u8]) -> Result<Arc<[u8]>, BoxError> {
        let record = self.load(&request.name, original)?;
        Ok(Arc::clone(&record.output))
    }
}
