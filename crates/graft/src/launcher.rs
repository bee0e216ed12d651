//! Boot sequence of the launcher.
//!
//! [`Launcher::boot`] wires every layer together in the order the pipeline
//! requires: the runtime is built from the configured class paths, the
//! definitions are discovered and validated, and the transforming class
//! loader is installed as the runtime hook. All of this happens before the
//! first host class is resolved.

use std::sync::Arc;

use graft_bootstrap::{
    install, ClassLoadRequest, ClassSource, DirectoryClassSource, GraftConfig, HookHandle, HookInstallationError,
    Layer, MemoryClassSource, Runtime, RuntimeError,
};
use graft_launch::{
    discover, DefinitionSet, DiscoveryErrors, OrderingCycleError, Planner, TransformationPlan,
    TransformingClassLoader,
};
use graft_mixin::MixinEngine;
use rayon::prelude::*;
use tracing::{debug, error, info};

use crate::natives;

/// Name of the static method run on the entrypoint class.
pub const ENTRYPOINT_METHOD: &str = "main";

/// Failures of the launcher. All of them end the process.
#[derive(Debug, thiserror::Error)]
pub enum LauncherError {
    #[error(transparent)]
    Discovery(#[from] DiscoveryErrors),
    #[error(transparent)]
    Hook(#[from] HookInstallationError),
    #[error(transparent)]
    Ordering(#[from] OrderingCycleError),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
    #[error("{} host class(es) failed to load", .0.len())]
    Preload(Vec<(String, RuntimeError)>),
}

/// A booted pipeline: runtime, installed hook and loader.
pub struct Launcher {
    config: GraftConfig,
    runtime: Arc<Runtime>,
    loader: Arc<TransformingClassLoader>,
    hook: HookHandle,
}

impl Launcher {
    /// Builds the runtime, discovers definitions and installs the hook.
    ///
    /// # Arguments
    ///
    /// * `config` - A validated launcher configuration
    ///
    /// # Errors
    ///
    /// * [`LauncherError::Discovery`] with every malformed definition
    /// * [`LauncherError::Hook`] if the hook point cannot be taken
    pub fn boot(config: GraftConfig) -> Result<Self, LauncherError> {
        let runtime = Arc::new(build_runtime(&config));
        let planner = Arc::new(Planner::new(Arc::new(discover_definitions(&config)?)));

        let engine = MixinEngine::new(transformer_source(&config)).with_verification(config.transform.verify);
        let mut loader = TransformingClassLoader::new(planner, Arc::new(engine));
        if let Some(dir) = &config.transform.export_dir {
            info!("📂 Exporting transformed classes to {}", dir);
            loader = loader.with_export_dir(dir);
        }
        let loader = Arc::new(loader);
        let hook = install(&runtime, loader.clone())?;
        natives::register(&runtime);

        Ok(Self {
            config,
            runtime,
            loader,
            hook,
        })
    }

    pub fn config(&self) -> &GraftConfig {
        &self.config
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn loader(&self) -> &Arc<TransformingClassLoader> {
        &self.loader
    }

    pub fn hook(&self) -> &HookHandle {
        &self.hook
    }

    /// Loads every host class in parallel and returns how many were loaded.
    ///
    /// Every failure is collected; nothing is retried.
    pub fn preload(&self) -> Result<usize, LauncherError> {
        let names = self.runtime.class_names(Layer::Host)?;
        info!("🔧 Preloading {} host class(es)", names.len());

        let failures: Vec<(String, RuntimeError)> = names
            .par_iter()
            .filter_map(|name| {
                self.runtime
                    .load_class(&ClassLoadRequest::new(name.as_str(), Layer::Launch))
                    .err()
                    .map(|err| (name.clone(), err))
            })
            .collect();

        if failures.is_empty() {
            Ok(names.len())
        } else {
            for (name, err) in &failures {
                error!("❌ Failed to load {}: {}", name, err);
            }
            Err(LauncherError::Preload(failures))
        }
    }

    /// Runs the static `main()V` of the configured entrypoint on the calling
    /// thread.
    pub fn run_entrypoint(&self) -> Result<(), RuntimeError> {
        let entrypoint = &self.config.launch.entrypoint;
        info!("🚀 Invoking {}.{}()V", entrypoint, ENTRYPOINT_METHOD);
        self.runtime
            .invoke_static(Layer::Launch, entrypoint, ENTRYPOINT_METHOD, "()V", Vec::new())?;
        Ok(())
    }

    /// Logs what the loader did so far.
    pub fn log_summary(&self) {
        let records = self.loader.records().records();
        let transformed = records.iter().filter(|record| record.is_transformed()).count();
        info!("📊 Pipeline summary:");
        info!("  - Classes intercepted: {}", self.hook.classes_intercepted());
        info!("  - Classes transformed: {}", transformed);
        info!("  - Plans computed: {}", self.loader.planner().computations());
        for record in records.iter().filter(|record| record.is_transformed()) {
            debug!("  - {} ({} step(s))", record.class, record.plan_len);
        }
    }
}

/// Discovers the configured definitions, logging every error found.
pub fn discover_definitions(config: &GraftConfig) -> Result<DefinitionSet, LauncherError> {
    discover(&config.definition_paths()).map_err(|errors| {
        for err in errors.errors() {
            error!("❌ {}", err);
        }
        LauncherError::Discovery(errors)
    })
}

/// Computes the plan of one class without loading anything.
pub fn plan_class(config: &GraftConfig, class: &str) -> Result<Arc<TransformationPlan>, LauncherError> {
    let planner = Planner::new(Arc::new(discover_definitions(config)?));
    Ok(planner.plan_for(class)?)
}

fn build_runtime(config: &GraftConfig) -> Runtime {
    let launch = &config.launch;
    let mut builder = Runtime::builder()
        .max_call_depth(config.runtime.max_call_depth)
        .source(Layer::Host, DirectoryClassSource::new(&launch.host_classpath));
    if let Some(dir) = &launch.accessor_classpath {
        builder = builder.source(Layer::Accessor, DirectoryClassSource::new(dir));
    }
    if let Some(dir) = &launch.transformer_classpath {
        builder = builder.source(Layer::Transformer, DirectoryClassSource::new(dir));
    }
    builder.build()
}

/// Where the engine reads mixin classes from.
fn transformer_source(config: &GraftConfig) -> Arc<dyn ClassSource> {
    match &config.launch.transformer_classpath {
        Some(dir) => Arc::new(DirectoryClassSource::new(dir)),
        None => Arc::new(MemoryClassSource::new("no transformer classpath")),
    }
}
