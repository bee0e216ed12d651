//! The host runtime.
//!
//! A [`Runtime`] owns the layered class sources, the single class loader hook
//! point and the table of defined classes. Every class is defined at most once:
//! concurrent requests for the same name share a single definition, and the
//! hook observes each transformable class image exactly once.
//!
//! Execution of defined classes lives in the `interp` submodule.

mod error;
mod interp;
mod source;
mod value;

pub use error::RuntimeError;
pub use source::{ClassSource, DirectoryClassSource, MemoryClassSource};
pub use value::{Object, ObjectRef, RuntimeClass, Value};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use graft_classfile::{
    decode, encode, ClassFile, Code, Instruction, MemberAccess, Method, MethodRef, CONSTRUCTOR_NAME,
    OBJECT_CLASS,
};
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::hook::{ClassFileTransformer, HookHandle, HookInstallationError, HookState};
use crate::layer::{ClassLoadRequest, Layer};

/// Default limit for nested invocations.
pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;

/// Longest superclass chain walked before the hierarchy is considered circular.
const MAX_HIERARCHY_DEPTH: usize = 64;

/// A native method implementation. Receives the receiver (if any) followed by
/// the declared arguments.
pub type NativeMethod = Arc<dyn Fn(&Runtime, Vec<Value>) -> Result<Option<Value>, String> + Send + Sync>;

type DefinitionCell = Arc<OnceCell<Result<Arc<RuntimeClass>, RuntimeError>>>;

/// Hook point and host start marker, guarded together so installation cannot
/// race with the first host class.
#[derive(Default)]
struct HookSlot {
    hook: Option<Arc<HookState>>,
    first_host_class: Option<String>,
}

/// Builder for [`Runtime`].
pub struct RuntimeBuilder {
    sources: Vec<(Layer, Box<dyn ClassSource>)>,
    max_call_depth: usize,
}

impl RuntimeBuilder {
    /// Adds a class source for `layer`. Sources are searched in insertion
    /// order and the first source containing a class wins.
    pub fn source(mut self, layer: Layer, source: impl ClassSource + 'static) -> Self {
        self.sources.push((layer, Box::new(source)));
        self
    }

    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn build(self) -> Runtime {
        Runtime {
            sources: self.sources,
            slot: Mutex::new(HookSlot::default()),
            classes: DashMap::new(),
            natives: DashMap::new(),
            root: OnceCell::new(),
            definitions: AtomicU64::new(0),
            max_call_depth: self.max_call_depth,
        }
    }
}

/// The layered host runtime.
pub struct Runtime {
    sources: Vec<(Layer, Box<dyn ClassSource>)>,
    slot: Mutex<HookSlot>,
    classes: DashMap<String, DefinitionCell>,
    natives: DashMap<MethodRef, NativeMethod>,
    root: OnceCell<Arc<RuntimeClass>>,
    definitions: AtomicU64,
    max_call_depth: usize,
}

impl Runtime {
    pub fn builder() -> RuntimeBuilder {
        RuntimeBuilder {
            sources: Vec::new(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub(crate) fn install_hook(
        &self,
        transformer: Arc<dyn ClassFileTransformer>,
    ) -> Result<(HookHandle, bool), HookInstallationError> {
        let mut slot = self.slot.lock();
        if let Some(existing) = &slot.hook {
            let handle = HookHandle::new(existing.clone());
            if handle.is(&transformer) {
                return Ok((handle, false));
            }
            return Err(HookInstallationError::AlreadyInstalled {
                existing: handle.name().to_string(),
                requested: transformer.name().to_string(),
            });
        }
        if let Some(first) = &slot.first_host_class {
            return Err(HookInstallationError::TooLate {
                hook: transformer.name().to_string(),
                first_host_class: first.clone(),
            });
        }
        let state = Arc::new(HookState {
            transformer,
            intercepted: AtomicU64::new(0),
        });
        slot.hook = Some(state.clone());
        Ok((HookHandle::new(state), true))
    }

    /// Handle to the installed hook, if any.
    pub fn hook(&self) -> Option<HookHandle> {
        self.slot.lock().hook.clone().map(HookHandle::new)
    }

    /// Whether a class loader hook is installed.
    pub fn hook_installed(&self) -> bool {
        self.slot.lock().hook.is_some()
    }

    /// Whether any host class has been resolved.
    pub fn host_started(&self) -> bool {
        self.slot.lock().first_host_class.is_some()
    }

    /// Registers a native implementation for `method`.
    pub fn register_native(&self, method: MethodRef, native: NativeMethod) {
        debug!("Registered native {}.{}{}", method.owner, method.name, method.descriptor);
        self.natives.insert(method, native);
    }

    pub(crate) fn native(&self, method: &MethodRef) -> Option<NativeMethod> {
        self.natives.get(method).map(|n| n.value().clone())
    }

    pub fn max_call_depth(&self) -> usize {
        self.max_call_depth
    }

    /// Number of classes defined so far, successful or not.
    pub fn definitions(&self) -> u64 {
        self.definitions.load(Ordering::Relaxed)
    }

    /// Names of all successfully defined classes, sorted.
    pub fn defined_classes(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .classes
            .iter()
            .filter(|entry| matches!(entry.value().get(), Some(Ok(_))))
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Names of every class available in the sources of `layer`.
    pub fn class_names(&self, layer: Layer) -> Result<Vec<String>, RuntimeError> {
        let mut names = Vec::new();
        for (_, source) in self.sources.iter().filter(|(l, _)| *l == layer) {
            names.extend(source.class_names()?);
        }
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Layer that owns `name`, if any source contains it.
    pub fn layer_of(&self, name: &str) -> Option<Layer> {
        self.locate(name).map(|(layer, _)| layer)
    }

    /// Reads the untransformed image of `name` from its source.
    pub fn read_original(&self, name: &str) -> Result<Arc<[u8]>, RuntimeError> {
        let (_, source) = self
            .locate(name)
            .ok_or_else(|| RuntimeError::ClassNotFound(name.to_string()))?;
        source
            .read(name)?
            .ok_or_else(|| RuntimeError::ClassNotFound(name.to_string()))
    }

    fn locate(&self, name: &str) -> Option<(Layer, &dyn ClassSource)> {
        self.sources
            .iter()
            .find(|(_, source)| source.contains(name))
            .map(|(layer, source)| (*layer, source.as_ref()))
    }

    /// Resolves a class for `request`, defining it on first use.
    ///
    /// # Errors
    ///
    /// Fails if the class does not exist, is not visible from the requesting
    /// layer, or could not be defined. Definition failures are sticky: every
    /// later request for the same class observes the same error.
    pub fn load_class(&self, request: &ClassLoadRequest) -> Result<Arc<RuntimeClass>, RuntimeError> {
        if request.name == OBJECT_CLASS {
            return Ok(self.root_class());
        }
        let (layer, source) = self
            .locate(&request.name)
            .ok_or_else(|| RuntimeError::ClassNotFound(request.name.clone()))?;
        if !request.requester.can_see(layer) {
            return Err(RuntimeError::NotVisible {
                class: request.name.clone(),
                layer,
                requester: request.requester,
            });
        }

        let cell = self
            .classes
            .entry(request.name.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_init(|| self.define(request, layer, source)).clone()
    }

    fn define(
        &self,
        request: &ClassLoadRequest,
        layer: Layer,
        source: &dyn ClassSource,
    ) -> Result<Arc<RuntimeClass>, RuntimeError> {
        self.definitions.fetch_add(1, Ordering::Relaxed);
        let name = &request.name;
        let original = source
            .read(name)?
            .ok_or_else(|| RuntimeError::ClassNotFound(name.clone()))?;

        let hook = if layer.is_transformable() {
            let mut slot = self.slot.lock();
            if layer == Layer::Host && slot.first_host_class.is_none() {
                debug!("First host class resolved: {}", name);
                slot.first_host_class = Some(name.clone());
            }
            slot.hook.clone()
        } else {
            None
        };

        let bytes = match hook {
            Some(hook) => {
                hook.intercepted.fetch_add(1, Ordering::Relaxed);
                trace!("Passing {} through hook '{}'", name, hook.transformer.name());
                hook.transformer
                    .transform(request, &original)
                    .map_err(|source| {
                        warn!("Definition of {} aborted by hook: {}", name, source);
                        RuntimeError::Transform {
                            class: name.clone(),
                            source: Arc::from(source),
                        }
                    })?
            }
            None => original,
        };

        let file = decode(&bytes).map_err(|source| RuntimeError::Format {
            class: name.clone(),
            source,
        })?;
        if &file.name != name {
            return Err(RuntimeError::NameMismatch {
                requested: name.clone(),
                found: file.name,
            });
        }
        debug!("Defined {} in layer {}", name, layer);
        Ok(Arc::new(RuntimeClass::new(file, layer, bytes)))
    }

    /// The built-in root of every class hierarchy.
    fn root_class(&self) -> Arc<RuntimeClass> {
        self.root
            .get_or_init(|| {
                let mut file = ClassFile::new(OBJECT_CLASS);
                file.super_name = None;
                file.methods.push(Method::new(
                    MemberAccess::PUBLIC,
                    CONSTRUCTOR_NAME,
                    "()V",
                    Some(Code::new(1, vec![Instruction::Return])),
                ));
                // The root class has no string constants and always encodes.
                let bytes: Arc<[u8]> = encode(&file).map(Arc::from).unwrap_or_else(|_| Arc::from(Vec::new()));
                Arc::new(RuntimeClass::new(file, Layer::Bootstrap, bytes))
            })
            .clone()
    }

    /// Superclass of `class`, resolved from the class's own layer.
    pub(crate) fn super_class(&self, class: &RuntimeClass) -> Result<Option<Arc<RuntimeClass>>, RuntimeError> {
        match &class.file.super_name {
            Some(super_name) => {
                let request = ClassLoadRequest::new(super_name.clone(), class.layer);
                self.load_class(&request).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Walks `class` and its superclasses, nearest first.
    pub(crate) fn hierarchy(&self, class: &Arc<RuntimeClass>) -> Result<Vec<Arc<RuntimeClass>>, RuntimeError> {
        let mut chain = vec![class.clone()];
        let mut current = class.clone();
        while let Some(parent) = self.super_class(&current)? {
            if chain.len() >= MAX_HIERARCHY_DEPTH || chain.iter().any(|c| c.name() == parent.name()) {
                return Err(RuntimeError::ClassCircularity(class.name().to_string()));
            }
            chain.push(parent.clone());
            current = parent;
        }
        Ok(chain)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("sources", &self.sources.iter().map(|(l, s)| (*l, s.location())).collect::<Vec<_>>())
            .field("defined", &self.classes.len())
            .field("max_call_depth", &self.max_call_depth)
            .finish()
    }
}
