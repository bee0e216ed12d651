use std::cell::Cell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use graft_classfile::{ClassFile, Constant};
use parking_lot::{Mutex, ReentrantMutex};

use crate::layer::Layer;

/// A value on the operand stack, in a local slot or in a field.
#[derive(Clone)]
pub enum Value {
    Null,
    Int(i64),
    Str(Arc<str>),
    Object(ObjectRef),
}

impl Value {
    /// Default value of a field with this descriptor.
    pub fn default_for(descriptor: &str) -> Self {
        match descriptor.as_bytes().first() {
            Some(b'B' | b'C' | b'D' | b'F' | b'I' | b'J' | b'S' | b'Z') => Value::Int(0),
            _ => Value::Null,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Reference equality for objects, value equality otherwise.
    pub fn same_as(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl From<&Constant> for Value {
    fn from(constant: &Constant) -> Self {
        match constant {
            Constant::Null => Value::Null,
            Constant::Int(v) => Value::Int(*v),
            Constant::Str(s) => Value::Str(Arc::from(s.as_str())),
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(Arc::from(s))
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::Object(o) => write!(f, "{}@{:p}", o.class_name(), Arc::as_ptr(o)),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

/// Shared reference to a heap object.
pub type ObjectRef = Arc<Object>;

/// An instance of a defined class.
pub struct Object {
    class: Arc<RuntimeClass>,
    fields: Mutex<HashMap<String, Value>>,
}

impl Object {
    pub(crate) fn new(class: Arc<RuntimeClass>, fields: HashMap<String, Value>) -> Self {
        Self {
            class,
            fields: Mutex::new(fields),
        }
    }

    pub fn class(&self) -> &Arc<RuntimeClass> {
        &self.class
    }

    pub fn class_name(&self) -> &str {
        &self.class.file.name
    }

    /// Reads a field by name.
    pub fn get(&self, name: &str) -> Option<Value> {
        self.fields.lock().get(name).cloned()
    }

    /// Writes a field; returns false if the object has no such field.
    pub fn set(&self, name: &str, value: Value) -> bool {
        match self.fields.lock().get_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}

/// A class defined into the runtime. Its bytecode is final.
pub struct RuntimeClass {
    pub(crate) file: ClassFile,
    pub(crate) layer: Layer,
    pub(crate) bytes: Arc<[u8]>,
    pub(crate) statics: Mutex<HashMap<String, Value>>,
    pub(crate) initialized: ReentrantMutex<Cell<bool>>,
}

impl RuntimeClass {
    pub(crate) fn new(file: ClassFile, layer: Layer, bytes: Arc<[u8]>) -> Self {
        let statics = file
            .fields
            .iter()
            .filter(|f| f.is_static())
            .map(|f| (f.name.clone(), Value::default_for(&f.descriptor)))
            .collect();
        Self {
            file,
            layer,
            bytes,
            statics: Mutex::new(statics),
            initialized: ReentrantMutex::new(Cell::new(false)),
        }
    }

    pub fn name(&self) -> &str {
        &self.file.name
    }

    /// The decoded final form of the class.
    pub fn file(&self) -> &ClassFile {
        &self.file
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    /// The exact bytes the class was defined from.
    pub fn bytes(&self) -> &Arc<[u8]> {
        &self.bytes
    }

    /// Reads a static field declared on this class.
    pub fn get_static(&self, name: &str) -> Option<Value> {
        self.statics.lock().get(name).cloned()
    }
}

impl fmt::Debug for RuntimeClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeClass")
            .field("name", &self.file.name)
            .field("layer", &self.layer)
            .finish()
    }
}
