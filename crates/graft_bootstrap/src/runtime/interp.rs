//! Stack machine interpreter for defined classes.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use graft_classfile::{
    FieldRef, Instruction, InvokeKind, MemberAccess, Method, MethodDescriptor, MethodRef,
    CONSTRUCTOR_NAME, STATIC_INIT_NAME,
};

use super::{Object, ObjectRef, Runtime, RuntimeClass, RuntimeError, Value};
use crate::layer::{ClassLoadRequest, Layer};

type ExecResult = Result<Option<Value>, RuntimeError>;

fn describe(target: &MethodRef) -> String {
    format!("{}.{}{}", target.owner, target.name, target.descriptor)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Int(v) => *v != 0,
        Value::Str(_) | Value::Object(_) => true,
    }
}

impl Runtime {
    // ========================================================================
    // Entry points
    // ========================================================================

    /// Instantiates `class` and runs the constructor matching `descriptor`.
    pub fn new_object(
        &self,
        requester: Layer,
        class: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> Result<ObjectRef, RuntimeError> {
        let class = self.load_class(&ClassLoadRequest::new(class, requester))?;
        let object = self.allocate(&class, 0)?;
        let mut full = Vec::with_capacity(args.len() + 1);
        full.push(Value::Object(object.clone()));
        full.extend(args);
        let target = MethodRef::new(class.name(), CONSTRUCTOR_NAME, descriptor);
        self.call(InvokeKind::Special, &target, full, requester, 0)?;
        Ok(object)
    }

    /// Calls a static method.
    pub fn invoke_static(
        &self,
        requester: Layer,
        owner: &str,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> ExecResult {
        let target = MethodRef::new(owner, name, descriptor);
        self.call(InvokeKind::Static, &target, args, requester, 0)
    }

    /// Calls an instance method, dispatching on the receiver's class.
    pub fn invoke_virtual(
        &self,
        requester: Layer,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> ExecResult {
        let target = MethodRef::new(receiver.class_name(), name, descriptor);
        self.call(InvokeKind::Virtual, &target, with_receiver(receiver, args), requester, 0)
    }

    /// Calls a method through an interface the receiver must implement.
    pub fn invoke_interface(
        &self,
        requester: Layer,
        interface: &str,
        receiver: &ObjectRef,
        name: &str,
        descriptor: &str,
        args: Vec<Value>,
    ) -> ExecResult {
        let target = MethodRef::new(interface, name, descriptor);
        self.call(InvokeKind::Interface, &target, with_receiver(receiver, args), requester, 0)
    }

    /// Reads a static field, initializing its class first.
    pub fn get_static(&self, requester: Layer, owner: &str, name: &str) -> Result<Value, RuntimeError> {
        let class = self.load_class(&ClassLoadRequest::new(owner, requester))?;
        self.initialize(&class, 0)?;
        let declaring = self.static_owner(&class, name)?;
        declaring
            .get_static(name)
            .ok_or_else(|| RuntimeError::NoSuchField {
                owner: owner.to_string(),
                name: name.to_string(),
            })
    }

    /// Whether `class` is, extends or implements `interface`.
    pub fn is_instance_of(&self, class: &Arc<RuntimeClass>, interface: &str) -> Result<bool, RuntimeError> {
        for current in self.hierarchy(class)? {
            if current.name() == interface {
                return Ok(true);
            }
            let mut seen = HashSet::new();
            for name in &current.file.interfaces {
                if self.interface_extends(name, interface, current.layer, &mut seen) {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    fn interface_extends(&self, name: &str, target: &str, layer: Layer, seen: &mut HashSet<String>) -> bool {
        if name == target {
            return true;
        }
        if !seen.insert(name.to_string()) {
            return false;
        }
        match self.load_class(&ClassLoadRequest::new(name, layer)) {
            Ok(class) => class
                .file
                .interfaces
                .iter()
                .any(|parent| self.interface_extends(parent, target, class.layer, seen)),
            Err(_) => false,
        }
    }

    // ========================================================================
    // Class preparation
    // ========================================================================

    /// Runs `<clinit>` once, superclasses first.
    pub(crate) fn initialize(&self, class: &Arc<RuntimeClass>, depth: usize) -> Result<(), RuntimeError> {
        let guard = class.initialized.lock();
        if guard.get() {
            return Ok(());
        }
        guard.set(true);
        if let Some(parent) = self.super_class(class)? {
            self.initialize(&parent, depth)?;
        }
        if let Some(index) = class.file.method_index(STATIC_INIT_NAME, "()V") {
            self.execute(class, index, Vec::new(), depth + 1)?;
        }
        Ok(())
    }

    fn allocate(&self, class: &Arc<RuntimeClass>, depth: usize) -> Result<ObjectRef, RuntimeError> {
        if class.file.is_interface() || class.file.access.contains(graft_classfile::ClassAccess::ABSTRACT) {
            return Err(RuntimeError::TypeMismatch {
                site: class.name().to_string(),
                message: "cannot instantiate an abstract class or interface".to_string(),
            });
        }
        self.initialize(class, depth)?;
        let mut fields = HashMap::new();
        for current in self.hierarchy(class)? {
            for field in current.file.fields.iter().filter(|f| !f.is_static()) {
                fields
                    .entry(field.name.clone())
                    .or_insert_with(|| Value::default_for(&field.descriptor));
            }
        }
        Ok(Arc::new(Object::new(class.clone(), fields)))
    }

    fn static_owner(&self, class: &Arc<RuntimeClass>, name: &str) -> Result<Arc<RuntimeClass>, RuntimeError> {
        self.hierarchy(class)?
            .into_iter()
            .find(|c| c.file.field(name).is_some_and(|f| f.is_static()))
            .ok_or_else(|| RuntimeError::NoSuchField {
                owner: class.name().to_string(),
                name: name.to_string(),
            })
    }

    // ========================================================================
    // Method resolution
    // ========================================================================

    /// Finds the declaration of `target` starting at `start` and walking up.
    fn resolve(&self, start: &Arc<RuntimeClass>, target: &MethodRef) -> Result<(Arc<RuntimeClass>, usize), RuntimeError> {
        for class in self.hierarchy(start)? {
            if let Some(index) = class.file.method_index(&target.name, &target.descriptor) {
                return Ok((class, index));
            }
        }
        Err(RuntimeError::NoSuchMethod {
            owner: target.owner.clone(),
            name: target.name.clone(),
            descriptor: target.descriptor.clone(),
        })
    }

    /// Finds the implementation of `target` for a receiver of class `start`.
    /// Abstract declarations are skipped; interface default methods are the
    /// last resort.
    fn resolve_virtual(
        &self,
        start: &Arc<RuntimeClass>,
        target: &MethodRef,
    ) -> Result<(Arc<RuntimeClass>, usize), RuntimeError> {
        let chain = self.hierarchy(start)?;
        for class in &chain {
            if let Some(index) = class.file.method_index(&target.name, &target.descriptor) {
                if !class.file.methods[index].access.contains(MemberAccess::ABSTRACT) {
                    return Ok((class.clone(), index));
                }
            }
        }
        for class in &chain {
            for interface in &class.file.interfaces {
                let Ok(iface) = self.load_class(&ClassLoadRequest::new(interface.clone(), class.layer)) else {
                    continue;
                };
                if let Some(index) = iface.file.method_index(&target.name, &target.descriptor) {
                    if iface.file.methods[index].code.is_some() {
                        return Ok((iface, index));
                    }
                }
            }
        }
        Err(RuntimeError::NoSuchMethod {
            owner: start.name().to_string(),
            name: target.name.clone(),
            descriptor: target.descriptor.clone(),
        })
    }

    fn call(&self, kind: InvokeKind, target: &MethodRef, args: Vec<Value>, from: Layer, depth: usize) -> ExecResult {
        if depth >= self.max_call_depth() {
            return Err(RuntimeError::CallDepthExceeded(self.max_call_depth()));
        }
        if let Some(native) = self.native(target) {
            return (*native)(self, args).map_err(|message| RuntimeError::Native {
                method: describe(target),
                message,
            });
        }

        let owner = self.load_class(&ClassLoadRequest::new(target.owner.clone(), from))?;
        let (class, index) = match kind {
            InvokeKind::Static => {
                self.initialize(&owner, depth)?;
                self.resolve(&owner, target)?
            }
            InvokeKind::Special => self.resolve(&owner, target)?,
            InvokeKind::Virtual | InvokeKind::Interface => {
                let receiver = args
                    .first()
                    .and_then(Value::as_object)
                    .ok_or_else(|| RuntimeError::NullPointer(describe(target)))?
                    .clone();
                if kind == InvokeKind::Interface && !self.is_instance_of(receiver.class(), &target.owner)? {
                    return Err(RuntimeError::IncompatibleClassChange {
                        class: receiver.class_name().to_string(),
                        interface: target.owner.clone(),
                    });
                }
                self.resolve_virtual(receiver.class(), target)?
            }
        };

        let method = &class.file.methods[index];
        if method.access.contains(MemberAccess::NATIVE) {
            let declared = MethodRef::new(class.name(), &method.name, &method.descriptor);
            let native = self.native(&declared).ok_or_else(|| RuntimeError::Native {
                method: describe(&declared),
                message: "no native implementation registered".to_string(),
            })?;
            return (*native)(self, args).map_err(|message| RuntimeError::Native {
                method: describe(&declared),
                message,
            });
        }
        self.execute(&class, index, args, depth + 1)
    }

    // ========================================================================
    // Execution
    // ========================================================================

    fn execute(&self, class: &Arc<RuntimeClass>, index: usize, args: Vec<Value>, depth: usize) -> ExecResult {
        if depth > self.max_call_depth() {
            return Err(RuntimeError::CallDepthExceeded(self.max_call_depth()));
        }
        let method: &Method = &class.file.methods[index];
        let site = format!("{}.{}{}", class.name(), method.name, method.descriptor);
        let code = method
            .code
            .as_ref()
            .ok_or_else(|| RuntimeError::AbstractMethod(site.clone()))?;

        let mut locals = vec![Value::Null; usize::from(code.max_locals).max(args.len())];
        for (slot, arg) in args.into_iter().enumerate() {
            locals[slot] = arg;
        }
        let labels: HashMap<u16, usize> = code
            .instructions
            .iter()
            .enumerate()
            .filter_map(|(at, insn)| match insn {
                Instruction::Label(id) => Some((*id, at)),
                _ => None,
            })
            .collect();
        let jump = |label: u16| {
            labels.get(&label).copied().ok_or_else(|| RuntimeError::UndefinedLabel {
                site: site.clone(),
                label,
            })
        };

        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0;
        while let Some(insn) = code.instructions.get(pc) {
            pc += 1;
            let pop = |stack: &mut Vec<Value>| stack.pop().ok_or_else(|| RuntimeError::StackUnderflow(site.clone()));
            match insn {
                Instruction::Nop | Instruction::Label(_) => {}
                Instruction::Push(constant) => stack.push(Value::from(constant)),
                Instruction::Load(slot) => {
                    let value = locals.get(usize::from(*slot)).cloned().ok_or_else(|| RuntimeError::BadLocal {
                        site: site.clone(),
                        slot: *slot,
                    })?;
                    stack.push(value);
                }
                Instruction::Store(slot) => {
                    let value = pop(&mut stack)?;
                    let target = locals.get_mut(usize::from(*slot)).ok_or_else(|| RuntimeError::BadLocal {
                        site: site.clone(),
                        slot: *slot,
                    })?;
                    *target = value;
                }
                Instruction::Dup => {
                    let top = stack.last().cloned().ok_or_else(|| RuntimeError::StackUnderflow(site.clone()))?;
                    stack.push(top);
                }
                Instruction::Pop => {
                    pop(&mut stack)?;
                }
                Instruction::Swap => {
                    let a = pop(&mut stack)?;
                    let b = pop(&mut stack)?;
                    stack.push(a);
                    stack.push(b);
                }
                Instruction::Add | Instruction::Sub | Instruction::Mul => {
                    let rhs = pop(&mut stack)?;
                    let lhs = pop(&mut stack)?;
                    let (Some(l), Some(r)) = (lhs.as_int(), rhs.as_int()) else {
                        return Err(RuntimeError::TypeMismatch {
                            site: site.clone(),
                            message: format!("arithmetic on {lhs:?} and {rhs:?}"),
                        });
                    };
                    stack.push(Value::Int(match insn {
                        Instruction::Add => l.wrapping_add(r),
                        Instruction::Sub => l.wrapping_sub(r),
                        _ => l.wrapping_mul(r),
                    }));
                }
                Instruction::CmpEq => {
                    let rhs = pop(&mut stack)?;
                    let lhs = pop(&mut stack)?;
                    stack.push(Value::Int(i64::from(lhs.same_as(&rhs))));
                }
                Instruction::GetField(field) => {
                    let object = self.pop_object(&mut stack, &site)?;
                    let value = object.get(&field.name).ok_or_else(|| no_such_field(field))?;
                    stack.push(value);
                }
                Instruction::PutField(field) => {
                    let value = pop(&mut stack)?;
                    let object = self.pop_object(&mut stack, &site)?;
                    if !object.set(&field.name, value) {
                        return Err(no_such_field(field));
                    }
                }
                Instruction::GetStatic(field) => {
                    let owner = self.static_class(field, class, depth)?;
                    let value = owner.get_static(&field.name).ok_or_else(|| no_such_field(field))?;
                    stack.push(value);
                }
                Instruction::PutStatic(field) => {
                    let value = pop(&mut stack)?;
                    let owner = self.static_class(field, class, depth)?;
                    owner.statics.lock().insert(field.name.clone(), value);
                }
                Instruction::Invoke(kind, target) => {
                    let descriptor: MethodDescriptor =
                        target.descriptor.parse().map_err(|source| RuntimeError::Format {
                            class: target.owner.clone(),
                            source,
                        })?;
                    let mut count = descriptor.params.len();
                    if *kind != InvokeKind::Static {
                        count += 1;
                    }
                    let at = stack
                        .len()
                        .checked_sub(count)
                        .ok_or_else(|| RuntimeError::StackUnderflow(site.clone()))?;
                    let call_args = stack.split_off(at);
                    if let Some(value) = self.call(*kind, target, call_args, class.layer, depth)? {
                        stack.push(value);
                    }
                }
                Instruction::New(name) => {
                    let target = self.load_class(&ClassLoadRequest::new(name.clone(), class.layer))?;
                    let object = self.allocate(&target, depth)?;
                    stack.push(Value::Object(object));
                }
                Instruction::Goto(label) => pc = jump(*label)?,
                Instruction::IfZero(label) => {
                    if !is_truthy(&pop(&mut stack)?) {
                        pc = jump(*label)?;
                    }
                }
                Instruction::IfNonZero(label) => {
                    if is_truthy(&pop(&mut stack)?) {
                        pc = jump(*label)?;
                    }
                }
                Instruction::Return => return Ok(None),
                Instruction::ReturnValue => return pop(&mut stack).map(Some),
            }
        }
        Err(RuntimeError::FellOffEnd(site))
    }

    fn pop_object(&self, stack: &mut Vec<Value>, site: &str) -> Result<ObjectRef, RuntimeError> {
        match stack.pop() {
            Some(Value::Object(object)) => Ok(object),
            Some(Value::Null) => Err(RuntimeError::NullPointer(site.to_string())),
            Some(other) => Err(RuntimeError::TypeMismatch {
                site: site.to_string(),
                message: format!("expected an object, found {other:?}"),
            }),
            None => Err(RuntimeError::StackUnderflow(site.to_string())),
        }
    }

    fn static_class(
        &self,
        field: &FieldRef,
        from: &Arc<RuntimeClass>,
        depth: usize,
    ) -> Result<Arc<RuntimeClass>, RuntimeError> {
        let owner = self.load_class(&ClassLoadRequest::new(field.owner.clone(), from.layer))?;
        self.initialize(&owner, depth)?;
        self.static_owner(&owner, &field.name)
    }
}

fn with_receiver(receiver: &ObjectRef, args: Vec<Value>) -> Vec<Value> {
    let mut full = Vec::with_capacity(args.len() + 1);
    full.push(Value::Object(receiver.clone()));
    full.extend(args);
    full
}

fn no_such_field(field: &FieldRef) -> RuntimeError {
    RuntimeError::NoSuchField {
        owner: field.owner.clone(),
        name: field.name.clone(),
    }
}
