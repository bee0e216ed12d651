//! Mixin steps: member copying, interfaces and field initializers.
//!
//! Handler methods are copied into the target under `handler$<step>$<name>`
//! so that two mixins using the same handler name never collide, and so the
//! names are the same on every run. Copies are private and synthetic; every
//! reference to the mixin class inside copied code is retargeted to the
//! target class.

use std::collections::HashMap;

use graft_classfile::{
    ClassFile, Code, Field, FieldRef, Instruction, InvokeKind, MemberAccess, Method, MethodRef, CONSTRUCTOR_NAME,
    STATIC_INIT_NAME,
};
use graft_launch::{
    DefinitionId, FieldAddition, InjectionAction, MemberSig, MixinSpec, TargetMismatchError, TransformError,
};
use tracing::trace;

use crate::splice::{self, Provenance};

/// Handler signature to the name of its copy in the target.
pub(crate) type Renames = HashMap<MemberSig, String>;

pub(crate) fn mismatch(id: &DefinitionId, class: &str, join_point: impl Into<String>, reason: String) -> TransformError {
    TargetMismatchError {
        class: class.to_string(),
        definition: id.clone(),
        join_point: join_point.into(),
        reason,
    }
    .into()
}

pub(crate) fn invalid_handler(id: &DefinitionId, handler: &MemberSig, reason: impl Into<String>) -> TransformError {
    TransformError::InvalidHandler {
        definition: id.clone(),
        handler: handler.to_string(),
        reason: reason.into(),
    }
}

/// One mixin definition being applied as step `index` of a plan.
pub(crate) struct MixinStep<'a> {
    pub index: usize,
    pub id: &'a DefinitionId,
    pub spec: &'a MixinSpec,
    pub mixin: &'a ClassFile,
}

impl MixinStep<'_> {
    pub fn apply(&self, class: &mut ClassFile, provenance: &mut Provenance) -> Result<(), TransformError> {
        let renames = self.copy_handlers(class)?;
        self.add_interfaces(class);
        self.add_methods(class, &renames)?;
        for addition in &self.spec.fields {
            self.add_field(class, addition, &renames, provenance)?;
        }
        for injection in &self.spec.injections {
            splice::apply(self, class, injection, &renames, provenance)?;
        }
        Ok(())
    }

    /// The mixin method named by `sig`, which must have a body.
    pub fn handler(&self, sig: &MemberSig) -> Result<&Method, TransformError> {
        let method = self
            .mixin
            .method(&sig.name, &sig.descriptor)
            .ok_or_else(|| invalid_handler(self.id, sig, format!("not declared by {}", self.mixin.name)))?;
        if method.code.is_none() {
            return Err(invalid_handler(self.id, sig, "has no body"));
        }
        Ok(method)
    }

    pub fn copy_name(&self, sig: &MemberSig) -> String {
        format!("handler${}${}", self.index, sig.name)
    }

    /// Mixin code rewritten to run as part of `target`.
    pub fn retarget(&self, code: &Code, target: &str, renames: &Renames) -> Code {
        let mixin = self.mixin.name.as_str();
        let owner = |name: &String| if name == mixin { target.to_string() } else { name.clone() };
        let field = |r: &FieldRef| FieldRef::new(owner(&r.owner), &r.name, &r.descriptor);

        let instructions = code
            .instructions
            .iter()
            .map(|insn| match insn {
                Instruction::GetField(r) => Instruction::GetField(field(r)),
                Instruction::PutField(r) => Instruction::PutField(field(r)),
                Instruction::GetStatic(r) => Instruction::GetStatic(field(r)),
                Instruction::PutStatic(r) => Instruction::PutStatic(field(r)),
                Instruction::New(name) => Instruction::New(owner(name)),
                Instruction::Invoke(kind, r) if r.owner == mixin => {
                    let key = MemberSig::new(&r.name, &r.descriptor);
                    match renames.get(&key) {
                        // Copies are private, so they are never dispatched.
                        Some(copy) => {
                            let kind = match kind {
                                InvokeKind::Static => InvokeKind::Static,
                                _ => InvokeKind::Special,
                            };
                            Instruction::Invoke(kind, MethodRef::new(target, copy, &r.descriptor))
                        }
                        None => Instruction::Invoke(*kind, MethodRef::new(target, &r.name, &r.descriptor)),
                    }
                }
                other => other.clone(),
            })
            .collect();
        Code::new(code.max_locals, instructions)
    }

    fn copy_handlers(&self, class: &mut ClassFile) -> Result<Renames, TransformError> {
        let handlers = self
            .spec
            .injections
            .iter()
            .filter(|injection| !matches!(injection.action, InjectionAction::Overwrite))
            .map(|injection| &injection.handler)
            .chain(self.spec.fields.iter().filter_map(|f| f.initializer.as_ref()));

        let mut renames = Renames::new();
        let mut order = Vec::new();
        for sig in handlers {
            if !renames.contains_key(sig) {
                renames.insert(sig.clone(), self.copy_name(sig));
                order.push(sig);
            }
        }

        for sig in order {
            let source = self.handler(sig)?;
            let name = &renames[sig];
            if class.method(name, &sig.descriptor).is_some() {
                return Err(mismatch(
                    self.id,
                    &class.name,
                    sig.to_string(),
                    format!("{} already declares {}{}", class.name, name, sig.descriptor),
                ));
            }
            let mut access = MemberAccess::PRIVATE | MemberAccess::SYNTHETIC;
            if source.is_static() {
                access |= MemberAccess::STATIC;
            }
            let code = source.code.as_ref().map(|code| self.retarget(code, &class.name, &renames));
            trace!("Copied handler {} to {}.{}", sig, class.name, name);
            class.methods.push(Method::new(access, name, &sig.descriptor, code));
        }
        Ok(renames)
    }

    fn add_interfaces(&self, class: &mut ClassFile) {
        for interface in &self.spec.interfaces {
            if !class.implements(interface) {
                class.interfaces.push(interface.clone());
            }
        }
    }

    fn add_methods(&self, class: &mut ClassFile, renames: &Renames) -> Result<(), TransformError> {
        for sig in &self.spec.methods {
            let source = self.handler(sig)?;
            if class.method(&sig.name, &sig.descriptor).is_some() {
                return Err(mismatch(
                    self.id,
                    &class.name,
                    format!("add method {sig}"),
                    format!("{} already declares {}", class.name, sig),
                ));
            }
            let code = source.code.as_ref().map(|code| self.retarget(code, &class.name, renames));
            class
                .methods
                .push(Method::new(source.access, &sig.name, &sig.descriptor, code));
        }
        Ok(())
    }

    fn add_field(
        &self,
        class: &mut ClassFile,
        addition: &FieldAddition,
        renames: &Renames,
        provenance: &mut Provenance,
    ) -> Result<(), TransformError> {
        let sig = &addition.field;
        let join_point = format!("add field {sig}");
        if class.field(&sig.name).is_some() {
            return Err(mismatch(
                self.id,
                &class.name,
                join_point,
                format!("{} already declares a field named {}", class.name, sig.name),
            ));
        }
        let field = Field::new(addition.access, &sig.name, &sig.descriptor);
        let is_static = field.is_static();
        class.fields.push(field);

        let Some(init) = &addition.initializer else {
            return Ok(());
        };
        let init_static = self.handler(init)?.is_static();
        let call = MethodRef::new(&class.name, &renames[init], &init.descriptor);
        let field_ref = FieldRef::new(&class.name, &sig.name, &sig.descriptor);

        if is_static {
            if !init_static {
                return Err(invalid_handler(self.id, init, "initializer of a static field must be static"));
            }
            append_static_initializer(
                class,
                &[Instruction::Invoke(InvokeKind::Static, call), Instruction::PutStatic(field_ref)],
                provenance,
            );
            return Ok(());
        }

        let mut sequence = vec![Instruction::Load(0)];
        if init_static {
            sequence.push(Instruction::Invoke(InvokeKind::Static, call));
        } else {
            sequence.push(Instruction::Load(0));
            sequence.push(Instruction::Invoke(InvokeKind::Special, call));
        }
        sequence.push(Instruction::PutField(field_ref));
        if append_instance_initializer(class, &sequence, provenance) == 0 {
            return Err(mismatch(
                self.id,
                &class.name,
                join_point,
                "no constructor calls the super constructor".to_string(),
            ));
        }
        Ok(())
    }
}

/// Runs `sequence` before every return of the static initializer, creating
/// the initializer if the class has none.
fn append_static_initializer(class: &mut ClassFile, sequence: &[Instruction], provenance: &mut Provenance) {
    let index = match class.method_index(STATIC_INIT_NAME, "()V") {
        Some(index) => index,
        None => {
            class.methods.push(Method::new(
                MemberAccess::STATIC,
                STATIC_INIT_NAME,
                "()V",
                Some(Code::new(0, vec![Instruction::Return])),
            ));
            class.methods.len() - 1
        }
    };
    let Some(code) = class.methods[index].code.as_mut() else {
        return;
    };
    let injected = provenance.injected(STATIC_INIT_NAME, "()V", code.instructions.len());
    let returns: Vec<usize> = (0..code.instructions.len())
        .filter(|&i| code.instructions[i].is_return() && !injected[i])
        .collect();
    for at in returns.into_iter().rev() {
        provenance.splice(STATIC_INIT_NAME, "()V", code, at, sequence.to_vec());
    }
}

/// Inserts `sequence` after the existing field initializers of every root
/// constructor and returns how many constructors were changed.
///
/// A root constructor calls the super constructor; constructors delegating
/// to `this(...)` reach a root one and are left alone.
fn append_instance_initializer(class: &mut ClassFile, sequence: &[Instruction], provenance: &mut Provenance) -> usize {
    let name = class.name.clone();
    let Some(super_name) = class.super_name.clone() else {
        return 0;
    };

    let mut changed = 0;
    for method in class.methods.iter_mut().filter(|m| m.name == CONSTRUCTOR_NAME) {
        let Some(code) = method.code.as_mut() else {
            continue;
        };
        let first_init = code.instructions.iter().position(|insn| {
            matches!(insn, Instruction::Invoke(InvokeKind::Special, r)
                if r.name == CONSTRUCTOR_NAME && (r.owner == super_name || r.owner == name))
        });
        let Some(call) = first_init else {
            continue;
        };
        if matches!(&code.instructions[call], Instruction::Invoke(_, r) if r.owner == name) {
            continue;
        }
        let at = skip_field_initializers(&code.instructions, call + 1, &name);
        provenance.splice(CONSTRUCTOR_NAME, &method.descriptor, code, at, sequence.to_vec());
        changed += 1;
    }
    changed
}

/// Skips straight-line runs of the form `Load(0) ... PutField(own field)`.
fn skip_field_initializers(instructions: &[Instruction], mut at: usize, owner: &str) -> usize {
    while instructions.get(at) == Some(&Instruction::Load(0)) {
        let end = instructions[at..].iter().position(|insn| {
            matches!(insn, Instruction::PutField(r) if r.owner == owner)
                || matches!(
                    insn,
                    Instruction::Label(_)
                        | Instruction::Goto(_)
                        | Instruction::IfZero(_)
                        | Instruction::IfNonZero(_)
                        | Instruction::Return
                        | Instruction::ReturnValue
                )
        });
        match end.map(|offset| (offset, &instructions[at + offset])) {
            Some((offset, Instruction::PutField(_))) => at += offset + 1,
            _ => break,
        }
    }
    at
}
