//! Join point location and code splicing.
//!
//! Injected code runs in plan order. A later step injecting at the same join
//! point is therefore placed after the code of earlier steps: right before a
//! call, field or return site, after the head code injected so far for
//! `Head`, and after the code already following a site for `Shift::After`.
//!
//! Join points only ever match original instructions. [`Provenance`] marks
//! every instruction spliced in by a step, so the early exit of a cancellable
//! injection is never taken for a return of the target method and a handler
//! call is never taken for a call site.

use std::collections::HashMap;

use graft_classfile::{ClassFile, Code, Instruction, InvokeKind, MethodDescriptor, MethodRef};
use graft_launch::{redirect_shapes, At, FieldAccess, Injection, InjectionAction, Shift, TransformError};

use crate::mixin::{invalid_handler, mismatch, MixinStep, Renames};

/// Injected-instruction masks, keyed by method name and descriptor.
///
/// Methods without a mask consist of original instructions only.
#[derive(Debug, Default)]
pub(crate) struct Provenance(HashMap<(String, String), Vec<bool>>);

impl Provenance {
    fn key(name: &str, descriptor: &str) -> (String, String) {
        (name.to_string(), descriptor.to_string())
    }

    /// Mask of `len` entries where `true` marks injected instructions.
    pub fn injected(&self, name: &str, descriptor: &str, len: usize) -> Vec<bool> {
        self.0
            .get(&Self::key(name, descriptor))
            .cloned()
            .unwrap_or_else(|| vec![false; len])
    }

    /// Inserts `sequence` at `at` and marks it as injected.
    pub fn splice(&mut self, name: &str, descriptor: &str, code: &mut Code, at: usize, sequence: Vec<Instruction>) {
        let len = code.instructions.len();
        let mask = self
            .0
            .entry(Self::key(name, descriptor))
            .or_insert_with(|| vec![false; len]);
        let added = sequence.len();
        code.instructions.splice(at..at, sequence);
        mask.splice(at..at, std::iter::repeat(true).take(added));
    }

    /// Forgets the marks of a method whose body was replaced.
    pub fn reset(&mut self, name: &str, descriptor: &str) {
        self.0.remove(&Self::key(name, descriptor));
    }
}

/// Applies one injection of a mixin step.
pub(crate) fn apply(
    step: &MixinStep<'_>,
    class: &mut ClassFile,
    injection: &Injection,
    renames: &Renames,
    provenance: &mut Provenance,
) -> Result<(), TransformError> {
    let join_point = injection.describe();
    let target = &injection.method;
    let class_name = class.name.clone();
    let fail = |reason: String| mismatch(step.id, &class_name, join_point.as_str(), reason);

    let index = class
        .method_index(&target.name, &target.descriptor)
        .ok_or_else(|| fail(format!("{class_name} declares no method {target}")))?;

    if let InjectionAction::Overwrite = injection.action {
        let handler = step.handler(&injection.handler)?;
        let method = &class.methods[index];
        if handler.descriptor != method.descriptor || handler.is_static() != method.is_static() {
            return Err(invalid_handler(
                step.id,
                &injection.handler,
                format!("must have the descriptor and static-ness of {target}"),
            ));
        }
        let code = handler.code.as_ref().map(|code| step.retarget(code, &class_name, renames));
        class.methods[index].code = code;
        provenance.reset(&target.name, &target.descriptor);
        return Ok(());
    }

    let handler = step.handler(&injection.handler)?;
    let handler_static = handler.is_static();
    let copy = MethodRef::new(&class_name, &renames[&injection.handler], &injection.handler.descriptor);
    let method = &mut class.methods[index];
    let target_static = method.is_static();
    let code = method
        .code
        .as_mut()
        .ok_or_else(|| fail(format!("{target} has no body")))?;
    let injected = provenance.injected(&target.name, &target.descriptor, code.instructions.len());

    match &injection.action {
        InjectionAction::Inject { at, cancellable } => {
            if target_static && !handler_static {
                return Err(invalid_handler(
                    step.id,
                    &injection.handler,
                    format!("an instance handler cannot be injected into static {target}"),
                ));
            }
            let params = target
                .method_descriptor()
                .map(|desc| desc.params.len())
                .unwrap_or(0);
            let call = handler_call(&copy, handler_static, target_static, params);

            let sites = select(locate(code, at, &injected), at, &fail)?;
            for site in sites.into_iter().rev() {
                let position = insertion_point(site, at.shift(), &injected);
                let mut sequence = call.clone();
                if *cancellable {
                    let resume = code.max_label().map_or(0, |label| label + 1);
                    sequence.extend([Instruction::IfZero(resume), Instruction::Return, Instruction::Label(resume)]);
                }
                provenance.splice(&target.name, &target.descriptor, code, position, sequence);
            }
        }
        InjectionAction::Redirect { at } => {
            if !handler_static {
                return Err(invalid_handler(step.id, &injection.handler, "redirect handlers must be static"));
            }
            let (instance_shape, static_shape) =
                redirect_shapes(at).ok_or_else(|| fail(format!("{at} is not a call or field site")))?;
            let handler_desc: Option<MethodDescriptor> = injection.handler.method_descriptor();

            for site in select(locate(code, at, &injected), at, &fail)? {
                let expected = if is_static_site(&code.instructions[site]) {
                    &static_shape
                } else {
                    &instance_shape
                };
                if handler_desc.as_ref() != Some(expected) {
                    return Err(invalid_handler(
                        step.id,
                        &injection.handler,
                        format!("must have descriptor {expected} to replace {at}"),
                    ));
                }
                code.instructions[site] = Instruction::Invoke(InvokeKind::Static, copy.clone());
            }
        }
        InjectionAction::Overwrite => {}
    }
    Ok(())
}

/// Instructions calling the handler copy with the target's arguments.
fn handler_call(copy: &MethodRef, handler_static: bool, target_static: bool, params: usize) -> Vec<Instruction> {
    let first = if target_static { 0 } else { 1 };
    let mut call = Vec::with_capacity(params + 2);
    if !handler_static {
        call.push(Instruction::Load(0));
    }
    call.extend((0..params).map(|i| Instruction::Load((first + i) as u16)));
    let kind = if handler_static {
        InvokeKind::Static
    } else {
        InvokeKind::Special
    };
    call.push(Instruction::Invoke(kind, copy.clone()));
    call
}

/// Index to splice at for `site`. After a site, code injected there by
/// earlier steps is skipped.
fn insertion_point(site: usize, shift: Shift, injected: &[bool]) -> usize {
    match shift {
        Shift::Before => site,
        Shift::After => {
            let behind = injected.get(site + 1..).unwrap_or_default();
            site + 1 + behind.iter().take_while(|marked| **marked).count()
        }
    }
}

fn is_static_site(insn: &Instruction) -> bool {
    matches!(
        insn,
        Instruction::Invoke(InvokeKind::Static, _) | Instruction::GetStatic(_) | Instruction::PutStatic(_)
    )
}

/// Every original instruction matching `at`, in code order. `Head` is the
/// first instruction after the head code already injected.
fn locate(code: &Code, at: &At, injected: &[bool]) -> Vec<usize> {
    let instructions = &code.instructions;
    match at {
        At::Head => vec![injected.iter().take_while(|marked| **marked).count()],
        At::Tail => matching(instructions, injected, Instruction::is_return)
            .last()
            .copied()
            .into_iter()
            .collect(),
        At::Return => matching(instructions, injected, Instruction::is_return),
        At::Invoke { target, .. } => matching(instructions, injected, |insn| {
            matches!(insn, Instruction::Invoke(_, r) if r == target)
        }),
        At::Field { target, access, .. } => matching(instructions, injected, |insn| match (insn, access) {
            (Instruction::GetField(r) | Instruction::GetStatic(r), FieldAccess::Get) => r == target,
            (Instruction::PutField(r) | Instruction::PutStatic(r), FieldAccess::Put) => r == target,
            _ => false,
        }),
    }
}

fn matching(instructions: &[Instruction], injected: &[bool], pred: impl Fn(&Instruction) -> bool) -> Vec<usize> {
    instructions
        .iter()
        .enumerate()
        .filter(|(i, insn)| !injected.get(*i).copied().unwrap_or(false) && pred(*insn))
        .map(|(i, _)| i)
        .collect()
}

/// Applies the ordinal of `at` to the candidates. `None` selects them all.
fn select(
    candidates: Vec<usize>,
    at: &At,
    fail: &dyn Fn(String) -> TransformError,
) -> Result<Vec<usize>, TransformError> {
    let ordinal = match at {
        At::Invoke { ordinal, .. } | At::Field { ordinal, .. } => *ordinal,
        _ => None,
    };
    if candidates.is_empty() {
        return Err(fail(format!("no {at} site found")));
    }
    match ordinal {
        None => Ok(candidates),
        Some(n) => candidates
            .get(n as usize)
            .map(|&site| vec![site])
            .ok_or_else(|| fail(format!("ordinal {n} out of range, {} site(s) found", candidates.len()))),
    }
}
