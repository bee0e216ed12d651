//! # Graft Accessor
//!
//! Generates accessor facades. A facade is an interface owned by a plugin;
//! for every facade method the target class receives one public method that
//! reads or writes a field, or invokes a method, directly:
//!
//! | kind    | facade shape | generated body                         |
//! |---------|--------------|----------------------------------------|
//! | getter  | `()T`        | `GetField`/`GetStatic`, return         |
//! | setter  | `(T)V`       | `PutField`/`PutStatic`, return         |
//! | invoker | target's     | `Invoke Special`/`Virtual`/`Static`    |
//!
//! Plugins then cast an instance of the target to the facade and call
//! through it, with no reflection involved. Accessors only add methods and
//! the facade interface; they never add state.

use graft_classfile::{
    ClassFile, Code, FieldRef, Instruction, InvokeKind, MemberAccess, Method, MethodDescriptor, MethodRef,
    STATIC_INIT_NAME,
};
use graft_launch::{
    AccessorDefinition, AccessorKind, AccessorMember, AccessorSet, DefinitionId, TargetMismatchError,
    TransformError,
};
use tracing::debug;

/// Adds the facade interface and one method per accessor to `target`.
///
/// # Arguments
///
/// * `id` - The definition the accessors belong to, used in errors
/// * `accessors` - The facade and its accessor methods
/// * `target` - The class being transformed
///
/// # Returns
///
/// The class with the facade implemented.
///
/// # Errors
///
/// [`TransformError::TargetMismatch`] when a target member is missing, its
/// descriptor disagrees with the facade method, a setter targets a final
/// field without `mutable`, or the facade method already exists.
pub fn generate(id: &DefinitionId, accessors: &AccessorSet, mut target: ClassFile) -> Result<ClassFile, TransformError> {
    if accessors.target != target.name {
        return Err(mismatch(
            id,
            &target.name,
            &accessors.facade,
            format!("accessor set targets {}", accessors.target),
        ));
    }

    for accessor in &accessors.accessors {
        let method = accessor_method(id, &mut target, accessor)?;
        debug!(
            "Generated {} {} on {} for {}",
            accessor.kind, accessor.facade_method, target.name, accessor.member
        );
        target.methods.push(method);
    }
    if !target.implements(&accessors.facade) {
        target.interfaces.push(accessors.facade.clone());
    }
    Ok(target)
}

fn mismatch(id: &DefinitionId, class: &str, join_point: &str, reason: String) -> TransformError {
    TargetMismatchError {
        class: class.to_string(),
        definition: id.clone(),
        join_point: join_point.to_string(),
        reason,
    }
    .into()
}

fn accessor_method(
    id: &DefinitionId,
    class: &mut ClassFile,
    accessor: &AccessorDefinition,
) -> Result<Method, TransformError> {
    let join_point = format!("{}.{}", accessor.facade, accessor.facade_method);
    let owner = class.name.clone();
    let fail = |reason: String| mismatch(id, &owner, &join_point, reason);

    let facade = &accessor.facade_method;
    if class.method(&facade.name, &facade.descriptor).is_some() {
        return Err(fail(format!("{owner} already declares {facade}")));
    }
    let desc = facade
        .method_descriptor()
        .ok_or_else(|| fail(format!("unparsable descriptor {}", facade.descriptor)))?;

    let code = match (&accessor.member, accessor.kind) {
        (AccessorMember::Field(name), kind @ (AccessorKind::Getter | AccessorKind::Setter)) => {
            let field = class.field_mut(name).ok_or_else(|| fail(format!("no field {name}")))?;
            let field_ref = FieldRef::new(&owner, name, &field.descriptor);
            if kind == AccessorKind::Getter {
                let expected = format!("(){}", field.descriptor);
                if facade.descriptor != expected {
                    return Err(fail(format!("getter must be {expected} for field {name}")));
                }
                getter_body(field.is_static(), field_ref)
            } else {
                let expected = format!("({})V", field.descriptor);
                if facade.descriptor != expected {
                    return Err(fail(format!("setter must be {expected} for field {name}")));
                }
                if field.access.contains(MemberAccess::FINAL) {
                    if !accessor.mutable {
                        return Err(fail(format!("field {name} is final; the setter must be declared mutable")));
                    }
                    field.access.remove(MemberAccess::FINAL);
                }
                setter_body(field.is_static(), field_ref)
            }
        }
        (AccessorMember::Method(sig), AccessorKind::Invoker) => {
            let method = class
                .method(&sig.name, &sig.descriptor)
                .ok_or_else(|| fail(format!("no method {sig}")))?;
            if method.is_constructor() || method.name == STATIC_INIT_NAME {
                return Err(fail(format!("{sig} cannot be invoked through an accessor")));
            }
            if facade.descriptor != sig.descriptor {
                return Err(fail(format!("invoker must have the descriptor of {sig}")));
            }
            invoker_body(&owner, method, &desc)
        }
        (member, kind) => return Err(fail(format!("{kind} accessor cannot target {member}"))),
    };

    Ok(Method::new(MemberAccess::PUBLIC, &facade.name, &facade.descriptor, Some(code)))
}

fn getter_body(is_static: bool, field: FieldRef) -> Code {
    let instructions = if is_static {
        vec![Instruction::GetStatic(field), Instruction::ReturnValue]
    } else {
        vec![Instruction::Load(0), Instruction::GetField(field), Instruction::ReturnValue]
    };
    Code::new(1, instructions)
}

fn setter_body(is_static: bool, field: FieldRef) -> Code {
    let instructions = if is_static {
        vec![Instruction::Load(1), Instruction::PutStatic(field), Instruction::Return]
    } else {
        vec![
            Instruction::Load(0),
            Instruction::Load(1),
            Instruction::PutField(field),
            Instruction::Return,
        ]
    };
    Code::new(2, instructions)
}

/// Forwards the facade arguments, shifted past the receiver slot.
fn invoker_body(owner: &str, method: &Method, desc: &MethodDescriptor) -> Code {
    let params = desc.params.len() as u16;
    let target = MethodRef::new(owner, &method.name, &method.descriptor);
    let mut instructions = Vec::new();
    let kind = if method.is_static() {
        InvokeKind::Static
    } else {
        instructions.push(Instruction::Load(0));
        if method.access.contains(MemberAccess::PRIVATE) {
            InvokeKind::Special
        } else {
            InvokeKind::Virtual
        }
    };
    instructions.extend((1..=params).map(Instruction::Load));
    instructions.push(Instruction::Invoke(kind, target));
    instructions.push(if desc.is_void() {
        Instruction::Return
    } else {
        Instruction::ReturnValue
    });
    Code::new(params + 1, instructions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_bootstrap::{Layer, MemoryClassSource, Runtime, Value};
    use graft_classfile::{Constant, Field};
    use graft_launch::MemberSig;

    fn counter() -> ClassFile {
        ClassFile::new("net/example/Counter")
            .with_field(Field::new(MemberAccess::PRIVATE, "count", "I"))
            .with_field(Field::new(MemberAccess::PRIVATE | MemberAccess::FINAL, "limit", "I"))
            .with_field(Field::new(MemberAccess::PRIVATE | MemberAccess::STATIC, "created", "I"))
            .with_method(Method::new(
                MemberAccess::PUBLIC,
                "<init>",
                "()V",
                Some(Code::new(
                    1,
                    vec![
                        Instruction::Load(0),
                        Instruction::Invoke(InvokeKind::Special, MethodRef::new("java/lang/Object", "<init>", "()V")),
                        Instruction::Load(0),
                        Instruction::Push(Constant::Int(7)),
                        Instruction::PutField(FieldRef::new("net/example/Counter", "count", "I")),
                        Instruction::Return,
                    ],
                )),
            ))
            .with_method(Method::new(
                MemberAccess::PRIVATE,
                "scaled",
                "(I)I",
                Some(Code::new(
                    2,
                    vec![
                        Instruction::Load(0),
                        Instruction::GetField(FieldRef::new("net/example/Counter", "count", "I")),
                        Instruction::Load(1),
                        Instruction::Mul,
                        Instruction::ReturnValue,
                    ],
                )),
            ))
    }

    fn accessor(method: &str, kind: AccessorKind, member: AccessorMember, mutable: bool) -> AccessorDefinition {
        AccessorDefinition {
            target: "net/example/Counter".into(),
            facade: "net/example/access/CounterAccess".into(),
            facade_method: MemberSig::parse_method(method).unwrap(),
            member,
            kind,
            mutable,
        }
    }

    fn set(accessors: Vec<AccessorDefinition>) -> AccessorSet {
        AccessorSet {
            target: "net/example/Counter".into(),
            facade: "net/example/access/CounterAccess".into(),
            accessors,
        }
    }

    fn id() -> DefinitionId {
        DefinitionId::new("test", "counter")
    }

    #[test]
    fn test_getter_reads_private_field_at_runtime() {
        let accessors = set(vec![
            accessor("getCount()I", AccessorKind::Getter, AccessorMember::Field("count".into()), false),
            accessor("setCount(I)V", AccessorKind::Setter, AccessorMember::Field("count".into()), false),
            accessor(
                "callScaled(I)I",
                AccessorKind::Invoker,
                AccessorMember::Method(MemberSig::parse_method("scaled(I)I").unwrap()),
                false,
            ),
        ]);
        let generated = generate(&id(), &accessors, counter()).unwrap();
        assert!(generated.implements("net/example/access/CounterAccess"));
        assert_eq!(generated.fields.len(), 3);

        let facade_class = ClassFile::new_interface("net/example/access/CounterAccess");
        let runtime = Runtime::builder()
            .source(Layer::Host, MemoryClassSource::new("host").with_class(&generated).unwrap())
            .source(
                Layer::Accessor,
                MemoryClassSource::new("accessors").with_class(&facade_class).unwrap(),
            )
            .build();
        let counter = runtime.new_object(Layer::Host, "net/example/Counter", "()V", Vec::new()).unwrap();
        let facade = "net/example/access/CounterAccess";

        let count = runtime
            .invoke_interface(Layer::Host, facade, &counter, "getCount", "()I", Vec::new())
            .unwrap();
        assert_eq!(count, Some(Value::Int(7)));

        runtime
            .invoke_interface(Layer::Host, facade, &counter, "setCount", "(I)V", vec![Value::Int(3)])
            .unwrap();
        let scaled = runtime
            .invoke_interface(Layer::Host, facade, &counter, "callScaled", "(I)I", vec![Value::Int(5)])
            .unwrap();
        assert_eq!(scaled, Some(Value::Int(15)));
    }

    #[test]
    fn test_static_getter() {
        let accessors = set(vec![accessor(
            "getCreated()I",
            AccessorKind::Getter,
            AccessorMember::Field("created".into()),
            false,
        )]);
        let generated = generate(&id(), &accessors, counter()).unwrap();
        let method = generated.method("getCreated", "()I").unwrap();
        let code = method.code.as_ref().unwrap();
        assert!(matches!(code.instructions[0], Instruction::GetStatic(_)));
        assert!(!method.is_static());
    }

    #[test]
    fn test_final_setter_requires_mutable() {
        let strict = set(vec![accessor(
            "setLimit(I)V",
            AccessorKind::Setter,
            AccessorMember::Field("limit".into()),
            false,
        )]);
        let err = generate(&id(), &strict, counter()).unwrap_err();
        assert!(matches!(err, TransformError::TargetMismatch(_)));
        assert!(err.to_string().contains("final"));

        let relaxed = set(vec![accessor(
            "setLimit(I)V",
            AccessorKind::Setter,
            AccessorMember::Field("limit".into()),
            true,
        )]);
        let generated = generate(&id(), &relaxed, counter()).unwrap();
        assert!(!generated.field("limit").unwrap().access.contains(MemberAccess::FINAL));
    }

    #[test]
    fn test_descriptor_mismatch() {
        let accessors = set(vec![accessor(
            "getCount()J",
            AccessorKind::Getter,
            AccessorMember::Field("count".into()),
            false,
        )]);
        let err = generate(&id(), &accessors, counter()).unwrap_err();
        let TransformError::TargetMismatch(mismatch) = err else {
            panic!("expected a target mismatch");
        };
        assert_eq!(mismatch.class, "net/example/Counter");
        assert_eq!(mismatch.definition, id());
        assert!(mismatch.join_point.contains("getCount()J"));
    }

    #[test]
    fn test_missing_members() {
        let missing_field = set(vec![accessor(
            "getTotal()I",
            AccessorKind::Getter,
            AccessorMember::Field("total".into()),
            false,
        )]);
        assert!(generate(&id(), &missing_field, counter()).is_err());

        let missing_method = set(vec![accessor(
            "callGone()V",
            AccessorKind::Invoker,
            AccessorMember::Method(MemberSig::parse_method("gone()V").unwrap()),
            false,
        )]);
        assert!(generate(&id(), &missing_method, counter()).is_err());
    }

    #[test]
    fn test_existing_facade_method_collides() {
        let class = counter().with_method(Method::new(MemberAccess::PUBLIC, "getCount", "()I", None));
        let accessors = set(vec![accessor(
            "getCount()I",
            AccessorKind::Getter,
            AccessorMember::Field("count".into()),
            false,
        )]);
        assert!(generate(&id(), &accessors, class).is_err());
    }
}
