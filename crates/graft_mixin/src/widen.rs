//! Access widening steps.

use graft_classfile::{ClassAccess, ClassFile, MemberAccess};
use graft_launch::{DefinitionId, TransformError, WidenRule, WidenTarget};
use tracing::trace;

use crate::mixin::mismatch;

/// Raises access as described by `rules`. Access is never narrowed.
pub(crate) fn apply(id: &DefinitionId, rules: &[WidenRule], class: &mut ClassFile) -> Result<(), TransformError> {
    for rule in rules {
        let join_point = format!("widen {}", rule.target);
        match &rule.target {
            WidenTarget::Class => {
                if rule.accessible {
                    class.access |= ClassAccess::PUBLIC;
                }
                if rule.extendable {
                    class.access.remove(ClassAccess::FINAL);
                }
            }
            WidenTarget::Field(name) => {
                let owner = class.name.clone();
                let field = class
                    .field_mut(name)
                    .ok_or_else(|| mismatch(id, &owner, join_point, format!("{owner} declares no field {name}")))?;
                field.access = widened(field.access, rule.accessible, rule.mutable);
            }
            WidenTarget::Method(sig) => {
                let owner = class.name.clone();
                let method = class
                    .method_mut(&sig.name, &sig.descriptor)
                    .ok_or_else(|| mismatch(id, &owner, join_point, format!("{owner} declares no method {sig}")))?;
                method.access = widened(method.access, rule.accessible, rule.extendable);
            }
        }
        trace!("Widened {} of {}", rule.target, class.name);
    }
    Ok(())
}

fn widened(access: MemberAccess, accessible: bool, clear_final: bool) -> MemberAccess {
    let mut access = if accessible { access.widened_to_public() } else { access };
    if clear_final {
        access.remove(MemberAccess::FINAL);
    }
    access
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_classfile::{Field, Method};
    use graft_launch::MemberSig;

    fn target() -> ClassFile {
        let mut class = ClassFile::new("a/T")
            .with_field(Field::new(MemberAccess::PRIVATE | MemberAccess::FINAL, "secret", "I"))
            .with_method(Method::new(MemberAccess::PROTECTED | MemberAccess::FINAL, "tick", "()V", None));
        class.access |= ClassAccess::FINAL;
        class
    }

    fn rule(target: WidenTarget, accessible: bool, mutable: bool, extendable: bool) -> WidenRule {
        WidenRule {
            target,
            accessible,
            mutable,
            extendable,
        }
    }

    #[test]
    fn test_widen_members_and_class() {
        let mut class = target();
        let rules = vec![
            rule(WidenTarget::Class, false, false, true),
            rule(WidenTarget::Field("secret".into()), true, true, false),
            rule(
                WidenTarget::Method(MemberSig::parse_method("tick()V").unwrap()),
                true,
                false,
                false,
            ),
        ];
        apply(&DefinitionId::new("t", "w"), &rules, &mut class).unwrap();

        assert!(!class.access.contains(ClassAccess::FINAL));
        assert_eq!(class.field("secret").unwrap().access, MemberAccess::PUBLIC);
        assert_eq!(
            class.method("tick", "()V").unwrap().access,
            MemberAccess::PUBLIC | MemberAccess::FINAL
        );
    }

    #[test]
    fn test_missing_member_is_a_mismatch() {
        let mut class = target();
        let rules = vec![rule(WidenTarget::Field("nope".into()), true, false, false)];
        let err = apply(&DefinitionId::new("t", "w"), &rules, &mut class).unwrap_err();
        assert!(matches!(err, TransformError::TargetMismatch(_)));
    }
}
