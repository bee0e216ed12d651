//! Binary compatibility verification.
//!
//! Code compiled against the untransformed class must still link against
//! the transformed one. Concretely, the transformed class keeps its name,
//! super class and interfaces, stays public if it was, and keeps every public
//! or protected member with the same descriptor, the same static-ness and at
//! least the same visibility.

use graft_classfile::{ClassAccess, ClassFile};
use graft_launch::TransformError;

/// Compares `transformed` against `original`.
///
/// # Errors
///
/// [`TransformError::CompatibilityViolation`] listing every violation found.
pub fn check_compatibility(original: &ClassFile, transformed: &ClassFile) -> Result<(), TransformError> {
    let violations = violations(original, transformed);
    if violations.is_empty() {
        Ok(())
    } else {
        Err(TransformError::CompatibilityViolation {
            class: original.name.clone(),
            violations,
        })
    }
}

fn violations(original: &ClassFile, transformed: &ClassFile) -> Vec<String> {
    let mut found = Vec::new();

    if original.name != transformed.name {
        found.push(format!("class renamed to {}", transformed.name));
    }
    if original.super_name != transformed.super_name {
        found.push(format!(
            "super class changed from {:?} to {:?}",
            original.super_name, transformed.super_name
        ));
    }
    if original.access.contains(ClassAccess::PUBLIC) && !transformed.access.contains(ClassAccess::PUBLIC) {
        found.push("class is no longer public".to_string());
    }
    if original.is_interface() != transformed.is_interface() {
        found.push("class kind changed between class and interface".to_string());
    }
    for interface in &original.interfaces {
        if !transformed.implements(interface) {
            found.push(format!("interface {interface} removed"));
        }
    }

    for field in original.fields.iter().filter(|f| f.access.is_exported()) {
        match transformed.field(&field.name) {
            None => found.push(format!("field {} removed", field.name)),
            Some(now) => {
                if now.descriptor != field.descriptor {
                    found.push(format!(
                        "field {} changed type from {} to {}",
                        field.name, field.descriptor, now.descriptor
                    ));
                }
                if now.is_static() != field.is_static() {
                    found.push(format!("field {} changed static-ness", field.name));
                }
                if now.access.visibility() < field.access.visibility() {
                    found.push(format!("field {} lost visibility", field.name));
                }
            }
        }
    }

    for method in original.methods.iter().filter(|m| m.access.is_exported()) {
        let sig = format!("{}{}", method.name, method.descriptor);
        match transformed.method(&method.name, &method.descriptor) {
            None => found.push(format!("method {sig} removed")),
            Some(now) => {
                if now.is_static() != method.is_static() {
                    found.push(format!("method {sig} changed static-ness"));
                }
                if now.access.visibility() < method.access.visibility() {
                    found.push(format!("method {sig} lost visibility"));
                }
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use graft_classfile::{Field, MemberAccess, Method};

    fn original() -> ClassFile {
        ClassFile::new("a/T")
            .with_field(Field::new(MemberAccess::PUBLIC, "count", "I"))
            .with_field(Field::new(MemberAccess::PRIVATE, "hidden", "I"))
            .with_method(Method::new(MemberAccess::PROTECTED, "tick", "()V", None))
    }

    #[test]
    fn test_additions_are_compatible() {
        let mut transformed = original()
            .with_field(Field::new(MemberAccess::PRIVATE, "added", "J"))
            .with_method(Method::new(MemberAccess::PUBLIC, "extra", "()V", None));
        transformed.interfaces.push("a/Extra".into());
        transformed.fields.retain(|f| f.name != "hidden");
        assert!(check_compatibility(&original(), &transformed).is_ok());
    }

    #[test]
    fn test_all_violations_are_listed() {
        let mut transformed = original();
        transformed.super_name = Some("a/Other".into());
        transformed.fields[0].descriptor = "J".into();
        transformed.methods[0].access = MemberAccess::PRIVATE;

        let err = check_compatibility(&original(), &transformed).unwrap_err();
        let TransformError::CompatibilityViolation { class, violations } = err else {
            panic!("expected a compatibility violation");
        };
        assert_eq!(class, "a/T");
        assert_eq!(violations.len(), 3);
        assert!(violations[2].contains("tick()V lost visibility"));
    }
}
