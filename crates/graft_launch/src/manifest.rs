//! The on-disk manifest format.
//!
//! A manifest is a JSON document named `*.graft.json`. It is produced by
//! external tooling and read here without interpretation; the registry turns
//! it into the typed model and validates it.
//!
//! ```json
//! {
//!   "namespace": "example",
//!   "priority": 1000,
//!   "mixins": [{
//!     "name": "foo_logging",
//!     "mixin": "net/example/mixin/FooMixin",
//!     "targets": ["net/example/Foo"],
//!     "priority": 10,
//!     "after": ["core:base"],
//!     "injections": [
//!       { "kind": "inject", "method": "bar()V", "handler": "onBar()V", "at": { "type": "head" } }
//!     ]
//!   }],
//!   "accessors": [{
//!     "name": "counter",
//!     "target": "net/example/Counter",
//!     "facade": "net/example/access/CounterAccess",
//!     "members": [{ "method": "getCount()I", "kind": "getter", "field": "count" }]
//!   }]
//! }
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::definition::{AccessorKind, FieldAccess, Shift};

/// File name suffix of manifests.
pub const MANIFEST_SUFFIX: &str = ".graft.json";

/// Whether `path` names a manifest file.
pub fn is_manifest(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.ends_with(MANIFEST_SUFFIX))
}

/// Root of a manifest document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub namespace: String,
    /// Default priority of the entries in this manifest
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub mixins: Vec<MixinEntry>,
    #[serde(default)]
    pub accessors: Vec<AccessorEntry>,
    #[serde(default)]
    pub wideners: Vec<WidenerEntry>,
}

/// Ordering fields shared by every entry kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Ordering {
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub before: Vec<String>,
    #[serde(default)]
    pub after: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MixinEntry {
    pub name: String,
    /// Mixin class holding handlers and added members
    pub mixin: String,
    /// Target class names or patterns
    pub targets: Vec<String>,
    #[serde(flatten)]
    pub ordering: Ordering,
    #[serde(default)]
    pub injections: Vec<InjectionEntry>,
    #[serde(default)]
    pub interfaces: Vec<String>,
    /// Mixin methods copied into the target, as `name(desc)ret`
    #[serde(default)]
    pub add_methods: Vec<String>,
    #[serde(default)]
    pub add_fields: Vec<FieldEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum InjectionEntry {
    Inject {
        method: String,
        handler: String,
        at: AtEntry,
        #[serde(default)]
        cancellable: bool,
    },
    Redirect {
        method: String,
        handler: String,
        at: AtEntry,
    },
    Overwrite {
        method: String,
        handler: String,
    },
}

impl InjectionEntry {
    pub fn method(&self) -> &str {
        match self {
            InjectionEntry::Inject { method, .. }
            | InjectionEntry::Redirect { method, .. }
            | InjectionEntry::Overwrite { method, .. } => method,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AtEntry {
    Head,
    Tail,
    Return,
    /// `target` is `owner.name(desc)ret`; `shift` defaults to `before`
    Invoke {
        target: String,
        #[serde(default)]
        ordinal: Option<u32>,
        #[serde(default)]
        shift: Shift,
    },
    /// `target` is `owner.name:Desc`
    Field {
        target: String,
        access: FieldAccess,
        #[serde(default)]
        ordinal: Option<u32>,
        #[serde(default)]
        shift: Shift,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldEntry {
    /// `name:Desc`
    pub field: String,
    /// Access flags by name: `public`, `private`, `protected`, `static`, `final`
    #[serde(default)]
    pub access: Vec<String>,
    /// Mixin method computing the initial value, `name(desc)ret`
    #[serde(default)]
    pub initializer: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccessorEntry {
    pub name: String,
    /// Exact target class
    pub target: String,
    /// Facade interface
    pub facade: String,
    #[serde(flatten)]
    pub ordering: Ordering,
    pub members: Vec<AccessorMemberEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AccessorMemberEntry {
    /// Facade method, `name(desc)ret`
    pub method: String,
    pub kind: AccessorKind,
    /// Target field name, for getters and setters
    #[serde(default)]
    pub field: Option<String>,
    /// Target method `name(desc)ret`, for invokers
    #[serde(default)]
    pub target_method: Option<String>,
    #[serde(default)]
    pub mutable: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidenerEntry {
    pub name: String,
    pub targets: Vec<String>,
    #[serde(flatten)]
    pub ordering: Ordering,
    pub rules: Vec<WidenRuleEntry>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WidenRuleEntry {
    /// Field name; omit both `field` and `method` to widen the class itself
    #[serde(default)]
    pub field: Option<String>,
    /// Method `name(desc)ret`
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub accessible: bool,
    #[serde(default)]
    pub mutable: bool,
    #[serde(default)]
    pub extendable: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_manifest() {
        let json = r#"{
            "namespace": "example",
            "priority": 500,
            "mixins": [{
                "name": "foo",
                "mixin": "net/example/mixin/FooMixin",
                "targets": ["net/example/Foo"],
                "priority": 10,
                "before": ["other"],
                "injections": [
                    { "kind": "inject", "method": "bar()V", "handler": "onBar()Z",
                      "at": { "type": "head" }, "cancellable": true },
                    { "kind": "redirect", "method": "bar()V", "handler": "redirectBaz(Lnet/example/Foo;)V",
                      "at": { "type": "invoke", "target": "net/example/Foo.baz()V", "ordinal": 0 } },
                    { "kind": "overwrite", "method": "qux()I", "handler": "qux()I" },
                    { "kind": "inject", "method": "bar()V", "handler": "afterBaz()V",
                      "at": { "type": "invoke", "target": "net/example/Foo.baz()V", "shift": "after" } }
                ],
                "add_fields": [{ "field": "ticks:I", "access": ["private"], "initializer": "initTicks()I" }]
            }],
            "accessors": [{
                "name": "counter",
                "target": "net/example/Counter",
                "facade": "net/example/access/CounterAccess",
                "members": [{ "method": "getCount()I", "kind": "getter", "field": "count" }]
            }],
            "wideners": [{
                "name": "open",
                "targets": ["net/example/Foo"],
                "rules": [{ "field": "secret", "accessible": true }]
            }]
        }"#;

        let manifest: Manifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.namespace, "example");
        assert_eq!(manifest.priority, Some(500));

        let mixin = &manifest.mixins[0];
        assert_eq!(mixin.ordering.priority, Some(10));
        assert_eq!(mixin.ordering.before, vec!["other".to_string()]);
        assert_eq!(mixin.injections.len(), 4);
        assert!(matches!(
            &mixin.injections[0],
            InjectionEntry::Inject { cancellable: true, at: AtEntry::Head, .. }
        ));
        assert!(matches!(
            &mixin.injections[1],
            InjectionEntry::Redirect { at: AtEntry::Invoke { ordinal: Some(0), .. }, .. }
        ));
        assert_eq!(mixin.injections[2].method(), "qux()I");
        assert!(matches!(
            &mixin.injections[1],
            InjectionEntry::Redirect { at: AtEntry::Invoke { shift: Shift::Before, .. }, .. }
        ));
        assert!(matches!(
            &mixin.injections[3],
            InjectionEntry::Inject { at: AtEntry::Invoke { shift: Shift::After, ordinal: None, .. }, .. }
        ));

        assert_eq!(manifest.accessors[0].members[0].kind, AccessorKind::Getter);
        assert_eq!(manifest.wideners[0].rules[0].field.as_deref(), Some("secret"));
    }

    #[test]
    fn test_unknown_injection_kind_is_rejected() {
        let json = r#"{ "namespace": "x", "mixins": [{ "name": "m", "mixin": "a/M", "targets": ["a/B"],
            "injections": [{ "kind": "teleport", "method": "a()V", "handler": "b()V" }] }] }"#;
        assert!(serde_json::from_str::<Manifest>(json).is_err());
    }

    #[test]
    fn test_manifest_file_names() {
        assert!(is_manifest(Path::new("defs/core.graft.json")));
        assert!(!is_manifest(Path::new("defs/core.json")));
        assert!(!is_manifest(Path::new("defs")));
    }
}
