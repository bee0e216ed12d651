//! The typed definition model.
//!
//! Manifests are parsed into these types by the registry. Once built, a
//! definition never changes; plans share them through `Arc`.

use std::cmp::Reverse;
use std::fmt;
use std::path::PathBuf;

use graft_classfile::{is_valid_class_name, is_valid_member_name, FieldRef, MemberAccess, MethodDescriptor, MethodRef};
use regex::Regex;
use serde::{Deserialize, Serialize};
use strum::Display;

/// Priority used when neither the entry nor its manifest declares one.
pub const DEFAULT_PRIORITY: i32 = 1000;

// ============================================================================
// Identity and targeting
// ============================================================================

/// Unique definition identifier of the form `namespace:name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DefinitionId(String);

impl DefinitionId {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self(format!("{namespace}:{name}"))
    }

    /// Parses a qualified id, or qualifies a bare name with `namespace`.
    pub fn resolve(reference: &str, namespace: &str) -> Self {
        if reference.contains(':') {
            Self(reference.to_string())
        } else {
            Self::new(namespace, reference)
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The part after the namespace separator.
    pub fn name(&self) -> &str {
        self.0.split_once(':').map_or(self.0.as_str(), |(_, name)| name)
    }
}

impl fmt::Display for DefinitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which classes a definition applies to.
///
/// Exact internal names match only themselves. Globs use `*` for any run of
/// characters within one package segment and `**` for any run spanning
/// segments, so `net/example/**/Foo*` matches `net/example/a/b/FooBar`.
#[derive(Debug, Clone)]
pub struct TargetPattern {
    raw: String,
    glob: Option<Regex>,
}

impl TargetPattern {
    pub fn parse(raw: &str) -> Result<Self, String> {
        if !raw.contains('*') {
            if !is_valid_class_name(raw) {
                return Err(format!("'{raw}' is not a valid class name"));
            }
            return Ok(Self {
                raw: raw.to_string(),
                glob: None,
            });
        }
        if !is_valid_class_name(&raw.replace('*', "x")) {
            return Err(format!("'{raw}' is not a valid class pattern"));
        }
        if raw.contains("***") {
            return Err(format!("'{raw}' contains an unsupported wildcard run"));
        }

        let mut expr = String::from("^");
        let mut chars = raw.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '*' {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    expr.push_str(".*");
                } else {
                    expr.push_str("[^/]*");
                }
            } else {
                expr.push_str(&regex::escape(c.encode_utf8(&mut [0; 4])));
            }
        }
        expr.push('$');
        let glob = Regex::new(&expr).map_err(|e| format!("'{raw}' is not a valid class pattern: {e}"))?;
        Ok(Self {
            raw: raw.to_string(),
            glob: Some(glob),
        })
    }

    pub fn matches(&self, class_name: &str) -> bool {
        match &self.glob {
            Some(glob) => glob.is_match(class_name),
            None => self.raw == class_name,
        }
    }

    /// The exact class name, if this is not a glob.
    pub fn exact(&self) -> Option<&str> {
        self.glob.is_none().then_some(self.raw.as_str())
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for TargetPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Fixed priority bands. Within a plan, every accessor step precedes every
/// widener step, which precedes every mixin step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
pub enum Band {
    Accessor,
    Widener,
    Mixin,
}

// ============================================================================
// Member references
// ============================================================================

/// A member of some class, named by name and descriptor.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MemberSig {
    pub name: String,
    pub descriptor: String,
}

impl MemberSig {
    pub fn new(name: impl Into<String>, descriptor: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            descriptor: descriptor.into(),
        }
    }

    /// Parses `name(params)ret`.
    pub fn parse_method(text: &str) -> Result<Self, String> {
        let open = text
            .find('(')
            .ok_or_else(|| format!("'{text}' is not a method signature"))?;
        let (name, descriptor) = text.split_at(open);
        if !is_valid_member_name(name, true) {
            return Err(format!("'{name}' is not a valid method name"));
        }
        descriptor
            .parse::<MethodDescriptor>()
            .map_err(|e| format!("bad descriptor in '{text}': {e}"))?;
        Ok(Self::new(name, descriptor))
    }

    /// Parses `name:Descriptor`.
    pub fn parse_field(text: &str) -> Result<Self, String> {
        let (name, descriptor) = text
            .split_once(':')
            .ok_or_else(|| format!("'{text}' is not a field signature"))?;
        if !is_valid_member_name(name, false) {
            return Err(format!("'{name}' is not a valid field name"));
        }
        descriptor
            .parse::<graft_classfile::FieldType>()
            .map_err(|e| format!("bad descriptor in '{text}': {e}"))?;
        Ok(Self::new(name, descriptor))
    }

    /// Parsed method descriptor. Only valid for method signatures.
    pub fn method_descriptor(&self) -> Option<MethodDescriptor> {
        self.descriptor.parse().ok()
    }
}

impl fmt::Display for MemberSig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.descriptor.starts_with('(') {
            write!(f, "{}{}", self.name, self.descriptor)
        } else {
            write!(f, "{}:{}", self.name, self.descriptor)
        }
    }
}

fn split_owner(text: &str) -> Result<(&str, &str), String> {
    let head = text.find(['(', ':']).unwrap_or(text.len());
    let dot = text[..head]
        .rfind('.')
        .ok_or_else(|| format!("'{text}' does not name an owner class"))?;
    let owner = &text[..dot];
    if !is_valid_class_name(owner) {
        return Err(format!("'{owner}' is not a valid class name"));
    }
    Ok((owner, &text[dot + 1..]))
}

/// Parses `owner.name(params)ret`.
pub fn parse_method_ref(text: &str) -> Result<MethodRef, String> {
    let (owner, member) = split_owner(text)?;
    let sig = MemberSig::parse_method(member)?;
    Ok(MethodRef::new(owner, sig.name, sig.descriptor))
}

/// Parses `owner.name:Descriptor`.
pub fn parse_field_ref(text: &str) -> Result<FieldRef, String> {
    let (owner, member) = split_owner(text)?;
    let sig = MemberSig::parse_field(member)?;
    Ok(FieldRef::new(owner, sig.name, sig.descriptor))
}

// ============================================================================
// Mixins
// ============================================================================

/// Direction of a field access join point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FieldAccess {
    Get,
    Put,
}

/// Side of a call or field site an injection lands on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum Shift {
    #[default]
    Before,
    After,
}

/// Where inside a target method an injection happens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum At {
    /// Before the first instruction
    Head,
    /// Before the last return instruction
    Tail,
    /// Before every return instruction
    Return,
    /// At a call site; `ordinal` selects one match, `None` selects all
    Invoke {
        target: MethodRef,
        ordinal: Option<u32>,
        shift: Shift,
    },
    /// At a field access; `ordinal` selects one match, `None` selects all
    Field {
        target: FieldRef,
        access: FieldAccess,
        ordinal: Option<u32>,
        shift: Shift,
    },
}

impl At {
    pub fn is_site(&self) -> bool {
        matches!(self, At::Invoke { .. } | At::Field { .. })
    }

    /// Side of the site to inject on. `Before` for the non-site points.
    pub fn shift(&self) -> Shift {
        match self {
            At::Invoke { shift, .. } | At::Field { shift, .. } => *shift,
            _ => Shift::Before,
        }
    }
}

impl fmt::Display for At {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ordinal = |o: &Option<u32>| o.map(|o| format!("#{o}")).unwrap_or_default();
        let shift = |s: &Shift| match s {
            Shift::Before => "",
            Shift::After => " AFTER",
        };
        match self {
            At::Head => f.write_str("HEAD"),
            At::Tail => f.write_str("TAIL"),
            At::Return => f.write_str("RETURN"),
            At::Invoke {
                target,
                ordinal: o,
                shift: s,
            } => write!(
                f,
                "INVOKE {}.{}{}{}{}",
                target.owner,
                target.name,
                target.descriptor,
                ordinal(o),
                shift(s)
            ),
            At::Field {
                target,
                access,
                ordinal: o,
                shift: s,
            } => write!(
                f,
                "FIELD {} {}.{}:{}{}{}",
                access,
                target.owner,
                target.name,
                target.descriptor,
                ordinal(o),
                shift(s)
            ),
        }
    }
}

/// What an injection does at its join point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InjectionAction {
    /// Call the handler; a cancellable handler returning non-zero makes the
    /// target method return immediately
    Inject { at: At, cancellable: bool },
    /// Replace the call or field access with a call to the handler
    Redirect { at: At },
    /// Replace the whole target method body with the handler body
    Overwrite,
}

/// One join point of a mixin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Injection {
    /// Method of the target class
    pub method: MemberSig,
    /// Method of the mixin class holding the spliced code
    pub handler: MemberSig,
    pub action: InjectionAction,
}

impl Injection {
    /// Human readable join point, used in errors.
    pub fn describe(&self) -> String {
        match &self.action {
            InjectionAction::Inject { at, cancellable } => format!(
                "@Inject({}{}) {} -> {}",
                at,
                if *cancellable { ", cancellable" } else { "" },
                self.method,
                self.handler
            ),
            InjectionAction::Redirect { at } => format!("@Redirect({}) {} -> {}", at, self.method, self.handler),
            InjectionAction::Overwrite => format!("@Overwrite {} <- {}", self.method, self.handler),
        }
    }
}

/// A field a mixin adds to its target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldAddition {
    pub access: MemberAccess,
    pub field: MemberSig,
    /// Mixin method computing the initial value
    pub initializer: Option<MemberSig>,
}

/// The recipe of a mixin definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MixinSpec {
    /// Class in the transformer layer holding handlers and added members
    pub mixin_class: String,
    pub injections: Vec<Injection>,
    /// Interfaces added to the target
    pub interfaces: Vec<String>,
    /// Mixin methods copied into the target under their own names
    pub methods: Vec<MemberSig>,
    pub fields: Vec<FieldAddition>,
}

// ============================================================================
// Accessors
// ============================================================================

/// How a facade method reaches its target member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum AccessorKind {
    Getter,
    Setter,
    Invoker,
}

/// The member a facade method exposes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AccessorMember {
    Field(String),
    Method(MemberSig),
}

impl fmt::Display for AccessorMember {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AccessorMember::Field(name) => write!(f, "field {name}"),
            AccessorMember::Method(sig) => write!(f, "method {sig}"),
        }
    }
}

/// One facade method bound to one member of the target class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorDefinition {
    pub target: String,
    pub facade: String,
    pub facade_method: MemberSig,
    pub member: AccessorMember,
    pub kind: AccessorKind,
    /// Allows setters on final fields
    pub mutable: bool,
}

/// All accessors of one facade interface over one target class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessorSet {
    pub target: String,
    pub facade: String,
    pub accessors: Vec<AccessorDefinition>,
}

// ============================================================================
// Access wideners
// ============================================================================

/// Member or class an access widener rule applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum WidenTarget {
    Class,
    Field(String),
    Method(MemberSig),
}

impl fmt::Display for WidenTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WidenTarget::Class => f.write_str("class"),
            WidenTarget::Field(name) => write!(f, "field {name}"),
            WidenTarget::Method(sig) => write!(f, "method {sig}"),
        }
    }
}

/// Raises access of one member. Never narrows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WidenRule {
    pub target: WidenTarget,
    /// Make public
    pub accessible: bool,
    /// Clear FINAL on a field
    pub mutable: bool,
    /// Clear FINAL on a class or method
    pub extendable: bool,
}

// ============================================================================
// Definitions
// ============================================================================

/// What a definition does to its targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformKind {
    Mixin(MixinSpec),
    Accessor(AccessorSet),
    Widen(Vec<WidenRule>),
}

impl TransformKind {
    pub fn band(&self) -> Band {
        match self {
            TransformKind::Accessor(_) => Band::Accessor,
            TransformKind::Widen(_) => Band::Widener,
            TransformKind::Mixin(_) => Band::Mixin,
        }
    }
}

/// One immutable transformation definition.
#[derive(Debug, Clone)]
pub struct TransformDefinition {
    pub id: DefinitionId,
    /// Classes this definition applies to; any match selects it
    pub targets: Vec<TargetPattern>,
    /// Higher runs first within a band
    pub priority: i32,
    pub band: Band,
    /// Definitions this one must run before
    pub before: Vec<DefinitionId>,
    /// Definitions this one must run after
    pub after: Vec<DefinitionId>,
    /// Global declaration index assigned at discovery
    pub order: usize,
    /// Manifest the definition came from
    pub source: PathBuf,
    pub kind: TransformKind,
}

impl TransformDefinition {
    /// Tie-break key: band, then higher priority, then declaration order.
    pub fn sort_key(&self) -> (Band, Reverse<i32>, usize) {
        (self.band, Reverse(self.priority), self.order)
    }

    pub fn applies_to(&self, class_name: &str) -> bool {
        self.targets.iter().any(|target| target.matches(class_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_pattern() {
        let pattern = TargetPattern::parse("net/example/Foo").unwrap();
        assert!(pattern.matches("net/example/Foo"));
        assert!(!pattern.matches("net/example/FooBar"));
        assert_eq!(pattern.exact(), Some("net/example/Foo"));
    }

    #[test]
    fn test_glob_patterns() {
        let single = TargetPattern::parse("net/example/*Entity").unwrap();
        assert!(single.matches("net/example/LivingEntity"));
        assert!(!single.matches("net/example/mob/LivingEntity"));

        let deep = TargetPattern::parse("net/example/**/Foo*").unwrap();
        assert!(deep.matches("net/example/a/b/FooBar"));
        assert!(!deep.matches("net/other/a/Foo"));
        assert!(deep.exact().is_none());
    }

    #[test]
    fn test_glob_escapes_regex_characters() {
        let pattern = TargetPattern::parse("net/example/Outer$*").unwrap();
        assert!(pattern.matches("net/example/Outer$Inner"));
        assert!(!pattern.matches("net/example/OuterXInner"));
    }

    #[test]
    fn test_invalid_patterns() {
        assert!(TargetPattern::parse("net.example.Foo").is_err());
        assert!(TargetPattern::parse("net//Foo").is_err());
        assert!(TargetPattern::parse("net/***").is_err());
    }

    #[test]
    fn test_member_signatures() {
        let method = MemberSig::parse_method("bar(ILjava/lang/String;)V").unwrap();
        assert_eq!(method.name, "bar");
        assert_eq!(method.descriptor, "(ILjava/lang/String;)V");
        assert_eq!(method.to_string(), "bar(ILjava/lang/String;)V");
        assert!(MemberSig::parse_method("bar").is_err());
        assert!(MemberSig::parse_method("bar(Q)V").is_err());

        let field = MemberSig::parse_field("count:I").unwrap();
        assert_eq!(field.to_string(), "count:I");
        assert!(MemberSig::parse_field("count").is_err());
    }

    #[test]
    fn test_owner_references() {
        let method = parse_method_ref("net/example/Foo.baz(I)I").unwrap();
        assert_eq!(method.owner, "net/example/Foo");
        assert_eq!(method.name, "baz");
        assert_eq!(method.descriptor, "(I)I");

        let field = parse_field_ref("net/example/Foo.count:I").unwrap();
        assert_eq!(field.owner, "net/example/Foo");
        assert_eq!(field.name, "count");

        assert!(parse_method_ref("baz()V").is_err());
    }

    #[test]
    fn test_definition_ids() {
        assert_eq!(DefinitionId::resolve("other", "core").as_str(), "core:other");
        assert_eq!(DefinitionId::resolve("lib:other", "core").as_str(), "lib:other");
        assert_eq!(DefinitionId::new("core", "x").name(), "x");
    }

    #[test]
    fn test_bands_order_accessors_first() {
        assert!(Band::Accessor < Band::Widener);
        assert!(Band::Widener < Band::Mixin);
    }
}
