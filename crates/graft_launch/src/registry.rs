//! The definition registry.
//!
//! [`discover`] scans search paths for manifests, parses every entry into the
//! typed model and validates it structurally. Discovery is fail-slow: every
//! problem in every manifest is collected, and the caller sees the whole list
//! before aborting. The resulting [`DefinitionSet`] is immutable and shared
//! read-only by the planner.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use graft_classfile::{is_valid_class_name, FieldType, MemberAccess, MethodDescriptor};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::definition::{
    parse_field_ref, parse_method_ref, AccessorDefinition, AccessorKind, AccessorMember, AccessorSet, At, Band,
    FieldAccess, DefinitionId, FieldAddition, Injection, InjectionAction, MemberSig, MixinSpec, Shift,
    TargetPattern, TransformDefinition, TransformKind, WidenRule, WidenTarget, DEFAULT_PRIORITY,
};
use crate::error::{DefinitionError, DiscoveryErrors};
use crate::manifest::{
    is_manifest, AccessorEntry, AccessorMemberEntry, AtEntry, FieldEntry, InjectionEntry, Manifest, MixinEntry, Ordering, WidenerEntry,
};

static NAMESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-z0-9_.\-]+$").unwrap());
static ENTRY_NAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.\-/]+$").unwrap());

/// The immutable set of discovered definitions.
#[derive(Debug, Clone, Default)]
pub struct DefinitionSet {
    definitions: Vec<Arc<TransformDefinition>>,
    manifests: Vec<PathBuf>,
}

impl DefinitionSet {
    /// Builds a set from already validated definitions, keeping their order.
    pub fn from_definitions(definitions: Vec<TransformDefinition>) -> Self {
        Self {
            definitions: definitions.into_iter().map(Arc::new).collect(),
            manifests: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.definitions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.definitions.is_empty()
    }

    /// All definitions in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<TransformDefinition>> {
        self.definitions.iter()
    }

    pub fn get(&self, id: &DefinitionId) -> Option<&Arc<TransformDefinition>> {
        self.definitions.iter().find(|d| &d.id == id)
    }

    /// Definitions whose target matches `class_name`, in declaration order.
    pub fn matching(&self, class_name: &str) -> Vec<Arc<TransformDefinition>> {
        self.definitions
            .iter()
            .filter(|d| d.applies_to(class_name))
            .cloned()
            .collect()
    }

    /// Manifest files the set was read from.
    pub fn manifests(&self) -> &[PathBuf] {
        &self.manifests
    }
}

/// Scans `search_paths` and builds the definition set.
///
/// Each path is either a manifest file or a directory searched recursively
/// for `*.graft.json` files. Files are visited in sorted order so that
/// declaration order, and thus every plan, is reproducible.
///
/// # Errors
///
/// Returns every [`DefinitionError`] found, in discovery order.
pub fn discover(search_paths: &[PathBuf]) -> Result<DefinitionSet, DiscoveryErrors> {
    let mut builder = Builder::default();

    let mut files = Vec::new();
    for path in search_paths {
        match collect_manifests(path) {
            Ok(found) => {
                debug!("Found {} manifest(s) under {}", found.len(), path.display());
                files.extend(found);
            }
            Err(reason) => builder.errors.push(DefinitionError::new(path, "<search path>", reason)),
        }
    }
    let mut seen = HashSet::new();
    files.retain(|file| seen.insert(file.clone()));

    for file in &files {
        match read_manifest(file) {
            Ok(manifest) => builder.add_manifest(file, manifest),
            Err(reason) => builder.errors.push(DefinitionError::new(file, "<manifest>", reason)),
        }
    }
    builder.check_references();

    if !builder.errors.is_empty() {
        warn!("Definition discovery found {} error(s)", builder.errors.len());
        return Err(DiscoveryErrors(builder.errors));
    }

    info!(
        "📜 Discovered {} definition(s) from {} manifest(s)",
        builder.definitions.len(),
        files.len()
    );
    Ok(DefinitionSet {
        definitions: builder.definitions.into_iter().map(Arc::new).collect(),
        manifests: files,
    })
}

fn collect_manifests(path: &Path) -> Result<Vec<PathBuf>, String> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    if !path.is_dir() {
        return Err("search path does not exist".to_string());
    }
    let mut found = Vec::new();
    walk(path, &mut found).map_err(|e| format!("cannot scan directory: {e}"))?;
    found.sort();
    Ok(found)
}

fn walk(dir: &Path, found: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            walk(&path, found)?;
        } else if is_manifest(&path) {
            found.push(path);
        }
    }
    Ok(())
}

fn read_manifest(path: &Path) -> Result<Manifest, String> {
    let content = std::fs::read_to_string(path).map_err(|e| format!("cannot read manifest: {e}"))?;
    serde_json::from_str(&content).map_err(|e| format!("invalid manifest: {e}"))
}

// ============================================================================
// Entry validation
// ============================================================================

#[derive(Default)]
struct Builder {
    definitions: Vec<TransformDefinition>,
    errors: Vec<DefinitionError>,
    ids: HashMap<DefinitionId, PathBuf>,
    /// (target class, facade method) -> claiming definition
    facade_methods: HashMap<(String, MemberSig), DefinitionId>,
}

/// Per-entry error sink; an entry is only added if it produced no errors.
struct EntryCheck<'a> {
    manifest: &'a Path,
    entry: String,
    errors: Vec<DefinitionError>,
}

impl EntryCheck<'_> {
    fn fail(&mut self, reason: impl Into<String>) {
        self.errors
            .push(DefinitionError::new(self.manifest, self.entry.clone(), reason));
    }

    fn check<T>(&mut self, result: Result<T, String>) -> Option<T> {
        match result {
            Ok(value) => Some(value),
            Err(reason) => {
                self.fail(reason);
                None
            }
        }
    }
}

impl Builder {
    fn add_manifest(&mut self, path: &Path, manifest: Manifest) {
        if !NAMESPACE.is_match(&manifest.namespace) {
            self.errors.push(DefinitionError::new(
                path,
                "<manifest>",
                format!("invalid namespace '{}'", manifest.namespace),
            ));
            return;
        }
        let default_priority = manifest.priority.unwrap_or(DEFAULT_PRIORITY);
        let namespace = manifest.namespace.as_str();

        for entry in &manifest.accessors {
            self.add_accessor(path, namespace, default_priority, entry);
        }
        for entry in &manifest.wideners {
            self.add_widener(path, namespace, default_priority, entry);
        }
        for entry in &manifest.mixins {
            self.add_mixin(path, namespace, default_priority, entry);
        }
    }

    fn begin<'a>(&mut self, manifest: &'a Path, namespace: &str, name: &str) -> (DefinitionId, EntryCheck<'a>) {
        let id = DefinitionId::new(namespace, name);
        let mut check = EntryCheck {
            manifest,
            entry: id.to_string(),
            errors: Vec::new(),
        };
        if !ENTRY_NAME.is_match(name) {
            check.fail(format!("invalid entry name '{name}'"));
        }
        if let Some(previous) = self.ids.get(&id) {
            check.fail(format!("duplicate definition id, first declared in {}", previous.display()));
        } else {
            self.ids.insert(id.clone(), manifest.to_path_buf());
        }
        (id, check)
    }

    #[allow(clippy::too_many_arguments)]
    fn finish(
        &mut self,
        id: DefinitionId,
        mut check: EntryCheck<'_>,
        namespace: &str,
        default_priority: i32,
        targets: &[String],
        ordering: &Ordering,
        kind: TransformKind,
    ) {
        let mut patterns = Vec::new();
        if targets.is_empty() {
            check.fail("no targets declared");
        }
        for target in targets {
            if let Some(pattern) = check.check(TargetPattern::parse(target)) {
                patterns.push(pattern);
            }
        }

        if !check.errors.is_empty() {
            self.errors.append(&mut check.errors);
            return;
        }
        let definition = TransformDefinition {
            id,
            targets: patterns,
            priority: ordering.priority.unwrap_or(default_priority),
            band: kind.band(),
            before: ordering.before.iter().map(|r| DefinitionId::resolve(r, namespace)).collect(),
            after: ordering.after.iter().map(|r| DefinitionId::resolve(r, namespace)).collect(),
            order: self.definitions.len(),
            source: check.manifest.to_path_buf(),
            kind,
        };
        debug!("Registered definition {} ({})", definition.id, definition.band);
        self.definitions.push(definition);
    }

    fn add_mixin(&mut self, manifest: &Path, namespace: &str, priority: i32, entry: &MixinEntry) {
        let (id, mut check) = self.begin(manifest, namespace, &entry.name);
        if !is_valid_class_name(&entry.mixin) {
            check.fail(format!("invalid mixin class '{}'", entry.mixin));
        }

        let injections: Vec<Injection> = entry
            .injections
            .iter()
            .enumerate()
            .filter_map(|(index, injection)| {
                let result = parse_injection(injection).map_err(|e| format!("injection #{index}: {e}"));
                check.check(result)
            })
            .collect();

        for interface in &entry.interfaces {
            if !is_valid_class_name(interface) {
                check.fail(format!("invalid interface '{interface}'"));
            }
        }
        let methods: Vec<MemberSig> = entry
            .add_methods
            .iter()
            .filter_map(|m| check.check(MemberSig::parse_method(m)))
            .collect();
        let fields: Vec<FieldAddition> = entry
            .add_fields
            .iter()
            .filter_map(|f| check.check(parse_field_addition(f)))
            .collect();

        let spec = MixinSpec {
            mixin_class: entry.mixin.clone(),
            injections,
            interfaces: entry.interfaces.clone(),
            methods,
            fields,
        };
        self.finish(
            id,
            check,
            namespace,
            priority,
            &entry.targets,
            &entry.ordering,
            TransformKind::Mixin(spec),
        );
    }

    fn add_accessor(&mut self, manifest: &Path, namespace: &str, priority: i32, entry: &AccessorEntry) {
        let (id, mut check) = self.begin(manifest, namespace, &entry.name);
        if entry.target.contains('*') {
            check.fail("accessor targets must name exactly one class");
        }
        if !is_valid_class_name(&entry.facade) {
            check.fail(format!("invalid facade interface '{}'", entry.facade));
        }
        if entry.members.is_empty() {
            check.fail("accessor declares no members");
        }

        let mut accessors = Vec::new();
        for member in &entry.members {
            let Some(facade_method) = check.check(MemberSig::parse_method(&member.method)) else {
                continue;
            };
            let Some(definition) = check.check(accessor_shape(entry, &facade_method, member)) else {
                continue;
            };
            let key = (entry.target.clone(), facade_method.clone());
            if let Some(owner) = self.facade_methods.get(&key) {
                check.fail(format!(
                    "facade method {} on {} is already claimed by {}",
                    facade_method, entry.target, owner
                ));
                continue;
            }
            self.facade_methods.insert(key, id.clone());
            accessors.push(definition);
        }

        let set = AccessorSet {
            target: entry.target.clone(),
            facade: entry.facade.clone(),
            accessors,
        };
        self.finish(
            id,
            check,
            namespace,
            priority,
            std::slice::from_ref(&entry.target),
            &entry.ordering,
            TransformKind::Accessor(set),
        );
    }

    fn add_widener(&mut self, manifest: &Path, namespace: &str, priority: i32, entry: &WidenerEntry) {
        let (id, mut check) = self.begin(manifest, namespace, &entry.name);
        if entry.rules.is_empty() {
            check.fail("widener declares no rules");
        }
        let mut rules = Vec::new();
        for rule in &entry.rules {
            let target = match (&rule.field, &rule.method) {
                (Some(_), Some(_)) => {
                    check.fail("a widener rule names either a field or a method, not both");
                    continue;
                }
                (Some(field), None) => WidenTarget::Field(field.clone()),
                (None, Some(method)) => match check.check(MemberSig::parse_method(method)) {
                    Some(sig) => WidenTarget::Method(sig),
                    None => continue,
                },
                (None, None) => WidenTarget::Class,
            };
            if !(rule.accessible || rule.mutable || rule.extendable) {
                check.fail(format!("widener rule for {target} changes nothing"));
                continue;
            }
            if rule.mutable && !matches!(target, WidenTarget::Field(_)) {
                check.fail(format!("'mutable' only applies to fields, not {target}"));
                continue;
            }
            if rule.extendable && matches!(target, WidenTarget::Field(_)) {
                check.fail(format!("'extendable' applies to classes and methods, not {target}"));
                continue;
            }
            rules.push(WidenRule {
                target,
                accessible: rule.accessible,
                mutable: rule.mutable,
                extendable: rule.extendable,
            });
        }
        self.finish(
            id,
            check,
            namespace,
            priority,
            &entry.targets,
            &entry.ordering,
            TransformKind::Widen(rules),
        );
    }

    /// Ordering hints must name known definitions of the same band.
    fn check_references(&mut self) {
        let bands: HashMap<&DefinitionId, Band> = self
            .definitions
            .iter()
            .map(|definition| (&definition.id, definition.band))
            .collect();
        for definition in &self.definitions {
            for (hint, id) in definition
                .before
                .iter()
                .map(|id| ("before", id))
                .chain(definition.after.iter().map(|id| ("after", id)))
            {
                if id == &definition.id {
                    self.errors.push(DefinitionError::new(
                        &definition.source,
                        definition.id.to_string(),
                        format!("'{hint}' names the definition itself"),
                    ));
                } else if !self.ids.contains_key(id) {
                    self.errors.push(DefinitionError::new(
                        &definition.source,
                        definition.id.to_string(),
                        format!("'{hint}' names unknown definition {id}"),
                    ));
                } else if let Some(&band) = bands.get(id) {
                    let inverted = match hint {
                        "before" => definition.band > band,
                        _ => definition.band < band,
                    };
                    if inverted {
                        self.errors.push(DefinitionError::new(
                            &definition.source,
                            definition.id.to_string(),
                            format!(
                                "'{hint}' on {id} contradicts band order, {} steps always run {} {} steps",
                                definition.band,
                                if hint == "before" { "after" } else { "before" },
                                band
                            ),
                        ));
                    }
                }
            }
        }
    }
}

fn parse_at(at: &AtEntry) -> Result<At, String> {
    Ok(match at {
        AtEntry::Head => At::Head,
        AtEntry::Tail => At::Tail,
        AtEntry::Return => At::Return,
        AtEntry::Invoke { target, ordinal, shift } => At::Invoke {
            target: parse_method_ref(target)?,
            ordinal: *ordinal,
            shift: *shift,
        },
        AtEntry::Field {
            target,
            access,
            ordinal,
            shift,
        } => At::Field {
            target: parse_field_ref(target)?,
            access: *access,
            ordinal: *ordinal,
            shift: *shift,
        },
    })
}

fn parse_injection(entry: &InjectionEntry) -> Result<Injection, String> {
    let (method, handler, action) = match entry {
        InjectionEntry::Inject {
            method,
            handler,
            at,
            cancellable,
        } => (
            method,
            handler,
            InjectionAction::Inject {
                at: parse_at(at)?,
                cancellable: *cancellable,
            },
        ),
        InjectionEntry::Redirect { method, handler, at } => {
            (method, handler, InjectionAction::Redirect { at: parse_at(at)? })
        }
        InjectionEntry::Overwrite { method, handler } => (method, handler, InjectionAction::Overwrite),
    };
    let method = MemberSig::parse_method(method)?;
    let handler = MemberSig::parse_method(handler)?;
    let target_desc = method.method_descriptor().ok_or("unparsable target descriptor")?;
    let handler_desc = handler.method_descriptor().ok_or("unparsable handler descriptor")?;

    match &action {
        InjectionAction::Inject { cancellable, .. } => {
            if handler_desc.params != target_desc.params {
                return Err(format!(
                    "handler {handler} must take the parameters of {method}"
                ));
            }
            if *cancellable {
                if !target_desc.is_void() {
                    return Err(format!("cancellable injection requires a void target, {method} is not"));
                }
                if !matches!(handler_desc.ret, Some(FieldType::Boolean | FieldType::Int)) {
                    return Err(format!("cancellable handler {handler} must return Z or I"));
                }
            } else if !handler_desc.is_void() {
                return Err(format!("handler {handler} must return V"));
            }
        }
        InjectionAction::Redirect { at } => {
            if !at.is_site() {
                return Err(format!("redirect of {method} must target a call or field site, not {at}"));
            }
            if at.shift() == Shift::After {
                return Err(format!("redirect of {method} replaces its site and cannot be shifted after it"));
            }
            let (instance, receiverless) = redirect_shapes(at).ok_or("unparsable redirect site")?;
            if handler_desc != instance && handler_desc != receiverless {
                return Err(format!(
                    "redirect handler {handler} must have descriptor {instance} or {receiverless} for {at}"
                ));
            }
        }
        InjectionAction::Overwrite => {
            if handler_desc != target_desc {
                return Err(format!("overwrite handler {handler} must match {method}"));
            }
        }
    }

    Ok(Injection {
        method,
        handler,
        action,
    })
}

/// Handler descriptors that can replace a redirected site.
///
/// Returns the shape for an instance site, which receives the receiver as its
/// first parameter, and the shape for a static site. Which one applies
/// depends on the instruction found in the target, so the engine picks.
pub fn redirect_shapes(at: &At) -> Option<(MethodDescriptor, MethodDescriptor)> {
    match at {
        At::Invoke { target, .. } => {
            let called: MethodDescriptor = target.descriptor.parse().ok()?;
            let mut params = vec![FieldType::Object(target.owner.clone())];
            params.extend(called.params.iter().cloned());
            Some((MethodDescriptor::new(params, called.ret.clone()), called))
        }
        At::Field { target, access, .. } => {
            let field: FieldType = target.descriptor.parse().ok()?;
            let owner = FieldType::Object(target.owner.clone());
            Some(match access {
                FieldAccess::Get => (
                    MethodDescriptor::new(vec![owner], Some(field.clone())),
                    MethodDescriptor::new(Vec::new(), Some(field)),
                ),
                FieldAccess::Put => (
                    MethodDescriptor::new(vec![owner, field.clone()], None),
                    MethodDescriptor::new(vec![field], None),
                ),
            })
        }
        _ => None,
    }
}

fn parse_access(names: &[String]) -> Result<MemberAccess, String> {
    let mut access = MemberAccess::empty();
    for name in names {
        access |= match name.as_str() {
            "public" => MemberAccess::PUBLIC,
            "private" => MemberAccess::PRIVATE,
            "protected" => MemberAccess::PROTECTED,
            "static" => MemberAccess::STATIC,
            "final" => MemberAccess::FINAL,
            "synthetic" => MemberAccess::SYNTHETIC,
            other => return Err(format!("unknown access flag '{other}'")),
        };
    }
    let visibility = [MemberAccess::PUBLIC, MemberAccess::PRIVATE, MemberAccess::PROTECTED]
        .iter()
        .filter(|flag| access.contains(**flag))
        .count();
    if visibility > 1 {
        return Err("conflicting visibility flags".to_string());
    }
    Ok(access)
}

fn parse_field_addition(entry: &FieldEntry) -> Result<FieldAddition, String> {
    let field = MemberSig::parse_field(&entry.field)?;
    let access = parse_access(&entry.access)?;
    let initializer = match &entry.initializer {
        Some(init) => {
            let sig = MemberSig::parse_method(init)?;
            let expected = format!("(){}", field.descriptor);
            if sig.descriptor != expected {
                return Err(format!(
                    "initializer {sig} of field {field} must have descriptor {expected}"
                ));
            }
            Some(sig)
        }
        None => None,
    };
    Ok(FieldAddition {
        access,
        field,
        initializer,
    })
}

fn accessor_shape(
    entry: &AccessorEntry,
    facade_method: &MemberSig,
    member: &AccessorMemberEntry,
) -> Result<AccessorDefinition, String> {
    let desc = facade_method
        .method_descriptor()
        .ok_or("unparsable facade descriptor")?;
    let target = match member.kind {
        AccessorKind::Getter | AccessorKind::Setter => {
            let field = member
                .field
                .as_ref()
                .ok_or_else(|| format!("{} accessor {facade_method} must name a field", member.kind))?;
            if member.target_method.is_some() {
                return Err(format!("{} accessor {facade_method} cannot name a method", member.kind));
            }
            let shape_ok = match member.kind {
                AccessorKind::Getter => desc.params.is_empty() && !desc.is_void(),
                _ => desc.params.len() == 1 && desc.is_void(),
            };
            if !shape_ok {
                return Err(format!(
                    "facade method {facade_method} does not have the shape of a {}",
                    member.kind
                ));
            }
            AccessorMember::Field(field.clone())
        }
        AccessorKind::Invoker => {
            let target = member
                .target_method
                .as_ref()
                .ok_or_else(|| format!("invoker {facade_method} must name a target method"))?;
            let sig = MemberSig::parse_method(target)?;
            if sig.descriptor != facade_method.descriptor {
                return Err(format!("invoker {facade_method} must match the descriptor of {sig}"));
            }
            AccessorMember::Method(sig)
        }
    };
    if member.mutable && member.kind != AccessorKind::Setter {
        return Err(format!("'mutable' only applies to setters, not {facade_method}"));
    }
    Ok(AccessorDefinition {
        target: entry.target.clone(),
        facade: entry.facade.clone(),
        facade_method: facade_method.clone(),
        member: target,
        kind: member.kind,
        mutable: member.mutable,
    })
}
