use std::sync::{Arc, Mutex};

use graft::{Launcher, LauncherError};
use graft_bootstrap::{
    install, BoxError, ClassFileTransformer, ClassLoadRequest, GraftConfig, HookInstallationError, Layer, Runtime,
    RuntimeError, Value,
};
use graft_classfile::{
    class_path, encode, ClassFile, Code, Constant, Field, FieldRef, Instruction, InvokeKind, MemberAccess, Method,
    MethodRef,
};
use tempfile::TempDir;

const MAIN: &str = "net/example/Main";
const FOO: &str = "net/example/Foo";
const PLAIN: &str = "net/example/Plain";
const COUNTER: &str = "net/example/Counter";
const COUNTER_ACCESS: &str = "net/example/access/CounterAccess";
const LOG: &str = "net/example/Log";

// ============================================================================
// Fixture
// ============================================================================

struct Fixture {
    dir: TempDir,
    config: GraftConfig,
}

impl Fixture {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let path = |name: &str| dir.path().join(name).to_string_lossy().to_string();

        let mut config = GraftConfig::default();
        config.launch.host_classpath = path("host");
        config.launch.accessor_classpath = Some(path("accessors"));
        config.launch.transformer_classpath = Some(path("mixins"));
        config.launch.definition_paths = vec![path("definitions")];
        config.launch.entrypoint = MAIN.to_string();
        std::fs::create_dir_all(dir.path().join("definitions")).unwrap();

        let fixture = Self { dir, config };
        fixture.host(&main_class());
        fixture.host(&foo());
        fixture.host(&ClassFile::new(PLAIN));
        fixture
    }

    fn write_class(&self, root: &str, class: &ClassFile) {
        let path = self.dir.path().join(root).join(class_path(&class.name));
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, encode(class).unwrap()).unwrap();
    }

    fn host(&self, class: &ClassFile) {
        self.write_class("host", class);
    }

    fn mixin(&self, class: &ClassFile) {
        self.write_class("mixins", class);
    }

    fn manifest(&self, name: &str, json: &str) {
        let path = self.dir.path().join("definitions").join(format!("{name}.graft.json"));
        std::fs::write(path, json).unwrap();
    }

    fn boot(&self) -> Launcher {
        Launcher::boot(self.config.clone()).unwrap()
    }
}

fn code(instructions: Vec<Instruction>) -> Option<Code> {
    Some(Code::new(2, instructions))
}

fn record(value: i64) -> Vec<Instruction> {
    vec![
        Instruction::Push(Constant::Int(value)),
        Instruction::Invoke(InvokeKind::Static, MethodRef::new(LOG, "record", "(I)V")),
    ]
}

fn super_constructor() -> Vec<Instruction> {
    vec![
        Instruction::Load(0),
        Instruction::Invoke(InvokeKind::Special, MethodRef::new("java/lang/Object", "<init>", "()V")),
    ]
}

fn main_class() -> ClassFile {
    ClassFile::new(MAIN).with_method(Method::new(
        MemberAccess::PUBLIC | MemberAccess::STATIC,
        "main",
        "()V",
        code(vec![
            Instruction::New(FOO.to_string()),
            Instruction::Dup,
            Instruction::Invoke(InvokeKind::Special, MethodRef::new(FOO, "<init>", "()V")),
            Instruction::Invoke(InvokeKind::Virtual, MethodRef::new(FOO, "bar", "()V")),
            Instruction::Return,
        ]),
    ))
}

fn foo() -> ClassFile {
    let mut init = super_constructor();
    init.push(Instruction::Return);
    let mut bar = record(0);
    bar.push(Instruction::Return);

    ClassFile::new(FOO)
        .with_method(Method::new(MemberAccess::PUBLIC, "<init>", "()V", code(init)))
        .with_method(Method::new(MemberAccess::PUBLIC, "bar", "()V", code(bar)))
}

fn logging_mixin(name: &str, value: i64) -> ClassFile {
    let mut body = record(value);
    body.push(Instruction::Return);
    ClassFile::new(name).with_method(Method::new(
        MemberAccess::PUBLIC | MemberAccess::STATIC,
        "onBar",
        "()V",
        code(body),
    ))
}

fn head_mixin_manifest(namespace: &str, mixin: &str, priority: i32, extra: &str) -> String {
    format!(
        r#"{{
            "namespace": "{namespace}",
            "mixins": [{{
                "name": "log_bar",
                "mixin": "{mixin}",
                "targets": ["{FOO}"],
                "priority": {priority}{extra},
                "injections": [
                    {{ "kind": "inject", "method": "bar()V", "handler": "onBar()V", "at": {{ "type": "head" }} }}
                ]
            }}]
        }}"#
    )
}

/// Registers a recording `Log.record(I)V` native.
fn recorder(runtime: &Runtime) -> Arc<Mutex<Vec<i64>>> {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    runtime.register_native(
        MethodRef::new(LOG, "record", "(I)V"),
        Arc::new(move |_: &Runtime, args: Vec<Value>| -> Result<Option<Value>, String> {
            let value = args.first().and_then(Value::as_int).ok_or("expected an int")?;
            sink.lock().unwrap().push(value);
            Ok(None)
        }),
    );
    log
}

fn load(launcher: &Launcher, class: &str) -> Result<Arc<graft_bootstrap::RuntimeClass>, RuntimeError> {
    launcher
        .runtime()
        .load_class(&ClassLoadRequest::new(class, Layer::Launch))
}

fn ordered_fixture() -> Fixture {
    let fixture = Fixture::new();
    fixture.mixin(&logging_mixin("net/example/mixin/Low", 5));
    fixture.mixin(&logging_mixin("net/example/mixin/High", 10));
    fixture.manifest("low", &head_mixin_manifest("low", "net/example/mixin/Low", 5, ""));
    fixture.manifest("high", &head_mixin_manifest("high", "net/example/mixin/High", 10, ""));
    fixture
}

// ============================================================================
// Tests
// ============================================================================

#[test]
fn test_higher_priority_mixin_runs_first() {
    let fixture = ordered_fixture();
    let launcher = fixture.boot();
    let log = recorder(launcher.runtime());

    launcher.run_entrypoint().unwrap();
    assert_eq!(*log.lock().unwrap(), vec![10, 5, 0]);

    let record = launcher.loader().records().get(FOO).unwrap();
    assert_eq!(record.plan_len, 2);
    assert!(record.is_transformed());
}

#[test]
fn test_untargeted_class_is_byte_identical() {
    let fixture = ordered_fixture();
    let launcher = fixture.boot();

    let class = load(&launcher, PLAIN).unwrap();
    let on_disk = std::fs::read(fixture.dir.path().join("host").join(class_path(PLAIN))).unwrap();
    assert_eq!(&**class.bytes(), on_disk.as_slice());

    let record = launcher.loader().records().get(PLAIN).unwrap();
    assert_eq!(record.applications, 0);
    assert!(!record.is_transformed());
}

#[test]
fn test_concurrent_loads_transform_once() {
    let fixture = ordered_fixture();
    let launcher = fixture.boot();

    let classes: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..8).map(|_| scope.spawn(|| load(&launcher, FOO).unwrap())).collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    assert!(classes.iter().all(|class| Arc::ptr_eq(class, &classes[0])));
    assert_eq!(launcher.loader().records().get(FOO).unwrap().applications, 1);
    assert_eq!(launcher.loader().planner().computations(), 1);
    assert_eq!(launcher.runtime().definitions(), 1);
}

#[test]
fn test_ordering_cycle_aborts_the_load() {
    let fixture = Fixture::new();
    fixture.mixin(&logging_mixin("net/example/mixin/Low", 5));
    fixture.mixin(&logging_mixin("net/example/mixin/High", 10));
    fixture.manifest(
        "low",
        &head_mixin_manifest("low", "net/example/mixin/Low", 5, r#", "before": ["high:log_bar"]"#),
    );
    fixture.manifest(
        "high",
        &head_mixin_manifest("high", "net/example/mixin/High", 10, r#", "before": ["low:log_bar"]"#),
    );
    let launcher = fixture.boot();

    let err = load(&launcher, FOO).unwrap_err();
    assert!(matches!(err, RuntimeError::Transform { .. }));
    assert!(err.to_string().contains(FOO));

    let again = load(&launcher, FOO).unwrap_err();
    assert_eq!(again.to_string(), err.to_string());
    assert!(launcher.loader().records().get(FOO).is_none());
}

#[test]
fn test_target_mismatch_aborts_the_load() {
    let fixture = Fixture::new();
    fixture.mixin(&logging_mixin("net/example/mixin/Low", 5));
    fixture.manifest(
        "broken",
        r#"{
            "namespace": "broken",
            "mixins": [{
                "name": "missing",
                "mixin": "net/example/mixin/Low",
                "targets": ["net/example/Foo"],
                "injections": [
                    { "kind": "inject", "method": "missing()V", "handler": "onBar()V", "at": { "type": "head" } }
                ]
            }]
        }"#,
    );
    let launcher = fixture.boot();

    let err = load(&launcher, FOO).unwrap_err();
    let RuntimeError::Transform { source, .. } = &err else {
        panic!("expected a transform failure");
    };
    let message = source.to_string();
    assert!(message.contains("Target mismatch"));
    assert!(message.contains("broken:missing"));
    assert!(message.contains("missing()V"));
    assert!(!launcher.runtime().defined_classes().contains(&FOO.to_string()));

    assert!(launcher.run_entrypoint().is_err());
}

#[test]
fn test_accessor_facade_reads_private_field() {
    let fixture = Fixture::new();
    let mut init = super_constructor();
    init.extend([
        Instruction::Load(0),
        Instruction::Push(Constant::Int(7)),
        Instruction::PutField(FieldRef::new(COUNTER, "count", "I")),
        Instruction::Return,
    ]);
    let bump = vec![
        Instruction::Load(0),
        Instruction::Load(0),
        Instruction::GetField(FieldRef::new(COUNTER, "count", "I")),
        Instruction::Push(Constant::Int(1)),
        Instruction::Add,
        Instruction::PutField(FieldRef::new(COUNTER, "count", "I")),
        Instruction::Return,
    ];
    fixture.host(
        &ClassFile::new(COUNTER)
            .with_field(Field::new(MemberAccess::PRIVATE, "count", "I"))
            .with_method(Method::new(MemberAccess::PUBLIC, "<init>", "()V", code(init)))
            .with_method(Method::new(MemberAccess::PUBLIC, "bump", "()V", code(bump))),
    );
    fixture.write_class("accessors", &ClassFile::new_interface(COUNTER_ACCESS));
    fixture.manifest(
        "access",
        &format!(
            r#"{{
                "namespace": "access",
                "accessors": [{{
                    "name": "counter",
                    "target": "{COUNTER}",
                    "facade": "{COUNTER_ACCESS}",
                    "members": [{{ "method": "getCount()I", "kind": "getter", "field": "count" }}]
                }}]
            }}"#
        ),
    );
    let launcher = fixture.boot();
    let runtime = launcher.runtime();

    let counter = runtime.new_object(Layer::Launch, COUNTER, "()V", Vec::new()).unwrap();
    let count = runtime
        .invoke_interface(Layer::Host, COUNTER_ACCESS, &counter, "getCount", "()I", Vec::new())
        .unwrap();
    assert_eq!(count, Some(Value::Int(7)));

    runtime
        .invoke_virtual(Layer::Host, &counter, "bump", "()V", Vec::new())
        .unwrap();
    let count = runtime
        .invoke_interface(Layer::Host, COUNTER_ACCESS, &counter, "getCount", "()I", Vec::new())
        .unwrap();
    assert_eq!(count, Some(Value::Int(8)));
}

#[test]
fn test_debug_export_writes_transformed_classes() {
    let mut fixture = ordered_fixture();
    let export = fixture.dir.path().join("export");
    fixture.config.transform.export_dir = Some(export.to_string_lossy().to_string());
    let launcher = fixture.boot();

    load(&launcher, FOO).unwrap();
    load(&launcher, PLAIN).unwrap();

    let record = launcher.loader().records().get(FOO).unwrap();
    let exported = std::fs::read(export.join(class_path(FOO))).unwrap();
    assert_eq!(exported.as_slice(), &*record.output);
    assert!(!export.join(class_path(PLAIN)).exists());
}

#[test]
fn test_preload_loads_every_host_class() {
    let fixture = ordered_fixture();
    let launcher = fixture.boot();
    assert_eq!(launcher.preload().unwrap(), 3);
    assert!(launcher.hook().classes_intercepted() >= 3);
}

#[test]
fn test_hook_point_is_taken() {
    struct Passthrough;

    impl ClassFileTransformer for Passthrough {
        fn name(&self) -> &str {
            "passthrough"
        }

        fn transform(&self, _request: &ClassLoadRequest, original: &[u8]) -> Result<Arc<[u8]>, BoxError> {
            Ok(Arc::from(original))
        }
    }

    let fixture = ordered_fixture();
    let launcher = fixture.boot();
    assert!(launcher.runtime().hook_installed());

    let same = install(launcher.runtime(), launcher.loader().clone()).unwrap();
    assert_eq!(same.name(), launcher.hook().name());

    let err = install(launcher.runtime(), Arc::new(Passthrough)).unwrap_err();
    assert!(matches!(err, HookInstallationError::AlreadyInstalled { .. }));
}

#[test]
fn test_invalid_definitions_abort_boot() {
    let fixture = Fixture::new();
    fixture.manifest("bad", r#"{ "namespace": "Bad Namespace" }"#);
    fixture.manifest("worse", "{ not json");

    let err = Launcher::boot(fixture.config.clone()).err().unwrap();
    let LauncherError::Discovery(errors) = err else {
        panic!("expected discovery errors");
    };
    assert_eq!(errors.len(), 2);
}

#[test]
fn test_plan_matches_load_order() {
    let fixture = ordered_fixture();
    let plan = graft::plan_class(&fixture.config, FOO).unwrap();
    let ids: Vec<&str> = plan.ids().into_iter().map(|id| id.as_str()).collect();
    assert_eq!(ids, vec!["high:log_bar", "low:log_bar"]);

    let empty = graft::plan_class(&fixture.config, PLAIN).unwrap();
    assert!(empty.is_empty());
}
