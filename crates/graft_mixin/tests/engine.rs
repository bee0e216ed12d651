use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use graft_bootstrap::{Layer, MemoryClassSource, Runtime, Value};
use graft_classfile::{
    decode, encode, ClassFile, Code, Constant, FieldRef, Instruction, InvokeKind, MemberAccess, Method, MethodRef,
};
use graft_launch::{
    At, DefinitionId, FieldAddition, Injection, InjectionAction, MemberSig, MixinSpec, Shift, TargetPattern,
    TransformDefinition, TransformError, TransformKind, TransformationPlan, WidenRule, WidenTarget,
};
use graft_mixin::MixinEngine;

const FOO: &str = "net/example/Foo";
const MIXIN: &str = "net/example/mixin/FooMixin";
const LOG: &str = "net/example/Log";

fn record(value: i64) -> Vec<Instruction> {
    vec![
        Instruction::Push(Constant::Int(value)),
        Instruction::Invoke(InvokeKind::Static, MethodRef::new(LOG, "record", "(I)V")),
    ]
}

fn body(mut instructions: Vec<Instruction>, tail: Instruction) -> Option<Code> {
    instructions.push(tail);
    Some(Code::new(2, instructions))
}

fn foo() -> ClassFile {
    ClassFile::new(FOO)
        .with_method(Method::new(
            MemberAccess::PUBLIC,
            "<init>",
            "()V",
            body(
                vec![
                    Instruction::Load(0),
                    Instruction::Invoke(InvokeKind::Special, MethodRef::new("java/lang/Object", "<init>", "()V")),
                ],
                Instruction::Return,
            ),
        ))
        .with_method(Method::new(MemberAccess::PUBLIC, "bar", "()V", body(record(0), Instruction::Return)))
        .with_method(Method::new(MemberAccess::PUBLIC, "run", "()V", {
            let mut instructions = vec![
                Instruction::Load(0),
                Instruction::Invoke(InvokeKind::Virtual, MethodRef::new(FOO, "bar", "()V")),
            ];
            instructions.extend(record(1));
            body(instructions, Instruction::Return)
        }))
        .with_method(Method::new(
            MemberAccess::PUBLIC,
            "value",
            "()I",
            body(vec![Instruction::Push(Constant::Int(3))], Instruction::ReturnValue),
        ))
        .with_method(Method::new(
            MemberAccess::PUBLIC,
            "total",
            "()I",
            body(
                vec![
                    Instruction::Load(0),
                    Instruction::Invoke(InvokeKind::Virtual, MethodRef::new(FOO, "value", "()I")),
                    Instruction::Push(Constant::Int(1)),
                    Instruction::Add,
                ],
                Instruction::ReturnValue,
            ),
        ))
}

fn mixin() -> ClassFile {
    let handler = |name: &str, value: i64| {
        Method::new(
            MemberAccess::PUBLIC | MemberAccess::STATIC,
            name,
            "()V",
            body(record(value), Instruction::Return),
        )
    };
    let constant = |access: MemberAccess, name: &str, descriptor: &str, value: i64| {
        Method::new(
            access,
            name,
            descriptor,
            body(vec![Instruction::Push(Constant::Int(value))], Instruction::ReturnValue),
        )
    };
    let statik = MemberAccess::PUBLIC | MemberAccess::STATIC;

    ClassFile::new(MIXIN)
        .with_method(handler("onA", 10))
        .with_method(handler("onB", 5))
        .with_method(constant(statik, "cancel", "()Z", 1))
        .with_method(constant(statik, "proceed", "()Z", 0))
        .with_method(constant(statik, "fakeValue", "(Lnet/example/Foo;)I", 42))
        .with_method(constant(statik, "initGreeting", "()I", 7))
        .with_method(Method::new(
            MemberAccess::PUBLIC,
            "bar",
            "()V",
            body(record(99), Instruction::Return),
        ))
        .with_method(Method::new(
            MemberAccess::PUBLIC,
            "greet",
            "()I",
            body(
                vec![
                    Instruction::Load(0),
                    Instruction::GetField(FieldRef::new(MIXIN, "greeting", "I")),
                ],
                Instruction::ReturnValue,
            ),
        ))
}

fn engine() -> MixinEngine {
    let source = MemoryClassSource::new("transformers").with_class(&mixin()).unwrap();
    MixinEngine::new(Arc::new(source))
}

fn spec(injections: Vec<Injection>) -> MixinSpec {
    MixinSpec {
        mixin_class: MIXIN.into(),
        injections,
        interfaces: Vec::new(),
        methods: Vec::new(),
        fields: Vec::new(),
    }
}

fn inject(method: &str, handler: &str, at: At, cancellable: bool) -> Injection {
    Injection {
        method: MemberSig::parse_method(method).unwrap(),
        handler: MemberSig::parse_method(handler).unwrap(),
        action: InjectionAction::Inject { at, cancellable },
    }
}

fn step(name: &str, priority: i32, order: usize, kind: TransformKind) -> Arc<TransformDefinition> {
    Arc::new(TransformDefinition {
        id: DefinitionId::new("test", name),
        targets: vec![TargetPattern::parse(FOO).unwrap()],
        priority,
        band: kind.band(),
        before: Vec::new(),
        after: Vec::new(),
        order,
        source: PathBuf::from("test.graft.json"),
        kind,
    })
}

fn plan(steps: Vec<Arc<TransformDefinition>>) -> TransformationPlan {
    TransformationPlan {
        class: FOO.into(),
        steps,
    }
}

fn original() -> Vec<u8> {
    encode(&foo()).unwrap()
}

/// A runtime holding `image` as the host's Foo, with a recording Log.
fn run(image: &[u8]) -> (Runtime, Arc<Mutex<Vec<i64>>>) {
    let transformed = decode(image).unwrap();
    let runtime = Runtime::builder()
        .source(Layer::Host, MemoryClassSource::new("host").with_class(&transformed).unwrap())
        .build();
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
    (runtime, log)
}

#[test]
fn test_empty_plan_returns_input_unchanged() {
    let bytes = b"not even a class image".to_vec();
    let output = engine().apply(&TransformationPlan::empty(FOO), &bytes).unwrap();
    assert_eq!(output, bytes);
}

#[test]
fn test_head_injections_run_in_plan_order() {
    let first = step(
        "first",
        10,
        1,
        TransformKind::Mixin(spec(vec![inject("bar()V", "onA()V", At::Head, false)])),
    );
    let second = step(
        "second",
        5,
        0,
        TransformKind::Mixin(spec(vec![inject("bar()V", "onB()V", At::Head, false)])),
    );
    let output = engine().apply(&plan(vec![first, second]), &original()).unwrap();

    let transformed = decode(&output).unwrap();
    let copy = transformed.method("handler$0$onA", "()V").unwrap();
    assert_eq!(
        copy.access,
        MemberAccess::PRIVATE | MemberAccess::SYNTHETIC | MemberAccess::STATIC
    );
    assert!(transformed.method("handler$1$onB", "()V").is_some());

    let (runtime, log) = run(&output);
    let foo = runtime.new_object(Layer::Host, FOO, "()V", Vec::new()).unwrap();
    runtime.invoke_virtual(Layer::Host, &foo, "bar", "()V", Vec::new()).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![10, 5, 0]);
}

#[test]
fn test_cancellable_injection() {
    let cancelled = step(
        "cancel",
        0,
        0,
        TransformKind::Mixin(spec(vec![inject("bar()V", "cancel()Z", At::Head, true)])),
    );
    let output = engine().apply(&plan(vec![cancelled]), &original()).unwrap();
    let (runtime, log) = run(&output);
    let foo = runtime.new_object(Layer::Host, FOO, "()V", Vec::new()).unwrap();
    runtime.invoke_virtual(Layer::Host, &foo, "bar", "()V", Vec::new()).unwrap();
    assert!(log.lock().unwrap().is_empty());

    let proceeding = step(
        "proceed",
        0,
        0,
        TransformKind::Mixin(spec(vec![inject("bar()V", "proceed()Z", At::Head, true)])),
    );
    let output = engine().apply(&plan(vec![proceeding]), &original()).unwrap();
    let (runtime, log) = run(&output);
    let foo = runtime.new_object(Layer::Host, FOO, "()V", Vec::new()).unwrap();
    runtime.invoke_virtual(Layer::Host, &foo, "bar", "()V", Vec::new()).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![0]);
}

#[test]
fn test_tail_runs_after_body() {
    let tail = step(
        "tail",
        0,
        0,
        TransformKind::Mixin(spec(vec![inject("bar()V", "onA()V", At::Tail, false)])),
    );
    let output = engine().apply(&plan(vec![tail]), &original()).unwrap();
    let (runtime, log) = run(&output);
    let foo = runtime.new_object(Layer::Host, FOO, "()V", Vec::new()).unwrap();
    runtime.invoke_virtual(Layer::Host, &foo, "bar", "()V", Vec::new()).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![0, 10]);
}

#[test]
fn test_injections_around_a_call_site() {
    let around_bar = |handler: &str, shift: Shift| {
        inject(
            "run()V",
            handler,
            At::Invoke {
                target: MethodRef::new(FOO, "bar", "()V"),
                ordinal: None,
                shift,
            },
            false,
        )
    };
    let steps = vec![
        step("after_a", 30, 0, TransformKind::Mixin(spec(vec![around_bar("onA()V", Shift::After)]))),
        step("after_b", 20, 1, TransformKind::Mixin(spec(vec![around_bar("onB()V", Shift::After)]))),
        step("before_a", 10, 2, TransformKind::Mixin(spec(vec![around_bar("onA()V", Shift::Before)]))),
    ];
    let output = engine().apply(&plan(steps), &original()).unwrap();

    let (runtime, log) = run(&output);
    let foo = runtime.new_object(Layer::Host, FOO, "()V", Vec::new()).unwrap();
    runtime.invoke_virtual(Layer::Host, &foo, "run", "()V", Vec::new()).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![10, 0, 10, 5, 1]);
}

#[test]
fn test_redirect_replaces_call() {
    let redirect = Injection {
        method: MemberSig::parse_method("total()I").unwrap(),
        handler: MemberSig::parse_method("fakeValue(Lnet/example/Foo;)I").unwrap(),
        action: InjectionAction::Redirect {
            at: At::Invoke {
                target: MethodRef::new(FOO, "value", "()I"),
                ordinal: None,
                shift: Shift::Before,
            },
        },
    };
    let output = engine()
        .apply(&plan(vec![step("redirect", 0, 0, TransformKind::Mixin(spec(vec![redirect])))]), &original())
        .unwrap();
    let (runtime, _) = run(&output);
    let foo = runtime.new_object(Layer::Host, FOO, "()V", Vec::new()).unwrap();
    let total = runtime.invoke_virtual(Layer::Host, &foo, "total", "()I", Vec::new()).unwrap();
    assert_eq!(total, Some(Value::Int(43)));
}

#[test]
fn test_redirect_with_wrong_shape_is_rejected() {
    let redirect = Injection {
        method: MemberSig::parse_method("total()I").unwrap(),
        handler: MemberSig::parse_method("initGreeting()I").unwrap(),
        action: InjectionAction::Redirect {
            at: At::Invoke {
                target: MethodRef::new(FOO, "value", "()I"),
                ordinal: None,
                shift: Shift::Before,
            },
        },
    };
    let err = engine()
        .apply(&plan(vec![step("redirect", 0, 0, TransformKind::Mixin(spec(vec![redirect])))]), &original())
        .unwrap_err();
    assert!(matches!(err, TransformError::InvalidHandler { .. }));
}

#[test]
fn test_overwrite_replaces_body() {
    let overwrite = Injection {
        method: MemberSig::parse_method("bar()V").unwrap(),
        handler: MemberSig::parse_method("bar()V").unwrap(),
        action: InjectionAction::Overwrite,
    };
    let output = engine()
        .apply(&plan(vec![step("overwrite", 0, 0, TransformKind::Mixin(spec(vec![overwrite])))]), &original())
        .unwrap();
    let (runtime, log) = run(&output);
    let foo = runtime.new_object(Layer::Host, FOO, "()V", Vec::new()).unwrap();
    runtime.invoke_virtual(Layer::Host, &foo, "bar", "()V", Vec::new()).unwrap();
    assert_eq!(*log.lock().unwrap(), vec![99]);
}

#[test]
fn test_added_members() {
    let mut added = spec(Vec::new());
    added.interfaces.push("net/example/Greeter".into());
    added.methods.push(MemberSig::parse_method("greet()I").unwrap());
    added.fields.push(FieldAddition {
        access: MemberAccess::PRIVATE,
        field: MemberSig::parse_field("greeting:I").unwrap(),
        initializer: Some(MemberSig::parse_method("initGreeting()I").unwrap()),
    });
    let output = engine()
        .apply(&plan(vec![step("members", 0, 0, TransformKind::Mixin(added))]), &original())
        .unwrap();

    let transformed = decode(&output).unwrap();
    assert!(transformed.implements("net/example/Greeter"));
    assert!(transformed.field("greeting").is_some());
    let greet = transformed.method("greet", "()I").unwrap();
    assert_eq!(
        greet.code.as_ref().unwrap().instructions[1],
        Instruction::GetField(FieldRef::new(FOO, "greeting", "I"))
    );

    let (runtime, _) = run(&output);
    let foo = runtime.new_object(Layer::Host, FOO, "()V", Vec::new()).unwrap();
    let greeting = runtime.invoke_virtual(Layer::Host, &foo, "greet", "()I", Vec::new()).unwrap();
    assert_eq!(greeting, Some(Value::Int(7)));
}

#[test]
fn test_missing_target_method_is_a_mismatch() {
    let broken = step(
        "broken",
        0,
        0,
        TransformKind::Mixin(spec(vec![inject("missing()V", "onA()V", At::Head, false)])),
    );
    let err = engine().apply(&plan(vec![broken]), &original()).unwrap_err();
    let TransformError::TargetMismatch(mismatch) = err else {
        panic!("expected a target mismatch");
    };
    assert_eq!(mismatch.class, FOO);
    assert_eq!(mismatch.definition, DefinitionId::new("test", "broken"));
}

#[test]
fn test_missing_mixin_class() {
    let mut orphan = spec(vec![inject("bar()V", "onA()V", At::Head, false)]);
    orphan.mixin_class = "net/example/mixin/Gone".into();
    let err = engine()
        .apply(&plan(vec![step("orphan", 0, 0, TransformKind::Mixin(orphan))]), &original())
        .unwrap_err();
    assert!(matches!(err, TransformError::MixinUnavailable { .. }));
}

#[test]
fn test_output_is_deterministic() {
    let steps = vec![
        step(
            "widen",
            0,
            0,
            TransformKind::Widen(vec![WidenRule {
                target: WidenTarget::Class,
                accessible: true,
                mutable: false,
                extendable: true,
            }]),
        ),
        step(
            "inject",
            0,
            1,
            TransformKind::Mixin(spec(vec![
                inject("bar()V", "onA()V", At::Return, false),
                inject("bar()V", "cancel()Z", At::Head, true),
            ])),
        ),
    ];
    let engine = engine();
    let first = engine.apply(&plan(steps.clone()), &original()).unwrap();
    let second = engine.apply(&plan(steps), &original()).unwrap();
    assert_eq!(first, second);
    assert_ne!(first, original());
}
