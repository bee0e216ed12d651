//! Natives the launcher provides to host code.

use std::sync::Arc;

use graft_bootstrap::{Runtime, Value};
use graft_classfile::MethodRef;

/// Owner of the console natives.
pub const CONSOLE_CLASS: &str = "graft/Console";

/// Registers `graft/Console.print(Ljava/lang/String;)V` and
/// `graft/Console.printInt(I)V`, both writing one line to stdout.
pub fn register(runtime: &Runtime) {
    runtime.register_native(
        MethodRef::new(CONSOLE_CLASS, "print", "(Ljava/lang/String;)V"),
        Arc::new(|_: &Runtime, args: Vec<Value>| -> Result<Option<Value>, String> {
            match args.first() {
                Some(Value::Str(text)) => println!("{text}"),
                Some(Value::Null) => println!("null"),
                other => return Err(format!("expected a string, got {other:?}")),
            }
            Ok(None)
        }),
    );
    runtime.register_native(
        MethodRef::new(CONSOLE_CLASS, "printInt", "(I)V"),
        Arc::new(|_: &Runtime, args: Vec<Value>| -> Result<Option<Value>, String> {
            let value = args
                .first()
                .and_then(Value::as_int)
                .ok_or_else(|| format!("expected an int, got {:?}", args.first()))?;
            println!("{value}");
            Ok(None)
        }),
    );
}
