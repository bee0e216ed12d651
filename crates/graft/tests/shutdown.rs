#![cfg(unix)]

use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use graft_classfile::{class_path, encode, ClassFile, Code, Instruction, MemberAccess, Method};

const MAIN: &str = "net/example/Main";

/// A host whose entrypoint never returns.
fn spinning_main() -> ClassFile {
    ClassFile::new(MAIN).with_method(Method::new(
        MemberAccess::PUBLIC | MemberAccess::STATIC,
        "main",
        "()V",
        Some(Code::new(0, vec![Instruction::Label(0), Instruction::Goto(0)])),
    ))
}

fn write_config(dir: &Path) -> std::path::PathBuf {
    let host = dir.join("host");
    let class = host.join(class_path(MAIN));
    std::fs::create_dir_all(class.parent().unwrap()).unwrap();
    std::fs::write(&class, encode(&spinning_main()).unwrap()).unwrap();
    std::fs::create_dir_all(dir.join("definitions")).unwrap();

    let config = dir.join("graft.toml");
    std::fs::write(
        &config,
        format!(
            r#"[launch]
host_classpath = "{}"
definition_paths = ["{}"]
entrypoint = "{MAIN}"

[logging]
level = "info"
json_format = false
"#,
            host.display(),
            dir.join("definitions").display()
        ),
    )
    .unwrap();
    config
}

#[test]
fn test_run_exits_on_interrupt_while_host_is_busy() {
    let dir = tempfile::tempdir().unwrap();
    let config = write_config(dir.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_graft"))
        .arg("-c")
        .arg(&config)
        .arg("run")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    thread::sleep(Duration::from_millis(1500));
    assert!(child.try_wait().unwrap().is_none(), "host loop ended on its own");
    let sent = Command::new("kill")
        .args(["-INT", &child.id().to_string()])
        .status()
        .unwrap();
    assert!(sent.success());

    let deadline = Instant::now() + Duration::from_secs(10);
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break status;
        }
        if Instant::now() > deadline {
            child.kill().unwrap();
            panic!("graft run still alive 10s after SIGINT");
        }
        thread::sleep(Duration::from_millis(50));
    };
    assert_eq!(status.code(), Some(130));
}
