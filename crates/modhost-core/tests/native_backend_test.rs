//! Builds `demos/greeter` with the real cargo backend and loads it through
//! the native loader. Slow, and needs cargo on PATH:
//!
//! ```text
//! cargo test -p modhost-core --test native_backend_test -- --ignored
//! ```

mod common;

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use common::Workspace;
use modhost_core::{ArtifactOrigin, HookTable, ModHost, NativeCodeLoader};
use serde_json::{json, Value};
use tokio::runtime::Runtime;

fn cargo_available() -> bool {
    let cargo = std::env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    Command::new(cargo)
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn demo_dir() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/greeter")
}

/// Copy the greeter into `Mods/greeter`, pointing its SDK dependency back
/// at this workspace.
fn install_greeter(ws: &Workspace) -> PathBuf {
    let target = ws.mod_dir("greeter");
    fs::create_dir_all(target.join("src")).unwrap();
    fs::copy(demo_dir().join("mod.json"), target.join("mod.json")).unwrap();
    fs::copy(demo_dir().join("src/lib.rs"), target.join("src/lib.rs")).unwrap();

    let sdk = Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("../modhost-sdk")
        .canonicalize()
        .unwrap();
    let manifest = fs::read_to_string(demo_dir().join("Cargo.toml"))
        .unwrap()
        .replace(
            r#"path = "../../crates/modhost-sdk""#,
            &format!("path = '{}'", sdk.display()),
        );
    assert!(manifest.contains(&sdk.display().to_string()));
    fs::write(target.join("Cargo.toml"), manifest).unwrap();
    target
}

fn native_host(ws: &Workspace, runtime: &Runtime, table: Arc<HookTable>) -> ModHost {
    ModHost::builder()
        .working_dir(ws.root())
        .runtime(runtime.handle().clone())
        .code_loader(NativeCodeLoader::with_shadow_root(ws.root().join("shadow")))
        .patch_engine(table)
        .build()
        .unwrap()
}

fn greet(table: &HookTable, name: &str) -> String {
    let result = table.call("host::greet", vec![json!(name)], |args| {
        json!(format!("hello {}", args[0].as_str().unwrap_or_default()))
    });
    match result {
        Value::String(text) => text,
        other => panic!("unexpected greeting {:?}", other),
    }
}

#[test]
#[ignore = "builds a real mod with cargo"]
fn test_unchanged_greeter_hits_cache_and_reload_runs_new_code() {
    if !cargo_available() {
        return;
    }
    let ws = Workspace::with_config(r#"{"compilerSelector":"cargo"}"#);
    let source = install_greeter(&ws);
    let runtime = Runtime::new().unwrap();
    let table = Arc::new(HookTable::new());
    let mut host = native_host(&ws, &runtime, table.clone());

    let first = host.load_all().unwrap();
    assert_eq!(first.loaded, vec!["greeter"]);
    assert_eq!((first.compiled, first.cache_hits), (1, 0));
    assert_eq!(host.extension("greeter").unwrap().origin(), ArtifactOrigin::Compiled);
    assert!(greet(&table, "bob").starts_with("hello BOB (up "));

    // The build leaves Cargo.lock next to the sources; that is not a change.
    host.stop().unwrap();
    let second = host.load_all().unwrap();
    assert_eq!((second.compiled, second.cache_hits), (0, 1));
    assert_eq!(host.extension("greeter").unwrap().origin(), ArtifactOrigin::Cached);

    let lib_rs = source.join("src/lib.rs");
    let edited = fs::read_to_string(&lib_rs)
        .unwrap()
        .replace("to_uppercase", "to_lowercase");
    fs::write(&lib_rs, edited).unwrap();

    let third = host.reload().unwrap();
    assert_eq!((third.compiled, third.cache_hits), (1, 0));
    assert!(greet(&table, "BOB").starts_with("hello bob (up "));

    host.stop().unwrap();
    assert_eq!(greet(&table, "bob"), "hello bob");
}

#[cfg(target_os = "linux")]
#[test]
#[ignore = "builds a real mod with cargo"]
fn test_debug_symbols_are_cached_with_the_library() {
    if !cargo_available() {
        return;
    }
    let ws = Workspace::with_config(
        r#"{"compilerSelector":"cargo","debugTopics":["Compilation"]}"#,
    );
    install_greeter(&ws);
    let runtime = Runtime::new().unwrap();
    let mut host = native_host(&ws, &runtime, Arc::new(HookTable::new()));

    let first = host.load_all().unwrap();
    assert_eq!(first.compiled, 1);
    assert!(ws.cache_dir().join("greeter/greeter.symbols").is_file());

    for _ in 0..2 {
        host.stop().unwrap();
        let summary = host.load_all().unwrap();
        assert_eq!((summary.compiled, summary.cache_hits), (0, 1));
    }
    host.stop().unwrap();
}
