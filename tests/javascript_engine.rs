//! End-to-end runs through a real `node`. Skipped when it is not on PATH.

use serde_json::json;
use snipbox::sandbox::node_permission_flag;
use snipbox::{Engine, ExecutionRequest, ExecutionResult, SnipboxConfig};
use tempfile::TempDir;

fn engine() -> Option<Engine> {
    let Ok(node) = which::which("node") else {
        eprintln!("node not found, skipping");
        return None;
    };
    let version = std::process::Command::new(node)
        .arg("--version")
        .output()
        .ok()?;
    if node_permission_flag(&String::from_utf8_lossy(&version.stdout)).is_none() {
        eprintln!("node has no permission model, skipping");
        return None;
    }
    Some(Engine::new(SnipboxConfig::default()))
}

fn request(dir: &TempDir, code: &str) -> ExecutionRequest {
    ExecutionRequest::new(code, dir.path()).with_timeout_ms(20_000)
}

#[tokio::test]
async fn test_injected_variables_and_result() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let req = request(&dir, "result = x + 1;")
        .with_variable("x", json!(5))
        .with_variable("y", json!("a\"b"));
    let result = engine.run_js(&req).await;

    assert_eq!(result, ExecutionResult::Success(json!({"result": 6})));
}

#[tokio::test]
async fn test_async_main_receives_variables() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let code = "async function main(vars) {\n  return { sum: vars.a + vars.b };\n}\n";
    let req = request(&dir, code)
        .with_variable("a", json!(2))
        .with_variable("b", json!(3));
    let result = engine.run_js(&req).await;

    assert_eq!(result, ExecutionResult::Success(json!({"sum": 5})));
}

#[tokio::test]
async fn test_host_globals_are_unreachable() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let code = "hasRequire = typeof require !== 'undefined';\nhasProcess = typeof process !== 'undefined';\n";
    let result = engine.run_js(&request(&dir, code)).await;

    assert_eq!(
        result,
        ExecutionResult::Success(json!({"hasRequire": false, "hasProcess": false}))
    );
}

#[tokio::test]
async fn test_constructor_chain_cannot_reach_host() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let code = "const p = this.constructor.constructor('return process')();\n\
                p.mainModule.require('f'+'s')['write'+'FileSync']('pwned.txt','escaped');\n\
                pid = p.pid;\n\
                hostCwd = p.cwd();\n";
    let result = engine.run_js(&request(&dir, code)).await;

    assert!(!result.is_success(), "{result:?}");
    assert!(!dir.path().join("pwned.txt").exists());
}

#[tokio::test]
async fn test_string_compilation_is_disabled() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let code = "const f = Object.getPrototypeOf(function () {}).constructor;\n\
                leaked = typeof f('return globalThis')();\n";
    let result = engine.run_js(&request(&dir, code)).await;

    let error = result.error().unwrap();
    assert!(error.contains("EvalError"), "{error}");
}

#[tokio::test]
async fn test_denied_module() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let result = engine
        .run_js(&request(&dir, "const fs = require('fs');"))
        .await;
    assert_eq!(result.error(), Some("Importing fs is not allowed."));
}

#[tokio::test]
async fn test_thrown_error_is_reported() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let result = engine
        .run_js(&request(&dir, "throw new Error('bad input');"))
        .await;
    let error = result.error().unwrap();
    assert!(error.contains("bad input"), "{error}");
}

#[tokio::test]
async fn test_pending_promise_times_out() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let code = "async function main() {\n  await new Promise(function () {});\n}\n";
    let req = ExecutionRequest::new(code, dir.path()).with_timeout_ms(1500);
    let result = engine.run_js(&req).await;

    assert_eq!(
        result.error(),
        Some("Timeout error: execution exceeded 1500 ms")
    );
}
