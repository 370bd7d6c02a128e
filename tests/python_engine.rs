//! End-to-end runs through a real `python3`. Skipped when it is not on PATH.

use serde_json::json;
use snipbox::sandbox::PythonBackend;
use snipbox::{Engine, ExecutionRequest, ExecutionResult, SnipboxConfig};
use tempfile::TempDir;

fn engine() -> Option<Engine> {
    if which::which("python3").is_err() {
        eprintln!("python3 not found, skipping");
        return None;
    }
    let mut config = SnipboxConfig::default();
    // never reach out to a package index from tests
    config.python.auto_install = false;
    Some(Engine::new(config))
}

fn request(dir: &TempDir, code: &str) -> ExecutionRequest {
    ExecutionRequest::new(code, dir.path()).with_timeout_ms(20_000)
}

#[tokio::test]
async fn test_injected_variables_and_result() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let req = request(&dir, "result = x + 1")
        .with_variable("x", json!(5))
        .with_variable("y", json!("a\"b"));
    let result = engine.run_python(&req).await;

    assert_eq!(result, ExecutionResult::Success(json!({"result": 6})));
}

#[tokio::test]
async fn test_main_receives_variables_by_name() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let code = "def main(x, scale=10):\n    return {'scaled': x * scale}\n";
    let req = request(&dir, code).with_variable("x", json!(4));
    let result = engine.run_python(&req).await;

    assert_eq!(result, ExecutionResult::Success(json!({"scaled": 40})));
}

#[tokio::test]
async fn test_failing_main_falls_back_to_result() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let code = "result = 7\ndef main():\n    raise ValueError('boom')\n";
    let result = engine.run_python(&request(&dir, code)).await;

    assert_eq!(result, ExecutionResult::Success(json!({"result": 7})));
}

#[tokio::test]
async fn test_default_config_runs_snippet() {
    if which::which("python3").is_err() {
        return;
    }
    let dir = tempfile::tempdir().unwrap();
    let engine = Engine::new(SnipboxConfig::default());

    let result = engine.run_python(&request(&dir, "result = 1 + 1")).await;
    assert_eq!(result, ExecutionResult::Success(json!({"result": 2})));
}

#[cfg(unix)]
#[tokio::test]
async fn test_interpreter_behind_launcher_script() {
    use std::os::unix::fs::PermissionsExt;

    if which::which("python3").is_err() {
        return;
    }
    let bin = tempfile::tempdir().unwrap();
    let launcher = bin.path().join("python3-launcher");
    std::fs::write(&launcher, "#!/bin/sh\nexec python3 \"$@\"\n").unwrap();
    std::fs::set_permissions(&launcher, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut config = SnipboxConfig::default();
    config.python.auto_install = false;
    config.python.interpreter = launcher;
    let engine = Engine::new(config);

    let dir = tempfile::tempdir().unwrap();
    let req = request(&dir, "result = x + 1").with_variable("x", json!(5));
    let result = engine.run_python(&req).await;
    assert_eq!(result, ExecutionResult::Success(json!({"result": 6})));
}

#[tokio::test]
async fn test_text_mentioning_pyplot_is_not_plotting() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let code = "note = 'see the pyplot docs'\nresult = 1";
    let result = engine.run_python(&request(&dir, code)).await;

    assert_eq!(
        result,
        ExecutionResult::Success(json!({"note": "see the pyplot docs", "result": 1}))
    );
}

#[tokio::test]
async fn test_figure_is_returned_as_png() {
    let Some(python) = which::which("python3").ok() else { return };
    let has_matplotlib = std::process::Command::new(python)
        .args(["-c", "import matplotlib"])
        .status()
        .map(|status| status.success())
        .unwrap_or(false);
    if !has_matplotlib {
        eprintln!("matplotlib not installed, skipping");
        return;
    }

    let mut config = SnipboxConfig::default();
    config.python.auto_install = false;
    // exercises capture only; the filtered path is covered by the cache warm-up
    config.python.syscall_filter = false;
    let cache = tempfile::tempdir().unwrap();
    let engine = Engine::new(config.clone())
        .with_backend(Box::new(PythonBackend::new(&config).with_plotting_dir(cache.path())));

    let dir = tempfile::tempdir().unwrap();
    let code = "import matplotlib.pyplot as plt\nplt.plot([1, 2, 3])\nresult = 'drawn'\n";
    let result = engine.run_python(&request(&dir, code)).await;

    let value = match result {
        ExecutionResult::Success(value) => value,
        other => panic!("plot failed: {other:?}"),
    };
    assert_eq!(value["result"], json!("drawn"));
    let images = value["matplotlib_images"].as_array().unwrap();
    assert_eq!(images.len(), 1);
    assert!(images[0]
        .as_str()
        .unwrap()
        .starts_with("data:image/png;base64,"));
}

#[tokio::test]
async fn test_prints_do_not_corrupt_output() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let req = request(&dir, "print('noise')\nvalues = [1, 2, 3]\ntotal = sum(values)\n");
    let result = engine.run_python(&req).await;

    assert_eq!(
        result,
        ExecutionResult::Success(json!({"values": [1, 2, 3], "total": 6}))
    );
}

#[tokio::test]
async fn test_nothing_to_report_is_success() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let result = engine.run_python(&request(&dir, "pass")).await;
    assert_eq!(result, ExecutionResult::Success(json!({"success": true})));
}

#[tokio::test]
async fn test_non_serializable_value_becomes_text() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let result = engine.run_python(&request(&dir, "result = {1, 2}")).await;
    assert_eq!(result, ExecutionResult::Success(json!({"result": "{1, 2}"})));
}

#[tokio::test]
async fn test_denied_import() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let result = engine
        .run_python(&request(&dir, "import subprocess\nresult = 1"))
        .await;
    assert_eq!(result.error(), Some("Importing subprocess is not allowed."));
}

#[tokio::test]
async fn test_file_write_denied() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let result = engine
        .run_python(&request(&dir, "with open('out.txt', 'w') as f:\n    f.write('x')\n"))
        .await;
    assert_eq!(
        result.error(),
        Some("File write operations are not allowed: open(")
    );
    assert!(!dir.path().join("out.txt").exists());
}

#[tokio::test]
async fn test_exception_is_reported() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let result = engine
        .run_python(&request(&dir, "raise ValueError('bad input')"))
        .await;
    let error = result.error().unwrap();
    assert!(error.contains("ValueError: bad input"), "{error}");
}

#[tokio::test]
async fn test_timeout() {
    let Some(engine) = engine() else { return };
    let dir = tempfile::tempdir().unwrap();

    let req = ExecutionRequest::new("while True:\n    pass\n", dir.path()).with_timeout_ms(1000);
    let result = engine.run_python(&req).await;

    assert_eq!(
        result.error(),
        Some("Timeout error: execution exceeded 1000 ms")
    );
}

#[tokio::test]
async fn test_missing_work_dir() {
    let Some(engine) = engine() else { return };

    let req = ExecutionRequest::new("result = 1", "/nonexistent/snipbox/work");
    let result = engine.run_python(&req).await;
    assert!(!result.is_success());
}
