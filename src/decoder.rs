//! Maps a raw [`ExecutionOutcome`] to the caller's value or an error.

use serde_json::Value;
use tracing::debug;

use crate::error::{Result, SnipboxError};
use crate::supervisor::ExecutionOutcome;

/// Decode the single JSON line a harness printed.
///
/// Checked in order: timeout, syscall-filter kill, anything on stderr,
/// abnormal exit, empty stdout, unparsable stdout.
pub fn decode(outcome: &ExecutionOutcome, timeout_ms: u64) -> Result<Value> {
    if outcome.timed_out {
        return Err(SnipboxError::Timeout { millis: timeout_ms });
    }

    if outcome.filter_killed {
        return Err(SnipboxError::SandboxTerminated);
    }

    let stderr = outcome.stderr.trim();
    if !stderr.is_empty() {
        return Err(SnipboxError::RuntimeFailure(stderr.to_string()));
    }

    if let Some(signal) = outcome.signal {
        return Err(SnipboxError::RuntimeFailure(format!(
            "Process terminated by signal {}",
            signal
        )));
    }

    match outcome.exit_code {
        Some(0) => {}
        Some(code) => {
            return Err(SnipboxError::RuntimeFailure(format!(
                "Process exited with status {}",
                code
            )))
        }
        None => {
            return Err(SnipboxError::RuntimeFailure(
                "Process exited without a status".to_string(),
            ))
        }
    }

    let stdout = outcome.stdout.trim();
    if stdout.is_empty() {
        return Err(SnipboxError::EmptyOutput);
    }

    serde_json::from_str(stdout).map_err(|e| {
        debug!(error = %e, stdout_len = stdout.len(), "Harness output is not JSON");
        SnipboxError::DecodeFailure(e.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn exited(code: i32, stdout: &str, stderr: &str) -> ExecutionOutcome {
        ExecutionOutcome {
            exit_code: Some(code),
            stdout: stdout.to_string(),
            stderr: stderr.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_decodes_mapping() {
        let value = decode(&exited(0, "{\"result\": 6}\n", ""), 1000).unwrap();
        assert_eq!(value, json!({"result": 6}));
    }

    #[test]
    fn test_non_mapping_is_returned_as_is() {
        assert_eq!(decode(&exited(0, "[1, 2]", ""), 1000).unwrap(), json!([1, 2]));
        assert_eq!(decode(&exited(0, "\"text\"", ""), 1000).unwrap(), json!("text"));
    }

    #[test]
    fn test_nested_structure_round_trips() {
        let original = json!({
            "matrix": [[1, 2], [3.5, -4]],
            "flags": {"on": true, "off": false, "none": null},
            "deep": {"a": {"b": {"c": [{"d": "e"}]}}},
            "unicode": "héllo \u{4e16}\u{754c}"
        });
        let line = serde_json::to_string(&original).unwrap();
        let decoded = decode(&exited(0, &line, ""), 1000).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn test_timeout_wins_over_output() {
        let mut outcome = exited(0, "{\"partial\": true}", "");
        outcome.timed_out = true;
        let err = decode(&outcome, 2500).unwrap_err();
        assert!(matches!(err, SnipboxError::Timeout { millis: 2500 }));
    }

    #[test]
    fn test_filter_kill_is_distinct() {
        let outcome = ExecutionOutcome {
            signal: Some(31),
            filter_killed: true,
            ..Default::default()
        };
        assert!(matches!(
            decode(&outcome, 1000).unwrap_err(),
            SnipboxError::SandboxTerminated
        ));
    }

    #[test]
    fn test_stderr_is_fatal_even_with_output() {
        let err = decode(&exited(0, "{\"a\": 1}", "Traceback: boom\n"), 1000).unwrap_err();
        match err {
            SnipboxError::RuntimeFailure(msg) => assert_eq!(msg, "Traceback: boom"),
            other => panic!("unexpected: {other}"),
        }
    }

    #[test]
    fn test_nonzero_exit_and_other_signals() {
        assert!(matches!(
            decode(&exited(2, "", ""), 1000).unwrap_err(),
            SnipboxError::RuntimeFailure(_)
        ));
        let outcome = ExecutionOutcome {
            signal: Some(9),
            ..Default::default()
        };
        let err = decode(&outcome, 1000).unwrap_err();
        assert!(err.to_string().contains("signal 9"));
    }

    #[test]
    fn test_empty_and_garbage_output() {
        assert!(matches!(
            decode(&exited(0, "  \n", ""), 1000).unwrap_err(),
            SnipboxError::EmptyOutput
        ));
        assert!(matches!(
            decode(&exited(0, "not json", ""), 1000).unwrap_err(),
            SnipboxError::DecodeFailure(_)
        ));
    }
}
