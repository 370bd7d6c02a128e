use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{Result, SnipboxError};
use crate::harness::validate_variables;

/// One execution request as received from the caller.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub code: String,

    /// Values injected as top-level variables; `null` means none
    #[serde(default, deserialize_with = "null_as_empty")]
    pub variables: Map<String, Value>,

    /// Writable directory owned by the caller; the harness file lands here
    #[serde(default, alias = "workDir", skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Wall-clock budget; the configured default applies when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<Map<String, Value>>::deserialize(deserializer).map(Option::unwrap_or_default)
}

impl ExecutionRequest {
    pub fn new(code: impl Into<String>, temp_dir: impl Into<PathBuf>) -> Self {
        Self {
            code: code.into(),
            variables: Map::new(),
            temp_dir: Some(temp_dir.into()),
            timeout_ms: None,
        }
    }

    pub fn with_variables(mut self, variables: Map<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.variables.insert(key.into(), value);
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Parse a request body.
    pub fn from_json(body: &str) -> Result<Self> {
        serde_json::from_str(body).map_err(|e| SnipboxError::MalformedRequest(e.to_string()))
    }

    /// Request-level checks that precede any analysis.
    pub fn validate(&self) -> Result<()> {
        if self.code.trim().is_empty() {
            return Err(SnipboxError::MalformedRequest(
                "code must not be empty".to_string(),
            ));
        }
        validate_variables(&self.variables)?;
        if self.timeout_ms == Some(0) {
            return Err(SnipboxError::MalformedRequest(
                "timeoutMs must be positive".to_string(),
            ));
        }
        self.work_dir()?;
        Ok(())
    }

    pub fn work_dir(&self) -> Result<&Path> {
        self.temp_dir
            .as_deref()
            .ok_or_else(|| SnipboxError::MalformedRequest("tempDir is required".to_string()))
    }
}

/// Caller-facing result: the harness value, or `{ "error": message }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionResult {
    Failure { error: String },
    Success(Value),
}

impl ExecutionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            ExecutionResult::Failure { error } => Some(error),
            ExecutionResult::Success(_) => None,
        }
    }

    /// The JSON body sent back to the caller.
    pub fn into_json(self) -> Value {
        match self {
            ExecutionResult::Success(value) => value,
            ExecutionResult::Failure { error } => serde_json::json!({ "error": error }),
        }
    }
}

impl From<SnipboxError> for ExecutionResult {
    fn from(err: SnipboxError) -> Self {
        ExecutionResult::Failure {
            error: err.to_string(),
        }
    }
}

impl From<Result<Value>> for ExecutionResult {
    fn from(result: Result<Value>) -> Self {
        match result {
            Ok(value) => ExecutionResult::Success(value),
            Err(err) => err.into(),
        }
    }
}
