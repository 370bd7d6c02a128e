use async_trait::async_trait;
use serde_json::Value;

use crate::config::Language;
use crate::error::Result;
use crate::sandbox::ExecutionRequest;

/// Capability flags indicating what the backend supports
#[derive(Debug, Clone, Default)]
pub struct BackendCapabilities {
    /// Runs the harness under the default-deny syscall filter
    pub syscall_filter: bool,
    /// Installs missing third-party packages before execution
    pub auto_install: bool,
    /// Captures plots as data URIs
    pub plotting: bool,
}

/// Trait for language execution backends.
///
/// Each backend owns the full pipeline for its language: validation, static
/// analysis, dependency resolution, harness generation, supervised execution
/// and decoding.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    /// Returns the backend name (e.g., "python", "javascript")
    fn name(&self) -> &str;

    fn language(&self) -> Language;

    /// Returns the capabilities of this backend
    fn capabilities(&self) -> BackendCapabilities;

    /// Execute one request and return the decoded harness output.
    async fn run(&self, request: &ExecutionRequest) -> Result<Value>;

    /// Check if the backend can execute code.
    /// Default implementation runs a one-line snippet in a scratch directory.
    async fn health_check(&self) -> Result<bool> {
        let dir = tempfile::tempdir()?;
        let request = ExecutionRequest::new("result = 1 + 1", dir.path()).with_timeout_ms(10_000);
        match self.run(&request).await {
            Ok(value) => Ok(value.get("result") == Some(&Value::from(2))),
            Err(_) => Ok(false),
        }
    }
}
