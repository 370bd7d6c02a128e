//! Entry point for callers: one request in, one JSON value out.

use std::time::Instant;

use tracing::{info, warn};

use crate::config::{Language, SnipboxConfig};
use crate::sandbox::{build_backend, ExecutionRequest, ExecutionResult, SandboxBackend};

/// Runs snippets through the backend for their language.
///
/// Failures never escape as `Err`: every outcome is an [`ExecutionResult`],
/// either the harness value or `{ "error": message }`.
pub struct Engine {
    config: SnipboxConfig,
    python: Box<dyn SandboxBackend>,
    javascript: Box<dyn SandboxBackend>,
}

impl Engine {
    pub fn new(config: SnipboxConfig) -> Self {
        let python = build_backend(Language::Python, &config);
        let javascript = build_backend(Language::JavaScript, &config);
        Self {
            config,
            python,
            javascript,
        }
    }

    /// Swap in a custom backend for its language.
    pub fn with_backend(mut self, backend: Box<dyn SandboxBackend>) -> Self {
        match backend.language() {
            Language::Python => self.python = backend,
            Language::JavaScript => self.javascript = backend,
        }
        self
    }

    pub fn config(&self) -> &SnipboxConfig {
        &self.config
    }

    pub fn backend(&self, language: Language) -> &dyn SandboxBackend {
        match language {
            Language::Python => self.python.as_ref(),
            Language::JavaScript => self.javascript.as_ref(),
        }
    }

    pub async fn run(&self, language: Language, request: &ExecutionRequest) -> ExecutionResult {
        let started = Instant::now();
        let result = self.backend(language).run(request).await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match &result {
            Ok(_) => info!(language = language.as_str(), elapsed_ms, "Execution succeeded"),
            Err(e) if e.is_security_denial() => {
                warn!(language = language.as_str(), error = %e, "Execution denied")
            }
            Err(e) => info!(language = language.as_str(), elapsed_ms, error = %e, "Execution failed"),
        }

        ExecutionResult::from(result)
    }

    pub async fn run_python(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.run(Language::Python, request).await
    }

    pub async fn run_js(&self, request: &ExecutionRequest) -> ExecutionResult {
        self.run(Language::JavaScript, request).await
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(SnipboxConfig::default())
    }
}
