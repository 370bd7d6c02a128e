use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::analyzer::{Analyzer, JavaScriptAnalyzer};
use crate::config::{JavaScriptConfig, Language, SandboxConfig, SnipboxConfig};
use crate::decoder;
use crate::error::{Result, SnipboxError};
use crate::harness::{self, HarnessOptions};
use crate::sandbox::traits::{BackendCapabilities, SandboxBackend};
use crate::sandbox::ExecutionRequest;
use crate::supervisor::{
    default_policy, query_interpreter, resolve_program, syscall_filter_supported, Interpreter,
    ResourceLimits, Supervisor,
};

const VERSION_TIMEOUT: Duration = Duration::from_secs(10);

/// Node.js backend.
///
/// The snippet is evaluated inside a fresh `vm` context created by a small
/// host script, so it never sees `require`, `process` or the host globals.
/// The host itself runs under Node's permission model: it may read its own
/// harness file and nothing else, and may not spawn processes, load addons
/// or write files. No packages are installed for JavaScript.
pub struct JavaScriptBackend {
    sandbox: SandboxConfig,
    javascript: JavaScriptConfig,
    analyzer: JavaScriptAnalyzer,
    permission_flag: OnceCell<&'static str>,
}

impl JavaScriptBackend {
    pub fn new(config: &SnipboxConfig) -> Self {
        Self {
            sandbox: config.sandbox.clone(),
            javascript: config.javascript.clone(),
            analyzer: JavaScriptAnalyzer::default(),
            permission_flag: OnceCell::new(),
        }
    }

    /// Check if the configured Node binary can be found.
    pub fn is_available(config: &JavaScriptConfig) -> bool {
        resolve_program(&config.node_binary).is_ok()
    }

    /// Flag enabling the permission model on the installed Node.
    async fn permission_flag(&self) -> Result<&'static str> {
        self.permission_flag
            .get_or_try_init(|| async {
                let program = resolve_program(&self.javascript.node_binary)?;
                let version = query_interpreter(&program, &["--version"], &[], VERSION_TIMEOUT)
                    .await?;
                debug!(version = %version, "Detected Node version");
                node_permission_flag(&version).ok_or_else(|| SnipboxError::BackendNotAvailable {
                    backend: "javascript".to_string(),
                    reason: format!(
                        "Node {} has no permission model, 20 or newer is required",
                        version
                    ),
                })
            })
            .await
            .copied()
    }

    fn interpreter(&self, permission_flag: &str, harness_path: &Path) -> Interpreter {
        let mut interpreter = Interpreter::new(&self.javascript.node_binary)
            .arg(permission_flag)
            .arg(format!("--allow-fs-read={}", harness_path.display()))
            // the permission model warns on every start, and stderr means failure
            .arg("--no-warnings");
        if self.sandbox.memory_limit_mb > 0 {
            interpreter =
                interpreter.arg(format!("--max-old-space-size={}", self.sandbox.memory_limit_mb));
        }
        interpreter
    }

    fn supervisor(
        &self,
        permission_flag: &str,
        harness_path: &Path,
        timeout: Duration,
    ) -> Supervisor {
        // V8 reserves far more address space than it uses; heap size is
        // capped through --max-old-space-size instead.
        let limits = ResourceLimits::for_execution(timeout, self.sandbox.memory_limit_mb)
            .without_address_space();

        Supervisor::new(
            self.interpreter(permission_flag, harness_path),
            default_policy(self.javascript.syscall_filter, limits),
            self.sandbox.max_output_bytes,
        )
    }
}

/// Permission model flag for a `node --version` string such as `v22.13.1`.
///
/// `--permission` is stable from 22.13 and 23.5; earlier releases back to 20
/// only know `--experimental-permission`. Older versions have no equivalent.
pub fn node_permission_flag(version: &str) -> Option<&'static str> {
    let mut parts = version.trim().trim_start_matches('v').split('.');
    let major: u32 = parts.next()?.parse().ok()?;
    let minor: u32 = parts.next().and_then(|m| m.parse().ok()).unwrap_or(0);

    match (major, minor) {
        (0..=19, _) => None,
        (22, 13..) | (23, 5..) | (24.., _) => Some("--permission"),
        _ => Some("--experimental-permission"),
    }
}

#[async_trait]
impl SandboxBackend for JavaScriptBackend {
    fn name(&self) -> &str {
        "javascript"
    }

    fn language(&self) -> Language {
        Language::JavaScript
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            syscall_filter: self.javascript.syscall_filter && syscall_filter_supported(),
            auto_install: false,
            plotting: false,
        }
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<Value> {
        request.validate()?;
        let work_dir = request.work_dir()?;
        let timeout_ms = request.timeout_ms.unwrap_or(self.sandbox.default_timeout_ms);

        let imports = self.analyzer.extract_imports(&request.code);
        debug!(imports = ?imports, "Extracted imports");

        let verdict = self.analyzer.verdict(&request.code, &imports);
        if !verdict.is_allowed() {
            warn!(verdict = ?verdict, "Snippet rejected by static analysis");
        }
        verdict.into_result()?;

        let permission_flag = self.permission_flag().await?;

        let unit = harness::build(
            Language::JavaScript,
            &request.code,
            &request.variables,
            &HarnessOptions {
                file_stem: self.sandbox.harness_file_stem.clone(),
                plotting: false,
                timeout_ms,
            },
        )?;
        let harness_path = harness_read_path(work_dir, &unit.file_name).await?;

        let timeout = Duration::from_millis(timeout_ms);
        let supervisor = self.supervisor(permission_flag, &harness_path, timeout);
        info!(
            policy = supervisor.policy_name(),
            permission = permission_flag,
            timeout_ms = timeout_ms,
            "Running JavaScript snippet"
        );

        let outcome = supervisor.execute(&unit, work_dir, timeout).await?;
        decoder::decode(&outcome, timeout_ms)
    }
}

/// Absolute, symlink-free path of the harness file, as Node checks reads
/// against the resolved path.
async fn harness_read_path(work_dir: &Path, file_name: &str) -> Result<PathBuf> {
    let work_dir = tokio::fs::canonicalize(work_dir).await.map_err(|e| {
        SnipboxError::SandboxInit(format!(
            "work directory does not exist: {} ({})",
            work_dir.display(),
            e
        ))
    })?;
    Ok(work_dir.join(file_name))
}
