use std::path::PathBuf;
use std::process::{Output, Stdio};
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::config::PythonConfig;
use crate::error::{Result, SnipboxError};

/// Prints a JSON list of the argv module names that cannot be found.
const PROBE_SCRIPT: &str = r#"
import importlib.util, json, sys
missing = []
for name in sys.argv[1:]:
    try:
        found = importlib.util.find_spec(name) is not None
    except (ImportError, ValueError):
        found = False
    if not found:
        missing.append(name)
print(json.dumps(missing))
"#;

/// Checks module presence and installs packages for the Python runtime.
#[async_trait]
pub trait PackageInstaller: Send + Sync {
    /// Returns the subset of `modules` that the runtime cannot import.
    async fn missing_modules(&self, modules: &[String]) -> Result<Vec<String>>;

    /// Install one package. Must tolerate the package already being present.
    async fn install(&self, package: &str) -> Result<()>;
}

/// Installs packages with pip, trying each configured command in order.
pub struct PipInstaller {
    interpreter: PathBuf,
    commands: Vec<Vec<String>>,
    timeout: Duration,
}

impl PipInstaller {
    pub fn new(interpreter: PathBuf, commands: Vec<Vec<String>>, timeout: Duration) -> Self {
        Self {
            interpreter,
            commands,
            timeout,
        }
    }

    pub fn from_config(config: &PythonConfig) -> Self {
        Self::new(
            config.interpreter.clone(),
            config.install_commands.clone(),
            Duration::from_secs(config.install_timeout_seconds),
        )
    }

    /// Expand `{python}` and `{package}` in one command template.
    fn render_command(&self, template: &[String], package: &str) -> Vec<String> {
        let python = self.interpreter.display().to_string();
        template
            .iter()
            .map(|part| part.replace("{python}", &python).replace("{package}", package))
            .collect()
    }
}

#[async_trait]
impl PackageInstaller for PipInstaller {
    async fn missing_modules(&self, modules: &[String]) -> Result<Vec<String>> {
        if modules.is_empty() {
            return Ok(Vec::new());
        }

        let mut cmd = Command::new(&self.interpreter);
        cmd.arg("-B").arg("-c").arg(PROBE_SCRIPT).args(modules);

        let output = run_bounded(cmd, self.timeout)
            .await
            .map_err(|e| SnipboxError::SandboxInit(format!("Import probe failed: {}", e)))?
            .ok_or_else(|| {
                SnipboxError::SandboxInit(format!(
                    "Import probe timed out after {} seconds",
                    self.timeout.as_secs()
                ))
            })?;

        if !output.status.success() {
            return Err(SnipboxError::SandboxInit(format!(
                "Import probe failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let missing: Vec<String> = serde_json::from_slice(&output.stdout)?;
        debug!(checked = modules.len(), missing = ?missing, "Probed module availability");
        Ok(missing)
    }

    async fn install(&self, package: &str) -> Result<()> {
        info!(package = %package, "Installing package");

        let mut last_failure = "no install command configured".to_string();

        for template in &self.commands {
            let argv = self.render_command(template, package);
            let Some((program, args)) = argv.split_first() else {
                continue;
            };

            let mut cmd = Command::new(program);
            cmd.args(args);

            match run_bounded(cmd, self.timeout).await {
                Ok(Some(output)) if output.status.success() => {
                    info!(package = %package, installer = %program, "Package installed");
                    return Ok(());
                }
                Ok(Some(output)) => {
                    last_failure = String::from_utf8_lossy(&output.stderr).trim().to_string();
                    debug!(package = %package, installer = %program, status = ?output.status.code(), "Install attempt failed");
                }
                Ok(None) => {
                    last_failure = format!("timed out after {} seconds", self.timeout.as_secs());
                    debug!(package = %package, installer = %program, "Install attempt timed out");
                }
                Err(e) => {
                    last_failure = e.to_string();
                    debug!(package = %package, installer = %program, error = %e, "Installer not runnable");
                }
            }
        }

        warn!(package = %package, reason = %last_failure, "All install attempts failed");
        Err(SnipboxError::InstallFailed {
            package: package.to_string(),
            reason: last_failure,
        })
    }
}

/// Run a command to completion, or return `None` if it outlives `timeout`.
/// The child is killed when the deadline passes.
async fn run_bounded(mut cmd: Command, timeout: Duration) -> std::io::Result<Option<Output>> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.kill_on_drop(true);

    match tokio::time::timeout(timeout, cmd.output()).await {
        Ok(result) => result.map(Some),
        Err(_) => Ok(None),
    }
}
