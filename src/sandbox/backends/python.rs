use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::analyzer::{root_module, Analyzer, ImportSet, PythonAnalyzer};
use crate::config::{get_cache_dir, Language, PythonConfig, SandboxConfig, SnipboxConfig};
use crate::decoder;
use crate::error::Result;
use crate::harness::{self, HarnessOptions};
use crate::resolver::DependencyResolver;
use crate::sandbox::traits::{BackendCapabilities, SandboxBackend};
use crate::sandbox::ExecutionRequest;
use crate::supervisor::{
    default_policy, query_interpreter, real_executable, resolve_program, syscall_filter_supported,
    Interpreter, ResourceLimits, Supervisor,
};

const EXECUTABLE_QUERY: &[&str] = &["-c", "import sys; print(sys.executable)"];

/// Builds matplotlib's font cache. Under the syscall filter the harness can
/// read the cache but never create it.
const PLOTTING_WARMUP: &str = "import matplotlib\n\
matplotlib.use('Agg')\n\
from matplotlib import font_manager\n\
font_manager.fontManager\n";

const QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// CPython backend.
///
/// Runs each snippet in a fresh `python3` subprocess. Missing third-party
/// packages are installed before the security verdict, and the harness runs
/// under the syscall filter unless that is disabled in the config.
pub struct PythonBackend {
    sandbox: SandboxConfig,
    python: PythonConfig,
    analyzer: PythonAnalyzer,
    resolver: Option<DependencyResolver>,
    /// Shared matplotlib config and font cache directory
    plotting_dir: PathBuf,
    executable: OnceCell<PathBuf>,
    plotting_ready: OnceCell<()>,
}

impl PythonBackend {
    pub fn new(config: &SnipboxConfig) -> Self {
        let resolver = config
            .python
            .auto_install
            .then(|| DependencyResolver::from_config(&config.python));

        Self {
            sandbox: config.sandbox.clone(),
            python: config.python.clone(),
            analyzer: PythonAnalyzer::new(&config.python.extra_denied_imports),
            resolver,
            plotting_dir: get_cache_dir().join("matplotlib"),
            executable: OnceCell::new(),
            plotting_ready: OnceCell::new(),
        }
    }

    /// Replace the pip-backed resolver.
    pub fn with_resolver(mut self, resolver: DependencyResolver) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Use `dir` for matplotlib's config and font cache.
    pub fn with_plotting_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.plotting_dir = dir.into();
        self
    }

    /// Check if the configured interpreter can be found.
    pub fn is_available(config: &PythonConfig) -> bool {
        resolve_program(&config.interpreter).is_ok()
    }

    /// The binary the configured interpreter really runs as. The filter pins
    /// `execve` to one path, so launchers must be resolved up front.
    async fn executable(&self) -> Result<PathBuf> {
        self.executable
            .get_or_try_init(|| {
                real_executable(&self.python.interpreter, EXECUTABLE_QUERY, QUERY_TIMEOUT)
            })
            .await
            .cloned()
    }

    /// Build the font cache once, outside the sandbox. Failure only costs
    /// plotting, so it is logged and retried on the next plotting run.
    async fn prepare_plotting(&self, executable: &Path) {
        let ready = self
            .plotting_ready
            .get_or_try_init(|| async {
                tokio::fs::create_dir_all(&self.plotting_dir).await?;
                let env = [
                    ("MPLCONFIGDIR", self.plotting_dir.display().to_string()),
                    ("MPLBACKEND", "Agg".to_string()),
                ];
                let timeout = Duration::from_secs(self.python.install_timeout_seconds)
                    .max(QUERY_TIMEOUT);
                query_interpreter(executable, &["-c", PLOTTING_WARMUP], &env, timeout).await?;
                debug!(dir = %self.plotting_dir.display(), "Plotting cache ready");
                Ok::<(), crate::error::SnipboxError>(())
            })
            .await;

        if let Err(e) = ready {
            debug!(error = %e, "Plotting cache not prepared");
        }
    }

    fn interpreter(&self, executable: &Path) -> Interpreter {
        Interpreter::new(executable)
            .arg("-B")
            .env("PYTHONDONTWRITEBYTECODE", "1")
            .env("PYTHONIOENCODING", "utf-8")
            .env("MPLBACKEND", "Agg")
            .env("MPLCONFIGDIR", self.plotting_dir.display().to_string())
            .env("OPENBLAS_NUM_THREADS", "1")
            .env("OMP_NUM_THREADS", "1")
            .env("MKL_NUM_THREADS", "1")
    }

    fn supervisor(&self, executable: &Path, timeout: Duration) -> Supervisor {
        let limits = ResourceLimits::for_execution(timeout, self.sandbox.memory_limit_mb);
        Supervisor::new(
            self.interpreter(executable),
            default_policy(self.python.syscall_filter, limits),
            self.sandbox.max_output_bytes,
        )
    }
}

/// Plotting support is set up only for snippets that import matplotlib.
fn plotting_requested(imports: &ImportSet) -> bool {
    imports
        .iter()
        .any(|name| root_module(name) == "matplotlib")
}

#[async_trait]
impl SandboxBackend for PythonBackend {
    fn name(&self) -> &str {
        "python"
    }

    fn language(&self) -> Language {
        Language::Python
    }

    fn capabilities(&self) -> BackendCapabilities {
        BackendCapabilities {
            syscall_filter: self.python.syscall_filter && syscall_filter_supported(),
            auto_install: self.resolver.is_some(),
            plotting: true,
        }
    }

    async fn run(&self, request: &ExecutionRequest) -> Result<Value> {
        request.validate()?;
        let work_dir = request.work_dir()?;
        let timeout_ms = request.timeout_ms.unwrap_or(self.sandbox.default_timeout_ms);

        let imports = self.analyzer.extract_imports(&request.code);
        debug!(imports = ?imports, "Extracted imports");

        // Installation comes first so a missing package is reported as such
        // rather than surfacing later as an ImportError.
        if let Some(resolver) = &self.resolver {
            resolver.resolve(&imports).await?;
        }

        let verdict = self.analyzer.verdict(&request.code, &imports);
        if !verdict.is_allowed() {
            warn!(verdict = ?verdict, "Snippet rejected by static analysis");
        }
        verdict.into_result()?;

        let executable = self.executable().await?;
        let plotting = plotting_requested(&imports);
        if plotting {
            self.prepare_plotting(&executable).await;
        }

        let unit = harness::build(
            Language::Python,
            &request.code,
            &request.variables,
            &HarnessOptions {
                file_stem: self.sandbox.harness_file_stem.clone(),
                plotting,
                timeout_ms,
            },
        )?;

        let timeout = Duration::from_millis(timeout_ms);
        let supervisor = self.supervisor(&executable, timeout);
        info!(
            policy = supervisor.policy_name(),
            executable = %executable.display(),
            plotting = plotting,
            timeout_ms = timeout_ms,
            "Running Python snippet"
        );

        let outcome = supervisor.execute(&unit, work_dir, timeout).await?;
        decoder::decode(&outcome, timeout_ms)
    }
}
