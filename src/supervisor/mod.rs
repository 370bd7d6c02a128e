//! Process supervision for harness execution.
//!
//! The supervisor writes the harness into the caller's work directory,
//! starts the interpreter under a [`SecurityPolicy`], collects both output
//! streams and enforces a hard wall-clock timeout.

pub mod policy;
#[cfg(all(
    feature = "seccomp",
    target_os = "linux",
    any(target_arch = "x86_64", target_arch = "aarch64")
))]
pub mod seccomp;

use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::error::{Result, SnipboxError};
use crate::harness::HarnessUnit;

pub use policy::{
    default_policy, syscall_filter_supported, Launch, NoopPolicy, ResourceLimits, SecurityPolicy,
};

/// Parent variables passed through to the interpreter. Everything else is
/// dropped so host secrets never reach submitted code.
const ENV_PASSTHROUGH: &[&str] = &[
    "PATH",
    "HOME",
    "LANG",
    "LC_ALL",
    "LC_CTYPE",
    "TZ",
    "PYTHONPATH",
    "VIRTUAL_ENV",
    "NODE_PATH",
    "SYSTEMROOT",
];

/// Raw result of one harness run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionOutcome {
    pub exit_code: Option<i32>,
    /// Terminating signal, if any
    pub signal: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    /// Killed by the syscall filter (SIGSYS)
    pub filter_killed: bool,
}

impl ExecutionOutcome {
    /// Outcome of a run that hit the timeout. Output is discarded.
    pub fn timed_out() -> Self {
        Self {
            timed_out: true,
            ..Default::default()
        }
    }

    fn from_status(status: ExitStatus, stdout: Vec<u8>, stderr: Vec<u8>) -> Self {
        let signal = exit_signal(&status);
        Self {
            exit_code: status.code(),
            signal,
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            timed_out: false,
            filter_killed: is_filter_signal(signal),
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none() && !self.timed_out
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
fn is_filter_signal(signal: Option<i32>) -> bool {
    signal == Some(libc::SIGSYS)
}

#[cfg(not(unix))]
fn is_filter_signal(_signal: Option<i32>) -> bool {
    false
}

/// How to start the interpreter for a harness file.
#[derive(Debug, Clone)]
pub struct Interpreter {
    pub program: PathBuf,
    /// Arguments placed before the harness file name
    pub args: Vec<String>,
    /// Variables set on top of the passthrough set
    pub env: Vec<(String, String)>,
}

impl Interpreter {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Absolute path of the interpreter binary.
    pub fn resolve_program(&self) -> Result<PathBuf> {
        resolve_program(&self.program)
    }
}

/// Look `program` up on PATH unless it already names a file.
pub fn resolve_program(program: &Path) -> Result<PathBuf> {
    if program.components().count() > 1 || program.is_absolute() {
        let absolute = if program.is_absolute() {
            program.to_path_buf()
        } else {
            std::env::current_dir()?.join(program)
        };
        return Ok(absolute);
    }

    which::which(program).map_err(|e| SnipboxError::BackendNotAvailable {
        backend: program.display().to_string(),
        reason: e.to_string(),
    })
}

/// Run `program` unconfined with `args` and return its trimmed stdout. Only
/// for fixed interpreter queries, never for submitted code.
pub async fn query_interpreter(
    program: &Path,
    args: &[&str],
    env: &[(&str, String)],
    timeout: Duration,
) -> Result<String> {
    let mut command = Command::new(program);
    command
        .args(args)
        .envs(env.iter().map(|(k, v)| (k, v)))
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    let output = match tokio::time::timeout(timeout, command.output()).await {
        Ok(output) => output.map_err(|e| {
            SnipboxError::SandboxInit(format!("failed to run {}: {}", program.display(), e))
        })?,
        Err(_) => {
            return Err(SnipboxError::SandboxInit(format!(
                "{} did not answer within {} ms",
                program.display(),
                timeout.as_millis()
            )))
        }
    };

    if !output.status.success() {
        return Err(SnipboxError::BackendNotAvailable {
            backend: program.display().to_string(),
            reason: format!("exited with {}", output.status),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Binary an interpreter really runs as, asked through `args`.
///
/// Launchers such as pyenv shims or wrapper scripts exec the real interpreter
/// themselves, which the filter's pinned `execve` refuses. The reported path
/// is used as is: resolving symlinks would lose a virtualenv's identity.
pub async fn real_executable(program: &Path, args: &[&str], timeout: Duration) -> Result<PathBuf> {
    let resolved = resolve_program(program)?;
    let reported = PathBuf::from(query_interpreter(&resolved, args, &[], timeout).await?);

    if reported.is_absolute() && reported.is_file() {
        debug!(
            configured = %resolved.display(),
            executable = %reported.display(),
            "Resolved interpreter executable"
        );
        Ok(reported)
    } else {
        debug!(
            configured = %resolved.display(),
            "Interpreter did not report a usable executable, keeping configured path"
        );
        Ok(resolved)
    }
}

/// Runs harness units under a security policy.
pub struct Supervisor {
    interpreter: Interpreter,
    policy: Box<dyn SecurityPolicy>,
    max_output_bytes: usize,
}

impl Supervisor {
    pub fn new(
        interpreter: Interpreter,
        policy: Box<dyn SecurityPolicy>,
        max_output_bytes: usize,
    ) -> Self {
        Self {
            interpreter,
            policy,
            max_output_bytes,
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.policy.name()
    }

    fn launch_for(&self, harness_file: &str) -> Result<Launch> {
        let program = self.interpreter.resolve_program()?;

        let mut args: Vec<OsString> = self.interpreter.args.iter().map(OsString::from).collect();
        args.push(OsString::from(harness_file));

        let mut env: Vec<(OsString, OsString)> = ENV_PASSTHROUGH
            .iter()
            .filter_map(|key| std::env::var_os(key).map(|value| (OsString::from(key), value)))
            .collect();
        for (key, value) in &self.interpreter.env {
            env.retain(|(existing, _)| existing != key.as_str());
            env.push((OsString::from(key), OsString::from(value)));
        }

        Ok(Launch { program, args, env })
    }

    /// Materialize `unit` in `work_dir` and run it to completion or timeout.
    pub async fn execute(
        &self,
        unit: &HarnessUnit,
        work_dir: &Path,
        timeout: Duration,
    ) -> Result<ExecutionOutcome> {
        if !work_dir.is_dir() {
            return Err(SnipboxError::SandboxInit(format!(
                "work directory does not exist: {}",
                work_dir.display()
            )));
        }

        let harness_path = work_dir.join(&unit.file_name);
        tokio::fs::write(&harness_path, &unit.source)
            .await
            .map_err(|e| {
                SnipboxError::SandboxInit(format!(
                    "failed to write harness {}: {}",
                    harness_path.display(),
                    e
                ))
            })?;

        let launch = self.launch_for(&unit.file_name)?;

        let mut command = Command::new(&launch.program);
        command
            .args(&launch.args)
            .env_clear()
            .envs(launch.env.iter().map(|(k, v)| (k, v)))
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        self.policy.apply(&mut command, &launch)?;

        info!(
            language = unit.language.as_str(),
            program = %launch.program.display(),
            policy = self.policy.name(),
            timeout_ms = timeout.as_millis() as u64,
            "Starting harness"
        );

        let started = Instant::now();
        let mut child = command.spawn().map_err(|e| {
            SnipboxError::SandboxInit(format!(
                "failed to start {}: {}",
                launch.program.display(),
                e
            ))
        })?;

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();
        let limit = self.max_output_bytes;

        let run = async {
            let (status, out, err) = tokio::join!(
                child.wait(),
                read_capped(stdout, limit),
                read_capped(stderr, limit)
            );
            Ok::<_, std::io::Error>((status?, out?, err?))
        };

        let finished = tokio::time::timeout(timeout, run).await;
        match finished {
            Ok(Ok((status, out, err))) => {
                let outcome = ExecutionOutcome::from_status(status, out, err);
                debug!(
                    exit_code = ?outcome.exit_code,
                    signal = ?outcome.signal,
                    stdout_len = outcome.stdout.len(),
                    stderr_len = outcome.stderr.len(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Harness finished"
                );
                if outcome.filter_killed {
                    warn!("Harness killed by the syscall filter");
                }
                Ok(outcome)
            }
            Ok(Err(e)) => {
                let _ = child.start_kill();
                Err(SnipboxError::Io(e))
            }
            Err(_) => {
                warn!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Harness timed out, killing"
                );
                let _ = child.start_kill();
                let _ = child.wait().await;
                Ok(ExecutionOutcome::timed_out())
            }
        }
    }
}

/// Read a stream to EOF, keeping at most `limit` bytes. The rest is drained
/// so the child never blocks on a full pipe.
async fn read_capped<R>(reader: Option<R>, limit: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let Some(mut reader) = reader else {
        return Ok(Vec::new());
    };

    let mut kept = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let room = limit.saturating_sub(kept.len());
        kept.extend_from_slice(&chunk[..n.min(room)]);
    }
    Ok(kept)
}
