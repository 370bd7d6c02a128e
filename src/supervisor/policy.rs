use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;
use tracing::warn;

use crate::error::Result;

/// Everything needed to start the interpreter, resolved before spawning.
#[derive(Debug, Clone)]
pub struct Launch {
    /// Absolute path of the interpreter
    pub program: PathBuf,
    /// Arguments after `argv[0]`
    pub args: Vec<OsString>,
    /// Complete child environment
    pub env: Vec<(OsString, OsString)>,
}

/// Kernel resource limits applied to the harness process.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub address_space_bytes: Option<u64>,
    pub cpu_seconds: Option<u64>,
    pub open_files: Option<u64>,
}

impl ResourceLimits {
    /// Limits for one execution: CPU time is the wall-clock budget rounded up
    /// plus one second, so the timeout always fires first.
    pub fn for_execution(timeout: Duration, memory_limit_mb: u64) -> Self {
        let cpu = timeout.as_secs() + u64::from(timeout.subsec_nanos() > 0) + 1;
        Self {
            address_space_bytes: (memory_limit_mb > 0)
                .then(|| memory_limit_mb.saturating_mul(1024 * 1024)),
            cpu_seconds: Some(cpu),
            open_files: Some(64),
        }
    }

    pub fn without_address_space(mut self) -> Self {
        self.address_space_bytes = None;
        self
    }

    /// Apply the limits to the calling process. Only async-signal-safe calls.
    #[cfg(unix)]
    pub(crate) fn apply_in_child(&self) -> std::io::Result<()> {
        let limits = [
            (libc::RLIMIT_AS, self.address_space_bytes),
            (libc::RLIMIT_CPU, self.cpu_seconds),
            (libc::RLIMIT_NOFILE, self.open_files),
        ];

        for (resource, value) in limits {
            let Some(value) = value else { continue };
            let limit = libc::rlimit {
                rlim_cur: value as libc::rlim_t,
                rlim_max: value as libc::rlim_t,
            };
            // SAFETY: plain syscall on a stack value
            if unsafe { libc::setrlimit(resource, &limit) } != 0 {
                return Err(std::io::Error::last_os_error());
            }
        }
        Ok(())
    }
}

/// Platform confinement applied to the interpreter process before it runs.
pub trait SecurityPolicy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Configure `command` so the child starts confined. `launch` describes
    /// exactly what `command` will run.
    fn apply(&self, command: &mut Command, launch: &Launch) -> Result<()>;
}

/// No confinement.
#[derive(Debug, Default)]
pub struct NoopPolicy;

impl SecurityPolicy for NoopPolicy {
    fn name(&self) -> &'static str {
        "none"
    }

    fn apply(&self, _command: &mut Command, _launch: &Launch) -> Result<()> {
        Ok(())
    }
}

/// Resource limits only.
#[cfg(unix)]
#[derive(Debug)]
pub struct RlimitPolicy {
    limits: ResourceLimits,
}

#[cfg(unix)]
impl RlimitPolicy {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

#[cfg(unix)]
impl SecurityPolicy for RlimitPolicy {
    fn name(&self) -> &'static str {
        "rlimit"
    }

    fn apply(&self, command: &mut Command, _launch: &Launch) -> Result<()> {
        let limits = self.limits;
        // SAFETY: the hook only issues setrlimit syscalls
        unsafe {
            command.pre_exec(move || limits.apply_in_child());
        }
        Ok(())
    }
}

/// Whether the syscall filter can be installed on this build and platform.
pub fn syscall_filter_supported() -> bool {
    cfg!(all(
        feature = "seccomp",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))
}

/// Strongest policy available for the requested settings.
pub fn default_policy(syscall_filter: bool, limits: ResourceLimits) -> Box<dyn SecurityPolicy> {
    #[cfg(all(
        feature = "seccomp",
        target_os = "linux",
        any(target_arch = "x86_64", target_arch = "aarch64")
    ))]
    {
        if syscall_filter {
            return Box::new(crate::supervisor::seccomp::SeccompPolicy::new(limits));
        }
    }

    if syscall_filter && !syscall_filter_supported() {
        warn!("Syscall filter requested but not supported here, continuing without it");
    }

    #[cfg(unix)]
    {
        return Box::new(RlimitPolicy::new(limits));
    }

    #[cfg(not(unix))]
    {
        let _ = limits;
        return Box::new(NoopPolicy);
    }
}
