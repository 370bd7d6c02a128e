//! Default-deny seccomp-BPF filter for harness processes.
//!
//! The filter is built in the parent and installed by a `pre_exec` hook after
//! `PR_SET_NO_NEW_PRIVS`. The hook then calls `execve` itself with a path
//! pointer the filter has pinned, so the interpreter launch is the only
//! `execve` the filter lets through.
//!
//! Layout: architecture check, load syscall number, then one rule per
//! syscall. A rule is a `JEQ nr` that skips over the rule body on mismatch;
//! every body ends in `RET`, so no jump ever crosses more than one body.
//! Anything unmatched falls through to `RET KILL_PROCESS` (SIGSYS).

use std::ffi::{CString, OsStr, OsString};
use std::os::raw::c_char;
use std::os::unix::ffi::OsStrExt;

use tokio::process::Command;
use tracing::debug;

use crate::error::{Result, SnipboxError};
use crate::supervisor::policy::{Launch, ResourceLimits, SecurityPolicy};

const SECCOMP_SET_MODE_FILTER: libc::c_uint = 1;
const SECCOMP_RET_KILL_PROCESS: u32 = 0x8000_0000;
const SECCOMP_RET_ERRNO: u32 = 0x0005_0000;
const SECCOMP_RET_ALLOW: u32 = 0x7fff_0000;

const BPF_LD: u16 = 0x00;
const BPF_JMP: u16 = 0x05;
const BPF_RET: u16 = 0x06;
const BPF_W: u16 = 0x00;
const BPF_ABS: u16 = 0x20;
const BPF_JEQ: u16 = 0x10;
const BPF_JSET: u16 = 0x40;
const BPF_K: u16 = 0x00;

#[cfg(target_arch = "x86_64")]
const AUDIT_ARCH: u32 = 0xc000_003e;
#[cfg(target_arch = "aarch64")]
const AUDIT_ARCH: u32 = 0xc000_00b7;

// seccomp_data offsets; argument words are little-endian
const OFFSET_NR: u32 = 0;
const OFFSET_ARCH: u32 = 4;

const fn arg_low(index: u32) -> u32 {
    16 + 8 * index
}

const fn arg_high(index: u32) -> u32 {
    20 + 8 * index
}

const OPEN_WRITE_FLAGS: u32 = (libc::O_WRONLY
    | libc::O_RDWR
    | libc::O_CREAT
    | libc::O_TRUNC
    | libc::O_APPEND) as u32;

/// Syscalls allowed unconditionally.
const ALLOWED: &[libc::c_long] = &[
    // read-oriented file access
    libc::SYS_read,
    libc::SYS_pread64,
    libc::SYS_readv,
    libc::SYS_close,
    libc::SYS_close_range,
    libc::SYS_fstat,
    libc::SYS_newfstatat,
    libc::SYS_statx,
    libc::SYS_statfs,
    libc::SYS_fstatfs,
    libc::SYS_lseek,
    libc::SYS_getdents64,
    libc::SYS_fcntl,
    libc::SYS_faccessat,
    libc::SYS_faccessat2,
    libc::SYS_readlinkat,
    libc::SYS_getcwd,
    libc::SYS_fadvise64,
    // memory
    libc::SYS_mmap,
    libc::SYS_munmap,
    libc::SYS_mprotect,
    libc::SYS_mremap,
    libc::SYS_brk,
    libc::SYS_madvise,
    libc::SYS_mincore,
    libc::SYS_membarrier,
    // identity
    libc::SYS_getpid,
    libc::SYS_getppid,
    libc::SYS_gettid,
    libc::SYS_getuid,
    libc::SYS_geteuid,
    libc::SYS_getgid,
    libc::SYS_getegid,
    libc::SYS_getresuid,
    libc::SYS_getresgid,
    libc::SYS_uname,
    libc::SYS_sysinfo,
    libc::SYS_getrusage,
    libc::SYS_times,
    libc::SYS_set_tid_address,
    libc::SYS_prlimit64,
    libc::SYS_rseq,
    // signals
    libc::SYS_rt_sigaction,
    libc::SYS_rt_sigprocmask,
    libc::SYS_rt_sigreturn,
    libc::SYS_sigaltstack,
    // time
    libc::SYS_clock_gettime,
    libc::SYS_clock_getres,
    libc::SYS_gettimeofday,
    libc::SYS_nanosleep,
    libc::SYS_clock_nanosleep,
    // thread synchronization
    libc::SYS_futex,
    libc::SYS_set_robust_list,
    libc::SYS_get_robust_list,
    libc::SYS_sched_yield,
    libc::SYS_sched_getaffinity,
    libc::SYS_sched_getparam,
    libc::SYS_sched_getscheduler,
    // polling
    libc::SYS_ppoll,
    libc::SYS_pselect6,
    libc::SYS_epoll_create1,
    libc::SYS_epoll_ctl,
    libc::SYS_epoll_pwait,
    // misc
    libc::SYS_getrandom,
    libc::SYS_ioctl,
    libc::SYS_dup,
    libc::SYS_dup3,
    libc::SYS_exit,
    libc::SYS_exit_group,
];

/// Legacy x86_64 entry points of the calls above.
#[cfg(target_arch = "x86_64")]
const ALLOWED_LEGACY: &[libc::c_long] = &[
    libc::SYS_stat,
    libc::SYS_lstat,
    libc::SYS_access,
    libc::SYS_readlink,
    libc::SYS_poll,
    libc::SYS_select,
    libc::SYS_epoll_wait,
    libc::SYS_dup2,
    libc::SYS_arch_prctl,
];

#[cfg(target_arch = "aarch64")]
const ALLOWED_LEGACY: &[libc::c_long] = &[];

/// Filesystem mutation, refused with EPERM.
const MUTATIONS: &[libc::c_long] = &[
    libc::SYS_mkdirat,
    libc::SYS_unlinkat,
    libc::SYS_renameat,
    libc::SYS_renameat2,
    libc::SYS_ftruncate,
    libc::SYS_fchmod,
    libc::SYS_fchmodat,
    libc::SYS_symlinkat,
    libc::SYS_linkat,
];

#[cfg(target_arch = "x86_64")]
const MUTATIONS_LEGACY: &[libc::c_long] = &[
    libc::SYS_mkdir,
    libc::SYS_unlink,
    libc::SYS_rename,
    libc::SYS_rmdir,
    libc::SYS_truncate,
    libc::SYS_symlink,
    libc::SYS_link,
    libc::SYS_chmod,
    libc::SYS_creat,
    libc::SYS_fork,
    libc::SYS_vfork,
];

#[cfg(target_arch = "aarch64")]
const MUTATIONS_LEGACY: &[libc::c_long] = &[libc::SYS_truncate];

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SockFilter {
    pub code: u16,
    pub jt: u8,
    pub jf: u8,
    pub k: u32,
}

impl SockFilter {
    const fn stmt(code: u16, k: u32) -> Self {
        Self {
            code,
            jt: 0,
            jf: 0,
            k,
        }
    }

    const fn jump(code: u16, k: u32, jt: u8, jf: u8) -> Self {
        Self { code, jt, jf, k }
    }
}

#[repr(C)]
struct SockFprog {
    len: u16,
    filter: *const SockFilter,
}

fn ret(action: u32) -> SockFilter {
    SockFilter::stmt(BPF_RET | BPF_K, action)
}

fn load(offset: u32) -> SockFilter {
    SockFilter::stmt(BPF_LD | BPF_W | BPF_ABS, offset)
}

fn errno(code: i32) -> u32 {
    SECCOMP_RET_ERRNO | (code as u32 & 0xffff)
}

/// What happens when a syscall matches a rule.
#[derive(Debug, Clone, Copy)]
enum Rule {
    Allow,
    Errno(i32),
    /// Allow only for file descriptors 1 and 2
    StdStreamsOnly,
    /// Allow unless argument `flags_arg` carries a write or create flag
    ReadOnlyOpen { flags_arg: u32 },
    /// Allow only thread creation
    ThreadsOnly,
    /// Allow only when argument 0 is exactly `path`
    PinnedExec { path: u64 },
}

impl Rule {
    fn body(self) -> Vec<SockFilter> {
        match self {
            Rule::Allow => vec![ret(SECCOMP_RET_ALLOW)],
            Rule::Errno(code) => vec![ret(errno(code))],
            Rule::StdStreamsOnly => vec![
                load(arg_low(0)),
                SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, 1, 2, 0),
                SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, 2, 1, 0),
                ret(errno(libc::EPERM)),
                ret(SECCOMP_RET_ALLOW),
            ],
            Rule::ReadOnlyOpen { flags_arg } => vec![
                load(arg_low(flags_arg)),
                SockFilter::jump(BPF_JMP | BPF_JSET | BPF_K, OPEN_WRITE_FLAGS, 1, 0),
                ret(SECCOMP_RET_ALLOW),
                ret(errno(libc::EACCES)),
            ],
            Rule::ThreadsOnly => vec![
                load(arg_low(0)),
                SockFilter::jump(BPF_JMP | BPF_JSET | BPF_K, libc::CLONE_THREAD as u32, 0, 1),
                ret(SECCOMP_RET_ALLOW),
                ret(errno(libc::EPERM)),
            ],
            Rule::PinnedExec { path } => vec![
                load(arg_low(0)),
                SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, path as u32, 0, 3),
                load(arg_high(0)),
                SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, (path >> 32) as u32, 0, 1),
                ret(SECCOMP_RET_ALLOW),
                ret(SECCOMP_RET_KILL_PROCESS),
            ],
        }
    }
}

/// Every rule of the filter, `exec_path` being the pinned `execve` argument.
fn rules(exec_path: u64) -> Vec<(libc::c_long, Rule)> {
    let mut rules: Vec<(libc::c_long, Rule)> = Vec::new();

    rules.push((libc::SYS_write, Rule::StdStreamsOnly));
    rules.push((libc::SYS_writev, Rule::StdStreamsOnly));
    rules.push((libc::SYS_openat, Rule::ReadOnlyOpen { flags_arg: 2 }));
    #[cfg(target_arch = "x86_64")]
    rules.push((libc::SYS_open, Rule::ReadOnlyOpen { flags_arg: 1 }));
    rules.push((libc::SYS_clone, Rule::ThreadsOnly));
    rules.push((libc::SYS_clone3, Rule::Errno(libc::ENOSYS)));
    rules.push((libc::SYS_execve, Rule::PinnedExec { path: exec_path }));

    for &nr in ALLOWED.iter().chain(ALLOWED_LEGACY) {
        rules.push((nr, Rule::Allow));
    }
    for &nr in MUTATIONS.iter().chain(MUTATIONS_LEGACY) {
        rules.push((nr, Rule::Errno(libc::EPERM)));
    }

    rules
}

/// Assemble the BPF program.
pub fn build_filter(exec_path: u64) -> Vec<SockFilter> {
    let mut program = vec![
        load(OFFSET_ARCH),
        SockFilter::jump(BPF_JMP | BPF_JEQ | BPF_K, AUDIT_ARCH, 1, 0),
        ret(SECCOMP_RET_KILL_PROCESS),
        load(OFFSET_NR),
    ];

    for (nr, rule) in rules(exec_path) {
        let body = rule.body();
        // A skipped body leaves the syscall number in the accumulator
        program.push(SockFilter::jump(
            BPF_JMP | BPF_JEQ | BPF_K,
            nr as u32,
            0,
            body.len() as u8,
        ));
        program.extend(body);
    }

    program.push(ret(SECCOMP_RET_KILL_PROCESS));
    program
}

/// Arguments of the pinned `execve`, prepared before fork so the child
/// performs no allocation.
struct ExecImage {
    program: CString,
    _argv: Vec<CString>,
    _envp: Vec<CString>,
    argv_ptrs: Vec<*const c_char>,
    envp_ptrs: Vec<*const c_char>,
    filter: Vec<SockFilter>,
    limits: ResourceLimits,
}

// SAFETY: the raw pointers refer to buffers owned by the same value and are
// only dereferenced by the kernel in the forked child.
unsafe impl Send for ExecImage {}
unsafe impl Sync for ExecImage {}

fn c_string(value: &OsStr) -> Result<CString> {
    CString::new(value.as_bytes()).map_err(|_| {
        SnipboxError::SandboxInit(format!("argument contains a NUL byte: {:?}", value))
    })
}

impl ExecImage {
    fn new(launch: &Launch, limits: ResourceLimits) -> Result<Self> {
        let program = c_string(launch.program.as_os_str())?;

        let mut argv = vec![program.clone()];
        for arg in &launch.args {
            argv.push(c_string(arg)?);
        }

        let mut envp = Vec::with_capacity(launch.env.len());
        for (key, value) in &launch.env {
            let mut entry = OsString::from(key);
            entry.push("=");
            entry.push(value);
            envp.push(c_string(&entry)?);
        }

        let argv_ptrs = argv
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();
        let envp_ptrs = envp
            .iter()
            .map(|s| s.as_ptr())
            .chain(std::iter::once(std::ptr::null()))
            .collect();

        let filter = build_filter(program.as_ptr() as u64);

        Ok(Self {
            program,
            _argv: argv,
            _envp: envp,
            argv_ptrs,
            envp_ptrs,
            filter,
            limits,
        })
    }

    /// Runs in the forked child. Returns only on failure.
    fn confine_and_exec(&self) -> std::io::Result<()> {
        self.limits.apply_in_child()?;

        let prog = SockFprog {
            len: self.filter.len() as u16,
            filter: self.filter.as_ptr(),
        };

        // SAFETY: async-signal-safe syscalls on memory owned by `self`
        unsafe {
            if libc::prctl(libc::PR_SET_NO_NEW_PRIVS, 1, 0, 0, 0) != 0 {
                return Err(std::io::Error::last_os_error());
            }
            if libc::syscall(
                libc::SYS_seccomp,
                SECCOMP_SET_MODE_FILTER,
                0,
                &prog as *const SockFprog,
            ) != 0
            {
                return Err(std::io::Error::last_os_error());
            }
            libc::execve(
                self.program.as_ptr(),
                self.argv_ptrs.as_ptr(),
                self.envp_ptrs.as_ptr(),
            );
        }

        Err(std::io::Error::last_os_error())
    }
}

/// Resource limits plus the default-deny syscall filter.
#[derive(Debug)]
pub struct SeccompPolicy {
    limits: ResourceLimits,
}

impl SeccompPolicy {
    pub fn new(limits: ResourceLimits) -> Self {
        Self { limits }
    }
}

impl SecurityPolicy for SeccompPolicy {
    fn name(&self) -> &'static str {
        "seccomp"
    }

    fn apply(&self, command: &mut Command, launch: &Launch) -> Result<()> {
        let image = ExecImage::new(launch, self.limits)?;
        debug!(
            program = %launch.program.display(),
            instructions = image.filter.len(),
            "Installing syscall filter"
        );

        // SAFETY: the hook allocates nothing and only issues raw syscalls
        unsafe {
            command.pre_exec(move || image.confine_and_exec());
        }
        Ok(())
    }
}
