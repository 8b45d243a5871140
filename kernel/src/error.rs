//! Process subsystem errors.
//!
//! Every fallible operation returns [`ProcError`]. Collaborator errors
//! ([`VmError`], [`VfsError`], [`LoadError`], [`SchedError`]) convert into it
//! with `?`, and [`ProcError::errno`] maps the result onto the syscall return
//! convention.
//!
//! Internal-consistency violations (a process without its address space, a
//! poisoned wait lock) are not represented here: they panic.

use crate::loader::LoadError;
use crate::memory::VmError;
use crate::scheduler::SchedError;
use crate::syscall::errno::*;
use crate::vfs::VfsError;

/// Result alias used throughout the crate.
pub type ProcResult<T> = Result<T, ProcError>;

/// Errors surfaced by fork, execv, waitpid and the registry.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcError {
    // ── Resource exhaustion (retry-safe) ────────────────────────────

    #[error("no process identifiers left")]
    OutOfIdentifiers,

    #[error("out of memory")]
    OutOfMemory,

    // ── Input validation ────────────────────────────────────────────

    #[error("argument list too long")]
    ArgumentTooLarge,

    #[error("bad user address")]
    BadAddress,

    #[error("path name too long")]
    NameTooLong,

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    // ── Relationship errors ─────────────────────────────────────────

    #[error("no such process")]
    NoSuchProcess,

    #[error("not a child of the calling process")]
    NotMyChild,

    // ── Collaborator failures ───────────────────────────────────────

    #[error("vfs: {0}")]
    Vfs(#[from] VfsError),

    #[error("exec: {0}")]
    Exec(#[from] LoadError),

    #[error("scheduler: {0}")]
    Sched(#[from] SchedError),
}

impl ProcError {
    /// Positive errno value for this error.
    pub fn errno(&self) -> i64 {
        match self {
            Self::OutOfIdentifiers => EAGAIN,
            Self::OutOfMemory => ENOMEM,
            Self::ArgumentTooLarge => E2BIG,
            Self::BadAddress => EFAULT,
            Self::NameTooLong => ENAMETOOLONG,
            Self::InvalidArgument(_) => EINVAL,
            Self::NoSuchProcess => ESRCH,
            Self::NotMyChild => ECHILD,
            Self::Vfs(e) => match e {
                VfsError::NotFound => ENOENT,
                VfsError::PermissionDenied => EACCES,
                VfsError::IsDirectory => EISDIR,
                VfsError::Io => EIO,
            },
            Self::Exec(e) => match e {
                LoadError::NotExecutable | LoadError::Truncated => ENOEXEC,
                LoadError::Io => EIO,
                LoadError::Vm(VmError::OutOfMemory) => ENOMEM,
                LoadError::Vm(_) => EFAULT,
            },
            Self::Sched(e) => match e {
                SchedError::TooManyThreads => EAGAIN,
                SchedError::OutOfMemory => ENOMEM,
            },
        }
    }

    /// Whether retrying the same call may succeed once resources free up.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::OutOfIdentifiers
                | Self::OutOfMemory
                | Self::Sched(_)
                | Self::Exec(LoadError::Vm(VmError::OutOfMemory))
        )
    }
}

impl From<VmError> for ProcError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::OutOfMemory => ProcError::OutOfMemory,
            VmError::Fault { .. } | VmError::NoStack => ProcError::BadAddress,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(ProcError::OutOfIdentifiers.errno(), EAGAIN);
        assert_eq!(ProcError::ArgumentTooLarge.errno(), E2BIG);
        assert_eq!(ProcError::NoSuchProcess.errno(), ESRCH);
        assert_eq!(ProcError::NotMyChild.errno(), ECHILD);
        assert_eq!(ProcError::from(VfsError::NotFound).errno(), ENOENT);
        assert_eq!(ProcError::from(LoadError::NotExecutable).errno(), ENOEXEC);
    }

    #[test]
    fn test_vm_fault_is_bad_address() {
        let err: ProcError = VmError::Fault { addr: 0x10 }.into();
        assert_eq!(err, ProcError::BadAddress);
        assert!(!err.is_transient());
        assert!(ProcError::OutOfIdentifiers.is_transient());
    }
}
