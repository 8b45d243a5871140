//! Process syscalls
//!
//! Decodes the process-lifecycle syscalls from a saved register frame
//! (Linux x86_64 numbering and ABI) and runs them against a
//! [`ProcessManager`].
//!
//! | Register | Purpose        |
//! |----------|----------------|
//! | RAX      | Syscall number |
//! | RDI      | Argument 1     |
//! | RSI      | Argument 2     |
//! | RDX      | Argument 3     |
//! | RAX      | Return value   |
//!
//! Handlers return the result or a negated errno. `execv` (on success) and
//! `exit` never return to the caller.

pub mod errno;

use std::sync::Arc;

#[cfg(feature = "trace-syscalls")]
use log::debug;

use self::errno::ENOSYS;
use crate::error::ProcResult;
use crate::memory::UserAddr;
use crate::process::{Process, ProcessContext, ProcessManager};

// ─── Linux syscall numbers (x86_64) ──────────────────────────────────

pub const SYS_GETPID: u64 = 39;
pub const SYS_FORK: u64 = 57;
pub const SYS_EXECV: u64 = 59;
pub const SYS_EXIT: u64 = 60;
pub const SYS_WAITPID: u64 = 61;

/// Human-readable syscall name.
pub fn syscall_name(nr: u64) -> &'static str {
    match nr {
        SYS_GETPID => "getpid",
        SYS_FORK => "fork",
        SYS_EXECV => "execv",
        SYS_EXIT => "exit",
        SYS_WAITPID => "waitpid",
        _ => "unknown",
    }
}

/// Run the syscall described by `frame` on behalf of `cur` and store the
/// result in `frame.rax`.
pub fn dispatch(manager: &ProcessManager, cur: &Arc<Process>, frame: &mut ProcessContext) {
    let nr = frame.syscall_num();
    let (a1, a2, a3, _, _, _) = frame.syscall_args();

    #[cfg(feature = "trace-syscalls")]
    debug!(
        "Syscall: {}({:#x}, {:#x}, {:#x}) from PID {}",
        syscall_name(nr),
        a1,
        a2,
        a3,
        cur.pid()
    );

    let result = match nr {
        SYS_GETPID => sys_getpid(manager, cur),
        SYS_FORK => sys_fork(manager, cur, frame),
        SYS_EXECV => sys_execv(manager, cur, a1, a2),
        SYS_EXIT => sys_exit(manager, cur, a1 as i32),
        SYS_WAITPID => sys_waitpid(manager, cur, a1 as i64, a2, a3),
        _ => -ENOSYS,
    };

    #[cfg(feature = "trace-syscalls")]
    debug!("Syscall: {} -> {}", syscall_name(nr), result);

    frame.set_syscall_return(result as u64);
}

/// Fold a result into the return convention.
fn ret<T: Into<i64>>(result: ProcResult<T>) -> i64 {
    match result {
        Ok(value) => value.into(),
        Err(e) => -e.errno(),
    }
}

/// `getpid()` → pid
pub fn sys_getpid(manager: &ProcessManager, cur: &Process) -> i64 {
    manager.getpid(cur).as_u32() as i64
}

/// `fork()` → child pid in the parent, 0 in the child
pub fn sys_fork(manager: &ProcessManager, cur: &Arc<Process>, frame: &ProcessContext) -> i64 {
    ret(manager.fork(cur, frame).map(|pid| pid.as_u32()))
}

/// `execv(path, argv)` → does not return on success, `-errno` otherwise
pub fn sys_execv(manager: &ProcessManager, cur: &Process, path: u64, argv: u64) -> i64 {
    match manager.execv(cur, UserAddr(path), UserAddr(argv)) {
        Ok(entry) => manager
            .platform()
            .scheduler
            .enter_user(ProcessContext::new_user(&entry)),
        Err(e) => -e.errno(),
    }
}

/// `exit(code)` → does not return
pub fn sys_exit(manager: &ProcessManager, cur: &Process, code: i32) -> ! {
    manager.exit(cur, code);
    manager.platform().scheduler.exit_current()
}

/// `waitpid(pid, status, options)` → pid or `-errno`
pub fn sys_waitpid(
    manager: &ProcessManager,
    cur: &Process,
    pid: i64,
    status: u64,
    options: u64,
) -> i64 {
    ret(manager
        .waitpid(cur, pid, UserAddr(status), options)
        .map(|pid| pid.as_u32()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProcConfig;
    use crate::hosted::HostedPlatform;
    use crate::syscall::errno::{ECHILD, EINVAL, ESRCH};

    fn frame(nr: u64, args: [u64; 3]) -> ProcessContext {
        let mut frame = ProcessContext::new();
        frame.rax = nr;
        frame.rdi = args[0];
        frame.rsi = args[1];
        frame.rdx = args[2];
        frame
    }

    fn setup() -> (HostedPlatform, ProcessManager, Arc<Process>) {
        let host = HostedPlatform::new();
        let manager = ProcessManager::new(ProcConfig::new(), host.platform()).unwrap();
        let process = manager
            .create_user_process("init", Box::new(host.vm.create_space()))
            .unwrap();
        (host, manager, process)
    }

    #[test]
    fn test_getpid() {
        let (_host, manager, process) = setup();
        let mut f = frame(SYS_GETPID, [0; 3]);
        dispatch(&manager, &process, &mut f);
        assert_eq!(f.rax, process.pid().as_u32() as u64);
    }

    #[test]
    fn test_unknown_syscall() {
        let (_host, manager, process) = setup();
        let mut f = frame(9999, [0; 3]);
        dispatch(&manager, &process, &mut f);
        assert_eq!(f.rax as i64, -ENOSYS);
        assert_eq!(syscall_name(9999), "unknown");
    }

    #[test]
    fn test_waitpid_errors_are_negated() {
        let (_host, manager, process) = setup();
        let cases = [
            ([1, 0, 4], -EINVAL),
            ([12345, 0, 0], -ESRCH),
            ([(-1i64) as u64, 0, 0], -ESRCH),
            ([process.pid().as_u32() as u64, 0, 0], -ECHILD),
        ];
        for (args, expected) in cases {
            let mut f = frame(SYS_WAITPID, args);
            dispatch(&manager, &process, &mut f);
            assert_eq!(f.rax as i64, expected, "waitpid{:?}", args);
        }
    }

    #[test]
    fn test_fork_returns_pid_in_parent() {
        let (host, manager, process) = setup();
        let mut f = frame(SYS_FORK, [0; 3]);
        dispatch(&manager, &process, &mut f);
        host.scheduler.join_all();

        let child = manager.lookup(crate::process::ProcessId(f.rax as u32)).unwrap();
        assert_eq!(child.parent(), Some(process.pid()));
    }

    #[test]
    fn test_exit_leaves_the_unit() {
        let (host, manager, process) = setup();
        let left = host.scheduler.run_as(process.clone(), || {
            let mut f = frame(SYS_EXIT, [7, 0, 0]);
            dispatch(&manager, &process, &mut f);
        });
        assert!(left);
        assert_eq!(process.exit_status(), Some(crate::process::WaitStatus::exited(7)));
    }
}
