//! exit and waitpid
//!
//! A process exits exactly once: its address space is destroyed, the status
//! is recorded under its wait lock and every waiter is woken. Its parent
//! reaps it with `waitpid`; a process nobody can wait for any more reaps
//! itself.

use log::info;

use super::manager::ProcessManager;
use super::table::{Process, ProcessId};
use super::wait::{WaitOptions, WaitStatus};
use crate::error::{ProcError, ProcResult};
use crate::memory::user::copyout;
use crate::memory::UserAddr;

impl ProcessManager {
    /// `exit(code)` bookkeeping for the calling process.
    ///
    /// The caller leaves the execution unit afterwards; the process must not
    /// be used for anything but waiting once this returns.
    pub fn exit(&self, cur: &Process, code: i32) {
        self.terminate(cur, WaitStatus::exited(code));
    }

    /// Terminate `cur` because of an unrecoverable fault raised by `signal`.
    pub fn kill_on_fault(&self, cur: &Process, signal: i32) {
        self.terminate(cur, WaitStatus::signaled(signal));
    }

    fn terminate(&self, cur: &Process, status: WaitStatus) {
        let space = cur
            .take_addrspace()
            .unwrap_or_else(|| panic!("process {} terminating without an address space", cur.pid()));
        space.deactivate();
        drop(space);

        let orphaned = cur.mark_exited(status);
        info!("[PROC] Process {} {}", cur.pid(), status);

        self.abandon_children(cur);
        cur.detach_thread();
        if orphaned {
            self.reap(cur.pid());
        }
    }

    /// Hand the children of an exiting process over to nobody: reap the
    /// ones that already exited, orphan the rest.
    fn abandon_children(&self, cur: &Process) {
        for pid in cur.take_children() {
            if let Some(child) = self.table().lookup(pid) {
                if child.orphan() {
                    self.reap(pid);
                }
            }
        }
    }

    /// Wait for child `pid` of `cur` to exit, then reap it.
    pub fn wait_child(
        &self,
        cur: &Process,
        pid: ProcessId,
        options: WaitOptions,
    ) -> ProcResult<WaitStatus> {
        let status = self.await_child(cur, pid, options)?;
        self.reap_child(cur, pid);
        Ok(status)
    }

    /// Block until child `pid` of `cur` has exited and return its status.
    /// The child stays registered.
    fn await_child(
        &self,
        cur: &Process,
        pid: ProcessId,
        options: WaitOptions,
    ) -> ProcResult<WaitStatus> {
        let child = self.table().lookup(pid).ok_or(ProcError::NoSuchProcess)?;
        if child.parent() != Some(cur.pid()) || !cur.has_child(pid) {
            return Err(ProcError::NotMyChild);
        }
        if options.contains(WaitOptions::NOHANG) && child.is_running() {
            return Err(ProcError::NotMyChild);
        }
        Ok(child.wait_for_exit())
    }

    fn reap_child(&self, cur: &Process, pid: ProcessId) {
        cur.remove_child(pid);
        self.reap(pid);
    }

    /// `waitpid(pid, status, options)` with raw syscall arguments.
    ///
    /// A null `status` skips the copy. The child is reaped only once its
    /// status reached the caller, so a faulting `status` leaves it waitable.
    pub fn waitpid(
        &self,
        cur: &Process,
        pid: i64,
        status: UserAddr,
        options: u64,
    ) -> ProcResult<ProcessId> {
        let options =
            WaitOptions::from_raw(options).ok_or(ProcError::InvalidArgument("waitpid options"))?;
        let pid = ProcessId::from_raw(pid).ok_or(ProcError::NoSuchProcess)?;

        let exit_status = self.await_child(cur, pid, options)?;
        if !status.is_null() {
            cur.with_addrspace(|space| copyout(space, status, &exit_status.raw().to_le_bytes()))
                .map_err(|_| ProcError::BadAddress)?;
        }
        self.reap_child(cur, pid);
        Ok(pid)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::config::ProcConfig;
    use crate::hosted::HostedPlatform;
    use crate::memory::user::copyin;
    use crate::memory::AddressSpace;
    use crate::process::ProcessContext;

    const STATUS: u64 = 0x2000;

    fn setup() -> (HostedPlatform, Arc<ProcessManager>, Arc<Process>) {
        let host = HostedPlatform::new();
        let manager = Arc::new(ProcessManager::new(ProcConfig::new(), host.platform()).unwrap());
        let mut space = host.vm.create_space();
        space.define_region(UserAddr(STATUS), 8).unwrap();
        let parent = manager.create_user_process("parent", Box::new(space)).unwrap();
        (host, manager, parent)
    }

    fn read_status(process: &Process) -> i32 {
        process.with_addrspace(|space| {
            let mut raw = [0u8; 4];
            copyin(space, UserAddr(STATUS), &mut raw).unwrap();
            i32::from_le_bytes(raw)
        })
    }

    #[test]
    fn test_exit_then_wait() {
        let (host, manager, parent) = setup();
        {
            let manager = manager.clone();
            host.scheduler.set_user_main(move |child, _frame| manager.exit(&child, 3));
        }
        let pid = manager.fork(&parent, &ProcessContext::new()).unwrap();
        host.scheduler.join_all();

        assert_eq!(manager.waitpid(&parent, pid.0 as i64, UserAddr(STATUS), 0), Ok(pid));
        assert_eq!(read_status(&parent), WaitStatus::exited(3).raw());
        assert!(manager.lookup(pid).is_none());
        assert!(!parent.has_child(pid));
        assert_eq!(host.vm.live_spaces(), 1);
    }

    #[test]
    fn test_wait_blocks_until_exit() {
        let (host, manager, parent) = setup();
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
        let go_rx = std::sync::Mutex::new(go_rx);
        {
            let manager = manager.clone();
            host.scheduler.set_user_main(move |child, _frame| {
                go_rx.lock().unwrap().recv().unwrap();
                manager.exit(&child, 42);
            });
        }
        let pid = manager.fork(&parent, &ProcessContext::new()).unwrap();

        let waiter = {
            let manager = manager.clone();
            let parent = parent.clone();
            std::thread::spawn(move || manager.wait_child(&parent, pid, WaitOptions::empty()))
        };
        go_tx.send(()).unwrap();

        assert_eq!(waiter.join().unwrap(), Ok(WaitStatus::exited(42)));
        host.scheduler.join_all();
    }

    #[test]
    fn test_waitpid_argument_errors() {
        let (_host, manager, parent) = setup();
        let status = UserAddr::NULL;
        assert_eq!(
            manager.waitpid(&parent, 5, status, 2),
            Err(ProcError::InvalidArgument("waitpid options"))
        );
        assert_eq!(manager.waitpid(&parent, 0, status, 0), Err(ProcError::NoSuchProcess));
        assert_eq!(manager.waitpid(&parent, -1, status, 0), Err(ProcError::NoSuchProcess));
        assert_eq!(manager.waitpid(&parent, 999, status, 0), Err(ProcError::NoSuchProcess));
        assert_eq!(
            manager.waitpid(&parent, parent.pid().0 as i64, status, 0),
            Err(ProcError::NotMyChild)
        );
    }

    #[test]
    fn test_nohang_on_running_child_is_echild() {
        let (host, manager, parent) = setup();
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
        let go_rx = std::sync::Mutex::new(go_rx);
        {
            let manager = manager.clone();
            host.scheduler.set_user_main(move |child, _frame| {
                go_rx.lock().unwrap().recv().unwrap();
                manager.exit(&child, 0);
            });
        }
        let pid = manager.fork(&parent, &ProcessContext::new()).unwrap();

        assert_eq!(
            manager.wait_child(&parent, pid, WaitOptions::NOHANG),
            Err(ProcError::NotMyChild)
        );
        go_tx.send(()).unwrap();
        host.scheduler.join_all();
        assert_eq!(
            manager.wait_child(&parent, pid, WaitOptions::NOHANG),
            Ok(WaitStatus::exited(0))
        );
    }

    #[test]
    fn test_faulting_status_pointer_keeps_child() {
        let (host, manager, parent) = setup();
        {
            let manager = manager.clone();
            host.scheduler.set_user_main(move |child, _frame| manager.exit(&child, 9));
        }
        let pid = manager.fork(&parent, &ProcessContext::new()).unwrap();
        host.scheduler.join_all();

        assert_eq!(
            manager.waitpid(&parent, pid.0 as i64, UserAddr(0xdead_0000), 0),
            Err(ProcError::BadAddress)
        );
        assert!(manager.lookup(pid).is_some());
        assert!(parent.has_child(pid));

        assert_eq!(manager.waitpid(&parent, pid.0 as i64, UserAddr(STATUS), 0), Ok(pid));
        assert_eq!(read_status(&parent), WaitStatus::exited(9).raw());
        assert!(manager.lookup(pid).is_none());
    }

    #[test]
    fn test_kill_on_fault_status() {
        let (host, manager, parent) = setup();
        {
            let manager = manager.clone();
            host.scheduler.set_user_main(move |child, _frame| manager.kill_on_fault(&child, 11));
        }
        let pid = manager.fork(&parent, &ProcessContext::new()).unwrap();
        host.scheduler.join_all();

        let status = manager.wait_child(&parent, pid, WaitOptions::empty()).unwrap();
        assert!(status.is_signaled());
        assert_eq!(status.value(), 11);
    }

    #[test]
    fn test_parent_exit_reaps_and_orphans() {
        let (host, manager, parent) = setup();
        let (go_tx, go_rx) = std::sync::mpsc::channel::<()>();
        let go_rx = std::sync::Mutex::new(go_rx);
        {
            let manager = manager.clone();
            host.scheduler.set_user_main(move |child, frame| {
                // rip tells the two children apart
                if frame.rip == 2 {
                    go_rx.lock().unwrap().recv().unwrap();
                }
                manager.exit(&child, 0);
            });
        }
        let mut frame = ProcessContext::new();
        frame.rip = 1;
        let done = manager.fork(&parent, &frame).unwrap();
        frame.rip = 2;
        let running = manager.fork(&parent, &frame).unwrap();

        // wait for the first child to have exited
        manager.lookup(done).unwrap().wait_for_exit();

        manager.exit(&parent, 0);
        assert!(manager.lookup(done).is_none());
        assert!(manager.lookup(running).is_some());

        go_tx.send(()).unwrap();
        host.scheduler.join_all();
        manager.wait_until_idle();
        assert!(manager.table().is_empty());
        assert_eq!(host.vm.live_spaces(), 0);
    }

    #[test]
    #[should_panic(expected = "without an address space")]
    fn test_exit_twice_is_fatal() {
        let (_host, manager, parent) = setup();
        manager.exit(&parent, 0);
        manager.exit(&parent, 0);
    }
}
