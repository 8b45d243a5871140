//! Process Manager
//!
//! Owns the process table and the collaborators, and implements the
//! lifecycle operations on top of them. `fork`, `execv`, `exit` and
//! `waitpid` live in their own modules as further `impl ProcessManager`
//! blocks; this file holds construction, kernel-initiated process creation
//! and teardown.

use std::sync::Arc;

use log::{info, warn};

use super::context::{ProcessContext, UserEntry};
use super::stack::{build_user_stack, stage_kernel_args};
use super::table::{Process, ProcessId, ProcessTable};
use crate::config::ProcConfig;
use crate::error::{ProcError, ProcResult};
use crate::loader::ExecLoader;
use crate::memory::{AddressSpace, VmSystem};
use crate::scheduler::Scheduler;
use crate::vfs::{Vfs, Vnode};

/// The collaborators a manager drives.
#[derive(Clone)]
pub struct Platform {
    pub vm: Arc<dyn VmSystem>,
    pub vfs: Arc<dyn Vfs>,
    pub loader: Arc<dyn ExecLoader>,
    pub scheduler: Arc<dyn Scheduler>,
}

/// Process manager
pub struct ProcessManager {
    config: ProcConfig,
    table: ProcessTable,
    platform: Platform,
}

impl ProcessManager {
    /// Create a manager with an empty process table.
    pub fn new(config: ProcConfig, platform: Platform) -> ProcResult<Self> {
        config.validate()?;
        info!(
            "[PROC] Process manager initialized (pids {}..={}, max {} processes)",
            config.pid_min, config.pid_max, config.max_processes
        );
        Ok(Self {
            table: ProcessTable::new(&config),
            config,
            platform,
        })
    }

    pub fn config(&self) -> &ProcConfig {
        &self.config
    }

    pub fn table(&self) -> &ProcessTable {
        &self.table
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Find a published process.
    pub fn lookup(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.table.lookup(pid)
    }

    /// `getpid`
    pub fn getpid(&self, cur: &Process) -> ProcessId {
        cur.pid()
    }

    /// Register a parentless process that owns `space`.
    ///
    /// The calling execution unit becomes the process's unit, so it counts
    /// as attached right away.
    pub fn create_user_process(
        &self,
        name: &str,
        space: Box<dyn AddressSpace>,
    ) -> ProcResult<Arc<Process>> {
        let process = self.table.allocate_and_register(name, None)?;
        process.swap_addrspace(Some(space));
        process.attach_thread();
        self.table.publish(process.pid());
        info!("[PROC] Created process {} (PID {})", name, process.pid());
        Ok(process)
    }

    /// Start `path` as a new parentless process with `args` as its argument
    /// vector.
    pub fn run_program(&self, path: &str, args: &[&str]) -> ProcResult<ProcessId> {
        if path.len() + 1 > self.config.path_max {
            return Err(ProcError::NameTooLong);
        }
        let args = stage_kernel_args(args, self.config.arg_max, self.config.arg_len_max)?;

        let file = self.platform.vfs.open(path)?;
        let mut space = self
            .platform
            .vm
            .create()
            .map_err(|_| ProcError::OutOfMemory)?;
        let entry = self.build_image(space.as_mut(), file.as_ref(), &args)?;
        drop(file);

        let process = self.table.allocate_and_register(path, None)?;
        let registration = Registration::new(&self.table, process, None);
        registration.process().swap_addrspace(Some(space));
        self.start_unit(&registration, ProcessContext::new_user(&entry))?;

        let process = registration.commit();
        info!("[PROC] Started {} (PID {})", path, process.pid());
        Ok(process.pid())
    }

    /// Load `file` into `space` and lay out the initial stack.
    pub(crate) fn build_image(
        &self,
        space: &mut dyn AddressSpace,
        file: &dyn Vnode,
        args: &[Vec<u8>],
    ) -> ProcResult<UserEntry> {
        let entry_point = self.platform.loader.load(space, file)?;
        let stack_top = space.define_stack()?;
        build_user_stack(space, stack_top, args, entry_point)
    }

    /// Attach an execution unit to the registered process and hand it to
    /// the scheduler; detaches again if the scheduler refuses.
    pub(crate) fn start_unit(
        &self,
        registration: &Registration<'_>,
        frame: ProcessContext,
    ) -> ProcResult<()> {
        let process = registration.process();
        process.attach_thread();
        if let Err(e) = self
            .platform
            .scheduler
            .spawn_user_thread(process.name(), process.clone(), frame)
        {
            process.detach_thread();
            return Err(e.into());
        }
        Ok(())
    }

    /// Remove an exited process from the table.
    pub(crate) fn reap(&self, pid: ProcessId) {
        if self.table.remove(pid).is_some() {
            info!("[PROC] Reaped process {}", pid);
        }
    }

    /// Block until every process has been reaped.
    pub fn wait_until_idle(&self) {
        self.table.wait_until_empty();
    }

    /// Tear the manager down, destroying whatever is still registered.
    pub fn shutdown(self) {
        let remaining = self.table.drain();
        if !remaining.is_empty() {
            warn!(
                "[PROC] Shutting down with {} live process(es)",
                remaining.len()
            );
        }
        for process in remaining {
            if let Some(space) = process.take_addrspace() {
                space.deactivate();
            }
        }
        info!("[PROC] Process manager shut down");
    }
}

/// A registered but unpublished process, undone on drop unless committed.
///
/// Undo runs in reverse order of construction: the address space is
/// destroyed, the parent's child set loses the entry, the identifier is
/// released.
pub(crate) struct Registration<'a> {
    table: &'a ProcessTable,
    process: Arc<Process>,
    parent: Option<&'a Process>,
    committed: bool,
}

impl<'a> Registration<'a> {
    /// Take over `process`, linking it into `parent`'s child set.
    pub(crate) fn new(
        table: &'a ProcessTable,
        process: Arc<Process>,
        parent: Option<&'a Process>,
    ) -> Self {
        if let Some(parent) = parent {
            parent.add_child(process.pid());
        }
        Self {
            table,
            process,
            parent,
            committed: false,
        }
    }

    pub(crate) fn process(&self) -> &Arc<Process> {
        &self.process
    }

    /// Publish the process and keep everything.
    pub(crate) fn commit(mut self) -> Arc<Process> {
        self.committed = true;
        self.table.publish(self.process.pid());
        self.process.clone()
    }
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let pid = self.process.pid();
        drop(self.process.take_addrspace());
        if let Some(parent) = self.parent {
            parent.remove_child(pid);
        }
        self.table.remove(pid);
        warn!("[PROC] Rolled back creation of process {}", pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosted::{flat_image, HostedPlatform};
    use crate::scheduler::SchedError;
    use crate::vfs::VfsError;

    fn manager(host: &HostedPlatform) -> ProcessManager {
        ProcessManager::new(ProcConfig::new().with_max_processes(4), host.platform()).unwrap()
    }

    #[test]
    fn test_rejects_invalid_config() {
        let host = HostedPlatform::new();
        let config = ProcConfig::new().with_pid_range(5, 4);
        assert!(ProcessManager::new(config, host.platform()).is_err());
    }

    #[test]
    fn test_create_user_process_is_published() {
        let host = HostedPlatform::new();
        let manager = manager(&host);
        let init = manager
            .create_user_process("init", Box::new(host.vm.create_space()))
            .unwrap();

        assert_eq!(manager.getpid(&init), init.pid());
        assert!(manager.lookup(init.pid()).is_some());
        assert_eq!(init.parent(), None);
        assert_eq!(init.thread_count(), 1);
        assert!(init.has_addrspace());
    }

    #[test]
    fn test_run_program_starts_a_unit() {
        let host = HostedPlatform::new();
        host.fs.install("/bin/hello", flat_image(0x400000, 0x400000, b"hello"));
        let manager = manager(&host);

        let started = Arc::new(std::sync::Mutex::new(Vec::new()));
        {
            let started = started.clone();
            host.scheduler.set_user_main(move |process, frame| {
                started.lock().unwrap().push((process.pid(), frame));
            });
        }

        let pid = manager.run_program("/bin/hello", &["hello", "world"]).unwrap();
        host.scheduler.join_all();

        let process = manager.lookup(pid).unwrap();
        assert_eq!(process.name(), "/bin/hello");
        assert_eq!(process.parent(), None);

        let started = started.lock().unwrap();
        assert_eq!(started.len(), 1);
        let (unit_pid, frame) = started[0];
        assert_eq!(unit_pid, pid);
        assert_eq!(frame.rip, 0x400000);
        assert_eq!(frame.rdi, 2);
        assert_eq!(frame.rsp, frame.rsi);
        assert_eq!(frame.rsp % 8, 0);
    }

    #[test]
    fn test_run_program_failures_leave_nothing_behind() {
        let host = HostedPlatform::new();
        host.fs.install("/bin/hello", flat_image(0x400000, 0x400000, b"hello"));
        let manager = manager(&host);

        assert_eq!(
            manager.run_program("/bin/missing", &[]),
            Err(ProcError::Vfs(VfsError::NotFound))
        );

        host.vm.fail_next_define_stack();
        assert_eq!(manager.run_program("/bin/hello", &[]), Err(ProcError::OutOfMemory));

        host.scheduler.fail_next_spawn();
        assert_eq!(
            manager.run_program("/bin/hello", &[]),
            Err(ProcError::Sched(SchedError::TooManyThreads))
        );

        assert!(manager.table().is_empty());
        assert_eq!(host.vm.live_spaces(), 0);
    }

    #[test]
    fn test_registration_rollback() {
        let host = HostedPlatform::new();
        let manager = manager(&host);
        let parent = manager
            .create_user_process("parent", Box::new(host.vm.create_space()))
            .unwrap();

        let child = manager
            .table()
            .allocate_and_register("child", Some(parent.pid()))
            .unwrap();
        let registration = Registration::new(manager.table(), child, Some(&parent));
        registration
            .process()
            .swap_addrspace(Some(Box::new(host.vm.create_space())));
        assert_eq!(parent.children().len(), 1);
        assert_eq!(host.vm.live_spaces(), 2);

        drop(registration);
        assert!(parent.children().is_empty());
        assert_eq!(manager.table().len(), 1);
        assert_eq!(host.vm.live_spaces(), 1);
    }

    #[test]
    fn test_shutdown_destroys_live_spaces() {
        let host = HostedPlatform::new();
        let manager = manager(&host);
        manager
            .create_user_process("init", Box::new(host.vm.create_space()))
            .unwrap();
        assert_eq!(host.vm.live_spaces(), 1);

        manager.shutdown();
        assert_eq!(host.vm.live_spaces(), 0);
    }
}
