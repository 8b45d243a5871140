//! Process Table
//!
//! The registry of all processes in the system and the per-process record
//! it hands out.
//!
//! The table lock (a spinlock) covers identifier allocation, insertion,
//! lookup and removal only. Nothing slow ever runs under it: address-space
//! duplication and program loading happen after the record is handed back.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar};

use hashbrown::HashMap;
use log::debug;
use spin::Mutex;

use super::wait::WaitStatus;
use crate::config::ProcConfig;
use crate::error::{ProcError, ProcResult};
use crate::memory::AddressSpace;

/// Process ID type
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u32);

impl ProcessId {
    /// Create a ProcessId from a raw syscall argument.
    ///
    /// Non-positive values never name a process.
    pub fn from_raw(raw: i64) -> Option<Self> {
        u32::try_from(raw).ok().filter(|&v| v > 0).map(ProcessId)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Process has a live execution unit
    Running,
    /// Process has called exit (or was killed); the status is final
    Exited(WaitStatus),
}

/// State guarded by the per-process wait lock.
#[derive(Debug)]
struct Lifecycle {
    state: ProcessState,
    /// Nobody will ever wait for this process; it reaps itself on exit.
    orphaned: bool,
}

/// A process: one address space, one execution unit, and the bookkeeping a
/// parent needs to wait for it.
pub struct Process {
    /// Process ID
    pid: ProcessId,
    /// Process name
    name: String,
    /// Parent process ID (`None` for processes started by the kernel)
    parent: Option<ProcessId>,
    /// Children not yet reaped, in creation order
    children: Mutex<Vec<ProcessId>>,
    /// The address space, `None` only after exit or during teardown
    addrspace: Mutex<Option<Box<dyn AddressSpace>>>,
    /// Execution units bound to this process
    threads: AtomicUsize,
    /// Liveness, exit status and orphan flag
    wait_lock: std::sync::Mutex<Lifecycle>,
    /// Broadcast once when the process exits
    wait_cv: Condvar,
}

impl Process {
    fn new(pid: ProcessId, name: &str, parent: Option<ProcessId>) -> Self {
        Self {
            pid,
            name: String::from(name),
            parent,
            children: Mutex::new(Vec::new()),
            addrspace: Mutex::new(None),
            threads: AtomicUsize::new(0),
            wait_lock: std::sync::Mutex::new(Lifecycle {
                state: ProcessState::Running,
                orphaned: parent.is_none(),
            }),
            wait_cv: Condvar::new(),
        }
    }

    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<ProcessId> {
        self.parent
    }

    // ── Children ────────────────────────────────────────────────────

    /// Snapshot of the child set.
    pub fn children(&self) -> Vec<ProcessId> {
        self.children.lock().clone()
    }

    pub fn has_child(&self, pid: ProcessId) -> bool {
        self.children.lock().contains(&pid)
    }

    pub(crate) fn add_child(&self, pid: ProcessId) {
        self.children.lock().push(pid);
    }

    pub(crate) fn remove_child(&self, pid: ProcessId) -> bool {
        let mut children = self.children.lock();
        match children.iter().position(|&c| c == pid) {
            Some(index) => {
                children.remove(index);
                true
            }
            None => false,
        }
    }

    pub(crate) fn take_children(&self) -> Vec<ProcessId> {
        core::mem::take(&mut *self.children.lock())
    }

    // ── Address space ───────────────────────────────────────────────

    pub fn has_addrspace(&self) -> bool {
        self.addrspace.lock().is_some()
    }

    /// Run `f` on the address space.
    ///
    /// # Panics
    ///
    /// If the process has no address space: callers only get here on
    /// behalf of a running process, which always owns one.
    pub fn with_addrspace<R>(&self, f: impl FnOnce(&mut dyn AddressSpace) -> R) -> R {
        let mut slot = self.addrspace.lock();
        match slot.as_mut() {
            Some(space) => f(space.as_mut()),
            None => panic!("process {} ({}) has no address space", self.pid, self.name),
        }
    }

    /// Install `space` and return the previous one.
    pub(crate) fn swap_addrspace(
        &self,
        space: Option<Box<dyn AddressSpace>>,
    ) -> Option<Box<dyn AddressSpace>> {
        core::mem::replace(&mut *self.addrspace.lock(), space)
    }

    pub(crate) fn take_addrspace(&self) -> Option<Box<dyn AddressSpace>> {
        self.addrspace.lock().take()
    }

    // ── Execution units ─────────────────────────────────────────────

    pub fn thread_count(&self) -> usize {
        self.threads.load(Ordering::Acquire)
    }

    pub(crate) fn attach_thread(&self) {
        self.threads.fetch_add(1, Ordering::AcqRel);
    }

    /// Detach one execution unit; returns how many remain.
    pub(crate) fn detach_thread(&self) -> usize {
        let prev = self.threads.fetch_sub(1, Ordering::AcqRel);
        assert!(prev > 0, "process {} detached more threads than attached", self.pid);
        prev - 1
    }

    // ── Lifecycle ───────────────────────────────────────────────────

    fn lifecycle(&self) -> std::sync::MutexGuard<'_, Lifecycle> {
        self.wait_lock
            .lock()
            .unwrap_or_else(|_| panic!("wait lock of process {} poisoned", self.pid))
    }

    pub fn state(&self) -> ProcessState {
        self.lifecycle().state
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Exit status, once the process has exited.
    pub fn exit_status(&self) -> Option<WaitStatus> {
        match self.state() {
            ProcessState::Exited(status) => Some(status),
            ProcessState::Running => None,
        }
    }

    /// Record `status`, flip to `Exited` and wake every waiter.
    ///
    /// Returns whether the process was orphaned, in which case the caller
    /// must reap it since no parent ever will.
    ///
    /// # Panics
    ///
    /// If the process already exited: the status is written exactly once.
    pub(crate) fn mark_exited(&self, status: WaitStatus) -> bool {
        let orphaned = {
            let mut life = self.lifecycle();
            assert_eq!(
                life.state,
                ProcessState::Running,
                "process {} exited twice",
                self.pid
            );
            life.state = ProcessState::Exited(status);
            life.orphaned
        };
        self.wait_cv.notify_all();
        orphaned
    }

    /// Mark the process as having no parent left to wait for it.
    ///
    /// Returns `true` if it has already exited, meaning the caller must reap
    /// it now.
    pub(crate) fn orphan(&self) -> bool {
        let mut life = self.lifecycle();
        life.orphaned = true;
        matches!(life.state, ProcessState::Exited(_))
    }

    /// Block until the process has exited and return its status.
    ///
    /// Liveness is checked under the wait lock before sleeping, so an exit
    /// that already happened is never missed.
    pub fn wait_for_exit(&self) -> WaitStatus {
        let mut life = self.lifecycle();
        loop {
            if let ProcessState::Exited(status) = life.state {
                return status;
            }
            life = self
                .wait_cv
                .wait(life)
                .unwrap_or_else(|_| panic!("wait lock of process {} poisoned", self.pid));
        }
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("state", &self.state())
            .finish()
    }
}

/// Registry slot; reserved slots are invisible to lookup.
struct Entry {
    process: Arc<Process>,
    published: bool,
}

struct TableInner {
    entries: HashMap<ProcessId, Entry>,
    /// Next identifier to try
    next_pid: u32,
}

/// Process registry
pub struct ProcessTable {
    inner: Mutex<TableInner>,
    pid_min: u32,
    pid_max: u32,
    /// Bound on registered processes (never above the identifier space)
    capacity: usize,
    /// Paired with `empty_cv` for [`ProcessTable::wait_until_empty`]
    empty_lock: std::sync::Mutex<()>,
    empty_cv: Condvar,
}

impl ProcessTable {
    /// Create an empty table for `config`, which must have passed
    /// [`ProcConfig::validate`].
    pub(crate) fn new(config: &ProcConfig) -> Self {
        Self {
            inner: Mutex::new(TableInner {
                entries: HashMap::new(),
                next_pid: config.pid_min,
            }),
            pid_min: config.pid_min,
            pid_max: config.pid_max,
            capacity: config.max_processes.min(config.pid_space()),
            empty_lock: std::sync::Mutex::new(()),
            empty_cv: Condvar::new(),
        }
    }

    /// Whether another process could be registered right now.
    pub fn has_capacity(&self) -> bool {
        self.inner.lock().entries.len() < self.capacity
    }

    /// Allocate an identifier and register a fresh process record.
    ///
    /// The record stays invisible to [`lookup`](Self::lookup) until
    /// [`publish`](Self::publish). Fails without side effects when the
    /// table is full.
    pub fn allocate_and_register(
        &self,
        name: &str,
        parent: Option<ProcessId>,
    ) -> ProcResult<Arc<Process>> {
        let mut inner = self.inner.lock();
        if inner.entries.len() >= self.capacity {
            return Err(ProcError::OutOfIdentifiers);
        }

        let pid = self.next_free_pid(&mut inner);
        let process = Arc::new(Process::new(pid, name, parent));
        inner.entries.insert(
            pid,
            Entry {
                process: process.clone(),
                published: false,
            },
        );
        Ok(process)
    }

    /// Pick the next unused identifier, wrapping around the range.
    ///
    /// Callers guarantee the table is below capacity, so a free one exists.
    fn next_free_pid(&self, inner: &mut TableInner) -> ProcessId {
        loop {
            let candidate = ProcessId(inner.next_pid);
            inner.next_pid = if inner.next_pid >= self.pid_max {
                self.pid_min
            } else {
                inner.next_pid + 1
            };
            if !inner.entries.contains_key(&candidate) {
                return candidate;
            }
        }
    }

    /// Make a registered process visible to lookup.
    pub fn publish(&self, pid: ProcessId) {
        if let Some(entry) = self.inner.lock().entries.get_mut(&pid) {
            entry.published = true;
        }
    }

    /// Find a published process.
    pub fn lookup(&self, pid: ProcessId) -> Option<Arc<Process>> {
        self.inner
            .lock()
            .entries
            .get(&pid)
            .filter(|entry| entry.published)
            .map(|entry| entry.process.clone())
    }

    /// Drop a process from the table, freeing its identifier.
    pub fn remove(&self, pid: ProcessId) -> Option<Arc<Process>> {
        let (removed, now_empty) = {
            let mut inner = self.inner.lock();
            let removed = inner.entries.remove(&pid).map(|entry| entry.process);
            (removed, inner.entries.is_empty())
        };
        if removed.is_some() {
            debug!("[PROC] Released pid {}", pid);
            if now_empty {
                let _guard = self.empty_lock.lock().unwrap_or_else(|e| e.into_inner());
                self.empty_cv.notify_all();
            }
        }
        removed
    }

    /// Number of registered processes, reserved ones included.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted identifiers of all published processes.
    pub fn pids(&self) -> Vec<ProcessId> {
        let mut pids: Vec<ProcessId> = self
            .inner
            .lock()
            .entries
            .iter()
            .filter(|(_, entry)| entry.published)
            .map(|(pid, _)| *pid)
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Block until no process is registered.
    pub fn wait_until_empty(&self) {
        let mut guard = self.empty_lock.lock().unwrap_or_else(|e| e.into_inner());
        while !self.is_empty() {
            guard = self.empty_cv.wait(guard).unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Remove every entry, returning them for teardown.
    pub(crate) fn drain(&self) -> Vec<Arc<Process>> {
        let drained: Vec<Arc<Process>> = {
            let mut inner = self.inner.lock();
            inner.entries.drain().map(|(_, entry)| entry.process).collect()
        };
        let _guard = self.empty_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.empty_cv.notify_all();
        drained
    }
}
