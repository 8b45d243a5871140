//! fork
//!
//! The child is built while reserved in the table: invisible to lookup, in
//! the parent's child set, undone by the [`Registration`] guard if any step
//! fails. It is published only once the scheduler has accepted its unit.

use std::sync::Arc;

use log::info;

use super::context::ProcessContext;
use super::manager::{ProcessManager, Registration};
use super::table::{Process, ProcessId};
use crate::error::{ProcError, ProcResult};

impl ProcessManager {
    /// Duplicate `cur` into a new child that resumes from `frame` with a
    /// syscall return of 0. Returns the child's pid.
    pub fn fork(&self, cur: &Arc<Process>, frame: &ProcessContext) -> ProcResult<ProcessId> {
        let child = self.table().allocate_and_register(cur.name(), Some(cur.pid()))?;
        let registration = Registration::new(self.table(), child, Some(cur.as_ref()));

        let space = cur
            .with_addrspace(|space| space.duplicate())
            .map_err(|_| ProcError::OutOfMemory)?;
        registration.process().swap_addrspace(Some(space));

        self.start_unit(&registration, frame.fork_child())?;

        let child = registration.commit();
        info!(
            "[PROC] Process {} forked child {} ({})",
            cur.pid(),
            child.pid(),
            child.name()
        );
        Ok(child.pid())
    }
}
