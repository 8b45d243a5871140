//! Scheduler boundary.
//!
//! The process subsystem hands new execution units to the scheduler and asks
//! it to leave the current one, either into user mode or for good. Run queues,
//! time slices and context switching stay on the scheduler's side.

use std::sync::Arc;

use crate::process::{Process, ProcessContext};

/// Scheduler errors.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedError {
    /// Thread table is full
    #[error("too many threads")]
    TooManyThreads,
    /// No memory for a kernel stack
    #[error("out of memory for kernel stack")]
    OutOfMemory,
}

/// Runs execution units.
pub trait Scheduler: Send + Sync {
    /// Start a new execution unit bound to `process` that resumes in user
    /// mode from `frame`.
    ///
    /// On error nothing has been started and `process` is left untouched.
    fn spawn_user_thread(
        &self,
        name: &str,
        process: Arc<Process>,
        frame: ProcessContext,
    ) -> Result<(), SchedError>;

    /// Drop to user mode in the current execution unit.
    fn enter_user(&self, frame: ProcessContext) -> !;

    /// Tear down the current execution unit. Called after it was detached
    /// from its process.
    fn exit_current(&self) -> !;
}
