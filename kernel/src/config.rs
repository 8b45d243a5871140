//! Process subsystem configuration.
//!
//! Compile-time limits for identifiers, argument staging and the user stack,
//! plus [`ProcConfig`], the runtime copy a [`ProcessManager`] is built with.
//!
//! [`ProcessManager`]: crate::process::ProcessManager

use crate::error::{ProcError, ProcResult};

/// Lowest identifier handed to a user process.
/// 0 and 1 are reserved for the kernel and the boot process.
pub const PID_MIN: u32 = 2;

/// Highest identifier handed to a user process.
pub const PID_MAX: u32 = 32767;

/// Maximum number of processes registered at the same time.
pub const MAX_PROCESSES: usize = 256;

/// Maximum number of arguments accepted by `execv`.
pub const ARG_MAX: usize = 64;

/// Maximum length of one argument, terminator included.
pub const ARG_LEN_MAX: usize = 1024;

/// Maximum length of an executable path, terminator included.
pub const PATH_MAX: usize = 1024;

/// Alignment of every object placed on a fresh user stack.
pub const STACK_ALIGN: u64 = 8;

/// Size of a user pointer on the stack.
pub const POINTER_SIZE: u64 = 8;

/// Initial user stack pointer (stack grows down from here).
pub const USER_STACK_TOP: u64 = 0x0000_7FFF_FFFF_F000;

/// User stack size (64 KB).
pub const USER_STACK_SIZE: u64 = 64 * 1024;

/// Runtime configuration of the process subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcConfig {
    /// Lowest allocatable identifier
    pub pid_min: u32,
    /// Highest allocatable identifier (inclusive)
    pub pid_max: u32,
    /// Bound on concurrently registered processes
    pub max_processes: usize,
    /// Bound on `execv` argument count
    pub arg_max: usize,
    /// Bound on one `execv` argument, terminator included
    pub arg_len_max: usize,
    /// Bound on the `execv` path, terminator included
    pub path_max: usize,
}

impl ProcConfig {
    /// Configuration built from the compile-time constants.
    pub const fn new() -> Self {
        Self {
            pid_min: PID_MIN,
            pid_max: PID_MAX,
            max_processes: MAX_PROCESSES,
            arg_max: ARG_MAX,
            arg_len_max: ARG_LEN_MAX,
            path_max: PATH_MAX,
        }
    }

    /// Restrict the identifier range.
    pub const fn with_pid_range(mut self, pid_min: u32, pid_max: u32) -> Self {
        self.pid_min = pid_min;
        self.pid_max = pid_max;
        self
    }

    /// Change the bound on concurrently registered processes.
    pub const fn with_max_processes(mut self, max_processes: usize) -> Self {
        self.max_processes = max_processes;
        self
    }

    /// Number of identifiers in the configured range, 0 when it is inverted.
    pub fn pid_space(&self) -> usize {
        self.pid_max
            .checked_sub(self.pid_min)
            .map_or(0, |span| span as usize + 1)
    }

    /// Check the configuration for impossible values.
    pub fn validate(&self) -> ProcResult<()> {
        if self.pid_min == 0 || self.pid_min > self.pid_max {
            return Err(ProcError::InvalidArgument("pid range"));
        }
        if self.max_processes == 0 {
            return Err(ProcError::InvalidArgument("max_processes"));
        }
        if self.arg_max == 0 || self.arg_len_max < 2 || self.path_max < 2 {
            return Err(ProcError::InvalidArgument("argument bounds"));
        }
        Ok(())
    }
}

impl Default for ProcConfig {
    fn default() -> Self {
        Self::new()
    }
}
