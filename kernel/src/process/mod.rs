//! Process Management
//!
//! This module provides process creation (`fork`), image replacement
//! (`execv`), termination (`exit`) and synchronous waiting (`waitpid`) for
//! userspace programs.

pub mod context;
mod exec;
mod exit;
mod fork;
pub mod manager;
pub mod stack;
pub mod table;
pub mod wait;

pub use context::{ProcessContext, UserEntry};
pub use manager::{Platform, ProcessManager};
pub use table::{Process, ProcessId, ProcessState, ProcessTable};
pub use wait::{Termination, WaitOptions, WaitStatus};
