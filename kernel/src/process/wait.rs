//! Exit status encoding and wait options.
//!
//! A terminated process leaves a single `i32` behind: the low two bits say
//! how it ended, the remaining bits carry the exit code or signal number.

use bitflags::bitflags;

const WHAT_MASK: i32 = 3;
const EXITED: i32 = 0;
const SIGNALED: i32 = 1;
const CORE_DUMPED: i32 = 2;
const STOPPED: i32 = 3;

bitflags! {
    /// `waitpid` options.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct WaitOptions: u32 {
        /// Do not block if the child is still running
        const NOHANG = 1;
    }
}

impl WaitOptions {
    /// Parse raw options from a syscall, rejecting unknown bits.
    pub fn from_raw(raw: u64) -> Option<Self> {
        u32::try_from(raw).ok().and_then(Self::from_bits)
    }
}

/// How a process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// `exit(code)`
    Exited(i32),
    /// Killed by a signal
    Signaled(i32),
    /// Killed by a signal, core dumped
    CoreDumped(i32),
    /// Stopped by a signal
    Stopped(i32),
}

/// Encoded exit status as written to the user's status word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WaitStatus(i32);

impl WaitStatus {
    /// Normal exit with `code`.
    pub const fn exited(code: i32) -> Self {
        Self((code << 2) | EXITED)
    }

    /// Termination by signal `sig`.
    pub const fn signaled(sig: i32) -> Self {
        Self((sig << 2) | SIGNALED)
    }

    pub const fn core_dumped(sig: i32) -> Self {
        Self((sig << 2) | CORE_DUMPED)
    }

    pub const fn stopped(sig: i32) -> Self {
        Self((sig << 2) | STOPPED)
    }

    /// Wrap a raw status word.
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// `WIFEXITED`
    pub const fn is_exited(self) -> bool {
        self.0 & WHAT_MASK == EXITED
    }

    /// `WIFSIGNALED` (core dumps included)
    pub const fn is_signaled(self) -> bool {
        matches!(self.0 & WHAT_MASK, SIGNALED | CORE_DUMPED)
    }

    /// `WEXITSTATUS` / `WTERMSIG` / `WSTOPSIG`
    pub const fn value(self) -> i32 {
        self.0 >> 2
    }

    pub fn decode(self) -> Termination {
        let value = self.value();
        match self.0 & WHAT_MASK {
            EXITED => Termination::Exited(value),
            SIGNALED => Termination::Signaled(value),
            CORE_DUMPED => Termination::CoreDumped(value),
            _ => Termination::Stopped(value),
        }
    }
}

impl core::fmt::Display for WaitStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self.decode() {
            Termination::Exited(code) => write!(f, "exited({})", code),
            Termination::Signaled(sig) => write!(f, "signaled({})", sig),
            Termination::CoreDumped(sig) => write!(f, "core dumped({})", sig),
            Termination::Stopped(sig) => write!(f, "stopped({})", sig),
        }
    }
}
