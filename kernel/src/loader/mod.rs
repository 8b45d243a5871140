//! Executable Loader boundary
//!
//! Maps an open executable into an address space and reports its entry
//! point. The format is the loader's business; the process subsystem only
//! sees [`ExecLoader`].

use crate::memory::{AddressSpace, UserAddr, VmError};
use crate::vfs::Vnode;

/// Loader errors.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// Bad magic or unsupported format
    #[error("not an executable")]
    NotExecutable,
    /// Headers point past the end of the file
    #[error("truncated executable")]
    Truncated,
    /// Reading the file failed
    #[error("I/O error while loading")]
    Io,
    /// Mapping segments failed
    #[error("{0}")]
    Vm(#[from] VmError),
}

/// Loads program images.
pub trait ExecLoader: Send + Sync {
    /// Map `file` into `space` and return the entry point.
    fn load(&self, space: &mut dyn AddressSpace, file: &dyn Vnode) -> Result<UserAddr, LoadError>;
}
