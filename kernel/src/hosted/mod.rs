//! Hosted platform
//!
//! Collaborators that run on a normal host: in-memory address spaces, an
//! in-memory filesystem with a flat executable format, and a scheduler that
//! gives every execution unit its own thread. Tests and host demos wire a
//! [`ProcessManager`](crate::process::ProcessManager) to these instead of
//! real hardware.

mod fs;
mod sched;
mod vm;

pub use fs::{flat_image, FlatLoader, HostedFs, FLAT_HEADER_SIZE, FLAT_MAGIC};
pub use sched::{current_process, HostedScheduler, UserMain};
pub use vm::{HostedSpace, HostedVm};

use std::sync::Arc;

use crate::process::Platform;

/// One of each hosted collaborator, kept by concrete type so tests can reach
/// the fault switches.
#[derive(Clone, Default)]
pub struct HostedPlatform {
    pub vm: Arc<HostedVm>,
    pub fs: Arc<HostedFs>,
    pub loader: Arc<FlatLoader>,
    pub scheduler: Arc<HostedScheduler>,
}

impl HostedPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same collaborators as trait objects.
    pub fn platform(&self) -> Platform {
        Platform {
            vm: self.vm.clone(),
            vfs: self.fs.clone(),
            loader: self.loader.clone(),
            scheduler: self.scheduler.clone(),
        }
    }
}
