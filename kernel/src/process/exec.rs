//! execv
//!
//! Arguments are staged into kernel memory first, under fixed bounds and
//! before anything is allocated. The new image is then built in a fresh
//! address space installed as current; if loading or stack setup fails the
//! old space goes back in and the process is exactly as before the call.

use log::{info, warn};

use super::context::UserEntry;
use super::manager::ProcessManager;
use super::table::Process;
use crate::error::{ProcError, ProcResult};
use crate::memory::user::{copyin_ptr_array, copyinstr, CopyError};
use crate::memory::{AddressSpace, UserAddr};

/// Path and arguments copied out of the caller's memory, terminators kept.
#[derive(Debug)]
struct StagedExec {
    path: String,
    args: Vec<Vec<u8>>,
}

impl ProcessManager {
    /// Replace the image of `cur` with the executable at user address `path`,
    /// passing the null-terminated argument vector at `argv`.
    ///
    /// On success the returned entry describes the new image; the caller
    /// transfers to it and never returns to the old one.
    pub fn execv(&self, cur: &Process, path: UserAddr, argv: UserAddr) -> ProcResult<UserEntry> {
        let staged = cur.with_addrspace(|space| self.stage_exec(space, path, argv))?;
        self.replace_image(cur, &staged)
    }

    fn stage_exec(
        &self,
        space: &dyn AddressSpace,
        path: UserAddr,
        argv: UserAddr,
    ) -> ProcResult<StagedExec> {
        let config = self.config();

        let mut path = copyinstr(space, path, config.path_max).map_err(|e| match e {
            CopyError::TooLong => ProcError::NameTooLong,
            CopyError::Fault(_) => ProcError::BadAddress,
        })?;
        path.pop();
        let path = String::from_utf8(path).map_err(|_| ProcError::InvalidArgument("path"))?;

        let arg_err = |e: CopyError| match e {
            CopyError::TooLong => ProcError::ArgumentTooLarge,
            CopyError::Fault(_) => ProcError::BadAddress,
        };
        let ptrs = copyin_ptr_array(space, argv, config.arg_max).map_err(arg_err)?;
        let args = ptrs
            .into_iter()
            .map(|ptr| copyinstr(space, ptr, config.arg_len_max).map_err(arg_err))
            .collect::<ProcResult<Vec<_>>>()?;

        Ok(StagedExec { path, args })
    }

    fn replace_image(&self, cur: &Process, staged: &StagedExec) -> ProcResult<UserEntry> {
        let file = self.platform().vfs.open(&staged.path)?;
        let fresh = self
            .platform()
            .vm
            .create()
            .map_err(|_| ProcError::OutOfMemory)?;

        fresh.activate();
        let old = cur.swap_addrspace(Some(fresh));
        let built = cur.with_addrspace(|space| self.build_image(space, file.as_ref(), &staged.args));
        drop(file);

        match built {
            Ok(entry) => {
                drop(old);
                info!(
                    "[PROC] Process {} exec {} (argc {})",
                    cur.pid(),
                    staged.path,
                    entry.argc
                );
                Ok(entry)
            }
            Err(e) => {
                let failed = cur.swap_addrspace(old);
                cur.with_addrspace(|space| space.activate());
                drop(failed);
                warn!("[PROC] Process {} exec {} failed: {}", cur.pid(), staged.path, e);
                Err(e)
            }
        }
    }
}
