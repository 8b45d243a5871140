//! Virtual File System boundary
//!
//! `execv` and `run_program` only need to open an executable by path and
//! hand it to the loader. Closing a file is dropping its vnode.

/// Filesystem errors seen by the process subsystem.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VfsError {
    #[error("no such file or directory")]
    NotFound,
    #[error("permission denied")]
    PermissionDenied,
    #[error("is a directory")]
    IsDirectory,
    #[error("I/O error")]
    Io,
}

/// An open file.
pub trait Vnode: Send {
    /// Read up to `buf.len()` bytes at `offset`; returns the count read (0 at EOF).
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError>;

    /// File size in bytes.
    fn size(&self) -> u64;
}

/// Path lookup.
pub trait Vfs: Send + Sync {
    /// Open `path` for reading.
    fn open(&self, path: &str) -> Result<Box<dyn Vnode>, VfsError>;
}

/// Read the whole of `node` into memory.
pub fn read_all(node: &dyn Vnode) -> Result<Vec<u8>, VfsError> {
    let size = usize::try_from(node.size()).map_err(|_| VfsError::Io)?;
    let mut data = vec![0u8; size];
    let mut done = 0;
    while done < size {
        let n = node.read_at(done as u64, &mut data[done..])?;
        if n == 0 {
            return Err(VfsError::Io);
        }
        done += n;
    }
    Ok(data)
}
