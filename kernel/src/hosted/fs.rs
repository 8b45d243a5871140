//! In-memory filesystem and flat executable format.
//!
//! A flat image is a 20-byte header followed by the payload:
//!
//! | Offset | Size | Field                     |
//! |--------|------|---------------------------|
//! | 0      | 4    | magic `FLAT`              |
//! | 4      | 8    | load address (LE)         |
//! | 12     | 8    | entry point (LE)          |
//! | 20     | ..   | payload, mapped verbatim  |
//!
//! The payload must not be empty and the entry point must fall inside it.

use std::sync::Arc;

use hashbrown::HashMap;
use log::debug;
use spin::Mutex;

use crate::loader::{ExecLoader, LoadError};
use crate::memory::{AddressSpace, UserAddr};
use crate::vfs::{read_all, Vfs, VfsError, Vnode};

/// Flat image magic.
pub const FLAT_MAGIC: [u8; 4] = *b"FLAT";

/// Flat header size in bytes.
pub const FLAT_HEADER_SIZE: usize = 20;

/// Granularity of the region a payload is loaded into.
const LOAD_GRANULE: u64 = 4096;

#[derive(Clone)]
enum Node {
    File(Arc<[u8]>),
    Directory,
}

/// Path-keyed in-memory filesystem.
#[derive(Default)]
pub struct HostedFs {
    nodes: Mutex<HashMap<String, Node>>,
}

impl HostedFs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace the file at `path`.
    pub fn install(&self, path: &str, contents: impl Into<Vec<u8>>) {
        let data: Vec<u8> = contents.into();
        let data: Arc<[u8]> = data.into();
        self.nodes.lock().insert(String::from(path), Node::File(data));
    }

    /// Create a directory entry at `path`.
    pub fn install_dir(&self, path: &str) {
        self.nodes.lock().insert(String::from(path), Node::Directory);
    }
}

impl Vfs for HostedFs {
    fn open(&self, path: &str) -> Result<Box<dyn Vnode>, VfsError> {
        match self.nodes.lock().get(path) {
            Some(Node::File(data)) => Ok(Box::new(HostedFile { data: data.clone() })),
            Some(Node::Directory) => Err(VfsError::IsDirectory),
            None => Err(VfsError::NotFound),
        }
    }
}

/// An open in-memory file.
struct HostedFile {
    data: Arc<[u8]>,
}

impl Vnode for HostedFile {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize, VfsError> {
        let start = usize::try_from(offset).map_err(|_| VfsError::Io)?;
        if start >= self.data.len() {
            return Ok(0);
        }
        let n = buf.len().min(self.data.len() - start);
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        Ok(n)
    }

    fn size(&self) -> u64 {
        self.data.len() as u64
    }
}

/// Build a flat image that maps `payload` at `load_addr` and starts at `entry`.
pub fn flat_image(load_addr: u64, entry: u64, payload: &[u8]) -> Vec<u8> {
    let mut image = Vec::with_capacity(FLAT_HEADER_SIZE + payload.len());
    image.extend_from_slice(&FLAT_MAGIC);
    image.extend_from_slice(&load_addr.to_le_bytes());
    image.extend_from_slice(&entry.to_le_bytes());
    image.extend_from_slice(payload);
    image
}

/// Loader for flat images.
#[derive(Debug, Default, Clone, Copy)]
pub struct FlatLoader;

impl FlatLoader {
    pub fn new() -> Self {
        Self
    }
}

fn le_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

impl ExecLoader for FlatLoader {
    fn load(&self, space: &mut dyn AddressSpace, file: &dyn Vnode) -> Result<UserAddr, LoadError> {
        let image = read_all(file).map_err(|_| LoadError::Io)?;
        if image.len() < FLAT_MAGIC.len() || image[..4] != FLAT_MAGIC {
            return Err(LoadError::NotExecutable);
        }
        if image.len() <= FLAT_HEADER_SIZE {
            return Err(LoadError::Truncated);
        }

        let load_addr = le_u64(&image[4..12]);
        let entry = le_u64(&image[12..20]);
        let payload = &image[FLAT_HEADER_SIZE..];
        let end = load_addr
            .checked_add(payload.len() as u64)
            .ok_or(LoadError::NotExecutable)?;
        if entry < load_addr || entry >= end {
            return Err(LoadError::NotExecutable);
        }

        let size = (payload.len() as u64).div_ceil(LOAD_GRANULE) * LOAD_GRANULE;
        space.define_region(UserAddr(load_addr), size)?;
        space.write(UserAddr(load_addr), payload)?;

        debug!(
            "[LOADER] Flat image: {} bytes at {:#x}, entry {:#x}",
            payload.len(),
            load_addr,
            entry
        );
        Ok(UserAddr(entry))
    }
}
