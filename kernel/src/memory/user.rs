//! User memory access.
//!
//! Bounded copy-in/copy-out between kernel buffers and a process's address
//! space. Every helper reports faults explicitly; none of them panic on a bad
//! user pointer. Null pointers always fault.

use super::{AddressSpace, UserAddr, VmError};
use crate::config::POINTER_SIZE;

/// Why a bounded copy-in stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyError {
    /// The user pointer (or something it points at) is not readable
    Fault(UserAddr),
    /// No terminator within the allowed length / too many entries
    TooLong,
}

impl From<VmError> for CopyError {
    fn from(e: VmError) -> Self {
        match e {
            VmError::Fault { addr } => CopyError::Fault(UserAddr(addr)),
            _ => CopyError::Fault(UserAddr::NULL),
        }
    }
}

/// Copy `buf.len()` bytes from user address `src`.
pub fn copyin(space: &dyn AddressSpace, src: UserAddr, buf: &mut [u8]) -> Result<(), CopyError> {
    if src.is_null() {
        return Err(CopyError::Fault(src));
    }
    space.read(src, buf)?;
    Ok(())
}

/// Copy `data` to user address `dst`.
pub fn copyout(space: &mut dyn AddressSpace, dst: UserAddr, data: &[u8]) -> Result<(), CopyError> {
    if dst.is_null() {
        return Err(CopyError::Fault(dst));
    }
    space.write(dst, data)?;
    Ok(())
}

/// Copy a NUL-terminated string of at most `max` bytes (terminator included).
///
/// The returned buffer keeps its terminator.
pub fn copyinstr(space: &dyn AddressSpace, src: UserAddr, max: usize) -> Result<Vec<u8>, CopyError> {
    if src.is_null() {
        return Err(CopyError::Fault(src));
    }

    let mut out = Vec::new();
    let mut byte = [0u8; 1];
    for offset in 0..max as u64 {
        let addr = src.checked_add(offset).ok_or(CopyError::Fault(src))?;
        space.read(addr, &mut byte)?;
        out.push(byte[0]);
        if byte[0] == 0 {
            return Ok(out);
        }
    }
    Err(CopyError::TooLong)
}

/// Read one user pointer stored at `src`.
pub fn copyin_ptr(space: &dyn AddressSpace, src: UserAddr) -> Result<UserAddr, CopyError> {
    let mut raw = [0u8; POINTER_SIZE as usize];
    copyin(space, src, &mut raw)?;
    Ok(UserAddr(u64::from_le_bytes(raw)))
}

/// Read a null-terminated array of user pointers holding at most `max` entries.
///
/// Stops at the first entry past `max` without reading further.
pub fn copyin_ptr_array(
    space: &dyn AddressSpace,
    src: UserAddr,
    max: usize,
) -> Result<Vec<UserAddr>, CopyError> {
    let mut ptrs = Vec::new();
    let mut slot = src;
    loop {
        let ptr = copyin_ptr(space, slot)?;
        if ptr.is_null() {
            return Ok(ptrs);
        }
        if ptrs.len() == max {
            return Err(CopyError::TooLong);
        }
        ptrs.push(ptr);
        slot = slot.checked_add(POINTER_SIZE).ok_or(CopyError::Fault(slot))?;
    }
}

/// Encode user pointers as one contiguous little-endian block.
pub fn encode_ptr_array(ptrs: &[UserAddr]) -> Vec<u8> {
    ptrs.iter().flat_map(|p| p.0.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hosted::HostedSpace;

    const BASE: u64 = 0x1000;

    fn space_with(bytes: &[u8]) -> HostedSpace {
        let mut space = HostedSpace::new();
        space.define_region(UserAddr(BASE), 0x100).unwrap();
        space.write(UserAddr(BASE), bytes).unwrap();
        space
    }

    #[test]
    fn test_copyinstr_keeps_terminator() {
        let space = space_with(b"hello\0junk");
        let s = copyinstr(&space, UserAddr(BASE), 16).unwrap();
        assert_eq!(s, b"hello\0");
    }

    #[test]
    fn test_copyinstr_bound_includes_terminator() {
        let space = space_with(b"abcd\0");
        assert_eq!(copyinstr(&space, UserAddr(BASE), 5).unwrap(), b"abcd\0");
        assert_eq!(copyinstr(&space, UserAddr(BASE), 4), Err(CopyError::TooLong));
    }

    #[test]
    fn test_null_and_unmapped_fault() {
        let space = space_with(b"x\0");
        assert!(matches!(copyinstr(&space, UserAddr::NULL, 8), Err(CopyError::Fault(_))));
        assert!(matches!(
            copyinstr(&space, UserAddr(0xdead_0000), 8),
            Err(CopyError::Fault(_))
        ));
    }

    #[test]
    fn test_string_running_off_mapping_faults() {
        let mut space = HostedSpace::new();
        space.define_region(UserAddr(BASE), 4).unwrap();
        space.write(UserAddr(BASE), b"abcd").unwrap();
        assert!(matches!(copyinstr(&space, UserAddr(BASE), 64), Err(CopyError::Fault(_))));
    }

    #[test]
    fn test_ptr_array() {
        let block = encode_ptr_array(&[UserAddr(0x10), UserAddr(0x20), UserAddr::NULL]);
        let space = space_with(&block);
        let ptrs = copyin_ptr_array(&space, UserAddr(BASE), 8).unwrap();
        assert_eq!(ptrs, vec![UserAddr(0x10), UserAddr(0x20)]);
        assert_eq!(copyin_ptr_array(&space, UserAddr(BASE), 1), Err(CopyError::TooLong));
    }
}
