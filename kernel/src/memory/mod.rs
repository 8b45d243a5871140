//! Address-space boundary.
//!
//! The process subsystem never looks inside an address space. It creates,
//! duplicates, activates and destroys them through [`VmSystem`] and
//! [`AddressSpace`], and touches user memory only through the bounded copy
//! helpers in [`user`].
//!
//! Destroying an address space is dropping its box: ownership guarantees it
//! happens exactly once.

pub mod user;

/// Address-space errors.
#[derive(thiserror::Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmError {
    /// No memory for page tables or frames
    #[error("out of memory")]
    OutOfMemory,
    /// Access to an unmapped or protected user address
    #[error("fault at {addr:#x}")]
    Fault { addr: u64 },
    /// The stack region was never defined
    #[error("no stack region")]
    NoStack,
}

/// A user virtual address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct UserAddr(pub u64);

impl UserAddr {
    /// The null user pointer.
    pub const NULL: UserAddr = UserAddr(0);

    /// Raw address value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Address `bytes` further up, `None` on overflow.
    pub fn checked_add(self, bytes: u64) -> Option<UserAddr> {
        self.0.checked_add(bytes).map(UserAddr)
    }

    /// Round down to a multiple of `align` (a power of two).
    pub const fn align_down(self, align: u64) -> UserAddr {
        UserAddr(self.0 & !(align - 1))
    }

    pub const fn is_aligned(self, align: u64) -> bool {
        self.0 & (align - 1) == 0
    }
}

impl core::fmt::Display for UserAddr {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// One process's user address space.
pub trait AddressSpace: Send + Sync {
    /// Make a deep copy whose contents equal this space at the time of the call.
    fn duplicate(&self) -> Result<Box<dyn AddressSpace>, VmError>;

    /// Make this the space the MMU translates through.
    fn activate(&self);

    /// Stop translating through this space (flush TLB state).
    fn deactivate(&self);

    /// Define a zero-filled, writable user region of `size` bytes at `start`.
    fn define_region(&mut self, start: UserAddr, size: u64) -> Result<(), VmError>;

    /// Define the user stack region and return the initial stack pointer.
    fn define_stack(&mut self) -> Result<UserAddr, VmError>;

    /// Copy bytes out of user memory. Faults leave `buf` unspecified.
    fn read(&self, addr: UserAddr, buf: &mut [u8]) -> Result<(), VmError>;

    /// Copy bytes into user memory. Faulting writes change nothing.
    fn write(&mut self, addr: UserAddr, data: &[u8]) -> Result<(), VmError>;
}

/// Factory for empty address spaces.
pub trait VmSystem: Send + Sync {
    /// Create a new, empty address space.
    fn create(&self) -> Result<Box<dyn AddressSpace>, VmError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_down() {
        assert_eq!(UserAddr(0x1007).align_down(8), UserAddr(0x1000));
        assert_eq!(UserAddr(0x1008).align_down(8), UserAddr(0x1008));
        assert!(UserAddr(0x1010).is_aligned(8));
        assert!(!UserAddr(0x1011).is_aligned(8));
    }

    #[test]
    fn test_checked_add_overflow() {
        assert_eq!(UserAddr(u64::MAX).checked_add(1), None);
        assert_eq!(UserAddr(8).checked_add(8), Some(UserAddr(16)));
    }
}
