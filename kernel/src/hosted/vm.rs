//! In-memory address spaces.
//!
//! A [`HostedSpace`] is a list of byte regions. There are no pages: a region
//! is defined once and stays readable and writable until the space is
//! dropped. All spaces created by one [`HostedVm`] share its fault switches
//! and accounting, so a test can make the next duplication fail and check
//! that nothing leaked.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use log::debug;

use crate::config::{USER_STACK_SIZE, USER_STACK_TOP};
use crate::memory::{AddressSpace, UserAddr, VmError, VmSystem};

/// State shared by a VM and every space it handed out.
#[derive(Default)]
struct VmShared {
    /// Spaces not yet dropped
    live: AtomicUsize,
    /// Next space id (0 means "none")
    next_id: AtomicU64,
    /// Id of the active space, 0 if none
    active: AtomicU64,
    fail_create: AtomicBool,
    fail_duplicate: AtomicBool,
    fail_define_stack: AtomicBool,
}

impl VmShared {
    fn new_id(&self) -> u64 {
        self.live.fetch_add(1, Ordering::AcqRel);
        self.next_id.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// One defined range of user memory.
#[derive(Clone)]
struct Region {
    start: u64,
    data: Vec<u8>,
}

impl Region {
    fn end(&self) -> u64 {
        self.start + self.data.len() as u64
    }

    fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end()
    }
}

/// In-memory address space.
pub struct HostedSpace {
    id: u64,
    regions: Vec<Region>,
    shared: Arc<VmShared>,
}

impl HostedSpace {
    /// A standalone space that belongs to no [`HostedVm`].
    pub fn new() -> Self {
        Self::with_shared(Arc::new(VmShared::default()))
    }

    fn with_shared(shared: Arc<VmShared>) -> Self {
        Self {
            id: shared.new_id(),
            regions: Vec::new(),
            shared,
        }
    }

    /// Identifier, unique among the spaces of one VM.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Split `[addr, addr + len)` into per-region pieces of
    /// `(region index, offset, length)`; faults if any byte is undefined.
    fn spans(&self, addr: UserAddr, len: usize) -> Result<Vec<(usize, usize, usize)>, VmError> {
        let end = addr
            .as_u64()
            .checked_add(len as u64)
            .ok_or(VmError::Fault { addr: addr.as_u64() })?;
        let mut spans = Vec::new();
        let mut cur = addr.as_u64();
        while cur < end {
            let index = self
                .regions
                .iter()
                .position(|r| r.contains(cur))
                .ok_or(VmError::Fault { addr: cur })?;
            let region = &self.regions[index];
            let chunk = (region.end().min(end) - cur) as usize;
            spans.push((index, (cur - region.start) as usize, chunk));
            cur += chunk as u64;
        }
        Ok(spans)
    }
}

impl Default for HostedSpace {
    fn default() -> Self {
        Self::new()
    }
}

impl AddressSpace for HostedSpace {
    fn duplicate(&self) -> Result<Box<dyn AddressSpace>, VmError> {
        if self.shared.fail_duplicate.swap(false, Ordering::AcqRel) {
            return Err(VmError::OutOfMemory);
        }
        let mut copy = HostedSpace::with_shared(self.shared.clone());
        copy.regions = self.regions.clone();
        debug!("[VM] Duplicated space {} into {}", self.id, copy.id);
        Ok(Box::new(copy))
    }

    fn activate(&self) {
        self.shared.active.store(self.id, Ordering::Release);
    }

    fn deactivate(&self) {
        let _ = self
            .shared
            .active
            .compare_exchange(self.id, 0, Ordering::AcqRel, Ordering::Acquire);
    }

    fn define_region(&mut self, start: UserAddr, size: u64) -> Result<(), VmError> {
        let end = start
            .as_u64()
            .checked_add(size)
            .ok_or(VmError::Fault { addr: start.as_u64() })?;
        if start.is_null() {
            return Err(VmError::Fault { addr: 0 });
        }
        if self
            .regions
            .iter()
            .any(|r| start.as_u64() < r.end() && r.start < end)
        {
            return Err(VmError::Fault { addr: start.as_u64() });
        }
        let size = usize::try_from(size).map_err(|_| VmError::OutOfMemory)?;
        self.regions.push(Region {
            start: start.as_u64(),
            data: vec![0; size],
        });
        Ok(())
    }

    fn define_stack(&mut self) -> Result<UserAddr, VmError> {
        if self.shared.fail_define_stack.swap(false, Ordering::AcqRel) {
            return Err(VmError::OutOfMemory);
        }
        self.define_region(UserAddr(USER_STACK_TOP - USER_STACK_SIZE), USER_STACK_SIZE)?;
        Ok(UserAddr(USER_STACK_TOP))
    }

    fn read(&self, addr: UserAddr, buf: &mut [u8]) -> Result<(), VmError> {
        let mut done = 0;
        for (index, offset, len) in self.spans(addr, buf.len())? {
            buf[done..done + len].copy_from_slice(&self.regions[index].data[offset..offset + len]);
            done += len;
        }
        Ok(())
    }

    fn write(&mut self, addr: UserAddr, data: &[u8]) -> Result<(), VmError> {
        // resolve every span first so a fault writes nothing
        let spans = self.spans(addr, data.len())?;
        let mut done = 0;
        for (index, offset, len) in spans {
            self.regions[index].data[offset..offset + len].copy_from_slice(&data[done..done + len]);
            done += len;
        }
        Ok(())
    }
}

impl Drop for HostedSpace {
    fn drop(&mut self) {
        self.deactivate();
        self.shared.live.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Factory for [`HostedSpace`]s with fault injection.
#[derive(Default)]
pub struct HostedVm {
    shared: Arc<VmShared>,
}

impl HostedVm {
    pub fn new() -> Self {
        Self::default()
    }

    /// A space created directly, for boot-time processes.
    pub fn create_space(&self) -> HostedSpace {
        HostedSpace::with_shared(self.shared.clone())
    }

    /// Number of spaces created by this VM and not yet dropped.
    pub fn live_spaces(&self) -> usize {
        self.shared.live.load(Ordering::Acquire)
    }

    /// Id of the currently active space.
    pub fn active_space(&self) -> Option<u64> {
        match self.shared.active.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    /// Make the next [`VmSystem::create`] fail with `OutOfMemory`.
    pub fn fail_next_create(&self) {
        self.shared.fail_create.store(true, Ordering::Release);
    }

    /// Make the next [`AddressSpace::duplicate`] fail with `OutOfMemory`.
    pub fn fail_next_duplicate(&self) {
        self.shared.fail_duplicate.store(true, Ordering::Release);
    }

    /// Make the next [`AddressSpace::define_stack`] fail with `OutOfMemory`.
    pub fn fail_next_define_stack(&self) {
        self.shared.fail_define_stack.store(true, Ordering::Release);
    }
}

impl VmSystem for HostedVm {
    fn create(&self) -> Result<Box<dyn AddressSpace>, VmError> {
        if self.shared.fail_create.swap(false, Ordering::AcqRel) {
            return Err(VmError::OutOfMemory);
        }
        Ok(Box::new(self.create_space()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_across_regions() {
        let mut space = HostedSpace::new();
        space.define_region(UserAddr(0x1000), 0x10).unwrap();
        space.define_region(UserAddr(0x1010), 0x10).unwrap();
        space.write(UserAddr(0x100c), b"abcdefgh").unwrap();

        let mut buf = [0u8; 8];
        space.read(UserAddr(0x100c), &mut buf).unwrap();
        assert_eq!(&buf, b"abcdefgh");
    }

    #[test]
    fn test_faulting_write_changes_nothing() {
        let mut space = HostedSpace::new();
        space.define_region(UserAddr(0x1000), 0x10).unwrap();
        assert_eq!(
            space.write(UserAddr(0x100c), b"abcdefgh"),
            Err(VmError::Fault { addr: 0x1010 })
        );
        let mut buf = [0xffu8; 4];
        space.read(UserAddr(0x100c), &mut buf).unwrap();
        assert_eq!(buf, [0; 4]);
    }

    #[test]
    fn test_overlapping_region_rejected() {
        let mut space = HostedSpace::new();
        space.define_region(UserAddr(0x1000), 0x100).unwrap();
        assert!(space.define_region(UserAddr(0x10f0), 0x100).is_err());
        assert!(space.define_region(UserAddr::NULL, 0x10).is_err());
    }

    #[test]
    fn test_duplicate_is_independent() {
        let vm = HostedVm::new();
        let mut space = vm.create().unwrap();
        space.define_region(UserAddr(0x1000), 8).unwrap();
        space.write(UserAddr(0x1000), b"parent!!").unwrap();

        let mut copy = space.duplicate().unwrap();
        copy.write(UserAddr(0x1000), b"child!!!").unwrap();

        let mut buf = [0u8; 8];
        space.read(UserAddr(0x1000), &mut buf).unwrap();
        assert_eq!(&buf, b"parent!!");
        assert_eq!(vm.live_spaces(), 2);
        drop(copy);
        drop(space);
        assert_eq!(vm.live_spaces(), 0);
    }

    #[test]
    fn test_fault_injection_is_one_shot() {
        let vm = HostedVm::new();
        vm.fail_next_create();
        assert_eq!(vm.create().err(), Some(VmError::OutOfMemory));
        let space = vm.create().unwrap();

        vm.fail_next_duplicate();
        assert!(space.duplicate().is_err());
        assert!(space.duplicate().is_ok());
        assert_eq!(vm.live_spaces(), 1);
    }

    #[test]
    fn test_activation_tracking() {
        let vm = HostedVm::new();
        let a = vm.create_space();
        let b = vm.create_space();
        a.activate();
        assert_eq!(vm.active_space(), Some(a.id()));
        b.activate();
        a.deactivate();
        assert_eq!(vm.active_space(), Some(b.id()));
        drop(b);
        assert_eq!(vm.active_space(), None);
    }
}
