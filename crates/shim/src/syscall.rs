//! Raw syscall entry points.
//!
//! These take the Linux argument encodings and return either the result or a negative
//! errno in a single `isize`, as the syscall dispatcher expects.

use crate::{HandleTable, MapFlags, Protection, UnmapStatus, VirtualAddress, VmShim, VmaStore};

impl<S: VmaStore, H: HandleTable> VmShim<S, H> {
    /// `mmap(addr, length, prot, flags, fd, offset)`.
    pub fn sys_mmap(
        &self,
        addr: usize,
        length: usize,
        prot: u64,
        flags: u64,
        fd: i32,
        offset: i64,
    ) -> isize {
        let result = self.mmap(
            VirtualAddress::new(addr),
            length,
            Protection::from_raw(prot),
            MapFlags::from_raw(flags),
            fd,
            offset,
        );

        match result {
            Ok(start) => start.as_usize() as isize,
            Err(err) => {
                log::trace!("mmap({addr:#x}, {length:#x}) failed: {err}");
                err.errno()
            }
        }
    }

    /// `munmap(addr, length)`. Unmapping a range with nothing in it succeeds.
    pub fn sys_munmap(&self, addr: usize, length: usize) -> isize {
        match self.munmap(VirtualAddress::new(addr), length) {
            Ok(UnmapStatus::Unmapped | UnmapStatus::NoMapping) => 0,
            Err(err) => err.errno(),
        }
    }

    /// `mprotect(addr, length, prot)`.
    pub fn sys_mprotect(&self, addr: usize, length: usize, prot: u64) -> isize {
        match self.mprotect(VirtualAddress::new(addr), length, Protection::from_raw(prot)) {
            Ok(()) => 0,
            Err(err) => err.errno(),
        }
    }
}
