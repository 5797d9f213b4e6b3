//! The `mmap`, `munmap` and `mprotect` handlers.

use crate::{
    FileHandle, FileMapRequest, HandleTable, HeldHandle, HeldVma, MapFlags, MapRequest,
    PageRange, Protection, Result, VirtualAddress, VmError, VmaStore, checked_end, profile,
};

/// Outcome of a successful `munmap`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmapStatus {
    /// The range was removed from the address space.
    Unmapped,
    /// Nothing was mapped in the range, so nothing changed.
    NoMapping,
}

/// Memory-mapping syscall handlers for one address space.
pub struct VmShim<S, H> {
    store: S,
    handles: H,
}

impl<S: VmaStore, H: HandleTable> VmShim<S, H> {
    pub fn new(store: S, handles: H) -> Self {
        Self { store, handles }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn handles(&self) -> &H {
        &self.handles
    }

    /// Maps `length` bytes, anonymous or backed by `fd` at `offset`.
    ///
    /// A non-null `address` is a placement hint, honored only if nothing is mapped
    /// there. With `MAP_FIXED` the mapping is placed exactly at `address` and replaces
    /// whatever it overlaps.
    pub fn mmap(
        &self,
        address: VirtualAddress,
        length: usize,
        prot: Protection,
        flags: MapFlags,
        fd: i32,
        offset: i64,
    ) -> Result<VirtualAddress> {
        checked_end(address, length)?;

        if flags.contains(MapFlags::MAP_32BIT) {
            return Err(VmError::NotImplemented);
        }

        let mut hinted = flags.is_fixed() || !address.is_null();
        if hinted {
            if let Some(held) = HeldVma::lookup(&self.store, address, length) {
                if flags.is_fixed() {
                    log::debug!(
                        "mmap: fixed mapping at {address} overrides {:?}",
                        held.vma()
                    );
                } else {
                    log::debug!("mmap: hint {address} is taken, ignoring it");
                    hinted = false;
                }
            }
        }

        let range = PageRange::normalize(address, length)?;
        let placement = hinted.then_some(range.start());

        if flags.is_anonymous() {
            let start = self.store.alloc_anonymous(MapRequest {
                address: placement,
                length: range.len(),
                prot,
                flags,
            })?;
            profile::MMAP.record(range.len());
            return Ok(start);
        }

        if fd < 0 {
            return Err(VmError::InvalidArgument);
        }
        let offset = u64::try_from(offset).map_err(|_| VmError::InvalidArgument)?;

        let handle = HeldHandle::get(&self.handles, fd).ok_or(VmError::BadFileDescriptor)?;
        let Some(ops) = handle.mmap_ops() else {
            log::debug!("mmap: fd {fd} cannot be mapped");
            return Err(VmError::NoDevice);
        };

        ops.mmap(
            &self.store,
            FileMapRequest {
                address: placement,
                length: range.len(),
                prot,
                flags,
                offset,
                file: handle.file_id(),
            },
        )
    }

    /// Unmaps every page touching `[address, address + length)`.
    ///
    /// Returns [`UnmapStatus::NoMapping`] if nothing is mapped there.
    pub fn munmap(&self, address: VirtualAddress, length: usize) -> Result<UnmapStatus> {
        checked_end(address, length)?;

        match HeldVma::lookup(&self.store, address, length) {
            Some(held) => drop(held),
            None => {
                log::debug!("munmap: nothing mapped at {address} (+{length:#x})");
                return Ok(UnmapStatus::NoMapping);
            }
        }

        let range = PageRange::normalize(address, length)?;
        self.store.free(range)?;
        Ok(UnmapStatus::Unmapped)
    }

    /// Changes the protection of every page touching `[address, address + length)`.
    pub fn mprotect(&self, address: VirtualAddress, length: usize, prot: Protection) -> Result<()> {
        checked_end(address, length)?;
        if length == 0 {
            return Ok(());
        }

        let range = PageRange::normalize(address, length)?;
        self.store.protect(range, prot)
    }
}
