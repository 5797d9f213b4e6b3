//! The VMA store interface.
//!
//! The store owns the authoritative set of VMAs. The syscall handlers only ever go
//! through this trait and rely on each call being atomic with respect to every other
//! call on the same store.

use crate::{FileBacking, MapFlags, PageRange, Protection, Result, VirtualAddress, Vma};

/// Identifies a VMA record inside a store.
pub type VmaId = memmgr::ObjectId;

/// A request to install a new mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapRequest {
    /// Page-aligned placement. `None` lets the store choose. With `MAP_FIXED` set this
    /// is always present and must be honored exactly.
    pub address: Option<VirtualAddress>,
    /// Length in bytes, a non-zero multiple of the page size.
    pub length: usize,
    pub prot: Protection,
    pub flags: MapFlags,
}

impl MapRequest {
    /// The exact range requested, if an address was given.
    pub fn requested_range(&self) -> Option<PageRange> {
        PageRange::from_start_len(self.address?, self.length)
    }
}

/// Operations the syscall handlers need from the VMA store.
pub trait VmaStore: Send + Sync {
    /// Finds a VMA intersecting the byte range `[start, start + length)`.
    ///
    /// A found VMA is returned held; the caller must [`release`](Self::release) it.
    fn lookup_overlap(&self, start: VirtualAddress, length: usize) -> Option<VmaId>;

    /// Takes an additional reference on a VMA.
    fn hold(&self, vma: VmaId);

    /// Drops a reference taken by [`lookup_overlap`](Self::lookup_overlap) or
    /// [`hold`](Self::hold).
    fn release(&self, vma: VmaId);

    /// Returns a snapshot of a VMA record.
    fn vma(&self, vma: VmaId) -> Option<Vma>;

    /// Reserves host pages and installs an anonymous VMA.
    ///
    /// With `MAP_FIXED` the new VMA supersedes whatever overlaps the requested range.
    fn alloc_anonymous(&self, request: MapRequest) -> Result<VirtualAddress>;

    /// Reserves host pages and installs a file-backed VMA. Placement follows the same
    /// rules as [`alloc_anonymous`](Self::alloc_anonymous). Called by filesystem
    /// mapping strategies.
    fn install_file(&self, request: MapRequest, backing: FileBacking) -> Result<VirtualAddress>;

    /// Applies `prot` to every VMA overlapping `range`, splitting VMAs at the range
    /// boundaries.
    fn protect(&self, range: PageRange, prot: Protection) -> Result<()>;

    /// Removes, splits or truncates every VMA intersecting `range` and releases the
    /// host pages behind it.
    fn free(&self, range: PageRange) -> Result<()>;
}

/// A VMA reference held from an overlap lookup, released when dropped.
pub struct HeldVma<'s, S: VmaStore + ?Sized> {
    store: &'s S,
    id: VmaId,
}

impl<'s, S: VmaStore + ?Sized> HeldVma<'s, S> {
    /// Looks up a VMA intersecting `[start, start + length)` and holds it.
    pub fn lookup(store: &'s S, start: VirtualAddress, length: usize) -> Option<Self> {
        let id = store.lookup_overlap(start, length)?;
        Some(Self { store, id })
    }

    pub fn id(&self) -> VmaId {
        self.id
    }

    /// Returns a snapshot of the held VMA.
    pub fn vma(&self) -> Option<Vma> {
        self.store.vma(self.id)
    }
}

impl<S: VmaStore + ?Sized> Drop for HeldVma<'_, S> {
    fn drop(&mut self) {
        self.store.release(self.id);
    }
}
