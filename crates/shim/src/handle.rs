//! File handles and the descriptor table.
//!
//! File-backed mappings resolve a descriptor through a [`HandleTable`]. The handle is
//! held for the duration of the mapping call by a [`HeldHandle`] guard, which gives it
//! back to the table exactly once on every exit path.

use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::ops::Deref;
use core::sync::atomic::{AtomicUsize, Ordering};

use crate::{FileId, MapFlags, Protection, Result, VirtualAddress, VmaStore};

/// A file-backed mapping request handed to a filesystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileMapRequest {
    /// Page-aligned placement, or `None` to let the store choose.
    pub address: Option<VirtualAddress>,
    /// Length in bytes, a non-zero multiple of the page size.
    pub length: usize,
    pub prot: Protection,
    pub flags: MapFlags,
    /// Offset into the file of the first mapped byte.
    pub offset: u64,
    pub file: FileId,
}

/// The mapping strategy of a filesystem.
pub trait MmapOps {
    /// Maps part of a file into the address space, returning the chosen start.
    ///
    /// Implementations install the VMA through [`VmaStore::install_file`].
    fn mmap(&self, store: &dyn VmaStore, request: FileMapRequest) -> Result<VirtualAddress>;
}

/// An open file.
pub trait FileHandle {
    fn file_id(&self) -> FileId;

    /// Returns the filesystem's mapping strategy, or `None` if the filesystem cannot
    /// map files.
    fn mmap_ops(&self) -> Option<&dyn MmapOps> {
        None
    }
}

impl<F: FileHandle + ?Sized> FileHandle for Arc<F> {
    fn file_id(&self) -> FileId {
        (**self).file_id()
    }

    fn mmap_ops(&self) -> Option<&dyn MmapOps> {
        (**self).mmap_ops()
    }
}

/// Descriptor lookup with explicit reference counting.
pub trait HandleTable {
    type Handle: FileHandle;

    /// Resolves `fd`, taking a reference on the handle.
    fn get_handle(&self, fd: i32) -> Option<Self::Handle>;

    /// Gives back a reference taken by [`get_handle`](Self::get_handle).
    fn put_handle(&self, handle: Self::Handle);
}

/// A handle reference that is given back to its table when dropped.
pub struct HeldHandle<'t, T: HandleTable + ?Sized> {
    table: &'t T,
    /// Always `Some` until dropped.
    handle: Option<T::Handle>,
}

impl<'t, T: HandleTable + ?Sized> HeldHandle<'t, T> {
    /// Resolves `fd` in `table`.
    pub fn get(table: &'t T, fd: i32) -> Option<Self> {
        let handle = table.get_handle(fd)?;
        Some(Self {
            table,
            handle: Some(handle),
        })
    }
}

impl<T: HandleTable + ?Sized> Deref for HeldHandle<'_, T> {
    type Target = T::Handle;

    fn deref(&self) -> &T::Handle {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("handle taken before drop"),
        }
    }
}

impl<T: HandleTable + ?Sized> Drop for HeldHandle<'_, T> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.table.put_handle(handle);
        }
    }
}

/// A shareable open file.
pub type SharedHandle = Arc<dyn FileHandle + Send + Sync>;

/// A descriptor table mapping small integers to open files.
#[derive(Default)]
pub struct FdTable {
    files: spin::Mutex<BTreeMap<i32, SharedHandle>>,
    /// References handed out and not yet given back.
    outstanding: AtomicUsize,
}

impl FdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs `file` at `fd`, returning the file it replaces.
    pub fn insert(&self, fd: i32, file: SharedHandle) -> Option<SharedHandle> {
        self.files.lock().insert(fd, file)
    }

    /// Closes `fd`. Mappings made through it stay valid.
    pub fn remove(&self, fd: i32) -> Option<SharedHandle> {
        self.files.lock().remove(&fd)
    }

    pub fn len(&self) -> usize {
        self.files.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of handle references not yet given back.
    pub fn outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }
}

impl HandleTable for FdTable {
    type Handle = SharedHandle;

    fn get_handle(&self, fd: i32) -> Option<SharedHandle> {
        let handle = self.files.lock().get(&fd).cloned()?;
        self.outstanding.fetch_add(1, Ordering::AcqRel);
        Some(handle)
    }

    fn put_handle(&self, handle: SharedHandle) {
        self.outstanding.fetch_sub(1, Ordering::AcqRel);
        drop(handle);
    }
}

/// An in-memory file for software emulation.
///
/// Its filesystem maps the file by installing a file-backed VMA, unless the file was
/// created with [`RamFile::without_mmap`].
#[cfg(any(test, feature = "software-emulation"))]
#[derive(Debug, Clone)]
pub struct RamFile {
    id: FileId,
    name: alloc::string::String,
    mappable: bool,
}

#[cfg(any(test, feature = "software-emulation"))]
impl RamFile {
    pub fn new(id: FileId, name: &str) -> Self {
        Self {
            id,
            name: name.into(),
            mappable: true,
        }
    }

    /// Creates a file on a filesystem with no mapping support.
    pub fn without_mmap(id: FileId, name: &str) -> Self {
        Self {
            mappable: false,
            ..Self::new(id, name)
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl FileHandle for RamFile {
    fn file_id(&self) -> FileId {
        self.id
    }

    fn mmap_ops(&self) -> Option<&dyn MmapOps> {
        if self.mappable { Some(self) } else { None }
    }
}

#[cfg(any(test, feature = "software-emulation"))]
impl MmapOps for RamFile {
    fn mmap(&self, store: &dyn VmaStore, request: FileMapRequest) -> Result<VirtualAddress> {
        log::trace!(
            "{}: mapping {:#x} bytes at offset {:#x}",
            self.name,
            request.length,
            request.offset
        );
        store.install_file(
            crate::MapRequest {
                address: request.address,
                length: request.length,
                prot: request.prot,
                flags: request.flags,
            },
            crate::FileBacking {
                file: request.file,
                offset: request.offset,
            },
        )
    }
}
