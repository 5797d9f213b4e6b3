#![cfg_attr(not(any(test, feature = "software-emulation")), no_std)]

//! # Library OS memory shim
//!
//! The memory-mapping core of a library OS. It intercepts `mmap`, `munmap` and
//! `mprotect`, validates and page-aligns their arguments, and routes them to a VMA store
//! that keeps the authoritative list of the process's virtual memory areas. It provides:
//!
//! - Address range normalization with overflow detection.
//! - The mapping dispatcher, splitting anonymous and file-backed requests.
//! - Protection and unmapping handlers, with benign handling of unmapped ranges.
//! - Narrow interfaces to the collaborators: the VMA store, the descriptor table and the
//!   host page mapper.
//! - A reference VMA store whose records come from a [`memmgr::MemoryManager`].
//! - Software emulation of the host for testing in non-libOS environments.

extern crate alloc;

mod address;
mod error;
mod flags;
mod handle;
mod host;
pub mod profile;
mod range;
mod store;
mod syscall;
mod vm_shim;
mod vma;
mod vma_list;

pub use address::VirtualAddress;
pub use error::{Result, VmError, errno};
pub use flags::{MapFlags, Protection};
pub use handle::{
    FdTable, FileHandle, FileMapRequest, HandleTable, HeldHandle, MmapOps, SharedHandle,
};
pub use host::{PAGE_SIZE, PageMapper, PageNumber};
pub use range::{PageRange, checked_end};
pub use store::{HeldVma, MapRequest, VmaId, VmaStore};
pub use vm_shim::{UnmapStatus, VmShim};
pub use vma::{FileBacking, FileId, Vma};
pub use vma_list::{StoreConfig, VmaList};

#[cfg(any(test, feature = "software-emulation"))]
pub use handle::RamFile;
#[cfg(any(test, feature = "software-emulation"))]
pub use host::EmulatedHost;
