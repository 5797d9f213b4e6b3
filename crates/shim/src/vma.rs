//! Virtual memory area records.

use core::fmt;

use crate::{MapFlags, PageRange, Protection, VirtualAddress};

/// Identifies the file behind a file-backed mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FileId(pub u64);

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "file#{}", self.0)
    }
}

/// The file and offset backing a mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileBacking {
    pub file: FileId,
    /// Offset into the file of the VMA's first byte.
    pub offset: u64,
}

/// One contiguous, homogeneously backed region of the address space.
///
/// # Invariants
/// - The range is non-empty and page-aligned.
/// - `backing` is present exactly when the VMA is not anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vma {
    range: PageRange,
    prot: Protection,
    flags: MapFlags,
    backing: Option<FileBacking>,
}

impl Vma {
    /// Creates an anonymous VMA. `MAP_ANONYMOUS` is implied.
    pub fn anonymous(range: PageRange, prot: Protection, flags: MapFlags) -> Self {
        Self {
            range,
            prot,
            flags: flags.with(MapFlags::ANONYMOUS),
            backing: None,
        }
    }

    /// Creates a file-backed VMA.
    pub fn file(
        range: PageRange,
        prot: Protection,
        flags: MapFlags,
        backing: FileBacking,
    ) -> Self {
        Self {
            range,
            prot,
            flags: flags.without(MapFlags::ANONYMOUS),
            backing: Some(backing),
        }
    }

    pub fn range(&self) -> PageRange {
        self.range
    }

    pub fn start(&self) -> VirtualAddress {
        self.range.start()
    }

    /// Exclusive end.
    pub fn end(&self) -> VirtualAddress {
        self.range.end()
    }

    pub fn protection(&self) -> Protection {
        self.prot
    }

    pub fn flags(&self) -> MapFlags {
        self.flags
    }

    pub fn backing(&self) -> Option<FileBacking> {
        self.backing
    }

    pub fn is_anonymous(&self) -> bool {
        self.backing.is_none()
    }

    pub fn is_shared(&self) -> bool {
        self.flags.is_shared()
    }

    pub(crate) fn set_protection(&mut self, prot: Protection) {
        self.prot = prot;
    }

    /// Returns a copy restricted to `sub`, which must lie inside this VMA.
    ///
    /// The file offset advances by however far `sub` starts past this VMA's start.
    pub(crate) fn shrink_to(&self, sub: PageRange) -> Self {
        debug_assert!(self.range.contains(&sub));

        let skipped = (sub.start() - self.start()) as u64;
        Self {
            range: sub,
            backing: self.backing.map(|backing| FileBacking {
                offset: backing.offset + skipped,
                ..backing
            }),
            ..*self
        }
    }
}

impl fmt::Display for Vma {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.range, self.prot, self.flags)?;
        if let Some(backing) = self.backing {
            write!(f, " {} @{:#x}", backing.file, backing.offset)?;
        }
        Ok(())
    }
}
