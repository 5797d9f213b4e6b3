//! Host page-mapping interface.
//!
//! The shim never touches page tables itself. The VMA store asks a [`PageMapper`] to
//! back, release or re-protect whole pages. In a library OS this is the platform layer
//! underneath; under test or with the `software-emulation` feature an [`EmulatedHost`]
//! records the page state in software.

use core::fmt;
use core::ops::Add;

use crate::{PageRange, Protection, Result, VirtualAddress};

// Use software emulation ONLY when:
// - Running tests, OR
// - software-emulation feature is explicitly enabled
#[cfg(any(test, feature = "software-emulation"))]
mod emulated;
#[cfg(any(test, feature = "software-emulation"))]
pub use emulated::EmulatedHost;

/// Page size in bytes (4 KiB).
pub const PAGE_SIZE: usize = 4096;

/// Page-granular mapping primitive provided by the host.
///
/// Ranges are always page-aligned and non-empty. Implementations are called with the
/// VMA store's lock held, so they never observe concurrent calls.
pub trait PageMapper: Send {
    /// Backs every page of `range` with fresh zeroed memory at `prot`.
    ///
    /// Pages already mapped in the range are replaced.
    fn map(&mut self, range: PageRange, prot: Protection) -> Result<()>;

    /// Releases every page of `range`. Pages that are not mapped are skipped.
    fn unmap(&mut self, range: PageRange) -> Result<()>;

    /// Changes the protection of every page of `range`.
    fn protect(&mut self, range: PageRange, prot: Protection) -> Result<()>;
}

/// A virtual memory page number.
///
/// Page numbers are zero-indexed and correspond to `PAGE_SIZE`-aligned virtual addresses.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct PageNumber(usize);

impl PageNumber {
    /// Creates a new page number.
    #[inline]
    pub const fn new(number: usize) -> Self {
        Self(number)
    }

    /// Returns the raw page number.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// Returns the virtual address at the start of this page.
    #[inline]
    pub const fn start(self) -> VirtualAddress {
        VirtualAddress::new(self.0 * PAGE_SIZE)
    }

    /// Returns every page of a range, in ascending order.
    pub fn pages_of(range: PageRange) -> impl Iterator<Item = PageNumber> {
        let first = Self::from(range.start()).0;
        let last = Self::from(range.end()).0;
        (first..last).map(PageNumber)
    }
}

impl From<VirtualAddress> for PageNumber {
    #[inline]
    fn from(addr: VirtualAddress) -> Self {
        Self::new(addr.as_usize() / PAGE_SIZE)
    }
}

impl Add<usize> for PageNumber {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl fmt::Debug for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageNumber({})", self.0)
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
