//! Virtual address type.
//!
//! Addresses reaching the shim come straight from syscall registers, so every operation
//! that can leave the address space has a checked form.

use core::fmt;
use core::ops::{Add, Sub};

/// An address in the process's virtual address space.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtualAddress(usize);

impl VirtualAddress {
    /// Creates a new address.
    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    /// The null address, meaning "no address requested" in a mapping hint.
    #[inline]
    pub const fn null() -> Self {
        Self(0)
    }

    /// Returns the raw address value.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Checks if the address is aligned to the given alignment.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[inline]
    pub const fn is_aligned(self, align: usize) -> bool {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        self.0 & (align - 1) == 0
    }

    /// Aligns the address down to the given alignment.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[inline]
    pub const fn align_down(self, align: usize) -> Self {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        Self(self.0 & !(align - 1))
    }

    /// Aligns the address up to the given alignment, or `None` if that passes the end
    /// of the address space.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    #[inline]
    pub const fn checked_align_up(self, align: usize) -> Option<Self> {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        match self.0.checked_add(align - 1) {
            Some(bumped) => Some(Self(bumped & !(align - 1))),
            None => None,
        }
    }

    /// Adds a byte offset, or `None` if the result wraps.
    #[inline]
    pub const fn checked_add(self, bytes: usize) -> Option<Self> {
        match self.0.checked_add(bytes) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }
}

impl fmt::Pointer for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:p}", self.0 as *const u8)
    }
}

impl fmt::Debug for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtualAddress({:#x})", self.0)
    }
}

impl fmt::Display for VirtualAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for VirtualAddress {
    #[inline]
    fn from(addr: usize) -> Self {
        Self::new(addr)
    }
}

impl Add<usize> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn add(self, rhs: usize) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Sub<usize> for VirtualAddress {
    type Output = Self;

    #[inline]
    fn sub(self, rhs: usize) -> Self::Output {
        Self(self.0 - rhs)
    }
}

impl Sub<VirtualAddress> for VirtualAddress {
    type Output = usize;

    #[inline]
    fn sub(self, rhs: VirtualAddress) -> Self::Output {
        self.0 - rhs.0
    }
}
