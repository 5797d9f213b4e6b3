//! Address range normalization.
//!
//! Every syscall path works on page-aligned ranges. [`PageRange::normalize`] widens a
//! byte-granular `(start, length)` request to the pages containing it, and rejects
//! requests that wrap the address space before any state is touched.

use core::fmt;

use crate::{PAGE_SIZE, Result, VirtualAddress, VmError};

/// Returns `start + length`, or [`VmError::InvalidArgument`] if it wraps.
pub fn checked_end(start: VirtualAddress, length: usize) -> Result<VirtualAddress> {
    start.checked_add(length).ok_or(VmError::InvalidArgument)
}

/// A non-empty, page-aligned, half-open range of virtual addresses.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageRange {
    start: VirtualAddress,
    end: VirtualAddress,
}

impl PageRange {
    /// Creates a range from page-aligned bounds.
    ///
    /// Returns `None` unless both bounds are page-aligned and `start < end`.
    pub fn new(start: VirtualAddress, end: VirtualAddress) -> Option<Self> {
        if start < end && start.is_aligned(PAGE_SIZE) && end.is_aligned(PAGE_SIZE) {
            Some(Self { start, end })
        } else {
            None
        }
    }

    /// Creates a range of `length` bytes starting at a page-aligned `start`.
    ///
    /// `length` must be a non-zero multiple of the page size.
    pub fn from_start_len(start: VirtualAddress, length: usize) -> Option<Self> {
        Self::new(start, start.checked_add(length)?)
    }

    /// Widens the byte range `[start, start + length)` to whole pages.
    ///
    /// The result begins at or below `start`, ends at or above `start + length`, and
    /// both bounds are page-aligned. Fails with [`VmError::InvalidArgument`] if the end
    /// wraps (including when rounding it up to a page boundary) or if `length` is zero.
    pub fn normalize(start: VirtualAddress, length: usize) -> Result<Self> {
        if length == 0 {
            return Err(VmError::InvalidArgument);
        }

        let end = checked_end(start, length)?
            .checked_align_up(PAGE_SIZE)
            .ok_or(VmError::InvalidArgument)?;

        Ok(Self {
            start: start.align_down(PAGE_SIZE),
            end,
        })
    }

    #[inline]
    pub const fn start(&self) -> VirtualAddress {
        self.start
    }

    /// Exclusive end.
    #[inline]
    pub const fn end(&self) -> VirtualAddress {
        self.end
    }

    /// Size of the range in bytes.
    #[inline]
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    #[inline]
    pub fn page_count(&self) -> usize {
        self.len() / PAGE_SIZE
    }

    /// Returns true if `addr` lies inside the range.
    pub fn contains_address(&self, addr: VirtualAddress) -> bool {
        self.start <= addr && addr < self.end
    }

    /// Returns true if `other` lies entirely inside this range.
    pub fn contains(&self, other: &PageRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Returns true if the ranges share at least one page.
    pub fn overlaps(&self, other: &PageRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if this range intersects the raw byte range `[start, start + length)`.
    ///
    /// An empty byte range overlaps nothing.
    pub fn overlaps_bytes(&self, start: VirtualAddress, length: usize) -> bool {
        let end = start
            .checked_add(length)
            .unwrap_or(VirtualAddress::new(usize::MAX));
        length != 0 && start < self.end && self.start < end
    }

    /// Returns the shared part of two ranges.
    pub fn intersection(&self, other: &PageRange) -> Option<PageRange> {
        let start = self.start.max(other.start);
        let end = self.end.min(other.end);
        PageRange::new(start, end)
    }

    /// Splits off the parts of this range below and above `hole`.
    pub fn punch_hole(&self, hole: &PageRange) -> (Option<PageRange>, Option<PageRange>) {
        let left = PageRange::new(self.start, hole.start.min(self.end));
        let right = PageRange::new(hole.end.max(self.start), self.end);
        (left, right)
    }
}

impl fmt::Debug for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PageRange({:#x}..{:#x})", self.start.as_usize(), self.end.as_usize())
    }
}

impl fmt::Display for PageRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn range(start: usize, end: usize) -> PageRange {
        PageRange::new(VirtualAddress::new(start), VirtualAddress::new(end)).unwrap()
    }

    #[test]
    fn normalizes_sub_page_length() {
        let r = PageRange::normalize(VirtualAddress::new(0x1000), 4097).unwrap();
        assert_eq!(r, range(0x1000, 0x3000));
        assert_eq!(r.len(), 8192);
        assert_eq!(r.page_count(), 2);
    }

    #[test]
    fn normalizes_unaligned_start() {
        let r = PageRange::normalize(VirtualAddress::new(0x1fff), 2).unwrap();
        assert_eq!(r, range(0x1000, 0x3000));
    }

    #[test]
    fn alignment_invariant_holds() {
        let starts = [0usize, 1, 0xfff, 0x1000, 0x1001, 0x7fff_ffff_f123];
        let lengths = [1usize, 0xfff, 0x1000, 0x1001, 0x12345];

        for &start in &starts {
            for &length in &lengths {
                let r = PageRange::normalize(VirtualAddress::new(start), length).unwrap();
                assert!(r.start().as_usize() <= start);
                assert!(r.end().as_usize() >= start + length);
                assert!(r.start().is_aligned(PAGE_SIZE));
                assert!(r.end().is_aligned(PAGE_SIZE));
                assert!(r.end() > r.start());
            }
        }
    }

    #[test]
    fn rejects_wrapping_ranges() {
        let top = VirtualAddress::new(usize::MAX - 0xff);
        assert_eq!(
            PageRange::normalize(top, 0x1000),
            Err(VmError::InvalidArgument)
        );
        // Fits in the address space but cannot be rounded up to a page.
        assert_eq!(PageRange::normalize(top, 0x10), Err(VmError::InvalidArgument));
        assert_eq!(checked_end(top, 0x100), Err(VmError::InvalidArgument));
    }

    #[test]
    fn rejects_zero_length() {
        assert_eq!(
            PageRange::normalize(VirtualAddress::new(0x1000), 0),
            Err(VmError::InvalidArgument)
        );
    }

    #[test]
    fn overlap_and_intersection() {
        let a = range(0x1000, 0x4000);
        let b = range(0x3000, 0x6000);
        let c = range(0x4000, 0x5000);

        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c));
        assert_eq!(a.intersection(&b), Some(range(0x3000, 0x4000)));
        assert_eq!(a.intersection(&c), None);

        assert!(a.overlaps_bytes(VirtualAddress::new(0x3fff), 1));
        assert!(!a.overlaps_bytes(VirtualAddress::new(0x4000), 1));
        assert!(!a.overlaps_bytes(VirtualAddress::new(0x2000), 0));
    }

    #[test]
    fn punches_holes() {
        let a = range(0x1000, 0x5000);

        let (left, right) = a.punch_hole(&range(0x2000, 0x3000));
        assert_eq!(left, Some(range(0x1000, 0x2000)));
        assert_eq!(right, Some(range(0x3000, 0x5000)));

        let (left, right) = a.punch_hole(&range(0x0, 0x2000));
        assert_eq!(left, None);
        assert_eq!(right, Some(range(0x2000, 0x5000)));

        let (left, right) = a.punch_hole(&range(0x0, 0x6000));
        assert_eq!((left, right), (None, None));
    }
}
