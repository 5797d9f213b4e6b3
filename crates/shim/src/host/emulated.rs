//! Software emulation of the host page mapper.
//!
//! This records the protection of every mapped page in an ordered map instead of
//! touching real page tables, so the shim can run on any host. An optional page budget
//! emulates the host running out of memory.

use alloc::collections::BTreeMap;

use crate::{PageMapper, PageNumber, PageRange, Protection, Result, VirtualAddress, VmError};

/// Emulated host memory for software simulation.
#[derive(Debug, Default)]
pub struct EmulatedHost {
    /// Protection of every mapped page.
    pages: BTreeMap<PageNumber, Protection>,
    /// Maximum number of pages mapped at once, if limited.
    page_limit: Option<usize>,
}

impl EmulatedHost {
    /// Creates a host with no page limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a host that refuses to map more than `limit` pages at once.
    pub fn with_page_limit(limit: usize) -> Self {
        Self {
            pages: BTreeMap::new(),
            page_limit: Some(limit),
        }
    }

    /// Returns the number of mapped pages.
    pub fn mapped_pages(&self) -> usize {
        self.pages.len()
    }

    /// Returns the protection of the page containing `addr`, if it is mapped.
    pub fn protection(&self, addr: VirtualAddress) -> Option<Protection> {
        self.pages.get(&PageNumber::from(addr)).copied()
    }

    /// Returns true if the page containing `addr` is mapped.
    pub fn is_mapped(&self, addr: VirtualAddress) -> bool {
        self.pages.contains_key(&PageNumber::from(addr))
    }
}

impl PageMapper for EmulatedHost {
    fn map(&mut self, range: PageRange, prot: Protection) -> Result<()> {
        if let Some(limit) = self.page_limit {
            let fresh = PageNumber::pages_of(range)
                .filter(|page| !self.pages.contains_key(page))
                .count();
            if self.pages.len() + fresh > limit {
                log::debug!("emulated host: refusing {range}, page limit {limit} reached");
                return Err(VmError::OutOfMemory);
            }
        }

        for page in PageNumber::pages_of(range) {
            self.pages.insert(page, prot);
        }
        Ok(())
    }

    fn unmap(&mut self, range: PageRange) -> Result<()> {
        for page in PageNumber::pages_of(range) {
            self.pages.remove(&page);
        }
        Ok(())
    }

    fn protect(&mut self, range: PageRange, prot: Protection) -> Result<()> {
        if PageNumber::pages_of(range).any(|page| !self.pages.contains_key(&page)) {
            return Err(VmError::Unmapped);
        }

        for page in PageNumber::pages_of(range) {
            self.pages.insert(page, prot);
        }
        Ok(())
    }
}
