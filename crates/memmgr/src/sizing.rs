//! Page-fit sizing for areas.
//!
//! When a pool backs page-granular storage, an area whose footprint ends just past a
//! page boundary wastes most of a page. These helpers adjust an object count so the
//! footprint of an area, including its bookkeeping, lands on a page boundary. The first
//! area additionally carries the manager itself.

use core::mem::size_of;

use crate::MemoryManager;
use crate::manager::Area;

/// Rounds `count` down until `overhead + count * slot` no longer spills into a partial page.
fn fit_down(count: usize, overhead: usize, slot: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return count;
    }

    let total = overhead.saturating_add(count.saturating_mul(slot));
    let spill = total % page_size;
    count.saturating_sub(spill.div_ceil(slot))
}

/// Rounds `count` up to use the slack left before the next page boundary.
fn fit_up(count: usize, overhead: usize, slot: usize, page_size: usize) -> usize {
    if page_size == 0 {
        return count;
    }

    let total = overhead.saturating_add(count.saturating_mul(slot));
    let slack = (page_size - total % page_size) % page_size;
    count.saturating_add(slack / slot)
}

impl<T> MemoryManager<T> {
    /// Bytes taken by one object slot.
    pub const fn slot_size() -> usize {
        size_of::<Option<T>>()
    }

    /// Bookkeeping bytes carried by every area.
    pub const fn area_overhead() -> usize {
        size_of::<Area<T>>()
    }

    /// Footprint of an area holding `count` objects.
    pub const fn area_bytes(count: usize) -> usize {
        Self::area_overhead() + count * Self::slot_size()
    }

    /// Largest count not above `count` whose area ends on a page boundary, or as close
    /// below it as slot granularity allows.
    pub fn fit_capacity_down(count: usize, page_size: usize) -> usize {
        fit_down(count, Self::area_overhead(), Self::slot_size(), page_size)
    }

    /// Count at or above `count` that fills the last page of its area.
    pub fn fit_capacity_up(count: usize, page_size: usize) -> usize {
        fit_up(count, Self::area_overhead(), Self::slot_size(), page_size)
    }

    /// Like [`fit_capacity_down`](Self::fit_capacity_down) for the first area, which
    /// also accounts for the manager.
    pub fn fit_initial_capacity_down(count: usize, page_size: usize) -> usize {
        let overhead = size_of::<Self>() + Self::area_overhead();
        fit_down(count, overhead, Self::slot_size(), page_size)
    }

    /// Like [`fit_capacity_up`](Self::fit_capacity_up) for the first area.
    pub fn fit_initial_capacity_up(count: usize, page_size: usize) -> usize {
        let overhead = size_of::<Self>() + Self::area_overhead();
        fit_up(count, overhead, Self::slot_size(), page_size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: usize = 4096;

    type Mgr = MemoryManager<[u64; 5]>;

    #[test]
    fn fit_down_stays_within_original_pages() {
        for count in [1usize, 10, 100, 101, 250, 1000] {
            let fitted = Mgr::fit_capacity_down(count, PAGE);
            let original = Mgr::area_bytes(count);

            assert!(fitted <= count);
            assert!(Mgr::area_bytes(fitted) <= original - original % PAGE || fitted == 0);
        }
    }

    #[test]
    fn fit_up_fills_last_page() {
        for count in [1usize, 10, 100, 101, 250, 1000] {
            let fitted = Mgr::fit_capacity_up(count, PAGE);
            let pages = Mgr::area_bytes(count).div_ceil(PAGE);

            assert!(fitted >= count);
            assert!(Mgr::area_bytes(fitted) <= pages * PAGE);
            // One more slot would spill into another page.
            assert!(Mgr::area_bytes(fitted + 1) > pages * PAGE);
        }
    }

    #[test]
    fn initial_fit_accounts_for_manager() {
        let plain = Mgr::fit_capacity_up(100, PAGE);
        let initial = Mgr::fit_initial_capacity_up(100, PAGE);
        assert!(initial <= plain);

        let down = Mgr::fit_initial_capacity_down(100, PAGE);
        assert!(down <= 100);
    }

    #[test]
    fn zero_page_size_is_identity() {
        assert_eq!(Mgr::fit_capacity_down(17, 0), 17);
        assert_eq!(Mgr::fit_capacity_up(17, 0), 17);
    }
}
