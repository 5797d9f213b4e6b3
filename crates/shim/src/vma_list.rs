//! Reference VMA store.
//!
//! [`VmaList`] keeps VMAs in an ordered index keyed by start address. The records
//! themselves live in a [`MemoryManager`], so installing or destroying a VMA is an
//! acquire or release against the pool. One lock covers the index and the host page
//! mapper, which makes every store operation atomic with respect to the others.
//!
//! # Record lifetime
//!
//! A record leaves the index when its whole range is freed or superseded. If an overlap
//! lookup still holds it at that point it is marked detached, and the slot goes back to
//! the pool when the last hold is released.

use alloc::collections::BTreeMap;
use alloc::vec::Vec;

use memmgr::MemoryManager;

use crate::{
    FileBacking, MapRequest, PAGE_SIZE, PageMapper, PageRange, Protection, Result,
    VirtualAddress, Vma, VmaId, VmaStore, VmError,
};

/// Exclusive upper bound of every mapping, so a mapped address is always a positive
/// `isize` at the syscall boundary.
const USER_LIMIT: VirtualAddress = VirtualAddress::new(1 << (usize::BITS - 1));

/// Placement and sizing parameters for a [`VmaList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreConfig {
    /// Lowest address a mapping may occupy.
    pub mmap_floor: VirtualAddress,
    /// Addresses chosen by the store lie below this bound. Fixed mappings may go above.
    pub mmap_top: VirtualAddress,
    /// Records in the first pool area.
    pub initial_records: usize,
    /// Records added each time the pool runs out.
    pub growth_records: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mmap_floor: VirtualAddress::new(0x1_0000),
            mmap_top: VirtualAddress::new(0x7f00_0000_0000),
            initial_records: MemoryManager::<VmaRecord>::fit_initial_capacity_up(64, PAGE_SIZE),
            growth_records: MemoryManager::<VmaRecord>::fit_capacity_up(64, PAGE_SIZE),
        }
    }
}

/// A VMA plus its reference bookkeeping.
pub(crate) struct VmaRecord {
    vma: Vma,
    /// Outstanding holds from overlap lookups.
    holds: usize,
    /// Removed from the index while still held.
    detached: bool,
}

impl VmaRecord {
    fn new(vma: Vma) -> Self {
        Self {
            vma,
            holds: 0,
            detached: false,
        }
    }
}

/// How removing a range changes one VMA.
struct Cut {
    id: VmaId,
    vma: Vma,
    /// Part left below the removed range.
    left: Option<PageRange>,
    /// Part left above the removed range.
    right: Option<PageRange>,
    /// Record for `right` when the VMA is split in two.
    right_id: Option<VmaId>,
}

struct State<M> {
    /// Live VMAs by start address. Ranges never overlap.
    index: BTreeMap<VirtualAddress, VmaId>,
    host: M,
}

/// An in-process VMA store backed by a host [`PageMapper`].
pub struct VmaList<M> {
    records: MemoryManager<VmaRecord>,
    state: spin::Mutex<State<M>>,
    config: StoreConfig,
}

impl<M: PageMapper> VmaList<M> {
    /// Creates an empty store on top of `host`.
    ///
    /// The placement bounds are rounded inwards to page boundaries. An empty window, or
    /// one reaching past the user address limit, is rejected with
    /// [`VmError::InvalidArgument`].
    pub fn new(host: M, config: StoreConfig) -> Result<Self> {
        let floor = config
            .mmap_floor
            .checked_align_up(PAGE_SIZE)
            .ok_or(VmError::InvalidArgument)?;
        let top = config.mmap_top.align_down(PAGE_SIZE);
        if floor >= top || top > USER_LIMIT {
            return Err(VmError::InvalidArgument);
        }

        Ok(Self {
            records: MemoryManager::new(config.initial_records)?,
            state: spin::Mutex::new(State {
                index: BTreeMap::new(),
                host,
            }),
            config: StoreConfig {
                mmap_floor: floor,
                mmap_top: top,
                ..config
            },
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Returns every VMA in address order.
    pub fn vmas(&self) -> Vec<Vma> {
        let state = self.state.lock();
        state
            .index
            .values()
            .filter_map(|&id| self.snapshot(id))
            .collect()
    }

    /// Returns the number of VMAs in the index.
    pub fn len(&self) -> usize {
        self.state.lock().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the number of records allocated from the pool, including detached ones.
    pub fn live_records(&self) -> usize {
        self.records.live()
    }

    /// Calls `f` with the host page mapper.
    pub fn with_host<R>(&self, f: impl FnOnce(&M) -> R) -> R {
        f(&self.state.lock().host)
    }

    fn snapshot(&self, id: VmaId) -> Option<Vma> {
        self.records.with(id, |record| record.vma)
    }

    fn new_record(&self, vma: Vma) -> Result<VmaId> {
        Ok(self
            .records
            .acquire_or_enlarge(VmaRecord::new(vma), self.config.growth_records)?)
    }

    /// Returns the VMAs intersecting `[start, end)` in address order.
    fn overlapping(&self, state: &State<M>, start: VirtualAddress, end: VirtualAddress) -> Vec<VmaId> {
        let mut ids = Vec::new();
        if start >= end {
            return ids;
        }

        // The VMA starting below `start` may still reach into the range.
        if let Some((_, &id)) = state.index.range(..start).next_back() {
            if self.snapshot(id).is_some_and(|vma| vma.end() > start) {
                ids.push(id);
            }
        }

        ids.extend(state.index.range(start..end).map(|(_, &id)| id));
        ids
    }

    fn is_free(&self, state: &State<M>, range: PageRange) -> bool {
        self.overlapping(state, range.start(), range.end()).is_empty()
    }

    /// Finds a gap of `length` bytes inside the placement window, searching down from
    /// the top.
    fn find_free(&self, state: &State<M>, length: usize) -> Option<PageRange> {
        let floor = self.config.mmap_floor;
        let mut ceiling = self.config.mmap_top;

        for (_, &id) in state.index.range(..ceiling).rev() {
            let Some(vma) = self.snapshot(id) else {
                continue;
            };

            let gap_start = vma.end().max(floor);
            if ceiling > gap_start && ceiling - gap_start >= length {
                return PageRange::new(ceiling - length, ceiling);
            }

            ceiling = ceiling.min(vma.start());
            if ceiling <= floor {
                return None;
            }
        }

        if ceiling > floor && ceiling - floor >= length {
            PageRange::new(ceiling - length, ceiling)
        } else {
            None
        }
    }

    /// Chooses the range for a new mapping. Returns whether it supersedes existing VMAs.
    fn place(&self, state: &State<M>, request: &MapRequest) -> Result<(PageRange, bool)> {
        if request.length == 0 || request.length % PAGE_SIZE != 0 {
            return Err(VmError::InvalidArgument);
        }

        if request.flags.is_fixed() {
            let range = request.requested_range().ok_or(VmError::InvalidArgument)?;
            if range.start() < self.config.mmap_floor || range.end() > USER_LIMIT {
                return Err(VmError::InvalidArgument);
            }
            return Ok((range, !self.is_free(state, range)));
        }

        if let Some(range) = request.requested_range() {
            if range.start() >= self.config.mmap_floor
                && range.end() <= USER_LIMIT
                && self.is_free(state, range)
            {
                return Ok((range, false));
            }
        }

        let range = self
            .find_free(state, request.length)
            .ok_or(VmError::OutOfMemory)?;
        Ok((range, false))
    }

    /// Installs a new VMA for `request`, superseding overlapped VMAs for `MAP_FIXED`.
    ///
    /// Every record the install needs is allocated before the host is touched, so a
    /// failure leaves both the index and the host pages as they were.
    fn install(&self, request: MapRequest, backing: Option<FileBacking>) -> Result<VirtualAddress> {
        let mut state = self.state.lock();
        let (range, supersedes) = self.place(&state, &request)?;

        let vma = match backing {
            Some(backing) => Vma::file(range, request.prot, request.flags, backing),
            None => Vma::anonymous(range, request.prot, request.flags),
        };
        let id = self.new_record(vma)?;

        let cuts = if supersedes {
            match self.plan_carve(&state, range) {
                Ok(cuts) => cuts,
                Err(err) => {
                    self.records.release(id);
                    return Err(err);
                }
            }
        } else {
            Vec::new()
        };

        if let Err(err) = state.host.map(range, request.prot) {
            self.abandon(&cuts);
            self.records.release(id);
            return Err(err);
        }

        if !cuts.is_empty() {
            log::debug!("vma: {range} supersedes existing mappings");
            // The host already replaced the pages, only the index needs carving.
            self.apply_carve(&mut state, range, cuts);
        }

        state.index.insert(range.start(), id);
        log::trace!("vma: installed {vma} as {id}");
        Ok(range.start())
    }

    /// Works out how removing `range` changes each VMA it intersects.
    ///
    /// A VMA split in two needs a second record for its right part; those records are
    /// allocated here, so applying the plan cannot fail.
    fn plan_carve(&self, state: &State<M>, range: PageRange) -> Result<Vec<Cut>> {
        let ids = self.overlapping(state, range.start(), range.end());
        let mut cuts = Vec::with_capacity(ids.len());

        for id in ids {
            let Some(vma) = self.snapshot(id) else {
                continue;
            };
            let (left, right) = vma.range().punch_hole(&range);

            let right_id = match (left, right) {
                (Some(_), Some(right)) => match self.new_record(vma.shrink_to(right)) {
                    Ok(right_id) => Some(right_id),
                    Err(err) => {
                        self.abandon(&cuts);
                        return Err(err);
                    }
                },
                _ => None,
            };

            cuts.push(Cut {
                id,
                vma,
                left,
                right,
                right_id,
            });
        }

        Ok(cuts)
    }

    /// Returns the records a carve plan allocated.
    fn abandon(&self, cuts: &[Cut]) {
        for right_id in cuts.iter().filter_map(|cut| cut.right_id) {
            self.records.release(right_id);
        }
    }

    /// Applies a carve plan to the index.
    fn apply_carve(&self, state: &mut State<M>, range: PageRange, cuts: Vec<Cut>) {
        for cut in cuts {
            let Cut {
                id,
                vma,
                left,
                right,
                right_id,
            } = cut;

            state.index.remove(&vma.start());
            match (left, right, right_id) {
                (Some(left), Some(right), Some(right_id)) => {
                    self.records
                        .with_mut(id, |record| record.vma = vma.shrink_to(left));
                    state.index.insert(left.start(), id);
                    state.index.insert(right.start(), right_id);
                    log::trace!("vma: split {vma} around {range}");
                }
                (Some(kept), _, _) | (None, Some(kept), _) => {
                    self.records
                        .with_mut(id, |record| record.vma = vma.shrink_to(kept));
                    state.index.insert(kept.start(), id);
                    log::trace!("vma: truncated {vma} to {kept}");
                }
                (None, None, _) => {
                    self.detach(id);
                    log::trace!("vma: removed {vma}");
                }
            }
        }
    }

    /// Marks a record as gone from the index, returning it to the pool if unheld.
    fn detach(&self, id: VmaId) {
        let unheld = self.records.with_mut(id, |record| {
            record.detached = true;
            record.holds == 0
        });

        if unheld == Some(true) {
            self.records.release(id);
        }
    }
}

impl<M: PageMapper> VmaStore for VmaList<M> {
    fn lookup_overlap(&self, start: VirtualAddress, length: usize) -> Option<VmaId> {
        if length == 0 {
            return None;
        }

        let state = self.state.lock();
        let end = start
            .checked_add(length)
            .unwrap_or(VirtualAddress::new(usize::MAX));
        let id = self.overlapping(&state, start, end).into_iter().next()?;
        self.records.with_mut(id, |record| record.holds += 1)?;
        Some(id)
    }

    fn hold(&self, vma: VmaId) {
        let _state = self.state.lock();
        self.records.with_mut(vma, |record| record.holds += 1);
    }

    fn release(&self, vma: VmaId) {
        let _state = self.state.lock();
        let reclaim = self.records.with_mut(vma, |record| {
            record.holds = record.holds.saturating_sub(1);
            record.detached && record.holds == 0
        });

        if reclaim == Some(true) {
            self.records.release(vma);
        }
    }

    fn vma(&self, vma: VmaId) -> Option<Vma> {
        self.snapshot(vma)
    }

    fn alloc_anonymous(&self, request: MapRequest) -> Result<VirtualAddress> {
        self.install(request, None)
    }

    fn install_file(&self, request: MapRequest, backing: FileBacking) -> Result<VirtualAddress> {
        self.install(request, Some(backing))
    }

    fn protect(&self, range: PageRange, prot: Protection) -> Result<()> {
        let mut state = self.state.lock();
        let ids = self.overlapping(&state, range.start(), range.end());

        // Every page of the range must be covered before anything changes.
        let mut covered = range.start();
        let mut vmas = Vec::with_capacity(ids.len());
        for &id in &ids {
            let Some(vma) = self.snapshot(id) else {
                return Err(VmError::Unmapped);
            };
            if vma.start() > covered {
                return Err(VmError::Unmapped);
            }
            covered = covered.max(vma.end());
            vmas.push((id, vma));
        }
        if covered < range.end() {
            return Err(VmError::Unmapped);
        }

        // Allocate records for every extra piece up front so a failure changes nothing.
        let mut plan = Vec::with_capacity(vmas.len());
        let mut extra_ids = Vec::new();
        for (id, vma) in vmas {
            let (left, right) = vma.range().punch_hole(&range);
            let mut pieces = Vec::with_capacity(3);
            if let Some(left) = left {
                pieces.push(vma.shrink_to(left));
            }
            if let Some(middle) = vma.range().intersection(&range) {
                let mut middle = vma.shrink_to(middle);
                middle.set_protection(prot);
                pieces.push(middle);
            }
            if let Some(right) = right {
                pieces.push(vma.shrink_to(right));
            }

            let mut extras = Vec::with_capacity(pieces.len().saturating_sub(1));
            for piece in pieces.iter().skip(1) {
                match self.new_record(*piece) {
                    Ok(extra) => {
                        extras.push((extra, *piece));
                        extra_ids.push(extra);
                    }
                    Err(err) => {
                        for extra in extra_ids {
                            self.records.release(extra);
                        }
                        return Err(err);
                    }
                }
            }

            plan.push((id, vma, pieces[0], extras));
        }

        if let Err(err) = state.host.protect(range, prot) {
            for extra in extra_ids {
                self.records.release(extra);
            }
            return Err(err);
        }

        for (id, old, first, extras) in plan {
            state.index.remove(&old.start());
            self.records.with_mut(id, |record| record.vma = first);
            state.index.insert(first.start(), id);
            for (extra, piece) in extras {
                state.index.insert(piece.start(), extra);
            }
        }

        log::trace!("vma: protected {range} as {prot}");
        Ok(())
    }

    fn free(&self, range: PageRange) -> Result<()> {
        let mut state = self.state.lock();
        let cuts = self.plan_carve(&state, range)?;
        if cuts.is_empty() {
            log::trace!("vma: nothing mapped in {range}");
            return Ok(());
        }

        // Host pages only exist under VMAs, so the whole range can go at once.
        if let Err(err) = state.host.unmap(range) {
            self.abandon(&cuts);
            return Err(err);
        }

        self.apply_carve(&mut state, range, cuts);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::thread;

    use memmgr::AllocError;

    use super::*;
    use crate::{EmulatedHost, FileId, MapFlags, PageNumber};

    /// Checks that the index, the record pool and the host pages agree.
    pub(crate) fn assert_consistent(store: &VmaList<EmulatedHost>) {
        let vmas = store.vmas();
        for pair in vmas.windows(2) {
            assert!(pair[0].end() <= pair[1].start(), "{} overlaps {}", pair[0], pair[1]);
        }

        assert_eq!(store.live_records(), vmas.len());

        let pages: usize = vmas.iter().map(|vma| vma.range().page_count()).sum();
        assert_eq!(store.with_host(|host| host.mapped_pages()), pages);

        store.with_host(|host| {
            for vma in &vmas {
                for page in PageNumber::pages_of(vma.range()) {
                    assert_eq!(host.protection(page.start()), Some(vma.protection()), "{vma}");
                }
            }
        });
    }

    fn range(start: usize, end: usize) -> PageRange {
        PageRange::new(VirtualAddress::new(start), VirtualAddress::new(end)).unwrap()
    }

    fn store() -> VmaList<EmulatedHost> {
        VmaList::new(EmulatedHost::new(), StoreConfig::default()).unwrap()
    }

    fn anon(address: Option<usize>, length: usize, flags: u32) -> MapRequest {
        MapRequest {
            address: address.map(VirtualAddress::new),
            length,
            prot: Protection::read_write(),
            flags: MapFlags::from_raw((flags | MapFlags::ANONYMOUS) as u64),
        }
    }

    #[test]
    fn places_top_down_below_mmap_top() {
        let store = store();
        let top = store.config().mmap_top;

        let a = store.alloc_anonymous(anon(None, 0x2000, MapFlags::PRIVATE)).unwrap();
        let b = store.alloc_anonymous(anon(None, 0x1000, MapFlags::PRIVATE)).unwrap();

        assert_eq!(a, top - 0x2000);
        assert_eq!(b, top - 0x3000);
        assert_eq!(store.len(), 2);
        assert_eq!(store.with_host(|h| h.mapped_pages()), 3);
    }

    #[test]
    fn honors_free_hint_and_ignores_taken_one() {
        let store = store();

        let a = store
            .alloc_anonymous(anon(Some(0x40_0000), 0x1000, MapFlags::PRIVATE))
            .unwrap();
        assert_eq!(a, VirtualAddress::new(0x40_0000));

        let b = store
            .alloc_anonymous(anon(Some(0x40_0000), 0x1000, MapFlags::PRIVATE))
            .unwrap();
        assert_ne!(b, a);
    }

    #[test]
    fn fixed_mapping_supersedes_overlap() {
        let store = store();
        store
            .alloc_anonymous(anon(Some(0x10_0000), 0x4000, MapFlags::PRIVATE))
            .unwrap();

        let mut request = anon(Some(0x10_1000), 0x1000, MapFlags::SHARED | MapFlags::FIXED);
        request.prot = Protection::none();
        store.alloc_anonymous(request).unwrap();

        let vmas = store.vmas();
        let ranges: Vec<_> = vmas.iter().map(|v| v.range()).collect();
        assert_eq!(
            ranges,
            [
                range(0x10_0000, 0x10_1000),
                range(0x10_1000, 0x10_2000),
                range(0x10_2000, 0x10_4000)
            ]
        );
        assert_eq!(vmas[1].protection(), Protection::none());
        assert!(vmas[1].is_shared());
        assert_eq!(store.with_host(|h| h.mapped_pages()), 4);
        assert_eq!(
            store.with_host(|h| h.protection(VirtualAddress::new(0x10_1000))),
            Some(Protection::none())
        );
    }

    #[test]
    fn fixed_below_floor_is_rejected() {
        let store = store();
        assert_eq!(
            store.alloc_anonymous(anon(Some(0x1000), 0x1000, MapFlags::FIXED)),
            Err(VmError::InvalidArgument)
        );
        assert!(store.is_empty());
    }

    #[test]
    fn free_splits_and_truncates() {
        let store = store();
        store
            .alloc_anonymous(anon(Some(0x20_0000), 0x5000, MapFlags::PRIVATE))
            .unwrap();

        store.free(range(0x20_1000, 0x20_2000)).unwrap();
        store.free(range(0x20_4000, 0x20_6000)).unwrap();

        let ranges: Vec<_> = store.vmas().iter().map(|v| v.range()).collect();
        assert_eq!(
            ranges,
            [range(0x20_0000, 0x20_1000), range(0x20_2000, 0x20_4000)]
        );
        assert_eq!(store.with_host(|h| h.mapped_pages()), 3);
        assert_eq!(store.live_records(), 2);

        store.free(range(0x20_0000, 0x20_4000)).unwrap();
        assert!(store.is_empty());
        assert_eq!(store.live_records(), 0);
        assert_eq!(store.with_host(|h| h.mapped_pages()), 0);
    }

    #[test]
    fn free_of_unmapped_range_is_a_no_op() {
        let store = store();
        store.free(range(0x30_0000, 0x30_1000)).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn truncating_file_vma_advances_offset() {
        let store = store();
        let request = MapRequest {
            address: Some(VirtualAddress::new(0x50_0000)),
            length: 0x3000,
            prot: Protection::read_write(),
            flags: MapFlags::from_raw(MapFlags::PRIVATE as u64),
        };
        store
            .install_file(
                request,
                FileBacking {
                    file: FileId(9),
                    offset: 0,
                },
            )
            .unwrap();

        store.free(range(0x50_0000, 0x50_1000)).unwrap();

        let vmas = store.vmas();
        assert_eq!(vmas.len(), 1);
        assert_eq!(vmas[0].backing().unwrap().offset, 0x1000);
        assert!(!vmas[0].is_anonymous());
    }

    #[test]
    fn protect_splits_at_boundaries() {
        let store = store();
        store
            .alloc_anonymous(anon(Some(0x60_0000), 0x4000, MapFlags::PRIVATE))
            .unwrap();

        store
            .protect(range(0x60_1000, 0x60_2000), Protection::none())
            .unwrap();

        let vmas = store.vmas();
        assert_eq!(vmas.len(), 3);
        assert_eq!(vmas[0].protection(), Protection::read_write());
        assert_eq!(vmas[1].protection(), Protection::none());
        assert_eq!(vmas[1].range(), range(0x60_1000, 0x60_2000));
        assert_eq!(vmas[2].protection(), Protection::read_write());
    }

    #[test]
    fn protect_spanning_adjacent_vmas() {
        let store = store();
        store
            .alloc_anonymous(anon(Some(0x70_0000), 0x2000, MapFlags::PRIVATE))
            .unwrap();
        store
            .alloc_anonymous(anon(Some(0x70_2000), 0x2000, MapFlags::PRIVATE))
            .unwrap();

        store
            .protect(range(0x70_1000, 0x70_3000), Protection::none())
            .unwrap();

        let prots: Vec<_> = store.vmas().iter().map(|v| v.protection()).collect();
        assert_eq!(
            prots,
            [
                Protection::read_write(),
                Protection::none(),
                Protection::none(),
                Protection::read_write()
            ]
        );
    }

    #[test]
    fn protect_rejects_holes_without_changes() {
        let store = store();
        store
            .alloc_anonymous(anon(Some(0x80_0000), 0x1000, MapFlags::PRIVATE))
            .unwrap();
        store
            .alloc_anonymous(anon(Some(0x80_2000), 0x1000, MapFlags::PRIVATE))
            .unwrap();

        assert_eq!(
            store.protect(range(0x80_0000, 0x80_3000), Protection::none()),
            Err(VmError::Unmapped)
        );
        assert!(store
            .vmas()
            .iter()
            .all(|v| v.protection() == Protection::read_write()));
        assert_eq!(store.live_records(), 2);
    }

    #[test]
    fn held_record_survives_free_until_released() {
        let store = store();
        store
            .alloc_anonymous(anon(Some(0x90_0000), 0x1000, MapFlags::PRIVATE))
            .unwrap();

        let id = store
            .lookup_overlap(VirtualAddress::new(0x90_0800), 1)
            .unwrap();
        store.free(range(0x90_0000, 0x90_1000)).unwrap();

        assert!(store.is_empty());
        assert_eq!(store.live_records(), 1);
        assert!(store.vma(id).is_some());

        store.release(id);
        assert_eq!(store.live_records(), 0);
    }

    #[test]
    fn lookup_uses_raw_byte_range() {
        let store = store();
        store
            .alloc_anonymous(anon(Some(0xa0_1000), 0x1000, MapFlags::PRIVATE))
            .unwrap();

        assert!(store.lookup_overlap(VirtualAddress::new(0xa0_0000), 0x1000).is_none());
        assert!(store.lookup_overlap(VirtualAddress::new(0xa0_2000), 0x1000).is_none());
        assert!(store.lookup_overlap(VirtualAddress::new(0xa0_1000), 0).is_none());

        let id = store
            .lookup_overlap(VirtualAddress::new(0xa0_0fff), 2)
            .unwrap();
        store.release(id);
    }

    #[test]
    fn host_failure_leaves_no_record() {
        let store = VmaList::new(EmulatedHost::with_page_limit(1), StoreConfig::default()).unwrap();

        assert_eq!(
            store.alloc_anonymous(anon(None, 0x2000, MapFlags::PRIVATE)),
            Err(VmError::OutOfMemory)
        );
        assert!(store.is_empty());
        assert_eq!(store.live_records(), 0);
    }

    #[test]
    fn failed_split_leaves_existing_mapping_intact() {
        let config = StoreConfig {
            initial_records: 2,
            growth_records: 0,
            ..StoreConfig::default()
        };
        let store = VmaList::new(EmulatedHost::new(), config).unwrap();
        store
            .alloc_anonymous(anon(Some(0x10_0000), 0x3000, MapFlags::PRIVATE))
            .unwrap();

        // Splitting the old VMA around the fixed one needs a third record.
        let mut fixed = anon(Some(0x10_1000), 0x1000, MapFlags::PRIVATE | MapFlags::FIXED);
        fixed.prot = Protection::none();
        assert_eq!(
            store.alloc_anonymous(fixed),
            Err(VmError::Alloc(AllocError::Exhausted))
        );

        let vmas = store.vmas();
        assert_eq!(vmas.len(), 1);
        assert_eq!(vmas[0].range(), range(0x10_0000, 0x10_3000));
        assert_eq!(
            store.with_host(|h| h.protection(VirtualAddress::new(0x10_1000))),
            Some(Protection::read_write())
        );
        assert_consistent(&store);
        store
            .protect(range(0x10_0000, 0x10_3000), Protection::none())
            .unwrap();

        // Same for a free punching a hole once the pool is full.
        store
            .alloc_anonymous(anon(Some(0x20_0000), 0x1000, MapFlags::PRIVATE))
            .unwrap();
        assert_eq!(
            store.free(range(0x10_1000, 0x10_2000)),
            Err(VmError::Alloc(AllocError::Exhausted))
        );
        assert_eq!(store.len(), 2);
        assert_eq!(store.with_host(|h| h.mapped_pages()), 4);
        assert_consistent(&store);
    }

    #[test]
    fn fixed_mapping_must_stay_below_user_limit() {
        let store = store();
        let last_page = USER_LIMIT.as_usize() - PAGE_SIZE;

        assert_eq!(
            store.alloc_anonymous(anon(Some(last_page), 0x2000, MapFlags::FIXED)),
            Err(VmError::InvalidArgument)
        );
        assert_eq!(
            store.alloc_anonymous(anon(Some(last_page), 0x1000, MapFlags::FIXED)),
            Ok(VirtualAddress::new(last_page))
        );

        let config = StoreConfig {
            mmap_top: VirtualAddress::new(usize::MAX),
            ..StoreConfig::default()
        };
        assert!(matches!(
            VmaList::new(EmulatedHost::new(), config),
            Err(VmError::InvalidArgument)
        ));
    }

    #[test]
    fn every_hold_needs_a_release() {
        let store = store();
        store
            .alloc_anonymous(anon(Some(0xb0_0000), 0x1000, MapFlags::PRIVATE))
            .unwrap();

        let id = store
            .lookup_overlap(VirtualAddress::new(0xb0_0000), 0x1000)
            .unwrap();
        store.hold(id);
        store.free(range(0xb0_0000, 0xb0_1000)).unwrap();

        store.release(id);
        assert_eq!(store.live_records(), 1);
        assert_eq!(
            store.vma(id).map(|vma| vma.start()),
            Some(VirtualAddress::new(0xb0_0000))
        );

        store.release(id);
        assert_eq!(store.live_records(), 0);
    }

    #[test]
    fn concurrent_operations_keep_store_consistent() {
        const BASE: usize = 0xc0_0000;
        let config = StoreConfig {
            initial_records: 4,
            growth_records: 4,
            ..StoreConfig::default()
        };
        let store = VmaList::new(EmulatedHost::new(), config).unwrap();

        thread::scope(|s| {
            for t in 0..4usize {
                let store = &store;
                s.spawn(move || {
                    for i in 0..200usize {
                        let page = |n: usize| BASE + (n % 14) * PAGE_SIZE;
                        let prot = if (i + t) % 2 == 0 {
                            Protection::none()
                        } else {
                            Protection::read_write()
                        };

                        let mut fixed =
                            anon(Some(page(i * 7 + t)), PAGE_SIZE * (1 + i % 3), MapFlags::FIXED);
                        fixed.prot = prot;
                        store.alloc_anonymous(fixed).unwrap();

                        let hole = range(page(i * 5 + t), page(i * 5 + t) + PAGE_SIZE * 2);
                        store.free(hole).unwrap();

                        let target = range(page(i * 3 + t), page(i * 3 + t) + PAGE_SIZE);
                        let _ = store.protect(target, prot);

                        let held = store.lookup_overlap(VirtualAddress::new(BASE), 16 * PAGE_SIZE);
                        if let Some(id) = held {
                            assert!(store.vma(id).is_some());
                            store.release(id);
                        }
                    }
                });
            }
        });

        assert_consistent(&store);
    }

    #[test]
    fn record_pool_grows_past_first_area() {
        let config = StoreConfig {
            initial_records: 2,
            growth_records: 2,
            ..StoreConfig::default()
        };
        let store = VmaList::new(EmulatedHost::new(), config).unwrap();

        for _ in 0..5 {
            store.alloc_anonymous(anon(None, 0x1000, MapFlags::PRIVATE)).unwrap();
        }
        assert_eq!(store.len(), 5);
        assert_eq!(store.live_records(), 5);
    }

    #[test]
    fn rejects_empty_window() {
        let config = StoreConfig {
            mmap_floor: VirtualAddress::new(0x2000),
            mmap_top: VirtualAddress::new(0x2fff),
            ..StoreConfig::default()
        };
        assert!(matches!(
            VmaList::new(EmulatedHost::new(), config),
            Err(VmError::InvalidArgument)
        ));
    }
}
