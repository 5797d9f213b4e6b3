//! Fixed-size object pool.
//!
//! The pool is a list of areas plus a stack of released slot ids. Slot storage is a
//! `Vec<Option<T>>` per area whose capacity is reserved up front, so handing out a
//! never-used slot is a push that cannot reallocate. `slots.len()` of the newest area is
//! the cursor.

use alloc::vec::Vec;

use crate::{AllocError, ObjectId};

/// One contiguous block of object slots.
pub(crate) struct Area<T> {
    /// First id owned by this area.
    base: usize,
    /// Declared number of slots.
    capacity: usize,
    /// Slots handed out at least once; `None` marks a released slot.
    slots: Vec<Option<T>>,
}

impl<T> Area<T> {
    fn new(base: usize, capacity: usize) -> Result<Self, AllocError> {
        let mut slots = Vec::new();
        slots
            .try_reserve_exact(capacity)
            .map_err(|_| AllocError::OutOfMemory)?;

        Ok(Self {
            base,
            capacity,
            slots,
        })
    }

    /// Returns true if the id falls inside this area's id range.
    fn contains(&self, id: ObjectId) -> bool {
        id.as_usize() >= self.base && id.as_usize() - self.base < self.capacity
    }

    /// Returns true once the cursor has reached the declared capacity.
    fn is_exhausted(&self) -> bool {
        self.slots.len() >= self.capacity
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Option<T>> {
        self.slots.get_mut(id.as_usize() - self.base)
    }

    /// Hands out the slot at the cursor and advances it.
    fn push(&mut self, value: T) -> ObjectId {
        let id = ObjectId::new(self.base + self.slots.len());
        self.slots.push(Some(value));
        id
    }
}

/// Pool bookkeeping guarded by the manager's lock.
struct Pool<T> {
    /// Areas in creation order. Only ever appended to while the pool is alive.
    areas: Vec<Area<T>>,
    /// Released slots. Capacity is reserved for every slot of every area, so pushing
    /// never allocates.
    free: Vec<ObjectId>,
    /// Id assigned to the first slot of the next area.
    next_base: usize,
    /// Number of objects currently handed out.
    live: usize,
}

impl<T> Pool<T> {
    const fn new() -> Self {
        Self {
            areas: Vec::new(),
            free: Vec::new(),
            next_base: 0,
            live: 0,
        }
    }

    /// Locates the area containing `id` with a linear scan.
    fn area_mut(&mut self, id: ObjectId) -> Option<&mut Area<T>> {
        self.areas.iter_mut().find(|area| area.contains(id))
    }

    fn slot_mut(&mut self, id: ObjectId) -> Option<&mut Option<T>> {
        self.area_mut(id)?.slot_mut(id)
    }

    /// Selects a slot for `value`: a recycled slot first, then the cursor.
    ///
    /// Hands the value back if the pool is exhausted.
    fn take_slot(&mut self, value: T) -> Result<ObjectId, T> {
        if let Some(id) = self.free.pop() {
            if let Some(slot) = self.slot_mut(id) {
                *slot = Some(value);
                self.live += 1;
                return Ok(id);
            }
        }

        match self.areas.last_mut() {
            Some(area) if !area.is_exhausted() => {
                let id = area.push(value);
                self.live += 1;
                Ok(id)
            }
            _ => Err(value),
        }
    }

    /// Appends a new area and moves the cursor to its first slot.
    ///
    /// Never-used slots left in the previous area are not handed out afterwards.
    fn append_area(&mut self, capacity: usize) -> Result<(), AllocError> {
        if capacity == 0 {
            return Err(AllocError::ZeroCapacity);
        }

        let base = self.next_base;
        let next_base = base
            .checked_add(capacity)
            .ok_or(AllocError::OutOfMemory)?;

        self.areas
            .try_reserve(1)
            .map_err(|_| AllocError::OutOfMemory)?;
        self.free
            .try_reserve(next_base - self.free.len())
            .map_err(|_| AllocError::OutOfMemory)?;

        let area = Area::new(base, capacity)?;
        self.areas.push(area);
        self.next_base = next_base;
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.areas.iter().map(|area| area.capacity).sum()
    }
}

/// A thread-safe pool of same-sized objects.
///
/// Objects are stored in slots identified by [`ObjectId`]. A pool starts with one area
/// and grows only when asked to: [`acquire`](Self::acquire) reports
/// [`AllocError::Exhausted`] once every slot is live, while
/// [`acquire_or_enlarge`](Self::acquire_or_enlarge) appends an area of a caller-chosen
/// size and retries.
///
/// # Thread Safety
///
/// Acquire, release and enlargement are serialized by a single `spin::Mutex` guarding
/// the area list, the cursor and the free list together. Two threads hitting the same
/// exhaustion can therefore never both append an area for it.
pub struct MemoryManager<T> {
    pool: spin::Mutex<Pool<T>>,
}

impl<T> MemoryManager<T> {
    /// Creates a pool with one area holding `capacity` objects.
    ///
    /// Fails with [`AllocError::OutOfMemory`] if the area cannot be allocated and with
    /// [`AllocError::ZeroCapacity`] if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self, AllocError> {
        let mut pool = Pool::new();
        pool.append_area(capacity)?;

        Ok(Self {
            pool: spin::Mutex::new(pool),
        })
    }

    /// Stores `value` in a free slot and returns its id.
    ///
    /// Recycled slots are preferred over never-used ones. Returns
    /// [`AllocError::Exhausted`] (dropping `value`) if no slot is available.
    pub fn acquire(&self, value: T) -> Result<ObjectId, AllocError> {
        let mut pool = self.pool.lock();
        let id = pool.take_slot(value).map_err(|_| AllocError::Exhausted)?;
        log::trace!("memmgr: acquired {id} ({} live)", pool.live);
        Ok(id)
    }

    /// Like [`acquire`](Self::acquire), but appends an area of `growth` slots when the
    /// pool is exhausted.
    ///
    /// The new area is appended under the same lock as the slot selection, and the
    /// returned id then belongs to it. A `growth` of zero disables enlargement.
    pub fn acquire_or_enlarge(&self, value: T, growth: usize) -> Result<ObjectId, AllocError> {
        let mut pool = self.pool.lock();
        let value = match pool.take_slot(value) {
            Ok(id) => return Ok(id),
            Err(value) => value,
        };

        if growth == 0 {
            return Err(AllocError::Exhausted);
        }

        pool.append_area(growth)?;
        log::trace!(
            "memmgr: enlarged by {growth} slots ({} areas, capacity {})",
            pool.areas.len(),
            pool.capacity()
        );

        pool.take_slot(value).map_err(|_| AllocError::Exhausted)
    }

    /// Appends an area of `capacity` slots and moves the cursor into it.
    pub fn enlarge(&self, capacity: usize) -> Result<(), AllocError> {
        self.pool.lock().append_area(capacity)
    }

    /// Returns the object in slot `id` to the pool.
    ///
    /// The slot is pushed onto the free list and the object is handed back. An id that
    /// no area owns, or whose slot is not live, is ignored and `None` is returned.
    pub fn release(&self, id: ObjectId) -> Option<T> {
        let mut pool = self.pool.lock();
        let Some(value) = pool.slot_mut(id).and_then(Option::take) else {
            log::warn!("memmgr: ignoring release of {id}, not a live object of this pool");
            return None;
        };

        pool.free.push(id);
        pool.live -= 1;
        log::trace!("memmgr: released {id} ({} live)", pool.live);
        Some(value)
    }

    /// Calls `f` with a shared reference to the live object in slot `id`.
    ///
    /// The pool lock is held while `f` runs, so `f` must not call back into this pool.
    pub fn with<R>(&self, id: ObjectId, f: impl FnOnce(&T) -> R) -> Option<R> {
        let mut pool = self.pool.lock();
        pool.slot_mut(id).and_then(|slot| slot.as_ref()).map(f)
    }

    /// Calls `f` with a mutable reference to the live object in slot `id`.
    ///
    /// The pool lock is held while `f` runs, so `f` must not call back into this pool.
    pub fn with_mut<R>(&self, id: ObjectId, f: impl FnOnce(&mut T) -> R) -> Option<R> {
        let mut pool = self.pool.lock();
        pool.slot_mut(id).and_then(|slot| slot.as_mut()).map(f)
    }

    /// Returns true if `id` refers to a live object of this pool.
    pub fn contains(&self, id: ObjectId) -> bool {
        self.with(id, |_| ()).is_some()
    }

    /// Returns the total number of slots across all areas.
    pub fn capacity(&self) -> usize {
        self.pool.lock().capacity()
    }

    /// Returns the number of live objects.
    pub fn live(&self) -> usize {
        self.pool.lock().live
    }

    /// Returns the number of released slots waiting to be recycled.
    pub fn free_count(&self) -> usize {
        self.pool.lock().free.len()
    }

    /// Returns the number of areas.
    pub fn area_count(&self) -> usize {
        self.pool.lock().areas.len()
    }

    /// Destroys the pool, releasing every area.
    pub fn destroy(self) {
        drop(self);
    }
}

impl<T> Drop for MemoryManager<T> {
    fn drop(&mut self) {
        let pool = self.pool.get_mut();
        if pool.live != 0 {
            log::debug!("memmgr: destroying pool with {} live objects", pool.live);
        }

        // Newest first; the first area goes last.
        while let Some(area) = pool.areas.pop() {
            drop(area);
        }
    }
}
