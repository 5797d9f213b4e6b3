use core::fmt;

/// Identifies one object slot in a [`MemoryManager`](crate::MemoryManager).
///
/// Ids are assigned contiguously across areas: the first area owns `0..capacity`, the
/// next area continues where the previous one ended. An id stays valid for as long as
/// the object it was handed out for is live.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ObjectId(usize);

impl ObjectId {
    /// Creates an id from its raw slot number.
    #[inline]
    pub const fn new(slot: usize) -> Self {
        Self(slot)
    }

    /// Returns the raw slot number.
    #[inline]
    pub const fn as_usize(self) -> usize {
        self.0
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.0)
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}
