use thiserror::Error;

/// Errors reported by a [`MemoryManager`](crate::MemoryManager).
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// The backing allocation for a new area could not be satisfied.
    #[error("Cannot allocate memory for a new area")]
    OutOfMemory,

    /// Every slot is live and the request did not allow the pool to grow.
    #[error("Object pool exhausted")]
    Exhausted,

    /// An area must hold at least one object.
    #[error("Area capacity must be non-zero")]
    ZeroCapacity,
}
