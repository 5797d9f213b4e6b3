#![cfg_attr(not(test), no_std)]

//! # Memory Manager (memmgr)
//!
//! A slab-style allocator for fixed-size metadata objects. A [`MemoryManager`] owns one
//! or more *areas*, each a contiguous block of object slots with a fixed capacity, and
//! recycles released slots through a free list. It provides:
//!
//! - O(1) acquire from the free list, falling back to a cursor over the newest area.
//! - On-demand enlargement by appending areas (areas are never returned while alive).
//! - Release by area lookup, ignoring objects the pool does not own.
//! - Sizing helpers that fit an area to whole pages.

extern crate alloc;

mod error;
mod manager;
mod object_id;
mod sizing;

pub use error::AllocError;
pub use manager::MemoryManager;
pub use object_id::ObjectId;
