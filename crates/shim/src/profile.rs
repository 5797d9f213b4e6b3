//! Process-wide profiling counters.
//!
//! Counters are off until [`init`] runs. While disabled, recording is a no-op.

use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Anonymous mappings created through the dispatcher.
pub static MMAP: Profile = Profile::new("mmap");

/// An occurrence and byte counter.
pub struct Profile {
    name: &'static str,
    enabled: AtomicBool,
    occurrences: AtomicU64,
    bytes: AtomicU64,
}

/// A point-in-time copy of a [`Profile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProfileSnapshot {
    pub occurrences: u64,
    pub bytes: u64,
}

impl Profile {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            enabled: AtomicBool::new(false),
            occurrences: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn enable(&self) {
        self.enabled.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.enabled.store(false, Ordering::Release);
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }

    /// Records one occurrence covering `bytes`.
    pub fn record(&self, bytes: usize) {
        if !self.is_enabled() {
            return;
        }
        self.occurrences.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProfileSnapshot {
        ProfileSnapshot {
            occurrences: self.occurrences.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
        }
    }

    pub fn reset(&self) {
        self.occurrences.store(0, Ordering::Relaxed);
        self.bytes.store(0, Ordering::Relaxed);
    }
}

/// Clears and enables the process-wide counters.
pub fn init() {
    MMAP.reset();
    MMAP.enable();
}

/// Disables the process-wide counters and returns their final values.
pub fn teardown() -> ProfileSnapshot {
    MMAP.disable();
    let snapshot = MMAP.snapshot();
    log::info!(
        "profile: {} x{} ({:#x} bytes)",
        MMAP.name(),
        snapshot.occurrences,
        snapshot.bytes
    );
    snapshot
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_counter_ignores_records() {
        let profile = Profile::new("test");
        profile.record(4096);
        assert_eq!(profile.snapshot(), ProfileSnapshot::default());
    }

    #[test]
    fn counts_occurrences_and_bytes() {
        let profile = Profile::new("test");
        profile.enable();
        profile.record(4096);
        profile.record(8192);
        assert_eq!(
            profile.snapshot(),
            ProfileSnapshot {
                occurrences: 2,
                bytes: 12288
            }
        );

        profile.disable();
        profile.record(4096);
        assert_eq!(profile.snapshot().occurrences, 2);

        profile.reset();
        assert_eq!(profile.snapshot(), ProfileSnapshot::default());
    }
}
