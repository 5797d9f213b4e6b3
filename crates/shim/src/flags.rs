//! Protection and mapping flags.
//!
//! Both types keep the Linux bit encodings so raw syscall arguments convert directly.
//! Unknown bits are dropped on conversion.

use core::fmt;

/// Page protection requested by `mmap` or `mprotect`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Protection(u32);

impl Protection {
    /// `PROT_READ`.
    pub const READ: u32 = 0x1;

    /// `PROT_WRITE`.
    pub const WRITE: u32 = 0x2;

    /// `PROT_EXEC`.
    pub const EXEC: u32 = 0x4;

    const ALL: u32 = Self::READ | Self::WRITE | Self::EXEC;

    /// No access (`PROT_NONE`).
    pub const fn none() -> Self {
        Self(0)
    }

    /// Read and write access.
    pub const fn read_write() -> Self {
        Self(Self::READ | Self::WRITE)
    }

    /// Creates a protection from the raw syscall argument.
    pub const fn from_raw(raw: u64) -> Self {
        Self((raw as u32) & Self::ALL)
    }

    /// Returns the raw bit value.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    pub const fn is_readable(self) -> bool {
        (self.0 & Self::READ) != 0
    }

    pub const fn is_writable(self) -> bool {
        (self.0 & Self::WRITE) != 0
    }

    pub const fn is_executable(self) -> bool {
        (self.0 & Self::EXEC) != 0
    }
}

impl fmt::Debug for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Protection({self})")
    }
}

/// Formats as `rwx`, with `-` for each missing permission.
impl fmt::Display for Protection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let r = if self.is_readable() { 'r' } else { '-' };
        let w = if self.is_writable() { 'w' } else { '-' };
        let x = if self.is_executable() { 'x' } else { '-' };
        write!(f, "{r}{w}{x}")
    }
}

/// Flags passed to `mmap`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MapFlags(u32);

impl MapFlags {
    /// `MAP_SHARED`.
    pub const SHARED: u32 = 0x01;

    /// `MAP_PRIVATE`.
    pub const PRIVATE: u32 = 0x02;

    /// `MAP_FIXED`: place the mapping exactly at the requested address, replacing
    /// whatever is mapped there.
    pub const FIXED: u32 = 0x10;

    /// `MAP_ANONYMOUS`.
    pub const ANONYMOUS: u32 = 0x20;

    /// `MAP_32BIT`: restrict the mapping to the low 2 GiB. Not supported.
    pub const MAP_32BIT: u32 = 0x40;

    const ALL: u32 =
        Self::SHARED | Self::PRIVATE | Self::FIXED | Self::ANONYMOUS | Self::MAP_32BIT;

    /// Creates empty flags.
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Creates flags from raw bits, dropping unknown ones.
    pub const fn from_raw(raw: u64) -> Self {
        Self((raw as u32) & Self::ALL)
    }

    /// Returns the raw bit value.
    pub const fn to_raw(self) -> u32 {
        self.0
    }

    /// Returns these flags with `bits` added.
    pub const fn with(self, bits: u32) -> Self {
        Self((self.0 | bits) & Self::ALL)
    }

    /// Returns these flags with `bits` removed.
    pub const fn without(self, bits: u32) -> Self {
        Self(self.0 & !bits)
    }

    /// Returns true if every bit in `bits` is set.
    pub const fn contains(self, bits: u32) -> bool {
        (self.0 & bits) == bits
    }

    pub const fn is_shared(self) -> bool {
        self.contains(Self::SHARED)
    }

    pub const fn is_fixed(self) -> bool {
        self.contains(Self::FIXED)
    }

    pub const fn is_anonymous(self) -> bool {
        self.contains(Self::ANONYMOUS)
    }
}

impl fmt::Debug for MapFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MapFlags({self})")
    }
}

/// Formats as a `|`-separated list of flag names.
impl fmt::Display for MapFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u32, &str); 5] = [
            (MapFlags::SHARED, "shared"),
            (MapFlags::PRIVATE, "private"),
            (MapFlags::FIXED, "fixed"),
            (MapFlags::ANONYMOUS, "anonymous"),
            (MapFlags::MAP_32BIT, "32bit"),
        ];

        let mut first = true;
        for (bit, name) in NAMES {
            if self.contains(bit) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }

        if first {
            f.write_str("none")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protection_from_raw_drops_unknown_bits() {
        let prot = Protection::from_raw(0x1 | 0x4 | 0x100);
        assert!(prot.is_readable());
        assert!(!prot.is_writable());
        assert!(prot.is_executable());
        assert_eq!(prot.to_raw(), 0x5);
        assert_eq!(format!("{prot}"), "r-x");
    }

    #[test]
    fn map_flags_queries() {
        let flags = MapFlags::from_raw(0x22);
        assert!(flags.is_anonymous());
        assert!(!flags.is_fixed());
        assert!(!flags.is_shared());
        assert_eq!(format!("{flags}"), "private|anonymous");

        let fixed = flags.with(MapFlags::FIXED).without(MapFlags::ANONYMOUS);
        assert_eq!(format!("{fixed}"), "private|fixed");
        assert_eq!(format!("{}", MapFlags::empty()), "none");
    }
}
