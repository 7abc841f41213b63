//! Module containing the core types used throughout this project.
//! Everything the devices, the sector cache and the inode store exchange is
//! expressed in terms of these definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Size of one device sector, in bytes.
/// Every device attached to the engine reads and writes in units of this
/// size, and the on-disk inode format is laid out to fill exactly one sector.
pub const SECTOR_SIZE: usize = 512;

/// One sector's worth of bytes.
/// The reason for a fixed-size array rather than a growable buffer is that
/// sector buffers never change size while in use; the cache in particular
/// owns 64 of these for the whole life of the process.
pub type SectorData = [u8; SECTOR_SIZE];

/// A typed sector number.
///
/// Sector numbers live in three different places in this system — in memory,
/// inside index blocks, and inside directory records — so they get a
/// dedicated type instead of a bare integer, making it impossible to confuse
/// a sector number with a length or a slot index. On disk a `SectorId` is
/// always a 4-byte little-endian value; the serde derive produces exactly
/// that under bincode's default fixed-width integer encoding.
#[derive(
    Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash,
)]
pub struct SectorId(pub u32);

impl SectorId {
    /// Byte offset of the start of this sector on its device.
    pub fn byte_offset(self) -> u64 {
        self.0 as u64 * SECTOR_SIZE as u64
    }

    /// The sector `n` places further along the device.
    /// Allocators hand out runs of consecutive sectors, so walking a run
    /// comes up in several places.
    pub fn plus(self, n: u32) -> SectorId {
        SectorId(self.0 + n)
    }
}

impl fmt::Display for SectorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for SectorId {
    fn from(n: u32) -> SectorId {
        SectorId(n)
    }
}

/// Identity of a device attached to a sector cache.
/// Assigned by the cache at attach time and only meaningful to the cache
/// that issued it; the cache keys its slots on `(DeviceId, SectorId)` pairs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceId(pub u32);

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "dev{}", self.0)
    }
}
