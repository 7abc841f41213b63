//! Contracts of the two collaborator services the storage engine consumes.
//!
//! The engine never addresses hardware or free-space bookkeeping directly:
//! all sector I/O goes through [`SectorDevice`] and all sector ownership goes
//! through [`FreeMap`]. The concrete implementations live in
//! [`controller.rs`](../controller/index.html) (devices) and in the engine
//! crate (the bitmap allocator); tests substitute their own.

use crate::error::Result;
use crate::types::{SectorData, SectorId};
use thiserror::Error;

/// A device that reads and writes whole sectors.
///
/// Implementations must be shareable across threads. The sector cache
/// serializes all of its calls through its own global lock, so a device
/// attached to one cache sees at most one call at a time from it, but the
/// device itself must not rely on that: nothing stops a test from talking to
/// a device directly while a cache holds it too.
///
/// A sector index past the end of the device is reported as
/// [`DiskError::OutOfRange`](../error/enum.DiskError.html), never a panic:
/// the layers above turn it into their own typed errors.
pub trait SectorDevice: Send + Sync {
    /// Read sector `sector` in full into `buf`.
    fn read_sector(&self, sector: SectorId, buf: &mut SectorData) -> Result<()>;

    /// Write `buf` in full to sector `sector`.
    fn write_sector(&self, sector: SectorId, buf: &SectorData) -> Result<()>;

    /// Total number of sectors on this device.
    fn sector_count(&self) -> u64;
}

/// Errors reported by a free-space allocator.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// No run of the requested number of consecutive free sectors exists
    #[error("free space exhausted: no run of {0} consecutive free sectors")]
    Exhausted(u64),
    /// A request touched sectors outside the allocator's managed region
    #[error("sector range outside the allocator's region: {0}")]
    OutOfRange(&'static str),
    /// A release named a sector that is not currently allocated
    #[error("releasing sector {0}, which is already free")]
    FreeingFree(SectorId),
}

/// Free-space bookkeeping over a region of one device.
///
/// `allocate` hands out runs of consecutive free sectors and `release`
/// returns them. The allocator never touches the device itself: zero-filling
/// and writing freshly claimed sectors is the caller's business, and a
/// released sector keeps its stale bytes until someone reuses it.
///
/// Implementations must be safe to call from several threads at once — two
/// files being grown concurrently allocate through the same map, and the
/// whole point of the map is that they can never be handed the same sector.
pub trait FreeMap: Send + Sync {
    /// Claim `count` consecutive free sectors, returning the first one.
    fn allocate(&self, count: u64) -> std::result::Result<SectorId, AllocError>;

    /// Return the `count` consecutive sectors starting at `start`.
    fn release(&self, start: SectorId, count: u64) -> std::result::Result<(), AllocError>;
}
