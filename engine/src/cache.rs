//! The sector cache: 64 fixed slots sitting between every caller and the
//! attached devices.
//!
//! All engine I/O funnels through here. A slot holds one sector's bytes
//! together with its `(device, sector)` identity and two flags: `valid` (the
//! slot is live) and `dirty` (the bytes differ from the device). Replacement
//! is strict LRU over a recency list, and eviction writes a dirty victim
//! back before the slot is reused; nothing is written through on the spot.
//! One lock serializes every operation, device transfers included, so a slow
//! device stalls all cache traffic. That is inherited from the system this
//! engine grew out of and kept on purpose.
//!
//! Two invariants carry the module:
//! - at most one valid slot exists for any `(device, sector)` pair;
//! - valid slots sort strictly before invalid ones in the recency list, so
//!   a lookup can stop at the first invalid slot it meets.
//!
//! The cache owns the device table. Attach a device once, then address it by
//! the returned [`DeviceId`] ever after.

use crate::error::{CacheError, CacheResult};
use crate::locked;
use log::{debug, warn};
use slatefs_api::dev::SectorDevice;
use slatefs_api::types::{DeviceId, SectorData, SectorId, SECTOR_SIZE};
use std::sync::{Arc, Mutex};

/// Number of slots in every cache.
pub const SLOT_COUNT: usize = 64;

/// Hit counters; see [`SectorCache::stats`](struct.SectorCache.html#method.stats).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Reads and writes served since the counters were last reset
    pub accesses: u64,
    /// How many of those never touched a device
    pub hits: u64,
}

//One slot. The bytes live inline; 64 slots make a fixed 32 KiB pool that
//never reallocates.
struct Slot {
    content: SectorData,
    valid: bool,
    dirty: bool,
    dev: DeviceId,
    sector: SectorId,
}

impl Slot {
    fn empty() -> Slot {
        Slot {
            content: [0; SECTOR_SIZE],
            valid: false,
            dirty: false,
            dev: DeviceId(0),
            sector: SectorId(0),
        }
    }
}

//What to do with a missed slot once the victim is clean.
enum Fill {
    //Fetch the sector from the device
    Fetch,
    //The caller is about to overwrite all of it; skip the device read
    Overwrite,
}

struct CacheInner {
    //Slot storage; indexes into this are stable for the cache's lifetime
    slots: Vec<Slot>,
    //Recency list of slot indexes, most recent first. Every slot appears
    //exactly once, invalid slots trailing the valid ones.
    recency: Vec<usize>,
    devices: Vec<Arc<dyn SectorDevice>>,
    stats: CacheStats,
}

impl CacheInner {
    //Index of the slot caching (dev, sector), scanning in recency order.
    //Invalid slots trail the valid ones, so the scan stops at the first one
    //it meets.
    fn find(&self, dev: DeviceId, sector: SectorId) -> Option<usize> {
        for &idx in &self.recency {
            let slot = &self.slots[idx];
            if !slot.valid {
                return None;
            }
            if slot.dev == dev && slot.sector == sector {
                return Some(idx);
            }
        }
        None
    }

    //The slot a miss will fill: the first invalid slot if one exists,
    //otherwise the least recently used one.
    fn victim(&self) -> usize {
        for &idx in &self.recency {
            if !self.slots[idx].valid {
                return idx;
            }
        }
        self.recency[self.recency.len() - 1]
    }

    //Move a slot to the most-recent end of the recency list.
    fn touch(&mut self, idx: usize) {
        self.recency.retain(|&i| i != idx);
        self.recency.insert(0, idx);
    }

    //Write a dirty slot's bytes back to its device and mark it clean.
    fn write_back(&mut self, idx: usize) -> CacheResult<()> {
        let slot = &mut self.slots[idx];
        let dev = self
            .devices
            .get(slot.dev.0 as usize)
            .ok_or(CacheError::UnknownDevice(slot.dev))?;
        dev.write_sector(slot.sector, &slot.content)?;
        slot.dirty = false;
        Ok(())
    }

    //Hit-or-fill: the slot index holding (dev, sector) afterwards, with the
    //access counted and the slot moved to the front of the recency list. A
    //miss takes the victim slot, writes it back first when dirty, then
    //fills it per `fill`. Failed device transfers leave the victim invalid
    //at its old position, which keeps both invariants intact.
    fn lookup(&mut self, dev: DeviceId, sector: SectorId, fill: Fill) -> CacheResult<usize> {
        if self.devices.get(dev.0 as usize).is_none() {
            return Err(CacheError::UnknownDevice(dev));
        }
        self.stats.accesses += 1;
        if let Some(idx) = self.find(dev, sector) {
            self.stats.hits += 1;
            self.touch(idx);
            return Ok(idx);
        }

        let idx = self.victim();
        if self.slots[idx].valid && self.slots[idx].dirty {
            debug!(
                "evicting dirty sector {} of {}",
                self.slots[idx].sector, self.slots[idx].dev
            );
            self.write_back(idx)?;
        }
        //The old identity is dead from here on
        self.slots[idx].valid = false;
        self.slots[idx].dirty = false;

        if let Fill::Fetch = fill {
            let device = &self.devices[dev.0 as usize];
            device.read_sector(sector, &mut self.slots[idx].content)?;
        }
        let slot = &mut self.slots[idx];
        slot.dev = dev;
        slot.sector = sector;
        slot.valid = true;
        self.touch(idx);
        Ok(idx)
    }

    fn flush_all(&mut self) -> CacheResult<()> {
        let mut flushed = 0_u32;
        for idx in 0..self.slots.len() {
            if self.slots[idx].valid && self.slots[idx].dirty {
                self.write_back(idx)?;
                flushed += 1;
            }
        }
        if flushed > 0 {
            debug!("flushed {} dirty sectors", flushed);
        }
        Ok(())
    }
}

/// The cache itself: construct once, [`attach`](#method.attach) the devices,
/// then share it behind an `Arc`.
pub struct SectorCache {
    inner: Mutex<CacheInner>,
}

impl SectorCache {
    /// A cache with all 64 slots free and no devices attached.
    pub fn new() -> SectorCache {
        SectorCache {
            inner: Mutex::new(CacheInner {
                slots: (0..SLOT_COUNT).map(|_| Slot::empty()).collect(),
                recency: (0..SLOT_COUNT).collect(),
                devices: Vec::new(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Register a device; every later call names it by the returned id.
    /// Devices stay attached for the life of the cache.
    pub fn attach(&self, dev: Arc<dyn SectorDevice>) -> DeviceId {
        let mut inner = locked(&self.inner);
        inner.devices.push(dev);
        DeviceId(inner.devices.len() as u32 - 1)
    }

    /// Copy `buf.len()` bytes out of sector `sector` of device `dev` into
    /// `buf`, starting `offset` bytes into the sector.
    ///
    /// A hit copies straight out of the slot; a miss first fetches the full
    /// sector from the device, evicting the least recently used slot when no
    /// free one remains. An empty `buf` does nothing and counts nothing.
    pub fn read(
        &self,
        dev: DeviceId,
        sector: SectorId,
        buf: &mut [u8],
        offset: usize,
    ) -> CacheResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        check_span(buf.len(), offset)?;
        let mut inner = locked(&self.inner);
        let idx = inner.lookup(dev, sector, Fill::Fetch)?;
        buf.copy_from_slice(&inner.slots[idx].content[offset..offset + buf.len()]);
        Ok(())
    }

    /// Copy `buf` into sector `sector` of device `dev` at `offset`, marking
    /// the slot dirty; the device sees the bytes at eviction or flush time.
    ///
    /// A missed partial write fetches the sector first so the untouched
    /// bytes survive; a write covering the whole sector skips that read.
    pub fn write(
        &self,
        dev: DeviceId,
        sector: SectorId,
        buf: &[u8],
        offset: usize,
    ) -> CacheResult<()> {
        if buf.is_empty() {
            return Ok(());
        }
        check_span(buf.len(), offset)?;
        let fill = if buf.len() == SECTOR_SIZE {
            Fill::Overwrite
        } else {
            Fill::Fetch
        };
        let mut inner = locked(&self.inner);
        let idx = inner.lookup(dev, sector, fill)?;
        let slot = &mut inner.slots[idx];
        slot.content[offset..offset + buf.len()].copy_from_slice(buf);
        slot.dirty = true;
        Ok(())
    }

    /// Write every dirty slot back to its device. Contents, identities and
    /// recency all stay put; only the dirty flags clear.
    pub fn flush_all(&self) -> CacheResult<()> {
        let mut inner = locked(&self.inner);
        inner.flush_all()
    }

    /// Flush, then invalidate every slot, forcing later accesses to miss.
    pub fn reset(&self) -> CacheResult<()> {
        let mut inner = locked(&self.inner);
        inner.flush_all()?;
        for slot in inner.slots.iter_mut() {
            slot.valid = false;
            slot.dirty = false;
        }
        debug!("cache reset");
        Ok(())
    }

    /// Current hit counters. Reading them also resets both to zero, so two
    /// calls bracket a workload.
    pub fn stats(&self) -> CacheStats {
        let mut inner = locked(&self.inner);
        std::mem::take(&mut inner.stats)
    }
}

impl Drop for SectorCache {
    //Dirty bytes must not die with the cache; a destructor can only log.
    fn drop(&mut self) {
        if let Err(e) = locked(&self.inner).flush_all() {
            warn!("flush on drop failed: {}", e);
        }
    }
}

//Reject byte ranges that spill out of a sector.
fn check_span(len: usize, offset: usize) -> CacheResult<()> {
    if len > SECTOR_SIZE || offset > SECTOR_SIZE - len {
        return Err(CacheError::Bounds(
            "byte range does not fit inside one sector",
        ));
    }
    Ok(())
}

#[cfg(test)]
#[path = "../fs-tests/cache_test.rs"]
mod tests;
