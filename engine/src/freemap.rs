//! Bitmap implementation of the free-space service.
//!
//! [`BitmapFreeMap`] manages a caller-chosen run of sectors `[start,
//! start + count)` with one bit per sector. Allocation is first-fit over
//! runs of consecutive free sectors. Nothing here touches a device; claimed
//! sectors are zero-filled by whoever claims them. The bitmap sits behind
//! its own lock so files growing concurrently can allocate safely.

use crate::locked;
use bit_field::BitField;
use log::trace;
use slatefs_api::dev::{AllocError, FreeMap};
use slatefs_api::types::SectorId;
use std::sync::Mutex;

/// First-fit bitmap allocator over a contiguous sector region.
#[derive(Debug)]
pub struct BitmapFreeMap {
    start: u32,
    count: u32,
    //One bit per sector, 1 = allocated
    bits: Mutex<Vec<u8>>,
}

impl BitmapFreeMap {
    /// A map over `count` sectors starting at `start`, all of them free.
    pub fn new(start: SectorId, count: u32) -> BitmapFreeMap {
        BitmapFreeMap {
            start: start.0,
            count,
            bits: Mutex::new(vec![0_u8; (count as usize + 7) / 8]),
        }
    }

    /// Number of currently free sectors.
    pub fn free_sectors(&self) -> u32 {
        let bits = locked(&self.bits);
        let mut free = 0;
        for i in 0..self.count as usize {
            if !get_bit(&bits, i) {
                free += 1;
            }
        }
        free
    }

    /// Total number of managed sectors.
    pub fn capacity(&self) -> u32 {
        self.count
    }
}

fn get_bit(bits: &[u8], i: usize) -> bool {
    bits[i / 8].get_bit(i % 8)
}

fn set_bit(bits: &mut [u8], i: usize, v: bool) {
    bits[i / 8].set_bit(i % 8, v);
}

impl FreeMap for BitmapFreeMap {
    fn allocate(&self, count: u64) -> Result<SectorId, AllocError> {
        if count == 0 || count > self.count as u64 {
            return Err(AllocError::Exhausted(count));
        }
        let want = count as usize;
        let total = self.count as usize;
        let mut bits = locked(&self.bits);
        let mut run = 0_usize;
        let mut i = 0_usize;
        while i < total {
            //Fully allocated bytes cannot start or continue a run
            if run == 0 && i % 8 == 0 && i + 8 <= total && bits[i / 8] == u8::MAX {
                i += 8;
                continue;
            }
            if get_bit(&bits, i) {
                run = 0;
            } else {
                run += 1;
                if run == want {
                    let first = i + 1 - want;
                    for j in first..=i {
                        set_bit(&mut bits, j, true);
                    }
                    let sector = SectorId(self.start + first as u32);
                    trace!("allocated {} sectors at {}", count, sector);
                    return Ok(sector);
                }
            }
            i += 1;
        }
        Err(AllocError::Exhausted(count))
    }

    fn release(&self, start: SectorId, count: u64) -> Result<(), AllocError> {
        if start.0 < self.start || (start.0 - self.start) as u64 + count > self.count as u64 {
            return Err(AllocError::OutOfRange(
                "released run does not lie inside the managed region",
            ));
        }
        let first = (start.0 - self.start) as usize;
        let mut bits = locked(&self.bits);
        //Refuse the whole release before clearing anything
        for j in first..first + count as usize {
            if !get_bit(&bits, j) {
                return Err(AllocError::FreeingFree(SectorId(self.start + j as u32)));
            }
        }
        for j in first..first + count as usize {
            set_bit(&mut bits, j, false);
        }
        trace!("released {} sectors at {}", count, start);
        Ok(())
    }
}

#[cfg(test)]
#[path = "../fs-tests/freemap_test.rs"]
mod tests;
