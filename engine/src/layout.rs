//! On-disk layout of an inode and the arithmetic of its three pointer tiers.
//!
//! An inode occupies exactly one sector:
//!
//! ```text
//! offset   0 ..   4    length in bytes (u32, little-endian)
//! offset   4 ..   8    magic tag 0x494e4f44
//! offset   8 .. 500    direct[123]         data blocks 0 through 122
//! offset 500 .. 508    single_indirect[2]  two index blocks of 128 entries
//! offset 508 .. 512    double_indirect     an index block of index blocks
//! ```
//!
//! Data block `i` of a file sits in the direct array for `i < 123`, in one of
//! the two single-indirect index blocks for `123 <= i < 379`, and behind two
//! levels of indirection up to block 16762. An index block is an ordinary
//! data sector holding 128 sector numbers as 4-byte little-endian values;
//! entries are read and written one at a time through the cache, never by
//! reinterpreting a whole sector as an integer array.
//!
//! The codec here is deliberately hand-rolled rather than derived: the
//! pointer arrays are larger than what the serde derives cover, and the
//! field offsets are part of the on-disk format, so they are spelled out.

use crate::error::{FsError, FsResult};
use slatefs_api::types::{SectorData, SectorId, SECTOR_SIZE};

/// Number of data blocks addressed directly from the inode sector.
pub const DIRECT_COUNT: usize = 123;
/// Number of single-indirect index blocks per inode.
pub const SINGLE_INDIRECT_COUNT: usize = 2;
/// Number of sector pointers one index block holds.
pub const POINTERS_PER_SECTOR: usize = SECTOR_SIZE / 4;
/// Total data blocks an inode can address:
/// 123 direct, 2 * 128 single-indirect, 128 * 128 double-indirect.
pub const MAX_DATA_BLOCKS: u64 = (DIRECT_COUNT
    + SINGLE_INDIRECT_COUNT * POINTERS_PER_SECTOR
    + POINTERS_PER_SECTOR * POINTERS_PER_SECTOR) as u64;
/// Largest representable file length, in bytes.
pub const MAX_FILE_SIZE: u64 = MAX_DATA_BLOCKS * SECTOR_SIZE as u64;

/// Tag stored in every sector that holds an inode.
pub const INODE_MAGIC: u32 = 0x494e_4f44;

//First data-block index of each tier.
const SINGLE_START: u64 = DIRECT_COUNT as u64;
const SINGLE_SECOND_START: u64 = SINGLE_START + POINTERS_PER_SECTOR as u64;
const DOUBLE_START: u64 = SINGLE_SECOND_START + POINTERS_PER_SECTOR as u64;

//Byte offsets of the inode fields within their sector.
const OFF_LENGTH: usize = 0;
const OFF_MAGIC: usize = 4;
const OFF_DIRECT: usize = 8;
const OFF_SINGLE: usize = OFF_DIRECT + 4 * DIRECT_COUNT;
const OFF_DOUBLE: usize = OFF_SINGLE + 4 * SINGLE_INDIRECT_COUNT;

/// Where data block `index` of a file is recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockPos {
    /// `direct[slot]` of the inode itself
    Direct(usize),
    /// An entry of one of the two single-indirect index blocks
    Single {
        /// Which single-indirect block, 0 or 1
        which: usize,
        /// Entry within that index block
        slot: usize,
    },
    /// An entry of a second-level index block hanging off the
    /// double-indirect block
    Double {
        /// Entry within the double-indirect index block
        outer: usize,
        /// Entry within the second-level index block it points at
        inner: usize,
    },
}

/// The pointer slot recording data block `index`.
///
/// # Panics
/// When `index` is past the last addressable data block. Callers bound
/// their indexes with a file length first; see
/// [`top_block_index`](fn.top_block_index.html).
pub fn locate(index: u64) -> BlockPos {
    if index < SINGLE_START {
        BlockPos::Direct(index as usize)
    } else if index < SINGLE_SECOND_START {
        BlockPos::Single {
            which: 0,
            slot: (index - SINGLE_START) as usize,
        }
    } else if index < DOUBLE_START {
        BlockPos::Single {
            which: 1,
            slot: (index - SINGLE_SECOND_START) as usize,
        }
    } else if index < MAX_DATA_BLOCKS {
        let off = index - DOUBLE_START;
        BlockPos::Double {
            outer: (off / POINTERS_PER_SECTOR as u64) as usize,
            inner: (off % POINTERS_PER_SECTOR as u64) as usize,
        }
    } else {
        panic!("data block index {} past the addressable range", index)
    }
}

/// Highest data-block index a file of `length` bytes keeps allocated.
///
/// This is `length / SECTOR_SIZE`, not `(length - 1) / SECTOR_SIZE`: a file
/// whose length lands exactly on a sector boundary keeps one block past its
/// last byte, and a zero-length file keeps block 0. Growth leans on the
/// invariant that blocks `0..=top_block_index(length)` always exist, and
/// starts allocating at the index after. The result clamps at the very top
/// of the addressable range so a file of exactly
/// [`MAX_FILE_SIZE`](constant.MAX_FILE_SIZE.html) bytes stays in bounds.
pub fn top_block_index(length: u64) -> u64 {
    (length / SECTOR_SIZE as u64).min(MAX_DATA_BLOCKS - 1)
}

/// In-memory copy of an inode's pointer table.
///
/// A slot is meaningful only when the committed length puts its data block
/// in range; anything past that is stale and never read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockMap {
    /// Sectors of the first 123 data blocks
    pub direct: [SectorId; DIRECT_COUNT],
    /// Sectors of the two single-indirect index blocks
    pub single_indirect: [SectorId; SINGLE_INDIRECT_COUNT],
    /// Sector of the double-indirect index block
    pub double_indirect: SectorId,
}

impl BlockMap {
    /// A pointer table with every slot zeroed, as a fresh inode starts out.
    pub fn empty() -> BlockMap {
        BlockMap {
            direct: [SectorId(0); DIRECT_COUNT],
            single_indirect: [SectorId(0); SINGLE_INDIRECT_COUNT],
            double_indirect: SectorId(0),
        }
    }
}

/// One inode as it sits on disk: the committed length plus the pointer
/// table, filling its sector exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DiskInode {
    /// Committed file length in bytes
    pub length: u32,
    /// The three-tier pointer table
    pub map: BlockMap,
}

impl DiskInode {
    /// Encode into a full sector, magic included.
    pub fn to_sector(&self) -> SectorData {
        let mut buf = [0_u8; SECTOR_SIZE];
        buf[OFF_LENGTH..OFF_LENGTH + 4].copy_from_slice(&self.length.to_le_bytes());
        buf[OFF_MAGIC..OFF_MAGIC + 4].copy_from_slice(&INODE_MAGIC.to_le_bytes());
        for (i, s) in self.map.direct.iter().enumerate() {
            let off = OFF_DIRECT + 4 * i;
            buf[off..off + 4].copy_from_slice(&s.0.to_le_bytes());
        }
        for (i, s) in self.map.single_indirect.iter().enumerate() {
            let off = OFF_SINGLE + 4 * i;
            buf[off..off + 4].copy_from_slice(&s.0.to_le_bytes());
        }
        buf[OFF_DOUBLE..OFF_DOUBLE + 4]
            .copy_from_slice(&self.map.double_indirect.0.to_le_bytes());
        buf
    }

    /// Decode from a sector read off a device; refuses sectors without the
    /// magic tag. `sector` only labels the error.
    pub fn from_sector(sector: SectorId, buf: &SectorData) -> FsResult<DiskInode> {
        if read_u32(buf, OFF_MAGIC) != INODE_MAGIC {
            return Err(FsError::BadMagic(sector));
        }
        let mut map = BlockMap::empty();
        for (i, slot) in map.direct.iter_mut().enumerate() {
            *slot = SectorId(read_u32(buf, OFF_DIRECT + 4 * i));
        }
        for (i, slot) in map.single_indirect.iter_mut().enumerate() {
            *slot = SectorId(read_u32(buf, OFF_SINGLE + 4 * i));
        }
        map.double_indirect = SectorId(read_u32(buf, OFF_DOUBLE));
        Ok(DiskInode {
            length: read_u32(buf, OFF_LENGTH),
            map,
        })
    }
}

fn read_u32(buf: &[u8], off: usize) -> u32 {
    let mut raw = [0_u8; 4];
    raw.copy_from_slice(&buf[off..off + 4]);
    u32::from_le_bytes(raw)
}

#[cfg(test)]
#[path = "../fs-tests/layout_test.rs"]
mod tests;
