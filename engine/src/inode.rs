//! The inode store: indexed files over the sector cache.
//!
//! An [`InodeStore`] hands out shared handles to open inodes and runs every
//! file operation against them. The pieces it builds on are passed in
//! explicitly: the cache all I/O goes through, the id of the device holding
//! the inodes, and the free-space service sectors come from.
//!
//! Three rules shape the code here:
//!
//! - **Registry identity.** At most one [`Inode`] object exists per sector;
//!   opening an already-open sector bumps a reference count on the existing
//!   object. Removal is deferred: a removed inode gives its sectors back
//!   only when the last handle closes.
//! - **Two-phase growth.** A write past the end first allocates and
//!   zero-fills every missing block and persists the new pointers, all while
//!   the committed length still reads as the old one. Only after the payload
//!   bytes are in the cache does the length move, so a concurrent reader
//!   never sees bytes that are not fully written. Growth is measured against
//!   the highest block allocated so far rather than the committed length, so
//!   racing growers never claim the same block twice.
//! - **Split locks.** The pointer table and the committed length sit behind
//!   separate locks. An extension holds the table lock for its whole
//!   allocation walk; readers of the length take only the length lock and
//!   never wait behind it. When both are needed the table lock comes first.
//!
//! Failed growth rolls back completely: every sector the failed call
//! claimed returns to the free map and the pointer table reverts, so a
//! half-grown file is never observable.

use crate::cache::SectorCache;
use crate::error::{FsError, FsResult};
use crate::layout::{
    locate, top_block_index, BlockMap, BlockPos, DiskInode, MAX_FILE_SIZE, SINGLE_INDIRECT_COUNT,
};
use crate::locked;
use log::{debug, warn};
use slatefs_api::dev::FreeMap;
use slatefs_api::types::{DeviceId, SectorId, SECTOR_SIZE};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Shared handle to an open inode. Every handle returned by
/// [`InodeStore::open`](struct.InodeStore.html#method.open) or
/// [`InodeStore::reopen`](struct.InodeStore.html#method.reopen) owes the
/// store exactly one `close`.
pub type InodeHandle = Arc<Inode>;

//Reference state of one open inode, all three counters behind one lock.
#[derive(Debug, Default)]
struct RefState {
    open_count: u32,
    removed: bool,
    deny_write_count: u32,
}

//The pointer table plus the highest data block index actually allocated.
//The allocated top can run ahead of the committed length's top block while
//a write is between its growth and its commit; it is never behind it.
#[derive(Debug, Clone, Copy)]
struct MapState {
    map: BlockMap,
    top: u64,
}

/// One open inode.
///
/// All interesting state is interior; the store mutates inodes through
/// shared references, which is what lets handles be plain `Arc`s.
#[derive(Debug)]
pub struct Inode {
    sector: SectorId,
    refs: Mutex<RefState>,
    //The extension lock. Held across a whole allocation walk, so at most
    //one extension of this inode runs at a time.
    map: Mutex<MapState>,
    //The length lock, guarding only the committed length.
    len: Mutex<u64>,
}

impl Inode {
    /// The sector this inode lives at.
    pub fn sector(&self) -> SectorId {
        self.sector
    }
}

/// The store every inode operation goes through.
pub struct InodeStore {
    cache: Arc<SectorCache>,
    dev: DeviceId,
    freemap: Arc<dyn FreeMap>,
    //Registry of open inodes. Open and the terminal close both hold this
    //lock while they adjust open counts, so "last closer" is decided
    //exactly once.
    open: Mutex<HashMap<SectorId, InodeHandle>>,
}

impl InodeStore {
    /// A store over device `dev`, which must already be attached to
    /// `cache`, allocating from `freemap`.
    pub fn new(cache: Arc<SectorCache>, dev: DeviceId, freemap: Arc<dyn FreeMap>) -> InodeStore {
        InodeStore {
            cache,
            dev,
            freemap,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Number of distinct inodes currently open.
    pub fn open_inodes(&self) -> usize {
        locked(&self.open).len()
    }

    //Read one entry of the index block at `block`.
    fn read_entry(&self, block: SectorId, slot: usize) -> FsResult<SectorId> {
        let mut raw = [0_u8; 4];
        self.cache.read(self.dev, block, &mut raw, slot * 4)?;
        Ok(SectorId(u32::from_le_bytes(raw)))
    }

    //Write one entry of the index block at `block`.
    fn write_entry(&self, block: SectorId, slot: usize, value: SectorId) -> FsResult<()> {
        self.cache
            .write(self.dev, block, &value.0.to_le_bytes(), slot * 4)?;
        Ok(())
    }

    //Zero-fill a freshly claimed sector, so stale device bytes can never
    //surface as file content or index entries.
    fn zero_sector(&self, sector: SectorId) -> FsResult<()> {
        self.cache.write(self.dev, sector, &[0_u8; SECTOR_SIZE], 0)?;
        Ok(())
    }

    //Write the inode sector from a pointer table and a committed length.
    fn write_inode(&self, sector: SectorId, map: &BlockMap, length: u64) -> FsResult<()> {
        let node = DiskInode {
            length: length as u32,
            map: *map,
        };
        self.cache.write(self.dev, sector, &node.to_sector(), 0)?;
        Ok(())
    }

    //Claim one sector, remembering it in `taken` for rollback.
    fn claim(&self, taken: &mut Vec<SectorId>) -> FsResult<SectorId> {
        let sector = self.freemap.allocate(1)?;
        taken.push(sector);
        Ok(sector)
    }

    //Put every sector a failed growth claimed back on the free map.
    fn unclaim_all(&self, taken: &[SectorId]) {
        for &sector in taken {
            if let Err(e) = self.freemap.release(sector, 1) {
                warn!("rollback failed to release sector {}: {}", sector, e);
            }
        }
    }

    //Allocate the index blocks `pos` depends on. Data blocks are visited in
    //increasing order and each index exactly once over an inode's life, so
    //landing on the first entry of an index block is precisely the moment
    //that block does not exist yet.
    fn ensure_index_blocks(
        &self,
        map: &mut BlockMap,
        pos: BlockPos,
        taken: &mut Vec<SectorId>,
    ) -> FsResult<()> {
        match pos {
            BlockPos::Direct(_) => {}
            BlockPos::Single { which, slot } => {
                if slot == 0 {
                    let block = self.claim(taken)?;
                    self.zero_sector(block)?;
                    map.single_indirect[which] = block;
                }
            }
            BlockPos::Double { outer, inner } => {
                if outer == 0 && inner == 0 {
                    let block = self.claim(taken)?;
                    self.zero_sector(block)?;
                    map.double_indirect = block;
                }
                if inner == 0 {
                    let second = self.claim(taken)?;
                    self.zero_sector(second)?;
                    self.write_entry(map.double_indirect, outer, second)?;
                }
            }
        }
        Ok(())
    }

    //Grow the pointer table so data blocks `after + 1 ..= new_top` exist,
    //zero-filled, with index blocks claimed as tier boundaries are crossed.
    //`after` of None means nothing is allocated yet and growth starts at
    //block 0. Every claimed sector lands in `taken`.
    fn grow_map(
        &self,
        map: &mut BlockMap,
        after: Option<u64>,
        new_top: u64,
        taken: &mut Vec<SectorId>,
    ) -> FsResult<()> {
        let first = match after {
            Some(i) => i + 1,
            None => 0,
        };
        for index in first..=new_top {
            let pos = locate(index);
            self.ensure_index_blocks(map, pos, taken)?;
            let data = self.claim(taken)?;
            self.zero_sector(data)?;
            match pos {
                BlockPos::Direct(slot) => map.direct[slot] = data,
                BlockPos::Single { which, slot } => {
                    self.write_entry(map.single_indirect[which], slot, data)?;
                }
                BlockPos::Double { outer, inner } => {
                    let second = self.read_entry(map.double_indirect, outer)?;
                    self.write_entry(second, inner, data)?;
                }
            }
        }
        Ok(())
    }

    //Undo a failed growth: pointer table and allocated top back to their
    //snapshot, claimed sectors back on the map.
    fn rollback(&self, state: &mut MapState, snapshot: MapState, taken: &[SectorId]) {
        *state = snapshot;
        self.unclaim_all(taken);
    }

    /// Lay down a fresh inode of `length` bytes at `sector`, allocating and
    /// zero-filling every data block it needs. A zero-length file still gets
    /// data block 0, which is what lets growth always start one past the
    /// top. The caller owns `sector` itself; this call only writes it.
    ///
    /// On failure nothing is written to `sector` and every sector this call
    /// claimed is released again.
    pub fn create(&self, sector: SectorId, length: u64) -> FsResult<()> {
        if length > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        let mut map = BlockMap::empty();
        let mut taken = Vec::new();
        let top = top_block_index(length);
        if let Err(e) = self.grow_map(&mut map, None, top, &mut taken) {
            self.unclaim_all(&taken);
            return Err(e);
        }
        if let Err(e) = self.write_inode(sector, &map, length) {
            self.unclaim_all(&taken);
            return Err(e);
        }
        debug!("created inode at {} with length {}", sector, length);
        Ok(())
    }

    /// Open the inode at `sector`: share the existing object when a handle
    /// to it is already live, read it through the cache otherwise. Sectors
    /// without the inode magic are refused.
    pub fn open(&self, sector: SectorId) -> FsResult<InodeHandle> {
        let mut open = locked(&self.open);
        if let Some(handle) = open.get(&sector) {
            locked(&handle.refs).open_count += 1;
            return Ok(handle.clone());
        }
        let mut raw = [0_u8; SECTOR_SIZE];
        self.cache.read(self.dev, sector, &mut raw, 0)?;
        let node = DiskInode::from_sector(sector, &raw)?;
        let handle = Arc::new(Inode {
            sector,
            refs: Mutex::new(RefState {
                open_count: 1,
                removed: false,
                deny_write_count: 0,
            }),
            map: Mutex::new(MapState {
                map: node.map,
                top: top_block_index(node.length as u64),
            }),
            len: Mutex::new(node.length as u64),
        });
        open.insert(sector, handle.clone());
        Ok(handle)
    }

    /// Another handle to an already-open inode.
    pub fn reopen(&self, handle: &InodeHandle) -> InodeHandle {
        locked(&handle.refs).open_count += 1;
        handle.clone()
    }

    /// Give a handle back. The last close of a removed inode releases every
    /// data block, every index block, and finally the inode's own sector.
    pub fn close(&self, handle: InodeHandle) -> FsResult<()> {
        let reclaim = {
            let mut open = locked(&self.open);
            let mut refs = locked(&handle.refs);
            assert!(refs.open_count > 0, "close without a matching open");
            refs.open_count -= 1;
            if refs.open_count > 0 {
                false
            } else {
                open.remove(&handle.sector);
                refs.removed
            }
        };
        if reclaim {
            self.reclaim(&handle)?;
        }
        Ok(())
    }

    /// Mark the inode for deletion. The disk is untouched until the last
    /// handle closes; open handles keep reading and writing meanwhile.
    pub fn remove(&self, handle: &InodeHandle) {
        locked(&handle.refs).removed = true;
    }

    /// Committed length in bytes.
    pub fn length(&self, handle: &InodeHandle) -> u64 {
        *locked(&handle.len)
    }

    /// Forbid writes through every handle until a matching
    /// [`allow_write`](#method.allow_write). Each opener may deny at most
    /// once; writes while denied return `Ok(0)`.
    pub fn deny_write(&self, handle: &InodeHandle) {
        let mut refs = locked(&handle.refs);
        refs.deny_write_count += 1;
        assert!(
            refs.deny_write_count <= refs.open_count,
            "more write denials than openers"
        );
    }

    /// Undo one [`deny_write`](#method.deny_write).
    pub fn allow_write(&self, handle: &InodeHandle) {
        let mut refs = locked(&handle.refs);
        assert!(
            refs.deny_write_count > 0,
            "allow_write without a matching deny_write"
        );
        refs.deny_write_count -= 1;
    }

    /// Copy up to `buf.len()` bytes starting at byte `offset` into `buf`,
    /// stopping early at end of file. Returns how many bytes were copied.
    ///
    /// The length is sampled once at entry, so a read racing an extension
    /// sees either none or all of it, never a half-written region.
    pub fn read_at(&self, handle: &InodeHandle, buf: &mut [u8], offset: u64) -> FsResult<usize> {
        let length = *locked(&handle.len);
        let mut done = 0_usize;
        while done < buf.len() {
            let pos = offset + done as u64;
            let sector = match self.byte_to_sector(handle, pos, length)? {
                Some(s) => s,
                None => break,
            };
            let sector_off = (pos % SECTOR_SIZE as u64) as usize;
            let chunk = (buf.len() - done)
                .min(SECTOR_SIZE - sector_off)
                .min((length - pos) as usize);
            if chunk == 0 {
                break;
            }
            self.cache
                .read(self.dev, sector, &mut buf[done..done + chunk], sector_off)?;
            done += chunk;
        }
        Ok(done)
    }

    /// Write all of `buf` at byte `offset`, growing the file first when the
    /// write lands past the end. Returns the number of bytes written: 0 when
    /// writes are currently denied, `buf.len()` otherwise.
    ///
    /// The new length is committed only after every payload byte is in the
    /// cache, and it only ever moves forward, so racing writers cannot
    /// shrink each other's result.
    pub fn write_at(&self, handle: &InodeHandle, buf: &[u8], offset: u64) -> FsResult<usize> {
        if locked(&handle.refs).deny_write_count > 0 {
            return Ok(0);
        }
        let end = offset
            .checked_add(buf.len() as u64)
            .ok_or(FsError::TooLarge)?;
        if end > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        if buf.is_empty() {
            return Ok(0);
        }
        self.extend(handle, buf.len() as u64, offset)?;

        //A racing writer may have committed a longer length already;
        //translate against whichever is larger.
        let working = (*locked(&handle.len)).max(end);
        let mut done = 0_usize;
        while done < buf.len() {
            let pos = offset + done as u64;
            let sector = match self.byte_to_sector(handle, pos, working)? {
                Some(s) => s,
                None => break,
            };
            let sector_off = (pos % SECTOR_SIZE as u64) as usize;
            let chunk = (buf.len() - done)
                .min(SECTOR_SIZE - sector_off)
                .min((working - pos) as usize);
            if chunk == 0 {
                break;
            }
            self.cache
                .write(self.dev, sector, &buf[done..done + chunk], sector_off)?;
            done += chunk;
        }

        //Commit. The length moves forward only, and the inode sector is
        //rewritten so the device tells the same story.
        {
            let state = locked(&handle.map);
            let mut len = locked(&handle.len);
            if working > *len {
                *len = working;
            }
            self.write_inode(handle.sector, &state.map, *len)?;
        }
        Ok(done)
    }

    /// Make every block touched by a write of `additional` bytes at
    /// `offset` exist, without moving the committed length. A target whose
    /// blocks all exist already, because it sits inside the current length
    /// or because a racing writer grew past it, is a no-op. Serializes
    /// against other extensions of the same inode; extensions of different
    /// inodes run independently.
    ///
    /// On failure the pointer table and the free map are exactly as before
    /// the call.
    pub fn extend(&self, handle: &InodeHandle, additional: u64, offset: u64) -> FsResult<()> {
        let new_length = offset
            .checked_add(additional)
            .ok_or(FsError::TooLarge)?;
        if new_length > MAX_FILE_SIZE {
            return Err(FsError::TooLarge);
        }
        //Growth starts at the allocated top, not the committed length's
        //top block: a racing writer may have allocated past the committed
        //length without having committed yet, and those blocks must not be
        //claimed twice.
        let mut state = locked(&handle.map);
        let new_top = top_block_index(new_length);
        if new_top <= state.top {
            return Ok(());
        }
        let old_top = state.top;
        let snapshot = *state;
        let mut taken = Vec::new();
        if let Err(e) = self.grow_map(&mut state.map, Some(old_top), new_top, &mut taken) {
            self.rollback(&mut state, snapshot, &taken);
            return Err(e);
        }
        state.top = new_top;
        //Persist the new pointers; the length in the sector stays the
        //committed one until the caller's payload lands.
        let committed = *locked(&handle.len);
        if let Err(e) = self.write_inode(handle.sector, &state.map, committed) {
            self.rollback(&mut state, snapshot, &taken);
            return Err(e);
        }
        debug!(
            "extended inode at {}: data blocks {}..={}",
            handle.sector,
            old_top + 1,
            new_top
        );
        Ok(())
    }

    //The sector backing byte `offset`, or None at or past `bound`. Copies
    //what it needs out of the pointer table and drops the table lock before
    //any cache traffic on the indirect tiers.
    fn byte_to_sector(
        &self,
        handle: &InodeHandle,
        offset: u64,
        bound: u64,
    ) -> FsResult<Option<SectorId>> {
        if offset >= bound {
            return Ok(None);
        }
        let index = offset / SECTOR_SIZE as u64;
        let state = locked(&handle.map);
        match locate(index) {
            BlockPos::Direct(slot) => Ok(Some(state.map.direct[slot])),
            BlockPos::Single { which, slot } => {
                let root = state.map.single_indirect[which];
                drop(state);
                Ok(Some(self.read_entry(root, slot)?))
            }
            BlockPos::Double { outer, inner } => {
                let root = state.map.double_indirect;
                drop(state);
                let second = self.read_entry(root, outer)?;
                Ok(Some(self.read_entry(second, inner)?))
            }
        }
    }

    //Release everything a removed inode owns: data blocks, index blocks,
    //then the inode's own sector. Runs after the inode has left the
    //registry, so nothing else can reach it. Walks to the allocated top,
    //which also catches blocks a failed write grew but never committed.
    fn reclaim(&self, handle: &InodeHandle) -> FsResult<()> {
        let state = *locked(&handle.map);
        let map = state.map;
        let top = state.top;
        //Data blocks first, read out of the index blocks before those go
        for index in 0..=top {
            let data = match locate(index) {
                BlockPos::Direct(slot) => map.direct[slot],
                BlockPos::Single { which, slot } => {
                    self.read_entry(map.single_indirect[which], slot)?
                }
                BlockPos::Double { outer, inner } => {
                    let second = self.read_entry(map.double_indirect, outer)?;
                    self.read_entry(second, inner)?
                }
            };
            self.freemap.release(data, 1)?;
        }
        match locate(top) {
            BlockPos::Direct(_) => {}
            BlockPos::Single { which, .. } => {
                for w in 0..=which {
                    self.freemap.release(map.single_indirect[w], 1)?;
                }
            }
            BlockPos::Double { outer, .. } => {
                for w in 0..SINGLE_INDIRECT_COUNT {
                    self.freemap.release(map.single_indirect[w], 1)?;
                }
                for o in 0..=outer {
                    let second = self.read_entry(map.double_indirect, o)?;
                    self.freemap.release(second, 1)?;
                }
                self.freemap.release(map.double_indirect, 1)?;
            }
        }
        self.freemap.release(handle.sector, 1)?;
        debug!(
            "reclaimed inode at {} ({} data blocks)",
            handle.sector,
            top + 1
        );
        Ok(())
    }
}

impl Drop for InodeStore {
    //Open handles at teardown mean somebody skipped a close; say so.
    fn drop(&mut self) {
        let open = locked(&self.open);
        if !open.is_empty() {
            warn!("store dropped with {} inodes still open", open.len());
        }
    }
}

#[cfg(test)]
#[path = "../fs-tests/inode_test.rs"]
mod tests;
