//! Directory records stored as ordinary inode data.
//!
//! A directory is a file whose bytes are a packed array of fixed-size
//! records, two of which, `.` and `..`, are written at creation time.
//! Records travel through the same `read_at` and `write_at` calls as file
//! payload, so directories inherit the three-tier indexing wholesale and
//! may straddle as many sectors as their entries need.
//!
//! Removing a name turns its record into a tombstone whose slot the next
//! [`Directory::add`](struct.Directory.html#method.add) reuses, so
//! directories do not shrink; they only stop growing.

use crate::error::{DirError, DirResult};
use crate::inode::{InodeHandle, InodeStore};
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use slatefs_api::types::SectorId;

/// Most bytes a record name can occupy.
pub const NAME_MAX: usize = 14;

/// One directory record as it sits in the directory's byte stream.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// Sector of the inode this record names
    pub sector: SectorId,
    /// NUL-padded name
    pub name: [u8; NAME_MAX + 1],
    /// Live record, or a reusable tombstone when off
    pub in_use: bool,
    /// Whether the named inode is itself a directory
    pub is_dir: bool,
}

lazy_static! {
    /// The size in bytes of a serialized directory record.
    /// Note that this is only known at runtime, hence the `lazy_static`.
    pub static ref DIRENTRY_SIZE: u64 =
        bincode::serialize(&DirEntry::default()).unwrap().len() as u64;
}

impl DirEntry {
    fn named(name: &str, sector: SectorId, is_dir: bool) -> DirResult<DirEntry> {
        check_name(name)?;
        let mut bytes = [0_u8; NAME_MAX + 1];
        bytes[..name.len()].copy_from_slice(name.as_bytes());
        Ok(DirEntry {
            sector,
            name: bytes,
            in_use: true,
            is_dir,
        })
    }

    /// The stored name with the NUL padding stripped.
    pub fn name_str(&self) -> &str {
        let end = self
            .name
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }
}

//A usable record name: nonempty, at most NAME_MAX bytes, no separator, no
//NUL.
fn check_name(name: &str) -> DirResult<()> {
    if name.is_empty() {
        return Err(DirError::BadName("empty name"));
    }
    if name.len() > NAME_MAX {
        return Err(DirError::BadName("name longer than 14 bytes"));
    }
    if name.bytes().any(|b| b == b'/' || b == 0) {
        return Err(DirError::BadName("name contains '/' or NUL"));
    }
    Ok(())
}

//Record `slot` of the directory, or None past the last whole record.
fn read_record(store: &InodeStore, inode: &InodeHandle, slot: u64) -> DirResult<Option<DirEntry>> {
    let size = *DIRENTRY_SIZE;
    let mut raw = vec![0_u8; size as usize];
    let got = store.read_at(inode, &mut raw, slot * size)?;
    if (got as u64) < size {
        return Ok(None);
    }
    Ok(Some(bincode::deserialize(&raw)?))
}

//Write record `slot`, growing the directory file when appending.
fn write_record(
    store: &InodeStore,
    inode: &InodeHandle,
    slot: u64,
    entry: &DirEntry,
) -> DirResult<()> {
    let raw = bincode::serialize(entry)?;
    let written = store.write_at(inode, &raw, slot * *DIRENTRY_SIZE)?;
    if written < raw.len() {
        return Err(DirError::ShortWrite);
    }
    Ok(())
}

/// An open directory: a handle to its backing inode plus a cursor for
/// [`read_next`](#method.read_next). Each opener gets its own cursor.
#[derive(Debug)]
pub struct Directory {
    inode: InodeHandle,
    pos: u64,
}

impl Directory {
    /// Lay down a new directory at `sector`: creates the backing inode,
    /// then writes the `.` and `..` records pointing at itself and at
    /// `parent`. The root passes its own sector as parent. As with
    /// [`InodeStore::create`](../inode/struct.InodeStore.html#method.create),
    /// the caller owns `sector`.
    pub fn create(store: &InodeStore, sector: SectorId, parent: SectorId) -> DirResult<()> {
        let dot = DirEntry::named(".", sector, true)?;
        let dotdot = DirEntry::named("..", parent, true)?;
        store.create(sector, 2 * *DIRENTRY_SIZE)?;
        let handle = store.open(sector)?;
        let result = write_record(store, &handle, 0, &dot)
            .and_then(|_| write_record(store, &handle, 1, &dotdot));
        store.close(handle)?;
        result
    }

    /// Open the directory whose backing inode lives at `sector`. Nothing
    /// here checks that the sector actually holds directory records; the
    /// `is_dir` flag of the record naming it is the caller's source of
    /// truth.
    pub fn open(store: &InodeStore, sector: SectorId) -> DirResult<Directory> {
        let inode = store.open(sector)?;
        Ok(Directory { inode, pos: 0 })
    }

    /// A second, independently positioned handle to the same directory.
    pub fn reopen(&self, store: &InodeStore) -> Directory {
        Directory {
            inode: store.reopen(&self.inode),
            pos: 0,
        }
    }

    /// Close this handle, giving its inode back to the store.
    pub fn close(self, store: &InodeStore) -> DirResult<()> {
        store.close(self.inode)?;
        Ok(())
    }

    /// Handle to the backing inode.
    pub fn inode(&self) -> &InodeHandle {
        &self.inode
    }

    /// Sector of the backing inode.
    pub fn sector(&self) -> SectorId {
        self.inode.sector()
    }

    /// The live record named `name`.
    pub fn lookup(&self, store: &InodeStore, name: &str) -> DirResult<DirEntry> {
        check_name(name)?;
        match self.scan(store, name)? {
            Some((_, entry)) => Ok(entry),
            None => Err(DirError::NotFound(name.to_string())),
        }
    }

    /// Add a live record naming `sector`. The first tombstone slot is
    /// reused; with none free the record is appended and the directory file
    /// grows through the ordinary write path. Fails when `name` is already
    /// present.
    pub fn add(&self, store: &InodeStore, name: &str, sector: SectorId, is_dir: bool) -> DirResult<()> {
        let entry = DirEntry::named(name, sector, is_dir)?;
        if self.scan(store, name)?.is_some() {
            return Err(DirError::Exists(name.to_string()));
        }
        //First tombstone wins, else one past the last record
        let mut slot = 0_u64;
        let target = loop {
            match read_record(store, &self.inode, slot)? {
                Some(e) if !e.in_use => break slot,
                Some(_) => slot += 1,
                None => break slot,
            }
        };
        write_record(store, &self.inode, target, &entry)
    }

    /// Remove the record named `name`: its slot becomes a tombstone and the
    /// named inode is marked for deletion, so its sectors come back once
    /// the last handle to it closes. `.` and `..` refuse to go.
    pub fn remove(&self, store: &InodeStore, name: &str) -> DirResult<()> {
        if name == "." || name == ".." {
            return Err(DirError::BadName("'.' and '..' cannot be removed"));
        }
        check_name(name)?;
        let (slot, entry) = match self.scan(store, name)? {
            Some(found) => found,
            None => return Err(DirError::NotFound(name.to_string())),
        };
        //Tombstone before the inode goes: a half-done removal must never
        //leave a live name pointing at a reclaimed inode.
        let mut dead = entry;
        dead.in_use = false;
        write_record(store, &self.inode, slot, &dead)?;
        let victim = store.open(entry.sector)?;
        store.remove(&victim);
        store.close(victim)?;
        Ok(())
    }

    /// The name of the next live record, advancing this handle's cursor.
    /// Tombstones and the `.` and `..` records are skipped; `None` at the
    /// end.
    pub fn read_next(&mut self, store: &InodeStore) -> DirResult<Option<String>> {
        while let Some(entry) = read_record(store, &self.inode, self.pos)? {
            self.pos += 1;
            if entry.in_use {
                let name = entry.name_str().to_string();
                if name != "." && name != ".." {
                    return Ok(Some(name));
                }
            }
        }
        Ok(None)
    }

    //Every whole record in slot order; the first live one named `name`
    //wins.
    fn scan(&self, store: &InodeStore, name: &str) -> DirResult<Option<(u64, DirEntry)>> {
        let mut slot = 0_u64;
        while let Some(entry) = read_record(store, &self.inode, slot)? {
            if entry.in_use && entry.name_str() == name {
                return Ok(Some((slot, entry)));
            }
            slot += 1;
        }
        Ok(None)
    }
}

#[cfg(test)]
#[path = "../fs-tests/dir_test.rs"]
mod tests;
