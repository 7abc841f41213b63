use super::{Directory, DIRENTRY_SIZE, NAME_MAX};
use crate::cache::SectorCache;
use crate::error::DirError;
use crate::freemap::BitmapFreeMap;
use crate::inode::InodeStore;
use slatefs_api::controller::MemDisk;
use slatefs_api::dev::FreeMap;
use slatefs_api::types::{SectorId, SECTOR_SIZE};
use std::sync::Arc;

#[path = "utils.rs"]
mod utils;

#[test]
fn fresh_directory_carries_dot_records() {
    let h = utils::mem_harness(64, 1);
    let dsector = h.freemap.allocate(1).unwrap();
    Directory::create(&h.store, dsector, dsector).unwrap();
    let mut dir = Directory::open(&h.store, dsector).unwrap();
    assert_eq!(h.store.length(dir.inode()), 2 * *DIRENTRY_SIZE);

    let this = dir.lookup(&h.store, ".").unwrap();
    assert_eq!(this.sector, dsector);
    assert!(this.is_dir);
    let up = dir.lookup(&h.store, "..").unwrap();
    assert_eq!(up.sector, dsector);
    assert!(up.is_dir);

    //The dot records never show up in a listing
    assert!(dir.read_next(&h.store).unwrap().is_none());
    dir.close(&h.store).unwrap();
}

#[test]
fn add_lookup_remove_roundtrip() {
    let h = utils::mem_harness(64, 1);
    let baseline = h.freemap.free_sectors();
    let dsector = h.freemap.allocate(1).unwrap();
    Directory::create(&h.store, dsector, dsector).unwrap();
    let dir = Directory::open(&h.store, dsector).unwrap();

    let fsector = h.freemap.allocate(1).unwrap();
    h.store.create(fsector, 0).unwrap();
    dir.add(&h.store, "alpha", fsector, false).unwrap();

    let entry = dir.lookup(&h.store, "alpha").unwrap();
    assert_eq!(entry.sector, fsector);
    assert!(!entry.is_dir);
    assert_eq!(entry.name_str(), "alpha");

    //A second record under the same name is refused
    match dir.add(&h.store, "alpha", fsector, false) {
        Err(DirError::Exists(name)) => assert_eq!(name, "alpha"),
        other => panic!("expected an exists failure, got {:?}", other),
    }

    //Removal drops the record and reclaims the file's storage
    dir.remove(&h.store, "alpha").unwrap();
    assert!(matches!(
        dir.lookup(&h.store, "alpha"),
        Err(DirError::NotFound(_))
    ));
    assert!(matches!(
        dir.remove(&h.store, "alpha"),
        Err(DirError::NotFound(_))
    ));
    dir.close(&h.store).unwrap();
    //Left on the map: the directory's inode and its one data block
    assert_eq!(h.freemap.free_sectors(), baseline - 2);
}

#[test]
fn tombstone_slots_are_reused() {
    let h = utils::mem_harness(64, 1);
    let dsector = h.freemap.allocate(1).unwrap();
    Directory::create(&h.store, dsector, dsector).unwrap();
    let dir = Directory::open(&h.store, dsector).unwrap();

    let s1 = h.freemap.allocate(1).unwrap();
    h.store.create(s1, 0).unwrap();
    let s2 = h.freemap.allocate(1).unwrap();
    h.store.create(s2, 0).unwrap();
    dir.add(&h.store, "one", s1, false).unwrap();
    dir.add(&h.store, "two", s2, false).unwrap();
    assert_eq!(h.store.length(dir.inode()), 4 * *DIRENTRY_SIZE);

    //Removing leaves the slot behind as a tombstone
    dir.remove(&h.store, "one").unwrap();
    assert_eq!(h.store.length(dir.inode()), 4 * *DIRENTRY_SIZE);

    //The next add fills the tombstone instead of growing the file
    let s3 = h.freemap.allocate(1).unwrap();
    h.store.create(s3, 0).unwrap();
    dir.add(&h.store, "three", s3, false).unwrap();
    assert_eq!(h.store.length(dir.inode()), 4 * *DIRENTRY_SIZE);
    assert_eq!(dir.lookup(&h.store, "three").unwrap().sector, s3);
    dir.close(&h.store).unwrap();
}

#[test]
fn listing_crosses_sector_boundaries() {
    let h = utils::mem_harness(128, 1);
    let dsector = h.freemap.allocate(1).unwrap();
    Directory::create(&h.store, dsector, dsector).unwrap();
    let mut dir = Directory::open(&h.store, dsector).unwrap();

    let names: Vec<String> = (0..30).map(|i| format!("entry{:02}", i)).collect();
    for name in &names {
        let fsector = h.freemap.allocate(1).unwrap();
        h.store.create(fsector, 0).unwrap();
        dir.add(&h.store, name, fsector, false).unwrap();
    }
    //32 records no longer fit in one sector
    assert_eq!(h.store.length(dir.inode()), 32 * *DIRENTRY_SIZE);
    assert!(h.store.length(dir.inode()) > SECTOR_SIZE as u64);

    let mut listed = Vec::new();
    while let Some(name) = dir.read_next(&h.store).unwrap() {
        listed.push(name);
    }
    assert_eq!(listed, names);
    for name in &names {
        dir.lookup(&h.store, name).unwrap();
    }
    dir.close(&h.store).unwrap();
}

#[test]
fn name_rules() {
    let h = utils::mem_harness(64, 1);
    let dsector = h.freemap.allocate(1).unwrap();
    Directory::create(&h.store, dsector, dsector).unwrap();
    let dir = Directory::open(&h.store, dsector).unwrap();
    let fsector = h.freemap.allocate(1).unwrap();
    h.store.create(fsector, 0).unwrap();

    assert!(dir.add(&h.store, "", fsector, false).is_err());
    assert!(dir.add(&h.store, "fifteen-bytes-x", fsector, false).is_err());
    assert!(dir.add(&h.store, "a/b", fsector, false).is_err());
    assert!(dir.add(&h.store, "nul\0", fsector, false).is_err());
    assert!(dir.lookup(&h.store, "").is_err());

    //Exactly NAME_MAX bytes is fine and survives the fixed-width field
    let longest = "a".repeat(NAME_MAX);
    dir.add(&h.store, &longest, fsector, false).unwrap();
    assert_eq!(dir.lookup(&h.store, &longest).unwrap().name_str(), longest);

    //The dot records are not removable
    assert!(matches!(
        dir.remove(&h.store, "."),
        Err(DirError::BadName(_))
    ));
    assert!(matches!(
        dir.remove(&h.store, ".."),
        Err(DirError::BadName(_))
    ));
    dir.close(&h.store).unwrap();
}

#[test]
fn records_reach_the_device() {
    utils::init_logs();
    let disk = Arc::new(MemDisk::new(64));
    let cache = Arc::new(SectorCache::new());
    let dev = cache.attach(disk.clone());
    let freemap = Arc::new(BitmapFreeMap::new(SectorId(1), 63));
    let store = InodeStore::new(cache.clone(), dev, freemap.clone());

    let dsector = freemap.allocate(1).unwrap();
    Directory::create(&store, dsector, dsector).unwrap();
    let dir = Directory::open(&store, dsector).unwrap();
    let fsector = freemap.allocate(1).unwrap();
    store.create(fsector, 0).unwrap();
    dir.add(&store, "kept", fsector, true).unwrap();
    dir.close(&store).unwrap();
    drop(store);
    //Write everything back and forget it all
    cache.reset().unwrap();

    let store = InodeStore::new(cache, dev, freemap);
    let dir = Directory::open(&store, dsector).unwrap();
    let entry = dir.lookup(&store, "kept").unwrap();
    assert_eq!(entry.sector, fsector);
    assert!(entry.is_dir);
    dir.close(&store).unwrap();
}

#[test]
fn reopened_cursors_are_independent() {
    let h = utils::mem_harness(64, 1);
    let dsector = h.freemap.allocate(1).unwrap();
    Directory::create(&h.store, dsector, dsector).unwrap();
    let mut dir = Directory::open(&h.store, dsector).unwrap();
    for name in &["a", "b", "c"] {
        let fsector = h.freemap.allocate(1).unwrap();
        h.store.create(fsector, 0).unwrap();
        dir.add(&h.store, name, fsector, false).unwrap();
    }

    assert_eq!(dir.read_next(&h.store).unwrap().unwrap(), "a");
    //A reopened cursor starts over without disturbing the first
    let mut second = dir.reopen(&h.store);
    assert_eq!(second.read_next(&h.store).unwrap().unwrap(), "a");
    assert_eq!(dir.read_next(&h.store).unwrap().unwrap(), "b");
    assert_eq!(second.read_next(&h.store).unwrap().unwrap(), "b");
    dir.close(&h.store).unwrap();
    second.close(&h.store).unwrap();
}
