#![allow(dead_code)]

//Some more general testing utilities
use crate::cache::SectorCache;
use crate::freemap::BitmapFreeMap;
use crate::inode::InodeStore;
use slatefs_api::controller::{FileDisk, MemDisk};
use slatefs_api::types::{DeviceId, SectorId};
use std::fs::{create_dir_all, remove_dir, remove_file};
use std::path::{Path, PathBuf};
use std::sync::Arc;

//Route log output through the test harness; calling this more than once is
//fine, later calls are ignored
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

//Create the necessary folders 'name' leading up to 'img_name', starting from the crate root
//Additionally, remove 'img_name' if it already exists in the file system, to make sure we can start from a fresh disk
pub fn disk_prep_path(name: &str, img_name: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push(name);
    path.push(img_name);

    if path.exists() {
        //Remove the file in case it already exists
        remove_file(&path).unwrap();
    }
    {
        //Create any missing directories first, if applicable
        let prefix = path.parent().unwrap();
        create_dir_all(prefix).unwrap();
    }

    return path;
}

//Undo folder creation, including removing the parent
pub fn disk_unprep_path(path: &Path) {
    //Ensure that the file has been deleted before going on
    remove_file(path).unwrap();

    let parent = path.parent().unwrap();
    remove_dir(parent).unwrap(); //Safety; only remove if empty
}

//Destruct the given disk and remove the parent directory it was located in
pub fn disk_destruct(disk: FileDisk) {
    let path = disk.path().to_owned();
    drop(disk); //Flushes the mapping before we remove the file
    disk_unprep_path(&path);
}

//Take the disk back out of its Arc, once the cache holding the other clone
//is gone
pub fn take_disk(disk: Arc<FileDisk>) -> FileDisk {
    match Arc::try_unwrap(disk) {
        Ok(d) => d,
        Err(_) => panic!("file disk still shared"),
    }
}

//One complete in-memory engine. `data_start` keeps the low sectors out of
//the free map, mirroring how a deployment reserves them
pub struct Harness {
    pub disk: Arc<MemDisk>,
    pub cache: Arc<SectorCache>,
    pub dev: DeviceId,
    pub freemap: Arc<BitmapFreeMap>,
    pub store: Arc<InodeStore>,
}

pub fn mem_harness(sectors: u64, data_start: u32) -> Harness {
    init_logs();
    let disk = Arc::new(MemDisk::new(sectors));
    let cache = Arc::new(SectorCache::new());
    let dev = cache.attach(disk.clone());
    let freemap = Arc::new(BitmapFreeMap::new(
        SectorId(data_start),
        sectors as u32 - data_start,
    ));
    let store = Arc::new(InodeStore::new(cache.clone(), dev, freemap.clone()));
    Harness {
        disk,
        cache,
        dev,
        freemap,
        store,
    }
}
