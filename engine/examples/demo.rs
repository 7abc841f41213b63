//! End-to-end tour: an in-memory device, the sector cache on top, an
//! inode store over a bitmap free map, and a root directory with one file.
//!
//! Run with `RUST_LOG=debug` to watch the cache and the store work.

use anyhow::Result;
use slatefs_api::controller::MemDisk;
use slatefs_api::dev::FreeMap;
use slatefs_api::types::SectorId;
use slatefs_engine::cache::SectorCache;
use slatefs_engine::dir::Directory;
use slatefs_engine::freemap::BitmapFreeMap;
use slatefs_engine::inode::InodeStore;
use std::sync::Arc;

fn main() -> Result<()> {
    env_logger::init();

    //A 2 MiB device behind the cache. Sector 0 is left alone, the root
    //directory takes sector 1, and the free map hands out the rest.
    let disk = Arc::new(MemDisk::new(4096));
    let cache = Arc::new(SectorCache::new());
    let dev = cache.attach(disk.clone());
    let freemap = Arc::new(BitmapFreeMap::new(SectorId(2), 4094));
    let store = InodeStore::new(cache.clone(), dev, freemap.clone());

    let root = SectorId(1);
    Directory::create(&store, root, root)?;
    let mut dir = Directory::open(&store, root)?;
    println!("root directory at {}", dir.sector());

    let fsector = freemap.allocate(1)?;
    store.create(fsector, 0)?;
    dir.add(&store, "notes.txt", fsector, false)?;

    let file = store.open(fsector)?;
    let text = b"The quick brown fox jumps over the lazy dog.";
    let written = store.write_at(&file, text, 0)?;
    println!("wrote {} bytes to notes.txt at {}", written, fsector);

    let mut back = vec![0_u8; store.length(&file) as usize];
    store.read_at(&file, &mut back, 0)?;
    println!("read back: {:?}", String::from_utf8_lossy(&back));

    println!("listing /:");
    while let Some(name) = dir.read_next(&store)? {
        let entry = dir.lookup(&store, &name)?;
        println!("  {:<14} -> {}", name, entry.sector);
    }

    let stats = cache.stats();
    let (reads, writes) = disk.io_counts();
    println!(
        "cache: {} accesses, {} hits; device so far: {} reads, {} writes",
        stats.accesses, stats.hits, reads, writes
    );

    //Removal is deferred: the name goes now, the sectors once the last
    //handle closes.
    let held = freemap.free_sectors();
    dir.remove(&store, "notes.txt")?;
    println!(
        "removed notes.txt; {} sectors free while a handle is open",
        freemap.free_sectors()
    );
    store.close(file)?;
    println!(
        "last handle closed; {} sectors came back",
        freemap.free_sectors() - held
    );

    dir.close(&store)?;
    cache.flush_all()?;
    let (reads, writes) = disk.io_counts();
    println!("flushed: device totals {} reads, {} writes", reads, writes);
    Ok(())
}
