//! Implementations of the [`SectorDevice`] contract and the controller logic
//! backing them.
//!
//! [`FileDisk`] emulates a physical disk with a file in the host file system
//! that is memory mapped into the controller. When initializing it, you
//! either provide a path to a non-existing file, which is created, zeroed and
//! used as the device contents, or a path to an existing image, whose size is
//! checked against the sector geometry. [`MemDisk`] provides the same
//! contract over a plain in-memory vector for tests and demos, where an
//! image file on disk buys nothing.
//!
//! Both devices count the sector reads and writes they complete. The layer
//! above is a cache whose entire purpose is avoiding device traffic, so the
//! counters are the only honest way to observe hits, misses and write-backs
//! from outside; see `io_counts` on either device.
//!
//! No provisions have been made to lock the file that backs a [`FileDisk`],
//! so do not fiddle with it while an engine is running on top, as this leads
//! to undefined behavior.
//!
//! [`SectorDevice`]: ../dev/trait.SectorDevice.html
//! [`FileDisk`]: struct.FileDisk.html
//! [`MemDisk`]: struct.MemDisk.html

use crate::dev::SectorDevice;
use crate::error::{DiskError, Result};
use crate::types::{SectorData, SectorId, SECTOR_SIZE};
use memmap::MmapMut;
use std::fs::{metadata, remove_file, OpenOptions};
use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

//A poisoned device mutex means some caller panicked mid-copy; the sector
//contents are still plain bytes, so we keep going with whatever is there.
fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

//Shared bounds check: the byte range of `sector` on a device of
//`sector_count` sectors.
fn sector_range(sector: SectorId, sector_count: u64) -> Result<Range<usize>> {
    if sector.0 as u64 >= sector_count {
        return Err(DiskError::OutOfRange(
            "sector index past the end of the device",
        ));
    }
    let start = sector.byte_offset() as usize;
    Ok(start..start + SECTOR_SIZE)
}

/// Whether a constructor expects to create a fresh image or open an old one.
#[derive(PartialEq, Eq, Copy, Clone)]
enum ImageState {
    New,
    Load,
}

/// Struct representing the state of an emulated hard drive disk (HDD).
///
/// The implementation of this structure is the controller that reads sectors
/// from the disk and writes sectors to it; the memory-mapped image file is
/// what the two operations actually copy against. Reads and writes take
/// `&self` — the sector cache shares one device among every caller it
/// serves — so the mutable state sits behind an internal mutex.
#[derive(Debug)]
pub struct FileDisk {
    sector_count: u64,
    path: PathBuf,
    inner: Mutex<FileDiskInner>,
}

#[derive(Debug)]
struct FileDiskInner {
    contents: MmapMut,
    reads: u64,
    writes: u64,
}

impl FileDisk {
    fn with_image<P: AsRef<Path>>(
        path: P,
        sector_count: u64,
        state: ImageState,
    ) -> Result<FileDisk> {
        let path_buf = path.as_ref().to_path_buf();
        let contents = mmap_path(path, sector_count * SECTOR_SIZE as u64, state)?;
        Ok(FileDisk {
            sector_count,
            path: path_buf,
            inner: Mutex::new(FileDiskInner {
                contents,
                reads: 0,
                writes: 0,
            }),
        })
    }

    /// Create a *new* disk of `sector_count` sectors, backed by a fresh image
    /// at `path`. The new device reads as all zeroes.
    /// This function returns an error if the file at `path` already exists,
    /// or if `sector_count` is zero.
    pub fn create<P: AsRef<Path>>(path: P, sector_count: u64) -> Result<FileDisk> {
        if sector_count == 0 {
            return Err(DiskError::Invalid("a disk needs at least one sector"));
        }
        FileDisk::with_image(path, sector_count, ImageState::New)
    }

    /// Load an *existing* disk image at `path`, deriving the sector count
    /// from the image size, which must be a whole (nonzero) number of
    /// sectors. This function returns an error if the file does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<FileDisk> {
        if !path.as_ref().exists() {
            return Err(DiskError::Invalid("tried to load a non-existing image path"));
        }
        let bytes = metadata(path.as_ref())?.len();
        if bytes == 0 || bytes % SECTOR_SIZE as u64 != 0 {
            return Err(DiskError::Invalid(
                "image size is not a whole number of sectors",
            ));
        }
        FileDisk::with_image(path, bytes / SECTOR_SIZE as u64, ImageState::Load)
    }

    /// End the lifetime of this disk and remove the image file backing it.
    /// Assumes that you have not made any other links to the backing file.
    pub fn destruct(self) -> Result<()> {
        remove_file(&self.path)?;
        Ok(())
    }

    /// Size of this device in bytes.
    pub fn size_bytes(&self) -> u64 {
        self.sector_count * SECTOR_SIZE as u64
    }

    /// Path of the image file backing this device.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of device reads and device writes completed so far, in that
    /// order. Monotone over the life of the device; take deltas to measure a
    /// window.
    pub fn io_counts(&self) -> (u64, u64) {
        let inner = locked(&self.inner);
        (inner.reads, inner.writes)
    }
}

impl SectorDevice for FileDisk {
    fn read_sector(&self, sector: SectorId, buf: &mut SectorData) -> Result<()> {
        let range = sector_range(sector, self.sector_count)?;
        let mut inner = locked(&self.inner);
        buf.copy_from_slice(&inner.contents[range]);
        inner.reads += 1;
        Ok(())
    }

    fn write_sector(&self, sector: SectorId, buf: &SectorData) -> Result<()> {
        let range = sector_range(sector, self.sector_count)?;
        let mut inner = locked(&self.inner);
        inner.contents[range].copy_from_slice(buf);
        inner.writes += 1;
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }
}

impl Drop for FileDisk {
    /// This implementation of drop makes sure all writes are persisted before
    /// we release ownership of the device and its controller.
    /// We only need to persist if the file backing this disk still exists.
    fn drop(&mut self) {
        if self.path.exists() {
            let _ = locked(&self.inner).contents.flush();
        }
    }
}

/// Either create or open the image at `path` and map it writably.
/// Creating extends the file to `dsize` bytes, with all intermediate data
/// filled in with 0s; loading checks the size already on disk instead.
fn mmap_path<P: AsRef<Path>>(path: P, dsize: u64, state: ImageState) -> Result<MmapMut> {
    let exists = path.as_ref().exists();
    if state == ImageState::New && exists {
        return Err(DiskError::Invalid(
            "tried to create over a pre-existing image path",
        ));
    }
    if state == ImageState::Load && !exists {
        return Err(DiskError::Invalid("tried to load a non-existing image path"));
    }

    let f = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(path)?;

    if state == ImageState::Load {
        if f.metadata()?.len() != dsize {
            return Err(DiskError::Invalid(
                "image size does not match the device geometry",
            ));
        }
    } else {
        f.set_len(dsize)?;
    }

    let contents = unsafe { memmap::MmapOptions::new().map_mut(&f)? };
    Ok(contents)
}

/// An in-memory device: the same contract as [`FileDisk`](struct.FileDisk.html)
/// over a plain vector. Contents do not survive a drop.
#[derive(Debug)]
pub struct MemDisk {
    sector_count: u64,
    inner: Mutex<MemDiskInner>,
}

#[derive(Debug)]
struct MemDiskInner {
    contents: Vec<u8>,
    reads: u64,
    writes: u64,
}

impl MemDisk {
    /// Create a zero-filled in-memory device of `sector_count` sectors.
    pub fn new(sector_count: u64) -> MemDisk {
        MemDisk {
            sector_count,
            inner: Mutex::new(MemDiskInner {
                contents: vec![0; (sector_count * SECTOR_SIZE as u64) as usize],
                reads: 0,
                writes: 0,
            }),
        }
    }

    /// Number of device reads and device writes completed so far, in that
    /// order.
    pub fn io_counts(&self) -> (u64, u64) {
        let inner = locked(&self.inner);
        (inner.reads, inner.writes)
    }
}

impl SectorDevice for MemDisk {
    fn read_sector(&self, sector: SectorId, buf: &mut SectorData) -> Result<()> {
        let range = sector_range(sector, self.sector_count)?;
        let mut inner = locked(&self.inner);
        buf.copy_from_slice(&inner.contents[range]);
        inner.reads += 1;
        Ok(())
    }

    fn write_sector(&self, sector: SectorId, buf: &SectorData) -> Result<()> {
        let range = sector_range(sector, self.sector_count)?;
        let mut inner = locked(&self.inner);
        inner.contents[range].copy_from_slice(buf);
        inner.writes += 1;
        Ok(())
    }

    fn sector_count(&self) -> u64 {
        self.sector_count
    }
}

// Here we define a submodule, called `tests`, that contains the unit tests of
// this module.
//
// Note that tests sharing a disk image cannot run in parallel; each test
// below therefore passes its own unique name into `disk_prep_path`, so it
// gets access to its own resources.
#[cfg(test)]
mod tests {

    use super::{FileDisk, MemDisk};
    use crate::dev::SectorDevice;
    use crate::types::{SectorData, SectorId, SECTOR_SIZE};
    use std::fs::{create_dir_all, remove_dir, remove_file};
    use std::path::{Path, PathBuf};

    // For these tests, we use a toy disk of 16 sectors
    static NSECTORS: u64 = 16;

    //Returns the path to the image we will use during the tests
    //Also creates any missing directories between this path and the current
    //working directory, and removes a leftover image if one exists
    fn disk_prep_path(name: &str) -> PathBuf {
        let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
        path.push("fs-images-controller-".to_string() + name);
        path.push("img");

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

    //Create a fresh 16-sector device
    fn disk_setup(path: &Path) -> FileDisk {
        FileDisk::create(path, NSECTORS).unwrap()
    }

    //Destruct the given device and remove the parent directory it was located in
    fn disk_destruct(dev: FileDisk) {
        let path = dev.path().to_owned();
        dev.destruct().unwrap();
        remove_dir(path.parent().unwrap()).unwrap(); //Safety measure; will only delete an empty directory
    }

    fn patterned(byte: u8) -> SectorData {
        [byte; SECTOR_SIZE]
    }

    #[test]
    fn create_disk_test() {
        //Set up a new device
        let path = disk_prep_path("create");
        let dev = disk_setup(&path);
        assert_eq!(dev.sector_count(), NSECTORS);
        assert_eq!(dev.size_bytes(), NSECTORS * SECTOR_SIZE as u64);

        //Check for some random sectors that they are indeed zero at start up
        let mut buf = patterned(0xff);
        dev.read_sector(SectorId(3), &mut buf).unwrap();
        assert_eq!(buf[..], patterned(0)[..]);
        let mut buf = patterned(0xff);
        dev.read_sector(SectorId(15), &mut buf).unwrap();
        assert_eq!(buf[..], patterned(0)[..]);

        //Read and write one sector past the end; this should result in an error
        let mut buf = patterned(0);
        assert!(dev.read_sector(SectorId(NSECTORS as u32), &mut buf).is_err());
        assert!(dev.write_sector(SectorId(NSECTORS as u32), &buf).is_err());

        //Write a pattern and see if we read the same thing back
        let bw = patterned(0xab);
        dev.write_sector(SectorId(7), &bw).unwrap();
        let mut br = patterned(0);
        dev.read_sector(SectorId(7), &mut br).unwrap();
        //Do we read what we wrote?
        assert_eq!(br[..], bw[..]);

        //The device counted 3 successful reads and 1 successful write;
        //the out-of-range attempts never reached the image
        assert_eq!(dev.io_counts(), (3, 1));

        disk_destruct(dev);
        //Make sure the file has actually been destroyed
        assert!(!path.exists());
    }

    // Here we test persistence of data after reloading a disk image,
    // destroying it at the end.
    #[test]
    fn load_existing_disk_test() {
        //Set up a new device and make a few writes
        let path = disk_prep_path("load");
        let dev = disk_setup(&path);

        let bw1 = patterned(0x11);
        let bw2 = patterned(0x22);
        dev.write_sector(SectorId(0), &bw1).unwrap();
        dev.write_sector(SectorId(8), &bw2).unwrap();

        //Close the device by dropping it
        drop(dev);

        //Loading with a missing path fails
        assert!(FileDisk::load(path.parent().unwrap().join("nothing-here")).is_err());

        //Reopen the device and assert that our old data is still there
        let dev = FileDisk::load(&path).unwrap();
        assert_eq!(dev.sector_count(), NSECTORS);
        let mut br = patterned(0);
        dev.read_sector(SectorId(0), &mut br).unwrap();
        assert_eq!(br[..], bw1[..]);
        dev.read_sector(SectorId(8), &mut br).unwrap();
        assert_eq!(br[..], bw2[..]);
        //A freshly loaded device starts counting from zero again
        assert_eq!(dev.io_counts(), (2, 0));

        disk_destruct(dev);
        //Make sure the file has actually been destroyed
        assert!(!path.exists());
    }

    //The in-memory device honors the same contract as the file-backed one
    #[test]
    fn mem_disk_test() {
        let dev = MemDisk::new(NSECTORS);
        assert_eq!(dev.sector_count(), NSECTORS);

        let mut buf = patterned(0xff);
        dev.read_sector(SectorId(0), &mut buf).unwrap();
        assert_eq!(buf[..], patterned(0)[..]);

        let bw = patterned(0x5c);
        dev.write_sector(SectorId(9), &bw).unwrap();
        let mut br = patterned(0);
        dev.read_sector(SectorId(9), &mut br).unwrap();
        assert_eq!(br[..], bw[..]);

        let mut buf = patterned(0);
        assert!(dev.read_sector(SectorId(NSECTORS as u32), &mut buf).is_err());
        assert_eq!(dev.io_counts(), (2, 1));
    }
}
