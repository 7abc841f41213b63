//! Error types of the engine, one enum per layer.
//!
//! Each layer wraps the errors of the layer below it through a `#[from]`
//! conversion, so `?` carries a failure up the stack without manual mapping,
//! while a `match` on the outermost enum can still reach every underlying
//! cause.

use slatefs_api::dev::AllocError;
use slatefs_api::error::DiskError;
use slatefs_api::types::{DeviceId, SectorId};
use thiserror::Error;

/// Errors produced by the sector cache.
#[derive(Error, Debug)]
pub enum CacheError {
    /// A device failed underneath the cache
    #[error("device error: {0}")]
    Disk(#[from] DiskError),
    /// A byte range that does not fit inside one sector
    #[error("invalid sector range: {0}")]
    Bounds(&'static str),
    /// A device id this cache never handed out
    #[error("unknown device {0}")]
    UnknownDevice(DeviceId),
}

/// Shorthand for results coming out of the cache layer.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors produced by the inode store.
#[derive(Error, Debug)]
pub enum FsError {
    /// The cache, or the device behind it, failed
    #[error("cache error: {0}")]
    Cache(#[from] CacheError),
    /// The free-space allocator refused a request
    #[error("allocation error: {0}")]
    Alloc(#[from] AllocError),
    /// A create or write would push past the largest representable file
    #[error("file would exceed the maximum length")]
    TooLarge,
    /// The sector does not hold an inode
    #[error("sector {0} does not contain an inode")]
    BadMagic(SectorId),
}

/// Shorthand for results coming out of the inode store.
pub type FsResult<T> = std::result::Result<T, FsError>;

/// Errors produced by the directory layer.
#[derive(Error, Debug)]
pub enum DirError {
    /// The inode store failed underneath the directory
    #[error("inode error: {0}")]
    Fs(#[from] FsError),
    /// A directory record failed to encode or decode
    #[error("malformed directory record: {0}")]
    Encoding(#[from] bincode::Error),
    /// A name that is empty, too long, or contains a reserved character
    #[error("invalid entry name: {0}")]
    BadName(&'static str),
    /// Lookup or removal of a name with no live record
    #[error("no entry named '{0}'")]
    NotFound(String),
    /// Adding a name that is already present
    #[error("an entry named '{0}' already exists")]
    Exists(String),
    /// A record write that fell short, e.g. because writes to the backing
    /// inode are currently denied
    #[error("directory record write fell short")]
    ShortWrite,
}

/// Shorthand for results coming out of the directory layer.
pub type DirResult<T> = std::result::Result<T, DirError>;
