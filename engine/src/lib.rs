//! The slatefs storage engine: a fixed-capacity write-back sector cache
//! with an indexed inode store and directory records layered on top of it.
//!
//! The crate is organized bottom-up:
//!
//! 1. The [`cache` module](cache/index.html) puts 64 sector slots between
//!    every caller and the attached devices: LRU replacement, dirty
//!    tracking, write-back on eviction and flush, and hit accounting.
//! 2. The [`layout` module](layout/index.html) holds the on-disk inode
//!    format and the arithmetic of its three pointer tiers.
//! 3. The [`freemap` module](freemap/index.html) is a bitmap allocator
//!    implementing the free-space service the store consumes.
//! 4. The [`inode` module](inode/index.html) is the store proper: the
//!    open-inode registry, growth, reads and writes, deferred reclamation.
//! 5. The [`dir` module](dir/index.html) keeps directory records as
//!    ordinary inode data.
//!
//! Everything underneath the store is a service handed in explicitly; see
//! `InodeStore::new` for how the pieces snap together, or run the `demo`
//! example for a walkthrough.

#![deny(missing_docs)]

pub mod cache;
pub mod dir;
pub mod error;
pub mod freemap;
pub mod inode;
pub mod layout;

use std::sync::{Mutex, MutexGuard, PoisonError};

//A poisoned lock still holds well-formed data here (no guarded structure
//has an invariant spanning a panic point), so take the data and continue.
pub(crate) fn locked<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}
