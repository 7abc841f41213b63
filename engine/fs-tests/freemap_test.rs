use super::BitmapFreeMap;
use slatefs_api::dev::{AllocError, FreeMap};
use slatefs_api::types::SectorId;
use std::sync::Arc;
use std::thread;

#[path = "utils.rs"]
mod utils;

#[test]
fn first_fit_in_order() {
    utils::init_logs();
    let map = BitmapFreeMap::new(SectorId(8), 16);
    assert_eq!(map.capacity(), 16);
    assert_eq!(map.free_sectors(), 16);
    assert_eq!(map.allocate(1).unwrap(), SectorId(8));
    assert_eq!(map.allocate(1).unwrap(), SectorId(9));
    assert_eq!(map.allocate(1).unwrap(), SectorId(10));
    map.release(SectorId(9), 1).unwrap();
    //The lowest free run wins
    assert_eq!(map.allocate(1).unwrap(), SectorId(9));
    assert_eq!(map.allocate(2).unwrap(), SectorId(11));
    assert_eq!(map.free_sectors(), 11);
}

#[test]
fn runs_skip_undersized_holes() {
    let map = BitmapFreeMap::new(SectorId(0), 16);
    assert_eq!(map.allocate(5).unwrap(), SectorId(0));
    map.release(SectorId(2), 1).unwrap();
    //The one-sector hole at 2 cannot hold a pair
    assert_eq!(map.allocate(2).unwrap(), SectorId(5));
    assert_eq!(map.allocate(1).unwrap(), SectorId(2));
}

#[test]
fn exhaustion_is_reported() {
    let map = BitmapFreeMap::new(SectorId(0), 4);
    match map.allocate(5) {
        Err(AllocError::Exhausted(n)) => assert_eq!(n, 5),
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(map.allocate(4).unwrap(), SectorId(0));
    assert!(map.allocate(1).is_err());
    map.release(SectorId(3), 1).unwrap();
    assert_eq!(map.allocate(1).unwrap(), SectorId(3));
}

#[test]
fn release_is_validated() {
    let map = BitmapFreeMap::new(SectorId(8), 8);
    assert!(map.release(SectorId(7), 1).is_err()); //below the region
    assert!(map.release(SectorId(15), 2).is_err()); //spills past it
    match map.release(SectorId(8), 1) {
        Err(AllocError::FreeingFree(s)) => assert_eq!(s, SectorId(8)),
        other => panic!("expected a double free error, got {:?}", other),
    }
    map.allocate(2).unwrap();
    map.release(SectorId(8), 2).unwrap();
    assert!(map.release(SectorId(8), 2).is_err());
}

#[test]
fn concurrent_allocators_get_disjoint_sectors() {
    let map = Arc::new(BitmapFreeMap::new(SectorId(0), 128));
    let mut workers = Vec::new();
    for _ in 0..4 {
        let m = map.clone();
        workers.push(thread::spawn(move || {
            let mut got = Vec::new();
            for _ in 0..32 {
                got.push(m.allocate(1).unwrap());
            }
            got
        }));
    }
    let mut all: Vec<SectorId> = Vec::new();
    for worker in workers {
        all.extend(worker.join().unwrap());
    }
    all.sort();
    all.dedup();
    assert_eq!(all.len(), 128);
    assert_eq!(map.free_sectors(), 0);
}
