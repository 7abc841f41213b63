use super::*;
use crate::error::FsError;
use slatefs_api::types::SectorId;

#[test]
fn format_constants() {
    assert_eq!(MAX_DATA_BLOCKS, 16763);
    assert_eq!(MAX_FILE_SIZE, 8_582_656);
    //The encoded fields fill an inode's sector exactly
    assert_eq!(OFF_DOUBLE + 4, SECTOR_SIZE);
}

#[test]
fn tier_boundaries() {
    assert_eq!(locate(0), BlockPos::Direct(0));
    assert_eq!(locate(122), BlockPos::Direct(122));
    assert_eq!(locate(123), BlockPos::Single { which: 0, slot: 0 });
    assert_eq!(locate(250), BlockPos::Single { which: 0, slot: 127 });
    assert_eq!(locate(251), BlockPos::Single { which: 1, slot: 0 });
    assert_eq!(locate(378), BlockPos::Single { which: 1, slot: 127 });
    assert_eq!(locate(379), BlockPos::Double { outer: 0, inner: 0 });
    assert_eq!(locate(379 + 128), BlockPos::Double { outer: 1, inner: 0 });
    assert_eq!(
        locate(MAX_DATA_BLOCKS - 1),
        BlockPos::Double {
            outer: 127,
            inner: 127
        }
    );
}

#[test]
#[should_panic]
fn locate_rejects_out_of_range() {
    locate(MAX_DATA_BLOCKS);
}

#[test]
fn top_block_keeps_the_boundary_block() {
    assert_eq!(top_block_index(0), 0);
    assert_eq!(top_block_index(1), 0);
    assert_eq!(top_block_index(511), 0);
    assert_eq!(top_block_index(512), 1);
    assert_eq!(top_block_index(513), 1);
    //Clamped at the very top so a maximum-size file stays addressable
    assert_eq!(top_block_index(MAX_FILE_SIZE - 1), MAX_DATA_BLOCKS - 1);
    assert_eq!(top_block_index(MAX_FILE_SIZE), MAX_DATA_BLOCKS - 1);
}

#[test]
fn inode_codec_roundtrip() {
    let mut map = BlockMap::empty();
    for (i, s) in map.direct.iter_mut().enumerate() {
        *s = SectorId(1000 + i as u32);
    }
    map.single_indirect = [SectorId(7), SectorId(8)];
    map.double_indirect = SectorId(9);
    let node = DiskInode {
        length: 63177,
        map,
    };

    let raw = node.to_sector();
    //Spot-check the wire offsets
    assert_eq!(&raw[0..4], &63177_u32.to_le_bytes());
    assert_eq!(&raw[4..8], &INODE_MAGIC.to_le_bytes());
    assert_eq!(&raw[8..12], &1000_u32.to_le_bytes());
    assert_eq!(&raw[500..504], &7_u32.to_le_bytes());
    assert_eq!(&raw[504..508], &8_u32.to_le_bytes());
    assert_eq!(&raw[508..512], &9_u32.to_le_bytes());

    assert_eq!(DiskInode::from_sector(SectorId(1), &raw).unwrap(), node);
}

#[test]
fn decode_refuses_foreign_sectors() {
    let zeros = [0_u8; SECTOR_SIZE];
    match DiskInode::from_sector(SectorId(4), &zeros) {
        Err(FsError::BadMagic(s)) => assert_eq!(s, SectorId(4)),
        other => panic!("expected a magic failure, got {:?}", other),
    }
}
