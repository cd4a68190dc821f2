use crate::dex::dex_file::*;
use crate::dex::error::DexErrorKind;
use crate::dex::model::Dex;
use crate::dex::options::ReadOptions;
use crate::dex::reader::DexReader;
use crate::{read_dex, write_dex};

use super::roundtrip::sample_dex;
use super::*;

fn one_class() -> Vec<u8> {
    write_dex(&Dex::new(vec![public_class("LA;")])).unwrap()
}

#[test]
fn foreign_bytes_are_not_dex() {
    assert_eq!(read_dex(b"PK\x03\x04 this is a zip archive, not a dex file").unwrap_err().kind(), DexErrorKind::NotADex);
    assert_eq!(read_dex(&[]).unwrap_err().kind(), DexErrorKind::NotADex);
    let bytes = one_class();
    assert_eq!(read_dex(&bytes[..0x40]).unwrap_err().kind(), DexErrorKind::NotADex);
}

#[test]
fn truncated_file_is_invalid() {
    let bytes = one_class();
    let err = read_dex(&bytes[..bytes.len() - 8]).unwrap_err();
    assert_eq!(err.kind(), DexErrorKind::InvalidFormat);
    assert!(err.to_string().contains("Truncated dex file"), "{}", err);
}

#[test]
fn checksum_mismatch_still_reads() {
    let mut bytes = write_dex(&sample_dex()).unwrap();
    bytes[SIGNATURE_OFFSET] ^= 0xff;
    assert_eq!(read_dex(&bytes).unwrap(), sample_dex());
}

#[test]
fn bad_type_index_names_the_class_def() {
    let mut bytes = one_class();
    let class_def = u4_at(&bytes, 100) as usize;
    bytes[class_def..class_def + 4].copy_from_slice(&999u32.to_le_bytes());
    let err = read_dex(&bytes).unwrap_err();
    assert_eq!(err.kind(), DexErrorKind::Bounds);
    let message = err.to_string();
    assert!(message.contains("999") && message.contains("class def 0"), "{}", message);
}

#[test]
fn unknown_map_type_is_invalid() {
    let mut bytes = one_class();
    let map_off = u4_at(&bytes, 52) as usize;
    let count = u4_at(&bytes, map_off) as usize;
    let entry = (0..count)
        .map(|i| map_off + 4 + i * MAP_ITEM_SIZE)
        .find(|&at| u16::from_le_bytes([bytes[at], bytes[at + 1]]) == TYPE_STRING_DATA_ITEM)
        .unwrap();
    bytes[entry..entry + 2].copy_from_slice(&0x2010u16.to_le_bytes());
    let err = DexReader::new(&bytes, 0, &ReadOptions::default()).err().unwrap();
    assert_eq!(err.kind(), DexErrorKind::InvalidFormat);
    assert!(err.to_string().contains("Unknown map item type 0x2010"), "{}", err);
}

#[test]
fn classes_read_one_at_a_time() {
    let dex = Dex::new(vec![public_class("LA;"), public_class("LB;")]);
    let bytes = write_dex(&dex).unwrap();
    let reader = DexReader::new(&bytes, 0, &ReadOptions::default()).unwrap();
    assert_eq!(reader.class_count(), 2);
    assert_eq!(reader.read_class(1).unwrap(), dex.classes[1]);
    assert_eq!(reader.read_class(2).unwrap_err().kind(), DexErrorKind::Bounds);
}
