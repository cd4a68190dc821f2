//! `string_data_item` coding: a uleb128 UTF-16 length, modified UTF-8 bytes
//! and a terminating zero.

use std::cmp::Ordering;

use crate::dex::error::DexError;
use crate::dex::{read_uleb128, write_u1, write_uleb128, write_x};

/// Orders strings by UTF-16 code units, the order the string pool is sorted in.
pub fn compare_utf16(a: &str, b: &str) -> Ordering {
    // UTF-8 byte order only differs from UTF-16 order for supplementary characters
    if a.is_ascii() || b.is_ascii() {
        return a.cmp(b);
    }
    a.encode_utf16().cmp(b.encode_utf16())
}

pub fn utf16_length(value: &str) -> usize {
    value.encode_utf16().count()
}

pub(crate) fn write_string_data(buffer: &mut Vec<u8>, value: &str) -> usize {
    let mut c = write_uleb128(buffer, utf16_length(value) as u32);
    let encoded = cesu8::to_java_cesu8(value);
    c += write_x(buffer, &encoded);
    c += write_u1(buffer, 0);
    c
}

pub(crate) fn read_string_data(bytes: &[u8], ix: &mut usize) -> Result<String, DexError> {
    let start = *ix;
    let declared = read_uleb128(bytes, ix)? as usize;
    let data = match bytes.get(*ix..) {
        Some(data) => data,
        None => fail!(InvalidFormat, "String data at {} is out of bounds", start),
    };
    let end = match data.iter().position(|&b| b == 0) {
        Some(end) => end,
        None => fail!(InvalidFormat, "Unterminated string data at {}", start),
    };
    let value = match cesu8::from_java_cesu8(&data[..end]) {
        Ok(value) => value.into_owned(),
        Err(_) => fail!(InvalidFormat, "Invalid MUTF-8 string data at {}", start),
    };
    let actual = utf16_length(&value);
    if actual != declared {
        fail!(
            InvalidFormat,
            "String data at {} declares {} UTF-16 units but holds {}",
            start,
            declared,
            actual
        );
    }
    *ix += end + 1;
    Ok(value)
}
