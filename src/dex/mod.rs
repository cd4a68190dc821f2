#[macro_use]
pub mod error;

pub(crate) mod leb;
pub(crate) mod value_coder;
pub mod mutf8;
pub mod dex_file;
pub mod version;
pub mod options;
pub mod opcode_format;
pub mod opcodes;
pub mod ids;
pub mod encoded_values;
pub mod annotations;
pub mod instructions;
pub(crate) mod instruction_codec;
pub mod debug_info;
pub mod model;
pub(crate) mod code_item;
pub(crate) mod hidden_api;
pub(crate) mod pools;
pub(crate) mod collector;
pub mod reader;
pub mod writer;

use crate::dex::error::DexError;
use crate::dex::leb::{decode_sleb128, decode_uleb128, decode_uleb128p1, encode_sleb128, encode_uleb128, encode_uleb128p1};

// Basic type reading and writing
pub(crate) fn read_u1(bytes: &[u8], ix: &mut usize) -> Result<u8, DexError>
{
    if bytes.len() < *ix + 1
    {
        fail!(InvalidFormat, "Unexpected end of stream reading u1 at index {}", *ix);
    }
    let result = bytes[*ix];
    *ix += 1;
    Ok(result)
}

pub(crate) fn read_u2(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError>
{
    if bytes.len() < *ix + 2
    {
        fail!(InvalidFormat, "Unexpected end of stream reading u2 at index {}", *ix);
    }
    let result = ((bytes[*ix + 1] as u16) << 8) | (bytes[*ix] as u16);
    *ix += 2;
    Ok(result)
}

pub(crate) fn read_u4(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    if bytes.len() < *ix + 4
    {
        fail!(InvalidFormat, "Unexpected end of stream reading u4 at index {}", *ix);
    }
    let result =
        ((bytes[*ix + 3] as u32) << 24) | ((bytes[*ix + 2] as u32) << 16) | ((bytes[*ix + 1] as u32) << 8) | (bytes[*ix] as u32);
    *ix += 4;
    Ok(result)
}

pub(crate) fn read_u8(bytes: &[u8], ix: &mut usize) -> Result<u64, DexError>
{
    let lo = read_u4(bytes, ix)? as u64;
    let hi = read_u4(bytes, ix)? as u64;
    Ok(lo | (hi << 32))
}

fn remaining(bytes: &[u8], ix: usize) -> Result<&[u8], DexError>
{
    match bytes.get(ix..)
    {
        Some(rest) => Ok(rest),
        None => fail!(InvalidFormat, "Unexpected end of stream at index {}", ix),
    }
}

/// Reads a uleb128 that must fit in 32 bits, as every dex count and index does.
pub(crate) fn read_uleb128(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError>
{
    let (val, size) = decode_uleb128(remaining(bytes, *ix)?)?;
    if val > u32::MAX as u64
    {
        fail!(InvalidFormat, "uleb128 value {} at index {} exceeds 32 bits", val, *ix);
    }
    *ix += size;
    Ok(val as u32)
}

pub(crate) fn read_sleb128(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    let (val, size) = decode_sleb128(remaining(bytes, *ix)?)?;
    if val < i32::MIN as i64 || val > i32::MAX as i64
    {
        fail!(InvalidFormat, "sleb128 value {} at index {} exceeds 32 bits", val, *ix);
    }
    *ix += size;
    Ok(val as i32)
}

pub(crate) fn read_uleb128p1(bytes: &[u8], ix: &mut usize) -> Result<i32, DexError>
{
    let (val, size) = decode_uleb128p1(remaining(bytes, *ix)?)?;
    *ix += size;
    Ok(val)
}

pub(crate) fn read_x(bytes: &[u8], ix: &mut usize, length: usize) -> Result<Vec<u8>, DexError>
{
    if bytes.len() >= *ix && bytes.len() - *ix >= length
    {
        let mut v = Vec::with_capacity(length + 1);
        v.extend_from_slice(&bytes[*ix..*ix + length]);
        *ix += length;
        Ok(v)
    }
    else
    {
        fail!(InvalidFormat, "buffer too short for array read of {} bytes at index {}", length, *ix)
    }
}

pub(crate) fn write_u1(buffer: &mut Vec<u8>, val: u8) -> usize
{
    buffer.push(val);
    1
}

pub(crate) fn write_u2(buffer: &mut Vec<u8>, val: u16) -> usize
{
    buffer.push(val as u8);
    buffer.push((val >> 8) as u8);
    2
}

pub(crate) fn write_u4(buffer: &mut Vec<u8>, val: u32) -> usize
{
    for i in 0..4
    {
        buffer.push((val >> (i * 8)) as u8);
    }
    4
}

pub(crate) fn write_uleb128(buffer: &mut Vec<u8>, val: u32) -> usize
{
    let encoded = encode_uleb128(val as u64);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_sleb128(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_sleb128(val as i64);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_uleb128p1(buffer: &mut Vec<u8>, val: i32) -> usize
{
    let encoded = encode_uleb128p1(val);
    let c = encoded.len();
    buffer.extend(encoded);
    c
}

pub(crate) fn write_x(buffer: &mut Vec<u8>, val: &[u8]) -> usize
{
    let len = val.len();
    buffer.extend(val);
    len
}

/// Pads `buffer` with zeros until its length is a multiple of `alignment`.
pub(crate) fn fill_to_alignment(buffer: &mut Vec<u8>, alignment: usize)
{
    let aligned = align_to(buffer.len(), alignment);
    buffer.resize(aligned, 0);
}

pub(crate) fn align_to(value: usize, alignment: usize) -> usize
{
    if alignment <= 1
    {
        return value;
    }
    let mask = alignment - 1;
    (value + mask) & !mask
}

pub(crate) fn overwrite_u2(buffer: &mut [u8], position: usize, value: u16)
{
    buffer[position..position + 2].copy_from_slice(&value.to_le_bytes());
}

pub(crate) fn overwrite_u4(buffer: &mut [u8], position: usize, value: u32)
{
    buffer[position..position + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn read_write_fixed_width()
    {
        let mut buf = Vec::new();
        write_u1(&mut buf, 0xab);
        write_u2(&mut buf, 0x1234);
        write_u4(&mut buf, 0xdeadbeef);
        assert_eq!(buf, vec![0xab, 0x34, 0x12, 0xef, 0xbe, 0xad, 0xde]);

        let mut ix = 0;
        assert_eq!(read_u1(&buf, &mut ix).unwrap(), 0xab);
        assert_eq!(read_u2(&buf, &mut ix).unwrap(), 0x1234);
        assert_eq!(read_u4(&buf, &mut ix).unwrap(), 0xdeadbeef);
        assert!(read_u1(&buf, &mut ix).is_err());
    }

    #[test]
    fn leb_helpers_bound_check()
    {
        let mut buf = Vec::new();
        write_uleb128(&mut buf, 300);
        write_sleb128(&mut buf, -2);
        write_uleb128p1(&mut buf, -1);
        let mut ix = 0;
        assert_eq!(read_uleb128(&buf, &mut ix).unwrap(), 300);
        assert_eq!(read_sleb128(&buf, &mut ix).unwrap(), -2);
        assert_eq!(read_uleb128p1(&buf, &mut ix).unwrap(), -1);
        assert!(read_uleb128(&buf, &mut ix).is_err());
        let mut far = 100;
        assert!(read_uleb128(&buf, &mut far).is_err());
    }

    #[test]
    fn alignment()
    {
        assert_eq!(align_to(0, 4), 0);
        assert_eq!(align_to(5, 4), 8);
        assert_eq!(align_to(7, 1), 7);
        let mut buf = vec![1, 2, 3];
        fill_to_alignment(&mut buf, 4);
        assert_eq!(buf, vec![1, 2, 3, 0]);
    }
}
