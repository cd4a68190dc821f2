//! Minimal-byte integer packing used by `encoded_value`.
//!
//! A packed value is a header byte `type | (byte_count - 1) << 5` followed by
//! `byte_count` little-endian bytes. Signed values are sign-extended on read,
//! unsigned values zero-extended, and floating point values are stored
//! right-zero-extended (the low-order zero bytes are dropped).

use crate::dex::error::DexError;
use crate::dex::read_u1;

pub(crate) const VALUE_ARG_SHIFT: u8 = 5;

fn write_header(buffer: &mut Vec<u8>, value_type: u8, byte_count: usize) {
    buffer.push(value_type | (((byte_count - 1) as u8) << VALUE_ARG_SHIFT));
}

fn write_bytes(buffer: &mut Vec<u8>, mut value: u64, byte_count: usize) {
    for _ in 0..byte_count {
        buffer.push(value as u8);
        value >>= 8;
    }
}

/// Number of bytes needed to hold `value` once sign-extended back to 64 bits.
pub(crate) fn signed_byte_count(value: i64) -> usize {
    let required_bits = 65 - (value ^ (value >> 63)).leading_zeros() as usize;
    (required_bits + 7) >> 3
}

pub(crate) fn unsigned_byte_count(value: u64) -> usize {
    let required_bits = std::cmp::max(1, 64 - value.leading_zeros() as usize);
    (required_bits + 7) >> 3
}

pub(crate) fn right_zero_extended_byte_count(value: u64) -> usize {
    let required_bits = std::cmp::max(1, 64 - value.trailing_zeros() as usize);
    (required_bits + 7) >> 3
}

pub(crate) fn write_signed(buffer: &mut Vec<u8>, value_type: u8, value: i64) {
    let byte_count = signed_byte_count(value);
    write_header(buffer, value_type, byte_count);
    write_bytes(buffer, value as u64, byte_count);
}

pub(crate) fn write_unsigned(buffer: &mut Vec<u8>, value_type: u8, value: u64) {
    let byte_count = unsigned_byte_count(value);
    write_header(buffer, value_type, byte_count);
    write_bytes(buffer, value, byte_count);
}

pub(crate) fn write_right_zero_extended(buffer: &mut Vec<u8>, value_type: u8, value: u64) {
    let byte_count = right_zero_extended_byte_count(value);
    write_header(buffer, value_type, byte_count);
    write_bytes(buffer, value >> (64 - byte_count * 8), byte_count);
}

pub(crate) fn write_float(buffer: &mut Vec<u8>, value_type: u8, value: f32) {
    write_right_zero_extended(buffer, value_type, (value.to_bits() as u64) << 32);
}

pub(crate) fn write_double(buffer: &mut Vec<u8>, value_type: u8, value: f64) {
    write_right_zero_extended(buffer, value_type, value.to_bits());
}

/// Reads `zwidth + 1` bytes into the top of a 64-bit word.
fn read_left_aligned(bytes: &[u8], ix: &mut usize, zwidth: u8) -> Result<u64, DexError> {
    if zwidth > 7 {
        fail!(InvalidFormat, "Invalid encoded value width {}", zwidth as u32 + 1);
    }
    let mut result: u64 = 0;
    for _ in 0..=zwidth {
        result = (result >> 8) | ((read_u1(bytes, ix)? as u64) << 56);
    }
    Ok(result)
}

pub(crate) fn read_signed(bytes: &[u8], ix: &mut usize, zwidth: u8) -> Result<i64, DexError> {
    let raw = read_left_aligned(bytes, ix, zwidth)? as i64;
    Ok(raw >> ((7 - zwidth as u32) * 8))
}

pub(crate) fn read_unsigned(bytes: &[u8], ix: &mut usize, zwidth: u8) -> Result<u64, DexError> {
    let raw = read_left_aligned(bytes, ix, zwidth)?;
    Ok(raw >> ((7 - zwidth as u32) * 8))
}

pub(crate) fn read_right_zero_extended(bytes: &[u8], ix: &mut usize, zwidth: u8) -> Result<u64, DexError> {
    read_left_aligned(bytes, ix, zwidth)
}

pub(crate) fn read_float(bytes: &[u8], ix: &mut usize, zwidth: u8) -> Result<f32, DexError> {
    let bits = read_right_zero_extended(bytes, ix, zwidth)?;
    Ok(f32::from_bits((bits >> 32) as u32))
}

pub(crate) fn read_double(bytes: &[u8], ix: &mut usize, zwidth: u8) -> Result<f64, DexError> {
    Ok(f64::from_bits(read_right_zero_extended(bytes, ix, zwidth)?))
}
