use crate::dex::error::DexError;

/// Longest LEB128 encoding of a 64-bit value.
pub(crate) const MAX_LEB128_LEN: usize = 10;

pub(crate) fn encode_uleb128(value: u64) -> Vec<u8> {
    let mut result = Vec::with_capacity(2);
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        if remaining != 0 {
            byte |= 0x80;
        }

        result.push(byte);

        if remaining == 0 {
            break;
        }
    }

    result
}

/// Decodes an unsigned LEB128 value, returning it with the number of bytes consumed.
pub(crate) fn decode_uleb128(encoded: &[u8]) -> Result<(u64, usize), DexError> {
    let mut value: u64 = 0;
    let mut shift: u32 = 0;

    for (count, &byte) in encoded.iter().enumerate() {
        if count == MAX_LEB128_LEN {
            break;
        }
        let low = (byte & 0x7F) as u64;
        if shift == 63 && low > 1 {
            fail!(InvalidFormat, "uleb128 value overflows 64 bits");
        }
        value |= low << shift;
        shift += 7;

        if byte & 0x80 == 0 {
            return Ok((value, count + 1));
        }
    }

    if encoded.len() >= MAX_LEB128_LEN {
        fail!(InvalidFormat, "uleb128 value longer than {} bytes", MAX_LEB128_LEN);
    }
    fail!(InvalidFormat, "Unexpected end of stream reading uleb128");
}

pub(crate) fn encode_sleb128(value: i64) -> Vec<u8> {
    let mut result = Vec::with_capacity(2);
    let mut remaining = value;

    loop {
        let mut byte = (remaining & 0x7F) as u8;
        remaining >>= 7;

        let is_more =
            !((remaining == 0 && (byte & 0x40) == 0) || (remaining == -1 && (byte & 0x40) != 0));
        if is_more {
            byte |= 0x80;
        }

        result.push(byte);

        if !is_more {
            break;
        }
    }

    result
}

/// Decodes a signed LEB128 value, returning it with the number of bytes consumed.
pub(crate) fn decode_sleb128(encoded: &[u8]) -> Result<(i64, usize), DexError> {
    let mut value: i64 = 0;
    let mut shift: u32 = 0;

    for (count, &byte) in encoded.iter().enumerate() {
        if count == MAX_LEB128_LEN {
            break;
        }
        let low = (byte & 0x7F) as i64;
        value |= low.wrapping_shl(shift);
        shift += 7;

        if byte & 0x80 == 0 {
            // Sign-extend if we didn't fill all 64 bits
            if (byte & 0x40) != 0 && shift < 64 {
                value |= (-1i64) << shift;
            }
            return Ok((value, count + 1));
        }
    }

    if encoded.len() >= MAX_LEB128_LEN {
        fail!(InvalidFormat, "sleb128 value longer than {} bytes", MAX_LEB128_LEN);
    }
    fail!(InvalidFormat, "Unexpected end of stream reading sleb128");
}

pub(crate) fn encode_uleb128p1(value: i32) -> Vec<u8> {
    encode_uleb128((value as u32).wrapping_add(1) as u64)
}

pub(crate) fn decode_uleb128p1(encoded: &[u8]) -> Result<(i32, usize), DexError> {
    let (v, c) = decode_uleb128(encoded)?;
    Ok(((v as u32).wrapping_sub(1) as i32, c))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_encode_uleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (127, vec![0x7F]),
            (128, vec![0x80, 0x01]),
            (16256, vec![0x80, 0x7F]),
            (624485, vec![0xE5, 0x8E, 0x26]),
            (0xFFFF_FFFF, vec![0xFF, 0xFF, 0xFF, 0xFF, 0x0F]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_uleb128(value), expected);
        }
    }

    #[test]
    fn test_decode_uleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], 127),
            (vec![0x80, 0x01], 128),
            (vec![0x80, 0x7F], 16256),
            (vec![0xE5, 0x8E, 0x26], 624485),
        ];

        for (encoded, expected) in cases {
            let (v, len) = decode_uleb128(&encoded).unwrap();
            assert_eq!(v, expected);
            assert_eq!(len, encoded.len());
        }
    }

    #[test]
    fn test_encode_sleb128() {
        let cases = vec![
            (0, vec![0x00]),
            (1, vec![0x01]),
            (-1, vec![0x7F]),
            (63, vec![0x3F]),
            (64, vec![0xC0, 0x00]),
            (-64, vec![0x40]),
            (-65, vec![0xBF, 0x7F]),
            (-123456, vec![0xC0, 0xBB, 0x78]),
            (-128, vec![0x80, 0x7F]),
        ];

        for (value, expected) in cases {
            assert_eq!(encode_sleb128(value), expected);
        }
    }

    #[test]
    fn test_decode_sleb128() {
        let cases = vec![
            (vec![0x00], 0),
            (vec![0x01], 1),
            (vec![0x7F], -1),
            (vec![0xFF, 0x00], 127),
            (vec![0x80, 0x7F], -128),
            (vec![0xC0, 0xBB, 0x78], -123456),
        ];

        for (encoded, expected) in cases {
            let (v, _) = decode_sleb128(&encoded).unwrap();
            assert_eq!(v, expected);
        }
    }

    #[test]
    fn test_extremes() {
        for v in [i64::MIN, i64::MAX, i64::MIN + 1, -1, 0] {
            let bytes = encode_sleb128(v);
            assert!(bytes.len() <= MAX_LEB128_LEN);
            assert_eq!(decode_sleb128(&bytes).unwrap(), (v, bytes.len()));
        }
        let bytes = encode_uleb128(u64::MAX);
        assert_eq!(bytes.len(), MAX_LEB128_LEN);
        assert_eq!(decode_uleb128(&bytes).unwrap(), (u64::MAX, MAX_LEB128_LEN));
    }

    #[test]
    fn test_random_roundtrip_is_minimal() {
        let mut rng = rand::thread_rng();
        for _ in 0..2000 {
            let u = rng.gen::<u64>() >> rng.gen_range(0..64);
            let bytes = encode_uleb128(u);
            assert_eq!(decode_uleb128(&bytes).unwrap(), (u, bytes.len()));
            let bits = 64 - u.leading_zeros() as usize;
            assert_eq!(bytes.len(), std::cmp::max(1, (bits + 6) / 7));

            let s = rng.gen::<i64>() >> rng.gen_range(0..64);
            let bytes = encode_sleb128(s);
            assert_eq!(decode_sleb128(&bytes).unwrap(), (s, bytes.len()));
            let bits = 65 - (s ^ (s >> 63)).leading_zeros() as usize;
            assert_eq!(bytes.len(), (bits + 6) / 7);
        }
    }

    #[test]
    fn test_truncated_and_overlong() {
        assert!(decode_uleb128(&[0x80, 0x80]).is_err());
        assert!(decode_sleb128(&[]).is_err());
        assert!(decode_uleb128(&[0xFF; 11]).is_err());
        assert!(decode_uleb128(&[0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x02]).is_err());
    }

    #[test]
    fn test_uleb128p1() {
        assert_eq!(encode_uleb128p1(-1), vec![0x00]);
        assert_eq!(decode_uleb128p1(&[0x00]).unwrap(), (-1, 1));
        assert_eq!(decode_uleb128p1(&encode_uleb128p1(300)).unwrap().0, 300);
    }
}
