//! Hidden API restriction flags.
//!
//! API 28 hides two bits inside the member access flags. Later versions keep
//! one uleb128 per member in a `hiddenapi_class_data_item` section.

use log::debug;

use crate::dex::dex_file::{ACC_NATIVE, ACC_VISIBILITY_MASK, DEFAULT_ALIGNMENT, NO_OFFSET};
use crate::dex::error::DexError;
use crate::dex::{fill_to_alignment, overwrite_u4, read_u4, read_uleb128, write_u4, write_uleb128};

pub const HIDDENAPI_FLAG_SDK: u32 = 0;
pub const HIDDENAPI_FLAG_UNSUPPORTED: u32 = 1;
pub const HIDDENAPI_FLAG_BLOCKED: u32 = 2;
pub const HIDDENAPI_FLAG_MAX_TARGET_O: u32 = 3;
pub const HIDDENAPI_FLAG_MAX_TARGET_P: u32 = 4;
pub const HIDDENAPI_FLAG_MAX_TARGET_Q: u32 = 5;
pub const HIDDENAPI_FLAG_MAX_TARGET_R: u32 = 6;
pub const HIDDENAPI_FLAG_MAX_TARGET_S: u32 = 7;

/// The API level that packs flags into access flags.
pub const LEGACY_HIDDENAPI_API: i32 = 28;

// Legacy list values, in the order of their two-bit encoding
const LEGACY_WHITELIST: u32 = 0;
const LEGACY_LIGHT_GREYLIST: u32 = 1;
const LEGACY_DARK_GREYLIST: u32 = 2;
const LEGACY_BLACKLIST: u32 = 3;

/// Bit 5 for fields and non-native methods, bit 9 for native methods.
fn second_flag(access_flags: u32) -> u32 {
    if access_flags & ACC_NATIVE == 0 {
        0x20
    } else {
        0x200
    }
}

/// Folds hidden API flags into access flags for API 28.
pub fn encode_legacy(access_flags: u32, hidden_api_flags: u32) -> Result<u32, DexError> {
    let legacy = match hidden_api_flags {
        HIDDENAPI_FLAG_SDK => LEGACY_WHITELIST,
        HIDDENAPI_FLAG_UNSUPPORTED => LEGACY_LIGHT_GREYLIST,
        HIDDENAPI_FLAG_MAX_TARGET_O => LEGACY_DARK_GREYLIST,
        HIDDENAPI_FLAG_BLOCKED => LEGACY_BLACKLIST,
        other => fail!(UnsupportedTarget, "Invalid hidden api flag for api 28: {}", other),
    };
    let mut access_flags = access_flags;
    if legacy & 0x1 != 0 {
        access_flags ^= ACC_VISIBILITY_MASK;
    }
    if legacy & 0x2 != 0 {
        access_flags |= second_flag(access_flags);
    }
    Ok(access_flags)
}

/// Splits API 28 access flags into the real access flags and the hidden
/// API flags.
pub fn decode_legacy(access_flags: u32) -> (u32, u32) {
    let mut access_flags = access_flags;
    let mut legacy = 0;
    let visibility = access_flags & ACC_VISIBILITY_MASK;
    // at most one visibility bit can be set on a real member
    if visibility & visibility.wrapping_sub(1) != 0 {
        access_flags ^= ACC_VISIBILITY_MASK;
        legacy |= 0x1;
    }
    let second = second_flag(access_flags);
    if access_flags & second != 0 {
        access_flags &= !second;
        legacy |= 0x2;
    }
    let flags = match legacy {
        LEGACY_WHITELIST => HIDDENAPI_FLAG_SDK,
        LEGACY_LIGHT_GREYLIST => HIDDENAPI_FLAG_UNSUPPORTED,
        LEGACY_DARK_GREYLIST => HIDDENAPI_FLAG_MAX_TARGET_O,
        _ => HIDDENAPI_FLAG_BLOCKED,
    };
    (access_flags, flags)
}

/// Appends a `hiddenapi_class_data_item`. `classes` holds the member flags
/// of each class in class-data order, or `None` when all are zero. Returns
/// the section start.
pub(crate) fn write_section(bytes: &mut Vec<u8>, classes: &[Option<Vec<u32>>]) -> usize {
    fill_to_alignment(bytes, DEFAULT_ALIGNMENT);
    let start = bytes.len();
    write_u4(bytes, 0);
    let offsets = bytes.len();
    bytes.resize(offsets + classes.len() * 4, 0);
    for (i, flags) in classes.iter().enumerate() {
        let Some(flags) = flags else { continue };
        let here = (bytes.len() - start) as u32;
        overwrite_u4(bytes, offsets + i * 4, here);
        for &f in flags {
            write_uleb128(bytes, f);
        }
    }
    let size = (bytes.len() - start) as u32;
    overwrite_u4(bytes, start, size);
    debug!("hidden api section at {:#x}: {} bytes", start, size);
    start
}

/// Cursor over the flags of one class; yields zeros when the class has none.
pub(crate) struct ClassFlags<'a> {
    bytes: &'a [u8],
    ix: Option<usize>,
}

impl<'a> ClassFlags<'a> {
    pub(crate) fn none() -> ClassFlags<'static> {
        ClassFlags { bytes: &[], ix: None }
    }

    /// Locates the flags of `class_idx` in the section at `section_off`.
    pub(crate) fn locate(bytes: &'a [u8], section_off: usize, class_idx: usize) -> Result<ClassFlags<'a>, DexError> {
        if section_off == NO_OFFSET as usize {
            return Ok(ClassFlags { bytes, ix: None });
        }
        let mut ix = section_off;
        let size = read_u4(bytes, &mut ix)? as usize;
        let mut entry = section_off + 4 + class_idx * 4;
        if entry + 4 > section_off + size {
            fail!(InvalidFormat, "Class {} is past the hidden api section of {} bytes", class_idx, size);
        }
        let flags_offset = read_u4(bytes, &mut entry)? as usize;
        if flags_offset == NO_OFFSET as usize {
            return Ok(ClassFlags { bytes, ix: None });
        }
        Ok(ClassFlags { bytes, ix: Some(section_off + flags_offset) })
    }

    pub(crate) fn next_flags(&mut self) -> Result<u32, DexError> {
        match self.ix.as_mut() {
            Some(ix) => read_uleb128(self.bytes, ix),
            None => Ok(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::dex_file::{ACC_PRIVATE, ACC_PUBLIC, ACC_STATIC};
    use crate::dex::error::DexErrorKind;

    #[test]
    fn legacy_roundtrip() {
        let flags = [
            HIDDENAPI_FLAG_SDK,
            HIDDENAPI_FLAG_UNSUPPORTED,
            HIDDENAPI_FLAG_MAX_TARGET_O,
            HIDDENAPI_FLAG_BLOCKED,
        ];
        for access in [ACC_PUBLIC, ACC_PRIVATE | ACC_STATIC, 0, ACC_PUBLIC | ACC_NATIVE] {
            for &hidden in &flags {
                let packed = encode_legacy(access, hidden).unwrap();
                assert_eq!(decode_legacy(packed), (access, hidden), "{:#x} {}", access, hidden);
            }
        }
    }

    #[test]
    fn legacy_bits() {
        // light greylist flips visibility
        assert_eq!(encode_legacy(ACC_PUBLIC, HIDDENAPI_FLAG_UNSUPPORTED).unwrap(), ACC_PRIVATE | 0x4);
        // dark greylist sets bit 9 on a native method
        assert_eq!(encode_legacy(ACC_NATIVE, HIDDENAPI_FLAG_MAX_TARGET_O).unwrap(), ACC_NATIVE | 0x200);
        let err = encode_legacy(0, HIDDENAPI_FLAG_MAX_TARGET_P).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::UnsupportedTarget);
    }

    #[test]
    fn section_roundtrip() {
        let classes = vec![Some(vec![0, 1, 300]), None, Some(vec![2])];
        let mut bytes = vec![0xaa];
        let start = write_section(&mut bytes, &classes);
        assert_eq!(start, 4);
        assert_eq!(&bytes[8..12], &[16, 0, 0, 0]);
        assert_eq!(&bytes[12..16], &[0, 0, 0, 0]);

        let mut first = ClassFlags::locate(&bytes, start, 0).unwrap();
        let read: Vec<u32> = (0..3).map(|_| first.next_flags().unwrap()).collect();
        assert_eq!(read, vec![0, 1, 300]);
        let mut second = ClassFlags::locate(&bytes, start, 1).unwrap();
        assert_eq!(second.next_flags().unwrap(), 0);
        let mut third = ClassFlags::locate(&bytes, start, 2).unwrap();
        assert_eq!(third.next_flags().unwrap(), 2);
        assert_eq!(ClassFlags::none().next_flags().unwrap(), 0);
    }
}
