use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dex::error::DexError;

/// On-disk format versions, newest standard version first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DexVersion {
    /// Multi-file container format.
    Dex041,
    Dex040,
    Dex039,
    Dex038,
    Dex037,
    Dex035,
    /// Compact dex.
    Cdex001,
}

const ALL_VERSIONS: [DexVersion; 7] = [
    DexVersion::Dex041,
    DexVersion::Dex040,
    DexVersion::Dex039,
    DexVersion::Dex038,
    DexVersion::Dex037,
    DexVersion::Dex035,
    DexVersion::Cdex001,
];

impl DexVersion {
    pub const fn magic(&self) -> [u8; 8] {
        match self {
            DexVersion::Dex041 => *b"dex\n041\0",
            DexVersion::Dex040 => *b"dex\n040\0",
            DexVersion::Dex039 => *b"dex\n039\0",
            DexVersion::Dex038 => *b"dex\n038\0",
            DexVersion::Dex037 => *b"dex\n037\0",
            DexVersion::Dex035 => *b"dex\n035\0",
            DexVersion::Cdex001 => *b"cdex001\0",
        }
    }

    pub const fn min_api(&self) -> i32 {
        match self {
            DexVersion::Dex041 => 35,
            DexVersion::Dex040 => 30,
            DexVersion::Dex039 => 28,
            DexVersion::Dex038 => 26,
            DexVersion::Dex037 => 24,
            DexVersion::Dex035 => 1,
            DexVersion::Cdex001 => 28,
        }
    }

    pub const fn is_compact(&self) -> bool {
        matches!(self, DexVersion::Cdex001)
    }

    pub const fn is_container(&self) -> bool {
        matches!(self, DexVersion::Dex041)
    }

    /// True when this standard version is at least `min`. Compact files accept
    /// every version gated instruction.
    pub fn supports(&self, min: DexVersion) -> bool {
        self.is_compact() || *self <= min
    }

    /// Newest single-file standard version usable at `api`.
    pub fn for_api(api: i32) -> Result<DexVersion, DexError> {
        for version in ALL_VERSIONS {
            if version.is_compact() || version.is_container() {
                continue;
            }
            if api >= version.min_api() {
                return Ok(version);
            }
        }
        fail!(UnsupportedTarget, "Can`t find dex version for api {}", api);
    }

    pub fn for_magic(magic: &[u8]) -> Result<DexVersion, DexError> {
        if magic.len() != 8 {
            fail!(NotADex, "invalid magic length: {}", magic.len());
        }
        for version in ALL_VERSIONS {
            if &version.magic()[..] == magic {
                return Ok(version);
            }
        }
        fail!(NotADex, "Unknown dex version: {:02x?}", magic);
    }
}

impl fmt::Display for DexVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magic = self.magic();
        let text = if self.is_compact() { &magic[..7] } else { &magic[4..7] };
        let prefix = if self.is_compact() { "" } else { "dex " };
        write!(f, "{}{}", prefix, String::from_utf8_lossy(text))
    }
}
