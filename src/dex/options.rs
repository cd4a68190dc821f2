use serde::{Deserialize, Serialize};

use crate::dex::error::DexError;
use crate::dex::version::DexVersion;

pub const MIN_TARGET_API: i32 = 1;
pub const MAX_TARGET_API: i32 = 35;
pub const FIRST_ART_TARGET: i32 = 19;
pub const LAST_DALVIK_TARGET: i32 = 20;

/// Target platform description shared by reading and writing. It decides
/// which opcode table is used and which optional sections exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct DexOptions {
    pub target_api: i32,
    pub target_art: bool,
    pub allow_odex_instructions: bool,
    pub hidden_api_flags: bool,
    pub debug_info: bool,
}

impl Default for DexOptions {
    fn default() -> Self {
        DexOptions {
            target_api: 26,
            target_art: true,
            allow_odex_instructions: false,
            hidden_api_flags: true,
            debug_info: true,
        }
    }
}

impl DexOptions {
    pub fn new(target_api: i32, target_art: bool, allow_odex_instructions: bool) -> Result<Self, DexError> {
        let options = DexOptions {
            target_api,
            target_art,
            allow_odex_instructions,
            ..DexOptions::default()
        };
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), DexError> {
        if self.target_api < MIN_TARGET_API || self.target_api > MAX_TARGET_API {
            fail!(UnsupportedTarget, "Unsupported target api: {}", self.target_api);
        }
        if self.target_art && self.target_api < FIRST_ART_TARGET {
            fail!(UnsupportedTarget, "ART is not available at api {}", self.target_api);
        }
        if !self.target_art && self.target_api > LAST_DALVIK_TARGET {
            fail!(UnsupportedTarget, "Dalvik is not available at api {}", self.target_api);
        }
        Ok(())
    }

    pub fn with_target_api(self, target_api: i32) -> Result<Self, DexError> {
        let options = DexOptions { target_api, ..self };
        options.validate()?;
        Ok(options)
    }

    pub fn with_art(self, target_art: bool) -> Result<Self, DexError> {
        let options = DexOptions { target_art, ..self };
        options.validate()?;
        Ok(options)
    }

    pub fn with_odex_instructions(self, allow_odex_instructions: bool) -> Self {
        DexOptions { allow_odex_instructions, ..self }
    }

    pub fn with_hidden_api_flags(self, hidden_api_flags: bool) -> Self {
        DexOptions { hidden_api_flags, ..self }
    }

    pub fn with_debug_info(self, debug_info: bool) -> Self {
        DexOptions { debug_info, ..self }
    }

    pub fn require_min_api(&self, min_api: i32) -> Result<(), DexError> {
        if self.target_api < min_api {
            fail!(UnsupportedTarget, "Target api {} is below the required {}", self.target_api, min_api);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadOptions {
    pub dex: DexOptions,
}

impl ReadOptions {
    pub fn new(dex: DexOptions) -> Result<Self, DexError> {
        dex.validate()?;
        Ok(ReadOptions { dex })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    pub dex: DexOptions,
    pub version: DexVersion,
}

impl Default for WriteOptions {
    fn default() -> Self {
        let dex = DexOptions::default();
        // api 26 always has a standard version
        let version = DexVersion::for_api(dex.target_api).unwrap_or(DexVersion::Dex038);
        WriteOptions { dex, version }
    }
}

impl WriteOptions {
    pub fn new(dex: DexOptions, version: DexVersion) -> Result<Self, DexError> {
        let options = WriteOptions { dex, version };
        options.validate()?;
        Ok(options)
    }

    /// Options writing the newest standard version available at the target api.
    pub fn for_target(dex: DexOptions) -> Result<Self, DexError> {
        dex.validate()?;
        let version = DexVersion::for_api(dex.target_api)?;
        WriteOptions::new(dex, version)
    }

    pub fn with_version(self, version: DexVersion) -> Result<Self, DexError> {
        WriteOptions::new(self.dex, version)
    }

    pub fn validate(&self) -> Result<(), DexError> {
        self.dex.validate()?;
        self.dex.require_min_api(self.version.min_api())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;

    #[test]
    fn defaults_are_valid() {
        let options = WriteOptions::default();
        assert!(options.validate().is_ok());
        assert_eq!(options.version, DexVersion::Dex038);
        assert!(options.dex.debug_info);
        assert!(!options.dex.allow_odex_instructions);
    }

    #[test]
    fn api_limits() {
        assert!(DexOptions::new(0, false, false).is_err());
        assert!(DexOptions::new(36, true, false).is_err());
        assert!(DexOptions::new(10, true, false).is_err());
        assert!(DexOptions::new(21, false, false).is_err());
        assert!(DexOptions::new(19, false, true).is_ok());
        assert!(DexOptions::new(20, true, true).is_ok());
    }

    #[test]
    fn version_requires_api() {
        let dex = DexOptions::new(24, true, false).unwrap();
        let err = WriteOptions::new(dex, DexVersion::Dex039).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::UnsupportedTarget);
        assert_eq!(WriteOptions::for_target(dex).unwrap().version, DexVersion::Dex037);
        let dex = dex.with_target_api(28).unwrap();
        assert!(WriteOptions::new(dex, DexVersion::Cdex001).is_ok());
    }
}
