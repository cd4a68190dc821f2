use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::debug;
use once_cell::sync::Lazy;

use crate::dex::error::DexError;
use crate::dex::opcode_format::{Format, Opcode, OpcodeFlags, ReferenceType, VersionConstraint};
use crate::dex::opcode_format::Format::*;
use crate::dex::version::DexVersion;

const NONE: OpcodeFlags = OpcodeFlags::empty();
const THROW: OpcodeFlags = OpcodeFlags::CAN_THROW;
const ODEX: OpcodeFlags = OpcodeFlags::ODEX_ONLY.union(OpcodeFlags::CAN_THROW);
const RETURN: OpcodeFlags = OpcodeFlags::RETURN.union(OpcodeFlags::ENDS_FLOW);
const INVOKE: OpcodeFlags = OpcodeFlags::INVOKE.union(OpcodeFlags::CAN_THROW);
const BRANCH: OpcodeFlags = OpcodeFlags::BRANCH;
const GOTO: OpcodeFlags = OpcodeFlags::BRANCH.union(OpcodeFlags::UNCONDITIONAL).union(OpcodeFlags::ENDS_FLOW);
const INIT: OpcodeFlags = INVOKE.union(OpcodeFlags::CAN_INITIALIZE_REFERENCE);

fn op(value: u16, name: &'static str, format: Format, flags: OpcodeFlags) -> Opcode {
    Opcode::plain(value, name, format, flags)
}

fn rop(value: u16, name: &'static str, format: Format, reference: ReferenceType) -> Opcode {
    let flags = if matches!(format, Format35c | Format3rc) { INVOKE } else { THROW };
    Opcode::referencing(value, name, format, reference, flags)
}

/// Odex opcode whose raw value differs between Dalvik (all apis) and ART (up to api 30).
fn quick(dalvik: u16, art: u16, name: &'static str, format: Format, flags: OpcodeFlags) -> Opcode {
    Opcode::new(
        Opcode::combine(
            Opcode::only_dalvik(Opcode::all_apis(dalvik)),
            Opcode::only_art(Opcode::last_api(art, 30)),
        ),
        name,
        ReferenceType::RawIndex,
        ReferenceType::None,
        format,
        flags | OpcodeFlags::ODEX_ONLY,
    )
}

fn dalvik(
    constraints: Vec<VersionConstraint>,
    name: &'static str,
    format: Format,
    reference: ReferenceType,
    flags: OpcodeFlags,
) -> Opcode {
    Opcode::new(Opcode::only_dalvik(constraints), name, reference, ReferenceType::None, format, flags | OpcodeFlags::ODEX_ONLY)
}

fn art_quick(value: u16, name: &'static str) -> Opcode {
    Opcode::new(
        Opcode::only_art(Opcode::between_api(value, 23, 30)),
        name,
        ReferenceType::RawIndex,
        ReferenceType::None,
        Format22c,
        ODEX,
    )
}

pub(crate) static OPCODES: Lazy<Vec<Opcode>> = Lazy::new(|| {
    use ReferenceType::{CallSite, Field, Method, MethodHandle, MethodProto, RawIndex, Type};
    let mut opcodes = vec![
        op(0x00, "nop", Format10x, NONE),
        op(0x01, "move", Format12x, NONE),
        op(0x02, "move/from16", Format22x, NONE),
        op(0x03, "move/16", Format32x, NONE),
        op(0x04, "move-wide", Format12x, NONE),
        op(0x05, "move-wide/from16", Format22x, NONE),
        op(0x06, "move-wide/16", Format32x, NONE),
        op(0x07, "move-object", Format12x, NONE),
        op(0x08, "move-object/from16", Format22x, NONE),
        op(0x09, "move-object/16", Format32x, NONE),
        op(0x0a, "move-result", Format11x, NONE),
        op(0x0b, "move-result-wide", Format11x, NONE),
        op(0x0c, "move-result-object", Format11x, NONE),
        op(0x0d, "move-exception", Format11x, NONE),
        op(0x0e, "return-void", Format10x, RETURN),
        op(0x0f, "return", Format11x, RETURN),
        op(0x10, "return-wide", Format11x, RETURN),
        op(0x11, "return-object", Format11x, RETURN),
        op(0x12, "const/4", Format11n, NONE),
        op(0x13, "const/16", Format21s, NONE),
        op(0x14, "const", Format31i, NONE),
        op(0x15, "const/high16", Format21ih, NONE),
        op(0x16, "const-wide/16", Format21s, NONE),
        op(0x17, "const-wide/32", Format31i, NONE),
        op(0x18, "const-wide", Format51l, NONE),
        op(0x19, "const-wide/high16", Format21lh, NONE),
        rop(0x1a, "const-string", Format21c, ReferenceType::String),
        rop(0x1b, "const-string/jumbo", Format31c, ReferenceType::String),
        rop(0x1c, "const-class", Format21c, Type),
        op(0x1d, "monitor-enter", Format11x, THROW),
        op(0x1e, "monitor-exit", Format11x, THROW),
        rop(0x1f, "check-cast", Format21c, Type),
        rop(0x20, "instance-of", Format22c, Type),
        op(0x21, "array-length", Format12x, THROW),
        rop(0x22, "new-instance", Format21c, Type),
        rop(0x23, "new-array", Format22c, Type),
        Opcode::referencing(0x24, "filled-new-array", Format35c, Type, THROW),
        Opcode::referencing(0x25, "filled-new-array/range", Format3rc, Type, THROW),
        op(0x26, "fill-array-data", Format31t, THROW | OpcodeFlags::HAS_PAYLOAD),
        op(0x27, "throw", Format11x, THROW | OpcodeFlags::ENDS_FLOW),
        op(0x28, "goto", Format10t, GOTO),
        op(0x29, "goto/16", Format20t, GOTO),
        op(0x2a, "goto/32", Format30t, GOTO),
        op(0x2b, "packed-switch", Format31t, OpcodeFlags::HAS_PAYLOAD | OpcodeFlags::SWITCH),
        op(0x2c, "sparse-switch", Format31t, OpcodeFlags::HAS_PAYLOAD | OpcodeFlags::SWITCH),
        op(0x2d, "cmpl-float", Format23x, NONE),
        op(0x2e, "cmpg-float", Format23x, NONE),
        op(0x2f, "cmpl-double", Format23x, NONE),
        op(0x30, "cmpg-double", Format23x, NONE),
        op(0x31, "cmp-long", Format23x, NONE),
    ];

    for (i, name) in ["if-eq", "if-ne", "if-lt", "if-ge", "if-gt", "if-le"].into_iter().enumerate() {
        opcodes.push(op(0x32 + i as u16, name, Format22t, BRANCH));
    }
    for (i, name) in ["if-eqz", "if-nez", "if-ltz", "if-gez", "if-gtz", "if-lez"].into_iter().enumerate() {
        opcodes.push(op(0x38 + i as u16, name, Format21t, BRANCH));
    }

    // 3e - 43 unused

    let access: [(&'static [&'static str; 14], u16, Format, Option<ReferenceType>); 3] = [
        (&ARRAY_OPS, 0x44, Format23x, None),
        (&INSTANCE_OPS, 0x52, Format22c, Some(Field)),
        (&STATIC_OPS, 0x60, Format21c, Some(Field)),
    ];
    for (names, base, format, reference) in access {
        for (i, name) in names.iter().copied().enumerate() {
            let value = base + i as u16;
            opcodes.push(match reference {
                Some(reference) => rop(value, name, format, reference),
                None => op(value, name, format, THROW),
            });
        }
    }

    opcodes.extend([
        rop(0x6e, "invoke-virtual", Format35c, Method),
        rop(0x6f, "invoke-super", Format35c, Method),
        Opcode::referencing(0x70, "invoke-direct", Format35c, Method, INIT),
        rop(0x71, "invoke-static", Format35c, Method),
        rop(0x72, "invoke-interface", Format35c, Method),
        // 73 unused
        rop(0x74, "invoke-virtual/range", Format3rc, Method),
        rop(0x75, "invoke-super/range", Format3rc, Method),
        Opcode::referencing(0x76, "invoke-direct/range", Format3rc, Method, INIT),
        rop(0x77, "invoke-static/range", Format3rc, Method),
        rop(0x78, "invoke-interface/range", Format3rc, Method),
        // 79 - 7a unused
    ]);

    for (i, name) in UNARY_OPS.into_iter().enumerate() {
        opcodes.push(op(0x7b + i as u16, name, Format12x, NONE));
    }
    for (i, name) in BINARY_OPS.into_iter().enumerate() {
        let flags = if name.starts_with("div-int") || name.starts_with("rem-int")
            || name.starts_with("div-long") || name.starts_with("rem-long") { THROW } else { NONE };
        opcodes.push(op(0x90 + i as u16, name, Format23x, flags));
        let two_addr: &'static str = TWO_ADDR_OPS[i];
        opcodes.push(op(0xb0 + i as u16, two_addr, Format12x, flags));
    }
    for (i, name) in LIT16_OPS.into_iter().enumerate() {
        let flags = if i == 3 || i == 4 { THROW } else { NONE };
        opcodes.push(op(0xd0 + i as u16, name, Format22s, flags));
    }
    for (i, name) in LIT8_OPS.into_iter().enumerate() {
        let flags = if i == 3 || i == 4 { THROW } else { NONE };
        opcodes.push(op(0xd8 + i as u16, name, Format22b, flags));
    }

    // e3 - f9 unused outside odex files

    opcodes.extend([
        Opcode::new(Opcode::first_api(0xfa, 26), "invoke-polymorphic", Method, MethodProto, Format45cc, INVOKE)
            .since_dex(DexVersion::Dex038),
        Opcode::new(Opcode::first_api(0xfb, 26), "invoke-polymorphic/range", Method, MethodProto, Format4rcc, INVOKE)
            .since_dex(DexVersion::Dex038),
        Opcode::new(Opcode::first_api(0xfc, 26), "invoke-custom", CallSite, ReferenceType::None, Format35c, INVOKE)
            .since_dex(DexVersion::Dex038),
        Opcode::new(Opcode::first_api(0xfd, 26), "invoke-custom/range", CallSite, ReferenceType::None, Format3rc, INVOKE)
            .since_dex(DexVersion::Dex038),
        Opcode::new(Opcode::first_api(0xfe, 28), "const-method-handle", MethodHandle, ReferenceType::None, Format21c, THROW)
            .since_dex(DexVersion::Dex039),
        Opcode::new(Opcode::first_api(0xff, 28), "const-method-type", MethodProto, ReferenceType::None, Format21c, THROW)
            .since_dex(DexVersion::Dex039),

        op(0x100, "packed-switch-payload", PackedSwitchPayload, NONE),
        op(0x200, "sparse-switch-payload", SparseSwitchPayload, NONE),
        op(0x300, "array-payload", ArrayPayload, NONE),

        // odex opcodes
        dalvik(Opcode::all_apis(0xee), "execute-inline", Format35c, RawIndex, INVOKE),
        dalvik(Opcode::first_api(0xef, 8), "execute-inline/range", Format3rc, RawIndex, INVOKE),
        dalvik(Opcode::last_api(0xf0, 13), "invoke-direct-empty", Format35c, Method, INIT),
        dalvik(Opcode::first_api(0xf0, 14), "invoke-object-init/range", Format3rc, Method, INIT),

        quick(0xf2, 0xe3, "iget-quick", Format22c, THROW),
        quick(0xf3, 0xe4, "iget-wide-quick", Format22c, THROW),
        quick(0xf4, 0xe5, "iget-object-quick", Format22c, THROW),
        quick(0xf5, 0xe6, "iput-quick", Format22c, THROW),
        quick(0xf6, 0xe7, "iput-wide-quick", Format22c, THROW),
        quick(0xf7, 0xe8, "iput-object-quick", Format22c, THROW),
        quick(0xf8, 0xe9, "invoke-virtual-quick", Format35c, INVOKE),
        quick(0xf9, 0xea, "invoke-virtual-quick/range", Format3rc, INVOKE),
        dalvik(Opcode::all_apis(0xfa), "invoke-super-quick", Format35c, RawIndex, INVOKE),
        dalvik(Opcode::all_apis(0xfb), "invoke-super-quick/range", Format3rc, RawIndex, INVOKE),

        dalvik(Opcode::first_api(0xe3, 9), "iget-volatile", Format22c, Field, THROW),
        dalvik(Opcode::first_api(0xe4, 9), "iput-volatile", Format22c, Field, THROW),
        dalvik(Opcode::first_api(0xe5, 9), "sget-volatile", Format21c, Field, THROW),
        dalvik(Opcode::first_api(0xe6, 9), "sput-volatile", Format21c, Field, THROW),
        dalvik(Opcode::first_api(0xe8, 9), "iget-wide-volatile", Format22c, Field, THROW),
        dalvik(Opcode::first_api(0xe9, 9), "iput-wide-volatile", Format22c, Field, THROW),
        dalvik(Opcode::first_api(0xea, 9), "sget-wide-volatile", Format21c, Field, THROW),
        dalvik(Opcode::first_api(0xeb, 9), "sput-wide-volatile", Format21c, Field, THROW),
        dalvik(Opcode::first_api(0xe7, 9), "iget-object-volatile", Format22c, Field, THROW),
        dalvik(Opcode::first_api(0xfc, 9), "iput-object-volatile", Format22c, Field, THROW),
        dalvik(Opcode::first_api(0xfd, 9), "sget-object-volatile", Format21c, Field, THROW),
        dalvik(Opcode::first_api(0xfe, 9), "sput-object-volatile", Format21c, Field, THROW),

        Opcode::new(
            Opcode::combine(
                Opcode::only_dalvik(Opcode::first_api(0xf1, 11)),
                Opcode::only_art(Opcode::last_api(0x73, 22)),
            ),
            "return-void-barrier",
            ReferenceType::None,
            ReferenceType::None,
            Format10x,
            RETURN | OpcodeFlags::ODEX_ONLY,
        ),
        Opcode::new(
            Opcode::only_art(Opcode::between_api(0x73, 23, 30)),
            "return-void-no-barrier",
            ReferenceType::None,
            ReferenceType::None,
            Format10x,
            RETURN | OpcodeFlags::ODEX_ONLY,
        ),

        art_quick(0xeb, "iput-boolean-quick"),
        art_quick(0xec, "iput-byte-quick"),
        art_quick(0xed, "iput-char-quick"),
        art_quick(0xee, "iput-short-quick"),
        art_quick(0xef, "iget-boolean-quick"),
        art_quick(0xf0, "iget-byte-quick"),
        art_quick(0xf1, "iget-char-quick"),
        art_quick(0xf2, "iget-short-quick"),
    ]);
    opcodes
});

const ARRAY_OPS: [&str; 14] = [
    "aget", "aget-wide", "aget-object", "aget-boolean", "aget-byte", "aget-char", "aget-short",
    "aput", "aput-wide", "aput-object", "aput-boolean", "aput-byte", "aput-char", "aput-short",
];

const INSTANCE_OPS: [&str; 14] = [
    "iget", "iget-wide", "iget-object", "iget-boolean", "iget-byte", "iget-char", "iget-short",
    "iput", "iput-wide", "iput-object", "iput-boolean", "iput-byte", "iput-char", "iput-short",
];

const STATIC_OPS: [&str; 14] = [
    "sget", "sget-wide", "sget-object", "sget-boolean", "sget-byte", "sget-char", "sget-short",
    "sput", "sput-wide", "sput-object", "sput-boolean", "sput-byte", "sput-char", "sput-short",
];

const UNARY_OPS: [&str; 21] = [
    "neg-int", "not-int", "neg-long", "not-long", "neg-float", "neg-double",
    "int-to-long", "int-to-float", "int-to-double", "long-to-int", "long-to-float", "long-to-double",
    "float-to-int", "float-to-long", "float-to-double", "double-to-int", "double-to-long", "double-to-float",
    "int-to-byte", "int-to-char", "int-to-short",
];

const BINARY_OPS: [&str; 32] = [
    "add-int", "sub-int", "mul-int", "div-int", "rem-int", "and-int", "or-int", "xor-int",
    "shl-int", "shr-int", "ushr-int",
    "add-long", "sub-long", "mul-long", "div-long", "rem-long", "and-long", "or-long", "xor-long",
    "shl-long", "shr-long", "ushr-long",
    "add-float", "sub-float", "mul-float", "div-float", "rem-float",
    "add-double", "sub-double", "mul-double", "div-double", "rem-double",
];

const TWO_ADDR_OPS: [&str; 32] = [
    "add-int/2addr", "sub-int/2addr", "mul-int/2addr", "div-int/2addr", "rem-int/2addr",
    "and-int/2addr", "or-int/2addr", "xor-int/2addr", "shl-int/2addr", "shr-int/2addr", "ushr-int/2addr",
    "add-long/2addr", "sub-long/2addr", "mul-long/2addr", "div-long/2addr", "rem-long/2addr",
    "and-long/2addr", "or-long/2addr", "xor-long/2addr", "shl-long/2addr", "shr-long/2addr", "ushr-long/2addr",
    "add-float/2addr", "sub-float/2addr", "mul-float/2addr", "div-float/2addr", "rem-float/2addr",
    "add-double/2addr", "sub-double/2addr", "mul-double/2addr", "div-double/2addr", "rem-double/2addr",
];

const LIT16_OPS: [&str; 8] = [
    "add-int/lit16", "rsub-int", "mul-int/lit16", "div-int/lit16", "rem-int/lit16",
    "and-int/lit16", "or-int/lit16", "xor-int/lit16",
];

const LIT8_OPS: [&str; 11] = [
    "add-int/lit8", "rsub-int/lit8", "mul-int/lit8", "div-int/lit8", "rem-int/lit8",
    "and-int/lit8", "or-int/lit8", "xor-int/lit8", "shl-int/lit8", "shr-int/lit8", "ushr-int/lit8",
];

static OPCODES_BY_NAME: Lazy<HashMap<&'static str, &'static Opcode>> =
    Lazy::new(|| OPCODES.iter().map(|o| (o.name, o)).collect());

/// Looks up an opcode by its mnemonic.
pub fn opcode(name: &str) -> Result<&'static Opcode, DexError> {
    match OPCODES_BY_NAME.get(name) {
        Some(o) => Ok(o),
        None => fail!(UnsupportedTarget, "Unknown opcode {}", name),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OpcodeTableKey {
    pub version: DexVersion,
    pub api: i32,
    pub art: bool,
    pub odex: bool,
}

/// Both directions of the opcode mapping for one target.
#[derive(Debug)]
pub struct OpcodeTable {
    pub key: OpcodeTableKey,
    by_value: HashMap<u16, &'static Opcode>,
    values: HashMap<&'static str, u16>,
}

impl OpcodeTable {
    fn build(key: OpcodeTableKey) -> OpcodeTable {
        let mut by_value = HashMap::new();
        let mut values = HashMap::new();
        for o in OPCODES.iter() {
            if let Some(value) = o.get_opcode_value(key.version, key.api, key.art, key.odex) {
                values.insert(o.name, value);
                // odex opcodes are listed last and shadow standard ones sharing a value
                by_value.insert(value, o);
            }
        }
        debug!(
            "built opcode table for {} api {} {} odex={}: {} opcodes",
            key.version,
            key.api,
            if key.art { "art" } else { "dalvik" },
            key.odex,
            values.len()
        );
        OpcodeTable { key, by_value, values }
    }

    pub fn get(version: DexVersion, api: i32, art: bool, odex: bool) -> Arc<OpcodeTable> {
        get_opcode_table(OpcodeTableKey { version, api, art, odex })
    }

    pub fn opcode_by_value(&self, value: u16) -> Result<&'static Opcode, DexError> {
        match self.by_value.get(&value) {
            Some(o) => Ok(o),
            None => fail!(
                InvalidFormat,
                "No opcode found with value {:#x} for {} api {} art={} odex={}",
                value,
                self.key.version,
                self.key.api,
                self.key.art,
                self.key.odex
            ),
        }
    }

    pub fn opcode_value(&self, opcode: &Opcode) -> Result<u16, DexError> {
        match self.values.get(opcode.name) {
            Some(&value) => Ok(value),
            None => fail!(
                UnsupportedTarget,
                "Opcode {} is not available for {} api {} art={} odex={}",
                opcode.name,
                self.key.version,
                self.key.api,
                self.key.art,
                self.key.odex
            ),
        }
    }
}

// Global lazy cache for opcode tables keyed by target
static OPCODE_TABLE_CACHE: Lazy<Mutex<HashMap<OpcodeTableKey, Arc<OpcodeTable>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

fn get_opcode_table(key: OpcodeTableKey) -> Arc<OpcodeTable> {
    // a poisoned cache only means another thread panicked mid-insert; the map itself is intact
    let mut guard = match OPCODE_TABLE_CACHE.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some(table) = guard.get(&key) {
        return Arc::clone(table);
    }
    let table = Arc::new(OpcodeTable::build(key));
    guard.insert(key, Arc::clone(&table));
    table
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_opcodes_are_stable() {
        let table = OpcodeTable::get(DexVersion::Dex035, 15, false, false);
        assert_eq!(table.opcode_by_value(0x12).unwrap().name, "const/4");
        assert_eq!(table.opcode_by_value(0x44).unwrap().name, "aget");
        assert_eq!(table.opcode_by_value(0x52).unwrap().name, "iget");
        assert_eq!(table.opcode_by_value(0x6d).unwrap().name, "sput-short");
        assert_eq!(table.opcode_by_value(0x8f).unwrap().name, "int-to-short");
        assert_eq!(table.opcode_by_value(0xaf).unwrap().name, "rem-double");
        assert_eq!(table.opcode_by_value(0xcf).unwrap().name, "rem-double/2addr");
        assert_eq!(table.opcode_by_value(0xe2).unwrap().name, "ushr-int/lit8");
        assert_eq!(table.opcode_by_value(0x300).unwrap().name, "array-payload");
        assert!(table.opcode_by_value(0x3e).is_err());
        assert!(table.opcode_by_value(0xfa).is_err());
        assert!(opcode("div-int/lit8").unwrap().can_throw());
        assert!(!opcode("add-int/lit8").unwrap().can_throw());
    }

    #[test]
    fn table_is_symmetric() {
        for (version, api, art, odex) in [
            (DexVersion::Dex035, 15, false, true),
            (DexVersion::Dex035, 21, true, true),
            (DexVersion::Dex039, 28, true, true),
            (DexVersion::Cdex001, 29, true, false),
        ] {
            let table = OpcodeTable::get(version, api, art, odex);
            for o in OPCODES.iter() {
                if let Ok(value) = table.opcode_value(o) {
                    let back = table.opcode_by_value(value).unwrap();
                    // shadowed standard opcodes are the only asymmetric entries
                    if back.name != o.name {
                        assert!(back.odex_only());
                    }
                }
            }
        }
    }

    #[test]
    fn odex_numbering_depends_on_runtime() {
        let dalvik = OpcodeTable::get(DexVersion::Dex035, 15, false, true);
        assert_eq!(dalvik.opcode_by_value(0xf2).unwrap().name, "iget-quick");
        assert_eq!(dalvik.opcode_by_value(0xf0).unwrap().name, "invoke-object-init/range");
        assert_eq!(dalvik.opcode_by_value(0xfc).unwrap().name, "iput-object-volatile");
        assert_eq!(dalvik.opcode_by_value(0xf1).unwrap().name, "return-void-barrier");

        let art = OpcodeTable::get(DexVersion::Dex037, 24, true, true);
        assert_eq!(art.opcode_by_value(0xe3).unwrap().name, "iget-quick");
        assert_eq!(art.opcode_by_value(0xf2).unwrap().name, "iget-short-quick");
        assert_eq!(art.opcode_by_value(0x73).unwrap().name, "return-void-no-barrier");

        let old_art = OpcodeTable::get(DexVersion::Dex035, 21, true, true);
        assert_eq!(old_art.opcode_by_value(0x73).unwrap().name, "return-void-barrier");

        let plain = OpcodeTable::get(DexVersion::Dex037, 24, true, false);
        assert!(plain.opcode_by_value(0xe3).is_err());
        assert!(plain.opcode_value(opcode("iget-quick").unwrap()).is_err());
    }

    #[test]
    fn new_opcodes_need_version_and_api() {
        let polymorphic = opcode("invoke-polymorphic").unwrap();
        let old = OpcodeTable::get(DexVersion::Dex037, 26, true, false);
        assert_eq!(old.opcode_value(polymorphic).unwrap_err().kind(), crate::dex::error::DexErrorKind::UnsupportedTarget);
        let new = OpcodeTable::get(DexVersion::Dex038, 26, true, false);
        assert_eq!(new.opcode_value(polymorphic).unwrap(), 0xfa);
        let compact = OpcodeTable::get(DexVersion::Cdex001, 28, true, false);
        assert_eq!(compact.opcode_value(opcode("const-method-type").unwrap()).unwrap(), 0xff);
    }
}
