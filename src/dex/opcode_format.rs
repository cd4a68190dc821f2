use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::RangeInclusive;

use bitflags::bitflags;
use rangemap::RangeInclusiveMap;

use crate::dex::version::DexVersion;

/// Represents different types of references used by opcodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReferenceType {
    None,
    String,
    Type,
    Field,
    Method,
    MethodProto,
    CallSite,
    MethodHandle,
    /// An index with no pool behind it (inline method or vtable/field offset).
    RawIndex,
}

// Defines various flags that can be associated with an opcode.
bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpcodeFlags: u32 {
        const CAN_THROW = 0x1;
        const ODEX_ONLY = 0x2;
        const ENDS_FLOW = 0x4;
        const INVOKE = 0x8;
        const RETURN = 0x10;
        const SWITCH = 0x20;
        const BRANCH = 0x40;
        const UNCONDITIONAL = 0x80;
        const HAS_PAYLOAD = 0x100;
        const CAN_INITIALIZE_REFERENCE = 0x200;
    }
}

/// Which runtime a raw opcode value is defined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Any,
    Art,
    Dalvik,
}

/// An API range, runtime and the raw value the opcode has there.
#[derive(Debug, Clone)]
pub struct VersionConstraint {
    pub api_range: RangeInclusive<i32>,
    pub dialect: Dialect,
    pub opcode_value: u16,
}

/// Represents an opcode with its associated properties and mappings.
#[derive(Debug)]
pub struct Opcode {
    pub name: &'static str,
    pub reference_type: ReferenceType,
    pub reference_type2: ReferenceType,
    pub format: Format,
    pub flags: OpcodeFlags,
    /// Oldest standard dex version able to hold the opcode; compact files accept all.
    pub min_dex_version: Option<DexVersion>,
    dalvik_values: RangeInclusiveMap<i32, u16>,
    art_values: RangeInclusiveMap<i32, u16>,
}

impl Opcode {
    pub(crate) fn new(
        version_constraints: Vec<VersionConstraint>,
        name: &'static str,
        reference_type: ReferenceType,
        reference_type2: ReferenceType,
        format: Format,
        flags: OpcodeFlags,
    ) -> Self {
        let mut dalvik_values = RangeInclusiveMap::new();
        let mut art_values = RangeInclusiveMap::new();

        for vc in version_constraints.iter() {
            if vc.api_range.is_empty() {
                continue;
            }
            // the first constraint covering an api wins
            for (map, dialect) in [(&mut dalvik_values, Dialect::Dalvik), (&mut art_values, Dialect::Art)] {
                if vc.dialect != Dialect::Any && vc.dialect != dialect {
                    continue;
                }
                let gaps: Vec<RangeInclusive<i32>> = map.gaps(&vc.api_range).collect();
                for gap in gaps {
                    map.insert(gap, vc.opcode_value);
                }
            }
        }

        Opcode {
            name,
            reference_type,
            reference_type2,
            format,
            flags,
            min_dex_version: None,
            dalvik_values,
            art_values,
        }
    }

    /// An opcode with one raw value everywhere and no reference.
    pub(crate) fn plain(opcode_value: u16, name: &'static str, format: Format, flags: OpcodeFlags) -> Self {
        Opcode::new(Opcode::all_apis(opcode_value), name, ReferenceType::None, ReferenceType::None, format, flags)
    }

    pub(crate) fn referencing(
        opcode_value: u16,
        name: &'static str,
        format: Format,
        reference_type: ReferenceType,
        flags: OpcodeFlags,
    ) -> Self {
        Opcode::new(Opcode::all_apis(opcode_value), name, reference_type, ReferenceType::None, format, flags)
    }

    pub(crate) fn since_dex(mut self, version: DexVersion) -> Self {
        self.min_dex_version = Some(version);
        self
    }

    fn constraint(opcode_value: u16, api_range: RangeInclusive<i32>) -> Vec<VersionConstraint> {
        vec![VersionConstraint { api_range, dialect: Dialect::Any, opcode_value }]
    }

    pub(crate) fn all_apis(opcode_value: u16) -> Vec<VersionConstraint> {
        Opcode::constraint(opcode_value, i32::MIN..=i32::MAX)
    }

    pub(crate) fn first_api(opcode_value: u16, api: i32) -> Vec<VersionConstraint> {
        Opcode::constraint(opcode_value, api..=i32::MAX)
    }

    pub(crate) fn last_api(opcode_value: u16, api: i32) -> Vec<VersionConstraint> {
        Opcode::constraint(opcode_value, i32::MIN..=api)
    }

    pub(crate) fn between_api(opcode_value: u16, min_api: i32, max_api: i32) -> Vec<VersionConstraint> {
        Opcode::constraint(opcode_value, min_api..=max_api)
    }

    pub(crate) fn only_art(constraints: Vec<VersionConstraint>) -> Vec<VersionConstraint> {
        Opcode::restrict(constraints, Dialect::Art)
    }

    pub(crate) fn only_dalvik(constraints: Vec<VersionConstraint>) -> Vec<VersionConstraint> {
        Opcode::restrict(constraints, Dialect::Dalvik)
    }

    fn restrict(constraints: Vec<VersionConstraint>, dialect: Dialect) -> Vec<VersionConstraint> {
        constraints
            .into_iter()
            .map(|vc| VersionConstraint { dialect, ..vc })
            .collect()
    }

    /// Joins constraint lists; earlier entries take precedence.
    pub(crate) fn combine(constraints: Vec<VersionConstraint>, other: Vec<VersionConstraint>) -> Vec<VersionConstraint> {
        let mut combined = constraints;
        combined.extend(other);
        combined
    }

    pub fn can_throw(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_THROW)
    }

    pub fn odex_only(&self) -> bool {
        self.flags.contains(OpcodeFlags::ODEX_ONLY)
    }

    /// Determines if execution can continue to the next instruction.
    pub fn can_continue(&self) -> bool {
        !self.flags.contains(OpcodeFlags::ENDS_FLOW)
    }

    pub fn is_invoke(&self) -> bool {
        self.flags.contains(OpcodeFlags::INVOKE)
    }

    /// Invokes set the hidden result register.
    pub fn sets_result(&self) -> bool {
        self.is_invoke()
    }

    pub fn is_return(&self) -> bool {
        self.flags.contains(OpcodeFlags::RETURN)
    }

    pub fn is_switch(&self) -> bool {
        self.flags.contains(OpcodeFlags::SWITCH)
    }

    pub fn is_branch(&self) -> bool {
        self.flags.contains(OpcodeFlags::BRANCH)
    }

    pub fn is_conditional_branch(&self) -> bool {
        self.is_branch() && !self.flags.contains(OpcodeFlags::UNCONDITIONAL)
    }

    pub fn has_payload(&self) -> bool {
        self.flags.contains(OpcodeFlags::HAS_PAYLOAD)
    }

    pub fn is_payload(&self) -> bool {
        self.format.is_payload_format()
    }

    pub fn can_initialize_reference(&self) -> bool {
        self.flags.contains(OpcodeFlags::CAN_INITIALIZE_REFERENCE)
    }

    /// Raw value of the opcode for the given target, if it exists there.
    pub fn get_opcode_value(&self, version: DexVersion, api: i32, art: bool, odex: bool) -> Option<u16> {
        if self.odex_only() && !odex {
            return None;
        }
        if let Some(min) = self.min_dex_version {
            if !version.supports(min) {
                return None;
            }
        }
        let map = if art { &self.art_values } else { &self.dalvik_values };
        map.get(&api).copied()
    }
}

impl PartialEq for Opcode {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Opcode {}

impl Hash for Opcode {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Instruction encodings. Names follow the Dalvik bytecode format ids; the
/// 22cs/35ms/3rms style odex variants share the layout of 22c/35c/3rc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    Format10t,
    Format10x,
    Format11n,
    Format11x,
    Format12x,
    Format20t,
    Format21c,
    Format21ih,
    Format21lh,
    Format21s,
    Format21t,
    Format22b,
    Format22c,
    Format22s,
    Format22t,
    Format22x,
    Format23x,
    Format30t,
    Format31c,
    Format31i,
    Format31t,
    Format32x,
    Format35c,
    Format3rc,
    Format45cc,
    Format4rcc,
    Format51l,
    ArrayPayload,
    PackedSwitchPayload,
    SparseSwitchPayload,
}

impl Format {
    /// Size in 16-bit code units; payloads are variable sized and report 0.
    pub const fn unit_count(&self) -> usize {
        match self {
            Format::Format10t
            | Format::Format10x
            | Format::Format11n
            | Format::Format11x
            | Format::Format12x => 1,

            Format::Format20t
            | Format::Format21c
            | Format::Format21ih
            | Format::Format21lh
            | Format::Format21s
            | Format::Format21t
            | Format::Format22b
            | Format::Format22c
            | Format::Format22s
            | Format::Format22t
            | Format::Format22x
            | Format::Format23x => 2,

            Format::Format30t
            | Format::Format31c
            | Format::Format31i
            | Format::Format31t
            | Format::Format32x
            | Format::Format35c
            | Format::Format3rc => 3,

            Format::Format45cc | Format::Format4rcc => 4,

            Format::Format51l => 5,

            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload => 0,
        }
    }

    pub const fn is_payload_format(&self) -> bool {
        matches!(
            self,
            Format::ArrayPayload | Format::PackedSwitchPayload | Format::SparseSwitchPayload
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earlier_constraints_win() {
        let op = Opcode::new(
            Opcode::combine(Opcode::only_dalvik(Opcode::all_apis(0xf2)), Opcode::only_art(Opcode::last_api(0xe3, 30))),
            "iget-quick",
            ReferenceType::RawIndex,
            ReferenceType::None,
            Format::Format22c,
            OpcodeFlags::ODEX_ONLY | OpcodeFlags::CAN_THROW,
        );
        assert_eq!(op.get_opcode_value(DexVersion::Dex035, 15, false, true), Some(0xf2));
        assert_eq!(op.get_opcode_value(DexVersion::Dex035, 21, true, true), Some(0xe3));
        assert_eq!(op.get_opcode_value(DexVersion::Dex040, 31, true, true), None);
        assert_eq!(op.get_opcode_value(DexVersion::Dex035, 15, false, false), None);
    }

    #[test]
    fn dex_version_gate() {
        let op = Opcode::new(
            Opcode::first_api(0xfe, 28),
            "const-method-handle",
            ReferenceType::MethodHandle,
            ReferenceType::None,
            Format::Format21c,
            OpcodeFlags::CAN_THROW,
        )
        .since_dex(DexVersion::Dex039);
        assert_eq!(op.get_opcode_value(DexVersion::Dex038, 28, true, false), None);
        assert_eq!(op.get_opcode_value(DexVersion::Dex039, 27, true, false), None);
        assert_eq!(op.get_opcode_value(DexVersion::Dex039, 28, true, false), Some(0xfe));
        assert_eq!(op.get_opcode_value(DexVersion::Cdex001, 28, true, false), Some(0xfe));
    }

    #[test]
    fn unit_counts() {
        assert_eq!(Format::Format10x.unit_count(), 1);
        assert_eq!(Format::Format35c.unit_count(), 3);
        assert_eq!(Format::Format51l.unit_count(), 5);
        assert!(Format::SparseSwitchPayload.is_payload_format());
    }
}
