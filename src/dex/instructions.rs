//! Representation of the Dalvik bytecodes
//!
//! One variant per instruction format. Registers, literals and branch
//! offsets are kept exactly as the format stores them; references are
//! resolved pool values tagged with their kind.

use std::fmt;

use crate::dex::error::DexError;
use crate::dex::ids::{CallSiteId, FieldId, MethodHandleId, MethodId, ProtoId, TypeId};
use crate::dex::opcode_format::{Format, Opcode, ReferenceType};
use crate::dex::opcodes::opcode;

/// A resolved instruction operand that points into one of the pools.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    String(String),
    Type(TypeId),
    Field(FieldId),
    Method(MethodId),
    Proto(ProtoId),
    CallSite(CallSiteId),
    MethodHandle(MethodHandleId),
    /// Inline method index or vtable/field offset of an odex instruction.
    Raw(u32),
}

impl Reference {
    pub fn reference_type(&self) -> ReferenceType {
        match self {
            Reference::String(_) => ReferenceType::String,
            Reference::Type(_) => ReferenceType::Type,
            Reference::Field(_) => ReferenceType::Field,
            Reference::Method(_) => ReferenceType::Method,
            Reference::Proto(_) => ReferenceType::MethodProto,
            Reference::CallSite(_) => ReferenceType::CallSite,
            Reference::MethodHandle(_) => ReferenceType::MethodHandle,
            Reference::Raw(_) => ReferenceType::RawIndex,
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::String(v) => write!(f, "{:?}", v),
            Reference::Type(v) => write!(f, "{}", v),
            Reference::Field(v) => write!(f, "{}", v),
            Reference::Method(v) => write!(f, "{}", v),
            Reference::Proto(v) => write!(f, "{}", v),
            Reference::CallSite(v) => f.write_str(&v.name),
            Reference::MethodHandle(v) => write!(f, "{}", v),
            Reference::Raw(v) => write!(f, "@{}", v),
        }
    }
}

/// One `sparse-switch-payload` entry: a key and its branch offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SwitchElement {
    pub key: i32,
    pub offset: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Instruction {
    Format10t { opcode: &'static Opcode, offset: i32 },
    Format10x { opcode: &'static Opcode },
    Format11n { opcode: &'static Opcode, a: u8, literal: i32 },
    Format11x { opcode: &'static Opcode, a: u8 },
    Format12x { opcode: &'static Opcode, a: u8, b: u8 },
    Format20t { opcode: &'static Opcode, offset: i32 },
    Format21c { opcode: &'static Opcode, a: u8, reference: Reference },
    /// `const/high16`; the literal keeps its low 16 bits clear.
    Format21ih { opcode: &'static Opcode, a: u8, literal: i32 },
    /// `const-wide/high16`; only the top 16 bits of the literal may be set.
    Format21lh { opcode: &'static Opcode, a: u8, literal: i64 },
    Format21s { opcode: &'static Opcode, a: u8, literal: i32 },
    Format21t { opcode: &'static Opcode, a: u8, offset: i32 },
    Format22b { opcode: &'static Opcode, a: u8, b: u8, literal: i32 },
    Format22c { opcode: &'static Opcode, a: u8, b: u8, reference: Reference },
    Format22s { opcode: &'static Opcode, a: u8, b: u8, literal: i32 },
    Format22t { opcode: &'static Opcode, a: u8, b: u8, offset: i32 },
    Format22x { opcode: &'static Opcode, a: u8, b: u16 },
    Format23x { opcode: &'static Opcode, a: u8, b: u8, c: u8 },
    Format30t { opcode: &'static Opcode, offset: i32 },
    Format31c { opcode: &'static Opcode, a: u8, reference: Reference },
    Format31i { opcode: &'static Opcode, a: u8, literal: i32 },
    Format31t { opcode: &'static Opcode, a: u8, offset: i32 },
    Format32x { opcode: &'static Opcode, a: u16, b: u16 },
    /// Up to five argument registers, each below 16.
    Format35c { opcode: &'static Opcode, registers: Vec<u8>, reference: Reference },
    Format3rc { opcode: &'static Opcode, start_register: u16, register_count: u8, reference: Reference },
    Format45cc { opcode: &'static Opcode, registers: Vec<u8>, reference: Reference, reference2: Reference },
    Format4rcc {
        opcode: &'static Opcode,
        start_register: u16,
        register_count: u8,
        reference: Reference,
        reference2: Reference,
    },
    Format51l { opcode: &'static Opcode, a: u8, literal: i64 },
    /// `fill-array-data` table. Elements are stored widened; each must fit
    /// `element_width` bytes when written.
    ArrayPayload { opcode: &'static Opcode, element_width: u16, elements: Vec<i64> },
    PackedSwitchPayload { opcode: &'static Opcode, first_key: i32, targets: Vec<i32> },
    SparseSwitchPayload { opcode: &'static Opcode, elements: Vec<SwitchElement> },
}

impl Instruction {
    pub fn opcode(&self) -> &'static Opcode {
        match self {
            Instruction::Format10t { opcode, .. }
            | Instruction::Format10x { opcode }
            | Instruction::Format11n { opcode, .. }
            | Instruction::Format11x { opcode, .. }
            | Instruction::Format12x { opcode, .. }
            | Instruction::Format20t { opcode, .. }
            | Instruction::Format21c { opcode, .. }
            | Instruction::Format21ih { opcode, .. }
            | Instruction::Format21lh { opcode, .. }
            | Instruction::Format21s { opcode, .. }
            | Instruction::Format21t { opcode, .. }
            | Instruction::Format22b { opcode, .. }
            | Instruction::Format22c { opcode, .. }
            | Instruction::Format22s { opcode, .. }
            | Instruction::Format22t { opcode, .. }
            | Instruction::Format22x { opcode, .. }
            | Instruction::Format23x { opcode, .. }
            | Instruction::Format30t { opcode, .. }
            | Instruction::Format31c { opcode, .. }
            | Instruction::Format31i { opcode, .. }
            | Instruction::Format31t { opcode, .. }
            | Instruction::Format32x { opcode, .. }
            | Instruction::Format35c { opcode, .. }
            | Instruction::Format3rc { opcode, .. }
            | Instruction::Format45cc { opcode, .. }
            | Instruction::Format4rcc { opcode, .. }
            | Instruction::Format51l { opcode, .. }
            | Instruction::ArrayPayload { opcode, .. }
            | Instruction::PackedSwitchPayload { opcode, .. }
            | Instruction::SparseSwitchPayload { opcode, .. } => *opcode,
        }
    }

    pub fn format(&self) -> Format {
        match self {
            Instruction::Format10t { .. } => Format::Format10t,
            Instruction::Format10x { .. } => Format::Format10x,
            Instruction::Format11n { .. } => Format::Format11n,
            Instruction::Format11x { .. } => Format::Format11x,
            Instruction::Format12x { .. } => Format::Format12x,
            Instruction::Format20t { .. } => Format::Format20t,
            Instruction::Format21c { .. } => Format::Format21c,
            Instruction::Format21ih { .. } => Format::Format21ih,
            Instruction::Format21lh { .. } => Format::Format21lh,
            Instruction::Format21s { .. } => Format::Format21s,
            Instruction::Format21t { .. } => Format::Format21t,
            Instruction::Format22b { .. } => Format::Format22b,
            Instruction::Format22c { .. } => Format::Format22c,
            Instruction::Format22s { .. } => Format::Format22s,
            Instruction::Format22t { .. } => Format::Format22t,
            Instruction::Format22x { .. } => Format::Format22x,
            Instruction::Format23x { .. } => Format::Format23x,
            Instruction::Format30t { .. } => Format::Format30t,
            Instruction::Format31c { .. } => Format::Format31c,
            Instruction::Format31i { .. } => Format::Format31i,
            Instruction::Format31t { .. } => Format::Format31t,
            Instruction::Format32x { .. } => Format::Format32x,
            Instruction::Format35c { .. } => Format::Format35c,
            Instruction::Format3rc { .. } => Format::Format3rc,
            Instruction::Format45cc { .. } => Format::Format45cc,
            Instruction::Format4rcc { .. } => Format::Format4rcc,
            Instruction::Format51l { .. } => Format::Format51l,
            Instruction::ArrayPayload { .. } => Format::ArrayPayload,
            Instruction::PackedSwitchPayload { .. } => Format::PackedSwitchPayload,
            Instruction::SparseSwitchPayload { .. } => Format::SparseSwitchPayload,
        }
    }

    /// Size in 16-bit code units, payload tables included.
    pub fn unit_count(&self) -> usize {
        match self {
            Instruction::ArrayPayload { element_width, elements, .. } => {
                let bytes = elements.len() * (*element_width as usize);
                4 + (bytes + 1) / 2
            }
            Instruction::PackedSwitchPayload { targets, .. } => 4 + targets.len() * 2,
            Instruction::SparseSwitchPayload { elements, .. } => 2 + elements.len() * 4,
            other => other.format().unit_count(),
        }
    }

    pub fn is_payload(&self) -> bool {
        self.format().is_payload_format()
    }

    /// The pool references this instruction carries, first one first.
    pub fn references(&self) -> Vec<&Reference> {
        match self {
            Instruction::Format21c { reference, .. }
            | Instruction::Format22c { reference, .. }
            | Instruction::Format31c { reference, .. }
            | Instruction::Format35c { reference, .. }
            | Instruction::Format3rc { reference, .. } => vec![reference],
            Instruction::Format45cc { reference, reference2, .. }
            | Instruction::Format4rcc { reference, reference2, .. } => vec![reference, reference2],
            _ => vec![],
        }
    }

    pub fn packed_switch_payload(first_key: i32, targets: Vec<i32>) -> Result<Instruction, DexError> {
        Ok(Instruction::PackedSwitchPayload { opcode: opcode("packed-switch-payload")?, first_key, targets })
    }

    /// Sparse switch table; elements are kept sorted by key.
    pub fn sparse_switch_payload(mut elements: Vec<SwitchElement>) -> Result<Instruction, DexError> {
        elements.sort();
        Ok(Instruction::SparseSwitchPayload { opcode: opcode("sparse-switch-payload")?, elements })
    }

    pub fn array_payload(element_width: u16, elements: Vec<i64>) -> Result<Instruction, DexError> {
        if !matches!(element_width, 1 | 2 | 4 | 8) {
            fail!(StructuralViolation, "Invalid element width: {}", element_width);
        }
        Ok(Instruction::ArrayPayload { opcode: opcode("array-payload")?, element_width, elements })
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.opcode().name;
        match self {
            Instruction::Format10x { .. } => f.write_str(name),
            Instruction::Format10t { offset, .. }
            | Instruction::Format20t { offset, .. }
            | Instruction::Format30t { offset, .. } => write!(f, "{} {:+}", name, offset),
            Instruction::Format11x { a, .. } => write!(f, "{} v{}", name, a),
            Instruction::Format11n { a, literal, .. }
            | Instruction::Format21ih { a, literal, .. }
            | Instruction::Format21s { a, literal, .. }
            | Instruction::Format31i { a, literal, .. } => write!(f, "{} v{}, #{}", name, a, literal),
            Instruction::Format21lh { a, literal, .. } | Instruction::Format51l { a, literal, .. } => {
                write!(f, "{} v{}, #{}", name, a, literal)
            }
            Instruction::Format12x { a, b, .. } => write!(f, "{} v{}, v{}", name, a, b),
            Instruction::Format21c { a, reference, .. } | Instruction::Format31c { a, reference, .. } => {
                write!(f, "{} v{}, {}", name, a, reference)
            }
            Instruction::Format21t { a, offset, .. } | Instruction::Format31t { a, offset, .. } => {
                write!(f, "{} v{}, {:+}", name, a, offset)
            }
            Instruction::Format22b { a, b, literal, .. } | Instruction::Format22s { a, b, literal, .. } => {
                write!(f, "{} v{}, v{}, #{}", name, a, b, literal)
            }
            Instruction::Format22c { a, b, reference, .. } => write!(f, "{} v{}, v{}, {}", name, a, b, reference),
            Instruction::Format22t { a, b, offset, .. } => write!(f, "{} v{}, v{}, {:+}", name, a, b, offset),
            Instruction::Format22x { a, b, .. } => write!(f, "{} v{}, v{}", name, a, b),
            Instruction::Format32x { a, b, .. } => write!(f, "{} v{}, v{}", name, a, b),
            Instruction::Format23x { a, b, c, .. } => write!(f, "{} v{}, v{}, v{}", name, a, b, c),
            Instruction::Format35c { registers, reference, .. } => {
                write!(f, "{} {{{}}}, {}", name, register_list(registers), reference)
            }
            Instruction::Format45cc { registers, reference, reference2, .. } => {
                write!(f, "{} {{{}}}, {}, {}", name, register_list(registers), reference, reference2)
            }
            Instruction::Format3rc { start_register, register_count, reference, .. } => {
                write!(f, "{} {}, {}", name, register_range(*start_register, *register_count), reference)
            }
            Instruction::Format4rcc { start_register, register_count, reference, reference2, .. } => write!(
                f,
                "{} {}, {}, {}",
                name,
                register_range(*start_register, *register_count),
                reference,
                reference2
            ),
            Instruction::ArrayPayload { element_width, elements, .. } => {
                write!(f, "{} width {} size {}", name, element_width, elements.len())
            }
            Instruction::PackedSwitchPayload { first_key, targets, .. } => {
                write!(f, "{} first {} size {}", name, first_key, targets.len())
            }
            Instruction::SparseSwitchPayload { elements, .. } => write!(f, "{} size {}", name, elements.len()),
        }
    }
}

fn register_list(registers: &[u8]) -> String {
    registers.iter().map(|r| format!("v{}", r)).collect::<Vec<_>>().join(", ")
}

fn register_range(start: u16, count: u8) -> String {
    if count == 0 {
        "{}".to_string()
    } else {
        format!("{{v{} .. v{}}}", start, start as u32 + count as u32 - 1)
    }
}
