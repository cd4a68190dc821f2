//! Binary encoding of [`Instruction`]s.
//!
//! Raw opcode values come from the [`OpcodeTable`] of the target, the same
//! table in both directions. Operands are packed with width checks so a
//! value that does not fit is reported instead of truncated.

use log::trace;
use num_traits::ToPrimitive;

use crate::dex::error::{DexError, ResultExt};
use crate::dex::instructions::{Instruction, Reference, SwitchElement};
use crate::dex::opcode_format::{Format, Opcode, ReferenceType};
use crate::dex::opcodes::OpcodeTable;
use crate::dex::pools::{IndexResolver, ReferenceSource};
use crate::dex::{read_u2, read_u4, write_u2, write_u4};

const PAYLOAD_ALIGNMENT: usize = 4;

/// Decodes exactly `unit_count` code units starting at `ix`.
pub(crate) fn read_instructions<R: ReferenceSource + ?Sized>(
    bytes: &[u8],
    ix: &mut usize,
    unit_count: usize,
    table: &OpcodeTable,
    source: &R,
) -> Result<Vec<Instruction>, DexError> {
    let start = *ix;
    let end = start + unit_count * 2;
    if end > bytes.len() {
        fail!(InvalidFormat, "Instructions at {} run past the end of the file", start);
    }
    let mut out = vec![];
    while *ix < end {
        let position = *ix;
        let insn = read_instruction(&bytes[..end], ix, table, source)
            .context(|| format!("instruction at unit {}", (position - start) / 2))?;
        trace!("{:#06x}: {}", (position - start) / 2, insn);
        out.push(insn);
    }
    if *ix != end {
        fail!(InvalidFormat, "Read {} code units, expected {}", (*ix - start) / 2, unit_count);
    }
    Ok(out)
}

fn resolve<R: ReferenceSource + ?Sized>(kind: ReferenceType, source: &R, index: u32) -> Result<Reference, DexError> {
    Ok(match kind {
        ReferenceType::String => Reference::String(source.string(index)?),
        ReferenceType::Type => Reference::Type(source.type_id(index)?),
        ReferenceType::Field => Reference::Field(source.field_id(index)?),
        ReferenceType::Method => Reference::Method(source.method_id(index)?),
        ReferenceType::MethodProto => Reference::Proto(source.proto_id(index)?),
        ReferenceType::CallSite => Reference::CallSite(source.call_site(index)?),
        ReferenceType::MethodHandle => Reference::MethodHandle(source.method_handle(index)?),
        ReferenceType::RawIndex => Reference::Raw(index),
        ReferenceType::None => fail!(InvalidFormat, "Opcode carries no reference for index {}", index),
    })
}

fn check_zero_arg(opcode: &Opcode, arg: u16) -> Result<(), DexError> {
    if arg != 0 {
        fail!(InvalidFormat, "{}: arg should be zero, but actual value is {}", opcode, arg);
    }
    Ok(())
}

fn extend_sign(value: u32, width: u32) -> i32 {
    let shift = 32 - width;
    ((value << shift) as i32) >> shift
}

fn read_u4_pair(bytes: &[u8], ix: &mut usize) -> Result<u32, DexError> {
    let lo = read_u2(bytes, ix)? as u32;
    let hi = read_u2(bytes, ix)? as u32;
    Ok(lo | (hi << 16))
}

/// Low nibble of 35c/45cc `A|G` plus the `FEDC` unit, cut to `count`.
fn unpack_registers(opcode: &Opcode, count: u16, g: u16, fedc: u16) -> Result<Vec<u8>, DexError> {
    if count > 5 {
        fail!(InvalidFormat, "{}: invalid register count {}", opcode, count);
    }
    let all = [fedc & 0xf, (fedc >> 4) & 0xf, (fedc >> 8) & 0xf, fedc >> 12, g];
    Ok(all[..count as usize].iter().map(|&r| r as u8).collect())
}

pub(crate) fn read_instruction<R: ReferenceSource + ?Sized>(
    bytes: &[u8],
    ix: &mut usize,
    table: &OpcodeTable,
    source: &R,
) -> Result<Instruction, DexError> {
    let unit = read_u2(bytes, ix)?;
    let (mut raw, mut arg) = (unit & 0xff, unit >> 8);
    if raw == 0 && arg != 0 {
        raw = unit;
        arg = 0;
    }
    let opcode = table.opcode_by_value(raw)?;
    let a4 = (arg & 0xf) as u8;
    let b4 = (arg >> 4) as u8;
    let aa = arg as u8;

    let insn = match opcode.format {
        Format::Format10x => {
            check_zero_arg(opcode, arg)?;
            Instruction::Format10x { opcode }
        }
        Format::Format12x => Instruction::Format12x { opcode, a: a4, b: b4 },
        Format::Format11n => Instruction::Format11n { opcode, a: a4, literal: extend_sign(b4 as u32, 4) },
        Format::Format11x => Instruction::Format11x { opcode, a: aa },
        Format::Format10t => Instruction::Format10t { opcode, offset: extend_sign(arg as u32, 8) },
        Format::Format20t => {
            check_zero_arg(opcode, arg)?;
            let offset = extend_sign(read_u2(bytes, ix)? as u32, 16);
            Instruction::Format20t { opcode, offset }
        }
        Format::Format22x => Instruction::Format22x { opcode, a: aa, b: read_u2(bytes, ix)? },
        Format::Format21t => {
            let offset = extend_sign(read_u2(bytes, ix)? as u32, 16);
            Instruction::Format21t { opcode, a: aa, offset }
        }
        Format::Format21s => {
            let literal = extend_sign(read_u2(bytes, ix)? as u32, 16);
            Instruction::Format21s { opcode, a: aa, literal }
        }
        Format::Format21ih => {
            let literal = ((read_u2(bytes, ix)? as u32) << 16) as i32;
            Instruction::Format21ih { opcode, a: aa, literal }
        }
        Format::Format21lh => {
            let literal = ((read_u2(bytes, ix)? as u64) << 48) as i64;
            Instruction::Format21lh { opcode, a: aa, literal }
        }
        Format::Format21c => {
            let reference = resolve(opcode.reference_type, source, read_u2(bytes, ix)? as u32)?;
            Instruction::Format21c { opcode, a: aa, reference }
        }
        Format::Format22c => {
            let reference = resolve(opcode.reference_type, source, read_u2(bytes, ix)? as u32)?;
            Instruction::Format22c { opcode, a: a4, b: b4, reference }
        }
        Format::Format23x => {
            let ccbb = read_u2(bytes, ix)?;
            Instruction::Format23x { opcode, a: aa, b: ccbb as u8, c: (ccbb >> 8) as u8 }
        }
        Format::Format22b => {
            let ccbb = read_u2(bytes, ix)?;
            let literal = extend_sign((ccbb >> 8) as u32, 8);
            Instruction::Format22b { opcode, a: aa, b: ccbb as u8, literal }
        }
        Format::Format22t => {
            let offset = extend_sign(read_u2(bytes, ix)? as u32, 16);
            Instruction::Format22t { opcode, a: a4, b: b4, offset }
        }
        Format::Format22s => {
            let literal = extend_sign(read_u2(bytes, ix)? as u32, 16);
            Instruction::Format22s { opcode, a: a4, b: b4, literal }
        }
        Format::Format30t => {
            check_zero_arg(opcode, arg)?;
            Instruction::Format30t { opcode, offset: read_u4_pair(bytes, ix)? as i32 }
        }
        Format::Format32x => {
            check_zero_arg(opcode, arg)?;
            let a = read_u2(bytes, ix)?;
            let b = read_u2(bytes, ix)?;
            Instruction::Format32x { opcode, a, b }
        }
        Format::Format31i => Instruction::Format31i { opcode, a: aa, literal: read_u4_pair(bytes, ix)? as i32 },
        Format::Format31t => Instruction::Format31t { opcode, a: aa, offset: read_u4_pair(bytes, ix)? as i32 },
        Format::Format31c => {
            let reference = resolve(opcode.reference_type, source, read_u4_pair(bytes, ix)?)?;
            Instruction::Format31c { opcode, a: aa, reference }
        }
        Format::Format35c => {
            let index = read_u2(bytes, ix)? as u32;
            let fedc = read_u2(bytes, ix)?;
            let registers = unpack_registers(opcode, arg >> 4, arg & 0xf, fedc)?;
            let reference = resolve(opcode.reference_type, source, index)?;
            Instruction::Format35c { opcode, registers, reference }
        }
        Format::Format3rc => {
            let index = read_u2(bytes, ix)? as u32;
            let start_register = read_u2(bytes, ix)?;
            let reference = resolve(opcode.reference_type, source, index)?;
            Instruction::Format3rc { opcode, start_register, register_count: aa, reference }
        }
        Format::Format45cc => {
            let index = read_u2(bytes, ix)? as u32;
            let fedc = read_u2(bytes, ix)?;
            let index2 = read_u2(bytes, ix)? as u32;
            let registers = unpack_registers(opcode, arg >> 4, arg & 0xf, fedc)?;
            let reference = resolve(opcode.reference_type, source, index)?;
            let reference2 = resolve(opcode.reference_type2, source, index2)?;
            Instruction::Format45cc { opcode, registers, reference, reference2 }
        }
        Format::Format4rcc => {
            let index = read_u2(bytes, ix)? as u32;
            let start_register = read_u2(bytes, ix)?;
            let index2 = read_u2(bytes, ix)? as u32;
            let reference = resolve(opcode.reference_type, source, index)?;
            let reference2 = resolve(opcode.reference_type2, source, index2)?;
            Instruction::Format4rcc { opcode, start_register, register_count: aa, reference, reference2 }
        }
        Format::Format51l => {
            let lo = read_u4_pair(bytes, ix)? as u64;
            let hi = read_u4_pair(bytes, ix)? as u64;
            Instruction::Format51l { opcode, a: aa, literal: (lo | (hi << 32)) as i64 }
        }
        Format::PackedSwitchPayload => {
            check_zero_arg(opcode, arg)?;
            let size = read_u2(bytes, ix)?;
            let first_key = read_u4(bytes, ix)? as i32;
            let mut targets = Vec::with_capacity(size as usize);
            for _ in 0..size {
                targets.push(read_u4(bytes, ix)? as i32);
            }
            Instruction::PackedSwitchPayload { opcode, first_key, targets }
        }
        Format::SparseSwitchPayload => {
            check_zero_arg(opcode, arg)?;
            let size = read_u2(bytes, ix)? as usize;
            let mut keys = Vec::with_capacity(size);
            for _ in 0..size {
                keys.push(read_u4(bytes, ix)? as i32);
            }
            let mut elements = Vec::with_capacity(size);
            for key in keys {
                elements.push(SwitchElement { key, offset: read_u4(bytes, ix)? as i32 });
            }
            Instruction::SparseSwitchPayload { opcode, elements }
        }
        Format::ArrayPayload => {
            check_zero_arg(opcode, arg)?;
            let element_width = read_u2(bytes, ix)?;
            let size = read_u4(bytes, ix)? as usize;
            if !matches!(element_width, 1 | 2 | 4 | 8) {
                fail!(InvalidFormat, "Invalid element width: {}", element_width);
            }
            let width = element_width as usize;
            if size.checked_mul(width).map_or(true, |n| n > bytes.len().saturating_sub(*ix)) {
                fail!(InvalidFormat, "Array payload of {} elements runs past the code", size);
            }
            let mut elements = Vec::with_capacity(size);
            for chunk in bytes[*ix..*ix + size * width].chunks_exact(width) {
                let mut raw = [0u8; 8];
                raw[..width].copy_from_slice(chunk);
                let shift = 64 - 8 * width as u32;
                elements.push((i64::from_le_bytes(raw) << shift) >> shift);
            }
            *ix += size * width;
            // back to a code unit boundary
            *ix += *ix & 1;
            Instruction::ArrayPayload { opcode, element_width, elements }
        }
    };
    Ok(insn)
}

fn check_unsigned(value: u32, width: u32) -> Result<u32, DexError> {
    if width < 32 && value >> width != 0 {
        fail!(StructuralViolation, "Illegal instruction unsigned value {:#x} for width {}", value, width);
    }
    Ok(value)
}

fn check_signed(value: i32, width: u32) -> Result<u32, DexError> {
    let empty = 32 - width;
    if (value << empty) >> empty != value {
        fail!(StructuralViolation, "Illegal instruction signed value {:#x} for width {}", value, width);
    }
    Ok((value as u32) & (u32::MAX >> empty))
}

fn check_hat32(value: i32, width: u32) -> Result<u32, DexError> {
    if (value as u32) & (u32::MAX >> width) != 0 {
        fail!(StructuralViolation, "Illegal instruction hat value {:#x} for width {}", value, width);
    }
    Ok((value as u32) >> (32 - width))
}

fn check_hat64(value: i64, width: u32) -> Result<u32, DexError> {
    if (value as u64) & (u64::MAX >> width) != 0 {
        fail!(StructuralViolation, "Illegal instruction hat value {:#x} for width {}", value, width);
    }
    Ok(((value as u64) >> (64 - width)) as u32)
}

fn write_base(bytes: &mut Vec<u8>, opcode: u16, arg: u32) -> Result<(), DexError> {
    if opcode >> 8 != 0 {
        fail!(StructuralViolation, "Illegal opcode: {:#x}", opcode);
    }
    let arg = check_unsigned(arg, 8)?;
    write_u2(bytes, ((arg as u16) << 8) | opcode);
    Ok(())
}

fn write_payload_base(bytes: &mut Vec<u8>, opcode: u16, size: usize) -> Result<(), DexError> {
    if bytes.len() % PAYLOAD_ALIGNMENT != 0 {
        fail!(StructuralViolation, "Payload at {} is not {}-byte aligned", bytes.len(), PAYLOAD_ALIGNMENT);
    }
    if size > u16::MAX as usize {
        fail!(StructuralViolation, "size is too big: {}", size);
    }
    write_u2(bytes, opcode);
    write_u2(bytes, size as u16);
    Ok(())
}

fn write_u4_pair(bytes: &mut Vec<u8>, value: u32) {
    write_u2(bytes, value as u16);
    write_u2(bytes, (value >> 16) as u16);
}

fn reference_index<I: IndexResolver + ?Sized>(
    expected: ReferenceType,
    reference: &Reference,
    resolver: &I,
) -> Result<u32, DexError> {
    match (expected, reference) {
        (ReferenceType::String, Reference::String(v)) => resolver.string_index(v),
        (ReferenceType::Type, Reference::Type(v)) => resolver.type_index(v),
        (ReferenceType::Field, Reference::Field(v)) => resolver.field_index(v),
        (ReferenceType::Method, Reference::Method(v)) => resolver.method_index(v),
        (ReferenceType::MethodProto, Reference::Proto(v)) => resolver.proto_index(v),
        (ReferenceType::CallSite, Reference::CallSite(v)) => resolver.call_site_index(v),
        (ReferenceType::MethodHandle, Reference::MethodHandle(v)) => resolver.method_handle_index(v),
        (ReferenceType::RawIndex, Reference::Raw(v)) => Ok(*v),
        (expected, reference) => fail!(
            StructuralViolation,
            "Expected a {:?} reference, found {:?}",
            expected,
            reference.reference_type()
        ),
    }
}

fn pack_registers(opcode: &Opcode, registers: &[u8]) -> Result<(u32, u16), DexError> {
    if registers.len() > 5 {
        fail!(StructuralViolation, "{}: too many registers: {}", opcode, registers.len());
    }
    let mut nibbles = [0u32; 5];
    for (slot, &r) in nibbles.iter_mut().zip(registers) {
        *slot = check_unsigned(r as u32, 4)?;
    }
    let [c, d, e, f, g] = nibbles;
    let ag = ((registers.len() as u32) << 4) | g;
    let fedc = (f << 12) | (e << 8) | (d << 4) | c;
    Ok((ag, fedc as u16))
}

pub(crate) fn write_instructions<I: IndexResolver + ?Sized>(
    bytes: &mut Vec<u8>,
    instructions: &[Instruction],
    table: &OpcodeTable,
    resolver: &I,
) -> Result<(), DexError> {
    let start = bytes.len();
    for insn in instructions {
        let position = (bytes.len() - start) / 2;
        write_instruction(bytes, insn, table, resolver).context(|| format!("{} at unit {}", insn.opcode(), position))?;
    }
    Ok(())
}

pub(crate) fn write_instruction<I: IndexResolver + ?Sized>(
    bytes: &mut Vec<u8>,
    insn: &Instruction,
    table: &OpcodeTable,
    resolver: &I,
) -> Result<(), DexError> {
    let opcode = insn.opcode();
    let op = table.opcode_value(opcode)?;
    match insn {
        Instruction::Format10x { .. } => write_base(bytes, op, 0)?,
        Instruction::Format12x { a, b, .. } => {
            let a = check_unsigned(*a as u32, 4)?;
            let b = check_unsigned(*b as u32, 4)?;
            write_base(bytes, op, (b << 4) | a)?;
        }
        Instruction::Format11n { a, literal, .. } => {
            let a = check_unsigned(*a as u32, 4)?;
            let b = check_signed(*literal, 4)?;
            write_base(bytes, op, (b << 4) | a)?;
        }
        Instruction::Format11x { a, .. } => write_base(bytes, op, *a as u32)?,
        Instruction::Format10t { offset, .. } => write_base(bytes, op, check_signed(*offset, 8)?)?,
        Instruction::Format20t { offset, .. } => {
            write_base(bytes, op, 0)?;
            write_u2(bytes, check_signed(*offset, 16)? as u16);
        }
        Instruction::Format22x { a, b, .. } => {
            write_base(bytes, op, *a as u32)?;
            write_u2(bytes, *b);
        }
        Instruction::Format21t { a, offset: value, .. } | Instruction::Format21s { a, literal: value, .. } => {
            write_base(bytes, op, *a as u32)?;
            write_u2(bytes, check_signed(*value, 16)? as u16);
        }
        Instruction::Format21ih { a, literal, .. } => {
            write_base(bytes, op, *a as u32)?;
            write_u2(bytes, check_hat32(*literal, 16)? as u16);
        }
        Instruction::Format21lh { a, literal, .. } => {
            write_base(bytes, op, *a as u32)?;
            write_u2(bytes, check_hat64(*literal, 16)? as u16);
        }
        Instruction::Format21c { a, reference, .. } => {
            let index = check_unsigned(reference_index(opcode.reference_type, reference, resolver)?, 16)?;
            write_base(bytes, op, *a as u32)?;
            write_u2(bytes, index as u16);
        }
        Instruction::Format22c { a, b, reference, .. } => {
            let a = check_unsigned(*a as u32, 4)?;
            let b = check_unsigned(*b as u32, 4)?;
            let index = check_unsigned(reference_index(opcode.reference_type, reference, resolver)?, 16)?;
            write_base(bytes, op, (b << 4) | a)?;
            write_u2(bytes, index as u16);
        }
        Instruction::Format23x { a, b, c, .. } => {
            write_base(bytes, op, *a as u32)?;
            write_u2(bytes, ((*c as u16) << 8) | *b as u16);
        }
        Instruction::Format22b { a, b, literal, .. } => {
            let literal = check_signed(*literal, 8)?;
            write_base(bytes, op, *a as u32)?;
            write_u2(bytes, ((literal as u16) << 8) | *b as u16);
        }
        Instruction::Format22t { a, b, offset: value, .. } | Instruction::Format22s { a, b, literal: value, .. } => {
            let a = check_unsigned(*a as u32, 4)?;
            let b = check_unsigned(*b as u32, 4)?;
            write_base(bytes, op, (b << 4) | a)?;
            write_u2(bytes, check_signed(*value, 16)? as u16);
        }
        Instruction::Format30t { offset, .. } => {
            write_base(bytes, op, 0)?;
            write_u4_pair(bytes, *offset as u32);
        }
        Instruction::Format32x { a, b, .. } => {
            write_base(bytes, op, 0)?;
            write_u2(bytes, *a);
            write_u2(bytes, *b);
        }
        Instruction::Format31i { a, literal: value, .. } | Instruction::Format31t { a, offset: value, .. } => {
            write_base(bytes, op, *a as u32)?;
            write_u4_pair(bytes, *value as u32);
        }
        Instruction::Format31c { a, reference, .. } => {
            let index = reference_index(opcode.reference_type, reference, resolver)?;
            write_base(bytes, op, *a as u32)?;
            write_u4_pair(bytes, index);
        }
        Instruction::Format35c { registers, reference, .. } => {
            let index = check_unsigned(reference_index(opcode.reference_type, reference, resolver)?, 16)?;
            let (ag, fedc) = pack_registers(opcode, registers)?;
            write_base(bytes, op, ag)?;
            write_u2(bytes, index as u16);
            write_u2(bytes, fedc);
        }
        Instruction::Format3rc { start_register, register_count, reference, .. } => {
            let index = check_unsigned(reference_index(opcode.reference_type, reference, resolver)?, 16)?;
            write_base(bytes, op, *register_count as u32)?;
            write_u2(bytes, index as u16);
            write_u2(bytes, *start_register);
        }
        Instruction::Format45cc { registers, reference, reference2, .. } => {
            let index = check_unsigned(reference_index(opcode.reference_type, reference, resolver)?, 16)?;
            let index2 = check_unsigned(reference_index(opcode.reference_type2, reference2, resolver)?, 16)?;
            let (ag, fedc) = pack_registers(opcode, registers)?;
            write_base(bytes, op, ag)?;
            write_u2(bytes, index as u16);
            write_u2(bytes, fedc);
            write_u2(bytes, index2 as u16);
        }
        Instruction::Format4rcc { start_register, register_count, reference, reference2, .. } => {
            let index = check_unsigned(reference_index(opcode.reference_type, reference, resolver)?, 16)?;
            let index2 = check_unsigned(reference_index(opcode.reference_type2, reference2, resolver)?, 16)?;
            write_base(bytes, op, *register_count as u32)?;
            write_u2(bytes, index as u16);
            write_u2(bytes, *start_register);
            write_u2(bytes, index2 as u16);
        }
        Instruction::Format51l { a, literal, .. } => {
            write_base(bytes, op, *a as u32)?;
            let value = *literal as u64;
            write_u4_pair(bytes, value as u32);
            write_u4_pair(bytes, (value >> 32) as u32);
        }
        Instruction::PackedSwitchPayload { first_key, targets, .. } => {
            write_payload_base(bytes, op, targets.len())?;
            write_u4(bytes, *first_key as u32);
            for target in targets {
                write_u4(bytes, *target as u32);
            }
        }
        Instruction::SparseSwitchPayload { elements, .. } => {
            let mut sorted = elements.clone();
            sorted.sort_by_key(|e| e.key);
            if sorted.windows(2).any(|w| w[0].key == w[1].key) {
                fail!(StructuralViolation, "Duplicate key in sparse-switch-payload");
            }
            write_payload_base(bytes, op, sorted.len())?;
            for e in &sorted {
                write_u4(bytes, e.key as u32);
            }
            for e in &sorted {
                write_u4(bytes, e.offset as u32);
            }
        }
        Instruction::ArrayPayload { element_width, elements, .. } => {
            if bytes.len() % PAYLOAD_ALIGNMENT != 0 {
                fail!(StructuralViolation, "Payload at {} is not {}-byte aligned", bytes.len(), PAYLOAD_ALIGNMENT);
            }
            write_u2(bytes, op);
            write_u2(bytes, *element_width);
            write_u4(bytes, elements.len() as u32);
            for &element in elements {
                write_array_element(bytes, *element_width, element)?;
            }
            if bytes.len() % 2 != 0 {
                bytes.push(0);
            }
        }
    }
    Ok(())
}

fn write_array_element(bytes: &mut Vec<u8>, width: u16, element: i64) -> Result<(), DexError> {
    let narrowed = match width {
        1 => element.to_i8().map(|v| v.to_le_bytes().to_vec()),
        2 => element.to_i16().map(|v| v.to_le_bytes().to_vec()),
        4 => element.to_i32().map(|v| v.to_le_bytes().to_vec()),
        8 => Some(element.to_le_bytes().to_vec()),
        _ => fail!(StructuralViolation, "Invalid element width: {}", width),
    };
    match narrowed {
        Some(raw) => {
            bytes.extend_from_slice(&raw);
            Ok(())
        }
        None => fail!(StructuralViolation, "Array element {} does not fit width {}", element, width),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;
    use crate::dex::ids::TypeId;
    use crate::dex::opcodes::opcode;
    use crate::dex::pools::tests::FakePools;
    use crate::dex::version::DexVersion;
    use std::sync::Arc;

    fn table() -> Arc<OpcodeTable> {
        OpcodeTable::get(DexVersion::Dex035, 26, true, false)
    }

    fn roundtrip(insns: &[Instruction], pools: &FakePools) -> Vec<u8> {
        let table = table();
        let mut bytes = vec![];
        write_instructions(&mut bytes, insns, &table, pools).unwrap();
        let units: usize = insns.iter().map(|i| i.unit_count()).sum();
        assert_eq!(bytes.len(), units * 2);
        let mut ix = 0;
        let back = read_instructions(&bytes, &mut ix, units, &table, pools).unwrap();
        assert_eq!(back, insns);
        bytes
    }

    #[test]
    fn const4_minus_one() {
        let op = opcode("const/4").unwrap();
        let insn = Instruction::Format11n { opcode: op, a: 0, literal: -1 };
        let bytes = roundtrip(&[insn], &FakePools::default());
        assert_eq!(u16::from_le_bytes([bytes[0], bytes[1]]), 0x12 | (0xF << 12));
    }

    #[test]
    fn literals_and_offsets() {
        let insns = vec![
            Instruction::Format21ih { opcode: opcode("const/high16").unwrap(), a: 1, literal: 0x7fff0000 },
            Instruction::Format21lh { opcode: opcode("const-wide/high16").unwrap(), a: 2, literal: -0x1_0000_0000_0000 },
            Instruction::Format21s { opcode: opcode("const/16").unwrap(), a: 3, literal: -32768 },
            Instruction::Format31i { opcode: opcode("const").unwrap(), a: 4, literal: i32::MIN },
            Instruction::Format51l { opcode: opcode("const-wide").unwrap(), a: 5, literal: -2 },
            Instruction::Format22b { opcode: opcode("add-int/lit8").unwrap(), a: 1, b: 2, literal: -128 },
            Instruction::Format22s { opcode: opcode("add-int/lit16").unwrap(), a: 1, b: 2, literal: 300 },
            Instruction::Format10t { opcode: opcode("goto").unwrap(), offset: -128 },
            Instruction::Format20t { opcode: opcode("goto/16").unwrap(), offset: -300 },
            Instruction::Format30t { opcode: opcode("goto/32").unwrap(), offset: 70000 },
            Instruction::Format22t { opcode: opcode("if-eq").unwrap(), a: 15, b: 0, offset: -2 },
            Instruction::Format21t { opcode: opcode("if-eqz").unwrap(), a: 200, offset: 4 },
            Instruction::Format23x { opcode: opcode("add-int").unwrap(), a: 1, b: 254, c: 255 },
            Instruction::Format32x { opcode: opcode("move/16").unwrap(), a: 1000, b: 65535 },
            Instruction::Format22x { opcode: opcode("move/from16").unwrap(), a: 255, b: 300 },
            Instruction::Format12x { opcode: opcode("move").unwrap(), a: 1, b: 15 },
            Instruction::Format10x { opcode: opcode("return-void").unwrap() },
        ];
        roundtrip(&insns, &FakePools::default());
    }

    #[test]
    fn references() {
        let pools = FakePools::with_strings(&["LFoo;", "hello", "[I"]);
        let insns = vec![
            Instruction::Format21c {
                opcode: opcode("const-string").unwrap(),
                a: 0,
                reference: Reference::String("hello".to_string()),
            },
            Instruction::Format31c {
                opcode: opcode("const-string/jumbo").unwrap(),
                a: 0,
                reference: Reference::String("LFoo;".to_string()),
            },
            Instruction::Format22c {
                opcode: opcode("instance-of").unwrap(),
                a: 1,
                b: 2,
                reference: Reference::Type(TypeId::of("LFoo;")),
            },
            Instruction::Format35c {
                opcode: opcode("filled-new-array").unwrap(),
                registers: vec![1, 2, 3, 4, 5],
                reference: Reference::Type(TypeId::of("[I")),
            },
            Instruction::Format3rc {
                opcode: opcode("filled-new-array/range").unwrap(),
                start_register: 300,
                register_count: 2,
                reference: Reference::Type(TypeId::of("[I")),
            },
        ];
        let bytes = roundtrip(&insns, &pools);
        // filled-new-array: A=5, G=5, then BBBB=2, FEDC=0x4321
        assert_eq!(&bytes[14..20], &[0x24, 0x55, 2, 0, 0x21, 0x43]);
    }

    #[test]
    fn wrong_reference_kind() {
        let pools = FakePools::with_strings(&["LFoo;"]);
        let insn = Instruction::Format21c {
            opcode: opcode("const-string").unwrap(),
            a: 0,
            reference: Reference::Type(TypeId::of("LFoo;")),
        };
        let err = write_instruction(&mut vec![], &insn, &table(), &pools).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::StructuralViolation);
    }

    #[test]
    fn width_checks() {
        let table = table();
        let pools = FakePools::default();
        let too_big = [
            Instruction::Format11n { opcode: opcode("const/4").unwrap(), a: 0, literal: 8 },
            Instruction::Format12x { opcode: opcode("move").unwrap(), a: 16, b: 0 },
            Instruction::Format21ih { opcode: opcode("const/high16").unwrap(), a: 0, literal: 0x10001 },
            Instruction::Format21lh { opcode: opcode("const-wide/high16").unwrap(), a: 0, literal: 1 },
            Instruction::Format10t { opcode: opcode("goto").unwrap(), offset: 128 },
        ];
        for insn in &too_big {
            let err = write_instruction(&mut vec![], insn, &table, &pools).unwrap_err();
            assert_eq!(err.kind(), DexErrorKind::StructuralViolation, "{}", insn);
            assert!(err.message().starts_with("Illegal instruction"), "{}", err);
        }
    }

    #[test]
    fn payloads() {
        let insns = vec![
            Instruction::packed_switch_payload(10, vec![4, 8, -6]).unwrap(),
            Instruction::sparse_switch_payload(vec![
                SwitchElement { key: 100, offset: 3 },
                SwitchElement { key: -5, offset: 7 },
            ])
            .unwrap(),
            Instruction::array_payload(1, vec![1, -1, 127]).unwrap(),
            Instruction::array_payload(2, vec![-32768, 5]).unwrap(),
            Instruction::array_payload(8, vec![i64::MIN]).unwrap(),
        ];
        let bytes = roundtrip(&insns, &FakePools::default());
        assert_eq!(&bytes[..4], &[0x00, 0x01, 3, 0]);
    }

    #[test]
    fn misaligned_payload() {
        let insn = Instruction::packed_switch_payload(0, vec![1]).unwrap();
        let mut bytes = vec![0, 0];
        let err = write_instruction(&mut bytes, &insn, &table(), &FakePools::default()).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::StructuralViolation);
    }

    #[test]
    fn array_element_must_fit() {
        let insn = Instruction::ArrayPayload { opcode: opcode("array-payload").unwrap(), element_width: 1, elements: vec![200] };
        let err = write_instruction(&mut vec![], &insn, &table(), &FakePools::default()).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::StructuralViolation);
    }

    #[test]
    fn unknown_and_truncated() {
        let table = table();
        let pools = FakePools::default();
        // 0x3e is unused
        assert_eq!(read_instruction(&[0x3e, 0], &mut 0, &table, &pools).unwrap_err().kind(), DexErrorKind::InvalidFormat);
        // return-void with a nonzero argument byte
        assert!(read_instruction(&[0x0e, 1], &mut 0, &table, &pools).is_err());
        // const/16 cut short
        assert!(read_instructions(&[0x13, 0], &mut 0, 2, &table, &pools).is_err());
    }
}
