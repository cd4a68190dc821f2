//! `debug_info_item`: parameter names and the line/local state machine.
//!
//! The model keeps debug events as a flat list. Addresses advance through
//! [`DebugItem::AdvancePc`]; a [`DebugItem::LineNumber`] marks a new
//! position. Encoding folds both into special opcodes where possible.

use log::trace;

use crate::dex::error::DexError;
use crate::dex::ids::TypeId;
use crate::dex::pools::{IndexResolver, ReferenceSource};
use crate::dex::{read_sleb128, read_u1, read_uleb128, read_uleb128p1, write_sleb128, write_u1, write_uleb128};

pub const DBG_END_SEQUENCE: u8 = 0x00;
pub const DBG_ADVANCE_PC: u8 = 0x01;
pub const DBG_ADVANCE_LINE: u8 = 0x02;
pub const DBG_START_LOCAL: u8 = 0x03;
pub const DBG_START_LOCAL_EXTENDED: u8 = 0x04;
pub const DBG_END_LOCAL: u8 = 0x05;
pub const DBG_RESTART_LOCAL: u8 = 0x06;
pub const DBG_SET_PROLOGUE_END: u8 = 0x07;
pub const DBG_SET_EPILOGUE_BEGIN: u8 = 0x08;
pub const DBG_SET_FILE: u8 = 0x09;
pub const DBG_FIRST_SPECIAL: u8 = 0x0a;
pub const DBG_LAST_SPECIAL: u8 = 0xff;
pub const DBG_LINE_BASE: i32 = -4;
pub const DBG_LINE_RANGE: i32 = 15;
const DBG_LINE_CEIL: i32 = DBG_LINE_BASE + DBG_LINE_RANGE - 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DebugItem {
    AdvancePc { addr_diff: u32 },
    StartLocal { register: u32, name: Option<String>, local_type: Option<TypeId>, signature: Option<String> },
    EndLocal { register: u32 },
    RestartLocal { register: u32 },
    SetPrologueEnd,
    SetEpilogueBegin,
    SetFile { name: Option<String> },
    LineNumber { line: i32 },
}

/// Everything a `debug_info_item` holds for one method.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct DebugInfo {
    pub parameter_names: Vec<Option<String>>,
    pub items: Vec<DebugItem>,
}

impl DebugInfo {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty() && self.parameter_names.iter().all(|n| n.is_none())
    }

    pub(crate) fn read<R: ReferenceSource + ?Sized>(bytes: &[u8], ix: &mut usize, source: &R) -> Result<DebugInfo, DexError> {
        let start = *ix;
        let line_start = read_uleb128(bytes, ix)? as i32;
        let parameters_size = read_uleb128(bytes, ix)? as usize;
        if parameters_size > bytes.len().saturating_sub(*ix) {
            fail!(InvalidFormat, "Debug info at {} declares {} parameters", start, parameters_size);
        }
        let mut parameter_names = Vec::with_capacity(parameters_size);
        for _ in 0..parameters_size {
            parameter_names.push(optional_string(source, read_uleb128p1(bytes, ix)?)?);
        }
        let items = read_debug_items(bytes, ix, line_start, source)?;
        trace!("debug info at {}: {} parameters, {} items", start, parameters_size, items.len());
        Ok(DebugInfo { parameter_names, items })
    }

    pub(crate) fn write<I: IndexResolver + ?Sized>(&self, bytes: &mut Vec<u8>, resolver: &I) -> Result<usize, DexError> {
        let mut sequence = Vec::new();
        let line_start = write_debug_items(&mut sequence, &self.items, resolver)?;

        let mut c = 0;
        c += write_uleb128(bytes, line_start as u32);
        c += write_uleb128(bytes, self.parameter_names.len() as u32);
        for name in &self.parameter_names {
            let index = match name {
                Some(name) => resolver.string_index(name)? as i32,
                None => -1,
            };
            c += write_uleb128(bytes, (index + 1) as u32);
        }
        bytes.extend_from_slice(&sequence);
        Ok(c + sequence.len())
    }
}

fn optional_string<R: ReferenceSource + ?Sized>(source: &R, index: i32) -> Result<Option<String>, DexError> {
    if index < 0 {
        Ok(None)
    } else {
        Ok(Some(source.string(index as u32)?))
    }
}

fn write_optional_index(bytes: &mut Vec<u8>, index: Option<u32>) -> usize {
    // uleb128p1: NO_INDEX wraps to 0
    write_uleb128(bytes, index.map_or(0, |i| i.wrapping_add(1)))
}

/// Decodes the state machine into items. An address change is only reported
/// right before the item it applies to.
pub(crate) fn read_debug_items<R: ReferenceSource + ?Sized>(
    bytes: &[u8],
    ix: &mut usize,
    line_start: i32,
    source: &R,
) -> Result<Vec<DebugItem>, DexError> {
    let mut out = Vec::new();
    let (mut address, mut emitted_address) = (0u32, 0u32);
    let (mut line, mut emitted_line) = (line_start, 0i32);

    fn flush_address(out: &mut Vec<DebugItem>, address: u32, emitted: &mut u32) {
        if address != *emitted {
            out.push(DebugItem::AdvancePc { addr_diff: address.wrapping_sub(*emitted) });
            *emitted = address;
        }
    }

    loop {
        let opcode = read_u1(bytes, ix)?;
        match opcode {
            DBG_END_SEQUENCE => break,
            DBG_ADVANCE_PC => {
                address = address.wrapping_add(read_uleb128(bytes, ix)?);
            }
            DBG_ADVANCE_LINE => {
                line = line.wrapping_add(read_sleb128(bytes, ix)?);
            }
            DBG_START_LOCAL | DBG_START_LOCAL_EXTENDED => {
                let register = read_uleb128(bytes, ix)?;
                let name = optional_string(source, read_uleb128p1(bytes, ix)?)?;
                let type_idx = read_uleb128p1(bytes, ix)?;
                let local_type = if type_idx < 0 { None } else { Some(source.type_id(type_idx as u32)?) };
                let signature = if opcode == DBG_START_LOCAL_EXTENDED {
                    optional_string(source, read_uleb128p1(bytes, ix)?)?
                } else {
                    None
                };
                flush_address(&mut out, address, &mut emitted_address);
                out.push(DebugItem::StartLocal { register, name, local_type, signature });
            }
            DBG_END_LOCAL => {
                let register = read_uleb128(bytes, ix)?;
                flush_address(&mut out, address, &mut emitted_address);
                out.push(DebugItem::EndLocal { register });
            }
            DBG_RESTART_LOCAL => {
                let register = read_uleb128(bytes, ix)?;
                flush_address(&mut out, address, &mut emitted_address);
                out.push(DebugItem::RestartLocal { register });
            }
            DBG_SET_PROLOGUE_END => {
                flush_address(&mut out, address, &mut emitted_address);
                out.push(DebugItem::SetPrologueEnd);
            }
            DBG_SET_EPILOGUE_BEGIN => {
                flush_address(&mut out, address, &mut emitted_address);
                out.push(DebugItem::SetEpilogueBegin);
            }
            DBG_SET_FILE => {
                let name = optional_string(source, read_uleb128p1(bytes, ix)?)?;
                flush_address(&mut out, address, &mut emitted_address);
                out.push(DebugItem::SetFile { name });
            }
            special => {
                let adjusted = (special - DBG_FIRST_SPECIAL) as i32;
                address = address.wrapping_add((adjusted / DBG_LINE_RANGE) as u32);
                line = line.wrapping_add(DBG_LINE_BASE + adjusted % DBG_LINE_RANGE);
                flush_address(&mut out, address, &mut emitted_address);
                if line != emitted_line {
                    out.push(DebugItem::LineNumber { line });
                    emitted_line = line;
                }
            }
        }
    }
    Ok(out)
}

/// Encodes items into the state machine and returns the `line_start` the
/// sequence assumes. A `LineNumber` equal to the last emitted line writes
/// nothing; before any line is emitted that line is 0, so a leading line 0
/// is dropped.
pub(crate) fn write_debug_items<I: IndexResolver + ?Sized>(
    bytes: &mut Vec<u8>,
    items: &[DebugItem],
    resolver: &I,
) -> Result<i32, DexError> {
    let (mut address, mut emitted_address) = (0i64, 0i64);
    let mut emitted_line = 0i32;
    let mut line_start = 1;

    fn flush_address(bytes: &mut Vec<u8>, address: i64, emitted: &mut i64) {
        if address != *emitted {
            write_u1(bytes, DBG_ADVANCE_PC);
            write_uleb128(bytes, (address - *emitted) as u32);
            *emitted = address;
        }
    }

    for item in items {
        match item {
            DebugItem::AdvancePc { addr_diff } => {
                address += *addr_diff as i64;
            }
            DebugItem::StartLocal { register, name, local_type, signature } => {
                let name = name.as_deref().map(|n| resolver.string_index(n)).transpose()?;
                let local_type = local_type.as_ref().map(|t| resolver.type_index(t)).transpose()?;
                let signature_index = signature.as_deref().map(|s| resolver.string_index(s)).transpose()?;
                flush_address(bytes, address, &mut emitted_address);
                write_u1(bytes, if signature.is_some() { DBG_START_LOCAL_EXTENDED } else { DBG_START_LOCAL });
                write_uleb128(bytes, *register);
                write_optional_index(bytes, name);
                write_optional_index(bytes, local_type);
                if signature_index.is_some() {
                    write_optional_index(bytes, signature_index);
                }
            }
            DebugItem::EndLocal { register } => {
                flush_address(bytes, address, &mut emitted_address);
                write_u1(bytes, DBG_END_LOCAL);
                write_uleb128(bytes, *register);
            }
            DebugItem::RestartLocal { register } => {
                flush_address(bytes, address, &mut emitted_address);
                write_u1(bytes, DBG_RESTART_LOCAL);
                write_uleb128(bytes, *register);
            }
            DebugItem::SetPrologueEnd => {
                flush_address(bytes, address, &mut emitted_address);
                write_u1(bytes, DBG_SET_PROLOGUE_END);
            }
            DebugItem::SetEpilogueBegin => {
                flush_address(bytes, address, &mut emitted_address);
                write_u1(bytes, DBG_SET_EPILOGUE_BEGIN);
            }
            DebugItem::SetFile { name } => {
                let name = name.as_deref().map(|n| resolver.string_index(n)).transpose()?;
                flush_address(bytes, address, &mut emitted_address);
                write_u1(bytes, DBG_SET_FILE);
                write_optional_index(bytes, name);
            }
            DebugItem::LineNumber { line: new_line } => {
                let line = *new_line;
                if line == emitted_line {
                    continue;
                }
                if emitted_line == 0 {
                    line_start = line;
                    emitted_line = line;
                }
                let (addr_diff, line_diff, opcode) = special_opcode(address - emitted_address, line - emitted_line);
                if addr_diff != 0 {
                    write_u1(bytes, DBG_ADVANCE_PC);
                    write_uleb128(bytes, addr_diff as u32);
                }
                if line_diff != 0 {
                    write_u1(bytes, DBG_ADVANCE_LINE);
                    write_sleb128(bytes, line_diff);
                }
                write_u1(bytes, opcode);
                emitted_address = address;
                emitted_line = line;
            }
        }
    }
    write_u1(bytes, DBG_END_SEQUENCE);
    Ok(line_start)
}

/// Splits an (address, line) step into the leftover address advance, the
/// leftover line advance and the special opcode that covers the rest.
fn special_opcode(addr_diff: i64, line_diff: i32) -> (i64, i32, u8) {
    let mut adjusted = line_diff.clamp(DBG_LINE_BASE, DBG_LINE_CEIL);
    let line_rest = line_diff - adjusted;
    adjusted -= DBG_LINE_BASE;

    let max_addr = ((DBG_LAST_SPECIAL - DBG_FIRST_SPECIAL) as i32 - adjusted) / DBG_LINE_RANGE;
    let covered = (max_addr as i64).min(addr_diff);
    let addr_rest = addr_diff - covered;

    let opcode = adjusted + covered as i32 * DBG_LINE_RANGE + DBG_FIRST_SPECIAL as i32;
    (addr_rest, line_rest, opcode as u8)
}
