//! `code_item`: register counts, the instruction stream and the try table,
//! in the standard layout or behind the compact pre-header.

use std::collections::HashMap;

use log::trace;

use crate::dex::dex_file::{CODE_ITEM_ALIGNMENT, COMPACT_CODE_ITEM_ALIGNMENT, NO_OFFSET, TRY_ITEM_ALIGNMENT, TRY_ITEM_SIZE};
use crate::dex::error::{DexError, ResultExt};
use crate::dex::instruction_codec::{read_instructions, write_instructions};
use crate::dex::instructions::Instruction;
use crate::dex::model::{ExceptionHandler, MethodImplementation, TryBlock};
use crate::dex::opcodes::OpcodeTable;
use crate::dex::pools::{IndexResolver, ItemSet, ReferenceSource};
use crate::dex::{
    align_to, fill_to_alignment, overwrite_u2, overwrite_u4, read_sleb128, read_u2, read_u4, read_uleb128, write_sleb128,
    write_u2, write_u4, write_uleb128,
};

const REGISTERS_SIZE_SHIFT: u32 = 12;
const INS_SIZE_SHIFT: u32 = 8;
const OUTS_SIZE_SHIFT: u32 = 4;
const TRIES_SIZE_SHIFT: u32 = 0;
const INSNS_SIZE_SHIFT: u32 = 5;
const INSNS_SIZE_MASK: u32 = 0xffff >> INSNS_SIZE_SHIFT;

const FLAG_PREHEADER_REGISTERS_SIZE: u16 = 0b00001;
const FLAG_PREHEADER_INS_SIZE: u16 = 0b00010;
const FLAG_PREHEADER_OUTS_SIZE: u16 = 0b00100;
const FLAG_PREHEADER_TRIES_SIZE: u16 = 0b01000;
const FLAG_PREHEADER_INSNS_SIZE: u16 = 0b10000;

/// A decoded code item. `debug_info_off` is only set in standard files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CodeItem {
    pub registers: u16,
    pub ins: u16,
    pub outs: u16,
    pub debug_info_off: u32,
    pub instructions: Vec<Instruction>,
    pub try_blocks: Vec<TryBlock>,
}

/// What the writer needs for one code item beyond the implementation.
pub(crate) struct CodeLayout<'a> {
    pub implementation: &'a MethodImplementation,
    pub ins: u16,
    pub outs: u16,
    pub debug_info_off: u32,
}

/// The handler part of a try block, shared between blocks.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CatchHandler {
    handlers: Vec<ExceptionHandler>,
    catch_all_address: Option<u32>,
}

impl CatchHandler {
    fn of(block: &TryBlock) -> CatchHandler {
        CatchHandler { handlers: block.handlers.clone(), catch_all_address: block.catch_all_address }
    }

    fn read<R: ReferenceSource + ?Sized>(bytes: &[u8], ix: &mut usize, source: &R) -> Result<CatchHandler, DexError> {
        let size = read_sleb128(bytes, ix)?;
        let count = size.unsigned_abs() as usize;
        if count > bytes.len().saturating_sub(*ix) {
            fail!(InvalidFormat, "Catch handler with {} entries runs past the end", count);
        }
        let mut handlers = Vec::with_capacity(count);
        for _ in 0..count {
            let exception_type = source.type_id(read_uleb128(bytes, ix)?)?;
            let address = read_uleb128(bytes, ix)?;
            handlers.push(ExceptionHandler { exception_type, address });
        }
        let catch_all_address = if size <= 0 { Some(read_uleb128(bytes, ix)?) } else { None };
        Ok(CatchHandler { handlers, catch_all_address })
    }

    fn write<I: IndexResolver + ?Sized>(&self, bytes: &mut Vec<u8>, resolver: &I) -> Result<(), DexError> {
        if self.handlers.is_empty() && self.catch_all_address.is_none() {
            fail!(StructuralViolation, "Unable to write empty catch handler");
        }
        let count = self.handlers.len() as i32;
        write_sleb128(bytes, if self.catch_all_address.is_some() { -count } else { count });
        for handler in &self.handlers {
            write_uleb128(bytes, resolver.type_index(&handler.exception_type)?);
            write_uleb128(bytes, handler.address);
        }
        if let Some(address) = self.catch_all_address {
            write_uleb128(bytes, address);
        }
        Ok(())
    }
}

/// Reads one pre-header unit, walking backwards from `*ix`.
fn read_u2_backward(bytes: &[u8], ix: &mut usize) -> Result<u16, DexError> {
    if *ix < 2 {
        fail!(InvalidFormat, "Compact code item pre-header runs before the data section");
    }
    *ix -= 2;
    let mut at = *ix;
    read_u2(bytes, &mut at)
}

impl CodeItem {
    /// Reads the code item at `offset` in `data`. Standard offsets are
    /// absolute; compact ones are relative to the data section.
    pub(crate) fn read<R: ReferenceSource + ?Sized>(
        data: &[u8],
        offset: usize,
        compact: bool,
        table: &OpcodeTable,
        source: &R,
    ) -> Result<CodeItem, DexError> {
        let mut ix = offset;
        let (registers, ins, outs, tries, insns, debug_info_off);
        if compact {
            let mut preheader = offset;
            let fields = read_u2(data, &mut ix)? as u32;
            let insns_and_flags = read_u2(data, &mut ix)?;

            let mut insns_count = (insns_and_flags >> INSNS_SIZE_SHIFT) as u32;
            let mut registers_size = (fields >> REGISTERS_SIZE_SHIFT) & 0xf;
            let mut ins_size = (fields >> INS_SIZE_SHIFT) & 0xf;
            let mut outs_size = (fields >> OUTS_SIZE_SHIFT) & 0xf;
            let mut tries_size = (fields >> TRIES_SIZE_SHIFT) & 0xf;

            if insns_and_flags & FLAG_PREHEADER_INSNS_SIZE != 0 {
                let low = read_u2_backward(data, &mut preheader)? as u32;
                let high = read_u2_backward(data, &mut preheader)? as u32;
                insns_count += low + (high << 16);
            }
            if insns_and_flags & FLAG_PREHEADER_REGISTERS_SIZE != 0 {
                registers_size += read_u2_backward(data, &mut preheader)? as u32;
            }
            if insns_and_flags & FLAG_PREHEADER_INS_SIZE != 0 {
                ins_size += read_u2_backward(data, &mut preheader)? as u32;
            }
            if insns_and_flags & FLAG_PREHEADER_OUTS_SIZE != 0 {
                outs_size += read_u2_backward(data, &mut preheader)? as u32;
            }
            if insns_and_flags & FLAG_PREHEADER_TRIES_SIZE != 0 {
                tries_size += read_u2_backward(data, &mut preheader)? as u32;
            }
            registers_size += ins_size;
            if registers_size > u16::MAX as u32 || ins_size > u16::MAX as u32 || outs_size > u16::MAX as u32 {
                fail!(InvalidFormat, "Compact code item at {} declares oversized register counts", offset);
            }

            registers = registers_size as u16;
            ins = ins_size as u16;
            outs = outs_size as u16;
            tries = tries_size as usize;
            insns = insns_count as usize;
            debug_info_off = NO_OFFSET;
        } else {
            registers = read_u2(data, &mut ix)?;
            ins = read_u2(data, &mut ix)?;
            outs = read_u2(data, &mut ix)?;
            tries = read_u2(data, &mut ix)? as usize;
            debug_info_off = read_u4(data, &mut ix)?;
            insns = read_u4(data, &mut ix)? as usize;
        }

        let instructions = read_instructions(data, &mut ix, insns, table, source)?;
        let mut try_blocks = Vec::with_capacity(tries);
        if tries > 0 {
            ix = align_to(ix, TRY_ITEM_ALIGNMENT);
            let mut tries_ix = ix;
            ix += tries * TRY_ITEM_SIZE;

            let handlers_start = ix;
            let handlers_size = read_uleb128(data, &mut ix)? as usize;
            if handlers_size > data.len().saturating_sub(ix) {
                fail!(InvalidFormat, "Code item at {} declares {} catch handlers", offset, handlers_size);
            }
            let mut handlers = HashMap::new();
            for _ in 0..handlers_size {
                let handler_offset = ix - handlers_start;
                handlers.insert(handler_offset, CatchHandler::read(data, &mut ix, source)?);
            }

            for _ in 0..tries {
                let start_address = read_u4(data, &mut tries_ix)?;
                let unit_count = read_u2(data, &mut tries_ix)?;
                let handler_off = read_u2(data, &mut tries_ix)? as usize;
                let handler = match handlers.get(&handler_off) {
                    Some(h) => h,
                    None => fail!(InvalidFormat, "Unable to find catch handler with offset {}", handler_off),
                };
                try_blocks.push(TryBlock {
                    start_address,
                    unit_count,
                    handlers: handler.handlers.clone(),
                    catch_all_address: handler.catch_all_address,
                });
            }
        }
        trace!("code item at {:#x}: {} registers, {} units, {} tries", offset, registers, insns, tries);
        Ok(CodeItem { registers, ins, outs, debug_info_off, instructions, try_blocks })
    }

    pub(crate) fn into_implementation(self) -> MethodImplementation {
        MethodImplementation {
            register_count: self.registers,
            instructions: self.instructions,
            try_blocks: self.try_blocks,
            debug_items: vec![],
        }
    }
}

/// Counts the code units and whether a payload is among them.
fn count_code_units(instructions: &[Instruction]) -> (usize, bool) {
    let units = instructions.iter().map(|i| i.unit_count()).sum();
    (units, instructions.iter().any(|i| i.is_payload()))
}

/// Writes the compact pre-header and base header; returns the position of
/// the base header, which is what the code item offset points at.
fn write_preheader(
    bytes: &mut Vec<u8>,
    registers: u32,
    ins: u32,
    outs: u32,
    tries: u32,
    insns: u32,
    has_payloads: bool,
) -> Result<usize, DexError> {
    let Some(mut registers) = registers.checked_sub(ins) else {
        fail!(StructuralViolation, "Register count {} is below the {} incoming registers", registers, ins);
    };
    let (mut ins, mut outs, mut tries, mut insns) = (ins, outs, tries, insns);
    let fields = (registers & 0xf) << REGISTERS_SIZE_SHIFT
        | (ins & 0xf) << INS_SIZE_SHIFT
        | (outs & 0xf) << OUTS_SIZE_SHIFT
        | (tries & 0xf) << TRIES_SIZE_SHIFT;
    registers &= !0xf;
    ins &= !0xf;
    outs &= !0xf;
    tries &= !0xf;

    let mut insns_and_flags = ((insns & INSNS_SIZE_MASK) << INSNS_SIZE_SHIFT) as u16;
    insns &= !INSNS_SIZE_MASK;

    if has_payloads {
        // the instructions must start 4-aligned, so the pre-header unit count
        // has to match bit 1 of the position
        let odd_units = (tries != 0) ^ (outs != 0) ^ (ins != 0) ^ (registers != 0) ^ (bytes.len() & 0b10 != 0);
        if odd_units {
            write_u2(bytes, 0);
        }
    }

    if tries != 0 {
        write_u2(bytes, tries as u16);
        insns_and_flags |= FLAG_PREHEADER_TRIES_SIZE;
    }
    if outs != 0 {
        write_u2(bytes, outs as u16);
        insns_and_flags |= FLAG_PREHEADER_OUTS_SIZE;
    }
    if ins != 0 {
        write_u2(bytes, ins as u16);
        insns_and_flags |= FLAG_PREHEADER_INS_SIZE;
    }
    if registers != 0 {
        write_u2(bytes, registers as u16);
        insns_and_flags |= FLAG_PREHEADER_REGISTERS_SIZE;
    }
    if insns != 0 {
        insns_and_flags |= FLAG_PREHEADER_INSNS_SIZE;
        write_u2(bytes, (insns >> 16) as u16);
        write_u2(bytes, insns as u16);
    }

    let start = bytes.len();
    write_u2(bytes, fields as u16);
    write_u2(bytes, insns_and_flags);
    Ok(start)
}

/// Try blocks in start order; a shared start address means overlap.
fn sorted_try_blocks(blocks: &[TryBlock]) -> Result<Vec<&TryBlock>, DexError> {
    let mut sorted: Vec<&TryBlock> = blocks.iter().collect();
    sorted.sort_by_key(|b| b.start_address);
    for pair in sorted.windows(2) {
        if pair[0].start_address == pair[1].start_address {
            fail!(StructuralViolation, "Try blocks overlap at address {}", pair[0].start_address);
        }
    }
    Ok(sorted)
}

/// Appends a code item to `bytes`, aligning first, and returns the position
/// the item's offset refers to.
pub(crate) fn write_code_item<I: IndexResolver + ?Sized>(
    bytes: &mut Vec<u8>,
    code: &CodeLayout,
    compact: bool,
    table: &OpcodeTable,
    resolver: &I,
) -> Result<usize, DexError> {
    let implementation = code.implementation;
    fill_to_alignment(bytes, if compact { COMPACT_CODE_ITEM_ALIGNMENT } else { CODE_ITEM_ALIGNMENT });

    let try_blocks = sorted_try_blocks(&implementation.try_blocks)?;
    if try_blocks.len() > u16::MAX as usize {
        fail!(StructuralViolation, "Too many try blocks: {}", try_blocks.len());
    }
    let (insns, has_payloads) = count_code_units(&implementation.instructions);
    if insns > u32::MAX as usize {
        fail!(StructuralViolation, "Too many code units: {}", insns);
    }

    let start = if compact {
        write_preheader(
            bytes,
            implementation.register_count as u32,
            code.ins as u32,
            code.outs as u32,
            try_blocks.len() as u32,
            insns as u32,
            has_payloads,
        )?
    } else {
        let start = bytes.len();
        write_u2(bytes, implementation.register_count);
        write_u2(bytes, code.ins);
        write_u2(bytes, code.outs);
        write_u2(bytes, try_blocks.len() as u16);
        write_u4(bytes, code.debug_info_off);
        write_u4(bytes, insns as u32);
        start
    };

    let insns_start = bytes.len();
    write_instructions(bytes, &implementation.instructions, table, resolver)?;
    let written = bytes.len() - insns_start;
    if written != insns * 2 {
        fail!(StructuralViolation, "Calculated instructions size({}) != written bytes({})", insns * 2, written);
    }

    if !try_blocks.is_empty() {
        fill_to_alignment(bytes, TRY_ITEM_ALIGNMENT);
        let tries_start = bytes.len();
        bytes.resize(tries_start + TRY_ITEM_SIZE * try_blocks.len(), 0);

        let mut handlers = ItemSet::default();
        for block in &try_blocks {
            handlers.insert(CatchHandler::of(block));
        }
        let handlers_start = bytes.len();
        write_uleb128(bytes, handlers.len() as u32);
        let mut handler_offsets = Vec::with_capacity(handlers.len());
        for handler in handlers.iter() {
            let offset = bytes.len() - handlers_start;
            if offset > u16::MAX as usize {
                fail!(StructuralViolation, "Catch handler offset {} does not fit 16 bits", offset);
            }
            handler.write(bytes, resolver)?;
            handler_offsets.push(offset as u16);
        }

        for (i, block) in try_blocks.iter().enumerate() {
            let position = tries_start + i * TRY_ITEM_SIZE;
            let Some(id) = handlers.id(&CatchHandler::of(block)) else {
                fail!(UnresolvedReference, "Unable to find offset for catch handler");
            };
            overwrite_u4(bytes, position, block.start_address);
            overwrite_u2(bytes, position + 4, block.unit_count);
            overwrite_u2(bytes, position + 6, handler_offsets[id]);
        }
    }
    Ok(start)
}

/// Writes a code item for a method, attaching the owning method to errors.
pub(crate) fn write_method_code<I: IndexResolver + ?Sized>(
    bytes: &mut Vec<u8>,
    code: &CodeLayout,
    compact: bool,
    table: &OpcodeTable,
    resolver: &I,
    method: &str,
) -> Result<usize, DexError> {
    write_code_item(bytes, code, compact, table, resolver).context(|| format!("code item of {}", method))
}
