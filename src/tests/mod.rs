mod containers;
mod random_values;
mod reader_validation;
mod roundtrip;

use crate::dex::annotations::{Annotation, AnnotationVisibility};
use crate::dex::dex_file::{ACC_CONSTRUCTOR, ACC_PUBLIC};
use crate::dex::encoded_values::{AnnotationElement, EncodedValue};
use crate::dex::error::DexError;
use crate::dex::ids::{MethodId, ProtoId, TypeId};
use crate::dex::instructions::{Instruction, Reference};
use crate::dex::model::{ClassDef, Dex, MethodDef, MethodImplementation};
use crate::dex::opcodes::opcode;
use crate::dex::options::{DexOptions, ReadOptions, WriteOptions};
use crate::dex::reader::DexReader;
use crate::dex::version::DexVersion;
use crate::dex::writer;

pub(crate) fn t(descriptor: &str) -> TypeId {
    TypeId::of(descriptor)
}

pub(crate) fn object() -> TypeId {
    t("Ljava/lang/Object;")
}

pub(crate) fn public_class(descriptor: &str) -> ClassDef {
    ClassDef::new(t(descriptor), ACC_PUBLIC, Some(object()))
}

pub(crate) fn return_void() -> Instruction {
    Instruction::Format10x { opcode: opcode("return-void").unwrap() }
}

pub(crate) fn const_string(a: u8, value: &str) -> Instruction {
    Instruction::Format21c { opcode: opcode("const-string").unwrap(), a, reference: Reference::String(value.to_string()) }
}

pub(crate) fn invoke(name: &str, registers: Vec<u8>, method: MethodId) -> Instruction {
    Instruction::Format35c { opcode: opcode(name).unwrap(), registers, reference: Reference::Method(method) }
}

/// `<init>()V` calling the Object constructor.
pub(crate) fn constructor() -> MethodDef {
    let mut init = MethodDef::new("<init>", t("V"), vec![], ACC_PUBLIC | ACC_CONSTRUCTOR);
    let object_init = MethodId::of(object(), "<init>", ProtoId::of(t("V"), vec![]));
    init.implementation = Some(MethodImplementation::new(1, vec![invoke("invoke-direct", vec![0], object_init), return_void()]));
    init
}

pub(crate) fn annotation(visibility: AnnotationVisibility, descriptor: &str, value: EncodedValue) -> Annotation {
    Annotation::new(visibility, t(descriptor), vec![AnnotationElement::of("value", value)]).unwrap()
}

pub(crate) fn options_for(api: i32, version: DexVersion) -> WriteOptions {
    let dex = DexOptions::default().with_target_api(api).unwrap();
    WriteOptions::new(dex, version).unwrap()
}

pub(crate) fn read_options(options: &WriteOptions) -> ReadOptions {
    ReadOptions::new(options.dex).unwrap()
}

/// Writes `dex` and decodes it again with matching options.
pub(crate) fn roundtrip(dex: &Dex, options: &WriteOptions) -> Result<Dex, DexError> {
    let bytes = writer::write(dex, options)?;
    DexReader::new(&bytes, 0, &read_options(options))?.read_dex()
}

pub(crate) fn u4_at(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}
