//! # dexcodec
//!
//! A library for reading and writing Android dex and compact dex files
//!
use crate::dex::error::DexError;
use crate::dex::model::Dex;
use crate::dex::options::{ReadOptions, WriteOptions};
use crate::dex::reader::{read_container, DexReader};

pub mod dex;
#[cfg(test)]
mod tests;

/// Decodes the dex file at the start of `bytes` with the default options.
///
/// # Examples
///
/// ```no_run
///  use dexcodec::read_dex;
///
///  let bytes = std::fs::read("classes.dex").unwrap();
///  let dex = read_dex(&bytes).unwrap();
///  println!("{:} classes loaded.", dex.classes.len());
/// ```
pub fn read_dex(bytes: &[u8]) -> Result<Dex, DexError> {
    read_dex_with(bytes, &ReadOptions::default())
}

/// Decodes the dex file at the start of `bytes`.
pub fn read_dex_with(bytes: &[u8], options: &ReadOptions) -> Result<Dex, DexError> {
    DexReader::new(bytes, 0, options)?.read_dex()
}

/// Decodes every file of a dex 041 container, in buffer order. Older
/// versions read as a container of one file.
pub fn read_dex_container(bytes: &[u8], options: &ReadOptions) -> Result<Vec<Dex>, DexError> {
    read_container(bytes, options)
}

/// Encodes `dex` with the default options: API 26 and the newest standard
/// version it supports.
///
/// # Examples
///
/// ```
///  use dexcodec::dex::ids::TypeId;
///  use dexcodec::dex::model::{ClassDef, Dex};
///  use dexcodec::{read_dex, write_dex};
///
///  let class = ClassDef::new(TypeId::of("LHello;"), 1, Some(TypeId::of("Ljava/lang/Object;")));
///  let bytes = write_dex(&Dex::new(vec![class])).unwrap();
///  assert_eq!(read_dex(&bytes).unwrap().classes[0].class_type.descriptor, "LHello;");
/// ```
pub fn write_dex(dex: &Dex) -> Result<Vec<u8>, DexError> {
    write_dex_with(dex, &WriteOptions::default())
}

/// Encodes `dex` as a single file of `options.version`.
pub fn write_dex_with(dex: &Dex, options: &WriteOptions) -> Result<Vec<u8>, DexError> {
    dex::writer::write(dex, options)
}

/// Encodes several files into one dex 041 container.
pub fn write_dex_container(dexes: &[Dex], options: &WriteOptions) -> Result<Vec<u8>, DexError> {
    dex::writer::write_container(dexes, options)
}
