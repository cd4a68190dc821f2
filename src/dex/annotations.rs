//! DEX annotations-related structures and I/O
//!
//! Implements the core binary structures of the dex format:
//! - annotations_directory_item
//! - annotation_set_item
//! - annotation_set_ref_list
//! - annotation_item (wraps EncodedAnnotation)
//!
//! The raw items hold offsets and indices; [`Annotation`] is the resolved
//! form the program model uses.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dex::encoded_values::{AnnotationElement, EncodedAnnotation};
use crate::dex::error::DexError;
use crate::dex::ids::TypeId;
use crate::dex::pools::{IndexResolver, ReferenceSource};
use crate::dex::{read_u1, read_u4, write_u1, write_u4};

/// Who may see an annotation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AnnotationVisibility {
    Build = 0x00,
    Runtime = 0x01,
    System = 0x02,
}

impl AnnotationVisibility {
    pub fn of(value: u8) -> Result<AnnotationVisibility, DexError> {
        Ok(match value {
            0x00 => AnnotationVisibility::Build,
            0x01 => AnnotationVisibility::Runtime,
            0x02 => AnnotationVisibility::System,
            _ => fail!(InvalidFormat, "Unknown annotation visibility: {}", value),
        })
    }

    pub fn value(&self) -> u8 {
        *self as u8
    }
}

/// An annotation attached to a class, member or parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Annotation {
    pub visibility: AnnotationVisibility,
    pub annotation: EncodedAnnotation,
}

impl Annotation {
    pub fn new(
        visibility: AnnotationVisibility,
        annotation_type: TypeId,
        elements: Vec<AnnotationElement>,
    ) -> Result<Annotation, DexError> {
        Ok(Annotation { visibility, annotation: EncodedAnnotation::new(annotation_type, elements)? })
    }

    pub fn annotation_type(&self) -> &TypeId {
        &self.annotation.annotation_type
    }

    /// annotation_item
    /// https://source.android.com/docs/core/runtime/dex-format#annotation-item
    pub(crate) fn read<R: ReferenceSource + ?Sized>(
        bytes: &[u8],
        ix: &mut usize,
        source: &R,
    ) -> Result<Annotation, DexError> {
        let visibility = AnnotationVisibility::of(read_u1(bytes, ix)?)?;
        let annotation = EncodedAnnotation::read(bytes, ix, source, 0)?;
        Ok(Annotation { visibility, annotation })
    }

    pub(crate) fn write<I: IndexResolver + ?Sized>(&self, bytes: &mut Vec<u8>, resolver: &I) -> Result<usize, DexError> {
        let mut c = 0;
        c += write_u1(bytes, self.visibility.value());
        c += self.annotation.write(bytes, resolver)?;
        Ok(c)
    }
}

impl fmt::Display for Annotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{:?} {}", self.visibility, self.annotation.annotation_type)
    }
}

/// Returns the set ordered by annotation type, the order `annotation_set_item`
/// entries are stored in. A type may appear only once per set.
pub fn sorted_annotation_set(annotations: &[Annotation]) -> Result<Vec<Annotation>, DexError> {
    let mut sorted = annotations.to_vec();
    sorted.sort_by(|a, b| a.annotation_type().cmp(b.annotation_type()));
    for pair in sorted.windows(2) {
        if pair[0].annotation_type() == pair[1].annotation_type() {
            fail!(StructuralViolation, "Duplicate annotation type {} in one annotation set", pair[0].annotation_type());
        }
    }
    Ok(sorted)
}

/// Drops the run of empty sets at the end of a parameter annotation list.
pub fn trim_parameter_annotations(lists: &[Vec<Annotation>]) -> &[Vec<Annotation>] {
    let mut end = lists.len();
    while end > 0 && lists[end - 1].is_empty() {
        end -= 1;
    }
    &lists[..end]
}

fn read_offsets(bytes: &[u8], ix: &mut usize, what: &str) -> Result<Vec<u32>, DexError> {
    let size = read_u4(bytes, ix)? as usize;
    if size > bytes.len().saturating_sub(*ix) / 4 {
        fail!(InvalidFormat, "{} size {} exceeds the file", what, size);
    }
    let mut entries = Vec::with_capacity(size);
    for _ in 0..size {
        entries.push(read_u4(bytes, ix)?);
    }
    Ok(entries)
}

fn write_offsets(bytes: &mut Vec<u8>, offsets: &[u32]) -> usize {
    let mut c = write_u4(bytes, offsets.len() as u32);
    for off in offsets {
        c += write_u4(bytes, *off);
    }
    c
}

/// annotation_set_item
/// A list of offsets to `annotation_item`s
/// https://source.android.com/docs/core/runtime/dex-format#annotation-set-item
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnnotationSetItem {
    pub entries: Vec<u32>,
}

impl AnnotationSetItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationSetItem, DexError> {
        Ok(AnnotationSetItem { entries: read_offsets(bytes, ix, "Annotation set")? })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_offsets(bytes, &self.entries)
    }
}

/// annotation_set_ref_list
/// A list of offsets to `annotation_set_item`s, 0 for an empty set
/// https://source.android.com/docs/core/runtime/dex-format#annotation-set-ref-list
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnnotationSetRefList {
    pub list: Vec<u32>,
}

impl AnnotationSetRefList {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationSetRefList, DexError> {
        Ok(AnnotationSetRefList { list: read_offsets(bytes, ix, "Annotation set ref list")? })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_offsets(bytes, &self.list)
    }
}

/// field_annotation, method_annotation and parameter_annotation share one
/// shape: a member index and an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MemberAnnotations {
    pub member_idx: u32,
    pub annotations_off: u32,
}

impl MemberAnnotations {
    fn read(bytes: &[u8], ix: &mut usize) -> Result<MemberAnnotations, DexError> {
        Ok(MemberAnnotations {
            member_idx: read_u4(bytes, ix)?,
            annotations_off: read_u4(bytes, ix)?,
        })
    }

    fn write(&self, bytes: &mut Vec<u8>) -> usize {
        write_u4(bytes, self.member_idx) + write_u4(bytes, self.annotations_off)
    }
}

/// annotations_directory_item
/// https://source.android.com/docs/core/runtime/dex-format#annotations-directory-item
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct AnnotationsDirectoryItem {
    /// Offset to the class `annotation_set_item` (or 0 if none)
    pub class_annotations_off: u32,
    pub field_annotations: Vec<MemberAnnotations>,
    pub method_annotations: Vec<MemberAnnotations>,
    pub parameter_annotations: Vec<MemberAnnotations>,
}

impl AnnotationsDirectoryItem {
    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<AnnotationsDirectoryItem, DexError> {
        let class_annotations_off = read_u4(bytes, ix)?;
        let fields_size = read_u4(bytes, ix)? as usize;
        let annotated_methods_size = read_u4(bytes, ix)? as usize;
        let annotated_parameters_size = read_u4(bytes, ix)? as usize;

        let available = bytes.len().saturating_sub(*ix) / 8;
        if fields_size + annotated_methods_size + annotated_parameters_size > available {
            fail!(InvalidFormat, "Annotations directory at {} exceeds the file", *ix - 16);
        }

        let mut read_list = |size: usize| -> Result<Vec<MemberAnnotations>, DexError> {
            let mut out = Vec::with_capacity(size);
            for _ in 0..size {
                out.push(MemberAnnotations::read(bytes, ix)?);
            }
            Ok(out)
        };
        let field_annotations = read_list(fields_size)?;
        let method_annotations = read_list(annotated_methods_size)?;
        let parameter_annotations = read_list(annotated_parameters_size)?;

        Ok(AnnotationsDirectoryItem {
            class_annotations_off,
            field_annotations,
            method_annotations,
            parameter_annotations,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize {
        let mut c = 0;
        c += write_u4(bytes, self.class_annotations_off);
        c += write_u4(bytes, self.field_annotations.len() as u32);
        c += write_u4(bytes, self.method_annotations.len() as u32);
        c += write_u4(bytes, self.parameter_annotations.len() as u32);

        for fa in &self.field_annotations {
            c += fa.write(bytes);
        }
        for ma in &self.method_annotations {
            c += ma.write(bytes);
        }
        for pa in &self.parameter_annotations {
            c += pa.write(bytes);
        }
        c
    }
}
