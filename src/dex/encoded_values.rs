use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use crate::dex::error::DexError;
use crate::dex::ids::{FieldId, MethodHandleId, MethodId, ProtoId, TypeId};
use crate::dex::mutf8::compare_utf16;
use crate::dex::pools::{IndexResolver, ReferenceSource};
use crate::dex::value_coder::{
    read_double, read_float, read_signed, read_unsigned, write_double, write_float, write_signed, write_unsigned,
    VALUE_ARG_SHIFT,
};
use crate::dex::{read_u1, read_uleb128, write_u1, write_uleb128};

pub const VALUE_BYTE: u8 = 0x00;
pub const VALUE_SHORT: u8 = 0x02;
pub const VALUE_CHAR: u8 = 0x03;
pub const VALUE_INT: u8 = 0x04;
pub const VALUE_LONG: u8 = 0x06;
pub const VALUE_FLOAT: u8 = 0x10;
pub const VALUE_DOUBLE: u8 = 0x11;
pub const VALUE_METHOD_TYPE: u8 = 0x15;
pub const VALUE_METHOD_HANDLE: u8 = 0x16;
pub const VALUE_STRING: u8 = 0x17;
pub const VALUE_TYPE: u8 = 0x18;
pub const VALUE_FIELD: u8 = 0x19;
pub const VALUE_METHOD: u8 = 0x1a;
pub const VALUE_ENUM: u8 = 0x1b;
pub const VALUE_ARRAY: u8 = 0x1c;
pub const VALUE_ANNOTATION: u8 = 0x1d;
pub const VALUE_NULL: u8 = 0x1e;
pub const VALUE_BOOLEAN: u8 = 0x1f;

/// Arrays and annotations nest; a value inside more of them than this is
/// rejected when reading and when writing.
pub(crate) const MAX_NESTING: usize = 128;

/// `encoded_annotation`: a type and its elements, kept sorted by name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EncodedAnnotation {
    pub annotation_type: TypeId,
    pub elements: Vec<AnnotationElement>,
}

impl EncodedAnnotation {
    /// Builds an annotation with its elements sorted by name. Duplicate names
    /// are rejected since the element order would be ambiguous.
    pub fn new(annotation_type: TypeId, mut elements: Vec<AnnotationElement>) -> Result<EncodedAnnotation, DexError> {
        elements.sort_by(|a, b| compare_utf16(&a.name, &b.name));
        check_element_names(&elements)?;
        Ok(EncodedAnnotation { annotation_type, elements })
    }

    pub(crate) fn read<R: ReferenceSource + ?Sized>(
        bytes: &[u8],
        ix: &mut usize,
        source: &R,
        depth: usize,
    ) -> Result<EncodedAnnotation, DexError> {
        let annotation_type = source.type_id(read_uleb128(bytes, ix)?)?;
        let size = read_uleb128(bytes, ix)? as usize;
        let mut elements = Vec::with_capacity(size.min(bytes.len()));
        for _ in 0..size {
            let name = source.string(read_uleb128(bytes, ix)?)?;
            let value = EncodedValue::read_nested(bytes, ix, source, depth)?;
            elements.push(AnnotationElement { name, value });
        }
        Ok(EncodedAnnotation { annotation_type, elements })
    }

    pub(crate) fn write<I: IndexResolver + ?Sized>(&self, bytes: &mut Vec<u8>, resolver: &I) -> Result<usize, DexError> {
        let mut sorted: Vec<&AnnotationElement> = self.elements.iter().collect();
        sorted.sort_by(|a, b| compare_utf16(&a.name, &b.name));
        for pair in sorted.windows(2) {
            if pair[0].name == pair[1].name {
                fail!(StructuralViolation, "Duplicate annotation element name {} in {}", pair[0].name, self.annotation_type);
            }
        }

        let mut c = 0;
        c += write_uleb128(bytes, resolver.type_index(&self.annotation_type)?);
        c += write_uleb128(bytes, sorted.len() as u32);
        for element in sorted {
            c += write_uleb128(bytes, resolver.string_index(&element.name)?);
            c += element.value.write(bytes, resolver)?;
        }
        Ok(c)
    }
}

fn check_element_names(elements: &[AnnotationElement]) -> Result<(), DexError> {
    for pair in elements.windows(2) {
        if pair[0].name == pair[1].name {
            fail!(StructuralViolation, "Duplicate annotation element name {}", pair[0].name);
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AnnotationElement {
    pub name: String,
    pub value: EncodedValue,
}

impl AnnotationElement {
    pub fn of(name: &str, value: EncodedValue) -> AnnotationElement {
        AnnotationElement { name: name.to_string(), value }
    }
}

impl Ord for AnnotationElement {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_utf16(&self.name, &other.name).then_with(|| self.value.cmp(&other.value))
    }
}

impl PartialOrd for AnnotationElement {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EncodedValue {
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    MethodType(ProtoId),
    MethodHandle(MethodHandleId),
    String(String),
    Type(TypeId),
    Field(FieldId),
    Method(MethodId),
    Enum(FieldId),
    Array(Vec<EncodedValue>),
    Annotation(EncodedAnnotation),
    Null,
    Boolean(bool),
}

impl EncodedValue {
    pub fn value_type(&self) -> u8 {
        match self {
            EncodedValue::Byte(_) => VALUE_BYTE,
            EncodedValue::Short(_) => VALUE_SHORT,
            EncodedValue::Char(_) => VALUE_CHAR,
            EncodedValue::Int(_) => VALUE_INT,
            EncodedValue::Long(_) => VALUE_LONG,
            EncodedValue::Float(_) => VALUE_FLOAT,
            EncodedValue::Double(_) => VALUE_DOUBLE,
            EncodedValue::MethodType(_) => VALUE_METHOD_TYPE,
            EncodedValue::MethodHandle(_) => VALUE_METHOD_HANDLE,
            EncodedValue::String(_) => VALUE_STRING,
            EncodedValue::Type(_) => VALUE_TYPE,
            EncodedValue::Field(_) => VALUE_FIELD,
            EncodedValue::Method(_) => VALUE_METHOD,
            EncodedValue::Enum(_) => VALUE_ENUM,
            EncodedValue::Array(_) => VALUE_ARRAY,
            EncodedValue::Annotation(_) => VALUE_ANNOTATION,
            EncodedValue::Null => VALUE_NULL,
            EncodedValue::Boolean(_) => VALUE_BOOLEAN,
        }
    }

    /// The value a field of type `field_type` holds when no initializer is stored.
    pub fn default_for(field_type: &TypeId) -> Result<EncodedValue, DexError> {
        Ok(match field_type.shorty() {
            'Z' => EncodedValue::Boolean(false),
            'B' => EncodedValue::Byte(0),
            'S' => EncodedValue::Short(0),
            'C' => EncodedValue::Char(0),
            'I' => EncodedValue::Int(0),
            'J' => EncodedValue::Long(0),
            'F' => EncodedValue::Float(0.0),
            'D' => EncodedValue::Double(0.0),
            'L' => EncodedValue::Null,
            _ => fail!(StructuralViolation, "No default value for type {}", field_type),
        })
    }

    pub fn is_default(&self) -> bool {
        match self {
            EncodedValue::Byte(v) => *v == 0,
            EncodedValue::Short(v) => *v == 0,
            EncodedValue::Char(v) => *v == 0,
            EncodedValue::Int(v) => *v == 0,
            EncodedValue::Long(v) => *v == 0,
            EncodedValue::Float(v) => v.to_bits() == 0,
            EncodedValue::Double(v) => v.to_bits() == 0,
            EncodedValue::Null => true,
            EncodedValue::Boolean(v) => !*v,
            _ => false,
        }
    }

    /// Shortcut for `Annotation` values.
    #[inline]
    pub fn as_annotation(&self) -> Option<&EncodedAnnotation> {
        match self {
            EncodedValue::Annotation(ann) => Some(ann),
            _ => None,
        }
    }

    pub(crate) fn read<R: ReferenceSource + ?Sized>(bytes: &[u8], ix: &mut usize, source: &R) -> Result<EncodedValue, DexError> {
        EncodedValue::read_nested(bytes, ix, source, 0)
    }

    fn read_nested<R: ReferenceSource + ?Sized>(
        bytes: &[u8],
        ix: &mut usize,
        source: &R,
        depth: usize,
    ) -> Result<EncodedValue, DexError> {
        if depth > MAX_NESTING {
            fail!(InvalidFormat, "Encoded value nesting exceeds {} at index {}", MAX_NESTING, *ix);
        }
        let header_byte = read_u1(bytes, ix)?;
        let value_arg = header_byte >> VALUE_ARG_SHIFT;
        let value_type = header_byte & 0x1f;

        let index = |bytes: &[u8], ix: &mut usize| -> Result<u32, DexError> {
            let value = read_unsigned(bytes, ix, value_arg)?;
            match u32::try_from(value) {
                Ok(v) => Ok(v),
                Err(_) => fail!(InvalidFormat, "Encoded index {} exceeds 32 bits", value),
            }
        };

        Ok(match value_type {
            VALUE_BYTE => EncodedValue::Byte(read_signed(bytes, ix, value_arg)? as i8),
            VALUE_SHORT => EncodedValue::Short(read_signed(bytes, ix, value_arg)? as i16),
            VALUE_CHAR => EncodedValue::Char(read_unsigned(bytes, ix, value_arg)? as u16),
            VALUE_INT => EncodedValue::Int(read_signed(bytes, ix, value_arg)? as i32),
            VALUE_LONG => EncodedValue::Long(read_signed(bytes, ix, value_arg)?),
            VALUE_FLOAT => EncodedValue::Float(read_float(bytes, ix, value_arg)?),
            VALUE_DOUBLE => EncodedValue::Double(read_double(bytes, ix, value_arg)?),
            VALUE_METHOD_TYPE => EncodedValue::MethodType(source.proto_id(index(bytes, ix)?)?),
            VALUE_METHOD_HANDLE => EncodedValue::MethodHandle(source.method_handle(index(bytes, ix)?)?),
            VALUE_STRING => EncodedValue::String(source.string(index(bytes, ix)?)?),
            VALUE_TYPE => EncodedValue::Type(source.type_id(index(bytes, ix)?)?),
            VALUE_FIELD => EncodedValue::Field(source.field_id(index(bytes, ix)?)?),
            VALUE_METHOD => EncodedValue::Method(source.method_id(index(bytes, ix)?)?),
            VALUE_ENUM => EncodedValue::Enum(source.field_id(index(bytes, ix)?)?),
            VALUE_ARRAY => EncodedValue::Array(read_array_nested(bytes, ix, source, depth + 1)?),
            VALUE_ANNOTATION => EncodedValue::Annotation(EncodedAnnotation::read(bytes, ix, source, depth + 1)?),
            VALUE_NULL => EncodedValue::Null,
            VALUE_BOOLEAN => EncodedValue::Boolean(value_arg != 0),
            _ => fail!(InvalidFormat, "Unknown encoded value type 0x{:02x} at index {}", value_type, *ix - 1),
        })
    }

    pub(crate) fn write<I: IndexResolver + ?Sized>(&self, bytes: &mut Vec<u8>, resolver: &I) -> Result<usize, DexError> {
        let start = bytes.len();
        let ty = self.value_type();
        match self {
            EncodedValue::Byte(v) => write_signed(bytes, ty, *v as i64),
            EncodedValue::Short(v) => write_signed(bytes, ty, *v as i64),
            EncodedValue::Char(v) => write_unsigned(bytes, ty, *v as u64),
            EncodedValue::Int(v) => write_signed(bytes, ty, *v as i64),
            EncodedValue::Long(v) => write_signed(bytes, ty, *v),
            EncodedValue::Float(v) => write_float(bytes, ty, *v),
            EncodedValue::Double(v) => write_double(bytes, ty, *v),
            EncodedValue::MethodType(v) => write_unsigned(bytes, ty, resolver.proto_index(v)? as u64),
            EncodedValue::MethodHandle(v) => write_unsigned(bytes, ty, resolver.method_handle_index(v)? as u64),
            EncodedValue::String(v) => write_unsigned(bytes, ty, resolver.string_index(v)? as u64),
            EncodedValue::Type(v) => write_unsigned(bytes, ty, resolver.type_index(v)? as u64),
            EncodedValue::Field(v) | EncodedValue::Enum(v) => write_unsigned(bytes, ty, resolver.field_index(v)? as u64),
            EncodedValue::Method(v) => write_unsigned(bytes, ty, resolver.method_index(v)? as u64),
            EncodedValue::Array(values) => {
                write_u1(bytes, ty);
                write_encoded_array(values, bytes, resolver)?;
            }
            EncodedValue::Annotation(annotation) => {
                write_u1(bytes, ty);
                annotation.write(bytes, resolver)?;
            }
            EncodedValue::Null => {
                write_u1(bytes, ty);
            }
            EncodedValue::Boolean(v) => {
                write_u1(bytes, ty | ((*v as u8) << VALUE_ARG_SHIFT));
            }
        }
        Ok(bytes.len() - start)
    }
}

impl PartialEq for EncodedValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for EncodedValue {}

impl Ord for EncodedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let out = self.value_type().cmp(&other.value_type());
        if out != Ordering::Equal {
            return out;
        }
        match (self, other) {
            (EncodedValue::Byte(a), EncodedValue::Byte(b)) => a.cmp(b),
            (EncodedValue::Short(a), EncodedValue::Short(b)) => a.cmp(b),
            (EncodedValue::Char(a), EncodedValue::Char(b)) => a.cmp(b),
            (EncodedValue::Int(a), EncodedValue::Int(b)) => a.cmp(b),
            (EncodedValue::Long(a), EncodedValue::Long(b)) => a.cmp(b),
            (EncodedValue::Float(a), EncodedValue::Float(b)) => a.total_cmp(b),
            (EncodedValue::Double(a), EncodedValue::Double(b)) => a.total_cmp(b),
            (EncodedValue::MethodType(a), EncodedValue::MethodType(b)) => a.cmp(b),
            (EncodedValue::MethodHandle(a), EncodedValue::MethodHandle(b)) => a.cmp(b),
            (EncodedValue::String(a), EncodedValue::String(b)) => compare_utf16(a, b),
            (EncodedValue::Type(a), EncodedValue::Type(b)) => a.cmp(b),
            (EncodedValue::Field(a), EncodedValue::Field(b)) => a.cmp(b),
            (EncodedValue::Method(a), EncodedValue::Method(b)) => a.cmp(b),
            (EncodedValue::Enum(a), EncodedValue::Enum(b)) => a.cmp(b),
            (EncodedValue::Array(a), EncodedValue::Array(b)) => a.cmp(b),
            (EncodedValue::Annotation(a), EncodedValue::Annotation(b)) => a.cmp(b),
            (EncodedValue::Boolean(a), EncodedValue::Boolean(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl PartialOrd for EncodedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for EncodedValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value_type().hash(state);
        match self {
            EncodedValue::Byte(v) => v.hash(state),
            EncodedValue::Short(v) => v.hash(state),
            EncodedValue::Char(v) => v.hash(state),
            EncodedValue::Int(v) => v.hash(state),
            EncodedValue::Long(v) => v.hash(state),
            EncodedValue::Float(v) => v.to_bits().hash(state),
            EncodedValue::Double(v) => v.to_bits().hash(state),
            EncodedValue::MethodType(v) => v.hash(state),
            EncodedValue::MethodHandle(v) => v.hash(state),
            EncodedValue::String(v) => v.hash(state),
            EncodedValue::Type(v) => v.hash(state),
            EncodedValue::Field(v) | EncodedValue::Enum(v) => v.hash(state),
            EncodedValue::Method(v) => v.hash(state),
            EncodedValue::Array(v) => v.hash(state),
            EncodedValue::Annotation(v) => v.hash(state),
            EncodedValue::Null => {}
            EncodedValue::Boolean(v) => v.hash(state),
        }
    }
}

pub(crate) fn write_encoded_array<I: IndexResolver + ?Sized>(
    encoded_array: &[EncodedValue],
    bytes: &mut Vec<u8>,
    resolver: &I,
) -> Result<usize, DexError> {
    let mut c = write_uleb128(bytes, encoded_array.len() as u32);
    for value in encoded_array {
        c += value.write(bytes, resolver)?;
    }
    Ok(c)
}

pub(crate) fn read_encoded_array<R: ReferenceSource + ?Sized>(
    bytes: &[u8],
    ix: &mut usize,
    source: &R,
) -> Result<Vec<EncodedValue>, DexError> {
    read_array_nested(bytes, ix, source, 0)
}

fn read_array_nested<R: ReferenceSource + ?Sized>(
    bytes: &[u8],
    ix: &mut usize,
    source: &R,
    depth: usize,
) -> Result<Vec<EncodedValue>, DexError> {
    let size = read_uleb128(bytes, ix)? as usize;
    // every value takes at least one byte
    let mut values = Vec::with_capacity(size.min(bytes.len()));
    for _ in 0..size {
        values.push(EncodedValue::read_nested(bytes, ix, source, depth)?);
    }
    Ok(values)
}

/// Static values with the trailing run of defaults removed; an all-default
/// list becomes empty.
pub fn trim_static_values(values: &[EncodedValue]) -> &[EncodedValue] {
    let mut end = values.len();
    while end > 0 && values[end - 1].is_default() {
        end -= 1;
    }
    &values[..end]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::pools::tests::FakePools;

    fn roundtrip(value: &EncodedValue, pools: &FakePools) -> Vec<u8> {
        let mut bytes = vec![];
        let written = value.write(&mut bytes, pools).unwrap();
        assert_eq!(written, bytes.len());
        let mut ix = 0;
        let back = EncodedValue::read(&bytes, &mut ix, pools).unwrap();
        assert_eq!(&back, value);
        assert_eq!(ix, bytes.len());
        bytes
    }

    #[test]
    fn numeric_values_are_minimal() {
        let pools = FakePools::default();
        assert_eq!(roundtrip(&EncodedValue::Byte(0x7f), &pools), vec![0x00, 0x7f]);
        assert_eq!(roundtrip(&EncodedValue::Short(0x1234), &pools), vec![0x22, 0x34, 0x12]);
        assert_eq!(roundtrip(&EncodedValue::Char(0x1234), &pools), vec![0x23, 0x34, 0x12]);
        assert_eq!(roundtrip(&EncodedValue::Int(0x12345678), &pools), vec![0x64, 0x78, 0x56, 0x34, 0x12]);
        assert_eq!(roundtrip(&EncodedValue::Int(-1), &pools), vec![0x04, 0xff]);
        assert_eq!(roundtrip(&EncodedValue::Int(0), &pools), vec![0x04, 0x00]);
        assert_eq!(roundtrip(&EncodedValue::Long(i64::MIN), &pools).len(), 9);
        assert_eq!(roundtrip(&EncodedValue::Float(1.0), &pools), vec![0x30, 0x80, 0x3f]);
        assert_eq!(roundtrip(&EncodedValue::Double(-2.0), &pools), vec![0x11, 0xc0]);
    }

    #[test]
    fn null_and_boolean() {
        let pools = FakePools::default();
        assert_eq!(roundtrip(&EncodedValue::Null, &pools), vec![0x1e]);
        assert_eq!(roundtrip(&EncodedValue::Boolean(true), &pools), vec![0x3f]);
        assert_eq!(roundtrip(&EncodedValue::Boolean(false), &pools), vec![0x1f]);
    }

    #[test]
    fn references_use_pool_indices() {
        let pools = FakePools::with_strings(&["a", "b", "hello"]);
        let bytes = roundtrip(&EncodedValue::String("hello".to_string()), &pools);
        assert_eq!(bytes, vec![0x17, 0x02]);

        let missing = EncodedValue::String("nope".to_string());
        let err = missing.write(&mut vec![], &pools).unwrap_err();
        assert_eq!(err.kind(), crate::dex::error::DexErrorKind::UnresolvedReference);
    }

    #[test]
    fn annotation_elements_sorted_and_unique() {
        let pools = FakePools::with_strings(&["LAnno;", "a", "b"]);
        let anno = EncodedAnnotation::new(
            TypeId::of("LAnno;"),
            vec![AnnotationElement::of("b", EncodedValue::Int(1)), AnnotationElement::of("a", EncodedValue::Null)],
        )
        .unwrap();
        assert_eq!(anno.elements[0].name, "a");
        roundtrip(&EncodedValue::Array(vec![EncodedValue::Annotation(anno)]), &pools);

        let dup = EncodedAnnotation::new(
            TypeId::of("LAnno;"),
            vec![AnnotationElement::of("a", EncodedValue::Int(1)), AnnotationElement::of("a", EncodedValue::Int(2))],
        );
        assert_eq!(dup.unwrap_err().kind(), crate::dex::error::DexErrorKind::StructuralViolation);
    }

    /// A null inside `levels` single-element arrays.
    fn nested_null(levels: usize) -> Vec<u8> {
        let mut bytes = vec![];
        for _ in 0..levels {
            bytes.push(VALUE_ARRAY);
            bytes.push(1);
        }
        bytes.push(VALUE_NULL);
        bytes
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let pools = FakePools::default();
        let bytes = nested_null(MAX_NESTING);
        let mut ix = 0;
        EncodedValue::read(&bytes, &mut ix, &pools).unwrap();
        assert_eq!(ix, bytes.len());

        let mut ix = 0;
        let err = EncodedValue::read(&nested_null(MAX_NESTING + 1), &mut ix, &pools).unwrap_err();
        assert_eq!(err.kind(), crate::dex::error::DexErrorKind::InvalidFormat);

        // annotation elements count as one level, like array elements
        let mut bytes = vec![VALUE_ANNOTATION, 0, 1, 0];
        bytes.extend(nested_null(MAX_NESTING));
        let pools = FakePools::with_strings(&["LAnno;"]);
        let mut ix = 0;
        let err = EncodedValue::read(&bytes, &mut ix, &pools).unwrap_err();
        assert_eq!(err.kind(), crate::dex::error::DexErrorKind::InvalidFormat);
    }

    #[test]
    fn defaults_and_trimming() {
        assert_eq!(EncodedValue::default_for(&TypeId::of("I")).unwrap(), EncodedValue::Int(0));
        assert_eq!(EncodedValue::default_for(&TypeId::of("[I")).unwrap(), EncodedValue::Null);
        assert!(EncodedValue::default_for(&TypeId::of("V")).is_err());
        assert!(!EncodedValue::Float(-0.0).is_default());

        let values = vec![EncodedValue::Int(1), EncodedValue::Int(0), EncodedValue::Null];
        assert_eq!(trim_static_values(&values), &values[..1]);
        assert!(trim_static_values(&[EncodedValue::Int(0)]).is_empty());
    }

    #[test]
    fn unknown_type_fails() {
        let pools = FakePools::default();
        let mut ix = 0;
        assert!(EncodedValue::read(&[0x05], &mut ix, &pools).is_err());
    }
}
