//! Pool values: the things an index in a dex file can point at.
//!
//! Every type here carries the total order its pool is sorted by, so the
//! writer can sort and binary-search the pools without extra comparators.

use std::cmp::Ordering;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dex::encoded_values::EncodedValue;
use crate::dex::error::DexError;
use crate::dex::mutf8::compare_utf16;

/// A type descriptor such as `I`, `[J` or `Ljava/lang/Object;`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId {
    pub descriptor: String,
}

impl TypeId {
    pub fn of(descriptor: &str) -> TypeId {
        TypeId { descriptor: descriptor.to_string() }
    }

    pub fn is_primitive(&self) -> bool {
        self.descriptor.len() == 1
    }

    pub fn is_array(&self) -> bool {
        self.descriptor.starts_with('[')
    }

    /// Character used for this type in a prototype shorty.
    pub fn shorty(&self) -> char {
        match self.descriptor.chars().next() {
            Some('[') | Some('L') | None => 'L',
            Some(c) => c,
        }
    }

    /// Number of registers a value of this type occupies.
    pub fn register_count(&self) -> u32 {
        match self.descriptor.as_str() {
            "V" => 0,
            "J" | "D" => 2,
            _ => 1,
        }
    }
}

impl Ord for TypeId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_utf16(&self.descriptor, &other.descriptor)
    }
}

impl PartialOrd for TypeId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor)
    }
}

/// Method prototype: return type and ordered parameter types.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtoId {
    pub return_type: TypeId,
    pub parameters: Vec<TypeId>,
}

impl ProtoId {
    pub fn of(return_type: TypeId, parameters: Vec<TypeId>) -> ProtoId {
        ProtoId { return_type, parameters }
    }

    pub fn shorty(&self) -> String {
        let mut out = String::with_capacity(self.parameters.len() + 1);
        out.push(self.return_type.shorty());
        out.extend(self.parameters.iter().map(|p| p.shorty()));
        out
    }

    pub fn parameter_register_count(&self) -> u32 {
        self.parameters.iter().map(|p| p.register_count()).sum()
    }
}

impl Ord for ProtoId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.return_type
            .cmp(&other.return_type)
            .then_with(|| self.parameters.cmp(&other.parameters))
    }
}

impl PartialOrd for ProtoId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for ProtoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for p in &self.parameters {
            f.write_str(&p.descriptor)?;
        }
        write!(f, "){}", self.return_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldId {
    pub declaring_class: TypeId,
    pub name: String,
    pub field_type: TypeId,
}

impl FieldId {
    pub fn of(declaring_class: TypeId, name: &str, field_type: TypeId) -> FieldId {
        FieldId { declaring_class, name: name.to_string(), field_type }
    }
}

impl Ord for FieldId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.declaring_class
            .cmp(&other.declaring_class)
            .then_with(|| compare_utf16(&self.name, &other.name))
            .then_with(|| self.field_type.cmp(&other.field_type))
    }
}

impl PartialOrd for FieldId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}:{}", self.declaring_class, self.name, self.field_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MethodId {
    pub declaring_class: TypeId,
    pub name: String,
    pub proto: ProtoId,
}

impl MethodId {
    pub fn of(declaring_class: TypeId, name: &str, proto: ProtoId) -> MethodId {
        MethodId { declaring_class, name: name.to_string(), proto }
    }
}

impl Ord for MethodId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.declaring_class
            .cmp(&other.declaring_class)
            .then_with(|| compare_utf16(&self.name, &other.name))
            .then_with(|| self.proto.cmp(&other.proto))
    }
}

impl PartialOrd for MethodId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}->{}{}", self.declaring_class, self.name, self.proto)
    }
}

/// `method_handle_type` values. The first four access a field, the rest
/// invoke a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MethodHandleKind {
    StaticPut = 0x00,
    StaticGet = 0x01,
    InstancePut = 0x02,
    InstanceGet = 0x03,
    InvokeStatic = 0x04,
    InvokeInstance = 0x05,
    InvokeConstructor = 0x06,
    InvokeDirect = 0x07,
    InvokeInterface = 0x08,
}

impl MethodHandleKind {
    pub fn of(value: u16) -> Result<MethodHandleKind, DexError> {
        Ok(match value {
            0x00 => MethodHandleKind::StaticPut,
            0x01 => MethodHandleKind::StaticGet,
            0x02 => MethodHandleKind::InstancePut,
            0x03 => MethodHandleKind::InstanceGet,
            0x04 => MethodHandleKind::InvokeStatic,
            0x05 => MethodHandleKind::InvokeInstance,
            0x06 => MethodHandleKind::InvokeConstructor,
            0x07 => MethodHandleKind::InvokeDirect,
            0x08 => MethodHandleKind::InvokeInterface,
            _ => fail!(InvalidFormat, "Unknown method handle type: {}", value),
        })
    }

    pub fn value(&self) -> u16 {
        *self as u16
    }

    pub fn is_method_access(&self) -> bool {
        self.value() >= MethodHandleKind::InvokeStatic.value()
    }
}

/// The member a method handle targets; the variant must agree with the kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MethodHandleMember {
    Field(FieldId),
    Method(MethodId),
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MethodHandleId {
    pub kind: MethodHandleKind,
    pub member: MethodHandleMember,
}

impl MethodHandleId {
    pub fn new(kind: MethodHandleKind, member: MethodHandleMember) -> Result<MethodHandleId, DexError> {
        let matches = match member {
            MethodHandleMember::Field(_) => !kind.is_method_access(),
            MethodHandleMember::Method(_) => kind.is_method_access(),
        };
        if !matches {
            fail!(StructuralViolation, "Method handle of kind {:?} cannot target {:?}", kind, member);
        }
        Ok(MethodHandleId { kind, member })
    }
}

impl fmt::Display for MethodHandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            MethodHandleMember::Field(field) => write!(f, "{:?}->{}", self.kind, field),
            MethodHandleMember::Method(method) => write!(f, "{:?}->{}", self.kind, method),
        }
    }
}

/// A call site. On disk this is the encoded array
/// `[handle, method name, method type, extra args..]`; the name only exists
/// in memory and orders the pool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallSiteId {
    pub name: String,
    pub method_handle: MethodHandleId,
    pub method_name: String,
    pub method_proto: ProtoId,
    pub extra_args: Vec<EncodedValue>,
}

impl CallSiteId {
    /// The encoded array stored for this call site.
    pub fn to_encoded_array(&self) -> Vec<EncodedValue> {
        let mut out = Vec::with_capacity(3 + self.extra_args.len());
        out.push(EncodedValue::MethodHandle(self.method_handle.clone()));
        out.push(EncodedValue::String(self.method_name.clone()));
        out.push(EncodedValue::MethodType(self.method_proto.clone()));
        out.extend(self.extra_args.iter().cloned());
        out
    }

    /// Splits a stored encoded array back into a call site named `name`.
    pub fn from_encoded_array(name: String, mut values: Vec<EncodedValue>) -> Result<CallSiteId, DexError> {
        if values.len() < 3 {
            fail!(InvalidFormat, "Invalid call site item: must contain at least 3 entries");
        }
        let extra_args = values.split_off(3);
        let mut values = values.into_iter();
        let method_handle = match values.next() {
            Some(EncodedValue::MethodHandle(handle)) => handle,
            other => fail!(InvalidFormat, "Invalid encoded value {:?} for the first item in call site {}", other, name),
        };
        let method_name = match values.next() {
            Some(EncodedValue::String(value)) => value,
            other => fail!(InvalidFormat, "Invalid encoded value {:?} for the second item in call site {}", other, name),
        };
        let method_proto = match values.next() {
            Some(EncodedValue::MethodType(proto)) => proto,
            other => fail!(InvalidFormat, "Invalid encoded value {:?} for the third item in call site {}", other, name),
        };
        Ok(CallSiteId { name, method_handle, method_name, method_proto, extra_args })
    }
}

impl Ord for CallSiteId {
    fn cmp(&self, other: &Self) -> Ordering {
        compare_utf16(&self.name, &other.name)
            .then_with(|| self.method_handle.cmp(&other.method_handle))
            .then_with(|| compare_utf16(&self.method_name, &other.method_name))
            .then_with(|| self.method_proto.cmp(&other.method_proto))
            .then_with(|| self.extra_args.cmp(&other.extra_args))
    }
}

impl PartialOrd for CallSiteId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Name the reader gives the call site at `index`.
pub fn call_site_name(index: usize) -> String {
    format!("callsite_{}", index)
}
