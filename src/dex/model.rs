//! The program model the codec reads into and writes from.
//!
//! These are plain values. Pools, offsets and indices never appear here;
//! the collector derives them when a model is written and the reader
//! resolves them away when a file is read.

use std::fmt;

use crate::dex::annotations::Annotation;
use crate::dex::debug_info::DebugItem;
use crate::dex::dex_file::{ACC_STATIC, NO_INDEX};
use crate::dex::encoded_values::EncodedValue;
use crate::dex::ids::{FieldId, MethodId, ProtoId, TypeId};
use crate::dex::instructions::Instruction;

/// A whole dex file: its classes in `class_defs` order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dex {
    pub classes: Vec<ClassDef>,
}

impl Dex {
    pub fn new(classes: Vec<ClassDef>) -> Dex {
        Dex { classes }
    }

    pub fn find_class(&self, descriptor: &str) -> Option<&ClassDef> {
        self.classes.iter().find(|c| c.class_type.descriptor == descriptor)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClassDef {
    pub class_type: TypeId,
    pub access_flags: u32,
    pub superclass: Option<TypeId>,
    pub interfaces: Vec<TypeId>,
    pub source_file: Option<String>,
    pub static_fields: Vec<FieldDef>,
    pub instance_fields: Vec<FieldDef>,
    pub direct_methods: Vec<MethodDef>,
    pub virtual_methods: Vec<MethodDef>,
    pub annotations: Vec<Annotation>,
}

impl ClassDef {
    pub fn new(class_type: TypeId, access_flags: u32, superclass: Option<TypeId>) -> ClassDef {
        ClassDef {
            class_type,
            access_flags,
            superclass,
            interfaces: vec![],
            source_file: None,
            static_fields: vec![],
            instance_fields: vec![],
            direct_methods: vec![],
            virtual_methods: vec![],
            annotations: vec![],
        }
    }

    pub fn field_id(&self, field: &FieldDef) -> FieldId {
        FieldId::of(self.class_type.clone(), &field.name, field.field_type.clone())
    }

    pub fn method_id(&self, method: &MethodDef) -> MethodId {
        MethodId::of(self.class_type.clone(), &method.name, method.proto())
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldDef> {
        self.static_fields.iter().chain(self.instance_fields.iter())
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodDef> {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    /// True when the class owns no field or method, so no `class_data_item`
    /// is written for it.
    pub fn has_no_members(&self) -> bool {
        self.fields().next().is_none() && self.methods().next().is_none()
    }
}

impl fmt::Display for ClassDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class {}", self.class_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldDef {
    pub name: String,
    pub field_type: TypeId,
    pub access_flags: u32,
    pub hidden_api_flags: u32,
    /// Static fields always carry a value once read back; missing trailing
    /// values read as the type's default.
    pub initial_value: Option<EncodedValue>,
    pub annotations: Vec<Annotation>,
}

impl FieldDef {
    pub fn new(name: &str, field_type: TypeId, access_flags: u32) -> FieldDef {
        FieldDef {
            name: name.to_string(),
            field_type,
            access_flags,
            hidden_api_flags: 0,
            initial_value: None,
            annotations: vec![],
        }
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Parameter {
    pub param_type: TypeId,
    pub name: Option<String>,
    pub annotations: Vec<Annotation>,
}

impl Parameter {
    pub fn of(param_type: TypeId) -> Parameter {
        Parameter { param_type, name: None, annotations: vec![] }
    }

    pub fn named(param_type: TypeId, name: &str) -> Parameter {
        Parameter { param_type, name: Some(name.to_string()), annotations: vec![] }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodDef {
    pub name: String,
    pub return_type: TypeId,
    pub parameters: Vec<Parameter>,
    pub access_flags: u32,
    pub hidden_api_flags: u32,
    pub implementation: Option<MethodImplementation>,
    pub annotations: Vec<Annotation>,
}

impl MethodDef {
    pub fn new(name: &str, return_type: TypeId, parameters: Vec<Parameter>, access_flags: u32) -> MethodDef {
        MethodDef {
            name: name.to_string(),
            return_type,
            parameters,
            access_flags,
            hidden_api_flags: 0,
            implementation: None,
            annotations: vec![],
        }
    }

    pub fn proto(&self) -> ProtoId {
        ProtoId::of(self.return_type.clone(), self.parameters.iter().map(|p| p.param_type.clone()).collect())
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    /// Registers taken by the incoming arguments, `this` included.
    pub fn ins_size(&self) -> u32 {
        let this = if self.is_static() { 0 } else { 1 };
        self.proto().parameter_register_count() + this
    }

    pub fn parameter_names(&self) -> Vec<Option<String>> {
        self.parameters.iter().map(|p| p.name.clone()).collect()
    }

    pub fn parameter_annotations(&self) -> Vec<Vec<Annotation>> {
        self.parameters.iter().map(|p| p.annotations.clone()).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodImplementation {
    pub register_count: u16,
    pub instructions: Vec<Instruction>,
    pub try_blocks: Vec<TryBlock>,
    pub debug_items: Vec<DebugItem>,
}

impl MethodImplementation {
    pub fn new(register_count: u16, instructions: Vec<Instruction>) -> MethodImplementation {
        MethodImplementation { register_count, instructions, try_blocks: vec![], debug_items: vec![] }
    }

    /// Length of the instruction stream in 16-bit code units.
    pub fn unit_count(&self) -> usize {
        self.instructions.iter().map(|i| i.unit_count()).sum()
    }

    /// Largest argument count of any invoke, the `outs_size` of the code item.
    pub fn outs_size(&self) -> u16 {
        self.instructions
            .iter()
            .map(|i| match i {
                Instruction::Format35c { opcode, registers, .. } | Instruction::Format45cc { opcode, registers, .. }
                    if opcode.is_invoke() =>
                {
                    registers.len() as u16
                }
                Instruction::Format3rc { opcode, register_count, .. }
                | Instruction::Format4rcc { opcode, register_count, .. }
                    if opcode.is_invoke() =>
                {
                    *register_count as u16
                }
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExceptionHandler {
    pub exception_type: TypeId,
    pub address: u32,
}

impl ExceptionHandler {
    pub fn of(exception_type: TypeId, address: u32) -> ExceptionHandler {
        ExceptionHandler { exception_type, address }
    }
}

/// A covered code range and the handlers for it. Addresses are in code units.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TryBlock {
    pub start_address: u32,
    pub unit_count: u16,
    pub handlers: Vec<ExceptionHandler>,
    pub catch_all_address: Option<u32>,
}

impl TryBlock {
    pub fn new(start_address: u32, unit_count: u16, handlers: Vec<ExceptionHandler>, catch_all_address: Option<u32>) -> TryBlock {
        TryBlock { start_address, unit_count, handlers, catch_all_address }
    }
}

/// `NO_INDEX` read as an absent optional index.
pub(crate) fn optional_index(index: u32) -> Option<u32> {
    if index == NO_INDEX {
        None
    } else {
        Some(index)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::dex_file::ACC_PUBLIC;
    use crate::dex::instructions::Reference;
    use crate::dex::opcodes::opcode;

    fn method(flags: u32, params: &[&str]) -> MethodDef {
        let parameters = params.iter().map(|p| Parameter::of(TypeId::of(p))).collect();
        MethodDef::new("run", TypeId::of("V"), parameters, flags)
    }

    #[test]
    fn ins_size_counts_wide_arguments_and_this() {
        assert_eq!(method(ACC_PUBLIC | ACC_STATIC, &["J", "I"]).ins_size(), 3);
        assert_eq!(method(ACC_PUBLIC, &["J", "I"]).ins_size(), 4);
        assert_eq!(method(ACC_PUBLIC, &[]).ins_size(), 1);
    }

    #[test]
    fn outs_size_is_largest_invoke() {
        let target = Reference::Method(MethodId::of(
            TypeId::of("LFoo;"),
            "bar",
            ProtoId::of(TypeId::of("V"), vec![TypeId::of("I"), TypeId::of("I")]),
        ));
        let code = MethodImplementation::new(
            4,
            vec![
                Instruction::Format35c {
                    opcode: opcode("invoke-static").unwrap(),
                    registers: vec![0, 1],
                    reference: target.clone(),
                },
                Instruction::Format3rc {
                    opcode: opcode("invoke-static/range").unwrap(),
                    start_register: 0,
                    register_count: 3,
                    reference: target.clone(),
                },
                Instruction::Format35c {
                    opcode: opcode("filled-new-array").unwrap(),
                    registers: vec![0, 1, 2, 3, 0],
                    reference: Reference::Type(TypeId::of("[I")),
                },
                Instruction::Format10x { opcode: opcode("return-void").unwrap() },
            ],
        );
        assert_eq!(code.outs_size(), 3);
        assert_eq!(code.unit_count(), 3 + 3 + 3 + 1);
    }

    #[test]
    fn member_ids() {
        let mut class = ClassDef::new(TypeId::of("LFoo;"), ACC_PUBLIC, Some(TypeId::of("Ljava/lang/Object;")));
        class.static_fields.push(FieldDef::new("x", TypeId::of("I"), ACC_STATIC));
        class.virtual_methods.push(method(ACC_PUBLIC, &["I"]));
        let field = class.field_id(&class.static_fields[0]);
        assert_eq!(field.to_string(), "LFoo;->x:I");
        assert!(!class.has_no_members());
        assert!(ClassDef::new(TypeId::of("LBar;"), 0, None).has_no_members());
        assert_eq!(optional_index(NO_INDEX), None);
        assert_eq!(optional_index(3), Some(3));
    }
}
