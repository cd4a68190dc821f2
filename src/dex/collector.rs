//! Gathers everything a model references before any byte is written.
//!
//! One pass over the classes fills the reference pools and the
//! deduplicated data item sets, and records per class which items it
//! uses. Nested encoded values are walked with an explicit worklist.

use std::collections::HashSet;

use log::debug;

use crate::dex::annotations::{sorted_annotation_set, trim_parameter_annotations, Annotation};
use crate::dex::debug_info::{DebugInfo, DebugItem};
use crate::dex::encoded_values::{trim_static_values, EncodedValue, MAX_NESTING};
use crate::dex::error::{DexError, ResultExt};
use crate::dex::ids::{CallSiteId, FieldId, MethodHandleId, MethodHandleMember, MethodId, ProtoId, TypeId};
use crate::dex::instructions::Reference;
use crate::dex::model::{ClassDef, Dex, FieldDef, MethodDef, MethodImplementation};
use crate::dex::options::WriteOptions;
use crate::dex::pools::{ItemSet, Pools};

/// Annotations of one class, in the shape of an `annotations_directory_item`.
/// `owner` is set unless only class annotations are present; a directory
/// naming members belongs to its class and is never shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct AnnotationDirectory {
    pub owner: Option<TypeId>,
    pub class_annotations: Vec<Annotation>,
    pub fields: Vec<(FieldId, Vec<Annotation>)>,
    pub methods: Vec<(MethodId, Vec<Annotation>)>,
    pub parameters: Vec<(MethodId, Vec<Vec<Annotation>>)>,
}

/// Identity of a code item. `debug` is the debug info id for standard
/// files, where the code item points at it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub(crate) struct CodeKey<'a> {
    pub implementation: &'a MethodImplementation,
    pub ins: u16,
    pub outs: u16,
    pub debug: Option<usize>,
}

/// The deduplicated data items of one output file.
#[derive(Debug, Default)]
pub(crate) struct ItemSets<'a> {
    pub type_lists: ItemSet<Vec<TypeId>>,
    pub encoded_arrays: ItemSet<Vec<EncodedValue>>,
    pub annotations: ItemSet<Annotation>,
    pub annotation_sets: ItemSet<Vec<Annotation>>,
    pub annotation_set_lists: ItemSet<Vec<Vec<Annotation>>>,
    pub annotation_directories: ItemSet<AnnotationDirectory>,
    pub code_items: ItemSet<CodeKey<'a>>,
    pub debug_infos: ItemSet<DebugInfo>,
}

pub(crate) struct FieldPlan<'a> {
    pub def: &'a FieldDef,
    pub id: FieldId,
}

pub(crate) struct MethodPlan<'a> {
    pub def: &'a MethodDef,
    pub id: MethodId,
    pub code: Option<usize>,
    pub debug: Option<usize>,
}

/// A class with its members in index order and the ids of the items it uses.
pub(crate) struct ClassPlan<'a> {
    pub def: &'a ClassDef,
    pub interfaces: Option<usize>,
    pub static_values: Option<usize>,
    pub annotations: Option<usize>,
    pub static_fields: Vec<FieldPlan<'a>>,
    pub instance_fields: Vec<FieldPlan<'a>>,
    pub direct_methods: Vec<MethodPlan<'a>>,
    pub virtual_methods: Vec<MethodPlan<'a>>,
}

impl<'a> ClassPlan<'a> {
    pub fn has_class_data(&self) -> bool {
        !(self.static_fields.is_empty()
            && self.instance_fields.is_empty()
            && self.direct_methods.is_empty()
            && self.virtual_methods.is_empty())
    }

    pub fn methods(&self) -> impl Iterator<Item = &MethodPlan<'a>> {
        self.direct_methods.iter().chain(self.virtual_methods.iter())
    }

    pub fn fields(&self) -> impl Iterator<Item = &FieldPlan<'a>> {
        self.static_fields.iter().chain(self.instance_fields.iter())
    }
}

pub(crate) struct Collection<'a> {
    pub pools: Pools,
    pub items: ItemSets<'a>,
    pub classes: Vec<ClassPlan<'a>>,
}

/// Values still to be walked for references. Values carry the number of
/// arrays and annotations around them.
enum Pending<'a> {
    Value(&'a EncodedValue, usize),
    Annotation(&'a Annotation),
    CallSite(&'a CallSiteId),
}

struct Collector<'a> {
    strings: HashSet<String>,
    types: HashSet<TypeId>,
    protos: HashSet<ProtoId>,
    fields: HashSet<FieldId>,
    methods: HashSet<MethodId>,
    method_handles: HashSet<MethodHandleId>,
    call_sites: HashSet<CallSiteId>,
    items: ItemSets<'a>,
    pending: Vec<Pending<'a>>,
    debug_info: bool,
    compact: bool,
}

/// Collects the pools and data items of `dex` for the given target.
pub(crate) fn collect<'a>(dex: &'a Dex, options: &WriteOptions) -> Result<Collection<'a>, DexError> {
    let mut collector = Collector {
        strings: HashSet::new(),
        types: HashSet::new(),
        protos: HashSet::new(),
        fields: HashSet::new(),
        methods: HashSet::new(),
        method_handles: HashSet::new(),
        call_sites: HashSet::new(),
        items: ItemSets::default(),
        pending: Vec::new(),
        debug_info: options.dex.debug_info,
        compact: options.version.is_compact(),
    };

    let mut seen = HashSet::new();
    let mut classes = Vec::with_capacity(dex.classes.len());
    for class in &dex.classes {
        if !seen.insert(&class.class_type) {
            fail!(StructuralViolation, "Duplicate class definition {}", class.class_type);
        }
        classes.push(collector.collect_class(class).context(|| class.to_string())?);
    }
    collector.drain()?;

    let Collector { strings, types, protos, fields, methods, method_handles, call_sites, items, .. } = collector;
    let pools = Pools::new(
        strings.into_iter().collect(),
        types.into_iter().collect(),
        protos.into_iter().collect(),
        fields.into_iter().collect(),
        methods.into_iter().collect(),
        method_handles.into_iter().collect(),
        call_sites.into_iter().collect(),
    )?;
    debug!(
        "collected {} type lists, {} encoded arrays, {} annotations, {} annotation sets, {} code items, {} debug infos",
        items.type_lists.len(),
        items.encoded_arrays.len(),
        items.annotations.len(),
        items.annotation_sets.len(),
        items.code_items.len(),
        items.debug_infos.len()
    );
    Ok(Collection { pools, items, classes })
}

/// Sorts members by id and rejects duplicates.
fn sorted_members<'a, T, K: Ord + Clone + std::fmt::Display>(
    members: &'a [T],
    id: impl Fn(&T) -> K,
    seen: &mut HashSet<K>,
    what: &str,
) -> Result<Vec<(&'a T, K)>, DexError>
where
    K: std::hash::Hash,
{
    let mut out: Vec<(&T, K)> = members.iter().map(|m| (m, id(m))).collect();
    out.sort_by(|a, b| a.1.cmp(&b.1));
    for (_, key) in &out {
        if !seen.insert(key.clone()) {
            fail!(StructuralViolation, "Duplicate {} {}", what, key);
        }
    }
    Ok(out)
}

impl<'a> Collector<'a> {
    fn add_string(&mut self, value: &str) {
        if !self.strings.contains(value) {
            self.strings.insert(value.to_string());
        }
    }

    fn add_type(&mut self, value: &TypeId) {
        if self.types.insert(value.clone()) {
            self.add_string(&value.descriptor);
        }
    }

    fn add_proto(&mut self, value: &ProtoId) {
        if self.protos.insert(value.clone()) {
            self.add_string(&value.shorty());
            self.add_type(&value.return_type);
            for parameter in &value.parameters {
                self.add_type(parameter);
            }
            if !value.parameters.is_empty() {
                self.items.type_lists.insert(value.parameters.clone());
            }
        }
    }

    fn add_field(&mut self, value: &FieldId) {
        if self.fields.insert(value.clone()) {
            self.add_type(&value.declaring_class);
            self.add_string(&value.name);
            self.add_type(&value.field_type);
        }
    }

    fn add_method(&mut self, value: &MethodId) {
        if self.methods.insert(value.clone()) {
            self.add_type(&value.declaring_class);
            self.add_string(&value.name);
            self.add_proto(&value.proto);
        }
    }

    fn add_method_handle(&mut self, value: &MethodHandleId) {
        if self.method_handles.insert(value.clone()) {
            match &value.member {
                MethodHandleMember::Field(field) => self.add_field(field),
                MethodHandleMember::Method(method) => self.add_method(method),
            }
        }
    }

    fn add_reference(&mut self, reference: &'a Reference) {
        match reference {
            Reference::String(value) => self.add_string(value),
            Reference::Type(value) => self.add_type(value),
            Reference::Field(value) => self.add_field(value),
            Reference::Method(value) => self.add_method(value),
            Reference::Proto(value) => self.add_proto(value),
            Reference::CallSite(value) => self.pending.push(Pending::CallSite(value)),
            Reference::MethodHandle(value) => self.add_method_handle(value),
            Reference::Raw(_) => {}
        }
    }

    /// Walks queued values until nothing is left.
    fn drain(&mut self) -> Result<(), DexError> {
        while let Some(next) = self.pending.pop() {
            match next {
                Pending::Value(_, depth) if depth > MAX_NESTING => {
                    fail!(StructuralViolation, "Encoded value nesting exceeds {}", MAX_NESTING);
                }
                Pending::Value(value, depth) => match value {
                    EncodedValue::MethodType(proto) => self.add_proto(proto),
                    EncodedValue::MethodHandle(handle) => self.add_method_handle(handle),
                    EncodedValue::String(s) => self.add_string(s),
                    EncodedValue::Type(t) => self.add_type(t),
                    EncodedValue::Field(f) | EncodedValue::Enum(f) => self.add_field(f),
                    EncodedValue::Method(m) => self.add_method(m),
                    EncodedValue::Array(values) => self.pending.extend(values.iter().map(|v| Pending::Value(v, depth + 1))),
                    EncodedValue::Annotation(annotation) => {
                        self.add_type(&annotation.annotation_type);
                        for element in &annotation.elements {
                            self.add_string(&element.name);
                            self.pending.push(Pending::Value(&element.value, depth + 1));
                        }
                    }
                    _ => {}
                },
                Pending::Annotation(annotation) => {
                    self.add_type(annotation.annotation_type());
                    for element in &annotation.annotation.elements {
                        self.add_string(&element.name);
                        self.pending.push(Pending::Value(&element.value, 0));
                    }
                }
                Pending::CallSite(site) => {
                    if self.call_sites.insert(site.clone()) {
                        self.add_method_handle(&site.method_handle);
                        self.add_string(&site.method_name);
                        self.add_proto(&site.method_proto);
                        self.pending.extend(site.extra_args.iter().map(|v| Pending::Value(v, 0)));
                        self.items.encoded_arrays.insert(site.to_encoded_array());
                    }
                }
            }
        }
        Ok(())
    }

    /// Queues the annotations and stores them as a sorted set. Empty sets
    /// are not items.
    fn add_annotation_set(&mut self, annotations: &'a [Annotation]) -> Result<Vec<Annotation>, DexError> {
        let set = sorted_annotation_set(annotations)?;
        for annotation in annotations {
            self.pending.push(Pending::Annotation(annotation));
        }
        for annotation in &set {
            self.items.annotations.insert(annotation.clone());
        }
        if !set.is_empty() {
            self.items.annotation_sets.insert(set.clone());
        }
        Ok(set)
    }

    fn collect_class(&mut self, class: &'a ClassDef) -> Result<ClassPlan<'a>, DexError> {
        self.add_type(&class.class_type);
        if let Some(superclass) = &class.superclass {
            self.add_type(superclass);
        }
        for interface in &class.interfaces {
            self.add_type(interface);
        }
        let interfaces = if class.interfaces.is_empty() {
            None
        } else {
            Some(self.items.type_lists.insert(class.interfaces.clone()).0)
        };
        if let Some(source_file) = &class.source_file {
            self.add_string(source_file);
        }

        let mut field_ids = HashSet::new();
        let static_fields = sorted_members(&class.static_fields, |f| class.field_id(f), &mut field_ids, "field")?;
        let instance_fields = sorted_members(&class.instance_fields, |f| class.field_id(f), &mut field_ids, "field")?;
        let mut method_ids = HashSet::new();
        let direct_methods = sorted_members(&class.direct_methods, |m| class.method_id(m), &mut method_ids, "method")?;
        let virtual_methods = sorted_members(&class.virtual_methods, |m| class.method_id(m), &mut method_ids, "method")?;

        let mut directory = AnnotationDirectory {
            owner: None,
            class_annotations: self.add_annotation_set(&class.annotations)?,
            fields: vec![],
            methods: vec![],
            parameters: vec![],
        };

        let mut static_values = Vec::with_capacity(static_fields.len());
        for &(field, ref id) in static_fields.iter().chain(instance_fields.iter()) {
            self.add_field(id);
            let set = self.add_annotation_set(&field.annotations).context(|| format!("field {}", id))?;
            if !set.is_empty() {
                directory.fields.push((id.clone(), set));
            }
        }
        for &(field, ref id) in &static_fields {
            let value = match &field.initial_value {
                Some(value) => {
                    self.pending.push(Pending::Value(value, 0));
                    value.clone()
                }
                None => EncodedValue::default_for(&field.field_type).context(|| format!("field {}", id))?,
            };
            static_values.push(value);
        }
        for (field, id) in &instance_fields {
            if field.initial_value.is_some() {
                fail!(StructuralViolation, "Instance field {} cannot have an initial value", id);
            }
        }
        let trimmed = trim_static_values(&static_values);
        let static_values = if trimmed.is_empty() {
            None
        } else {
            Some(self.items.encoded_arrays.insert(trimmed.to_vec()).0)
        };

        let mut method_plans = Vec::with_capacity(direct_methods.len() + virtual_methods.len());
        for &(method, ref id) in direct_methods.iter().chain(virtual_methods.iter()) {
            let plan = self.collect_method(method, id, &mut directory).context(|| format!("method {}", id))?;
            method_plans.push(plan);
        }
        let virtual_plans = method_plans.split_off(direct_methods.len());

        let has_members = !(directory.fields.is_empty() && directory.methods.is_empty() && directory.parameters.is_empty());
        let annotations = if has_members || !directory.class_annotations.is_empty() {
            if has_members {
                directory.owner = Some(class.class_type.clone());
            }
            Some(self.items.annotation_directories.insert(directory).0)
        } else {
            None
        };

        Ok(ClassPlan {
            def: class,
            interfaces,
            static_values,
            annotations,
            static_fields: static_fields.into_iter().map(|(def, id)| FieldPlan { def, id }).collect(),
            instance_fields: instance_fields.into_iter().map(|(def, id)| FieldPlan { def, id }).collect(),
            direct_methods: method_plans,
            virtual_methods: virtual_plans,
        })
    }

    fn collect_method(
        &mut self,
        method: &'a MethodDef,
        id: &MethodId,
        directory: &mut AnnotationDirectory,
    ) -> Result<MethodPlan<'a>, DexError> {
        self.add_method(id);

        let set = self.add_annotation_set(&method.annotations)?;
        if !set.is_empty() {
            directory.methods.push((id.clone(), set));
        }
        let mut lists = Vec::with_capacity(method.parameters.len());
        for parameter in &method.parameters {
            lists.push(self.add_annotation_set(&parameter.annotations)?);
        }
        let lists = trim_parameter_annotations(&lists);
        if !lists.is_empty() {
            self.items.annotation_set_lists.insert(lists.to_vec());
            directory.parameters.push((id.clone(), lists.to_vec()));
        }

        let Some(implementation) = &method.implementation else {
            return Ok(MethodPlan { def: method, id: id.clone(), code: None, debug: None });
        };

        let ins = method.ins_size();
        if ins > implementation.register_count as u32 {
            fail!(
                StructuralViolation,
                "Method uses {} registers but its arguments need {}",
                implementation.register_count,
                ins
            );
        }
        for insn in &implementation.instructions {
            for reference in insn.references() {
                self.add_reference(reference);
            }
        }
        for block in &implementation.try_blocks {
            for handler in &block.handlers {
                self.add_type(&handler.exception_type);
            }
        }

        let debug = if self.debug_info {
            self.collect_debug_info(method, implementation)
        } else {
            None
        };
        let key = CodeKey {
            implementation,
            ins: ins as u16,
            outs: implementation.outs_size(),
            debug: if self.compact { None } else { debug },
        };
        let code = self.items.code_items.insert(key).0;
        Ok(MethodPlan { def: method, id: id.clone(), code: Some(code), debug })
    }

    fn collect_debug_info(&mut self, method: &MethodDef, implementation: &MethodImplementation) -> Option<usize> {
        let info = DebugInfo { parameter_names: method.parameter_names(), items: implementation.debug_items.clone() };
        if info.is_empty() {
            return None;
        }
        for name in info.parameter_names.iter().flatten() {
            self.add_string(name);
        }
        for item in &info.items {
            match item {
                DebugItem::StartLocal { name, local_type, signature, .. } => {
                    if let Some(name) = name {
                        self.add_string(name);
                    }
                    if let Some(local_type) = local_type {
                        self.add_type(local_type);
                    }
                    if let Some(signature) = signature {
                        self.add_string(signature);
                    }
                }
                DebugItem::SetFile { name: Some(name) } => self.add_string(name),
                _ => {}
            }
        }
        Some(self.items.debug_infos.insert(info).0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::annotations::AnnotationVisibility;
    use crate::dex::dex_file::{ACC_PUBLIC, ACC_STATIC};
    use crate::dex::error::DexErrorKind;
    use crate::dex::instructions::Instruction;
    use crate::dex::model::Parameter;
    use crate::dex::opcodes::opcode;
    use crate::dex::pools::IndexResolver;

    fn t(d: &str) -> TypeId {
        TypeId::of(d)
    }

    fn class(name: &str) -> ClassDef {
        ClassDef::new(t(name), ACC_PUBLIC, Some(t("Ljava/lang/Object;")))
    }

    fn collect_default(dex: &Dex) -> Result<Collection<'_>, DexError> {
        collect(dex, &WriteOptions::default())
    }

    fn return_void() -> MethodImplementation {
        MethodImplementation::new(1, vec![Instruction::Format10x { opcode: opcode("return-void").unwrap() }])
    }

    #[test]
    fn pools_follow_references() {
        let mut foo = class("LFoo;");
        let mut run = MethodDef::new("run", t("V"), vec![Parameter::of(t("J"))], ACC_PUBLIC | ACC_STATIC);
        let mut code = MethodImplementation::new(
            2,
            vec![
                Instruction::Format21c {
                    opcode: opcode("const-string").unwrap(),
                    a: 0,
                    reference: Reference::String("hello".to_string()),
                },
                Instruction::Format10x { opcode: opcode("return-void").unwrap() },
            ],
        );
        code.debug_items = vec![DebugItem::LineNumber { line: 3 }];
        run.implementation = Some(code);
        foo.direct_methods.push(run);
        let dex = Dex::new(vec![foo]);

        let collection = collect_default(&dex).unwrap();
        let pools = &collection.pools;
        for s in ["hello", "run", "VJ", "LFoo;", "J", "V", "Ljava/lang/Object;"] {
            assert!(pools.string_index(s).is_ok(), "{}", s);
        }
        assert_eq!(pools.types.len(), 4);
        assert_eq!(pools.protos, vec![ProtoId::of(t("V"), vec![t("J")])]);
        assert_eq!(collection.items.type_lists.len(), 1);
        assert_eq!(collection.items.code_items.len(), 1);
        assert_eq!(collection.items.debug_infos.len(), 1);
        let plan = &collection.classes[0].direct_methods[0];
        assert_eq!(plan.code, Some(0));
        assert_eq!(plan.debug, Some(0));
    }

    #[test]
    fn equal_items_share_one_id() {
        let mut a = class("LA;");
        let mut b = class("LB;");
        a.interfaces = vec![t("LI;"), t("LJ;")];
        b.interfaces = vec![t("LI;"), t("LJ;")];
        let anno = Annotation::new(AnnotationVisibility::Runtime, t("LAnno;"), vec![]).unwrap();
        a.annotations = vec![anno.clone()];
        b.annotations = vec![anno];
        let mut m = MethodDef::new("m", t("V"), vec![], ACC_PUBLIC | ACC_STATIC);
        m.implementation = Some(return_void());
        a.direct_methods.push(m.clone());
        b.direct_methods.push(m);
        let dex = Dex::new(vec![a, b]);

        let collection = collect_default(&dex).unwrap();
        assert_eq!(collection.items.type_lists.len(), 1);
        assert_eq!(collection.classes[0].interfaces, collection.classes[1].interfaces);
        assert_eq!(collection.items.annotation_sets.len(), 1);
        // class-only directories are shared
        assert_eq!(collection.items.annotation_directories.len(), 1);
        assert_eq!(collection.items.code_items.len(), 1);
    }

    #[test]
    fn static_values_are_trimmed() {
        let mut foo = class("LFoo;");
        let mut x = FieldDef::new("x", t("I"), ACC_STATIC);
        x.initial_value = Some(EncodedValue::Int(0));
        foo.static_fields.push(x);
        let dex = Dex::new(vec![foo]);
        let collection = collect_default(&dex).unwrap();
        assert_eq!(collection.classes[0].static_values, None);
        assert!(collection.items.encoded_arrays.is_empty());

        let mut bar = class("LBar;");
        let mut a = FieldDef::new("a", t("I"), ACC_STATIC);
        a.initial_value = Some(EncodedValue::Int(7));
        bar.static_fields = vec![FieldDef::new("b", t("Ljava/lang/String;"), ACC_STATIC), a];
        let dex = Dex::new(vec![bar]);
        let collection = collect_default(&dex).unwrap();
        let id = collection.classes[0].static_values.unwrap();
        assert_eq!(collection.items.encoded_arrays.get(id), Some(&vec![EncodedValue::Int(7)]));
        assert_eq!(collection.classes[0].static_fields[0].def.name, "a");
    }

    #[test]
    fn structural_errors() {
        let dex = Dex::new(vec![class("LA;"), class("LA;")]);
        assert_eq!(collect_default(&dex).err().unwrap().kind(), DexErrorKind::StructuralViolation);

        let mut a = class("LA;");
        a.instance_fields.push(FieldDef::new("x", t("I"), 0));
        a.static_fields.push(FieldDef::new("x", t("I"), ACC_STATIC));
        let dex = Dex::new(vec![a]);
        assert_eq!(collect_default(&dex).err().unwrap().kind(), DexErrorKind::StructuralViolation);

        let mut a = class("LA;");
        let mut m = MethodDef::new("m", t("V"), vec![Parameter::of(t("J"))], ACC_PUBLIC);
        m.implementation = Some(MethodImplementation::new(2, vec![]));
        a.virtual_methods.push(m);
        let dex = Dex::new(vec![a]);
        let err = collect_default(&dex).err().unwrap();
        assert_eq!(err.kind(), DexErrorKind::StructuralViolation);
        assert!(err.to_string().contains("of class LA;"));
    }

    fn nested_static(levels: usize) -> Dex {
        let mut value = EncodedValue::String("leaf".to_string());
        for _ in 0..levels {
            value = EncodedValue::Array(vec![value]);
        }
        let mut foo = class("LFoo;");
        let mut f = FieldDef::new("f", t("[Ljava/lang/Object;"), ACC_STATIC);
        f.initial_value = Some(value);
        foo.static_fields.push(f);
        Dex::new(vec![foo])
    }

    #[test]
    fn deep_values_are_walked() {
        let dex = nested_static(MAX_NESTING);
        let collection = collect_default(&dex).unwrap();
        assert!(collection.pools.string_index("leaf").is_ok());

        let dex = nested_static(1000);
        let err = collect_default(&dex).err().unwrap();
        assert_eq!(err.kind(), DexErrorKind::StructuralViolation);
        assert!(err.to_string().contains("nesting exceeds 128"), "{}", err);
    }
}
