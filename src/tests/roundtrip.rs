use crate::dex::annotations::AnnotationVisibility;
use crate::dex::debug_info::DebugItem;
use crate::dex::dex_file::*;
use crate::dex::encoded_values::{EncodedValue, MAX_NESTING};
use crate::dex::error::DexErrorKind;
use crate::dex::ids::{MethodId, ProtoId};
use crate::dex::instructions::Instruction;
use crate::dex::model::{Dex, ExceptionHandler, FieldDef, MethodDef, MethodImplementation, Parameter, TryBlock};
use crate::dex::opcodes::opcode;
use crate::dex::options::WriteOptions;
use crate::dex::version::DexVersion;
use crate::dex::writer;
use crate::{read_dex, write_dex};

use super::*;

/// One class touching every kind of data item.
pub(crate) fn sample_dex() -> Dex {
    let mut foo = public_class("LFoo;");
    foo.interfaces = vec![t("Ljava/lang/Runnable;")];
    foo.source_file = Some("Foo.java".to_string());
    foo.annotations = vec![annotation(AnnotationVisibility::Runtime, "LAnno;", EncodedValue::Int(1))];

    let mut count = FieldDef::new("COUNT", t("I"), ACC_PUBLIC | ACC_STATIC | ACC_FINAL);
    count.initial_value = Some(EncodedValue::Int(3));
    let mut name = FieldDef::new("NAME", t("Ljava/lang/String;"), ACC_PUBLIC | ACC_STATIC | ACC_FINAL);
    name.initial_value = Some(EncodedValue::String("foo".to_string()));
    foo.static_fields = vec![count, name];
    let mut value = FieldDef::new("value", t("J"), ACC_PRIVATE);
    value.annotations = vec![annotation(AnnotationVisibility::Build, "LNullable;", EncodedValue::Boolean(true))];
    foo.instance_fields = vec![value];

    let mut helper = MethodDef::new("helper", t("V"), vec![Parameter::named(t("I"), "count")], ACC_PRIVATE | ACC_STATIC);
    helper.parameters[0].annotations = vec![annotation(AnnotationVisibility::Build, "LParam;", EncodedValue::Null)];
    let mut helper_code = MethodImplementation::new(1, vec![return_void()]);
    helper_code.debug_items = vec![DebugItem::LineNumber { line: 10 }];
    helper.implementation = Some(helper_code);
    foo.direct_methods = vec![constructor(), helper];

    let log = MethodId::of(t("LFoo;"), "log", ProtoId::of(t("V"), vec![t("Ljava/lang/String;")]));
    let mut run = MethodDef::new("run", t("V"), vec![], ACC_PUBLIC);
    let mut run_code = MethodImplementation::new(
        1,
        vec![
            const_string(0, "hi"),
            invoke("invoke-static", vec![0], log),
            return_void(),
            Instruction::Format11x { opcode: opcode("move-exception").unwrap(), a: 0 },
            return_void(),
        ],
    );
    run_code.try_blocks = vec![TryBlock::new(2, 3, vec![ExceptionHandler::of(t("Ljava/lang/Exception;"), 6)], None)];
    run.implementation = Some(run_code);
    run.annotations = vec![annotation(
        AnnotationVisibility::System,
        "Ldalvik/annotation/Throws;",
        EncodedValue::Array(vec![EncodedValue::Type(t("Ljava/io/IOException;"))]),
    )];
    let stop = MethodDef::new("stop", t("V"), vec![Parameter::of(t("Z"))], ACC_PUBLIC | ACC_NATIVE);
    foo.virtual_methods = vec![run, stop];

    Dex::new(vec![foo])
}

#[test]
fn standard_file_roundtrip() {
    let dex = sample_dex();
    let back = roundtrip(&dex, &WriteOptions::default()).unwrap();
    assert_eq!(back, dex);
}

#[test]
fn every_standard_version_roundtrips() {
    let dex = sample_dex();
    for (api, version) in [
        (21, DexVersion::Dex035),
        (24, DexVersion::Dex037),
        (26, DexVersion::Dex038),
        (28, DexVersion::Dex039),
        (30, DexVersion::Dex040),
    ] {
        let options = options_for(api, version);
        assert_eq!(roundtrip(&dex, &options).unwrap(), dex, "{}", version);
    }
}

#[test]
fn compact_file_roundtrip() {
    let dex = sample_dex();
    let options = options_for(28, DexVersion::Cdex001);
    let back = roundtrip(&dex, &options).unwrap();
    assert_eq!(back, dex);
}

#[test]
fn rewriting_is_stable() {
    let bytes = writer::write(&sample_dex(), &WriteOptions::default()).unwrap();
    let again = writer::write(&read_dex(&bytes).unwrap(), &WriteOptions::default()).unwrap();
    assert_eq!(bytes, again);
}

#[test]
fn debug_info_is_optional() {
    let dex = sample_dex();
    let mut options = WriteOptions::default();
    options.dex = options.dex.with_debug_info(false);
    let back = roundtrip(&dex, &options).unwrap();

    let helper = &back.classes[0].direct_methods[1];
    assert_eq!(helper.parameters[0].name, None);
    assert!(helper.implementation.as_ref().unwrap().debug_items.is_empty());
    // annotations live outside the debug info
    assert_eq!(helper.parameters[0].annotations, dex.classes[0].direct_methods[1].parameters[0].annotations);
}

#[test]
fn debug_lines_roundtrip() {
    let mut foo = public_class("LLines;");
    let mut m = MethodDef::new("m", t("V"), vec![], ACC_PUBLIC | ACC_STATIC);
    let nop = opcode("nop").unwrap();
    let mut code = MethodImplementation::new(1, vec![Instruction::Format10x { opcode: nop }; 40]);
    code.instructions.push(return_void());
    code.debug_items = vec![
        DebugItem::LineNumber { line: 100 },
        DebugItem::SetPrologueEnd,
        DebugItem::AdvancePc { addr_diff: 2 },
        DebugItem::LineNumber { line: 98 },
        DebugItem::AdvancePc { addr_diff: 30 },
        DebugItem::LineNumber { line: 5000 },
        DebugItem::StartLocal { register: 0, name: Some("x".to_string()), local_type: Some(t("I")), signature: None },
        DebugItem::AdvancePc { addr_diff: 8 },
        DebugItem::EndLocal { register: 0 },
        DebugItem::SetFile { name: Some("Other.java".to_string()) },
    ];
    m.implementation = Some(code);
    foo.direct_methods.push(m);
    let dex = Dex::new(vec![foo]);

    assert_eq!(roundtrip(&dex, &WriteOptions::default()).unwrap(), dex);
    assert_eq!(roundtrip(&dex, &options_for(28, DexVersion::Cdex001)).unwrap(), dex);
}

#[test]
fn static_values_fill_defaults() {
    // a zero initial value is trimmed and reads back as the default
    let mut a = public_class("LA;");
    let mut zero = FieldDef::new("zero", t("I"), ACC_STATIC);
    zero.initial_value = Some(EncodedValue::Int(0));
    let unset = FieldDef::new("unset", t("Ljava/lang/String;"), ACC_STATIC);
    a.static_fields = vec![unset, zero];
    let back = roundtrip(&Dex::new(vec![a]), &WriteOptions::default()).unwrap();
    let fields = &back.classes[0].static_fields;
    assert_eq!(fields[0].name, "unset");
    assert_eq!(fields[0].initial_value, Some(EncodedValue::Null));
    assert_eq!(fields[1].initial_value, Some(EncodedValue::Int(0)));
}

/// A static field holding a string inside `levels` nested arrays.
fn nested_values(levels: usize) -> Dex {
    let mut value = EncodedValue::String("leaf".to_string());
    for _ in 0..levels {
        value = EncodedValue::Array(vec![value]);
    }
    let mut a = public_class("LNested;");
    let mut field = FieldDef::new("deep", t("[Ljava/lang/Object;"), ACC_STATIC);
    field.initial_value = Some(value);
    a.static_fields.push(field);
    Dex::new(vec![a])
}

#[test]
fn nesting_limit_holds_on_both_sides() {
    let dex = nested_values(MAX_NESTING);
    assert_eq!(read_dex(&write_dex(&dex).unwrap()).unwrap(), dex);

    let err = write_dex(&nested_values(MAX_NESTING + 1)).unwrap_err();
    assert_eq!(err.kind(), DexErrorKind::StructuralViolation);
}

#[test]
fn leading_line_zero_is_not_written() {
    let mut a = public_class("LZero;");
    let mut m = MethodDef::new("m", t("V"), vec![], ACC_PUBLIC | ACC_STATIC);
    let nop = opcode("nop").unwrap();
    let mut code = MethodImplementation::new(1, vec![Instruction::Format10x { opcode: nop }; 3]);
    code.instructions.push(return_void());
    code.debug_items = vec![
        DebugItem::LineNumber { line: 0 },
        DebugItem::AdvancePc { addr_diff: 2 },
        DebugItem::LineNumber { line: 7 },
    ];
    m.implementation = Some(code);
    a.direct_methods.push(m);
    let dex = Dex::new(vec![a]);

    let back = roundtrip(&dex, &WriteOptions::default()).unwrap();
    let items = &back.classes[0].direct_methods[0].implementation.as_ref().unwrap().debug_items;
    assert_eq!(items, &dex.classes[0].direct_methods[0].implementation.as_ref().unwrap().debug_items[1..]);
}
