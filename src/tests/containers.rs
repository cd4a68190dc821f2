use crate::dex::dex_file::*;
use crate::dex::encoded_values::EncodedValue;
use crate::dex::error::DexErrorKind;
use crate::dex::ids::{call_site_name, CallSiteId, FieldId, MethodHandleId, MethodHandleKind, MethodHandleMember, MethodId, ProtoId};
use crate::dex::instructions::{Instruction, Reference};
use crate::dex::model::{Dex, FieldDef, MethodDef, MethodImplementation};
use crate::dex::opcodes::opcode;
use crate::dex::options::ReadOptions;
use crate::dex::reader::DexReader;
use crate::dex::version::DexVersion;
use crate::{read_dex, read_dex_container, write_dex, write_dex_container, write_dex_with};

use super::roundtrip::sample_dex;
use super::*;

fn small_dex(name: &str) -> Dex {
    let mut class = public_class(name);
    class.direct_methods.push(constructor());
    Dex::new(vec![class])
}

#[test]
fn container_roundtrip() {
    let options = options_for(35, DexVersion::Dex041);
    let dexes = vec![sample_dex(), small_dex("LSecond;"), small_dex("LThird;")];
    let bytes = write_dex_container(&dexes, &options).unwrap();

    let back = read_dex_container(&bytes, &read_options(&options)).unwrap();
    assert_eq!(back, dexes);

    // every header knows where it sits and how big the container is
    let mut header_off = 0;
    for _ in 0..dexes.len() {
        let reader = DexReader::new(&bytes, header_off, &read_options(&options)).unwrap();
        let container = reader.header().container.clone().unwrap();
        assert_eq!(container.header_off as usize, header_off);
        assert_eq!(container.container_size as usize, bytes.len());
        header_off += reader.file_size();
    }
    assert_eq!(header_off, bytes.len());
}

#[test]
fn single_files_read_as_containers_of_one() {
    let bytes = write_dex(&small_dex("LA;")).unwrap();
    let back = read_dex_container(&bytes, &ReadOptions::default()).unwrap();
    assert_eq!(back, vec![small_dex("LA;")]);

    let options = options_for(35, DexVersion::Dex041);
    let bytes = write_dex_with(&small_dex("LB;"), &options).unwrap();
    assert_eq!(&bytes[..8], b"dex\n041\0");
    assert_eq!(read_dex(&bytes).unwrap(), small_dex("LB;"));
}

#[test]
fn only_dex041_forms_containers() {
    let err = write_dex_container(&[small_dex("LA;")], &options_for(30, DexVersion::Dex040)).unwrap_err();
    assert_eq!(err.kind(), DexErrorKind::UnsupportedTarget);
    let err = write_dex_container(&[], &options_for(35, DexVersion::Dex041)).unwrap_err();
    assert_eq!(err.kind(), DexErrorKind::StructuralViolation);
}

#[test]
fn call_sites_and_method_handles_roundtrip() {
    let lookup = vec![
        t("Ljava/lang/invoke/MethodHandles$Lookup;"),
        t("Ljava/lang/String;"),
        t("Ljava/lang/invoke/MethodType;"),
        t("I"),
    ];
    let bootstrap = MethodId::of(t("LBoot;"), "bootstrap", ProtoId::of(t("Ljava/lang/invoke/CallSite;"), lookup));
    let site = CallSiteId {
        name: call_site_name(0),
        method_handle: MethodHandleId::new(MethodHandleKind::InvokeStatic, MethodHandleMember::Method(bootstrap)).unwrap(),
        method_name: "run".to_string(),
        method_proto: ProtoId::of(t("Ljava/lang/Runnable;"), vec![]),
        extra_args: vec![EncodedValue::Int(7)],
    };
    let getter = MethodHandleId::new(MethodHandleKind::StaticGet, MethodHandleMember::Field(FieldId::of(t("LA;"), "x", t("I"))))
        .unwrap();

    let mut a = public_class("LA;");
    a.static_fields.push(FieldDef::new("x", t("I"), ACC_STATIC));
    let mut m = MethodDef::new("m", t("V"), vec![], ACC_PUBLIC | ACC_STATIC);
    m.implementation = Some(MethodImplementation::new(
        1,
        vec![
            Instruction::Format35c { opcode: opcode("invoke-custom").unwrap(), registers: vec![], reference: Reference::CallSite(site) },
            Instruction::Format21c { opcode: opcode("const-method-handle").unwrap(), a: 0, reference: Reference::MethodHandle(getter) },
            return_void(),
        ],
    ));
    a.direct_methods.push(m);
    let mut dex = Dex::new(vec![a]);

    let options = options_for(28, DexVersion::Dex039);
    let bytes = write_dex_with(&dex, &options).unwrap();
    let reader = DexReader::new(&bytes, 0, &read_options(&options)).unwrap();
    let count = |type_code| reader.map().iter().find(|item| item.type_code == type_code).map(|item| item.size);
    assert_eq!(count(TYPE_CALL_SITE_ID_ITEM), Some(1));
    assert_eq!(count(TYPE_METHOD_HANDLE_ITEM), Some(2));
    assert_eq!(count(TYPE_ENCODED_ARRAY_ITEM), Some(1));

    // the unset static field reads back with its default value
    dex.classes[0].static_fields[0].initial_value = Some(EncodedValue::Int(0));
    assert_eq!(reader.read_dex().unwrap(), dex);

    // method handles need dex 039
    let err = write_dex_with(&dex, &options_for(26, DexVersion::Dex038)).unwrap_err();
    assert_eq!(err.kind(), DexErrorKind::UnsupportedTarget);
}
