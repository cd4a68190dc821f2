use rand::Rng;

use crate::dex::dex_file::*;
use crate::dex::encoded_values::EncodedValue;
use crate::dex::model::{Dex, FieldDef};
use crate::dex::options::WriteOptions;
use crate::dex::version::DexVersion;

use super::*;

fn random_string<R: Rng>(rng: &mut R) -> String {
    let len = rng.gen_range(0..12);
    (0..len)
        .map(|_| match rng.gen_range(0..4) {
            0 => '\0',
            1 => char::from_u32(rng.gen_range(0x20..0x7f)).unwrap_or('a'),
            2 => char::from_u32(rng.gen_range(0x80..0xd800)).unwrap_or('b'),
            _ => char::from_u32(rng.gen_range(0x10000..0x110000)).unwrap_or('c'),
        })
        .collect()
}

fn random_value<R: Rng>(rng: &mut R, kind: usize) -> (TypeId, EncodedValue) {
    // shift so that every byte width gets exercised
    let shift = rng.gen_range(0..64);
    match kind {
        0 => (t("B"), EncodedValue::Byte(rng.gen::<i8>())),
        1 => (t("S"), EncodedValue::Short(rng.gen::<i16>() >> (shift % 16))),
        2 => (t("C"), EncodedValue::Char(rng.gen::<u16>() >> (shift % 16))),
        3 => (t("I"), EncodedValue::Int(rng.gen::<i32>() >> (shift % 32))),
        4 => (t("J"), EncodedValue::Long(rng.gen::<i64>() >> shift)),
        5 => (t("Z"), EncodedValue::Boolean(rng.gen::<bool>())),
        _ => (t("Ljava/lang/String;"), EncodedValue::String(random_string(rng))),
    }
}

#[test]
fn random_static_values_roundtrip() {
    let mut rng = rand::thread_rng();
    for round in 0..20 {
        let mut class = public_class("LValues;");
        for i in 0..rng.gen_range(1..30) {
            let kind = rng.gen_range(0..7);
            let (field_type, value) = random_value(&mut rng, kind);
            let mut field = FieldDef::new(&format!("f{:03}", i), field_type, ACC_PUBLIC | ACC_STATIC);
            field.initial_value = Some(value);
            class.static_fields.push(field);
        }
        let dex = Dex::new(vec![class]);

        let options = if round % 2 == 0 { WriteOptions::default() } else { options_for(28, DexVersion::Cdex001) };
        assert_eq!(roundtrip(&dex, &options).unwrap(), dex, "round {}", round);
    }
}
