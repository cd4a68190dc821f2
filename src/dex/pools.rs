//! Reference pools and the two lookup directions over them.
//!
//! The writer resolves values to indices through [`IndexResolver`]; the
//! reader turns indices back into values through [`ReferenceSource`].

use std::cmp::Ordering;
use std::collections::HashMap;
use std::hash::Hash;

use log::debug;

use crate::dex::error::DexError;
use crate::dex::ids::{CallSiteId, FieldId, MethodHandleId, MethodId, ProtoId, TypeId};
use crate::dex::mutf8::compare_utf16;

/// Largest pool a 16-bit index can address.
pub const MAX_POOL_SIZE: usize = 0x10000;

/// Value to index lookups used while encoding. A miss means the value was
/// never collected, which is an encoder bug rather than bad input.
pub(crate) trait IndexResolver {
    fn string_index(&self, value: &str) -> Result<u32, DexError>;
    fn type_index(&self, value: &TypeId) -> Result<u32, DexError>;
    fn proto_index(&self, value: &ProtoId) -> Result<u32, DexError>;
    fn field_index(&self, value: &FieldId) -> Result<u32, DexError>;
    fn method_index(&self, value: &MethodId) -> Result<u32, DexError>;
    fn method_handle_index(&self, value: &MethodHandleId) -> Result<u32, DexError>;
    fn call_site_index(&self, value: &CallSiteId) -> Result<u32, DexError>;
}

/// Index to value lookups used while decoding. Out of range indices are
/// bounds errors naming the section.
pub(crate) trait ReferenceSource {
    fn string(&self, index: u32) -> Result<String, DexError>;
    fn type_id(&self, index: u32) -> Result<TypeId, DexError>;
    fn proto_id(&self, index: u32) -> Result<ProtoId, DexError>;
    fn field_id(&self, index: u32) -> Result<FieldId, DexError>;
    fn method_id(&self, index: u32) -> Result<MethodId, DexError>;
    fn method_handle(&self, index: u32) -> Result<MethodHandleId, DexError>;
    fn call_site(&self, index: u32) -> Result<CallSiteId, DexError>;
}

pub(crate) fn check_index(section: &str, index: u32, size: usize) -> Result<usize, DexError> {
    if (index as usize) < size {
        Ok(index as usize)
    } else {
        fail!(Bounds, "Invalid {} index {}, not in [0, {})", section, index, size)
    }
}

/// The sorted pools of one output file.
#[derive(Debug, Default, Clone)]
pub(crate) struct Pools {
    pub strings: Vec<String>,
    pub types: Vec<TypeId>,
    pub protos: Vec<ProtoId>,
    pub fields: Vec<FieldId>,
    pub methods: Vec<MethodId>,
    pub method_handles: Vec<MethodHandleId>,
    pub call_sites: Vec<CallSiteId>,
}

impl Pools {
    /// Sorts every pool into its canonical order and checks the 16-bit index
    /// spaces. Inputs are expected to be duplicate free.
    pub fn new(
        mut strings: Vec<String>,
        mut types: Vec<TypeId>,
        mut protos: Vec<ProtoId>,
        mut fields: Vec<FieldId>,
        mut methods: Vec<MethodId>,
        mut method_handles: Vec<MethodHandleId>,
        mut call_sites: Vec<CallSiteId>,
    ) -> Result<Pools, DexError> {
        strings.sort_by(|a, b| compare_utf16(a, b));
        types.sort();
        protos.sort();
        fields.sort();
        methods.sort();
        method_handles.sort();
        call_sites.sort();

        check_pool_size("type", types.len())?;
        check_pool_size("proto", protos.len())?;
        check_pool_size("field", fields.len())?;
        check_pool_size("method", methods.len())?;
        check_pool_size("method handle", method_handles.len())?;
        check_pool_size("call site", call_sites.len())?;

        debug!(
            "pools: {} strings, {} types, {} protos, {} fields, {} methods, {} method handles, {} call sites",
            strings.len(),
            types.len(),
            protos.len(),
            fields.len(),
            methods.len(),
            method_handles.len(),
            call_sites.len()
        );

        Ok(Pools { strings, types, protos, fields, methods, method_handles, call_sites })
    }
}

fn check_pool_size(section: &str, size: usize) -> Result<(), DexError> {
    if size > MAX_POOL_SIZE {
        fail!(StructuralViolation, "Too many {} ids: {}, at most {} fit in one dex file", section, size, MAX_POOL_SIZE);
    }
    Ok(())
}

fn lookup<T, F>(pool: &[T], section: &str, value: &dyn std::fmt::Display, cmp: F) -> Result<u32, DexError>
where
    F: FnMut(&T) -> Ordering,
{
    match pool.binary_search_by(cmp) {
        Ok(index) => Ok(index as u32),
        Err(_) => fail!(UnresolvedReference, "Unable to find {} \"{}\"", section, value),
    }
}

impl IndexResolver for Pools {
    fn string_index(&self, value: &str) -> Result<u32, DexError> {
        lookup(&self.strings, "string", &value, |probe| compare_utf16(probe, value))
    }

    fn type_index(&self, value: &TypeId) -> Result<u32, DexError> {
        lookup(&self.types, "type", value, |probe| probe.cmp(value))
    }

    fn proto_index(&self, value: &ProtoId) -> Result<u32, DexError> {
        lookup(&self.protos, "proto", value, |probe| probe.cmp(value))
    }

    fn field_index(&self, value: &FieldId) -> Result<u32, DexError> {
        lookup(&self.fields, "field", value, |probe| probe.cmp(value))
    }

    fn method_index(&self, value: &MethodId) -> Result<u32, DexError> {
        lookup(&self.methods, "method", value, |probe| probe.cmp(value))
    }

    fn method_handle_index(&self, value: &MethodHandleId) -> Result<u32, DexError> {
        lookup(&self.method_handles, "method handle", value, |probe| probe.cmp(value))
    }

    fn call_site_index(&self, value: &CallSiteId) -> Result<u32, DexError> {
        lookup(&self.call_sites, "call site", &value.name, |probe| probe.cmp(value))
    }
}

/// Insertion ordered set of data items. The position of an item is its id;
/// structurally equal items share one id, so each is written once.
#[derive(Debug, Clone)]
pub(crate) struct ItemSet<T: Eq + Hash + Clone> {
    items: Vec<T>,
    ids: HashMap<T, usize>,
}

impl<T: Eq + Hash + Clone> Default for ItemSet<T> {
    fn default() -> Self {
        ItemSet { items: Vec::new(), ids: HashMap::new() }
    }
}

impl<T: Eq + Hash + Clone> ItemSet<T> {
    /// Adds `item` unless an equal one is present; returns its id and
    /// whether it was new.
    pub fn insert(&mut self, item: T) -> (usize, bool) {
        if let Some(&id) = self.ids.get(&item) {
            return (id, false);
        }
        let id = self.items.len();
        self.ids.insert(item.clone(), id);
        self.items.push(item);
        (id, true)
    }

    pub fn id(&self, item: &T) -> Option<usize> {
        self.ids.get(item).copied()
    }

    pub fn get(&self, id: usize) -> Option<&T> {
        self.items.get(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;

    /// Minimal pools for codec tests: the strings list doubles as the type
    /// list, so the type `LFoo;` has the index of the string `LFoo;`.
    #[derive(Debug, Default)]
    pub(crate) struct FakePools {
        pub strings: Vec<String>,
    }

    impl FakePools {
        pub fn with_strings(strings: &[&str]) -> FakePools {
            FakePools { strings: strings.iter().map(|s| s.to_string()).collect() }
        }

        fn position(&self, value: &str) -> Result<u32, DexError> {
            match self.strings.iter().position(|s| s == value) {
                Some(index) => Ok(index as u32),
                None => fail!(UnresolvedReference, "Unable to find string \"{}\"", value),
            }
        }
    }

    impl IndexResolver for FakePools {
        fn string_index(&self, value: &str) -> Result<u32, DexError> {
            self.position(value)
        }

        fn type_index(&self, value: &TypeId) -> Result<u32, DexError> {
            self.position(&value.descriptor)
        }

        fn proto_index(&self, value: &ProtoId) -> Result<u32, DexError> {
            fail!(UnresolvedReference, "Unable to find proto \"{}\"", value)
        }

        fn field_index(&self, value: &FieldId) -> Result<u32, DexError> {
            fail!(UnresolvedReference, "Unable to find field \"{}\"", value)
        }

        fn method_index(&self, value: &MethodId) -> Result<u32, DexError> {
            fail!(UnresolvedReference, "Unable to find method \"{}\"", value)
        }

        fn method_handle_index(&self, value: &MethodHandleId) -> Result<u32, DexError> {
            fail!(UnresolvedReference, "Unable to find method handle \"{}\"", value)
        }

        fn call_site_index(&self, value: &CallSiteId) -> Result<u32, DexError> {
            fail!(UnresolvedReference, "Unable to find call site \"{}\"", value.name)
        }
    }

    fn empty_section(section: &str, index: u32) -> DexError {
        err!(Bounds, "Invalid {} index {}, not in [0, 0)", section, index)
    }

    impl ReferenceSource for FakePools {
        fn string(&self, index: u32) -> Result<String, DexError> {
            let index = check_index("string", index, self.strings.len())?;
            Ok(self.strings[index].clone())
        }

        fn type_id(&self, index: u32) -> Result<TypeId, DexError> {
            let index = check_index("type", index, self.strings.len())?;
            Ok(TypeId::of(&self.strings[index]))
        }

        fn proto_id(&self, index: u32) -> Result<ProtoId, DexError> {
            Err(empty_section("proto", index))
        }

        fn field_id(&self, index: u32) -> Result<FieldId, DexError> {
            Err(empty_section("field", index))
        }

        fn method_id(&self, index: u32) -> Result<MethodId, DexError> {
            Err(empty_section("method", index))
        }

        fn method_handle(&self, index: u32) -> Result<MethodHandleId, DexError> {
            Err(empty_section("method handle", index))
        }

        fn call_site(&self, index: u32) -> Result<CallSiteId, DexError> {
            Err(empty_section("call site", index))
        }
    }

    fn t(d: &str) -> TypeId {
        TypeId::of(d)
    }

    #[test]
    fn pools_sort_and_resolve() {
        let pools = Pools::new(
            vec!["b".to_string(), "\u{10000}".to_string(), "\u{ffff}".to_string(), "a".to_string()],
            vec![t("LB;"), t("LA;"), t("I")],
            vec![],
            vec![],
            vec![],
            vec![],
            vec![],
        )
        .unwrap();
        // supplementary characters sort by their surrogates, below U+FFFF
        assert_eq!(pools.strings, vec!["a", "b", "\u{10000}", "\u{ffff}"]);
        assert_eq!(pools.string_index("\u{ffff}").unwrap(), 3);
        assert_eq!(pools.type_index(&t("I")).unwrap(), 0);
        assert_eq!(pools.type_index(&t("LB;")).unwrap(), 2);
        let err = pools.type_index(&t("LC;")).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::UnresolvedReference);
        assert_eq!(err.message(), "Unable to find type \"LC;\"");
    }

    #[test]
    fn oversized_pool_is_rejected() {
        let types = (0..=MAX_POOL_SIZE).map(|i| t(&format!("L{};", i))).collect();
        let err = Pools::new(vec![], types, vec![], vec![], vec![], vec![], vec![]).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::StructuralViolation);
    }

    #[test]
    fn item_set_dedups() {
        let mut set = ItemSet::default();
        assert_eq!(set.insert(vec![t("I")]), (0, true));
        assert_eq!(set.insert(vec![t("J")]), (1, true));
        assert_eq!(set.insert(vec![t("I")]), (0, false));
        assert_eq!(set.len(), 2);
        assert_eq!(set.id(&vec![t("J")]), Some(1));
        assert_eq!(set.get(1), Some(&vec![t("J")]));
    }

    #[test]
    fn bounds_message() {
        let err = check_index("string", 7, 3).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::Bounds);
        assert_eq!(err.message(), "Invalid string index 7, not in [0, 3)");
    }
}
