//! Lays out and encodes a model as a standard, compact or container file.
//!
//! The collector gathers pools and data items first. Data items are then
//! written section by section, the id sections are filled from the
//! recorded offsets, and the header is patched and signed last.

use std::sync::Arc;

use log::{debug, info};
use sha1::{Digest, Sha1};

use crate::dex::annotations::{Annotation, AnnotationSetItem, AnnotationSetRefList, AnnotationsDirectoryItem, MemberAnnotations};
use crate::dex::code_item::{write_method_code, CodeLayout};
use crate::dex::collector::{collect, ClassPlan, Collection};
use crate::dex::dex_file::*;
use crate::dex::encoded_values::write_encoded_array;
use crate::dex::error::{DexError, ResultExt};
use crate::dex::hidden_api::{encode_legacy, write_section, LEGACY_HIDDENAPI_API};
use crate::dex::ids::MethodHandleMember;
use crate::dex::model::Dex;
use crate::dex::mutf8::write_string_data;
use crate::dex::opcodes::OpcodeTable;
use crate::dex::options::WriteOptions;
use crate::dex::pools::IndexResolver;
use crate::dex::{align_to, fill_to_alignment, overwrite_u4, write_u2, write_u4, write_uleb128};

/// Bytes at the start of a compact data section that no item may use, so
/// that offset 0 keeps meaning "absent".
const COMPACT_DATA_RESERVED: usize = 8;

/// Where one written file sits in the output buffer.
#[derive(Debug, Clone, Copy)]
struct FileSpan {
    header_off: usize,
    end: usize,
}

/// Positions of the id sections, derived from the pool sizes alone.
#[derive(Debug)]
struct IdLayout {
    string_ids: usize,
    type_ids: usize,
    proto_ids: usize,
    field_ids: usize,
    method_ids: usize,
    class_defs: usize,
    call_site_ids: usize,
    method_handles: usize,
    end: usize,
}

impl IdLayout {
    fn new(start: usize, collection: &Collection) -> IdLayout {
        let pools = &collection.pools;
        let string_ids = start;
        let type_ids = string_ids + pools.strings.len() * STRING_ID_SIZE;
        let proto_ids = type_ids + pools.types.len() * TYPE_ID_SIZE;
        let field_ids = proto_ids + pools.protos.len() * PROTO_ID_SIZE;
        let method_ids = field_ids + pools.fields.len() * FIELD_ID_SIZE;
        let class_defs = method_ids + pools.methods.len() * METHOD_ID_SIZE;
        let call_site_ids = class_defs + collection.classes.len() * CLASS_DEF_SIZE;
        let method_handles = call_site_ids + pools.call_sites.len() * CALL_SITE_ID_SIZE;
        let end = method_handles + pools.method_handles.len() * METHOD_HANDLE_ID_SIZE;
        IdLayout { string_ids, type_ids, proto_ids, field_ids, method_ids, class_defs, call_site_ids, method_handles, end }
    }

    fn map_items(&self, collection: &Collection) -> Vec<MapItem> {
        let pools = &collection.pools;
        [
            (TYPE_STRING_ID_ITEM, pools.strings.len(), self.string_ids),
            (TYPE_TYPE_ID_ITEM, pools.types.len(), self.type_ids),
            (TYPE_PROTO_ID_ITEM, pools.protos.len(), self.proto_ids),
            (TYPE_FIELD_ID_ITEM, pools.fields.len(), self.field_ids),
            (TYPE_METHOD_ID_ITEM, pools.methods.len(), self.method_ids),
            (TYPE_CLASS_DEF_ITEM, collection.classes.len(), self.class_defs),
            (TYPE_CALL_SITE_ID_ITEM, pools.call_sites.len(), self.call_site_ids),
            (TYPE_METHOD_HANDLE_ITEM, pools.method_handles.len(), self.method_handles),
        ]
        .into_iter()
        .filter(|&(_, size, _)| size > 0)
        .map(|(type_code, size, offset)| MapItem::new(type_code, size as u32, offset as u32))
        .collect()
    }
}

/// Header (size, offset) pair; an empty section has offset 0.
fn section_pair(size: usize, offset: usize) -> (u32, u32) {
    if size == 0 {
        (0, NO_OFFSET)
    } else {
        (size as u32, offset as u32)
    }
}

/// Offsets of the written data items, indexed by item id.
#[derive(Debug, Default)]
struct Offsets {
    type_lists: Vec<u32>,
    encoded_arrays: Vec<u32>,
    annotations: Vec<u32>,
    annotation_sets: Vec<u32>,
    annotation_set_lists: Vec<u32>,
    annotation_directories: Vec<u32>,
    code_items: Vec<u32>,
    debug_infos: Vec<u32>,
    class_data: Vec<u32>,
    strings: Vec<u32>,
}

fn item_offset(offsets: &[u32], id: Option<usize>, what: &str) -> Result<u32, DexError> {
    match id.and_then(|id| offsets.get(id)) {
        Some(&offset) if offset != NO_OFFSET => Ok(offset),
        _ => fail!(UnresolvedReference, "Unable to find offset of {} {:?}", what, id),
    }
}

fn optional_offset(offsets: &[u32], id: Option<usize>, what: &str) -> Result<u32, DexError> {
    match id {
        None => Ok(NO_OFFSET),
        some => item_offset(offsets, some, what),
    }
}

/// Writes one data section: each item aligned and appended. Returns the item
/// offsets and records the section for the map.
fn write_items<'x, T: 'x>(
    bytes: &mut Vec<u8>,
    sections: &mut Vec<MapItem>,
    type_code: u16,
    alignment: usize,
    items: impl IntoIterator<Item = &'x T>,
    mut write: impl FnMut(&mut Vec<u8>, &'x T) -> Result<(), DexError>,
) -> Result<Vec<u32>, DexError> {
    let mut offsets = Vec::new();
    for item in items {
        fill_to_alignment(bytes, alignment);
        offsets.push(bytes.len() as u32);
        write(bytes, item)?;
    }
    if let Some(&first) = offsets.first() {
        debug!("section {:#06x}: {} items at {:#x}", type_code, offsets.len(), first);
        sections.push(MapItem::new(type_code, offsets.len() as u32, first));
    }
    Ok(offsets)
}

/// Writes the data section of one file into `bytes`. Offsets are positions
/// in `bytes`: absolute for standard files, data relative for compact ones.
struct DataWriter<'w, 'c, 'a> {
    bytes: &'w mut Vec<u8>,
    collection: &'c Collection<'a>,
    options: &'c WriteOptions,
    table: Arc<OpcodeTable>,
    compact: bool,
    legacy_hidden_api: bool,
    sections: Vec<MapItem>,
    offsets: Offsets,
}

impl<'w, 'c, 'a> DataWriter<'w, 'c, 'a> {
    fn write_data(&mut self) -> Result<(), DexError> {
        // compact code items come first so their offsets stay small
        if self.compact {
            self.write_code_items()?;
            self.write_debug_infos()?;
        } else {
            self.write_debug_infos()?;
            self.write_code_items()?;
        }
        self.write_encoded_arrays()?;
        self.write_annotations()?;
        self.write_type_lists()?;
        self.write_class_data()?;
        self.write_string_data()?;
        self.write_hidden_api()
    }

    fn write_debug_infos(&mut self) -> Result<(), DexError> {
        let collection = self.collection;
        let pools = &collection.pools;
        self.offsets.debug_infos = write_items(
            self.bytes,
            &mut self.sections,
            TYPE_DEBUG_INFO_ITEM,
            1,
            collection.items.debug_infos.iter(),
            |bytes, info| info.write(bytes, pools).map(|_| ()),
        )?;
        Ok(())
    }

    /// Code items in class and method order; a shared item is written once.
    fn write_code_items(&mut self) -> Result<(), DexError> {
        let collection = self.collection;
        let items = &collection.items;
        let mut offsets = vec![NO_OFFSET; items.code_items.len()];
        let mut written = 0;
        let mut first = None;
        for class in &collection.classes {
            for method in class.methods() {
                let Some(id) = method.code else { continue };
                if offsets.get(id) != Some(&NO_OFFSET) {
                    continue;
                }
                let Some(key) = items.code_items.get(id) else {
                    fail!(UnresolvedReference, "Unable to find code item {} of {}", id, method.id);
                };
                let debug_info_off = optional_offset(&self.offsets.debug_infos, key.debug, "debug info")?;
                let layout = CodeLayout {
                    implementation: key.implementation,
                    ins: key.ins,
                    outs: key.outs,
                    debug_info_off,
                };
                let start = write_method_code(
                    self.bytes,
                    &layout,
                    self.compact,
                    &self.table,
                    &collection.pools,
                    &method.id.to_string(),
                )?;
                offsets[id] = start as u32;
                written += 1;
                first.get_or_insert(start as u32);
            }
        }
        if let Some(first) = first {
            debug!("code items: {} at {:#x}", written, first);
            self.sections.push(MapItem::new(TYPE_CODE_ITEM, written, first));
        }
        self.offsets.code_items = offsets;
        Ok(())
    }

    fn write_encoded_arrays(&mut self) -> Result<(), DexError> {
        let collection = self.collection;
        let pools = &collection.pools;
        self.offsets.encoded_arrays = write_items(
            self.bytes,
            &mut self.sections,
            TYPE_ENCODED_ARRAY_ITEM,
            1,
            collection.items.encoded_arrays.iter(),
            |bytes, values| write_encoded_array(values, bytes, pools).map(|_| ()),
        )?;
        Ok(())
    }

    fn write_annotations(&mut self) -> Result<(), DexError> {
        let collection = self.collection;
        let pools = &collection.pools;
        let items = &collection.items;

        let annotations = write_items(
            self.bytes,
            &mut self.sections,
            TYPE_ANNOTATION_ITEM,
            1,
            items.annotations.iter(),
            |bytes, annotation| annotation.write(bytes, pools).map(|_| ()),
        )?;

        let sets = write_items(
            self.bytes,
            &mut self.sections,
            TYPE_ANNOTATION_SET_ITEM,
            DEFAULT_ALIGNMENT,
            items.annotation_sets.iter(),
            |bytes, set| {
                let entries = set
                    .iter()
                    .map(|a| item_offset(&annotations, items.annotations.id(a), "annotation"))
                    .collect::<Result<Vec<_>, _>>()?;
                AnnotationSetItem { entries }.write(bytes);
                Ok(())
            },
        )?;
        let set_offset = |set: &Vec<Annotation>| -> Result<u32, DexError> {
            if set.is_empty() {
                Ok(NO_OFFSET)
            } else {
                item_offset(&sets, items.annotation_sets.id(set), "annotation set")
            }
        };

        let set_lists = write_items(
            self.bytes,
            &mut self.sections,
            TYPE_ANNOTATION_SET_REF_LIST,
            DEFAULT_ALIGNMENT,
            items.annotation_set_lists.iter(),
            |bytes, lists| {
                let list = lists.iter().map(set_offset).collect::<Result<Vec<_>, _>>()?;
                AnnotationSetRefList { list }.write(bytes);
                Ok(())
            },
        )?;

        let directories = write_items(
            self.bytes,
            &mut self.sections,
            TYPE_ANNOTATIONS_DIRECTORY_ITEM,
            DEFAULT_ALIGNMENT,
            items.annotation_directories.iter(),
            |bytes, directory| {
                let mut field_annotations = Vec::with_capacity(directory.fields.len());
                for (field, set) in &directory.fields {
                    field_annotations.push(MemberAnnotations {
                        member_idx: pools.field_index(field)?,
                        annotations_off: set_offset(set)?,
                    });
                }
                let mut method_annotations = Vec::with_capacity(directory.methods.len());
                for (method, set) in &directory.methods {
                    method_annotations.push(MemberAnnotations {
                        member_idx: pools.method_index(method)?,
                        annotations_off: set_offset(set)?,
                    });
                }
                let mut parameter_annotations = Vec::with_capacity(directory.parameters.len());
                for (method, lists) in &directory.parameters {
                    parameter_annotations.push(MemberAnnotations {
                        member_idx: pools.method_index(method)?,
                        annotations_off: item_offset(
                            &set_lists,
                            items.annotation_set_lists.id(lists),
                            "annotation set ref list",
                        )?,
                    });
                }
                field_annotations.sort_by_key(|m| m.member_idx);
                method_annotations.sort_by_key(|m| m.member_idx);
                parameter_annotations.sort_by_key(|m| m.member_idx);
                AnnotationsDirectoryItem {
                    class_annotations_off: set_offset(&directory.class_annotations)?,
                    field_annotations,
                    method_annotations,
                    parameter_annotations,
                }
                .write(bytes);
                Ok(())
            },
        )?;

        self.offsets.annotations = annotations;
        self.offsets.annotation_sets = sets;
        self.offsets.annotation_set_lists = set_lists;
        self.offsets.annotation_directories = directories;
        Ok(())
    }

    fn write_type_lists(&mut self) -> Result<(), DexError> {
        let collection = self.collection;
        let pools = &collection.pools;
        self.offsets.type_lists = write_items(
            self.bytes,
            &mut self.sections,
            TYPE_TYPE_LIST,
            DEFAULT_ALIGNMENT,
            collection.items.type_lists.iter(),
            |bytes, types| {
                write_u4(bytes, types.len() as u32);
                for t in types {
                    write_u2(bytes, pools.type_index(t)? as u16);
                }
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Access flags as stored in class data; API 28 folds the hidden API
    /// flags into them.
    fn stored_access_flags(&self, access_flags: u32, hidden_api_flags: u32) -> Result<u32, DexError> {
        if self.legacy_hidden_api {
            encode_legacy(access_flags, hidden_api_flags)
        } else {
            Ok(access_flags)
        }
    }

    fn write_class_data_item(&mut self, class: &ClassPlan) -> Result<(), DexError> {
        let pools = &self.collection.pools;
        let mut out = Vec::new();
        write_uleb128(&mut out, class.static_fields.len() as u32);
        write_uleb128(&mut out, class.instance_fields.len() as u32);
        write_uleb128(&mut out, class.direct_methods.len() as u32);
        write_uleb128(&mut out, class.virtual_methods.len() as u32);

        for fields in [&class.static_fields, &class.instance_fields] {
            let mut previous = 0;
            for field in fields.iter() {
                let index = pools.field_index(&field.id)?;
                write_uleb128(&mut out, index - previous);
                previous = index;
                let access_flags = self
                    .stored_access_flags(field.def.access_flags, field.def.hidden_api_flags)
                    .context(|| format!("field {}", field.id))?;
                write_uleb128(&mut out, access_flags);
            }
        }
        for methods in [&class.direct_methods, &class.virtual_methods] {
            let mut previous = 0;
            for method in methods.iter() {
                let index = pools.method_index(&method.id)?;
                write_uleb128(&mut out, index - previous);
                previous = index;
                let access_flags = self
                    .stored_access_flags(method.def.access_flags, method.def.hidden_api_flags)
                    .context(|| format!("method {}", method.id))?;
                write_uleb128(&mut out, access_flags);
                write_uleb128(&mut out, optional_offset(&self.offsets.code_items, method.code, "code item")?);
            }
        }
        self.bytes.extend_from_slice(&out);
        Ok(())
    }

    fn write_class_data(&mut self) -> Result<(), DexError> {
        let collection = self.collection;
        let mut offsets = Vec::with_capacity(collection.classes.len());
        let mut written = 0;
        let mut first = None;
        for class in &collection.classes {
            if !class.has_class_data() {
                offsets.push(NO_OFFSET);
                continue;
            }
            let start = self.bytes.len() as u32;
            self.write_class_data_item(class).context(|| class.def.to_string())?;
            offsets.push(start);
            written += 1;
            first.get_or_insert(start);
        }
        if let Some(first) = first {
            debug!("class data: {} at {:#x}", written, first);
            self.sections.push(MapItem::new(TYPE_CLASS_DATA_ITEM, written, first));
        }
        self.offsets.class_data = offsets;
        Ok(())
    }

    fn write_string_data(&mut self) -> Result<(), DexError> {
        let collection = self.collection;
        self.offsets.strings = write_items(
            self.bytes,
            &mut self.sections,
            TYPE_STRING_DATA_ITEM,
            1,
            collection.pools.strings.iter(),
            |bytes, value| {
                write_string_data(bytes, value);
                Ok(())
            },
        )?;
        Ok(())
    }

    /// Writes the hidden API section when any member carries flags.
    fn write_hidden_api(&mut self) -> Result<(), DexError> {
        if !self.options.dex.hidden_api_flags || self.legacy_hidden_api {
            return Ok(());
        }
        let collection = self.collection;
        let flags_of = |class: &ClassPlan| -> Vec<u32> {
            let fields = class.fields().map(|f| f.def.hidden_api_flags);
            fields.chain(class.methods().map(|m| m.def.hidden_api_flags)).collect()
        };
        let classes: Vec<Option<Vec<u32>>> = collection
            .classes
            .iter()
            .map(|class| Some(flags_of(class)).filter(|flags| flags.iter().any(|&f| f != 0)))
            .collect();
        if classes.iter().all(|c| c.is_none()) {
            return Ok(());
        }
        let api = self.options.dex.target_api;
        if api < LEGACY_HIDDENAPI_API {
            fail!(UnsupportedTarget, "Hidden api flags need api {} or later, target is {}", LEGACY_HIDDENAPI_API, api);
        }
        let start = write_section(self.bytes, &classes);
        self.sections.push(MapItem::new(TYPE_HIDDENAPI_CLASS_DATA_ITEM, 1, start as u32));
        Ok(())
    }

    /// Serializes the id sections, which start at `layout.string_ids`.
    fn write_ids(&self, layout: &IdLayout) -> Result<Vec<u8>, DexError> {
        let collection = self.collection;
        let pools = &collection.pools;
        let items = &collection.items;
        let mut out = Vec::with_capacity(layout.end - layout.string_ids);

        for offset in &self.offsets.strings {
            write_u4(&mut out, *offset);
        }
        for t in &pools.types {
            write_u4(&mut out, pools.string_index(&t.descriptor)?);
        }
        for proto in &pools.protos {
            write_u4(&mut out, pools.string_index(&proto.shorty())?);
            write_u4(&mut out, pools.type_index(&proto.return_type)?);
            let parameters_off = if proto.parameters.is_empty() {
                NO_OFFSET
            } else {
                item_offset(&self.offsets.type_lists, items.type_lists.id(&proto.parameters), "type list")?
            };
            write_u4(&mut out, parameters_off);
        }
        for field in &pools.fields {
            write_u2(&mut out, pools.type_index(&field.declaring_class)? as u16);
            write_u2(&mut out, pools.type_index(&field.field_type)? as u16);
            write_u4(&mut out, pools.string_index(&field.name)?);
        }
        for method in &pools.methods {
            write_u2(&mut out, pools.type_index(&method.declaring_class)? as u16);
            write_u2(&mut out, pools.proto_index(&method.proto)? as u16);
            write_u4(&mut out, pools.string_index(&method.name)?);
        }
        for (i, class) in collection.classes.iter().enumerate() {
            self.write_class_def(&mut out, class, i).context(|| class.def.to_string())?;
        }
        for site in &pools.call_sites {
            let array = items.encoded_arrays.id(&site.to_encoded_array());
            write_u4(&mut out, item_offset(&self.offsets.encoded_arrays, array, "call site")?);
        }
        for handle in &pools.method_handles {
            let member = match &handle.member {
                MethodHandleMember::Field(field) => pools.field_index(field)?,
                MethodHandleMember::Method(method) => pools.method_index(method)?,
            };
            write_u2(&mut out, handle.kind.value());
            write_u2(&mut out, 0);
            write_u2(&mut out, member as u16);
            write_u2(&mut out, 0);
        }
        Ok(out)
    }

    fn write_class_def(&self, out: &mut Vec<u8>, class: &ClassPlan, index: usize) -> Result<(), DexError> {
        let pools = &self.collection.pools;
        let def = class.def;
        write_u4(out, pools.type_index(&def.class_type)?);
        write_u4(out, def.access_flags);
        write_u4(out, def.superclass.as_ref().map(|s| pools.type_index(s)).transpose()?.unwrap_or(NO_INDEX));
        write_u4(out, optional_offset(&self.offsets.type_lists, class.interfaces, "interfaces")?);
        write_u4(out, def.source_file.as_deref().map(|s| pools.string_index(s)).transpose()?.unwrap_or(NO_INDEX));
        write_u4(out, optional_offset(&self.offsets.annotation_directories, class.annotations, "annotations directory")?);
        write_u4(out, self.offsets.class_data.get(index).copied().unwrap_or(NO_OFFSET));
        write_u4(out, optional_offset(&self.offsets.encoded_arrays, class.static_values, "static values")?);
        Ok(())
    }

    /// Appends the map list, which lists itself, and returns its offset.
    fn write_map(&mut self, mut entries: Vec<MapItem>) -> u32 {
        fill_to_alignment(self.bytes, DEFAULT_ALIGNMENT);
        let map_off = self.bytes.len() as u32;
        entries.extend(self.sections.iter().copied());
        entries.push(MapItem::new(TYPE_MAP_LIST, 1, map_off));
        entries.sort_by_key(|item| item.offset);
        write_map_list(self.bytes, &entries);
        debug!("map list at {:#x}: {} entries", map_off, entries.len());
        map_off
    }

    /// Appends the compact per-method debug info offsets table. Returns its
    /// position and the base the deltas start from.
    fn write_compact_debug_table(&mut self) -> Result<(u32, u32), DexError> {
        let collection = self.collection;
        let pools = &collection.pools;
        let mut per_method = vec![NO_OFFSET; pools.methods.len()];
        for class in &collection.classes {
            for method in class.methods() {
                if method.debug.is_some() {
                    let index = pools.method_index(&method.id)? as usize;
                    per_method[index] = item_offset(&self.offsets.debug_infos, method.debug, "debug info")?;
                }
            }
        }

        fill_to_alignment(self.bytes, DEFAULT_ALIGNMENT);
        let start = self.bytes.len();
        let base = per_method.iter().copied().filter(|&o| o != NO_OFFSET).min().unwrap_or(0);
        let blocks: Vec<&[u32]> = per_method.chunks(COMPACT_DEBUG_ELEMENTS_PER_INDEX).collect();
        self.bytes.resize(start + blocks.len() * 4, 0);
        for (i, block) in blocks.iter().enumerate() {
            let position = self.bytes.len();
            overwrite_u4(self.bytes, start + i * 4, (position - start) as u32);
            let mut mask = 0u16;
            for (bit, &offset) in block.iter().enumerate() {
                if offset != NO_OFFSET {
                    mask |= 1 << bit;
                }
            }
            self.bytes.extend_from_slice(&mask.to_be_bytes());
            let mut previous = base;
            for &offset in block.iter().filter(|&&o| o != NO_OFFSET) {
                write_uleb128(self.bytes, offset.wrapping_sub(previous));
                previous = offset;
            }
        }
        debug!("compact debug table at {:#x}: {} blocks, base {:#x}", start, blocks.len(), base);
        Ok((start as u32, base))
    }
}

fn check_file_size(size: usize) -> Result<(), DexError> {
    if size > u32::MAX as usize {
        fail!(StructuralViolation, "Dex file of {} bytes exceeds the 32-bit offset range", size);
    }
    Ok(())
}

/// Writes one file at the end of `out` and returns its span. The signature
/// and checksum are left for [`finalize`].
fn write_file(out: &mut Vec<u8>, dex: &Dex, options: &WriteOptions) -> Result<FileSpan, DexError> {
    options.validate()?;
    let version = options.version;
    let compact = version.is_compact();
    if compact && !out.is_empty() {
        fail!(UnsupportedTarget, "A compact dex file cannot share a buffer with other files");
    }
    let header_off = out.len();
    let header_size = header_size(version);
    let api = options.dex.target_api;

    let collection = collect(dex, options)?;
    let table = OpcodeTable::get(version, api, options.dex.target_art, options.dex.allow_odex_instructions);
    let layout = IdLayout::new(header_off + header_size, &collection);

    let mut data = if compact { vec![0; COMPACT_DATA_RESERVED] } else { std::mem::take(out) };
    if !compact {
        data.resize(layout.end, 0);
        fill_to_alignment(&mut data, DEFAULT_ALIGNMENT);
    }
    let data_start = data.len();

    let mut writer = DataWriter {
        bytes: &mut data,
        collection: &collection,
        options,
        table,
        compact,
        legacy_hidden_api: options.dex.hidden_api_flags && api == LEGACY_HIDDENAPI_API,
        sections: Vec::new(),
        offsets: Offsets::default(),
    };
    writer.write_data()?;
    let ids = writer.write_ids(&layout)?;
    let mut entries = vec![MapItem::new(TYPE_HEADER_ITEM, 1, header_off as u32)];
    entries.extend(layout.map_items(&collection));
    let map_off = writer.write_map(entries);
    let compact_debug = if compact { Some(writer.write_compact_debug_table()?) } else { None };
    fill_to_alignment(writer.bytes, DATA_SECTION_ALIGNMENT);

    let pools = &collection.pools;
    let (string_ids_size, string_ids_off) = section_pair(pools.strings.len(), layout.string_ids);
    let (type_ids_size, type_ids_off) = section_pair(pools.types.len(), layout.type_ids);
    let (proto_ids_size, proto_ids_off) = section_pair(pools.protos.len(), layout.proto_ids);
    let (field_ids_size, field_ids_off) = section_pair(pools.fields.len(), layout.field_ids);
    let (method_ids_size, method_ids_off) = section_pair(pools.methods.len(), layout.method_ids);
    let (class_defs_size, class_defs_off) = section_pair(collection.classes.len(), layout.class_defs);
    let mut header = Header {
        magic: version.magic(),
        checksum: 0,
        signature: [0; SIGNATURE_SIZE],
        file_size: 0,
        header_size: header_size as u32,
        endian_tag: ENDIAN_CONSTANT,
        link_size: 0,
        link_off: NO_OFFSET,
        map_off,
        string_ids_size,
        string_ids_off,
        type_ids_size,
        type_ids_off,
        proto_ids_size,
        proto_ids_off,
        field_ids_size,
        field_ids_off,
        method_ids_size,
        method_ids_off,
        class_defs_size,
        class_defs_off,
        data_size: 0,
        data_off: 0,
        compact: None,
        container: None,
    };

    let span = if let Some((debug_info_offsets_pos, debug_info_base)) = compact_debug {
        let data_off = align_to(layout.end, DATA_SECTION_ALIGNMENT);
        check_file_size(data_off + data.len())?;
        header.file_size = data_off as u32;
        header.data_off = data_off as u32;
        header.data_size = data.len() as u32;
        header.compact = Some(CompactHeader {
            feature_flags: COMPACT_FEATURE_DEFAULT_METHODS,
            debug_info_offsets_pos,
            debug_info_offsets_table_offset: 0,
            debug_info_base,
            owned_data_begin: 0,
            owned_data_end: data.len() as u32,
        });
        header.write(out);
        out.extend_from_slice(&ids);
        out.resize(data_off, 0);
        out.extend_from_slice(&data);
        FileSpan { header_off, end: out.len() }
    } else {
        let end = data.len();
        check_file_size(end)?;
        header.file_size = (end - header_off) as u32;
        header.data_off = data_start as u32;
        header.data_size = (end - data_start) as u32;
        if version.is_container() {
            header.container = Some(ContainerHeader { container_size: 0, header_off: header_off as u32 });
        }
        let mut header_bytes = Vec::with_capacity(header_size);
        header.write(&mut header_bytes);
        data[header_off..header_off + header_size].copy_from_slice(&header_bytes);
        data[layout.string_ids..layout.end].copy_from_slice(&ids);
        *out = data;
        FileSpan { header_off, end }
    };
    info!(
        "wrote {} at {:#x}: {} classes, {} bytes",
        version,
        header_off,
        collection.classes.len(),
        span.end - span.header_off
    );
    Ok(span)
}

/// Stores the SHA-1 signature and the Adler-32 checksum of a written file.
fn finalize(bytes: &mut [u8], span: FileSpan) {
    let mut hasher = Sha1::new();
    hasher.update(&bytes[span.header_off + SIGNATURE_DATA_START_OFFSET..span.end]);
    let signature = hasher.finalize();
    let at = span.header_off + SIGNATURE_OFFSET;
    bytes[at..at + SIGNATURE_SIZE].copy_from_slice(signature.as_slice());
    let checksum = adler::adler32_slice(&bytes[span.header_off + CHECKSUM_DATA_START_OFFSET..span.end]);
    overwrite_u4(bytes, span.header_off + CHECKSUM_OFFSET, checksum);
}

/// Encodes `dex` as a single file of `options.version`.
pub fn write(dex: &Dex, options: &WriteOptions) -> Result<Vec<u8>, DexError> {
    if options.version.is_container() {
        return write_container(std::slice::from_ref(dex), options);
    }
    let mut out = Vec::new();
    let span = write_file(&mut out, dex, options)?;
    finalize(&mut out, span);
    Ok(out)
}

/// Encodes several files into one container buffer. Every header records
/// its own offset and the size of the whole container.
pub fn write_container(dexes: &[Dex], options: &WriteOptions) -> Result<Vec<u8>, DexError> {
    if !options.version.is_container() {
        fail!(UnsupportedTarget, "{} files cannot share a container", options.version);
    }
    if dexes.is_empty() {
        fail!(StructuralViolation, "A container needs at least one dex file");
    }
    let mut out = Vec::new();
    let mut spans = Vec::with_capacity(dexes.len());
    for (i, dex) in dexes.iter().enumerate() {
        spans.push(write_file(&mut out, dex, options).context(|| format!("dex file {} of the container", i))?);
    }
    let container_size = out.len() as u32;
    for span in spans {
        overwrite_u4(&mut out, span.header_off + CONTAINER_SIZE_OFFSET, container_size);
        finalize(&mut out, span);
    }
    debug!("container of {} files: {} bytes", dexes.len(), container_size);
    Ok(out)
}
