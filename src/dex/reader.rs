//! Decoding of standard, compact and container dex files into the model.
//!
//! Id sections are decoded lazily and memoized by index; type lists and
//! annotation sets are memoized by offset since many owners share them.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use log::{debug, info, trace, warn};
use once_cell::unsync::OnceCell;

use crate::dex::annotations::{Annotation, AnnotationSetItem, AnnotationSetRefList, AnnotationsDirectoryItem};
use crate::dex::code_item::CodeItem;
use crate::dex::debug_info::DebugInfo;
use crate::dex::dex_file::*;
use crate::dex::encoded_values::{read_encoded_array, EncodedValue};
use crate::dex::error::{DexError, ResultExt};
use crate::dex::hidden_api::{decode_legacy, ClassFlags, LEGACY_HIDDENAPI_API};
use crate::dex::ids::{call_site_name, CallSiteId, FieldId, MethodHandleId, MethodHandleKind, MethodHandleMember, MethodId, ProtoId, TypeId};
use crate::dex::model::{optional_index, ClassDef, Dex, FieldDef, MethodDef, Parameter};
use crate::dex::mutf8::read_string_data;
use crate::dex::opcodes::OpcodeTable;
use crate::dex::options::ReadOptions;
use crate::dex::pools::{check_index, ReferenceSource};
use crate::dex::version::DexVersion;
use crate::dex::{read_u1, read_u2, read_u4, read_uleb128};

/// A fixed-size id section inside the file.
#[derive(Debug, Clone, Copy)]
struct Section {
    name: &'static str,
    offset: usize,
    size: usize,
    item_size: usize,
}

impl Section {
    fn new(name: &'static str, size: u32, offset: u32, item_size: usize, file_len: usize) -> Result<Section, DexError> {
        let end = offset as u64 + size as u64 * item_size as u64;
        if size != 0 && end > file_len as u64 {
            fail!(InvalidFormat, "{} ids at {:#x} run past the end of the file", name, offset);
        }
        Ok(Section { name, offset: offset as usize, size: size as usize, item_size })
    }

    fn empty(name: &'static str) -> Section {
        Section { name, offset: 0, size: 0, item_size: 0 }
    }

    fn position(&self, index: u32) -> Result<usize, DexError> {
        let index = check_index(self.name, index, self.size)?;
        Ok(self.offset + index * self.item_size)
    }
}

fn cells<T>(section: &Section) -> Vec<OnceCell<T>> {
    (0..section.size).map(|_| OnceCell::new()).collect()
}

fn cached<T: Clone>(cell: &OnceCell<T>, init: impl FnOnce() -> Result<T, DexError>) -> Result<T, DexError> {
    cell.get_or_try_init(init).cloned()
}

/// Member annotations of one class keyed by member index.
#[derive(Debug, Default)]
struct Directory {
    class_annotations: Vec<Annotation>,
    fields: HashMap<u32, Vec<Annotation>>,
    methods: HashMap<u32, Vec<Annotation>>,
    parameters: HashMap<u32, Vec<Vec<Annotation>>>,
}

/// Reader over one dex file, possibly inside a larger container buffer.
pub struct DexReader<'b> {
    bytes: &'b [u8],
    /// Where data offsets point into: the whole buffer for standard files,
    /// the data section for compact ones.
    data: &'b [u8],
    header_off: usize,
    version: DexVersion,
    header: Header,
    options: ReadOptions,
    api: i32,
    table: Arc<OpcodeTable>,
    map: Vec<MapItem>,
    hidden_api_off: Option<usize>,

    string_ids: Section,
    type_ids: Section,
    proto_ids: Section,
    field_ids: Section,
    method_ids: Section,
    class_defs: Section,
    call_site_ids: Section,
    method_handles: Section,

    strings: Vec<OnceCell<String>>,
    types: Vec<OnceCell<TypeId>>,
    protos: Vec<OnceCell<ProtoId>>,
    fields: Vec<OnceCell<FieldId>>,
    methods: Vec<OnceCell<MethodId>>,
    call_sites: Vec<OnceCell<CallSiteId>>,
    handles: Vec<OnceCell<MethodHandleId>>,
    type_lists: RefCell<HashMap<u32, Vec<TypeId>>>,
    annotation_sets: RefCell<HashMap<u32, Vec<Annotation>>>,
}

impl<'b> DexReader<'b> {
    /// Opens the file whose header starts at `header_off`.
    pub fn new(bytes: &'b [u8], header_off: usize, options: &ReadOptions) -> Result<DexReader<'b>, DexError> {
        options.dex.validate()?;
        if bytes.len() < header_off.saturating_add(BASE_HEADER_SIZE) {
            fail!(NotADex, "File is too short: {} bytes, header at {:#x}", bytes.len(), header_off);
        }
        let version = DexVersion::for_magic(&bytes[header_off..header_off + 8])?;
        let expected_header_size = header_size(version);
        if bytes.len() < header_off + expected_header_size {
            fail!(NotADex, "File is too short for a {} header", version);
        }
        let mut ix = header_off;
        let header = Header::read(bytes, &mut ix, version)?;

        if header.endian_tag == REVERSE_ENDIAN_CONSTANT {
            fail!(InvalidFormat, "Big endian dex files are not supported");
        }
        if header.endian_tag != ENDIAN_CONSTANT {
            fail!(InvalidFormat, "Invalid endian tag: {:#x}", header.endian_tag);
        }
        if header.header_size as usize != expected_header_size {
            fail!(InvalidFormat, "Invalid header size {} for {}, expected {}", header.header_size, version, expected_header_size);
        }
        if (header.file_size as usize) < expected_header_size {
            fail!(InvalidFormat, "File size {} is smaller than the header", header.file_size);
        }
        if header_off as u64 + header.file_size as u64 > bytes.len() as u64 {
            fail!(InvalidFormat, "Truncated dex file: {} bytes declared, {} available", header.file_size, bytes.len() - header_off);
        }
        if let Some(container) = &header.container {
            if container.header_off as usize != header_off {
                fail!(InvalidFormat, "Unexpected header offset {:#x}, expected {:#x}", container.header_off, header_off);
            }
            if container.container_size as usize > bytes.len() {
                fail!(InvalidFormat, "Truncated dex container: {} bytes declared, {} available", container.container_size, bytes.len());
            }
        }

        let data = if version.is_compact() {
            let end = header.data_off as u64 + header.data_size as u64;
            if end > bytes.len() as u64 {
                fail!(InvalidFormat, "Truncated dex file: data section ends at {:#x}", end);
            }
            &bytes[header.data_off as usize..]
        } else {
            bytes
        };

        let api = options.dex.target_api.max(version.min_api());
        let table = OpcodeTable::get(version, api, options.dex.target_art, options.dex.allow_odex_instructions);

        let map = if header.map_off == NO_OFFSET {
            vec![]
        } else {
            let mut ix = header.map_off as usize;
            read_map_list(data, &mut ix).context(|| format!("map list at {:#x}", header.map_off))?
        };
        check_map(&header, header_off, &map)?;

        let len = bytes.len();
        let string_ids = Section::new("string", header.string_ids_size, header.string_ids_off, STRING_ID_SIZE, len)?;
        let type_ids = Section::new("type", header.type_ids_size, header.type_ids_off, TYPE_ID_SIZE, len)?;
        let proto_ids = Section::new("proto", header.proto_ids_size, header.proto_ids_off, PROTO_ID_SIZE, len)?;
        let field_ids = Section::new("field", header.field_ids_size, header.field_ids_off, FIELD_ID_SIZE, len)?;
        let method_ids = Section::new("method", header.method_ids_size, header.method_ids_off, METHOD_ID_SIZE, len)?;
        let class_defs = Section::new("class def", header.class_defs_size, header.class_defs_off, CLASS_DEF_SIZE, len)?;
        let find = |type_code: u16| map.iter().find(|item| item.type_code == type_code).copied();
        let call_site_ids = match find(TYPE_CALL_SITE_ID_ITEM) {
            Some(item) => Section::new("call site", item.size, item.offset, CALL_SITE_ID_SIZE, len)?,
            None => Section::empty("call site"),
        };
        let method_handles = match find(TYPE_METHOD_HANDLE_ITEM) {
            Some(item) => Section::new("method handle", item.size, item.offset, METHOD_HANDLE_ID_SIZE, len)?,
            None => Section::empty("method handle"),
        };
        let hidden_api_off = find(TYPE_HIDDENAPI_CLASS_DATA_ITEM).map(|item| item.offset as usize);
        debug!(
            "{} at {:#x}: {} strings, {} types, {} protos, {} fields, {} methods, {} classes, {} map entries",
            version,
            header_off,
            string_ids.size,
            type_ids.size,
            proto_ids.size,
            field_ids.size,
            method_ids.size,
            class_defs.size,
            map.len()
        );

        let reader = DexReader {
            bytes,
            data,
            header_off,
            version,
            header,
            options: *options,
            api,
            table,
            map,
            hidden_api_off,
            strings: cells(&string_ids),
            types: cells(&type_ids),
            protos: cells(&proto_ids),
            fields: cells(&field_ids),
            methods: cells(&method_ids),
            call_sites: cells(&call_site_ids),
            handles: cells(&method_handles),
            string_ids,
            type_ids,
            proto_ids,
            field_ids,
            method_ids,
            class_defs,
            call_site_ids,
            method_handles,
            type_lists: RefCell::new(HashMap::new()),
            annotation_sets: RefCell::new(HashMap::new()),
        };
        reader.verify_checksum();
        Ok(reader)
    }

    pub fn version(&self) -> DexVersion {
        self.version
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn map(&self) -> &[MapItem] {
        &self.map
    }

    pub fn class_count(&self) -> usize {
        self.class_defs.size
    }

    /// Length of this file inside its buffer.
    pub fn file_size(&self) -> usize {
        self.header.file_size as usize
    }

    /// End of the bytes covered by the checksum. A compact file's data
    /// section lies past its `file_size`.
    fn checksum_end(&self) -> usize {
        if self.version.is_compact() {
            self.header.data_off as usize + self.header.data_size as usize
        } else {
            self.header_off + self.file_size()
        }
    }

    /// A wrong checksum does not stop decoding.
    fn verify_checksum(&self) {
        let start = self.header_off + CHECKSUM_DATA_START_OFFSET;
        let Some(covered) = self.bytes.get(start..self.checksum_end()) else {
            return;
        };
        let actual = adler::adler32_slice(covered);
        if actual != self.header.checksum {
            warn!(
                "{} at {:#x} has checksum {:#010x}, contents give {:#010x}",
                self.version, self.header_off, self.header.checksum, actual
            );
        }
    }

    /// Decodes every class in `class_defs` order.
    pub fn read_dex(&self) -> Result<Dex, DexError> {
        let mut classes = Vec::with_capacity(self.class_defs.size);
        for index in 0..self.class_defs.size {
            classes.push(self.read_class(index)?);
        }
        info!("read {} at {:#x}: {} classes, {} bytes", self.version, self.header_off, classes.len(), self.file_size());
        Ok(Dex::new(classes))
    }

    pub fn read_class(&self, index: usize) -> Result<ClassDef, DexError> {
        let position = self.class_defs.position(index as u32)?;
        self.read_class_def(index, position).context(|| format!("class def {}", index))
    }

    fn read_class_def(&self, index: usize, position: usize) -> Result<ClassDef, DexError> {
        let mut ix = position;
        let class_idx = read_u4(self.bytes, &mut ix)?;
        let access_flags = read_u4(self.bytes, &mut ix)?;
        let superclass_idx = read_u4(self.bytes, &mut ix)?;
        let interfaces_off = read_u4(self.bytes, &mut ix)?;
        let source_file_idx = read_u4(self.bytes, &mut ix)?;
        let annotations_off = read_u4(self.bytes, &mut ix)?;
        let class_data_off = read_u4(self.bytes, &mut ix)?;
        let static_values_off = read_u4(self.bytes, &mut ix)?;

        let class_type = self.type_id(class_idx)?;
        trace!("class def {}: {}", index, class_type);
        let superclass = optional_index(superclass_idx).map(|i| self.type_id(i)).transpose()?;
        let mut class = ClassDef::new(class_type, access_flags, superclass);
        if interfaces_off != NO_OFFSET {
            class.interfaces = self.type_list(interfaces_off)?;
        }
        class.source_file = optional_index(source_file_idx).map(|i| self.string(i)).transpose()?;

        let directory = if annotations_off == NO_OFFSET {
            Directory::default()
        } else {
            self.annotation_directory(annotations_off)
                .context(|| format!("annotations directory at {:#x}", annotations_off))?
        };
        let static_values = if static_values_off == NO_OFFSET {
            vec![]
        } else {
            let mut at = static_values_off as usize;
            read_encoded_array(self.data, &mut at, self).context(|| format!("static values at {:#x}", static_values_off))?
        };

        if class_data_off != NO_OFFSET {
            self.read_class_data(&mut class, index, class_data_off, &static_values, &directory)
                .context(|| format!("class data at {:#x}", class_data_off))
                .context(|| class.to_string())?;
        }
        class.annotations = directory.class_annotations;
        Ok(class)
    }

    fn read_class_data(
        &self,
        class: &mut ClassDef,
        class_index: usize,
        offset: u32,
        static_values: &[EncodedValue],
        directory: &Directory,
    ) -> Result<(), DexError> {
        let mut ix = offset as usize;
        let static_fields_size = read_uleb128(self.data, &mut ix)? as usize;
        let instance_fields_size = read_uleb128(self.data, &mut ix)? as usize;
        let direct_methods_size = read_uleb128(self.data, &mut ix)? as usize;
        let virtual_methods_size = read_uleb128(self.data, &mut ix)? as usize;
        // every member takes at least two bytes
        let members = static_fields_size + instance_fields_size + direct_methods_size + virtual_methods_size;
        if members > self.data.len().saturating_sub(ix) / 2 {
            fail!(InvalidFormat, "Class data declares {} members", members);
        }

        let mut hidden = self.hidden_flags(class_index)?;
        class.static_fields = self.read_fields(&mut ix, static_fields_size, &mut hidden, directory, Some(static_values))?;
        class.instance_fields = self.read_fields(&mut ix, instance_fields_size, &mut hidden, directory, None)?;
        class.direct_methods = self.read_methods(&mut ix, direct_methods_size, &mut hidden, directory)?;
        class.virtual_methods = self.read_methods(&mut ix, virtual_methods_size, &mut hidden, directory)?;
        Ok(())
    }

    fn hidden_flags(&self, class_index: usize) -> Result<ClassFlags<'b>, DexError> {
        match self.hidden_api_off {
            Some(offset) if self.options.dex.hidden_api_flags => {
                ClassFlags::locate(self.data, offset, class_index).context(|| format!("hidden api section at {:#x}", offset))
            }
            _ => Ok(ClassFlags::none()),
        }
    }

    /// Splits stored access flags into the access flags and hidden API flags
    /// of the member.
    fn member_flags(&self, stored: u32, hidden: &mut ClassFlags) -> Result<(u32, u32), DexError> {
        if !self.options.dex.hidden_api_flags {
            return Ok((stored, 0));
        }
        if self.hidden_api_off.is_none() && self.api == LEGACY_HIDDENAPI_API {
            return Ok(decode_legacy(stored));
        }
        Ok((stored, hidden.next_flags()?))
    }

    fn next_member_index(&self, ix: &mut usize, index: &mut Option<u32>) -> Result<u32, DexError> {
        let diff = read_uleb128(self.data, ix)?;
        let next = match *index {
            None => diff,
            Some(previous) => match previous.checked_add(diff) {
                Some(next) if diff != 0 => next,
                _ => fail!(InvalidFormat, "Member index delta {} after {} is out of order", diff, previous),
            },
        };
        *index = Some(next);
        Ok(next)
    }

    fn read_fields(
        &self,
        ix: &mut usize,
        count: usize,
        hidden: &mut ClassFlags,
        directory: &Directory,
        static_values: Option<&[EncodedValue]>,
    ) -> Result<Vec<FieldDef>, DexError> {
        let mut out = Vec::with_capacity(count);
        let mut index = None;
        for i in 0..count {
            let field_idx = self.next_member_index(ix, &mut index)?;
            let id = self.field_id(field_idx)?;
            let (access_flags, hidden_api_flags) = self.member_flags(read_uleb128(self.data, ix)?, hidden)?;
            let initial_value = match static_values {
                Some(values) => match values.get(i) {
                    Some(value) => Some(value.clone()),
                    None => Some(EncodedValue::default_for(&id.field_type).context(|| format!("field {}", id))?),
                },
                None => None,
            };
            out.push(FieldDef {
                name: id.name,
                field_type: id.field_type,
                access_flags,
                hidden_api_flags,
                initial_value,
                annotations: directory.fields.get(&field_idx).cloned().unwrap_or_default(),
            });
        }
        Ok(out)
    }

    fn read_methods(
        &self,
        ix: &mut usize,
        count: usize,
        hidden: &mut ClassFlags,
        directory: &Directory,
    ) -> Result<Vec<MethodDef>, DexError> {
        let mut out = Vec::with_capacity(count);
        let mut index = None;
        for _ in 0..count {
            let method_idx = self.next_member_index(ix, &mut index)?;
            let id = self.method_id(method_idx)?;
            let (access_flags, hidden_api_flags) = self.member_flags(read_uleb128(self.data, ix)?, hidden)?;
            let code_off = read_uleb128(self.data, ix)?;
            let method = self
                .read_method(method_idx, id.clone(), access_flags, hidden_api_flags, code_off, directory)
                .context(|| format!("method {}", id))?;
            out.push(method);
        }
        Ok(out)
    }

    fn read_method(
        &self,
        method_idx: u32,
        id: MethodId,
        access_flags: u32,
        hidden_api_flags: u32,
        code_off: u32,
        directory: &Directory,
    ) -> Result<MethodDef, DexError> {
        let compact = self.version.is_compact();
        let code = if code_off == NO_OFFSET {
            None
        } else {
            let code = CodeItem::read(self.data, code_off as usize, compact, &self.table, self)
                .context(|| format!("code item at {:#x}", code_off))?;
            Some(code)
        };

        let mut debug_info = None;
        if let Some(code) = &code {
            if self.options.dex.debug_info {
                let debug_info_off = if compact { self.compact_debug_info_offset(method_idx)? } else { code.debug_info_off };
                if debug_info_off != NO_OFFSET {
                    let mut at = debug_info_off as usize;
                    let info = DebugInfo::read(self.data, &mut at, self).context(|| format!("debug info at {:#x}", debug_info_off))?;
                    debug_info = Some(info);
                }
            }
        }

        let names = debug_info.as_ref().map(|info| info.parameter_names.as_slice()).unwrap_or(&[]);
        let annotations = directory.parameters.get(&method_idx);
        let parameters = id
            .proto
            .parameters
            .iter()
            .enumerate()
            .map(|(i, param_type)| Parameter {
                param_type: param_type.clone(),
                name: names.get(i).cloned().flatten(),
                annotations: annotations.and_then(|lists| lists.get(i)).cloned().unwrap_or_default(),
            })
            .collect();

        let implementation = code.map(|code| {
            let mut implementation = code.into_implementation();
            if let Some(info) = debug_info {
                implementation.debug_items = info.items;
            }
            implementation
        });

        Ok(MethodDef {
            name: id.name,
            return_type: id.proto.return_type,
            parameters,
            access_flags,
            hidden_api_flags,
            implementation,
            annotations: directory.methods.get(&method_idx).cloned().unwrap_or_default(),
        })
    }

    /// Looks up the debug info of a method in the compact offsets table.
    fn compact_debug_info_offset(&self, method_idx: u32) -> Result<u32, DexError> {
        let Some(compact) = &self.header.compact else {
            return Ok(NO_OFFSET);
        };
        if compact.debug_info_offsets_pos == NO_OFFSET {
            return Ok(NO_OFFSET);
        }
        let slots = self.method_ids.size.div_ceil(COMPACT_DEBUG_ELEMENTS_PER_INDEX);
        let block = check_index("debug info table", method_idx / COMPACT_DEBUG_ELEMENTS_PER_INDEX as u32, slots)?;
        let bit = method_idx % COMPACT_DEBUG_ELEMENTS_PER_INDEX as u32;

        let table = compact.debug_info_offsets_pos as usize + compact.debug_info_offsets_table_offset as usize;
        let mut ix = table + block * 4;
        let block_offset = read_u4(self.data, &mut ix)?;
        let mut ix = compact.debug_info_offsets_pos as usize + block_offset as usize;
        let mask = ((read_u1(self.data, &mut ix)? as u32) << 8) | read_u1(self.data, &mut ix)? as u32;
        if mask & (1 << bit) == 0 {
            return Ok(NO_OFFSET);
        }
        let preceding = (mask & ((1u32 << bit) - 1)).count_ones();
        let mut offset = compact.debug_info_base;
        for _ in 0..=preceding {
            offset = offset.wrapping_add(read_uleb128(self.data, &mut ix)?);
        }
        Ok(offset)
    }

    fn type_list(&self, offset: u32) -> Result<Vec<TypeId>, DexError> {
        if let Some(list) = self.type_lists.borrow().get(&offset) {
            return Ok(list.clone());
        }
        let mut ix = offset as usize;
        let size = read_u4(self.data, &mut ix)? as usize;
        if size > self.data.len().saturating_sub(ix) / 2 {
            fail!(InvalidFormat, "Type list at {:#x} declares {} entries", offset, size);
        }
        let mut list = Vec::with_capacity(size);
        for _ in 0..size {
            list.push(self.type_id(read_u2(self.data, &mut ix)? as u32)?);
        }
        self.type_lists.borrow_mut().insert(offset, list.clone());
        Ok(list)
    }

    fn annotation_set(&self, offset: u32) -> Result<Vec<Annotation>, DexError> {
        if let Some(set) = self.annotation_sets.borrow().get(&offset) {
            return Ok(set.clone());
        }
        let mut ix = offset as usize;
        let item = AnnotationSetItem::read(self.data, &mut ix)?;
        let mut set = Vec::with_capacity(item.entries.len());
        for entry in item.entries {
            if entry == NO_OFFSET {
                continue;
            }
            let mut at = entry as usize;
            set.push(Annotation::read(self.data, &mut at, self).context(|| format!("annotation at {:#x}", entry))?);
        }
        self.annotation_sets.borrow_mut().insert(offset, set.clone());
        Ok(set)
    }

    fn optional_annotation_set(&self, offset: u32) -> Result<Vec<Annotation>, DexError> {
        if offset == NO_OFFSET {
            Ok(vec![])
        } else {
            self.annotation_set(offset)
        }
    }

    fn annotation_directory(&self, offset: u32) -> Result<Directory, DexError> {
        let mut ix = offset as usize;
        let item = AnnotationsDirectoryItem::read(self.data, &mut ix)?;
        let mut directory = Directory {
            class_annotations: self.optional_annotation_set(item.class_annotations_off)?,
            ..Directory::default()
        };
        for entry in &item.field_annotations {
            directory.fields.insert(entry.member_idx, self.optional_annotation_set(entry.annotations_off)?);
        }
        for entry in &item.method_annotations {
            directory.methods.insert(entry.member_idx, self.optional_annotation_set(entry.annotations_off)?);
        }
        for entry in &item.parameter_annotations {
            let mut at = entry.annotations_off as usize;
            let list = AnnotationSetRefList::read(self.data, &mut at)?;
            let mut sets = Vec::with_capacity(list.list.len());
            for set_off in list.list {
                sets.push(self.optional_annotation_set(set_off)?);
            }
            directory.parameters.insert(entry.member_idx, sets);
        }
        Ok(directory)
    }
}

/// Checks the map against the header and rejects unknown or repeated
/// section types.
fn check_map(header: &Header, header_off: usize, map: &[MapItem]) -> Result<(), DexError> {
    let mut seen = HashSet::new();
    for item in map {
        if !MapItem::is_known_type(item.type_code) {
            fail!(InvalidFormat, "Unknown map item type {:#06x}", item.type_code);
        }
        if !seen.insert(item.type_code) {
            fail!(InvalidFormat, "Duplicate map item type {:#06x}", item.type_code);
        }
        let expected = match item.type_code {
            TYPE_HEADER_ITEM => Some((1, header_off as u32)),
            TYPE_STRING_ID_ITEM => Some((header.string_ids_size, header.string_ids_off)),
            TYPE_TYPE_ID_ITEM => Some((header.type_ids_size, header.type_ids_off)),
            TYPE_PROTO_ID_ITEM => Some((header.proto_ids_size, header.proto_ids_off)),
            TYPE_FIELD_ID_ITEM => Some((header.field_ids_size, header.field_ids_off)),
            TYPE_METHOD_ID_ITEM => Some((header.method_ids_size, header.method_ids_off)),
            TYPE_CLASS_DEF_ITEM => Some((header.class_defs_size, header.class_defs_off)),
            TYPE_MAP_LIST => Some((1, header.map_off)),
            _ => None,
        };
        if let Some((size, offset)) = expected {
            if item.size != size || item.offset != offset {
                fail!(
                    InvalidFormat,
                    "Map item {:#06x} ({} at {:#x}) disagrees with the header ({} at {:#x})",
                    item.type_code,
                    item.size,
                    item.offset,
                    size,
                    offset
                );
            }
        }
    }
    Ok(())
}

impl ReferenceSource for DexReader<'_> {
    fn string(&self, index: u32) -> Result<String, DexError> {
        let position = self.string_ids.position(index)?;
        cached(&self.strings[index as usize], || {
            let mut ix = position;
            let offset = read_u4(self.bytes, &mut ix)?;
            let mut at = offset as usize;
            read_string_data(self.data, &mut at).context(|| format!("string data at {:#x}", offset))
        })
    }

    fn type_id(&self, index: u32) -> Result<TypeId, DexError> {
        let position = self.type_ids.position(index)?;
        cached(&self.types[index as usize], || {
            let mut ix = position;
            let descriptor = self.string(read_u4(self.bytes, &mut ix)?)?;
            Ok(TypeId { descriptor })
        })
    }

    fn proto_id(&self, index: u32) -> Result<ProtoId, DexError> {
        let position = self.proto_ids.position(index)?;
        cached(&self.protos[index as usize], || {
            let mut ix = position;
            let _shorty = read_u4(self.bytes, &mut ix)?;
            let return_type = self.type_id(read_u4(self.bytes, &mut ix)?)?;
            let parameters_off = read_u4(self.bytes, &mut ix)?;
            let parameters = if parameters_off == NO_OFFSET { vec![] } else { self.type_list(parameters_off)? };
            Ok(ProtoId::of(return_type, parameters))
        })
    }

    fn field_id(&self, index: u32) -> Result<FieldId, DexError> {
        let position = self.field_ids.position(index)?;
        cached(&self.fields[index as usize], || {
            let mut ix = position;
            let declaring_class = self.type_id(read_u2(self.bytes, &mut ix)? as u32)?;
            let field_type = self.type_id(read_u2(self.bytes, &mut ix)? as u32)?;
            let name = self.string(read_u4(self.bytes, &mut ix)?)?;
            Ok(FieldId { declaring_class, name, field_type })
        })
    }

    fn method_id(&self, index: u32) -> Result<MethodId, DexError> {
        let position = self.method_ids.position(index)?;
        cached(&self.methods[index as usize], || {
            let mut ix = position;
            let declaring_class = self.type_id(read_u2(self.bytes, &mut ix)? as u32)?;
            let proto = self.proto_id(read_u2(self.bytes, &mut ix)? as u32)?;
            let name = self.string(read_u4(self.bytes, &mut ix)?)?;
            Ok(MethodId { declaring_class, name, proto })
        })
    }

    fn method_handle(&self, index: u32) -> Result<MethodHandleId, DexError> {
        let position = self.method_handles.position(index)?;
        cached(&self.handles[index as usize], || {
            let mut ix = position;
            let kind = MethodHandleKind::of(read_u2(self.bytes, &mut ix)?)?;
            let _unused = read_u2(self.bytes, &mut ix)?;
            let member_idx = read_u2(self.bytes, &mut ix)? as u32;
            let member = if kind.is_method_access() {
                MethodHandleMember::Method(self.method_id(member_idx)?)
            } else {
                MethodHandleMember::Field(self.field_id(member_idx)?)
            };
            MethodHandleId::new(kind, member).map_err(|e| err!(InvalidFormat, "{}", e.message()))
        })
    }

    fn call_site(&self, index: u32) -> Result<CallSiteId, DexError> {
        let position = self.call_site_ids.position(index)?;
        cached(&self.call_sites[index as usize], || {
            let mut ix = position;
            let offset = read_u4(self.bytes, &mut ix)?;
            let mut at = offset as usize;
            let values = read_encoded_array(self.data, &mut at, self).context(|| format!("call site item at {:#x}", offset))?;
            CallSiteId::from_encoded_array(call_site_name(index as usize), values)
        })
    }
}

/// Reads every file of a buffer. Container files are walked by their
/// `file_size` until the buffer is consumed; other files stand alone.
pub fn read_container(bytes: &[u8], options: &ReadOptions) -> Result<Vec<Dex>, DexError> {
    let mut out = Vec::new();
    let mut header_off = 0;
    loop {
        let reader = DexReader::new(bytes, header_off, options).context(|| format!("dex file at {:#x}", header_off))?;
        out.push(reader.read_dex().context(|| format!("dex file at {:#x}", header_off))?);
        if !reader.version().is_container() {
            break;
        }
        header_off += reader.file_size();
        if header_off >= bytes.len() {
            break;
        }
    }
    debug!("read {} files from a {} byte buffer", out.len(), bytes.len());
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dex::error::DexErrorKind;
    use crate::dex::{overwrite_u4, write_u4};

    /// A header-only file of `version` with no sections at all.
    fn empty_file(version: DexVersion) -> Vec<u8> {
        let size = header_size(version);
        let header = Header {
            magic: version.magic(),
            file_size: size as u32,
            header_size: size as u32,
            endian_tag: ENDIAN_CONSTANT,
            container: if version.is_container() {
                Some(ContainerHeader { container_size: size as u32, header_off: 0 })
            } else {
                None
            },
            ..Header::default()
        };
        let mut bytes = Vec::new();
        header.write(&mut bytes);
        bytes
    }

    fn open(bytes: &[u8]) -> Result<DexReader<'_>, DexError> {
        DexReader::new(bytes, 0, &ReadOptions::default())
    }

    #[test]
    fn empty_file_reads_no_classes() {
        let bytes = empty_file(DexVersion::Dex035);
        let reader = open(&bytes).unwrap();
        assert_eq!(reader.version(), DexVersion::Dex035);
        assert_eq!(reader.read_dex().unwrap(), Dex::default());
    }

    #[test]
    fn short_or_foreign_buffers_are_not_dex() {
        assert_eq!(open(&[0; 16]).err().map(|e| e.kind()), Some(DexErrorKind::NotADex));
        let mut bytes = empty_file(DexVersion::Dex038);
        bytes[0..8].copy_from_slice(b"PK\x03\x04\0\0\0\0");
        assert_eq!(open(&bytes).err().map(|e| e.kind()), Some(DexErrorKind::NotADex));
    }

    #[test]
    fn header_fields_are_validated() {
        let mut bytes = empty_file(DexVersion::Dex038);
        overwrite_u4(&mut bytes, 40, REVERSE_ENDIAN_CONSTANT);
        assert_eq!(open(&bytes).err().map(|e| e.kind()), Some(DexErrorKind::InvalidFormat));

        let mut bytes = empty_file(DexVersion::Dex038);
        overwrite_u4(&mut bytes, 36, 0x78);
        assert_eq!(open(&bytes).err().map(|e| e.kind()), Some(DexErrorKind::InvalidFormat));

        let mut bytes = empty_file(DexVersion::Dex038);
        overwrite_u4(&mut bytes, FILE_SIZE_OFFSET, 0x1000);
        let err = open(&bytes).err().unwrap();
        assert_eq!(err.kind(), DexErrorKind::InvalidFormat);
        assert!(err.message().starts_with("Truncated dex file"));
    }

    #[test]
    fn container_header_offset_must_match() {
        let mut bytes = empty_file(DexVersion::Dex041);
        overwrite_u4(&mut bytes, CONTAINER_OFF_OFFSET, 0x40);
        let err = open(&bytes).err().unwrap();
        assert!(err.message().starts_with("Unexpected header offset"));
    }

    #[test]
    fn map_must_agree_with_header() {
        let mut bytes = empty_file(DexVersion::Dex035);
        let map_off = bytes.len() as u32;
        write_u4(&mut bytes, 2);
        MapItem::new(TYPE_HEADER_ITEM, 1, 0).write(&mut bytes);
        MapItem::new(TYPE_MAP_LIST, 1, map_off).write(&mut bytes);
        let file_size = bytes.len() as u32;
        overwrite_u4(&mut bytes, FILE_SIZE_OFFSET, file_size);
        overwrite_u4(&mut bytes, 52, map_off);
        assert_eq!(open(&bytes).unwrap().map().len(), 2);

        // claim a string section the header does not have
        let mut bad = bytes.clone();
        bad[map_off as usize + 4..map_off as usize + 6].copy_from_slice(&TYPE_STRING_ID_ITEM.to_le_bytes());
        assert_eq!(open(&bad).err().map(|e| e.kind()), Some(DexErrorKind::InvalidFormat));

        let mut unknown = bytes.clone();
        unknown[map_off as usize + 4..map_off as usize + 6].copy_from_slice(&0x7777u16.to_le_bytes());
        let err = open(&unknown).err().unwrap();
        assert_eq!(err.message(), "Unknown map item type 0x7777");
    }

    #[test]
    fn id_sections_must_fit() {
        let mut bytes = empty_file(DexVersion::Dex035);
        // 0x10 strings at 0x70 need 64 bytes past the header
        overwrite_u4(&mut bytes, 56, 0x10);
        overwrite_u4(&mut bytes, 60, 0x70);
        assert_eq!(open(&bytes).err().map(|e| e.kind()), Some(DexErrorKind::InvalidFormat));
    }

    #[test]
    fn indices_are_bounds_checked() {
        let bytes = empty_file(DexVersion::Dex035);
        let reader = open(&bytes).unwrap();
        let err = reader.string(7).unwrap_err();
        assert_eq!(err.kind(), DexErrorKind::Bounds);
        assert_eq!(err.message(), "Invalid string index 7, not in [0, 0)");
        assert_eq!(reader.read_class(0).unwrap_err().kind(), DexErrorKind::Bounds);
    }
}
