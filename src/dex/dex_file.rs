/* Dex file format structures: constants, header and map list */

use crate::dex::error::DexError;
use crate::dex::version::DexVersion;
use crate::dex::{read_u2, read_u4, read_x, write_u2, write_u4, write_x};

/* Constants */
pub const ENDIAN_CONSTANT: u32 = 0x12345678;
pub const REVERSE_ENDIAN_CONSTANT: u32 = 0x78563412;
pub const NO_INDEX: u32 = 0xffffffff;
pub const NO_OFFSET: u32 = 0;

/* Access flags */
pub const ACC_PUBLIC: u32 = 0x1;
pub const ACC_PRIVATE: u32 = 0x2;
pub const ACC_PROTECTED: u32 = 0x4;
pub const ACC_STATIC: u32 = 0x8;
pub const ACC_FINAL: u32 = 0x10;
pub const ACC_SYNCHRONIZED: u32 = 0x20;
pub const ACC_VOLATILE: u32 = 0x40;
pub const ACC_BRIDGE: u32 = 0x40;
pub const ACC_TRANSIENT: u32 = 0x80;
pub const ACC_VARARGS: u32 = 0x80;
pub const ACC_NATIVE: u32 = 0x100;
pub const ACC_INTERFACE: u32 = 0x200;
pub const ACC_ABSTRACT: u32 = 0x400;
pub const ACC_STRICT: u32 = 0x800;
pub const ACC_SYNTHETIC: u32 = 0x1000;
pub const ACC_ANNOTATION: u32 = 0x2000;
pub const ACC_ENUM: u32 = 0x4000;
pub const ACC_CONSTRUCTOR: u32 = 0x10000;
pub const ACC_DECLARED_SYNCHRONIZED: u32 = 0x20000;
pub const ACC_VISIBILITY_MASK: u32 = ACC_PUBLIC | ACC_PRIVATE | ACC_PROTECTED;

/* Map item type codes */
pub const TYPE_HEADER_ITEM: u16 = 0x0000;
pub const TYPE_STRING_ID_ITEM: u16 = 0x0001;
pub const TYPE_TYPE_ID_ITEM: u16 = 0x0002;
pub const TYPE_PROTO_ID_ITEM: u16 = 0x0003;
pub const TYPE_FIELD_ID_ITEM: u16 = 0x0004;
pub const TYPE_METHOD_ID_ITEM: u16 = 0x0005;
pub const TYPE_CLASS_DEF_ITEM: u16 = 0x0006;
pub const TYPE_CALL_SITE_ID_ITEM: u16 = 0x0007;
pub const TYPE_METHOD_HANDLE_ITEM: u16 = 0x0008;
pub const TYPE_MAP_LIST: u16 = 0x1000;
pub const TYPE_TYPE_LIST: u16 = 0x1001;
pub const TYPE_ANNOTATION_SET_REF_LIST: u16 = 0x1002;
pub const TYPE_ANNOTATION_SET_ITEM: u16 = 0x1003;
pub const TYPE_CLASS_DATA_ITEM: u16 = 0x2000;
pub const TYPE_CODE_ITEM: u16 = 0x2001;
pub const TYPE_STRING_DATA_ITEM: u16 = 0x2002;
pub const TYPE_DEBUG_INFO_ITEM: u16 = 0x2003;
pub const TYPE_ANNOTATION_ITEM: u16 = 0x2004;
pub const TYPE_ENCODED_ARRAY_ITEM: u16 = 0x2005;
pub const TYPE_ANNOTATIONS_DIRECTORY_ITEM: u16 = 0x2006;
pub const TYPE_HIDDENAPI_CLASS_DATA_ITEM: u16 = 0xF000;

/* Header layout */
pub const BASE_HEADER_SIZE: usize = 0x70;
pub const CONTAINER_HEADER_SIZE: usize = BASE_HEADER_SIZE + 4 * 2;
pub const COMPACT_HEADER_SIZE: usize = BASE_HEADER_SIZE + 4 * 6;

pub const CHECKSUM_OFFSET: usize = 8;
pub const CHECKSUM_DATA_START_OFFSET: usize = 12;
pub const SIGNATURE_OFFSET: usize = 12;
pub const SIGNATURE_SIZE: usize = 20;
pub const SIGNATURE_DATA_START_OFFSET: usize = 32;
pub const FILE_SIZE_OFFSET: usize = 32;
pub const CONTAINER_SIZE_OFFSET: usize = 112;
pub const CONTAINER_OFF_OFFSET: usize = 116;

/* Fixed item sizes */
pub const STRING_ID_SIZE: usize = 4;
pub const TYPE_ID_SIZE: usize = 4;
pub const PROTO_ID_SIZE: usize = 12;
pub const FIELD_ID_SIZE: usize = 8;
pub const METHOD_ID_SIZE: usize = 8;
pub const CLASS_DEF_SIZE: usize = 32;
pub const CALL_SITE_ID_SIZE: usize = 4;
pub const METHOD_HANDLE_ID_SIZE: usize = 8;
pub const MAP_ITEM_SIZE: usize = 12;
pub const TRY_ITEM_SIZE: usize = 8;

/* Alignments */
pub const DATA_SECTION_ALIGNMENT: usize = 8;
pub const DEFAULT_ALIGNMENT: usize = 4;
pub const CODE_ITEM_ALIGNMENT: usize = 4;
pub const COMPACT_CODE_ITEM_ALIGNMENT: usize = 2;
pub const TRY_ITEM_ALIGNMENT: usize = 4;
pub const PAYLOAD_ALIGNMENT: usize = 4;

/* Compact dex */
pub const COMPACT_FEATURE_DEFAULT_METHODS: u32 = 0x1;
pub const COMPACT_DEBUG_ELEMENTS_PER_INDEX: usize = 16;

pub fn header_size(version: DexVersion) -> usize
{
    if version.is_compact()
    {
        COMPACT_HEADER_SIZE
    }
    else if version.is_container()
    {
        CONTAINER_HEADER_SIZE
    }
    else
    {
        BASE_HEADER_SIZE
    }
}

/// Trailing header fields of compact dex files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CompactHeader {
    pub feature_flags: u32,
    pub debug_info_offsets_pos: u32,
    pub debug_info_offsets_table_offset: u32,
    pub debug_info_base: u32,
    pub owned_data_begin: u32,
    pub owned_data_end: u32,
}

/// Trailing header fields of dex container files.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ContainerHeader {
    pub container_size: u32,
    pub header_off: u32,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Header {
    pub magic: [u8; 8],
    pub checksum: u32,
    pub signature: [u8; 20],
    pub file_size: u32,
    pub header_size: u32,
    pub endian_tag: u32,
    pub link_size: u32,
    pub link_off: u32,
    pub map_off: u32,
    pub string_ids_size: u32,
    pub string_ids_off: u32,
    pub type_ids_size: u32,
    pub type_ids_off: u32,
    pub proto_ids_size: u32,
    pub proto_ids_off: u32,
    pub field_ids_size: u32,
    pub field_ids_off: u32,
    pub method_ids_size: u32,
    pub method_ids_off: u32,
    pub class_defs_size: u32,
    pub class_defs_off: u32,
    pub data_size: u32,
    pub data_off: u32,
    pub compact: Option<CompactHeader>,
    pub container: Option<ContainerHeader>,
}

impl Header
{
    /// Reads the header of `version`; the magic has already been checked.
    pub fn read(bytes: &[u8], ix: &mut usize, version: DexVersion) -> Result<Header, DexError>
    {
        let mut magic = [0u8; 8];
        magic.copy_from_slice(&read_x(bytes, ix, 8)?);
        let checksum = read_u4(bytes, ix)?;
        let mut signature = [0u8; 20];
        signature.copy_from_slice(&read_x(bytes, ix, SIGNATURE_SIZE)?);

        let mut header = Header {
            magic,
            checksum,
            signature,
            file_size: read_u4(bytes, ix)?,
            header_size: read_u4(bytes, ix)?,
            endian_tag: read_u4(bytes, ix)?,
            link_size: read_u4(bytes, ix)?,
            link_off: read_u4(bytes, ix)?,
            map_off: read_u4(bytes, ix)?,
            string_ids_size: read_u4(bytes, ix)?,
            string_ids_off: read_u4(bytes, ix)?,
            type_ids_size: read_u4(bytes, ix)?,
            type_ids_off: read_u4(bytes, ix)?,
            proto_ids_size: read_u4(bytes, ix)?,
            proto_ids_off: read_u4(bytes, ix)?,
            field_ids_size: read_u4(bytes, ix)?,
            field_ids_off: read_u4(bytes, ix)?,
            method_ids_size: read_u4(bytes, ix)?,
            method_ids_off: read_u4(bytes, ix)?,
            class_defs_size: read_u4(bytes, ix)?,
            class_defs_off: read_u4(bytes, ix)?,
            data_size: read_u4(bytes, ix)?,
            data_off: read_u4(bytes, ix)?,
            compact: None,
            container: None,
        };

        if version.is_compact()
        {
            header.compact = Some(CompactHeader {
                feature_flags: read_u4(bytes, ix)?,
                debug_info_offsets_pos: read_u4(bytes, ix)?,
                debug_info_offsets_table_offset: read_u4(bytes, ix)?,
                debug_info_base: read_u4(bytes, ix)?,
                owned_data_begin: read_u4(bytes, ix)?,
                owned_data_end: read_u4(bytes, ix)?,
            });
        }
        if version.is_container()
        {
            header.container = Some(ContainerHeader {
                container_size: read_u4(bytes, ix)?,
                header_off: read_u4(bytes, ix)?,
            });
        }
        Ok(header)
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_x(bytes, &self.magic);
        c += write_u4(bytes, self.checksum);
        c += write_x(bytes, &self.signature);
        c += write_u4(bytes, self.file_size);
        c += write_u4(bytes, self.header_size);
        c += write_u4(bytes, self.endian_tag);
        c += write_u4(bytes, self.link_size);
        c += write_u4(bytes, self.link_off);
        c += write_u4(bytes, self.map_off);
        c += write_u4(bytes, self.string_ids_size);
        c += write_u4(bytes, self.string_ids_off);
        c += write_u4(bytes, self.type_ids_size);
        c += write_u4(bytes, self.type_ids_off);
        c += write_u4(bytes, self.proto_ids_size);
        c += write_u4(bytes, self.proto_ids_off);
        c += write_u4(bytes, self.field_ids_size);
        c += write_u4(bytes, self.field_ids_off);
        c += write_u4(bytes, self.method_ids_size);
        c += write_u4(bytes, self.method_ids_off);
        c += write_u4(bytes, self.class_defs_size);
        c += write_u4(bytes, self.class_defs_off);
        c += write_u4(bytes, self.data_size);
        c += write_u4(bytes, self.data_off);
        if let Some(compact) = &self.compact
        {
            c += write_u4(bytes, compact.feature_flags);
            c += write_u4(bytes, compact.debug_info_offsets_pos);
            c += write_u4(bytes, compact.debug_info_offsets_table_offset);
            c += write_u4(bytes, compact.debug_info_base);
            c += write_u4(bytes, compact.owned_data_begin);
            c += write_u4(bytes, compact.owned_data_end);
        }
        if let Some(container) = &self.container
        {
            c += write_u4(bytes, container.container_size);
            c += write_u4(bytes, container.header_off);
        }
        c
    }
}

/// One `map_item`: a section's type code, element count and offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MapItem {
    pub type_code: u16,
    pub size: u32,
    pub offset: u32,
}

impl MapItem
{
    pub fn new(type_code: u16, size: u32, offset: u32) -> Self
    {
        MapItem { type_code, size, offset }
    }

    pub fn read(bytes: &[u8], ix: &mut usize) -> Result<MapItem, DexError>
    {
        let type_code = read_u2(bytes, ix)?;
        let _unused = read_u2(bytes, ix)?;
        Ok(MapItem {
            type_code,
            size: read_u4(bytes, ix)?,
            offset: read_u4(bytes, ix)?,
        })
    }

    pub fn write(&self, bytes: &mut Vec<u8>) -> usize
    {
        let mut c = 0;
        c += write_u2(bytes, self.type_code);
        c += write_u2(bytes, 0);
        c += write_u4(bytes, self.size);
        c += write_u4(bytes, self.offset);
        c
    }

    pub fn is_known_type(type_code: u16) -> bool
    {
        matches!(
            type_code,
            TYPE_HEADER_ITEM
                | TYPE_STRING_ID_ITEM
                | TYPE_TYPE_ID_ITEM
                | TYPE_PROTO_ID_ITEM
                | TYPE_FIELD_ID_ITEM
                | TYPE_METHOD_ID_ITEM
                | TYPE_CLASS_DEF_ITEM
                | TYPE_CALL_SITE_ID_ITEM
                | TYPE_METHOD_HANDLE_ITEM
                | TYPE_MAP_LIST
                | TYPE_TYPE_LIST
                | TYPE_ANNOTATION_SET_REF_LIST
                | TYPE_ANNOTATION_SET_ITEM
                | TYPE_CLASS_DATA_ITEM
                | TYPE_CODE_ITEM
                | TYPE_STRING_DATA_ITEM
                | TYPE_DEBUG_INFO_ITEM
                | TYPE_ANNOTATION_ITEM
                | TYPE_ENCODED_ARRAY_ITEM
                | TYPE_ANNOTATIONS_DIRECTORY_ITEM
                | TYPE_HIDDENAPI_CLASS_DATA_ITEM
        )
    }
}

pub fn read_map_list(bytes: &[u8], ix: &mut usize) -> Result<Vec<MapItem>, DexError>
{
    let size = read_u4(bytes, ix)? as usize;
    if size > bytes.len() / MAP_ITEM_SIZE
    {
        fail!(InvalidFormat, "Map list size {} exceeds the file", size);
    }
    let mut items = Vec::with_capacity(size);
    for _ in 0..size
    {
        items.push(MapItem::read(bytes, ix)?);
    }
    Ok(items)
}

pub fn write_map_list(bytes: &mut Vec<u8>, entries: &[MapItem]) -> usize
{
    let mut c = write_u4(bytes, entries.len() as u32);
    for item in entries
    {
        c += item.write(bytes);
    }
    c
}
