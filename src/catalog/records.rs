use crate::record::{AttrType, RecordResult};

/// Longest accepted relation or attribute name
pub const MAX_NAME: usize = 24;

/// Most attributes per relation
pub const MAX_ATTRS: usize = 40;

/// System catalog relation names
pub const RELCAT_NAME: &str = "relcat";
pub const ATTRCAT_NAME: &str = "attrcat";

/// Fixed name field width on disk (name + NUL padding)
const NAME_FIELD: usize = MAX_NAME + 1;

fn write_name(buf: &mut [u8], name: &str) {
    let bytes = name.as_bytes();
    let n = bytes.len().min(NAME_FIELD - 1);
    buf[..n].copy_from_slice(&bytes[..n]);
}

fn read_name(buf: &[u8]) -> String {
    let end = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    String::from_utf8_lossy(&buf[..end]).into_owned()
}

/// One `relcat` row: a relation and its tuple geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct RelcatRecord {
    pub rel_name: String,
    pub tuple_length: i32,
    pub attr_count: i32,
    pub index_count: i32,
}

impl RelcatRecord {
    pub const SIZE: usize = NAME_FIELD + 12;

    /// Byte offset of `rel_name` within the row (scan predicate target)
    pub const REL_NAME_OFFSET: usize = 0;

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        write_name(&mut buf[0..NAME_FIELD], &self.rel_name);
        buf[NAME_FIELD..NAME_FIELD + 4].copy_from_slice(&self.tuple_length.to_le_bytes());
        buf[NAME_FIELD + 4..NAME_FIELD + 8].copy_from_slice(&self.attr_count.to_le_bytes());
        buf[NAME_FIELD + 8..NAME_FIELD + 12].copy_from_slice(&self.index_count.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Self {
        Self {
            rel_name: read_name(&data[0..NAME_FIELD]),
            tuple_length: i32::from_le_bytes(data[NAME_FIELD..NAME_FIELD + 4].try_into().unwrap()),
            attr_count: i32::from_le_bytes(
                data[NAME_FIELD + 4..NAME_FIELD + 8].try_into().unwrap(),
            ),
            index_count: i32::from_le_bytes(
                data[NAME_FIELD + 8..NAME_FIELD + 12].try_into().unwrap(),
            ),
        }
    }
}

/// One `attrcat` row: a single attribute of some relation.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrcatRecord {
    pub rel_name: String,
    pub attr_name: String,
    pub offset: i32,
    pub attr_type: AttrType,
    pub attr_length: i32,
    /// `-1` when the attribute is not indexed
    pub index_no: i32,
}

impl AttrcatRecord {
    pub const SIZE: usize = 2 * NAME_FIELD + 16;

    pub const REL_NAME_OFFSET: usize = 0;
    pub const ATTR_NAME_OFFSET: usize = NAME_FIELD;

    pub fn serialize(&self) -> Vec<u8> {
        let mut buf = vec![0u8; Self::SIZE];
        write_name(&mut buf[0..NAME_FIELD], &self.rel_name);
        write_name(&mut buf[NAME_FIELD..2 * NAME_FIELD], &self.attr_name);
        let base = 2 * NAME_FIELD;
        buf[base..base + 4].copy_from_slice(&self.offset.to_le_bytes());
        buf[base + 4..base + 8].copy_from_slice(&self.attr_type.code().to_le_bytes());
        buf[base + 8..base + 12].copy_from_slice(&self.attr_length.to_le_bytes());
        buf[base + 12..base + 16].copy_from_slice(&self.index_no.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> RecordResult<Self> {
        let base = 2 * NAME_FIELD;
        Ok(Self {
            rel_name: read_name(&data[0..NAME_FIELD]),
            attr_name: read_name(&data[NAME_FIELD..2 * NAME_FIELD]),
            offset: i32::from_le_bytes(data[base..base + 4].try_into().unwrap()),
            attr_type: AttrType::from_code(i32::from_le_bytes(
                data[base + 4..base + 8].try_into().unwrap(),
            ))?,
            attr_length: i32::from_le_bytes(data[base + 8..base + 12].try_into().unwrap()),
            index_no: i32::from_le_bytes(data[base + 12..base + 16].try_into().unwrap()),
        })
    }
}

/// Attribute description handed to the executor: everything it needs to
/// slice, compare and project one column of a tuple.
#[derive(Debug, Clone, PartialEq)]
pub struct DataAttrInfo {
    pub rel_name: String,
    pub attr_name: String,
    pub offset: usize,
    pub attr_type: AttrType,
    pub attr_length: usize,
    pub index_no: i32,
}

impl DataAttrInfo {
    pub fn from_attrcat(row: &AttrcatRecord) -> Self {
        Self {
            rel_name: row.rel_name.clone(),
            attr_name: row.attr_name.clone(),
            offset: row.offset as usize,
            attr_type: row.attr_type,
            attr_length: row.attr_length as usize,
            index_no: row.index_no,
        }
    }

    pub fn is_indexed(&self) -> bool {
        self.index_no >= 0
    }
}

/// Attribute declaration used by `create_table`.
#[derive(Debug, Clone)]
pub struct AttrInfo {
    pub attr_name: String,
    pub attr_type: AttrType,
    pub attr_length: usize,
}

impl AttrInfo {
    pub fn new(attr_name: &str, attr_type: AttrType, attr_length: usize) -> Self {
        Self {
            attr_name: attr_name.to_string(),
            attr_type,
            attr_length,
        }
    }
}
