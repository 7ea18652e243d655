//! Index metadata, stored on the first page of every index file

use std::fmt;

use crate::file::{Page, PageId};

use super::error::{IndexError, IndexResult};
use super::node::{read_i32, read_u32, write_i32, write_u32};

/// Space reserved for the relation name, terminator included
pub const RELATION_NAME_LEN: usize = 20;

const ATTR_OFFSET_POS: usize = 20;
const ATTR_TYPE_POS: usize = 24;
const ROOT_PAGE_POS: usize = 28;
const LEAF_OCCUPANCY_POS: usize = 32;
const INTERNAL_OCCUPANCY_POS: usize = 36;

/// Type of the indexed attribute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    Integer,
    Double,
    String,
}

impl Datatype {
    fn to_u32(self) -> u32 {
        match self {
            Datatype::Integer => 0,
            Datatype::Double => 1,
            Datatype::String => 2,
        }
    }

    fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Datatype::Integer),
            1 => Some(Datatype::Double),
            2 => Some(Datatype::String),
            _ => None,
        }
    }
}

impl fmt::Display for Datatype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datatype::Integer => write!(f, "INTEGER"),
            Datatype::Double => write!(f, "DOUBLE"),
            Datatype::String => write!(f, "STRING"),
        }
    }
}

/// Truncate a relation name to what the metadata page can hold
pub fn stored_relation_name(name: &str) -> String {
    let mut end = 0;
    for (i, c) in name.char_indices() {
        if i + c.len_utf8() > RELATION_NAME_LEN - 1 {
            break;
        }
        end = i + c.len_utf8();
    }
    name[..end].to_string()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexMetaInfo {
    pub relation_name: String,
    pub attr_byte_offset: i32,
    pub attr_type: Datatype,
    pub root_page_no: PageId,
    pub leaf_occupancy: u32,
    pub internal_occupancy: u32,
}

impl IndexMetaInfo {
    pub fn encode(&self, page: &mut Page) {
        let buf = page.raw_mut();
        buf.fill(0);

        let name = stored_relation_name(&self.relation_name);
        buf[..name.len()].copy_from_slice(name.as_bytes());

        write_i32(buf, ATTR_OFFSET_POS, self.attr_byte_offset);
        write_u32(buf, ATTR_TYPE_POS, self.attr_type.to_u32());
        write_u32(buf, ROOT_PAGE_POS, self.root_page_no);
        write_u32(buf, LEAF_OCCUPANCY_POS, self.leaf_occupancy);
        write_u32(buf, INTERNAL_OCCUPANCY_POS, self.internal_occupancy);
    }

    pub fn decode(page: &Page) -> IndexResult<Self> {
        let buf = page.raw();

        let name_bytes = &buf[..RELATION_NAME_LEN];
        let end = name_bytes
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(RELATION_NAME_LEN);
        let relation_name = String::from_utf8_lossy(&name_bytes[..end]).into_owned();

        let raw_type = read_u32(buf, ATTR_TYPE_POS);
        let attr_type = Datatype::from_u32(raw_type)
            .ok_or_else(|| IndexError::BadIndexInfo(format!("unknown attribute type {raw_type}")))?;

        Ok(Self {
            relation_name,
            attr_byte_offset: read_i32(buf, ATTR_OFFSET_POS),
            attr_type,
            root_page_no: read_u32(buf, ROOT_PAGE_POS),
            leaf_occupancy: read_u32(buf, LEAF_OCCUPANCY_POS),
            internal_occupancy: read_u32(buf, INTERNAL_OCCUPANCY_POS),
        })
    }

    /// Check that this index was built for the given relation attribute
    pub fn check_matches(
        &self,
        relation_name: &str,
        attr_byte_offset: i32,
        attr_type: Datatype,
    ) -> IndexResult<()> {
        let expected = stored_relation_name(relation_name);
        if self.relation_name != expected {
            return Err(IndexError::BadIndexInfo(format!(
                "relation name {:?} does not match {:?}",
                self.relation_name, expected
            )));
        }
        if self.attr_byte_offset != attr_byte_offset {
            return Err(IndexError::BadIndexInfo(format!(
                "attribute offset {} does not match {}",
                self.attr_byte_offset, attr_byte_offset
            )));
        }
        if self.attr_type != attr_type {
            return Err(IndexError::BadIndexInfo(format!(
                "attribute type {} does not match {}",
                self.attr_type, attr_type
            )));
        }
        Ok(())
    }
}
