use std::fmt;

use crate::file::PageId;

/// Slot index within a data page
pub type SlotId = i32;

/// Stable physical identifier of a record: data page plus slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rid {
    pub page: PageId,
    pub slot: SlotId,
}

impl Rid {
    pub fn new(page: PageId, slot: SlotId) -> Self {
        Self { page, slot }
    }

    /// Encoded size on disk (page + slot, both i32)
    pub const SIZE: usize = 8;

    pub fn serialize(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..4].copy_from_slice(&self.page.to_le_bytes());
        buf[4..8].copy_from_slice(&self.slot.to_le_bytes());
        buf
    }

    pub fn deserialize(data: &[u8]) -> Self {
        Self {
            page: i32::from_le_bytes(data[0..4].try_into().unwrap()),
            slot: i32::from_le_bytes(data[4..8].try_into().unwrap()),
        }
    }
}

impl fmt::Display for Rid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.page, self.slot)
    }
}

/// A record copied out of its page: the raw tuple bytes plus the RID it
/// lives at.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub rid: Rid,
    pub data: Vec<u8>,
}

impl Record {
    pub fn new(rid: Rid, data: Vec<u8>) -> Self {
        Self { rid, data }
    }
}
