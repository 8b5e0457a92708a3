//! Blob prefix: the 8-byte `(payloadSize, flags)` header that begins every
//! blob (spec §3.1).

use crate::codec::unaligned::{read_u32_le, write_u32_le};

pub const BLOB_PREFIX_SIZE: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum BlobKind {
    Header = 0,
    Tile = 1,
    StringTable = 2,
    IndexedKeyTable = 3,
    FreeListNode = 4,
    JournalStaging = 5,
    Free = 6,
    TileIndex = 7,
    Properties = 8,
}

impl BlobKind {
    fn from_u32(v: u32) -> Self {
        match v {
            0 => BlobKind::Header,
            1 => BlobKind::Tile,
            2 => BlobKind::StringTable,
            3 => BlobKind::IndexedKeyTable,
            4 => BlobKind::FreeListNode,
            5 => BlobKind::JournalStaging,
            7 => BlobKind::TileIndex,
            8 => BlobKind::Properties,
            _ => BlobKind::Free,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobPrefix {
    pub payload_size: u32,
    pub kind: BlobKind,
}

impl BlobPrefix {
    pub fn read(bytes: &[u8]) -> Self {
        let payload_size = read_u32_le(bytes, 0);
        let kind = BlobKind::from_u32(read_u32_le(bytes, 4));
        BlobPrefix { payload_size, kind }
    }

    pub fn write(&self, buf: &mut [u8]) {
        write_u32_le(buf, 0, self.payload_size);
        write_u32_le(buf, 4, self.kind as u32);
    }

    /// Total page-rounded size (prefix + payload) given a page size.
    pub fn blob_pages(&self, page_size: u32) -> u32 {
        let total = BLOB_PREFIX_SIZE as u32 + self.payload_size;
        total.div_ceil(page_size)
    }
}
