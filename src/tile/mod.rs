//! The tile decoder: `TilePtr`, `FeaturePtr`, `TagTablePtr`,
//! `RelationTablePtr`, way geometry, and per-type spatial indexes (spec
//! §3.2–§3.4, §4.3, §4.5).
//!
//! A tile blob's payload is a self-contained byte range (the same slice a
//! [`crate::blob_store::BlobView`] hands out); every pointer inside it --
//! `local_handle`s in a [`spatial_index::SpatialIndexPtr`], a
//! `FeaturePtr::body_offset`, a `FeatureRef::Local` -- is a byte offset *from
//! the start of that payload*, so the whole tile decodes without ever
//! copying out of the mmap.

pub mod builder;
pub mod feature_ptr;
pub mod relation_table;
pub mod spatial_index;
pub mod tag_table;
pub mod way;

use crate::codec::unaligned::read_u32_le;
use crate::codec::varint::{decode_varint_safe, encode_varint};
use crate::error::{GeodeskError, Result};
use crate::feature_store::tile_index::Tip;
use crate::feature_type::FeatureIndexType;

pub use feature_ptr::FeaturePtr;
pub use relation_table::RelationTablePtr;
pub use spatial_index::SpatialIndexPtr;
pub use tag_table::TagTablePtr;
pub use way::WayPtr;

const NULL_OFFSET: u32 = u32::MAX;

/// A reference to a feature, either within the same tile (the overwhelming
/// common case -- a way's own nodes, a relation's members usually live in
/// the tile they were built in) or in another tile (a way crossing a tile
/// boundary, spec glossary "multi-tile way"; a relation member assigned to a
/// different tile than its parent).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureRef {
    Local(u32),
    Foreign(Tip, u32),
}

impl FeatureRef {
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            FeatureRef::Local(handle) => {
                out.push(0);
                encode_varint(u64::from(*handle), out);
            }
            FeatureRef::Foreign(tip, handle) => {
                out.push(1);
                encode_varint(u64::from(tip.0), out);
                encode_varint(u64::from(*handle), out);
            }
        }
    }

    pub fn decode(bytes: &[u8], pos: &mut usize, end: usize) -> Result<Self> {
        if *pos >= end {
            return Err(GeodeskError::corrupt(*pos as u64, "feature ref truncated"));
        }
        let tag = bytes[*pos];
        *pos += 1;
        Ok(match tag {
            0 => FeatureRef::Local(decode_varint_safe(bytes, pos, end)? as u32),
            1 => {
                let tip = Tip(decode_varint_safe(bytes, pos, end)? as u32);
                let handle = decode_varint_safe(bytes, pos, end)? as u32;
                FeatureRef::Foreign(tip, handle)
            }
            other => return Err(GeodeskError::corrupt(*pos as u64, format!("unknown feature ref tag {other}"))),
        })
    }
}

/// A decoded tile: the four per-type spatial index offsets, fixed at the
/// start of every tile payload (spec §3.2).
///
/// ```text
/// u32 node_index_offset | NULL_OFFSET
/// u32 way_index_offset | NULL_OFFSET
/// u32 area_index_offset | NULL_OFFSET
/// u32 relation_index_offset | NULL_OFFSET
/// ```
#[derive(Clone, Copy)]
pub struct TilePtr<'a> {
    bytes: &'a [u8],
}

impl<'a> TilePtr<'a> {
    pub const HEADER_SIZE: usize = 16;

    pub fn at(bytes: &'a [u8]) -> Result<Self> {
        if bytes.len() < Self::HEADER_SIZE {
            return Err(GeodeskError::corrupt(0, "tile payload shorter than its header"));
        }
        Ok(TilePtr { bytes })
    }

    fn offset_for(&self, index_type: FeatureIndexType) -> Option<u32> {
        let off = read_u32_le(self.bytes, index_type as usize * 4);
        if off == NULL_OFFSET { None } else { Some(off) }
    }

    pub fn index(&self, index_type: FeatureIndexType) -> Option<SpatialIndexPtr<'a>> {
        self.offset_for(index_type).map(|off| SpatialIndexPtr::at(self.bytes, off))
    }

    pub fn feature_at(&self, local_handle: u32) -> FeaturePtr<'a> {
        FeaturePtr::at(self.bytes, local_handle)
    }

    pub fn way_at(&self, body_offset: u32) -> WayPtr<'a> {
        WayPtr::at(self.bytes, body_offset)
    }

    pub fn relation_at(&self, body_offset: u32) -> RelationTablePtr<'a> {
        RelationTablePtr::at(self.bytes, body_offset)
    }

    pub fn bytes(&self) -> &'a [u8] {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn foreign_and_local_refs_round_trip() {
        let refs = vec![FeatureRef::Local(7), FeatureRef::Foreign(Tip::new(4, 1, 2), 99)];
        let mut buf = Vec::new();
        for r in &refs {
            r.encode(&mut buf);
        }
        let mut pos = 0;
        let end = buf.len();
        let mut decoded = Vec::new();
        while pos < end {
            decoded.push(FeatureRef::decode(&buf, &mut pos, end).unwrap());
        }
        assert_eq!(decoded, refs);
    }
}
