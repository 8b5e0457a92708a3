//! Per-type spatial index traversal (spec §3.2, §4.5).
//!
//! Each of a tile's four feature-index partitions (node/way/area/relation,
//! `FeatureIndexType`) is stored as a shallow, two-level R-tree: a flat list
//! of leaf entries (bbox + `indexBits` + local handle), grouped into
//! fixed-size runs that each carry a summarizing bbox/`indexBits` union.
//! Traversal tests the group summary first and skips the whole run if it
//! can't possibly contain a match, matching spec §4.5's descent rule at one
//! level of fan-out instead of an arbitrary-depth tree -- real tiles hold at
//! most a few thousand features, so one level of grouping gives nearly all
//! of the pruning benefit for a format simple enough to decode directly over
//! mapped bytes with no pointer-chasing (see DESIGN.md).
//!
//! On-disk layout at a `TilePtr` index offset:
//! ```text
//! u32 entry_count
//! u32 group_size
//! group_count * { bbox(4xi32), u32 index_bits }              -- 20 bytes
//! entry_count * { bbox(4xi32), u32 index_bits, u32 handle }  -- 24 bytes
//! ```

use crate::bbox::Bbox;
use crate::codec::unaligned::{read_i32_le, read_u32_le, write_i32_le, write_u32_le};

const GROUP_HEADER_SIZE: usize = 20;
const ENTRY_SIZE: usize = 24;

#[derive(Clone, Copy)]
pub struct SpatialIndexPtr<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> SpatialIndexPtr<'a> {
    pub fn at(tile_bytes: &'a [u8], offset: u32) -> Self {
        SpatialIndexPtr { bytes: tile_bytes, offset: offset as usize }
    }

    pub fn entry_count(&self) -> u32 {
        read_u32_le(self.bytes, self.offset)
    }

    fn group_size(&self) -> u32 {
        read_u32_le(self.bytes, self.offset + 4).max(1)
    }

    fn group_count(&self) -> u32 {
        self.entry_count().div_ceil(self.group_size())
    }

    fn group_headers_start(&self) -> usize {
        self.offset + 8
    }

    fn entries_start(&self) -> usize {
        self.group_headers_start() + self.group_count() as usize * GROUP_HEADER_SIZE
    }

    fn read_bbox(&self, at: usize) -> Bbox {
        Bbox::new(
            read_i32_le(self.bytes, at),
            read_i32_le(self.bytes, at + 4),
            read_i32_le(self.bytes, at + 8),
            read_i32_le(self.bytes, at + 12),
        )
    }

    fn group(&self, g: u32) -> (Bbox, u32) {
        let at = self.group_headers_start() + g as usize * GROUP_HEADER_SIZE;
        (self.read_bbox(at), read_u32_le(self.bytes, at + 16))
    }

    fn entry(&self, i: u32) -> (Bbox, u32, u32) {
        let at = self.entries_start() + i as usize * ENTRY_SIZE;
        (self.read_bbox(at), read_u32_le(self.bytes, at + 16), read_u32_le(self.bytes, at + 20))
    }

    /// Local handles of every entry whose bbox intersects `bbox` and whose
    /// `index_bits` overlaps `index_bits_mask` (or unconditionally, if
    /// `index_bits_mask` is 0 -- spec §4.5 "if `selector.indexBits == 0` the
    /// index-bits test is bypassed").
    pub fn query(&self, bbox: &Bbox, index_bits_mask: u32) -> Vec<u32> {
        let mut out = Vec::new();
        let group_size = self.group_size();
        let entry_count = self.entry_count();
        for g in 0..self.group_count() {
            let (group_bbox, group_bits) = self.group(g);
            if !group_bbox.intersects(bbox) {
                continue;
            }
            if index_bits_mask != 0 && group_bits & index_bits_mask == 0 {
                continue;
            }
            let start = g * group_size;
            let end = (start + group_size).min(entry_count);
            for i in start..end {
                let (entry_bbox, entry_bits, handle) = self.entry(i);
                if !entry_bbox.intersects(bbox) {
                    continue;
                }
                if index_bits_mask != 0 && entry_bits & index_bits_mask == 0 {
                    continue;
                }
                out.push(handle);
            }
        }
        out
    }

    pub fn iter_all(&self) -> impl Iterator<Item = (Bbox, u32, u32)> + '_ {
        (0..self.entry_count()).map(move |i| self.entry(i))
    }
}

/// One leaf entry, prepared by [`crate::tile::builder::TileBuilder`] before
/// grouping.
#[derive(Clone)]
pub struct IndexEntry {
    pub bbox: Bbox,
    pub index_bits: u32,
    pub local_handle: u32,
}

/// Serializes a spatial index section. Entries are grouped in the order
/// given; the builder is expected to have already sorted them so that
/// spatially nearby features land in the same group (a simple sort by
/// Hilbert/Morton key of the bbox center works well and is what
/// `TileBuilder` does).
pub fn encode_spatial_index(entries: &[IndexEntry], group_size: u32) -> Vec<u8> {
    let group_size = group_size.max(1);
    let group_count = (entries.len() as u32).div_ceil(group_size);
    let mut out = Vec::new();
    out.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    out.extend_from_slice(&group_size.to_le_bytes());

    for g in 0..group_count {
        let start = (g * group_size) as usize;
        let end = (start + group_size as usize).min(entries.len());
        let mut union_bbox = Bbox::EMPTY;
        let mut union_bits = 0u32;
        for e in &entries[start..end] {
            union_bbox = union_bbox.union(&e.bbox);
            union_bits |= e.index_bits;
        }
        write_bbox(&mut out, union_bbox);
        out.extend_from_slice(&union_bits.to_le_bytes());
    }

    for e in entries {
        write_bbox(&mut out, e.bbox);
        out.extend_from_slice(&e.index_bits.to_le_bytes());
        out.extend_from_slice(&e.local_handle.to_le_bytes());
    }
    out
}

fn write_bbox(out: &mut Vec<u8>, bbox: Bbox) {
    let start = out.len();
    out.resize(start + 16, 0);
    write_i32_le(out, start, bbox.min_x);
    write_i32_le(out, start + 4, bbox.min_y);
    write_i32_le(out, start + 8, bbox.max_x);
    write_i32_le(out, start + 12, bbox.max_y);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(handle: u32, min_x: i32, min_y: i32, max_x: i32, max_y: i32, bits: u32) -> IndexEntry {
        IndexEntry { bbox: Bbox::new(min_x, min_y, max_x, max_y), index_bits: bits, local_handle: handle }
    }

    #[test]
    fn query_finds_intersecting_entries_across_groups() {
        let entries = vec![
            entry(1, 0, 0, 10, 10, 0b01),
            entry(2, 100, 100, 110, 110, 0b10),
            entry(3, 200, 200, 210, 210, 0b01),
        ];
        let bytes = encode_spatial_index(&entries, 2);
        let index = SpatialIndexPtr::at(&bytes, 0);
        assert_eq!(index.entry_count(), 3);

        let hits = index.query(&Bbox::new(-5, -5, 5, 5), 0);
        assert_eq!(hits, vec![1]);

        let hits = index.query(&Bbox::new(0, 0, 300, 300), 0);
        assert_eq!(hits.len(), 3);
    }

    #[test]
    fn index_bits_mask_prunes_entries() {
        let entries = vec![entry(1, 0, 0, 10, 10, 0b01), entry(2, 0, 0, 10, 10, 0b10)];
        let bytes = encode_spatial_index(&entries, 4);
        let index = SpatialIndexPtr::at(&bytes, 0);
        let hits = index.query(&Bbox::new(0, 0, 10, 10), 0b10);
        assert_eq!(hits, vec![2]);
    }
}
