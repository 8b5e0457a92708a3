//! Way geometry and feature-node decoding (spec §3.3 "way body", §4.3
//! "Coordinate decoding").
//!
//! Body layout at `FeaturePtr::body_offset`:
//! ```text
//! varint point_count
//! signed_varint x0, signed_varint y0          -- first point, absolute
//! (point_count - 1) * { signed_varint dx, signed_varint dy }   -- deltas
//! varint feature_node_count
//! feature_node_count * FeatureRef             -- see crate::tile::FeatureRef
//! <relation member table>                     -- see relation_table, always
//!                                                 present (count may be 0):
//!                                                 the ways this way belongs
//!                                                 to as a member (B.4
//!                                                 ParentRelationIterator)
//! ```

use crate::codec::varint::{decode_signed_varint_safe, decode_varint_safe, encode_signed_varint, encode_varint};
use crate::error::Result;
use crate::tile::relation_table::{Member, RelationTablePtr};
use crate::tile::FeatureRef;

#[derive(Clone, Copy)]
pub struct WayPtr<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> WayPtr<'a> {
    pub fn at(tile_bytes: &'a [u8], offset: u32) -> Self {
        WayPtr { bytes: tile_bytes, offset: offset as usize }
    }

    /// Lazily decoded `(x, y)` pairs in the way's original winding order
    /// (spec B.6 `WayCoordinateIterator`).
    pub fn coordinates(&self) -> Result<CoordinateSpanIterator<'a>> {
        let end = self.bytes.len();
        let mut pos = self.offset;
        let count = decode_varint_safe(self.bytes, &mut pos, end)?;
        Ok(CoordinateSpanIterator {
            bytes: self.bytes,
            pos,
            end,
            remaining: count,
            prev: (0, 0),
            first: true,
        })
    }

    pub fn to_vec(&self) -> Result<Vec<(i32, i32)>> {
        self.coordinates()?.collect()
    }

    /// The nodes of this way that are themselves features -- tagged or
    /// relation members (spec B.7 `FeatureNodeIterator`). Must be called
    /// after exhausting [`WayPtr::coordinates`]'s byte range is not
    /// required; the offset of this section is independent, located by
    /// skipping over the coordinate section first.
    pub fn feature_nodes(&self) -> Result<NodeTableIterator<'a>> {
        let end = self.bytes.len();
        let mut pos = self.offset;
        let point_count = decode_varint_safe(self.bytes, &mut pos, end)?;
        for i in 0..point_count {
            if i == 0 {
                decode_signed_varint_safe(self.bytes, &mut pos, end)?;
                decode_signed_varint_safe(self.bytes, &mut pos, end)?;
            } else {
                decode_signed_varint_safe(self.bytes, &mut pos, end)?;
                decode_signed_varint_safe(self.bytes, &mut pos, end)?;
            }
        }
        let node_count = decode_varint_safe(self.bytes, &mut pos, end)?;
        Ok(NodeTableIterator { bytes: self.bytes, pos, end, remaining: node_count })
    }

    /// Byte offset of the relation member table trailing this way's body
    /// (past the coordinate and feature-node sections).
    fn relation_table_offset(&self) -> Result<usize> {
        let end = self.bytes.len();
        let mut pos = self.offset;
        let point_count = decode_varint_safe(self.bytes, &mut pos, end)?;
        for _ in 0..point_count {
            decode_signed_varint_safe(self.bytes, &mut pos, end)?;
            decode_signed_varint_safe(self.bytes, &mut pos, end)?;
        }
        let node_count = decode_varint_safe(self.bytes, &mut pos, end)?;
        for _ in 0..node_count {
            FeatureRef::decode(self.bytes, &mut pos, end)?;
        }
        Ok(pos)
    }

    /// The relations this way is a member of (spec B.4
    /// `ParentRelationIterator`). Always present in the body (possibly an
    /// empty table), so this never fails on a well-formed tile.
    pub fn parent_relations(&self) -> Result<impl Iterator<Item = Result<Member>> + 'a> {
        let offset = self.relation_table_offset()?;
        RelationTablePtr::at(self.bytes, offset as u32).members()
    }
}

/// Lazy iterator over one way's decoded coordinates (spec B.6).
pub struct CoordinateSpanIterator<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
    remaining: u64,
    prev: (i32, i32),
    first: bool,
}

impl<'a> Iterator for CoordinateSpanIterator<'a> {
    type Item = Result<(i32, i32)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        let point = if self.first {
            self.first = false;
            let x = match decode_signed_varint_safe(self.bytes, &mut self.pos, self.end) {
                Ok(v) => v as i32,
                Err(e) => return Some(Err(e)),
            };
            let y = match decode_signed_varint_safe(self.bytes, &mut self.pos, self.end) {
                Ok(v) => v as i32,
                Err(e) => return Some(Err(e)),
            };
            (x, y)
        } else {
            let dx = match decode_signed_varint_safe(self.bytes, &mut self.pos, self.end) {
                Ok(v) => v as i32,
                Err(e) => return Some(Err(e)),
            };
            let dy = match decode_signed_varint_safe(self.bytes, &mut self.pos, self.end) {
                Ok(v) => v as i32,
                Err(e) => return Some(Err(e)),
            };
            (self.prev.0.wrapping_add(dx), self.prev.1.wrapping_add(dy))
        };
        self.prev = point;
        Some(Ok(point))
    }
}

/// `WayCoordinateIterator` alias (spec B.6 names both a span-level and a
/// whole-way iterator; a single way body is one span in this port, so the
/// two coincide).
pub type WayCoordinateIterator<'a> = CoordinateSpanIterator<'a>;

/// Iterates the [`FeatureRef`]s of a way's promoted feature-nodes (spec B.7).
pub struct NodeTableIterator<'a> {
    bytes: &'a [u8],
    pos: usize,
    end: usize,
    remaining: u64,
}

impl<'a> Iterator for NodeTableIterator<'a> {
    type Item = Result<FeatureRef>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        Some(FeatureRef::decode(self.bytes, &mut self.pos, self.end))
    }
}

/// `FeatureNodeIterator` alias -- same sequence as [`NodeTableIterator`],
/// named separately in spec B.7 for the public-facing `Feature::members()`
/// surface.
pub type FeatureNodeIterator<'a> = NodeTableIterator<'a>;

/// Serializes a way body for [`crate::tile::builder::TileBuilder`].
/// `parent_relations` is almost always empty; it's only populated when the
/// writer already knows which relations reference this way (spec §4.8
/// `putTile` callers compute this from the members they're about to write).
pub fn encode_way_body(points: &[(i32, i32)], feature_nodes: &[FeatureRef], parent_relations: &[Member]) -> Vec<u8> {
    let mut out = Vec::new();
    encode_varint(points.len() as u64, &mut out);
    let mut prev = (0i32, 0i32);
    for (i, &(x, y)) in points.iter().enumerate() {
        if i == 0 {
            encode_signed_varint(i64::from(x), &mut out);
            encode_signed_varint(i64::from(y), &mut out);
        } else {
            encode_signed_varint(i64::from(x - prev.0), &mut out);
            encode_signed_varint(i64::from(y - prev.1), &mut out);
        }
        prev = (x, y);
    }
    encode_varint(feature_nodes.len() as u64, &mut out);
    for r in feature_nodes {
        r.encode(&mut out);
    }
    out.extend_from_slice(&crate::tile::relation_table::encode_relation_body(parent_relations));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinates_round_trip_through_delta_encoding() {
        let points = vec![(100, 200), (105, 195), (50, 400), (50, 400)];
        let body = encode_way_body(&points, &[], &[]);
        let mut tile = vec![0u8; 16];
        tile.extend_from_slice(&body);
        let way = WayPtr::at(&tile, 16);
        let decoded: Result<Vec<_>> = way.coordinates().unwrap().collect();
        assert_eq!(decoded.unwrap(), points);
    }

    #[test]
    fn feature_nodes_follow_the_coordinate_section() {
        let points = vec![(0, 0), (10, 10)];
        let refs = vec![FeatureRef::Local(42)];
        let body = encode_way_body(&points, &refs, &[]);
        let way = WayPtr::at(&body, 0);
        let decoded_nodes: Vec<_> = way.feature_nodes().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(decoded_nodes, refs);
        // Coordinates are still readable afterward -- independent cursors.
        let decoded_pts: Vec<_> = way.coordinates().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(decoded_pts, points);
    }

    #[test]
    fn parent_relations_follow_the_feature_node_section() {
        use crate::feature_type::FeatureType;
        use crate::tile::relation_table::MemberRole;

        let points = vec![(0, 0), (10, 10)];
        let parents = vec![Member {
            member_type: FeatureType::Relation,
            role: MemberRole::Outer,
            ref_: FeatureRef::Local(5),
        }];
        let body = encode_way_body(&points, &[], &parents);
        let way = WayPtr::at(&body, 0);
        let decoded: Vec<_> = way.parent_relations().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(decoded, parents);
        // Coordinates are still readable afterward -- independent cursors.
        let decoded_pts: Vec<_> = way.coordinates().unwrap().map(|r| r.unwrap()).collect();
        assert_eq!(decoded_pts, points);
    }

    #[test]
    fn empty_parent_relation_table_yields_nothing() {
        let points = vec![(0, 0)];
        let body = encode_way_body(&points, &[], &[]);
        let way = WayPtr::at(&body, 0);
        let decoded: Vec<_> = way.parent_relations().unwrap().collect();
        assert!(decoded.is_empty());
    }
}
