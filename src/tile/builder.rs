//! Assembles a tile payload from scratch (spec §4.8 `putTile`, and the
//! integration tests' synthetic GOL fixtures). The physical layout this
//! produces is exactly what [`crate::tile::TilePtr`] and friends decode; see
//! the module docs in `tile/mod.rs`, `tag_table.rs` and `spatial_index.rs`
//! for the on-disk format each section uses.

use crate::bbox::Bbox;
use crate::feature_store::key::Key;
use crate::feature_type::FeatureType;
use crate::tag::TagValue;
use crate::tile::feature_ptr::{write_feature_header, FEATURE_HEADER_SIZE};
use crate::tile::relation_table::{encode_relation_body, Member};
use crate::tile::spatial_index::{encode_spatial_index, IndexEntry};
use crate::tile::tag_table::encode_tag_table;
use crate::tile::way::encode_way_body;
use crate::tile::FeatureRef;

pub enum BodyBuilder {
    None,
    Way { points: Vec<(i32, i32)>, feature_nodes: Vec<FeatureRef>, parent_relations: Vec<Member> },
    Relation { members: Vec<Member> },
}

pub struct FeatureBuilder {
    pub id: u64,
    pub feature_type: FeatureType,
    pub flags: u16,
    pub bbox: Bbox,
    pub tags: Vec<(Key, TagValue)>,
    pub body: BodyBuilder,
    /// Mask of indexed-key bits this feature's tags set (spec §4.5); the
    /// caller computes this against the store's `IndexedKeys` table, since
    /// the builder has no store reference of its own.
    pub index_bits: u32,
}

impl FeatureBuilder {
    pub fn node(id: u64, bbox: Bbox, tags: Vec<(Key, TagValue)>, index_bits: u32) -> Self {
        FeatureBuilder { id, feature_type: FeatureType::Node, flags: 0, bbox, tags, body: BodyBuilder::None, index_bits }
    }
}

#[derive(Default)]
pub struct TileBuilder {
    features: Vec<FeatureBuilder>,
}

impl TileBuilder {
    pub fn new() -> Self {
        TileBuilder::default()
    }

    pub fn add(&mut self, feature: FeatureBuilder) -> &mut Self {
        self.features.push(feature);
        self
    }

    /// Lays out every feature body + tag table + fixed header, then the four
    /// per-type spatial indexes, then writes the tile header pointing at
    /// them. `branch_factor` is the store's configured spatial-index fan-out
    /// (spec §4.2 `StoreSettings::rtree_branch_factor`).
    pub fn build(&self, branch_factor: u32) -> Vec<u8> {
        use crate::tile::feature_ptr::FLAG_AREA;

        let mut buf = vec![0u8; crate::tile::TilePtr::HEADER_SIZE];
        let mut node_entries = Vec::new();
        let mut way_entries = Vec::new();
        let mut area_entries = Vec::new();
        let mut relation_entries = Vec::new();

        for f in &self.features {
            let body_offset = match &f.body {
                BodyBuilder::None => None,
                BodyBuilder::Way { points, feature_nodes, parent_relations } => {
                    let bytes = encode_way_body(points, feature_nodes, parent_relations);
                    let off = buf.len() as u32;
                    buf.extend_from_slice(&bytes);
                    Some(off)
                }
                BodyBuilder::Relation { members } => {
                    let bytes = encode_relation_body(members);
                    let off = buf.len() as u32;
                    buf.extend_from_slice(&bytes);
                    Some(off)
                }
            };
            let tag_table_offset = if f.tags.is_empty() {
                None
            } else {
                let bytes = encode_tag_table(&f.tags);
                let off = buf.len() as u32;
                buf.extend_from_slice(&bytes);
                Some(off)
            };

            let header_offset = buf.len() as u32;
            buf.resize(buf.len() + FEATURE_HEADER_SIZE, 0);
            write_feature_header(
                &mut buf,
                header_offset as usize,
                f.id,
                f.feature_type,
                f.flags,
                f.bbox,
                body_offset,
                tag_table_offset,
            );

            let entry = IndexEntry { bbox: f.bbox, index_bits: f.index_bits, local_handle: header_offset };
            match f.feature_type {
                FeatureType::Node => node_entries.push(entry.clone()),
                FeatureType::Way => way_entries.push(entry.clone()),
                FeatureType::Relation => relation_entries.push(entry.clone()),
            }
            if f.flags & FLAG_AREA != 0 {
                area_entries.push(entry);
            }
        }

        sort_by_morton(&mut node_entries);
        sort_by_morton(&mut way_entries);
        sort_by_morton(&mut area_entries);
        sort_by_morton(&mut relation_entries);

        let mut header_offsets = [u32::MAX; 4];
        for (slot, entries) in [
            (0usize, &node_entries),
            (1, &way_entries),
            (2, &area_entries),
            (3, &relation_entries),
        ] {
            if !entries.is_empty() {
                header_offsets[slot] = buf.len() as u32;
                buf.extend_from_slice(&encode_spatial_index(entries, branch_factor));
            }
        }

        for (i, off) in header_offsets.iter().enumerate() {
            buf[i * 4..i * 4 + 4].copy_from_slice(&off.to_le_bytes());
        }
        buf
    }
}

/// Sorts entries by a Morton (Z-order) key of their bbox center so spatially
/// close features land in the same fixed-size group (spec §4.5's pruning
/// only helps if group bboxes are tight).
fn sort_by_morton(entries: &mut [IndexEntry]) {
    entries.sort_by_key(|e| {
        let (cx, cy) = e.bbox.center();
        morton_key(to_u32(cx), to_u32(cy))
    });
}

fn to_u32(v: i32) -> u32 {
    (v as u32) ^ 0x8000_0000
}

fn morton_key(x: u32, y: u32) -> u64 {
    fn spread(v: u32) -> u64 {
        let mut v = v as u64;
        v = (v | (v << 16)) & 0x0000_FFFF_0000_FFFF;
        v = (v | (v << 8)) & 0x00FF_00FF_00FF_00FF;
        v = (v | (v << 4)) & 0x0F0F_0F0F_0F0F_0F0F;
        v = (v | (v << 2)) & 0x3333_3333_3333_3333;
        v = (v | (v << 1)) & 0x5555_5555_5555_5555;
        v
    }
    spread(x) | (spread(y) << 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_store::string_table::StringTable;
    use crate::feature_type::FeatureIndexType;
    use crate::tile::TilePtr;

    #[test]
    fn builds_a_queryable_tile_with_a_tagged_node() {
        let strings = StringTable::from_strings(vec!["amenity".into(), "cafe".into()]);
        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder::node(
            1,
            Bbox::new(10, 10, 10, 10),
            vec![(Key::resolve(&strings, "amenity"), TagValue::Str(crate::tag::StrRef::Global(1)))],
            0,
        ));
        let bytes = builder.build(8);

        let tile = TilePtr::at(&bytes).unwrap();
        let index = tile.index(FeatureIndexType::Node).unwrap();
        let hits = index.query(&Bbox::new(0, 0, 20, 20), 0);
        assert_eq!(hits.len(), 1);

        let feature = tile.feature_at(hits[0]);
        assert_eq!(feature.id(), 1);
        assert_eq!(feature.feature_type(), FeatureType::Node);
        let tags = feature.tags().unwrap();
        let amenity_key = Key::resolve(&strings, "amenity");
        assert_eq!(tags.get(&amenity_key), Some(TagValue::Str(crate::tag::StrRef::Global(1))));
    }

    #[test]
    fn way_feature_round_trips_geometry_through_the_tile() {
        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder {
            id: 2,
            feature_type: FeatureType::Way,
            flags: 0,
            bbox: Bbox::new(0, 0, 100, 100),
            tags: vec![],
            body: BodyBuilder::Way { points: vec![(0, 0), (100, 100)], feature_nodes: vec![], parent_relations: vec![] },
            index_bits: 0,
        });
        let bytes = builder.build(8);
        let tile = TilePtr::at(&bytes).unwrap();
        let index = tile.index(FeatureIndexType::Way).unwrap();
        let hits = index.query(&Bbox::new(0, 0, 100, 100), 0);
        assert_eq!(hits.len(), 1);
        let feature = tile.feature_at(hits[0]);
        let way = tile.way_at(feature.body_offset().unwrap());
        let points = way.to_vec().unwrap();
        assert_eq!(points, vec![(0, 0), (100, 100)]);
    }
}
