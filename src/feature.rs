//! `Feature`: one decoded node/way/relation, resolved from a tile blob and
//! held independently of any particular query (spec §6 "feature.id(),
//! typeName(), bbox(), geometry accessors").
//!
//! A `Feature` owns a [`BlobView`] rather than borrowing a `TilePtr`
//! directly, so it can be collected into a `Vec`, sent across threads, or
//! outlive the query that produced it -- exactly the "bounded view... not a
//! raw pointer" guidance of spec §9, adapted to Rust's ownership model
//! instead of a lifetime-tied borrow.

use std::collections::HashSet;
use std::sync::Arc;

use geo::{LineString, MultiPolygon, Point, Polygon};

use crate::blob_store::BlobView;
use crate::codec::mercator::{x_to_lon, y_to_lat};
use crate::error::{GeodeskError, Result};
use crate::feature_store::tile_index::Tip;
use crate::feature_store::FeatureStore;
use crate::feature_type::FeatureType;
use crate::filter::Geometry;
use crate::tag::TagValue;
use crate::tile::relation_table::{Member, MemberRole};
use crate::tile::{FeatureRef, TilePtr};

#[derive(Clone)]
pub struct Feature {
    store: Arc<FeatureStore>,
    tip: Tip,
    tile: BlobView,
    local_handle: u32,
}

impl Feature {
    pub(crate) fn new(store: Arc<FeatureStore>, tip: Tip, tile: BlobView, local_handle: u32) -> Self {
        Feature { store, tip, tile, local_handle }
    }

    fn tile_ptr(&self) -> TilePtr<'_> {
        // `tile`'s bytes were already validated as a well-formed tile payload
        // when this `Feature` was constructed from a query result.
        TilePtr::at(self.tile.as_bytes()).expect("Feature always wraps a validated tile payload")
    }

    pub fn store(&self) -> &Arc<FeatureStore> {
        &self.store
    }

    pub fn tip(&self) -> Tip {
        self.tip
    }

    pub fn id(&self) -> u64 {
        self.tile_ptr().feature_at(self.local_handle).id()
    }

    pub fn feature_type(&self) -> FeatureType {
        self.tile_ptr().feature_at(self.local_handle).feature_type()
    }

    pub fn type_name(&self) -> &'static str {
        self.feature_type().name()
    }

    pub fn is_area(&self) -> bool {
        self.tile_ptr().feature_at(self.local_handle).is_area()
    }

    pub fn is_relation_member(&self) -> bool {
        self.tile_ptr().feature_at(self.local_handle).is_relation_member()
    }

    pub fn bbox(&self) -> crate::bbox::Bbox {
        self.tile_ptr().feature_at(self.local_handle).bbox()
    }

    /// Looks up a single tag by key (spec §6 `feature[key] -> TagValue`).
    pub fn tag(&self, key: &str) -> Option<TagValue> {
        let key = self.store.lookup_key(key);
        self.tile_ptr().feature_at(self.local_handle).tags()?.get(&key)
    }

    /// Every `(key, value)` pair on this feature, in on-disk order
    /// (spec §4.3 "Tag iteration").
    pub fn tags(&self) -> Vec<(String, TagValue)> {
        match self.tile_ptr().feature_at(self.local_handle).tags() {
            Some(table) => table.iter(self.store.string_table()).collect(),
            None => Vec::new(),
        }
    }

    /// Decoded geometry in geographic (lon, lat) coordinates, or `None` for
    /// a relation that is not an area (a member collection has no single
    /// shape -- spec §1 "no GIS engine").
    pub fn geometry(&self) -> Option<Geometry> {
        let ptr = self.tile_ptr();
        let feature = ptr.feature_at(self.local_handle);
        match feature.feature_type() {
            FeatureType::Node => {
                let bbox = feature.bbox();
                Some(Geometry::Point(Point::new(x_to_lon(bbox.min_x), y_to_lat(bbox.min_y))))
            }
            FeatureType::Way => {
                let body_offset = feature.body_offset()?;
                let way = ptr.way_at(body_offset);
                let points: Vec<(i32, i32)> = way.to_vec().ok()?;
                let coords: Vec<_> = points.iter().map(|&(x, y)| geo::coord! { x: x_to_lon(x), y: y_to_lat(y) }).collect();
                if feature.is_area() && coords.len() >= 3 {
                    Some(Geometry::Polygon(Polygon::new(LineString(coords), vec![])))
                } else {
                    Some(Geometry::LineString(LineString(coords)))
                }
            }
            FeatureType::Relation => {
                if !feature.is_area() {
                    return None;
                }
                // `area_members` already recurses through nested
                // boundary/multipolygon relations (guarded against member
                // cycles), so every resolved feature here is a way.
                let ways = self.area_members().ok()?;
                let mut polygons = Vec::new();
                for resolved in ways {
                    match resolved.geometry() {
                        Some(Geometry::Polygon(p)) => polygons.push(p),
                        Some(Geometry::LineString(l)) if l.0.len() >= 3 => polygons.push(Polygon::new(l, vec![])),
                        _ => {}
                    }
                }
                if polygons.is_empty() {
                    None
                } else {
                    Some(Geometry::MultiPolygon(MultiPolygon(polygons)))
                }
            }
        }
    }

    /// Resolves one [`FeatureRef`] -- local to this feature's tile, or in a
    /// neighboring tile -- to its [`Feature`].
    fn resolve_ref(&self, r: FeatureRef) -> Result<Feature> {
        match r {
            FeatureRef::Local(handle) => Ok(Feature::new(self.store.clone(), self.tip, self.tile.clone(), handle)),
            FeatureRef::Foreign(tip, handle) => {
                let tile = self
                    .store
                    .read_tile_blob(tip)?
                    .ok_or_else(|| GeodeskError::corrupt(0, format!("foreign feature ref points at missing tile {tip:?}")))?;
                Ok(Feature::new(self.store.clone(), tip, tile, handle))
            }
        }
    }

    /// Resolved `(member, feature)` pairs for a relation, or `(feature_node,
    /// feature)` pairs for a way (spec §6 `Features(feature)` "members").
    /// Each member's role is surfaced alongside the resolved feature;
    /// way feature-nodes carry the empty role (they aren't relation
    /// members).
    pub fn members(&self) -> Result<Vec<(MemberRole, Feature)>> {
        let ptr = self.tile_ptr();
        let feature = ptr.feature_at(self.local_handle);
        let Some(body_offset) = feature.body_offset() else {
            return Ok(Vec::new());
        };
        match feature.feature_type() {
            FeatureType::Way => {
                let way = ptr.way_at(body_offset);
                let mut out = Vec::new();
                for r in way.feature_nodes()? {
                    out.push((MemberRole::Empty, self.resolve_ref(r?)?));
                }
                Ok(out)
            }
            FeatureType::Relation => {
                let table = ptr.relation_at(body_offset);
                let mut out = Vec::new();
                for m in table.members()? {
                    let m: Member = m?;
                    out.push((m.role, self.resolve_ref(m.ref_)?));
                }
                Ok(out)
            }
            FeatureType::Node => Ok(Vec::new()),
        }
    }

    /// Members that are themselves areas, assembled for multipolygon
    /// geometry (SPEC_FULL.md §B.3 `AreaMemberIterator`). Empty for a
    /// non-multipolygon relation and for any other feature type. A member
    /// that is itself a relation (a nested boundary/multipolygon) is
    /// descended into recursively, so the result always contains only way
    /// features; a relation reachable from itself through such nesting
    /// raises [`GeodeskError::RecursionCycle`] instead of recursing forever
    /// (spec §7/§9 "Relation cycles").
    pub fn area_members(&self) -> Result<Vec<Feature>> {
        let mut guard = RecursionGuard::new();
        self.area_members_guarded(&mut guard)
    }

    fn area_members_guarded(&self, guard: &mut RecursionGuard) -> Result<Vec<Feature>> {
        let ptr = self.tile_ptr();
        let feature = ptr.feature_at(self.local_handle);
        let FeatureType::Relation = feature.feature_type() else {
            return Ok(Vec::new());
        };
        if !feature.is_area() {
            // Not flagged as a multipolygon/boundary relation at build time
            // (spec §8 S3: "AreaMemberIterator on a non-multipolygon
            // relation returns []"); mirrors the same gate `geometry()`
            // applies before assembling polygons from this table.
            return Ok(Vec::new());
        }
        let Some(body_offset) = feature.body_offset() else {
            return Ok(Vec::new());
        };
        let id = feature.id();
        guard.enter(FeatureType::Relation, id)?;
        let table = ptr.relation_at(body_offset);
        let mut out = Vec::new();
        for m in table.area_members()? {
            let m = m?;
            let resolved = self.resolve_ref(m.ref_)?;
            if m.member_type == FeatureType::Relation {
                out.extend(resolved.area_members_guarded(guard)?);
            } else {
                out.push(resolved);
            }
        }
        guard.leave(FeatureType::Relation, id);
        Ok(out)
    }

    /// Parent relations this feature is a member of (SPEC_FULL.md §B.4
    /// `ParentRelationIterator`). A node's body, when present, *is* its
    /// parent-relation table; a way carries one past its geometry (see
    /// [`crate::tile::way::WayPtr::parent_relations`]); relation-in-relation
    /// parent tracking is out of scope for this port (spec §1 "no topology
    /// repair" -- nested multipolygon/boundary relations are rare and this
    /// port treats them as has no recorded parent).
    pub fn parents(&self) -> Result<Vec<Feature>> {
        let ptr = self.tile_ptr();
        let feature = ptr.feature_at(self.local_handle);
        let members: Vec<Member> = match feature.feature_type() {
            FeatureType::Node => match feature.body_offset() {
                Some(off) => ptr.relation_at(off).members()?.collect::<Result<Vec<_>>>()?,
                None => Vec::new(),
            },
            FeatureType::Way => {
                let Some(off) = feature.body_offset() else {
                    return Ok(Vec::new());
                };
                ptr.way_at(off).parent_relations()?.collect::<Result<Vec<_>>>()?
            }
            FeatureType::Relation => Vec::new(),
        };
        members.into_iter().map(|m| self.resolve_ref(m.ref_)).collect()
    }
}

/// Guards against revisiting a feature already on the current relation
/// traversal stack (spec §7 `RecursionCycle`, §9 "Relation cycles"); keyed
/// on `(feature_type, id)` since node/way/relation ids are only unique
/// within their own type. Threaded through [`Feature::area_members_guarded`]'s
/// recursive descent into nested boundary/multipolygon relations.
#[derive(Default)]
pub struct RecursionGuard {
    seen: HashSet<(FeatureType, u64)>,
}

impl RecursionGuard {
    pub fn new() -> Self {
        RecursionGuard::default()
    }

    /// Returns `Ok(())` and records the feature if it hasn't been seen on
    /// this traversal; returns `Err(RecursionCycle)` otherwise.
    pub fn enter(&mut self, feature_type: FeatureType, id: u64) -> Result<()> {
        if !self.seen.insert((feature_type, id)) {
            return Err(GeodeskError::RecursionCycle { feature_id: id });
        }
        Ok(())
    }

    pub fn leave(&mut self, feature_type: FeatureType, id: u64) {
        self.seen.remove(&(feature_type, id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::OpenMode;
    use crate::feature_store::key::Key;
    use crate::feature_store::string_table::StringTable;
    use crate::feature_store::tile_index::Tip;
    use crate::tag::StrRef;
    use crate::tile::builder::{BodyBuilder, FeatureBuilder, TileBuilder};
    use crate::tile::feature_ptr::FLAG_AREA;
    use crate::tile::relation_table::encode_relation_body;
    use crate::tile::way::encode_way_body;

    /// Writes `tile_bytes` as tile `(0, 0, 0)` of a fresh store and returns
    /// it re-opened read-only, the same way `query::tests` and
    /// `transaction::tests` build their fixtures.
    fn store_with_tile(strings: Vec<String>, tile_bytes: Vec<u8>) -> Arc<FeatureStore> {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("feature.gol");
        {
            let store = FeatureStore::open(&path, OpenMode::ReadWrite).unwrap();
            let mut updater = store.begin_update().unwrap();
            let string_table = StringTable::from_strings(strings);
            updater.setup(string_table, store.indexed_keys().clone(), store.settings().clone(), store.tile_index().clone());
            updater.put_tile(Tip::new(0, 0, 0), &tile_bytes, false).unwrap();
            updater.commit(true).unwrap();
        }
        std::mem::forget(dir);
        FeatureStore::open_single(&path).unwrap()
    }

    #[test]
    fn node_exposes_tags_and_point_geometry() {
        let strings = vec!["amenity".to_string(), "cafe".to_string()];
        let string_table = StringTable::from_strings(strings.clone());
        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder::node(
            1,
            crate::bbox::Bbox::new(5, 5, 5, 5),
            vec![(Key::resolve(&string_table, "amenity"), TagValue::Str(StrRef::Global(string_table.lookup("cafe").unwrap())))],
            0,
        ));
        let store = store_with_tile(strings, builder.build(8));

        let feature = store.features("n[amenity=cafe]").unwrap().one().unwrap().unwrap();
        assert_eq!(feature.id(), 1);
        assert_eq!(feature.type_name(), "node");
        assert_eq!(feature.tag("amenity"), Some(TagValue::Str(StrRef::Global(1))));
        assert!(matches!(feature.geometry(), Some(Geometry::Point(_))));
        assert!(feature.members().unwrap().is_empty());
        assert!(feature.area_members().unwrap().is_empty());
    }

    #[test]
    fn way_geometry_is_polygon_only_when_area_flagged() {
        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder {
            id: 10,
            feature_type: FeatureType::Way,
            flags: 0,
            bbox: crate::bbox::Bbox::new(0, 0, 10, 10),
            tags: vec![],
            body: BodyBuilder::Way { points: vec![(0, 0), (10, 0), (10, 10)], feature_nodes: vec![], parent_relations: vec![] },
            index_bits: 0,
        });
        builder.add(FeatureBuilder {
            id: 20,
            feature_type: FeatureType::Way,
            flags: FLAG_AREA,
            bbox: crate::bbox::Bbox::new(0, 0, 20, 20),
            tags: vec![],
            body: BodyBuilder::Way {
                points: vec![(0, 0), (20, 0), (20, 20), (0, 0)],
                feature_nodes: vec![],
                parent_relations: vec![],
            },
            index_bits: 0,
        });
        let store = store_with_tile(vec![], builder.build(8));

        // Two way-typed features exist (one plain, one area); `one()` would
        // error on more than one match, so fetch each by id instead.
        let all: Vec<Feature> = store.features("w").unwrap().iter().collect::<Result<Vec<_>>>().unwrap();
        let plain = all.iter().find(|f| f.id() == 10).unwrap();
        let area = all.iter().find(|f| f.id() == 20).unwrap();
        assert!(matches!(plain.geometry(), Some(Geometry::LineString(_))));
        assert!(matches!(area.geometry(), Some(Geometry::Polygon(_))));
    }

    #[test]
    fn relation_members_and_area_members_resolve_the_way() {
        // The way is the first feature added, so its local handle is fully
        // determined by the bytes its own body+tags occupy ahead of the
        // fixed-size feature header -- no round trip through a probe build
        // needed (see `tile::builder::TileBuilder::build`'s per-feature
        // layout: body, then tags, then header).
        let way_points = vec![(0, 0), (10, 0), (10, 10), (0, 0)];
        let way_body_len = encode_way_body(&way_points, &[], &[]).len();
        let way_handle = crate::tile::TilePtr::HEADER_SIZE as u32 + way_body_len as u32;

        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder {
            id: 10,
            feature_type: FeatureType::Way,
            flags: 0,
            bbox: crate::bbox::Bbox::new(0, 0, 10, 10),
            tags: vec![],
            body: BodyBuilder::Way { points: way_points, feature_nodes: vec![], parent_relations: vec![] },
            index_bits: 0,
        });
        builder.add(FeatureBuilder {
            id: 30,
            feature_type: FeatureType::Relation,
            flags: FLAG_AREA,
            bbox: crate::bbox::Bbox::new(0, 0, 10, 10),
            tags: vec![],
            body: BodyBuilder::Relation {
                members: vec![Member { member_type: FeatureType::Way, role: MemberRole::Outer, ref_: FeatureRef::Local(way_handle) }],
            },
            index_bits: 0,
        });
        let store = store_with_tile(vec![], builder.build(8));

        let relation = store.features("r").unwrap().one().unwrap().unwrap();
        assert_eq!(relation.feature_type(), FeatureType::Relation);

        let members = relation.members().unwrap();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].0, MemberRole::Outer);
        assert_eq!(members[0].1.id(), 10);

        let areas = relation.area_members().unwrap();
        assert_eq!(areas.len(), 1);
        assert_eq!(areas[0].id(), 10);

        match relation.geometry() {
            Some(Geometry::MultiPolygon(mp)) => assert_eq!(mp.0.len(), 1),
            other => panic!("expected a MultiPolygon assembled from the way member, got {other:?}"),
        }
    }

    #[test]
    fn way_and_node_parents_resolve_the_owning_relation() {
        // Relation is added first with an empty member list purely so its
        // handle is fixed and known ahead of time; its own membership isn't
        // under test here, only that a node/way can find it as a parent.
        let relation_body_len = encode_relation_body(&[]).len();
        let relation_handle = crate::tile::TilePtr::HEADER_SIZE as u32 + relation_body_len as u32;

        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder {
            id: 30,
            feature_type: FeatureType::Relation,
            flags: 0,
            bbox: crate::bbox::Bbox::new(0, 0, 0, 0),
            tags: vec![],
            body: BodyBuilder::Relation { members: vec![] },
            index_bits: 0,
        });
        builder.add(FeatureBuilder {
            id: 1,
            feature_type: FeatureType::Node,
            flags: 0,
            bbox: crate::bbox::Bbox::new(0, 0, 0, 0),
            tags: vec![],
            body: BodyBuilder::Relation {
                members: vec![Member { member_type: FeatureType::Relation, role: MemberRole::Empty, ref_: FeatureRef::Local(relation_handle) }],
            },
            index_bits: 0,
        });
        builder.add(FeatureBuilder {
            id: 10,
            feature_type: FeatureType::Way,
            flags: 0,
            bbox: crate::bbox::Bbox::new(0, 0, 10, 10),
            tags: vec![],
            body: BodyBuilder::Way {
                points: vec![(0, 0), (10, 10)],
                feature_nodes: vec![],
                parent_relations: vec![Member { member_type: FeatureType::Relation, role: MemberRole::Empty, ref_: FeatureRef::Local(relation_handle) }],
            },
            index_bits: 0,
        });
        let store = store_with_tile(vec![], builder.build(8));

        let node = store.features("n").unwrap().one().unwrap().unwrap();
        let node_parents = node.parents().unwrap();
        assert_eq!(node_parents.len(), 1);
        assert_eq!(node_parents[0].id(), 30);

        let way = store.features("w").unwrap().one().unwrap().unwrap();
        let way_parents = way.parents().unwrap();
        assert_eq!(way_parents.len(), 1);
        assert_eq!(way_parents[0].id(), 30);
    }

    #[test]
    fn recursion_guard_rejects_a_revisited_feature() {
        let mut guard = RecursionGuard::new();
        guard.enter(FeatureType::Relation, 30).unwrap();
        let err = guard.enter(FeatureType::Relation, 30).unwrap_err();
        assert!(matches!(err, GeodeskError::RecursionCycle { feature_id: 30 }));
        guard.leave(FeatureType::Relation, 30);
        assert!(guard.enter(FeatureType::Relation, 30).is_ok());
    }

    #[test]
    fn area_members_recurses_through_a_nested_boundary_relation() {
        // way(10) -- outer member of relation(40) -- itself a member of
        // relation(30). `area_members`/`geometry` on 30 must descend into
        // 40 and surface the way, not stop at the nested relation.
        let way_points = vec![(0, 0), (10, 0), (10, 10), (0, 0)];
        let way_body_len = encode_way_body(&way_points, &[], &[]).len();
        let way_handle = crate::tile::TilePtr::HEADER_SIZE as u32 + way_body_len as u32;

        let inner_members = vec![Member { member_type: FeatureType::Way, role: MemberRole::Outer, ref_: FeatureRef::Local(way_handle) }];
        let inner_body_len = encode_relation_body(&inner_members).len();
        let inner_handle = way_handle + crate::tile::feature_ptr::FEATURE_HEADER_SIZE as u32 + inner_body_len as u32;

        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder {
            id: 10,
            feature_type: FeatureType::Way,
            flags: 0,
            bbox: crate::bbox::Bbox::new(0, 0, 10, 10),
            tags: vec![],
            body: BodyBuilder::Way { points: way_points, feature_nodes: vec![], parent_relations: vec![] },
            index_bits: 0,
        });
        builder.add(FeatureBuilder {
            id: 40,
            feature_type: FeatureType::Relation,
            flags: FLAG_AREA,
            bbox: crate::bbox::Bbox::new(0, 0, 10, 10),
            tags: vec![],
            body: BodyBuilder::Relation { members: inner_members },
            index_bits: 0,
        });
        builder.add(FeatureBuilder {
            id: 30,
            feature_type: FeatureType::Relation,
            flags: FLAG_AREA,
            bbox: crate::bbox::Bbox::new(0, 0, 10, 10),
            tags: vec![],
            body: BodyBuilder::Relation {
                members: vec![Member { member_type: FeatureType::Relation, role: MemberRole::Outer, ref_: FeatureRef::Local(inner_handle) }],
            },
            index_bits: 0,
        });
        let store = store_with_tile(vec![], builder.build(8));

        let relations: Vec<Feature> = store.features("r").unwrap().iter().collect::<Result<Vec<_>>>().unwrap();
        let outer = relations.iter().find(|f| f.id() == 30).unwrap();

        let areas = outer.area_members().unwrap();
        assert_eq!(areas.len(), 1, "nested relation's own way should surface, flattened");
        assert_eq!(areas[0].id(), 10);
        assert_eq!(areas[0].feature_type(), FeatureType::Way);

        match outer.geometry() {
            Some(Geometry::MultiPolygon(mp)) => assert_eq!(mp.0.len(), 1),
            other => panic!("expected a MultiPolygon assembled through the nested relation, got {other:?}"),
        }
    }
}
