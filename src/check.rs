//! `Checker`: a read-only consistency scan over a [`FeatureStore`]
//! (SPEC_FULL.md §B.9, grounded on `include/clarisma/validate/Checker.h`).
//!
//! Unlike every other entry point in this crate, a check never fails with
//! `Err` for a soft issue -- it collects [`Warning`]s and keeps going, the
//! same way the original `Checker` accumulates `Error` records of varying
//! `Severity` rather than aborting at the first one. Only a genuinely
//! unreadable store (a tile blob whose bytes don't even parse as a tile)
//! stops the scan outright, since nothing past that point can be trusted.

use log::warn;

use crate::bbox::Bbox;
use crate::error::Result;
use crate::feature_store::indexed_keys::MAX_INDEXED_KEYS;
use crate::feature_store::tile_index::TileStatus;
use crate::feature_store::FeatureStore;
use crate::feature_type::FeatureIndexType;
use crate::tile::TilePtr;

/// Severity of one [`Warning`], ordered least to most serious -- matching
/// `Checker::Error::Severity` (`INFO`, `WARNING`, `NONFATAL_ERROR`, `FATAL`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    NonfatalError,
    Fatal,
}

/// One finding from a [`Checker`] run. `location` is a loose, human-aimed
/// locator (a tile's TIP packed as `u64`, or a feature id) rather than a
/// byte offset -- a check walks already-decoded structures, not raw bytes.
#[derive(Debug, Clone)]
pub struct Warning {
    pub location: u64,
    pub severity: Severity,
    pub message: String,
}

/// Runs and accumulates a consistency scan over a store (spec §B.9
/// `FeatureStore::check()`).
#[derive(Default)]
pub struct Checker {
    warnings: Vec<Warning>,
}

impl Checker {
    pub fn new() -> Self {
        Checker::default()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    pub fn into_warnings(self) -> Vec<Warning> {
        self.warnings
    }

    fn push(&mut self, location: u64, severity: Severity, message: impl Into<String>) {
        let message = message.into();
        warn!("check: {:?} at {}: {}", severity, location, message);
        self.warnings.push(Warning { location, severity, message });
    }

    /// Walks the store's tile index and every reachable tile, validating:
    /// - the indexed-key table fits within `MAX_INDEXED_KEYS`;
    /// - every queryable tile's payload parses as a well-formed `TilePtr`;
    /// - every feature entry's bbox lies within its tile's nominal bbox
    ///   (the tile-position-derived bbox from `Tip::bbox`), since a feature
    ///   that straddles its tile boundary should have been split or flagged,
    ///   not silently left oversized;
    /// - every area-index entry is also present under its base-type index,
    ///   matching the "AREA features are duplicated across two indexes"
    ///   invariant the tile builder and query executor both rely on.
    pub fn check(store: &FeatureStore) -> Self {
        let mut checker = Checker::new();

        if store.indexed_keys().len() > MAX_INDEXED_KEYS {
            checker.push(
                0,
                Severity::NonfatalError,
                format!("indexed-key table has {} entries, more than the {} bit budget", store.indexed_keys().len(), MAX_INDEXED_KEYS),
            );
        }

        for (tip, entry) in store.tile_index().iter() {
            if !entry.status.is_queryable() {
                if entry.status == TileStatus::MissingOrStale {
                    checker.push(u64::from(tip.0), Severity::Info, "tile marked missing or stale");
                }
                continue;
            }

            let tile = match store.read_tile_blob(tip) {
                Ok(Some(tile)) => tile,
                Ok(None) => {
                    checker.push(u64::from(tip.0), Severity::NonfatalError, "tile index entry has no backing blob");
                    continue;
                }
                Err(e) => {
                    checker.push(u64::from(tip.0), Severity::Fatal, format!("failed to read tile blob: {e}"));
                    continue;
                }
            };
            let ptr = match TilePtr::at(tile.as_bytes()) {
                Ok(ptr) => ptr,
                Err(e) => {
                    checker.push(u64::from(tip.0), Severity::Fatal, format!("tile payload does not parse: {e}"));
                    continue;
                }
            };

            checker.check_tile(tip.0, tip.bbox(), &ptr);
        }

        checker
    }

    fn check_tile(&mut self, tip_code: u32, tile_bbox: Bbox, ptr: &TilePtr<'_>) {
        let mut base_type_handles = std::collections::HashSet::new();

        for index_type in [FeatureIndexType::Node, FeatureIndexType::Way, FeatureIndexType::Relation] {
            let Some(index) = ptr.index(index_type) else { continue };
            for (bbox, _bits, handle) in index.iter_all() {
                base_type_handles.insert(handle);
                self.check_feature_bbox(tip_code, handle, bbox, tile_bbox, ptr);
            }
        }

        if let Some(area_index) = ptr.index(FeatureIndexType::Area) {
            for (bbox, _bits, handle) in area_index.iter_all() {
                self.check_feature_bbox(tip_code, handle, bbox, tile_bbox, ptr);
                if !base_type_handles.contains(&handle) {
                    self.push(
                        u64::from(tip_code),
                        Severity::NonfatalError,
                        format!("area index entry at handle {handle} has no matching base-type index entry"),
                    );
                }
            }
        }
    }

    fn check_feature_bbox(&mut self, tip_code: u32, handle: u32, index_bbox: Bbox, tile_bbox: Bbox, ptr: &TilePtr<'_>) {
        let feature = ptr.feature_at(handle);
        let feature_bbox = feature.bbox();
        if feature_bbox != index_bbox {
            self.push(
                u64::from(tip_code),
                Severity::Warning,
                format!("feature {} index bbox does not match its own recorded bbox", feature.id()),
            );
        }
        // A multi-tile way/relation intentionally straddles a tile boundary
        // (spec glossary "multi-tile way"); only flag a feature whose bbox
        // falls entirely outside the tile, which cannot be explained that way.
        if !feature_bbox.intersects(&tile_bbox) {
            self.push(
                u64::from(tip_code),
                Severity::NonfatalError,
                format!("feature {} bbox does not overlap its own tile at all", feature.id()),
            );
        }
    }
}

/// Convenience entry point matching spec wording `store.check()`.
pub fn check(store: &FeatureStore) -> Result<Vec<Warning>> {
    Ok(Checker::check(store).into_warnings())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::OpenMode;
    use crate::feature_store::tile_index::Tip;
    use crate::tile::builder::{FeatureBuilder, TileBuilder};
    use crate::transaction::Updater;

    #[test]
    fn a_well_formed_tile_produces_no_warnings_above_info() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check.gol");
        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder::node(1, Bbox::new(0, 0, 0, 0), vec![], 0));
        let tile_bytes = builder.build(8);

        let store = FeatureStore::open(&path, OpenMode::ReadWrite).unwrap();
        let mut updater = Updater::begin(&store).unwrap();
        updater.put_tile(Tip::new(0, 0, 0), &tile_bytes, false).unwrap();
        updater.commit(true).unwrap();
        drop(updater);

        let mut store = store;
        store.refresh().unwrap();

        let warnings = Checker::check(&store).into_warnings();
        assert!(warnings.iter().all(|w| w.severity <= Severity::Info), "unexpected warnings: {warnings:?}");
    }

    #[test]
    fn a_feature_entirely_outside_its_tile_is_flagged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("check2.gol");
        // Place a node far outside tile (0,0) at zoom 4's bbox.
        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder::node(1, Bbox::new(i32::MAX - 10, i32::MAX - 10, i32::MAX - 10, i32::MAX - 10), vec![], 0));
        let tile_bytes = builder.build(8);

        let store = FeatureStore::open(&path, OpenMode::ReadWrite).unwrap();
        let mut updater = Updater::begin(&store).unwrap();
        updater.put_tile(Tip::new(4, 0, 0), &tile_bytes, false).unwrap();
        updater.commit(true).unwrap();
        drop(updater);

        let mut store = store;
        store.refresh().unwrap();

        let warnings = Checker::check(&store).into_warnings();
        assert!(warnings.iter().any(|w| w.severity == Severity::NonfatalError));
    }
}
