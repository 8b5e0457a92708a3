//! Write path / updater: `setup`, `putTile`, `begin`/`commit` over a
//! [`FeatureStore`] (spec §4.8).
//!
//! An [`Updater`] wraps one [`crate::blob_store::Transaction`] plus working
//! copies of the tile index, string table, indexed-key table and settings.
//! `put_tile` stages a tile blob immediately (allocation is never
//! journaled -- an orphaned blob left by a crash before commit is just
//! wasted space, not corruption, per `blob_store`'s own design note);
//! `commit` writes the working copies out as fresh blobs and then drives
//! `blob_store::Transaction::commit`, which performs the Journal/Seal/
//! Apply/Truncate steps of spec §4.1 in one call. The caller's own
//! `FeatureStore` handle does not see the new data until it calls
//! [`FeatureStore::refresh`] -- this port's answer to spec §4.8's
//! `Idle -> Open -> Staged -> Journaled -> Sealed -> Applied -> Idle`
//! state machine, collapsed into "not yet committed" / "committed".

use log::{debug, warn};

use crate::blob_store::{BlobKind, BlobPrefix};
use crate::error::Result;
use crate::feature_store::indexed_keys::IndexedKeys;
use crate::feature_store::settings::StoreSettings;
use crate::feature_store::string_table::StringTable;
use crate::feature_store::tile_index::{Tip, TileIndex, TileIndexEntry, TileStatus};
use crate::feature_store::FeatureStore;

/// A write transaction over a [`FeatureStore`] (spec §4.8). Dropping an
/// `Updater` without calling [`Updater::commit`] discards every staged
/// change; the blobs `put_tile` already wrote become orphaned pages, not
/// corruption (same reasoning as `blob_store::Transaction::rollback`).
pub struct Updater<'a> {
    store: &'a FeatureStore,
    txn: crate::blob_store::Transaction<'a>,
    string_table: StringTable,
    indexed_keys: IndexedKeys,
    settings: StoreSettings,
    tile_index: TileIndex,
    committed: bool,
}

impl<'a> Updater<'a> {
    pub(crate) fn begin(store: &'a FeatureStore) -> Result<Self> {
        let txn = store.blobs().begin_transaction()?;
        Ok(Updater {
            store,
            txn,
            string_table: store.string_table().clone(),
            indexed_keys: store.indexed_keys().clone(),
            settings: store.settings().clone(),
            tile_index: store.tile_index().clone(),
            committed: false,
        })
    }

    /// Replaces this transaction's working metadata wholesale (spec §4.8
    /// `setup(metadata, tileIndex)` -- initial population of a freshly
    /// created store, or a full rebuild).
    pub fn setup(&mut self, string_table: StringTable, indexed_keys: IndexedKeys, settings: StoreSettings, tile_index: TileIndex) {
        self.string_table = string_table;
        self.indexed_keys = indexed_keys;
        self.settings = settings;
        self.tile_index = tile_index;
    }

    /// Replace or create one tile (spec §4.8 `putTile`): allocates a fresh
    /// blob, points the tile index entry at it, and frees the blob the
    /// entry previously pointed at (if any). `keep_previous_for_delta`
    /// selects `CURRENT_WITH_MODIFIED` over `CURRENT` for callers that want
    /// the prior tile contents retained for a delta consumer (spec §4.2;
    /// both statuses are queryable -- see `TileStatus::is_queryable`).
    pub fn put_tile(&mut self, tip: Tip, bytes: &[u8], keep_previous_for_delta: bool) -> Result<()> {
        let page = self.txn.alloc_blob(BlobKind::Tile, bytes)?;
        if let Some(old) = self.tile_index.get(tip) {
            if old.status.is_queryable() {
                self.free_blob_at(old.page)?;
            }
        }
        let status = if keep_previous_for_delta { TileStatus::CurrentWithModified } else { TileStatus::Current };
        self.tile_index.insert(tip, TileIndexEntry { page, status });
        Ok(())
    }

    fn free_blob_at(&self, page: u32) -> Result<()> {
        let blob = self.store.blobs().read_blob(page)?;
        let prefix = BlobPrefix { payload_size: blob.as_bytes().len() as u32, kind: BlobKind::Tile };
        let pages = prefix.blob_pages(self.store.blobs().page_size());
        self.txn.free_blob(page, pages)
    }

    /// Current size of the working tile index -- useful for a caller
    /// driving a multi-tile import to report progress without peeking at
    /// private fields.
    pub fn tile_count(&self) -> usize {
        self.tile_index.len()
    }

    /// Journals and applies the accumulated changes (spec §4.8
    /// `commit(final)`, driving §4.1's Stage..Truncate protocol).
    /// `final_commit` bumps the store's revision counter; pass `false` to
    /// persist an intermediate checkpoint of a multi-tile import while
    /// keeping the same logical transaction semantics open for later tiles
    /// in the same `Updater`.
    pub fn commit(mut self, final_commit: bool) -> Result<()> {
        let tile_index_page = self.txn.alloc_blob(BlobKind::TileIndex, &self.tile_index.serialize())?;
        let string_table_page = self.txn.alloc_blob(BlobKind::StringTable, &self.string_table.serialize())?;
        let indexed_keys_page = self.txn.alloc_blob(BlobKind::IndexedKeyTable, &self.indexed_keys.serialize())?;
        let properties_page = self.txn.alloc_blob(BlobKind::Properties, self.settings.serialize().as_bytes())?;

        self.txn.set_tile_index_root(tile_index_page);
        self.txn.set_string_table_blob_ref(string_table_page);
        self.txn.set_indexed_keys_blob_ref(indexed_keys_page);
        self.txn.set_properties_blob_ref(properties_page);

        self.committed = true;
        debug!("updater committing {} tiles (final={})", self.tile_index.len(), final_commit);
        self.txn.commit(final_commit)
    }

    /// Discards this transaction; equivalent to dropping it, spelled out
    /// for callers that want the intent visible at the call site.
    pub fn rollback(self) {
        drop(self);
    }
}

impl Drop for Updater<'_> {
    fn drop(&mut self) {
        if !self.committed {
            warn!("updater dropped without commit; staged tile blobs are now orphaned pages");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob_store::OpenMode;
    use crate::tile::builder::{FeatureBuilder, TileBuilder};

    #[test]
    fn put_tile_then_commit_is_visible_after_refresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update.gol");
        let mut store = FeatureStore::open(&path, OpenMode::ReadWrite).unwrap();
        assert_eq!(store.tile_index().len(), 0);

        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder::node(1, crate::bbox::Bbox::new(0, 0, 0, 0), vec![], 0));
        let tile_bytes = builder.build(8);

        {
            let mut updater = store.begin_update().unwrap();
            updater.put_tile(Tip::new(0, 0, 0), &tile_bytes, false).unwrap();
            updater.commit(true).unwrap();
        }

        assert_eq!(store.tile_index().len(), 0, "stale cache before refresh");
        store.refresh().unwrap();
        assert_eq!(store.tile_index().len(), 1);
        assert_eq!(store.revision(), 1);
    }

    #[test]
    fn replacing_a_tile_frees_its_previous_blob() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update2.gol");
        let store = FeatureStore::open(&path, OpenMode::ReadWrite).unwrap();
        let tip = Tip::new(0, 0, 0);

        let small = TileBuilder::new().build(8);
        {
            let mut updater = store.begin_update().unwrap();
            updater.put_tile(tip, &small, false).unwrap();
            updater.commit(true).unwrap();
        }

        let mut builder = TileBuilder::new();
        builder.add(FeatureBuilder::node(1, crate::bbox::Bbox::new(0, 0, 0, 0), vec![], 0));
        let bigger = builder.build(8);
        {
            let mut updater = store.begin_update().unwrap();
            updater.put_tile(tip, &bigger, false).unwrap();
            updater.commit(true).unwrap();
        }
        // No assertion on free-list internals here (private to blob_store);
        // this test exists to exercise the free-on-replace path without
        // panicking on a double-allocated/overlapping page range.
    }

    #[test]
    fn dropping_without_commit_leaves_store_revision_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("update3.gol");
        let store = FeatureStore::open(&path, OpenMode::ReadWrite).unwrap();
        {
            let mut updater = store.begin_update().unwrap();
            updater.put_tile(Tip::new(0, 0, 0), &TileBuilder::new().build(8), false).unwrap();
            // dropped here without commit
        }
        assert_eq!(store.revision(), 0);
    }
}
