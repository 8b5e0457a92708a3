//! `FeatureStore`: the [`crate::blob_store::BlobStore`] specialization that
//! understands GOL semantics -- GUID, revision, tile index, global string
//! table, indexed-key table, settings (spec §4.2).

pub mod indexed_keys;
pub mod key;
pub mod settings;
pub mod string_table;
pub mod tile_index;
pub mod zoom_levels;

use std::path::Path;
use std::sync::{Arc, Mutex};

use ahash::AHashMap;
use log::debug;

use crate::blob_store::{BlobKind, BlobStore, BlobView, OpenMode};
use crate::error::{GeodeskError, Result};
use crate::matcher::Matcher;

pub use indexed_keys::IndexedKeys;
pub use key::{GlobalStrings, Key};
pub use settings::{QueryConfig, StoreSettings};
pub use string_table::StringTable;
pub use tile_index::{Tip, TileIndex, TileIndexEntry, TileStatus};

/// The matcher cache: compiled matchers are immutable and reference-counted,
/// guarded by a short critical section (spec §5 "Shared-resource policy").
type MatcherCache = Mutex<AHashMap<String, Arc<Matcher>>>;

/// The metadata blobs a header points at, loaded together by both
/// [`FeatureStore::open`] and [`FeatureStore::refresh`] so the two stay in
/// lock-step.
struct StoreMetadata {
    string_table: StringTable,
    indexed_keys: IndexedKeys,
    settings: StoreSettings,
    tile_index: TileIndex,
}

impl StoreMetadata {
    fn load(blobs: &BlobStore) -> Result<Self> {
        let header = blobs.header();

        let string_table = if header.string_table_blob_ref == crate::blob_store::NULL_PAGE {
            StringTable::from_strings(Vec::new())
        } else {
            let blob = blobs.read_blob(header.string_table_blob_ref)?;
            StringTable::deserialize(blob.as_bytes())?
        };

        let indexed_keys = if header.indexed_keys_blob_ref == crate::blob_store::NULL_PAGE {
            IndexedKeys::new(Vec::new())
        } else {
            let blob = blobs.read_blob(header.indexed_keys_blob_ref)?;
            IndexedKeys::deserialize(blob.as_bytes())?
        };

        let settings = if header.properties_blob_ref == crate::blob_store::NULL_PAGE {
            StoreSettings::default()
        } else {
            let blob = blobs.read_blob(header.properties_blob_ref)?;
            let text = std::str::from_utf8(blob.as_bytes())
                .map_err(|_| GeodeskError::corrupt(0, "properties blob is not valid UTF-8"))?;
            StoreSettings::parse(text)?
        };

        let tile_index = if header.tile_index_root == crate::blob_store::NULL_PAGE {
            TileIndex::new(settings.zoom_levels.highest().unwrap_or(12))
        } else {
            let blob = blobs.read_blob(header.tile_index_root)?;
            TileIndex::deserialize(blob.as_bytes())?
        };

        Ok(StoreMetadata { string_table, indexed_keys, settings, tile_index })
    }
}

pub struct FeatureStore {
    blobs: BlobStore,
    guid: [u8; 16],
    string_table: StringTable,
    global_strings: GlobalStrings,
    indexed_keys: IndexedKeys,
    settings: StoreSettings,
    tile_index: TileIndex,
    matcher_cache: MatcherCache,
}

impl FeatureStore {
    /// Opens a single GOL file read-only -- the common embedding case
    /// (spec §4.2 `openSingle`). Returns an `Arc` because the query executor
    /// (spec §4.7) spawns background threads that outlive the call that
    /// started a query; every `Feature` and `Features` iterator holds this
    /// same `Arc` rather than a borrowed reference.
    pub fn open_single(path: impl AsRef<Path>) -> Result<Arc<Self>> {
        Ok(Arc::new(Self::open(path, OpenMode::ReadOnly)?))
    }

    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let blobs = BlobStore::open(path, mode)?;
        let metadata = StoreMetadata::load(&blobs)?;

        debug!(
            "feature store opened: {} tiles, {} interned strings, {} indexed keys",
            metadata.tile_index.len(),
            metadata.string_table.len(),
            metadata.indexed_keys.len()
        );

        Ok(FeatureStore {
            guid: blobs.header().guid,
            global_strings: GlobalStrings::resolve(&metadata.string_table),
            string_table: metadata.string_table,
            indexed_keys: metadata.indexed_keys,
            settings: metadata.settings,
            tile_index: metadata.tile_index,
            blobs,
            matcher_cache: Mutex::new(AHashMap::new()),
        })
    }

    /// Re-reads the tile index, string table, indexed-key table and
    /// settings from the blobs the current header points at -- the
    /// follow-up a caller makes after an [`crate::transaction::Updater`]
    /// commits through this same store handle, since the metadata cached
    /// at [`FeatureStore::open`] does not update itself (spec §4.8 "the
    /// updater rebuilds them under a writer lock that excludes other
    /// writers but not readers").
    pub fn refresh(&mut self) -> Result<()> {
        let metadata = StoreMetadata::load(&self.blobs)?;
        self.guid = self.blobs.header().guid;
        self.global_strings = GlobalStrings::resolve(&metadata.string_table);
        self.string_table = metadata.string_table;
        self.indexed_keys = metadata.indexed_keys;
        self.settings = metadata.settings;
        self.tile_index = metadata.tile_index;
        self.matcher_cache.lock().unwrap().clear();
        debug!("feature store refreshed to revision {}", self.blobs.header().revision);
        Ok(())
    }

    /// Begins a write transaction over this store (spec §4.8 `begin()`).
    pub fn begin_update(&self) -> Result<crate::transaction::Updater<'_>> {
        crate::transaction::Updater::begin(self)
    }

    pub fn guid(&self) -> [u8; 16] {
        self.guid
    }

    pub fn revision(&self) -> u32 {
        self.blobs.header().revision
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }

    pub fn string_table(&self) -> &StringTable {
        &self.string_table
    }

    pub fn global_strings(&self) -> &GlobalStrings {
        &self.global_strings
    }

    pub fn indexed_keys(&self) -> &IndexedKeys {
        &self.indexed_keys
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    pub fn tile_index(&self) -> &TileIndex {
        &self.tile_index
    }

    pub fn get_global_string(&self, code: u32) -> Option<&str> {
        self.string_table.get(code)
    }

    /// Resolves a string to a [`Key`], interning it against this store's
    /// global string table if possible (SPEC_FULL.md §B.1). `Key`s are
    /// only valid for the store that produced them (spec §3.1 invariant).
    pub fn lookup_key(&self, s: &str) -> Key {
        Key::resolve(&self.string_table, s)
    }

    pub fn read_tile_blob(&self, tip: Tip) -> Result<Option<BlobView>> {
        match self.tile_index.get(tip) {
            Some(entry) if entry.status.is_queryable() => {
                Ok(Some(self.blobs.read_blob(entry.page)?))
            }
            _ => Ok(None),
        }
    }

    /// A matcher that accepts every feature of any type, used by
    /// `Features(path)` before any tag-expression refinement is applied
    /// (spec §4.2 `borrowAllMatcher`).
    pub fn borrow_all_matcher(&self) -> Arc<Matcher> {
        self.get_matcher("*").expect("'*' always compiles")
    }

    /// Compiles (or returns the cached compilation of) a tag-expression
    /// matcher (spec §4.2 `getMatcher`).
    pub fn get_matcher(&self, expr: &str) -> Result<Arc<Matcher>> {
        {
            let cache = self.matcher_cache.lock().unwrap();
            if let Some(m) = cache.get(expr) {
                return Ok(m.clone());
            }
        }
        let compiled = Arc::new(crate::matcher::compile(expr, &self.string_table, &self.indexed_keys)?);
        self.matcher_cache
            .lock()
            .unwrap()
            .insert(expr.to_string(), compiled.clone());
        Ok(compiled)
    }

    /// Entry point for querying this store (spec §6 `Features(path)`, §4.7).
    /// `path` is a tag-expression matcher source; `"*"` accepts every type.
    pub fn features(self: &Arc<Self>, path: &str) -> Result<crate::features::Features> {
        crate::features::Features::new(self.clone(), path)
    }
}
