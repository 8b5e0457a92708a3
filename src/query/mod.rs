//! The query executor: translates a bbox + matcher (+ optional filter) into
//! a bounded fan-out across tiles and a submission-order streaming iterator
//! (spec §4.6–§4.7).
//!
//! One [`TileQueryTask`] runs per overlapping tile on a [`rayon`] thread
//! pool sized by [`QueryConfig::thread_pool_size`]; each task sends its
//! whole result batch down a private `mpsc` channel. [`QueryResults`] holds
//! one receiver per tile, in the same order [`TileIndex::tiles_overlapping`]
//! returned them, and only ever advances to the next receiver once the
//! current one is drained -- so results stream out in submission order
//! without ever buffering more than one tile's worth of features at a time
//! (spec §5 "result iteration order equals task submission order"). A
//! disconnected receiver (its sender dropped when the task returns) is this
//! port's stand-in for the original's explicit sequence-numbered terminal
//! marker.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};

use crate::bbox::Bbox;
use crate::error::{GeodeskError, Result};
use crate::feature::Feature;
use crate::feature_store::settings::QueryConfig;
use crate::feature_store::tile_index::Tip;
use crate::feature_store::FeatureStore;
use crate::feature_type::{FeatureIndexType, TypeBits};
use crate::filter::Filter;
use crate::matcher::Matcher;
use crate::tag::TagSource;
use crate::tile::tag_table::TagTablePtr;
use crate::tile::TilePtr;

impl<'a> TagSource for Option<TagTablePtr<'a>> {
    fn get(&self, key: &crate::feature_store::key::Key) -> Option<crate::tag::TagValue> {
        self.as_ref().and_then(|t| t.get(key))
    }
}

fn type_bits_for_index(t: FeatureIndexType) -> TypeBits {
    match t {
        FeatureIndexType::Node => TypeBits::NODE,
        FeatureIndexType::Way => TypeBits::WAY,
        FeatureIndexType::Area => TypeBits::AREA,
        FeatureIndexType::Relation => TypeBits::RELATION,
    }
}

/// One query, ready to [`Query::run`] (spec §4.7 `store.query(bbox, matcher,
/// filter)`).
pub struct Query {
    store: Arc<FeatureStore>,
    matcher: Arc<Matcher>,
    /// Additional matchers a feature must also satisfy (spec §6
    /// `Features(tagExpr)` refining an already-open feature set). The
    /// primary `matcher` still drives index-bits pruning; extra matchers
    /// are pure post-filters, since intersecting two matchers' pruning
    /// masks is not generally safe (a mask that's safe for one selector set
    /// can wrongly exclude a match the other selector set needs).
    extra_matchers: Vec<Arc<Matcher>>,
    bbox: Bbox,
    filter: Option<Filter>,
    config: QueryConfig,
}

impl Query {
    pub fn new(store: Arc<FeatureStore>, matcher: Arc<Matcher>, bbox: Bbox) -> Self {
        Query { store, matcher, extra_matchers: Vec::new(), bbox, filter: None, config: QueryConfig::default() }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    /// Refines this query with an additional tag-expression matcher that
    /// every result must also satisfy (spec §6 `Features(tagExpr)`).
    pub fn with_extra_matcher(mut self, matcher: Arc<Matcher>) -> Self {
        self.extra_matchers.push(matcher);
        self
    }

    /// Narrows this query's bbox to the intersection with `bbox` (spec §6
    /// `Features(bbox)`).
    pub fn with_bbox(mut self, bbox: Bbox) -> Self {
        self.bbox = self.bbox.intersection(&bbox);
        self
    }

    /// Submits one [`TileQueryTask`] per tile overlapping the query bbox to
    /// a bounded thread pool and returns a streaming, cancel-on-drop
    /// iterator over the results (spec §4.7 steps 1-3).
    pub fn run(self) -> QueryResults {
        let tiles = self.store.tile_index().tiles_overlapping(&self.bbox);
        let cancel = Arc::new(AtomicBool::new(false));

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.thread_pool_size.max(1))
            .build()
            .expect("thread pool with a positive thread count always builds");

        let mut receivers = VecDeque::with_capacity(tiles.len());
        for (tip, _entry) in tiles {
            let (tx, rx) = mpsc::channel();
            let task = TileQueryTask {
                store: self.store.clone(),
                matcher: self.matcher.clone(),
                extra_matchers: self.extra_matchers.clone(),
                bbox: self.bbox,
                filter: self.filter.clone(),
                tip,
                cancel: cancel.clone(),
            };
            pool.spawn(move || {
                let _ = tx.send(task.run());
            });
            receivers.push_back(rx);
        }

        QueryResults { receivers, current: VecDeque::new(), cancel, _pool: pool }
    }

    /// Runs the query and returns the single result, or `None` if it
    /// produced none (spec §4.7 `one()`: `TooManyResults` if more than one).
    pub fn one(self) -> Result<Option<Feature>> {
        let mut results = self.run();
        let first = match results.next() {
            None => return Ok(None),
            Some(r) => r?,
        };
        if results.next().is_some() {
            return Err(GeodeskError::TooManyResults);
        }
        Ok(Some(first))
    }

    /// Runs the query to completion, returning the count of results (spec
    /// §4.7 `count()`). A `Feature` is a handle into an already-mapped tile
    /// (no tag/geometry decoding), so this is not worth special-casing to
    /// skip feature construction -- it already does no extra work.
    pub fn count(self) -> Result<usize> {
        let mut n = 0usize;
        for r in self.run() {
            r?;
            n += 1;
        }
        Ok(n)
    }
}

/// The unit of work submitted to the query executor's thread pool: one
/// tile, scanned across its four per-type spatial indexes (spec §4.6).
struct TileQueryTask {
    store: Arc<FeatureStore>,
    matcher: Arc<Matcher>,
    extra_matchers: Vec<Arc<Matcher>>,
    bbox: Bbox,
    filter: Option<Filter>,
    tip: Tip,
    cancel: Arc<AtomicBool>,
}

impl TileQueryTask {
    fn run(&self) -> Vec<Result<Feature>> {
        if self.cancel.load(Ordering::Relaxed) {
            return Vec::new();
        }
        let tile = match self.store.read_tile_blob(self.tip) {
            Ok(Some(tile)) => tile,
            // Missing or stale: spec §7 "query skips the tile, no error".
            Ok(None) => return Vec::new(),
            Err(e) => return vec![Err(e)],
        };
        let ptr = match TilePtr::at(tile.as_bytes()) {
            Ok(ptr) => ptr,
            Err(e) => return vec![Err(e)],
        };

        // AREA-flagged features are duplicated across their base-type index
        // and the Area index by the tile builder, so the same local handle
        // can surface from two index traversals; dedup within this tile
        // keeps a `*` query from reporting one feature twice (spec §8 S1).
        let mut seen = std::collections::HashSet::new();
        let mut out = Vec::new();

        // An extra matcher's selectors weren't considered when the primary
        // matcher's index-bits masks were computed, so AND-ing those masks
        // together could prune a handle the extra matcher would still
        // accept. Skip index-bits pruning entirely once more than one
        // matcher applies and fall back to a full per-handle tag check.
        let multi_matcher = !self.extra_matchers.is_empty();

        for index_type in FeatureIndexType::ALL {
            if self.cancel.load(Ordering::Relaxed) {
                break;
            }
            let type_bits = type_bits_for_index(index_type);
            if !self.matcher.accepted_types().intersects(type_bits) {
                continue;
            }
            if self.extra_matchers.iter().any(|m| !m.accepted_types().intersects(type_bits)) {
                continue;
            }
            let Some(index) = ptr.index(index_type) else { continue };
            let mask = if multi_matcher { 0 } else { self.matcher.index_bits_for_types(type_bits) };
            for handle in index.query(&self.bbox, mask) {
                if !seen.insert(handle) {
                    continue;
                }
                let feature_ptr = ptr.feature_at(handle);
                let tags = feature_ptr.tags();
                if !self.matcher.accept(type_bits, &tags) {
                    continue;
                }
                if self.extra_matchers.iter().any(|m| !m.accept(type_bits, &tags)) {
                    continue;
                }
                let feature = Feature::new(self.store.clone(), self.tip, tile.clone(), handle);
                if let Some(filter) = &self.filter {
                    if !filter.accepts(&feature) {
                        continue;
                    }
                }
                out.push(Ok(feature));
            }
        }
        out
    }
}

/// Streaming, submission-order result iterator (spec §4.7 step 3). Dropping
/// it before exhaustion cancels every tile task that hasn't yet completed
/// (spec §4.7 step 4, §5).
pub struct QueryResults {
    receivers: VecDeque<mpsc::Receiver<Vec<Result<Feature>>>>,
    current: VecDeque<Result<Feature>>,
    cancel: Arc<AtomicBool>,
    _pool: rayon::ThreadPool,
}

impl Iterator for QueryResults {
    type Item = Result<Feature>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(item) = self.current.pop_front() {
                return Some(item);
            }
            let rx = self.receivers.front()?;
            match rx.recv() {
                Ok(batch) => {
                    self.receivers.pop_front();
                    self.current = batch.into();
                }
                Err(_) => {
                    self.receivers.pop_front();
                }
            }
        }
    }
}

impl Drop for QueryResults {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
    }
}
