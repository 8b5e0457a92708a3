//! `Features`: the fluent query-building façade over [`crate::query::Query`]
//! (spec §6 `Features(path)` / `Features(bbox)` / `Features(tagExpr)` /
//! `Features(filter)`).
//!
//! A `Features` is cheap to clone and immutable once built -- each
//! `with_*` call returns a narrowed copy, matching the original's `GOQL`
//! builder chain (`include/geodesk/feature/FeatureSet.h`) rather than
//! mutating a shared query object.

use std::sync::Arc;

use crate::bbox::Bbox;
use crate::error::Result;
use crate::feature::Feature;
use crate::feature_store::settings::QueryConfig;
use crate::feature_store::FeatureStore;
use crate::filter::Filter;
use crate::matcher::Matcher;
use crate::query::{Query, QueryResults};
use crate::tile::relation_table::MemberRole;

/// A narrowable, re-runnable feature query (spec §6). Every `with_*` method
/// consumes `self` and returns a new, more specific `Features`; nothing is
/// mutated in place, so a `Features` built once can be branched into several
/// different narrowings without re-running anything.
#[derive(Clone)]
pub struct Features {
    store: Arc<FeatureStore>,
    matcher: Arc<Matcher>,
    extra_matchers: Vec<Arc<Matcher>>,
    bbox: Bbox,
    filter: Option<Filter>,
    config: QueryConfig,
}

impl Features {
    /// Opens a feature set over `store` selected by a tag-expression
    /// (spec §6 `Features(path)`), with no bbox restriction. Pass `"*"` to
    /// match every feature type.
    pub fn new(store: Arc<FeatureStore>, tag_expr: &str) -> Result<Self> {
        let matcher = store.get_matcher(tag_expr)?;
        Ok(Features {
            store,
            matcher,
            extra_matchers: Vec::new(),
            bbox: Bbox::WORLD,
            filter: None,
            config: QueryConfig::default(),
        })
    }

    /// Narrows to features also matching `tag_expr` (spec §6 `Features(tagExpr)`
    /// refining an already-open set). The original matcher still drives
    /// index-bits pruning; `tag_expr` is applied as a pure post-filter.
    pub fn with_tag_expr(mut self, tag_expr: &str) -> Result<Self> {
        let matcher = self.store.get_matcher(tag_expr)?;
        self.extra_matchers.push(matcher);
        Ok(self)
    }

    /// Narrows to the intersection with `bbox` (spec §6 `Features(bbox)`).
    pub fn with_bbox(mut self, bbox: Bbox) -> Self {
        self.bbox = self.bbox.intersection(&bbox);
        self
    }

    /// Adds a geometry-level acceptance test (spec §6 `Features(filter)`).
    /// A second call replaces the previous filter rather than conjoining it,
    /// matching the original's single active `SpatialFilter` per query.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = Some(filter);
        self
    }

    /// Overrides the thread-pool sizing / cancellation policy for runs of
    /// this `Features` (spec §4.7, §5); not persisted in the store.
    pub fn with_config(mut self, config: QueryConfig) -> Self {
        self.config = config;
        self
    }

    fn build_query(&self) -> Query {
        let mut query = Query::new(self.store.clone(), self.matcher.clone(), self.bbox).with_config(self.config.clone());
        for extra in &self.extra_matchers {
            query = query.with_extra_matcher(extra.clone());
        }
        if let Some(filter) = &self.filter {
            query = query.with_filter(filter.clone());
        }
        query
    }

    /// Runs the query and returns a streaming, submission-order iterator
    /// (spec §4.7 step 3). Equivalent to `(&features).into_iter()`.
    pub fn iter(&self) -> QueryResults {
        self.build_query().run()
    }

    /// Runs the query, expecting at most one result (spec §4.7 `one()`).
    pub fn one(&self) -> Result<Option<Feature>> {
        self.build_query().one()
    }

    /// Runs the query and returns its first result, if any -- unlike
    /// [`Features::one`], a second match is not an error.
    pub fn first(&self) -> Result<Option<Feature>> {
        Ok(self.iter().next().transpose()?)
    }

    /// Runs the query to completion and returns the count of matches
    /// (spec §4.7 `count()`).
    pub fn count(&self) -> Result<usize> {
        self.build_query().count()
    }

    /// The members of a single relation, or the feature-nodes of a single
    /// way (spec §6 `Features(feature)` "members"; SPEC_FULL.md §B.3/§B.7).
    /// A node has no members and always returns an empty set.
    pub fn of_members(feature: &Feature) -> Result<Vec<(MemberRole, Feature)>> {
        feature.members()
    }

    /// The multipolygon area members of a relation (SPEC_FULL.md §B.3
    /// `AreaMemberIterator`); empty for any other feature type.
    pub fn of_area_members(feature: &Feature) -> Result<Vec<Feature>> {
        feature.area_members()
    }

    /// The parent relations a node or way belongs to (SPEC_FULL.md §B.4
    /// `ParentRelationIterator`); empty for a relation itself.
    pub fn of_parents(feature: &Feature) -> Result<Vec<Feature>> {
        feature.parents()
    }

    /// The constituent feature-nodes of a way, dropping relation role
    /// information that only applies to true relation members
    /// (SPEC_FULL.md §B.7 `FeatureNodeIterator`).
    pub fn of_nodes(way: &Feature) -> Result<Vec<Feature>> {
        Ok(way.members()?.into_iter().map(|(_, f)| f).collect())
    }
}

impl IntoIterator for Features {
    type Item = Result<Feature>;
    type IntoIter = QueryResults;

    fn into_iter(self) -> Self::IntoIter {
        self.build_query().run()
    }
}

impl IntoIterator for &Features {
    type Item = Result<Feature>;
    type IntoIter = QueryResults;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
