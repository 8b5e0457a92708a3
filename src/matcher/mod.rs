//! Tag-expression compiler and evaluator (spec §4.4).
//!
//! [`compile`] turns a tag-expression string into a [`Matcher`]: an
//! immutable, reference-counted, OR'd set of [`Selector`]s. Matchers are
//! cached by [`crate::feature_store::FeatureStore::get_matcher`] and shared
//! across queries (spec §9 "Matcher compiled-object lifetime").

pub mod compiler;
pub mod selector;
pub mod vm;

use crate::error::Result;
use crate::feature_store::indexed_keys::IndexedKeys;
use crate::feature_store::string_table::StringTable;
use crate::feature_type::TypeBits;
use crate::tag::TagSource;

pub use selector::Selector;

#[derive(Debug, Clone)]
pub struct Matcher {
    source: String,
    selectors: Vec<Selector>,
    /// Union of every selector's accepted types, for a cheap top-level
    /// reject before testing individual selectors.
    accepted_types: TypeBits,
    /// Union of every selector's index bits. A tile subtree can only be
    /// pruned by index bits if *every* selector that could possibly accept
    /// this subtree's types requires an indexed key the subtree lacks; see
    /// [`Matcher::index_bits_for_types`] for the precise per-type mask
    /// the query executor should use (spec §4.5).
    accepted_index_bits: u32,
}

impl Matcher {
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn selectors(&self) -> &[Selector] {
        &self.selectors
    }

    pub fn accepted_types(&self) -> TypeBits {
        self.accepted_types
    }

    /// Union of every selector's index bits, for callers that don't need
    /// the per-type precision of [`Matcher::index_bits_for_types`].
    pub fn accepted_index_bits(&self) -> u32 {
        self.accepted_index_bits
    }

    /// The index-bits mask to use for pruning when testing `type_bits`:
    /// the union of index bits among selectors that could accept one of
    /// `type_bits`, or 0 if any such selector has no indexed-key
    /// requirement (meaning pruning is unsafe -- matching spec §4.5's "if
    /// `selector.indexBits == 0` the index-bits test is bypassed").
    pub fn index_bits_for_types(&self, type_bits: TypeBits) -> u32 {
        let mut mask = 0u32;
        for selector in &self.selectors {
            if !selector.accepted_types.intersects(type_bits) {
                continue;
            }
            if selector.index_bits == 0 {
                return 0;
            }
            mask |= selector.index_bits;
        }
        mask
    }

    pub fn accept<T: TagSource>(&self, type_bits: TypeBits, tags: &T) -> bool {
        if !self.accepted_types.intersects(type_bits) {
            return false;
        }
        self.selectors.iter().any(|s| s.accepts(type_bits, tags))
    }
}

/// Compiles `expr` against `strings`/`indexed_keys` (spec §4.4 "Compile
/// output"). Called by [`crate::feature_store::FeatureStore::get_matcher`];
/// exposed directly for callers (e.g. tests) that want to compile against a
/// standalone string table without a full store.
pub fn compile(expr: &str, strings: &StringTable, indexed_keys: &IndexedKeys) -> Result<Matcher> {
    let selectors = compiler::compile_selectors(expr, strings, indexed_keys)?;
    let accepted_types = selectors
        .iter()
        .fold(TypeBits::NONE, |acc, s| acc.union(s.accepted_types));
    let accepted_index_bits = selectors.iter().fold(0u32, |acc, s| acc | s.index_bits);
    Ok(Matcher {
        source: expr.to_string(),
        selectors,
        accepted_types,
        accepted_index_bits,
    })
}
