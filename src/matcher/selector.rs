//! One disjunct of a tag expression (spec §4.4, GLOSSARY "Selector").

use crate::feature_type::TypeBits;
use crate::matcher::vm::OpGraph;
use crate::tag::TagSource;

#[derive(Debug, Clone)]
pub struct Selector {
    pub accepted_types: TypeBits,
    /// 32-bit mask of indexed-key positions this selector's clauses
    /// reference; zero means no index-bit pruning is possible for this
    /// selector (spec §4.5 "if `selector.indexBits == 0` the index-bits
    /// test is bypassed").
    pub index_bits: u32,
    pub graph: OpGraph,
}

impl Selector {
    pub fn accepts<T: TagSource>(&self, type_bits: TypeBits, tags: &T) -> bool {
        self.accepted_types.intersects(type_bits) && self.graph.evaluate(tags)
    }
}
