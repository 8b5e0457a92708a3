//! The compiled predicate DAG ("OpGraph") and its one-pass evaluator (spec
//! §4.4 "Matcher compiler and VM").
//!
//! Each [`OpNode`] loads or tests one tag and branches to a `true_next` or
//! `false_next` node index; node `usize::MAX` is the shared `ACCEPT`
//! terminal, `usize::MAX - 1` the shared `REJECT` terminal ("falseOp" in
//! spec terms). Evaluation is a single pass: no node is visited twice for
//! one feature, because clauses are compiled as a straight-line chain
//! (clause *N*'s false-next always points straight to REJECT; only the
//! true-next chains forward), matching "clauses AND via sequential
//! dependence" in spec §4.4.

use std::sync::Arc;

use crate::feature_store::key::Key;
use crate::tag::{StrPattern, TagSource, TagValue};

pub const ACCEPT: usize = usize::MAX;
pub const REJECT: usize = usize::MAX - 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone)]
pub enum OpNode {
    /// Loads the value of `key`; if absent, jumps to `false_next` unless
    /// `accept_absence` is set (an absence-check clause like `[key]`'s
    /// negated form -- not currently reachable from the grammar in §4.4 but
    /// kept for the VM's documented behavior: "unless followed by
    /// absence-accepting op").
    LoadKey {
        key: Key,
        accept_absence: bool,
        true_next: usize,
        false_next: usize,
    },
    /// Presence test: succeeds merely by having reached this node (the
    /// preceding `LoadKey` already proved the key exists).
    Present { true_next: usize },
    /// String equality/inequality against a value list (spec: "Value lists
    /// compile to a sorted search over global-string codes plus a linear
    /// scan over local strings" -- `patterns` holds both; a handful of
    /// patterns doesn't warrant a separate sorted array in this port).
    StrTest {
        patterns: Vec<StrPattern>,
        negate: bool,
        true_next: usize,
        false_next: usize,
    },
    NumTest {
        op: CmpOp,
        value: f64,
        true_next: usize,
        false_next: usize,
    },
}

/// One selector's compiled predicate chain plus its ACCEPT/REJECT wiring.
#[derive(Debug, Clone, Default)]
pub struct OpGraph {
    nodes: Vec<OpNode>,
    entry: usize,
}

impl OpGraph {
    /// An empty graph (no clauses) accepts unconditionally.
    pub fn accept_all() -> Self {
        OpGraph { nodes: Vec::new(), entry: ACCEPT }
    }

    pub fn from_nodes(nodes: Vec<OpNode>) -> Self {
        let entry = if nodes.is_empty() { ACCEPT } else { 0 };
        OpGraph { nodes, entry }
    }

    pub fn nodes(&self) -> &[OpNode] {
        &self.nodes
    }

    pub fn evaluate<T: TagSource>(&self, tags: &T) -> bool {
        let mut pc = self.entry;
        loop {
            match pc {
                ACCEPT => return true,
                REJECT => return false,
                _ => {}
            }
            let node = &self.nodes[pc];
            pc = match node {
                OpNode::LoadKey { key, accept_absence, true_next, false_next } => {
                    match tags.get(key) {
                        Some(_) => *true_next,
                        None if *accept_absence => *true_next,
                        None => *false_next,
                    }
                }
                OpNode::Present { true_next } => *true_next,
                OpNode::StrTest { patterns, negate, true_next, false_next } => {
                    // The preceding LoadKey guarantees `tags.get` succeeds
                    // here, but the VM re-fetches rather than threading a
                    // register through nodes -- the tag-table lookup is a
                    // cheap, allocation-free pointer walk.
                    let matched = match last_loaded_value(&self.nodes, pc, tags) {
                        Some(value) => str_matches(&value, patterns),
                        None => false,
                    };
                    if matched != *negate { *true_next } else { *false_next }
                }
                OpNode::NumTest { op, value, true_next, false_next } => {
                    let matched = match last_loaded_value(&self.nodes, pc, tags) {
                        Some(actual) => num_matches(&actual, *op, *value),
                        None => false,
                    };
                    if matched { *true_next } else { *false_next }
                }
            };
        }
    }
}

/// Finds the key loaded by the `LoadKey` node immediately preceding `pc`
/// and re-fetches its value. Nodes are always emitted in `[LoadKey, Test]`
/// pairs by the compiler, so `pc - 1` is always that `LoadKey`.
fn last_loaded_value<T: TagSource>(nodes: &[OpNode], pc: usize, tags: &T) -> Option<TagValue> {
    match &nodes[pc - 1] {
        OpNode::LoadKey { key, .. } => tags.get(key),
        _ => unreachable!("test node not preceded by LoadKey"),
    }
}

fn str_matches(value: &TagValue, patterns: &[StrPattern]) -> bool {
    match value {
        TagValue::Str(s) => patterns.iter().any(|p| p.matches(s)),
        // "numeric-valued tags compared to strings fail, except 'yes'/'no'
        // truthiness which is canonical" (spec §4.4).
        TagValue::Num(n) => patterns.iter().any(|p| match p.text.as_ref() {
            "yes" => *n != 0.0,
            "no" => *n == 0.0,
            _ => false,
        }),
    }
}

fn num_matches(value: &TagValue, op: CmpOp, target: f64) -> bool {
    let actual = match value.as_f64() {
        Some(n) => n,
        // "string-valued tags compared numerically fail" (spec §4.4).
        None => return false,
    };
    match op {
        CmpOp::Eq => actual == target,
        CmpOp::Ne => actual != target,
        CmpOp::Lt => actual < target,
        CmpOp::Le => actual <= target,
        CmpOp::Gt => actual > target,
        CmpOp::Ge => actual >= target,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feature_store::string_table::StringTable;
    use std::collections::HashMap;

    struct MapTags(HashMap<&'static str, TagValue>);
    impl TagSource for MapTags {
        fn get(&self, key: &Key) -> Option<TagValue> {
            match key {
                Key::Local(s) => self.0.get(s.as_ref()).cloned(),
                Key::Global(_) => None,
            }
        }
    }

    fn local(s: &str) -> Key {
        Key::Local(Arc::from(s))
    }

    #[test]
    fn present_then_accept_requires_key_to_exist() {
        let nodes = vec![
            OpNode::LoadKey { key: local("amenity"), accept_absence: false, true_next: 1, false_next: REJECT },
            OpNode::Present { true_next: ACCEPT },
        ];
        let graph = OpGraph::from_nodes(nodes);
        let mut tags = HashMap::new();
        tags.insert("amenity", TagValue::Str(crate::tag::StrRef::Local(Arc::from("cafe"))));
        assert!(graph.evaluate(&MapTags(tags)));
        assert!(!graph.evaluate(&MapTags(HashMap::new())));
    }

    #[test]
    fn numeric_truthiness_coercion_for_yes_no() {
        let table = StringTable::from_strings(vec![]);
        let patterns = vec![StrPattern::compile(&table, "yes")];
        let nodes = vec![
            OpNode::LoadKey { key: local("oneway"), accept_absence: false, true_next: 1, false_next: REJECT },
            OpNode::StrTest { patterns, negate: false, true_next: ACCEPT, false_next: REJECT },
        ];
        let graph = OpGraph::from_nodes(nodes);
        let mut tags = HashMap::new();
        tags.insert("oneway", TagValue::Num(1.0));
        assert!(graph.evaluate(&MapTags(tags)));

        let mut tags = HashMap::new();
        tags.insert("oneway", TagValue::Num(0.0));
        assert!(!graph.evaluate(&MapTags(tags)));
    }
}
