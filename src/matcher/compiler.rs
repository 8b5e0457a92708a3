//! Parses a tag-expression string into compiled [`Selector`]s (spec §4.4).
//!
//! Grammar (informal, per spec): `Type[clause][clause]…` selectors
//! separated by top-level commas; `Type` ∈ `n|w|a|r|*` or a combined form
//! like `nw`; a `clause` is `[key]` (presence), `[key=v1,v2,…]` /
//! `[key!=v1,v2,…]` (value list), or `[key<v]`/`[key<=v]`/`[key>v]`/
//! `[key>=v]` (numeric comparison).

use crate::error::{GeodeskError, Result};
use crate::feature_store::indexed_keys::IndexedKeys;
use crate::feature_store::key::Key;
use crate::feature_store::string_table::StringTable;
use crate::feature_type::TypeBits;
use crate::matcher::selector::Selector;
use crate::matcher::vm::{CmpOp, OpGraph, OpNode, ACCEPT, REJECT};
use crate::tag::StrPattern;

pub fn compile_selectors(
    expr: &str,
    strings: &StringTable,
    indexed_keys: &IndexedKeys,
) -> Result<Vec<Selector>> {
    let mut selectors = Vec::new();
    for (start, text) in split_top_level(expr, ',') {
        selectors.push(compile_one_selector(start, text, strings, indexed_keys)?);
    }
    if selectors.is_empty() {
        return Err(bad_expr(0, expr, "empty tag expression"));
    }
    Ok(selectors)
}

/// Splits `s` on `sep` at bracket-depth 0, yielding `(byte_offset, slice)`.
fn split_top_level(s: &str, sep: char) -> Vec<(usize, &str)> {
    let mut parts = Vec::new();
    let mut depth = 0i32;
    let mut start = 0usize;
    for (i, c) in s.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth -= 1,
            c if c == sep && depth == 0 => {
                parts.push((start, &s[start..i]));
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push((start, &s[start..]));
    parts
}

fn bad_expr(offset: usize, token: &str, message: impl Into<String>) -> GeodeskError {
    GeodeskError::BadExpression {
        offset,
        token: token.trim().to_string(),
        message: message.into(),
    }
}

fn compile_one_selector(
    base_offset: usize,
    text: &str,
    strings: &StringTable,
    indexed_keys: &IndexedKeys,
) -> Result<Selector> {
    let trimmed = text.trim_start();
    let lead_ws = text.len() - trimmed.len();
    let type_end = trimmed
        .find('[')
        .unwrap_or(trimmed.len());
    let type_str = &trimmed[..type_end];
    let accepted_types = parse_type_bits(base_offset + lead_ws, type_str)?;

    let mut nodes: Vec<OpNode> = Vec::new();
    let mut index_bits: u32 = 0;
    let clause_body = &trimmed[type_end..];
    let clauses = split_bracket_clauses(base_offset + lead_ws + type_end, clause_body)?;

    for (i, (clause_offset, clause_text)) in clauses.iter().enumerate() {
        let is_last = i + 1 == clauses.len();
        let node_idx = nodes.len();
        let load_key_idx = node_idx;
        let test_idx = node_idx + 1;
        let next_load_idx = node_idx + 2;

        let clause = parse_clause(*clause_offset, clause_text)?;
        let key = Key::resolve(strings, &clause.key_text);
        if let Some(code) = key.as_global_code() {
            index_bits |= indexed_keys.mask_for_code(code);
        }

        match clause.kind {
            ClauseKind::Present => {
                nodes.push(OpNode::LoadKey {
                    key,
                    accept_absence: false,
                    true_next: test_idx,
                    false_next: REJECT,
                });
                nodes.push(OpNode::Present {
                    true_next: if is_last { ACCEPT } else { next_load_idx },
                });
            }
            ClauseKind::StrTest { negate, values } => {
                let patterns: Vec<StrPattern> =
                    values.iter().map(|v| StrPattern::compile(strings, v)).collect();
                nodes.push(OpNode::LoadKey {
                    key,
                    accept_absence: false,
                    true_next: test_idx,
                    false_next: REJECT,
                });
                nodes.push(OpNode::StrTest {
                    patterns,
                    negate,
                    true_next: if is_last { ACCEPT } else { next_load_idx },
                    false_next: REJECT,
                });
            }
            ClauseKind::NumTest { op, value } => {
                nodes.push(OpNode::LoadKey {
                    key,
                    accept_absence: false,
                    true_next: test_idx,
                    false_next: REJECT,
                });
                nodes.push(OpNode::NumTest {
                    op,
                    value,
                    true_next: if is_last { ACCEPT } else { next_load_idx },
                    false_next: REJECT,
                });
            }
        }
    }

    Ok(Selector {
        accepted_types,
        index_bits,
        graph: OpGraph::from_nodes(nodes),
    })
}

fn parse_type_bits(offset: usize, type_str: &str) -> Result<TypeBits> {
    if type_str.is_empty() {
        return Err(bad_expr(offset, type_str, "selector is missing a type prefix (n|w|a|r|*)"));
    }
    let mut bits = TypeBits::NONE;
    for c in type_str.chars() {
        bits = bits.union(match c {
            'n' => TypeBits::NODE,
            'w' => TypeBits::WAY,
            'a' => TypeBits::AREA,
            'r' => TypeBits::RELATION,
            '*' => TypeBits::ALL,
            other => {
                return Err(bad_expr(
                    offset,
                    type_str,
                    format!("unrecognized type letter '{other}' (expected n, w, a, r or *)"),
                ))
            }
        });
    }
    Ok(bits)
}

/// Splits `[k1=v1][k2]...` into `(offset, "k1=v1")`, `(offset, "k2")`, ...,
/// stripping the surrounding brackets.
fn split_bracket_clauses(base_offset: usize, s: &str) -> Result<Vec<(usize, &str)>> {
    let mut clauses = Vec::new();
    let bytes = s.as_bytes();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] != b'[' {
            return Err(bad_expr(base_offset + i, s, "expected '[' to start a clause"));
        }
        let close = s[i..]
            .find(']')
            .map(|p| i + p)
            .ok_or_else(|| bad_expr(base_offset + i, s, "unterminated clause (missing ']')"))?;
        clauses.push((base_offset + i + 1, &s[i + 1..close]));
        i = close + 1;
    }
    Ok(clauses)
}

enum ClauseKind {
    Present,
    StrTest { negate: bool, values: Vec<String> },
    NumTest { op: CmpOp, value: f64 },
}

struct ParsedClause {
    key_text: String,
    kind: ClauseKind,
}

const NUM_OPS: [(&str, CmpOp); 4] = [
    ("<=", CmpOp::Le),
    (">=", CmpOp::Ge),
    ("<", CmpOp::Lt),
    (">", CmpOp::Gt),
];

fn parse_clause(offset: usize, content: &str) -> Result<ParsedClause> {
    let content = content.trim();
    if content.is_empty() {
        return Err(bad_expr(offset, content, "empty clause"));
    }

    if let Some(rest) = content.strip_prefix_op("!=") {
        let (key, value_str) = rest;
        return Ok(ParsedClause {
            key_text: key.trim().to_string(),
            kind: ClauseKind::StrTest { negate: true, values: split_values(value_str) },
        });
    }
    // Checked before the plain '=' split below: "<=" and ">=" both contain
    // '=', so a generic split_once('=') would cut "lanes<=2" into key
    // "lanes<" and value "2" instead of recognizing the comparison operator.
    for (op_str, op) in NUM_OPS {
        if let Some((key, value_str)) = content.split_once(op_str) {
            let value: f64 = value_str.trim().parse().map_err(|_| {
                bad_expr(offset, content, format!("expected a number after '{op_str}'"))
            })?;
            return Ok(ParsedClause { key_text: key.trim().to_string(), kind: ClauseKind::NumTest { op, value } });
        }
    }
    if let Some((key, value_str)) = content.split_once('=') {
        return Ok(ParsedClause {
            key_text: key.trim().to_string(),
            kind: ClauseKind::StrTest { negate: false, values: split_values(value_str) },
        });
    }
    Ok(ParsedClause { key_text: content.to_string(), kind: ClauseKind::Present })
}

fn split_values(s: &str) -> Vec<String> {
    s.split(',').map(|v| v.trim().to_string()).filter(|v| !v.is_empty()).collect()
}

/// Small helper so `!=` can be matched before the generic `=` split without
/// `content.split_once('=')` cutting it at the wrong `=`.
trait StripPrefixOp {
    fn strip_prefix_op(&self, op: &str) -> Option<(&str, &str)>;
}

impl StripPrefixOp for str {
    fn strip_prefix_op(&self, op: &str) -> Option<(&str, &str)> {
        self.find(op).map(|pos| (&self[..pos], &self[pos + op.len()..]))
    }
}
