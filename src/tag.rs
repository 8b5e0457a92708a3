//! `TagValue` and `StrPattern`: the value side of a tag table entry (spec
//! §3.4, §4.3 "Tag iteration"), shared by the tile decoder and the matcher
//! so neither needs to depend on the other's internals.

use std::sync::Arc;

use crate::feature_store::key::Key;
use crate::feature_store::string_table::StringTable;

/// Anything the matcher can pull tag values out of by [`Key`]: a real
/// [`crate::tile::tag_table::TagTablePtr`] during a query, or a plain map
/// in tests exercising spec §8 property 4 ("matcher agreement").
pub trait TagSource {
    fn get(&self, key: &Key) -> Option<TagValue>;
}

/// A decoded tag value. Strings keep their interned code when one exists so
/// comparisons against other interned strings are an integer compare
/// rather than a byte compare (spec §3.4 "global-string reference").
#[derive(Debug, Clone, PartialEq)]
pub enum TagValue {
    Str(StrRef),
    /// Narrow/wide-integer and decimal (mantissa+exponent) tag types are all
    /// exposed uniformly as `f64` to callers; the matcher's numeric
    /// comparisons don't care which wire encoding produced the number, only
    /// that it decoded losslessly enough for OSM's actual value ranges.
    Num(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum StrRef {
    Global(u32),
    Local(Arc<str>),
}

impl TagValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            TagValue::Num(n) => Some(*n),
            TagValue::Str(_) => None,
        }
    }

    pub fn resolve_str<'a>(&'a self, table: &'a StringTable) -> Option<&'a str> {
        match self {
            TagValue::Str(StrRef::Global(code)) => table.get(*code),
            TagValue::Str(StrRef::Local(s)) => Some(s.as_ref()),
            TagValue::Num(_) => None,
        }
    }
}

/// A pattern string resolved once against a store's string table: the
/// matcher compares interned values by code and local values by text,
/// never re-resolving the table at evaluation time (spec §9 "Matcher
/// compiled-object lifetime": compile into owned buffers).
#[derive(Debug, Clone, PartialEq)]
pub struct StrPattern {
    pub code: Option<u32>,
    pub text: Arc<str>,
}

impl StrPattern {
    pub fn compile(table: &StringTable, text: &str) -> Self {
        StrPattern {
            code: table.lookup(text),
            text: Arc::from(text),
        }
    }

    pub fn matches(&self, value: &StrRef) -> bool {
        match value {
            StrRef::Global(code) => self.code == Some(*code),
            StrRef::Local(s) => s.as_ref() == self.text.as_ref(),
        }
    }
}
