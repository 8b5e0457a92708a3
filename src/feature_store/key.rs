//! `Key` interning and `GlobalStrings` (SPEC_FULL.md §B.1, §B.2).
//!
//! A [`Key`] is resolved once, by [`crate::feature_store::FeatureStore::lookup_key`],
//! and is expected to be reused across many tag lookups: the fast path
//! (global-string code, a plain integer compare against a tag table entry)
//! avoids a table scan every time a caller re-checks the same key.

use std::sync::Arc;

use crate::feature_store::string_table::StringTable;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    /// The key is interned in the store's global string table.
    Global(u32),
    /// The key has no global-string code in this store; matching it
    /// requires comparing against each tag's local-string pointer.
    Local(Arc<str>),
}

impl Key {
    pub fn resolve(table: &StringTable, s: &str) -> Key {
        match table.lookup(s) {
            Some(code) => Key::Global(code),
            None => Key::Local(Arc::from(s)),
        }
    }

    pub fn as_global_code(&self) -> Option<u32> {
        match self {
            Key::Global(code) => Some(*code),
            Key::Local(_) => None,
        }
    }
}

/// A handful of well-known string codes pre-resolved at store-open time
/// (SPEC_FULL.md §B.2) so hot-path comparisons -- `"yes"`/`"no"` truthiness
/// (spec §4.4), empty-string detection, common relation-member roles --
/// avoid a string-table lookup on every tag evaluated.
#[derive(Debug, Clone)]
pub struct GlobalStrings {
    pub empty: Option<u32>,
    pub no: Option<u32>,
    pub yes: Option<u32>,
    pub role_outer: Option<u32>,
    pub role_inner: Option<u32>,
}

impl GlobalStrings {
    pub fn resolve(table: &StringTable) -> Self {
        GlobalStrings {
            empty: table.lookup(""),
            no: table.lookup("no"),
            yes: table.lookup("yes"),
            role_outer: table.lookup("outer"),
            role_inner: table.lookup("inner"),
        }
    }

    pub fn is_yes(&self, code: u32) -> bool {
        self.yes == Some(code)
    }

    pub fn is_no(&self, code: u32) -> bool {
        self.no == Some(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_prefers_global_code_when_present() {
        let table = StringTable::from_strings(vec!["highway".into(), "yes".into()]);
        assert_eq!(Key::resolve(&table, "highway"), Key::Global(0));
        assert!(matches!(Key::resolve(&table, "not_interned"), Key::Local(_)));
    }

    #[test]
    fn global_strings_resolves_truthy_codes() {
        let table = StringTable::from_strings(vec!["no".into(), "yes".into()]);
        let gs = GlobalStrings::resolve(&table);
        assert!(gs.is_no(0));
        assert!(gs.is_yes(1));
        assert!(!gs.is_yes(0));
    }
}
