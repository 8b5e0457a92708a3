//! Global string table: ≈30k short interned strings shared by every tile
//! in the store (spec §3.5). String codes are stable for the lifetime of a
//! GOL and are baked directly into tile tag tables, so lookups in both
//! directions (code -> str, str -> code) must be cheap.

use std::collections::HashMap;
use std::sync::Arc;

use crate::codec::varint::{decode_varint_safe, encode_varint};
use crate::error::{GeodeskError, Result};

#[derive(Debug, Clone)]
pub struct StringTable {
    strings: Vec<Arc<str>>,
    by_value: HashMap<Arc<str>, u32>,
}

impl StringTable {
    pub fn from_strings(strings: Vec<String>) -> Self {
        let strings: Vec<Arc<str>> = strings.into_iter().map(Arc::from).collect();
        let by_value = strings
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i as u32))
            .collect();
        StringTable { strings, by_value }
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    /// Returns the string for `code`, or `None` if out of range (which a
    /// well-formed store should never hit -- tile data only ever encodes
    /// codes this table produced).
    pub fn get(&self, code: u32) -> Option<&str> {
        self.strings.get(code as usize).map(|s| s.as_ref())
    }

    /// Resolves a string to its global code, if it is interned.
    pub fn lookup(&self, s: &str) -> Option<u32> {
        self.by_value.get(s).copied()
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_varint(self.strings.len() as u64, &mut out);
        for s in &self.strings {
            let bytes = s.as_bytes();
            encode_varint(bytes.len() as u64, &mut out);
            out.extend_from_slice(bytes);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let end = bytes.len();
        let count = decode_varint_safe(bytes, &mut pos, end)?;
        let mut strings = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let len = decode_varint_safe(bytes, &mut pos, end)? as usize;
            if pos + len > end {
                return Err(GeodeskError::corrupt(pos as u64, "string table entry truncated"));
            }
            let s = std::str::from_utf8(&bytes[pos..pos + len])
                .map_err(|_| GeodeskError::corrupt(pos as u64, "string table entry is not valid UTF-8"))?
                .to_string();
            strings.push(s);
            pos += len;
        }
        Ok(StringTable::from_strings(strings))
    }
}
