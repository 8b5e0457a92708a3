//! Tag table decoding (spec §3.4, §4.3 "Tag iteration").
//!
//! A feature's tags are split into two sections growing from a shared
//! anchor: global tags (keys interned in the store's string table) and
//! local tags (keys that aren't). The host format grows these in opposite
//! directions from the anchor byte to save a few bytes of bookkeeping; this
//! port linearizes both sections forward after a small fixed header instead,
//! since the on-disk bit-packing trick is orthogonal to correctness and this
//! way the decoder doesn't need pointer arithmetic in both directions (see
//! DESIGN.md). The *design* -- anchor-relative split between global and
//! local tags, per-entry type-tagged values -- is preserved.
//!
//! Layout at a tag table's anchor offset:
//! ```text
//! u16 global_count
//! u16 local_count
//! global_count * { u16 key_code, u8 value_tag, value bytes }
//! local_count  * { u8 key_len, key_len bytes, u8 value_tag, value bytes }
//! ```

use std::sync::Arc;

use crate::codec::unaligned::{read_i16_le, read_i32_le, read_i64_le, read_u16_le, read_u32_le};
use crate::error::{GeodeskError, Result};
use crate::feature_store::key::Key;
use crate::feature_store::string_table::StringTable;
use crate::tag::{StrRef, TagSource, TagValue};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ValueTag {
    GlobalStr16 = 0,
    GlobalStr32 = 1,
    LocalStr = 2,
    NarrowInt = 3,
    WideInt = 4,
    Decimal = 5,
}

impl ValueTag {
    fn from_u8(v: u8) -> Result<Self> {
        Ok(match v {
            0 => ValueTag::GlobalStr16,
            1 => ValueTag::GlobalStr32,
            2 => ValueTag::LocalStr,
            3 => ValueTag::NarrowInt,
            4 => ValueTag::WideInt,
            5 => ValueTag::Decimal,
            other => return Err(GeodeskError::corrupt(0, format!("unknown tag value tag {other}"))),
        })
    }
}

/// Appends one type-tagged value to `out`. Used by [`crate::tile::builder`].
pub fn encode_value(value: &TagValue, out: &mut Vec<u8>) {
    match value {
        TagValue::Str(StrRef::Global(code)) if *code <= u32::from(u16::MAX) => {
            out.push(ValueTag::GlobalStr16 as u8);
            out.extend_from_slice(&(*code as u16).to_le_bytes());
        }
        TagValue::Str(StrRef::Global(code)) => {
            out.push(ValueTag::GlobalStr32 as u8);
            out.extend_from_slice(&code.to_le_bytes());
        }
        TagValue::Str(StrRef::Local(s)) => {
            out.push(ValueTag::LocalStr as u8);
            let bytes = s.as_bytes();
            out.extend_from_slice(&(bytes.len() as u16).to_le_bytes());
            out.extend_from_slice(bytes);
        }
        TagValue::Num(n) => {
            // Exact narrow/decimal representations are a build-time concern;
            // a decoder-side port always round-trips through the widest form.
            if n.fract() == 0.0 && *n >= i16::MIN as f64 && *n <= i16::MAX as f64 {
                out.push(ValueTag::NarrowInt as u8);
                out.extend_from_slice(&(*n as i16).to_le_bytes());
            } else if n.fract() == 0.0 && *n >= i64::MIN as f64 && *n <= i64::MAX as f64 {
                out.push(ValueTag::WideInt as u8);
                out.extend_from_slice(&(*n as i64).to_le_bytes());
            } else {
                out.push(ValueTag::Decimal as u8);
                let mantissa = (*n * 1000.0).round() as i32;
                out.extend_from_slice(&mantissa.to_le_bytes());
                out.push((-3i8) as u8);
            }
        }
    }
}

fn decode_value(bytes: &[u8], pos: &mut usize) -> Result<TagValue> {
    let tag = ValueTag::from_u8(bytes[*pos])?;
    *pos += 1;
    Ok(match tag {
        ValueTag::GlobalStr16 => {
            let code = read_u16_le(bytes, *pos);
            *pos += 2;
            TagValue::Str(StrRef::Global(u32::from(code)))
        }
        ValueTag::GlobalStr32 => {
            let code = read_u32_le(bytes, *pos);
            *pos += 4;
            TagValue::Str(StrRef::Global(code))
        }
        ValueTag::LocalStr => {
            let len = read_u16_le(bytes, *pos) as usize;
            *pos += 2;
            let s = std::str::from_utf8(&bytes[*pos..*pos + len])
                .map_err(|_| GeodeskError::corrupt(*pos as u64, "local tag value is not valid UTF-8"))?;
            let s: Arc<str> = Arc::from(s);
            *pos += len;
            TagValue::Str(StrRef::Local(s))
        }
        ValueTag::NarrowInt => {
            let v = read_i16_le(bytes, *pos);
            *pos += 2;
            TagValue::Num(f64::from(v))
        }
        ValueTag::WideInt => {
            let v = read_i64_le(bytes, *pos);
            *pos += 8;
            TagValue::Num(v as f64)
        }
        ValueTag::Decimal => {
            let mantissa = read_i32_le(bytes, *pos);
            *pos += 4;
            let exponent = bytes[*pos] as i8;
            *pos += 1;
            TagValue::Num(f64::from(mantissa) * 10f64.powi(i32::from(exponent)))
        }
    })
}

fn value_len(bytes: &[u8], pos: usize) -> Result<usize> {
    let tag = ValueTag::from_u8(bytes[pos])?;
    Ok(1 + match tag {
        ValueTag::GlobalStr16 => 2,
        ValueTag::GlobalStr32 => 4,
        ValueTag::LocalStr => 2 + read_u16_le(bytes, pos + 1) as usize,
        ValueTag::NarrowInt => 2,
        ValueTag::WideInt => 8,
        ValueTag::Decimal => 5,
    })
}

/// A decoded (lazily-walked) tag table: a borrowed slice of a tile's payload
/// starting at the table's anchor offset, plus the store's string table for
/// resolving global codes when iterating.
#[derive(Clone, Copy)]
pub struct TagTablePtr<'a> {
    bytes: &'a [u8],
}

impl<'a> TagTablePtr<'a> {
    pub fn at(tile_bytes: &'a [u8], anchor: usize) -> Self {
        TagTablePtr { bytes: &tile_bytes[anchor..] }
    }

    fn global_count(&self) -> usize {
        read_u16_le(self.bytes, 0) as usize
    }

    fn local_count(&self) -> usize {
        read_u16_le(self.bytes, 2) as usize
    }

    /// Iterates `(decoded key string, value)` pairs in on-disk order: all
    /// global entries, then all local entries (spec §4.3 "Tag iteration").
    pub fn iter(&self, strings: &'a StringTable) -> impl Iterator<Item = (String, TagValue)> + 'a {
        TagTableIter {
            bytes: self.bytes,
            strings,
            pos: 4,
            remaining_global: self.global_count(),
            remaining_local: self.local_count(),
        }
    }

    /// Looks up one key without materializing the others (the matcher's hot
    /// path -- spec §4.4's VM calls this once per `LoadKey` node).
    pub fn get(&self, key: &Key) -> Option<TagValue> {
        let global_count = self.global_count();
        let local_count = self.local_count();
        let mut pos = 4usize;
        match key {
            Key::Global(code) => {
                for _ in 0..global_count {
                    let entry_code = u32::from(read_u16_le(self.bytes, pos));
                    pos += 2;
                    let vlen = value_len(self.bytes, pos).ok()?;
                    if entry_code == *code {
                        let mut p = pos;
                        return decode_value(self.bytes, &mut p).ok();
                    }
                    pos += vlen;
                }
                None
            }
            Key::Local(text) => {
                pos += global_count_skip(self.bytes, global_count);
                for _ in 0..local_count {
                    let key_len = self.bytes[pos] as usize;
                    pos += 1;
                    let entry_key = &self.bytes[pos..pos + key_len];
                    pos += key_len;
                    let vlen = value_len(self.bytes, pos).ok()?;
                    if entry_key == text.as_bytes() {
                        let mut p = pos;
                        return decode_value(self.bytes, &mut p).ok();
                    }
                    pos += vlen;
                }
                None
            }
        }
    }
}

fn global_count_skip(bytes: &[u8], global_count: usize) -> usize {
    let mut pos = 0usize;
    for _ in 0..global_count {
        pos += 2;
        pos += value_len(bytes, pos).unwrap_or(bytes.len() - pos);
    }
    pos
}

impl<'a> TagSource for TagTablePtr<'a> {
    fn get(&self, key: &Key) -> Option<TagValue> {
        TagTablePtr::get(self, key)
    }
}

struct TagTableIter<'a> {
    bytes: &'a [u8],
    strings: &'a StringTable,
    pos: usize,
    remaining_global: usize,
    remaining_local: usize,
}

impl<'a> Iterator for TagTableIter<'a> {
    type Item = (String, TagValue);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining_global > 0 {
            self.remaining_global -= 1;
            let code = u32::from(read_u16_le(self.bytes, self.pos));
            self.pos += 2;
            let value = decode_value(self.bytes, &mut self.pos).ok()?;
            let key = self.strings.get(code).unwrap_or("?").to_string();
            return Some((key, value));
        }
        if self.remaining_local > 0 {
            self.remaining_local -= 1;
            let key_len = self.bytes[self.pos] as usize;
            self.pos += 1;
            let key = String::from_utf8_lossy(&self.bytes[self.pos..self.pos + key_len]).into_owned();
            self.pos += key_len;
            let value = decode_value(self.bytes, &mut self.pos).ok()?;
            return Some((key, value));
        }
        None
    }
}

/// Serializes a full tag table (header + global + local sections) given
/// already-resolved `(Key, TagValue)` pairs, used by [`crate::tile::builder`].
pub fn encode_tag_table(tags: &[(Key, TagValue)]) -> Vec<u8> {
    let mut globals = Vec::new();
    let mut locals = Vec::new();
    for (key, value) in tags {
        match key {
            Key::Global(code) => {
                globals.extend_from_slice(&(*code as u16).to_le_bytes());
                encode_value(value, &mut globals);
            }
            Key::Local(s) => {
                let bytes = s.as_bytes();
                locals.push(bytes.len() as u8);
                locals.extend_from_slice(bytes);
                encode_value(value, &mut locals);
            }
        }
    }
    let global_count = tags.iter().filter(|(k, _)| matches!(k, Key::Global(_))).count() as u16;
    let local_count = tags.len() as u16 - global_count;
    let mut out = Vec::with_capacity(4 + globals.len() + locals.len());
    out.extend_from_slice(&global_count.to_le_bytes());
    out.extend_from_slice(&local_count.to_le_bytes());
    out.extend_from_slice(&globals);
    out.extend_from_slice(&locals);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_and_local_entries_round_trip() {
        let tags = vec![
            (Key::Global(7), TagValue::Str(StrRef::Global(42))),
            (Key::Local(Arc::from("not_interned")), TagValue::Num(3.5)),
        ];
        let bytes = encode_tag_table(&tags);
        let table = TagTablePtr::at(&bytes, 0);
        assert_eq!(table.get(&Key::Global(7)), Some(TagValue::Str(StrRef::Global(42))));
        assert_eq!(table.get(&Key::Local(Arc::from("not_interned"))), Some(TagValue::Num(3.5)));
        assert_eq!(table.get(&Key::Global(999)), None);
    }

    #[test]
    fn iteration_yields_every_tag_in_order() {
        let tags = vec![
            (Key::Global(1), TagValue::Num(1.0)),
            (Key::Global(2), TagValue::Num(2.0)),
            (Key::Local(Arc::from("custom")), TagValue::Num(3.0)),
        ];
        let bytes = encode_tag_table(&tags);
        let table = TagTablePtr::at(&bytes, 0);
        let strings = StringTable::from_strings(vec!["a".into(), "b".into(), "c".into()]);
        let decoded: Vec<_> = table.iter(&strings).collect();
        assert_eq!(decoded.len(), 3);
        assert_eq!(decoded[2].0, "custom");
    }
}
