//! The indexed-key table: the small set of global-string codes (typically
//! ≤32) that own a bit in every tile's per-subtree `indexBits` mask
//! (spec §3.2, §3.5, §4.5). Which keys are indexed is a build-time, per-store
//! decision, so this must always be read from the store, never hardcoded
//! (spec §9 "Ambiguities").

use crate::codec::varint::{decode_varint_safe, encode_varint};
use crate::error::Result;

pub const MAX_INDEXED_KEYS: usize = 32;

#[derive(Debug, Clone, Default)]
pub struct IndexedKeys {
    /// Global-string code of the key occupying each bit position.
    codes: Vec<u32>,
}

impl IndexedKeys {
    pub fn new(codes: Vec<u32>) -> Self {
        debug_assert!(codes.len() <= MAX_INDEXED_KEYS);
        IndexedKeys { codes }
    }

    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    /// Bit position of `code` within the index-bits mask, if it is indexed.
    pub fn bit_for_code(&self, code: u32) -> Option<u32> {
        self.codes.iter().position(|&c| c == code).map(|i| i as u32)
    }

    /// The mask containing only the bit for `code`, or 0 if `code` is not
    /// an indexed key (meaning it contributes nothing to index pruning).
    pub fn mask_for_code(&self, code: u32) -> u32 {
        self.bit_for_code(code).map(|bit| 1u32 << bit).unwrap_or(0)
    }

    pub fn codes(&self) -> &[u32] {
        &self.codes
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::new();
        encode_varint(self.codes.len() as u64, &mut out);
        for &c in &self.codes {
            encode_varint(u64::from(c), &mut out);
        }
        out
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut pos = 0usize;
        let end = bytes.len();
        let count = decode_varint_safe(bytes, &mut pos, end)?;
        let mut codes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            codes.push(decode_varint_safe(bytes, &mut pos, end)? as u32);
        }
        Ok(IndexedKeys::new(codes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_for_code_reflects_build_order() {
        let keys = IndexedKeys::new(vec![101, 202, 303]);
        assert_eq!(keys.bit_for_code(202), Some(1));
        assert_eq!(keys.mask_for_code(202), 0b010);
        assert_eq!(keys.bit_for_code(999), None);
        assert_eq!(keys.mask_for_code(999), 0);
    }

    #[test]
    fn serialize_roundtrip() {
        let keys = IndexedKeys::new(vec![5, 9, 17]);
        let bytes = keys.serialize();
        let restored = IndexedKeys::deserialize(&bytes).unwrap();
        assert_eq!(restored.codes(), keys.codes());
    }
}
