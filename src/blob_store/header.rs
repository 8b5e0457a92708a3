//! The fixed 64-byte GOL header (spec §6 "GOL file format").

use crate::codec::unaligned::{read_u32_le, read_u64_le, write_u32_le, write_u64_le};
use crate::error::{GeodeskError, Result};

pub const MAGIC: [u8; 4] = *b"GOLF";
pub const CURRENT_VERSION: u32 = 1;
pub const HEADER_SIZE: usize = 64;

/// `u32::MAX` page number is reserved to mean "no blob" (a null reference).
pub const NULL_PAGE: u32 = u32::MAX;

/// Fixed-layout header at offset 0 of every GOL file. All multi-byte
/// integers are little-endian; `header_crc32c` covers every byte that
/// precedes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GolHeader {
    pub version: u32,
    pub page_size_exponent: u8,
    pub flags: [u8; 3],
    pub guid: [u8; 16],
    pub revision: u32,
    pub revision_timestamp: u64,
    pub string_table_blob_ref: u32,
    pub properties_blob_ref: u32,
    pub indexed_keys_blob_ref: u32,
    pub tile_index_root: u32,
    pub free_list_root: u32,
}

impl GolHeader {
    pub fn page_size(&self) -> u32 {
        1u32 << self.page_size_exponent
    }

    pub fn new_empty(page_size_exponent: u8, guid: [u8; 16]) -> Self {
        GolHeader {
            version: CURRENT_VERSION,
            page_size_exponent,
            flags: [0; 3],
            guid,
            revision: 0,
            revision_timestamp: 0,
            string_table_blob_ref: NULL_PAGE,
            properties_blob_ref: NULL_PAGE,
            indexed_keys_blob_ref: NULL_PAGE,
            tile_index_root: NULL_PAGE,
            free_list_root: NULL_PAGE,
        }
    }

    /// Parses and CRC-validates a header from the first `HEADER_SIZE` bytes
    /// of the file.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(GeodeskError::corrupt(0, "file shorter than header"));
        }
        if bytes[0..4] != MAGIC {
            return Err(GeodeskError::corrupt(0, "bad magic"));
        }
        let version = read_u32_le(bytes, 4);
        if version != CURRENT_VERSION {
            return Err(GeodeskError::VersionMismatch {
                found: version,
                expected: CURRENT_VERSION,
            });
        }
        let page_size_exponent = bytes[8];
        let flags = [bytes[9], bytes[10], bytes[11]];
        let mut guid = [0u8; 16];
        guid.copy_from_slice(&bytes[12..28]);
        let revision = read_u32_le(bytes, 28);
        let revision_timestamp = read_u64_le(bytes, 32);
        let string_table_blob_ref = read_u32_le(bytes, 40);
        let properties_blob_ref = read_u32_le(bytes, 44);
        let indexed_keys_blob_ref = read_u32_le(bytes, 48);
        let tile_index_root = read_u32_le(bytes, 52);
        let free_list_root = read_u32_le(bytes, 56);
        let stored_crc = read_u32_le(bytes, 60);
        let computed_crc = crc32c::crc32c(&bytes[0..60]);
        if stored_crc != computed_crc {
            return Err(GeodeskError::corrupt(
                60,
                format!("header CRC mismatch: stored {stored_crc:#x}, computed {computed_crc:#x}"),
            ));
        }

        Ok(GolHeader {
            version,
            page_size_exponent,
            flags,
            guid,
            revision,
            revision_timestamp,
            string_table_blob_ref,
            properties_blob_ref,
            indexed_keys_blob_ref,
            tile_index_root,
            free_list_root,
        })
    }

    /// Serializes the header into a freshly computed, CRC-sealed 64-byte
    /// buffer. The header becomes visible to readers only once this buffer
    /// is written in place and the CRC matches (spec §3.1 invariant).
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        write_u32_le(&mut buf, 4, self.version);
        buf[8] = self.page_size_exponent;
        buf[9..12].copy_from_slice(&self.flags);
        buf[12..28].copy_from_slice(&self.guid);
        write_u32_le(&mut buf, 28, self.revision);
        write_u64_le(&mut buf, 32, self.revision_timestamp);
        write_u32_le(&mut buf, 40, self.string_table_blob_ref);
        write_u32_le(&mut buf, 44, self.properties_blob_ref);
        write_u32_le(&mut buf, 48, self.indexed_keys_blob_ref);
        write_u32_le(&mut buf, 52, self.tile_index_root);
        write_u32_le(&mut buf, 56, self.free_list_root);
        let crc = crc32c::crc32c(&buf[0..60]);
        write_u32_le(&mut buf, 60, crc);
        buf
    }
}
