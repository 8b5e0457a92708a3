//! Write-ahead journal protecting header/tile-index updates against torn
//! writes (spec §4.1, §6 "Journal file").
//!
//! A transaction's only crash-unsafe work is overwriting the header and
//! tile-index pages *in place*; everything else (new tile blobs) is pure
//! allocation and is simply orphaned, never half-applied, if a crash
//! happens before the header is updated to point at it. The journal
//! protects exactly the in-place region:
//!
//! 1. **Stage** — new/modified tile blobs are written to their (already
//!    free) destination pages. Not journaled: these pages are not yet
//!    reachable from the header.
//! 2. **Journal** — pre-images of every header/tile-index byte range about
//!    to change are appended here, each tagged with a monotonically
//!    increasing marker.
//! 3. **Seal** — a terminal block (the `JOURNAL_END` marker bit, payload =
//!    CRC32-C over every preceding byte) is appended and the file is
//!    `fsync`'d.
//! 4. **Apply** — the header/tile-index regions are overwritten in place
//!    and `fsync`'d.
//! 5. **Truncate** — the journal file is truncated to empty.
//!
//! Recovery (on open): if a *complete, CRC-valid* journal is found, every
//! pre-image is unconditionally written back (this is a no-op if Apply
//! never ran, and a rollback if it did), and the journal is truncated. A
//! transaction is only durably "committed" once Truncate completes --
//! anything observed between Seal and Truncate is rolled back on the next
//! open, which is one of the two states spec §8 property 7 allows.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::codec::varint::{decode_varint_safe, encode_varint};
use crate::error::{GeodeskError, Result};

const JOURNAL_END_FLAG: u64 = 1 << 63;
const MARKER_MASK: u64 = !JOURNAL_END_FLAG;

/// A single pre-image entry: the byte range `[offset, offset+bytes.len())`
/// in the data file, and the bytes that were there before the transaction.
#[derive(Debug, Clone)]
pub struct PreImage {
    pub offset: u64,
    pub bytes: Vec<u8>,
}

pub struct Journal {
    path: PathBuf,
    file: Option<File>,
    entries: Vec<PreImage>,
    next_marker: u64,
}

impl Journal {
    pub fn path_for(gol_path: &Path) -> PathBuf {
        let mut p = gol_path.to_path_buf();
        let mut name = p
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".journal");
        p.set_file_name(name);
        p
    }

    pub fn new(gol_path: &Path) -> Self {
        Journal {
            path: Self::path_for(gol_path),
            file: None,
            entries: Vec::new(),
            next_marker: 1,
        }
    }

    /// Stage: record a pre-image in memory; nothing touches disk yet.
    pub fn record(&mut self, offset: u64, bytes: Vec<u8>) {
        self.entries.push(PreImage { offset, bytes });
    }

    /// Journal + Seal: append every recorded pre-image plus the terminal
    /// CRC block, then `fsync`.
    pub fn seal(&mut self) -> Result<()> {
        let mut buf = Vec::new();
        for entry in &self.entries {
            let marker = self.next_marker;
            self.next_marker += 1;
            buf.extend_from_slice(&marker.to_le_bytes());
            encode_varint(entry.offset, &mut buf);
            encode_varint(entry.bytes.len() as u64, &mut buf);
            buf.extend_from_slice(&entry.bytes);
        }
        let crc = crc32c::crc32c(&buf);
        let terminal_marker = self.next_marker | JOURNAL_END_FLAG;
        buf.extend_from_slice(&terminal_marker.to_le_bytes());
        buf.extend_from_slice(&crc.to_le_bytes());

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)
            .map_err(|e| GeodeskError::io(&self.path, e))?;
        file.write_all(&buf)
            .map_err(|e| GeodeskError::io(&self.path, e))?;
        file.sync_all().map_err(|e| GeodeskError::io(&self.path, e))?;
        self.file = Some(file);
        debug!("journal sealed: {} entries, {} bytes", self.entries.len(), buf.len());
        Ok(())
    }

    /// Truncate: the transaction is now durably committed.
    pub fn truncate(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.set_len(0).map_err(|e| GeodeskError::io(&self.path, e))?;
        } else if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| GeodeskError::io(&self.path, e))?;
        }
        self.entries.clear();
        Ok(())
    }

    /// Recovery: if a complete, CRC-valid journal exists at `gol_path`,
    /// returns its pre-images (caller writes them back to `gol_path` and
    /// then calls [`discard`]). Returns `Ok(None)` if there is no journal
    /// or it is an incomplete/partial one left by a crash before Seal --
    /// in that case the data file is already in its pre-transaction state
    /// and the partial journal is simply discarded.
    pub fn recover(gol_path: &Path) -> Result<Option<Vec<PreImage>>> {
        let path = Self::path_for(gol_path);
        if !path.exists() {
            return Ok(None);
        }
        let mut file = File::open(&path).map_err(|e| GeodeskError::io(&path, e))?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)
            .map_err(|e| GeodeskError::io(&path, e))?;
        if bytes.is_empty() {
            std::fs::remove_file(&path).map_err(|e| GeodeskError::io(&path, e))?;
            return Ok(None);
        }

        match parse_journal(&bytes) {
            Ok(entries) => {
                debug!("recovering {} journaled pre-images from {:?}", entries.len(), path);
                Ok(Some(entries))
            }
            Err(_) => {
                warn!("discarding incomplete journal at {:?} (crash before Seal)", path);
                std::fs::remove_file(&path).map_err(|e| GeodeskError::io(&path, e))?;
                Ok(None)
            }
        }
    }

    /// Writes every recovered pre-image back to `gol_path` and removes the
    /// journal file. Call after [`recover`] returns `Some`.
    pub fn apply_recovery(gol_path: &Path, entries: &[PreImage]) -> Result<()> {
        let mut file = OpenOptions::new()
            .write(true)
            .open(gol_path)
            .map_err(|e| GeodeskError::io(gol_path, e))?;
        for entry in entries {
            file.seek(SeekFrom::Start(entry.offset))
                .map_err(|e| GeodeskError::io(gol_path, e))?;
            file.write_all(&entry.bytes)
                .map_err(|e| GeodeskError::io(gol_path, e))?;
        }
        file.sync_all().map_err(|e| GeodeskError::io(gol_path, e))?;
        let journal_path = Self::path_for(gol_path);
        if journal_path.exists() {
            std::fs::remove_file(&journal_path).map_err(|e| GeodeskError::io(&journal_path, e))?;
        }
        Ok(())
    }
}

/// Parses a journal buffer, requiring a complete, CRC-valid terminal block.
/// Any truncation or corruption (crash mid-Journal/Seal) is reported as an
/// error, which the caller treats as "discard, nothing to recover".
fn parse_journal(bytes: &[u8]) -> Result<Vec<PreImage>> {
    let mut entries = Vec::new();
    let mut pos = 0usize;
    loop {
        if pos + 8 > bytes.len() {
            return Err(GeodeskError::corrupt(pos as u64, "journal truncated mid-marker"));
        }
        let mut marker_bytes = [0u8; 8];
        marker_bytes.copy_from_slice(&bytes[pos..pos + 8]);
        let marker = u64::from_le_bytes(marker_bytes);
        pos += 8;

        if marker & JOURNAL_END_FLAG != 0 {
            if pos + 4 > bytes.len() {
                return Err(GeodeskError::corrupt(pos as u64, "journal truncated mid-terminal-crc"));
            }
            let stored_crc = u32::from_le_bytes(bytes[pos..pos + 4].try_into().unwrap());
            let computed_crc = crc32c::crc32c(&bytes[0..pos - 8]);
            if stored_crc != computed_crc {
                return Err(GeodeskError::corrupt(pos as u64, "journal terminal CRC mismatch"));
            }
            pos += 4;
            if pos != bytes.len() {
                return Err(GeodeskError::corrupt(pos as u64, "trailing bytes after journal terminal block"));
            }
            return Ok(entries);
        }

        let _epoch = marker & MARKER_MASK;
        let offset = decode_varint_safe(bytes, &mut pos, bytes.len())?;
        let length = decode_varint_safe(bytes, &mut pos, bytes.len())? as usize;
        if pos + length > bytes.len() {
            return Err(GeodeskError::corrupt(pos as u64, "journal truncated mid-payload"));
        }
        entries.push(PreImage {
            offset,
            bytes: bytes[pos..pos + length].to_vec(),
        });
        pos += length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    #[test]
    fn seal_then_recover_round_trips_preimages() {
        let dir = tempfile::tempdir().unwrap();
        let gol_path = dir.path().join("test.gol");
        std::fs::File::create(&gol_path).unwrap();

        let mut journal = Journal::new(&gol_path);
        journal.record(0, vec![1, 2, 3, 4]);
        journal.record(100, vec![9, 9]);
        journal.seal().unwrap();

        let recovered = Journal::recover(&gol_path).unwrap().unwrap();
        assert_eq!(recovered.len(), 2);
        assert_eq!(recovered[0].offset, 0);
        assert_eq!(recovered[0].bytes, vec![1, 2, 3, 4]);
        assert_eq!(recovered[1].offset, 100);

        journal.truncate().unwrap();
        assert!(Journal::recover(&gol_path).unwrap().is_none());
    }

    #[test]
    fn truncated_journal_is_discarded_not_applied() {
        let dir = tempfile::tempdir().unwrap();
        let gol_path = dir.path().join("test.gol");
        std::fs::File::create(&gol_path).unwrap();

        let mut journal = Journal::new(&gol_path);
        journal.record(0, vec![1, 2, 3, 4]);
        journal.seal().unwrap();

        // Simulate a crash mid-write: truncate the journal file partway
        // through, before the terminal block was ever written.
        let journal_path = Journal::path_for(&gol_path);
        let full = std::fs::read(&journal_path).unwrap();
        let mut partial = std::fs::OpenOptions::new()
            .write(true)
            .truncate(true)
            .open(&journal_path)
            .unwrap();
        partial.write_all(&full[..full.len() - 3]).unwrap();
        drop(partial);

        assert!(Journal::recover(&gol_path).unwrap().is_none());
        assert!(!journal_path.exists());
    }

    #[test]
    fn apply_recovery_writes_preimages_back_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let gol_path = dir.path().join("test.gol");
        std::fs::write(&gol_path, [0u8; 16]).unwrap();

        let mut journal = Journal::new(&gol_path);
        journal.record(4, vec![0xaa, 0xbb, 0xcc, 0xdd]);
        journal.seal().unwrap();

        let entries = Journal::recover(&gol_path).unwrap().unwrap();
        // Simulate that Apply already overwrote the region before the crash.
        std::fs::write(&gol_path, [0xffu8; 16]).unwrap();
        Journal::apply_recovery(&gol_path, &entries).unwrap();

        let data = std::fs::read(&gol_path).unwrap();
        assert_eq!(&data[4..8], &[0xaa, 0xbb, 0xcc, 0xdd]);
        assert!(!Journal::path_for(&gol_path).exists());
    }
}
