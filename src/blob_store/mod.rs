//! Paged, mmap-backed file store with a free-list and journal-protected
//! metadata (spec §4.1).
//!
//! A [`BlobStore`] owns the file handle and the current read-only mapping.
//! Readers obtain an `Arc<Mmap>` snapshot through [`BlobStore::read_blob`];
//! that snapshot keeps the underlying mapping alive even if a concurrent
//! writer transaction grows the file and remaps afterwards, which is how
//! spec §5's "mapped regions of in-use tiles remain valid until the query
//! ends" is honored without a lock held across an entire query.
//!
//! Writers never overwrite a live tile blob in place -- `alloc_blob` always
//! hands out fresh pages, and pages freed by a transaction are only
//! recycled once [`BlobStore::begin_transaction`] observes that no queries
//! started before the freeing transaction are still outstanding (tracked by
//! [`BlobStore::active_queries`]). This is the pragmatic answer to the
//! "when is it safe to reuse a freed tile's pages" question that spec §5
//! leaves to the implementation; see DESIGN.md for the reasoning.

pub mod blob;
pub mod freelist;
pub mod header;
pub mod journal;

use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use fs2::FileExt;
use log::{debug, info};
use memmap2::Mmap;

pub use blob::{BlobKind, BlobPrefix, BLOB_PREFIX_SIZE};
pub use freelist::FreeList;
pub use header::{GolHeader, HEADER_SIZE, NULL_PAGE};
pub use journal::{Journal, PreImage};

use crate::error::{GeodeskError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    ReadOnly,
    ReadWrite,
}

/// A borrowed view into a blob's payload, backed by a retained mmap
/// snapshot. Cheap to clone the underlying `Arc`; the bytes stay valid even
/// after the store remaps for a later transaction.
#[derive(Clone)]
pub struct BlobView {
    mmap: Arc<Mmap>,
    offset: usize,
    len: usize,
}

impl BlobView {
    pub fn as_bytes(&self) -> &[u8] {
        &self.mmap[self.offset..self.offset + self.len]
    }
}

impl std::ops::Deref for BlobView {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// RAII guard tracking one in-flight query against a store snapshot;
/// dropping it allows a subsequent transaction to recycle pages that were
/// freed while this query (or an earlier one) was running.
pub struct QueryGuard<'a> {
    store: &'a BlobStore,
}

impl Drop for QueryGuard<'_> {
    fn drop(&mut self) {
        self.store.active_queries.fetch_sub(1, Ordering::AcqRel);
    }
}

pub struct BlobStore {
    path: PathBuf,
    file: Mutex<File>,
    mode: OpenMode,
    page_size: u32,
    mmap: RwLock<Arc<Mmap>>,
    header: RwLock<GolHeader>,
    free_list: Mutex<FreeList>,
    journal: Mutex<Journal>,
    active_queries: AtomicUsize,
    pending_free: Mutex<Vec<(u32, u32)>>,
}

impl BlobStore {
    /// Opens (or creates, in `ReadWrite` mode) the GOL file at `path`,
    /// running journal recovery first if a stale journal is present.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(entries) = Journal::recover(&path)? {
            Journal::apply_recovery(&path, &entries)?;
            info!("blob store: recovered {} journal entries on open", entries.len());
        }

        let existed = path.exists();
        let mut open_opts = OpenOptions::new();
        open_opts.read(true);
        if mode == OpenMode::ReadWrite {
            open_opts.write(true).create(true);
        }
        let mut file = open_opts
            .open(&path)
            .map_err(|e| GeodeskError::io(&path, e))?;

        if mode == OpenMode::ReadWrite {
            // Advisory, file-level, released automatically when `file` is
            // dropped or the process exits (spec §5 "Writer lock is
            // file-level ... so concurrent processes can open the same GOL").
            file.try_lock_exclusive().map_err(|_| GeodeskError::LockConflict)?;
        }

        if !existed || file.metadata().map(|m| m.len()).unwrap_or(0) < HEADER_SIZE as u64 {
            if mode != OpenMode::ReadWrite {
                return Err(GeodeskError::corrupt(0, "file shorter than header"));
            }
            let header = GolHeader::new_empty(16, new_guid());
            file.set_len(u64::from(header.page_size())).map_err(|e| GeodeskError::io(&path, e))?;
            file.seek(SeekFrom::Start(0)).map_err(|e| GeodeskError::io(&path, e))?;
            file.write_all(&header.to_bytes()).map_err(|e| GeodeskError::io(&path, e))?;
            file.sync_all().map_err(|e| GeodeskError::io(&path, e))?;
        }

        let mmap = unsafe { Mmap::map(&file).map_err(|e| GeodeskError::io(&path, e))? };
        let header = GolHeader::parse(&mmap[0..HEADER_SIZE])?;
        let page_size = header.page_size();

        let mmap = Arc::new(mmap);
        let free_list = if header.free_list_root == NULL_PAGE {
            FreeList::new()
        } else {
            let blob = read_blob_at(mmap.clone(), header.free_list_root, page_size)?;
            FreeList::deserialize(blob.as_bytes())?
        };

        debug!(
            "blob store opened: {:?}, page_size={}, mode={:?}",
            path, page_size, mode
        );

        Ok(BlobStore {
            path,
            file: Mutex::new(file),
            mode,
            page_size,
            mmap: RwLock::new(mmap),
            header: RwLock::new(header),
            free_list: Mutex::new(free_list),
            journal: Mutex::new(Journal::new(&path)),
            active_queries: AtomicUsize::new(0),
            pending_free: Mutex::new(Vec::new()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn page_size(&self) -> u32 {
        self.page_size
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn header(&self) -> GolHeader {
        self.header.read().unwrap().clone()
    }

    /// Marks the beginning of one query's use of the current snapshot;
    /// the returned guard must be held for the query's lifetime.
    pub fn begin_query(&self) -> QueryGuard<'_> {
        self.active_queries.fetch_add(1, Ordering::AcqRel);
        QueryGuard { store: self }
    }

    fn snapshot(&self) -> Arc<Mmap> {
        self.mmap.read().unwrap().clone()
    }

    /// Reads the blob whose payload begins at `page_num` pages into the
    /// file (i.e. at byte offset `page_num * page_size + BLOB_PREFIX_SIZE`).
    pub fn read_blob(&self, page_num: u32) -> Result<BlobView> {
        let mmap = self.snapshot();
        read_blob_at(mmap, page_num, self.page_size)
    }

    /// Allocates space for a new blob of `payload_size` bytes and writes
    /// `payload` into it, returning the page number. Requires `ReadWrite`
    /// mode; growth beyond the current file length extends the file.
    pub fn alloc_blob(&self, kind: BlobKind, payload: &[u8]) -> Result<u32> {
        self.require_writable()?;
        let prefix = BlobPrefix {
            payload_size: payload.len() as u32,
            kind,
        };
        let pages_needed = prefix.blob_pages(self.page_size);

        let mut free_list = self.free_list.lock().unwrap();
        let page_num = match free_list.alloc(pages_needed) {
            Some(p) => p,
            None => self.grow(pages_needed)?,
        };
        drop(free_list);

        let mut buf = vec![0u8; (pages_needed * self.page_size) as usize];
        prefix.write(&mut buf[0..BLOB_PREFIX_SIZE]);
        buf[BLOB_PREFIX_SIZE..BLOB_PREFIX_SIZE + payload.len()].copy_from_slice(payload);
        self.write_at(u64::from(page_num) * u64::from(self.page_size), &buf)?;
        Ok(page_num)
    }

    /// Stages `(page_num, pages)` for reclamation; actual recycling is
    /// deferred to the next [`begin_transaction`] that observes zero active
    /// queries, so in-flight readers of the freed blob remain valid.
    pub fn free_blob(&self, page_num: u32, pages: u32) -> Result<()> {
        self.require_writable()?;
        self.pending_free.lock().unwrap().push((page_num, pages));
        Ok(())
    }

    fn grow(&self, pages_needed: u32) -> Result<u32> {
        let file = self.file.lock().unwrap();
        let current_len = file.metadata().map_err(|e| GeodeskError::io(&self.path, e))?.len();
        let current_pages = (current_len / u64::from(self.page_size)) as u32;
        let new_len = current_len + u64::from(pages_needed) * u64::from(self.page_size);
        file.set_len(new_len).map_err(|e| GeodeskError::io(&self.path, e))?;
        Ok(current_pages)
    }

    fn write_at(&self, offset: u64, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(offset)).map_err(|e| GeodeskError::io(&self.path, e))?;
        file.write_all(bytes).map_err(|e| GeodeskError::io(&self.path, e))
    }

    fn require_writable(&self) -> Result<()> {
        if self.mode != OpenMode::ReadWrite {
            return Err(GeodeskError::corrupt(0, "store opened read-only"));
        }
        Ok(())
    }

    /// Begins a write transaction (spec §4.1, §4.8). Only one transaction
    /// may be open per process at a time; a second call blocks until the
    /// first is dropped.
    pub fn begin_transaction(&self) -> Result<Transaction<'_>> {
        self.require_writable()?;
        if self.active_queries.load(Ordering::Acquire) == 0 {
            let mut pending = self.pending_free.lock().unwrap();
            if !pending.is_empty() {
                let mut free_list = self.free_list.lock().unwrap();
                for (page, pages) in pending.drain(..) {
                    free_list.free(page, pages);
                }
            }
        }
        let header = self.header();
        Ok(Transaction {
            store: self,
            preimages: Vec::new(),
            new_header: header.clone(),
            header_before: header,
        })
    }

    /// Remaps the file after a commit so future readers see new blobs.
    fn remap(&self) -> Result<()> {
        let file = self.file.lock().unwrap();
        let mmap = unsafe { Mmap::map(&*file).map_err(|e| GeodeskError::io(&self.path, e))? };
        *self.mmap.write().unwrap() = Arc::new(mmap);
        Ok(())
    }
}

fn read_blob_at(mmap: Arc<Mmap>, page_num: u32, page_size: u32) -> Result<BlobView> {
    let raw_offset = u64::from(page_num) * u64::from(page_size);
    let offset = usize::try_from(raw_offset).map_err(|_| {
        GeodeskError::corrupt(raw_offset, "blob offset does not fit in address space")
    })?;
    if offset + BLOB_PREFIX_SIZE > mmap.len() {
        return Err(GeodeskError::corrupt(offset as u64, "blob prefix out of range"));
    }
    let prefix = BlobPrefix::read(&mmap[offset..offset + BLOB_PREFIX_SIZE]);
    let payload_start = offset + BLOB_PREFIX_SIZE;
    let payload_end = payload_start + prefix.payload_size as usize;
    if payload_end > mmap.len() {
        return Err(GeodeskError::corrupt(offset as u64, "blob payload out of range"));
    }
    Ok(BlobView {
        mmap,
        offset: payload_start,
        len: prefix.payload_size as usize,
    })
}

fn new_guid() -> [u8; 16] {
    // A GUID only needs to be unique per store, not cryptographically
    // random; seed from the wall clock and the process id.
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let pid = std::process::id();
    let mut guid = [0u8; 16];
    guid[0..16].copy_from_slice(&nanos.to_le_bytes());
    guid[0..4].copy_from_slice(&pid.to_le_bytes());
    guid
}

/// A write transaction over a [`BlobStore`] (spec §4.1 steps Stage..Truncate,
/// §4.8 state machine `Idle -> Open -> Staged -> Journaled -> Sealed ->
/// Applied -> Idle`). Tile blobs are staged immediately via
/// [`BlobStore::alloc_blob`] (plain allocation, never journaled -- an
/// unreferenced blob left by a crash is just wasted space, not corruption);
/// only the header's fixed fields are journaled, since those are the only
/// bytes ever overwritten in place.
pub struct Transaction<'a> {
    store: &'a BlobStore,
    header_before: GolHeader,
    new_header: GolHeader,
    preimages: Vec<PreImage>,
}

impl<'a> Transaction<'a> {
    pub fn store(&self) -> &'a BlobStore {
        self.store
    }

    /// Allocates and writes a new blob; part of the Stage step.
    pub fn alloc_blob(&self, kind: BlobKind, payload: &[u8]) -> Result<u32> {
        self.store.alloc_blob(kind, payload)
    }

    pub fn free_blob(&self, page_num: u32, pages: u32) -> Result<()> {
        self.store.free_blob(page_num, pages)
    }

    pub fn header(&self) -> &GolHeader {
        &self.new_header
    }

    pub fn set_tile_index_root(&mut self, page: u32) {
        self.new_header.tile_index_root = page;
    }

    pub fn set_string_table_blob_ref(&mut self, page: u32) {
        self.new_header.string_table_blob_ref = page;
    }

    pub fn set_indexed_keys_blob_ref(&mut self, page: u32) {
        self.new_header.indexed_keys_blob_ref = page;
    }

    pub fn set_properties_blob_ref(&mut self, page: u32) {
        self.new_header.properties_blob_ref = page;
    }

    pub fn set_free_list_root(&mut self, page: u32) {
        self.new_header.free_list_root = page;
    }

    /// Journal + Seal + Apply + Truncate: the only in-place-overwritten
    /// region is the fixed header, so that is the only pre-image recorded.
    /// `final_commit` bumps the revision counter and timestamp; intermediate
    /// commits of a multi-tile update pass `false` to keep staging further
    /// tiles under the same still-open transaction semantics (spec §4.8).
    pub fn commit(mut self, final_commit: bool) -> Result<()> {
        if final_commit {
            self.new_header.revision = self.header_before.revision.wrapping_add(1);
            self.new_header.revision_timestamp = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .map(|d| d.as_secs())
                .unwrap_or(0);
        }

        // Persist the free list itself as a blob, same as the other
        // metadata tables, so a reopen doesn't start from an empty list and
        // leak every page freed by prior transactions (spec §4.1).
        let free_list_bytes = self.store.free_list.lock().unwrap().serialize();
        let free_list_root = self.alloc_blob(BlobKind::FreeListNode, &free_list_bytes)?;
        self.set_free_list_root(free_list_root);

        let mut before_bytes = vec![0u8; HEADER_SIZE];
        {
            let mmap = self.store.snapshot();
            before_bytes.copy_from_slice(&mmap[0..HEADER_SIZE]);
        }
        self.preimages.push(PreImage {
            offset: 0,
            bytes: before_bytes,
        });

        let mut journal = self.store.journal.lock().unwrap();
        for p in &self.preimages {
            journal.record(p.offset, p.bytes.clone());
        }
        journal.seal()?;
        debug!("transaction sealed (revision {})", self.new_header.revision);

        let new_bytes = self.new_header.to_bytes();
        self.store.write_at(0, &new_bytes)?;
        {
            let file = self.store.file.lock().unwrap();
            file.sync_all().map_err(|e| GeodeskError::io(self.store.path(), e))?;
        }
        *self.store.header.write().unwrap() = self.new_header.clone();

        journal.truncate()?;
        drop(journal);

        self.store.remap()?;
        info!("transaction applied (revision {})", self.new_header.revision);
        Ok(())
    }

    /// Discards a transaction without applying it; allocated-but-unreferenced
    /// blobs are simply orphaned pages (recovered by a future compaction
    /// pass, out of scope here, not by this rollback).
    pub fn rollback(self) {
        debug!("transaction rolled back before commit");
    }
}
