//! # In-Memory Store
//!
//! The reference implementation of the [`PageWriter`] contract: a transient
//! write log (hash map of log key to page), an append-only durable page
//! table, and a revision manifest index. Durable appends are staged and
//! become visible only when the whole revision publishes, which gives the
//! all-or-nothing commit the protocol requires without a real disk.
//!
//! ## Single Writer, Many Readers
//!
//! The durable page table and the manifest index sit behind
//! `parking_lot::RwLock`s shared with every [`StoreReader`] handle. The one
//! writer stages into private buffers and takes the write locks only for
//! the final publish, so snapshot readers proceed concurrently with an
//! in-progress commit and never see a half-published revision.
//!
//! ## Durable Keys
//!
//! A staged page's key is `published + position-in-stage`; since the writer
//! is alone, the published length cannot move under it. Keys handed out by
//! a failed (discarded) revision are reissued by the next one — they never
//! escaped into a manifest, so nothing dangles.

use std::sync::Arc;

use eyre::{ensure, eyre, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::codec::{self, WireFormat};
use crate::index::IndexId;
use crate::page::{DurableRef, Page, PageReference};
use crate::store::{commit_reference, PageWriter};

/// What one committed revision is made of: the durable root of the document
/// tree and the durable roots of every secondary index.
#[derive(Debug, Clone)]
pub struct RevisionManifest {
    pub revision: u64,
    pub tree_root: Option<DurableRef>,
    pub index_roots: Vec<(IndexId, DurableRef)>,
}

impl RevisionManifest {
    pub fn index_root(&self, id: IndexId) -> Option<DurableRef> {
        self.index_roots
            .iter()
            .find(|(i, _)| *i == id)
            .map(|(_, d)| *d)
    }
}

pub struct MemStore {
    pages: Arc<RwLock<Vec<Arc<[u8]>>>>,
    manifests: Arc<RwLock<Vec<RevisionManifest>>>,
    log: HashMap<u32, Page>,
    next_log_key: u32,
    staged: Vec<Arc<[u8]>>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            pages: Arc::new(RwLock::new(Vec::new())),
            manifests: Arc::new(RwLock::new(Vec::new())),
            log: HashMap::new(),
            next_log_key: 0,
            staged: Vec::new(),
        }
    }

    /// A cheap, clonable read handle sharing this store's published state.
    pub fn reader(&self) -> StoreReader {
        StoreReader {
            pages: Arc::clone(&self.pages),
            manifests: Arc::clone(&self.manifests),
        }
    }

    /// Manifest of the latest published revision.
    pub fn head(&self) -> Option<RevisionManifest> {
        self.manifests.read().last().cloned()
    }

    /// Number of pages in the published durable store.
    pub fn published_len(&self) -> usize {
        self.pages.read().len()
    }

    /// Number of staged (not yet published) durable pages.
    pub fn staged_len(&self) -> usize {
        self.staged.len()
    }

    /// Number of pages sitting in the transient write log.
    pub fn log_len(&self) -> usize {
        self.log.len()
    }

    /// Publish the staged pages and the new revision manifest atomically.
    /// The transient log is discarded; committed references no longer point
    /// into it and uncommitted branches are dead by definition.
    pub fn publish_revision(
        &mut self,
        tree_root: Option<DurableRef>,
        index_roots: Vec<(IndexId, DurableRef)>,
    ) -> u64 {
        let staged = self.staged.len();
        {
            let mut pages = self.pages.write();
            pages.extend(self.staged.drain(..));
        }
        let revision = {
            let mut manifests = self.manifests.write();
            let revision = manifests.len() as u64;
            manifests.push(RevisionManifest {
                revision,
                tree_root,
                index_roots,
            });
            revision
        };
        self.log.clear();
        debug!(revision, pages = staged, "revision published");
        revision
    }

    /// Drop everything the open revision wrote. The previous head stays the
    /// servable state; nothing durable needs rolling back because nothing
    /// durable was published.
    pub fn discard_revision(&mut self) {
        let staged = self.staged.len();
        let logged = self.log.len();
        self.staged.clear();
        self.log.clear();
        debug!(staged, logged, "revision discarded; previous head remains servable");
    }
}

impl PageWriter for MemStore {
    fn allocate_log(&mut self, page: Page) -> u32 {
        let key = self.next_log_key;
        self.next_log_key += 1;
        self.log.insert(key, page);
        key
    }

    fn log_page(&self, log_key: u32) -> Option<&Page> {
        self.log.get(&log_key)
    }

    fn take_log_page(&mut self, log_key: u32) -> Result<Page> {
        self.log
            .remove(&log_key)
            .ok_or_else(|| eyre!("no page in the write log under key {log_key}"))
    }

    fn put_log_page(&mut self, log_key: u32, page: Page) {
        self.log.insert(log_key, page);
    }

    fn append_durable(&mut self, bytes: Vec<u8>) -> Result<u64> {
        let key = self.pages.read().len() as u64 + self.staged.len() as u64;
        self.staged.push(bytes.into());
        Ok(key)
    }

    fn read_page(&self, key: u64, checksum: Option<u64>) -> Result<Page> {
        let bytes = {
            let pages = self.pages.read();
            let published = pages.len() as u64;
            if key < published {
                pages[key as usize].clone()
            } else {
                let staged_index = (key - published) as usize;
                self.staged
                    .get(staged_index)
                    .cloned()
                    .ok_or_else(|| eyre!("no durable page under key {key}"))?
            }
        };
        if let Some(expected) = checksum {
            let actual = codec::crc64(&bytes);
            ensure!(
                actual == expected,
                "page {key} checksum mismatch: stored {actual:#018x}, expected {expected:#018x}"
            );
        }
        codec::deserialize_page(&bytes, WireFormat::Durable)
    }

    fn commit(&mut self, reference: &mut PageReference) -> Result<()> {
        commit_reference(self, reference)
    }
}

/// Shared read handle over the published half of a [`MemStore`]. Clonable,
/// thread-safe, and oblivious to any in-progress write.
#[derive(Clone)]
pub struct StoreReader {
    pages: Arc<RwLock<Vec<Arc<[u8]>>>>,
    manifests: Arc<RwLock<Vec<RevisionManifest>>>,
}

impl StoreReader {
    pub fn read_page(&self, key: u64, checksum: Option<u64>) -> Result<Page> {
        let bytes = {
            let pages = self.pages.read();
            pages
                .get(key as usize)
                .cloned()
                .ok_or_else(|| eyre!("no published page under key {key}"))?
        };
        if let Some(expected) = checksum {
            let actual = codec::crc64(&bytes);
            ensure!(
                actual == expected,
                "page {key} checksum mismatch: stored {actual:#018x}, expected {expected:#018x}"
            );
        }
        codec::deserialize_page(&bytes, WireFormat::Durable)
    }

    pub fn manifest(&self, revision: u64) -> Result<RevisionManifest> {
        self.manifests
            .read()
            .get(revision as usize)
            .cloned()
            .ok_or_else(|| eyre!("no published revision {revision}"))
    }

    pub fn head_revision(&self) -> Option<u64> {
        let manifests = self.manifests.read();
        manifests.last().map(|m| m.revision)
    }

    pub fn page_count(&self) -> usize {
        self.pages.read().len()
    }
}
