//! # Revision Writer and Snapshots
//!
//! A [`RevisionWriter`] is the single writer's view of the next revision:
//! the primary document tree plus every secondary index tree it touches,
//! each opened copy-on-write from the previous revision's manifest.
//! Committing walks all of them through the commit protocol and publishes
//! one manifest atomically; any failure discards the staged writes and the
//! previous revision stays the servable head.
//!
//! A [`Snapshot`] is a reader's view of one committed revision. It holds a
//! clonable store handle and the revision manifest, and resolves record and
//! index lookups against published, immutable pages — no coordination with
//! the writer is needed.

use eyre::{Result, WrapErr};
use hashbrown::HashMap;
use tracing::debug;

use crate::index::{record_id_for, IndexDef, IndexId, IndexKey, Posting};
use crate::node::NodeId;
use crate::page::DurableRef;
use crate::store::{MemStore, PageWriter, RevisionManifest, StoreReader};
use crate::tree::{read_record, PageTree};

pub struct RevisionWriter {
    base: Option<RevisionManifest>,
    tree: PageTree,
    indexes: HashMap<u32, PageTree>,
}

impl RevisionWriter {
    /// Open the next revision on top of the store's current head (or the
    /// empty state for the first revision).
    pub fn begin(store: &MemStore) -> Self {
        let base = store.head();
        let tree = match base.as_ref().and_then(|m| m.tree_root) {
            Some(root) => PageTree::from_durable(root),
            None => PageTree::new(),
        };
        Self {
            base,
            tree,
            indexes: HashMap::new(),
        }
    }

    /// The primary document tree of this revision.
    pub fn tree_mut(&mut self) -> &mut PageTree {
        &mut self.tree
    }

    /// The index tree for `def`, opened copy-on-write from the base
    /// revision on first touch.
    pub fn index_tree_mut(&mut self, def: &IndexDef) -> &mut PageTree {
        let base = &self.base;
        self.indexes.entry(def.id.0).or_insert_with(|| {
            match base.as_ref().and_then(|m| m.index_root(def.id)) {
                Some(root) => PageTree::from_durable(root),
                None => PageTree::new(),
            }
        })
    }

    /// Persist every dirty page of this revision and publish its manifest.
    /// All-or-nothing: on any error the staged writes are discarded and the
    /// previous revision remains the head; the failed writer is consumed.
    pub fn commit(mut self, store: &mut MemStore) -> Result<u64> {
        match self.persist_roots(store) {
            Ok((tree_root, index_roots)) => {
                let revision = store.publish_revision(tree_root, index_roots);
                debug!(revision, "revision committed");
                Ok(revision)
            }
            Err(e) => {
                store.discard_revision();
                Err(e)
            }
        }
    }

    /// Abandon this revision: log-resident pages and staged writes are
    /// dropped in memory, nothing durable changed.
    pub fn abort(self, store: &mut MemStore) {
        store.discard_revision();
    }

    fn persist_roots(
        &mut self,
        store: &mut MemStore,
    ) -> Result<(Option<DurableRef>, Vec<(IndexId, DurableRef)>)> {
        store
            .commit(self.tree.root_mut())
            .wrap_err("failed to commit the document tree")?;
        let tree_root = self.tree.root().durable_ref();

        // Indexes untouched by this revision carry their roots forward.
        let mut index_roots: Vec<(IndexId, DurableRef)> = self
            .base
            .as_ref()
            .map(|m| {
                m.index_roots
                    .iter()
                    .filter(|(id, _)| !self.indexes.contains_key(&id.0))
                    .copied()
                    .collect()
            })
            .unwrap_or_default();

        let mut touched: Vec<u32> = self.indexes.keys().copied().collect();
        touched.sort_unstable();
        for id in touched {
            if let Some(tree) = self.indexes.get_mut(&id) {
                store
                    .commit(tree.root_mut())
                    .wrap_err_with(|| format!("failed to commit index {id}"))?;
                if let Some(root) = tree.root().durable_ref() {
                    index_roots.push((IndexId(id), root));
                }
            }
        }
        index_roots.sort_unstable_by_key(|(id, _)| id.0);
        Ok((tree_root, index_roots))
    }
}

/// Immutable view of one committed revision.
pub struct Snapshot {
    reader: StoreReader,
    manifest: RevisionManifest,
}

impl Snapshot {
    pub fn open(reader: StoreReader, revision: u64) -> Result<Self> {
        let manifest = reader.manifest(revision)?;
        Ok(Self { reader, manifest })
    }

    pub fn head(reader: StoreReader) -> Result<Self> {
        let revision = reader
            .head_revision()
            .ok_or_else(|| eyre::eyre!("store has no committed revision"))?;
        Self::open(reader, revision)
    }

    pub fn revision(&self) -> u64 {
        self.manifest.revision
    }

    /// Read one record of the primary tree.
    pub fn record(&self, record_id: u64) -> Result<Option<Vec<u8>>> {
        match self.manifest.tree_root {
            Some(root) => read_record(&self.reader, &root, record_id),
            None => Ok(None),
        }
    }

    /// Node ids indexed under `key` in the given index, in application
    /// order. An index with no committed root answers with no matches.
    pub fn index_lookup(&self, index: IndexId, key: &IndexKey) -> Result<Vec<NodeId>> {
        let Some(root) = self.manifest.index_root(index) else {
            return Ok(Vec::new());
        };
        let record_id = record_id_for(key);
        match read_record(&self.reader, &root, record_id)? {
            Some(bytes) => {
                let posting = Posting::decode(&bytes)
                    .wrap_err_with(|| format!("corrupt posting for index {}", index.0))?;
                Ok(posting.nodes_for(key).map(<[NodeId]>::to_vec).unwrap_or_default())
            }
            None => Ok(Vec::new()),
        }
    }
}
