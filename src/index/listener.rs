//! # Incremental Index Listener
//!
//! Keeps an index current while a write transaction mutates the live
//! document tree. The transaction delivers exactly one event per structural
//! mutation, in mutation order; the listener applies the matching insert or
//! remove through the shared page machinery.
//!
//! Unlike the bulk builder, the listener is strict: a key-extraction
//! failure propagates and fails the triggering mutation, because silently
//! skipping would leave the index inconsistent with a tree the caller
//! believes fully indexed. An update extracts both the old and the new key
//! *before* touching the index, so a failing half cannot leave the other
//! half applied.
//!
//! The listener does not deduplicate: delivering the same event twice
//! yields two applications. Single delivery is the enclosing transaction's
//! contract.

use eyre::{Result, WrapErr};

use crate::index::{apply_insert, apply_remove, extractor_for, IndexDef, IndexKey, KeyExtractor};
use crate::node::NodeSnapshot;
use crate::store::PageWriter;
use crate::tree::{PageTree, RevisionWriter};

/// One structural mutation of the document tree.
#[derive(Debug, Clone)]
pub enum MutationEvent {
    Inserted(NodeSnapshot),
    Updated { old: NodeSnapshot, new: NodeSnapshot },
    Removed(NodeSnapshot),
}

pub struct IndexListener<'t> {
    def: IndexDef,
    extractor: Box<dyn KeyExtractor>,
    tree: &'t mut PageTree,
}

pub struct IndexListenerFactory;

impl IndexListenerFactory {
    /// A listener bound to the index's store region in this revision and to
    /// the key-extraction policy of `def.kind`.
    pub fn create<'t>(revision: &'t mut RevisionWriter, def: &IndexDef) -> IndexListener<'t> {
        IndexListener {
            def: def.clone(),
            extractor: extractor_for(&def.kind),
            tree: revision.index_tree_mut(def),
        }
    }
}

impl IndexListener<'_> {
    fn extract(&self, node: &NodeSnapshot) -> Result<Option<IndexKey>> {
        self.extractor.extract(node).wrap_err_with(|| {
            format!(
                "index {} cannot derive a key for node {}; mutation fails",
                self.def.id.0, node.id
            )
        })
    }

    /// Apply one mutation event. Errors fail the enclosing mutation.
    pub fn on_event(&mut self, writer: &mut dyn PageWriter, event: &MutationEvent) -> Result<()> {
        match event {
            MutationEvent::Inserted(node) => {
                if let Some(key) = self.extract(node)? {
                    apply_insert(self.tree, writer, &key, node.id)?;
                }
            }
            MutationEvent::Removed(node) => {
                if let Some(key) = self.extract(node)? {
                    apply_remove(self.tree, writer, &key, node.id)?;
                }
            }
            MutationEvent::Updated { old, new } => {
                // Both keys first: a failing extraction must not leave a
                // half-applied update behind.
                let old_key = self.extract(old)?;
                let new_key = self.extract(new)?;
                if let Some(key) = old_key {
                    apply_remove(self.tree, writer, &key, old.id)?;
                }
                if let Some(key) = new_key {
                    apply_insert(self.tree, writer, &key, new.id)?;
                }
            }
        }
        Ok(())
    }
}
