//! # Page Tree
//!
//! The revision tree: five indirect levels of fan-out 1024 between the root
//! reference and the leaf record pages, addressing a 60-bit record id
//! space. The high 50 bits of a record id select the leaf page, ten bits
//! per level; the low ten bits select the slot inside it.
//!
//! ## Copy-on-Write Descent
//!
//! A write descends from the root, materializing a log-resident page at
//! every step:
//!
//! - an unresolved reference gets a fresh empty page (compact indirect node
//!   above the leaf level, record page at it);
//! - a log-resident reference is already writable;
//! - a durable reference is *redirected*: the persisted page is read back,
//!   a writable copy enters the log (indirect copies keep only their
//!   children's durable keys), and the reference swaps its durable key for
//!   the new log key. The persisted page itself is untouched — prior
//!   revisions keep reading it.
//!
//! Only the path from the root to the touched leaf is ever copied;
//! untouched siblings keep pointing at the previous revision's pages. A
//! level whose compact page overflows escalates to the bitmap
//! representation in place during descent.
//!
//! ## Reading
//!
//! [`read_record`] walks published pages only, for snapshot reads of
//! committed revisions. In-transaction reads go through
//! [`PageTree::update_record`], which sees the write log.

mod revision;

pub use revision::{RevisionWriter, Snapshot};

use eyre::{ensure, Result};

use crate::config::{INDIRECT_FANOUT, LEVEL_BITS, MAX_RECORD_ID, RECORD_SLOT_BITS, TREE_HEIGHT};
use crate::page::{CompactPage, DurableRef, Page, PageReference, RecordPage};
use crate::store::{PageWriter, StoreReader};

fn level_offset(leaf_no: u64, level: usize) -> u16 {
    let shift = LEVEL_BITS * (TREE_HEIGHT - 1 - level) as u32;
    ((leaf_no >> shift) & (INDIRECT_FANOUT as u64 - 1)) as u16
}

/// Make the page behind `reference` writable in the log, returning its log
/// key. `fresh` supplies the empty page for a slot nothing was ever written
/// through.
fn materialize(
    writer: &mut dyn PageWriter,
    reference: &mut PageReference,
    fresh: impl FnOnce() -> Page,
) -> Result<u32> {
    if let Some(log_key) = reference.log_key() {
        return Ok(log_key);
    }
    if let Some(durable) = reference.durable_ref() {
        let copy = match reference.cached_page() {
            Some(cached) => cached.writable_copy(),
            None => writer
                .read_page(durable.key, Some(durable.checksum))?
                .writable_copy(),
        };
        let log_key = writer.allocate_log(copy);
        reference.redirect_to_log(log_key)?;
        return Ok(log_key);
    }
    let log_key = writer.allocate_log(fresh());
    reference.mark_log_resident(log_key)?;
    Ok(log_key)
}

/// One revision's tree of pages, addressed by record id. The primary
/// document tree and every secondary index tree are instances of this same
/// structure; they differ only in what they pack into leaf values.
#[derive(Debug)]
pub struct PageTree {
    root: PageReference,
}

impl Default for PageTree {
    fn default() -> Self {
        Self::new()
    }
}

impl PageTree {
    /// An empty tree: nothing is materialized until the first write.
    pub fn new() -> Self {
        Self {
            root: PageReference::new(),
        }
    }

    /// A new revision's view of a committed tree. Copy-on-write starts at
    /// the root: the reference carries only the durable key, and descent
    /// redirects exactly the pages the revision touches.
    pub fn from_durable(root: DurableRef) -> Self {
        Self {
            root: PageReference::from_durable(root),
        }
    }

    pub fn root(&self) -> &PageReference {
        &self.root
    }

    pub fn root_mut(&mut self) -> &mut PageReference {
        &mut self.root
    }

    /// Descend to the leaf page owning `record_id`, materializing the whole
    /// path in the write log. Returns the leaf's log key.
    fn prepare_leaf(&mut self, writer: &mut dyn PageWriter, record_id: u64) -> Result<u32> {
        ensure!(
            record_id <= MAX_RECORD_ID,
            "record id {record_id} exceeds the addressable space"
        );
        let leaf_no = record_id >> RECORD_SLOT_BITS;

        let mut log_key = materialize(writer, &mut self.root, || {
            Page::Compact(CompactPage::new())
        })?;

        for level in 0..TREE_HEIGHT {
            let offset = level_offset(leaf_no, level);
            let leaf_level = level + 1 == TREE_HEIGHT;

            let mut page = writer.take_log_page(log_key)?;
            let descended = (|| {
                let child = page.indirect_get_or_create(offset)?;
                materialize(writer, child, || {
                    if leaf_level {
                        Page::Record(RecordPage::new())
                    } else {
                        Page::Compact(CompactPage::new())
                    }
                })
            })();
            writer.put_log_page(log_key, page);
            log_key = descended?;
        }
        Ok(log_key)
    }

    /// Read-modify-write one record through the open revision's view. The
    /// closure sees the current value (from the log or the durable store)
    /// and returns the new one; `None` deletes the record.
    pub fn update_record(
        &mut self,
        writer: &mut dyn PageWriter,
        record_id: u64,
        f: impl FnOnce(Option<&[u8]>) -> Result<Option<Vec<u8>>>,
    ) -> Result<()> {
        let leaf_key = self.prepare_leaf(writer, record_id)?;
        let mut page = writer.take_log_page(leaf_key)?;
        let applied = (|| {
            let record = page.as_record_mut()?;
            match f(record.get(record_id))? {
                Some(value) => record.put(record_id, value),
                None => {
                    record.remove(record_id);
                    Ok(())
                }
            }
        })();
        writer.put_log_page(leaf_key, page);
        applied
    }

    pub fn write_record(
        &mut self,
        writer: &mut dyn PageWriter,
        record_id: u64,
        value: Vec<u8>,
    ) -> Result<()> {
        self.update_record(writer, record_id, move |_| Ok(Some(value)))
    }

    pub fn remove_record(&mut self, writer: &mut dyn PageWriter, record_id: u64) -> Result<()> {
        self.update_record(writer, record_id, |_| Ok(None))
    }
}

/// Snapshot read of one record from a committed tree root, walking
/// published pages only.
pub fn read_record(
    reader: &StoreReader,
    root: &DurableRef,
    record_id: u64,
) -> Result<Option<Vec<u8>>> {
    ensure!(
        record_id <= MAX_RECORD_ID,
        "record id {record_id} exceeds the addressable space"
    );
    let leaf_no = record_id >> RECORD_SLOT_BITS;

    let mut current = *root;
    for level in 0..TREE_HEIGHT {
        let page = reader.read_page(current.key, Some(current.checksum))?;
        let offset = level_offset(leaf_no, level);
        match page.indirect_lookup(offset)? {
            Some(child) => match child.durable_ref() {
                Some(durable) => current = durable,
                None => return Ok(None),
            },
            None => return Ok(None),
        }
    }

    let leaf = reader.read_page(current.key, Some(current.checksum))?;
    Ok(leaf.as_record()?.get(record_id).map(<[u8]>::to_vec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;

    fn commit_tree(store: &mut MemStore, tree: &mut PageTree) -> DurableRef {
        store.commit(tree.root_mut()).unwrap();
        let root = tree.root().durable_ref().unwrap();
        store.publish_revision(Some(root), Vec::new());
        root
    }

    #[test]
    fn write_then_snapshot_read() {
        let mut store = MemStore::new();
        let mut tree = PageTree::new();

        tree.write_record(&mut store, 42, b"answer".to_vec()).unwrap();
        let root = commit_tree(&mut store, &mut tree);

        let value = read_record(&store.reader(), &root, 42).unwrap();
        assert_eq!(value, Some(b"answer".to_vec()));

        assert_eq!(read_record(&store.reader(), &root, 43).unwrap(), None);
    }

    #[test]
    fn records_far_apart_share_no_leaf() {
        let mut store = MemStore::new();
        let mut tree = PageTree::new();

        // Same level-0 subtree is impossible here: the ids differ in the
        // top ten bits of their 60-bit address.
        let left = 1u64;
        let right = 1u64 << 55;
        tree.write_record(&mut store, left, b"l".to_vec()).unwrap();
        tree.write_record(&mut store, right, b"r".to_vec()).unwrap();
        let root = commit_tree(&mut store, &mut tree);

        let reader = store.reader();
        assert_eq!(read_record(&reader, &root, left).unwrap(), Some(b"l".to_vec()));
        assert_eq!(read_record(&reader, &root, right).unwrap(), Some(b"r".to_vec()));
    }

    #[test]
    fn record_id_out_of_range_is_rejected() {
        let mut store = MemStore::new();
        let mut tree = PageTree::new();

        let result = tree.write_record(&mut store, MAX_RECORD_ID + 1, Vec::new());

        assert!(result.is_err());
    }

    #[test]
    fn update_record_sees_uncommitted_value() {
        let mut store = MemStore::new();
        let mut tree = PageTree::new();

        tree.write_record(&mut store, 7, b"one".to_vec()).unwrap();
        tree.update_record(&mut store, 7, |current| {
            assert_eq!(current, Some(b"one".as_slice()));
            Ok(Some(b"two".to_vec()))
        })
        .unwrap();

        let root = commit_tree(&mut store, &mut tree);
        assert_eq!(
            read_record(&store.reader(), &root, 7).unwrap(),
            Some(b"two".to_vec())
        );
    }

    #[test]
    fn remove_record_deletes() {
        let mut store = MemStore::new();
        let mut tree = PageTree::new();

        tree.write_record(&mut store, 9, b"gone".to_vec()).unwrap();
        tree.remove_record(&mut store, 9).unwrap();
        let root = commit_tree(&mut store, &mut tree);

        assert_eq!(read_record(&store.reader(), &root, 9).unwrap(), None);
    }

    #[test]
    fn new_revision_shares_untouched_subtrees() {
        let mut store = MemStore::new();
        let mut tree = PageTree::new();

        let left = 1u64;
        let right = 1u64 << 55;
        tree.write_record(&mut store, left, b"l0".to_vec()).unwrap();
        tree.write_record(&mut store, right, b"r0".to_vec()).unwrap();
        let root0 = commit_tree(&mut store, &mut tree);
        let pages_after_first = store.published_len();

        // Second revision rewrites only the left record.
        let mut tree1 = PageTree::from_durable(root0);
        tree1.write_record(&mut store, left, b"l1".to_vec()).unwrap();
        store.commit(tree1.root_mut()).unwrap();
        let root1 = tree1.root().durable_ref().unwrap();
        store.publish_revision(Some(root1), Vec::new());

        // Only the root-to-left path was rewritten: six pages (five
        // indirect levels plus the leaf), not the right subtree.
        let delta = store.published_len() - pages_after_first;
        assert_eq!(delta, TREE_HEIGHT + 1);

        let reader = store.reader();
        assert_eq!(read_record(&reader, &root1, left).unwrap(), Some(b"l1".to_vec()));
        assert_eq!(read_record(&reader, &root1, right).unwrap(), Some(b"r0".to_vec()));

        // The previous revision still serves its own view.
        assert_eq!(read_record(&reader, &root0, left).unwrap(), Some(b"l0".to_vec()));
    }

    #[test]
    fn escalation_during_descent_keeps_all_children() {
        let mut store = MemStore::new();
        let mut tree = PageTree::new();

        // Six leaves under distinct top-level offsets force the root past
        // its compact capacity mid-revision.
        let ids: Vec<u64> = (0..6u64).map(|i| i << 50).collect();
        for (i, &id) in ids.iter().enumerate() {
            tree.write_record(&mut store, id, vec![i as u8]).unwrap();
        }
        let root = commit_tree(&mut store, &mut tree);

        let reader = store.reader();
        for (i, &id) in ids.iter().enumerate() {
            assert_eq!(
                read_record(&reader, &root, id).unwrap(),
                Some(vec![i as u8]),
                "record {id} after escalation"
            );
        }
    }

    #[test]
    fn neighbouring_records_share_one_leaf() {
        let mut store = MemStore::new();
        let mut tree = PageTree::new();

        tree.write_record(&mut store, 100, b"a".to_vec()).unwrap();
        tree.write_record(&mut store, 101, b"b".to_vec()).unwrap();
        store.commit(tree.root_mut()).unwrap();

        // Root-to-leaf path only: five indirect pages and one leaf.
        assert_eq!(store.staged_len(), TREE_HEIGHT + 1);
    }
}
