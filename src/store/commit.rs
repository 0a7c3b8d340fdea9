//! # Commit Protocol
//!
//! Persisting one revision is a depth-first walk over the dirty part of the
//! page tree. For a log-resident reference the protocol:
//!
//! 1. takes the page out of the transient write log,
//! 2. recurses into the page's own child references (children first, so
//!    their durable keys exist before the parent is serialized),
//! 3. serializes the page in the durable format, digests it, appends it to
//!    the store,
//! 4. marks the reference durable, clearing its log key, and caches the
//!    page handle for cheap re-reads.
//!
//! References that are already durable are not revisited: an unchanged
//! subtree from the previous revision costs nothing at commit, which is the
//! whole point of structural sharing. The protocol runs on the single
//! writer's thread; readers of previously published revisions never observe
//! log-resident state.
//!
//! Failure anywhere aborts the enclosing revision as a unit — the store
//! discards its staged appends and keeps serving the previous head. The
//! in-memory state of the failed revision is garbage at that point and the
//! caller drops it.

use std::sync::Arc;

use eyre::{Result, WrapErr};
use tracing::trace;

use crate::codec::{self, WireFormat};
use crate::page::PageReference;
use crate::store::PageWriter;

/// Persist the subtree behind `reference`, children before parent. A
/// reference that is not log-resident (unresolved, or already durable) is
/// left untouched.
pub fn commit_reference(
    writer: &mut dyn PageWriter,
    reference: &mut PageReference,
) -> Result<()> {
    let Some(log_key) = reference.log_key() else {
        return Ok(());
    };

    let mut page = writer
        .take_log_page(log_key)
        .wrap_err("commit walked a reference whose log page is missing")?;
    page.commit_children(writer)?;

    let bytes = codec::serialize_page(&page, WireFormat::Durable)?;
    let checksum = codec::crc64(&bytes);
    let key = writer
        .append_durable(bytes)
        .wrap_err_with(|| format!("failed to persist page for log key {log_key}"))?;

    reference.mark_durable(crate::page::DurableRef { key, checksum })?;
    reference.attach(Arc::new(page));
    trace!(log_key, durable_key = key, "page persisted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{CompactPage, Page, RecordPage};
    use crate::store::MemStore;

    fn leaf_with(id: u64, value: &[u8]) -> Page {
        let mut page = RecordPage::new();
        page.put(id, value.to_vec()).unwrap();
        Page::Record(page)
    }

    #[test]
    fn children_are_persisted_before_the_parent() {
        let mut store = MemStore::new();

        let leaf_key = store.allocate_log(leaf_with(1, b"a"));
        let mut parent = CompactPage::new();
        let child = parent.get_or_create(0).unwrap();
        child.mark_log_resident(leaf_key).unwrap();
        let parent_key = store.allocate_log(Page::Compact(parent));

        let mut root = PageReference::new();
        root.mark_log_resident(parent_key).unwrap();

        commit_reference(&mut store, &mut root).unwrap();

        // Append order: the leaf got the lower durable key.
        let root_durable = root.durable_ref().unwrap();
        assert_eq!(root_durable.key, 1);

        let parent_page = store.read_page(root_durable.key, Some(root_durable.checksum)).unwrap();
        let child = parent_page.indirect_lookup(0).unwrap().unwrap();
        assert_eq!(child.durable_ref().map(|d| d.key), Some(0));
        assert!(!child.is_log_resident());
    }

    #[test]
    fn recommit_of_a_persisted_reference_writes_nothing() {
        let mut store = MemStore::new();

        let leaf_key = store.allocate_log(leaf_with(2, b"b"));
        let mut root = PageReference::new();
        root.mark_log_resident(leaf_key).unwrap();

        commit_reference(&mut store, &mut root).unwrap();
        let staged_after_first = store.staged_len();
        let durable = root.durable_ref();

        commit_reference(&mut store, &mut root).unwrap();

        assert_eq!(store.staged_len(), staged_after_first, "no new writes");
        assert_eq!(root.durable_ref(), durable, "identity unchanged");
    }

    #[test]
    fn unresolved_reference_is_a_no_op() {
        let mut store = MemStore::new();
        let mut reference = PageReference::new();

        commit_reference(&mut store, &mut reference).unwrap();

        assert!(!reference.is_resolved());
        assert_eq!(store.staged_len(), 0);
    }

    #[test]
    fn commit_then_copy_for_new_revision_isolates_revisions() {
        let mut store = MemStore::new();

        // A parent page whose offset 2 holds a freshly written leaf.
        let leaf_key = store.allocate_log(leaf_with(9, b"v0"));
        let mut parent = CompactPage::new();
        parent
            .get_or_create(2)
            .unwrap()
            .mark_log_resident(leaf_key)
            .unwrap();

        parent.commit(&mut store).unwrap();

        let committed = parent.lookup(2).unwrap();
        assert!(committed.is_durable());
        assert!(!committed.is_log_resident());
        let committed_durable = committed.durable_ref();

        // Recommitting the set performs zero writes.
        let staged = store.staged_len();
        parent.commit(&mut store).unwrap();
        assert_eq!(store.staged_len(), staged);

        // The next revision's copy carries the durable key only, and
        // redirecting its offset 2 leaves this revision's slot alone.
        let mut copy = parent.copy_for_new_revision();
        let copied = copy.lookup(2).unwrap();
        assert_eq!(copied.durable_ref(), committed_durable);
        assert!(copied.log_key().is_none());

        let new_leaf = store.allocate_log(leaf_with(9, b"v1"));
        copy.lookup_mut(2).unwrap().redirect_to_log(new_leaf).unwrap();

        let original = parent.lookup(2).unwrap();
        assert!(original.is_durable());
        assert!(original.log_key().is_none());
    }

    #[test]
    fn committed_reference_caches_its_page() {
        let mut store = MemStore::new();
        let leaf_key = store.allocate_log(leaf_with(3, b"c"));
        let mut root = PageReference::new();
        root.mark_log_resident(leaf_key).unwrap();

        commit_reference(&mut store, &mut root).unwrap();

        let cached = root.cached_page().expect("page handle cached at commit");
        assert_eq!(cached.as_record().unwrap().get(3), Some(b"c".as_slice()));
    }
}
