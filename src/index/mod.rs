//! # Index Engine
//!
//! Secondary indexes over the document tree share one persistence engine —
//! the same [`PageTree`](crate::tree::PageTree), compact/bitmap pages and
//! commit protocol as the primary tree — and differ only in how they turn a
//! node into a key. That policy is the [`KeyExtractor`] capability,
//! implemented once per index kind; nothing else is duplicated per kind.
//!
//! Two drivers consume the policy:
//!
//! - the [`IndexBuilder`](crate::index::IndexBuilder) runs once over a full
//!   node stream (bulk construction, best-effort);
//! - the [`IndexListener`](crate::index::IndexListener) applies one
//!   mutation event at a time for the lifetime of a write transaction
//!   (incremental maintenance, strict).
//!
//! ## Index Storage
//!
//! An index tree stores postings: the record id is a CRC64 of the key bytes
//! (masked to the addressable space, stable across restarts), and the leaf
//! value holds every (key, node ids) pair that hashed there, so digest
//! collisions degrade into a short in-value scan instead of wrong answers.
//! Node ids are kept in application order and are *not* deduplicated — if
//! the enclosing transaction delivers an event twice, the index reflects
//! two applications; single delivery is the caller's contract.

mod builder;
mod extractor;
mod listener;

pub use builder::{BuildSummary, IndexBuilder, IndexBuilderFactory};
pub use extractor::{
    extractor_for, CasExtractor, CasType, KeyExtractor, NameExtractor, PathExtractor,
};
pub use listener::{IndexListener, IndexListenerFactory, MutationEvent};

use eyre::{ensure, Result};

use crate::codec::varint::{read_varint, write_varint};
use crate::codec::crc64;
use crate::config::MAX_RECORD_ID;
use crate::node::NodeId;
use crate::store::PageWriter;
use crate::tree::PageTree;

/// Stable identity of one index across revisions and process restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexId(pub u32);

/// What an index covers and how it derives keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    /// Element and attribute names.
    Name,
    /// Structural paths.
    Path,
    /// Content and structure: path plus typed value.
    Cas(CasType),
}

/// Immutable index descriptor, shared by the builder and listener
/// factories. Whoever persists index metadata must hand the same
/// descriptor back on every reattachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDef {
    pub id: IndexId,
    pub kind: IndexKind,
}

impl IndexDef {
    pub fn new(id: IndexId, kind: IndexKind) -> Self {
        Self { id, kind }
    }
}

/// An index key: opaque bytes produced by a key-extraction policy.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct IndexKey(Vec<u8>);

impl IndexKey {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl From<&str> for IndexKey {
    fn from(s: &str) -> Self {
        Self(s.as_bytes().to_vec())
    }
}

/// Record id an index key is stored under: a CRC64 of the key bytes folded
/// into the addressable record space. Stable across restarts by
/// construction, no registry needed.
pub fn record_id_for(key: &IndexKey) -> u64 {
    crc64(key.as_bytes()) & MAX_RECORD_ID
}

/// The value stored in an index leaf record: every (key, node ids) pair
/// whose key digests to the same record id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Posting {
    entries: Vec<(Vec<u8>, Vec<NodeId>)>,
}

impl Posting {
    pub fn nodes_for(&self, key: &IndexKey) -> Option<&[NodeId]> {
        self.entries
            .iter()
            .find(|(k, _)| k.as_slice() == key.as_bytes())
            .map(|(_, nodes)| nodes.as_slice())
    }

    pub fn insert(&mut self, key: &IndexKey, node: NodeId) {
        match self
            .entries
            .iter_mut()
            .find(|(k, _)| k.as_slice() == key.as_bytes())
        {
            Some((_, nodes)) => nodes.push(node),
            None => self.entries.push((key.as_bytes().to_vec(), vec![node])),
        }
    }

    /// Remove one application of (key, node). Returns whether anything was
    /// removed; a missing pair is not an error at this level.
    pub fn remove(&mut self, key: &IndexKey, node: NodeId) -> bool {
        let Some(pos) = self
            .entries
            .iter()
            .position(|(k, _)| k.as_slice() == key.as_bytes())
        else {
            return false;
        };
        let nodes = &mut self.entries[pos].1;
        let Some(node_pos) = nodes.iter().position(|&n| n == node) else {
            return false;
        };
        nodes.remove(node_pos);
        if nodes.is_empty() {
            self.entries.remove(pos);
        }
        true
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        write_varint(&mut out, self.entries.len() as u64);
        for (key, nodes) in &self.entries {
            write_varint(&mut out, key.len() as u64);
            out.extend_from_slice(key);
            write_varint(&mut out, nodes.len() as u64);
            for &node in nodes {
                write_varint(&mut out, node);
            }
        }
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        fn next(buf: &[u8], pos: &mut usize) -> Result<u64> {
            let (value, consumed) = read_varint(&buf[*pos..])?;
            *pos += consumed;
            Ok(value)
        }

        let mut pos = 0;
        let entry_count = next(bytes, &mut pos)?;
        let mut entries = Vec::with_capacity(entry_count as usize);
        for _ in 0..entry_count {
            let key_len = next(bytes, &mut pos)? as usize;
            ensure!(
                bytes.len() - pos >= key_len,
                "truncated posting key: need {key_len} bytes"
            );
            let key = bytes[pos..pos + key_len].to_vec();
            pos += key_len;
            let node_count = next(bytes, &mut pos)?;
            let mut nodes = Vec::with_capacity(node_count as usize);
            for _ in 0..node_count {
                nodes.push(next(bytes, &mut pos)?);
            }
            entries.push((key, nodes));
        }
        ensure!(pos == bytes.len(), "trailing bytes after posting");
        Ok(Self { entries })
    }
}

/// Add one (key, node) pair to an index tree.
pub(crate) fn apply_insert(
    tree: &mut PageTree,
    writer: &mut dyn PageWriter,
    key: &IndexKey,
    node: NodeId,
) -> Result<()> {
    let record_id = record_id_for(key);
    tree.update_record(writer, record_id, |current| {
        let mut posting = match current {
            Some(bytes) => Posting::decode(bytes)?,
            None => Posting::default(),
        };
        posting.insert(key, node);
        Ok(Some(posting.encode()))
    })
}

/// Remove one application of a (key, node) pair; the record disappears when
/// its posting empties.
pub(crate) fn apply_remove(
    tree: &mut PageTree,
    writer: &mut dyn PageWriter,
    key: &IndexKey,
    node: NodeId,
) -> Result<()> {
    let record_id = record_id_for(key);
    tree.update_record(writer, record_id, |current| {
        let Some(bytes) = current else {
            return Ok(None);
        };
        let mut posting = Posting::decode(bytes)?;
        posting.remove(key, node);
        if posting.is_empty() {
            Ok(None)
        } else {
            Ok(Some(posting.encode()))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn posting_round_trips() {
        let mut posting = Posting::default();
        posting.insert(&IndexKey::from("alpha"), 1);
        posting.insert(&IndexKey::from("alpha"), 9);
        posting.insert(&IndexKey::from("beta"), 300);

        let decoded = Posting::decode(&posting.encode()).unwrap();

        assert_eq!(decoded, posting);
        assert_eq!(decoded.nodes_for(&IndexKey::from("alpha")), Some([1u64, 9].as_slice()));
        assert_eq!(decoded.nodes_for(&IndexKey::from("beta")), Some([300u64].as_slice()));
        assert_eq!(decoded.nodes_for(&IndexKey::from("gamma")), None);
    }

    #[test]
    fn double_insert_is_not_deduplicated() {
        let mut posting = Posting::default();
        posting.insert(&IndexKey::from("k"), 5);
        posting.insert(&IndexKey::from("k"), 5);

        assert_eq!(posting.nodes_for(&IndexKey::from("k")), Some([5u64, 5].as_slice()));

        // One remove drops one application.
        assert!(posting.remove(&IndexKey::from("k"), 5));
        assert_eq!(posting.nodes_for(&IndexKey::from("k")), Some([5u64].as_slice()));
    }

    #[test]
    fn remove_last_node_clears_the_key() {
        let mut posting = Posting::default();
        posting.insert(&IndexKey::from("k"), 5);

        assert!(posting.remove(&IndexKey::from("k"), 5));

        assert!(posting.is_empty());
        assert_eq!(posting.nodes_for(&IndexKey::from("k")), None);
    }

    #[test]
    fn remove_of_missing_pair_reports_false() {
        let mut posting = Posting::default();
        posting.insert(&IndexKey::from("k"), 5);

        assert!(!posting.remove(&IndexKey::from("k"), 6));
        assert!(!posting.remove(&IndexKey::from("other"), 5));
    }

    #[test]
    fn decode_rejects_truncation_and_trailing_bytes() {
        let mut posting = Posting::default();
        posting.insert(&IndexKey::from("key"), 1);
        let bytes = posting.encode();

        assert!(Posting::decode(&bytes[..bytes.len() - 1]).is_err());

        let mut padded = bytes.clone();
        padded.push(0);
        assert!(Posting::decode(&padded).is_err());
    }

    #[test]
    fn record_ids_are_stable_and_in_range() {
        let key = IndexKey::from("stable");

        assert_eq!(record_id_for(&key), record_id_for(&IndexKey::from("stable")));
        assert!(record_id_for(&key) <= MAX_RECORD_ID);
        assert_ne!(record_id_for(&key), record_id_for(&IndexKey::from("other")));
    }
}
