//! # Node Snapshots
//!
//! The document tree and its mutation API live above this crate. The index
//! engine only ever sees nodes as flat, owned snapshots supplied by the
//! caller: an id, a structural kind, and the name/path/text fields the key
//! extraction policies read. Whatever richer shape the document layer keeps
//! internally, it adapts into this view at the boundary.

/// Stable identity of a document node across revisions.
pub type NodeId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Element,
    Attribute,
    Text,
}

/// Flat view of one document node at the moment an event fired or a bulk
/// stream was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub id: NodeId,
    pub kind: NodeKind,
    pub name: Option<String>,
    pub path: String,
    pub text: Option<String>,
}

impl NodeSnapshot {
    pub fn element(id: NodeId, name: &str, path: &str) -> Self {
        Self {
            id,
            kind: NodeKind::Element,
            name: Some(name.to_owned()),
            path: path.to_owned(),
            text: None,
        }
    }

    pub fn attribute(id: NodeId, name: &str, path: &str, value: &str) -> Self {
        Self {
            id,
            kind: NodeKind::Attribute,
            name: Some(name.to_owned()),
            path: path.to_owned(),
            text: Some(value.to_owned()),
        }
    }

    pub fn text(id: NodeId, path: &str, value: &str) -> Self {
        Self {
            id,
            kind: NodeKind::Text,
            name: None,
            path: path.to_owned(),
            text: Some(value.to_owned()),
        }
    }
}
