//! # Key Extraction Policies
//!
//! The one thing that differs between index kinds. A policy turns a node
//! snapshot into at most one index key:
//!
//! - `Ok(Some(key))` — the node is covered, index it under `key`;
//! - `Ok(None)` — the node is outside this index's coverage (wrong kind,
//!   no name, no value); both builder and listener skip it silently;
//! - `Err(_)` — extraction *failed* (e.g. a value that does not parse as
//!   the declared type). The builder skips the node and keeps going; the
//!   listener fails the enclosing mutation.

use eyre::{Result, WrapErr};

use crate::index::{IndexKey, IndexKind};
use crate::node::{NodeKind, NodeSnapshot};

/// Value typing of a content-and-structure index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CasType {
    /// Raw text values.
    Text,
    /// Values that must parse as signed 64-bit integers.
    Integer,
}

pub trait KeyExtractor {
    fn extract(&self, node: &NodeSnapshot) -> Result<Option<IndexKey>>;
}

/// The policy for an index kind.
pub fn extractor_for(kind: &IndexKind) -> Box<dyn KeyExtractor> {
    match kind {
        IndexKind::Name => Box::new(NameExtractor),
        IndexKind::Path => Box::new(PathExtractor),
        IndexKind::Cas(value_type) => Box::new(CasExtractor {
            value_type: *value_type,
        }),
    }
}

/// Keys are element and attribute names; text nodes are not covered.
pub struct NameExtractor;

impl KeyExtractor for NameExtractor {
    fn extract(&self, node: &NodeSnapshot) -> Result<Option<IndexKey>> {
        match node.kind {
            NodeKind::Element | NodeKind::Attribute => {
                Ok(node.name.as_deref().map(IndexKey::from))
            }
            NodeKind::Text => Ok(None),
        }
    }
}

/// Keys are the structural paths of elements and attributes.
pub struct PathExtractor;

impl KeyExtractor for PathExtractor {
    fn extract(&self, node: &NodeSnapshot) -> Result<Option<IndexKey>> {
        match node.kind {
            NodeKind::Element | NodeKind::Attribute => {
                Ok(Some(IndexKey::from(node.path.as_str())))
            }
            NodeKind::Text => Ok(None),
        }
    }
}

/// Content-and-structure keys: the node's path joined with its typed value.
/// A node without a value is not covered; a value that fails to parse as
/// the declared type is an extraction failure.
pub struct CasExtractor {
    pub value_type: CasType,
}

impl KeyExtractor for CasExtractor {
    fn extract(&self, node: &NodeSnapshot) -> Result<Option<IndexKey>> {
        let Some(text) = node.text.as_deref() else {
            return Ok(None);
        };

        let mut key = node.path.as_bytes().to_vec();
        key.push(0);
        match self.value_type {
            CasType::Text => key.extend_from_slice(text.as_bytes()),
            CasType::Integer => {
                let value: i64 = text.trim().parse().wrap_err_with(|| {
                    format!("node {} value {text:?} is not a valid integer", node.id)
                })?;
                key.extend_from_slice(&value.to_be_bytes());
            }
        }
        Ok(Some(IndexKey::new(key)))
    }
}
