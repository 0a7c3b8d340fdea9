//! # Bulk Index Builder
//!
//! One-shot construction of an index from a full node stream, in document
//! order. Bulk builds are best-effort: a node whose key extraction fails is
//! logged and skipped, because one unsupported node must not abort the
//! ingestion of the rest of the document. The summary reports both counts
//! so callers can decide whether the skip rate is acceptable.

use eyre::Result;
use tracing::warn;

use crate::index::{apply_insert, extractor_for, IndexDef, KeyExtractor};
use crate::node::NodeSnapshot;
use crate::store::PageWriter;
use crate::tree::{PageTree, RevisionWriter};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub indexed: u64,
    pub skipped: u64,
}

pub struct IndexBuilder<'t> {
    def: IndexDef,
    extractor: Box<dyn KeyExtractor>,
    tree: &'t mut PageTree,
}

pub struct IndexBuilderFactory;

impl IndexBuilderFactory {
    /// A builder bound to the index's store region in this revision and to
    /// the key-extraction policy of `def.kind`.
    pub fn create<'t>(revision: &'t mut RevisionWriter, def: &IndexDef) -> IndexBuilder<'t> {
        IndexBuilder {
            def: def.clone(),
            extractor: extractor_for(&def.kind),
            tree: revision.index_tree_mut(def),
        }
    }
}

impl IndexBuilder<'_> {
    /// Consume the node stream exactly once, inserting (key, node id) pairs
    /// through the shared page machinery.
    pub fn run(
        mut self,
        writer: &mut dyn PageWriter,
        nodes: impl IntoIterator<Item = NodeSnapshot>,
    ) -> Result<BuildSummary> {
        let mut summary = BuildSummary::default();
        for node in nodes {
            match self.extractor.extract(&node) {
                Ok(Some(key)) => {
                    apply_insert(self.tree, writer, &key, node.id)?;
                    summary.indexed += 1;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        node = node.id,
                        index = self.def.id.0,
                        error = %e,
                        "key extraction failed; node skipped in bulk build"
                    );
                    summary.skipped += 1;
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::{CasType, IndexId, IndexKey, IndexKind};
    use crate::store::MemStore;
    use crate::tree::Snapshot;

    #[test]
    fn build_indexes_covered_nodes() {
        let mut store = MemStore::new();
        let mut revision = RevisionWriter::begin(&store);
        let def = IndexDef::new(IndexId(1), IndexKind::Name);

        let nodes = vec![
            NodeSnapshot::element(10, "chapter", "/book/chapter"),
            NodeSnapshot::element(20, "chapter", "/book/chapter"),
            NodeSnapshot::text(30, "/book/chapter", "prose"),
            NodeSnapshot::attribute(40, "lang", "/book/@lang", "en"),
        ];

        let builder = IndexBuilderFactory::create(&mut revision, &def);
        let summary = builder.run(&mut store, nodes).unwrap();

        assert_eq!(summary, BuildSummary { indexed: 3, skipped: 0 });

        revision.commit(&mut store).unwrap();
        let snapshot = Snapshot::head(store.reader()).unwrap();
        assert_eq!(
            snapshot.index_lookup(IndexId(1), &IndexKey::from("chapter")).unwrap(),
            vec![10, 20]
        );
        assert_eq!(
            snapshot.index_lookup(IndexId(1), &IndexKey::from("lang")).unwrap(),
            vec![40]
        );
        assert!(snapshot
            .index_lookup(IndexId(1), &IndexKey::from("prose"))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn extraction_failure_skips_the_node_and_continues() {
        let mut store = MemStore::new();
        let mut revision = RevisionWriter::begin(&store);
        let def = IndexDef::new(IndexId(2), IndexKind::Cas(CasType::Integer));

        let nodes = vec![
            NodeSnapshot::text(1, "/book/pages", "100"),
            NodeSnapshot::text(2, "/book/pages", "many"),
            NodeSnapshot::text(3, "/book/pages", "250"),
        ];

        let builder = IndexBuilderFactory::create(&mut revision, &def);
        let summary = builder.run(&mut store, nodes).unwrap();

        assert_eq!(summary, BuildSummary { indexed: 2, skipped: 1 });
    }
}
