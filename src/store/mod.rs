//! # Store Layer
//!
//! The page-write context every core operation threads explicitly — there
//! is no ambient "current transaction". The [`PageWriter`] trait is the
//! contract between the page tree and whatever provides durability; the
//! in-memory [`MemStore`](crate::store::MemStore) is the reference
//! implementation used by the tests and by embedders that do not need disk.
//!
//! A write context owns two page namespaces:
//!
//! - the **transient write log**, keyed by `u32` log keys, holding the
//!   mutable pages of the open revision;
//! - the **durable store**, keyed by `u64` keys, append-only and immutable.
//!
//! The commit protocol in [`commit`] moves pages from the first namespace
//! into the second, depth-first, children before parents, so every parent
//! is serialized with its children's durable keys already known.

mod commit;
mod mem;

pub use commit::commit_reference;
pub use mem::{MemStore, RevisionManifest, StoreReader};

use eyre::Result;

use crate::page::{Page, PageReference};

/// The page-write context: transient log management, durable appends, and
/// the commit entry point. Builder, listener, tree and commit all take an
/// explicit `&mut dyn PageWriter`; none of them reach for global state.
pub trait PageWriter {
    /// Place a page in the transient write log, returning its log key.
    fn allocate_log(&mut self, page: Page) -> u32;

    /// Borrow a log-resident page.
    fn log_page(&self, log_key: u32) -> Option<&Page>;

    /// Remove a page from the log for exclusive mutation or for persisting.
    /// Callers that only mutate must put it back via [`put_log_page`].
    ///
    /// [`put_log_page`]: PageWriter::put_log_page
    fn take_log_page(&mut self, log_key: u32) -> Result<Page>;

    /// Return a page to the log under its original key.
    fn put_log_page(&mut self, log_key: u32, page: Page);

    /// Durably append serialized page bytes, returning the durable key the
    /// page will be readable under once the revision publishes. Writes are
    /// staged: they become visible to readers only if the whole revision
    /// commits.
    fn append_durable(&mut self, bytes: Vec<u8>) -> Result<u64>;

    /// Read back a durable page, verifying its digest when one is supplied.
    fn read_page(&self, key: u64, checksum: Option<u64>) -> Result<Page>;

    /// Persist the subtree behind a reference. A reference that is not
    /// log-resident is a no-op, which makes commit idempotent and lets
    /// unchanged subtrees be shared across revisions by reference.
    fn commit(&mut self, reference: &mut PageReference) -> Result<()>;
}
