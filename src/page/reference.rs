//! # Page References
//!
//! A `PageReference` is the slot through which every page in the tree is
//! addressed. It names a page either in the transient write log of the open
//! revision or in the durable store, never both for longer than the instant
//! of commit.
//!
//! ## Lifecycle
//!
//! ```text
//!                mark_log_resident          mark_durable
//!  Unresolved ─────────────────────> Log ───────────────> Durable
//!      ^                             resident                │
//!      │                                ^                    │
//!      └── (fresh slot, no page yet)    └────────────────────┘
//!                                          redirect_to_log
//!                                       (copy-on-write rewrite
//!                                        in a *new* revision)
//! ```
//!
//! - **Unresolved**: both keys absent. The slot exists because a parent page
//!   reserved it, but no page has been written through it.
//! - **Log-resident**: the page was written in the current, uncommitted
//!   revision and lives only in the transient write log.
//! - **Durable**: the page was persisted at commit. Durable pages are
//!   immutable; the only way to "change" one is to redirect a *copied*
//!   reference at a fresh log page in the next revision.
//!
//! The durable half carries a CRC64 digest of the serialized page, verified
//! when the page is read back. The cached page handle is an in-memory
//! convenience and is never serialized.

use std::sync::Arc;

use eyre::{ensure, Result};

use super::Page;

/// Durable location and integrity digest of a persisted page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurableRef {
    pub key: u64,
    pub checksum: u64,
}

#[derive(Debug, Clone, Default)]
pub struct PageReference {
    log_key: Option<u32>,
    durable: Option<DurableRef>,
    page: Option<Arc<Page>>,
}

impl PageReference {
    /// A fresh, unresolved slot.
    pub fn new() -> Self {
        Self::default()
    }

    /// A reference to an already persisted page, as read from a manifest or
    /// a deserialized parent page.
    pub fn from_durable(durable: DurableRef) -> Self {
        Self {
            log_key: None,
            durable: Some(durable),
            page: None,
        }
    }

    pub(crate) fn from_parts(log_key: Option<u32>, durable: Option<DurableRef>) -> Self {
        Self {
            log_key,
            durable,
            page: None,
        }
    }

    pub fn log_key(&self) -> Option<u32> {
        self.log_key
    }

    pub fn durable_ref(&self) -> Option<DurableRef> {
        self.durable
    }

    pub fn checksum(&self) -> Option<u64> {
        self.durable.map(|d| d.checksum)
    }

    pub fn cached_page(&self) -> Option<&Arc<Page>> {
        self.page.as_ref()
    }

    pub fn is_log_resident(&self) -> bool {
        self.log_key.is_some()
    }

    pub fn is_durable(&self) -> bool {
        self.durable.is_some()
    }

    /// True unless the slot has never had a page written through it.
    pub fn is_resolved(&self) -> bool {
        self.log_key.is_some() || self.durable.is_some()
    }

    /// Transition unresolved -> log-resident: the page behind this slot was
    /// first written in the current revision.
    pub fn mark_log_resident(&mut self, log_key: u32) -> Result<()> {
        ensure!(
            self.durable.is_none(),
            "persisted page is immutable; redirect a new revision's copy instead"
        );
        ensure!(
            self.log_key.is_none(),
            "reference is already log-resident at key {}",
            self.log_key.unwrap_or_default()
        );
        self.log_key = Some(log_key);
        Ok(())
    }

    /// Copy-on-write redirect: point this (copied, durable-only) reference at
    /// a fresh log page holding the rewritten content. The previously
    /// persisted page stays in the store, owned by the prior revision.
    pub fn redirect_to_log(&mut self, log_key: u32) -> Result<()> {
        ensure!(
            self.durable.is_some(),
            "redirect requires a persisted reference"
        );
        ensure!(
            self.log_key.is_none(),
            "reference is already log-resident at key {}",
            self.log_key.unwrap_or_default()
        );
        self.durable = None;
        self.page = None;
        self.log_key = Some(log_key);
        Ok(())
    }

    /// Transition log-resident -> durable at commit. The log key is
    /// discarded; from here on the page is immutable.
    pub fn mark_durable(&mut self, durable: DurableRef) -> Result<()> {
        ensure!(
            self.log_key.is_some(),
            "only a log-resident reference can be persisted"
        );
        ensure!(
            self.durable.is_none(),
            "reference is already persisted at key {}",
            self.durable.map(|d| d.key).unwrap_or_default()
        );
        self.log_key = None;
        self.durable = Some(durable);
        Ok(())
    }

    /// Attach an in-memory handle to the (persisted) page for cheap re-reads.
    pub fn attach(&mut self, page: Arc<Page>) {
        self.page = Some(page);
    }

    pub fn drop_cached(&mut self) {
        self.page = None;
    }

    /// The reference a new revision starts from: durable key only. Neither
    /// log-resident nor cached state is carried forward.
    pub fn copy_durable(&self) -> Self {
        Self {
            log_key: None,
            durable: self.durable,
            page: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::RecordPage;

    fn durable(key: u64) -> DurableRef {
        DurableRef { key, checksum: 0xABCD }
    }

    #[test]
    fn fresh_reference_is_unresolved() {
        let r = PageReference::new();

        assert!(!r.is_resolved());
        assert!(!r.is_log_resident());
        assert!(!r.is_durable());
        assert_eq!(r.log_key(), None);
        assert_eq!(r.durable_ref(), None);
    }

    #[test]
    fn mark_log_resident_then_durable() {
        let mut r = PageReference::new();

        r.mark_log_resident(7).unwrap();
        assert!(r.is_log_resident());
        assert!(r.is_resolved());

        r.mark_durable(durable(42)).unwrap();
        assert!(!r.is_log_resident(), "log key must be cleared at persist");
        assert_eq!(r.durable_ref(), Some(durable(42)));
        assert_eq!(r.checksum(), Some(0xABCD));
    }

    #[test]
    fn persisted_reference_rejects_log_residency() {
        let mut r = PageReference::from_durable(durable(3));

        let result = r.mark_log_resident(1);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("immutable"));
    }

    #[test]
    fn mark_durable_requires_log_residency() {
        let mut r = PageReference::new();

        assert!(r.mark_durable(durable(1)).is_err());
    }

    #[test]
    fn double_persist_is_rejected() {
        let mut r = PageReference::new();
        r.mark_log_resident(1).unwrap();
        r.mark_durable(durable(9)).unwrap();

        let result = r.mark_durable(durable(10));
        assert!(result.is_err());
        assert_eq!(r.durable_ref(), Some(durable(9)));
    }

    #[test]
    fn redirect_clears_durable_state() {
        let mut r = PageReference::from_durable(durable(5));
        r.attach(Arc::new(Page::Record(RecordPage::new())));

        r.redirect_to_log(11).unwrap();

        assert_eq!(r.log_key(), Some(11));
        assert_eq!(r.durable_ref(), None);
        assert!(r.cached_page().is_none());
    }

    #[test]
    fn redirect_requires_durable_state() {
        let mut r = PageReference::new();

        assert!(r.redirect_to_log(1).is_err());
    }

    #[test]
    fn copy_durable_drops_log_and_cache() {
        let mut r = PageReference::new();
        r.mark_log_resident(2).unwrap();
        r.mark_durable(durable(77)).unwrap();
        r.attach(Arc::new(Page::Record(RecordPage::new())));

        let copy = r.copy_durable();

        assert_eq!(copy.durable_ref(), Some(durable(77)));
        assert_eq!(copy.log_key(), None);
        assert!(copy.cached_page().is_none());
    }

    #[test]
    fn copy_durable_of_log_resident_is_unresolved() {
        let mut r = PageReference::new();
        r.mark_log_resident(4).unwrap();

        let copy = r.copy_durable();

        assert!(!copy.is_resolved());
    }
}
