//! # Page Types
//!
//! Every revision of the store is a tree of pages reached through
//! [`PageReference`] slots. Three page kinds exist:
//!
//! - **Compact** (0x01): sparse indirect node, at most
//!   [`SLOT_CAPACITY`](crate::config::SLOT_CAPACITY) child slots held as
//!   insertion-ordered (offset, reference) pairs.
//! - **Bitmap** (0x02): dense indirect node addressing the full fan-out via
//!   a presence bitmap; the escalation target once a compact page fills up.
//! - **Record** (0x03): leaf node mapping record ids to opaque values.
//!
//! The indirect kinds share one surface (`indirect_lookup`,
//! `indirect_get_or_create`, `commit_children`), and escalation happens in
//! place behind that surface: the enum variant flips from `Compact` to
//! `Bitmap` while the page keeps its slot in the write log, so the parent
//! reference never notices.

mod bitmap;
mod compact;
mod record;
mod reference;

pub use bitmap::{BitmapPage, BITMAP_WORDS};
pub use compact::{CompactPage, PageFull, SlotWrite};
pub use record::{RecordEntry, RecordPage};
pub use reference::{DurableRef, PageReference};

use eyre::{bail, Result};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PageKind {
    Unknown = 0x00,
    Compact = 0x01,
    Bitmap = 0x02,
    Record = 0x03,
}

impl PageKind {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x01 => PageKind::Compact,
            0x02 => PageKind::Bitmap,
            0x03 => PageKind::Record,
            _ => PageKind::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Page {
    Compact(CompactPage),
    Bitmap(BitmapPage),
    Record(RecordPage),
}

impl Page {
    pub fn kind(&self) -> PageKind {
        match self {
            Page::Compact(_) => PageKind::Compact,
            Page::Bitmap(_) => PageKind::Bitmap,
            Page::Record(_) => PageKind::Record,
        }
    }

    /// Child reference at `offset`, if this is an indirect page and the
    /// offset is live.
    pub fn indirect_lookup(&self, offset: u16) -> Result<Option<&PageReference>> {
        match self {
            Page::Compact(p) => Ok(p.lookup(offset)),
            Page::Bitmap(p) => Ok(p.lookup(offset)),
            Page::Record(_) => bail!("record page has no child references"),
        }
    }

    /// Child reference at `offset`, creating an unresolved slot if needed.
    /// A full compact page escalates to its bitmap representation in place
    /// before the slot is created; the caller keeps one stable handle.
    pub fn indirect_get_or_create(&mut self, offset: u16) -> Result<&mut PageReference> {
        if let Page::Compact(p) = &*self {
            if p.lookup(offset).is_none() && p.is_full() {
                let escalated = BitmapPage::from_compact(p)?;
                debug!(offset, "compact page escalated to bitmap page");
                *self = Page::Bitmap(escalated);
            }
        }
        match self {
            Page::Compact(p) => Ok(p.get_or_create(offset)?),
            Page::Bitmap(p) => p.get_or_create(offset),
            Page::Record(_) => bail!("record page has no child references"),
        }
    }

    /// Depth-first commit hook: delegate every resolved child reference to
    /// the write context. Leaves have no children and no work.
    pub fn commit_children(&mut self, writer: &mut dyn crate::store::PageWriter) -> Result<()> {
        match self {
            Page::Compact(p) => p.commit(writer),
            Page::Bitmap(p) => p.commit(writer),
            Page::Record(_) => Ok(()),
        }
    }

    /// The mutable page a new revision works on. Indirect pages keep only
    /// their children's durable keys; leaves are copied verbatim.
    pub fn writable_copy(&self) -> Page {
        match self {
            Page::Compact(p) => Page::Compact(p.copy_for_new_revision()),
            Page::Bitmap(p) => Page::Bitmap(p.copy_for_new_revision()),
            Page::Record(p) => Page::Record(p.clone()),
        }
    }

    pub fn as_record(&self) -> Result<&RecordPage> {
        match self {
            Page::Record(p) => Ok(p),
            other => bail!("expected record page, found {:?}", other.kind()),
        }
    }

    pub fn as_record_mut(&mut self) -> Result<&mut RecordPage> {
        match self {
            Page::Record(p) => Ok(p),
            other => bail!("expected record page, found {:?}", other.kind()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SLOT_CAPACITY;

    #[test]
    fn page_kind_from_byte() {
        assert_eq!(PageKind::from_byte(0x01), PageKind::Compact);
        assert_eq!(PageKind::from_byte(0x02), PageKind::Bitmap);
        assert_eq!(PageKind::from_byte(0x03), PageKind::Record);
        assert_eq!(PageKind::from_byte(0x00), PageKind::Unknown);
        assert_eq!(PageKind::from_byte(0xFF), PageKind::Unknown);
    }

    #[test]
    fn get_or_create_escalates_full_compact_page() {
        let mut page = Page::Compact(CompactPage::new());
        for offset in [2u16, 0, 5, 1] {
            page.indirect_get_or_create(offset).unwrap();
        }
        assert_eq!(page.kind(), PageKind::Compact);

        // The (C+1)-th distinct offset flips the representation instead of
        // dropping the write.
        page.indirect_get_or_create(9).unwrap();

        assert_eq!(page.kind(), PageKind::Bitmap);
        for offset in [2u16, 0, 5, 1, 9] {
            assert!(page.indirect_lookup(offset).unwrap().is_some());
        }
    }

    #[test]
    fn existing_offset_does_not_escalate() {
        let mut page = Page::Compact(CompactPage::new());
        for offset in 0..SLOT_CAPACITY as u16 {
            page.indirect_get_or_create(offset).unwrap();
        }

        page.indirect_get_or_create(0).unwrap();

        assert_eq!(page.kind(), PageKind::Compact);
    }

    #[test]
    fn record_page_rejects_child_access() {
        let mut page = Page::Record(RecordPage::new());

        assert!(page.indirect_lookup(0).is_err());
        assert!(page.indirect_get_or_create(0).is_err());
    }

    #[test]
    fn as_record_enforces_kind() {
        let page = Page::Compact(CompactPage::new());

        let result = page.as_record();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("expected record page"));
    }
}
