//! # Bitmap Indirect Pages
//!
//! The dense representation an indirect tree level escalates to once a
//! [`CompactPage`](crate::page::CompactPage) overflows. A bitmap page
//! addresses the full [`INDIRECT_FANOUT`] child slots of its level with a
//! presence bitmap plus a reference vector that stores only the live slots,
//! in ascending offset order.
//!
//! ## Layout
//!
//! ```text
//! words: [u64; 16]        1024 presence bits, offset o lives in
//!                         words[o / 64] bit (o % 64)
//! refs:  Vec<PageReference>   one entry per set bit, ascending offset
//! ```
//!
//! The reference for offset `o` sits at `rank(o)` — the number of set bits
//! strictly below `o`. Rank over sixteen words is a handful of popcounts.
//!
//! A bitmap page never reports `Full`: every offset below the fan-out has a
//! home. An offset at or beyond the fan-out is a caller bug and surfaces as
//! a hard error, not a capacity signal.

use eyre::{ensure, Result};

use crate::config::INDIRECT_FANOUT;
use crate::page::{CompactPage, PageReference, SlotWrite};
use crate::store::PageWriter;

pub const BITMAP_WORDS: usize = INDIRECT_FANOUT / 64;

#[derive(Debug, Clone)]
pub struct BitmapPage {
    words: [u64; BITMAP_WORDS],
    refs: Vec<PageReference>,
}

impl Default for BitmapPage {
    fn default() -> Self {
        Self::new()
    }
}

impl BitmapPage {
    pub fn new() -> Self {
        Self {
            words: [0; BITMAP_WORDS],
            refs: Vec::new(),
        }
    }

    /// Carry every entry of an overflowing compact page into the dense
    /// representation.
    pub fn from_compact(compact: &CompactPage) -> Result<Self> {
        let mut page = Self::new();
        for (offset, reference) in compact.iter() {
            page.insert_or_replace(offset, reference.clone())?;
        }
        Ok(page)
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub(crate) fn words(&self) -> &[u64; BITMAP_WORDS] {
        &self.words
    }

    pub(crate) fn from_parts(words: [u64; BITMAP_WORDS], refs: Vec<PageReference>) -> Result<Self> {
        let live: u32 = words.iter().map(|w| w.count_ones()).sum();
        ensure!(
            live as usize == refs.len(),
            "bitmap population {} does not match {} references",
            live,
            refs.len()
        );
        Ok(Self { words, refs })
    }

    fn is_set(&self, offset: u16) -> bool {
        let o = offset as usize;
        self.words[o / 64] & (1u64 << (o % 64)) != 0
    }

    /// Number of live slots strictly below `offset`; the dense position of
    /// `offset` if it is live.
    fn rank(&self, offset: u16) -> usize {
        let o = offset as usize;
        let full_words = o / 64;
        let mut rank: u32 = self.words[..full_words].iter().map(|w| w.count_ones()).sum();
        let tail_bits = o % 64;
        if tail_bits > 0 {
            rank += (self.words[full_words] & ((1u64 << tail_bits) - 1)).count_ones();
        }
        rank as usize
    }

    fn check_offset(offset: u16) -> Result<()> {
        ensure!(
            (offset as usize) < INDIRECT_FANOUT,
            "offset {} out of range for bitmap page (fan-out {})",
            offset,
            INDIRECT_FANOUT
        );
        Ok(())
    }

    pub fn lookup(&self, offset: u16) -> Option<&PageReference> {
        if (offset as usize) < INDIRECT_FANOUT && self.is_set(offset) {
            Some(&self.refs[self.rank(offset)])
        } else {
            None
        }
    }

    pub fn lookup_mut(&mut self, offset: u16) -> Option<&mut PageReference> {
        if (offset as usize) < INDIRECT_FANOUT && self.is_set(offset) {
            let pos = self.rank(offset);
            Some(&mut self.refs[pos])
        } else {
            None
        }
    }

    pub fn get_or_create(&mut self, offset: u16) -> Result<&mut PageReference> {
        Self::check_offset(offset)?;
        if !self.is_set(offset) {
            let pos = self.rank(offset);
            let o = offset as usize;
            self.words[o / 64] |= 1u64 << (o % 64);
            self.refs.insert(pos, PageReference::new());
        }
        let pos = self.rank(offset);
        Ok(&mut self.refs[pos])
    }

    pub fn insert_or_replace(&mut self, offset: u16, reference: PageReference) -> Result<SlotWrite> {
        Self::check_offset(offset)?;
        if self.is_set(offset) {
            let pos = self.rank(offset);
            self.refs[pos] = reference;
            return Ok(SlotWrite::Replaced);
        }
        let pos = self.rank(offset);
        let o = offset as usize;
        self.words[o / 64] |= 1u64 << (o % 64);
        self.refs.insert(pos, reference);
        Ok(SlotWrite::Inserted)
    }

    /// Live (offset, reference) entries in ascending offset order.
    pub fn iter(&self) -> impl Iterator<Item = (u16, &PageReference)> {
        self.words
            .iter()
            .enumerate()
            .flat_map(|(w, &word)| {
                (0..64).filter_map(move |bit| {
                    if word & (1u64 << bit) != 0 {
                        Some((w * 64 + bit) as u16)
                    } else {
                        None
                    }
                })
            })
            .zip(self.refs.iter())
    }

    /// Same contract as [`CompactPage::commit`]: resolved references are
    /// delegated to the writer, already-durable ones no-op there.
    pub fn commit(&mut self, writer: &mut dyn PageWriter) -> Result<()> {
        for reference in self.refs.iter_mut() {
            if reference.is_resolved() {
                writer.commit(reference)?;
            }
        }
        Ok(())
    }

    pub fn copy_for_new_revision(&self) -> Self {
        Self {
            words: self.words,
            refs: self.refs.iter().map(PageReference::copy_durable).collect(),
        }
    }
}
