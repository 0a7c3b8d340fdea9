//! # Page Serialization
//!
//! Converts pages to and from bytes in one of two selectable formats:
//!
//! - **TxnLog** (0x01): the crash-recovery format of the transaction intent
//!   log. References keep their transient log key (sentinel-encoded when
//!   absent) so a replay can resume an in-flight revision.
//! - **Durable** (0x02): the final store format. References carry only the
//!   durable key and CRC64 digest; a log-resident reference reaching this
//!   serializer is a protocol violation and fails loudly.
//!
//! Both formats round-trip the entry count, the offsets in their original
//! insertion order, and the per-offset reference identity.
//!
//! ## Wire Header (8 bytes, every page)
//!
//! ```text
//! Offset  Size  Field     Description
//! ------  ----  --------  -----------------------------------
//! 0       1     kind      Page kind tag (compact/bitmap/record)
//! 1       1     format    Wire format tag the page was written in
//! 2       2     count     Number of entries in the body
//! 4       4     reserved  Zero
//! ```
//!
//! ## Body Layouts
//!
//! ```text
//! Compact:  count × { offset: u16 LE, reference }     (insertion order)
//! Bitmap:   words: [u64 LE; 16], count × reference    (ascending offset)
//! Record:   count × { id: u64 LE, varint len, value bytes }
//!
//! reference (TxnLog):  log_key u32 LE | durable_key u64 LE | checksum u64 LE
//! reference (Durable):                  durable_key u64 LE | checksum u64 LE
//! ```
//!
//! Absent keys are the sentinels from [`crate::config`]; an absent durable
//! key carries a zero checksum that readers must ignore.

pub mod varint;

use std::mem::size_of;

use crc::{Crc, CRC_64_ECMA_182};
use eyre::{bail, ensure, Result};
use zerocopy::little_endian::U16;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::config::{NULL_DURABLE_KEY, NULL_LOG_KEY, WIRE_HEADER_SIZE};
use crate::page::{
    BitmapPage, CompactPage, DurableRef, Page, PageKind, PageReference, RecordEntry, RecordPage,
    BITMAP_WORDS,
};
use varint::{read_varint, write_varint};

const CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_ECMA_182);

/// CRC64 digest used for page integrity and for deriving stable record ids
/// from index keys.
pub fn crc64(bytes: &[u8]) -> u64 {
    CRC64.checksum(bytes)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// Transaction intent log: retains transient log keys for replay.
    TxnLog,
    /// Durable store: final, compact, no transient state.
    Durable,
}

impl WireFormat {
    pub fn tag(self) -> u8 {
        match self {
            WireFormat::TxnLog => 0x01,
            WireFormat::Durable => 0x02,
        }
    }

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0x01 => Some(WireFormat::TxnLog),
            0x02 => Some(WireFormat::Durable),
            _ => None,
        }
    }
}

#[repr(C)]
#[derive(Debug, Clone, Copy, FromBytes, IntoBytes, Immutable, KnownLayout)]
struct WireHeader {
    kind: u8,
    format: u8,
    count: U16,
    reserved: [u8; 4],
}

impl WireHeader {
    fn new(kind: PageKind, format: WireFormat, count: u16) -> Self {
        Self {
            kind: kind as u8,
            format: format.tag(),
            count: U16::new(count),
            reserved: [0; 4],
        }
    }

    fn from_bytes(data: &[u8]) -> Result<&Self> {
        ensure!(
            data.len() >= size_of::<Self>(),
            "buffer too small for page header: {} < {}",
            data.len(),
            size_of::<Self>()
        );

        Self::ref_from_bytes(&data[..size_of::<Self>()])
            .map_err(|e| eyre::eyre!("failed to read page header: {:?}", e))
    }
}

const _: () = assert!(size_of::<WireHeader>() == WIRE_HEADER_SIZE);

/// Bounds-checked sequential reader over a page body.
struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn bytes(&mut self, n: usize) -> Result<&'a [u8]> {
        ensure!(
            self.remaining() >= n,
            "truncated page: need {} bytes at position {}, have {}",
            n,
            self.pos,
            self.remaining()
        );
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u16_le(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn u32_le(&mut self) -> Result<u32> {
        let b = self.bytes(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn u64_le(&mut self) -> Result<u64> {
        let b = self.bytes(8)?;
        let mut raw = [0u8; 8];
        raw.copy_from_slice(b);
        Ok(u64::from_le_bytes(raw))
    }

    fn varint(&mut self) -> Result<u64> {
        let (value, consumed) = read_varint(&self.buf[self.pos..])?;
        self.pos += consumed;
        Ok(value)
    }
}

fn write_reference(out: &mut Vec<u8>, reference: &PageReference, format: WireFormat) -> Result<()> {
    if format == WireFormat::TxnLog {
        out.extend_from_slice(&reference.log_key().unwrap_or(NULL_LOG_KEY).to_le_bytes());
    } else {
        ensure!(
            !reference.is_log_resident(),
            "log-resident reference (log key {}) cannot be written in durable format",
            reference.log_key().unwrap_or_default()
        );
    }
    match reference.durable_ref() {
        Some(d) => {
            out.extend_from_slice(&d.key.to_le_bytes());
            out.extend_from_slice(&d.checksum.to_le_bytes());
        }
        None => {
            out.extend_from_slice(&NULL_DURABLE_KEY.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
        }
    }
    Ok(())
}

fn read_reference(r: &mut ByteReader<'_>, format: WireFormat) -> Result<PageReference> {
    let log_key = if format == WireFormat::TxnLog {
        let raw = r.u32_le()?;
        (raw != NULL_LOG_KEY).then_some(raw)
    } else {
        None
    };
    let key = r.u64_le()?;
    let checksum = r.u64_le()?;
    let durable = (key != NULL_DURABLE_KEY).then_some(DurableRef { key, checksum });
    ensure!(
        log_key.is_none() || durable.is_none(),
        "reference cannot be both log-resident and durable"
    );
    Ok(PageReference::from_parts(log_key, durable))
}

/// Serialize a page in the given format. The durable format refuses pages
/// that still reference uncommitted (log-resident) children.
pub fn serialize_page(page: &Page, format: WireFormat) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(WIRE_HEADER_SIZE + 64);
    match page {
        Page::Compact(p) => {
            ensure!(p.len() <= u16::MAX as usize, "compact page count overflow");
            let header = WireHeader::new(PageKind::Compact, format, p.len() as u16);
            out.extend_from_slice(header.as_bytes());
            for (offset, reference) in p.iter() {
                out.extend_from_slice(&offset.to_le_bytes());
                write_reference(&mut out, reference, format)?;
            }
        }
        Page::Bitmap(p) => {
            ensure!(p.len() <= u16::MAX as usize, "bitmap page count overflow");
            let header = WireHeader::new(PageKind::Bitmap, format, p.len() as u16);
            out.extend_from_slice(header.as_bytes());
            for word in p.words() {
                out.extend_from_slice(&word.to_le_bytes());
            }
            for (_, reference) in p.iter() {
                write_reference(&mut out, reference, format)?;
            }
        }
        Page::Record(p) => {
            ensure!(p.len() <= u16::MAX as usize, "record page count overflow");
            let header = WireHeader::new(PageKind::Record, format, p.len() as u16);
            out.extend_from_slice(header.as_bytes());
            for entry in p.iter() {
                out.extend_from_slice(&entry.id.to_le_bytes());
                write_varint(&mut out, entry.value.len() as u64);
                out.extend_from_slice(&entry.value);
            }
        }
    }
    Ok(out)
}

/// Deserialize a page, validating that it was written in the expected
/// format and that the body is exactly consumed.
pub fn deserialize_page(bytes: &[u8], expected: WireFormat) -> Result<Page> {
    let header = WireHeader::from_bytes(bytes)?;
    let kind = PageKind::from_byte(header.kind);
    ensure!(
        kind != PageKind::Unknown,
        "invalid page kind: {:02x}",
        header.kind
    );
    let format = WireFormat::from_byte(header.format)
        .ok_or_else(|| eyre::eyre!("invalid wire format tag: {:02x}", header.format))?;
    ensure!(
        format == expected,
        "page format mismatch: found {:02x}, expected {:02x}",
        format.tag(),
        expected.tag()
    );
    let count = header.count.get() as usize;

    let mut r = ByteReader::new(&bytes[WIRE_HEADER_SIZE..]);
    let page = match kind {
        PageKind::Compact => {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let offset = r.u16_le()?;
                let reference = read_reference(&mut r, format)?;
                entries.push((offset, reference));
            }
            Page::Compact(CompactPage::from_entries(entries)?)
        }
        PageKind::Bitmap => {
            let mut words = [0u64; BITMAP_WORDS];
            for word in words.iter_mut() {
                *word = r.u64_le()?;
            }
            let mut refs = Vec::with_capacity(count);
            for _ in 0..count {
                refs.push(read_reference(&mut r, format)?);
            }
            Page::Bitmap(BitmapPage::from_parts(words, refs)?)
        }
        PageKind::Record => {
            let mut entries = Vec::with_capacity(count);
            for _ in 0..count {
                let id = r.u64_le()?;
                let len = r.varint()? as usize;
                let value = r.bytes(len)?.to_vec();
                entries.push(RecordEntry { id, value });
            }
            Page::Record(RecordPage::from_entries(entries)?)
        }
        PageKind::Unknown => bail!("invalid page kind"),
    };
    ensure!(
        r.remaining() == 0,
        "trailing {} bytes after page body",
        r.remaining()
    );
    Ok(page)
}
