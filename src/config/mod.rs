//! # VersoDB Configuration Constants
//!
//! This module centralizes the capacity and addressing constants of the page
//! tree. Constants that depend on each other are co-located and the
//! relationships are enforced with compile-time assertions.
//!
//! ## Dependency Graph
//!
//! ```text
//! LEVEL_BITS (10)
//!       │
//!       ├─> INDIRECT_FANOUT (derived: 1 << LEVEL_BITS)
//!       │     Maximum child slots of a dense indirect page. A compact
//!       │     indirect page holds at most SLOT_CAPACITY of these slots and
//!       │     escalates to the dense representation when it overflows.
//!       │
//!       └─> TREE_HEIGHT (5 indirect levels)
//!             Together with RECORD_SLOT_BITS this fixes the addressable
//!             record space: TREE_HEIGHT * LEVEL_BITS + RECORD_SLOT_BITS
//!             = 60 bits of record id.
//!
//! RECORD_SLOT_BITS (10)
//!       │
//!       └─> RECORD_PAGE_SLOTS (derived: 1 << RECORD_SLOT_BITS)
//!             Capacity of one leaf record page. The low RECORD_SLOT_BITS
//!             of a record id select the slot inside its leaf page.
//! ```
//!
//! ## Sentinels
//!
//! In memory an absent key is `None`; the sentinels exist only on the wire,
//! where an absent log or durable key must be distinguishable from every
//! valid key (`u32::MAX` / `u64::MAX` are never allocated).

/// Capacity of a compact indirect page before it escalates to a bitmap page.
pub const SLOT_CAPACITY: usize = 4;

/// Bits of the record address consumed by one indirect tree level.
pub const LEVEL_BITS: u32 = 10;

/// Maximum child slots of a dense (bitmap) indirect page.
pub const INDIRECT_FANOUT: usize = 1 << LEVEL_BITS;

/// Number of indirect levels between the revision root and the leaf pages.
pub const TREE_HEIGHT: usize = 5;

/// Bits of the record address consumed by the slot within a leaf page.
pub const RECORD_SLOT_BITS: u32 = 10;

/// Capacity of one leaf record page.
pub const RECORD_PAGE_SLOTS: usize = 1 << RECORD_SLOT_BITS;

/// Largest addressable record id (60 bits).
pub const MAX_RECORD_ID: u64 = (1u64 << (TREE_HEIGHT as u32 * LEVEL_BITS + RECORD_SLOT_BITS)) - 1;

/// Wire sentinel for an absent transient log key.
pub const NULL_LOG_KEY: u32 = u32::MAX;

/// Wire sentinel for an absent durable key.
pub const NULL_DURABLE_KEY: u64 = u64::MAX;

/// Size of the fixed wire header that precedes every serialized page.
pub const WIRE_HEADER_SIZE: usize = 8;

const _: () = assert!(INDIRECT_FANOUT == 1 << LEVEL_BITS);
const _: () = assert!(SLOT_CAPACITY < INDIRECT_FANOUT);
const _: () = assert!(RECORD_PAGE_SLOTS == 1 << RECORD_SLOT_BITS);
const _: () = assert!(INDIRECT_FANOUT % 64 == 0);
const _: () = assert!(TREE_HEIGHT as u32 * LEVEL_BITS + RECORD_SLOT_BITS < 64);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_space_is_sixty_bits() {
        assert_eq!(MAX_RECORD_ID, (1u64 << 60) - 1);
    }

    #[test]
    fn fanout_matches_level_bits() {
        assert_eq!(INDIRECT_FANOUT, 1024);
        assert_eq!(RECORD_PAGE_SLOTS, 1024);
    }
}
