//! Per-prefix index blocks
//!
//! Each leading hash byte owns one extent-sized block split in two halves:
//!
//! ```text
//! 0x000 ┌──────────────────────────────┐
//!       │ descriptors[256]   (8 bytes) │  extent | length | hash[1] | hash[2]
//! 0x800 ├──────────────────────────────┤
//!       │ remainders[256]    (8 bytes) │  hash[3..unique_len], zero padded
//! 0x1000└──────────────────────────────┘
//! ```
//!
//! Most lookups are settled by the two fast-compare bytes in the descriptor;
//! the remainder half is only consulted when a prefix needs more than
//! [`MIN_HASH_LEN`] bytes to stay unique.

use crate::error::{ArchiveError, Result};
use crate::extent::{
    extent_to_absolute, extent_to_data_offset, Extent, EXTENT_SIZE, MAX_EXTENT_BITS,
    MAX_FILE_SIZE_BITS,
};
use crate::hash::ContentHash;
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// Packed descriptor width in bytes
pub const DESCRIPTOR_SIZE: usize = 8;

/// Descriptor slots per block
pub const PREFIX_SLOTS: usize = (EXTENT_SIZE / 2) / DESCRIPTOR_SIZE;

/// Files a prefix may hold; the header stores each count in one byte
pub const MAX_PREFIX_FILES: usize = u8::MAX as usize;

/// Hash bytes always retained: the prefix plus the two fast-compare bytes
pub const MIN_HASH_LEN: usize = 3;

/// Out-of-line hash bytes per slot
pub const REMAINDER_LEN: usize = (EXTENT_SIZE / 2) / PREFIX_SLOTS;

/// Longest unique hash length the format can hold
pub const MAX_HASH_LEN: usize = MIN_HASH_LEN + REMAINDER_LEN;

const REMAINDERS_OFFSET: usize = EXTENT_SIZE / 2;

const EXTENT_MASK: u64 = (1 << MAX_EXTENT_BITS) - 1;
const LENGTH_SHIFT: u32 = MAX_EXTENT_BITS;
const LENGTH_MASK: u64 = (1 << MAX_FILE_SIZE_BITS) - 1;
const HASH1_SHIFT: u32 = MAX_EXTENT_BITS + MAX_FILE_SIZE_BITS;
const HASH2_SHIFT: u32 = HASH1_SHIFT + 8;

/// Position (in extents) and length (in bytes) of one file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileLocation {
    /// First data extent, counted from the header region as extent 0
    pub extent: u32,
    /// File size in bytes
    pub length: u32,
}

impl FileLocation {
    /// Byte offset relative to the start of the data region; `None` for extent 0
    pub fn data_offset(&self) -> Option<u64> {
        extent_to_data_offset(self.extent)
    }

    /// Byte offset within the archive image; `None` for extent 0
    pub fn absolute_offset(&self) -> Option<u64> {
        extent_to_absolute(self.extent)
    }

    /// Byte range of the file within the archive image
    pub fn byte_range(&self) -> Option<Range<usize>> {
        let start = self.absolute_offset()? as usize;
        Some(start..start + self.length as usize)
    }

    /// Extents spanned by the file
    pub fn extents(&self) -> Extent {
        Extent::new(
            self.extent,
            (self.length as u64).div_ceil(EXTENT_SIZE as u64) as u32,
        )
    }
}

/// Extent descriptor, bit-packed into a little-endian u64
///
/// ```text
/// bits  0-19  extent offset
/// bits 20-47  byte length
/// bits 48-55  hash[1]
/// bits 56-63  hash[2]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    pub extent: u32,
    pub length: u32,
    pub hash1: u8,
    pub hash2: u8,
}

impl Descriptor {
    pub fn new(location: FileLocation, hash: &ContentHash) -> Self {
        Descriptor {
            extent: location.extent,
            length: location.length,
            hash1: hash.unit(1),
            hash2: hash.unit(2),
        }
    }

    pub fn pack(&self) -> u64 {
        (self.extent as u64 & EXTENT_MASK)
            | ((self.length as u64 & LENGTH_MASK) << LENGTH_SHIFT)
            | ((self.hash1 as u64) << HASH1_SHIFT)
            | ((self.hash2 as u64) << HASH2_SHIFT)
    }

    pub fn unpack(raw: u64) -> Self {
        Descriptor {
            extent: (raw & EXTENT_MASK) as u32,
            length: ((raw >> LENGTH_SHIFT) & LENGTH_MASK) as u32,
            hash1: (raw >> HASH1_SHIFT) as u8,
            hash2: (raw >> HASH2_SHIFT) as u8,
        }
    }

    /// Fast-compare bytes as one ordered key
    #[inline]
    pub fn fast_key(&self) -> u16 {
        u16::from_be_bytes([self.hash1, self.hash2])
    }

    pub fn location(&self) -> FileLocation {
        FileLocation {
            extent: self.extent,
            length: self.length,
        }
    }
}

#[inline]
fn fast_key_of(hash: &ContentHash) -> u16 {
    u16::from_be_bytes([hash.unit(1), hash.unit(2)])
}

#[derive(Debug, Clone)]
struct Slot {
    descriptor: Descriptor,
    remainder: [u8; REMAINDER_LEN],
    /// Full hash, kept for ordering during the build
    hash: ContentHash,
}

/// Index block under construction for one prefix
///
/// A bounds-checked sequence of at most `capacity` slots.
#[derive(Debug, Clone)]
pub struct PrefixIndex {
    prefix: u8,
    unique_len: usize,
    capacity: usize,
    slots: Vec<Slot>,
}

impl PrefixIndex {
    /// Empty block retaining `unique_len` hash bytes per entry
    pub fn new(prefix: u8, unique_len: usize, capacity: usize) -> Self {
        debug_assert!((MIN_HASH_LEN..=MAX_HASH_LEN).contains(&unique_len));
        debug_assert!(capacity <= MAX_PREFIX_FILES);
        PrefixIndex {
            prefix,
            unique_len,
            capacity,
            slots: Vec::new(),
        }
    }

    /// Add an entry; fails with [`ArchiveError::PrefixOverflow`] when full
    pub fn push(&mut self, hash: &ContentHash, location: FileLocation) -> Result<()> {
        debug_assert_eq!(hash.prefix(), self.prefix);
        if self.slots.len() >= self.capacity {
            return Err(ArchiveError::PrefixOverflow {
                prefix: self.prefix,
                count: self.slots.len() + 1,
                capacity: self.capacity,
            });
        }

        let mut remainder = [0u8; REMAINDER_LEN];
        let extra = self.unique_len - MIN_HASH_LEN;
        remainder[..extra].copy_from_slice(&hash.as_bytes()[MIN_HASH_LEN..self.unique_len]);

        self.slots.push(Slot {
            descriptor: Descriptor::new(location, hash),
            remainder,
            hash: *hash,
        });
        Ok(())
    }

    /// Order slots by hash so lookups can stop early or binary search
    pub fn sort(&mut self) {
        self.slots.sort_unstable_by(|a, b| a.hash.cmp(&b.hash));
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn unique_len(&self) -> usize {
        self.unique_len
    }

    /// Serialize to one extent
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut block = vec![0u8; EXTENT_SIZE];
        for (i, slot) in self.slots.iter().enumerate() {
            let d = i * DESCRIPTOR_SIZE;
            block[d..d + DESCRIPTOR_SIZE].copy_from_slice(&slot.descriptor.pack().to_le_bytes());

            let r = REMAINDERS_OFFSET + i * REMAINDER_LEN;
            block[r..r + REMAINDER_LEN].copy_from_slice(&slot.remainder);
        }
        block
    }
}

/// Read-only view of an index block inside an archive image
#[derive(Debug, Clone, Copy)]
pub struct PrefixBlock<'a> {
    bytes: &'a [u8],
    count: usize,
    unique_len: usize,
}

impl<'a> PrefixBlock<'a> {
    /// `bytes` must be one extent; `count` at most [`PREFIX_SLOTS`]
    pub fn new(bytes: &'a [u8], count: usize, unique_len: usize) -> Self {
        debug_assert_eq!(bytes.len(), EXTENT_SIZE);
        PrefixBlock {
            bytes,
            count: count.min(PREFIX_SLOTS),
            unique_len: unique_len.clamp(MIN_HASH_LEN, MAX_HASH_LEN),
        }
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn descriptor(&self, slot: usize) -> Descriptor {
        let d = slot * DESCRIPTOR_SIZE;
        let mut raw = [0u8; DESCRIPTOR_SIZE];
        raw.copy_from_slice(&self.bytes[d..d + DESCRIPTOR_SIZE]);
        Descriptor::unpack(u64::from_le_bytes(raw))
    }

    /// Retained hash bytes beyond the fast-compare pair
    pub fn remainder(&self, slot: usize) -> &'a [u8] {
        let r = REMAINDERS_OFFSET + slot * REMAINDER_LEN;
        &self.bytes[r..r + self.unique_len - MIN_HASH_LEN]
    }

    /// Retained hash bytes for a slot, starting with the prefix
    pub fn retained_hash(&self, prefix: u8, slot: usize) -> Vec<u8> {
        let d = self.descriptor(slot);
        let mut out = Vec::with_capacity(self.unique_len);
        out.extend_from_slice(&[prefix, d.hash1, d.hash2]);
        out.extend_from_slice(self.remainder(slot));
        out
    }

    /// Locate a hash in this block
    ///
    /// With `sorted`, a binary search finds the first candidate and the scan
    /// stops once the fast-compare bytes pass the query. Otherwise every slot
    /// is checked.
    pub fn find(&self, hash: &ContentHash, sorted: bool) -> Option<Descriptor> {
        let key = fast_key_of(hash);
        let wanted = &hash.as_bytes()[MIN_HASH_LEN..self.unique_len];

        let start = if sorted { self.lower_bound(key) } else { 0 };
        for slot in start..self.count {
            let descriptor = self.descriptor(slot);
            let candidate = descriptor.fast_key();
            if candidate != key {
                if sorted && candidate > key {
                    break;
                }
                continue;
            }
            if wanted.is_empty() || self.remainder(slot) == wanted {
                return Some(descriptor);
            }
        }
        None
    }

    /// First slot whose fast-compare key is not less than `key`
    fn lower_bound(&self, key: u16) -> usize {
        let (mut lo, mut hi) = (0, self.count);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if self.descriptor(mid).fast_key() < key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    pub fn iter(&self) -> impl Iterator<Item = Descriptor> + '_ {
        (0..self.count).map(move |slot| self.descriptor(slot))
    }
}
