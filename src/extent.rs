//! Extent addressing for the data region
//!
//! The header and the 256 index blocks together count as extent 0, so the
//! first byte of file data lives in extent 1. Files are laid out one after
//! another, each starting on an extent boundary.

use crate::error::{ArchiveError, Result};
use crate::trie::NUM_PREFIXES;
use serde::{Deserialize, Serialize};

/// Bytes per extent
pub const EXTENT_SIZE: usize = 4096;

/// Bits available for an extent offset in a descriptor
pub const MAX_EXTENT_BITS: u32 = 20;

/// Highest addressable extent id
pub const MAX_EXTENTS: u64 = (1 << MAX_EXTENT_BITS) - 1;

/// Bits available for a file length in a descriptor
pub const MAX_FILE_SIZE_BITS: u32 = 28;

/// Largest file a descriptor can describe (256MB - 1)
pub const MAX_FILE_SIZE: u64 = (1 << MAX_FILE_SIZE_BITS) - 1;

/// Never referenced by a descriptor; the header region sits here
pub const INVALID_EXTENT: u32 = 0;

/// First extent of the data region
pub const FIRST_DATA_EXTENT: u32 = 1;

/// Bytes before the data region: one header extent plus one extent per prefix
pub const DATA_REGION_OFFSET: usize = EXTENT_SIZE * (1 + NUM_PREFIXES);

/// Number of extents needed to hold `size` bytes
#[inline]
pub fn extents_for(size: u64) -> u64 {
    size.div_ceil(EXTENT_SIZE as u64)
}

/// Byte offset of an extent, relative to the start of the data region
///
/// `None` for [`INVALID_EXTENT`], which lies in the header region.
#[inline]
pub fn extent_to_data_offset(extent: u32) -> Option<u64> {
    let index = extent.checked_sub(FIRST_DATA_EXTENT)?;
    Some(index as u64 * EXTENT_SIZE as u64)
}

/// Absolute byte offset of an extent within the archive image
#[inline]
pub fn extent_to_absolute(extent: u32) -> Option<u64> {
    Some(DATA_REGION_OFFSET as u64 + extent_to_data_offset(extent)?)
}

/// A run of extents holding one file's bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// First extent id
    pub start: u32,
    /// Number of contiguous extents
    pub length: u32,
}

impl Extent {
    pub fn new(start: u32, length: u32) -> Self {
        Extent { start, length }
    }

    /// Check if this run contains an extent id
    pub fn contains(&self, extent: u32) -> bool {
        extent >= self.start && extent < self.start + self.length
    }

    /// One past the last extent of the run
    pub fn end(&self) -> u32 {
        self.start + self.length
    }
}

/// Sequential allocator for the data region
///
/// Archives are bulk loaded once, so there is no free list: each file takes
/// the extents right after the previous one.
#[derive(Debug, Clone)]
pub struct ExtentAllocator {
    next: u64,
}

impl ExtentAllocator {
    pub fn new() -> Self {
        ExtentAllocator {
            next: FIRST_DATA_EXTENT as u64,
        }
    }

    /// Reserve enough extents for `size` bytes
    ///
    /// Empty files get a zero-length run at the current position.
    pub fn allocate(&mut self, size: u64) -> Result<Extent> {
        if size > MAX_FILE_SIZE {
            return Err(ArchiveError::FileTooLarge {
                size,
                max: MAX_FILE_SIZE,
            });
        }

        let needed = extents_for(size);
        let end = self.next + needed;
        // Both the stored offset and the last extent must be addressable
        let last = if needed == 0 { self.next } else { end - 1 };
        if last > MAX_EXTENTS {
            return Err(ArchiveError::ArchiveTooLarge {
                extents: last,
                max: MAX_EXTENTS,
            });
        }

        let extent = Extent::new(self.next as u32, needed as u32);
        self.next = end;
        Ok(extent)
    }

    /// Number of data extents handed out so far
    pub fn used(&self) -> u64 {
        self.next - FIRST_DATA_EXTENT as u64
    }
}

impl Default for ExtentAllocator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extents_for() {
        assert_eq!(extents_for(0), 0);
        assert_eq!(extents_for(1), 1);
        assert_eq!(extents_for(EXTENT_SIZE as u64), 1);
        assert_eq!(extents_for(EXTENT_SIZE as u64 + 1), 2);
    }

    #[test]
    fn test_extent_offsets() {
        assert_eq!(extent_to_data_offset(FIRST_DATA_EXTENT), Some(0));
        assert_eq!(extent_to_data_offset(3), Some(2 * EXTENT_SIZE as u64));
        assert_eq!(extent_to_absolute(1), Some(DATA_REGION_OFFSET as u64));
        assert_eq!(extent_to_data_offset(INVALID_EXTENT), None);
        assert_eq!(extent_to_absolute(INVALID_EXTENT), None);
        assert_eq!(DATA_REGION_OFFSET, 257 * 4096);
    }

    #[test]
    fn test_sequential_allocation() {
        let mut alloc = ExtentAllocator::new();

        let a = alloc.allocate(10).unwrap();
        let b = alloc.allocate(EXTENT_SIZE as u64 * 2 + 1).unwrap();
        let c = alloc.allocate(0).unwrap();
        let d = alloc.allocate(1).unwrap();

        assert_eq!(a, Extent::new(1, 1));
        assert_eq!(b, Extent::new(2, 3));
        assert_eq!(c, Extent::new(5, 0));
        assert_eq!(d, Extent::new(5, 1));
        assert_eq!(alloc.used(), 5);
        assert!(b.contains(4));
        assert!(!b.contains(5));
        assert_eq!(b.end(), 5);
    }

    #[test]
    fn test_file_too_large() {
        let mut alloc = ExtentAllocator::new();
        assert!(matches!(
            alloc.allocate(MAX_FILE_SIZE + 1),
            Err(ArchiveError::FileTooLarge { .. })
        ));
        assert!(alloc.allocate(MAX_FILE_SIZE).is_ok());
    }

    #[test]
    fn test_archive_too_large() {
        let mut alloc = ExtentAllocator::new();
        let per_file = extents_for(MAX_FILE_SIZE);

        // Fill until the address space runs out
        let mut allocated = 0u64;
        loop {
            match alloc.allocate(MAX_FILE_SIZE) {
                Ok(_) => allocated += per_file,
                Err(ArchiveError::ArchiveTooLarge { .. }) => break,
                Err(e) => panic!("unexpected error: {}", e),
            }
        }
        assert!(allocated <= MAX_EXTENTS);
        assert!(allocated + per_file > MAX_EXTENTS);
    }
}
