//! Backing storage for archive images

use crate::error::Result;
use memmap2::Mmap;
use std::fs::File;
use std::io::Read;
use std::ops::Deref;
use std::path::Path;

/// Read-only bytes of a whole archive
///
/// Mapped images are zero-copy; buffered images hold a private copy for
/// storage where mapping is unavailable or undesirable.
#[derive(Debug)]
pub enum ArchiveImage {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl ArchiveImage {
    /// Memory-map an archive file
    pub fn map<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: published archives are immutable; they are replaced by
        // rename, never rewritten in place.
        let mmap = unsafe { Mmap::map(&file)? };
        Ok(ArchiveImage::Mapped(mmap))
    }

    /// Read an archive file fully into memory
    pub fn read<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut buffer = Vec::new();
        file.read_to_end(&mut buffer)?;
        Ok(ArchiveImage::Buffered(buffer))
    }

    pub fn is_mapped(&self) -> bool {
        matches!(self, ArchiveImage::Mapped(_))
    }
}

impl Deref for ArchiveImage {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            ArchiveImage::Mapped(mmap) => &mmap[..],
            ArchiveImage::Buffered(bytes) => &bytes[..],
        }
    }
}

impl From<Vec<u8>> for ArchiveImage {
    fn from(bytes: Vec<u8>) -> Self {
        ArchiveImage::Buffered(bytes)
    }
}
