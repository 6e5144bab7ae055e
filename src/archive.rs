//! Archive reader
//!
//! Opening an archive validates the header, checksum and every descriptor
//! once; lookups afterwards trust the image and never touch more than one
//! index block plus the matched file's extents. The reader never mutates the
//! image, so an [`Archive`] can be shared across threads freely.

use crate::error::{ArchiveError, Result};
use crate::extent::{DATA_REGION_OFFSET, EXTENT_SIZE};
use crate::hash::ContentHash;
use crate::header::{metadata_checksum, Header};
use crate::index::{FileLocation, PrefixBlock};
use crate::io::ArchiveImage;
use crate::trie::NUM_PREFIXES;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

/// A stored file as seen from the index
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Entry {
    /// Hash bytes retained in the index, starting with the prefix
    pub retained_hash: Vec<u8>,
    pub location: FileLocation,
}

impl Entry {
    pub fn retained_hex(&self) -> String {
        hex::encode(&self.retained_hash)
    }

    /// Check whether a full hash matches the retained bytes
    pub fn matches(&self, hash: &ContentHash) -> bool {
        hash.as_bytes().starts_with(&self.retained_hash)
    }
}

/// Summary of an opened archive
#[derive(Debug, Clone, Serialize)]
pub struct ArchiveStats {
    pub file_count: usize,
    pub build_no: u64,
    pub created: Option<DateTime<Utc>>,
    pub image_bytes: u64,
    pub data_extents: u64,
    pub data_bytes: u64,
    pub prefixes_used: usize,
    pub fullest_prefix: usize,
    /// Files by number of retained hash bytes
    pub unique_len_histogram: BTreeMap<usize, usize>,
    pub mapped: bool,
}

/// Read-only, content-addressed archive
#[derive(Debug)]
pub struct Archive {
    image: ArchiveImage,
    header: Header,
}

impl Archive {
    /// Open an archive by memory-mapping it
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Mapping archive {:?}", path.as_ref());
        Self::from_image(ArchiveImage::map(path)?)
    }

    /// Open an archive by reading it into memory
    pub fn open_buffered<P: AsRef<Path>>(path: P) -> Result<Self> {
        debug!("Reading archive {:?}", path.as_ref());
        Self::from_image(ArchiveImage::read(path)?)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        Self::from_image(ArchiveImage::from(bytes))
    }

    /// Validate an image; fails with [`ArchiveError::CorruptImage`]
    pub fn from_image(image: ArchiveImage) -> Result<Self> {
        let header = validate_image(&image)?;
        debug!(
            "Opened archive: {} files, build {}, {} bytes",
            header.file_count,
            header.build_no,
            image.len()
        );
        Ok(Archive { image, header })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    /// Number of stored files
    pub fn len(&self) -> usize {
        self.header.file_count as usize
    }

    pub fn is_empty(&self) -> bool {
        self.header.file_count == 0
    }

    pub fn is_mapped(&self) -> bool {
        self.image.is_mapped()
    }

    /// Raw image bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.image
    }

    fn block(&self, prefix: u8) -> PrefixBlock<'_> {
        block_view(&self.image, &self.header, prefix)
    }

    /// Locate a file by hash
    ///
    /// An index block keeps only the first `unique_len` bytes of each hash,
    /// so the match is on those retained bytes. Every hash in the archive resolves
    /// to its own file; a hash that was never added resolves to whichever
    /// stored file shares its retained bytes, if any. Callers that may probe
    /// with foreign hashes should verify the content they get back.
    pub fn find_file(&self, hash: &ContentHash) -> Option<FileLocation> {
        let prefix = hash.prefix();
        if self.header.prefix_count(prefix) == 0 {
            return None;
        }
        self.block(prefix)
            .find(hash, self.header.is_sorted())
            .map(|d| d.location())
    }

    /// Zero-copy view of a file's bytes, matched as in [`Archive::find_file`]
    pub fn get(&self, hash: &ContentHash) -> Option<&[u8]> {
        let range = self.find_file(hash)?.byte_range()?;
        Some(&self.image[range])
    }

    /// Like [`Archive::get`], failing with [`ArchiveError::NotFound`]
    pub fn read(&self, hash: &ContentHash) -> Result<&[u8]> {
        self.get(hash).ok_or(ArchiveError::NotFound(*hash))
    }

    /// True if some stored file has the same retained bytes as `hash`
    pub fn contains(&self, hash: &ContentHash) -> bool {
        self.find_file(hash).is_some()
    }

    /// Every stored file, prefix by prefix
    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        (0..NUM_PREFIXES).flat_map(move |prefix| {
            let prefix = prefix as u8;
            let block = self.block(prefix);
            (0..block.len()).map(move |slot| Entry {
                retained_hash: block.retained_hash(prefix, slot),
                location: block.descriptor(slot).location(),
            })
        })
    }

    pub fn stats(&self) -> ArchiveStats {
        let counts = &self.header.counts;
        let mut unique_len_histogram = BTreeMap::new();
        for prefix in 0..NUM_PREFIXES {
            if counts[prefix] > 0 {
                *unique_len_histogram
                    .entry(self.header.unique_lens[prefix] as usize)
                    .or_insert(0) += counts[prefix] as usize;
            }
        }

        let data_bytes = self.entries().map(|e| e.location.length as u64).sum();
        let image_bytes = self.image.len() as u64;

        ArchiveStats {
            file_count: self.len(),
            build_no: self.header.build_no,
            created: self.header.created_at(),
            image_bytes,
            data_extents: (image_bytes - DATA_REGION_OFFSET as u64) / EXTENT_SIZE as u64,
            data_bytes,
            prefixes_used: counts.iter().filter(|&&c| c > 0).count(),
            fullest_prefix: counts.iter().map(|&c| c as usize).max().unwrap_or(0),
            unique_len_histogram,
            mapped: self.is_mapped(),
        }
    }
}

fn block_view<'a>(image: &'a [u8], header: &Header, prefix: u8) -> PrefixBlock<'a> {
    let start = EXTENT_SIZE * (1 + prefix as usize);
    PrefixBlock::new(
        &image[start..start + EXTENT_SIZE],
        header.prefix_count(prefix),
        header.unique_len(prefix),
    )
}

fn corrupt(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::CorruptImage(msg.into())
}

/// Check everything lookups rely on
fn validate_image(image: &[u8]) -> Result<Header> {
    if image.len() < DATA_REGION_OFFSET {
        return Err(corrupt(format!(
            "image is {} bytes, smaller than the {} byte index region",
            image.len(),
            DATA_REGION_OFFSET
        )));
    }
    if image.len() % EXTENT_SIZE != 0 {
        return Err(corrupt(format!(
            "image length {} is not a multiple of the extent size",
            image.len()
        )));
    }

    let header = Header::from_bytes(image)?;

    let actual = metadata_checksum(image);
    if actual != header.crc32 {
        return Err(corrupt(format!(
            "checksum mismatch: header says {:#010x}, computed {:#010x}",
            header.crc32, actual
        )));
    }

    for prefix in 0..NUM_PREFIXES {
        let prefix = prefix as u8;
        let block = block_view(image, &header, prefix);
        let mut last_key = 0u16;
        for (slot, descriptor) in block.iter().enumerate() {
            let end = match descriptor.location().byte_range() {
                Some(range) => range.end,
                None => {
                    return Err(corrupt(format!(
                        "prefix {:#04x} slot {} references the header region",
                        prefix, slot
                    )))
                }
            };
            if end > image.len() {
                return Err(corrupt(format!(
                    "prefix {:#04x} slot {} ends at byte {} past image end {}",
                    prefix,
                    slot,
                    end,
                    image.len()
                )));
            }

            if header.is_sorted() {
                if descriptor.fast_key() < last_key {
                    return Err(corrupt(format!(
                        "prefix {:#04x} is flagged sorted but slot {} is out of order",
                        prefix, slot
                    )));
                }
                last_key = descriptor.fast_key();
            }
        }
    }

    Ok(header)
}
