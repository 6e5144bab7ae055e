//! Archive construction
//!
//! Hashes are inserted into a [`HashTrie`] as files are added, so duplicates
//! are rejected immediately. `build`/`write_to` then derive the retained hash
//! length for every prefix from the trie, place each payload in the data
//! region and emit the image. A failed build never leaves a file behind:
//! `write_to` streams into a temporary file next to the destination and only
//! renames it into place once everything succeeded.

use crate::config::BuildConfig;
use crate::error::{ArchiveError, Result};
use crate::extent::{Extent, ExtentAllocator, DATA_REGION_OFFSET, EXTENT_SIZE, MAX_FILE_SIZE};
use crate::hash::ContentHash;
use crate::header::{metadata_checksum, Header, FLAG_SORTED};
use crate::index::{FileLocation, PrefixIndex, MAX_HASH_LEN, MIN_HASH_LEN};
use crate::trie::{HashTrie, NUM_PREFIXES};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

static ZERO_EXTENT: [u8; EXTENT_SIZE] = [0; EXTENT_SIZE];

/// Where a file's bytes come from at write time
#[derive(Debug, Clone)]
enum Payload {
    Bytes(Vec<u8>),
    File(PathBuf),
}

#[derive(Debug, Clone)]
struct PendingFile {
    hash: ContentHash,
    payload: Payload,
    size: u64,
}

/// Result of laying out the image, before any bytes are written
struct Layout {
    header: Header,
    blocks: Vec<PrefixIndex>,
    placements: Vec<Extent>,
    data_extents: u64,
}

/// Summary of a finished build
#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub file_count: usize,
    pub data_extents: u64,
    pub image_bytes: u64,
    /// Global discriminating depth over all hashes
    pub max_depth: usize,
    /// Largest retained hash length over all prefixes
    pub max_unique_len: usize,
    /// Number of leading bytes holding at least one file
    pub prefixes_used: usize,
    /// File count of the fullest prefix
    pub fullest_prefix: usize,
}

/// Bulk loader for a content-addressed archive
#[derive(Debug)]
pub struct ArchiveBuilder {
    config: BuildConfig,
    trie: HashTrie,
    files: Vec<PendingFile>,
}

impl ArchiveBuilder {
    pub fn new() -> Self {
        ArchiveBuilder {
            config: BuildConfig::default(),
            trie: HashTrie::new(),
            files: Vec::new(),
        }
    }

    pub fn with_config(config: BuildConfig) -> Result<Self> {
        config.validate()?;
        Ok(ArchiveBuilder {
            config,
            ..Self::new()
        })
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    /// The trie built from every hash added so far
    pub fn trie(&self) -> &HashTrie {
        &self.trie
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Add an in-memory payload under `hash`, returning its discriminating depth
    pub fn add(&mut self, hash: ContentHash, bytes: impl Into<Vec<u8>>) -> Result<usize> {
        let bytes = bytes.into();
        let size = bytes.len() as u64;
        self.push(hash, Payload::Bytes(bytes), size)
    }

    /// Add a payload keyed by its SHA-256
    pub fn add_content(&mut self, bytes: impl Into<Vec<u8>>) -> Result<ContentHash> {
        let bytes = bytes.into();
        let hash = ContentHash::digest(&bytes);
        self.add(hash, bytes)?;
        Ok(hash)
    }

    /// Add a file on disk; its bytes are streamed in when the image is written
    pub fn add_file<P: AsRef<Path>>(&mut self, hash: ContentHash, path: P) -> Result<usize> {
        let path = path.as_ref();
        let size = std::fs::metadata(path)?.len();
        self.push(hash, Payload::File(path.to_path_buf()), size)
    }

    fn push(&mut self, hash: ContentHash, payload: Payload, size: u64) -> Result<usize> {
        if size > MAX_FILE_SIZE {
            return Err(ArchiveError::FileTooLarge {
                size,
                max: MAX_FILE_SIZE,
            });
        }

        let depth = self.trie.insert(hash)?;
        self.files.push(PendingFile {
            hash,
            payload,
            size,
        });
        Ok(depth)
    }

    /// Build the image in memory
    pub fn build(self) -> Result<Vec<u8>> {
        let layout = self.layout()?;
        let mut image =
            Vec::with_capacity(DATA_REGION_OFFSET + layout.data_extents as usize * EXTENT_SIZE);
        self.write_image(&layout, &mut image)?;
        Ok(image)
    }

    /// Write the image to `path`, replacing it atomically
    pub fn write_to<P: AsRef<Path>>(self, path: P) -> Result<BuildSummary> {
        let path = path.as_ref();
        let layout = self.layout()?;

        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".hashpack-")
            .suffix(".tmp")
            .tempfile_in(dir)?;

        let image_bytes = {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            let written = self.write_image(&layout, &mut writer)?;
            writer.flush()?;
            written
        };

        if self.config.sync {
            tmp.as_file().sync_all()?;
        }
        tmp.persist(path).map_err(|e| e.error)?;

        let summary = self.summary(&layout, image_bytes);
        info!(
            "Published archive {:?}: {} files, {} data extents, max depth {}",
            path, summary.file_count, summary.data_extents, summary.max_depth
        );
        Ok(summary)
    }

    fn layout(&self) -> Result<Layout> {
        let capacity = self.config.max_entries_per_prefix;

        let mut counts = [0usize; NUM_PREFIXES];
        for file in &self.files {
            counts[file.hash.prefix() as usize] += 1;
        }
        if let Some((prefix, &count)) = counts.iter().enumerate().find(|(_, c)| **c > capacity) {
            return Err(ArchiveError::PrefixOverflow {
                prefix: prefix as u8,
                count,
                capacity,
            });
        }

        let depths = self.trie.prefix_depths();
        let mut header = Header::new();
        let mut blocks = Vec::with_capacity(NUM_PREFIXES);
        for prefix in 0..NUM_PREFIXES {
            let unique_len = (depths[prefix] as usize).max(MIN_HASH_LEN);
            if unique_len > MAX_HASH_LEN {
                return Err(ArchiveError::UniqueLenOverflow {
                    prefix: prefix as u8,
                    len: unique_len,
                    max: MAX_HASH_LEN,
                });
            }
            if unique_len > MIN_HASH_LEN {
                debug!(
                    "Prefix {:#04x} retains {} hash bytes for {} files",
                    prefix, unique_len, counts[prefix]
                );
            }
            if counts[prefix] * 4 > capacity * 3 {
                warn!(
                    "Prefix {:#04x} is near capacity: {}/{} files",
                    prefix, counts[prefix], capacity
                );
            }

            header.counts[prefix] = counts[prefix] as u8;
            header.unique_lens[prefix] = unique_len as u8;
            blocks.push(PrefixIndex::new(prefix as u8, unique_len, capacity));
        }

        let mut allocator = ExtentAllocator::new();
        let mut placements = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let extent = allocator.allocate(file.size)?;
            let location = FileLocation {
                extent: extent.start,
                length: file.size as u32,
            };
            blocks[file.hash.prefix() as usize].push(&file.hash, location)?;
            placements.push(extent);
        }
        for block in &mut blocks {
            block.sort();
        }

        header.build_no = self.config.build_no;
        header.created = self.config.created_secs();
        header.file_count = self.files.len() as u32;
        header.flags = FLAG_SORTED;

        Ok(Layout {
            header,
            blocks,
            placements,
            data_extents: allocator.used(),
        })
    }

    /// Emit header, index blocks and data; returns bytes written
    fn write_image<W: Write>(&self, layout: &Layout, out: &mut W) -> Result<u64> {
        let mut metadata = Vec::with_capacity(DATA_REGION_OFFSET);
        metadata.extend_from_slice(&layout.header.to_bytes());
        for block in &layout.blocks {
            metadata.extend_from_slice(&block.to_bytes());
        }
        debug_assert_eq!(metadata.len(), DATA_REGION_OFFSET);

        let crc = metadata_checksum(&metadata);
        metadata[4..8].copy_from_slice(&crc.to_le_bytes());
        out.write_all(&metadata)?;

        let mut written = metadata.len() as u64;
        for (file, extent) in self.files.iter().zip(&layout.placements) {
            match &file.payload {
                Payload::Bytes(bytes) => out.write_all(bytes)?,
                Payload::File(path) => {
                    let copied = std::io::copy(&mut File::open(path)?.take(file.size), out)?;
                    if copied != file.size {
                        return Err(ArchiveError::Io(std::io::Error::new(
                            std::io::ErrorKind::UnexpectedEof,
                            format!(
                                "{:?} shrank from {} to {} bytes during build",
                                path, file.size, copied
                            ),
                        )));
                    }
                }
            }

            let padded = extent.length as u64 * EXTENT_SIZE as u64;
            let pad = (padded - file.size) as usize;
            out.write_all(&ZERO_EXTENT[..pad])?;
            written += padded;
        }

        debug!("Wrote {} byte image with checksum {:#010x}", written, crc);
        Ok(written)
    }

    fn summary(&self, layout: &Layout, image_bytes: u64) -> BuildSummary {
        let counts = &layout.header.counts;
        BuildSummary {
            file_count: self.files.len(),
            data_extents: layout.data_extents,
            image_bytes,
            max_depth: self.trie.max_depth(),
            max_unique_len: layout
                .blocks
                .iter()
                .filter(|b| !b.is_empty())
                .map(|b| b.unique_len())
                .max()
                .unwrap_or(MIN_HASH_LEN),
            prefixes_used: counts.iter().filter(|&&c| c > 0).count(),
            fullest_prefix: counts.iter().map(|&c| c as usize).max().unwrap_or(0),
        }
    }
}

impl Default for ArchiveBuilder {
    fn default() -> Self {
        Self::new()
    }
}
