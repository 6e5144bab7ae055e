use crate::error::{ArchiveError, Result};
use crate::extent::{DATA_REGION_OFFSET, EXTENT_SIZE};
use crate::index::{MAX_HASH_LEN, MAX_PREFIX_FILES, MIN_HASH_LEN};
use crate::trie::NUM_PREFIXES;
use chrono::{DateTime, Utc};

/// File type moniker; the last byte is the format version
pub const MAGIC: [u8; 3] = *b"HPK";
pub const FORMAT_VERSION: u8 = 1;
pub const IDENT: [u8; 4] = [MAGIC[0], MAGIC[1], MAGIC[2], FORMAT_VERSION];

/// Descriptors in every index block are sorted by hash bytes 1 and up
pub const FLAG_SORTED: u32 = 1 << 0;

/// Bytes of the header record proper; the rest of extent 0 is zero padding
pub const HEADER_RECORD_SIZE: usize = 0x240;

// Each prefix count is one byte, so any stored count is within capacity
const _: () = assert!(MAX_PREFIX_FILES == u8::MAX as usize);

const CRC_OFFSET: usize = 0x04;
const COUNTS_OFFSET: usize = 0x20;
const UNIQUE_LENS_OFFSET: usize = COUNTS_OFFSET + NUM_PREFIXES;
const RESERVED_OFFSET: usize = UNIQUE_LENS_OFFSET + NUM_PREFIXES;

/// Archive header (extent 0)
///
/// ```text
/// Offset |   0|   1|   2|   3|   4|   5|   6|   7
/// 0x0000  ------ident--------|------crc32--------
/// 0x0008  ---------------build no----------------
/// 0x0010  -------------created time--------------
/// 0x0018  ----file count-----|-------flags-------
/// 0x0020  p-00|p-01|p-02|p-03|p-04|p-05|p-06|p-07   counts per prefix
///   ..
/// 0x0120  p-00|p-01|p-02|p-03|p-04|p-05|p-06|p-07   unique hash length per prefix
///   ..
/// 0x0220  ---------------reserved----------------
/// 0x0240
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    /// "HPK" + format version
    pub ident: [u8; 4],

    /// CRC-32 of the header extent (with this field zeroed) and all index blocks
    pub crc32: u32,

    /// Build this archive was generated from
    pub build_no: u64,

    /// Seconds since the Unix epoch
    pub created: u64,

    /// Number of files in the archive
    pub file_count: u32,

    pub flags: u32,

    /// Number of files under each leading hash byte
    pub counts: [u8; NUM_PREFIXES],

    /// Hash bytes retained per entry for each leading hash byte
    pub unique_lens: [u8; NUM_PREFIXES],

    pub reserved: [u8; 32],
}

impl Header {
    /// Create an empty header
    pub fn new() -> Self {
        Header {
            ident: IDENT,
            crc32: 0,
            build_no: 0,
            created: 0,
            file_count: 0,
            flags: 0,
            counts: [0; NUM_PREFIXES],
            unique_lens: [MIN_HASH_LEN as u8; NUM_PREFIXES],
            reserved: [0; 32],
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.flags & FLAG_SORTED != 0
    }

    /// Creation time, if representable
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(i64::try_from(self.created).ok()?, 0)
    }

    #[inline]
    pub fn prefix_count(&self, prefix: u8) -> usize {
        self.counts[prefix as usize] as usize
    }

    #[inline]
    pub fn unique_len(&self, prefix: u8) -> usize {
        self.unique_lens[prefix as usize] as usize
    }

    /// Validate ident, version and the per-prefix tables
    pub fn validate(&self) -> Result<()> {
        if self.ident[..3] != MAGIC {
            return Err(corrupt("invalid magic number in header"));
        }

        if self.ident[3] != FORMAT_VERSION {
            return Err(corrupt(format!(
                "unsupported format version {}",
                self.ident[3]
            )));
        }

        let total: u64 = self.counts.iter().map(|&c| c as u64).sum();
        if total != self.file_count as u64 {
            return Err(corrupt(format!(
                "file count {} does not match prefix counts ({})",
                self.file_count, total
            )));
        }

        for (prefix, &len) in self.unique_lens.iter().enumerate() {
            let len = len as usize;
            if !(MIN_HASH_LEN..=MAX_HASH_LEN).contains(&len) {
                return Err(corrupt(format!(
                    "prefix {:#04x} unique length {} out of range",
                    prefix, len
                )));
            }
        }

        Ok(())
    }

    /// Serialize header to one extent
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(EXTENT_SIZE);

        bytes.extend_from_slice(&self.ident);
        bytes.extend_from_slice(&self.crc32.to_le_bytes());
        bytes.extend_from_slice(&self.build_no.to_le_bytes());
        bytes.extend_from_slice(&self.created.to_le_bytes());
        bytes.extend_from_slice(&self.file_count.to_le_bytes());
        bytes.extend_from_slice(&self.flags.to_le_bytes());
        bytes.extend_from_slice(&self.counts);
        bytes.extend_from_slice(&self.unique_lens);
        bytes.extend_from_slice(&self.reserved);
        debug_assert_eq!(bytes.len(), HEADER_RECORD_SIZE);

        // Pad to EXTENT_SIZE
        bytes.resize(EXTENT_SIZE, 0);

        bytes
    }

    /// Deserialize and validate a header
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_RECORD_SIZE {
            return Err(corrupt("insufficient bytes for header"));
        }

        let mut header = Header::new();
        header.ident.copy_from_slice(&bytes[0..4]);
        header.crc32 = read_u32(bytes, CRC_OFFSET);
        header.build_no = read_u64(bytes, 0x08);
        header.created = read_u64(bytes, 0x10);
        header.file_count = read_u32(bytes, 0x18);
        header.flags = read_u32(bytes, 0x1c);
        header
            .counts
            .copy_from_slice(&bytes[COUNTS_OFFSET..COUNTS_OFFSET + NUM_PREFIXES]);
        header
            .unique_lens
            .copy_from_slice(&bytes[UNIQUE_LENS_OFFSET..UNIQUE_LENS_OFFSET + NUM_PREFIXES]);
        header
            .reserved
            .copy_from_slice(&bytes[RESERVED_OFFSET..HEADER_RECORD_SIZE]);

        header.validate()?;

        Ok(header)
    }
}

impl Default for Header {
    fn default() -> Self {
        Self::new()
    }
}

/// CRC-32 over the header extent and index blocks, skipping the crc field
///
/// `image` must hold at least the full header and index region.
pub fn metadata_checksum(image: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&image[..CRC_OFFSET]);
    hasher.update(&[0u8; 4]);
    hasher.update(&image[CRC_OFFSET + 4..DATA_REGION_OFFSET]);
    hasher.finalize()
}

fn corrupt(msg: impl Into<String>) -> ArchiveError {
    ArchiveError::CorruptImage(msg.into())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(buf)
}
