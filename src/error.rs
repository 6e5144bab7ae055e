use crate::hash::ContentHash;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("Duplicate hash: {0}")]
    DuplicateHash(ContentHash),

    #[error("Prefix {prefix:#04x} overflow: {count} files exceed capacity of {capacity}")]
    PrefixOverflow {
        prefix: u8,
        count: usize,
        capacity: usize,
    },

    #[error("Prefix {prefix:#04x} needs {len} hash bytes, format allows at most {max}")]
    UniqueLenOverflow { prefix: u8, len: usize, max: usize },

    #[error("File too large: {size} bytes (max {max})")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Archive too large: {extents} data extents (max {max})")]
    ArchiveTooLarge { extents: u64, max: u64 },

    #[error("File not found: {0}")]
    NotFound(ContentHash),

    #[error("Corrupt archive image: {0}")]
    CorruptImage(String),

    #[error("Invalid hash: {0}")]
    InvalidHash(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ArchiveError>;
