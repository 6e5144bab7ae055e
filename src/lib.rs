//! # Hashpack - Content-Addressed Extent Archive
//!
//! `hashpack` stores many files in a single, page-aligned image keyed by a
//! 256-bit content hash, and finds a file's bytes from the hash alone with a
//! bounded scan of one index block.
//!
//! - **Build once, read many**: archives are bulk loaded and then immutable
//! - **Adaptive index**: a build-time [`HashTrie`] decides how many hash bytes
//!   each leading-byte group must keep to stay unique
//! - **Zero-copy reads** from a memory-mapped image, with a buffered fallback
//! - **Atomic publish**: failed builds never leave a partial archive behind
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use hashpack::{Archive, ArchiveBuilder, Result};
//!
//! # fn main() -> Result<()> {
//! let mut builder = ArchiveBuilder::new();
//! let hello = builder.add_content(b"Hello, World!".to_vec())?;
//! builder.write_to("assets.hpk")?;
//!
//! let archive = Archive::open("assets.hpk")?;
//! assert_eq!(archive.read(&hello)?, b"Hello, World!");
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Extent 0: Header (4KB)                      │
//! │  - Ident "HPK\x01", CRC-32, build, created  │
//! │  - Files per prefix [256]                   │
//! │  - Retained hash bytes per prefix [256]     │
//! ├─────────────────────────────────────────────┤
//! │ 256 index blocks, one per leading byte      │
//! │  - 256 descriptors (extent, length, h1, h2) │
//! │  - 256 hash remainders (bytes 3..11)        │
//! ├─────────────────────────────────────────────┤
//! │ Data extents 1..N                           │
//! │  - File bytes, each file extent aligned     │
//! └─────────────────────────────────────────────┘
//! ```

pub mod archive;
pub mod builder;
pub mod config;
pub mod error;
pub mod extent;
pub mod hash;
pub mod header;
pub mod index;
pub mod io;
pub mod trie;

// Re-export commonly used types
pub use archive::{Archive, ArchiveStats, Entry};
pub use builder::{ArchiveBuilder, BuildSummary};
pub use config::BuildConfig;
pub use error::{ArchiveError, Result};
pub use extent::{EXTENT_SIZE, MAX_FILE_SIZE};
pub use hash::{ContentHash, HASH_LEN};
pub use header::Header;
pub use index::{FileLocation, MAX_HASH_LEN, MAX_PREFIX_FILES, MIN_HASH_LEN};
pub use io::ArchiveImage;
pub use trie::HashTrie;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
