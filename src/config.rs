//! Build configuration
//!
//! ```toml
//! build_no = 1207
//! max_entries_per_prefix = 255
//! created = "2024-05-01T00:00:00Z"
//! sync = true
//! ```

use crate::error::{ArchiveError, Result};
use crate::index::MAX_PREFIX_FILES;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BuildConfig {
    /// Build number recorded in the header
    pub build_no: u64,

    /// Files allowed under one leading hash byte (1..=255)
    pub max_entries_per_prefix: usize,

    /// Fixed creation time; defaults to the time of the build
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,

    /// fsync the image before publishing it
    pub sync: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            build_no: 0,
            max_entries_per_prefix: MAX_PREFIX_FILES,
            created: None,
            sync: true,
        }
    }
}

impl BuildConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: BuildConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_entries_per_prefix == 0 || self.max_entries_per_prefix > MAX_PREFIX_FILES {
            return Err(ArchiveError::InvalidConfig(format!(
                "max_entries_per_prefix must be in 1..={}, got {}",
                MAX_PREFIX_FILES, self.max_entries_per_prefix
            )));
        }

        if let Some(created) = self.created {
            if created.timestamp() < 0 {
                return Err(ArchiveError::InvalidConfig(format!(
                    "created time {} predates the Unix epoch",
                    created
                )));
            }
        }

        Ok(())
    }

    /// Seconds since the Unix epoch to stamp into the header
    pub fn created_secs(&self) -> u64 {
        let created = self.created.unwrap_or_else(Utc::now);
        created.timestamp().max(0) as u64
    }
}
