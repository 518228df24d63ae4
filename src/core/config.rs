//! Store configuration
//!
//! [`FormatOptions`] controls the layout written by `Blobstore::init_with`.
//! [`BlobstoreConfig`] is the TOML file read by the command-line tool:
//!
//! ```toml
//! device = "/dev/nvme0n1"
//! block_size = 4096
//!
//! [format]
//! cluster_shift = 8
//! md_shift = 0
//! ```

use crate::device::DEFAULT_BLOCK_SIZE;
use crate::error::{BlobstoreError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default pages per cluster, as a shift (256 pages)
pub const DEFAULT_CLUSTER_SHIFT: u32 = 8;

/// Default metadata region size in clusters, as a shift (1 cluster)
pub const DEFAULT_MD_SHIFT: u32 = 0;

/// Default device path
pub const DEFAULT_DEVICE: &str = "/dev/nvme0n1";

/// Layout parameters fixed when a store is formatted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormatOptions {
    /// log2 of pages per cluster
    pub cluster_shift: u32,

    /// log2 of clusters reserved for metadata pages
    pub md_shift: u32,
}

impl Default for FormatOptions {
    fn default() -> Self {
        FormatOptions {
            cluster_shift: DEFAULT_CLUSTER_SHIFT,
            md_shift: DEFAULT_MD_SHIFT,
        }
    }
}

/// Command-line configuration file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlobstoreConfig {
    /// Block device or image file holding the store
    pub device: PathBuf,

    /// Logical block size assumed for regular image files
    pub block_size: u64,

    pub format: FormatOptions,
}

impl Default for BlobstoreConfig {
    fn default() -> Self {
        BlobstoreConfig {
            device: PathBuf::from(DEFAULT_DEVICE),
            block_size: DEFAULT_BLOCK_SIZE,
            format: FormatOptions::default(),
        }
    }
}

impl BlobstoreConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: BlobstoreConfig =
            toml::from_str(text).map_err(|e| BlobstoreError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            BlobstoreError::Config(format!("{}: {}", path.as_ref().display(), e))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn validate(&self) -> Result<()> {
        if !self.block_size.is_power_of_two() {
            return Err(BlobstoreError::Config(format!(
                "block_size {} is not a power of two",
                self.block_size
            )));
        }
        Ok(())
    }
}
