//! On-disk page layouts
//!
//! Three layouts share one rule: each fits in the first 4096 bytes of a
//! page and the rest of the page is zero. All integers are little-endian.
//!
//! Metadata pages are transferred in units of `max(page_size, 4096)` bytes,
//! so devices with 512-byte logical blocks still hold whole layouts.
//!
//! ```text
//! Superblock (page 0)          Blob header page             Cluster-index page
//! 0   magic       u32          0   next        u32          0   next        u32
//! 4   page_shift  u32          4   uuid        [u8; 16]     4   clusters    [u32; 512]
//! 8   cluster_shift u32        20  n_clusters  u32          2052 padding
//! 12  clusters    u32          24  clusters    u32
//! 16  md_shift    u32          28  padding
//! 20  next        u32
//! 24  padding
//! ```

use crate::error::{BlobstoreError, Result};
use serde::{Deserialize, Serialize};
use std::io;

/// Superblock magic number
pub const MAGIC: u32 = 0x1234_5678;

/// Bytes occupied by each page layout
pub const LAYOUT_SIZE: usize = 4096;

/// log2 of [`LAYOUT_SIZE`]
pub const LAYOUT_SHIFT: u32 = 12;

/// Largest supported page shift (16 MiB pages)
pub const MAX_PAGE_SHIFT: u32 = 24;

/// Cluster IDs held by one cluster-index page
pub const CLUSTERS_PER_PAGE: usize = 512;

/// Number of cluster-index pages needed for `n_clusters`
pub fn cluster_pages_for(n_clusters: usize) -> usize {
    (n_clusters + CLUSTERS_PER_PAGE - 1) / CLUSTERS_PER_PAGE
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn write_u32(bytes: &mut [u8], offset: usize, value: u32) {
    bytes[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn check_len(bytes: &[u8], what: &str) -> Result<()> {
    if bytes.len() < LAYOUT_SIZE {
        return Err(BlobstoreError::Io(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!(
                "{} bytes too short: {} (expected {})",
                what,
                bytes.len(),
                LAYOUT_SIZE
            ),
        )));
    }
    Ok(())
}

fn zeroed_page(page_size: usize) -> Vec<u8> {
    vec![0u8; page_size.max(LAYOUT_SIZE)]
}

/// Store-wide geometry recorded in the superblock
///
/// - page size = `2^page_shift` bytes, the device's logical block size
/// - cluster size = `2^(page_shift + cluster_shift)` bytes
/// - metadata region = `2^(cluster_shift + md_shift)` metadata pages at the
///   start of the device, each `2^io_shift` bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub page_shift: u32,
    pub cluster_shift: u32,
    pub md_shift: u32,
    /// Total clusters on the device, metadata region included
    pub clusters: u32,
}

impl Geometry {
    pub fn page_size(&self) -> u64 {
        1u64 << self.page_shift
    }

    pub fn cluster_size(&self) -> u64 {
        1u64 << self.page_shift << self.cluster_shift
    }

    pub fn metadata_size(&self) -> u64 {
        self.cluster_size() << self.md_shift
    }

    /// Pages in the metadata region (page 0 is the superblock)
    pub fn md_page_count(&self) -> usize {
        1usize << self.cluster_shift << self.md_shift
    }

    /// Shift of one metadata-page transfer: the page size, but never less
    /// than a layout
    pub fn io_shift(&self) -> u32 {
        self.page_shift.max(LAYOUT_SHIFT)
    }

    pub fn io_size(&self) -> u64 {
        1u64 << self.io_shift()
    }

    /// Clusters overlapped by the metadata pages
    ///
    /// `2^md_shift` when pages are at least 4096 bytes; more on small-block
    /// devices, where each metadata page spans several device pages.
    pub fn reserved_clusters(&self) -> usize {
        1usize << (self.md_shift + self.io_shift() - self.page_shift)
    }

    /// Byte offset of metadata page `index` from the start of the device
    pub fn page_offset(&self, index: u32) -> u64 {
        (index as u64) << self.io_shift()
    }

    /// Bytes the device must hold for `clusters` clusters
    pub fn device_bytes(&self) -> Result<u64> {
        (self.clusters as u64)
            .checked_mul(self.cluster_size())
            .ok_or_else(|| {
                BlobstoreError::GeometryMismatch(format!(
                    "{} clusters of {} bytes overflow u64",
                    self.clusters,
                    self.cluster_size()
                ))
            })
    }

    /// Sanity-check the shift values
    pub fn validate(&self) -> Result<()> {
        if self.page_shift > MAX_PAGE_SHIFT {
            return Err(BlobstoreError::GeometryMismatch(format!(
                "page shift {} above {}",
                self.page_shift, MAX_PAGE_SHIFT
            )));
        }
        if self.cluster_shift > 20 || self.md_shift > 8 || self.cluster_shift + self.md_shift > 24
        {
            return Err(BlobstoreError::GeometryMismatch(format!(
                "cluster shift {} / metadata shift {} too large",
                self.cluster_shift, self.md_shift
            )));
        }
        if (self.clusters as usize) <= self.reserved_clusters() {
            return Err(BlobstoreError::GeometryMismatch(format!(
                "{} clusters leave no room after {} reserved",
                self.clusters,
                self.reserved_clusters()
            )));
        }
        Ok(())
    }
}

/// Page 0: store geometry and the head of the blob chain
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    pub magic: u32,
    pub geometry: Geometry,
    /// Header page of the most recent blob, 0 = empty store
    pub next: u32,
}

impl Superblock {
    pub fn new(geometry: Geometry, next: u32) -> Self {
        Superblock {
            magic: MAGIC,
            geometry,
            next,
        }
    }

    /// Check the magic number and geometry
    pub fn validate(&self) -> Result<()> {
        if self.magic != MAGIC {
            return Err(BlobstoreError::InvalidMagic(self.magic));
        }
        self.geometry.validate()
    }

    pub fn to_bytes(&self, page_size: usize) -> Vec<u8> {
        let mut bytes = zeroed_page(page_size);
        write_u32(&mut bytes, 0, self.magic);
        write_u32(&mut bytes, 4, self.geometry.page_shift);
        write_u32(&mut bytes, 8, self.geometry.cluster_shift);
        write_u32(&mut bytes, 12, self.geometry.clusters);
        write_u32(&mut bytes, 16, self.geometry.md_shift);
        write_u32(&mut bytes, 20, self.next);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, "Superblock")?;
        Ok(Superblock {
            magic: read_u32(bytes, 0),
            geometry: Geometry {
                page_shift: read_u32(bytes, 4),
                cluster_shift: read_u32(bytes, 8),
                clusters: read_u32(bytes, 12),
                md_shift: read_u32(bytes, 16),
            },
            next: read_u32(bytes, 20),
        })
    }
}

/// Blob header page
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlobPage {
    /// Header page of the next (older) blob, 0 = end of chain
    pub next: u32,
    pub uuid: [u8; 16],
    pub n_clusters: u32,
    /// First cluster-index page of this blob
    pub clusters: u32,
}

impl BlobPage {
    pub fn to_bytes(&self, page_size: usize) -> Vec<u8> {
        let mut bytes = zeroed_page(page_size);
        write_u32(&mut bytes, 0, self.next);
        bytes[4..20].copy_from_slice(&self.uuid);
        write_u32(&mut bytes, 20, self.n_clusters);
        write_u32(&mut bytes, 24, self.clusters);
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, "Blob page")?;
        let mut uuid = [0u8; 16];
        uuid.copy_from_slice(&bytes[4..20]);
        Ok(BlobPage {
            next: read_u32(bytes, 0),
            uuid,
            n_clusters: read_u32(bytes, 20),
            clusters: read_u32(bytes, 24),
        })
    }
}

/// Cluster-index page: up to 512 cluster IDs of one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterPage {
    /// Next cluster-index page of the same blob, 0 = last
    pub next: u32,
    pub clusters: [u32; CLUSTERS_PER_PAGE],
}

impl ClusterPage {
    pub fn new(next: u32) -> Self {
        ClusterPage {
            next,
            clusters: [0; CLUSTERS_PER_PAGE],
        }
    }

    pub fn to_bytes(&self, page_size: usize) -> Vec<u8> {
        let mut bytes = zeroed_page(page_size);
        write_u32(&mut bytes, 0, self.next);
        for (i, &cluster) in self.clusters.iter().enumerate() {
            write_u32(&mut bytes, 4 + i * 4, cluster);
        }
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        check_len(bytes, "Cluster page")?;
        let mut page = ClusterPage::new(read_u32(bytes, 0));
        for (i, cluster) in page.clusters.iter_mut().enumerate() {
            *cluster = read_u32(bytes, 4 + i * 4);
        }
        Ok(page)
    }
}
