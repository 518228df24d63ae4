//! Blobstore coordinator
//!
//! Owns the device handle, the metadata-page and cluster bitmaps, and the
//! blob list. Free-space state is never persisted: `open` derives it by
//! walking every blob reachable from the superblock.
//!
//! ## Write ordering
//!
//! Each mutation ends with a single pointer write that makes it visible:
//!
//! - `create_blob` writes the cluster-index pages and the header page first,
//!   flushes, then points the superblock at the new header.
//! - `delete_blob` first rewrites the superblock (or the predecessor's
//!   header) to skip the blob, then releases its pages and clusters.
//!
//! A crash before the pointer write leaves the previous chain intact; pages
//! written but never linked read as free on the next `open`.

use crate::allocator::{Bitset, Reservation};
use crate::array::U32Array;
use crate::blob::{read_chain, Blob, BlobId, BlobList};
use crate::config::FormatOptions;
use crate::device::{read_page, write_page, BlockDevice};
use crate::error::{BlobstoreError, Result};
use crate::page::{cluster_pages_for, ClusterPage, Geometry, Superblock, LAYOUT_SHIFT};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::io;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One row of [`Blobstore::list`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobInfo {
    pub id: BlobId,
    pub uuid: Uuid,
    pub n_clusters: u32,
    pub percent_filled: u32,
}

/// Blob storage on a block device
pub struct Blobstore<D: BlockDevice> {
    device: D,
    geometry: Geometry,

    /// Blobs in chain order
    blobs: BlobList,

    /// Metadata-page slots (slot 0 = superblock)
    md_pages: Bitset,

    /// Data-cluster slots (the metadata region's clusters are reserved)
    clusters: Bitset,
}

/// Page shift for a device: log2 of its logical block size
fn page_shift_for(logical_block_size: u64) -> Result<u32> {
    if !logical_block_size.is_power_of_two() {
        return Err(BlobstoreError::GeometryMismatch(format!(
            "logical block size {} is not a power of two",
            logical_block_size
        )));
    }
    Ok(logical_block_size.trailing_zeros())
}

/// Fresh bitmaps with only the reserved slots marked
fn reserved_bitmaps(geometry: &Geometry) -> Result<(Bitset, Bitset)> {
    let mut md_pages = Bitset::new(geometry.md_page_count())?;
    md_pages.set(0, true);

    let mut clusters = Bitset::new(geometry.clusters as usize)?;
    for i in 0..geometry.reserved_clusters() {
        clusters.set(i, true);
    }

    Ok((md_pages, clusters))
}

fn write_superblock<D: BlockDevice + ?Sized>(
    device: &mut D,
    geometry: &Geometry,
    next: Option<BlobId>,
) -> Result<()> {
    let superblock = Superblock::new(*geometry, next.map_or(0, BlobId::page_index));
    let io_size = geometry.io_size() as usize;
    write_page(device, geometry.io_shift(), 0, &superblock.to_bytes(io_size))
}

fn random_uuid() -> Result<Uuid> {
    let mut bytes = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    Ok(Uuid::from_bytes(bytes))
}

impl<D: BlockDevice> Blobstore<D> {
    /// Format `device` with the default layout
    pub fn init(device: D) -> Result<Self> {
        Self::init_with(device, FormatOptions::default())
    }

    /// Format `device`: write an empty superblock and start with no blobs
    pub fn init_with(mut device: D, options: FormatOptions) -> Result<Self> {
        let size = device.size()?;
        let page_shift = page_shift_for(device.logical_block_size()?)?;

        let n_clusters = size >> page_shift >> options.cluster_shift;
        let clusters = u32::try_from(n_clusters).map_err(|_| {
            BlobstoreError::GeometryMismatch(format!("{} clusters overflow u32", n_clusters))
        })?;

        let geometry = Geometry {
            page_shift,
            cluster_shift: options.cluster_shift,
            md_shift: options.md_shift,
            clusters,
        };
        geometry.validate()?;

        let (md_pages, cluster_map) = reserved_bitmaps(&geometry)?;
        write_superblock(&mut device, &geometry, None)?;
        device.flush()?;

        info!(
            "Formatted blobstore: page size {}, cluster size {}, {} clusters",
            geometry.page_size(),
            geometry.cluster_size(),
            geometry.clusters
        );

        Ok(Blobstore {
            device,
            geometry,
            blobs: BlobList::new(),
            md_pages,
            clusters: cluster_map,
        })
    }

    /// Load a formatted store and rebuild its free-space state
    pub fn open(mut device: D) -> Result<Self> {
        let size = device.size()?;
        let logical_block_size = device.logical_block_size()?;
        let page_shift = page_shift_for(logical_block_size)?;
        let io_shift = page_shift.max(LAYOUT_SHIFT);

        let superblock = Superblock::from_bytes(&read_page(&mut device, io_shift, 0)?)?;
        superblock.validate()?;
        let geometry = superblock.geometry;

        if geometry.page_shift != page_shift {
            return Err(BlobstoreError::GeometryMismatch(format!(
                "device block size {} does not match store page size {}",
                logical_block_size,
                geometry.page_size()
            )));
        }
        let required = geometry.device_bytes()?;
        if size < required {
            return Err(BlobstoreError::GeometryMismatch(format!(
                "device holds {} bytes, store needs {}",
                size, required
            )));
        }

        let (mut md_pages, mut clusters) = reserved_bitmaps(&geometry)?;
        let blobs = read_chain(
            &mut device,
            io_shift,
            geometry.md_page_count(),
            superblock.next,
        )?;

        for blob in &blobs {
            for page in blob.metadata_pages() {
                md_pages.set(page as usize, true);
            }
            for cluster in blob.allocated_clusters() {
                clusters.set(cluster as usize, true);
            }
        }

        info!(
            "Opened blobstore: {} blobs, {} metadata pages and {} clusters in use",
            blobs.len(),
            md_pages.size(),
            clusters.size()
        );

        Ok(Blobstore {
            device,
            geometry,
            blobs,
            md_pages,
            clusters,
        })
    }

    /// Release in-memory state and hand the device back untouched
    pub fn deinit(self) -> D {
        self.device
    }

    /// Create an all-hole blob of `n_clusters` clusters
    ///
    /// A failure up to the superblock write leaves the bitmaps and blob list
    /// as they were, with the superblock still pointing at the previous head.
    /// If only the final flush fails, the blob is already linked in memory
    /// and on the device, and the error reports unconfirmed durability.
    pub fn create_blob(&mut self, n_clusters: u32) -> Result<BlobId> {
        if n_clusters == 0 {
            return Err(BlobstoreError::InvalidArgument(
                "blob size must be at least one cluster".to_string(),
            ));
        }

        let geometry = self.geometry;
        let io_shift = geometry.io_shift();
        let io_size = geometry.io_size() as usize;

        // Metadata pages are claimed before the cluster array exists, so a
        // request the metadata region cannot index fails without it
        let mut reservation = Reservation::new(&mut self.md_pages);
        let header_page = reservation.claim()?;
        let mut cluster_pages = U32Array::new(cluster_pages_for(n_clusters as usize))?;
        reservation.claim_into(cluster_pages.as_mut_slice())?;

        let blob = Blob::with_cluster_pages(
            BlobId::new(header_page),
            random_uuid()?,
            n_clusters,
            cluster_pages,
        )?;

        let cluster_pages = blob.cluster_pages().as_slice();
        for (i, &page) in cluster_pages.iter().enumerate() {
            let next = cluster_pages.get(i + 1).copied().unwrap_or(0);
            write_page(
                &mut self.device,
                io_shift,
                page,
                &ClusterPage::new(next).to_bytes(io_size),
            )?;
        }

        let head = self.blobs.head();
        write_page(
            &mut self.device,
            io_shift,
            header_page,
            &blob.to_page(head).to_bytes(io_size),
        )?;
        self.device.flush()?;

        write_superblock(&mut self.device, &geometry, Some(blob.id()))?;

        reservation.commit();
        let id = blob.id();
        debug!(
            "Linked blob {} ({} clusters, index pages {:?})",
            id,
            n_clusters,
            blob.cluster_pages().as_slice()
        );
        self.blobs.push_front(blob);
        info!("Created blob {} with {} clusters", id, n_clusters);

        self.device.flush()?;
        Ok(id)
    }

    /// Delete a blob, releasing its metadata pages and clusters
    ///
    /// The blob is unlinked on disk before anything is freed. If only the
    /// final flush fails, the blob is already gone in memory and on the
    /// device.
    pub fn delete_blob(&mut self, id: BlobId) -> Result<()> {
        let blob = self.blobs.get(id).ok_or_else(|| {
            BlobstoreError::InvalidArgument(format!("no blob at page {}", id))
        })?;
        let next = blob.next();
        let io_shift = self.geometry.io_shift();
        let io_size = self.geometry.io_size() as usize;

        self.device.flush()?;
        match blob.prev() {
            Some(prev_id) => {
                let prev = self.blobs.get(prev_id).ok_or_else(|| {
                    BlobstoreError::InvalidArgument(format!(
                        "blob {} links to missing predecessor {}",
                        id, prev_id
                    ))
                })?;
                let bytes = prev.to_page(next).to_bytes(io_size);
                write_page(&mut self.device, io_shift, prev_id.page_index(), &bytes)?;
            }
            None if self.blobs.head() == Some(id) => {
                write_superblock(&mut self.device, &self.geometry, next)?;
            }
            None => {
                return Err(BlobstoreError::InvalidArgument(format!(
                    "blob {} has no predecessor and is not the head",
                    id
                )));
            }
        }

        let blob = self.blobs.unlink(id).ok_or_else(|| {
            BlobstoreError::InvalidArgument(format!("no blob at page {}", id))
        })?;
        for page in blob.metadata_pages() {
            self.md_pages.set(page as usize, false);
        }
        for cluster in blob.allocated_clusters() {
            self.clusters.set(cluster as usize, false);
        }
        info!("Deleted blob {} ({} clusters)", id, blob.n_clusters());

        self.device.flush()?;
        Ok(())
    }

    /// Summary of every blob in chain order
    pub fn list(&self) -> Result<Vec<BlobInfo>> {
        self.blobs
            .iter()
            .map(|blob| {
                Ok(BlobInfo {
                    id: blob.id(),
                    uuid: blob.uuid(),
                    n_clusters: blob.n_clusters(),
                    percent_filled: blob.percent_filled()?,
                })
            })
            .collect()
    }

    /// Sparsity map of one blob
    pub fn nonzero(&self, id: BlobId) -> Result<Bitset> {
        match self.blobs.get(id) {
            Some(blob) => blob.nonzero(),
            None => {
                warn!("Sparsity requested for unknown blob {}", id);
                Err(BlobstoreError::InvalidArgument(format!("no blob at page {}", id)))
            }
        }
    }

    pub fn blob(&self, id: BlobId) -> Option<&Blob> {
        self.blobs.get(id)
    }

    pub fn blobs(&self) -> &BlobList {
        &self.blobs
    }

    /// Most recently created blob
    pub fn head(&self) -> Option<BlobId> {
        self.blobs.head()
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn page_size(&self) -> u64 {
        self.geometry.page_size()
    }

    pub fn cluster_size(&self) -> u64 {
        self.geometry.cluster_size()
    }

    pub fn metadata_size(&self) -> u64 {
        self.geometry.metadata_size()
    }

    /// Total clusters, metadata region included
    pub fn cluster_count(&self) -> usize {
        self.clusters.capacity()
    }

    pub fn md_pages(&self) -> &Bitset {
        &self.md_pages
    }

    pub fn clusters(&self) -> &Bitset {
        &self.clusters
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    /// Flush the device
    pub fn sync(&mut self) -> Result<()> {
        self.device.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MemoryDevice;
    use crate::page::BlobPage;

    const MIB: usize = 1 << 20;

    /// 16 clusters of 1 MiB, 256 metadata pages
    fn store() -> Blobstore<MemoryDevice> {
        Blobstore::init(MemoryDevice::new(16 * MIB, 4096)).unwrap()
    }

    /// 4 clusters of 16 KiB, 4 metadata pages
    fn tiny_store() -> Blobstore<MemoryDevice> {
        let options = FormatOptions {
            cluster_shift: 2,
            md_shift: 0,
        };
        Blobstore::init_with(MemoryDevice::new(64 * 1024, 4096), options).unwrap()
    }

    fn reopen(store: Blobstore<MemoryDevice>) -> Blobstore<MemoryDevice> {
        Blobstore::open(store.deinit()).unwrap()
    }

    #[test]
    fn test_init_geometry() {
        let bs = store();
        assert_eq!(bs.page_size(), 4096);
        assert_eq!(bs.cluster_size(), MIB as u64);
        assert_eq!(bs.metadata_size(), MIB as u64);
        assert_eq!(bs.cluster_count(), 16);
        assert_eq!(bs.md_pages().capacity(), 256);
        assert_eq!(bs.md_pages().iter_set().collect::<Vec<_>>(), vec![0]);
        assert_eq!(bs.clusters().iter_set().collect::<Vec<_>>(), vec![0]);
        assert!(bs.blobs().is_empty());

        let sb = Superblock::from_bytes(&bs.device().as_bytes()[..4096]).unwrap();
        assert_eq!(sb.next, 0);
        assert_eq!(sb.geometry, bs.geometry());
    }

    #[test]
    fn test_init_small_block_size() {
        let mut bs = Blobstore::init(MemoryDevice::new(16 * MIB, 512)).unwrap();
        let geometry = bs.geometry();
        assert_eq!(geometry.page_shift, 9);
        assert_eq!(bs.page_size(), 512);
        assert_eq!(bs.cluster_count(), 128);
        assert_eq!(bs.cluster_size(), 131072);
        assert_eq!(bs.md_pages().capacity(), 256);

        // 256 metadata pages of 4096 bytes cover the first 8 clusters
        assert_eq!(
            bs.clusters().iter_set().collect::<Vec<_>>(),
            (0..8).collect::<Vec<_>>()
        );

        let sb = Superblock::from_bytes(&bs.device().as_bytes()[..4096]).unwrap();
        assert_eq!(sb.geometry, geometry);

        let id = bs.create_blob(1000).unwrap();
        let dev = bs.device().as_bytes();
        let header = BlobPage::from_bytes(&dev[4096..8192]).unwrap();
        assert_eq!(header.n_clusters, 1000);
        assert_eq!(header.clusters, 2);

        let bs = reopen(bs);
        assert_eq!(bs.geometry(), geometry);
        assert_eq!(bs.blob(id).unwrap().n_clusters(), 1000);
        assert_eq!(bs.clusters().size(), 8);
    }

    #[test]
    fn test_open_rejects_overflowing_geometry() {
        // 16 MiB blocks: u32::MAX clusters of 2^44 bytes overflow u64
        let mut device = MemoryDevice::new(16 * MIB, 16 * MIB as u64);
        let geometry = Geometry {
            page_shift: 24,
            cluster_shift: 20,
            md_shift: 0,
            clusters: u32::MAX,
        };
        let bytes = Superblock::new(geometry, 0).to_bytes(16 * MIB);
        device.as_bytes_mut().copy_from_slice(&bytes);

        let result = Blobstore::open(device);
        assert!(matches!(result, Err(BlobstoreError::GeometryMismatch(_))));
    }

    #[test]
    fn test_init_large_block_size() {
        let bs = Blobstore::init(MemoryDevice::new(64 * MIB, 8192)).unwrap();
        assert_eq!(bs.page_size(), 8192);
        assert_eq!(bs.cluster_size(), 2 * MIB as u64);
        assert_eq!(bs.cluster_count(), 32);
    }

    #[test]
    fn test_init_rejects_tiny_device() {
        let result = Blobstore::init(MemoryDevice::new(MIB, 4096));
        assert!(matches!(result, Err(BlobstoreError::GeometryMismatch(_))));
    }

    #[test]
    fn test_init_rejects_odd_block_size() {
        let result = Blobstore::init(MemoryDevice::new(16 * MIB, 1000));
        assert!(matches!(result, Err(BlobstoreError::GeometryMismatch(_))));
    }

    #[test]
    fn test_create_blob_layout() {
        let mut bs = store();
        let id = bs.create_blob(1000).unwrap();

        assert_eq!(id.page_index(), 1);
        let blob = bs.blob(id).unwrap();
        assert_eq!(blob.n_clusters(), 1000);
        assert_eq!(blob.cluster_pages().as_slice(), &[2, 3]);
        assert_eq!(bs.md_pages().size(), 4);
        assert_eq!(bs.head(), Some(id));

        let dev = bs.device().as_bytes();
        let sb = Superblock::from_bytes(&dev[..4096]).unwrap();
        assert_eq!(sb.next, 1);
        let header = BlobPage::from_bytes(&dev[4096..8192]).unwrap();
        assert_eq!(header.next, 0);
        assert_eq!(header.n_clusters, 1000);
        assert_eq!(header.clusters, 2);
        assert_eq!(&header.uuid, blob.uuid().as_bytes());
        let first = ClusterPage::from_bytes(&dev[2 * 4096..3 * 4096]).unwrap();
        assert_eq!(first.next, 3);
        let second = ClusterPage::from_bytes(&dev[3 * 4096..4 * 4096]).unwrap();
        assert_eq!(second.next, 0);
    }

    #[test]
    fn test_create_then_open_round_trip() {
        let mut bs = store();
        let id = bs.create_blob(42).unwrap();
        let uuid = bs.blob(id).unwrap().uuid();

        let bs = reopen(bs);
        let blob = bs.blob(id).unwrap();
        assert_eq!(blob.uuid(), uuid);
        assert_eq!(blob.n_clusters(), 42);
        assert!(blob.clusters().iter().all(|c| c == 0));
        assert_eq!(bs.md_pages().iter_set().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_chain_order_newest_first() {
        let mut bs = store();
        let b1 = bs.create_blob(1).unwrap();
        let b2 = bs.create_blob(2).unwrap();

        let order: Vec<BlobId> = bs.blobs().iter().map(Blob::id).collect();
        assert_eq!(order, vec![b2, b1]);
        assert_eq!(bs.blob(b1).unwrap().prev(), Some(b2));

        let bs = reopen(bs);
        let order: Vec<BlobId> = bs.blobs().iter().map(Blob::id).collect();
        assert_eq!(order, vec![b2, b1]);
    }

    #[test]
    fn test_create_zero_clusters_rejected() {
        let mut bs = store();
        let before = bs.device().as_bytes().to_vec();
        let result = bs.create_blob(0);
        assert!(matches!(result, Err(BlobstoreError::InvalidArgument(_))));
        assert_eq!(bs.md_pages().size(), 1);
        assert_eq!(bs.device().as_bytes(), &before[..]);
    }

    #[test]
    fn test_delete_tail() {
        let mut bs = store();
        let b1 = bs.create_blob(1).unwrap();
        let b2 = bs.create_blob(1).unwrap();

        bs.delete_blob(b1).unwrap();
        assert_eq!(bs.blob(b2).unwrap().next(), None);

        let bs = reopen(bs);
        let ids: Vec<BlobId> = bs.blobs().iter().map(Blob::id).collect();
        assert_eq!(ids, vec![b2]);
        assert!(!bs.md_pages().get(b1.page_index() as usize));
    }

    #[test]
    fn test_delete_head() {
        let mut bs = store();
        let b1 = bs.create_blob(1).unwrap();
        let b2 = bs.create_blob(1).unwrap();

        bs.delete_blob(b2).unwrap();
        assert_eq!(bs.head(), Some(b1));
        let sb = Superblock::from_bytes(&bs.device().as_bytes()[..4096]).unwrap();
        assert_eq!(sb.next, b1.page_index());

        bs.delete_blob(b1).unwrap();
        assert_eq!(bs.head(), None);
        assert_eq!(bs.md_pages().size(), 1);

        let bs = reopen(bs);
        assert!(bs.blobs().is_empty());
        assert_eq!(bs.md_pages().iter_set().collect::<Vec<_>>(), vec![0]);
    }

    #[test]
    fn test_delete_unknown_blob() {
        let mut bs = store();
        bs.create_blob(1).unwrap();
        let result = bs.delete_blob(BlobId::new(200));
        assert!(matches!(result, Err(BlobstoreError::InvalidArgument(_))));
        assert_eq!(bs.blobs().len(), 1);
    }

    #[test]
    fn test_deleted_pages_are_reused() {
        let mut bs = store();
        let b1 = bs.create_blob(1).unwrap();
        bs.create_blob(1).unwrap();
        bs.delete_blob(b1).unwrap();

        let b3 = bs.create_blob(1).unwrap();
        assert_eq!(b3, b1);
    }

    #[test]
    fn test_md_exhaustion_leaves_state_unchanged() {
        let mut bs = tiny_store();
        bs.create_blob(1).unwrap();

        let md_before = bs.md_pages().clone();
        let clusters_before = bs.clusters().clone();
        let blobs_before: Vec<Blob> = bs.blobs().iter().cloned().collect();
        let device_before = bs.device().as_bytes().to_vec();

        // Header fits in the last free slot, the index page does not
        let result = bs.create_blob(1);
        assert!(matches!(result, Err(BlobstoreError::Exhausted { .. })));

        assert_eq!(bs.md_pages(), &md_before);
        assert_eq!(bs.clusters(), &clusters_before);
        assert_eq!(bs.blobs().iter().cloned().collect::<Vec<_>>(), blobs_before);
        assert_eq!(bs.device().as_bytes(), &device_before[..]);
    }

    #[test]
    fn test_create_oversized_blob_exhausts_quickly() {
        let mut bs = store();
        bs.create_blob(1).unwrap();

        let md_before = bs.md_pages().clone();
        let device_before = bs.device().as_bytes().to_vec();
        let writes = bs.device().writes();

        // 8 Mi index pages against a 256-page metadata region
        let result = bs.create_blob(u32::MAX);
        assert!(matches!(result, Err(BlobstoreError::Exhausted { .. })));

        assert_eq!(bs.md_pages(), &md_before);
        assert_eq!(bs.blobs().len(), 1);
        assert_eq!(bs.device().writes(), writes);
        assert_eq!(bs.device().as_bytes(), &device_before[..]);
    }

    #[test]
    fn test_write_failure_rolls_back() {
        let mut bs = store();
        let b1 = bs.create_blob(1).unwrap();
        let md_before = bs.md_pages().clone();

        // Index page and header succeed, superblock write fails
        bs.device.fail_writes_after(2);
        assert!(matches!(bs.create_blob(1), Err(BlobstoreError::Io(_))));
        assert_eq!(bs.md_pages(), &md_before);
        assert_eq!(bs.head(), Some(b1));

        let mut dev = bs.deinit();
        dev.clear_failures();
        let bs = Blobstore::open(dev).unwrap();
        assert_eq!(bs.blobs().len(), 1);
        assert_eq!(bs.md_pages(), &md_before);
    }

    #[test]
    fn test_delete_write_failure_keeps_blob() {
        let mut bs = store();
        let b1 = bs.create_blob(1).unwrap();
        bs.device.fail_writes_after(0);

        assert!(bs.delete_blob(b1).is_err());
        assert!(bs.blob(b1).is_some());
        assert!(bs.md_pages().get(b1.page_index() as usize));
    }

    #[test]
    fn test_create_final_flush_failure_is_linked() {
        let mut bs = store();
        let b1 = bs.create_blob(1).unwrap();

        // The pre-pointer flush succeeds, the final one fails
        bs.device.fail_flushes_after(1);
        assert!(matches!(bs.create_blob(3), Err(BlobstoreError::Io(_))));

        let head = bs.head().unwrap();
        assert_ne!(head, b1);
        assert_eq!(bs.blob(head).unwrap().n_clusters(), 3);
        assert_eq!(bs.blobs().len(), 2);
        assert!(bs.md_pages().get(head.page_index() as usize));
        let sb = Superblock::from_bytes(&bs.device().as_bytes()[..4096]).unwrap();
        assert_eq!(sb.next, head.page_index());

        let mut dev = bs.deinit();
        dev.clear_failures();
        let bs = Blobstore::open(dev).unwrap();
        let ids: Vec<BlobId> = bs.blobs().iter().map(Blob::id).collect();
        assert_eq!(ids, vec![head, b1]);
    }

    #[test]
    fn test_delete_final_flush_failure_is_unlinked() {
        let mut bs = store();
        let b1 = bs.create_blob(1).unwrap();
        let b2 = bs.create_blob(2).unwrap();

        bs.device.fail_flushes_after(1);
        assert!(matches!(bs.delete_blob(b2), Err(BlobstoreError::Io(_))));

        assert!(bs.blob(b2).is_none());
        assert_eq!(bs.head(), Some(b1));
        assert!(!bs.md_pages().get(b2.page_index() as usize));
        let sb = Superblock::from_bytes(&bs.device().as_bytes()[..4096]).unwrap();
        assert_eq!(sb.next, b1.page_index());

        let mut dev = bs.deinit();
        dev.clear_failures();
        let bs = Blobstore::open(dev).unwrap();
        let ids: Vec<BlobId> = bs.blobs().iter().map(Blob::id).collect();
        assert_eq!(ids, vec![b1]);
    }

    #[test]
    fn test_list_and_nonzero() {
        let mut bs = store();
        let b1 = bs.create_blob(8).unwrap();
        let b2 = bs.create_blob(3).unwrap();

        let list = bs.list().unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, b2);
        assert_eq!(list[0].n_clusters, 3);
        assert_eq!(list[0].percent_filled, 0);
        assert_eq!(list[1].id, b1);

        let nonzero = bs.nonzero(b1).unwrap();
        assert_eq!(nonzero.capacity(), 8);
        assert_eq!(nonzero.size(), 0);
        assert!(bs.nonzero(BlobId::new(99)).is_err());
    }

    #[test]
    fn test_pointer_writes_are_fenced_by_flushes() {
        let mut bs = store();
        let flushes = bs.device().flushes();
        let id = bs.create_blob(1).unwrap();
        assert_eq!(bs.device().flushes(), flushes + 2);

        bs.delete_blob(id).unwrap();
        assert_eq!(bs.device().flushes(), flushes + 4);
    }
}
