//! Blobs and the blob directory
//!
//! On disk, blobs form a singly linked chain of header pages starting at the
//! superblock, newest first. Each header points at a chain of cluster-index
//! pages holding the blob's cluster IDs (0 = hole).
//!
//! In memory, [`BlobList`] keeps the same order as a map keyed by header page
//! with `next`/`prev` stored as neighbor IDs, so unlinking never leaves a
//! dangling reference.

use crate::allocator::Bitset;
use crate::array::U32Array;
use crate::device::{read_page, BlockDevice};
use crate::error::{BlobstoreError, Result};
use crate::page::{cluster_pages_for, BlobPage, ClusterPage, CLUSTERS_PER_PAGE};
use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Identity of a blob: the page index of its header page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlobId(u32);

impl BlobId {
    pub fn new(page_index: u32) -> Self {
        BlobId(page_index)
    }

    pub fn page_index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for BlobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#06x}", self.0)
    }
}

/// In-memory view of one blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Blob {
    id: BlobId,
    uuid: Uuid,

    /// One slot per cluster of the blob, 0 = hole
    clusters: U32Array,

    /// Page index of each cluster-index page, in chain order
    cluster_pages: U32Array,

    next: Option<BlobId>,
    prev: Option<BlobId>,
}

impl Blob {
    /// Create an all-hole blob of `n_clusters`
    ///
    /// The cluster-index page list is sized but left zero for the caller to
    /// fill.
    pub fn new(id: BlobId, uuid: Uuid, n_clusters: u32) -> Result<Self> {
        let cluster_pages = U32Array::new(cluster_pages_for(n_clusters as usize))?;
        Self::with_cluster_pages(id, uuid, n_clusters, cluster_pages)
    }

    /// Create an all-hole blob around an already claimed page list
    pub(crate) fn with_cluster_pages(
        id: BlobId,
        uuid: Uuid,
        n_clusters: u32,
        cluster_pages: U32Array,
    ) -> Result<Self> {
        let expected = cluster_pages_for(n_clusters as usize);
        if cluster_pages.len() != expected {
            return Err(BlobstoreError::InvalidArgument(format!(
                "{} clusters need {} index pages, got {}",
                n_clusters,
                expected,
                cluster_pages.len()
            )));
        }
        let clusters = U32Array::new(n_clusters as usize)?;
        Ok(Blob {
            id,
            uuid,
            clusters,
            cluster_pages,
            next: None,
            prev: None,
        })
    }

    pub fn id(&self) -> BlobId {
        self.id
    }

    pub fn page_index(&self) -> u32 {
        self.id.page_index()
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Blob size in clusters
    pub fn n_clusters(&self) -> u32 {
        self.clusters.len() as u32
    }

    pub fn clusters(&self) -> &U32Array {
        &self.clusters
    }

    pub(crate) fn clusters_mut(&mut self) -> &mut U32Array {
        &mut self.clusters
    }

    pub fn cluster_pages(&self) -> &U32Array {
        &self.cluster_pages
    }

    pub(crate) fn cluster_pages_mut(&mut self) -> &mut U32Array {
        &mut self.cluster_pages
    }

    /// Next (older) blob in the chain
    pub fn next(&self) -> Option<BlobId> {
        self.next
    }

    /// Previous (newer) blob in the chain
    pub fn prev(&self) -> Option<BlobId> {
        self.prev
    }

    /// Every metadata page this blob owns: header first, then cluster-index pages
    pub fn metadata_pages(&self) -> impl Iterator<Item = u32> + '_ {
        std::iter::once(self.page_index()).chain(self.cluster_pages.iter())
    }

    /// Cluster IDs actually allocated (holes skipped)
    pub fn allocated_clusters(&self) -> impl Iterator<Item = u32> + '_ {
        self.clusters.iter().filter(|&cluster| cluster != 0)
    }

    /// Header page contents with the given chain successor
    pub fn to_page(&self, next: Option<BlobId>) -> BlobPage {
        BlobPage {
            next: next.map_or(0, BlobId::page_index),
            uuid: *self.uuid.as_bytes(),
            n_clusters: self.n_clusters(),
            clusters: self.cluster_pages.as_slice().first().copied().unwrap_or(0),
        }
    }

    /// Sparsity map: bit `i` is set iff cluster slot `i` is allocated
    pub fn nonzero(&self) -> Result<Bitset> {
        let mut set = Bitset::new(self.clusters.len())?;
        for (i, cluster) in self.clusters.iter().enumerate() {
            if cluster != 0 {
                set.set(i, true);
            }
        }
        Ok(set)
    }

    /// Share of cluster slots that are allocated, 0-100
    pub fn percent_filled(&self) -> Result<u32> {
        let nonzero = self.nonzero()?;
        if nonzero.capacity() == 0 {
            return Ok(0);
        }
        Ok((nonzero.size() * 100 / nonzero.capacity()) as u32)
    }
}

/// Blobs of a store in chain order (head = most recently created)
#[derive(Debug, Clone, Default)]
pub struct BlobList {
    blobs: AHashMap<BlobId, Blob>,
    head: Option<BlobId>,
    tail: Option<BlobId>,
}

impl BlobList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn head(&self) -> Option<BlobId> {
        self.head
    }

    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    pub fn get(&self, id: BlobId) -> Option<&Blob> {
        self.blobs.get(&id)
    }

    pub fn contains(&self, id: BlobId) -> bool {
        self.blobs.contains_key(&id)
    }

    /// Iterate in chain order, head first
    pub fn iter(&self) -> Iter<'_> {
        Iter {
            list: self,
            cursor: self.head,
        }
    }

    /// Insert `blob` as the new head
    pub fn push_front(&mut self, mut blob: Blob) {
        let id = blob.id;
        blob.prev = None;
        blob.next = self.head;

        match self.head.and_then(|head| self.blobs.get_mut(&head)) {
            Some(old_head) => old_head.prev = Some(id),
            None => self.tail = Some(id),
        }

        self.head = Some(id);
        self.blobs.insert(id, blob);
    }

    /// Append `blob` after the current tail
    pub fn push_back(&mut self, mut blob: Blob) {
        let id = blob.id;
        blob.next = None;
        blob.prev = self.tail;

        match self.tail.and_then(|tail| self.blobs.get_mut(&tail)) {
            Some(old_tail) => old_tail.next = Some(id),
            None => self.head = Some(id),
        }

        self.tail = Some(id);
        self.blobs.insert(id, blob);
    }

    /// Remove `id`, joining its neighbors
    pub fn unlink(&mut self, id: BlobId) -> Option<Blob> {
        let blob = self.blobs.remove(&id)?;

        match blob.prev.and_then(|prev| self.blobs.get_mut(&prev)) {
            Some(prev) => prev.next = blob.next,
            None => self.head = blob.next,
        }
        match blob.next.and_then(|next| self.blobs.get_mut(&next)) {
            Some(next) => next.prev = blob.prev,
            None => self.tail = blob.prev,
        }

        Some(blob)
    }
}

/// Chain-order iterator over a [`BlobList`]
pub struct Iter<'a> {
    list: &'a BlobList,
    cursor: Option<BlobId>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = &'a Blob;

    fn next(&mut self) -> Option<&'a Blob> {
        let blob = self.list.blobs.get(&self.cursor?)?;
        self.cursor = blob.next;
        Some(blob)
    }
}

impl<'a> IntoIterator for &'a BlobList {
    type Item = &'a Blob;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}

/// Where chains may point: pages `1..md_capacity`
fn check_page_index(page: u32, md_capacity: usize) -> Result<()> {
    if page == 0 || page as usize >= md_capacity {
        return Err(BlobstoreError::InvalidPageIndex { page });
    }
    Ok(())
}

/// Load the cluster-index chain starting at `first` into `blob`
///
/// The walk stops after the number of pages the blob's size calls for; a
/// chain that ends early or keeps going is corrupt.
fn read_clusters<D: BlockDevice + ?Sized>(
    device: &mut D,
    io_shift: u32,
    md_capacity: usize,
    blob: &mut Blob,
    first: u32,
) -> Result<()> {
    let n_clusters = blob.clusters.len();
    let n_pages = blob.cluster_pages.len();
    let mut page_index = first;

    for i in 0..n_pages {
        check_page_index(page_index, md_capacity)?;
        let page = ClusterPage::from_bytes(&read_page(device, io_shift, page_index)?)?;

        blob.cluster_pages_mut().set(i, page_index);
        let start = i * CLUSTERS_PER_PAGE;
        let end = (start + CLUSTERS_PER_PAGE).min(n_clusters);
        blob.clusters_mut()
            .slice_mut(start..end)
            .copy_from_slice(&page.clusters[..end - start]);

        let last = i + 1 == n_pages;
        if last != (page.next == 0) {
            return Err(BlobstoreError::ChainLengthMismatch {
                page: page_index,
                expected: n_pages,
            });
        }
        page_index = page.next;
    }

    Ok(())
}

/// Read the blob whose header is at `page_index`
///
/// Returns the blob and the header page of its successor (0 = end).
pub fn read_one<D: BlockDevice + ?Sized>(
    device: &mut D,
    io_shift: u32,
    md_capacity: usize,
    page_index: u32,
) -> Result<(Blob, u32)> {
    check_page_index(page_index, md_capacity)?;
    let header = BlobPage::from_bytes(&read_page(device, io_shift, page_index)?)?;
    if header.n_clusters == 0 {
        return Err(BlobstoreError::ZeroClusters { page: page_index });
    }
    // Index pages alone would overflow the metadata region
    let n_pages = cluster_pages_for(header.n_clusters as usize);
    if n_pages >= md_capacity {
        return Err(BlobstoreError::ChainLengthMismatch {
            page: page_index,
            expected: n_pages,
        });
    }

    let mut blob = Blob::new(
        BlobId::new(page_index),
        Uuid::from_bytes(header.uuid),
        header.n_clusters,
    )?;
    read_clusters(device, io_shift, md_capacity, &mut blob, header.clusters)?;

    Ok((blob, header.next))
}

/// Read the whole blob chain starting at `start` (0 = empty store)
///
/// Every blob owns at least two metadata pages, so a chain with as many
/// blobs as there are metadata pages must loop and is reported as corrupt.
pub fn read_chain<D: BlockDevice + ?Sized>(
    device: &mut D,
    io_shift: u32,
    md_capacity: usize,
    start: u32,
) -> Result<BlobList> {
    let mut list = BlobList::new();
    let mut next = start;

    while next != 0 {
        if list.len() >= md_capacity || list.contains(BlobId::new(next)) {
            return Err(BlobstoreError::ChainLengthMismatch {
                page: next,
                expected: list.len(),
            });
        }

        let (blob, successor) = read_one(device, io_shift, md_capacity, next)?;
        tracing::debug!(
            "Read blob {} ({} clusters, {} index pages)",
            blob.id(),
            blob.n_clusters(),
            blob.cluster_pages().len()
        );
        list.push_back(blob);
        next = successor;
    }

    Ok(list)
}
