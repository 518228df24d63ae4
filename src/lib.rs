//! # Blobstore - Blob Storage on Raw Block Devices
//!
//! `blobstore` lays a flat namespace of fixed-size blobs directly onto a block
//! device, with no filesystem in between. The device is divided into pages
//! and clusters:
//!
//! - **Superblock** at page 0 with the geometry and the head of the blob chain
//! - **Metadata region** of pages holding blob headers and cluster-index pages
//! - **Data clusters** referenced by each blob's cluster list (0 = hole)
//!
//! Free space is never persisted. Opening a store walks the blob chain and
//! rebuilds both allocation bitmaps from what it reaches, so a crash between
//! writes can at worst leak nothing and lose only the operation in flight.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use blobstore::{Blobstore, DeviceFile, Result};
//!
//! # fn main() -> Result<()> {
//! // Format a 64 MiB image file
//! let device = DeviceFile::create("store.img", 64 << 20)?;
//! let mut store = Blobstore::init(device)?;
//!
//! // A blob of 1000 clusters, all holes
//! let id = store.create_blob(1000)?;
//!
//! for info in store.list()? {
//!     println!("{} {} {}", info.id, info.uuid, info.n_clusters);
//! }
//!
//! store.delete_blob(id)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Reopening
//!
//! ```rust,no_run
//! use blobstore::{Blobstore, DeviceFile, Result};
//!
//! # fn main() -> Result<()> {
//! let store = Blobstore::open(DeviceFile::open("store.img")?)?;
//! println!("{} blobs, {} clusters in use", store.blobs().len(), store.clusters().size());
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use crate::core::{allocator, array, blob, blobstore, config, device, error, page};

pub use crate::core::{
    allocator::{Bitset, Reservation},
    array::U32Array,
    blob::{Blob, BlobId, BlobList},
    blobstore::{BlobInfo, Blobstore},
    config::{BlobstoreConfig, FormatOptions},
    device::{BlockDevice, DeviceFile, MemoryDevice},
    error::{BlobstoreError, Result},
    page::{Geometry, Superblock, CLUSTERS_PER_PAGE, MAGIC},
};
