//! Storage engine: on-disk layout, allocation, and the blob chain

pub mod allocator;
pub mod array;
pub mod blob;
pub mod blobstore;
pub mod config;
pub mod device;
pub mod error;
pub mod page;

pub use self::blobstore::{BlobInfo, Blobstore};
