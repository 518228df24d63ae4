use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobstoreError {
    #[error("Allocation error: {0}")]
    Allocation(String),

    #[error("Out of space: requested {requested} slots, {available} free")]
    Exhausted { requested: usize, available: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic number in superblock: {0:#010x}")]
    InvalidMagic(u32),

    #[error("Corrupt blob at page {page}: header declares zero clusters")]
    ZeroClusters { page: u32 },

    #[error("Corrupt chain at page {page}: length disagrees with the {expected} pages declared")]
    ChainLengthMismatch { page: u32, expected: usize },

    #[error("Corrupt chain: page index {page} is outside the metadata region")]
    InvalidPageIndex { page: u32 },

    #[error("Device geometry mismatch: {0}")]
    GeometryMismatch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl BlobstoreError {
    /// True for errors that indicate on-disk inconsistency
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            BlobstoreError::ZeroClusters { .. }
                | BlobstoreError::ChainLengthMismatch { .. }
                | BlobstoreError::InvalidPageIndex { .. }
        )
    }
}

impl From<std::collections::TryReserveError> for BlobstoreError {
    fn from(err: std::collections::TryReserveError) -> Self {
        BlobstoreError::Allocation(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, BlobstoreError>;
