//! Content hashing and local dataset inventory.
//!
//! Walks a dataset directory, hashes every file, and produces the
//! [`FileRecord`](datalift_protocol::FileRecord) list the diff engine
//! consumes. The SHA-1 digest computed here is the store's sole
//! change-detection and deduplication key.

mod hasher;
mod scanner;

pub use hasher::{sha1_bytes, sha1_file};
pub use scanner::{ScanProgressFn, build_inventory};

use std::path::PathBuf;

use datalift_protocol::constants::MAX_INVENTORY_FILES;

/// Errors produced by the inventory crate.
#[derive(Debug, thiserror::Error)]
pub enum InventoryError {
    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// The upload ceiling exists because the archive planner precomputes
    /// per-entry metadata and the ingest endpoint cannot take arbitrarily
    /// large single transactions. Fatal; callers must pre-zip.
    #[error("dataset has {count} files, at or over the {MAX_INVENTORY_FILES}-file upload ceiling")]
    TooManyFiles { count: usize },

    #[error("cache info pointer {} names a missing target: {}", pointer.display(), target.display())]
    CacheTargetMissing { pointer: PathBuf, target: PathBuf },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
