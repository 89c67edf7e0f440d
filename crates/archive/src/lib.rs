//! Streamed tar packing with exact size precomputation.
//!
//! The ingest transport performs a fixed-length PUT, so the total archive
//! size must be known before the first byte is sent. [`ArchivePlan`]
//! computes that size deterministically from entry metadata alone, then
//! streams header and content blocks entry by entry into any writer —
//! the complete archive is never staged on disk. The planned size and the
//! bytes actually written must agree exactly; any divergence is surfaced
//! as [`ArchiveError::SizeMismatch`] because the transport would otherwise
//! hang or truncate.

mod header;
mod packer;

pub use packer::{ArchivePlan, PackProgressFn};

use std::path::PathBuf;

/// Size of one tar block.
pub const BLOCK_SIZE: u64 = 512;

/// Archives are zero-padded to a multiple of this record size.
pub const RECORD_SIZE: u64 = 10_240;

/// Errors produced while packing.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// A file's on-disk size no longer matches the plan. The plan is built
    /// from an immutable inventory, so this means the dataset was modified
    /// mid-upload.
    #[error(
        "file {} changed during packing: planned {planned} bytes, read {actual}",
        path.display()
    )]
    EntryChanged {
        path: PathBuf,
        planned: u64,
        actual: u64,
    },

    #[error("packed stream size mismatch: planned {planned} bytes, wrote {written}")]
    SizeMismatch { planned: u64, written: u64 },
}
