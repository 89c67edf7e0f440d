//! Orchestrated dataset upload pipeline.
//!
//! This crate implements the **business logic** of pushing a dataset
//! directory into the ingest service. It is a library crate with no UI;
//! callers provide an [`IngestSession`](datalift_client::IngestSession)
//! and receive progress events over a channel scoped to the call.
//!
//! # Pipeline
//!
//! 1. **Validate** — metadata addressing rules (0.0)
//! 2. **Inventory** — walk and hash the dataset (0.0–0.2)
//! 3. **Fetch + guard** — remote listing, count consistency check (0.2)
//! 4. **Diff** — (path, hash) matching; exact matches never re-upload
//! 5. **Manifest** — flat JSON record list, courtesy copy best-effort
//! 6. **Pack + PUT** — streamed fixed-length archive upload (0.3–0.9)
//! 7. **Poll** — status state machine to a final verdict (0.9–1.0)
//!
//! The whole pipeline is one logical thread of control: sequential awaits,
//! no internal parallelism, no internal retries.

pub mod diff;
pub mod pipeline;
pub mod session;
pub mod types;

pub use diff::{UploadSet, diff_inventories};
pub use pipeline::UploadPipeline;
pub use session::UploadSession;
pub use types::{UploadEvent, UploadJob, UploadOutcome};

use datalift_archive::ArchiveError;
use datalift_client::ClientError;
use datalift_inventory::InventoryError;
use datalift_protocol::status::IngestStep;
use datalift_protocol::{ManifestError, MetadataError};

/// Errors produced during an upload session.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error("inventory: {0}")]
    Inventory(#[from] InventoryError),

    #[error("manifest: {0}")]
    Manifest(#[from] ManifestError),

    #[error("archive: {0}")]
    Archive(#[from] ArchiveError),

    #[error("transport: {0}")]
    Client(ClientError),

    /// The ingest pipeline reported ERROR on a step. `permissions_denied`
    /// marks the proposal-access variant, which needs an access grant
    /// rather than a re-run.
    #[error("ingest failed at step {step}: {message}")]
    IngestState {
        step: IngestStep,
        message: String,
        permissions_denied: bool,
    },

    #[error("internal: {0}")]
    Internal(String),

    #[error("cancelled")]
    Cancelled,
}

impl From<ClientError> for UploadError {
    fn from(err: ClientError) -> Self {
        match err {
            ClientError::Cancelled => UploadError::Cancelled,
            other => UploadError::Client(other),
        }
    }
}

impl UploadError {
    /// Whether the caller may reasonably retry the whole upload.
    pub fn is_retryable(&self) -> bool {
        matches!(self, UploadError::Client(e) if e.is_retryable())
    }

    /// The distinguished proposal-access failure.
    pub fn permissions_denied(&self) -> bool {
        matches!(
            self,
            UploadError::IngestState {
                permissions_denied: true,
                ..
            }
        )
    }
}
