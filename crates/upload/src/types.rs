//! Job configuration, progress events, and the upload outcome.

use std::path::PathBuf;
use std::time::Duration;

use datalift_protocol::UploadMetadata;
use datalift_protocol::constants::{DEFAULT_POLL_DEADLINE, DEFAULT_POLL_INTERVAL};
use uuid::Uuid;

/// Everything one upload invocation needs.
#[derive(Debug, Clone)]
pub struct UploadJob {
    /// Dataset directory to inventory.
    pub dataset_root: PathBuf,
    /// Walk subdirectories, or top level only.
    pub recurse: bool,
    pub metadata: UploadMetadata,
    /// Authoritative remote file count for the consistency guard.
    /// `None` skips the check.
    pub expected_remote_files: Option<usize>,
    /// Directory receiving a courtesy copy of the manifest. Best effort:
    /// failures are logged, never propagated.
    pub manifest_copy_dir: Option<PathBuf>,
    pub poll_interval: Duration,
    pub poll_deadline: Duration,
}

impl UploadJob {
    pub fn new(dataset_root: impl Into<PathBuf>, metadata: UploadMetadata) -> Self {
        Self {
            dataset_root: dataset_root.into(),
            recurse: true,
            metadata,
            expected_remote_files: None,
            manifest_copy_dir: None,
            poll_interval: DEFAULT_POLL_INTERVAL,
            poll_deadline: DEFAULT_POLL_DEADLINE,
        }
    }
}

/// Progress event emitted during an upload.
#[derive(Debug, Clone)]
pub enum UploadEvent {
    /// Overall progress, 0.0–1.0, with a short human-readable detail.
    Progress { fraction: f64, detail: String },
    /// The session finished; `job_id` is `None` when nothing needed
    /// uploading.
    Completed { job_id: Option<String> },
    /// The session failed.
    Failed { error: String },
}

/// Result of a completed upload session.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadOutcome {
    pub session_id: Uuid,
    pub new_files: usize,
    pub updated_files: usize,
    /// Dataset content bytes that needed transferring (the diff total).
    pub uploaded_bytes: u64,
    /// Bytes of the packed archive actually sent over the wire.
    pub archive_bytes: u64,
    /// Ingest job/transaction id; `None` when the diff was empty.
    pub job_id: Option<String>,
    /// Status document URL for later re-query; `None` when the diff was
    /// empty.
    pub status_url: Option<String>,
}

impl UploadOutcome {
    pub fn uploaded_files(&self) -> usize {
        self.new_files + self.updated_files
    }
}
