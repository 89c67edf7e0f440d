//! HTTP client for the ingest service.
//!
//! An explicit [`IngestSession`] carries all connection state (cookies,
//! credentials, base URLs) through the call chain — there is no ambient
//! process-wide transport. On top of it sit the three remote operations
//! the pipeline needs: the dataset file listing, the preallocate/PUT
//! upload, and the status query with its polling loop.
//!
//! No operation here retries internally. [`ClientError::is_retryable`] is
//! advisory; retry policy belongs to the caller.

pub mod file_listing;
pub mod ingest;
pub mod session;
pub mod status;

pub use file_listing::{RemoteInventory, fetch_remote_inventory, verify_remote_count};
pub use ingest::{UploadTarget, preallocate, upload_archive};
pub use session::{Credentials, IngestConfig, IngestSession};
pub use status::{query_status, wait_for_verdict};

use datalift_archive::ArchiveError;
use datalift_protocol::StatusParseError;
use datalift_protocol::constants::TRANSIENT_AUTH_PHRASE;

/// Errors produced by the client crate.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("{op}: HTTP {status}: {body}")]
    Api {
        op: String,
        status: u16,
        body: String,
    },

    #[error("HTTP error: {0}")]
    Http(reqwest::Error),

    /// The remote listing is suspiciously small compared to the
    /// authoritative count. Critical: uploading on top of an undercounted
    /// remote state risks silent data loss, so the upload must abort
    /// before any PUT. Never retried automatically.
    #[error("remote listing reports {actual} files but {expected} expected; refusing to upload")]
    RemoteCountMismatch { expected: usize, actual: usize },

    #[error(transparent)]
    Status(#[from] StatusParseError),

    #[error("archive packing: {0}")]
    Archive(#[from] ArchiveError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no final verdict before the polling deadline")]
    PollDeadline,

    #[error("cancelled")]
    Cancelled,
}

impl ClientError {
    /// Whether the caller may reasonably retry the operation.
    ///
    /// Timeouts are transient by nature. Authentication failures are
    /// normally fatal, except the ingest frontend's known stale-cache
    /// message.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Timeout(_) => true,
            ClientError::Auth(message) => message
                .to_ascii_lowercase()
                .contains(TRANSIENT_AUTH_PHRASE),
            _ => false,
        }
    }
}

/// Classifies a reqwest failure, separating timeouts from other transport
/// errors.
pub(crate) fn request_error(op: &str, err: reqwest::Error) -> ClientError {
    if err.is_timeout() {
        ClientError::Timeout(format!("{op}: {err}"))
    } else {
        ClientError::Http(err)
    }
}
