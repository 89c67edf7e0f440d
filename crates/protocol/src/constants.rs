use std::time::Duration;

/// Root directory segment inside every packed archive.
///
/// All file destination paths in the manifest and the archive are prefixed
/// with this segment; the ingest service unpacks relative to it.
pub const CONTAINER_ROOT: &str = "data";

/// Name of the manifest entry written at the archive root.
pub const METADATA_FILE_NAME: &str = "metadata.txt";

/// Hash algorithm tag recorded in manifests and file listings.
pub const HASH_TYPE_SHA1: &str = "sha1";

/// Maximum number of files a single upload transaction may carry.
///
/// The archive planner precomputes per-entry metadata and the ingest
/// endpoint cannot take arbitrarily large single transactions; oversized
/// datasets must be zipped before capture.
pub const MAX_INVENTORY_FILES: usize = 500;

/// Remote listings below this fraction of the authoritative file count are
/// treated as critical: uploading on top of an undercounted remote state
/// risks silent data loss.
pub const REMOTE_COUNT_THRESHOLD: f64 = 0.95;

/// Fallback EUS instrument id used when the dataset's instrument is not
/// mapped in EUS.
pub const DEFAULT_EUS_INSTRUMENT_ID: u32 = 34127;

/// Fallback EUS proposal for datasets captured without one.
pub const DEFAULT_EUS_PROPOSAL: &str = "17797";

/// Fallback EUS submitter (shared operator account).
pub const DEFAULT_EUS_SUBMITTER_ID: u32 = 43428;

/// Listing key for dataset-addressed uploads.
pub const DATASET_KEY: &str = "omics.dms.dataset_id";

/// Listing key for data-package-addressed uploads.
pub const DATA_PACKAGE_KEY: &str = "omics.dms.datapackage_id";

/// How often the status poller queries the ingest service.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Give up polling for a final verdict after this long.
pub const DEFAULT_POLL_DEADLINE: Duration = Duration::from_secs(600);

/// Minimum interval between archive-write progress notifications.
pub const PACK_PROGRESS_INTERVAL: Duration = Duration::from_secs(2);

/// Step messages that mark an ingest step as complete.
pub const STEP_COMPLETE_MESSAGES: [&str; 2] = ["completed", "verified"];

/// Substring of a step ERROR message that indicates missing proposal
/// access. This condition needs an access grant, not a re-run, so it is
/// surfaced with a distinguished marker.
pub const PERMISSION_DENIED_PHRASE: &str = "do not have upload permissions";

/// Authentication failure message the ingest frontend emits transiently
/// while its credential cache is stale. Callers may retry on it.
pub const TRANSIENT_AUTH_PHRASE: &str = "unknown user name or bad password";

/// Markers of a server-side exception embedded as plain text in an
/// HTTP-200 response body (legacy server quirk).
pub const EMBEDDED_EXCEPTION_MARKERS: [&str; 2] =
    ["Traceback (most recent call last)", "Fatal error:"];
