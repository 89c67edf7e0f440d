//! Remote file-listing fetch and the count consistency guard.

use std::collections::HashMap;

use datalift_protocol::RemoteFileEntry;
use datalift_protocol::constants::REMOTE_COUNT_THRESHOLD;
use tracing::{debug, warn};

use crate::session::IngestSession;
use crate::ClientError;

/// Map from store-relative path to every known version at that path.
///
/// A path accumulates one entry per uploaded version; never assume hash
/// uniqueness per path.
pub type RemoteInventory = HashMap<String, Vec<RemoteFileEntry>>;

/// Queries the store for files already associated with `key`/`id`,
/// optionally narrowed to a subdirectory.
///
/// An empty result means "nothing uploaded yet", not an error.
pub async fn fetch_remote_inventory(
    session: &IngestSession,
    key: &str,
    id: u64,
    subdir_filter: Option<&str>,
) -> Result<RemoteInventory, ClientError> {
    let url = session.metadata_url(&format!("fileinfo/files_for_keyvalue/{key}/{id}"));
    let body = session.get_text(&url, "fetch remote inventory").await?;

    let entries: Vec<RemoteFileEntry> = serde_json::from_str(&body)
        .map_err(|e| ClientError::MalformedResponse(format!("file listing: {e}")))?;

    let mut inventory = RemoteInventory::new();
    for entry in entries {
        if let Some(filter) = subdir_filter {
            let subdir = entry.store_subdir();
            let matches = subdir == filter || subdir.starts_with(&format!("{filter}/"));
            if !matches {
                continue;
            }
        }
        inventory.entry(entry.relative_path()).or_default().push(entry);
    }

    debug!(key, id, paths = inventory.len(), "remote inventory fetched");
    Ok(inventory)
}

/// Cross-checks the listing against an authoritative file count.
///
/// A remote count below 95 % of expected is critical: the upload must not
/// proceed, since uploading on top of an undercounted remote state risks
/// silent data loss or duplicate storage billing. Never retried.
pub fn verify_remote_count(
    inventory: &RemoteInventory,
    expected: usize,
) -> Result<(), ClientError> {
    let actual = inventory.len();
    if expected > 0 && (actual as f64) < (expected as f64) * REMOTE_COUNT_THRESHOLD {
        warn!(expected, actual, "remote inventory is suspiciously small; aborting");
        return Err(ClientError::RemoteCountMismatch { expected, actual });
    }
    Ok(())
}
