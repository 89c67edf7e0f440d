use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{
    DATA_PACKAGE_KEY, DATASET_KEY, DEFAULT_EUS_INSTRUMENT_ID, DEFAULT_EUS_PROPOSAL,
    DEFAULT_EUS_SUBMITTER_ID,
};

/// Errors raised when upload metadata is internally inconsistent.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error(
        "exactly one of dataset_id / data_package_id must be non-zero \
         (got dataset_id={dataset_id}, data_package_id={data_package_id})"
    )]
    AmbiguousTarget { dataset_id: u64, data_package_id: u64 },
}

/// A single local file selected for upload.
///
/// Created during the inventory walk and immutable afterwards. The hash is
/// always fully computed before the record exists; there is no partial or
/// deferred mode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    /// Absolute path of the file on disk.
    pub local_path: PathBuf,
    /// Destination directory relative to the dataset root, forward-slash
    /// separated, never rooted. Empty for files at the root.
    pub subdir: String,
    pub file_name: String,
    /// Lowercase hex SHA-1 of the full content (40 chars).
    pub hashsum: String,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl FileRecord {
    /// Creates a record, normalizing `subdir` (forward slashes, no leading
    /// separator or drive prefix, no trailing slash).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        local_path: PathBuf,
        subdir: &str,
        file_name: impl Into<String>,
        hashsum: impl Into<String>,
        size: u64,
        created: DateTime<Utc>,
        modified: DateTime<Utc>,
    ) -> Self {
        Self {
            local_path,
            subdir: normalize_subdir(subdir),
            file_name: file_name.into(),
            hashsum: hashsum.into(),
            size,
            created,
            modified,
        }
    }

    /// Path relative to the dataset root, e.g. `sub/dir/file.raw`.
    pub fn relative_path(&self) -> String {
        if self.subdir.is_empty() {
            self.file_name.clone()
        } else {
            format!("{}/{}", self.subdir, self.file_name)
        }
    }
}

/// Normalizes a destination directory to the on-the-wire form: forward
/// slashes, no leading/trailing separators, no drive prefix.
pub fn normalize_subdir(subdir: &str) -> String {
    let s = subdir.replace('\\', "/");
    let s = s.trim_matches('/');
    // Strip a Windows drive prefix ("C:").
    let s = match s.split_once(':') {
        Some((drive, rest)) if drive.len() == 1 => rest.trim_start_matches('/'),
        _ => s,
    };
    s.to_string()
}

/// The remote store's knowledge of one previously uploaded file version.
///
/// A single relative path may map to several entries (several hashes) over
/// time; never assume hash uniqueness per path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteFileEntry {
    pub name: String,
    #[serde(default)]
    pub subdir: String,
    pub hashsum: String,
    #[serde(default)]
    pub hashtype: String,
    pub size: u64,
    #[serde(default)]
    pub transaction_id: i64,
    #[serde(default)]
    pub ctime: String,
    #[serde(default)]
    pub mtime: String,
}

impl RemoteFileEntry {
    /// Store-root-relative directory of this entry.
    ///
    /// Listing entries may carry the container-root prefix in `subdir`;
    /// it is stripped so both sides of the diff use the same key space.
    pub fn store_subdir(&self) -> &str {
        self.subdir
            .strip_prefix(crate::constants::CONTAINER_ROOT)
            .map(|rest| rest.trim_start_matches('/'))
            .unwrap_or(&self.subdir)
    }

    /// Store-root-relative path for diffing against local records.
    pub fn relative_path(&self) -> String {
        let subdir = self.store_subdir();
        if subdir.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", subdir, self.name)
        }
    }
}

/// Attribution and addressing for one upload session.
///
/// Created once per session and immutable during it. Exactly one of
/// `dataset_id` / `data_package_id` must be non-zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadMetadata {
    #[serde(default)]
    pub dataset_id: u64,
    #[serde(default)]
    pub data_package_id: u64,
    /// Optional subdirectory below the dataset the upload is scoped to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub subdirectory: String,
    #[serde(default)]
    pub instrument_id: u32,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub instrument_name: String,
    /// EUS proposal the dataset belongs to.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub proposal_id: String,
    /// EUS id of the submitting operator.
    #[serde(default)]
    pub submitter_id: u32,
    /// EUS ids of the users of record for the dataset.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub users_of_record: Vec<u32>,
    /// Supplemental attribution (campaign, experiment, organism, ...)
    /// carried verbatim into TransactionKeyValue manifest rows.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attributes: Vec<(String, String)>,
}

impl UploadMetadata {
    /// Checks the dataset/data-package XOR rule.
    pub fn validate(&self) -> Result<(), MetadataError> {
        let dataset = self.dataset_id != 0;
        let package = self.data_package_id != 0;
        if dataset == package {
            return Err(MetadataError::AmbiguousTarget {
                dataset_id: self.dataset_id,
                data_package_id: self.data_package_id,
            });
        }
        Ok(())
    }

    /// Listing key and id addressing this upload's target.
    pub fn target_key(&self) -> (&'static str, u64) {
        if self.dataset_id != 0 {
            (DATASET_KEY, self.dataset_id)
        } else {
            (DATA_PACKAGE_KEY, self.data_package_id)
        }
    }

    /// Instrument id, falling back to the shared unknown-instrument id.
    pub fn instrument_or_default(&self) -> u32 {
        if self.instrument_id != 0 {
            self.instrument_id
        } else {
            DEFAULT_EUS_INSTRUMENT_ID
        }
    }

    /// Proposal id, falling back to the shared default proposal.
    pub fn proposal_or_default(&self) -> String {
        if self.proposal_id.is_empty() {
            DEFAULT_EUS_PROPOSAL.to_string()
        } else {
            self.proposal_id.clone()
        }
    }

    /// Submitter id, falling back to the shared operator account.
    pub fn submitter_or_default(&self) -> u32 {
        if self.submitter_id != 0 {
            self.submitter_id
        } else {
            DEFAULT_EUS_SUBMITTER_ID
        }
    }
}
