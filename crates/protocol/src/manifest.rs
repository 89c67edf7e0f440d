//! The flat JSON manifest transmitted alongside every archive.
//!
//! The ingest service consumes a denormalized array of records rather than
//! a nested document: transaction-level attributes as key/value rows, three
//! fixed `Transactions.<column>` rows, and one `Files` row per archive
//! member. The `destinationTable` field discriminates the record kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::{CONTAINER_ROOT, HASH_TYPE_SHA1};
use crate::types::{FileRecord, UploadMetadata};

/// Errors raised while assembling a manifest.
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    /// The destination path would desynchronize the manifest from the
    /// archive's literal internal layout. Always a packer/manifest bug,
    /// never a retryable condition.
    #[error("invalid destination path {path:?}: {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// One record of the flat manifest array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "destinationTable")]
pub enum ManifestRecord {
    /// Transaction-level attribute.
    #[serde(rename = "TransactionKeyValue")]
    KeyValue { key: String, value: String },

    /// EUS instrument the dataset was acquired on.
    #[serde(rename = "Transactions.instrument")]
    Instrument { value: String },

    /// EUS proposal the transaction is billed against.
    #[serde(rename = "Transactions.proposal")]
    Proposal { value: String },

    /// EUS id of the submitting operator.
    #[serde(rename = "Transactions.submitter")]
    Submitter { value: String },

    /// One archive member.
    #[serde(rename = "Files")]
    File {
        name: String,
        subdir: String,
        size: u64,
        hashsum: String,
        hashtype: String,
        ctime: DateTime<Utc>,
        mtime: DateTime<Utc>,
    },
}

/// Assembles the manifest for one upload session.
pub struct ManifestBuilder<'a> {
    metadata: &'a UploadMetadata,
}

impl<'a> ManifestBuilder<'a> {
    pub fn new(metadata: &'a UploadMetadata) -> Self {
        Self { metadata }
    }

    /// Builds the ordered record list: addressing key, supplemental
    /// attributes, users of record, the three transaction columns, then one
    /// row per file.
    pub fn build(&self, files: &[FileRecord]) -> Result<Vec<ManifestRecord>, ManifestError> {
        let mut records = Vec::with_capacity(files.len() + 8);

        let (key, id) = self.metadata.target_key();
        records.push(ManifestRecord::KeyValue {
            key: key.to_string(),
            value: id.to_string(),
        });

        for (key, value) in &self.metadata.attributes {
            records.push(ManifestRecord::KeyValue {
                key: key.clone(),
                value: value.clone(),
            });
        }

        for user_id in &self.metadata.users_of_record {
            records.push(ManifestRecord::KeyValue {
                key: "user_of_record".to_string(),
                value: user_id.to_string(),
            });
        }

        // Required by store policy; well-known fallbacks when unknown.
        records.push(ManifestRecord::Instrument {
            value: self.metadata.instrument_or_default().to_string(),
        });
        records.push(ManifestRecord::Proposal {
            value: self.metadata.proposal_or_default(),
        });
        records.push(ManifestRecord::Submitter {
            value: self.metadata.submitter_or_default().to_string(),
        });

        for file in files {
            records.push(file_record(file)?);
        }

        Ok(records)
    }
}

/// Serializes a record list to the JSON bytes placed in the archive.
pub fn to_json(records: &[ManifestRecord]) -> Result<Vec<u8>, ManifestError> {
    Ok(serde_json::to_vec_pretty(records)?)
}

fn file_record(file: &FileRecord) -> Result<ManifestRecord, ManifestError> {
    if file.file_name.is_empty() || file.file_name.contains('/') {
        return Err(ManifestError::InvalidPath {
            path: file.file_name.clone(),
            reason: "file name must be a single path segment".into(),
        });
    }
    Ok(ManifestRecord::File {
        name: file.file_name.clone(),
        subdir: destination_subdir(&file.subdir)?,
        size: file.size,
        hashsum: file.hashsum.clone(),
        hashtype: HASH_TYPE_SHA1.to_string(),
        ctime: file.created,
        mtime: file.modified,
    })
}

/// Joins the container root and a dataset-relative directory.
///
/// The result must match the archive's internal layout byte for byte, so a
/// doubled or leading separator is fatal.
pub fn destination_subdir(subdir: &str) -> Result<String, ManifestError> {
    let joined = if subdir.is_empty() {
        CONTAINER_ROOT.to_string()
    } else {
        format!("{CONTAINER_ROOT}/{subdir}")
    };
    if joined.contains("//") {
        return Err(ManifestError::InvalidPath {
            path: joined,
            reason: "doubled path separator".into(),
        });
    }
    if joined.starts_with('/') {
        return Err(ManifestError::InvalidPath {
            path: joined,
            reason: "rooted path".into(),
        });
    }
    Ok(joined)
}
