//! Shared data and wire types for the datalift ingest pipeline.
//!
//! Everything the pipeline crates agree on lives here: local file records,
//! upload attribution metadata, the remote store's file-listing entries, the
//! flat JSON manifest format, and the ingest status-document types with
//! their parser.

pub mod constants;
pub mod manifest;
pub mod status;
pub mod types;

// Re-export primary types for convenience.
pub use manifest::{ManifestBuilder, ManifestError, ManifestRecord};
pub use status::{
    IngestStep, IngestVerdict, StatusParseError, StatusReport, StepReport, StepStatus,
    parse_status_document,
};
pub use types::{FileRecord, MetadataError, RemoteFileEntry, UploadMetadata};
