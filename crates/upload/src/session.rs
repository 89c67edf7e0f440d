//! Transient per-call upload aggregate.

use datalift_protocol::ManifestRecord;
use uuid::Uuid;

use crate::diff::UploadSet;

/// State of one upload invocation: the diff result, the generated
/// manifest, and the output status. Created per call, dropped when the
/// call returns — nothing here outlives the session.
#[derive(Debug)]
pub struct UploadSession {
    pub id: Uuid,
    pub set: UploadSet,
    pub manifest: Vec<ManifestRecord>,
    pub status_url: Option<String>,
    pub success: bool,
    pub error: Option<String>,
}

impl UploadSession {
    pub fn new(set: UploadSet, manifest: Vec<ManifestRecord>) -> Self {
        Self {
            id: Uuid::new_v4(),
            set,
            manifest,
            status_url: None,
            success: false,
            error: None,
        }
    }

    pub fn complete(&mut self) {
        self.success = true;
        self.error = None;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.success = false;
        self.error = Some(error.into());
    }
}
