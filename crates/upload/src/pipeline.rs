//! The upload orchestrator.

use std::path::Path;

use datalift_archive::ArchivePlan;
use datalift_client::{
    IngestSession, fetch_remote_inventory, preallocate, upload_archive, verify_remote_count,
    wait_for_verdict,
};
use datalift_inventory::build_inventory;
use datalift_protocol::manifest::{ManifestBuilder, to_json};
use datalift_protocol::status::IngestVerdict;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::diff::diff_inventories;
use crate::session::UploadSession;
use crate::types::{UploadEvent, UploadJob, UploadOutcome};
use crate::UploadError;

/// Runs upload sessions against one ingest session.
///
/// Progress events are sent over the channel passed into each call —
/// scoped to that call, so concurrent pipelines never interfere.
pub struct UploadPipeline<'a> {
    session: &'a IngestSession,
    cancel: CancellationToken,
}

impl<'a> UploadPipeline<'a> {
    pub fn new(session: &'a IngestSession) -> Self {
        Self {
            session,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_cancel(session: &'a IngestSession, cancel: CancellationToken) -> Self {
        Self { session, cancel }
    }

    /// Token that aborts this pipeline between phases.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs the full pipeline for one dataset.
    ///
    /// Emits a terminal [`UploadEvent::Completed`] or
    /// [`UploadEvent::Failed`] in addition to returning the result.
    pub async fn run(
        &self,
        job: &UploadJob,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadOutcome, UploadError> {
        match self.run_inner(job, events_tx).await {
            Ok(outcome) => {
                let _ = events_tx
                    .send(UploadEvent::Completed {
                        job_id: outcome.job_id.clone(),
                    })
                    .await;
                Ok(outcome)
            }
            Err(e) => {
                let _ = events_tx
                    .send(UploadEvent::Failed {
                        error: e.to_string(),
                    })
                    .await;
                Err(e)
            }
        }
    }

    async fn run_inner(
        &self,
        job: &UploadJob,
        events_tx: &mpsc::Sender<UploadEvent>,
    ) -> Result<UploadOutcome, UploadError> {
        job.metadata.validate()?;
        self.check_cancelled()?;

        // 1. Inventory: walk and hash (0.0–0.2).
        self.emit(events_tx, 0.0, "Building local inventory...").await;
        let local = {
            let root = job.dataset_root.clone();
            let recurse = job.recurse;
            let tx = events_tx.clone();
            tokio::task::spawn_blocking(move || {
                let progress = move |fraction: f64| {
                    let _ = tx.blocking_send(UploadEvent::Progress {
                        fraction: fraction * 0.2,
                        detail: "Hashing files".into(),
                    });
                };
                build_inventory(&root, recurse, Some(&progress))
            })
            .await
            .map_err(|e| UploadError::Internal(format!("inventory task: {e}")))??
        };
        self.check_cancelled()?;

        // 2. Remote listing and the count consistency guard. A mismatch
        // aborts here, before any byte goes out.
        self.emit(events_tx, 0.2, "Fetching remote file listing...").await;
        let (key, id) = job.metadata.target_key();
        let subdir_filter = (!job.metadata.subdirectory.is_empty())
            .then_some(job.metadata.subdirectory.as_str());
        let remote = fetch_remote_inventory(self.session, key, id, subdir_filter).await?;
        if let Some(expected) = job.expected_remote_files {
            verify_remote_count(&remote, expected)?;
        }

        // 3. Diff.
        let set = diff_inventories(&local, &remote);
        info!(
            new = set.new_files.len(),
            updated = set.updated_files.len(),
            bytes = set.total_bytes,
            "upload set determined"
        );

        if set.is_empty() {
            self.emit(events_tx, 1.0, "Everything already stored; nothing to upload")
                .await;
            let state = UploadSession::new(set, Vec::new());
            return Ok(UploadOutcome {
                session_id: state.id,
                new_files: 0,
                updated_files: 0,
                uploaded_bytes: 0,
                archive_bytes: 0,
                job_id: None,
                status_url: None,
            });
        }

        // 4. Manifest; the side copy is a courtesy and must never abort
        // the upload.
        let files = set.upload_order();
        let records = ManifestBuilder::new(&job.metadata).build(&files)?;
        let manifest_json = to_json(&records)?;
        if let Some(dir) = &job.manifest_copy_dir {
            courtesy_manifest_copy(dir, &manifest_json);
        }
        let mut state = UploadSession::new(set, records);

        // 5. Plan the archive and run the handshake.
        let plan = ArchivePlan::new(manifest_json, &files);
        self.check_cancelled()?;
        self.emit(events_tx, 0.25, "Requesting upload slot...").await;
        let target = preallocate(self.session).await?;
        state.status_url = Some(target.status_url.clone());

        // 6. Streamed fixed-length PUT (0.3–0.9).
        let progress = {
            let tx = events_tx.clone();
            Box::new(move |written: u64, total: u64| {
                let fraction = if total == 0 {
                    0.9
                } else {
                    0.3 + 0.6 * (written as f64 / total as f64)
                };
                let _ = tx.blocking_send(UploadEvent::Progress {
                    fraction,
                    detail: "Uploading archive".into(),
                });
            }) as Box<dyn Fn(u64, u64) + Send + Sync>
        };
        let archive_bytes =
            upload_archive(self.session, &target, plan, Some(progress)).await?;

        // 7. Poll the status state machine to a verdict (0.9–1.0).
        self.check_cancelled()?;
        self.emit(events_tx, 0.9, "Waiting for ingest verdict...").await;
        let verdict = wait_for_verdict(
            self.session,
            &target,
            job.poll_interval,
            job.poll_deadline,
            &self.cancel,
        )
        .await?;

        match verdict {
            IngestVerdict::Complete => {
                state.complete();
                self.emit(events_tx, 1.0, "Ingest complete").await;
                info!(job_id = %target.job_id, bytes = archive_bytes, "upload session complete");
                Ok(UploadOutcome {
                    session_id: state.id,
                    new_files: state.set.new_files.len(),
                    updated_files: state.set.updated_files.len(),
                    uploaded_bytes: state.set.total_bytes,
                    archive_bytes,
                    job_id: Some(target.job_id),
                    status_url: state.status_url,
                })
            }
            IngestVerdict::Failed {
                step,
                message,
                permissions_denied,
            } => {
                state.fail(&message);
                Err(UploadError::IngestState {
                    step,
                    message,
                    permissions_denied,
                })
            }
            IngestVerdict::Pending => Err(UploadError::Internal(
                "status poller returned a non-final verdict".into(),
            )),
        }
    }

    fn check_cancelled(&self) -> Result<(), UploadError> {
        if self.cancel.is_cancelled() {
            Err(UploadError::Cancelled)
        } else {
            Ok(())
        }
    }

    async fn emit(&self, events_tx: &mpsc::Sender<UploadEvent>, fraction: f64, detail: &str) {
        let _ = events_tx
            .send(UploadEvent::Progress {
                fraction,
                detail: detail.to_string(),
            })
            .await;
    }
}

/// Best-effort copy of the manifest next to the dataset for operators.
fn courtesy_manifest_copy(dir: &Path, manifest_json: &[u8]) {
    let result = std::fs::create_dir_all(dir)
        .and_then(|_| std::fs::write(dir.join("metadata.json"), manifest_json));
    if let Err(e) = result {
        warn!(dir = %dir.display(), error = %e, "manifest courtesy copy failed");
    }
}
