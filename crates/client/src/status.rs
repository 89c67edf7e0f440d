//! Status query and polling.

use std::time::{Duration, Instant};

use datalift_protocol::status::{IngestVerdict, StatusReport, parse_status_document};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::ClientError;
use crate::ingest::UploadTarget;
use crate::session::IngestSession;

/// Fetches and parses the status document for one job.
pub async fn query_status(
    session: &IngestSession,
    target: &UploadTarget,
) -> Result<StatusReport, ClientError> {
    let body = session
        .get_text(&target.status_url, "query ingest status")
        .await?;
    Ok(parse_status_document(&body)?)
}

/// Polls the status endpoint until the service reports a final verdict.
///
/// Pending verdicts sleep `interval` between queries; `deadline` bounds
/// the whole wait. The verdict is returned by value — a Failed verdict is
/// not an error at this layer, the caller decides what it means.
pub async fn wait_for_verdict(
    session: &IngestSession,
    target: &UploadTarget,
    interval: Duration,
    deadline: Duration,
    cancel: &CancellationToken,
) -> Result<IngestVerdict, ClientError> {
    let started = Instant::now();

    loop {
        if cancel.is_cancelled() {
            return Err(ClientError::Cancelled);
        }

        let report = query_status(session, target).await?;
        let verdict = report.verdict();
        debug!(job_id = %target.job_id, steps = report.steps.len(), ?verdict, "status polled");

        if verdict.is_final() {
            return Ok(verdict);
        }
        if started.elapsed() + interval >= deadline {
            return Err(ClientError::PollDeadline);
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return Err(ClientError::Cancelled),
        }
    }
}
