//! Upload handshake and the streamed archive PUT.
//!
//! The transport needs the exact archive size before the first byte goes
//! out (fixed Content-Length), which is why it takes a planned archive
//! rather than a byte buffer: the packer streams blocks through an
//! in-memory channel directly into the request body, and the complete
//! archive never exists on disk or in memory at once.

use std::io::Write;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use datalift_archive::{ArchivePlan, PackProgressFn};
use reqwest::header::CONTENT_LENGTH;
use tracing::{debug, info};

use crate::session::{IngestSession, classify_status};
use crate::{ClientError, request_error};

/// Where one upload goes, as agreed in the preallocate handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    /// Job/transaction identifier assigned by the service.
    pub job_id: String,
    /// Absolute URL the archive is PUT to.
    pub upload_url: String,
    /// Absolute URL of the status document for this job.
    pub status_url: String,
}

/// Runs the preallocate handshake and derives the upload/status URLs.
///
/// Speaks the JSON endpoint by default, or the legacy CGI line format
/// when the session is configured for it.
pub async fn preallocate(session: &IngestSession) -> Result<UploadTarget, ClientError> {
    let target = if session.config().legacy_endpoints {
        preallocate_legacy(session).await?
    } else {
        preallocate_modern(session).await?
    };
    debug!(job_id = %target.job_id, url = %target.upload_url, "upload target allocated");
    Ok(target)
}

async fn preallocate_modern(session: &IngestSession) -> Result<UploadTarget, ClientError> {
    let url = session.ingest_url("preallocate");
    let body = session.get_text(&url, "preallocate").await?;

    let parsed: serde_json::Value = serde_json::from_str(&body)
        .map_err(|e| ClientError::MalformedResponse(format!("preallocate: {e}")))?;
    let job_id = match parsed.get("job_id") {
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::String(s)) if !s.is_empty() => s.clone(),
        _ => {
            return Err(ClientError::MalformedResponse(
                "preallocate: response has no job_id".into(),
            ));
        }
    };

    Ok(UploadTarget {
        upload_url: session.ingest_url(&format!("upload/{job_id}")),
        status_url: session.ingest_url(&format!("get_state?job_id={job_id}")),
        job_id,
    })
}

/// Legacy CGI handshake: the response body carries `Server:` and
/// `Location:` lines; the job id is the last path segment of the location.
async fn preallocate_legacy(session: &IngestSession) -> Result<UploadTarget, ClientError> {
    let url = session.ingest_url("cgi-bin/preallocate");
    let body = session.get_text(&url, "preallocate").await?;

    let mut server = None;
    let mut location = None;
    for line in body.lines() {
        if let Some(value) = line.strip_prefix("Server:") {
            server = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Location:") {
            location = Some(value.trim().to_string());
        }
    }

    let (server, location) = match (server, location) {
        (Some(s), Some(l)) if !s.is_empty() && !l.is_empty() => (s, l),
        _ => {
            return Err(ClientError::MalformedResponse(
                "preallocate: legacy response lacks Server/Location lines".into(),
            ));
        }
    };

    let job_id = location
        .trim_end_matches('/')
        .rsplit('/')
        .next()
        .unwrap_or_default()
        .to_string();
    if job_id.is_empty() {
        return Err(ClientError::MalformedResponse(
            "preallocate: legacy location has no job segment".into(),
        ));
    }

    Ok(UploadTarget {
        upload_url: format!("https://{server}{location}"),
        status_url: session.ingest_url(&format!("status/{job_id}/xml")),
        job_id,
    })
}

/// PUTs the planned archive to the target.
///
/// `Content-Length` is the plan's precomputed size; the packer runs on a
/// blocking thread and feeds the request body through a channel. The plan
/// itself verifies that the bytes streamed match the advertised length.
pub async fn upload_archive(
    session: &IngestSession,
    target: &UploadTarget,
    plan: ArchivePlan,
    progress: Option<Box<dyn Fn(u64, u64) + Send + Sync>>,
) -> Result<u64, ClientError> {
    let total = plan.total_size();
    let (tx, rx) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(8);

    let packer = tokio::task::spawn_blocking(move || {
        let writer = ChannelWriter { tx };
        let progress: Option<&PackProgressFn> = progress.as_deref();
        plan.write_to(writer, progress)
    });

    let response = session
        .http()
        .put(&target.upload_url)
        .header(CONTENT_LENGTH, total)
        .body(reqwest::Body::wrap_stream(BodyStream { rx }))
        .send()
        .await;

    let packed = packer
        .await
        .map_err(|e| ClientError::Io(std::io::Error::other(format!("packer task: {e}"))))?;

    // A transport failure takes precedence: it is usually the cause of any
    // broken-pipe error the packer saw.
    let response = response.map_err(|e| request_error("upload archive", e))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| request_error("upload archive", e))?;
    classify_status("upload archive", status, body)?;

    let written = packed?;
    info!(job_id = %target.job_id, bytes = written, "archive uploaded");
    Ok(written)
}

/// `io::Write` half of the body channel; blocks (on the packing thread)
/// when the transport is applying backpressure.
struct ChannelWriter {
    tx: tokio::sync::mpsc::Sender<Result<Bytes, std::io::Error>>,
}

impl Write for ChannelWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.tx
            .blocking_send(Ok(Bytes::copy_from_slice(buf)))
            .map_err(|_| {
                std::io::Error::new(std::io::ErrorKind::BrokenPipe, "upload stream closed")
            })?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Stream half of the body channel, handed to reqwest.
struct BodyStream {
    rx: tokio::sync::mpsc::Receiver<Result<Bytes, std::io::Error>>,
}

impl futures_util::Stream for BodyStream {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
