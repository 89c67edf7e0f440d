//! Ingest status documents and their interpretation.
//!
//! The ingest service reports a set of ordered steps, each independently
//! marked SUCCESS/ERROR/UNKNOWN. The client observes these transitions, it
//! never drives them: a status query returns whatever subset of steps the
//! service currently knows about, and [`StatusReport::verdict`] folds that
//! subset into a by-value verdict instead of raising on "not yet complete".

use std::fmt;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

use crate::constants::{
    EMBEDDED_EXCEPTION_MARKERS, PERMISSION_DENIED_PHRASE, STEP_COMPLETE_MESSAGES,
};

/// Errors raised while decoding a status document.
#[derive(Debug, thiserror::Error)]
pub enum StatusParseError {
    #[error("malformed status document: {0}")]
    Malformed(String),

    /// The legacy server sometimes embeds an exception trace as plain text
    /// in an HTTP-200 body; that is a failure, not a status.
    #[error("server-side exception embedded in response: {0}")]
    EmbeddedException(String),
}

/// The ordered ingest steps, ids 0–6 on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IngestStep {
    Submitted,
    Received,
    Processing,
    Verified,
    Stored,
    Available,
    Archived,
}

impl IngestStep {
    pub const ALL: [IngestStep; 7] = [
        IngestStep::Submitted,
        IngestStep::Received,
        IngestStep::Processing,
        IngestStep::Verified,
        IngestStep::Stored,
        IngestStep::Available,
        IngestStep::Archived,
    ];

    /// Maps a wire step id; unknown ids return `None` and are skipped.
    pub fn from_id(id: u32) -> Option<Self> {
        Self::ALL.get(id as usize).copied()
    }

    pub fn id(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for IngestStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IngestStep::Submitted => "Submitted",
            IngestStep::Received => "Received",
            IngestStep::Processing => "Processing",
            IngestStep::Verified => "Verified",
            IngestStep::Stored => "Stored",
            IngestStep::Available => "Available",
            IngestStep::Archived => "Archived",
        };
        f.write_str(name)
    }
}

/// Per-step status as reported by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Success,
    Error,
    Unknown,
}

impl StepStatus {
    fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_uppercase().as_str() {
            "SUCCESS" => Some(StepStatus::Success),
            "ERROR" => Some(StepStatus::Error),
            "UNKNOWN" => Some(StepStatus::Unknown),
            _ => None,
        }
    }
}

/// One step's state within a status document.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub step: IngestStep,
    pub status: StepStatus,
    pub message: String,
}

impl StepReport {
    /// A step is complete iff the service marked it SUCCESS with one of the
    /// well-known completion messages.
    pub fn is_complete(&self) -> bool {
        self.status == StepStatus::Success
            && STEP_COMPLETE_MESSAGES
                .iter()
                .any(|m| self.message.trim().eq_ignore_ascii_case(m))
    }

    /// ERROR caused by missing proposal access. Needs an access grant, not
    /// a re-run, so callers surface it distinctly.
    pub fn permissions_denied(&self) -> bool {
        self.status == StepStatus::Error && self.message.contains(PERMISSION_DENIED_PHRASE)
    }
}

/// Parsed status document: whatever subset of steps the service reported.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub steps: Vec<StepReport>,
}

/// Folded outcome of one status query.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestVerdict {
    /// No error reported and the archive is not yet available.
    Pending,
    /// The Available step completed; the upload is durably queryable.
    Complete,
    /// A step reported ERROR.
    Failed {
        step: IngestStep,
        message: String,
        permissions_denied: bool,
    },
}

impl IngestVerdict {
    pub fn is_final(&self) -> bool {
        !matches!(self, IngestVerdict::Pending)
    }
}

impl StatusReport {
    pub fn step(&self, step: IngestStep) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.step == step)
    }

    /// Folds the reported steps into a verdict.
    ///
    /// Any ERROR step fails the upload. UNKNOWN means "not yet", never an
    /// error. Completion is keyed on the Available step: archiving to cold
    /// storage happens later and is not required for upload success.
    pub fn verdict(&self) -> IngestVerdict {
        if let Some(failed) = self.steps.iter().find(|s| s.status == StepStatus::Error) {
            return IngestVerdict::Failed {
                step: failed.step,
                message: format!("step {} failed: {}", failed.step, failed.message),
                permissions_denied: failed.permissions_denied(),
            };
        }
        match self.step(IngestStep::Available) {
            Some(available) if available.is_complete() => IngestVerdict::Complete,
            _ => IngestVerdict::Pending,
        }
    }
}

/// Decodes a status document body.
///
/// Accepts the service's XML step list; detects plain-text exception traces
/// embedded in a nominally successful body first, since those are not XML
/// at all.
pub fn parse_status_document(body: &str) -> Result<StatusReport, StatusParseError> {
    for marker in EMBEDDED_EXCEPTION_MARKERS {
        if let Some(pos) = body.find(marker) {
            let line = body[pos..].lines().next().unwrap_or(marker).trim();
            return Err(StatusParseError::EmbeddedException(line.to_string()));
        }
    }

    let mut reader = Reader::from_str(body);
    reader.config_mut().trim_text(true);

    let mut steps = Vec::new();
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) | Ok(Event::Empty(e)) if e.name().as_ref() == b"step" => {
                let mut id: Option<u32> = None;
                let mut message = String::new();
                let mut status: Option<StepStatus> = None;

                for attr in e.attributes() {
                    let attr = attr.map_err(|e| StatusParseError::Malformed(e.to_string()))?;
                    let value = attr
                        .unescape_value()
                        .map_err(|e| StatusParseError::Malformed(e.to_string()))?
                        .into_owned();
                    match attr.key.as_ref() {
                        b"id" => id = value.parse().ok(),
                        b"message" => message = value,
                        b"status" => {
                            status = Some(StepStatus::parse(&value).ok_or_else(|| {
                                StatusParseError::Malformed(format!(
                                    "unrecognized step status {value:?}"
                                ))
                            })?);
                        }
                        _ => {}
                    }
                }

                // Steps with unknown ids are ignored: the client interprets
                // whatever subset of the protocol the service speaks.
                if let (Some(id), Some(status)) = (id, status)
                    && let Some(step) = IngestStep::from_id(id)
                {
                    steps.push(StepReport {
                        step,
                        status,
                        message,
                    });
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(StatusParseError::Malformed(e.to_string())),
        }
    }

    Ok(StatusReport { steps })
}
