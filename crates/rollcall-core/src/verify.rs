//! Probe verification and the decision → attendance bridge.

use crate::attendance::AttendanceRecorder;
use crate::extractor::ExtractError;
use crate::gallery::Gallery;
use crate::matcher::MatchError;
use crate::strategy::Strategy;
use crate::types::Decision;
use chrono::NaiveDateTime;
use serde::Serialize;
use thiserror::Error;

/// Failures that end a verification request without a decision.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("image could not be decoded: {0}")]
    Decode(image::ImageError),
    #[error("no face found in the submitted image")]
    NoFaceDetected,
    #[error("no registered students")]
    EmptyGallery,
    #[error("representation extraction failed: {0}")]
    Extraction(ExtractError),
    #[error(transparent)]
    Match(MatchError),
}

impl From<ExtractError> for VerifyError {
    fn from(err: ExtractError) -> Self {
        match err {
            ExtractError::Decode(e) => VerifyError::Decode(e),
            ExtractError::NoFaceDetected => VerifyError::NoFaceDetected,
            other => VerifyError::Extraction(other),
        }
    }
}

impl From<MatchError> for VerifyError {
    fn from(err: MatchError) -> Self {
        match err {
            MatchError::EmptyGallery => VerifyError::EmptyGallery,
            other => VerifyError::Match(other),
        }
    }
}

/// What happened to the attendance side effect of a decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    /// The probe was rejected; nothing to record.
    NotRequired,
    Recorded,
    /// The write failed. The decision itself still stands.
    Failed { error: String },
}

/// A decision plus the outcome of recording it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Verification {
    #[serde(flatten)]
    pub decision: Decision,
    pub attendance: AttendanceStatus,
}

/// Record attendance for an accepted decision, exactly once.
///
/// Write failures are logged and reported in the status, never returned as
/// an error.
pub fn record_decision(
    decision: &Decision,
    recorder: &dyn AttendanceRecorder,
    at: NaiveDateTime,
) -> AttendanceStatus {
    if !decision.accepted {
        return AttendanceStatus::NotRequired;
    }

    match recorder.record(&decision.identity, at) {
        Ok(()) => AttendanceStatus::Recorded,
        Err(e) => {
            tracing::error!(
                identity = %decision.identity,
                error = %e,
                "failed to record attendance"
            );
            AttendanceStatus::Failed {
                error: e.to_string(),
            }
        }
    }
}

/// Identify `image` against `gallery` and record attendance on acceptance,
/// stamped with the local clock.
pub fn verify(
    strategy: &mut Strategy,
    gallery: &Gallery,
    recorder: &dyn AttendanceRecorder,
    image: &[u8],
) -> Result<Verification, VerifyError> {
    let decision = strategy.identify(image, gallery)?;
    let attendance = record_decision(&decision, recorder, chrono::Local::now().naive_local());

    tracing::info!(
        identity = %decision.identity,
        accepted = decision.accepted,
        distance = decision.distance,
        gallery_version = gallery.version(),
        "verification complete"
    );

    Ok(Verification {
        decision,
        attendance,
    })
}
