//! Verification orchestrator.
//!
//! Sequences one check-in/checkout request: decode the captured image,
//! extract an encoding (bounded by a timeout), decode the enrolled
//! template, run the face and geofence evaluators, then drive the
//! attendance state machine and commit the transition. Every failure
//! short-circuits the remaining steps; no record is touched on any
//! failure path.

use std::sync::Arc;
use std::time::Duration;

use base64::Engine as _;
use chrono::{Local, NaiveDate};
use presence_core::attendance::{self, AttendanceRecord, AttendanceStatus};
use presence_core::codec::{self, CodecError, StoredEncoding};
use presence_core::geofence::{GeoSample, Geofence};
use presence_core::matcher::{self, MatchError};
use presence_core::TransitionError;
use presence_store::{Store, StoreError};
use serde::Serialize;
use thiserror::Error;

use crate::config::Config;
use crate::extractor::{Extractor, ExtractorError};

/// Request-level failure taxonomy. Every variant except the internal ones
/// is an expected, classified outcome returned to the caller as a
/// structured refusal.
#[derive(Error, Debug)]
pub enum VerifyError {
    #[error("invalid input: {0}")]
    Input(String),
    #[error("encoding extraction timed out after {0:?}")]
    ExtractionTimeout(Duration),
    #[error("no face detected in the captured image")]
    NoFaceDetected,
    #[error("extractor unavailable: {0}")]
    ExtractorUnavailable(String),
    #[error("no enrolled face template for this user")]
    NoEnrolledFace,
    #[error(transparent)]
    CorruptedTemplate(#[from] CodecError),
    #[error(transparent)]
    DimensionMismatch(#[from] MatchError),
    #[error("face verification failed (distance {distance:.4})")]
    FaceMismatch { distance: f32 },
    #[error("too far from office ({distance_m:.0} m away)")]
    OutOfRange { distance_m: f64 },
    #[error("already checked in today")]
    AlreadyCheckedIn,
    #[error("already checked out today")]
    AlreadyCheckedOut,
    #[error("no check-in record found for today")]
    NoCheckInFound,
    #[error("a concurrent update completed this record first")]
    StorageConflict,
    #[error("storage: {0}")]
    Storage(StoreError),
}

impl VerifyError {
    /// Stable machine-readable reason code.
    pub fn reason_code(&self) -> &'static str {
        match self {
            Self::Input(_) => "INPUT_ERROR",
            Self::ExtractionTimeout(_) => "EXTRACTION_TIMEOUT",
            Self::NoFaceDetected => "NO_FACE_DETECTED",
            Self::ExtractorUnavailable(_) => "EXTRACTOR_UNAVAILABLE",
            Self::NoEnrolledFace => "NO_ENROLLED_FACE",
            Self::CorruptedTemplate(_) => "CORRUPTED_TEMPLATE",
            Self::DimensionMismatch(_) => "ENCODING_DIMENSION_MISMATCH",
            Self::FaceMismatch { .. } => "FACE_MISMATCH",
            Self::OutOfRange { .. } => "OUT_OF_RANGE",
            Self::AlreadyCheckedIn => "ALREADY_CHECKED_IN",
            Self::AlreadyCheckedOut => "ALREADY_CHECKED_OUT",
            Self::NoCheckInFound => "NO_CHECK_IN_FOUND",
            Self::StorageConflict => "STORAGE_CONFLICT",
            Self::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// The match distance that drove the refusal, where one exists.
    pub fn confidence(&self) -> Option<f32> {
        match self {
            Self::FaceMismatch { distance } => Some(*distance),
            _ => None,
        }
    }

    /// True for faults that surface as internal errors rather than
    /// classified refusals.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::ExtractorUnavailable(_))
    }
}

impl From<TransitionError> for VerifyError {
    fn from(e: TransitionError) -> Self {
        match e {
            TransitionError::AlreadyCheckedIn => Self::AlreadyCheckedIn,
            TransitionError::AlreadyCheckedOut => Self::AlreadyCheckedOut,
            TransitionError::NoCheckInFound => Self::NoCheckInFound,
            TransitionError::FaceMismatch { distance } => Self::FaceMismatch { distance },
            TransitionError::OutOfRange { distance_m } => Self::OutOfRange { distance_m },
        }
    }
}

impl From<ExtractorError> for VerifyError {
    fn from(e: ExtractorError) -> Self {
        match e {
            ExtractorError::NoFaceDetected => Self::NoFaceDetected,
            ExtractorError::Unavailable(msg) => Self::ExtractorUnavailable(msg),
        }
    }
}

impl From<StoreError> for VerifyError {
    fn from(e: StoreError) -> Self {
        match e {
            // The constraint fired: some concurrent request created the
            // day's record first. Same refusal as a plain duplicate.
            StoreError::DuplicateCheckIn => Self::AlreadyCheckedIn,
            other => Self::Storage(other),
        }
    }
}

/// One verification request, as received from the IPC surface.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub user_id: String,
    /// Base64 image payload, with or without a `data:image/...;base64,`
    /// prefix.
    pub image: String,
    pub latitude: f64,
    pub longitude: f64,
    pub device_info: Option<String>,
}

#[derive(Debug)]
pub struct CheckInOutcome {
    pub record_id: String,
    pub status: AttendanceStatus,
    pub confidence: f32,
}

#[derive(Debug)]
pub struct CheckOutOutcome {
    pub record_id: String,
    pub work_hours: String,
    pub confidence: f32,
}

#[derive(Debug)]
pub struct MatchOutcome {
    pub is_match: bool,
    pub distance: f32,
}

/// Uniform caller-facing result envelope.
///
/// `confidence` carries the raw match distance, so lower is better; the
/// field name is kept for compatibility with existing API consumers.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(rename = "match", skip_serializing_if = "Option::is_none")]
    pub is_match: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub work_hours: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_id: Option<String>,
}

impl VerifyResponse {
    fn base(success: bool) -> Self {
        Self {
            success,
            reason: None,
            message: None,
            is_match: None,
            confidence: None,
            status: None,
            work_hours: None,
            record_id: None,
        }
    }

    pub fn from_check_in(outcome: CheckInOutcome) -> Self {
        Self {
            message: Some("Check-in successful".into()),
            confidence: Some(outcome.confidence),
            status: Some(outcome.status.as_str()),
            record_id: Some(outcome.record_id),
            ..Self::base(true)
        }
    }

    pub fn from_check_out(outcome: CheckOutOutcome) -> Self {
        Self {
            message: Some("Check-out successful".into()),
            confidence: Some(outcome.confidence),
            work_hours: Some(outcome.work_hours),
            record_id: Some(outcome.record_id),
            ..Self::base(true)
        }
    }

    pub fn from_match(outcome: MatchOutcome) -> Self {
        Self {
            is_match: Some(outcome.is_match),
            confidence: Some(outcome.distance),
            ..Self::base(true)
        }
    }

    pub fn failure(err: &VerifyError) -> Self {
        Self {
            reason: Some(err.reason_code()),
            message: Some(err.to_string()),
            confidence: err.confidence(),
            ..Self::base(false)
        }
    }
}

/// The request-level coordinator: extraction, evaluators, state machine,
/// store commit.
pub struct Verifier {
    geofence: Geofence,
    match_threshold: f32,
    late_cutoff_hour: u32,
    extract_timeout: Duration,
    store: Store,
    extractor: Arc<dyn Extractor>,
}

impl Verifier {
    pub fn new(config: &Config, store: Store, extractor: Arc<dyn Extractor>) -> Self {
        Self {
            geofence: config.geofence(),
            match_threshold: config.match_threshold,
            late_cutoff_hour: config.late_cutoff_hour,
            extract_timeout: Duration::from_secs(config.extract_timeout_secs),
            store,
            extractor,
        }
    }

    /// Verify the face and geofence, then open today's attendance record.
    pub async fn check_in(&self, req: &VerificationRequest) -> Result<CheckInOutcome, VerifyError> {
        let (verdict, fence, sample) = self.run_evaluators(req).await?;

        let now = Local::now().naive_local();
        let existing = self.store.find_day_record(&req.user_id, now.date()).await?;
        let new = attendance::check_in(
            existing.as_ref(),
            &verdict,
            &fence,
            &sample,
            now,
            self.late_cutoff_hour,
        )?;
        let record_id = self
            .store
            .insert_check_in(&req.user_id, &new, req.device_info.clone())
            .await?;

        tracing::info!(
            user = %req.user_id,
            record = %record_id,
            status = new.status.as_str(),
            distance = verdict.distance,
            distance_m = fence.distance_m,
            zone = fence.zone.as_str(),
            "check-in accepted"
        );

        Ok(CheckInOutcome {
            record_id,
            status: new.status,
            confidence: verdict.distance,
        })
    }

    /// Verify the face and geofence, then complete today's record.
    pub async fn check_out(
        &self,
        req: &VerificationRequest,
    ) -> Result<CheckOutOutcome, VerifyError> {
        let (verdict, fence, sample) = self.run_evaluators(req).await?;

        let now = Local::now().naive_local();
        let existing = self.store.find_day_record(&req.user_id, now.date()).await?;
        let update = attendance::check_out(existing.as_ref(), &verdict, &fence, &sample, now)?;

        if !self.store.update_check_out(&update).await? {
            return Err(VerifyError::StorageConflict);
        }

        tracing::info!(
            user = %req.user_id,
            record = %update.record_id,
            work_hours = %update.work_hours,
            distance = verdict.distance,
            "check-out accepted"
        );

        Ok(CheckOutOutcome {
            record_id: update.record_id,
            work_hours: update.work_hours,
            confidence: verdict.distance,
        })
    }

    /// Face comparison only; touches no attendance record.
    pub async fn verify_face(&self, user_id: &str, image: &str) -> Result<MatchOutcome, VerifyError> {
        require_user(user_id)?;
        let probe = self.extract_probe(user_id, image).await?;
        let stored = self.load_template(user_id).await?;
        let verdict = matcher::match_encodings(&probe, &stored, self.match_threshold)?;
        Ok(MatchOutcome {
            is_match: verdict.is_match,
            distance: verdict.distance,
        })
    }

    /// Extract an encoding from the image and store it as the user's
    /// active template, deactivating any previous one.
    pub async fn enroll(&self, user_id: &str, image: &str) -> Result<String, VerifyError> {
        require_user(user_id)?;
        let probe = self.extract_probe(user_id, image).await?;
        let encoding_json = codec::encode(&probe)?;
        let template_id = self.store.enroll_template(user_id, encoding_json).await?;

        tracing::info!(
            user = %user_id,
            template = %template_id,
            dims = probe.len(),
            "face template enrolled"
        );
        Ok(template_id)
    }

    /// Today's attendance record, if any.
    pub async fn today(&self, user_id: &str) -> Result<Option<AttendanceRecord>, VerifyError> {
        require_user(user_id)?;
        let today = Local::now().date_naive();
        Ok(self.store.find_day_record(user_id, today).await?)
    }

    /// Attendance records newest first, optionally bounded by dates.
    pub async fn history(
        &self,
        user_id: &str,
        from: Option<NaiveDate>,
        to: Option<NaiveDate>,
    ) -> Result<Vec<AttendanceRecord>, VerifyError> {
        require_user(user_id)?;
        Ok(self.store.history(user_id, from, to).await?)
    }

    /// Steps 1–5 shared by check-in and checkout: decode the image,
    /// extract the probe, load the template, run both evaluators.
    async fn run_evaluators(
        &self,
        req: &VerificationRequest,
    ) -> Result<
        (
            presence_core::MatchVerdict,
            presence_core::GeofenceVerdict,
            GeoSample,
        ),
        VerifyError,
    > {
        require_user(&req.user_id)?;
        let probe = self.extract_probe(&req.user_id, &req.image).await?;
        let stored = self.load_template(&req.user_id).await?;
        let verdict = matcher::match_encodings(&probe, &stored, self.match_threshold)?;

        let sample = GeoSample {
            latitude: req.latitude,
            longitude: req.longitude,
            accuracy_m: None,
        };
        let fence = self.geofence.evaluate(sample.latitude, sample.longitude);

        Ok((verdict, fence, sample))
    }

    async fn extract_probe(&self, user_id: &str, image: &str) -> Result<Vec<f32>, VerifyError> {
        let bytes = decode_image_payload(image)?;
        let extracted = tokio::time::timeout(self.extract_timeout, self.extractor.extract(&bytes))
            .await
            .map_err(|_| VerifyError::ExtractionTimeout(self.extract_timeout))?;
        let probe = extracted?;
        tracing::debug!(user = %user_id, dims = probe.len(), "probe encoding extracted");
        Ok(probe)
    }

    async fn load_template(&self, user_id: &str) -> Result<Vec<f32>, VerifyError> {
        let row = self
            .store
            .find_active_template(user_id)
            .await?
            .ok_or(VerifyError::NoEnrolledFace)?;
        Ok(codec::decode(&StoredEncoding::Raw(row.encoding))?)
    }
}

fn require_user(user_id: &str) -> Result<(), VerifyError> {
    if user_id.trim().is_empty() {
        return Err(VerifyError::Input("user id is required".into()));
    }
    Ok(())
}

/// Strip an optional `data:*;base64,` prefix and decode the payload.
fn decode_image_payload(image: &str) -> Result<Vec<u8>, VerifyError> {
    let trimmed = image.trim();
    if trimmed.is_empty() {
        return Err(VerifyError::Input("face image is required".into()));
    }

    let payload = match trimmed.split_once(";base64,") {
        Some((prefix, rest)) if prefix.starts_with("data:") => rest,
        _ => trimmed,
    };

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(payload)
        .map_err(|e| VerifyError::Input(format!("image payload is not valid base64: {e}")))?;
    if bytes.is_empty() {
        return Err(VerifyError::Input("face image is required".into()));
    }
    Ok(bytes)
}
