//! D-Bus interface for the Presence attendance daemon.
//!
//! Bus name: org.freedesktop.Presence1
//! Object path: /org/freedesktop/Presence1
//!
//! Methods return JSON strings. Classified verification failures come back
//! as `success = false` payloads; only genuine internal faults are raised
//! as D-Bus errors.

use std::sync::Arc;

use chrono::NaiveDate;
use zbus::interface;

use crate::config::Config;
use crate::verifier::{VerificationRequest, Verifier, VerifyError, VerifyResponse};

pub struct PresenceService {
    verifier: Arc<Verifier>,
    /// Static config summary served by `Status()`.
    summary: serde_json::Value,
}

impl PresenceService {
    pub fn new(verifier: Arc<Verifier>, config: &Config) -> Self {
        let summary = serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "site": config.site_name.clone(),
            "office": [config.office_latitude, config.office_longitude],
            "check_in_radius_m": config.check_in_radius_m,
            "match_threshold": config.match_threshold,
            "late_cutoff_hour": config.late_cutoff_hour,
            "extract_timeout_secs": config.extract_timeout_secs,
            // The confidence figure in responses is a raw match distance:
            // lower is better.
            "confidence_semantics": "distance",
        });
        Self { verifier, summary }
    }
}

fn respond(result: Result<VerifyResponse, VerifyError>) -> zbus::fdo::Result<String> {
    let response = match result {
        Ok(response) => response,
        Err(e) if e.is_internal() => {
            tracing::error!(error = %e, "verification failed internally");
            return Err(zbus::fdo::Error::Failed("internal error".into()));
        }
        Err(e) => {
            tracing::info!(reason = e.reason_code(), error = %e, "verification refused");
            VerifyResponse::failure(&e)
        }
    };
    to_json(&response)
}

fn to_json<T: serde::Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

fn parse_date_arg(arg: &str) -> zbus::fdo::Result<Option<NaiveDate>> {
    if arg.is_empty() {
        return Ok(None);
    }
    NaiveDate::parse_from_str(arg, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| zbus::fdo::Error::InvalidArgs(format!("bad date {arg:?}, expected YYYY-MM-DD")))
}

#[interface(name = "org.freedesktop.Presence1")]
impl PresenceService {
    /// Verify the user's face and location, then open today's attendance
    /// record.
    async fn check_in(
        &self,
        user: &str,
        image: &str,
        latitude: f64,
        longitude: f64,
        device_info: &str,
    ) -> zbus::fdo::Result<String> {
        let req = VerificationRequest {
            user_id: user.to_string(),
            image: image.to_string(),
            latitude,
            longitude,
            device_info: (!device_info.is_empty()).then(|| device_info.to_string()),
        };
        respond(
            self.verifier
                .check_in(&req)
                .await
                .map(VerifyResponse::from_check_in),
        )
    }

    /// Verify the user's face and location, then complete today's record.
    async fn check_out(
        &self,
        user: &str,
        image: &str,
        latitude: f64,
        longitude: f64,
        device_info: &str,
    ) -> zbus::fdo::Result<String> {
        let req = VerificationRequest {
            user_id: user.to_string(),
            image: image.to_string(),
            latitude,
            longitude,
            device_info: (!device_info.is_empty()).then(|| device_info.to_string()),
        };
        respond(
            self.verifier
                .check_out(&req)
                .await
                .map(VerifyResponse::from_check_out),
        )
    }

    /// Compare the captured image against the enrolled template without
    /// touching any attendance record.
    async fn verify(&self, user: &str, image: &str) -> zbus::fdo::Result<String> {
        respond(
            self.verifier
                .verify_face(user, image)
                .await
                .map(VerifyResponse::from_match),
        )
    }

    /// Enroll (replace) the user's active face template.
    async fn enroll(&self, user: &str, image: &str) -> zbus::fdo::Result<String> {
        match self.verifier.enroll(user, image).await {
            Ok(template_id) => to_json(&serde_json::json!({
                "success": true,
                "message": "face template enrolled",
                "template_id": template_id,
            })),
            Err(e) if e.is_internal() => {
                tracing::error!(error = %e, "enrollment failed internally");
                Err(zbus::fdo::Error::Failed("internal error".into()))
            }
            Err(e) => {
                tracing::info!(reason = e.reason_code(), error = %e, "enrollment refused");
                to_json(&VerifyResponse::failure(&e))
            }
        }
    }

    /// Today's attendance record for the user, or JSON null.
    async fn today(&self, user: &str) -> zbus::fdo::Result<String> {
        match self.verifier.today(user).await {
            Ok(record) => to_json(&record),
            Err(e) => {
                tracing::error!(error = %e, "today lookup failed");
                Err(zbus::fdo::Error::Failed("internal error".into()))
            }
        }
    }

    /// Attendance records newest first; empty date strings leave the range
    /// unbounded.
    async fn history(&self, user: &str, from: &str, to: &str) -> zbus::fdo::Result<String> {
        let from = parse_date_arg(from)?;
        let to = parse_date_arg(to)?;
        match self.verifier.history(user, from, to).await {
            Ok(records) => to_json(&records),
            Err(e) => {
                tracing::error!(error = %e, "history lookup failed");
                Err(zbus::fdo::Error::Failed("internal error".into()))
            }
        }
    }

    /// Daemon build and configuration summary.
    async fn status(&self) -> zbus::fdo::Result<String> {
        to_json(&self.summary)
    }
}
