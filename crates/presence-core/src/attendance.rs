//! Attendance day-record state machine.
//!
//! One record per (user, calendar date) moves `NoRecord → CheckedIn →
//! Completed`. The transition functions here are pure: they look at the
//! current record, the face and geofence verdicts, and a timestamp, and
//! either produce the write the store must commit or a typed refusal.
//! No transition ever overwrites a non-null field.

use chrono::{NaiveDate, NaiveDateTime, Timelike};
use serde::Serialize;
use thiserror::Error;

use crate::geofence::{GeoSample, GeofenceVerdict};
use crate::matcher::MatchVerdict;

/// Check-in time classification against the late-arrival cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceStatus {
    Present,
    Late,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "Present",
            Self::Late => "Late",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Present" => Some(Self::Present),
            "Late" => Some(Self::Late),
            _ => None,
        }
    }
}

/// One user's attendance row for one calendar date.
///
/// Append-only audit trail: created by a successful check-in, completed by
/// the single checkout, then immutable.
#[derive(Debug, Clone, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub user_id: String,
    pub date: NaiveDate,
    pub check_in_time: NaiveDateTime,
    pub check_out_time: Option<NaiveDateTime>,
    pub status: AttendanceStatus,
    pub check_in_latitude: Option<f64>,
    pub check_in_longitude: Option<f64>,
    pub check_out_latitude: Option<f64>,
    pub check_out_longitude: Option<f64>,
    /// Raw match distance recorded at check-in (lower is better).
    pub check_in_confidence: f32,
    pub check_out_confidence: Option<f32>,
    pub device_info: Option<String>,
    /// "HH:MM", set once by checkout.
    pub work_hours: Option<String>,
}

#[derive(Error, Debug, PartialEq)]
pub enum TransitionError {
    #[error("already checked in today")]
    AlreadyCheckedIn,
    #[error("already checked out today")]
    AlreadyCheckedOut,
    #[error("no check-in record found for today")]
    NoCheckInFound,
    #[error("face verification failed (distance {distance:.4})")]
    FaceMismatch { distance: f32 },
    #[error("too far from office ({distance_m:.0} m away)")]
    OutOfRange { distance_m: f64 },
}

/// The write a successful check-in commits.
#[derive(Debug, Clone)]
pub struct NewCheckIn {
    pub date: NaiveDate,
    pub check_in_time: NaiveDateTime,
    pub status: AttendanceStatus,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f32,
}

/// The write a successful checkout commits.
#[derive(Debug, Clone)]
pub struct CheckOutUpdate {
    pub record_id: String,
    pub check_out_time: NaiveDateTime,
    pub latitude: f64,
    pub longitude: f64,
    pub confidence: f32,
    pub work_hours: String,
}

/// Decide a check-in.
///
/// Refuses when a record for the date already exists (regardless of the
/// verdicts), when the face does not match, or when the device is outside
/// the check-in radius. Status is `Late` when the local hour is past
/// `late_cutoff_hour`.
pub fn check_in(
    existing: Option<&AttendanceRecord>,
    verdict: &MatchVerdict,
    fence: &GeofenceVerdict,
    sample: &GeoSample,
    now: NaiveDateTime,
    late_cutoff_hour: u32,
) -> Result<NewCheckIn, TransitionError> {
    if existing.is_some() {
        return Err(TransitionError::AlreadyCheckedIn);
    }
    if !verdict.is_match {
        return Err(TransitionError::FaceMismatch {
            distance: verdict.distance,
        });
    }
    if !fence.can_check_in_out {
        return Err(TransitionError::OutOfRange {
            distance_m: fence.distance_m,
        });
    }

    let status = if now.hour() > late_cutoff_hour {
        AttendanceStatus::Late
    } else {
        AttendanceStatus::Present
    };

    Ok(NewCheckIn {
        date: now.date(),
        check_in_time: now,
        status,
        latitude: sample.latitude,
        longitude: sample.longitude,
        confidence: verdict.distance,
    })
}

/// Decide a checkout against the day's record.
///
/// Record-state gates come first: a missing record is `NoCheckInFound` and
/// a completed record is `AlreadyCheckedOut` regardless of the verdicts.
pub fn check_out(
    existing: Option<&AttendanceRecord>,
    verdict: &MatchVerdict,
    fence: &GeofenceVerdict,
    sample: &GeoSample,
    now: NaiveDateTime,
) -> Result<CheckOutUpdate, TransitionError> {
    let record = existing.ok_or(TransitionError::NoCheckInFound)?;
    if record.check_out_time.is_some() {
        return Err(TransitionError::AlreadyCheckedOut);
    }
    if !verdict.is_match {
        return Err(TransitionError::FaceMismatch {
            distance: verdict.distance,
        });
    }
    if !fence.can_check_in_out {
        return Err(TransitionError::OutOfRange {
            distance_m: fence.distance_m,
        });
    }

    Ok(CheckOutUpdate {
        record_id: record.id.clone(),
        check_out_time: now,
        latitude: sample.latitude,
        longitude: sample.longitude,
        confidence: verdict.distance,
        work_hours: format_work_hours(record.check_in_time, now),
    })
}

/// Work duration as whole minutes formatted "HH:MM".
///
/// Non-positive durations clamp to "00:00".
pub fn format_work_hours(check_in: NaiveDateTime, check_out: NaiveDateTime) -> String {
    let minutes = (check_out - check_in).num_minutes();
    if minutes <= 0 {
        return "00:00".to_string();
    }
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geofence::GeofenceZone;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 11)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn match_ok() -> MatchVerdict {
        MatchVerdict {
            is_match: true,
            distance: 0.31,
        }
    }

    fn match_fail() -> MatchVerdict {
        MatchVerdict {
            is_match: false,
            distance: 0.92,
        }
    }

    fn fence_ok() -> GeofenceVerdict {
        GeofenceVerdict {
            distance_m: 12.0,
            zone: GeofenceZone::InOffice,
            can_check_in_out: true,
        }
    }

    fn fence_far() -> GeofenceVerdict {
        GeofenceVerdict {
            distance_m: 640.0,
            zone: GeofenceZone::FarOffice,
            can_check_in_out: false,
        }
    }

    fn sample() -> GeoSample {
        GeoSample {
            latitude: -6.242,
            longitude: 106.979,
            accuracy_m: Some(15.0),
        }
    }

    fn open_record() -> AttendanceRecord {
        AttendanceRecord {
            id: "rec-1".into(),
            user_id: "u1".into(),
            date: at(8, 30).date(),
            check_in_time: at(8, 30),
            check_out_time: None,
            status: AttendanceStatus::Present,
            check_in_latitude: Some(-6.242),
            check_in_longitude: Some(106.979),
            check_out_latitude: None,
            check_out_longitude: None,
            check_in_confidence: 0.31,
            check_out_confidence: None,
            device_info: None,
            work_hours: None,
        }
    }

    fn completed_record() -> AttendanceRecord {
        let mut record = open_record();
        record.check_out_time = Some(at(17, 0));
        record.work_hours = Some("08:30".into());
        record
    }

    #[test]
    fn test_check_in_on_time_is_present() {
        let new = check_in(None, &match_ok(), &fence_ok(), &sample(), at(8, 30), 9).unwrap();
        assert_eq!(new.status, AttendanceStatus::Present);
        assert_eq!(new.check_in_time, at(8, 30));
        assert_eq!(new.date, at(8, 30).date());
        assert_eq!(new.confidence, 0.31);
    }

    #[test]
    fn test_check_in_within_cutoff_hour_is_present() {
        // 09:59 is still hour 9, which does not exceed the cutoff.
        let new = check_in(None, &match_ok(), &fence_ok(), &sample(), at(9, 59), 9).unwrap();
        assert_eq!(new.status, AttendanceStatus::Present);
    }

    #[test]
    fn test_check_in_past_cutoff_is_late() {
        let new = check_in(None, &match_ok(), &fence_ok(), &sample(), at(10, 1), 9).unwrap();
        assert_eq!(new.status, AttendanceStatus::Late);
    }

    #[test]
    fn test_second_check_in_fails_regardless_of_verdicts() {
        let record = open_record();
        // Even a failing face verdict reports the duplicate, not the mismatch.
        let err = check_in(
            Some(&record),
            &match_fail(),
            &fence_far(),
            &sample(),
            at(10, 0),
            9,
        )
        .unwrap_err();
        assert_eq!(err, TransitionError::AlreadyCheckedIn);
    }

    #[test]
    fn test_check_in_face_mismatch() {
        let err = check_in(None, &match_fail(), &fence_ok(), &sample(), at(8, 0), 9).unwrap_err();
        assert_eq!(err, TransitionError::FaceMismatch { distance: 0.92 });
    }

    #[test]
    fn test_check_in_out_of_range() {
        let err = check_in(None, &match_ok(), &fence_far(), &sample(), at(8, 0), 9).unwrap_err();
        assert_eq!(err, TransitionError::OutOfRange { distance_m: 640.0 });
    }

    #[test]
    fn test_check_out_without_check_in_fails_regardless_of_verdicts() {
        let err = check_out(None, &match_fail(), &fence_far(), &sample(), at(17, 0)).unwrap_err();
        assert_eq!(err, TransitionError::NoCheckInFound);
    }

    #[test]
    fn test_check_out_completed_record_is_never_overwritten() {
        let record = completed_record();
        let err =
            check_out(Some(&record), &match_ok(), &fence_ok(), &sample(), at(18, 0)).unwrap_err();
        assert_eq!(err, TransitionError::AlreadyCheckedOut);
    }

    #[test]
    fn test_check_out_face_mismatch() {
        let record = open_record();
        let err =
            check_out(Some(&record), &match_fail(), &fence_ok(), &sample(), at(17, 0)).unwrap_err();
        assert_eq!(err, TransitionError::FaceMismatch { distance: 0.92 });
    }

    #[test]
    fn test_check_out_out_of_range() {
        let record = open_record();
        let err =
            check_out(Some(&record), &match_ok(), &fence_far(), &sample(), at(17, 0)).unwrap_err();
        assert_eq!(err, TransitionError::OutOfRange { distance_m: 640.0 });
    }

    #[test]
    fn test_check_out_computes_work_hours() {
        let record = open_record(); // checked in 08:30
        let update =
            check_out(Some(&record), &match_ok(), &fence_ok(), &sample(), at(17, 6)).unwrap();
        assert_eq!(update.record_id, "rec-1");
        assert_eq!(update.work_hours, "08:36");
        assert_eq!(update.check_out_time, at(17, 6));
    }

    #[test]
    fn test_work_hours_clamps_non_positive() {
        assert_eq!(format_work_hours(at(9, 0), at(9, 0)), "00:00");
        assert_eq!(format_work_hours(at(9, 0), at(8, 0)), "00:00");
        // Sub-minute durations floor to zero.
        let just_after = at(9, 0) + chrono::Duration::seconds(30);
        assert_eq!(format_work_hours(at(9, 0), just_after), "00:00");
    }

    #[test]
    fn test_work_hours_monotonic_in_duration() {
        let start = at(9, 0);
        let mut last_minutes = -1i64;
        for offset in [0i64, 1, 59, 60, 61, 480, 481, 1439] {
            let formatted = format_work_hours(start, start + chrono::Duration::minutes(offset));
            let (h, m) = formatted.split_once(':').unwrap();
            let minutes = h.parse::<i64>().unwrap() * 60 + m.parse::<i64>().unwrap();
            assert!(minutes >= last_minutes, "{formatted} went backwards");
            last_minutes = minutes;
        }
        assert_eq!(format_work_hours(start, start + chrono::Duration::minutes(481)), "08:01");
    }
}
