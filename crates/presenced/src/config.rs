//! Daemon configuration, loaded from `PRESENCE_*` environment variables
//! with an optional TOML site profile for the office geofence.

use std::path::PathBuf;

use presence_core::Geofence;
use serde::Deserialize;

const DEFAULT_OFFICE_LAT: f64 = -6.241977;
const DEFAULT_OFFICE_LON: f64 = 106.978994;
const DEFAULT_CHECK_IN_RADIUS_M: f64 = 100.0;
const DEFAULT_NOTIFICATION_RADIUS_M: f64 = 500.0;
const DEFAULT_CITY_RADIUS_M: f64 = 50_000.0;
const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;
const DEFAULT_LATE_CUTOFF_HOUR: u32 = 9;
const DEFAULT_EXTRACT_TIMEOUT_SECS: u64 = 10;

/// Site profile file (`PRESENCE_SITE_FILE`): one office coordinate plus
/// the three geofence radii for a deployment.
#[derive(Debug, Clone, Deserialize)]
pub struct SiteFile {
    pub office: OfficeInfo,
    pub radii: RadiiInfo,
}

/// `[office]` section of the site profile.
#[derive(Debug, Clone, Deserialize)]
pub struct OfficeInfo {
    pub name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
}

/// `[radii]` section of the site profile, all in meters.
#[derive(Debug, Clone, Deserialize)]
pub struct RadiiInfo {
    pub check_in_m: f64,
    pub notification_m: f64,
    pub city_m: f64,
}

/// Daemon configuration.
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: PathBuf,
    pub office_latitude: f64,
    pub office_longitude: f64,
    pub check_in_radius_m: f64,
    pub notification_radius_m: f64,
    pub city_radius_m: f64,
    /// Maximum Euclidean distance between encodings for a positive match.
    pub match_threshold: f32,
    /// Check-ins after this local hour are marked `Late`.
    pub late_cutoff_hour: u32,
    /// Timeout in seconds for one encoding extraction.
    pub extract_timeout_secs: u64,
    /// Display name from the site profile, if one was loaded.
    pub site_name: Option<String>,
}

impl Config {
    /// Load configuration. Precedence per field: environment variable,
    /// then the site profile, then the built-in default.
    pub fn from_env() -> Self {
        let site = load_site_file();

        let data_dir = std::env::var("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".local/share")
            })
            .join("presence");

        let db_path = std::env::var("PRESENCE_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_dir.join("attendance.db"));

        Self {
            db_path,
            office_latitude: env_f64("PRESENCE_OFFICE_LAT")
                .or(site.as_ref().map(|s| s.office.latitude))
                .unwrap_or(DEFAULT_OFFICE_LAT),
            office_longitude: env_f64("PRESENCE_OFFICE_LON")
                .or(site.as_ref().map(|s| s.office.longitude))
                .unwrap_or(DEFAULT_OFFICE_LON),
            check_in_radius_m: env_f64("PRESENCE_CHECK_IN_RADIUS_M")
                .or(site.as_ref().map(|s| s.radii.check_in_m))
                .unwrap_or(DEFAULT_CHECK_IN_RADIUS_M),
            notification_radius_m: env_f64("PRESENCE_NOTIFICATION_RADIUS_M")
                .or(site.as_ref().map(|s| s.radii.notification_m))
                .unwrap_or(DEFAULT_NOTIFICATION_RADIUS_M),
            city_radius_m: env_f64("PRESENCE_CITY_RADIUS_M")
                .or(site.as_ref().map(|s| s.radii.city_m))
                .unwrap_or(DEFAULT_CITY_RADIUS_M),
            match_threshold: env_f32("PRESENCE_MATCH_THRESHOLD")
                .unwrap_or(DEFAULT_MATCH_THRESHOLD),
            late_cutoff_hour: env_u32("PRESENCE_LATE_CUTOFF_HOUR")
                .unwrap_or(DEFAULT_LATE_CUTOFF_HOUR),
            extract_timeout_secs: env_u64("PRESENCE_EXTRACT_TIMEOUT_SECS")
                .unwrap_or(DEFAULT_EXTRACT_TIMEOUT_SECS),
            site_name: site.and_then(|s| s.office.name),
        }
    }

    /// Geofence evaluator assembled from this configuration.
    pub fn geofence(&self) -> Geofence {
        Geofence::new(
            self.office_latitude,
            self.office_longitude,
            self.check_in_radius_m,
            self.notification_radius_m,
            self.city_radius_m,
        )
    }
}

fn load_site_file() -> Option<SiteFile> {
    let path = std::env::var("PRESENCE_SITE_FILE").ok()?;
    let text = match std::fs::read_to_string(&path) {
        Ok(t) => t,
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "cannot read site file; falling back to defaults");
            return None;
        }
    };
    match toml::from_str::<SiteFile>(&text) {
        Ok(site) => {
            tracing::info!(path = %path, name = site.office.name.as_deref(), "site profile loaded");
            Some(site)
        }
        Err(e) => {
            tracing::warn!(path = %path, error = %e, "bad site file TOML; falling back to defaults");
            None
        }
    }
}

fn env_f64(key: &str) -> Option<f64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_f32(key: &str) -> Option<f32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_site_file_parses() {
        let site: SiteFile = toml::from_str(
            r#"
            [office]
            name = "HQ East"
            latitude = -6.241977
            longitude = 106.978994

            [radii]
            check_in_m = 100.0
            notification_m = 500.0
            city_m = 50000.0
            "#,
        )
        .unwrap();

        assert_eq!(site.office.name.as_deref(), Some("HQ East"));
        assert_eq!(site.radii.check_in_m, 100.0);
        assert_eq!(site.radii.city_m, 50_000.0);
    }

    #[test]
    fn test_site_file_name_is_optional() {
        let site: SiteFile = toml::from_str(
            r#"
            [office]
            latitude = 1.0
            longitude = 2.0

            [radii]
            check_in_m = 50.0
            notification_m = 200.0
            city_m = 10000.0
            "#,
        )
        .unwrap();
        assert!(site.office.name.is_none());
    }
}
