//! Office geofence evaluation.
//!
//! Classifies a device coordinate against a single circular office zone
//! with three concentric radii (check-in, notification, city). Distance is
//! the haversine great-circle distance on a spherical-Earth approximation.

use serde::Serialize;

/// Mean Earth radius in meters (spherical approximation).
const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Distance-from-office classification, ordered by ascending radius.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum GeofenceZone {
    InOffice,
    NearOffice,
    FarOffice,
    OutsideCity,
}

impl GeofenceZone {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InOffice => "in-office",
            Self::NearOffice => "near-office",
            Self::FarOffice => "far-office",
            Self::OutsideCity => "outside-city",
        }
    }
}

/// One geolocation reading from the device. Ephemeral: only the raw
/// coordinate and the derived classification outlive the request.
#[derive(Debug, Clone, Copy)]
pub struct GeoSample {
    pub latitude: f64,
    pub longitude: f64,
    /// Reported accuracy in meters, when the device supplies one.
    pub accuracy_m: Option<f64>,
}

/// Result of evaluating one coordinate against the office geofence.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GeofenceVerdict {
    pub distance_m: f64,
    pub zone: GeofenceZone,
    pub can_check_in_out: bool,
}

/// Circular office geofence with three concentric radii, constructed from
/// explicit deployment configuration.
#[derive(Debug, Clone)]
pub struct Geofence {
    office_latitude: f64,
    office_longitude: f64,
    check_in_radius_m: f64,
    notification_radius_m: f64,
    city_radius_m: f64,
}

impl Geofence {
    pub fn new(
        office_latitude: f64,
        office_longitude: f64,
        check_in_radius_m: f64,
        notification_radius_m: f64,
        city_radius_m: f64,
    ) -> Self {
        Self {
            office_latitude,
            office_longitude,
            check_in_radius_m,
            notification_radius_m,
            city_radius_m,
        }
    }

    /// Classify a coordinate against the office zone.
    ///
    /// Never fails: a non-finite or out-of-range coordinate classifies as
    /// `OutsideCity` with `can_check_in_out = false`. Boundary comparisons
    /// use `<=`, so a device exactly on the check-in radius may check in.
    pub fn evaluate(&self, latitude: f64, longitude: f64) -> GeofenceVerdict {
        if !coordinate_valid(latitude, longitude) {
            tracing::warn!(latitude, longitude, "invalid coordinate; classifying as outside-city");
            return GeofenceVerdict {
                distance_m: f64::INFINITY,
                zone: GeofenceZone::OutsideCity,
                can_check_in_out: false,
            };
        }

        let distance_m = haversine_distance_m(
            latitude,
            longitude,
            self.office_latitude,
            self.office_longitude,
        );

        let zone = if distance_m <= self.check_in_radius_m {
            GeofenceZone::InOffice
        } else if distance_m <= self.notification_radius_m {
            GeofenceZone::NearOffice
        } else if distance_m <= self.city_radius_m {
            GeofenceZone::FarOffice
        } else {
            GeofenceZone::OutsideCity
        };

        GeofenceVerdict {
            distance_m,
            zone,
            can_check_in_out: distance_m <= self.check_in_radius_m,
        }
    }
}

fn coordinate_valid(latitude: f64, longitude: f64) -> bool {
    latitude.is_finite()
        && longitude.is_finite()
        && latitude.abs() <= 90.0
        && longitude.abs() <= 180.0
}

/// Great-circle distance between two coordinates in meters.
pub fn haversine_distance_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lon = (lon2 - lon1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lon / 2.0).sin().powi(2);

    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_M * c
}
