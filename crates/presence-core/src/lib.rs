//! presence-core — attendance verification decision logic.
//!
//! Pure evaluators and the per-day attendance state machine: geofence
//! classification, face-encoding comparison, the template storage codec,
//! and the check-in/checkout transition rules. Nothing here performs I/O;
//! the daemon wires these against the record store and the embedding
//! extractor.

pub mod attendance;
pub mod codec;
pub mod geofence;
pub mod matcher;

pub use attendance::{AttendanceRecord, AttendanceStatus, CheckOutUpdate, NewCheckIn, TransitionError};
pub use codec::{CodecError, StoredEncoding};
pub use geofence::{GeoSample, Geofence, GeofenceVerdict, GeofenceZone};
pub use matcher::{MatchError, MatchVerdict};
