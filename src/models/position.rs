use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

/// Category tag for a tracked user. Mirrors the marketplace verticals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserCategory {
    General,
    Freelance,
    Provider,
    Delivery,
}

/// One sensor fix. Immutable; superseded by the next reading, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PositionReading {
    pub point: GeoPoint,
    /// Meters, when the sensor reports it.
    pub accuracy: Option<f64>,
    /// Degrees 0..360; absent while stationary.
    pub heading: Option<f64>,
    /// Meters per second.
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A row in the user-position table, one per user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserPosition {
    pub id: Uuid,
    pub user_id: Uuid,
    pub location: GeoPoint,
    pub accuracy: Option<f64>,
    pub heading: Option<f64>,
    pub speed: Option<f64>,
    pub category: UserCategory,
    pub is_active: bool,
    pub last_updated: DateTime<Utc>,
}

/// Proximity-query projection: a position row annotated with its distance
/// from the querying point. Produced fresh on every query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NearbyUser {
    pub id: Uuid,
    pub user_id: Uuid,
    pub location: GeoPoint,
    pub category: UserCategory,
    pub distance_km: f64,
    pub last_updated: DateTime<Utc>,
}
