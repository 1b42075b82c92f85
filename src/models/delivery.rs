use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::position::GeoPoint;

/// Ordered progress steps: pending → accepted → picking_up → in_transit →
/// delivered. `cancelled` sits outside the order and is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Accepted,
    PickingUp,
    InTransit,
    Delivered,
    Cancelled,
}

impl DeliveryStatus {
    /// Position in the progress sequence, None for `cancelled` (it renders
    /// as a terminal banner, not a step).
    pub fn step_index(&self) -> Option<usize> {
        match self {
            DeliveryStatus::Pending => Some(0),
            DeliveryStatus::Accepted => Some(1),
            DeliveryStatus::PickingUp => Some(2),
            DeliveryStatus::InTransit => Some(3),
            DeliveryStatus::Delivered => Some(4),
            DeliveryStatus::Cancelled => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// Wire/label form, matching the serde encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeliveryStatus::Pending => "pending",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::PickingUp => "picking_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub customer_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    /// Absent until the driver's position is first reported.
    pub current: Option<GeoPoint>,
    pub status: DeliveryStatus,
    pub estimated_arrival: Option<DateTime<Utc>>,
    pub actual_arrival: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
