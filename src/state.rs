use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::geo::haversine_km;
use crate::models::delivery::{DeliveryRecord, DeliveryStatus};
use crate::models::position::{GeoPoint, NearbyUser, PositionReading, UserCategory, UserPosition};
use crate::observability::metrics::Metrics;

/// In-process row store plus the change-notification channels. Every write
/// broadcasts the new row value; subscribers treat the channels exactly like
/// a remote store's push feed.
pub struct AppState {
    pub positions: DashMap<Uuid, UserPosition>,
    pub deliveries: DashMap<Uuid, DeliveryRecord>,
    pub position_events_tx: broadcast::Sender<UserPosition>,
    pub delivery_events_tx: broadcast::Sender<DeliveryRecord>,
    pub metrics: Metrics,
}

impl AppState {
    pub fn new(event_buffer_size: usize) -> Self {
        let (position_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);
        let (delivery_events_tx, _unused_rx) = broadcast::channel(event_buffer_size);

        Self {
            positions: DashMap::new(),
            deliveries: DashMap::new(),
            position_events_tx,
            delivery_events_tx,
            metrics: Metrics::new(),
        }
    }

    /// Atomic insert-or-update keyed by user id. The category is fixed at
    /// insert time; later updates refresh coordinates and sensor fields only.
    pub fn upsert_position(
        &self,
        user_id: Uuid,
        category: UserCategory,
        reading: &PositionReading,
    ) -> UserPosition {
        let now = Utc::now();

        let row = self
            .positions
            .entry(user_id)
            .and_modify(|row| {
                row.location = reading.point;
                row.accuracy = reading.accuracy;
                row.heading = reading.heading;
                row.speed = reading.speed;
                row.is_active = true;
                row.last_updated = now;
            })
            .or_insert_with(|| UserPosition {
                id: Uuid::new_v4(),
                user_id,
                location: reading.point,
                accuracy: reading.accuracy,
                heading: reading.heading,
                speed: reading.speed,
                category,
                is_active: true,
                last_updated: now,
            })
            .clone();

        self.metrics.position_updates_total.inc();
        let _ = self.position_events_tx.send(row.clone());

        row
    }

    /// Proximity query: all active rows within `radius_km` of `origin`,
    /// annotated with their distance. No ordering guarantee. Zero rows is a
    /// normal outcome.
    pub fn find_nearby(
        &self,
        origin: &GeoPoint,
        radius_km: f64,
        category_filter: Option<UserCategory>,
    ) -> Vec<NearbyUser> {
        self.metrics.nearby_queries_total.inc();

        self.positions
            .iter()
            .filter_map(|entry| {
                let row = entry.value();
                if !row.is_active {
                    return None;
                }
                if let Some(filter) = category_filter {
                    if row.category != filter {
                        return None;
                    }
                }

                let distance_km = haversine_km(origin, &row.location);
                if distance_km > radius_km {
                    return None;
                }

                Some(NearbyUser {
                    id: row.id,
                    user_id: row.user_id,
                    location: row.location,
                    category: row.category,
                    distance_km,
                    last_updated: row.last_updated,
                })
            })
            .collect()
    }

    pub fn create_delivery(
        &self,
        order_id: Uuid,
        driver_id: Uuid,
        customer_id: Uuid,
        pickup: GeoPoint,
        dropoff: GeoPoint,
    ) -> DeliveryRecord {
        let now = Utc::now();
        let record = DeliveryRecord {
            id: Uuid::new_v4(),
            order_id,
            driver_id,
            customer_id,
            pickup,
            dropoff,
            current: None,
            status: DeliveryStatus::Pending,
            estimated_arrival: None,
            actual_arrival: None,
            created_at: now,
            updated_at: now,
        };

        self.deliveries.insert(record.id, record.clone());
        self.metrics.active_deliveries.inc();
        let _ = self.delivery_events_tx.send(record.clone());

        record
    }

    /// Absent record is a valid None, distinct from a failure.
    pub fn fetch_delivery(&self, id: Uuid) -> Option<DeliveryRecord> {
        self.deliveries.get(&id).map(|entry| entry.value().clone())
    }

    /// Writes the driver's current coordinates. Returns None when no such
    /// record exists.
    pub fn update_driver_position(&self, id: Uuid, point: GeoPoint) -> Option<DeliveryRecord> {
        let record = {
            let mut entry = self.deliveries.get_mut(&id)?;
            entry.current = Some(point);
            entry.updated_at = Utc::now();
            entry.clone()
        };

        let _ = self.delivery_events_tx.send(record.clone());
        Some(record)
    }

    /// Writes the new status without validating the transition; callers are
    /// trusted. `delivered` additionally stamps the actual arrival time.
    pub fn update_delivery_status(
        &self,
        id: Uuid,
        status: DeliveryStatus,
    ) -> Option<DeliveryRecord> {
        let record = {
            let mut entry = self.deliveries.get_mut(&id)?;
            let was_terminal = entry.status.is_terminal();

            entry.status = status;
            if status == DeliveryStatus::Delivered {
                entry.actual_arrival = Some(Utc::now());
            }
            entry.updated_at = Utc::now();

            if !was_terminal && status.is_terminal() {
                self.metrics.active_deliveries.dec();
            }
            entry.clone()
        };

        self.metrics
            .delivery_status_total
            .with_label_values(&[status.as_str()])
            .inc();
        let _ = self.delivery_events_tx.send(record.clone());

        Some(record)
    }
}
