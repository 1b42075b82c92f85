use std::sync::{Arc, Mutex};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::geo::{eta_minutes, haversine_km};
use crate::models::delivery::{DeliveryRecord, DeliveryStatus};
use crate::models::position::GeoPoint;
use crate::state::AppState;

/// Read-through cache over a single delivery record: an initial fetch plus a
/// live subscription that replaces the cached value on every push for the
/// matching id. Writes go through the store and become visible only via the
/// next push, so the cache is eventually consistent with the store.
pub struct DeliverySession {
    state: Arc<AppState>,
    delivery_id: Uuid,
    cached: Arc<Mutex<Option<DeliveryRecord>>>,
    subscription: Mutex<Option<JoinHandle<()>>>,
}

impl DeliverySession {
    /// Fetches the record (absent is a valid None, not an error) and starts
    /// the live subscription.
    pub fn open(state: Arc<AppState>, delivery_id: Uuid) -> Self {
        let cached = Arc::new(Mutex::new(state.fetch_delivery(delivery_id)));

        let handle = tokio::spawn(run_subscription(
            state.clone(),
            delivery_id,
            cached.clone(),
        ));

        Self {
            state,
            delivery_id,
            cached,
            subscription: Mutex::new(Some(handle)),
        }
    }

    pub fn delivery_id(&self) -> Uuid {
        self.delivery_id
    }

    /// Latest cached record, if one was ever loaded or pushed.
    pub fn delivery(&self) -> Option<DeliveryRecord> {
        self.lock().clone()
    }

    /// Re-reads the record from the store, replacing the cache.
    pub fn refresh(&self) {
        let fetched = self.state.fetch_delivery(self.delivery_id);
        *self.lock() = fetched;
    }

    /// Writes the driver's current coordinates through the store. No-op when
    /// no record is loaded. The cache is not touched here; the change lands
    /// via the subscription's next push.
    pub fn update_driver_position(&self, lat: f64, lng: f64) {
        if self.lock().is_none() {
            return;
        }

        let point = GeoPoint { lat, lng };
        if self
            .state
            .update_driver_position(self.delivery_id, point)
            .is_none()
        {
            // Write failures are logged, not propagated.
            warn!(delivery_id = %self.delivery_id, "driver position write hit a missing record");
        }
    }

    /// Writes the new status. Transitions are not validated; callers are
    /// trusted. `delivered` stamps the actual arrival time store-side.
    pub fn update_status(&self, status: DeliveryStatus) {
        if self
            .state
            .update_delivery_status(self.delivery_id, status)
            .is_none()
        {
            warn!(delivery_id = %self.delivery_id, status = status.as_str(), "status write hit a missing record");
        }
    }

    /// Static-speed arrival estimate in minutes, or None while the driver's
    /// position is unknown. Never returns less than 1.
    pub fn estimate_arrival(&self) -> Option<i64> {
        let record = self.lock().clone()?;
        let current = record.current?;

        let distance_km = haversine_km(&current, &record.dropoff);
        Some(eta_minutes(distance_km))
    }

    /// Cancels the live subscription. Idempotent.
    pub fn close(&self) {
        if let Some(handle) = self
            .subscription
            .lock()
            .expect("session lock poisoned")
            .take()
        {
            handle.abort();
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Option<DeliveryRecord>> {
        self.cached.lock().expect("session lock poisoned")
    }
}

impl Drop for DeliverySession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn run_subscription(
    state: Arc<AppState>,
    delivery_id: Uuid,
    cached: Arc<Mutex<Option<DeliveryRecord>>>,
) {
    let mut rx = state.delivery_events_tx.subscribe();

    loop {
        match rx.recv().await {
            Ok(pushed) => {
                if pushed.id != delivery_id {
                    continue;
                }
                apply_push(&cached, pushed);
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, %delivery_id, "delivery subscription lagged");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    info!(%delivery_id, "delivery subscription closed");
}

/// Replaces the cache with the pushed record unless the push is older than
/// what is already cached. Pushes are not guaranteed to arrive in write
/// order; the updated_at guard keeps the cache monotonically fresh.
fn apply_push(cached: &Mutex<Option<DeliveryRecord>>, pushed: DeliveryRecord) {
    let mut cached = cached.lock().expect("session lock poisoned");

    if let Some(existing) = cached.as_ref() {
        if pushed.updated_at < existing.updated_at {
            debug!(delivery_id = %pushed.id, "rejected stale delivery push");
            return;
        }
    }

    *cached = Some(pushed);
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use uuid::Uuid;

    use super::{apply_push, DeliverySession};
    use crate::models::delivery::{DeliveryRecord, DeliveryStatus};
    use crate::models::position::GeoPoint;
    use crate::state::AppState;

    fn seeded_delivery(state: &AppState) -> DeliveryRecord {
        state.create_delivery(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            GeoPoint {
                lat: 5.3600,
                lng: -4.0083,
            },
            GeoPoint {
                lat: 5.3364,
                lng: -4.0267,
            },
        )
    }

    #[tokio::test]
    async fn open_loads_the_record_and_missing_is_none() {
        let state = Arc::new(AppState::new(16));
        let record = seeded_delivery(&state);

        let session = DeliverySession::open(state.clone(), record.id);
        assert_eq!(session.delivery().unwrap().id, record.id);

        let missing = DeliverySession::open(state, Uuid::new_v4());
        assert!(missing.delivery().is_none());
    }

    #[tokio::test]
    async fn estimate_is_none_without_current_position() {
        let state = Arc::new(AppState::new(16));
        let record = seeded_delivery(&state);

        let session = DeliverySession::open(state, record.id);
        assert_eq!(session.estimate_arrival(), None);
    }

    #[tokio::test]
    async fn estimate_is_at_least_one_minute() {
        let state = Arc::new(AppState::new(16));
        let record = seeded_delivery(&state);
        let session = DeliverySession::open(state.clone(), record.id);

        // Driver at the destination: distance zero, estimate floors at 1.
        session.update_driver_position(record.dropoff.lat, record.dropoff.lng);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(session.estimate_arrival(), Some(1));

        // A few kilometers out: still >= 1.
        session.update_driver_position(record.pickup.lat, record.pickup.lng);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.estimate_arrival().unwrap() >= 1);
    }

    #[tokio::test]
    async fn position_write_lands_via_push_not_locally() {
        let state = Arc::new(AppState::new(16));
        let record = seeded_delivery(&state);
        let session = DeliverySession::open(state.clone(), record.id);

        session.update_driver_position(5.3550, -4.0100);
        tokio::time::sleep(Duration::from_millis(30)).await;

        let cached = session.delivery().unwrap();
        assert_eq!(
            cached.current,
            Some(GeoPoint {
                lat: 5.3550,
                lng: -4.0100
            })
        );
    }

    #[tokio::test]
    async fn delivered_stamps_actual_arrival_and_others_do_not() {
        let state = Arc::new(AppState::new(16));
        let record = seeded_delivery(&state);
        let session = DeliverySession::open(state.clone(), record.id);

        session.update_status(DeliveryStatus::InTransit);
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(session.delivery().unwrap().actual_arrival.is_none());

        session.update_status(DeliveryStatus::Delivered);
        tokio::time::sleep(Duration::from_millis(30)).await;
        let delivered = session.delivery().unwrap();
        assert_eq!(delivered.status, DeliveryStatus::Delivered);
        assert!(delivered.actual_arrival.is_some());
    }

    #[tokio::test]
    async fn update_on_missing_record_is_noop() {
        let state = Arc::new(AppState::new(16));
        let session = DeliverySession::open(state.clone(), Uuid::new_v4());

        session.update_driver_position(1.0, 1.0);
        session.update_status(DeliveryStatus::Accepted);

        assert!(session.delivery().is_none());
        assert_eq!(state.deliveries.len(), 0);
    }

    #[test]
    fn stale_push_is_rejected() {
        let state = AppState::new(16);
        let record = seeded_delivery(&state);

        let mut fresh = record.clone();
        fresh.status = DeliveryStatus::InTransit;
        fresh.updated_at = record.updated_at + chrono::Duration::seconds(5);

        let mut stale = record.clone();
        stale.status = DeliveryStatus::Pending;
        stale.updated_at = record.updated_at - chrono::Duration::seconds(5);

        let cached = Mutex::new(Some(record));
        apply_push(&cached, fresh.clone());
        apply_push(&cached, stale);

        let current = cached.lock().unwrap().clone().unwrap();
        assert_eq!(current.status, DeliveryStatus::InTransit);
        assert_eq!(current.updated_at, fresh.updated_at);
    }

    #[test]
    fn equal_timestamp_push_replaces_cache() {
        let state = AppState::new(16);
        let record = seeded_delivery(&state);

        let mut same_stamp = record.clone();
        same_stamp.status = DeliveryStatus::Accepted;

        let cached = Mutex::new(Some(record));
        apply_push(&cached, same_stamp);

        let current = cached.lock().unwrap().clone().unwrap();
        assert_eq!(current.status, DeliveryStatus::Accepted);
    }

    #[tokio::test]
    async fn close_is_idempotent() {
        let state = Arc::new(AppState::new(16));
        let record = seeded_delivery(&state);
        let session = DeliverySession::open(state, record.id);

        session.close();
        session.close();
    }
}
