use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::models::position::{NearbyUser, PositionReading, UserCategory, UserPosition};
use crate::sensor::{LocationSensor, SensorError, SensorOptions};
use crate::state::AppState;

pub const DEFAULT_RADIUS_KM: f64 = 10.0;

/// Mutable tracker state, owned exclusively by one tracker instance.
#[derive(Default)]
struct TrackerShared {
    latest: Option<PositionReading>,
    error: Option<SensorError>,
    loading: bool,
    nearby: Vec<NearbyUser>,
    last_radius_km: Option<f64>,
    last_filter: Option<UserCategory>,
}

/// Bridges a `LocationSensor` into shared state: continuous or one-shot
/// acquisition, persistence of the latest fix, and proximity lookups that
/// refresh whenever any position row changes.
pub struct PositionTracker {
    state: Arc<AppState>,
    sensor: Arc<dyn LocationSensor>,
    options: SensorOptions,
    shared: Arc<Mutex<TrackerShared>>,
    cancelled: Arc<AtomicBool>,
    watch_task: Mutex<Option<JoinHandle<()>>>,
    refresh_task: Mutex<Option<JoinHandle<()>>>,
}

impl PositionTracker {
    pub fn new(state: Arc<AppState>, sensor: Arc<dyn LocationSensor>, options: SensorOptions) -> Self {
        Self {
            state,
            sensor,
            options,
            shared: Arc::new(Mutex::new(TrackerShared::default())),
            cancelled: Arc::new(AtomicBool::new(false)),
            watch_task: Mutex::new(None),
            refresh_task: Mutex::new(None),
        }
    }

    pub fn position(&self) -> Option<PositionReading> {
        self.lock().latest
    }

    pub fn error(&self) -> Option<SensorError> {
        self.lock().error
    }

    pub fn is_loading(&self) -> bool {
        self.lock().loading
    }

    /// Result of the most recent proximity lookup.
    pub fn nearby(&self) -> Vec<NearbyUser> {
        self.lock().nearby.clone()
    }

    /// Begins a one-shot read or a continuous watch per the configured
    /// options. A previous attempt's tasks are cancelled first, so calling
    /// this again after a failure retries from scratch.
    pub fn start_tracking(&self) {
        self.cancel_tasks();
        self.cancelled.store(false, Ordering::SeqCst);

        if !self.sensor.supported() {
            let mut shared = self.lock();
            shared.error = Some(SensorError::Unsupported);
            shared.loading = false;
            drop(shared);

            self.record_sensor_error(SensorError::Unsupported);
            return;
        }

        {
            let mut shared = self.lock();
            shared.loading = true;
            shared.error = None;
        }

        let watch_handle = if self.options.watch {
            tokio::spawn(run_watch(
                self.state.clone(),
                self.sensor.clone(),
                self.options,
                self.shared.clone(),
                self.cancelled.clone(),
            ))
        } else {
            tokio::spawn(run_one_shot(
                self.state.clone(),
                self.sensor.clone(),
                self.options,
                self.shared.clone(),
                self.cancelled.clone(),
            ))
        };

        // Coarse invalidation: any position-table change re-runs the last
        // nearby query while a reading exists.
        let refresh_handle = tokio::spawn(run_nearby_refresh(
            self.state.clone(),
            self.shared.clone(),
            self.cancelled.clone(),
        ));

        *self.watch_task.lock().expect("tracker lock poisoned") = Some(watch_handle);
        *self.refresh_task.lock().expect("tracker lock poisoned") = Some(refresh_handle);
    }

    /// Cancels any active watch. Idempotent; safe when not tracking. A
    /// reading already in flight when this is called is dropped.
    pub fn stop_tracking(&self) {
        self.cancel_tasks();
    }

    /// Persists the latest reading as an upsert keyed by user id. No-op when
    /// no reading is available yet.
    pub fn update_position(&self, user_id: Uuid, category: UserCategory) -> Option<UserPosition> {
        let reading = self.lock().latest?;
        let row = self.state.upsert_position(user_id, category, &reading);
        debug!(%user_id, lat = row.location.lat, lng = row.location.lng, "position persisted");
        Some(row)
    }

    /// Proximity lookup at the latest reading. Returns an empty list, and
    /// issues no store call, while no reading exists.
    pub fn find_nearby(
        &self,
        radius_km: f64,
        category_filter: Option<UserCategory>,
    ) -> Vec<NearbyUser> {
        let origin = {
            let mut shared = self.lock();
            shared.last_radius_km = Some(radius_km);
            shared.last_filter = category_filter;
            match shared.latest {
                Some(reading) => reading.point,
                None => return Vec::new(),
            }
        };

        let rows = self.state.find_nearby(&origin, radius_km, category_filter);
        self.lock().nearby = rows.clone();
        rows
    }

    fn cancel_tasks(&self) {
        self.cancelled.store(true, Ordering::SeqCst);

        if let Some(handle) = self.watch_task.lock().expect("tracker lock poisoned").take() {
            handle.abort();
        }
        if let Some(handle) = self.refresh_task.lock().expect("tracker lock poisoned").take() {
            handle.abort();
        }
    }

    fn record_sensor_error(&self, err: SensorError) {
        self.state
            .metrics
            .sensor_errors_total
            .with_label_values(&[err.kind()])
            .inc();
        warn!(error = %err, "sensor error");
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerShared> {
        self.shared.lock().expect("tracker lock poisoned")
    }
}

impl Drop for PositionTracker {
    fn drop(&mut self) {
        self.cancel_tasks();
    }
}

fn apply_reading(shared: &Mutex<TrackerShared>, reading: PositionReading) {
    let mut shared = shared.lock().expect("tracker lock poisoned");
    shared.latest = Some(reading);
    shared.error = None;
    shared.loading = false;
}

fn apply_error(state: &AppState, shared: &Mutex<TrackerShared>, err: SensorError) {
    {
        let mut shared = shared.lock().expect("tracker lock poisoned");
        shared.error = Some(err);
        shared.loading = false;
    }
    state
        .metrics
        .sensor_errors_total
        .with_label_values(&[err.kind()])
        .inc();
    warn!(error = %err, "sensor error");
}

async fn run_one_shot(
    state: Arc<AppState>,
    sensor: Arc<dyn LocationSensor>,
    options: SensorOptions,
    shared: Arc<Mutex<TrackerShared>>,
    cancelled: Arc<AtomicBool>,
) {
    let result = match tokio::time::timeout(options.timeout, sensor.current_position(&options)).await
    {
        Ok(result) => result,
        Err(_) => Err(SensorError::Timeout),
    };

    if cancelled.load(Ordering::SeqCst) {
        return;
    }

    match result {
        Ok(reading) => apply_reading(&shared, reading),
        Err(err) => apply_error(&state, &shared, err),
    }
}

async fn run_watch(
    state: Arc<AppState>,
    sensor: Arc<dyn LocationSensor>,
    options: SensorOptions,
    shared: Arc<Mutex<TrackerShared>>,
    cancelled: Arc<AtomicBool>,
) {
    let mut stream = sensor.watch_position(&options);
    let mut awaiting_first_fix = true;

    loop {
        // Only the first fix is bounded by the acquisition timeout; once
        // tracking, callback cadence is sensor-driven.
        let next = if awaiting_first_fix {
            match tokio::time::timeout(options.timeout, stream.next()).await {
                Ok(item) => item,
                Err(_) => Some(Err(SensorError::Timeout)),
            }
        } else {
            stream.next().await
        };
        awaiting_first_fix = false;

        let Some(item) = next else {
            debug!("sensor watch stream ended");
            break;
        };

        if cancelled.load(Ordering::SeqCst) {
            break;
        }

        match item {
            Ok(reading) => apply_reading(&shared, reading),
            Err(err) => {
                // Terminal for this attempt; start_tracking may retry.
                apply_error(&state, &shared, err);
                break;
            }
        }
    }
}

async fn run_nearby_refresh(
    state: Arc<AppState>,
    shared: Arc<Mutex<TrackerShared>>,
    cancelled: Arc<AtomicBool>,
) {
    let mut rx = state.position_events_tx.subscribe();

    loop {
        match rx.recv().await {
            Ok(_changed_row) => {
                if cancelled.load(Ordering::SeqCst) {
                    break;
                }

                let query = {
                    let shared = shared.lock().expect("tracker lock poisoned");
                    match (shared.latest, shared.last_radius_km) {
                        (Some(reading), Some(radius)) => {
                            Some((reading.point, radius, shared.last_filter))
                        }
                        _ => None,
                    }
                };

                if let Some((origin, radius_km, filter)) = query {
                    let rows = state.find_nearby(&origin, radius_km, filter);
                    shared.lock().expect("tracker lock poisoned").nearby = rows;
                }
            }
            Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                debug!(skipped, "nearby refresh lagged behind position events");
            }
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }

    info!("nearby refresh subscription closed");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use uuid::Uuid;

    use super::{PositionTracker, DEFAULT_RADIUS_KM};
    use crate::models::position::{GeoPoint, PositionReading, UserCategory};
    use crate::sensor::{ScriptedSensor, SensorError, SensorOptions};
    use crate::state::AppState;

    fn reading(lat: f64, lng: f64) -> PositionReading {
        PositionReading {
            point: GeoPoint { lat, lng },
            accuracy: Some(8.0),
            heading: None,
            speed: None,
            timestamp: Utc::now(),
        }
    }

    fn tracker_with(
        script: Vec<Result<PositionReading, SensorError>>,
        emit_delay: Duration,
    ) -> (Arc<AppState>, PositionTracker) {
        let state = Arc::new(AppState::new(16));
        let sensor = Arc::new(ScriptedSensor::new(script).with_emit_delay(emit_delay));
        let tracker = PositionTracker::new(state.clone(), sensor, SensorOptions::default());
        (state, tracker)
    }

    #[tokio::test]
    async fn find_nearby_without_reading_is_empty_and_skips_store() {
        let (state, tracker) = tracker_with(vec![], Duration::ZERO);

        let rows = tracker.find_nearby(DEFAULT_RADIUS_KM, None);

        assert!(rows.is_empty());
        assert_eq!(state.metrics.nearby_queries_total.get(), 0);
    }

    #[tokio::test]
    async fn update_position_without_reading_is_noop() {
        let (state, tracker) = tracker_with(vec![], Duration::ZERO);

        assert!(tracker
            .update_position(Uuid::new_v4(), UserCategory::Delivery)
            .is_none());
        assert_eq!(state.positions.len(), 0);
    }

    #[tokio::test]
    async fn unsupported_sensor_fails_immediately() {
        let state = Arc::new(AppState::new(16));
        let tracker = PositionTracker::new(
            state,
            Arc::new(ScriptedSensor::unsupported()),
            SensorOptions::default(),
        );

        tracker.start_tracking();

        assert_eq!(tracker.error(), Some(SensorError::Unsupported));
        assert!(!tracker.is_loading());
        assert!(tracker.position().is_none());
    }

    #[tokio::test]
    async fn watch_applies_readings_in_order() {
        let (_state, tracker) = tracker_with(
            vec![Ok(reading(5.36, -4.01)), Ok(reading(5.37, -4.02))],
            Duration::from_millis(10),
        );

        tracker.start_tracking();
        assert!(tracker.is_loading());

        tokio::time::sleep(Duration::from_millis(60)).await;

        let latest = tracker.position().unwrap();
        assert_eq!(latest.point.lat, 5.37);
        assert!(!tracker.is_loading());
        assert!(tracker.error().is_none());
    }

    #[tokio::test]
    async fn sensor_error_is_terminal_for_the_attempt() {
        let (state, tracker) = tracker_with(
            vec![Err(SensorError::PermissionDenied), Ok(reading(5.36, -4.01))],
            Duration::ZERO,
        );

        tracker.start_tracking();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert_eq!(tracker.error(), Some(SensorError::PermissionDenied));
        // The reading queued after the error must not have been applied.
        assert!(tracker.position().is_none());
        assert_eq!(
            state
                .metrics
                .sensor_errors_total
                .with_label_values(&["permission_denied"])
                .get(),
            1
        );
    }

    #[tokio::test]
    async fn stop_tracking_drops_in_flight_readings() {
        let (_state, tracker) = tracker_with(
            vec![Ok(reading(5.36, -4.01)), Ok(reading(9.99, 9.99))],
            Duration::from_millis(40),
        );

        tracker.start_tracking();
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(tracker.position().unwrap().point.lat, 5.36);

        tracker.stop_tracking();
        tokio::time::sleep(Duration::from_millis(80)).await;

        // The second reading was emitted after stop; it must not land.
        assert_eq!(tracker.position().unwrap().point.lat, 5.36);

        // Idempotent.
        tracker.stop_tracking();
    }

    #[tokio::test]
    async fn find_nearby_delegates_once_and_passes_rows_through() {
        let (state, tracker) = tracker_with(vec![Ok(reading(5.36, -4.01))], Duration::ZERO);

        tracker.start_tracking();
        tokio::time::sleep(Duration::from_millis(30)).await;

        let other = Uuid::new_v4();
        state.upsert_position(other, UserCategory::Provider, &reading(5.361, -4.011));
        let queries_before = state.metrics.nearby_queries_total.get();

        let rows = tracker.find_nearby(10.0, Some(UserCategory::Provider));

        assert_eq!(
            state.metrics.nearby_queries_total.get(),
            queries_before + 1
        );
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].user_id, other);
        assert_eq!(rows[0].category, UserCategory::Provider);
        assert!(rows[0].distance_km > 0.0);
    }

    #[tokio::test]
    async fn nearby_refreshes_when_any_position_changes() {
        let (state, tracker) = tracker_with(vec![Ok(reading(5.36, -4.01))], Duration::ZERO);

        tracker.start_tracking();
        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(tracker.find_nearby(DEFAULT_RADIUS_KM, None).is_empty());

        // Another user appears nearby; the coarse subscription should pick
        // it up without an explicit re-query.
        state.upsert_position(Uuid::new_v4(), UserCategory::Provider, &reading(5.361, -4.011));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(tracker.nearby().len(), 1);
    }
}
