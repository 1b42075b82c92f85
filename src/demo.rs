use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::models::position::{GeoPoint, PositionReading, UserCategory};
use crate::sensor::{ScriptedSensor, SensorOptions};
use crate::session::DeliverySession;
use crate::sim::{run_simulation, Simulation};
use crate::state::AppState;
use crate::tracker::PositionTracker;

// A short run across the Plateau district of Abidjan.
const DEMO_PICKUP: GeoPoint = GeoPoint {
    lat: 5.3600,
    lng: -4.0083,
};
const DEMO_DROPOFF: GeoPoint = GeoPoint {
    lat: 5.3364,
    lng: -4.0267,
};

/// Offline demonstration without a real driver: seeds a delivery record,
/// feeds the position table from a scripted sensor through the tracker, and
/// lets the motion simulator drive the delivery to arrival.
pub async fn run_demo(state: Arc<AppState>, sensor_options: SensorOptions, tick: Duration) {
    let record = state.create_delivery(
        Uuid::new_v4(),
        Uuid::new_v4(),
        Uuid::new_v4(),
        DEMO_PICKUP,
        DEMO_DROPOFF,
    );
    info!(delivery_id = %record.id, "demo delivery created");

    let sensor = Arc::new(ScriptedSensor::new(route_script(32)).with_emit_delay(tick));
    let tracker = Arc::new(PositionTracker::new(state.clone(), sensor, sensor_options));
    tracker.start_tracking();

    let driver_id = record.driver_id;
    let feed_task = tokio::spawn({
        let tracker = tracker.clone();
        async move {
            let mut interval = tokio::time::interval(tick);
            loop {
                interval.tick().await;
                tracker.update_position(driver_id, UserCategory::Delivery);
            }
        }
    });

    let session = DeliverySession::open(state, record.id);
    run_simulation(
        &session,
        Simulation::new(DEMO_PICKUP, DEMO_DROPOFF),
        tick,
    )
    .await;

    feed_task.abort();
    tracker.stop_tracking();
    session.close();
    info!(delivery_id = %record.id, "demo run finished");
}

/// Evenly spaced fixes along the pickup-to-dropoff line.
fn route_script(steps: usize) -> Vec<Result<PositionReading, crate::sensor::SensorError>> {
    (0..=steps)
        .map(|i| {
            let t = i as f64 / steps as f64;
            Ok(PositionReading {
                point: GeoPoint {
                    lat: DEMO_PICKUP.lat + (DEMO_DROPOFF.lat - DEMO_PICKUP.lat) * t,
                    lng: DEMO_PICKUP.lng + (DEMO_DROPOFF.lng - DEMO_PICKUP.lng) * t,
                },
                accuracy: Some(10.0),
                heading: None,
                speed: Some(8.3),
                timestamp: Utc::now(),
            })
        })
        .collect()
}
