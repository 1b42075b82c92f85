use std::time::Duration;

use tracing::info;

use crate::geo::{eta_minutes, haversine_km};
use crate::models::delivery::DeliveryStatus;
use crate::models::position::GeoPoint;
use crate::session::DeliverySession;

/// Fraction of the remaining displacement covered per tick. Exponential
/// approach: the driver never exactly arrives by this rule alone, hence the
/// arrival threshold below.
const STEP_FRACTION: f64 = 0.05;

/// Remaining distance under which the run is forced to `delivered`.
const ARRIVAL_THRESHOLD_KM: f64 = 0.05;

/// Deterministic stand-in for a live driver feed. Visually convincing
/// motion, not physically accurate; there is no heading or speed continuity.
#[derive(Debug, Clone)]
pub struct Simulation {
    pub position: GeoPoint,
    pub destination: GeoPoint,
    pub eta_minutes: i64,
    pub delivered: bool,
}

impl Simulation {
    pub fn new(start: GeoPoint, destination: GeoPoint) -> Self {
        let eta = eta_minutes(haversine_km(&start, &destination));
        Self {
            position: start,
            destination,
            eta_minutes: eta,
            delivered: false,
        }
    }

    pub fn remaining_km(&self) -> f64 {
        haversine_km(&self.position, &self.destination)
    }

    /// Advances one step toward the destination and refreshes the synthetic
    /// ETA. Once the remaining distance drops below the threshold the run is
    /// marked delivered and further ticks do nothing.
    pub fn tick(&mut self) {
        if self.delivered {
            return;
        }

        self.position.lat += (self.destination.lat - self.position.lat) * STEP_FRACTION;
        self.position.lng += (self.destination.lng - self.position.lng) * STEP_FRACTION;

        let remaining = self.remaining_km();
        self.eta_minutes = eta_minutes(remaining);

        if remaining < ARRIVAL_THRESHOLD_KM {
            self.delivered = true;
        }
    }
}

/// Drives a simulation against a live session: every tick writes the
/// synthesized position through the store, and arrival forces the
/// `delivered` status and stops the loop.
pub async fn run_simulation(session: &DeliverySession, mut sim: Simulation, tick: Duration) {
    let mut interval = tokio::time::interval(tick);

    loop {
        interval.tick().await;
        sim.tick();

        session.update_driver_position(sim.position.lat, sim.position.lng);

        if sim.delivered {
            session.update_status(DeliveryStatus::Delivered);
            info!(delivery_id = %session.delivery_id(), "simulated delivery arrived");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Simulation, ARRIVAL_THRESHOLD_KM};
    use crate::models::position::GeoPoint;

    fn abidjan_run() -> Simulation {
        Simulation::new(
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

    #[test]
    fn reaches_delivered_in_bounded_ticks() {
        let mut sim = abidjan_run();

        let mut ticks = 0;
        while !sim.delivered {
            sim.tick();
            ticks += 1;
            assert!(ticks < 500, "simulation never arrived");
        }

        assert!(sim.remaining_km() < ARRIVAL_THRESHOLD_KM);
    }

    #[test]
    fn remaining_distance_never_increases() {
        let mut sim = abidjan_run();

        let mut previous = sim.remaining_km();
        while !sim.delivered {
            sim.tick();
            let remaining = sim.remaining_km();
            assert!(remaining <= previous);
            previous = remaining;
        }
    }

    #[test]
    fn eta_stays_at_least_one_minute() {
        let mut sim = abidjan_run();

        while !sim.delivered {
            sim.tick();
            assert!(sim.eta_minutes >= 1);
        }
    }

    #[test]
    fn ticking_after_arrival_is_a_noop() {
        let mut sim = abidjan_run();
        while !sim.delivered {
            sim.tick();
        }

        let frozen = sim.position;
        sim.tick();
        assert_eq!(sim.position, frozen);
    }
}
