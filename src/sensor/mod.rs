use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::BoxStream;
use futures::FutureExt;
use futures::StreamExt;
use thiserror::Error;

use crate::models::position::PositionReading;

/// Geolocation failure taxonomy. Each variant carries the fixed user-facing
/// message shown by the presentation layer. Terminal for the in-flight
/// tracking attempt only; a later `start_tracking` may succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SensorError {
    #[error("geolocation permission denied; please allow access to your position")]
    PermissionDenied,

    #[error("position unavailable; check that your GPS is enabled")]
    Unavailable,

    #[error("timed out waiting for a position fix")]
    Timeout,

    #[error("geolocation is not supported on this platform")]
    Unsupported,

    #[error("unknown geolocation error")]
    Unknown,
}

impl SensorError {
    /// Stable label used for the sensor-error metric.
    pub fn kind(&self) -> &'static str {
        match self {
            SensorError::PermissionDenied => "permission_denied",
            SensorError::Unavailable => "unavailable",
            SensorError::Timeout => "timeout",
            SensorError::Unsupported => "unsupported",
            SensorError::Unknown => "unknown",
        }
    }
}

/// Acquisition knobs mirroring the platform location API. The update
/// interval is advisory only; actual callback cadence is sensor-driven.
#[derive(Debug, Clone, Copy)]
pub struct SensorOptions {
    pub high_accuracy: bool,
    pub timeout: Duration,
    pub maximum_age: Duration,
    /// Continuous watch when true, single fix when false.
    pub watch: bool,
    pub update_interval: Duration,
}

impl Default for SensorOptions {
    fn default() -> Self {
        Self {
            high_accuracy: true,
            timeout: Duration::from_secs(10),
            maximum_age: Duration::ZERO,
            watch: true,
            update_interval: Duration::from_secs(5),
        }
    }
}

/// Seam over the platform's location-sensing capability.
pub trait LocationSensor: Send + Sync {
    /// False when the platform has no location capability at all.
    fn supported(&self) -> bool {
        true
    }

    /// Single fix.
    fn current_position(
        &self,
        options: &SensorOptions,
    ) -> BoxFuture<'static, Result<PositionReading, SensorError>>;

    /// Continuous watch; the stream ends when the sensor stops emitting.
    fn watch_position(
        &self,
        options: &SensorOptions,
    ) -> BoxStream<'static, Result<PositionReading, SensorError>>;
}

/// Sensor double that replays a fixed script of readings and errors, with an
/// optional delay between emissions. Drives the demo feed and the tracker
/// tests.
pub struct ScriptedSensor {
    script: Mutex<VecDeque<Result<PositionReading, SensorError>>>,
    emit_delay: Duration,
    supported: bool,
}

impl ScriptedSensor {
    pub fn new(script: Vec<Result<PositionReading, SensorError>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            emit_delay: Duration::ZERO,
            supported: true,
        }
    }

    pub fn with_emit_delay(mut self, delay: Duration) -> Self {
        self.emit_delay = delay;
        self
    }

    /// A sensor that reports no platform capability.
    pub fn unsupported() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            emit_delay: Duration::ZERO,
            supported: false,
        }
    }

    fn drain(&self) -> Vec<Result<PositionReading, SensorError>> {
        let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
        script.drain(..).collect()
    }
}

impl LocationSensor for ScriptedSensor {
    fn supported(&self) -> bool {
        self.supported
    }

    fn current_position(
        &self,
        _options: &SensorOptions,
    ) -> BoxFuture<'static, Result<PositionReading, SensorError>> {
        let next = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            script.pop_front()
        };
        let delay = self.emit_delay;

        async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            next.unwrap_or(Err(SensorError::Unavailable))
        }
        .boxed()
    }

    fn watch_position(
        &self,
        _options: &SensorOptions,
    ) -> BoxStream<'static, Result<PositionReading, SensorError>> {
        let items = self.drain();
        let delay = self.emit_delay;

        futures::stream::iter(items)
            .then(move |item| async move {
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                item
            })
            .boxed()
    }
}
