use std::env;
use std::time::Duration;

use crate::error::AppError;
use crate::sensor::SensorOptions;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub sensor_high_accuracy: bool,
    pub sensor_timeout_ms: u64,
    pub sensor_maximum_age_ms: u64,
    pub sensor_watch: bool,
    pub sensor_update_interval_ms: u64,
    pub demo_mode: bool,
    pub demo_tick_ms: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        Ok(Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            sensor_high_accuracy: parse_or_default("SENSOR_HIGH_ACCURACY", true)?,
            sensor_timeout_ms: parse_or_default("SENSOR_TIMEOUT_MS", 10_000)?,
            sensor_maximum_age_ms: parse_or_default("SENSOR_MAXIMUM_AGE_MS", 0)?,
            sensor_watch: parse_or_default("SENSOR_WATCH", true)?,
            sensor_update_interval_ms: parse_or_default("SENSOR_UPDATE_INTERVAL_MS", 5_000)?,
            demo_mode: parse_or_default("DEMO_MODE", false)?,
            demo_tick_ms: parse_or_default("DEMO_TICK_MS", 2_000)?,
        })
    }

    pub fn sensor_options(&self) -> SensorOptions {
        SensorOptions {
            high_accuracy: self.sensor_high_accuracy,
            timeout: Duration::from_millis(self.sensor_timeout_ms),
            maximum_age: Duration::from_millis(self.sensor_maximum_age_ms),
            watch: self.sensor_watch,
            update_interval: Duration::from_millis(self.sensor_update_interval_ms),
        }
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
