use std::env;
use std::time::Duration;

use crate::engine::assignment::{AssignmentSettings, DEFAULT_RADIUS_KM, DEFAULT_SUGGEST_LIMIT};
use crate::error::AppError;
use crate::providers::{DEFAULT_AVERAGE_SPEED_KMH, DEFAULT_ROUTE_SEGMENTS};

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub notification_queue_size: usize,
    pub event_buffer_size: usize,
    pub default_radius_km: f64,
    pub suggest_limit: usize,
    pub tracking_refresh_secs: u64,
    pub average_speed_kmh: f64,
    pub route_points: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            notification_queue_size: 1024,
            event_buffer_size: 1024,
            default_radius_km: DEFAULT_RADIUS_KM,
            suggest_limit: DEFAULT_SUGGEST_LIMIT,
            tracking_refresh_secs: 30,
            average_speed_kmh: DEFAULT_AVERAGE_SPEED_KMH,
            route_points: DEFAULT_ROUTE_SEGMENTS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            notification_queue_size: parse_or_default(
                "NOTIFICATION_QUEUE_SIZE",
                defaults.notification_queue_size,
            )?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", defaults.event_buffer_size)?,
            default_radius_km: parse_or_default("DEFAULT_RADIUS_KM", defaults.default_radius_km)?,
            suggest_limit: parse_or_default("SUGGEST_LIMIT", defaults.suggest_limit)?,
            tracking_refresh_secs: parse_or_default(
                "TRACKING_REFRESH_SECS",
                defaults.tracking_refresh_secs,
            )?,
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?,
            route_points: parse_or_default("ROUTE_POINTS", defaults.route_points)?,
        };

        if config.tracking_refresh_secs == 0 {
            return Err(AppError::Internal(
                "invalid TRACKING_REFRESH_SECS: must be > 0".to_string(),
            ));
        }
        if config.average_speed_kmh <= 0.0 {
            return Err(AppError::Internal(
                "invalid AVERAGE_SPEED_KMH: must be > 0".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.tracking_refresh_secs)
    }

    pub fn assignment_settings(&self) -> AssignmentSettings {
        AssignmentSettings {
            default_radius_km: self.default_radius_km,
            suggest_limit: self.suggest_limit,
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
