use std::env;

use crate::engine::dispatch::DispatchSettings;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub booking_queue_size: usize,
    pub event_buffer_size: usize,
    pub search_radius_km: f64,
    pub offer_ttl_secs: u32,
    pub sweep_interval_secs: u64,
    pub store_conflict_retries: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Compact,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format {other}, expected compact or json")),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            log_format: parse_or_default("LOG_FORMAT", LogFormat::Compact)?,
            booking_queue_size: parse_or_default("BOOKING_QUEUE_SIZE", 1024)?,
            event_buffer_size: parse_or_default("EVENT_BUFFER_SIZE", 1024)?,
            search_radius_km: parse_or_default("SEARCH_RADIUS_KM", 10.0)?,
            offer_ttl_secs: parse_or_default("OFFER_TTL_SECS", 45)?,
            sweep_interval_secs: parse_or_default("SWEEP_INTERVAL_SECS", 5)?,
            store_conflict_retries: parse_or_default("STORE_CONFLICT_RETRIES", 5)?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if !self.search_radius_km.is_finite() || self.search_radius_km <= 0.0 {
            return Err(AppError::Internal(
                "SEARCH_RADIUS_KM must be a positive number".to_string(),
            ));
        }
        if self.offer_ttl_secs == 0 || self.sweep_interval_secs == 0 {
            return Err(AppError::Internal(
                "OFFER_TTL_SECS and SWEEP_INTERVAL_SECS must be positive".to_string(),
            ));
        }

        Ok(())
    }

    pub fn dispatch_settings(&self) -> DispatchSettings {
        DispatchSettings {
            search_radius_km: self.search_radius_km,
            offer_ttl: chrono::Duration::seconds(i64::from(self.offer_ttl_secs)),
            conflict_retries: self.store_conflict_retries,
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

#[cfg(test)]
mod tests {
    use super::{Config, LogFormat};

    fn valid_config() -> Config {
        Config {
            http_port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Compact,
            booking_queue_size: 1024,
            event_buffer_size: 1024,
            search_radius_km: 10.0,
            offer_ttl_secs: 45,
            sweep_interval_secs: 5,
            store_conflict_retries: 5,
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn search_radius_must_be_a_positive_number() {
        for radius in [0.0, -1.0, f64::NAN, f64::INFINITY] {
            let mut config = valid_config();
            config.search_radius_km = radius;
            assert!(config.validate().is_err(), "radius {radius} accepted");
        }
    }

    #[test]
    fn zero_ttl_or_sweep_interval_is_rejected() {
        let mut config = valid_config();
        config.offer_ttl_secs = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.sweep_interval_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("compact".parse::<LogFormat>().unwrap(), LogFormat::Compact);
        assert!("pretty".parse::<LogFormat>().is_err());
    }
}
