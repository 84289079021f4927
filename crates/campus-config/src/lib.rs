//! Configuration module for the campus platform.

use campus_core::EnrollmentSettings;
use serde::Deserialize;
use std::env;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// SQLite connection path/URL for the registry database
    pub database_url: String,
    /// Semester credit ceiling enforced by the credit-limit policy
    pub max_credits_per_semester: u32,
    /// Waitlist capacity for sections created without an explicit one
    pub default_waitlist_size: u32,
    /// Snapshot cadence: one snapshot per this many applied events
    pub event_store_snapshot_every_n_events: i64,
    /// Section lease time-to-live, in seconds
    pub lock_default_ttl_seconds: u64,
    /// How long an enrollment request waits for a section lease, in ms
    pub lock_wait_timeout_ms: u64,
    /// Audit chain hash algorithm. Only sha256 is supported.
    pub audit_hash_algorithm: String,
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: env_var("DATABASE_URL")?,
            max_credits_per_semester: env_var_parse("MAX_CREDITS_PER_SEMESTER", 18)?,
            default_waitlist_size: env_var_parse("DEFAULT_WAITLIST_SIZE", 10)?,
            event_store_snapshot_every_n_events: env_var_parse(
                "EVENT_STORE_SNAPSHOT_EVERY_N_EVENTS",
                10,
            )?,
            lock_default_ttl_seconds: env_var_parse("LOCK_DEFAULT_TTL_SECONDS", 5)?,
            lock_wait_timeout_ms: env_var_parse("LOCK_WAIT_TIMEOUT_MS", 1000)?,
            audit_hash_algorithm: env_var_or("AUDIT_HASH_ALGORITHM", "sha256"),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.audit_hash_algorithm != "sha256" {
            return Err(ConfigError::InvalidValue(
                "AUDIT_HASH_ALGORITHM".to_string(),
                format!("{} (only sha256 is supported)", self.audit_hash_algorithm),
            ));
        }
        if self.event_store_snapshot_every_n_events < 1 {
            return Err(ConfigError::InvalidValue(
                "EVENT_STORE_SNAPSHOT_EVERY_N_EVENTS".to_string(),
                format!("{} (must be at least 1)", self.event_store_snapshot_every_n_events),
            ));
        }
        Ok(())
    }

    /// The orchestrator-facing slice of this configuration.
    pub fn enrollment_settings(&self) -> EnrollmentSettings {
        EnrollmentSettings {
            max_credits_per_semester: self.max_credits_per_semester,
            default_waitlist_size: self.default_waitlist_size,
            snapshot_every_n_events: self.event_store_snapshot_every_n_events,
            lock_ttl: Duration::from_secs(self.lock_default_ttl_seconds),
            lock_wait_timeout: Duration::from_millis(self.lock_wait_timeout_ms),
            ..EnrollmentSettings::default()
        }
    }
}

fn env_var(name: &str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name.to_string()))
}

fn env_var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_var_parse<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| ConfigError::InvalidValue(name.to_string(), raw)),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_config() -> AppConfig {
        AppConfig {
            database_url: "registry.db".to_string(),
            max_credits_per_semester: 18,
            default_waitlist_size: 10,
            event_store_snapshot_every_n_events: 10,
            lock_default_ttl_seconds: 5,
            lock_wait_timeout_ms: 1000,
            audit_hash_algorithm: "sha256".to_string(),
        }
    }

    #[test]
    fn test_env_var_or_uses_default() {
        let val = env_var_or("NON_EXISTENT_VAR_12345", "default_value");
        assert_eq!(val, "default_value");
    }

    #[test]
    fn test_env_var_parse_uses_default_when_unset() {
        let val: u32 = env_var_parse("NON_EXISTENT_VAR_67890", 18).unwrap();
        assert_eq!(val, 18);
    }

    #[test]
    fn test_validate_rejects_unknown_hash_algorithm() {
        let mut config = base_config();
        config.audit_hash_algorithm = "md5".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue(_, _))
        ));
    }

    #[test]
    fn test_validate_rejects_zero_snapshot_cadence() {
        let mut config = base_config();
        config.event_store_snapshot_every_n_events = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_enrollment_settings_conversion() {
        let mut config = base_config();
        config.max_credits_per_semester = 21;
        config.lock_default_ttl_seconds = 7;

        let settings = config.enrollment_settings();
        assert_eq!(settings.max_credits_per_semester, 21);
        assert_eq!(settings.lock_ttl, Duration::from_secs(7));
        assert_eq!(settings.lock_wait_timeout, Duration::from_millis(1000));
        assert_eq!(settings.snapshot_every_n_events, 10);
    }
}
