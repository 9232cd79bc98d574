use chrono::FixedOffset;
use std::env;
use std::time::Duration;

use crate::utils::retry::RetryConfig;

/// Largest civil offset accepted, in minutes (UTC-14:00 .. UTC+14:00).
const MAX_OFFSET_MINUTES: i64 = 14 * 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub mongo_uri: String,
    pub mongo_database: String,
    pub bind_addr: String,
    pub streak: StreakSettings,
    pub retry: RetrySettings,
}

#[derive(Debug, Clone)]
pub struct StreakSettings {
    /// Fixed civil offset used for every calendar-day computation.
    pub utc_offset_minutes: i32,
    /// How many recent quiz results feed the weekday accuracy profile.
    pub recent_activity_limit: u32,
    /// Re-runs of the whole update when a concurrent write wins.
    pub max_conflict_retries: u32,
}

impl Default for StreakSettings {
    fn default() -> Self {
        Self {
            utc_offset_minutes: 0,
            recent_activity_limit: 100,
            max_conflict_retries: 5,
        }
    }
}

impl StreakSettings {
    pub fn offset(&self) -> Result<FixedOffset, config::ConfigError> {
        FixedOffset::east_opt(self.utc_offset_minutes * 60).ok_or_else(|| {
            config::ConfigError::Message(format!(
                "streak.utc_offset_minutes out of range: {}",
                self.utc_offset_minutes
            ))
        })
    }
}

#[derive(Debug, Clone)]
pub struct RetrySettings {
    pub max_attempts: usize,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_backoff_ms: 20,
            max_backoff_ms: 500,
        }
    }
}

impl RetrySettings {
    pub fn to_retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.max_attempts.max(1),
            base_backoff: Duration::from_millis(self.base_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            jitter_max: Some(Duration::from_millis(self.base_backoff_ms / 2 + 1)),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then the crate-local one
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/<env>.toml, overridden by APP__SECTION__KEY variables
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        Self::from_settings(&settings)
    }

    pub fn from_settings(settings: &config::Config) -> Result<Self, config::ConfigError> {
        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "trainingground".to_string());

        let bind_addr = settings
            .get_string("server.bind_addr")
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let defaults = StreakSettings::default();
        let utc_offset_minutes = match settings.get_int("streak.utc_offset_minutes") {
            Ok(value) => value,
            Err(_) => match env::var("STREAK_UTC_OFFSET_MINUTES") {
                Ok(raw) => raw.trim().parse::<i64>().map_err(|_| {
                    config::ConfigError::Message(format!(
                        "STREAK_UTC_OFFSET_MINUTES is not an integer: {}",
                        raw
                    ))
                })?,
                Err(_) => i64::from(defaults.utc_offset_minutes),
            },
        };
        if utc_offset_minutes.abs() > MAX_OFFSET_MINUTES {
            return Err(config::ConfigError::Message(format!(
                "streak.utc_offset_minutes out of range: {}",
                utc_offset_minutes
            )));
        }

        let streak = StreakSettings {
            utc_offset_minutes: utc_offset_minutes as i32,
            recent_activity_limit: read_u32(
                settings,
                "streak.recent_activity_limit",
                defaults.recent_activity_limit,
            )?,
            max_conflict_retries: read_u32(
                settings,
                "streak.max_conflict_retries",
                defaults.max_conflict_retries,
            )?,
        };

        let retry_defaults = RetrySettings::default();
        let retry = RetrySettings {
            max_attempts: read_u64(
                settings,
                "retry.max_attempts",
                retry_defaults.max_attempts as u64,
            )? as usize,
            base_backoff_ms: read_u64(
                settings,
                "retry.base_backoff_ms",
                retry_defaults.base_backoff_ms,
            )?,
            max_backoff_ms: read_u64(settings, "retry.max_backoff_ms", retry_defaults.max_backoff_ms)?,
        };

        Ok(Config {
            mongo_uri,
            mongo_database,
            bind_addr,
            streak,
            retry,
        })
    }
}

fn read_u64(settings: &config::Config, key: &str, default: u64) -> Result<u64, config::ConfigError> {
    match settings.get_int(key) {
        Ok(value) if value >= 0 => Ok(value as u64),
        Ok(value) => Err(config::ConfigError::Message(format!(
            "{} must not be negative: {}",
            key, value
        ))),
        Err(config::ConfigError::NotFound(_)) => Ok(default),
        Err(e) => Err(e),
    }
}

fn read_u32(settings: &config::Config, key: &str, default: u32) -> Result<u32, config::ConfigError> {
    let value = read_u64(settings, key, u64::from(default))?;
    u32::try_from(value).map_err(|_| {
        config::ConfigError::Message(format!("{} is too large: {}", key, value))
    })
}
