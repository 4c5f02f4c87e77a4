//! services/api/src/config.rs
//!
//! Defines the application's configuration structure and loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use chrono::FixedOffset;
use inbox_triage_core::{SessionSettings, UndoSettings};
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    /// `None` selects the in-memory ledger store.
    pub database_url: Option<String>,
    pub log_level: Level,
    pub mail_bridge_url: String,
    pub mail_bridge_token: Option<String>,
    pub batch_size: usize,
    pub undo_window: Duration,
    pub undo_tick: Duration,
    pub utc_offset: FixedOffset,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination.
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // --- Server and Database Settings ---
        let bind_address = parse_or(&lookup, "BIND_ADDRESS", SocketAddr::from(([0, 0, 0, 0], 3000)))?;
        let database_url = lookup("DATABASE_URL").filter(|url| !url.trim().is_empty());

        let log_level_str = lookup("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        // --- Mail Bridge ---
        let mail_bridge_url = lookup("MAIL_BRIDGE_URL")
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("MAIL_BRIDGE_URL".to_string()))?;
        let mail_bridge_token = lookup("MAIL_BRIDGE_TOKEN").filter(|t| !t.is_empty());

        // --- Triage Settings ---
        let batch_size: usize = parse_or(&lookup, "BATCH_SIZE", 20)?;
        if batch_size == 0 {
            return Err(ConfigError::InvalidValue(
                "BATCH_SIZE".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let undo_window_ms: u64 = parse_or(&lookup, "UNDO_WINDOW_MS", 5000)?;
        let undo_tick_ms: u64 = parse_or(&lookup, "UNDO_TICK_MS", 100)?;
        if undo_tick_ms == 0 || undo_tick_ms > undo_window_ms {
            return Err(ConfigError::InvalidValue(
                "UNDO_TICK_MS".to_string(),
                format!("must be between 1 and UNDO_WINDOW_MS ({undo_window_ms})"),
            ));
        }

        let offset_minutes: i32 = parse_or(&lookup, "UTC_OFFSET_MINUTES", 0)?;
        let utc_offset = offset_minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .ok_or_else(|| {
                ConfigError::InvalidValue(
                    "UTC_OFFSET_MINUTES".to_string(),
                    format!("{offset_minutes} is outside +/- 24 hours"),
                )
            })?;

        Ok(Self {
            bind_address,
            database_url,
            log_level,
            mail_bridge_url,
            mail_bridge_token,
            batch_size,
            undo_window: Duration::from_millis(undo_window_ms),
            undo_tick: Duration::from_millis(undo_tick_ms),
            utc_offset,
        })
    }

    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            batch_size: self.batch_size,
            utc_offset: self.utc_offset,
        }
    }

    pub fn undo_settings(&self) -> UndoSettings {
        UndoSettings {
            window: self.undo_window,
            tick: self.undo_tick,
        }
    }
}

/// Parses `key` when set, otherwise falls back to `default`.
fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(key.to_string(), e.to_string())),
        None => Ok(default),
    }
}
