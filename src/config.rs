use std::{env, fmt::Display, str::FromStr, time::Duration};

use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("{key} is required")]
    Missing { key: &'static str },
    #[error("invalid {key} value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Postgres,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "postgres" | "pg" => Ok(StoreBackend::Postgres),
            "memory" | "mem" => Ok(StoreBackend::Memory),
            other => Err(format!("expected postgres or memory, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProctorConfig {
    /// Violation count at which a student is blocked. `None` never blocks.
    pub block_threshold: Option<i32>,
    pub block_duration: chrono::Duration,
}

impl Default for ProctorConfig {
    fn default() -> Self {
        Self {
            block_threshold: None,
            block_duration: chrono::Duration::minutes(1440),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ReminderConfig {
    pub dedupe: bool,
    pub poll_interval: Duration,
}

impl Default for ReminderConfig {
    fn default() -> Self {
        Self {
            dedupe: false,
            poll_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeetingConfig {
    pub token_url: Option<String>,
    pub link_url: Option<String>,
    pub api_key: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub store: StoreBackend,
    pub database_url: Option<String>,
    pub proctor: ProctorConfig,
    pub reminders: ReminderConfig,
    pub meeting: MeetingConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8081,
            store: StoreBackend::Memory,
            database_url: None,
            proctor: ProctorConfig::default(),
            reminders: ReminderConfig::default(),
            meeting: MeetingConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let store: StoreBackend = try_load("STORE_BACKEND", "postgres")?;
        let database_url = optional("DATABASE_URL");
        if store == StoreBackend::Postgres && database_url.is_none() {
            return Err(ConfigError::Missing { key: "DATABASE_URL" });
        }

        let block_minutes: i64 = try_load("PROCTOR_BLOCK_MINUTES", "1440")?;
        let poll_secs: u64 = try_load("REMINDER_POLL_SECS", "60")?;

        Ok(Self {
            port: try_load("PORT", "8081")?,
            store,
            database_url,
            proctor: ProctorConfig {
                block_threshold: optional_parsed("PROCTOR_BLOCK_THRESHOLD")?,
                block_duration: chrono::Duration::minutes(block_minutes),
            },
            reminders: ReminderConfig {
                dedupe: try_load("REMINDER_DEDUPE", "false")?,
                poll_interval: Duration::from_secs(poll_secs.max(1)),
            },
            meeting: MeetingConfig {
                token_url: optional("MEETING_TOKEN_URL"),
                link_url: optional("MEETING_LINK_URL"),
                api_key: optional("MEETING_API_KEY"),
            },
        })
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn optional_parsed<T: FromStr>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T::Err: Display,
{
    optional(key)
        .map(|raw| parse(key, raw))
        .transpose()
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let raw = optional(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });
    parse(key, raw)
}

fn parse<T: FromStr>(key: &'static str, raw: String) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    raw.trim().parse().map_err(|e: T::Err| {
        warn!("Invalid {key} value: {e}");
        ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value: raw,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_backend_parses_aliases() {
        assert_eq!("PG".parse::<StoreBackend>().unwrap(), StoreBackend::Postgres);
        assert_eq!("memory".parse::<StoreBackend>().unwrap(), StoreBackend::Memory);
        assert!("redis".parse::<StoreBackend>().is_err());
    }

    #[test]
    fn parse_reports_key_and_value() {
        let err = parse::<u16>("PORT", "eighty".into()).unwrap_err();
        match err {
            ConfigError::Invalid { key, value, .. } => {
                assert_eq!(key, "PORT");
                assert_eq!(value, "eighty");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn defaults_never_block() {
        let cfg = Config::default();
        assert!(cfg.proctor.block_threshold.is_none());
        assert!(!cfg.reminders.dedupe);
    }
}
