use std::path::PathBuf;
use std::time::Duration;

use chrono_tz::Tz;
use thiserror::Error;

use crate::constants::BROWSER_USER_AGENT;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    InvalidValue { name: String, message: String },
    #[error("failed to parse {name} as integer: {source}")]
    ParseInt {
        name: String,
        #[source]
        source: std::num::ParseIntError,
    },
    #[error("failed to parse {name} as boolean: {value}")]
    ParseBool { name: String, value: String },
}

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    // Remote board
    pub board_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub catalog_delay: Duration,
    pub thread_delay: Duration,
    pub max_threads_per_run: usize,

    // Storage
    pub database_path: PathBuf,
    pub archive_dir: PathBuf,
    pub thumbnail_max_px: u32,

    // Scheduling
    pub timezone: Tz,
    pub crawl_schedules: Vec<String>,
    pub crawl_on_startup: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment variable is present but invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(Self {
            // Remote board
            board_url: env_or_default("BOARD_URL", "https://petrarchan.com/pt"),
            user_agent: env_or_default("USER_AGENT", BROWSER_USER_AGENT),
            request_timeout: Duration::from_secs(parse_env_u64("HTTP_TIMEOUT_SECS", 30)?),
            catalog_delay: Duration::from_millis(parse_env_u64("CATALOG_DELAY_MS", 1000)?),
            thread_delay: Duration::from_millis(parse_env_u64("THREAD_DELAY_MS", 2000)?),
            max_threads_per_run: parse_env_usize("MAX_THREADS_PER_RUN", 61)?,

            // Storage
            database_path: PathBuf::from(env_or_default("DATABASE_PATH", "./data/archive.sqlite")),
            archive_dir: PathBuf::from(env_or_default("ARCHIVE_DIR", "./static/petrarchive")),
            thumbnail_max_px: parse_env_u32("THUMBNAIL_MAX_PX", 150)?,

            // Scheduling
            timezone: parse_timezone(&env_or_default("SCHEDULE_TIMEZONE", "America/Detroit"))?,
            crawl_schedules: parse_schedule_list(&env_or_default(
                "CRAWL_SCHEDULES",
                "0 7 9 * * *;0 7 21 * * *",
            )),
            crawl_on_startup: parse_env_bool("CRAWL_ON_STARTUP", false)?,
        })
    }

    /// Configuration suitable for tests: no politeness delays, temp-friendly paths.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            board_url: "http://127.0.0.1:9/pt".to_string(),
            user_agent: "board-archiver-test/0.1".to_string(),
            request_timeout: Duration::from_secs(5),
            catalog_delay: Duration::ZERO,
            thread_delay: Duration::ZERO,
            max_threads_per_run: 61,
            database_path: PathBuf::from("./data/test.sqlite"),
            archive_dir: PathBuf::from("./data/test-archive"),
            thumbnail_max_px: 150,
            timezone: chrono_tz::America::Detroit,
            crawl_schedules: vec!["0 7 9 * * *".to_string()],
            crawl_on_startup: false,
        }
    }

    /// Validate that the configuration is usable.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_threads_per_run == 0 {
            return Err(ConfigError::InvalidValue {
                name: "MAX_THREADS_PER_RUN".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if self.thumbnail_max_px == 0 {
            return Err(ConfigError::InvalidValue {
                name: "THUMBNAIL_MAX_PX".to_string(),
                message: "must be at least 1".to_string(),
            });
        }
        if url::Url::parse(&self.board_url).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "BOARD_URL".to_string(),
                message: format!("'{}' is not an absolute URL", self.board_url),
            });
        }
        Ok(())
    }

    /// URL of the thread listing page.
    #[must_use]
    pub fn catalog_url(&self) -> String {
        format!("{}/catalog", self.board_url.trim_end_matches('/'))
    }

    /// URL of a single thread page.
    #[must_use]
    pub fn thread_url(&self, thread_id: &str) -> String {
        format!("{}/thread/{thread_id}", self.board_url.trim_end_matches('/'))
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn parse_env_u64(name: &str, default: u64) -> Result<u64, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_u32(name: &str, default: u32) -> Result<u32, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_usize(name: &str, default: usize) -> Result<usize, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => val.parse().map_err(|e| ConfigError::ParseInt {
            name: name.to_string(),
            source: e,
        }),
        _ => Ok(default),
    }
}

fn parse_env_bool(name: &str, default: bool) -> Result<bool, ConfigError> {
    match std::env::var(name) {
        Ok(val) if !val.is_empty() => match val.to_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(true),
            "false" | "0" | "no" | "off" => Ok(false),
            _ => Err(ConfigError::ParseBool {
                name: name.to_string(),
                value: val,
            }),
        },
        _ => Ok(default),
    }
}

fn parse_timezone(value: &str) -> Result<Tz, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        name: "SCHEDULE_TIMEZONE".to_string(),
        message: format!("unknown timezone '{value}'"),
    })
}

/// Cron expressions contain commas, so the list is separated by semicolons.
fn parse_schedule_list(value: &str) -> Vec<String> {
    value
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}
