//! # ag-config
//!
//! Layered settings for the sync engine host.
//!
//! Precedence, lowest first:
//! 1. built-in defaults
//! 2. optional `agora.toml` (or the path passed to [`Settings::load_from`])
//! 3. `AGORA__SECTION__KEY` environment variables, after `.env` is loaded

use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_FILE: &str = "agora";
pub const ENV_PREFIX: &str = "AGORA";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct Settings {
    pub poll: PollSettings,
    pub feed: FeedSettings,
    pub log: LogSettings,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PollSettings {
    pub bell_interval_secs: u64,
    pub page_interval_secs: u64,
    pub thread_resync_secs: u64,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FeedSettings {
    pub bell_recent_limit: usize,
    pub page_recent_limit: usize,
    pub unread_limit: usize,
    pub verify_bell_unread_count: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct LogSettings {
    /// `EnvFilter` directive, e.g. `info,ag_engine=debug`.
    pub filter: String,
    pub json: bool,
}

impl PollSettings {
    pub fn bell_interval(&self) -> Duration {
        Duration::from_secs(self.bell_interval_secs)
    }

    pub fn page_interval(&self) -> Duration {
        Duration::from_secs(self.page_interval_secs)
    }

    pub fn thread_resync(&self) -> Duration {
        Duration::from_secs(self.thread_resync_secs)
    }
}

fn defaults() -> Result<config::ConfigBuilder<config::builder::DefaultState>, ConfigError> {
    Ok(Config::builder()
        .set_default("poll.bell_interval_secs", 30)?
        .set_default("poll.page_interval_secs", 5)?
        .set_default("poll.thread_resync_secs", 15)?
        .set_default("feed.bell_recent_limit", 10)?
        .set_default("feed.page_recent_limit", 50)?
        .set_default("feed.unread_limit", 100)?
        .set_default("feed.verify_bell_unread_count", true)?
        .set_default("log.filter", "info")?
        .set_default("log.json", false)?)
}

impl Settings {
    /// Defaults + `agora.toml` (if present) + environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_FILE)
    }

    pub fn load_from(path: &str) -> Result<Self, ConfigError> {
        if let Ok(env_file) = dotenvy::dotenv() {
            debug!(path = %env_file.display(), "loaded .env");
        }
        let built = defaults()?
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;
        Self::finish(built)
    }

    /// Defaults overlaid with an in-memory TOML document.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        let built = defaults()?
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()?;
        Self::finish(built)
    }

    fn finish(built: Config) -> Result<Self, ConfigError> {
        let settings: Settings = built.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.poll;
        if p.bell_interval_secs == 0 || p.page_interval_secs == 0 || p.thread_resync_secs == 0 {
            return Err(ConfigError::Invalid("poll intervals must be at least one second".into()));
        }
        let f = &self.feed;
        if f.bell_recent_limit == 0 || f.page_recent_limit == 0 || f.unread_limit == 0 {
            return Err(ConfigError::Invalid("feed limits must be positive".into()));
        }
        Ok(())
    }
}
