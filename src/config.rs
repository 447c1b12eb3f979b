// src/config.rs

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use dotenvy::dotenv;
use url::Url;

use crate::error::ConfigError;

/// Length of one clock tick.
pub const TICK_INTERVAL: Duration = Duration::from_secs(1);

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;

/// 60 fetches at 5 seconds is roughly five minutes of grading.
pub const DEFAULT_MAX_POLLS: u32 = 60;

pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

pub const DEFAULT_MAX_SUBMIT_RETRIES: u32 = 3;

pub const DEFAULT_STUB_POLLS_BEFORE_COMPLETE: u32 = 2;

/// Polling policy for the result reconciler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    pub max_polls: u32,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_polls: DEFAULT_MAX_POLLS,
        }
    }
}

/// Everything a `SessionController` needs besides the quiz and the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    pub poll: PollConfig,
    pub max_submit_retries: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll: PollConfig::default(),
            max_submit_retries: DEFAULT_MAX_SUBMIT_RETRIES,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Grading backend. `None` means run against the local stub grader.
    pub grader_url: Option<Url>,
    pub grader_token: Option<String>,
    pub quiz_file: PathBuf,
    pub request_timeout: Duration,
    pub session: SessionConfig,
    pub stub_polls_before_complete: u32,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let grader_url = non_empty("GRADER_URL")
            .map(|raw| Url::parse(&raw))
            .transpose()?;

        let grader_token = non_empty("GRADER_TOKEN");

        let quiz_file = non_empty("QUIZ_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("quiz.json"));

        let poll_interval_secs: u64 =
            parse_or(&non_empty, "POLL_INTERVAL_SECS", DEFAULT_POLL_INTERVAL_SECS)?;
        let max_polls: u32 = parse_or(&non_empty, "MAX_POLLS", DEFAULT_MAX_POLLS)?;
        let request_timeout_secs: u64 = parse_or(
            &non_empty,
            "REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        )?;
        let max_submit_retries: u32 =
            parse_or(&non_empty, "MAX_SUBMIT_RETRIES", DEFAULT_MAX_SUBMIT_RETRIES)?;
        let stub_polls_before_complete: u32 = parse_or(
            &non_empty,
            "STUB_POLLS_BEFORE_COMPLETE",
            DEFAULT_STUB_POLLS_BEFORE_COMPLETE,
        )?;

        if poll_interval_secs == 0 {
            return Err(invalid("POLL_INTERVAL_SECS", "0"));
        }
        if max_polls == 0 {
            return Err(invalid("MAX_POLLS", "0"));
        }

        let rust_log = non_empty("RUST_LOG").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            grader_url,
            grader_token,
            quiz_file,
            request_timeout: Duration::from_secs(request_timeout_secs),
            session: SessionConfig {
                poll: PollConfig {
                    interval: Duration::from_secs(poll_interval_secs),
                    max_polls,
                },
                max_submit_retries,
            },
            stub_polls_before_complete,
            rust_log,
        })
    }
}

fn parse_or<T, F>(lookup: &F, key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| invalid(key, &raw)),
        None => Ok(default),
    }
}

fn invalid(key: &str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        key: key.to_string(),
        value: value.to_string(),
    }
}
