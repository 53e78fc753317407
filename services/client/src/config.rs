use crate::controller::ReconnectPolicy;
use chatroom_core::router::ContentPolicy;
use reqwest::Url;
use secrecy::SecretString;
use std::path::PathBuf;
use std::time::Duration;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Debug)]
pub struct Config {
    pub api_base: Url,
    pub preferred_server: Option<String>,
    /// Overrides `<api_base>/api/weather` when set.
    pub weather_url: Option<Url>,
    pub weather_api_key: Option<SecretString>,
    pub session_dir: PathBuf,
    pub log_level: Level,
    pub reconnect: ReconnectPolicy,
    pub fragment_policy: ContentPolicy,
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let api_base_str =
            std::env::var("CHAT_API_BASE").unwrap_or_else(|_| "http://localhost:8888".to_string());
        let api_base = parse_url("CHAT_API_BASE", &api_base_str)?;

        let preferred_server = std::env::var("CHAT_SERVER")
            .ok()
            .filter(|server| !server.trim().is_empty());

        let weather_url = std::env::var("WEATHER_API_URL")
            .ok()
            .map(|url| parse_url("WEATHER_API_URL", &url))
            .transpose()?;
        let weather_api_key = std::env::var("WEATHER_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
            .map(SecretString::from);

        let session_dir = std::env::var("SESSION_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.chatroom"));

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let reconnect = ReconnectPolicy {
            max_attempts: parse_number("RECONNECT_ATTEMPTS", 0)?,
            base_delay: Duration::from_millis(parse_number("RECONNECT_BASE_MS", 500)?),
            max_delay: Duration::from_millis(parse_number("RECONNECT_MAX_MS", 8000)?),
        };

        let fragment_policy = if parse_flag("TRUST_STREAM_HTML")? {
            ContentPolicy::TrustedHtml
        } else {
            ContentPolicy::Escape
        };

        Ok(Self {
            api_base,
            preferred_server,
            weather_url,
            weather_api_key,
            session_dir,
            log_level,
            reconnect,
            fragment_policy,
        })
    }
}

fn parse_url(var: &str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string()))
}

fn parse_number<T>(var: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(var) {
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(var.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

fn parse_flag(var: &str) -> Result<bool, ConfigError> {
    let Ok(value) = std::env::var(var) else {
        return Ok(false);
    };
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "" | "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue(
            var.to_string(),
            format!("'{}' is not a boolean", other),
        )),
    }
}
