//! Configuration module
//!
//! Loads application settings from `.env` files, environment variables and an
//! optional YAML file. Priority: YAML > ENV vars > .env values > defaults.
//!
//! # Modules
//! - `yaml`: YAML configuration file loading
//!
//! # Example
//! ```rust,no_run
//! use waav_conversation::config::AppConfig;
//! use std::path::Path;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load from environment variables only
//! let config = AppConfig::from_env()?;
//!
//! // Load from YAML file with environment variable fallback
//! let config = AppConfig::from_file(Path::new("config.yaml"))?;
//!
//! println!("Using model {}", config.realtime_model);
//! # Ok(())
//! # }
//! ```

use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

mod yaml;

pub use yaml::YamlConfig;

use crate::core::realtime::{
    DEFAULT_REALTIME_MODEL, OPENAI_REALTIME_URL, SessionConfiguration, Voice,
};

/// Default capture sample rate in Hz.
pub const DEFAULT_AUDIO_SAMPLE_RATE: u32 = 16000;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required setting is absent
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    /// A setting has an unusable value
    #[error("Invalid value for {key}: {message}")]
    Invalid { key: &'static str, message: String },

    /// The YAML file could not be read
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The YAML file is malformed
    #[error("Failed to parse YAML config: {0}")]
    Parse(#[from] serde_yaml::Error),
}

// =============================================================================
// Log Level
// =============================================================================

/// Accepted log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }

    pub fn as_tracing_level(&self) -> tracing::Level {
        match self {
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Error => tracing::Level::ERROR,
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("expected debug|info|warn|error, got {:?}", other)),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Application Config
// =============================================================================

/// Application configuration.
#[derive(Clone)]
pub struct AppConfig {
    /// `OPENAI_API_KEY`
    pub openai_api_key: String,
    /// `OPENAI_REALTIME_MODEL`
    pub realtime_model: String,
    /// `OPENAI_REALTIME_URL`
    pub realtime_url: String,
    /// `AUDIO_SAMPLE_RATE`
    pub audio_sample_rate: u32,
    /// `LOG_LEVEL`
    pub log_level: LogLevel,
    /// `COMMIT_DEBOUNCE_MS`
    pub commit_debounce_ms: u64,
    /// `SESSION_INSTRUCTIONS`
    pub session_instructions: Option<String>,
    /// `SESSION_VOICE`
    pub session_voice: Option<Voice>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("openai_api_key", &"<redacted>")
            .field("realtime_model", &self.realtime_model)
            .field("realtime_url", &self.realtime_url)
            .field("audio_sample_rate", &self.audio_sample_rate)
            .field("log_level", &self.log_level)
            .field("commit_debounce_ms", &self.commit_debounce_ms)
            .field("session_instructions", &self.session_instructions.is_some())
            .field("session_voice", &self.session_voice)
            .finish()
    }
}

impl AppConfig {
    /// Load configuration from environment variables only.
    ///
    /// `.env` is loaded by the binary at startup, so its values are visible
    /// here as ordinary environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::resolve(None)
    }

    /// Load configuration from a YAML file, falling back to environment
    /// variables and then defaults for anything the file leaves out.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let yaml_config = YamlConfig::from_file(path)?;
        Self::resolve(Some(yaml_config))
    }

    fn resolve(yaml: Option<YamlConfig>) -> Result<Self, ConfigError> {
        let yaml = yaml.unwrap_or_default();

        let openai_api_key = yaml
            .openai_api_key()
            .or_else(|| env_var("OPENAI_API_KEY"))
            .filter(|key| !key.trim().is_empty())
            .ok_or(ConfigError::Missing("OPENAI_API_KEY"))?;

        let realtime_model = yaml
            .realtime_model()
            .or_else(|| env_var("OPENAI_REALTIME_MODEL"))
            .unwrap_or_else(|| DEFAULT_REALTIME_MODEL.to_string());

        let realtime_url = yaml
            .realtime_url()
            .or_else(|| env_var("OPENAI_REALTIME_URL"))
            .unwrap_or_else(|| OPENAI_REALTIME_URL.to_string());

        let audio_sample_rate = match yaml.sample_rate() {
            Some(rate) => rate,
            None => parse_env("AUDIO_SAMPLE_RATE")?.unwrap_or(DEFAULT_AUDIO_SAMPLE_RATE),
        };

        let log_level = match yaml.log_level().or_else(|| env_var("LOG_LEVEL")) {
            Some(level) => level.parse::<LogLevel>().map_err(|message| ConfigError::Invalid {
                key: "LOG_LEVEL",
                message,
            })?,
            None => LogLevel::default(),
        };

        let commit_debounce_ms = match yaml.commit_debounce_ms() {
            Some(ms) => ms,
            None => parse_env("COMMIT_DEBOUNCE_MS")?.unwrap_or(0),
        };

        let session_instructions = yaml
            .session_instructions()
            .or_else(|| env_var("SESSION_INSTRUCTIONS"));

        let session_voice = match yaml.session_voice().or_else(|| env_var("SESSION_VOICE")) {
            Some(name) => Some(Voice::parse(&name).ok_or_else(|| ConfigError::Invalid {
                key: "SESSION_VOICE",
                message: format!("unknown voice {:?}", name),
            })?),
            None => None,
        };

        let config = Self {
            openai_api_key,
            realtime_model,
            realtime_url,
            audio_sample_rate,
            log_level,
            commit_debounce_ms,
            session_instructions,
            session_voice,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(8000..=192_000).contains(&self.audio_sample_rate) {
            return Err(ConfigError::Invalid {
                key: "AUDIO_SAMPLE_RATE",
                message: format!("{} Hz is outside 8000..=192000", self.audio_sample_rate),
            });
        }
        if !(self.realtime_url.starts_with("ws://") || self.realtime_url.starts_with("wss://")) {
            return Err(ConfigError::Invalid {
                key: "OPENAI_REALTIME_URL",
                message: "must be a ws:// or wss:// URL".to_string(),
            });
        }
        if self.realtime_model.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "OPENAI_REALTIME_MODEL",
                message: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Session configuration with any instruction/voice overrides applied.
    pub fn session_configuration(&self) -> SessionConfiguration {
        let mut session = SessionConfiguration::default();
        if let Some(instructions) = &self.session_instructions {
            session = session.with_instructions(instructions.clone());
        }
        if let Some(voice) = self.session_voice {
            session = session.with_voice(voice);
        }
        session
    }

    pub fn commit_debounce(&self) -> Duration {
        Duration::from_millis(self.commit_debounce_ms)
    }
}

/// Non-empty environment variable.
fn env_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T>(key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_var(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::Invalid {
                key,
                message: format!("{:?}: {}", raw, e),
            }),
        None => Ok(None),
    }
}
