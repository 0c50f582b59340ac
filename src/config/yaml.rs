use serde::Deserialize;
use std::path::Path;

use super::ConfigError;

/// Complete YAML configuration structure
///
/// All fields are optional to allow partial configuration. A value present in
/// the file wins over the matching environment variable.
///
/// # Example YAML structure
/// ```yaml
/// providers:
///   openai_api_key: "sk-..."
///
/// realtime:
///   model: "gpt-realtime-2025-08-28"
///   url: "wss://api.openai.com/v1/realtime"
///   commit_debounce_ms: 0
///
/// audio:
///   sample_rate: 16000
///
/// logging:
///   level: "info"
///
/// session:
///   instructions: "You are a friendly receptionist."
///   voice: "alloy"
/// ```
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct YamlConfig {
    pub providers: Option<ProvidersYaml>,
    pub realtime: Option<RealtimeYaml>,
    pub audio: Option<AudioYaml>,
    pub logging: Option<LoggingYaml>,
    pub session: Option<SessionYaml>,
}

/// Provider API keys from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct ProvidersYaml {
    pub openai_api_key: Option<String>,
}

/// Realtime connection settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct RealtimeYaml {
    pub model: Option<String>,
    pub url: Option<String>,
    pub commit_debounce_ms: Option<u64>,
}

/// Audio device settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AudioYaml {
    pub sample_rate: Option<u32>,
}

/// Logging settings from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct LoggingYaml {
    pub level: Option<String>,
}

/// Session overrides from YAML
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct SessionYaml {
    pub instructions: Option<String>,
    pub voice: Option<String>,
}

impl YamlConfig {
    /// Load configuration from a YAML file
    ///
    /// # Errors
    /// Returns an error if:
    /// - The file cannot be read
    /// - The YAML is malformed
    /// - Fields have invalid types
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;

        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(contents).map_err(ConfigError::Parse)
    }

    pub(super) fn openai_api_key(&self) -> Option<String> {
        self.providers.as_ref()?.openai_api_key.clone()
    }

    pub(super) fn realtime_model(&self) -> Option<String> {
        self.realtime.as_ref()?.model.clone()
    }

    pub(super) fn realtime_url(&self) -> Option<String> {
        self.realtime.as_ref()?.url.clone()
    }

    pub(super) fn commit_debounce_ms(&self) -> Option<u64> {
        self.realtime.as_ref()?.commit_debounce_ms
    }

    pub(super) fn sample_rate(&self) -> Option<u32> {
        self.audio.as_ref()?.sample_rate
    }

    pub(super) fn log_level(&self) -> Option<String> {
        self.logging.as_ref()?.level.clone()
    }

    pub(super) fn session_instructions(&self) -> Option<String> {
        self.session.as_ref()?.instructions.clone()
    }

    pub(super) fn session_voice(&self) -> Option<String> {
        self.session.as_ref()?.voice.clone()
    }
}
