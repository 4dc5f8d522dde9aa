use serde::{Deserialize, Serialize};
use std::str::FromStr;
use strum_macros::{Display, EnumIter, EnumString};

use crate::errors::ConfigError;

pub const DEFAULT_ENDPOINT: &str = "https://api.openai.com/v1";
pub const DEFAULT_MODEL: &str = "gpt-4o";

/// Shown in place of a stored API key
pub const MASKED_API_KEY: &str = "******";

/// Backends that speak the openai chat-completions protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum ProviderType {
    OpenAi,
    Azure,
    Ollama,
    DeepSeek,
    Custom,
}

/// Connection settings for the assistant's LLM backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    pub provider: String,
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub enabled: bool,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            provider: ProviderType::OpenAi.to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            api_key: String::new(),
            model: DEFAULT_MODEL.to_string(),
            enabled: false,
        }
    }
}

impl AiConfig {
    pub fn provider_type(&self) -> Result<ProviderType, ConfigError> {
        ProviderType::from_str(self.provider.trim())
            .map_err(|_| ConfigError::UnsupportedProvider(self.provider.clone()))
    }

    /// Check the config can serve a chat request
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.enabled {
            return Err(ConfigError::Disabled);
        }
        self.validate_connection()
    }

    /// Check the config can reach an endpoint, whether or not chat is enabled
    pub fn validate_connection(&self) -> Result<(), ConfigError> {
        self.provider_type()?;
        if self.endpoint.trim().is_empty() {
            return Err(ConfigError::MissingEndpoint);
        }
        if self.api_key.is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        Ok(())
    }

    /// A copy safe to hand back to clients
    pub fn masked(&self) -> Self {
        let api_key = if self.api_key.is_empty() {
            String::new()
        } else {
            MASKED_API_KEY.to_string()
        };
        Self {
            api_key,
            ..self.clone()
        }
    }
}
