use crate::error::{to_env_var, ConfigError};
use config::{Config, Environment, File};
use polaris::agent::{AgentConfig, DEFAULT_MAX_ROUNDS};
use polaris::providers::configs::{AiConfig, DEFAULT_ENDPOINT, DEFAULT_MODEL};
use polaris::providers::openai::DEFAULT_CHANNEL_CAPACITY;
use serde::Deserialize;
use std::net::{AddrParseError, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_FILE: &str = "polaris.toml";

#[derive(Debug, Deserialize)]
pub struct ServerSettings {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl ServerSettings {
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        format!("{}:{}", self.host, self.port).parse()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatSettings {
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_ms: u64,
    /// Replaces the built-in system prompt template
    #[serde(default)]
    pub system_prompt: Option<PathBuf>,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            timeout_secs: default_timeout_secs(),
            channel_capacity: default_channel_capacity(),
            heartbeat_ms: default_heartbeat_ms(),
            system_prompt: None,
        }
    }
}

impl ChatSettings {
    pub fn agent_config(&self) -> AgentConfig {
        AgentConfig {
            max_rounds: self.max_rounds,
            timeout: Duration::from_secs(self.timeout_secs),
            system_prompt: self.system_prompt.clone(),
        }
    }

    pub fn heartbeat(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ms.max(1))
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ClusterSettings {
    /// JSON snapshot the in-memory cluster cache is loaded from
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,
}

#[derive(Debug, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub ai: AiConfig,
    #[serde(default)]
    pub chat: ChatSettings,
    #[serde(default)]
    pub cluster: ClusterSettings,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load_and_validate()
    }

    fn load_and_validate() -> Result<Self, ConfigError> {
        // An explicitly named file must exist, the default one is optional
        let file = match std::env::var("POLARIS_CONFIG") {
            Ok(path) => File::with_name(&path).required(true),
            Err(_) => File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };

        let config = Config::builder()
            // Server defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?
            // AI defaults
            .set_default("ai.provider", "openai")?
            .set_default("ai.endpoint", DEFAULT_ENDPOINT)?
            .set_default("ai.model", DEFAULT_MODEL)?
            .set_default("ai.enabled", false)?
            // Chat defaults
            .set_default("chat.max_rounds", default_max_rounds() as i64)?
            .set_default("chat.timeout_secs", default_timeout_secs() as i64)?
            .set_default("chat.channel_capacity", default_channel_capacity() as i64)?
            .set_default("chat.heartbeat_ms", default_heartbeat_ms() as i64)?
            .add_source(file)
            // Layer on the environment variables
            .add_source(
                Environment::with_prefix("POLARIS")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        // Try to deserialize the configuration
        let result: Result<Self, config::ConfigError> = config.try_deserialize();

        // Handle missing field errors specially
        match result {
            Ok(settings) => Ok(settings),
            Err(err) => {
                tracing::debug!("Configuration error: {:?}", &err);

                let error_str = err.to_string();
                if error_str.starts_with("missing field") {
                    // Extract field name from error message "missing field `api_key`"
                    let field = error_str
                        .trim_start_matches("missing field `")
                        .trim_end_matches('`');
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else if let config::ConfigError::NotFound(field) = &err {
                    let env_var = to_env_var(field);
                    Err(ConfigError::MissingEnvVar { env_var })
                } else {
                    Err(ConfigError::Other(err))
                }
            }
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_rounds() -> usize {
    DEFAULT_MAX_ROUNDS
}

fn default_timeout_secs() -> u64 {
    120
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_heartbeat_ms() -> u64 {
    500
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    fn clean_env() {
        for (key, _) in env::vars() {
            if key.starts_with("POLARIS_") {
                env::remove_var(&key);
            }
        }
    }

    #[test]
    #[serial]
    fn test_default_settings() {
        clean_env();

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.ai, AiConfig::default());
        assert_eq!(settings.chat.max_rounds, 10);
        assert_eq!(settings.chat.timeout_secs, 120);
        assert_eq!(settings.chat.channel_capacity, 64);
        assert_eq!(settings.chat.heartbeat_ms, 500);
        assert!(settings.cluster.snapshot_path.is_none());
    }

    #[test]
    #[serial]
    fn test_environment_override() {
        clean_env();
        env::set_var("POLARIS_SERVER__PORT", "9090");
        env::set_var("POLARIS_AI__API_KEY", "sk-test");
        env::set_var("POLARIS_AI__ENABLED", "true");
        env::set_var("POLARIS_AI__MODEL", "gpt-4o-mini");
        env::set_var("POLARIS_CHAT__MAX_ROUNDS", "3");
        env::set_var("POLARIS_CLUSTER__SNAPSHOT_PATH", "/var/lib/polaris/clusters.json");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.server.port, 9090);
        assert_eq!(settings.ai.api_key, "sk-test");
        assert!(settings.ai.enabled);
        assert_eq!(settings.ai.model, "gpt-4o-mini");
        assert_eq!(settings.ai.endpoint, DEFAULT_ENDPOINT);
        assert_eq!(settings.chat.agent_config().max_rounds, 3);
        assert_eq!(
            settings.cluster.snapshot_path,
            Some(PathBuf::from("/var/lib/polaris/clusters.json"))
        );

        clean_env();
    }

    #[test]
    #[serial]
    fn test_file_layer() {
        clean_env();
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[ai]\nendpoint = \"http://llm.internal/v1\"\nmodel = \"qwen2\"\n\n[chat]\ntimeout_secs = 30"
        )
        .unwrap();
        env::set_var("POLARIS_CONFIG", file.path());
        env::set_var("POLARIS_AI__MODEL", "llama3");

        let settings = Settings::new().unwrap();
        assert_eq!(settings.ai.endpoint, "http://llm.internal/v1");
        // environment wins over the file
        assert_eq!(settings.ai.model, "llama3");
        assert_eq!(settings.chat.agent_config().timeout, Duration::from_secs(30));

        clean_env();
    }

    #[test]
    #[serial]
    fn test_missing_explicit_file() {
        clean_env();
        env::set_var("POLARIS_CONFIG", "/nonexistent/polaris.toml");
        assert!(matches!(Settings::new(), Err(ConfigError::Other(_))));
        clean_env();
    }

    #[test]
    fn test_socket_addr_conversion() {
        let server_settings = ServerSettings {
            host: "127.0.0.1".to_string(),
            port: 3000,
        };
        let addr = server_settings.socket_addr().unwrap();
        assert_eq!(addr.to_string(), "127.0.0.1:3000");
    }
}
