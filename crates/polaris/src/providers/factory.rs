use std::sync::Arc;

use super::{base::Provider, configs::AiConfig, openai::OpenAiProvider};
use crate::errors::{ConfigError, ProviderError};

/// Why a provider could not be built
#[derive(Debug, thiserror::Error)]
pub enum FactoryError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Build a provider for a validated config
///
/// Every supported backend speaks the openai chat-completions protocol, so
/// they share one client.
pub fn get_provider(
    config: &AiConfig,
    channel_capacity: usize,
) -> Result<Arc<dyn Provider>, FactoryError> {
    config.validate_connection()?;
    let provider = OpenAiProvider::new(config.clone())?.with_channel_capacity(channel_capacity);
    Ok(Arc::new(provider))
}
