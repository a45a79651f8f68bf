//! Provider Factory
//!
//! Creates model provider instances based on configuration.

use crate::agent::model::{GenerationConfig, ModelProvider, ProviderKind};
use crate::agent::providers::MockProvider;
use anyhow::{anyhow, Result};
use std::sync::Arc;
use storyfork_config::config::ModelConfig;

/// Create a model provider from configuration
pub fn create_provider(config: &ModelConfig) -> Result<Arc<dyn ModelProvider>> {
    let kind = ProviderKind::from_str(&config.provider)
        .ok_or_else(|| anyhow!("Unknown provider: {}", config.provider))?;

    match kind {
        ProviderKind::Mock => {
            let mut provider = match &config.mock_response {
                Some(text) => MockProvider::new(text.clone()),
                None => MockProvider::default(),
            };
            if let Some(model_name) = &config.model_name {
                provider = provider.with_model_name(model_name.clone());
            }
            Ok(Arc::new(provider))
        }

        #[cfg(feature = "ollama")]
        ProviderKind::Ollama => {
            use crate::agent::providers::OllamaProvider;

            let mut provider = match &config.base_url {
                Some(url) => OllamaProvider::with_base_url(url.clone()),
                None => OllamaProvider::new(),
            };
            if let Some(model_name) = &config.model_name {
                provider = provider.with_model(model_name.clone());
            }
            Ok(Arc::new(
                provider.with_system_message(crate::engine::prompt::STORY_SYSTEM_PROMPT),
            ))
        }
    }
}

/// Sampling parameters derived from the `[model]` config section
pub fn generation_config(config: &ModelConfig) -> GenerationConfig {
    GenerationConfig {
        temperature: config.temperature,
        max_tokens: config.max_tokens,
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_provider() {
        let config = ModelConfig {
            provider: "mock".to_string(),
            model_name: Some("test-model".to_string()),
            ..Default::default()
        };

        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Mock);
        assert_eq!(provider.metadata().supported_models, vec!["test-model"]);
    }

    #[cfg(feature = "ollama")]
    #[test]
    fn test_create_ollama_provider() {
        let config = ModelConfig {
            provider: "ollama".to_string(),
            base_url: Some("http://localhost:11434".to_string()),
            ..Default::default()
        };
        let provider = create_provider(&config).unwrap();
        assert_eq!(provider.kind(), ProviderKind::Ollama);
    }

    #[test]
    fn test_create_unknown_provider() {
        let config = ModelConfig {
            provider: "unknown-provider".to_string(),
            ..Default::default()
        };
        assert!(create_provider(&config).is_err());
    }

    #[test]
    fn test_generation_config_from_model_section() {
        let config = ModelConfig {
            temperature: Some(0.5),
            max_tokens: Some(512),
            ..Default::default()
        };
        let generation = generation_config(&config);
        assert_eq!(generation.temperature, Some(0.5));
        assert_eq!(generation.max_tokens, Some(512));
    }
}
