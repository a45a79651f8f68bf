//! Deterministic provider for tests and offline development.

use crate::agent::model::{
    GenerationConfig, ModelProvider, ModelResponse, ProviderKind, ProviderMetadata, TextStream,
};
use anyhow::{anyhow, Result};
use async_stream::stream;
use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MockProvider {
    responses: Vec<String>,
    cursor: Arc<AtomicUsize>,
    model_name: String,
    failing: bool,
    delay: Option<Duration>,
    stream_failure_after: Option<usize>,
    prompts: Arc<Mutex<Vec<String>>>,
}

impl MockProvider {
    pub fn new(response: impl Into<String>) -> Self {
        Self::with_responses(vec![response.into()])
    }

    /// Responses are returned in order, cycling once exhausted
    pub fn with_responses(responses: Vec<String>) -> Self {
        Self {
            responses,
            cursor: Arc::new(AtomicUsize::new(0)),
            model_name: "mock-model".to_string(),
            failing: false,
            delay: None,
            stream_failure_after: None,
            prompts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every call fails, as an unreachable provider would
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::default()
        }
    }

    pub fn with_model_name(mut self, name: impl Into<String>) -> Self {
        self.model_name = name.into();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Streams break off with an error after `chunks` chunks
    pub fn with_stream_failure_after(mut self, chunks: usize) -> Self {
        self.stream_failure_after = Some(chunks);
        self
    }

    /// Prompts received so far
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .map(|prompts| prompts.clone())
            .unwrap_or_default()
    }
}

impl MockProvider {
    async fn next_response(&self, prompt: &str) -> Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing {
            return Err(anyhow!("mock provider unavailable"));
        }

        if self.responses.is_empty() {
            return Ok(String::new());
        }
        let index = self.cursor.fetch_add(1, Ordering::SeqCst) % self.responses.len();
        Ok(self.responses[index].clone())
    }
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new("The story continues.")
    }
}

#[async_trait]
impl ModelProvider for MockProvider {
    async fn generate(&self, prompt: &str, _config: &GenerationConfig) -> Result<ModelResponse> {
        let content = self.next_response(prompt).await?;

        Ok(ModelResponse {
            content,
            model: self.model_name.clone(),
            usage: None,
            finish_reason: Some("stop".to_string()),
            reasoning: None,
        })
    }

    /// Streams the next response word by word.
    async fn stream(&self, prompt: &str, _config: &GenerationConfig) -> Result<TextStream> {
        let content = self.next_response(prompt).await?;
        let chunks: Vec<String> = content.split_inclusive(' ').map(str::to_string).collect();
        let fail_after = self.stream_failure_after;

        Ok(Box::pin(stream! {
            for (index, chunk) in chunks.into_iter().enumerate() {
                if fail_after == Some(index) {
                    yield Err(anyhow!("mock stream interrupted"));
                    return;
                }
                yield Ok(chunk);
            }
        }))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "Mock".to_string(),
            supported_models: vec![self.model_name.clone()],
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Mock
    }
}
