//! Model provider abstraction used for story continuation, option
//! generation and preview summaries.

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// Incremental text from a provider, in generation order
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Sampling parameters passed to a provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationConfig {
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
    pub top_p: Option<f32>,
    pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelResponse {
    pub content: String,
    pub model: String,
    pub usage: Option<TokenUsage>,
    pub finish_reason: Option<String>,
    /// Text a reasoning model emitted inside `<think>` tags
    pub reasoning: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderMetadata {
    pub name: String,
    pub supported_models: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderKind {
    Mock,
    #[cfg(feature = "ollama")]
    Ollama,
}

impl ProviderKind {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "mock" => Some(ProviderKind::Mock),
            #[cfg(feature = "ollama")]
            "ollama" => Some(ProviderKind::Ollama),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Mock => "mock",
            #[cfg(feature = "ollama")]
            ProviderKind::Ollama => "ollama",
        }
    }
}

#[async_trait]
pub trait ModelProvider: Send + Sync {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<ModelResponse>;

    /// Like `generate`, but yields content as it is produced. Reasoning
    /// blocks are not part of the stream.
    async fn stream(&self, prompt: &str, config: &GenerationConfig) -> Result<TextStream>;

    fn metadata(&self) -> ProviderMetadata;

    fn kind(&self) -> ProviderKind;
}

/// Split `<think>...</think>` blocks out of a model response.
///
/// Returns `(reasoning, content)`; content is trimmed.
pub fn parse_thinking_tokens(raw: &str) -> (Option<String>, String) {
    const OPEN: &str = "<think>";
    const CLOSE: &str = "</think>";

    let Some(start) = raw.find(OPEN) else {
        return (None, raw.trim().to_string());
    };
    let after_open = start + OPEN.len();
    match raw[after_open..].find(CLOSE) {
        Some(rel_end) => {
            let end = after_open + rel_end;
            let reasoning = raw[after_open..end].trim().to_string();
            let mut content = String::with_capacity(raw.len());
            content.push_str(&raw[..start]);
            content.push_str(&raw[end + CLOSE.len()..]);
            let reasoning = (!reasoning.is_empty()).then_some(reasoning);
            (reasoning, content.trim().to_string())
        }
        // Unterminated block: everything after the tag is reasoning.
        None => {
            let reasoning = raw[after_open..].trim().to_string();
            (
                (!reasoning.is_empty()).then_some(reasoning),
                raw[..start].trim().to_string(),
            )
        }
    }
}
