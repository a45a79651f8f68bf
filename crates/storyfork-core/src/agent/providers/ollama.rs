//! Ollama provider for local story generation.

use crate::agent::model::{
    parse_thinking_tokens, GenerationConfig, ModelProvider, ModelResponse, ProviderKind,
    ProviderMetadata, TextStream, TokenUsage,
};
use anyhow::{anyhow, Result};
use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_MODEL: &str = "llama3";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(120);
const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaChatRequest {
    model: String,
    messages: Vec<Message>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<OllamaOptions>,
}

#[derive(Debug, Clone, Serialize)]
struct OllamaOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: MessageResponse,
    #[serde(default)]
    done: bool,
    prompt_eval_count: Option<u32>,
    eval_count: Option<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct MessageResponse {
    #[serde(default)]
    content: String,
}

#[derive(Debug, Clone)]
pub struct OllamaProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    system_message: Option<String>,
}

impl OllamaProvider {
    pub fn new() -> Self {
        Self::with_base_url(DEFAULT_OLLAMA_URL)
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: DEFAULT_MODEL.to_string(),
            system_message: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// System message sent ahead of every prompt
    pub fn with_system_message(mut self, message: impl Into<String>) -> Self {
        self.system_message = Some(message.into());
        self
    }

    fn build_request(
        &self,
        prompt: &str,
        config: &GenerationConfig,
        stream: bool,
    ) -> OllamaChatRequest {
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = &self.system_message {
            messages.push(Message {
                role: "system".to_string(),
                content: system.clone(),
            });
        }
        messages.push(Message {
            role: "user".to_string(),
            content: prompt.to_string(),
        });

        let options = (config.temperature.is_some()
            || config.max_tokens.is_some()
            || config.top_p.is_some()
            || config.stop_sequences.is_some())
        .then(|| OllamaOptions {
            temperature: config.temperature,
            num_predict: config.max_tokens,
            top_p: config.top_p,
            stop: config.stop_sequences.clone(),
        });

        OllamaChatRequest {
            model: self.model.clone(),
            messages,
            stream,
            options,
        }
    }

    fn chat_url(&self) -> String {
        format!("{}/api/chat", self.base_url)
    }
}

/// Drops `<think>` blocks from streamed text. Text is held back while a
/// block might still be opening or closing across chunk boundaries.
#[derive(Debug, Default)]
struct ThinkFilter {
    pending: String,
    in_think: bool,
}

impl ThinkFilter {
    fn push(&mut self, text: &str) -> String {
        self.pending.push_str(text);
        let mut out = String::new();
        loop {
            if self.in_think {
                match self.pending.find(THINK_CLOSE) {
                    Some(end) => {
                        self.pending.drain(..end + THINK_CLOSE.len());
                        self.in_think = false;
                    }
                    None => break,
                }
            } else {
                match self.pending.find(THINK_OPEN) {
                    Some(start) => {
                        out.push_str(&self.pending[..start]);
                        self.pending.drain(..start + THINK_OPEN.len());
                        self.in_think = true;
                    }
                    None => {
                        let keep = partial_tag_len(&self.pending, THINK_OPEN);
                        let emit = self.pending.len() - keep;
                        out.push_str(&self.pending[..emit]);
                        self.pending.drain(..emit);
                        break;
                    }
                }
            }
        }
        out
    }

    /// Whatever is left once the stream ends; an unterminated block is dropped.
    fn finish(&mut self) -> String {
        if self.in_think {
            self.pending.clear();
            return String::new();
        }
        std::mem::take(&mut self.pending)
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`.
fn partial_tag_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}

impl Default for OllamaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelProvider for OllamaProvider {
    async fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<ModelResponse> {
        let request = self.build_request(prompt, config, false);

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Ollama API request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!("Ollama API error ({}): {}", status, error_text));
        }

        let api_response: OllamaChatResponse = response
            .json()
            .await
            .map_err(|e| anyhow!("Failed to parse Ollama response: {}", e))?;

        let (reasoning, content) = parse_thinking_tokens(&api_response.message.content);

        let usage = match (api_response.prompt_eval_count, api_response.eval_count) {
            (None, None) => None,
            (prompt_tokens, completion_tokens) => {
                let prompt_tokens = prompt_tokens.unwrap_or(0);
                let completion_tokens = completion_tokens.unwrap_or(0);
                Some(TokenUsage {
                    prompt_tokens,
                    completion_tokens,
                    total_tokens: prompt_tokens + completion_tokens,
                })
            }
        };

        Ok(ModelResponse {
            content,
            model: self.model.clone(),
            usage,
            finish_reason: api_response.done.then(|| "stop".to_string()),
            reasoning,
        })
    }

    async fn stream(&self, prompt: &str, config: &GenerationConfig) -> Result<TextStream> {
        let request = self.build_request(prompt, config, true);

        let response = self
            .client
            .post(self.chat_url())
            .json(&request)
            .send()
            .await
            .map_err(|e| anyhow!("Ollama streaming API request failed: {}", e))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "Ollama streaming API error ({}): {}",
                status,
                error_text
            ));
        }

        let mut bytes = Box::pin(response.bytes_stream());
        let stream = stream! {
            // Ollama sends newline-delimited JSON
            let mut line_buffer = String::new();
            let mut filter = ThinkFilter::default();
            'read: while let Some(result) = bytes.next().await {
                let chunk = match result {
                    Ok(chunk) => chunk,
                    Err(e) => {
                        yield Err(anyhow!("Ollama stream error: {}", e));
                        return;
                    }
                };
                line_buffer.push_str(&String::from_utf8_lossy(&chunk));

                while let Some(newline) = line_buffer.find('\n') {
                    let line: String = line_buffer.drain(..=newline).collect();
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    let parsed = match serde_json::from_str::<OllamaChatResponse>(line) {
                        Ok(parsed) => parsed,
                        Err(e) => {
                            yield Err(anyhow!("Failed to parse Ollama stream chunk: {}", e));
                            return;
                        }
                    };
                    let text = filter.push(&parsed.message.content);
                    if !text.is_empty() {
                        yield Ok(text);
                    }
                    if parsed.done {
                        break 'read;
                    }
                }
            }
            let rest = filter.finish();
            if !rest.is_empty() {
                yield Ok(rest);
            }
        };
        Ok(Box::pin(stream))
    }

    fn metadata(&self) -> ProviderMetadata {
        ProviderMetadata {
            name: "Ollama".to_string(),
            supported_models: vec![
                "llama3".to_string(),
                "mistral".to_string(),
                "mixtral".to_string(),
                "gemma".to_string(),
                "qwen2".to_string(),
            ],
        }
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Ollama
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_defaults() {
        let provider = OllamaProvider::new();
        assert_eq!(provider.base_url, DEFAULT_OLLAMA_URL);
        assert_eq!(provider.model, DEFAULT_MODEL);
        assert_eq!(provider.kind(), ProviderKind::Ollama);
    }

    #[test]
    fn test_chat_url_strips_trailing_slash() {
        let provider = OllamaProvider::with_base_url("http://gpu-box:11434/");
        assert_eq!(provider.chat_url(), "http://gpu-box:11434/api/chat");
    }

    #[test]
    fn test_build_request() {
        let provider = OllamaProvider::new()
            .with_model("mistral")
            .with_system_message("You are a novelist.");
        let config = GenerationConfig {
            temperature: Some(0.9),
            max_tokens: Some(800),
            ..Default::default()
        };

        let request = provider.build_request("Continue.", &config, false);
        assert_eq!(request.model, "mistral");
        assert!(!request.stream);
        assert_eq!(request.messages.len(), 2);
        assert_eq!(request.messages[0].role, "system");
        assert_eq!(request.messages[1].content, "Continue.");
        let options = request.options.unwrap();
        assert_eq!(options.temperature, Some(0.9));
        assert_eq!(options.num_predict, Some(800));
    }

    #[test]
    fn test_build_request_without_options() {
        let provider = OllamaProvider::new();
        let request = provider.build_request("Hi", &GenerationConfig::default(), true);
        assert!(request.stream);
        assert!(request.options.is_none());
        assert_eq!(request.messages.len(), 1);
    }

    #[test]
    fn test_think_filter_across_chunks() {
        let mut filter = ThinkFilter::default();
        let mut out = String::new();
        for piece in ["Intro <th", "ink>plan the", " scene</thi", "nk> The door", " opens. <"] {
            out.push_str(&filter.push(piece));
        }
        out.push_str(&filter.finish());
        assert_eq!(out, "Intro  The door opens. <");
    }

    #[test]
    fn test_think_filter_drops_unterminated_block() {
        let mut filter = ThinkFilter::default();
        assert_eq!(filter.push("Hello <think>still going"), "Hello ");
        assert_eq!(filter.finish(), "");
    }
}
