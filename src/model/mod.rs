//! Model backend, selected by the `provider` config knob:
//! enum-dispatch over OpenAI-compatible and Ollama endpoints.
//!
//! Enum dispatch (no `async-trait`, no `Box<dyn>`) over
//! `ChatCompletionRequest`/`ChatCompletionResponse` shapes, with
//! status→error mapping and truncated error-body snippets.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::errors::{Error, OrchResult, VcsError};
use crate::prompt::Prompt;

/// Which backend a [`ModelClient`] talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelKind {
    OpenAiCompatible,
    Ollama,
}

/// Configuration for a model backend.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub kind: ModelKind,
    pub model: String,
    /// Base endpoint, e.g. `https://api.openai.com` or `http://localhost:11434`.
    pub endpoint: String,
    /// Required for `OpenAiCompatible`, unused for `Ollama`.
    pub api_key: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub timeout_secs: u64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            kind: ModelKind::Ollama,
            model: "qwen2.5-coder:7b-instruct".to_string(),
            endpoint: "http://localhost:11434".to_string(),
            api_key: None,
            max_tokens: None,
            temperature: Some(0.2),
            timeout_secs: 120,
        }
    }
}

/// Thin enum client dispatching over supported model backends.
#[derive(Debug, Clone)]
pub enum ModelClient {
    OpenAiCompatible(OpenAiCompatibleClient),
    Ollama(OllamaClient),
}

impl ModelClient {
    pub fn from_config(cfg: ModelConfig) -> OrchResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_secs))
            .build()
            .map_err(Error::from)?;
        Ok(match cfg.kind {
            ModelKind::OpenAiCompatible => {
                Self::OpenAiCompatible(OpenAiCompatibleClient { http, cfg })
            }
            ModelKind::Ollama => Self::Ollama(OllamaClient { http, cfg }),
        })
    }

    /// Generates a completion for the given prompt.
    pub async fn generate(&self, prompt: &Prompt) -> OrchResult<String> {
        match self {
            Self::OpenAiCompatible(c) => c.generate(prompt).await,
            Self::Ollama(c) => c.generate(prompt).await,
        }
    }
}

/// OpenAI-chat-completions-shaped backend: covers hosted OpenAI and
/// self-hosted gateways exposing the same `/v1/chat/completions` contract.
#[derive(Debug, Clone)]
pub struct OpenAiCompatibleClient {
    http: reqwest::Client,
    cfg: ModelConfig,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    content: Option<String>,
}

impl OpenAiCompatibleClient {
    pub async fn generate(&self, prompt: &Prompt) -> OrchResult<String> {
        let api_key = self
            .cfg
            .api_key
            .as_deref()
            .ok_or_else(|| Error::Validation("OpenAiCompatible model requires an api_key".to_string()))?;

        let url = format!("{}/v1/chat/completions", self.cfg.endpoint.trim_end_matches('/'));
        let body = ChatCompletionRequest {
            model: &self.cfg.model,
            messages: vec![
                ChatMessage { role: "system", content: &prompt.system },
                ChatMessage { role: "user", content: &prompt.user },
            ],
            temperature: self.cfg.temperature,
            max_tokens: self.cfg.max_tokens,
        };

        debug!(model = %self.cfg.model, "POST {url}");
        let resp = self
            .http
            .post(&url)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(Error::from)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            error!(status, snippet = %make_snippet(&text), "model endpoint returned non-success status");
            return Err(Error::Vcs(VcsError::HttpStatus(status)));
        }

        let parsed: ChatCompletionResponse = resp.json().await.map_err(Error::from)?;
        parsed
            .choices
            .into_iter()
            .find_map(|c| c.message.content)
            .ok_or_else(|| Error::MalformedModelOutput("no choices in model response".to_string()))
    }
}

/// Local Ollama backend (`POST /api/generate`).
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    cfg: ModelConfig,
}

#[derive(Serialize)]
struct OllamaRequest<'a> {
    model: &'a str,
    prompt: String,
    stream: bool,
}

#[derive(Deserialize)]
struct OllamaResponse {
    response: String,
}

impl OllamaClient {
    pub async fn generate(&self, prompt: &Prompt) -> OrchResult<String> {
        let url = format!("{}/api/generate", self.cfg.endpoint.trim_end_matches('/'));
        let full_prompt = format!("{}\n\n{}", prompt.system, prompt.user);

        debug!(model = %self.cfg.model, "POST {url}");
        let resp = self
            .http
            .post(&url)
            .json(&OllamaRequest {
                model: &self.cfg.model,
                prompt: full_prompt,
                stream: false,
            })
            .send()
            .await
            .map_err(Error::from)?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            error!(status, snippet = %make_snippet(&text), "ollama returned non-success status");
            return Err(Error::Vcs(VcsError::HttpStatus(status)));
        }

        let parsed: OllamaResponse = resp.json().await.map_err(Error::from)?;
        Ok(parsed.response)
    }
}

fn make_snippet(body: &str) -> String {
    const MAX: usize = 300;
    if body.len() <= MAX {
        body.to_string()
    } else {
        format!("{}...", &body[..MAX])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_targets_local_ollama() {
        let cfg = ModelConfig::default();
        assert_eq!(cfg.kind, ModelKind::Ollama);
        assert!(cfg.endpoint.starts_with("http://"));
    }

    #[test]
    fn snippet_truncates_long_bodies() {
        let body = "x".repeat(500);
        let snippet = make_snippet(&body);
        assert!(snippet.len() < 500);
        assert!(snippet.ends_with("..."));
    }
}
