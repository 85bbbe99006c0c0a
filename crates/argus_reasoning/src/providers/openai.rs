//! OpenAI-compatible provider: `/chat/completions` plus `/embeddings`.
//! Works against OpenAI itself and self-hosted gateways (Ollama, vLLM) that
//! speak the same surface.

use crate::llm::LlmClient;
use anyhow::{Context, Result};
use argus_core::config::AiConfig;
use argus_core::{retry_with_backoff, ArgusError, RetrySchedule};
use reqwest::Client;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub struct OpenAiClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    embed_model: String,
    embed_dim: usize,
    retry: RetrySchedule,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatRequestMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatRequestMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
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

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl OpenAiClient {
    pub fn new(cfg: &AiConfig) -> Result<Self> {
        Ok(Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(60))
                .build()
                .context("Failed to build HTTP client")?,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key: cfg.api_key.clone(),
            model: cfg.model.clone(),
            embed_model: cfg.embed_model.clone(),
            embed_dim: cfg.embed_dim,
            retry: RetrySchedule::default(),
        })
    }

    fn request(&self, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(format!("{}{}", self.base_url, path));
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    async fn complete_once(&self, system: &str, user: &str) -> Result<String> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatRequestMessage {
                    role: "system",
                    content: system,
                },
                ChatRequestMessage {
                    role: "user",
                    content: user,
                },
            ],
            temperature: 0.2,
            max_tokens: 1_024,
        };

        let response = self
            .request("/chat/completions")
            .json(&body)
            .send()
            .await
            .context("Failed to send chat completion request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(ArgusError::upstream(status.as_u16()))
                .context(format!("chat completion failed: {}", truncate(&error_text, 200))));
        }

        let parsed: ChatResponse = response
            .json()
            .await
            .context("Failed to parse chat completion response")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .context("chat completion response had no content")
    }

    async fn embed_once(&self, text: &str) -> Result<Vec<f32>> {
        let body = EmbeddingRequest {
            model: &self.embed_model,
            input: vec![text],
        };

        let response = self
            .request("/embeddings")
            .json(&body)
            .send()
            .await
            .context("Failed to send embedding request")?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(anyhow::Error::new(ArgusError::upstream(status.as_u16()))
                .context(format!("embedding failed: {}", truncate(&error_text, 200))));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;
        let vector = parsed
            .data
            .into_iter()
            .next()
            .map(|r| r.embedding)
            .context("embedding response had no data")?;

        if vector.len() != self.embed_dim {
            anyhow::bail!(
                "embedding dimension {} does not match configured {}",
                vector.len(),
                self.embed_dim
            );
        }
        Ok(vector)
    }
}

#[async_trait::async_trait]
impl LlmClient for OpenAiClient {
    #[tracing::instrument(skip(self, system, user), fields(model = %self.model))]
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        retry_with_backoff("chat_completion", &self.retry, || {
            self.complete_once(system, user)
        })
        .await
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        retry_with_backoff("embedding", &self.retry, || self.embed_once(text)).await
    }

    fn embed_dim(&self) -> usize {
        self.embed_dim
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}
