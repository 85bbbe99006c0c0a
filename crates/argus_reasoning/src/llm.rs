use anyhow::Result;
use async_trait::async_trait;

/// The two provider RPCs the core depends on: a chat completion returning
/// JSON-bearing text and an embedding returning a fixed-dimension vector.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a chat completion request and return the raw response text.
    async fn complete(&self, system: &str, user: &str) -> Result<String>;

    /// Embed a text. The returned vector length must equal the configured
    /// embedding dimension.
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    fn embed_dim(&self) -> usize;
}
