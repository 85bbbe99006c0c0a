//! Deterministic scripted provider for tests. Completions are consumed from
//! a queue; an empty queue (or the unreachable flag) fails the call so the
//! tier orchestrator exercises its fallback path.

use crate::llm::LlmClient;
use anyhow::Result;
use argus_core::ArgusError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;

pub struct MockLlm {
    completions: Mutex<VecDeque<Result<String, u16>>>,
    unreachable: AtomicBool,
    fail_embeddings: AtomicBool,
    completion_calls: AtomicU32,
    embed_calls: AtomicU32,
    embed_dim: usize,
}

impl Default for MockLlm {
    fn default() -> Self {
        Self::new()
    }
}

impl MockLlm {
    pub fn new() -> Self {
        Self::with_dim(768)
    }

    pub fn with_dim(embed_dim: usize) -> Self {
        Self {
            completions: Mutex::new(VecDeque::new()),
            unreachable: AtomicBool::new(false),
            fail_embeddings: AtomicBool::new(false),
            completion_calls: AtomicU32::new(0),
            embed_calls: AtomicU32::new(0),
            embed_dim,
        }
    }

    /// Queue a successful completion response.
    pub fn queue_completion(&self, text: &str) {
        self.completions.lock().unwrap().push_back(Ok(text.to_string()));
    }

    /// Queue an upstream HTTP failure with the given status.
    pub fn queue_error(&self, status: u16) {
        self.completions.lock().unwrap().push_back(Err(status));
    }

    /// Simulate the provider being unreachable: every call fails.
    pub fn set_unreachable(&self, on: bool) {
        self.unreachable.store(on, Ordering::SeqCst);
    }

    pub fn set_fail_embeddings(&self, on: bool) {
        self.fail_embeddings.store(on, Ordering::SeqCst);
    }

    pub fn completion_calls(&self) -> u32 {
        self.completion_calls.load(Ordering::SeqCst)
    }

    pub fn embed_calls(&self) -> u32 {
        self.embed_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl LlmClient for MockLlm {
    async fn complete(&self, _system: &str, _user: &str) -> Result<String> {
        self.completion_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("tcp connect error: connection refused"));
        }
        match self.completions.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(text),
            Some(Err(status)) => Err(ArgusError::upstream(status).into()),
            None => Err(ArgusError::upstream(500).into()),
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_calls.fetch_add(1, Ordering::SeqCst);
        if self.unreachable.load(Ordering::SeqCst) || self.fail_embeddings.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("embedding endpoint unavailable"));
        }
        // Deterministic pseudo-embedding derived from the text.
        let mut seed: u64 = 0xcbf2_9ce4_8422_2325;
        for b in text.bytes() {
            seed ^= b as u64;
            seed = seed.wrapping_mul(0x0000_0100_0000_01b3);
        }
        let vector: Vec<f32> = (0..self.embed_dim)
            .map(|i| {
                let x = seed.wrapping_mul(i as u64 + 1) % 1_000;
                (x as f32 / 1_000.0) - 0.5
            })
            .collect();
        Ok(vector)
    }

    fn embed_dim(&self) -> usize {
        self.embed_dim
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_queue_order() {
        let mock = MockLlm::new();
        mock.queue_completion("first");
        mock.queue_error(429);
        assert_eq!(mock.complete("", "").await.unwrap(), "first");
        assert!(mock.complete("", "").await.is_err());
        // Exhausted queue also fails.
        assert!(mock.complete("", "").await.is_err());
        assert_eq!(mock.completion_calls(), 3);
    }

    #[tokio::test]
    async fn test_mock_embedding_deterministic() {
        let mock = MockLlm::new();
        let a = mock.embed("goa trip").await.unwrap();
        let b = mock.embed("goa trip").await.unwrap();
        let c = mock.embed("netflix").await.unwrap();
        assert_eq!(a.len(), 768);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
