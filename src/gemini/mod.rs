mod client;

pub use client::GeminiClient;

use async_trait::async_trait;

use crate::error::ServiceResult;

/// Turns text into a fixed-length vector.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    /// Length of every vector `embed_text` returns.
    fn dimensions(&self) -> usize;
    async fn embed_text(&self, text: &str) -> ServiceResult<Vec<f32>>;
}

#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, prompt: &str) -> ServiceResult<String>;
}
