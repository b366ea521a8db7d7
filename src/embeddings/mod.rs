//! Embedding providers
//!
//! Text goes in, a fixed-length vector comes out. Which provider backs the
//! knowledge base is decided once, from configuration, by [`create_provider`].

pub mod credentials;
pub mod http;
pub mod ollama;
pub mod openai;


use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use crate::KbError;
use crate::config::{Config, ProviderKind};

pub use ollama::OllamaClient;
pub use openai::OpenAiClient;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Provider and model label used in logs
    fn name(&self) -> &str;

    /// Verify the provider is reachable and the configured model is usable
    async fn health_check(&self) -> Result<()>;

    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed every text, returning exactly one vector per input in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }
}

/// Build the provider selected in `config`
///
/// `openai_key` is only consulted for the OpenAI provider, where it is required.
#[inline]
pub fn create_provider(
    config: &Config,
    openai_key: Option<String>,
) -> crate::Result<Arc<dyn EmbeddingProvider>> {
    let timeout = config.embedding_timeout();
    let batch_size = config.embedding.batch_size;

    let provider: Arc<dyn EmbeddingProvider> = match config.embedding.provider {
        ProviderKind::OpenAi => {
            let key = openai_key.filter(|k| !k.trim().is_empty()).ok_or_else(|| {
                KbError::Config(
                    "No OpenAI API key configured. Store one with `postkb key set openai <name>` \
                     or set OPENAI_API_KEY"
                        .to_string(),
                )
            })?;
            Arc::new(
                OpenAiClient::new(&config.embedding.openai, key, batch_size)
                    .map_err(|e| KbError::Config(format!("{e:#}")))?
                    .with_timeout(timeout),
            )
        }
        ProviderKind::Ollama => Arc::new(
            OllamaClient::new(&config.embedding.ollama, batch_size)
                .map_err(|e| KbError::Config(format!("{e:#}")))?
                .with_timeout(timeout),
        ),
    };

    info!("Using embedding provider {}", provider.name());
    Ok(provider)
}
