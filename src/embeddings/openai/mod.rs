//! OpenAI-compatible embeddings endpoint


use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::EmbeddingProvider;
use super::http::HttpClient;
use crate::config::OpenAiConfig;

const DEFAULT_TIMEOUT_SECONDS: u64 = 30;

#[derive(Clone)]
pub struct OpenAiClient {
    base_url: String,
    model: String,
    api_key: String,
    batch_size: u32,
    label: String,
    http: HttpClient,
}

impl std::fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &"****")
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

impl OpenAiClient {
    #[inline]
    pub fn new(config: &OpenAiConfig, api_key: String, batch_size: u32) -> Result<Self> {
        Url::parse(&config.base_url)
            .with_context(|| format!("Invalid OpenAI base URL: {}", config.base_url))?;

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key,
            batch_size: batch_size.max(1),
            label: format!("openai/{}", config.model),
            http: HttpClient::new(Duration::from_secs(DEFAULT_TIMEOUT_SECONDS)),
        })
    }

    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.http = self.http.with_timeout(timeout);
        self
    }

    #[inline]
    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// List models with the configured key; proves both reachability and auth
    #[inline]
    pub fn check_health(&self) -> Result<()> {
        let url = format!("{}/models", self.base_url);
        debug!("Performing health check against {}", url);

        self.http
            .get_text(&url, Some(&self.api_key))
            .context("Failed to reach the OpenAI models endpoint")?;

        info!("Health check passed for {} at {}", self.label, self.base_url);
        Ok(())
    }

    /// Embed `texts` in chunks of `batch_size`; any failing chunk fails the call
    #[inline]
    pub fn generate_embeddings(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut results = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size as usize) {
            let vectors = self
                .generate_single_batch(chunk)
                .with_context(|| format!("Failed to process batch of {} texts", chunk.len()))?;
            results.extend(vectors);
        }

        debug!("Generated {} embeddings total", results.len());
        Ok(results)
    }

    fn generate_single_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);
        let request_json = serde_json::to_string(&EmbeddingsRequest {
            model: &self.model,
            input: texts,
        })
        .context("Failed to serialize embedding request")?;

        let response_text = self
            .http
            .post_json(&url, &request_json, Some(&self.api_key))
            .context("Failed to generate embeddings")?;

        let mut response: EmbeddingsResponse =
            serde_json::from_str(&response_text).context("Failed to parse embedding response")?;

        if response.data.len() != texts.len() {
            return Err(anyhow::anyhow!(
                "Mismatch between request and response counts: {} vs {}",
                texts.len(),
                response.data.len()
            ));
        }

        response.data.sort_by_key(|d| d.index);
        Ok(response.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiClient {
    fn name(&self) -> &str {
        &self.label
    }

    async fn health_check(&self) -> Result<()> {
        let client = self.clone();
        tokio::task::spawn_blocking(move || client.check_health())
            .await
            .context("OpenAI health check task failed")?
    }

    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| anyhow::anyhow!("OpenAI returned no embedding"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let client = self.clone();
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || client.generate_embeddings(&texts))
            .await
            .context("OpenAI embedding task failed")?
    }
}
