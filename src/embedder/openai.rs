//! OpenAI-compatible embeddings client.

use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{EmbeddingService, IndexedEmbedding};

/// Default API root.
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
/// Default embedding model.
pub const DEFAULT_MODEL: &str = "text-embedding-ada-002";

/// Blocking embeddings client. Makes a single attempt per call; retries are
/// left to [`super::EmbeddingBatcher`].
#[derive(Clone)]
pub struct OpenAiEmbedder {
    client: Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

impl OpenAiEmbedder {
    /// Builds a client with bearer auth and a request timeout.
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: String,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self> {
        anyhow::ensure!(!api_key.trim().is_empty(), "missing OpenAI API key");
        anyhow::ensure!(!model.trim().is_empty(), "missing OpenAI model name");
        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth).context("invalid OpenAI API key")?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        let client = Client::builder()
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("failed to build OpenAI HTTP client")?;
        let endpoint = format!("{}/embeddings", base_url.trim_end_matches('/'));
        Ok(Self {
            client,
            endpoint,
            model,
            dimensions,
        })
    }

    /// Configured model name.
    pub fn model(&self) -> &str {
        &self.model
    }
}

impl EmbeddingService for OpenAiEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<IndexedEmbedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .context("OpenAI embeddings request failed")?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp
                .text()
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            anyhow::bail!("OpenAI embeddings request failed ({}): {}", status, body);
        }
        let parsed: EmbeddingResponse = resp
            .json()
            .context("failed to parse OpenAI embedding response")?;
        Ok(parsed
            .data
            .into_iter()
            .map(|entry| IndexedEmbedding {
                index: entry.index,
                embedding: entry.embedding,
            })
            .collect())
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    #[serde(borrow)]
    input: &'a [&'a str],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_blank_credentials() {
        let result = OpenAiEmbedder::new(
            "  ",
            DEFAULT_BASE_URL,
            DEFAULT_MODEL.to_string(),
            None,
            Duration::from_secs(5),
        );
        assert!(result.is_err());
    }

    #[test]
    fn request_omits_unset_dimensions() {
        let inputs = ["a", "b"];
        let body = serde_json::to_value(EmbeddingRequest {
            model: DEFAULT_MODEL,
            input: &inputs,
            dimensions: None,
        })
        .expect("serialize");
        assert_eq!(body["input"][1], "b");
        assert!(body.get("dimensions").is_none());
    }

    #[test]
    fn response_keeps_reported_indices() {
        let parsed: EmbeddingResponse = serde_json::from_str(
            r#"{"data":[{"embedding":[0.5],"index":1},{"embedding":[0.25],"index":0}]}"#,
        )
        .expect("parse");
        assert_eq!(parsed.data[0].index, 1);
        assert_eq!(parsed.data[1].embedding, vec![0.25]);
    }
}
