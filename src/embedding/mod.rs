//! Text embeddings for semantic novelty checks.
//!
//! The Archivist embeds each candidate's signature and compares it against
//! the stored vectors of topics in the same category using
//! [`cosine_similarity`].

use std::time::Duration;

use async_trait::async_trait;
use ndarray::Array1;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::EmbeddingError;
use crate::llm::api_error_message;

/// Default OpenAI endpoint for embeddings and speech.
pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Default embedding model.
pub const DEFAULT_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Vector width produced by [`DEFAULT_EMBEDDING_MODEL`].
pub const DEFAULT_EMBEDDING_DIMENSIONS: usize = 1536;

/// Largest number of inputs sent in one request.
pub const MAX_BATCH_SIZE: usize = 100;

/// Inputs longer than this are truncated before embedding.
pub const MAX_INPUT_CHARS: usize = 8000;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// A provider that turns strings into fixed-width vectors.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embeds every input, returning vectors in input order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    /// Embeds a single string.
    async fn embed_one(&self, input: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[input.to_string()]).await?;
        vectors.pop().ok_or(EmbeddingError::CountMismatch {
            expected: 1,
            actual: 0,
        })
    }
}

/// Normalizes text before it is sent to the embedding API.
///
/// Newlines become spaces, surrounding whitespace is trimmed, and the result
/// is cut to [`MAX_INPUT_CHARS`] characters.
pub fn prepare_text(text: &str) -> String {
    let flattened = text.replace(['\r', '\n'], " ");
    flattened.trim().chars().take(MAX_INPUT_CHARS).collect()
}

/// Cosine similarity of two vectors, in [-1, 1].
///
/// Returns 0.0 when either vector has (near) zero norm or when the lengths
/// differ, so a malformed stored vector never matches anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let a: Array1<f64> = a.iter().map(|&x| f64::from(x)).collect();
    let b: Array1<f64> = b.iter().map(|&x| f64::from(x)).collect();

    let dot_product = a.dot(&b);
    let norm_a = a.dot(&a).sqrt();
    let norm_b = b.dot(&b).sqrt();

    if norm_a < 1e-10 || norm_b < 1e-10 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}

/// Client for the OpenAI `/embeddings` endpoint.
pub struct OpenAiEmbeddingClient {
    api_base: String,
    api_key: String,
    model: String,
    dimensions: usize,
    http_client: Client,
}

impl std::fmt::Debug for OpenAiEmbeddingClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAiEmbeddingClient")
            .field("api_base", &self.api_base)
            .field("model", &self.model)
            .field("dimensions", &self.dimensions)
            .finish_non_exhaustive()
    }
}

impl OpenAiEmbeddingClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .unwrap_or_else(|_| Client::new());

        Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
            model: DEFAULT_EMBEDDING_MODEL.to_string(),
            dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            http_client,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_dimensions(mut self, dimensions: usize) -> Self {
        self.dimensions = dimensions;
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    async fn embed_batch(&self, batch: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: batch.iter().map(|s| prepare_text(s)).collect(),
            dimensions: self.dimensions,
        };

        let response = self
            .http_client
            .post(format!("{}/embeddings", self.api_base))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| EmbeddingError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = api_error_message(&body);
            if status.as_u16() == 429 {
                return Err(EmbeddingError::RateLimited(message));
            }
            return Err(EmbeddingError::ApiError {
                code: status.as_u16(),
                message,
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbeddingError::ParseError(e.to_string()))?;

        if parsed.data.len() != batch.len() {
            return Err(EmbeddingError::CountMismatch {
                expected: batch.len(),
                actual: parsed.data.len(),
            });
        }

        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(MAX_BATCH_SIZE) {
            vectors.extend(self.embed_batch(batch).await?);
        }
        tracing::debug!(
            inputs = inputs.len(),
            model = %self.model,
            "Generated embeddings"
        );
        Ok(vectors)
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: Vec<String>,
    dimensions: usize,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_text() {
        assert_eq!(prepare_text("  line one\nline two\r\n"), "line one line two");

        let long = "x".repeat(MAX_INPUT_CHARS + 50);
        assert_eq!(prepare_text(&long).chars().count(), MAX_INPUT_CHARS);
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let v: Vec<f32> = vec![0.3, 0.4, 0.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        assert!(cosine_similarity(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-9);
        assert!((cosine_similarity(&[1.0, 0.0], &[-1.0, 0.0]) + 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_cosine_similarity_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[1.0], &[1.0, 0.0]), 0.0);
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
    }

    #[tokio::test]
    async fn test_empty_input_makes_no_request() {
        let client = OpenAiEmbeddingClient::new("http://localhost:65535", "key");
        let vectors = client.embed(&[]).await.expect("empty input should succeed");
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    async fn test_connection_error() {
        let client = OpenAiEmbeddingClient::new("http://localhost:65535", "key");
        let err = client.embed_one("hello").await.unwrap_err();
        assert!(matches!(err, EmbeddingError::RequestFailed(_)));
    }

    #[test]
    fn test_response_sorted_by_index() {
        let body = r#"{"data":[{"index":1,"embedding":[0.2]},{"index":0,"embedding":[0.1]}]}"#;
        let mut parsed: EmbeddingResponse = serde_json::from_str(body).expect("should parse");
        parsed.data.sort_by_key(|d| d.index);
        assert_eq!(parsed.data[0].embedding, vec![0.1]);
    }

    #[test]
    fn test_builder() {
        let client = OpenAiEmbeddingClient::new(OPENAI_BASE_URL, "key")
            .with_model("text-embedding-3-large")
            .with_dimensions(256);
        assert_eq!(client.model(), "text-embedding-3-large");
        assert_eq!(client.dimensions(), 256);
    }
}
