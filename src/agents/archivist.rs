//! Archivist agent: rejects candidates that duplicate stored topics.
//!
//! A candidate is reduced to a canonical signature, embedded, and compared
//! against topics in the same category. Different categories never collide.

use std::sync::Arc;

use crate::embedding::{prepare_text, EmbeddingProvider};
use crate::error::EmbeddingError;
use crate::retry::{RetryPolicy, Transient};
use crate::storage::Database;

use super::error::AgentResult;

/// Keywords beyond this many are left out of the signature.
const SIGNATURE_KEYWORDS: usize = 5;

/// Canonical text used to embed a topic:
/// `"{category}: {concept} [{lens}] ({keyword, ...})"`.
pub fn build_signature(
    category_name: &str,
    concept: &str,
    lens_display_name: &str,
    keywords: &[String],
) -> String {
    let keywords = keywords
        .iter()
        .take(SIGNATURE_KEYWORDS)
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "{}: {} [{}] ({})",
        category_name, concept, lens_display_name, keywords
    )
}

/// Result of a novelty check.
#[derive(Debug, Clone, PartialEq)]
pub struct NoveltyVerdict {
    pub is_novel: bool,
    pub reason: String,
    /// The signature embedding, kept so the topic insert does not embed twice.
    pub embedding: Option<Vec<f32>>,
}

impl NoveltyVerdict {
    fn rejected(reason: impl Into<String>, embedding: Option<Vec<f32>>) -> Self {
        Self {
            is_novel: false,
            reason: reason.into(),
            embedding,
        }
    }
}

/// Configuration for the Archivist agent.
#[derive(Debug, Clone)]
pub struct ArchivistConfig {
    /// Cosine similarity at or above which a candidate is a duplicate.
    pub similarity_threshold: f64,
    /// How many matches to fetch when explaining a rejection.
    pub match_limit: usize,
    pub retry: RetryPolicy,
}

impl Default for ArchivistConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.85,
            match_limit: 5,
            retry: RetryPolicy::default(),
        }
    }
}

impl ArchivistConfig {
    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Archivist agent backed by an embedding provider and the topic table.
pub struct ArchivistAgent {
    embedder: Arc<dyn EmbeddingProvider>,
    db: Database,
    config: ArchivistConfig,
}

impl std::fmt::Debug for ArchivistAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchivistAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ArchivistAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "archivist";

    pub fn new(embedder: Arc<dyn EmbeddingProvider>, db: Database, config: ArchivistConfig) -> Self {
        Self {
            embedder,
            db,
            config,
        }
    }

    pub fn with_defaults(embedder: Arc<dyn EmbeddingProvider>, db: Database) -> Self {
        Self::new(embedder, db, ArchivistConfig::default())
    }

    pub fn similarity_threshold(&self) -> f64 {
        self.config.similarity_threshold
    }

    /// Decides whether `signature` is new within `category_id`.
    ///
    /// An embedding failure is reported as a non-novel verdict; only
    /// database errors are returned as `Err`.
    pub async fn check_novelty(&self, category_id: i64, signature: &str) -> AgentResult<NoveltyVerdict> {
        let text = prepare_text(signature);
        let embedding = match self
            .config
            .retry
            .run_if(Self::AGENT_NAME, EmbeddingError::is_transient, || {
                self.embedder.embed_one(&text)
            })
            .await
        {
            Ok(vector) => vector,
            Err(e) => {
                tracing::warn!(error = %e, signature = %signature, "Embedding failed during novelty check");
                return Ok(NoveltyVerdict::rejected("Embedding generation failed", None));
            }
        };

        let matches = self
            .db
            .match_topics(
                category_id,
                &embedding,
                self.config.similarity_threshold,
                self.config.match_limit,
            )
            .await?;

        if let Some(closest) = matches.first() {
            let preview: String = closest.concept.chars().take(50).collect();
            let reason = format!(
                "Too similar to existing topic (similarity: {:.2}%): '{}...'",
                closest.similarity * 100.0,
                preview
            );
            tracing::info!(
                category_id,
                similarity = closest.similarity,
                existing = %closest.id,
                "Candidate rejected as duplicate"
            );
            return Ok(NoveltyVerdict::rejected(reason, Some(embedding)));
        }

        Ok(NoveltyVerdict {
            is_novel: true,
            reason: "Novel topic".to_string(),
            embedding: Some(embedding),
        })
    }
}
