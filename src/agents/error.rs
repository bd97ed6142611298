//! Error types for the generation agents.

use thiserror::Error;

use crate::error::{EmbeddingError, ObjectStoreError, SpeechError};

/// Errors that can occur during agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// The agent could not produce usable output.
    #[error("Generation failed: {0}")]
    GenerationFailed(String),

    /// Error from the LLM provider.
    #[error("LLM error: {0}")]
    LlmError(String),

    /// Error parsing LLM response.
    #[error("Failed to parse LLM response: {0}")]
    ResponseParseError(String),

    /// Template not found or empty.
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// Difficulty outside 1..=9.
    #[error("Invalid difficulty level: {0}")]
    InvalidDifficulty(u8),

    #[error("Embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    #[error("Speech synthesis error: {0}")]
    Speech(#[from] SpeechError),

    #[error("Object storage error: {0}")]
    ObjectStore(#[from] ObjectStoreError),

    #[error("Storage error: {0}")]
    Database(#[from] crate::storage::DatabaseError),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<crate::error::LlmError> for AgentError {
    fn from(err: crate::error::LlmError) -> Self {
        AgentError::LlmError(err.to_string())
    }
}

/// Result type alias for agent operations.
pub type AgentResult<T> = Result<T, AgentError>;
