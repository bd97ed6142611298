//! Error types for the external provider boundaries.
//!
//! Each provider the pipeline talks to gets its own error type:
//! - Chat-completion (LLM) API interactions
//! - Text embedding API interactions
//! - Text-to-speech API interactions
//! - Object storage for generated audio

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: {0} environment variable not set")]
    MissingApiKey(String),

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Empty response from LLM")]
    EmptyResponse,

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while embedding text.
#[derive(Debug, Error)]
pub enum EmbeddingError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse embedding response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Expected {expected} embeddings, provider returned {actual}")]
    CountMismatch { expected: usize, actual: usize },

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur during speech synthesis.
#[derive(Debug, Error)]
pub enum SpeechError {
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Empty audio response from TTS API")]
    EmptyAudio,

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },
}

/// Errors that can occur while reading or writing stored objects.
#[derive(Debug, Error)]
pub enum ObjectStoreError {
    #[error("Upload of '{key}' failed: {reason}")]
    UploadFailed { key: String, reason: String },

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid object key '{0}'")]
    InvalidKey(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
