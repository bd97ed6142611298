//! lingua_forge: language-learning content generation.
//!
//! Two scheduled stages share one database. Topic generation invents
//! novel, culturally appropriate topics and queues them per language; test
//! generation turns each queued topic into leveled tests with a passage,
//! title, comprehension questions, and narrated audio.

// Core modules
pub mod agents;
pub mod cli;
pub mod difficulty;
pub mod dimensions;
pub mod embedding;
pub mod error;
pub mod llm;
pub mod object_store;
pub mod pipeline;
pub mod prompts;
pub mod retry;
pub mod speech;
pub mod storage;
pub mod utils;

// Re-export commonly used error types
pub use error::{EmbeddingError, LlmError, ObjectStoreError, SpeechError};
