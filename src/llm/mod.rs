//! LLM integration for lingua-forge.
//!
//! Agents depend on the [`LlmProvider`] trait only; [`LiteLlmClient`] is the
//! production implementation for OpenAI-compatible chat-completion APIs.
//!
//! ```ignore
//! use lingua_forge::llm::{GenerationRequest, LiteLlmClient, LlmProvider, Message};
//!
//! let client = LiteLlmClient::from_env()?;
//! let request = GenerationRequest::new(
//!     "google/gemini-2.0-flash-exp",
//!     vec![Message::user("Suggest three topics about agriculture")],
//! )
//! .with_temperature(0.8)
//! .with_json_mode();
//! let response = client.generate(request).await?;
//! ```

pub mod litellm;

pub(crate) use litellm::api_error_message;
pub use litellm::{
    Choice, GenerationRequest, GenerationResponse, LiteLlmClient, LlmProvider, Message,
    ResponseFormat, Usage, DEFAULT_MODEL, OPENROUTER_BASE_URL,
};
