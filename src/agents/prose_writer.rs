//! Prose writer: produces the passage a test is built on.
//!
//! Word counts are advisory. Scripts such as Chinese or Japanese do not
//! separate words with spaces, so the count is logged but never enforced.

use std::sync::Arc;

use serde_json::Value;

use crate::llm::{GenerationRequest, LlmProvider, Message, DEFAULT_MODEL};
use crate::prompts::render_template;
use crate::retry::RetryPolicy;
use crate::storage::Language;
use crate::utils::{extract_json, strip_code_fences};

use super::error::{AgentError, AgentResult};

/// Inputs for one passage.
#[derive(Debug, Clone)]
pub struct ProseRequest<'a> {
    pub topic_concept: &'a str,
    pub keywords: &'a [String],
    pub language: &'a Language,
    pub difficulty: u8,
    pub cefr_level: &'a str,
    pub word_range: (u32, u32),
}

#[derive(Debug, Clone)]
pub struct ProseWriterConfig {
    /// Used when the language has no `prose_model` of its own.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for ProseWriterConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.9,
            max_tokens: 4000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ProseWriterConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Strips fences, a JSON wrapper, and surrounding quotes from a passage reply.
pub fn clean_prose(reply: &str) -> String {
    let text = strip_code_fences(reply);

    let unwrapped = if text.starts_with('{') {
        extract_json(&text)
            .json()
            .and_then(|json| serde_json::from_str::<Value>(json).ok())
            .and_then(|value| {
                ["prose", "transcript", "text", "content", "passage"]
                    .iter()
                    .find_map(|key| value.get(*key).and_then(Value::as_str).map(str::to_string))
            })
            .unwrap_or(text)
    } else {
        text
    };

    strip_matching_quotes(unwrapped.trim()).trim().to_string()
}

fn strip_matching_quotes(text: &str) -> &str {
    for (open, close) in [('"', '"'), ('\'', '\''), ('“', '”'), ('「', '」')] {
        if text.chars().count() >= 2 && text.starts_with(open) && text.ends_with(close) {
            return &text[open.len_utf8()..text.len() - close.len_utf8()];
        }
    }
    text
}

pub struct ProseWriter {
    llm_client: Arc<dyn LlmProvider>,
    config: ProseWriterConfig,
}

impl std::fmt::Debug for ProseWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProseWriter")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ProseWriter {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "prose_writer";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: ProseWriterConfig) -> Self {
        Self { llm_client, config }
    }

    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, ProseWriterConfig::default())
    }

    /// Writes a passage for `request` using `template`.
    pub async fn generate_prose(&self, template: &str, request: &ProseRequest<'_>) -> AgentResult<String> {
        if !crate::difficulty::is_valid_difficulty(request.difficulty) {
            return Err(AgentError::InvalidDifficulty(request.difficulty));
        }

        let keywords = request.keywords.join(", ");
        let min_words = request.word_range.0.to_string();
        let max_words = request.word_range.1.to_string();
        let difficulty = request.difficulty.to_string();
        let prompt = render_template(
            template,
            &[
                ("topic_concept", request.topic_concept),
                ("keywords", keywords.as_str()),
                ("cefr_level", request.cefr_level),
                ("min_words", min_words.as_str()),
                ("max_words", max_words.as_str()),
                ("language", request.language.language_name.as_str()),
                ("language_code", request.language.language_code.as_str()),
                ("difficulty", difficulty.as_str()),
            ],
        );

        let model = request
            .language
            .prose_model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        let llm_request = GenerationRequest::new(model, vec![Message::user(prompt)])
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let reply = super::complete(
            &self.llm_client,
            &self.config.retry,
            Self::AGENT_NAME,
            llm_request,
        )
        .await?;
        let prose = clean_prose(&reply);
        if prose.is_empty() {
            return Err(AgentError::GenerationFailed(
                "Prose reply was empty after cleanup".to_string(),
            ));
        }

        let approx_words = prose.split_whitespace().count();
        tracing::info!(
            language = %request.language.language_code,
            difficulty = request.difficulty,
            chars = prose.chars().count(),
            approx_words,
            target_min = request.word_range.0,
            target_max = request.word_range.1,
            "Generated prose"
        );
        Ok(prose)
    }
}
