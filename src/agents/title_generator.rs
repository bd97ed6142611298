//! Title generator: a short headline for a finished passage.

use std::sync::Arc;

use serde_json::Value;

use crate::difficulty::title_style;
use crate::llm::{GenerationRequest, LlmProvider, Message, DEFAULT_MODEL};
use crate::prompts::render_template;
use crate::retry::RetryPolicy;
use crate::storage::Language;
use crate::utils::{extract_json, strip_code_fences};

use super::error::{AgentError, AgentResult};

/// Inputs for one title.
#[derive(Debug, Clone)]
pub struct TitleRequest<'a> {
    pub prose: &'a str,
    pub topic_concept: &'a str,
    pub language: &'a Language,
    pub difficulty: u8,
    pub cefr_level: &'a str,
}

#[derive(Debug, Clone)]
pub struct TitleGeneratorConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for TitleGeneratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 100,
            retry: RetryPolicy::default(),
        }
    }
}

impl TitleGeneratorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// Reduces a title reply to the bare title text.
pub fn clean_title(reply: &str) -> String {
    let mut text = strip_code_fences(reply);

    if text.starts_with('{') {
        let from_json = extract_json(&text)
            .json()
            .and_then(|json| serde_json::from_str::<Value>(json).ok())
            .and_then(|value| value.get("title").and_then(Value::as_str).map(str::to_string));
        if let Some(title) = from_json {
            text = title;
        }
    }

    let first_line = text.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
    let mut title = first_line.trim_start_matches('#').trim();
    for prefix in ["Title:", "title:", "TITLE:"] {
        if let Some(rest) = title.strip_prefix(prefix) {
            title = rest.trim();
        }
    }

    title
        .trim_matches(|c| matches!(c, '"' | '\'' | '“' | '”' | '「' | '」' | '«' | '»' | '*'))
        .trim()
        .to_string()
}

pub struct TitleGenerator {
    llm_client: Arc<dyn LlmProvider>,
    config: TitleGeneratorConfig,
}

impl std::fmt::Debug for TitleGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TitleGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TitleGenerator {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "title_generator";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: TitleGeneratorConfig) -> Self {
        Self { llm_client, config }
    }

    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, TitleGeneratorConfig::default())
    }

    /// Generates a title whose length and register follow the difficulty.
    pub async fn generate_title(&self, template: &str, request: &TitleRequest<'_>) -> AgentResult<String> {
        let difficulty = request.difficulty.to_string();
        let prompt = render_template(
            template,
            &[
                ("prose", request.prose),
                ("topic_concept", request.topic_concept),
                ("difficulty", difficulty.as_str()),
                ("cefr_level", request.cefr_level),
                ("language", request.language.language_name.as_str()),
                ("language_code", request.language.language_code.as_str()),
                ("style_guidance", title_style(request.difficulty)),
            ],
        );
        let llm_request = GenerationRequest::new(&self.config.model, vec![Message::user(prompt)])
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let reply = super::complete(
            &self.llm_client,
            &self.config.retry,
            Self::AGENT_NAME,
            llm_request,
        )
        .await?;

        let title = clean_title(&reply);
        if title.is_empty() {
            return Err(AgentError::GenerationFailed(
                "Title reply was empty after cleanup".to_string(),
            ));
        }
        tracing::debug!(title = %title, difficulty = request.difficulty, "Generated title");
        Ok(title)
    }
}
