//! Topic translator: renders the English concept and keywords in the
//! target language before prose is written.
//!
//! Translation is best effort. Any failure falls back to the English text.

use std::sync::Arc;

use serde::Deserialize;

use crate::llm::{GenerationRequest, LlmProvider, Message, DEFAULT_MODEL};
use crate::prompts::render_template;
use crate::retry::RetryPolicy;
use crate::storage::Language;
use crate::utils::extract_json;

/// Concept and keywords in the target language.
#[derive(Debug, Clone, PartialEq)]
pub struct TranslatedTopic {
    pub concept: String,
    pub keywords: Vec<String>,
    /// False when the English text was kept.
    pub translated: bool,
}

#[derive(Debug, Deserialize)]
struct TranslationPayload {
    #[serde(alias = "concept", alias = "translated_topic")]
    topic: String,
    #[serde(default)]
    keywords: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TranslatorConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 500,
            retry: RetryPolicy::default(),
        }
    }
}

impl TranslatorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

pub struct TopicTranslator {
    llm_client: Arc<dyn LlmProvider>,
    config: TranslatorConfig,
}

impl std::fmt::Debug for TopicTranslator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicTranslator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TopicTranslator {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "topic_translator";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: TranslatorConfig) -> Self {
        Self { llm_client, config }
    }

    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, TranslatorConfig::default())
    }

    /// Translates for `language`; English targets skip the model call.
    pub async fn translate(
        &self,
        template: &str,
        concept: &str,
        keywords: &[String],
        language: &Language,
    ) -> TranslatedTopic {
        let original = TranslatedTopic {
            concept: concept.to_string(),
            keywords: keywords.to_vec(),
            translated: false,
        };
        if language.is_english() {
            return original;
        }

        let joined = keywords.join(", ");
        let prompt = render_template(
            template,
            &[
                ("topic_concept", concept),
                ("keywords", joined.as_str()),
                ("target_language", language.language_name.as_str()),
            ],
        );
        let request = GenerationRequest::new(&self.config.model, vec![Message::user(prompt)])
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_json_mode();

        let reply =
            match super::complete(&self.llm_client, &self.config.retry, Self::AGENT_NAME, request)
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    tracing::warn!(language = %language.language_code, error = %e, "Topic translation failed, using English");
                    return original;
                }
            };

        let parsed = extract_json(&reply)
            .json()
            .and_then(|json| serde_json::from_str::<TranslationPayload>(json).ok())
            .filter(|payload| !payload.topic.trim().is_empty());

        match parsed {
            Some(payload) => TranslatedTopic {
                concept: payload.topic.trim().to_string(),
                keywords: payload
                    .keywords
                    .into_iter()
                    .map(|k| k.trim().to_string())
                    .filter(|k| !k.is_empty())
                    .collect(),
                translated: true,
            },
            None => {
                tracing::warn!(language = %language.language_code, "Unparseable topic translation, using English");
                original
            }
        }
    }
}
