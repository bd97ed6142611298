//! Explorer agent: brainstorms topic candidates for a category.
//!
//! One model call per run, in JSON mode. A reply that cannot be parsed
//! yields no candidates rather than an error, since "nothing found" is a
//! routine outcome for the topic stage.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;

use crate::llm::{GenerationRequest, LlmProvider, Message, DEFAULT_MODEL};
use crate::prompts::render_template;
use crate::retry::RetryPolicy;
use crate::storage::Lens;
use crate::utils::extract_json;

use super::error::{AgentError, AgentResult};

/// Concepts shorter than this are treated as noise.
const MIN_CONCEPT_CHARS: usize = 10;

/// An unpersisted topic idea.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicCandidate {
    pub concept: String,
    /// Lower-cased lens code, matching one of the lenses offered.
    pub lens_code: String,
    pub keywords: Vec<String>,
}

/// Configuration for the Explorer agent.
#[derive(Debug, Clone)]
pub struct ExplorerConfig {
    pub model: String,
    /// High by default: ideation should be varied.
    pub temperature: f64,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for ExplorerConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.8,
            max_tokens: 2000,
            retry: RetryPolicy::default(),
        }
    }
}

impl ExplorerConfig {
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

/// Reply shapes the Explorer accepts.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CandidatePayload {
    Wrapped {
        #[serde(alias = "topics", alias = "ideas")]
        candidates: Vec<Value>,
    },
    Bare(Vec<Value>),
}

#[derive(Debug, Deserialize)]
struct RawCandidate {
    #[serde(alias = "topic", alias = "concept_english")]
    concept: Option<String>,
    #[serde(alias = "lens_code", alias = "angle")]
    lens: Option<String>,
    keywords: Option<Vec<String>>,
}

/// Explorer agent that proposes topic candidates.
pub struct ExplorerAgent {
    llm_client: Arc<dyn LlmProvider>,
    config: ExplorerConfig,
}

impl std::fmt::Debug for ExplorerAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExplorerAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ExplorerAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "explorer";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: ExplorerConfig) -> Self {
        Self { llm_client, config }
    }

    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, ExplorerConfig::default())
    }

    /// Asks the model for up to `target_count` candidates in `category_name`.
    ///
    /// Candidates naming a lens outside `lenses` are dropped. Provider
    /// failures (after retries) are returned as errors; unparseable replies
    /// are not.
    pub async fn generate_candidates(
        &self,
        template: &str,
        category_name: &str,
        lenses: &[Lens],
        target_count: usize,
    ) -> AgentResult<Vec<TopicCandidate>> {
        if template.trim().is_empty() {
            return Err(AgentError::TemplateNotFound(
                crate::prompts::EXPLORER_IDEATION.to_string(),
            ));
        }

        let prompt = build_prompt(template, category_name, lenses, target_count);
        let request = GenerationRequest::new(&self.config.model, vec![Message::user(prompt)])
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens)
            .with_json_mode();

        let content =
            super::complete(&self.llm_client, &self.config.retry, Self::AGENT_NAME, request)
                .await?;

        let known: Vec<String> = lenses.iter().map(|l| l.lens_code.to_lowercase()).collect();
        let mut candidates = parse_candidates(&content);
        let proposed = candidates.len();
        candidates.retain(|c| {
            let known_lens = known.contains(&c.lens_code);
            if !known_lens {
                tracing::debug!(lens = %c.lens_code, concept = %c.concept, "Dropping candidate with unknown lens");
            }
            known_lens
        });
        candidates.truncate(target_count);

        tracing::info!(
            category = %category_name,
            proposed,
            kept = candidates.len(),
            "Explorer generated candidates"
        );
        Ok(candidates)
    }
}

fn build_prompt(template: &str, category_name: &str, lenses: &[Lens], target_count: usize) -> String {
    let lens_lines = lenses
        .iter()
        .map(|lens| format!("- {}: {}", lens.display_name, lens.guidance()))
        .collect::<Vec<_>>()
        .join("\n");
    let count = target_count.to_string();

    render_template(
        template,
        &[
            ("category", category_name),
            ("available_lenses", lens_lines.as_str()),
            ("num_candidates", count.as_str()),
        ],
    )
}

/// Parses candidates out of a model reply, skipping malformed entries.
pub(crate) fn parse_candidates(content: &str) -> Vec<TopicCandidate> {
    let json = match extract_json(content).into_result(content) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(error = %e, "Explorer reply contained no usable JSON");
            return Vec::new();
        }
    };

    let items = match serde_json::from_str::<CandidatePayload>(&json) {
        Ok(CandidatePayload::Wrapped { candidates }) => candidates,
        Ok(CandidatePayload::Bare(items)) => items,
        Err(e) => {
            tracing::warn!(error = %e, "Explorer reply did not match a candidate list");
            return Vec::new();
        }
    };

    items
        .into_iter()
        .filter_map(|item| {
            let raw: RawCandidate = serde_json::from_value(item).ok()?;
            let concept = raw.concept?.trim().to_string();
            let lens_code = raw.lens?.trim().to_lowercase();
            let keywords = raw
                .keywords?
                .into_iter()
                .map(|k| k.trim().to_string())
                .filter(|k| !k.is_empty())
                .collect();

            if concept.chars().count() < MIN_CONCEPT_CHARS || lens_code.is_empty() {
                return None;
            }
            Some(TopicCandidate {
                concept,
                lens_code,
                keywords,
            })
        })
        .collect()
}
