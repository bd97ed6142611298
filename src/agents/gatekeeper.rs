//! Gatekeeper agent: per-language cultural and linguistic fit checks.
//!
//! Languages are checked one at a time in the order given. After
//! `short_circuit_threshold` consecutive rejections the remaining languages
//! are skipped, so a topic that is unsuitable everywhere costs at most
//! `approved + threshold` calls.

use std::sync::Arc;

use crate::llm::{GenerationRequest, LlmProvider, Message, DEFAULT_MODEL};
use crate::prompts::render_template;
use crate::retry::RetryPolicy;
use crate::storage::Language;

use super::error::AgentResult;
use super::explorer::TopicCandidate;

/// Reads a YES/NO verdict. Anything ambiguous is a rejection.
pub fn parse_verdict(reply: &str) -> bool {
    let text = reply.trim().to_lowercase();
    if text.starts_with("yes") {
        return true;
    }
    if text.starts_with("no") {
        return false;
    }
    text.contains("yes") && !text.contains("no")
}

/// Result of gating one candidate across languages.
#[derive(Debug, Clone, PartialEq)]
pub struct GatekeeperOutcome {
    pub approved: Vec<Language>,
    /// Verdict calls issued, whether they succeeded or not.
    pub calls_made: u32,
    pub short_circuited: bool,
}

/// Configuration for the Gatekeeper agent.
#[derive(Debug, Clone)]
pub struct GatekeeperConfig {
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    /// Consecutive rejections that end evaluation early. 0 disables it.
    pub short_circuit_threshold: u32,
    pub retry: RetryPolicy,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.3,
            max_tokens: 100,
            short_circuit_threshold: 3,
            retry: RetryPolicy::default(),
        }
    }
}

impl GatekeeperConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_short_circuit_threshold(mut self, threshold: u32) -> Self {
        self.short_circuit_threshold = threshold;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

pub struct GatekeeperAgent {
    llm_client: Arc<dyn LlmProvider>,
    config: GatekeeperConfig,
}

impl std::fmt::Debug for GatekeeperAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatekeeperAgent")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl GatekeeperAgent {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "gatekeeper";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: GatekeeperConfig) -> Self {
        Self { llm_client, config }
    }

    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, GatekeeperConfig::default())
    }

    /// Asks whether `candidate` suits `language`.
    pub async fn check_language(
        &self,
        template: &str,
        candidate: &TopicCandidate,
        lens_display_name: &str,
        language: &Language,
    ) -> AgentResult<bool> {
        let keywords = candidate.keywords.join(", ");
        let prompt = render_template(
            template,
            &[
                ("topic_concept", candidate.concept.as_str()),
                ("lens", lens_display_name),
                ("keywords", keywords.as_str()),
                ("target_language", language.language_name.as_str()),
                ("language_code", language.language_code.as_str()),
            ],
        );
        let request = GenerationRequest::new(&self.config.model, vec![Message::user(prompt)])
            .with_temperature(self.config.temperature)
            .with_max_tokens(self.config.max_tokens);

        let reply =
            super::complete(&self.llm_client, &self.config.retry, Self::AGENT_NAME, request)
                .await?;
        Ok(parse_verdict(&reply))
    }

    /// Gates `candidate` for each language in order.
    ///
    /// A provider error counts as a rejection for that language.
    pub async fn validate_for_all_languages(
        &self,
        template: &str,
        candidate: &TopicCandidate,
        lens_display_name: &str,
        languages: &[Language],
    ) -> GatekeeperOutcome {
        let threshold = self.config.short_circuit_threshold;
        let mut outcome = GatekeeperOutcome {
            approved: Vec::new(),
            calls_made: 0,
            short_circuited: false,
        };
        let mut consecutive_rejections = 0u32;

        for (index, language) in languages.iter().enumerate() {
            if threshold > 0 && consecutive_rejections >= threshold {
                outcome.short_circuited = true;
                tracing::info!(
                    concept = %candidate.concept,
                    skipped = languages.len() - index,
                    "Gatekeeper short-circuited after consecutive rejections"
                );
                break;
            }

            outcome.calls_made += 1;
            let approved = match self
                .check_language(template, candidate, lens_display_name, language)
                .await
            {
                Ok(approved) => approved,
                Err(e) => {
                    tracing::warn!(
                        language = %language.language_code,
                        error = %e,
                        "Gatekeeper call failed, treating as rejection"
                    );
                    false
                }
            };

            if approved {
                consecutive_rejections = 0;
                outcome.approved.push(language.clone());
            } else {
                consecutive_rejections += 1;
                tracing::debug!(
                    language = %language.language_code,
                    concept = %candidate.concept,
                    "Gatekeeper rejected topic"
                );
            }
        }

        tracing::info!(
            concept = %candidate.concept,
            approved = outcome.approved.len(),
            calls = outcome.calls_made,
            "Gatekeeper finished"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::MockLlmProvider;
    use crate::error::LlmError;
    use crate::prompts::defaults::GATEKEEPER_TEMPLATE;

    fn candidate() -> TopicCandidate {
        TopicCandidate {
            concept: "Street food etiquette in night markets".into(),
            lens_code: "cultural".into(),
            keywords: vec!["food".into(), "markets".into()],
        }
    }

    fn languages(n: i64) -> Vec<Language> {
        (1..=n)
            .map(|i| Language::new(i, format!("l{}", i), format!("Lang{}", i), format!("L{}", i)))
            .collect()
    }

    fn agent(llm: Arc<MockLlmProvider>) -> GatekeeperAgent {
        GatekeeperAgent::new(
            llm,
            GatekeeperConfig::default().with_retry(RetryPolicy::no_retry()),
        )
    }

    #[test]
    fn test_parse_verdict() {
        assert!(parse_verdict("YES - this is fine"));
        assert!(parse_verdict("  yes."));
        assert!(!parse_verdict("No, too sensitive"));
        assert!(!parse_verdict("NO"));
        assert!(parse_verdict("I would say yes"));
        assert!(!parse_verdict("Possibly yes, possibly no"));
        assert!(!parse_verdict("Maybe"));
        assert!(!parse_verdict(""));
    }

    #[tokio::test]
    async fn test_short_circuit_bounds_calls() {
        let llm = Arc::new(MockLlmProvider::new("NO"));
        let outcome = agent(llm.clone())
            .validate_for_all_languages(GATEKEEPER_TEMPLATE, &candidate(), "Cultural", &languages(8))
            .await;

        assert!(outcome.approved.is_empty());
        assert!(outcome.short_circuited);
        assert_eq!(outcome.calls_made, 3);
        assert_eq!(llm.call_count(), 3);
    }

    #[tokio::test]
    async fn test_approval_resets_rejection_count() {
        let llm = Arc::new(MockLlmProvider::with_replies([
            "NO", "NO", "YES", "NO", "NO", "YES", "NO", "NO", "NO", "YES",
        ]));
        let outcome = agent(llm.clone())
            .validate_for_all_languages(
                GATEKEEPER_TEMPLATE,
                &candidate(),
                "Cultural",
                &languages(10),
            )
            .await;

        let approved: Vec<i64> = outcome.approved.iter().map(|l| l.id).collect();
        assert_eq!(approved, vec![3, 6]);
        assert_eq!(outcome.calls_made, 9);
        assert!(outcome.short_circuited);
    }

    #[tokio::test]
    async fn test_provider_error_counts_as_rejection() {
        let llm = Arc::new(MockLlmProvider::new("YES"));
        llm.push_error(LlmError::RequestFailed("timeout".into()));
        let outcome = agent(llm.clone())
            .validate_for_all_languages(GATEKEEPER_TEMPLATE, &candidate(), "Cultural", &languages(3))
            .await;

        let approved: Vec<i64> = outcome.approved.iter().map(|l| l.id).collect();
        assert_eq!(approved, vec![2, 3]);
        assert!(!outcome.short_circuited);
    }

    #[tokio::test]
    async fn test_prompt_names_language() {
        let llm = Arc::new(MockLlmProvider::new("YES"));
        let spanish = Language::new(3, "es", "Spanish", "Español");
        let approved = agent(llm.clone())
            .check_language(GATEKEEPER_TEMPLATE, &candidate(), "Cultural", &spanish)
            .await
            .unwrap();

        assert!(approved);
        let prompt = llm.requests()[0].user_prompt().unwrap().to_string();
        assert!(prompt.contains("TARGET LANGUAGE: Spanish (es)"));
        assert!(prompt.contains("KEYWORDS: food, markets"));
    }
}
