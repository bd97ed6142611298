//! Question generator: one multiple-choice question per requested type.
//!
//! Questions are generated sequentially so each prompt can list the ones
//! already asked. A type whose reply never parses is skipped; the
//! validator decides whether enough questions survived.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Deserialize;

use crate::difficulty::QuestionType;
use crate::llm::{GenerationRequest, LlmProvider, Message, DEFAULT_MODEL};
use crate::prompts::defaults::QUESTION_TEMPLATE;
use crate::prompts::render_template;
use crate::retry::RetryPolicy;
use crate::storage::Language;
use crate::utils::extract_json;

use super::error::{AgentError, AgentResult};

/// Options every question must carry.
pub const OPTIONS_PER_QUESTION: usize = 4;

/// A parsed question, not yet validated.
#[derive(Debug, Clone, PartialEq)]
pub struct QuestionDraft {
    pub question_text: String,
    pub choices: Vec<String>,
    /// Always one of `choices`.
    pub answer: String,
    pub question_type: QuestionType,
    pub display_order: i64,
}

#[derive(Debug, Clone)]
pub struct QuestionGeneratorConfig {
    /// Used when the language has no `question_model` of its own.
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for QuestionGeneratorConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            temperature: 0.7,
            max_tokens: 1000,
            retry: RetryPolicy::default(),
        }
    }
}

impl QuestionGeneratorConfig {
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum QuestionPayload {
    List(Vec<RawQuestion>),
    Batch {
        #[serde(alias = "Questions")]
        questions: Vec<RawQuestion>,
    },
    Single(RawQuestion),
}

#[derive(Debug, Deserialize)]
struct RawQuestion {
    #[serde(rename = "Question", alias = "question", alias = "question_text")]
    question: String,
    #[serde(
        rename = "Options",
        alias = "options",
        alias = "choices",
        alias = "Choices"
    )]
    options: Vec<String>,
    #[serde(rename = "Answer", alias = "answer", alias = "correct_answer")]
    answer: AnswerField,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AnswerField {
    Text(String),
    Index(i64),
}

/// Maps a model's answer onto one of `options`.
///
/// Tries an exact match, then a letter (`B`, `b)`), then a
/// case-insensitive containment either way, and finally falls back to the
/// first option.
fn resolve_answer(answer: &AnswerField, options: &[String]) -> Option<String> {
    let first = options.first()?;

    let text = match answer {
        AnswerField::Index(i) => {
            return Some(
                usize::try_from(*i)
                    .ok()
                    .and_then(|i| options.get(i))
                    .unwrap_or(first)
                    .clone(),
            );
        }
        AnswerField::Text(text) => text.trim(),
    };

    if let Some(exact) = options.iter().find(|o| o.trim() == text) {
        return Some(exact.clone());
    }

    let letter = text.trim_end_matches([')', '.', ':']).trim();
    if letter.chars().count() == 1 {
        let index = match letter.to_ascii_uppercase().as_str() {
            "A" => Some(0),
            "B" => Some(1),
            "C" => Some(2),
            "D" => Some(3),
            _ => None,
        };
        if let Some(option) = index.and_then(|i| options.get(i)) {
            return Some(option.clone());
        }
    }

    let lowered = text.to_lowercase();
    if !lowered.is_empty() {
        if let Some(option) = options.iter().find(|o| {
            let o = o.trim().to_lowercase();
            !o.is_empty() && (o.contains(&lowered) || lowered.contains(&o))
        }) {
            return Some(option.clone());
        }
    }

    tracing::warn!(answer = %text, "Answer matched no option, using the first");
    Some(first.clone())
}

/// Parses one question of `question_type` out of a model reply.
///
/// Batched replies are accepted; only the first question is used.
pub fn parse_question_response(
    content: &str,
    question_type: QuestionType,
    display_order: i64,
) -> AgentResult<QuestionDraft> {
    let json = extract_json(content)
        .into_result(content)
        .map_err(|e| AgentError::ResponseParseError(e.to_string()))?;

    let raw = match serde_json::from_str::<QuestionPayload>(&json) {
        Ok(QuestionPayload::Single(raw)) => raw,
        Ok(QuestionPayload::List(items)) | Ok(QuestionPayload::Batch { questions: items }) => items
            .into_iter()
            .next()
            .ok_or_else(|| AgentError::ResponseParseError("empty question list".to_string()))?,
        Err(e) => {
            return Err(AgentError::ResponseParseError(format!(
                "question reply has an unexpected shape: {}",
                e
            )))
        }
    };

    let question_text = raw.question.trim().to_string();
    if question_text.is_empty() {
        return Err(AgentError::ResponseParseError("question text is empty".to_string()));
    }

    let choices: Vec<String> = raw
        .options
        .iter()
        .map(|o| o.trim().to_string())
        .collect();
    if choices.len() != OPTIONS_PER_QUESTION {
        return Err(AgentError::ResponseParseError(format!(
            "expected {} options, got {}",
            OPTIONS_PER_QUESTION,
            choices.len()
        )));
    }

    let answer = resolve_answer(&raw.answer, &choices)
        .ok_or_else(|| AgentError::ResponseParseError("no answer".to_string()))?;

    Ok(QuestionDraft {
        question_text,
        choices,
        answer,
        question_type,
        display_order,
    })
}

pub struct QuestionGenerator {
    llm_client: Arc<dyn LlmProvider>,
    config: QuestionGeneratorConfig,
}

impl std::fmt::Debug for QuestionGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QuestionGenerator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl QuestionGenerator {
    /// Agent name constant for identification.
    pub const AGENT_NAME: &'static str = "question_generator";

    pub fn new(llm_client: Arc<dyn LlmProvider>, config: QuestionGeneratorConfig) -> Self {
        Self { llm_client, config }
    }

    pub fn with_defaults(llm_client: Arc<dyn LlmProvider>) -> Self {
        Self::new(llm_client, QuestionGeneratorConfig::default())
    }

    /// Generates one question per entry of `types`, in order.
    ///
    /// `templates` is keyed by question type; a missing entry uses the
    /// built-in question template. Types that fail after retries are left out.
    pub async fn generate_questions(
        &self,
        templates: &HashMap<QuestionType, String>,
        passage: &str,
        language: &Language,
        types: &[QuestionType],
    ) -> Vec<QuestionDraft> {
        let model = language
            .question_model
            .clone()
            .unwrap_or_else(|| self.config.model.clone());
        let mut drafts: Vec<QuestionDraft> = Vec::with_capacity(types.len());

        for (index, question_type) in types.iter().copied().enumerate() {
            let display_order = index as i64 + 1;
            let previous = if drafts.is_empty() {
                "None".to_string()
            } else {
                drafts
                    .iter()
                    .map(|d| d.question_text.as_str())
                    .collect::<Vec<_>>()
                    .join("; ")
            };
            let template = templates
                .get(&question_type)
                .map(String::as_str)
                .unwrap_or(QUESTION_TEMPLATE);
            let cognitive_level = question_type.cognitive_level().to_string();
            let prompt = render_template(
                template,
                &[
                    ("transcript", passage),
                    ("language", language.language_name.as_str()),
                    ("previous_questions", previous.as_str()),
                    ("question_type_name", question_type.display_name()),
                    ("question_type_instruction", question_type.instruction()),
                    ("cognitive_level", cognitive_level.as_str()),
                ],
            );
            let request = GenerationRequest::new(model.as_str(), vec![Message::user(prompt)])
                .with_temperature(self.config.temperature)
                .with_max_tokens(self.config.max_tokens)
                .with_json_mode();

            let result = self
                .config
                .retry
                .run(Self::AGENT_NAME, || {
                    let request = request.clone();
                    async move {
                        let response = self.llm_client.generate(request).await?;
                        let content = response.require_content()?;
                        parse_question_response(content, question_type, display_order)
                    }
                })
                .await;

            match result {
                Ok(draft) => drafts.push(draft),
                Err(e) => {
                    tracing::warn!(
                        question_type = %question_type,
                        language = %language.language_code,
                        error = %e,
                        "Skipping question type after failed attempts"
                    );
                }
            }
        }

        tracing::info!(
            requested = types.len(),
            generated = drafts.len(),
            language = %language.language_code,
            "Generated questions"
        );
        drafts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::test_support::MockLlmProvider;

    const GOOD: &str = r#"{"Question": "What do farmers grow?", "Options": ["Rice", "Wheat", "Corn", "Tea"], "Answer": "Rice"}"#;

    fn spanish() -> Language {
        Language::new(3, "es", "Spanish", "Español")
    }

    fn generator(llm: Arc<MockLlmProvider>) -> QuestionGenerator {
        QuestionGenerator::new(
            llm,
            QuestionGeneratorConfig::default().with_retry(RetryPolicy::no_retry()),
        )
    }

    #[test]
    fn test_parse_single_question() {
        let draft = parse_question_response(GOOD, QuestionType::MainIdea, 2).unwrap();
        assert_eq!(draft.question_text, "What do farmers grow?");
        assert_eq!(draft.answer, "Rice");
        assert_eq!(draft.display_order, 2);
        assert_eq!(draft.question_type, QuestionType::MainIdea);
    }

    #[test]
    fn test_parse_accepts_aliases_and_batches() {
        let lower = r#"{"question": "Q?", "choices": ["a", "b", "c", "d"], "correct_answer": "c"}"#;
        assert_eq!(parse_question_response(lower, QuestionType::Inference, 1).unwrap().answer, "c");

        let batch = format!(r#"{{"questions": [{}]}}"#, GOOD);
        assert_eq!(
            parse_question_response(&batch, QuestionType::Inference, 1).unwrap().answer,
            "Rice"
        );

        let list = format!("```json\n[{}]\n```", GOOD);
        assert!(parse_question_response(&list, QuestionType::Inference, 1).is_ok());
    }

    #[test]
    fn test_answer_recovery() {
        let options: Vec<String> = ["Rice paddies", "Wheat", "Corn", "Tea"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let resolve = |a: AnswerField| resolve_answer(&a, &options).unwrap();

        assert_eq!(resolve(AnswerField::Text(" Wheat ".into())), "Wheat");
        assert_eq!(resolve(AnswerField::Text("C)".into())), "Corn");
        assert_eq!(resolve(AnswerField::Text("d".into())), "Tea");
        assert_eq!(resolve(AnswerField::Text("rice".into())), "Rice paddies");
        assert_eq!(resolve(AnswerField::Index(1)), "Wheat");
        assert_eq!(resolve(AnswerField::Index(9)), "Rice paddies");
        assert_eq!(resolve(AnswerField::Text("Something else".into())), "Rice paddies");
    }

    #[test]
    fn test_parse_rejects_wrong_option_count() {
        let three = r#"{"Question": "Q?", "Options": ["a", "b", "c"], "Answer": "a"}"#;
        assert!(matches!(
            parse_question_response(three, QuestionType::MainIdea, 1),
            Err(AgentError::ResponseParseError(_))
        ));
        assert!(parse_question_response("no json here", QuestionType::MainIdea, 1).is_err());
    }

    #[test]
    fn test_parse_reports_truncated_reply() {
        let cut = r#"{"Question": "What do farmers grow?", "Options": ["Rice", "Wheat""#;
        match parse_question_response(cut, QuestionType::MainIdea, 1) {
            Err(AgentError::ResponseParseError(message)) => {
                assert!(message.contains("truncated"), "unexpected message: {}", message)
            }
            other => panic!("expected a parse error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_previous_questions_are_listed() {
        let second = r#"{"Question": "Why terraces?", "Options": ["a", "b", "c", "d"], "Answer": "b"}"#;
        let llm = Arc::new(MockLlmProvider::with_replies([GOOD, second]));
        let types = [QuestionType::LiteralDetail, QuestionType::Inference];

        let drafts = generator(llm.clone())
            .generate_questions(&HashMap::new(), "Farmers grow rice.", &spanish(), &types)
            .await;

        assert_eq!(drafts.len(), 2);
        assert_eq!(drafts[1].display_order, 2);
        let requests = llm.requests();
        assert!(requests[0]
            .user_prompt()
            .unwrap()
            .contains("PREVIOUSLY ASKED QUESTIONS: None"));
        assert!(requests[1]
            .user_prompt()
            .unwrap()
            .contains("PREVIOUSLY ASKED QUESTIONS: What do farmers grow?"));
        assert!(requests[1].user_prompt().unwrap().contains("QUESTION TYPE: Inference"));
    }

    #[tokio::test]
    async fn test_failed_type_is_skipped() {
        let llm = Arc::new(MockLlmProvider::with_replies(["not json", GOOD]));
        let types = [QuestionType::MainIdea, QuestionType::Inference];

        let drafts = generator(llm)
            .generate_questions(&HashMap::new(), "Passage.", &spanish(), &types)
            .await;

        assert_eq!(drafts.len(), 1);
        assert_eq!(drafts[0].question_type, QuestionType::Inference);
        assert_eq!(drafts[0].display_order, 2);
    }

    #[tokio::test]
    async fn test_parse_failure_is_retried() {
        let llm = Arc::new(MockLlmProvider::with_replies(["garbage", GOOD]));
        let generator = QuestionGenerator::new(
            llm.clone(),
            QuestionGeneratorConfig::default().with_retry(RetryPolicy::new(
                2,
                std::time::Duration::ZERO,
                std::time::Duration::ZERO,
            )),
        );

        let drafts = generator
            .generate_questions(&HashMap::new(), "Passage.", &spanish(), &[QuestionType::MainIdea])
            .await;
        assert_eq!(drafts.len(), 1);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_custom_template_and_model() {
        let llm = Arc::new(MockLlmProvider::new(GOOD));
        let mut language = spanish();
        language.question_model = Some("anthropic/claude-3.5-haiku".into());
        let mut templates = HashMap::new();
        templates.insert(QuestionType::MainIdea, "Custom {question_type_name}".to_string());

        generator(llm.clone())
            .generate_questions(&templates, "Passage.", &language, &[QuestionType::MainIdea])
            .await;

        let request = &llm.requests()[0];
        assert_eq!(request.model, "anthropic/claude-3.5-haiku");
        assert_eq!(request.user_prompt().unwrap(), "Custom Main Idea");
    }
}
