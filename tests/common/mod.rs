//! Scripted providers and database fixtures for the pipeline tests.

#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use lingua_forge::cli::SeedData;
use lingua_forge::embedding::EmbeddingProvider;
use lingua_forge::llm::{Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage};
use lingua_forge::speech::{SpeechRequest, SpeechSynthesizer};
use lingua_forge::storage::Database;
use lingua_forge::{EmbeddingError, LlmError, SpeechError};

/// Reference data for the pipeline tests: one category, three languages.
pub const TEST_SEED: &str = r#"
categories:
  - { id: 1, name: Greetings, cooldown_days: 3 }
languages:
  - { id: 1, language_code: cn, language_name: Chinese, native_name: 中文 }
  - { id: 2, language_code: en, language_name: English, native_name: English }
  - { id: 3, language_code: jp, language_name: Japanese, native_name: 日本語, tts_voice_ids: [nova] }
lenses:
  - { id: 1, lens_code: cultural, display_name: Cultural }
  - { id: 2, lens_code: historical, display_name: Historical }
test_types:
  - { id: 1, type_code: listening, type_name: Listening, requires_audio: true }
  - { id: 2, type_code: reading, type_name: Reading }
  - { id: 3, type_code: dictation, type_name: Dictation, requires_audio: false }
"#;

pub async fn seeded_database() -> Database {
    let db = Database::in_memory().await.unwrap();
    SeedData::from_yaml(TEST_SEED)
        .unwrap()
        .apply(&db)
        .await
        .unwrap();
    db
}

/// Comprehension questions with no shared content words.
const QUESTIONS: [(&str, [&str; 4]); 6] = [
    (
        "How do people usually greet elders?",
        ["With a wave", "With a deep bow", "With a hug", "With a shout"],
    ),
    (
        "Which word describes morning visits?",
        ["Rare", "Polite", "Noisy", "Forbidden"],
    ),
    (
        "What main idea ties the passage together?",
        ["Weather", "Respect", "Money", "Sport"],
    ),
    (
        "Where did travellers stop before sunset?",
        ["At a harbour", "At an inn", "In a field", "On a bridge"],
    ),
    (
        "Why might children copy their parents?",
        ["Boredom", "Imitation", "Fear", "Hunger"],
    ),
    (
        "What tone does the author adopt?",
        ["Angry", "Warm", "Bored", "Sarcastic"],
    ),
];

/// Replies according to which prompt template the request was built from.
pub struct ScriptedLlm {
    explorer_reply: String,
    /// Language names the gatekeeper turns down.
    rejected_languages: HashSet<String>,
    /// When set, every question reply is unusable.
    broken_questions: bool,
    question_calls: AtomicUsize,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self {
            explorer_reply: String::new(),
            rejected_languages: HashSet::new(),
            broken_questions: false,
            question_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_candidates(mut self, candidates: &[(&str, &str, &[&str])]) -> Self {
        let list: Vec<serde_json::Value> = candidates
            .iter()
            .map(|(concept, lens, keywords)| {
                serde_json::json!({"concept": concept, "lens": lens, "keywords": keywords})
            })
            .collect();
        self.explorer_reply = serde_json::json!({ "candidates": list }).to_string();
        self
    }

    pub fn rejecting(mut self, language_name: &str) -> Self {
        self.rejected_languages.insert(language_name.to_string());
        self
    }

    pub fn with_broken_questions(mut self) -> Self {
        self.broken_questions = true;
        self
    }

    pub fn prompts_starting_with(&self, prefix: &str) -> usize {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with(prefix))
            .count()
    }

    fn reply_for(&self, prompt: &str) -> String {
        if prompt.starts_with("You are a curriculum designer") {
            return self.explorer_reply.clone();
        }
        if prompt.starts_with("You review topics") {
            let rejected = self
                .rejected_languages
                .iter()
                .any(|name| prompt.contains(&format!("TARGET LANGUAGE: {} (", name)));
            return if rejected {
                "NO. The topic does not fit.".to_string()
            } else {
                "YES. Natural and appropriate.".to_string()
            };
        }
        if prompt.starts_with("Translate the following") {
            return r#"{"topic": "お辞儀の習慣", "keywords": ["お辞儀", "礼儀"]}"#.to_string();
        }
        if prompt.starts_with("Generate a natural, engaging prose passage") {
            let level = field_after(prompt, "DIFFICULTY: ");
            return format!(
                "Level {} passage. Travellers bowed at the inn before sunset, and children copied them.",
                level
            );
        }
        if prompt.starts_with("Generate a title") {
            return "\"Bowing at the Inn\"".to_string();
        }
        if prompt.starts_with("Generate a multiple-choice") {
            if self.broken_questions {
                return "I cannot write a question for this passage.".to_string();
            }
            let n = self.question_calls.fetch_add(1, Ordering::SeqCst);
            let (question, options) = QUESTIONS[n % QUESTIONS.len()];
            return serde_json::json!({
                "Question": question,
                "Options": options,
                "Answer": "B",
            })
            .to_string();
        }
        String::new()
    }
}

fn field_after<'a>(text: &'a str, marker: &str) -> &'a str {
    text.find(marker)
        .map(|start| {
            let rest = &text[start + marker.len()..];
            let end = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            &rest[..end]
        })
        .unwrap_or("")
}

#[async_trait]
impl LlmProvider for ScriptedLlm {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let prompt = request.user_prompt().unwrap_or_default().to_string();
        let reply = self.reply_for(&prompt);
        self.prompts.lock().unwrap().push(prompt);

        Ok(GenerationResponse {
            id: "scripted".to_string(),
            model: request.model,
            choices: vec![Choice {
                index: 0,
                message: Message::assistant(reply),
                finish_reason: "stop".to_string(),
            }],
            usage: Usage::default(),
        })
    }
}

/// Maps signatures to vectors by substring; anything else gets `fallback`.
pub struct KeyedEmbedder {
    pub rules: Vec<(String, Vec<f32>)>,
    pub fallback: Vec<f32>,
    pub calls: AtomicUsize,
}

impl KeyedEmbedder {
    pub fn new(rules: &[(&str, Vec<f32>)]) -> Self {
        Self {
            rules: rules
                .iter()
                .map(|(needle, vector)| (needle.to_string(), vector.clone()))
                .collect(),
            fallback: vec![0.0, 0.0, 1.0],
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for KeyedEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(inputs
            .iter()
            .map(|input| {
                self.rules
                    .iter()
                    .find(|(needle, _)| input.contains(needle.as_str()))
                    .map(|(_, vector)| vector.clone())
                    .unwrap_or_else(|| self.fallback.clone())
            })
            .collect())
    }
}

/// Returns fixed bytes, except for text containing `fail_marker`.
pub struct SelectiveSpeech {
    pub fail_marker: Option<String>,
    pub calls: Mutex<Vec<SpeechRequest>>,
}

impl SelectiveSpeech {
    pub fn working() -> Self {
        Self {
            fail_marker: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl SpeechSynthesizer for SelectiveSpeech {
    async fn synthesize(&self, request: SpeechRequest) -> Result<Vec<u8>, SpeechError> {
        let fail = self
            .fail_marker
            .as_deref()
            .is_some_and(|marker| request.text.contains(marker));
        self.calls.lock().unwrap().push(request);
        if fail {
            return Err(SpeechError::RateLimited("quota exhausted".to_string()));
        }
        Ok(b"ID3scripted-audio".to_vec())
    }
}
