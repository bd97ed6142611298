//! Test stage: queue item → per-difficulty passage, questions, audio, rows.
//!
//! Each difficulty of a queue item succeeds or fails on its own. The item
//! ends `active` if any difficulty produced a test, `rejected` otherwise.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::agents::{
    AudioConfig, AudioSynthesizer, ProseRequest, ProseWriter, ProseWriterConfig,
    QuestionGenerator, QuestionGeneratorConfig, QuestionValidator, TitleGenerator,
    TitleGeneratorConfig, TitleRequest, TopicTranslator, TranslatedTopic, TranslatorConfig,
};
use crate::difficulty::QuestionType;
use crate::dimensions::DimensionCache;
use crate::llm::LlmProvider;
use crate::object_store::ObjectStore;
use crate::prompts::{PROSE_GENERATION, TITLE_GENERATION, TOPIC_TRANSLATION};
use crate::speech::SpeechSynthesizer;
use crate::storage::{
    Database, GeneratedQuestion, GeneratedTest, Language, QueueItem, QueueStatus, SkillRating,
    TestRunMetrics, Topic,
};

use super::config::TestGenConfig;
use super::{load_template, PipelineError};

const SLUG_SNIPPET_CHARS: usize = 40;

/// Prompt templates for one language.
struct LanguageTemplates {
    prose: String,
    title: String,
    translation: String,
    questions: HashMap<QuestionType, String>,
}

/// What happened to one queue item.
#[derive(Debug, Default)]
struct ItemOutcome {
    tests_generated: u32,
    tests_failed: u32,
    last_error: Option<String>,
}

/// Builds `{lang}-d{difficulty}-{concept-snippet}-{YYYYmmddHHMMSS}`.
pub fn build_slug(language_code: &str, difficulty: u8, concept: &str, at: chrono::DateTime<Utc>) -> String {
    let mut snippet = String::new();
    for c in concept.chars() {
        if c.is_ascii_alphanumeric() {
            snippet.push(c.to_ascii_lowercase());
        } else if !snippet.is_empty() && !snippet.ends_with('-') {
            snippet.push('-');
        }
        if snippet.len() >= SLUG_SNIPPET_CHARS {
            break;
        }
    }
    let snippet = snippet.trim_end_matches('-');
    let snippet = if snippet.is_empty() { "topic" } else { snippet };

    format!(
        "{}-d{}-{}-{}",
        language_code.to_lowercase(),
        difficulty,
        snippet,
        at.format("%Y%m%d%H%M%S")
    )
}

/// Drives test generation over pending queue items.
pub struct TestOrchestrator {
    db: Database,
    translator: TopicTranslator,
    prose_writer: ProseWriter,
    title_generator: TitleGenerator,
    question_generator: QuestionGenerator,
    validator: QuestionValidator,
    audio: AudioSynthesizer,
    config: TestGenConfig,
}

impl std::fmt::Debug for TestOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TestOrchestrator {
    pub fn new(
        db: Database,
        llm: Arc<dyn LlmProvider>,
        speech: Arc<dyn SpeechSynthesizer>,
        store: Arc<dyn ObjectStore>,
        config: TestGenConfig,
    ) -> Self {
        let retry = config.retry_policy();

        let translator = TopicTranslator::new(
            llm.clone(),
            TranslatorConfig::default()
                .with_model(&config.prose_model)
                .with_retry(retry),
        );
        let prose_writer = ProseWriter::new(
            llm.clone(),
            ProseWriterConfig::default()
                .with_model(&config.prose_model)
                .with_temperature(config.prose_temperature)
                .with_retry(retry),
        );
        let title_generator = TitleGenerator::new(
            llm.clone(),
            TitleGeneratorConfig::default()
                .with_model(&config.prose_model)
                .with_retry(retry),
        );
        let mut question_config = QuestionGeneratorConfig::default()
            .with_model(&config.question_model)
            .with_retry(retry);
        question_config.temperature = config.question_temperature;
        let question_generator = QuestionGenerator::new(llm, question_config);

        let mut audio_config = AudioConfig::default()
            .with_model(&config.tts_model)
            .with_retry(retry);
        audio_config.default_voice = config.tts_voice.clone();
        audio_config.default_speed = config.tts_speed;
        let audio = AudioSynthesizer::new(speech, store, audio_config);

        Self {
            db,
            translator,
            prose_writer,
            title_generator,
            question_generator,
            validator: QuestionValidator::default(),
            audio,
            config,
        }
    }

    pub fn config(&self) -> &TestGenConfig {
        &self.config
    }

    /// Processes up to `batch_size` pending queue items, oldest first.
    pub async fn run(&self) -> Result<TestRunMetrics, PipelineError> {
        let items = self.db.pending_queue_items(self.config.batch_size).await?;
        tracing::info!(
            items = items.len(),
            difficulties = ?self.config.target_difficulties,
            dry_run = self.config.dry_run,
            "Starting test generation"
        );
        self.process_batch(&items).await
    }

    /// Processes one queue item by id. The item must still be pending.
    pub async fn run_single(&self, queue_id: Uuid) -> Result<TestRunMetrics, PipelineError> {
        let item = self
            .db
            .queue_item(queue_id)
            .await?
            .ok_or(PipelineError::QueueItemNotFound(queue_id))?;
        if item.status != QueueStatus::Pending {
            return Err(PipelineError::QueueItemNotPending {
                id: queue_id,
                status: item.status,
            });
        }
        self.process_batch(std::slice::from_ref(&item)).await
    }

    async fn process_batch(&self, items: &[QueueItem]) -> Result<TestRunMetrics, PipelineError> {
        let started = Instant::now();
        let mut metrics = TestRunMetrics::new(Utc::now());

        if !items.is_empty() {
            let dims = DimensionCache::load(&self.db).await?;
            let mut templates: HashMap<i64, LanguageTemplates> = HashMap::new();

            for item in items {
                let outcome = self.process_item(item, &dims, &mut templates).await;
                match outcome {
                    Ok(Some(outcome)) => {
                        metrics.queue_items_processed += 1;
                        metrics.tests_generated += outcome.tests_generated;
                        metrics.tests_failed += outcome.tests_failed;
                    }
                    Ok(None) => {}
                    Err(e) => {
                        metrics.queue_items_processed += 1;
                        metrics.tests_failed += 1;
                        tracing::error!(queue_id = %item.id, error = %e, "Queue item failed");
                        self.reject_item(item.id, &e.to_string()).await;
                    }
                }
            }
        }

        metrics.execution_time_seconds = started.elapsed().as_secs_f64();
        if self.config.dry_run {
            tracing::info!("Dry run: skipping run metrics insert");
        } else if let Err(e) = self.db.insert_test_run(&metrics).await {
            tracing::error!(error = %e, "Failed to record test run metrics");
            metrics.error_message = Some(e.to_string());
        }

        tracing::info!(
            processed = metrics.queue_items_processed,
            generated = metrics.tests_generated,
            failed = metrics.tests_failed,
            seconds = metrics.execution_time_seconds,
            "Test generation finished"
        );
        Ok(metrics)
    }

    /// Marks a claimed item rejected after an item-level failure.
    async fn reject_item(&self, id: Uuid, error: &str) {
        if self.config.dry_run {
            return;
        }
        if let Err(e) = self
            .db
            .transition_queue_item(id, QueueStatus::Processing, QueueStatus::Rejected, Some(0), Some(error))
            .await
        {
            tracing::error!(queue_id = %id, error = %e, "Failed to reject queue item");
        }
    }

    /// Returns `Ok(None)` when another run claimed the item first.
    async fn process_item(
        &self,
        item: &QueueItem,
        dims: &DimensionCache,
        templates: &mut HashMap<i64, LanguageTemplates>,
    ) -> Result<Option<ItemOutcome>, PipelineError> {
        if !self.config.dry_run && !self.db.claim_queue_item(item.id).await? {
            tracing::info!(queue_id = %item.id, "Queue item already claimed, skipping");
            return Ok(None);
        }

        let topic = self
            .db
            .topic(item.topic_id)
            .await?
            .ok_or_else(|| PipelineError::MissingReference(format!("topic {}", item.topic_id)))?;
        let language = match dims.language(item.language_id) {
            Some(language) => language.clone(),
            None => self.db.language(item.language_id).await?.ok_or_else(|| {
                PipelineError::MissingReference(format!("language {}", item.language_id))
            })?,
        };

        if !templates.contains_key(&language.id) {
            let loaded = self.load_language_templates(language.id).await?;
            templates.insert(language.id, loaded);
        }
        let language_templates = templates
            .get(&language.id)
            .ok_or_else(|| PipelineError::MissingReference(format!("templates for {}", language.id)))?;

        let translated = self
            .translator
            .translate(
                &language_templates.translation,
                &topic.concept,
                &topic.keywords,
                &language,
            )
            .await;

        let mut outcome = ItemOutcome::default();
        for &difficulty in &self.config.target_difficulties {
            match self
                .generate_test(&topic, &translated, &language, dims, language_templates, difficulty)
                .await
            {
                Ok(()) => outcome.tests_generated += 1,
                Err(e) => {
                    outcome.tests_failed += 1;
                    match e {
                        PipelineError::TooFewQuestions { .. } => {
                            tracing::warn!(queue_id = %item.id, difficulty, error = %e, "Difficulty skipped")
                        }
                        _ => {
                            tracing::error!(queue_id = %item.id, difficulty, error = %e, "Difficulty failed")
                        }
                    }
                    outcome.last_error = Some(format!("difficulty {}: {}", difficulty, e));
                }
            }
        }

        if self.config.dry_run {
            tracing::info!(
                queue_id = %item.id,
                tests = outcome.tests_generated,
                "Dry run: leaving queue item pending"
            );
        } else if outcome.tests_generated > 0 {
            self.db
                .transition_queue_item(
                    item.id,
                    QueueStatus::Processing,
                    QueueStatus::Active,
                    Some(i64::from(outcome.tests_generated)),
                    None,
                )
                .await?;
            tracing::info!(queue_id = %item.id, tests = outcome.tests_generated, "Queue item active");
        } else {
            let error = outcome
                .last_error
                .clone()
                .unwrap_or_else(|| "No difficulty produced a test".to_string());
            self.db
                .transition_queue_item(
                    item.id,
                    QueueStatus::Processing,
                    QueueStatus::Rejected,
                    Some(0),
                    Some(&error),
                )
                .await?;
            tracing::warn!(queue_id = %item.id, error = %error, "Queue item rejected");
        }

        Ok(Some(outcome))
    }

    async fn load_language_templates(&self, language_id: i64) -> Result<LanguageTemplates, PipelineError> {
        let mut questions = HashMap::new();
        for question_type in QuestionType::ALL {
            let template = load_template(&self.db, &question_type.template_name(), language_id).await?;
            questions.insert(question_type, template);
        }

        Ok(LanguageTemplates {
            prose: load_template(&self.db, PROSE_GENERATION, language_id).await?,
            title: load_template(&self.db, TITLE_GENERATION, language_id).await?,
            translation: load_template(&self.db, TOPIC_TRANSLATION, language_id).await?,
            questions,
        })
    }

    async fn generate_test(
        &self,
        topic: &Topic,
        translated: &TranslatedTopic,
        language: &Language,
        dims: &DimensionCache,
        templates: &LanguageTemplates,
        difficulty: u8,
    ) -> Result<(), PipelineError> {
        let cefr_level = dims.cefr_code(difficulty);
        let word_range = dims.word_count_range(difficulty);
        let initial_elo = dims.initial_elo(difficulty);
        let mut question_types = dims.question_distribution(difficulty);
        question_types.truncate(self.config.questions_per_test);

        let prose = self
            .prose_writer
            .generate_prose(
                &templates.prose,
                &ProseRequest {
                    topic_concept: &translated.concept,
                    keywords: &translated.keywords,
                    language,
                    difficulty,
                    cefr_level: &cefr_level,
                    word_range,
                },
            )
            .await?;

        let title = match self
            .title_generator
            .generate_title(
                &templates.title,
                &TitleRequest {
                    prose: &prose,
                    topic_concept: &translated.concept,
                    language,
                    difficulty,
                    cefr_level: &cefr_level,
                },
            )
            .await
        {
            Ok(title) => Some(title),
            Err(e) => {
                tracing::warn!(difficulty, error = %e, "Title generation failed, saving without title");
                None
            }
        };

        let drafts = self
            .question_generator
            .generate_questions(&templates.questions, &prose, language, &question_types)
            .await;
        let report = self.validator.validate_all(&drafts);
        if report.accepted.len() < self.config.min_valid_questions {
            return Err(PipelineError::TooFewQuestions {
                valid: report.accepted.len(),
                requested: question_types.len(),
            });
        }

        let test_id = Uuid::new_v4();
        let audio_url = if self.config.dry_run {
            None
        } else {
            let voice = self.audio.select_voice(&language.tts_voice_ids);
            Some(
                self.audio
                    .generate_and_upload(&prose, test_id, &voice, language.tts_speed)
                    .await?,
            )
        };

        let test = GeneratedTest {
            id: test_id,
            slug: build_slug(&language.language_code, difficulty, &topic.concept, Utc::now()),
            language_id: language.id,
            topic_id: topic.id,
            difficulty,
            transcript: prose,
            title,
            audio_url,
            gen_user: self.config.gen_user.clone(),
        };
        let questions: Vec<GeneratedQuestion> = report
            .accepted
            .iter()
            .enumerate()
            .map(|(i, draft)| GeneratedQuestion {
                id: Uuid::new_v4(),
                question_text: draft.question_text.clone(),
                choices: draft.choices.clone(),
                answer: draft.answer.clone(),
                question_type_id: dims.question_type_id(draft.question_type.code()),
                display_order: i as i64 + 1,
            })
            .collect();
        let ratings: Vec<SkillRating> = dims
            .test_types()
            .iter()
            .filter(|t| !t.requires_audio || test.audio_url.is_some())
            .map(|t| SkillRating {
                test_type_id: t.id,
                elo_rating: i64::from(initial_elo),
                volatility: 1.0,
                total_attempts: 0,
            })
            .collect();

        if self.config.dry_run {
            tracing::info!(
                slug = %test.slug,
                questions = questions.len(),
                "Dry run: skipping test insert"
            );
            return Ok(());
        }

        self.db.insert_generated_test(&test, &questions, &ratings).await?;
        Ok(())
    }
}
