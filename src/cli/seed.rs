//! Reference data for a fresh database.
//!
//! Categories, languages, lenses and test types are read from YAML (the
//! bundled `seed.yaml` unless a file is given). Question types, CEFR bands,
//! question distributions and English prompt templates are derived from the
//! built-in tables so they can never drift from the code that reads them.

use std::path::Path;

use serde::Deserialize;

use crate::difficulty::{
    cefr_code, initial_elo, question_distribution, word_count_range, QuestionType,
    MAX_DIFFICULTY, MIN_DIFFICULTY,
};
use crate::prompts::{
    default_template, ENGLISH_LANGUAGE_ID, EXPLORER_IDEATION, GATEKEEPER_CHECK, PROSE_GENERATION,
    TITLE_GENERATION, TOPIC_TRANSLATION,
};
use crate::storage::{CefrLevel, Database, DatabaseError, Language, Lens, QuestionTypeRow, TestType};

const BUNDLED_SEED: &str = include_str!("seed.yaml");

fn default_true() -> bool {
    true
}

fn default_cooldown() -> i64 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedCategory {
    pub id: i64,
    pub name: String,
    #[serde(default = "default_cooldown")]
    pub cooldown_days: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedLanguage {
    pub id: i64,
    pub language_code: String,
    pub language_name: String,
    pub native_name: String,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub display_order: Option<i64>,
    #[serde(default)]
    pub tts_voice_ids: Vec<String>,
    #[serde(default)]
    pub tts_speed: Option<f32>,
    #[serde(default)]
    pub prose_model: Option<String>,
    #[serde(default)]
    pub question_model: Option<String>,
}

impl From<SeedLanguage> for Language {
    fn from(seed: SeedLanguage) -> Self {
        let mut language = Language::new(
            seed.id,
            seed.language_code,
            seed.language_name,
            seed.native_name,
        );
        language.is_active = seed.is_active;
        if let Some(order) = seed.display_order {
            language.display_order = order;
        }
        language.tts_voice_ids = seed.tts_voice_ids;
        language.tts_speed = seed.tts_speed;
        language.prose_model = seed.prose_model;
        language.question_model = seed.question_model;
        language
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedLens {
    pub id: i64,
    pub lens_code: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub prompt_hint: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SeedTestType {
    pub id: i64,
    pub type_code: String,
    pub type_name: String,
    #[serde(default)]
    pub requires_audio: bool,
    #[serde(default = "default_true")]
    pub is_active: bool,
}

/// Catalogue rows to upsert.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SeedData {
    #[serde(default)]
    pub categories: Vec<SeedCategory>,
    #[serde(default)]
    pub languages: Vec<SeedLanguage>,
    #[serde(default)]
    pub lenses: Vec<SeedLens>,
    #[serde(default)]
    pub test_types: Vec<SeedTestType>,
}

/// Counts of rows written by [`SeedData::apply`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeedSummary {
    pub categories: usize,
    pub languages: usize,
    pub lenses: usize,
    pub test_types: usize,
    pub question_types: usize,
    pub cefr_levels: usize,
    pub distributions: usize,
    pub templates: usize,
}

impl SeedData {
    /// The data bundled with the binary.
    pub fn builtin() -> anyhow::Result<Self> {
        Self::from_yaml(BUNDLED_SEED)
    }

    pub fn from_yaml(text: &str) -> anyhow::Result<Self> {
        Ok(serde_yaml::from_str(text)?)
    }

    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_yaml(&text)
    }

    /// Upserts everything. Existing English templates are left alone so
    /// edited prompts survive a re-seed.
    pub async fn apply(&self, db: &Database) -> Result<SeedSummary, DatabaseError> {
        let mut summary = SeedSummary::default();

        for category in &self.categories {
            db.upsert_category(category.id, &category.name, category.cooldown_days)
                .await?;
            summary.categories += 1;
        }

        for language in &self.languages {
            db.upsert_language(&Language::from(language.clone())).await?;
            summary.languages += 1;
        }

        for (index, lens) in self.lenses.iter().enumerate() {
            db.upsert_lens(&Lens {
                id: lens.id,
                lens_code: lens.lens_code.clone(),
                display_name: lens.display_name.clone(),
                description: lens.description.clone(),
                prompt_hint: lens.prompt_hint.clone(),
                is_active: lens.is_active,
                sort_order: index as i64 + 1,
            })
            .await?;
            summary.lenses += 1;
        }

        for test_type in &self.test_types {
            db.upsert_test_type(&TestType {
                id: test_type.id,
                type_code: test_type.type_code.clone(),
                type_name: test_type.type_name.clone(),
                requires_audio: test_type.requires_audio,
                is_active: test_type.is_active,
            })
            .await?;
            summary.test_types += 1;
        }

        for row in question_type_rows() {
            db.upsert_question_type(&row).await?;
            summary.question_types += 1;
        }

        for level in cefr_levels() {
            db.upsert_cefr_level(&level).await?;
            summary.cefr_levels += 1;
        }

        for difficulty in MIN_DIFFICULTY..=MAX_DIFFICULTY {
            let codes: Vec<String> = question_distribution(difficulty)
                .iter()
                .map(|t| t.code().to_string())
                .collect();
            db.upsert_question_distribution(difficulty, &codes).await?;
            summary.distributions += 1;
        }

        for task in template_tasks() {
            if db.prompt_template(&task, ENGLISH_LANGUAGE_ID).await?.is_some() {
                continue;
            }
            if let Some(text) = default_template(&task) {
                db.upsert_prompt_template(&task, ENGLISH_LANGUAGE_ID, text)
                    .await?;
                summary.templates += 1;
            }
        }

        tracing::info!(?summary, "Seeded reference data");
        Ok(summary)
    }
}

fn question_type_rows() -> Vec<QuestionTypeRow> {
    QuestionType::ALL
        .iter()
        .enumerate()
        .map(|(index, t)| QuestionTypeRow {
            id: index as i64 + 1,
            type_code: t.code().to_string(),
            type_name: t.display_name().to_string(),
            description: Some(t.instruction().to_string()),
            cognitive_level: i64::from(t.cognitive_level()),
            display_order: index as i64 + 1,
        })
        .collect()
}

/// One band per CEFR code, spanning the difficulties that map to it.
fn cefr_levels() -> Vec<CefrLevel> {
    let mut levels: Vec<CefrLevel> = Vec::new();
    for difficulty in MIN_DIFFICULTY..=MAX_DIFFICULTY {
        let code = cefr_code(difficulty);
        let (min_words, max_words) = word_count_range(difficulty);
        match levels.last_mut() {
            Some(level) if level.cefr_code == code => {
                level.difficulty_max = i64::from(difficulty);
                level.word_count_max = i64::from(max_words);
            }
            _ => levels.push(CefrLevel {
                id: levels.len() as i64 + 1,
                cefr_code: code.to_string(),
                difficulty_min: i64::from(difficulty),
                difficulty_max: i64::from(difficulty),
                word_count_min: i64::from(min_words),
                word_count_max: i64::from(max_words),
                initial_elo: i64::from(initial_elo(difficulty)),
            }),
        }
    }
    levels
}

fn template_tasks() -> Vec<String> {
    let mut tasks: Vec<String> = [
        EXPLORER_IDEATION,
        GATEKEEPER_CHECK,
        PROSE_GENERATION,
        TITLE_GENERATION,
        TOPIC_TRANSLATION,
    ]
    .iter()
    .map(|t| t.to_string())
    .collect();
    tasks.extend(QuestionType::ALL.iter().map(|t| t.template_name()));
    tasks
}
