//! Reference data loaded once per orchestrator run.
//!
//! A [`DimensionCache`] is built at the start of a run and handed by
//! reference to whatever needs a language, lens, or difficulty lookup.
//! Difficulty lookups fall back to the built-in tables in
//! [`crate::difficulty`] when the database has no matching row.

use std::collections::HashMap;

use crate::difficulty::{self, QuestionType, QUESTIONS_PER_TEST};
use crate::storage::{CefrLevel, Database, DatabaseError, Language, Lens, QuestionTypeRow, TestType};

/// Immutable snapshot of the dimension tables.
#[derive(Debug, Clone, Default)]
pub struct DimensionCache {
    languages: Vec<Language>,
    lenses: Vec<Lens>,
    lens_index_by_code: HashMap<String, usize>,
    lens_index_by_id: HashMap<i64, usize>,
    test_types: Vec<TestType>,
    question_types: HashMap<String, QuestionTypeRow>,
    cefr_levels: Vec<CefrLevel>,
    distributions: HashMap<u8, Vec<String>>,
}

impl DimensionCache {
    pub fn new(
        languages: Vec<Language>,
        lenses: Vec<Lens>,
        test_types: Vec<TestType>,
        question_types: Vec<QuestionTypeRow>,
        cefr_levels: Vec<CefrLevel>,
    ) -> Self {
        let lens_index_by_code = lenses
            .iter()
            .enumerate()
            .map(|(i, lens)| (lens.lens_code.to_lowercase(), i))
            .collect();
        let lens_index_by_id = lenses
            .iter()
            .enumerate()
            .map(|(i, lens)| (lens.id, i))
            .collect();
        let question_types = question_types
            .into_iter()
            .map(|row| (row.type_code.clone(), row))
            .collect();

        Self {
            languages,
            lenses,
            lens_index_by_code,
            lens_index_by_id,
            test_types,
            question_types,
            cefr_levels,
            distributions: HashMap::new(),
        }
    }

    /// Overrides the per-difficulty question mix with database rows.
    pub fn with_distributions(mut self, distributions: HashMap<u8, Vec<String>>) -> Self {
        self.distributions = distributions;
        self
    }

    /// Reads every dimension table.
    pub async fn load(db: &Database) -> Result<Self, DatabaseError> {
        let cache = Self::new(
            db.active_languages().await?,
            db.active_lenses().await?,
            db.active_test_types().await?,
            db.question_types().await?,
            db.cefr_levels().await?,
        )
        .with_distributions(db.question_distributions().await?);

        tracing::debug!(
            languages = cache.languages.len(),
            lenses = cache.lenses.len(),
            test_types = cache.test_types.len(),
            question_types = cache.question_types.len(),
            cefr_levels = cache.cefr_levels.len(),
            "Loaded dimension cache"
        );
        Ok(cache)
    }

    /// Active languages in display order.
    pub fn languages(&self) -> &[Language] {
        &self.languages
    }

    pub fn language(&self, id: i64) -> Option<&Language> {
        self.languages.iter().find(|l| l.id == id)
    }

    pub fn lenses(&self) -> &[Lens] {
        &self.lenses
    }

    /// Case-insensitive lens lookup.
    pub fn lens_by_code(&self, code: &str) -> Option<&Lens> {
        self.lens_index_by_code
            .get(&code.trim().to_lowercase())
            .map(|&i| &self.lenses[i])
    }

    pub fn lens_by_id(&self, id: i64) -> Option<&Lens> {
        self.lens_index_by_id.get(&id).map(|&i| &self.lenses[i])
    }

    pub fn test_types(&self) -> &[TestType] {
        &self.test_types
    }

    /// Database id of a question type, if the table has it.
    pub fn question_type_id(&self, code: &str) -> Option<i64> {
        self.question_types.get(code).map(|row| row.id)
    }

    fn cefr_level(&self, difficulty: u8) -> Option<&CefrLevel> {
        self.cefr_levels.iter().find(|level| level.covers(difficulty))
    }

    pub fn cefr_code(&self, difficulty: u8) -> String {
        self.cefr_level(difficulty)
            .map(|level| level.cefr_code.clone())
            .unwrap_or_else(|| difficulty::cefr_code(difficulty).to_string())
    }

    pub fn word_count_range(&self, difficulty: u8) -> (u32, u32) {
        self.cefr_level(difficulty)
            .and_then(|level| {
                let min = u32::try_from(level.word_count_min).ok()?;
                let max = u32::try_from(level.word_count_max).ok()?;
                (min <= max).then_some((min, max))
            })
            .unwrap_or_else(|| difficulty::word_count_range(difficulty))
    }

    pub fn initial_elo(&self, difficulty: u8) -> i32 {
        self.cefr_level(difficulty)
            .and_then(|level| i32::try_from(level.initial_elo).ok())
            .unwrap_or_else(|| difficulty::initial_elo(difficulty))
    }

    /// The question types to ask at `difficulty`.
    ///
    /// A database row is used only when it names exactly five known codes.
    pub fn question_distribution(&self, difficulty: u8) -> Vec<QuestionType> {
        if let Some(codes) = self.distributions.get(&difficulty) {
            let parsed: Vec<QuestionType> =
                codes.iter().filter_map(|c| QuestionType::from_code(c)).collect();
            if parsed.len() == QUESTIONS_PER_TEST && parsed.len() == codes.len() {
                return parsed;
            }
            tracing::warn!(difficulty, ?codes, "Ignoring malformed question distribution row");
        }
        difficulty::question_distribution(difficulty).to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens(id: i64, code: &str) -> Lens {
        Lens {
            id,
            lens_code: code.to_string(),
            display_name: code.to_uppercase(),
            description: None,
            prompt_hint: None,
            is_active: true,
            sort_order: id,
        }
    }

    #[test]
    fn test_falls_back_to_builtin_tables() {
        let cache = DimensionCache::default();
        assert_eq!(cache.cefr_code(5), "B1");
        assert_eq!(cache.word_count_range(9), (600, 900));
        assert_eq!(cache.initial_elo(1), 800);
        assert_eq!(cache.question_distribution(4).len(), QUESTIONS_PER_TEST);
        assert_eq!(cache.question_type_id("main_idea"), None);
    }

    #[test]
    fn test_database_rows_take_precedence() {
        let cache = DimensionCache::new(
            vec![],
            vec![],
            vec![],
            vec![QuestionTypeRow {
                id: 7,
                type_code: "main_idea".into(),
                type_name: "Main Idea".into(),
                description: None,
                cognitive_level: 2,
                display_order: 1,
            }],
            vec![CefrLevel {
                id: 1,
                cefr_code: "B1+".into(),
                difficulty_min: 5,
                difficulty_max: 6,
                word_count_min: 250,
                word_count_max: 350,
                initial_elo: 1400,
            }],
        );

        assert_eq!(cache.cefr_code(6), "B1+");
        assert_eq!(cache.word_count_range(5), (250, 350));
        assert_eq!(cache.initial_elo(5), 1400);
        assert_eq!(cache.initial_elo(7), difficulty::initial_elo(7));
        assert_eq!(cache.question_type_id("main_idea"), Some(7));
    }

    #[test]
    fn test_lens_lookup_ignores_case() {
        let cache = DimensionCache::new(
            vec![],
            vec![lens(1, "historical"), lens(2, "economic")],
            vec![],
            vec![],
            vec![],
        );
        assert_eq!(cache.lens_by_code(" Economic ").map(|l| l.id), Some(2));
        assert_eq!(cache.lens_by_id(1).map(|l| l.lens_code.as_str()), Some("historical"));
        assert!(cache.lens_by_code("scientific").is_none());
    }

    #[test]
    fn test_distribution_override_requires_five_known_codes() {
        let mut rows = HashMap::new();
        rows.insert(
            3,
            ["main_idea", "main_idea", "inference", "inference", "author_purpose"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        );
        rows.insert(4, vec!["main_idea".to_string(), "bogus".to_string()]);
        let cache = DimensionCache::default().with_distributions(rows);

        assert_eq!(cache.question_distribution(3)[0], QuestionType::MainIdea);
        assert_eq!(
            cache.question_distribution(4),
            difficulty::question_distribution(4).to_vec()
        );
    }
}
