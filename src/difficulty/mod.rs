//! Built-in difficulty tables.
//!
//! Difficulty is an integer from 1 (absolute beginner) to 9 (near-native).
//! The database can override most of these values through the dimension
//! tables; the functions here are the fallbacks used when it does not.

use serde::{Deserialize, Serialize};

/// Lowest difficulty level.
pub const MIN_DIFFICULTY: u8 = 1;
/// Highest difficulty level.
pub const MAX_DIFFICULTY: u8 = 9;
/// Questions generated per test.
pub const QUESTIONS_PER_TEST: usize = 5;

/// Returns true for levels in `1..=9`.
pub fn is_valid_difficulty(difficulty: u8) -> bool {
    (MIN_DIFFICULTY..=MAX_DIFFICULTY).contains(&difficulty)
}

fn clamp(difficulty: u8) -> u8 {
    difficulty.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// CEFR band for a difficulty level.
pub fn cefr_code(difficulty: u8) -> &'static str {
    match clamp(difficulty) {
        1 | 2 => "A1",
        3 | 4 => "A2",
        5 => "B1",
        6 => "B2",
        7 => "C1",
        _ => "C2",
    }
}

/// Target passage length in words, inclusive.
pub fn word_count_range(difficulty: u8) -> (u32, u32) {
    match clamp(difficulty) {
        1 | 2 => (80, 150),
        3 | 4 => (120, 200),
        5 => (200, 300),
        6 => (300, 400),
        7 => (400, 600),
        _ => (600, 900),
    }
}

/// Starting skill rating for a freshly generated test.
pub fn initial_elo(difficulty: u8) -> i32 {
    800 + 150 * (i32::from(clamp(difficulty)) - 1)
}

/// How the title should read at a given difficulty.
pub fn title_style(difficulty: u8) -> &'static str {
    match clamp(difficulty) {
        1 | 2 => "very simple and short (3-6 words)",
        3 | 4 => "simple and concise (4-8 words)",
        5 => "clear and straightforward (5-10 words)",
        6 => "moderately descriptive (6-12 words)",
        7 => "sophisticated and nuanced (8-15 words)",
        _ => "complex and detailed (10-18 words)",
    }
}

/// The comprehension-question taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    LiteralDetail,
    VocabularyContext,
    MainIdea,
    SupportingDetail,
    Inference,
    AuthorPurpose,
}

impl QuestionType {
    pub const ALL: [QuestionType; 6] = [
        QuestionType::LiteralDetail,
        QuestionType::VocabularyContext,
        QuestionType::MainIdea,
        QuestionType::SupportingDetail,
        QuestionType::Inference,
        QuestionType::AuthorPurpose,
    ];

    /// Stable code stored in the database and used in template names.
    pub fn code(&self) -> &'static str {
        match self {
            QuestionType::LiteralDetail => "literal_detail",
            QuestionType::VocabularyContext => "vocabulary_context",
            QuestionType::MainIdea => "main_idea",
            QuestionType::SupportingDetail => "supporting_detail",
            QuestionType::Inference => "inference",
            QuestionType::AuthorPurpose => "author_purpose",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        let code = code.trim();
        Self::ALL.into_iter().find(|t| t.code() == code)
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            QuestionType::LiteralDetail => "Literal Detail",
            QuestionType::VocabularyContext => "Vocabulary in Context",
            QuestionType::MainIdea => "Main Idea",
            QuestionType::SupportingDetail => "Supporting Detail",
            QuestionType::Inference => "Inference",
            QuestionType::AuthorPurpose => "Author Purpose/Tone",
        }
    }

    /// What the model should ask about for this type.
    pub fn instruction(&self) -> &'static str {
        match self {
            QuestionType::LiteralDetail => {
                "Ask about a specific fact or detail explicitly stated in the text. The answer should be directly findable in the passage."
            }
            QuestionType::VocabularyContext => {
                "Ask about the meaning of a word or phrase as used in the passage. Focus on how context shapes meaning."
            }
            QuestionType::MainIdea => {
                "Ask about the central theme, main point, or overall purpose of the passage or a paragraph."
            }
            QuestionType::SupportingDetail => {
                "Ask about information that supports or explains the main ideas in the passage."
            }
            QuestionType::Inference => {
                "Ask about something not directly stated but that can be concluded from the information given."
            }
            QuestionType::AuthorPurpose => {
                "Ask about why the author wrote the passage, their attitude, or the intended effect on readers."
            }
        }
    }

    /// 1 = recall, 2 = comprehension, 3 = analysis.
    pub fn cognitive_level(&self) -> u8 {
        match self {
            QuestionType::LiteralDetail | QuestionType::VocabularyContext => 1,
            QuestionType::MainIdea | QuestionType::SupportingDetail => 2,
            QuestionType::Inference | QuestionType::AuthorPurpose => 3,
        }
    }

    /// Prompt template task name for this type.
    pub fn template_name(&self) -> String {
        format!("question_{}", self.code())
    }
}

impl std::fmt::Display for QuestionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// The five question types asked at a given difficulty.
///
/// Low levels lean on recall, high levels on inference and author purpose.
pub fn question_distribution(difficulty: u8) -> [QuestionType; QUESTIONS_PER_TEST] {
    use QuestionType::*;
    match clamp(difficulty) {
        1 => [LiteralDetail, LiteralDetail, VocabularyContext, VocabularyContext, MainIdea],
        2 => [LiteralDetail, LiteralDetail, VocabularyContext, MainIdea, SupportingDetail],
        3 => [LiteralDetail, VocabularyContext, MainIdea, SupportingDetail, SupportingDetail],
        4 => [LiteralDetail, VocabularyContext, MainIdea, SupportingDetail, Inference],
        5 => [VocabularyContext, MainIdea, SupportingDetail, Inference, Inference],
        6 => [VocabularyContext, MainIdea, SupportingDetail, Inference, AuthorPurpose],
        7 => [MainIdea, SupportingDetail, Inference, Inference, AuthorPurpose],
        8 => [MainIdea, Inference, Inference, AuthorPurpose, AuthorPurpose],
        _ => [SupportingDetail, Inference, Inference, AuthorPurpose, AuthorPurpose],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cefr_bands() {
        let codes: Vec<&str> = (1..=9).map(cefr_code).collect();
        assert_eq!(
            codes,
            vec!["A1", "A1", "A2", "A2", "B1", "B2", "C1", "C2", "C2"]
        );
        assert_eq!(cefr_code(0), "A1");
        assert_eq!(cefr_code(12), "C2");
    }

    #[test]
    fn test_word_count_ranges_grow() {
        assert_eq!(word_count_range(1), (80, 150));
        assert_eq!(word_count_range(5), (200, 300));
        assert_eq!(word_count_range(9), (600, 900));
        for d in 1..9 {
            assert!(word_count_range(d).0 <= word_count_range(d + 1).0);
        }
    }

    #[test]
    fn test_initial_elo() {
        assert_eq!(initial_elo(1), 800);
        assert_eq!(initial_elo(5), 1400);
        assert_eq!(initial_elo(9), 2000);
    }

    #[test]
    fn test_distribution_shifts_toward_inference() {
        let low = question_distribution(1);
        let high = question_distribution(9);
        assert!(low.iter().all(|t| t.cognitive_level() <= 2));
        assert!(high.iter().filter(|t| t.cognitive_level() == 3).count() >= 4);
        for d in 1..=9 {
            assert_eq!(question_distribution(d).len(), QUESTIONS_PER_TEST);
        }
    }

    #[test]
    fn test_question_type_codes_roundtrip() {
        for t in QuestionType::ALL {
            assert_eq!(QuestionType::from_code(t.code()), Some(t));
        }
        assert_eq!(QuestionType::from_code("riddle"), None);
        assert_eq!(
            QuestionType::Inference.template_name(),
            "question_inference"
        );
    }

    #[test]
    fn test_title_style() {
        assert!(title_style(1).contains("3-6 words"));
        assert!(title_style(9).contains("10-18 words"));
    }
}
