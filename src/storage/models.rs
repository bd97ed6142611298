//! Row types for the content database.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A content domain that topics are generated for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Category {
    pub id: i64,
    pub name: String,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub cooldown_days: i64,
    pub total_topics_generated: i64,
}

impl Category {
    /// True once the cooldown since the last run has elapsed (or it never ran).
    /// A cooldown too large to represent never elapses.
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        match self.last_used_at {
            None => true,
            Some(last) => match Duration::try_days(self.cooldown_days.max(0)) {
                Some(cooldown) => now - last >= cooldown,
                None => false,
            },
        }
    }
}

/// Orders the categories that may run at `now`: never-used first, then
/// least recently used, ties broken by id.
pub fn eligible_categories(categories: &[Category], now: DateTime<Utc>) -> Vec<&Category> {
    let mut eligible: Vec<&Category> = categories
        .iter()
        .filter(|c| c.is_active && c.is_eligible(now))
        .collect();
    eligible.sort_by(|a, b| a.last_used_at.cmp(&b.last_used_at).then(a.id.cmp(&b.id)));
    eligible
}

/// A target language.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Language {
    pub id: i64,
    pub language_code: String,
    pub language_name: String,
    pub native_name: String,
    pub is_active: bool,
    pub display_order: i64,
    /// TTS voices to pick from; empty means the synthesizer's defaults.
    pub tts_voice_ids: Vec<String>,
    pub tts_speed: Option<f32>,
    pub prose_model: Option<String>,
    pub question_model: Option<String>,
}

impl Language {
    pub fn new(
        id: i64,
        language_code: impl Into<String>,
        language_name: impl Into<String>,
        native_name: impl Into<String>,
    ) -> Self {
        Self {
            id,
            language_code: language_code.into(),
            language_name: language_name.into(),
            native_name: native_name.into(),
            is_active: true,
            display_order: id,
            tts_voice_ids: Vec::new(),
            tts_speed: None,
            prose_model: None,
            question_model: None,
        }
    }

    /// English content needs no topic translation.
    pub fn is_english(&self) -> bool {
        matches!(
            self.language_code.to_lowercase().as_str(),
            "en" | "en-us" | "en-gb" | "english"
        )
    }
}

/// An angle of approach used to diversify ideation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lens {
    pub id: i64,
    pub lens_code: String,
    pub display_name: String,
    pub description: Option<String>,
    pub prompt_hint: Option<String>,
    pub is_active: bool,
    pub sort_order: i64,
}

impl Lens {
    /// Text shown to the Explorer for this lens.
    pub fn guidance(&self) -> &str {
        self.description
            .as_deref()
            .or(self.prompt_hint.as_deref())
            .unwrap_or("")
    }
}

/// An approved topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: Uuid,
    pub category_id: i64,
    pub concept: String,
    pub lens_id: i64,
    pub keywords: Vec<String>,
    pub embedding: Vec<f32>,
    pub semantic_signature: String,
    pub created_at: DateTime<Utc>,
}

/// A topic about to be inserted.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTopic {
    pub category_id: i64,
    pub concept: String,
    pub lens_id: i64,
    pub keywords: Vec<String>,
    pub embedding: Vec<f32>,
    pub semantic_signature: String,
}

/// A stored topic close to a query vector.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicMatch {
    pub id: Uuid,
    pub concept: String,
    pub similarity: f64,
}

/// Lifecycle of a production queue item.
///
/// `Pending -> Processing -> {Active, Rejected}` are the only legal moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    Pending,
    Processing,
    Active,
    Rejected,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Processing => "processing",
            QueueStatus::Active => "active",
            QueueStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "processing" => Some(QueueStatus::Processing),
            "active" => Some(QueueStatus::Active),
            "rejected" => Some(QueueStatus::Rejected),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: QueueStatus) -> bool {
        matches!(
            (self, next),
            (QueueStatus::Pending, QueueStatus::Processing)
                | (QueueStatus::Processing, QueueStatus::Active)
                | (QueueStatus::Processing, QueueStatus::Rejected)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Active | QueueStatus::Rejected)
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (topic, language) unit of test-generation work.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub id: Uuid,
    pub topic_id: Uuid,
    pub language_id: i64,
    pub status: QueueStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
    pub tests_generated: i64,
    pub error_log: Option<String>,
}

/// A skill a test can be rated on (listening, reading, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestType {
    pub id: i64,
    pub type_code: String,
    pub type_name: String,
    pub requires_audio: bool,
    pub is_active: bool,
}

/// Database row for a question type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionTypeRow {
    pub id: i64,
    pub type_code: String,
    pub type_name: String,
    pub description: Option<String>,
    pub cognitive_level: i64,
    pub display_order: i64,
}

/// A CEFR band covering a range of difficulty levels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CefrLevel {
    pub id: i64,
    pub cefr_code: String,
    pub difficulty_min: i64,
    pub difficulty_max: i64,
    pub word_count_min: i64,
    pub word_count_max: i64,
    pub initial_elo: i64,
}

impl CefrLevel {
    pub fn covers(&self, difficulty: u8) -> bool {
        let d = i64::from(difficulty);
        self.difficulty_min <= d && d <= self.difficulty_max
    }
}

/// A finished test ready to be persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedTest {
    pub id: Uuid,
    pub slug: String,
    pub language_id: i64,
    pub topic_id: Uuid,
    pub difficulty: u8,
    pub transcript: String,
    pub title: Option<String>,
    pub audio_url: Option<String>,
    pub gen_user: String,
}

/// A validated multiple-choice question belonging to a test.
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedQuestion {
    pub id: Uuid,
    pub question_text: String,
    pub choices: Vec<String>,
    pub answer: String,
    pub question_type_id: Option<i64>,
    pub display_order: i64,
}

/// Initial rating row for one skill of a test.
#[derive(Debug, Clone, PartialEq)]
pub struct SkillRating {
    pub test_type_id: i64,
    pub elo_rating: i64,
    pub volatility: f64,
    pub total_attempts: i64,
}

/// Metrics for one topic-generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TopicRunMetrics {
    pub run_date: DateTime<Utc>,
    pub category_id: Option<i64>,
    pub category_name: Option<String>,
    pub topics_generated: u32,
    pub topics_rejected_similarity: u32,
    pub topics_rejected_gatekeeper: u32,
    pub candidates_proposed: u32,
    pub queue_items_created: u32,
    pub api_calls_llm: u32,
    pub api_calls_embedding: u32,
    pub total_cost_usd: f64,
    pub execution_time_seconds: f64,
    pub error_message: Option<String>,
}

impl TopicRunMetrics {
    pub fn new(run_date: DateTime<Utc>) -> Self {
        Self {
            run_date,
            category_id: None,
            category_name: None,
            topics_generated: 0,
            topics_rejected_similarity: 0,
            topics_rejected_gatekeeper: 0,
            candidates_proposed: 0,
            queue_items_created: 0,
            api_calls_llm: 0,
            api_calls_embedding: 0,
            total_cost_usd: 0.0,
            execution_time_seconds: 0.0,
            error_message: None,
        }
    }
}

/// Metrics for one test-generation run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TestRunMetrics {
    pub run_date: DateTime<Utc>,
    pub queue_items_processed: u32,
    pub tests_generated: u32,
    pub tests_failed: u32,
    pub execution_time_seconds: f64,
    pub error_message: Option<String>,
}

impl TestRunMetrics {
    pub fn new(run_date: DateTime<Utc>) -> Self {
        Self {
            run_date,
            queue_items_processed: 0,
            tests_generated: 0,
            tests_failed: 0,
            execution_time_seconds: 0.0,
            error_message: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn category(id: i64, last_used_days_ago: Option<i64>, cooldown_days: i64) -> Category {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        Category {
            id,
            name: format!("cat-{}", id),
            is_active: true,
            last_used_at: last_used_days_ago.map(|d| now - Duration::days(d)),
            cooldown_days,
            total_topics_generated: 0,
        }
    }

    #[test]
    fn test_cooldown_excludes_recent_categories() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let categories = vec![
            category(1, Some(1), 3),
            category(2, Some(5), 3),
            category(3, None, 3),
            category(4, Some(3), 3),
        ];

        let ids: Vec<i64> = eligible_categories(&categories, now)
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![3, 2, 4]);
    }

    #[test]
    fn test_huge_cooldown_never_elapses() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let stuck = category(1, Some(10_000), i64::MAX);
        assert!(!stuck.is_eligible(now));
        assert!(category(2, None, i64::MAX).is_eligible(now));
        assert!(category(3, Some(1), -5).is_eligible(now));
    }

    #[test]
    fn test_inactive_categories_are_skipped() {
        let now = Utc.with_ymd_and_hms(2026, 3, 10, 12, 0, 0).unwrap();
        let mut inactive = category(1, None, 0);
        inactive.is_active = false;
        assert!(eligible_categories(&[inactive], now).is_empty());
    }

    #[test]
    fn test_queue_status_transitions() {
        use QueueStatus::*;
        assert!(Pending.can_transition_to(Processing));
        assert!(Processing.can_transition_to(Active));
        assert!(Processing.can_transition_to(Rejected));

        assert!(!Pending.can_transition_to(Active));
        assert!(!Pending.can_transition_to(Rejected));
        assert!(!Processing.can_transition_to(Pending));
        assert!(!Processing.can_transition_to(Processing));
        assert!(!Active.can_transition_to(Processing));
        assert!(!Rejected.can_transition_to(Pending));
    }

    #[test]
    fn test_queue_status_parse() {
        for status in [
            QueueStatus::Pending,
            QueueStatus::Processing,
            QueueStatus::Active,
            QueueStatus::Rejected,
        ] {
            assert_eq!(QueueStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(QueueStatus::parse("done"), None);
    }

    #[test]
    fn test_language_is_english() {
        assert!(Language::new(2, "en", "English", "English").is_english());
        assert!(Language::new(9, "EN-GB", "English", "English").is_english());
        assert!(!Language::new(1, "zh", "Chinese", "中文").is_english());
    }

    #[test]
    fn test_lens_guidance_prefers_description() {
        let mut lens = Lens {
            id: 1,
            lens_code: "historical".into(),
            display_name: "Historical".into(),
            description: Some("How it came to be".into()),
            prompt_hint: Some("hint".into()),
            is_active: true,
            sort_order: 1,
        };
        assert_eq!(lens.guidance(), "How it came to be");
        lens.description = None;
        assert_eq!(lens.guidance(), "hint");
    }
}
