//! SQLite schema for the content database.
//!
//! List-valued columns (keywords, voice ids, choices, embeddings) hold JSON
//! text. UUIDs are stored in their hyphenated text form.

pub const CREATE_CATEGORIES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    is_active INTEGER NOT NULL DEFAULT 1,
    last_used_at TEXT,
    cooldown_days INTEGER NOT NULL DEFAULT 3,
    total_topics_generated INTEGER NOT NULL DEFAULT 0,
    updated_at TEXT
)
"#;

pub const CREATE_LANGUAGES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dim_languages (
    id INTEGER PRIMARY KEY,
    language_code TEXT NOT NULL UNIQUE,
    language_name TEXT NOT NULL,
    native_name TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    display_order INTEGER NOT NULL DEFAULT 0,
    tts_voice_ids TEXT NOT NULL DEFAULT '[]',
    tts_speed REAL,
    prose_model TEXT,
    question_model TEXT
)
"#;

pub const CREATE_LENSES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dim_lens (
    id INTEGER PRIMARY KEY,
    lens_code TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    description TEXT,
    prompt_hint TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    sort_order INTEGER NOT NULL DEFAULT 0
)
"#;

pub const CREATE_TOPICS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS topics (
    id TEXT PRIMARY KEY,
    category_id INTEGER NOT NULL REFERENCES categories(id),
    concept_english TEXT NOT NULL,
    lens_id INTEGER NOT NULL REFERENCES dim_lens(id),
    keywords TEXT NOT NULL DEFAULT '[]',
    embedding TEXT NOT NULL,
    semantic_signature TEXT NOT NULL,
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_PRODUCTION_QUEUE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS production_queue (
    id TEXT PRIMARY KEY,
    topic_id TEXT NOT NULL REFERENCES topics(id),
    language_id INTEGER NOT NULL REFERENCES dim_languages(id),
    status TEXT NOT NULL DEFAULT 'pending'
        CHECK (status IN ('pending', 'processing', 'active', 'rejected')),
    created_at TEXT NOT NULL,
    processed_at TEXT,
    tests_generated INTEGER NOT NULL DEFAULT 0,
    error_log TEXT,
    UNIQUE (topic_id, language_id)
)
"#;

/// Refuses any status change outside `pending -> processing -> {active, rejected}`.
pub const CREATE_QUEUE_TRANSITION_TRIGGER: &str = r#"
CREATE TRIGGER IF NOT EXISTS production_queue_status_transition
BEFORE UPDATE OF status ON production_queue
FOR EACH ROW
WHEN NOT (
    (OLD.status = 'pending' AND NEW.status = 'processing')
    OR (OLD.status = 'processing' AND NEW.status IN ('active', 'rejected'))
)
BEGIN
    SELECT RAISE(ABORT, 'invalid production_queue status transition');
END
"#;

pub const CREATE_TEST_TYPES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dim_test_types (
    id INTEGER PRIMARY KEY,
    type_code TEXT NOT NULL UNIQUE,
    type_name TEXT NOT NULL,
    requires_audio INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1
)
"#;

pub const CREATE_QUESTION_TYPES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dim_question_types (
    id INTEGER PRIMARY KEY,
    type_code TEXT NOT NULL UNIQUE,
    type_name TEXT NOT NULL,
    description TEXT,
    cognitive_level INTEGER NOT NULL,
    display_order INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1
)
"#;

pub const CREATE_CEFR_LEVELS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS dim_cefr_levels (
    id INTEGER PRIMARY KEY,
    cefr_code TEXT NOT NULL UNIQUE,
    difficulty_min INTEGER NOT NULL,
    difficulty_max INTEGER NOT NULL,
    word_count_min INTEGER NOT NULL,
    word_count_max INTEGER NOT NULL,
    initial_elo INTEGER NOT NULL
)
"#;

pub const CREATE_QUESTION_DISTRIBUTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS question_type_distributions (
    difficulty INTEGER PRIMARY KEY CHECK (difficulty BETWEEN 1 AND 9),
    question_type_1 TEXT,
    question_type_2 TEXT,
    question_type_3 TEXT,
    question_type_4 TEXT,
    question_type_5 TEXT
)
"#;

pub const CREATE_PROMPT_TEMPLATES_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS prompt_templates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    task_name TEXT NOT NULL,
    language_id INTEGER NOT NULL,
    template_text TEXT NOT NULL,
    version INTEGER NOT NULL DEFAULT 1,
    is_active INTEGER NOT NULL DEFAULT 1,
    UNIQUE (task_name, language_id, version)
)
"#;

pub const CREATE_TESTS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tests (
    id TEXT PRIMARY KEY,
    slug TEXT NOT NULL UNIQUE,
    language_id INTEGER NOT NULL REFERENCES dim_languages(id),
    topic_id TEXT NOT NULL REFERENCES topics(id),
    difficulty INTEGER NOT NULL CHECK (difficulty BETWEEN 1 AND 9),
    transcript TEXT NOT NULL,
    title TEXT,
    audio_url TEXT,
    gen_user TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL
)
"#;

pub const CREATE_QUESTIONS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS questions (
    id TEXT PRIMARY KEY,
    test_id TEXT NOT NULL REFERENCES tests(id) ON DELETE CASCADE,
    question_text TEXT NOT NULL,
    choices TEXT NOT NULL,
    answer TEXT NOT NULL,
    question_type_id INTEGER REFERENCES dim_question_types(id),
    display_order INTEGER NOT NULL
)
"#;

pub const CREATE_SKILL_RATINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS test_skill_ratings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    test_id TEXT NOT NULL REFERENCES tests(id) ON DELETE CASCADE,
    test_type_id INTEGER NOT NULL REFERENCES dim_test_types(id),
    elo_rating INTEGER NOT NULL,
    volatility REAL NOT NULL DEFAULT 1.0,
    total_attempts INTEGER NOT NULL DEFAULT 0,
    UNIQUE (test_id, test_type_id)
)
"#;

pub const CREATE_TOPIC_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS topic_generation_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_date TEXT NOT NULL,
    category_id INTEGER,
    category_name TEXT,
    topics_generated INTEGER NOT NULL,
    topics_rejected_similarity INTEGER NOT NULL,
    topics_rejected_gatekeeper INTEGER NOT NULL,
    candidates_proposed INTEGER NOT NULL,
    api_calls_llm INTEGER NOT NULL,
    api_calls_embedding INTEGER NOT NULL,
    total_cost_usd REAL NOT NULL,
    execution_time_seconds REAL NOT NULL,
    error_message TEXT
)
"#;

pub const CREATE_TEST_RUNS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS test_generation_runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    run_date TEXT NOT NULL,
    queue_items_processed INTEGER NOT NULL,
    tests_generated INTEGER NOT NULL,
    tests_failed INTEGER NOT NULL,
    execution_time_seconds REAL NOT NULL,
    error_message TEXT
)
"#;

pub const CREATE_TOPICS_CATEGORY_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_topics_category ON topics(category_id)";

pub const CREATE_QUEUE_STATUS_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_production_queue_status ON production_queue(status, created_at)";

pub const CREATE_TESTS_TOPIC_INDEX: &str =
    "CREATE INDEX IF NOT EXISTS idx_tests_topic ON tests(topic_id, language_id)";

/// Every schema statement, in dependency order.
pub fn all_schema_statements() -> Vec<&'static str> {
    vec![
        CREATE_CATEGORIES_TABLE,
        CREATE_LANGUAGES_TABLE,
        CREATE_LENSES_TABLE,
        CREATE_TOPICS_TABLE,
        CREATE_PRODUCTION_QUEUE_TABLE,
        CREATE_QUEUE_TRANSITION_TRIGGER,
        CREATE_TEST_TYPES_TABLE,
        CREATE_QUESTION_TYPES_TABLE,
        CREATE_CEFR_LEVELS_TABLE,
        CREATE_QUESTION_DISTRIBUTIONS_TABLE,
        CREATE_PROMPT_TEMPLATES_TABLE,
        CREATE_TESTS_TABLE,
        CREATE_QUESTIONS_TABLE,
        CREATE_SKILL_RATINGS_TABLE,
        CREATE_TOPIC_RUNS_TABLE,
        CREATE_TEST_RUNS_TABLE,
        CREATE_TOPICS_CATEGORY_INDEX,
        CREATE_QUEUE_STATUS_INDEX,
        CREATE_TESTS_TOPIC_INDEX,
    ]
}

/// Table names in the schema.
pub mod tables {
    pub const CATEGORIES: &str = "categories";
    pub const LANGUAGES: &str = "dim_languages";
    pub const LENSES: &str = "dim_lens";
    pub const TOPICS: &str = "topics";
    pub const PRODUCTION_QUEUE: &str = "production_queue";
    pub const TESTS: &str = "tests";
    pub const QUESTIONS: &str = "questions";
    pub const SKILL_RATINGS: &str = "test_skill_ratings";
}
