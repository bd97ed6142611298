//! Configuration for the two generation stages and their providers.
//!
//! Each struct has a `Default`, a `from_env()` that overlays environment
//! variables, a `validate()`, and chainable `with_*` builders.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::embedding::{DEFAULT_EMBEDDING_DIMENSIONS, DEFAULT_EMBEDDING_MODEL, OPENAI_BASE_URL};
use crate::llm::{DEFAULT_MODEL, OPENROUTER_BASE_URL};
use crate::object_store::DEFAULT_PUBLIC_BASE_URL;
use crate::retry::RetryPolicy;
use crate::speech::DEFAULT_TTS_MODEL;

/// Identity recorded on every generated test.
pub const DEFAULT_GEN_USER: &str = "de6fd05b-0871-45d4-a2d8-0195fdf5355e";

pub const DEFAULT_DATABASE_URL: &str = "sqlite://lingua_forge.db";

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Topic generation
// =============================================================================

/// Settings for a topic-generation run.
#[derive(Debug, Clone)]
pub struct TopicGenConfig {
    /// Approved topics to stop at.
    pub daily_quota: u32,
    /// Candidates requested from the Explorer.
    pub max_candidates: u32,
    pub similarity_threshold: f64,
    pub llm_model: String,
    pub llm_temperature: f64,
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub gatekeeper_temperature: f64,
    pub gatekeeper_short_circuit: u32,
    pub dry_run: bool,
    pub retry: RetryPolicy,
}

impl Default for TopicGenConfig {
    fn default() -> Self {
        Self {
            daily_quota: 5,
            max_candidates: 10,
            similarity_threshold: 0.85,
            llm_model: DEFAULT_MODEL.to_string(),
            llm_temperature: 0.8,
            embedding_model: DEFAULT_EMBEDDING_MODEL.to_string(),
            embedding_dimensions: DEFAULT_EMBEDDING_DIMENSIONS,
            gatekeeper_temperature: 0.3,
            gatekeeper_short_circuit: 3,
            dry_run: false,
            retry: RetryPolicy::default(),
        }
    }
}

impl TopicGenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TOPIC_DAILY_QUOTA`: Approved topics per run (default: 5)
    /// - `TOPIC_MAX_CANDIDATES`: Explorer pool size (default: 10)
    /// - `TOPIC_SIMILARITY_THRESHOLD`: Novelty cutoff, 0.5-1.0 (default: 0.85)
    /// - `TOPIC_LLM_MODEL`: Explorer and gatekeeper model
    /// - `TOPIC_LLM_TEMPERATURE`: Explorer temperature (default: 0.8)
    /// - `TOPIC_EMBEDDING_MODEL`: Embedding model (default: text-embedding-3-small)
    /// - `TOPIC_EMBEDDING_DIMENSIONS`: Embedding size (default: 1536)
    /// - `TOPIC_GATEKEEPER_TEMPERATURE`: Gatekeeper temperature (default: 0.3)
    /// - `TOPIC_GATEKEEPER_SHORT_CIRCUIT`: Consecutive rejections before stopping (default: 3)
    /// - `TOPIC_DRY_RUN`: Skip all writes (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TOPIC_DAILY_QUOTA") {
            config.daily_quota = parse_env_value(&val, "TOPIC_DAILY_QUOTA")?;
        }

        if let Ok(val) = std::env::var("TOPIC_MAX_CANDIDATES") {
            config.max_candidates = parse_env_value(&val, "TOPIC_MAX_CANDIDATES")?;
        }

        if let Ok(val) = std::env::var("TOPIC_SIMILARITY_THRESHOLD") {
            config.similarity_threshold = parse_env_value(&val, "TOPIC_SIMILARITY_THRESHOLD")?;
        }

        if let Ok(val) = std::env::var("TOPIC_LLM_MODEL") {
            config.llm_model = val;
        }

        if let Ok(val) = std::env::var("TOPIC_LLM_TEMPERATURE") {
            config.llm_temperature = parse_env_value(&val, "TOPIC_LLM_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("TOPIC_EMBEDDING_MODEL") {
            config.embedding_model = val;
        }

        if let Ok(val) = std::env::var("TOPIC_EMBEDDING_DIMENSIONS") {
            config.embedding_dimensions = parse_env_value(&val, "TOPIC_EMBEDDING_DIMENSIONS")?;
        }

        if let Ok(val) = std::env::var("TOPIC_GATEKEEPER_TEMPERATURE") {
            config.gatekeeper_temperature = parse_env_value(&val, "TOPIC_GATEKEEPER_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("TOPIC_GATEKEEPER_SHORT_CIRCUIT") {
            config.gatekeeper_short_circuit =
                parse_env_value(&val, "TOPIC_GATEKEEPER_SHORT_CIRCUIT")?;
        }

        if let Ok(val) = std::env::var("TOPIC_DRY_RUN") {
            config.dry_run = parse_env_bool(&val, "TOPIC_DRY_RUN")?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.daily_quota == 0 {
            return Err(ConfigError::ValidationFailed(
                "daily_quota must be greater than 0".to_string(),
            ));
        }

        if self.max_candidates == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_candidates must be greater than 0".to_string(),
            ));
        }

        if !(0.5..=1.0).contains(&self.similarity_threshold) {
            return Err(ConfigError::ValidationFailed(
                "similarity_threshold must be between 0.5 and 1.0".to_string(),
            ));
        }

        if self.llm_model.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "llm_model cannot be empty".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.llm_temperature) {
            return Err(ConfigError::ValidationFailed(
                "llm_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if !(0.0..=2.0).contains(&self.gatekeeper_temperature) {
            return Err(ConfigError::ValidationFailed(
                "gatekeeper_temperature must be between 0.0 and 2.0".to_string(),
            ));
        }

        if self.embedding_dimensions == 0 {
            return Err(ConfigError::ValidationFailed(
                "embedding_dimensions must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn with_daily_quota(mut self, quota: u32) -> Self {
        self.daily_quota = quota;
        self
    }

    pub fn with_max_candidates(mut self, max: u32) -> Self {
        self.max_candidates = max;
        self
    }

    pub fn with_similarity_threshold(mut self, threshold: f64) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_llm_model(mut self, model: impl Into<String>) -> Self {
        self.llm_model = model.into();
        self
    }

    pub fn with_gatekeeper_short_circuit(mut self, threshold: u32) -> Self {
        self.gatekeeper_short_circuit = threshold;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

// =============================================================================
// Test generation
// =============================================================================

/// Settings for a test-generation run.
#[derive(Debug, Clone)]
pub struct TestGenConfig {
    /// Queue items drained per run.
    pub batch_size: usize,
    pub target_difficulties: Vec<u8>,
    pub questions_per_test: usize,
    /// Fewer surviving questions than this fails the difficulty.
    pub min_valid_questions: usize,
    pub prose_model: String,
    pub question_model: String,
    pub prose_temperature: f64,
    pub question_temperature: f64,
    pub tts_model: String,
    pub tts_voice: String,
    pub tts_speed: f32,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub retry_max_delay: Duration,
    pub dry_run: bool,
    pub gen_user: String,
}

impl Default for TestGenConfig {
    fn default() -> Self {
        Self {
            batch_size: 50,
            target_difficulties: vec![4, 6, 9],
            questions_per_test: crate::difficulty::QUESTIONS_PER_TEST,
            min_valid_questions: 3,
            prose_model: DEFAULT_MODEL.to_string(),
            question_model: DEFAULT_MODEL.to_string(),
            prose_temperature: 0.9,
            question_temperature: 0.7,
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            tts_voice: "alloy".to_string(),
            tts_speed: 1.0,
            max_retries: 3,
            retry_delay: Duration::from_secs(2),
            retry_max_delay: Duration::from_secs(10),
            dry_run: false,
            gen_user: DEFAULT_GEN_USER.to_string(),
        }
    }
}

impl TestGenConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `TEST_GEN_BATCH_SIZE`: Queue items per run (default: 50)
    /// - `TEST_GEN_TARGET_DIFFICULTIES`: JSON list of levels 1-9 (default: [4,6,9])
    /// - `TEST_GEN_QUESTIONS`: Questions per test (default: 5)
    /// - `TEST_GEN_MIN_VALID_QUESTIONS`: Survivors required (default: 3)
    /// - `TEST_GEN_PROSE_MODEL`, `TEST_GEN_QUESTION_MODEL`: Default models
    /// - `TEST_GEN_PROSE_TEMPERATURE` (default: 0.9), `TEST_GEN_QUESTION_TEMPERATURE` (default: 0.7)
    /// - `TEST_GEN_TTS_MODEL` (default: tts-1), `TEST_GEN_TTS_VOICE` (default: alloy),
    ///   `TEST_GEN_TTS_SPEED` (default: 1.0)
    /// - `TEST_GEN_MAX_RETRIES` (default: 3), `TEST_GEN_RETRY_DELAY_SECS` (default: 2.0),
    ///   `TEST_GEN_RETRY_MAX_DELAY_SECS` (default: 10.0)
    /// - `TEST_GEN_DRY_RUN`: Skip claims, uploads and writes (default: false)
    /// - `TEST_GEN_SYSTEM_USER_ID`: Identity stored on generated tests
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("TEST_GEN_BATCH_SIZE") {
            config.batch_size = parse_env_value(&val, "TEST_GEN_BATCH_SIZE")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_TARGET_DIFFICULTIES") {
            config.target_difficulties = parse_difficulty_list(&val, "TEST_GEN_TARGET_DIFFICULTIES")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_QUESTIONS") {
            config.questions_per_test = parse_env_value(&val, "TEST_GEN_QUESTIONS")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_MIN_VALID_QUESTIONS") {
            config.min_valid_questions = parse_env_value(&val, "TEST_GEN_MIN_VALID_QUESTIONS")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_PROSE_MODEL") {
            config.prose_model = val;
        }

        if let Ok(val) = std::env::var("TEST_GEN_QUESTION_MODEL") {
            config.question_model = val;
        }

        if let Ok(val) = std::env::var("TEST_GEN_PROSE_TEMPERATURE") {
            config.prose_temperature = parse_env_value(&val, "TEST_GEN_PROSE_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_QUESTION_TEMPERATURE") {
            config.question_temperature = parse_env_value(&val, "TEST_GEN_QUESTION_TEMPERATURE")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_TTS_MODEL") {
            config.tts_model = val;
        }

        if let Ok(val) = std::env::var("TEST_GEN_TTS_VOICE") {
            config.tts_voice = val;
        }

        if let Ok(val) = std::env::var("TEST_GEN_TTS_SPEED") {
            config.tts_speed = parse_env_value(&val, "TEST_GEN_TTS_SPEED")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_MAX_RETRIES") {
            config.max_retries = parse_env_value(&val, "TEST_GEN_MAX_RETRIES")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_RETRY_DELAY_SECS") {
            let secs: f64 = parse_env_value(&val, "TEST_GEN_RETRY_DELAY_SECS")?;
            config.retry_delay = parse_duration_secs(secs, "TEST_GEN_RETRY_DELAY_SECS")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_RETRY_MAX_DELAY_SECS") {
            let secs: f64 = parse_env_value(&val, "TEST_GEN_RETRY_MAX_DELAY_SECS")?;
            config.retry_max_delay = parse_duration_secs(secs, "TEST_GEN_RETRY_MAX_DELAY_SECS")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_DRY_RUN") {
            config.dry_run = parse_env_bool(&val, "TEST_GEN_DRY_RUN")?;
        }

        if let Ok(val) = std::env::var("TEST_GEN_SYSTEM_USER_ID") {
            config.gen_user = val;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "batch_size must be greater than 0".to_string(),
            ));
        }

        if self.target_difficulties.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "target_difficulties cannot be empty".to_string(),
            ));
        }

        if let Some(bad) = self
            .target_difficulties
            .iter()
            .find(|d| !crate::difficulty::is_valid_difficulty(**d))
        {
            return Err(ConfigError::ValidationFailed(format!(
                "target_difficulties must be between 1 and 9, got {}",
                bad
            )));
        }

        if self.questions_per_test == 0 {
            return Err(ConfigError::ValidationFailed(
                "questions_per_test must be greater than 0".to_string(),
            ));
        }

        if self.min_valid_questions == 0 || self.min_valid_questions > self.questions_per_test {
            return Err(ConfigError::ValidationFailed(
                "min_valid_questions must be between 1 and questions_per_test".to_string(),
            ));
        }

        for (name, temperature) in [
            ("prose_temperature", self.prose_temperature),
            ("question_temperature", self.question_temperature),
        ] {
            if !(0.0..=2.0).contains(&temperature) {
                return Err(ConfigError::ValidationFailed(format!(
                    "{} must be between 0.0 and 2.0",
                    name
                )));
            }
        }

        if !(0.25..=4.0).contains(&self.tts_speed) {
            return Err(ConfigError::ValidationFailed(
                "tts_speed must be between 0.25 and 4.0".to_string(),
            ));
        }

        if self.max_retries == 0 {
            return Err(ConfigError::ValidationFailed(
                "max_retries must be greater than 0".to_string(),
            ));
        }

        if self.gen_user.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "gen_user cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Backoff policy for every provider call in the test stage.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.retry_delay, self.retry_max_delay)
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    pub fn with_target_difficulties(mut self, difficulties: Vec<u8>) -> Self {
        self.target_difficulties = difficulties;
        self
    }

    pub fn with_min_valid_questions(mut self, min: usize) -> Self {
        self.min_valid_questions = min;
        self
    }

    pub fn with_retries(mut self, max_retries: u32, delay: Duration, max_delay: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = delay;
        self.retry_max_delay = max_delay;
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_gen_user(mut self, gen_user: impl Into<String>) -> Self {
        self.gen_user = gen_user.into();
        self
    }
}

// =============================================================================
// Providers
// =============================================================================

/// Where generated audio is written.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioStorage {
    Local { dir: PathBuf },
    Http { upload_url: String, token: String },
}

/// Endpoints, keys, and storage shared by both stages.
#[derive(Clone)]
pub struct ProviderConfig {
    pub llm_api_key: String,
    pub llm_api_base: String,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub database_url: String,
    pub audio_storage: AudioStorage,
    pub audio_public_base_url: String,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("llm_api_base", &self.llm_api_base)
            .field("openai_api_base", &self.openai_api_base)
            .field("database_url", &self.database_url)
            .field("audio_storage", &self.audio_storage_kind())
            .field("audio_public_base_url", &self.audio_public_base_url)
            .finish_non_exhaustive()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            llm_api_key: String::new(),
            llm_api_base: OPENROUTER_BASE_URL.to_string(),
            openai_api_key: String::new(),
            openai_api_base: OPENAI_BASE_URL.to_string(),
            database_url: DEFAULT_DATABASE_URL.to_string(),
            audio_storage: AudioStorage::Local {
                dir: PathBuf::from("./audio"),
            },
            audio_public_base_url: DEFAULT_PUBLIC_BASE_URL.to_string(),
        }
    }
}

impl ProviderConfig {
    /// Reads keys, endpoints, and audio storage from the environment.
    ///
    /// # Environment Variables
    ///
    /// - `OPENROUTER_API_KEY` (required), `LLM_API_BASE`
    /// - `OPENAI_API_KEY` (required), `OPENAI_API_BASE`
    /// - `DATABASE_URL` (default: sqlite://lingua_forge.db)
    /// - `AUDIO_STORAGE_BACKEND`: `local` or `http` (default: local)
    /// - `AUDIO_STORAGE_DIR` (default: ./audio)
    /// - `AUDIO_UPLOAD_URL`, `AUDIO_UPLOAD_TOKEN`: required for `http`
    /// - `AUDIO_PUBLIC_BASE_URL`
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self {
            llm_api_key: require_env("OPENROUTER_API_KEY")?,
            openai_api_key: require_env("OPENAI_API_KEY")?,
            ..Self::default()
        };

        if let Ok(val) = std::env::var("LLM_API_BASE") {
            config.llm_api_base = val;
        }

        if let Ok(val) = std::env::var("OPENAI_API_BASE") {
            config.openai_api_base = val;
        }

        if let Ok(val) = std::env::var("DATABASE_URL") {
            config.database_url = val;
        }

        if let Ok(val) = std::env::var("AUDIO_PUBLIC_BASE_URL") {
            config.audio_public_base_url = val;
        }

        let backend = std::env::var("AUDIO_STORAGE_BACKEND").unwrap_or_else(|_| "local".to_string());
        config.audio_storage = match backend.to_lowercase().as_str() {
            "local" => AudioStorage::Local {
                dir: std::env::var("AUDIO_STORAGE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|_| PathBuf::from("./audio")),
            },
            "http" => AudioStorage::Http {
                upload_url: require_env("AUDIO_UPLOAD_URL")?,
                token: require_env("AUDIO_UPLOAD_TOKEN")?,
            },
            other => {
                return Err(ConfigError::InvalidValue {
                    key: "AUDIO_STORAGE_BACKEND".to_string(),
                    message: format!("expected 'local' or 'http', got '{}'", other),
                })
            }
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.llm_api_key.is_empty() {
            return Err(ConfigError::MissingEnvVar("OPENROUTER_API_KEY".to_string()));
        }

        if self.openai_api_key.is_empty() {
            return Err(ConfigError::MissingEnvVar("OPENAI_API_KEY".to_string()));
        }

        if self.database_url.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "database_url cannot be empty".to_string(),
            ));
        }

        if let AudioStorage::Http { upload_url, .. } = &self.audio_storage {
            if !upload_url.starts_with("http://") && !upload_url.starts_with("https://") {
                return Err(ConfigError::ValidationFailed(
                    "audio upload_url must be an http(s) URL".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn audio_storage_kind(&self) -> &'static str {
        match self.audio_storage {
            AudioStorage::Local { .. } => "local",
            AudioStorage::Http { .. } => "http",
        }
    }

    pub fn with_api_keys(mut self, llm_key: impl Into<String>, openai_key: impl Into<String>) -> Self {
        self.llm_api_key = llm_key.into();
        self.openai_api_key = openai_key.into();
        self
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = url.into();
        self
    }

    pub fn with_audio_storage(mut self, storage: AudioStorage) -> Self {
        self.audio_storage = storage;
        self
    }
}

fn require_env(key: &str) -> Result<String, ConfigError> {
    match std::env::var(key) {
        Ok(val) if !val.trim().is_empty() => Ok(val),
        _ => Err(ConfigError::MissingEnvVar(key.to_string())),
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse a JSON list of difficulty levels such as `[4,6,9]`.
fn parse_difficulty_list(value: &str, key: &str) -> Result<Vec<u8>, ConfigError> {
    serde_json::from_str(value).map_err(|e| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a JSON list of integers, got '{}': {}", value, e),
    })
}

fn parse_duration_secs(secs: f64, key: &str) -> Result<Duration, ConfigError> {
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a non-negative number of seconds, got {}", secs),
    })
}
