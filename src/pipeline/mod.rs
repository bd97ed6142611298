//! Orchestration of the two generation stages.
//!
//! The stages communicate only through the production queue:
//!
//! - **[`TopicOrchestrator`]** claims a category, asks the Explorer for
//!   candidates, filters them through the Archivist and Gatekeeper, and
//!   writes one queue row per approved (topic, language) pair.
//! - **[`TestOrchestrator`]** drains pending queue rows and, for each
//!   configured difficulty, writes a test with its questions, audio, and
//!   initial skill ratings.
//!
//! Each unit of work commits on its own. A crash mid-run leaves every
//! committed topic, test, and queue status consistent.
//!
//! # Example
//!
//! ```rust,ignore
//! use lingua_forge::pipeline::{RunOutcome, TopicGenConfig, TopicOrchestrator};
//!
//! let orchestrator = TopicOrchestrator::new(db, llm, embedder, TopicGenConfig::from_env()?);
//! let result = orchestrator.run().await;
//! std::process::exit(RunOutcome::for_topic_run(&result, 5).exit_code());
//! ```

pub mod config;
pub mod test_orchestrator;
pub mod topic_orchestrator;

use thiserror::Error;
use uuid::Uuid;

use crate::agents::AgentError;
use crate::prompts::default_template;
use crate::storage::{Database, DatabaseError, QueueStatus, TestRunMetrics, TopicRunMetrics};

pub use config::{AudioStorage, ConfigError, ProviderConfig, TestGenConfig, TopicGenConfig};
pub use test_orchestrator::TestOrchestrator;
pub use topic_orchestrator::TopicOrchestrator;

/// Estimated cost of one chat-completion call, in USD.
pub const LLM_CALL_COST_USD: f64 = 0.001;
/// Estimated cost of one embedding call, in USD.
pub const EMBEDDING_CALL_COST_USD: f64 = 0.0001;

/// Errors that end a run or a unit of work.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("No eligible category: every category is inactive or cooling down")]
    NoEligibleCategory,

    #[error("Prompt template '{task}' is missing for language {language_id}")]
    MissingTemplate { task: String, language_id: i64 },

    #[error("Queue item {0} not found")]
    QueueItemNotFound(Uuid),

    #[error("Queue item {id} is {status}, expected pending")]
    QueueItemNotPending { id: Uuid, status: QueueStatus },

    #[error("Missing reference data: {0}")]
    MissingReference(String),

    #[error("Too few valid questions: {valid}/{requested}")]
    TooFewQuestions { valid: usize, requested: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),
}

/// Scheduler-facing summary of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Work done, or nothing was eligible.
    Success,
    /// Work was available but produced less than expected.
    Warning,
    /// The run aborted.
    Failure,
}

impl RunOutcome {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::Warning => 1,
            RunOutcome::Failure => 2,
        }
    }

    /// Grades a topic run against its daily quota.
    pub fn for_topic_run(result: &Result<TopicRunMetrics, PipelineError>, quota: u32) -> Self {
        match result {
            Ok(metrics) if metrics.topics_generated < quota => RunOutcome::Warning,
            Ok(_) => RunOutcome::Success,
            Err(PipelineError::NoEligibleCategory) => RunOutcome::Success,
            Err(_) => RunOutcome::Failure,
        }
    }

    /// Grades a test run: items processed without a single test is a warning.
    pub fn for_test_run(result: &Result<TestRunMetrics, PipelineError>) -> Self {
        match result {
            Ok(metrics) if metrics.queue_items_processed > 0 && metrics.tests_generated == 0 => {
                RunOutcome::Warning
            }
            Ok(_) => RunOutcome::Success,
            Err(_) => RunOutcome::Failure,
        }
    }
}

/// Loads the template for `task`: the stored one for `language_id`, then the
/// English one, then the built-in default.
pub async fn load_template(
    db: &Database,
    task: &str,
    language_id: i64,
) -> Result<String, PipelineError> {
    let template = match db.prompt_template(task, language_id).await? {
        Some(stored) => stored,
        None => default_template(task).unwrap_or_default().to_string(),
    };

    if template.trim().is_empty() {
        return Err(PipelineError::MissingTemplate {
            task: task.to_string(),
            language_id,
        });
    }
    Ok(template)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompts::{ENGLISH_LANGUAGE_ID, EXPLORER_IDEATION};
    use chrono::Utc;

    #[test]
    fn test_exit_codes() {
        assert_eq!(RunOutcome::Success.exit_code(), 0);
        assert_eq!(RunOutcome::Warning.exit_code(), 1);
        assert_eq!(RunOutcome::Failure.exit_code(), 2);
    }

    #[test]
    fn test_topic_run_grading() {
        let mut metrics = TopicRunMetrics::new(Utc::now());
        metrics.topics_generated = 2;
        assert_eq!(RunOutcome::for_topic_run(&Ok(metrics.clone()), 5), RunOutcome::Warning);
        assert_eq!(RunOutcome::for_topic_run(&Ok(metrics), 2), RunOutcome::Success);
        assert_eq!(
            RunOutcome::for_topic_run(&Err(PipelineError::NoEligibleCategory), 5),
            RunOutcome::Success
        );
        assert_eq!(
            RunOutcome::for_topic_run(&Err(PipelineError::QueueItemNotFound(Uuid::nil())), 5),
            RunOutcome::Failure
        );
    }

    #[test]
    fn test_test_run_grading() {
        let mut metrics = TestRunMetrics::new(Utc::now());
        assert_eq!(RunOutcome::for_test_run(&Ok(metrics.clone())), RunOutcome::Success);
        metrics.queue_items_processed = 3;
        assert_eq!(RunOutcome::for_test_run(&Ok(metrics.clone())), RunOutcome::Warning);
        metrics.tests_generated = 1;
        assert_eq!(RunOutcome::for_test_run(&Ok(metrics)), RunOutcome::Success);
    }

    #[tokio::test]
    async fn test_load_template_prefers_database() {
        let db = Database::in_memory().await.unwrap();
        let builtin = load_template(&db, EXPLORER_IDEATION, 7).await.unwrap();
        assert!(builtin.contains("{category}"));

        db.upsert_prompt_template(EXPLORER_IDEATION, ENGLISH_LANGUAGE_ID, "Stored {category}")
            .await
            .unwrap();
        assert_eq!(
            load_template(&db, EXPLORER_IDEATION, 7).await.unwrap(),
            "Stored {category}"
        );

        let missing = load_template(&db, "no_such_task", ENGLISH_LANGUAGE_ID).await;
        assert!(matches!(missing, Err(PipelineError::MissingTemplate { .. })));
    }
}
