//! SQLite persistent storage for topics, the production queue, and tests.
//!
//! # Usage
//!
//! ```rust,ignore
//! use lingua_forge::storage::Database;
//!
//! let db = Database::connect("sqlite://lingua.db").await?;
//! db.run_migrations().await?;
//!
//! for item in db.pending_queue_items(10).await? {
//!     if db.claim_queue_item(item.id).await? {
//!         // generate tests for item.topic_id in item.language_id
//!     }
//! }
//! ```

pub mod database;
pub mod migrations;
pub mod models;
pub mod schema;

pub use database::{Database, DatabaseError};
pub use migrations::{MigrationError, MigrationRunner};
pub use models::{
    eligible_categories, Category, CefrLevel, GeneratedQuestion, GeneratedTest, Language, Lens,
    NewTopic, QueueItem, QueueStatus, QuestionTypeRow, SkillRating, TestRunMetrics, TestType,
    Topic, TopicMatch, TopicRunMetrics,
};
