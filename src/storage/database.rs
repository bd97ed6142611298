//! SQLite data access for the generation pipeline.
//!
//! Every write that must be atomic (queue claims, finished tests) is a
//! single conditional statement or one transaction. Nothing spans a whole run.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};
use thiserror::Error;
use uuid::Uuid;

use crate::embedding::cosine_similarity;
use crate::prompts::ENGLISH_LANGUAGE_ID;

use super::migrations::MigrationRunner;
use super::models::{
    eligible_categories, Category, CefrLevel, GeneratedQuestion, GeneratedTest, Language, Lens,
    NewTopic, QueueItem, QueueStatus, QuestionTypeRow, SkillRating, TestRunMetrics, TestType,
    Topic, TopicMatch, TopicRunMetrics,
};

/// Errors that can occur during database operations.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query failed: {0}")]
    QueryFailed(#[from] sqlx::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] super::migrations::MigrationError),

    #[error("Invalid queue transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: QueueStatus,
        to: QueueStatus,
    },

    #[error("Invalid stored data: {0}")]
    InvalidData(String),
}

/// Connection pool over the content database.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
}

fn parse_uuid(value: &str) -> Result<Uuid, DatabaseError> {
    Uuid::parse_str(value).map_err(|e| DatabaseError::InvalidData(format!("uuid '{}': {}", value, e)))
}

fn parse_status(value: &str) -> Result<QueueStatus, DatabaseError> {
    QueueStatus::parse(value)
        .ok_or_else(|| DatabaseError::InvalidData(format!("queue status '{}'", value)))
}

fn category_from_row(row: &SqliteRow) -> Result<Category, DatabaseError> {
    Ok(Category {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        is_active: row.try_get("is_active")?,
        last_used_at: row.try_get("last_used_at")?,
        cooldown_days: row.try_get("cooldown_days")?,
        total_topics_generated: row.try_get("total_topics_generated")?,
    })
}

fn language_from_row(row: &SqliteRow) -> Result<Language, DatabaseError> {
    let voices: String = row.try_get("tts_voice_ids")?;
    let tts_speed: Option<f64> = row.try_get("tts_speed")?;
    Ok(Language {
        id: row.try_get("id")?,
        language_code: row.try_get("language_code")?,
        language_name: row.try_get("language_name")?,
        native_name: row.try_get("native_name")?,
        is_active: row.try_get("is_active")?,
        display_order: row.try_get("display_order")?,
        tts_voice_ids: serde_json::from_str(&voices)?,
        tts_speed: tts_speed.map(|s| s as f32),
        prose_model: row.try_get("prose_model")?,
        question_model: row.try_get("question_model")?,
    })
}

fn lens_from_row(row: &SqliteRow) -> Result<Lens, DatabaseError> {
    Ok(Lens {
        id: row.try_get("id")?,
        lens_code: row.try_get("lens_code")?,
        display_name: row.try_get("display_name")?,
        description: row.try_get("description")?,
        prompt_hint: row.try_get("prompt_hint")?,
        is_active: row.try_get("is_active")?,
        sort_order: row.try_get("sort_order")?,
    })
}

fn topic_from_row(row: &SqliteRow) -> Result<Topic, DatabaseError> {
    let id: String = row.try_get("id")?;
    let keywords: String = row.try_get("keywords")?;
    let embedding: String = row.try_get("embedding")?;
    Ok(Topic {
        id: parse_uuid(&id)?,
        category_id: row.try_get("category_id")?,
        concept: row.try_get("concept_english")?,
        lens_id: row.try_get("lens_id")?,
        keywords: serde_json::from_str(&keywords)?,
        embedding: serde_json::from_str(&embedding)?,
        semantic_signature: row.try_get("semantic_signature")?,
        created_at: row.try_get("created_at")?,
    })
}

fn queue_item_from_row(row: &SqliteRow) -> Result<QueueItem, DatabaseError> {
    let id: String = row.try_get("id")?;
    let topic_id: String = row.try_get("topic_id")?;
    let status: String = row.try_get("status")?;
    Ok(QueueItem {
        id: parse_uuid(&id)?,
        topic_id: parse_uuid(&topic_id)?,
        language_id: row.try_get("language_id")?,
        status: parse_status(&status)?,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
        tests_generated: row.try_get("tests_generated")?,
        error_log: row.try_get("error_log")?,
    })
}

fn test_from_row(row: &SqliteRow) -> Result<GeneratedTest, DatabaseError> {
    let id: String = row.try_get("id")?;
    let topic_id: String = row.try_get("topic_id")?;
    let difficulty: i64 = row.try_get("difficulty")?;
    Ok(GeneratedTest {
        id: parse_uuid(&id)?,
        slug: row.try_get("slug")?,
        language_id: row.try_get("language_id")?,
        topic_id: parse_uuid(&topic_id)?,
        difficulty: u8::try_from(difficulty)
            .map_err(|_| DatabaseError::InvalidData(format!("difficulty {}", difficulty)))?,
        transcript: row.try_get("transcript")?,
        title: row.try_get("title")?,
        audio_url: row.try_get("audio_url")?,
        gen_user: row.try_get("gen_user")?,
    })
}

impl Database {
    /// Opens (creating if needed) the database at `database_url`.
    ///
    /// Accepts `sqlite://path`, a bare file path, or `sqlite::memory:`.
    /// In-memory databases use a single long-lived connection so every query
    /// sees the same data.
    pub async fn connect(database_url: &str) -> Result<Self, DatabaseError> {
        let in_memory = database_url.contains(":memory:");
        let url = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}", database_url)
        };

        let mut opts = SqliteConnectOptions::from_str(&url)
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?
            .create_if_missing(true)
            .foreign_keys(true);
        if !in_memory {
            opts = opts
                .journal_mode(SqliteJournalMode::Wal)
                .synchronous(SqliteSynchronous::Normal);
        }

        let mut pool_options = SqlitePoolOptions::new().acquire_timeout(Duration::from_secs(30));
        pool_options = if in_memory {
            pool_options
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
        } else {
            pool_options.max_connections(4)
        };

        let pool = pool_options
            .connect_with(opts)
            .await
            .map_err(|e| DatabaseError::ConnectionFailed(e.to_string()))?;

        tracing::info!(url = %database_url, "Database opened");
        Ok(Self { pool })
    }

    /// A migrated, empty in-memory database.
    pub async fn in_memory() -> Result<Self, DatabaseError> {
        let db = Self::connect("sqlite::memory:").await?;
        db.run_migrations().await?;
        Ok(db)
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> Result<usize, DatabaseError> {
        let runner = MigrationRunner::new(self.pool.clone());
        Ok(runner.run_migrations().await?)
    }

    // =========================================================================
    // Categories
    // =========================================================================

    pub async fn list_categories(&self) -> Result<Vec<Category>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM categories ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(category_from_row).collect()
    }

    pub async fn category(&self, id: i64) -> Result<Option<Category>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM categories WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(category_from_row).transpose()
    }

    /// The category that would be selected at `now`, without claiming it.
    pub async fn next_eligible_category(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<Category>, DatabaseError> {
        let categories = self.list_categories().await?;
        Ok(eligible_categories(&categories, now).first().map(|c| (*c).clone()))
    }

    /// Selects the next eligible category and claims it by stamping
    /// `last_used_at`.
    ///
    /// The stamp is a compare-and-set on the previous value, so two
    /// overlapping runs cannot claim the same category.
    pub async fn claim_next_category(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<Category>, DatabaseError> {
        let categories = self.list_categories().await?;

        for candidate in eligible_categories(&categories, now) {
            let result = sqlx::query(
                r#"
                UPDATE categories
                SET last_used_at = ?1, updated_at = ?1
                WHERE id = ?2 AND last_used_at IS ?3
                "#,
            )
            .bind(now)
            .bind(candidate.id)
            .bind(candidate.last_used_at)
            .execute(&self.pool)
            .await?;

            if result.rows_affected() == 1 {
                tracing::info!(category = %candidate.name, id = candidate.id, "Claimed category");
                let mut claimed = candidate.clone();
                claimed.last_used_at = Some(now);
                return Ok(Some(claimed));
            }
            tracing::debug!(id = candidate.id, "Category claimed concurrently, trying next");
        }

        Ok(None)
    }

    /// Stamps the category as used and adds to its topic counter.
    pub async fn record_category_usage(
        &self,
        category_id: i64,
        topics_added: u32,
        now: DateTime<Utc>,
    ) -> Result<(), DatabaseError> {
        let result = sqlx::query(
            r#"
            UPDATE categories
            SET last_used_at = ?1,
                updated_at = ?1,
                total_topics_generated = total_topics_generated + ?2
            WHERE id = ?3
            "#,
        )
        .bind(now)
        .bind(i64::from(topics_added))
        .bind(category_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(DatabaseError::NotFound(format!("category {}", category_id)));
        }
        Ok(())
    }

    // =========================================================================
    // Dimension tables
    // =========================================================================

    /// Active languages in display order.
    pub async fn active_languages(&self) -> Result<Vec<Language>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM dim_languages WHERE is_active = 1 ORDER BY display_order, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(language_from_row).collect()
    }

    pub async fn language(&self, id: i64) -> Result<Option<Language>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM dim_languages WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(language_from_row).transpose()
    }

    pub async fn active_lenses(&self) -> Result<Vec<Lens>, DatabaseError> {
        let rows =
            sqlx::query("SELECT * FROM dim_lens WHERE is_active = 1 ORDER BY sort_order, id")
                .fetch_all(&self.pool)
                .await?;
        rows.iter().map(lens_from_row).collect()
    }

    pub async fn active_test_types(&self) -> Result<Vec<TestType>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM dim_test_types WHERE is_active = 1 ORDER BY id")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(TestType {
                    id: row.try_get("id")?,
                    type_code: row.try_get("type_code")?,
                    type_name: row.try_get("type_name")?,
                    requires_audio: row.try_get("requires_audio")?,
                    is_active: row.try_get("is_active")?,
                })
            })
            .collect()
    }

    pub async fn question_types(&self) -> Result<Vec<QuestionTypeRow>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM dim_question_types WHERE is_active = 1 ORDER BY display_order, id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| {
                Ok(QuestionTypeRow {
                    id: row.try_get("id")?,
                    type_code: row.try_get("type_code")?,
                    type_name: row.try_get("type_name")?,
                    description: row.try_get("description")?,
                    cognitive_level: row.try_get("cognitive_level")?,
                    display_order: row.try_get("display_order")?,
                })
            })
            .collect()
    }

    pub async fn cefr_levels(&self) -> Result<Vec<CefrLevel>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM dim_cefr_levels ORDER BY difficulty_min")
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                Ok(CefrLevel {
                    id: row.try_get("id")?,
                    cefr_code: row.try_get("cefr_code")?,
                    difficulty_min: row.try_get("difficulty_min")?,
                    difficulty_max: row.try_get("difficulty_max")?,
                    word_count_min: row.try_get("word_count_min")?,
                    word_count_max: row.try_get("word_count_max")?,
                    initial_elo: row.try_get("initial_elo")?,
                })
            })
            .collect()
    }

    /// Question-type codes per difficulty, for difficulties that have a row.
    pub async fn question_distributions(&self) -> Result<HashMap<u8, Vec<String>>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM question_type_distributions")
            .fetch_all(&self.pool)
            .await?;

        let mut distributions = HashMap::new();
        for row in rows {
            let difficulty: i64 = row.try_get("difficulty")?;
            let mut codes = Vec::with_capacity(5);
            for i in 1..=5 {
                let code: Option<String> = row.try_get(format!("question_type_{}", i).as_str())?;
                codes.extend(code.filter(|c| !c.trim().is_empty()));
            }
            if let (Ok(d), false) = (u8::try_from(difficulty), codes.is_empty()) {
                distributions.insert(d, codes);
            }
        }
        Ok(distributions)
    }

    // =========================================================================
    // Prompt templates
    // =========================================================================

    /// Latest active template for `task`, falling back to the English one.
    pub async fn prompt_template(
        &self,
        task: &str,
        language_id: i64,
    ) -> Result<Option<String>, DatabaseError> {
        let mut lookups = vec![language_id];
        if language_id != ENGLISH_LANGUAGE_ID {
            lookups.push(ENGLISH_LANGUAGE_ID);
        }

        for lang in lookups {
            let row: Option<(String,)> = sqlx::query_as(
                r#"
                SELECT template_text FROM prompt_templates
                WHERE task_name = ?1 AND language_id = ?2 AND is_active = 1
                ORDER BY version DESC
                LIMIT 1
                "#,
            )
            .bind(task)
            .bind(lang)
            .fetch_optional(&self.pool)
            .await?;

            if let Some((text,)) = row {
                if lang != language_id {
                    tracing::debug!(task = %task, language_id, "Using English prompt template");
                }
                return Ok(Some(text));
            }
        }

        Ok(None)
    }

    // =========================================================================
    // Topics
    // =========================================================================

    pub async fn insert_topic(&self, topic: &NewTopic) -> Result<Uuid, DatabaseError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO topics
                (id, category_id, concept_english, lens_id, keywords, embedding,
                 semantic_signature, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )
        .bind(id.to_string())
        .bind(topic.category_id)
        .bind(&topic.concept)
        .bind(topic.lens_id)
        .bind(serde_json::to_string(&topic.keywords)?)
        .bind(serde_json::to_string(&topic.embedding)?)
        .bind(&topic.semantic_signature)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        tracing::debug!(topic_id = %id, category_id = topic.category_id, "Inserted topic");
        Ok(id)
    }

    pub async fn topic(&self, id: Uuid) -> Result<Option<Topic>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM topics WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(topic_from_row).transpose()
    }

    pub async fn topics_in_category(&self, category_id: i64) -> Result<Vec<Topic>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM topics WHERE category_id = ?1 ORDER BY created_at")
            .bind(category_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(topic_from_row).collect()
    }

    /// Topics in `category_id` whose embedding has cosine similarity of at
    /// least `threshold` with `embedding`, most similar first.
    pub async fn match_topics(
        &self,
        category_id: i64,
        embedding: &[f32],
        threshold: f64,
        limit: usize,
    ) -> Result<Vec<TopicMatch>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT id, concept_english, embedding FROM topics WHERE category_id = ?1",
        )
        .bind(category_id)
        .fetch_all(&self.pool)
        .await?;

        let mut matches = Vec::new();
        for row in rows {
            let stored: String = row.try_get("embedding")?;
            let stored: Vec<f32> = serde_json::from_str(&stored)?;
            let similarity = cosine_similarity(embedding, &stored);
            if similarity >= threshold {
                let id: String = row.try_get("id")?;
                matches.push(TopicMatch {
                    id: parse_uuid(&id)?,
                    concept: row.try_get("concept_english")?,
                    similarity,
                });
            }
        }

        matches.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        matches.truncate(limit);
        Ok(matches)
    }

    // =========================================================================
    // Production queue
    // =========================================================================

    /// Queues (topic, language) pairs as `pending`, skipping pairs already queued.
    ///
    /// Returns how many rows were actually inserted.
    pub async fn insert_queue_items(&self, items: &[(Uuid, i64)]) -> Result<u64, DatabaseError> {
        if items.is_empty() {
            return Ok(0);
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;
        for (topic_id, language_id) in items {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO production_queue (id, topic_id, language_id, status, created_at)
                VALUES (?1, ?2, ?3, 'pending', ?4)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(topic_id.to_string())
            .bind(language_id)
            .bind(now)
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }
        tx.commit().await?;

        if inserted < items.len() as u64 {
            tracing::warn!(
                requested = items.len(),
                inserted,
                "Skipped queue items that were already queued"
            );
        }
        Ok(inserted)
    }

    pub async fn queue_item(&self, id: Uuid) -> Result<Option<QueueItem>, DatabaseError> {
        let row = sqlx::query("SELECT * FROM production_queue WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(queue_item_from_row).transpose()
    }

    /// Oldest pending items whose language is active.
    pub async fn pending_queue_items(&self, limit: usize) -> Result<Vec<QueueItem>, DatabaseError> {
        let rows = sqlx::query(
            r#"
            SELECT q.* FROM production_queue q
            JOIN dim_languages l ON l.id = q.language_id
            WHERE q.status = 'pending' AND l.is_active = 1
            ORDER BY q.created_at, q.rowid
            LIMIT ?1
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(queue_item_from_row).collect()
    }

    pub async fn queue_items_for_topic(&self, topic_id: Uuid) -> Result<Vec<QueueItem>, DatabaseError> {
        let rows = sqlx::query(
            "SELECT * FROM production_queue WHERE topic_id = ?1 ORDER BY language_id",
        )
        .bind(topic_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(queue_item_from_row).collect()
    }

    /// Atomically moves a `pending` item to `processing`.
    ///
    /// Returns `false` when the item is no longer pending (another run
    /// claimed it, or it does not exist).
    pub async fn claim_queue_item(&self, id: Uuid) -> Result<bool, DatabaseError> {
        let result = sqlx::query(
            "UPDATE production_queue SET status = 'processing' WHERE id = ?1 AND status = 'pending'",
        )
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Moves an item from `from` to `to`, recording the outcome fields.
    ///
    /// Illegal moves are refused before touching the database; a row whose
    /// current status is not `from` is reported as an invalid transition
    /// from its actual status.
    pub async fn transition_queue_item(
        &self,
        id: Uuid,
        from: QueueStatus,
        to: QueueStatus,
        tests_generated: Option<i64>,
        error_log: Option<&str>,
    ) -> Result<(), DatabaseError> {
        if !from.can_transition_to(to) {
            return Err(DatabaseError::InvalidTransition { id, from, to });
        }

        let processed_at = to.is_terminal().then(Utc::now);
        let result = sqlx::query(
            r#"
            UPDATE production_queue
            SET status = ?1,
                processed_at = COALESCE(?2, processed_at),
                tests_generated = COALESCE(?3, tests_generated),
                error_log = COALESCE(?4, error_log)
            WHERE id = ?5 AND status = ?6
            "#,
        )
        .bind(to.as_str())
        .bind(processed_at)
        .bind(tests_generated)
        .bind(error_log)
        .bind(id.to_string())
        .bind(from.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(());
        }

        match self.queue_item(id).await? {
            Some(item) => Err(DatabaseError::InvalidTransition {
                id,
                from: item.status,
                to,
            }),
            None => Err(DatabaseError::NotFound(format!("queue item {}", id))),
        }
    }

    // =========================================================================
    // Generated tests
    // =========================================================================

    /// Persists a test with its questions and skill ratings in one transaction.
    pub async fn insert_generated_test(
        &self,
        test: &GeneratedTest,
        questions: &[GeneratedQuestion],
        ratings: &[SkillRating],
    ) -> Result<(), DatabaseError> {
        let mut tx = self.pool.begin().await?;
        let test_id = test.id.to_string();

        sqlx::query(
            r#"
            INSERT INTO tests
                (id, slug, language_id, topic_id, difficulty, transcript, title,
                 audio_url, gen_user, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&test_id)
        .bind(&test.slug)
        .bind(test.language_id)
        .bind(test.topic_id.to_string())
        .bind(i64::from(test.difficulty))
        .bind(&test.transcript)
        .bind(&test.title)
        .bind(&test.audio_url)
        .bind(&test.gen_user)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?;

        for question in questions {
            sqlx::query(
                r#"
                INSERT INTO questions
                    (id, test_id, question_text, choices, answer, question_type_id, display_order)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(question.id.to_string())
            .bind(&test_id)
            .bind(&question.question_text)
            .bind(serde_json::to_string(&question.choices)?)
            .bind(&question.answer)
            .bind(question.question_type_id)
            .bind(question.display_order)
            .execute(&mut *tx)
            .await?;
        }

        for rating in ratings {
            sqlx::query(
                r#"
                INSERT INTO test_skill_ratings
                    (test_id, test_type_id, elo_rating, volatility, total_attempts)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(&test_id)
            .bind(rating.test_type_id)
            .bind(rating.elo_rating)
            .bind(rating.volatility)
            .bind(rating.total_attempts)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        tracing::info!(
            slug = %test.slug,
            questions = questions.len(),
            ratings = ratings.len(),
            "Saved test"
        );
        Ok(())
    }

    pub async fn tests_for_topic(&self, topic_id: Uuid) -> Result<Vec<GeneratedTest>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM tests WHERE topic_id = ?1 ORDER BY difficulty, slug")
            .bind(topic_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(test_from_row).collect()
    }

    pub async fn questions_for_test(
        &self,
        test_id: Uuid,
    ) -> Result<Vec<GeneratedQuestion>, DatabaseError> {
        let rows = sqlx::query("SELECT * FROM questions WHERE test_id = ?1 ORDER BY display_order")
            .bind(test_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| {
                let id: String = row.try_get("id")?;
                let choices: String = row.try_get("choices")?;
                Ok(GeneratedQuestion {
                    id: parse_uuid(&id)?,
                    question_text: row.try_get("question_text")?,
                    choices: serde_json::from_str(&choices)?,
                    answer: row.try_get("answer")?,
                    question_type_id: row.try_get("question_type_id")?,
                    display_order: row.try_get("display_order")?,
                })
            })
            .collect()
    }

    // =========================================================================
    // Run metrics
    // =========================================================================

    pub async fn insert_topic_run(&self, metrics: &TopicRunMetrics) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO topic_generation_runs
                (run_date, category_id, category_name, topics_generated,
                 topics_rejected_similarity, topics_rejected_gatekeeper, candidates_proposed,
                 api_calls_llm, api_calls_embedding, total_cost_usd, execution_time_seconds,
                 error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(metrics.run_date)
        .bind(metrics.category_id)
        .bind(&metrics.category_name)
        .bind(i64::from(metrics.topics_generated))
        .bind(i64::from(metrics.topics_rejected_similarity))
        .bind(i64::from(metrics.topics_rejected_gatekeeper))
        .bind(i64::from(metrics.candidates_proposed))
        .bind(i64::from(metrics.api_calls_llm))
        .bind(i64::from(metrics.api_calls_embedding))
        .bind(metrics.total_cost_usd)
        .bind(metrics.execution_time_seconds)
        .bind(&metrics.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn insert_test_run(&self, metrics: &TestRunMetrics) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO test_generation_runs
                (run_date, queue_items_processed, tests_generated, tests_failed,
                 execution_time_seconds, error_message)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            "#,
        )
        .bind(metrics.run_date)
        .bind(i64::from(metrics.queue_items_processed))
        .bind(i64::from(metrics.tests_generated))
        .bind(i64::from(metrics.tests_failed))
        .bind(metrics.execution_time_seconds)
        .bind(&metrics.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Reference data seeding
    // =========================================================================

    /// Inserts or renames a category. Usage stamps and counters are preserved.
    pub async fn upsert_category(
        &self,
        id: i64,
        name: &str,
        cooldown_days: i64,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO categories (id, name, cooldown_days)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                cooldown_days = excluded.cooldown_days
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(cooldown_days)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_language(&self, language: &Language) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO dim_languages
                (id, language_code, language_name, native_name, is_active, display_order,
                 tts_voice_ids, tts_speed, prose_model, question_model)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            ON CONFLICT(id) DO UPDATE SET
                language_code = excluded.language_code,
                language_name = excluded.language_name,
                native_name = excluded.native_name,
                is_active = excluded.is_active,
                display_order = excluded.display_order,
                tts_voice_ids = excluded.tts_voice_ids,
                tts_speed = excluded.tts_speed,
                prose_model = excluded.prose_model,
                question_model = excluded.question_model
            "#,
        )
        .bind(language.id)
        .bind(&language.language_code)
        .bind(&language.language_name)
        .bind(&language.native_name)
        .bind(language.is_active)
        .bind(language.display_order)
        .bind(serde_json::to_string(&language.tts_voice_ids)?)
        .bind(language.tts_speed.map(f64::from))
        .bind(&language.prose_model)
        .bind(&language.question_model)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_lens(&self, lens: &Lens) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO dim_lens
                (id, lens_code, display_name, description, prompt_hint, is_active, sort_order)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                lens_code = excluded.lens_code,
                display_name = excluded.display_name,
                description = excluded.description,
                prompt_hint = excluded.prompt_hint,
                is_active = excluded.is_active,
                sort_order = excluded.sort_order
            "#,
        )
        .bind(lens.id)
        .bind(&lens.lens_code)
        .bind(&lens.display_name)
        .bind(&lens.description)
        .bind(&lens.prompt_hint)
        .bind(lens.is_active)
        .bind(lens.sort_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_test_type(&self, test_type: &TestType) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO dim_test_types (id, type_code, type_name, requires_audio, is_active)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(id) DO UPDATE SET
                type_code = excluded.type_code,
                type_name = excluded.type_name,
                requires_audio = excluded.requires_audio,
                is_active = excluded.is_active
            "#,
        )
        .bind(test_type.id)
        .bind(&test_type.type_code)
        .bind(&test_type.type_name)
        .bind(test_type.requires_audio)
        .bind(test_type.is_active)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_question_type(&self, row: &QuestionTypeRow) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO dim_question_types
                (id, type_code, type_name, description, cognitive_level, display_order)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(id) DO UPDATE SET
                type_code = excluded.type_code,
                type_name = excluded.type_name,
                description = excluded.description,
                cognitive_level = excluded.cognitive_level,
                display_order = excluded.display_order
            "#,
        )
        .bind(row.id)
        .bind(&row.type_code)
        .bind(&row.type_name)
        .bind(&row.description)
        .bind(row.cognitive_level)
        .bind(row.display_order)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_cefr_level(&self, level: &CefrLevel) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO dim_cefr_levels
                (id, cefr_code, difficulty_min, difficulty_max, word_count_min,
                 word_count_max, initial_elo)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                cefr_code = excluded.cefr_code,
                difficulty_min = excluded.difficulty_min,
                difficulty_max = excluded.difficulty_max,
                word_count_min = excluded.word_count_min,
                word_count_max = excluded.word_count_max,
                initial_elo = excluded.initial_elo
            "#,
        )
        .bind(level.id)
        .bind(&level.cefr_code)
        .bind(level.difficulty_min)
        .bind(level.difficulty_max)
        .bind(level.word_count_min)
        .bind(level.word_count_max)
        .bind(level.initial_elo)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Stores `text` as version 1 of the template, replacing any existing text.
    pub async fn upsert_prompt_template(
        &self,
        task: &str,
        language_id: i64,
        text: &str,
    ) -> Result<(), DatabaseError> {
        sqlx::query(
            r#"
            INSERT INTO prompt_templates (task_name, language_id, template_text, version, is_active)
            VALUES (?1, ?2, ?3, 1, 1)
            ON CONFLICT(task_name, language_id, version) DO UPDATE SET
                template_text = excluded.template_text,
                is_active = 1
            "#,
        )
        .bind(task)
        .bind(language_id)
        .bind(text)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn upsert_question_distribution(
        &self,
        difficulty: u8,
        codes: &[String],
    ) -> Result<(), DatabaseError> {
        let code = |i: usize| codes.get(i).cloned();
        sqlx::query(
            r#"
            INSERT INTO question_type_distributions
                (difficulty, question_type_1, question_type_2, question_type_3,
                 question_type_4, question_type_5)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(difficulty) DO UPDATE SET
                question_type_1 = excluded.question_type_1,
                question_type_2 = excluded.question_type_2,
                question_type_3 = excluded.question_type_3,
                question_type_4 = excluded.question_type_4,
                question_type_5 = excluded.question_type_5
            "#,
        )
        .bind(i64::from(difficulty))
        .bind(code(0))
        .bind(code(1))
        .bind(code(2))
        .bind(code(3))
        .bind(code(4))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    async fn seeded() -> (Database, Uuid) {
        let db = Database::in_memory().await.unwrap();
        db.upsert_category(1, "Agriculture", 3).await.unwrap();
        db.upsert_language(&Language::new(1, "zh", "Chinese", "中文"))
            .await
            .unwrap();
        db.upsert_language(&Language::new(2, "en", "English", "English"))
            .await
            .unwrap();
        db.upsert_lens(&Lens {
            id: 1,
            lens_code: "economic".into(),
            display_name: "Economic".into(),
            description: None,
            prompt_hint: None,
            is_active: true,
            sort_order: 1,
        })
        .await
        .unwrap();

        let topic_id = db
            .insert_topic(&NewTopic {
                category_id: 1,
                concept: "Terrace farming in mountain villages".into(),
                lens_id: 1,
                keywords: vec!["terraces".into(), "rice".into()],
                embedding: vec![1.0, 0.0, 0.0],
                semantic_signature: "Agriculture: Terrace farming [Economic] (terraces, rice)"
                    .into(),
            })
            .await
            .unwrap();
        (db, topic_id)
    }

    #[tokio::test]
    async fn test_topic_roundtrip_and_match() {
        let (db, topic_id) = seeded().await;

        let topic = db.topic(topic_id).await.unwrap().expect("topic exists");
        assert_eq!(topic.keywords, vec!["terraces", "rice"]);
        assert_eq!(topic.embedding, vec![1.0, 0.0, 0.0]);

        let close = db.match_topics(1, &[0.95, 0.31, 0.0], 0.85, 5).await.unwrap();
        assert_eq!(close.len(), 1);
        assert_eq!(close[0].id, topic_id);
        assert!(close[0].similarity > 0.9);

        let far = db.match_topics(1, &[0.0, 1.0, 0.0], 0.85, 5).await.unwrap();
        assert!(far.is_empty());

        let other_category = db.match_topics(2, &[1.0, 0.0, 0.0], 0.85, 5).await.unwrap();
        assert!(other_category.is_empty());
    }

    #[tokio::test]
    async fn test_queue_unique_topic_language() {
        let (db, topic_id) = seeded().await;

        let inserted = db
            .insert_queue_items(&[(topic_id, 1), (topic_id, 2)])
            .await
            .unwrap();
        assert_eq!(inserted, 2);

        let again = db
            .insert_queue_items(&[(topic_id, 1), (topic_id, 2)])
            .await
            .unwrap();
        assert_eq!(again, 0);
        assert_eq!(db.queue_items_for_topic(topic_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (db, topic_id) = seeded().await;
        db.insert_queue_items(&[(topic_id, 1)]).await.unwrap();
        let item = db.pending_queue_items(10).await.unwrap().remove(0);

        assert!(db.claim_queue_item(item.id).await.unwrap());
        assert!(!db.claim_queue_item(item.id).await.unwrap());
        assert!(db.pending_queue_items(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_transition_rules_enforced() {
        let (db, topic_id) = seeded().await;
        db.insert_queue_items(&[(topic_id, 1)]).await.unwrap();
        let id = db.pending_queue_items(1).await.unwrap()[0].id;

        let skip = db
            .transition_queue_item(id, QueueStatus::Pending, QueueStatus::Active, Some(1), None)
            .await;
        assert!(matches!(skip, Err(DatabaseError::InvalidTransition { .. })));

        let stale = db
            .transition_queue_item(id, QueueStatus::Processing, QueueStatus::Active, Some(1), None)
            .await;
        assert!(matches!(
            stale,
            Err(DatabaseError::InvalidTransition {
                from: QueueStatus::Pending,
                ..
            })
        ));

        assert!(db.claim_queue_item(id).await.unwrap());
        db.transition_queue_item(id, QueueStatus::Processing, QueueStatus::Active, Some(2), None)
            .await
            .unwrap();

        let item = db.queue_item(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Active);
        assert_eq!(item.tests_generated, 2);
        assert!(item.processed_at.is_some());
    }

    #[tokio::test]
    async fn test_trigger_blocks_raw_illegal_update() {
        let (db, topic_id) = seeded().await;
        db.insert_queue_items(&[(topic_id, 1)]).await.unwrap();

        let result = sqlx::query("UPDATE production_queue SET status = 'active'")
            .execute(db.pool())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_pending_items_skip_inactive_languages() {
        let (db, topic_id) = seeded().await;
        db.insert_queue_items(&[(topic_id, 1), (topic_id, 2)])
            .await
            .unwrap();

        let mut chinese = db.language(1).await.unwrap().unwrap();
        chinese.is_active = false;
        db.upsert_language(&chinese).await.unwrap();

        let pending = db.pending_queue_items(10).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].language_id, 2);
    }

    #[tokio::test]
    async fn test_claim_next_category_respects_cooldown() {
        let (db, _) = seeded().await;
        db.upsert_category(2, "Cooking", 3).await.unwrap();
        let now = Utc::now();

        let first = db.claim_next_category(now).await.unwrap().unwrap();
        assert_eq!(first.id, 1);
        let second = db.claim_next_category(now).await.unwrap().unwrap();
        assert_eq!(second.id, 2);
        assert!(db.claim_next_category(now).await.unwrap().is_none());

        let later = now + ChronoDuration::days(3);
        assert_eq!(db.next_eligible_category(later).await.unwrap().unwrap().id, 1);
    }

    #[tokio::test]
    async fn test_record_category_usage_increments_counter() {
        let (db, _) = seeded().await;
        db.record_category_usage(1, 2, Utc::now()).await.unwrap();
        db.record_category_usage(1, 3, Utc::now()).await.unwrap();
        let category = db.category(1).await.unwrap().unwrap();
        assert_eq!(category.total_topics_generated, 5);
        assert!(category.last_used_at.is_some());

        assert!(matches!(
            db.record_category_usage(99, 1, Utc::now()).await,
            Err(DatabaseError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_prompt_template_english_fallback() {
        let (db, _) = seeded().await;
        db.upsert_prompt_template("prose_generation", 2, "English {topic_concept}")
            .await
            .unwrap();

        assert_eq!(
            db.prompt_template("prose_generation", 1).await.unwrap(),
            Some("English {topic_concept}".to_string())
        );

        db.upsert_prompt_template("prose_generation", 1, "中文 {topic_concept}")
            .await
            .unwrap();
        assert_eq!(
            db.prompt_template("prose_generation", 1).await.unwrap(),
            Some("中文 {topic_concept}".to_string())
        );
        assert_eq!(db.prompt_template("missing", 1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_insert_generated_test_is_atomic() {
        let (db, topic_id) = seeded().await;
        db.upsert_test_type(&TestType {
            id: 1,
            type_code: "reading".into(),
            type_name: "Reading".into(),
            requires_audio: false,
            is_active: true,
        })
        .await
        .unwrap();

        let test = GeneratedTest {
            id: Uuid::new_v4(),
            slug: "zh-d4-terrace-farming-20260101000000".into(),
            language_id: 1,
            topic_id,
            difficulty: 4,
            transcript: "梯田".into(),
            title: None,
            audio_url: None,
            gen_user: "system".into(),
        };
        let question = GeneratedQuestion {
            id: Uuid::new_v4(),
            question_text: "What is grown?".into(),
            choices: vec!["Rice".into(), "Corn".into(), "Tea".into(), "Wheat".into()],
            answer: "Rice".into(),
            question_type_id: None,
            display_order: 1,
        };
        let ratings = [SkillRating {
            test_type_id: 1,
            elo_rating: 1250,
            volatility: 1.0,
            total_attempts: 0,
        }];

        db.insert_generated_test(&test, &[question.clone()], &ratings)
            .await
            .unwrap();
        assert_eq!(db.tests_for_topic(topic_id).await.unwrap(), vec![test.clone()]);
        assert_eq!(db.questions_for_test(test.id).await.unwrap(), vec![question]);

        // Same slug again: the whole unit is rolled back.
        let duplicate = GeneratedTest {
            id: Uuid::new_v4(),
            ..test.clone()
        };
        assert!(db.insert_generated_test(&duplicate, &[], &ratings).await.is_err());
        assert_eq!(db.tests_for_topic(topic_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_question_distributions_roundtrip() {
        let (db, _) = seeded().await;
        let codes: Vec<String> = ["main_idea", "inference"].iter().map(|s| s.to_string()).collect();
        db.upsert_question_distribution(7, &codes).await.unwrap();

        let distributions = db.question_distributions().await.unwrap();
        assert_eq!(distributions.get(&7), Some(&codes));
        assert!(!distributions.contains_key(&1));
    }
}
