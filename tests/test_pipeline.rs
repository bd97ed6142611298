//! End-to-end test generation against an in-memory database.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{seeded_database, ScriptedLlm, SelectiveSpeech};
use lingua_forge::dimensions::DimensionCache;
use lingua_forge::object_store::LocalObjectStore;
use lingua_forge::pipeline::{PipelineError, RunOutcome, TestGenConfig, TestOrchestrator};
use lingua_forge::storage::{Database, NewTopic, QueueStatus};
use tempfile::TempDir;
use uuid::Uuid;

const JAPANESE: i64 = 3;
const ENGLISH: i64 = 2;

struct Fixture {
    db: Database,
    topic_id: Uuid,
    audio_dir: TempDir,
}

impl Fixture {
    async fn new(language_ids: &[i64]) -> Self {
        let db = seeded_database().await;
        let topic_id = db
            .insert_topic(&NewTopic {
                category_id: 1,
                concept: "Bowing customs in Japan".to_string(),
                lens_id: 1,
                keywords: vec!["bow".to_string(), "respect".to_string()],
                embedding: vec![1.0, 0.0, 0.0],
                semantic_signature: "Greetings: Bowing customs in Japan [Cultural] (bow, respect)"
                    .to_string(),
            })
            .await
            .unwrap();
        let pairs: Vec<(Uuid, i64)> = language_ids.iter().map(|&id| (topic_id, id)).collect();
        db.insert_queue_items(&pairs).await.unwrap();

        Self {
            db,
            topic_id,
            audio_dir: TempDir::new().unwrap(),
        }
    }

    fn orchestrator(
        &self,
        llm: Arc<ScriptedLlm>,
        speech: Arc<SelectiveSpeech>,
        config: TestGenConfig,
    ) -> TestOrchestrator {
        let store = Arc::new(LocalObjectStore::new(
            self.audio_dir.path(),
            "https://audio.test",
        ));
        TestOrchestrator::new(self.db.clone(), llm, speech, store, config)
    }

    async fn queue_item_id(&self, language_id: i64) -> Uuid {
        self.db
            .queue_items_for_topic(self.topic_id)
            .await
            .unwrap()
            .into_iter()
            .find(|item| item.language_id == language_id)
            .unwrap()
            .id
    }
}

fn config() -> TestGenConfig {
    TestGenConfig::new().with_retries(2, Duration::ZERO, Duration::ZERO)
}

#[tokio::test]
async fn test_queue_item_becomes_three_tests() {
    let fixture = Fixture::new(&[JAPANESE]).await;
    let llm = Arc::new(ScriptedLlm::new());
    let speech = Arc::new(SelectiveSpeech::working());
    let orchestrator = fixture.orchestrator(llm.clone(), speech.clone(), config());

    let result = orchestrator.run().await;
    assert_eq!(RunOutcome::for_test_run(&result), RunOutcome::Success);
    let metrics = result.unwrap();
    assert_eq!(metrics.queue_items_processed, 1);
    assert_eq!(metrics.tests_generated, 3);
    assert_eq!(metrics.tests_failed, 0);

    let item_id = fixture.queue_item_id(JAPANESE).await;
    let item = fixture.db.queue_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Active);
    assert_eq!(item.tests_generated, 3);
    assert!(item.processed_at.is_some());

    // The passage is written about the translated topic.
    assert_eq!(llm.prompts_starting_with("Translate the following"), 1);
    assert!(llm
        .prompts
        .lock()
        .unwrap()
        .iter()
        .any(|p| p.starts_with("Generate a natural") && p.contains("お辞儀の習慣")));

    let dims = DimensionCache::load(&fixture.db).await.unwrap();
    let tests = fixture.db.tests_for_topic(fixture.topic_id).await.unwrap();
    let difficulties: Vec<u8> = tests.iter().map(|t| t.difficulty).collect();
    assert_eq!(difficulties, vec![4, 6, 9]);

    for test in &tests {
        assert_eq!(test.language_id, JAPANESE);
        assert_eq!(test.title.as_deref(), Some("Bowing at the Inn"));
        assert!(test.slug.starts_with(&format!("jp-d{}-bowing-customs-in-japan-", test.difficulty)));
        assert_eq!(
            test.audio_url.as_deref(),
            Some(format!("https://audio.test/{}.mp3", test.id).as_str())
        );
        assert!(fixture.audio_dir.path().join(format!("{}.mp3", test.id)).exists());

        let questions = fixture.db.questions_for_test(test.id).await.unwrap();
        assert_eq!(questions.len(), 5);
        for (i, question) in questions.iter().enumerate() {
            // Every scripted reply answers with the letter "B".
            assert_eq!(question.answer, question.choices[1]);
            assert_eq!(question.display_order, i as i64 + 1);
            assert!(question.question_type_id.is_some());
        }

        let ratings: Vec<(i64, i64, i64)> = sqlx::query_as(
            "SELECT test_type_id, elo_rating, total_attempts FROM test_skill_ratings WHERE test_id = ?1 ORDER BY test_type_id",
        )
        .bind(test.id.to_string())
        .fetch_all(fixture.db.pool())
        .await
        .unwrap();
        let expected_elo = i64::from(dims.initial_elo(test.difficulty));
        assert_eq!(
            ratings,
            vec![(1, expected_elo, 0), (2, expected_elo, 0), (3, expected_elo, 0)]
        );
    }

    let voices: Vec<String> = speech
        .calls
        .lock()
        .unwrap()
        .iter()
        .map(|c| c.voice.clone())
        .collect();
    assert_eq!(voices, vec!["nova", "nova", "nova"]);
}

#[tokio::test]
async fn test_audio_failure_only_loses_one_difficulty() {
    let fixture = Fixture::new(&[JAPANESE]).await;
    let llm = Arc::new(ScriptedLlm::new());
    let speech = Arc::new(SelectiveSpeech::failing_on("Level 9"));
    let orchestrator = fixture.orchestrator(llm, speech.clone(), config());

    let metrics = orchestrator.run().await.unwrap();
    assert_eq!(metrics.tests_generated, 2);
    assert_eq!(metrics.tests_failed, 1);

    let item_id = fixture.queue_item_id(JAPANESE).await;
    let item = fixture.db.queue_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Active);
    assert_eq!(item.tests_generated, 2);

    let difficulties: Vec<u8> = fixture
        .db
        .tests_for_topic(fixture.topic_id)
        .await
        .unwrap()
        .iter()
        .map(|t| t.difficulty)
        .collect();
    assert_eq!(difficulties, vec![4, 6]);

    // Two successful narrations plus every attempt at the failing one.
    assert_eq!(speech.call_count(), 2 + 2);
}

#[tokio::test]
async fn test_unusable_questions_reject_the_item() {
    let fixture = Fixture::new(&[ENGLISH]).await;
    let llm = Arc::new(ScriptedLlm::new().with_broken_questions());
    let speech = Arc::new(SelectiveSpeech::working());
    let orchestrator = fixture.orchestrator(llm.clone(), speech.clone(), config());

    let result = orchestrator.run().await;
    assert_eq!(RunOutcome::for_test_run(&result), RunOutcome::Warning);
    let metrics = result.unwrap();
    assert_eq!(metrics.queue_items_processed, 1);
    assert_eq!(metrics.tests_generated, 0);
    assert_eq!(metrics.tests_failed, 3);

    let item_id = fixture.queue_item_id(ENGLISH).await;
    let item = fixture.db.queue_item(item_id).await.unwrap().unwrap();
    assert_eq!(item.status, QueueStatus::Rejected);
    assert_eq!(item.tests_generated, 0);
    assert!(item
        .error_log
        .unwrap_or_default()
        .contains("Too few valid questions: 0/5"));

    assert!(fixture.db.tests_for_topic(fixture.topic_id).await.unwrap().is_empty());
    assert_eq!(speech.call_count(), 0);
    // English topics are used as-is.
    assert_eq!(llm.prompts_starting_with("Translate the following"), 0);
}

#[tokio::test]
async fn test_dry_run_leaves_queue_pending() {
    let fixture = Fixture::new(&[JAPANESE, ENGLISH]).await;
    let llm = Arc::new(ScriptedLlm::new());
    let speech = Arc::new(SelectiveSpeech::working());
    let orchestrator = fixture.orchestrator(llm, speech.clone(), config().with_dry_run(true));

    let metrics = orchestrator.run().await.unwrap();
    assert_eq!(metrics.queue_items_processed, 2);
    assert_eq!(metrics.tests_generated, 6);

    let pending = fixture.db.pending_queue_items(10).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert!(fixture.db.tests_for_topic(fixture.topic_id).await.unwrap().is_empty());
    assert_eq!(speech.call_count(), 0);

    let runs: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM test_generation_runs")
        .fetch_one(fixture.db.pool())
        .await
        .unwrap();
    assert_eq!(runs, 0);
}

#[tokio::test]
async fn test_run_single_processes_only_the_named_item() {
    let fixture = Fixture::new(&[JAPANESE, ENGLISH]).await;
    let llm = Arc::new(ScriptedLlm::new());
    let speech = Arc::new(SelectiveSpeech::working());
    let orchestrator = fixture.orchestrator(
        llm,
        speech,
        config().with_target_difficulties(vec![5]),
    );

    let english_id = fixture.queue_item_id(ENGLISH).await;
    let metrics = orchestrator.run_single(english_id).await.unwrap();
    assert_eq!(metrics.queue_items_processed, 1);
    assert_eq!(metrics.tests_generated, 1);

    let pending = fixture.db.pending_queue_items(10).await.unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].language_id, JAPANESE);

    let again = orchestrator.run_single(english_id).await;
    assert!(matches!(
        again,
        Err(PipelineError::QueueItemNotPending {
            status: QueueStatus::Active,
            ..
        })
    ));

    let missing = orchestrator.run_single(Uuid::new_v4()).await;
    assert!(matches!(missing, Err(PipelineError::QueueItemNotFound(_))));
}
