//! Topic stage: category → candidates → novelty → gatekeeping → queue.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use uuid::Uuid;

use crate::agents::{
    build_signature, ArchivistAgent, ArchivistConfig, ExplorerAgent, ExplorerConfig,
    GatekeeperAgent, GatekeeperConfig,
};
use crate::dimensions::DimensionCache;
use crate::embedding::EmbeddingProvider;
use crate::llm::LlmProvider;
use crate::prompts::{ENGLISH_LANGUAGE_ID, EXPLORER_IDEATION, GATEKEEPER_CHECK};
use crate::storage::{Category, Database, NewTopic, TopicRunMetrics};

use super::config::TopicGenConfig;
use super::{load_template, PipelineError, EMBEDDING_CALL_COST_USD, LLM_CALL_COST_USD};

/// Drives one topic-generation run.
pub struct TopicOrchestrator {
    db: Database,
    explorer: ExplorerAgent,
    archivist: ArchivistAgent,
    gatekeeper: GatekeeperAgent,
    config: TopicGenConfig,
}

impl std::fmt::Debug for TopicOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopicOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl TopicOrchestrator {
    pub fn new(
        db: Database,
        llm: Arc<dyn LlmProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: TopicGenConfig,
    ) -> Self {
        let explorer = ExplorerAgent::new(
            llm.clone(),
            ExplorerConfig::default()
                .with_model(&config.llm_model)
                .with_temperature(config.llm_temperature)
                .with_retry(config.retry),
        );
        let archivist = ArchivistAgent::new(
            embedder,
            db.clone(),
            ArchivistConfig::default()
                .with_similarity_threshold(config.similarity_threshold)
                .with_retry(config.retry),
        );
        let gatekeeper = GatekeeperAgent::new(
            llm,
            GatekeeperConfig::default()
                .with_model(&config.llm_model)
                .with_temperature(config.gatekeeper_temperature)
                .with_short_circuit_threshold(config.gatekeeper_short_circuit)
                .with_retry(config.retry),
        );

        Self {
            db,
            explorer,
            archivist,
            gatekeeper,
            config,
        }
    }

    pub fn config(&self) -> &TopicGenConfig {
        &self.config
    }

    /// Runs the topic stage once.
    ///
    /// Returns [`PipelineError::NoEligibleCategory`] when every category is
    /// cooling down. Metrics are written even when the run fails after a
    /// category was claimed.
    pub async fn run(&self) -> Result<TopicRunMetrics, PipelineError> {
        let started = Instant::now();
        let now = Utc::now();
        let dry_run = self.config.dry_run;

        let selected = if dry_run {
            self.db.next_eligible_category(now).await?
        } else {
            self.db.claim_next_category(now).await?
        };
        let category = selected.ok_or(PipelineError::NoEligibleCategory)?;

        tracing::info!(
            category = %category.name,
            category_id = category.id,
            quota = self.config.daily_quota,
            dry_run,
            "Starting topic generation"
        );

        let mut metrics = TopicRunMetrics::new(now);
        metrics.category_id = Some(category.id);
        metrics.category_name = Some(category.name.clone());

        let result = self.generate(&category, &mut metrics).await;

        metrics.total_cost_usd = f64::from(metrics.api_calls_llm) * LLM_CALL_COST_USD
            + f64::from(metrics.api_calls_embedding) * EMBEDDING_CALL_COST_USD;
        metrics.execution_time_seconds = started.elapsed().as_secs_f64();
        if let Err(ref e) = result {
            metrics.error_message = Some(e.to_string());
        }

        if dry_run {
            tracing::info!("Dry run: skipping run metrics insert");
        } else if let Err(e) = self.db.insert_topic_run(&metrics).await {
            tracing::error!(error = %e, "Failed to record topic run metrics");
        }

        match result {
            Ok(()) => {
                tracing::info!(
                    category = %category.name,
                    generated = metrics.topics_generated,
                    rejected_similarity = metrics.topics_rejected_similarity,
                    rejected_gatekeeper = metrics.topics_rejected_gatekeeper,
                    queue_items = metrics.queue_items_created,
                    cost_usd = metrics.total_cost_usd,
                    "Topic generation finished"
                );
                Ok(metrics)
            }
            Err(e) => {
                tracing::error!(category = %category.name, error = %e, "Topic generation failed");
                Err(e)
            }
        }
    }

    async fn generate(
        &self,
        category: &Category,
        metrics: &mut TopicRunMetrics,
    ) -> Result<(), PipelineError> {
        let dry_run = self.config.dry_run;
        let dims = DimensionCache::load(&self.db).await?;
        if dims.languages().is_empty() {
            return Err(PipelineError::MissingReference("no active languages".to_string()));
        }
        if dims.lenses().is_empty() {
            return Err(PipelineError::MissingReference("no active lenses".to_string()));
        }

        let explorer_template = load_template(&self.db, EXPLORER_IDEATION, ENGLISH_LANGUAGE_ID).await?;
        let gatekeeper_template = load_template(&self.db, GATEKEEPER_CHECK, ENGLISH_LANGUAGE_ID).await?;

        metrics.api_calls_llm += 1;
        let candidates = self
            .explorer
            .generate_candidates(
                &explorer_template,
                &category.name,
                dims.lenses(),
                self.config.max_candidates as usize,
            )
            .await?;
        metrics.candidates_proposed = candidates.len() as u32;

        let mut queue_pairs: Vec<(Uuid, i64)> = Vec::new();

        for candidate in &candidates {
            if metrics.topics_generated >= self.config.daily_quota {
                tracing::info!("Daily quota reached");
                break;
            }

            let Some(lens) = dims.lens_by_code(&candidate.lens_code) else {
                tracing::debug!(lens = %candidate.lens_code, "Skipping candidate with unknown lens");
                continue;
            };

            let signature = build_signature(
                &category.name,
                &candidate.concept,
                &lens.display_name,
                &candidate.keywords,
            );
            metrics.api_calls_embedding += 1;
            let verdict = self.archivist.check_novelty(category.id, &signature).await?;
            if !verdict.is_novel {
                metrics.topics_rejected_similarity += 1;
                tracing::info!(concept = %candidate.concept, reason = %verdict.reason, "Candidate rejected as duplicate");
                continue;
            }

            let topic_id = if dry_run {
                Uuid::new_v4()
            } else {
                self.db
                    .insert_topic(&NewTopic {
                        category_id: category.id,
                        concept: candidate.concept.clone(),
                        lens_id: lens.id,
                        keywords: candidate.keywords.clone(),
                        embedding: verdict.embedding.unwrap_or_default(),
                        semantic_signature: signature,
                    })
                    .await?
            };

            let outcome = self
                .gatekeeper
                .validate_for_all_languages(
                    &gatekeeper_template,
                    candidate,
                    &lens.display_name,
                    dims.languages(),
                )
                .await;
            metrics.api_calls_llm += outcome.calls_made;

            if outcome.approved.is_empty() {
                metrics.topics_rejected_gatekeeper += 1;
                tracing::info!(concept = %candidate.concept, "No language approved the candidate");
                continue;
            }

            queue_pairs.extend(outcome.approved.iter().map(|language| (topic_id, language.id)));
            metrics.topics_generated += 1;
            tracing::info!(
                concept = %candidate.concept,
                topic_id = %topic_id,
                languages = outcome.approved.len(),
                "Topic approved"
            );
        }

        if dry_run {
            metrics.queue_items_created = queue_pairs.len() as u32;
            tracing::info!(
                queue_items = queue_pairs.len(),
                "Dry run: skipping queue insert and category update"
            );
            return Ok(());
        }

        let inserted = self.db.insert_queue_items(&queue_pairs).await?;
        metrics.queue_items_created = inserted as u32;
        if (inserted as usize) < queue_pairs.len() {
            tracing::warn!(
                requested = queue_pairs.len(),
                inserted,
                "Some queue items already existed"
            );
        }

        self.db
            .record_category_usage(category.id, metrics.topics_generated, Utc::now())
            .await?;
        Ok(())
    }
}
