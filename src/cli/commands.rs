//! CLI command definitions for lingua-forge.
//!
//! Each generation command runs one pass of its stage and maps the result to
//! a [`RunOutcome`], which `main` turns into the process exit code.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::embedding::{EmbeddingProvider, OpenAiEmbeddingClient};
use crate::llm::{LiteLlmClient, LlmProvider};
use crate::object_store::{HttpObjectStore, LocalObjectStore, ObjectStore};
use crate::pipeline::config::DEFAULT_DATABASE_URL;
use crate::pipeline::{
    AudioStorage, PipelineError, ProviderConfig, RunOutcome, TestGenConfig, TestOrchestrator,
    TopicGenConfig, TopicOrchestrator,
};
use crate::speech::{OpenAiSpeechClient, SpeechSynthesizer};
use crate::storage::Database;

use super::seed::SeedData;

/// Language-learning content generator.
#[derive(Parser)]
#[command(name = "lingua-forge")]
#[command(about = "Generate novel topics and turn them into listening and reading tests")]
#[command(version)]
#[command(
    long_about = "lingua-forge runs the two content stages on a schedule.\n\n`topics` invents topics for the next eligible category and queues them per language.\n`tests` drains the queue into tests with questions and narrated audio.\n\nExit codes: 0 success, 1 warning (work available but little produced), 2 failure.\n\nExample usage:\n  lingua-forge migrate && lingua-forge seed\n  lingua-forge topics --quota 5\n  lingua-forge tests --batch-size 20"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,

    /// SQLite database URL or path.
    #[arg(long, env = "DATABASE_URL", default_value = DEFAULT_DATABASE_URL, global = true)]
    pub database_url: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Generate topics for the next eligible category and queue them.
    Topics(TopicsArgs),

    /// Generate tests from pending queue items.
    Tests(TestsArgs),

    /// Create or upgrade the database schema.
    Migrate,

    /// Load reference data (languages, lenses, test types, templates, ...).
    Seed(SeedArgs),
}

/// Arguments for `lingua-forge topics`.
#[derive(Parser, Debug)]
pub struct TopicsArgs {
    /// Run every step but write nothing.
    #[arg(long, env = "TOPIC_DRY_RUN")]
    pub dry_run: bool,

    /// Maximum approved topics for this run.
    #[arg(long, env = "TOPIC_DAILY_QUOTA")]
    pub quota: Option<u32>,

    /// Candidates requested from the explorer.
    #[arg(long)]
    pub max_candidates: Option<u32>,

    /// Print the run metrics as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `lingua-forge tests`.
#[derive(Parser, Debug)]
pub struct TestsArgs {
    /// Process only this queue item.
    #[arg(long)]
    pub queue_id: Option<Uuid>,

    /// Run every step but write nothing and leave items pending.
    #[arg(long, env = "TEST_GEN_DRY_RUN")]
    pub dry_run: bool,

    /// Maximum queue items to process.
    #[arg(long, env = "TEST_GEN_BATCH_SIZE")]
    pub batch_size: Option<usize>,

    /// Print the run metrics as JSON.
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `lingua-forge seed`.
#[derive(Parser, Debug)]
pub struct SeedArgs {
    /// YAML file to load instead of the bundled data.
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}

/// Parses command-line arguments.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Parses arguments and runs the selected command.
pub async fn run() -> anyhow::Result<RunOutcome> {
    run_with_cli(parse_cli()).await
}

/// Runs a parsed command.
///
/// Configuration problems surface as `Err`; pipeline results are graded into
/// a [`RunOutcome`].
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<RunOutcome> {
    match cli.command {
        Commands::Topics(args) => run_topics(&cli.database_url, args).await,
        Commands::Tests(args) => run_tests(&cli.database_url, args).await,
        Commands::Migrate => run_migrate(&cli.database_url).await,
        Commands::Seed(args) => run_seed(&cli.database_url, args).await,
    }
}

async fn open_database(database_url: &str) -> anyhow::Result<Database> {
    let db = Database::connect(database_url)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;
    db.run_migrations().await.context("Failed to migrate database")?;
    Ok(db)
}

fn load_providers(database_url: &str) -> anyhow::Result<ProviderConfig> {
    let providers = ProviderConfig::from_env()
        .context("Provider configuration is incomplete")?
        .with_database_url(database_url);
    providers.validate()?;
    Ok(providers)
}

fn build_llm(providers: &ProviderConfig, default_model: &str) -> Arc<dyn LlmProvider> {
    Arc::new(LiteLlmClient::new(
        providers.llm_api_base.clone(),
        Some(providers.llm_api_key.clone()),
        default_model.to_string(),
    ))
}

fn build_store(providers: &ProviderConfig) -> Arc<dyn ObjectStore> {
    match providers.audio_storage {
        AudioStorage::Local { ref dir } => Arc::new(LocalObjectStore::new(
            dir.clone(),
            providers.audio_public_base_url.clone(),
        )),
        AudioStorage::Http {
            ref upload_url,
            ref token,
        } => Arc::new(HttpObjectStore::new(
            upload_url.clone(),
            providers.audio_public_base_url.clone(),
            Some(token.clone()),
        )),
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Applies `topics` flags on top of the environment configuration.
fn topic_config(base: TopicGenConfig, args: &TopicsArgs) -> anyhow::Result<TopicGenConfig> {
    let dry_run = base.dry_run || args.dry_run;
    let mut config = base.with_dry_run(dry_run);
    if let Some(quota) = args.quota {
        config = config.with_daily_quota(quota);
    }
    if let Some(max) = args.max_candidates {
        config = config.with_max_candidates(max);
    }
    config.validate()?;
    Ok(config)
}

/// Applies `tests` flags on top of the environment configuration.
fn test_gen_config(base: TestGenConfig, args: &TestsArgs) -> anyhow::Result<TestGenConfig> {
    let dry_run = base.dry_run || args.dry_run;
    let mut config = base.with_dry_run(dry_run);
    if let Some(batch_size) = args.batch_size {
        config = config.with_batch_size(batch_size);
    }
    config.validate()?;
    Ok(config)
}

async fn run_topics(database_url: &str, args: TopicsArgs) -> anyhow::Result<RunOutcome> {
    let config = topic_config(TopicGenConfig::from_env()?, &args)?;

    let providers = load_providers(database_url)?;
    let db = open_database(&providers.database_url).await?;
    let llm = build_llm(&providers, &config.llm_model);
    let embedder: Arc<dyn EmbeddingProvider> = Arc::new(
        OpenAiEmbeddingClient::new(
            providers.openai_api_base.clone(),
            providers.openai_api_key.clone(),
        )
        .with_model(&config.embedding_model)
        .with_dimensions(config.embedding_dimensions),
    );

    let quota = config.daily_quota;
    info!(quota, dry_run = config.dry_run, "Running topic generation");
    let orchestrator = TopicOrchestrator::new(db, llm, embedder, config);
    let result = orchestrator.run().await;

    match result {
        Ok(ref metrics) if args.json => print_json(metrics)?,
        Err(PipelineError::NoEligibleCategory) => {
            info!("No eligible category: every category is cooling down");
        }
        _ => {}
    }

    let outcome = RunOutcome::for_topic_run(&result, quota);
    info!(?outcome, "Topic generation complete");
    Ok(outcome)
}

async fn run_tests(database_url: &str, args: TestsArgs) -> anyhow::Result<RunOutcome> {
    let config = test_gen_config(TestGenConfig::from_env()?, &args)?;

    let providers = load_providers(database_url)?;
    let db = open_database(&providers.database_url).await?;
    let llm = build_llm(&providers, &config.prose_model);
    let speech: Arc<dyn SpeechSynthesizer> = Arc::new(OpenAiSpeechClient::new(
        providers.openai_api_base.clone(),
        providers.openai_api_key.clone(),
    ));
    let store = build_store(&providers);

    info!(
        batch_size = config.batch_size,
        difficulties = ?config.target_difficulties,
        dry_run = config.dry_run,
        "Running test generation"
    );
    let orchestrator = TestOrchestrator::new(db, llm, speech, store, config);
    let result = match args.queue_id {
        Some(queue_id) => orchestrator.run_single(queue_id).await,
        None => orchestrator.run().await,
    };

    if let Ok(ref metrics) = result {
        if args.json {
            print_json(metrics)?;
        }
    }

    let outcome = RunOutcome::for_test_run(&result);
    info!(?outcome, "Test generation complete");
    Ok(outcome)
}

async fn run_migrate(database_url: &str) -> anyhow::Result<RunOutcome> {
    let db = Database::connect(database_url)
        .await
        .with_context(|| format!("Failed to open database {}", database_url))?;
    let applied = db.run_migrations().await?;
    info!(applied, "Migrations complete");
    Ok(RunOutcome::Success)
}

async fn run_seed(database_url: &str, args: SeedArgs) -> anyhow::Result<RunOutcome> {
    let seed = match args.file {
        Some(ref path) => SeedData::from_file(path)?,
        None => SeedData::builtin()?,
    };
    let db = open_database(database_url).await?;
    let summary = seed.apply(&db).await?;
    info!(
        categories = summary.categories,
        languages = summary.languages,
        lenses = summary.lenses,
        templates = summary.templates,
        "Seed complete"
    );
    Ok(RunOutcome::Success)
}
