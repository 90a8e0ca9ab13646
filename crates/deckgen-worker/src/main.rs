// Deckgen Worker
//
// Design Decision: One process runs one deck; stages run back to back, each as a
// background batch polled through its task record.
// Design Decision: Ctrl-C aborts in-flight batches and closes their task records as FAILED.

mod deck;
mod runner;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use deckgen_core::{
    init_telemetry, AppConfig, GenerativeProvider, InMemoryRecordStore, ProjectStatus,
    RecordStore, TaskRecord, TaskStatus, TaskType, TelemetryConfig,
};
use deckgen_gemini::GeminiProvider;
use deckgen_storage::PostgresRecordStore;
use deckgen_tasks::{
    BatchLauncher, DescriptionExecutor, ImageExecutor, PageImageStore, SubmissionGateway,
    TaskOrchestrator, TaskRegistry,
};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::deck::{Deck, ImageDefaults};
use crate::runner::StageRunner;

#[derive(Parser)]
#[command(name = "deckgen-worker")]
#[command(about = "Generate page descriptions and images for a slide deck")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a project from a deck file and run generation stages
    Run {
        /// Deck definition (JSON)
        #[arg(long)]
        deck: PathBuf,

        /// Stages to run
        #[arg(long, value_enum, default_value_t = Stage::All)]
        stage: Stage,

        /// Override the configured worker count for every stage
        #[arg(long)]
        max_workers: Option<usize>,

        /// Task record poll interval in milliseconds
        #[arg(long, default_value = "500")]
        poll_ms: u64,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Stage {
    Descriptions,
    Images,
    All,
}

impl Stage {
    fn runs_descriptions(self) -> bool {
        matches!(self, Self::Descriptions | Self::All)
    }

    fn runs_images(self) -> bool {
        matches!(self, Self::Images | Self::All)
    }

    /// Project status the deck starts from
    fn initial_status(self) -> ProjectStatus {
        if self.runs_descriptions() {
            ProjectStatus::OutlineGenerated
        } else {
            ProjectStatus::DescriptionsGenerated
        }
    }
}

/// Everything a deck run needs, wired from configuration
struct Worker {
    config: AppConfig,
    store: Arc<dyn RecordStore>,
    provider: Arc<dyn GenerativeProvider>,
    runner: StageRunner,
}

impl Worker {
    async fn build(config: AppConfig, poll_interval: Duration) -> Result<Self> {
        let store: Arc<dyn RecordStore> = match &config.database_url {
            Some(url) => {
                let store = PostgresRecordStore::connect(url)
                    .await
                    .context("Failed to connect to database")?;
                store.migrate().await.context("Failed to run migrations")?;
                info!("Using PostgreSQL record store");
                Arc::new(store)
            }
            None => {
                warn!("DATABASE_URL not set, using in-memory record store");
                Arc::new(InMemoryRecordStore::new())
            }
        };

        let provider: Arc<dyn GenerativeProvider> = Arc::new(
            GeminiProvider::from_config(config.provider.clone())
                .context("Failed to configure Gemini provider")?,
        );

        let gateway = SubmissionGateway::current(TaskRegistry::new())?;
        let orchestrator = Arc::new(
            TaskOrchestrator::new(Arc::clone(&store)).with_item_timeout(config.item_timeout),
        );
        let runner = StageRunner::new(BatchLauncher::new(orchestrator, gateway), poll_interval);

        Ok(Self {
            config,
            store,
            provider,
            runner,
        })
    }

    async fn run_deck(&self, deck: &Deck, stage: Stage, max_workers: Option<usize>) -> Result<()> {
        if deck.pages.is_empty() {
            bail!("Deck has no pages");
        }

        let project = self
            .store
            .create_project(deck.new_project(stage.initial_status()))
            .await?;
        for page in deck.new_pages(project.id) {
            self.store.create_page(page).await?;
        }
        info!(project_id = %project.id, pages = deck.pages.len(), "Project created");

        if stage.runs_descriptions() {
            let pages = self.store.list_pages(project.id).await?;
            let executor = Arc::new(DescriptionExecutor::new(Arc::clone(&self.provider)));
            let task = self
                .runner
                .run(
                    TaskType::GenerateDescriptions,
                    project.id,
                    executor,
                    deck.description_items(&pages),
                    max_workers.unwrap_or(self.config.max_description_workers),
                )
                .await?;
            check_stage(&task)?;
        }

        if stage.runs_images() {
            let pages = self.store.list_pages(project.id).await?;
            let defaults = ImageDefaults {
                aspect_ratio: self.config.default_aspect_ratio.clone(),
                resolution: self.config.default_resolution.clone(),
            };
            let files = PageImageStore::new(self.config.upload_folder.clone());
            let executor = Arc::new(
                ImageExecutor::new(Arc::clone(&self.provider), files)
                    .context("Failed to configure image stage")?,
            );
            let task = self
                .runner
                .run(
                    TaskType::GenerateImages,
                    project.id,
                    executor,
                    deck.image_items(project.id, &pages, &defaults),
                    max_workers.unwrap_or(self.config.max_image_workers),
                )
                .await?;
            check_stage(&task)?;
        }

        self.summarize(project.id).await
    }

    async fn summarize(&self, project_id: Uuid) -> Result<()> {
        let project = self.store.get_project(project_id).await?;
        let pages = self.store.list_pages(project_id).await?;
        for page in &pages {
            info!(
                order_index = page.order_index,
                status = %page.status,
                image = page.generated_image_path.as_deref().unwrap_or("-"),
                "Page"
            );
        }
        info!(project_id = %project_id, status = %project.status, "Deck finished");
        Ok(())
    }
}

fn check_stage(task: &TaskRecord) -> Result<()> {
    info!(
        task_id = %task.id,
        task_type = %task.task_type,
        status = %task.status,
        completed = task.progress.completed,
        failed = task.progress.failed,
        "Stage finished"
    );
    if task.status == TaskStatus::Failed {
        bail!("{} failed", task.task_type);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Missing .env is fine
    let _ = dotenvy::dotenv();

    // Configure via environment variables:
    // - RUST_LOG or LOG_LEVEL: Log filter (default: "info")
    // - LOG_FORMAT=json: JSON log lines
    init_telemetry(TelemetryConfig::from_env().with_service_name("deckgen-worker"));

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("Invalid configuration")?;

    match cli.command {
        Commands::Run {
            deck,
            stage,
            max_workers,
            poll_ms,
        } => {
            if max_workers == Some(0) {
                bail!("--max-workers must be at least 1");
            }
            let deck = Deck::load(&deck)?;
            let worker = Worker::build(config, Duration::from_millis(poll_ms)).await?;

            tokio::select! {
                result = worker.run_deck(&deck, stage, max_workers) => {
                    if let Err(e) = &result {
                        error!(error = %e, "Deck run failed");
                    }
                    result?;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    let closed = worker.runner.launcher().shutdown().await;
                    warn!(closed, "In-flight batches aborted");
                    bail!("Interrupted");
                }
            }
        }
    }

    info!("Worker shutdown complete");
    Ok(())
}
