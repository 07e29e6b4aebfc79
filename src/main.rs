//! `restate` -- run one drafting stage under a context budget.
//!
//! Commands:
//! - `run`    -- process a list of items through a routed stage, with checkpoints
//! - `status` -- show the persisted record of a stage

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};

use restatement::backend::{GiveUp, OpenAiBackend, RateLimitPolicy, WaitRetryAfter};
use restatement::checkpoint::{CheckpointStore, JsonFileStore};
use restatement::context::{ContextAssembler, InMemoryRetriever};
use restatement::pipeline::PipelineOrchestrator;
use restatement::prompt::{load_template, SessionMeta};
use restatement::provenance::render_markdown;
use restatement::router::{Router, RouterMode};
use restatement::scheduler::QuotaScheduler;
use restatement::stage::{ContextSource, RoutedStage};
use restatement::types::WorkItem;
use restatement::Budget;

#[derive(Parser)]
#[command(
    name = "restate",
    about = "Draft long-form legal text under a context budget",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a stage over a JSON list of items
    Run(RunArgs),

    /// Show the checkpoint of a stage
    Status {
        #[arg(long)]
        stage: String,

        #[arg(long, default_value = "checkpoints")]
        checkpoint_dir: PathBuf,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Budget file (TOML, or YAML with the `yaml` feature). Defaults apply if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stage name; also the checkpoint key
    #[arg(long)]
    stage: String,

    /// JSON array of item texts
    #[arg(long)]
    items: PathBuf,

    /// Instructions template (system prompt)
    #[arg(long)]
    instructions: PathBuf,

    /// Framing template; `{query}` marks the item, `{context}` retrieved documents
    #[arg(long)]
    framing: Option<PathBuf>,

    /// Instructions used when condensing oversized items
    #[arg(long)]
    condense: Option<PathBuf>,

    /// JSON array of supporting documents to retrieve from
    #[arg(long)]
    context: Option<PathBuf>,

    /// Most documents to retrieve per item
    #[arg(long, default_value_t = 8)]
    k_max: usize,

    /// Resume at this item index
    #[arg(long, default_value_t = 0)]
    start_index: usize,

    /// Use the cheap tier only
    #[arg(long)]
    single_tier: bool,

    #[arg(long, default_value = "checkpoints")]
    checkpoint_dir: PathBuf,

    /// Write a markdown transcript of every request
    #[arg(long)]
    transcript: Option<PathBuf>,

    /// Write the stage results as a JSON array
    #[arg(long)]
    output: Option<PathBuf>,

    /// Wait out up to this many rate-limit refusals per request instead of stopping
    #[arg(long)]
    rate_limit_waits: Option<u32>,

    #[arg(long, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    #[arg(long, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    #[arg(long, default_value = "")]
    section_title: String,

    #[arg(long, default_value = "")]
    area_of_law: String,

    #[arg(long, default_value = "")]
    description: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Status {
            stage,
            checkpoint_dir,
        } => status(&stage, &checkpoint_dir).await,
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let budget = match &args.config {
        Some(path) => Budget::load(path)?,
        None => Budget::default(),
    };

    let mut meta = SessionMeta::new(args.section_title.as_str(), args.description.as_str());
    if !args.area_of_law.is_empty() {
        meta.set_area_of_law(&args.area_of_law);
    }
    let vars = meta.vars();

    // Templates are resolved before any request so a missing file fails fast.
    let instructions = load_template(&args.instructions, &vars).await?;
    let framing = match &args.framing {
        Some(path) => load_template(path, &vars).await?,
        None => "{query}".to_string(),
    };
    let condense = match &args.condense {
        Some(path) => Some(load_template(path, &vars).await?),
        None => None,
    };

    let raw = tokio::fs::read_to_string(&args.items)
        .await
        .with_context(|| format!("reading items from {}", args.items.display()))?;
    let texts: Vec<String> = serde_json::from_str(&raw)
        .with_context(|| format!("{} must be a JSON array of strings", args.items.display()))?;
    let items = WorkItem::sequence(texts);

    let mut backend = OpenAiBackend::new(args.base_url.as_str());
    if let Some(key) = &args.api_key {
        backend = backend.with_api_key(key.as_str());
    }

    let policy: Arc<dyn RateLimitPolicy> = match args.rate_limit_waits {
        Some(n) => Arc::new(WaitRetryAfter::new(n, Duration::from_secs(60))),
        None => Arc::new(GiveUp),
    };
    let mode = if args.single_tier {
        RouterMode::SingleTier
    } else {
        RouterMode::TwoTier
    };
    let context_budget = budget.cheap.max_tokens;
    let router = Router::new(
        Arc::new(backend),
        Arc::new(QuotaScheduler::new(&budget)),
        budget,
        mode,
    )?
    .with_policy(policy);

    let mut stage = RoutedStage::new(args.stage.as_str(), Arc::new(router), instructions, framing);
    if let Some(condense) = condense {
        stage = stage.with_condense_instructions(condense);
    }
    if let Some(path) = &args.context {
        let retriever = InMemoryRetriever::from_json_file(path).await?;
        stage = stage.with_context(ContextSource::new(
            Arc::new(retriever),
            ContextAssembler::new(context_budget, args.k_max),
        ));
    }

    let store = Arc::new(JsonFileStore::new(&args.checkpoint_dir));
    let orchestrator = PipelineOrchestrator::new(store.clone());
    let outcome = orchestrator.run(&stage, &items, args.start_index).await;

    if let Some(path) = &args.transcript {
        if let Some(record) = store.load(&args.stage).await? {
            let title = match meta.short_title() {
                t if t.is_empty() => format!("{} prompts", args.stage),
                t => format!("{} prompts", t),
            };
            tokio::fs::write(path, render_markdown(&title, &record.all_requests()))
                .await
                .with_context(|| format!("writing transcript to {}", path.display()))?;
        }
    }

    let record = outcome?;
    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&record.results)?;
        tokio::fs::write(path, json)
            .await
            .with_context(|| format!("writing results to {}", path.display()))?;
    }

    println!(
        "Stage '{}' completed: {} result(s), checkpoint at {}",
        record.stage,
        record.len(),
        store.path_for(&record.stage).display()
    );
    Ok(())
}

async fn status(stage: &str, checkpoint_dir: &Path) -> Result<()> {
    let store = JsonFileStore::new(checkpoint_dir);
    match store.load(stage).await? {
        Some(record) => {
            println!("Stage:        {}", record.stage);
            println!("State:        {}", record.state);
            println!("Entries:      {} of {}", record.len(), record.total_items);
            println!("Resume index: {}", record.resume_index);
            println!("Requests:     {}", record.all_requests().len());
            println!("Updated:      {}", record.updated_at.to_rfc3339());
        }
        None => println!("No checkpoint for stage '{}' in {}", stage, checkpoint_dir.display()),
    }
    Ok(())
}
