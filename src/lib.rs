//! # Restatement
//!
//! Context-budget governance for long-form drafting pipelines.
//!
//! Drafting a restatement means calling a text-generation backend over
//! source material far larger than any single request may carry. This
//! crate provides the machinery that keeps every request inside budget:
//!
//! - **[`tokens`]** -- the one measure used for every budgeting decision.
//! - **[`chunker`]** -- bounded, overlapping splits; packing; local trimming.
//! - **[`reducer`]** -- condense oversized text chunk by chunk until it fits.
//! - **[`router`]** -- pick the cheapest tier that holds a request, reducing first if needed.
//! - **[`scheduler`]** -- pace consecutive calls against a per-tier token quota.
//! - **[`context`]** -- grow retrieved supporting documents up to a budget.
//! - **[`pipeline`]** -- run a stage item by item with checkpoints and resume.
//!
//! Execution is strictly sequential: no two backend calls are ever in
//! flight at once, and a stage's outputs keep the order of its items.
//!
//! ## Quick Start
//!
//! ```no_run
//! use restatement::backend::OpenAiBackend;
//! use restatement::checkpoint::JsonFileStore;
//! use restatement::pipeline::PipelineOrchestrator;
//! use restatement::router::{Router, RouterMode};
//! use restatement::scheduler::QuotaScheduler;
//! use restatement::stage::RoutedStage;
//! use restatement::types::WorkItem;
//! use restatement::Budget;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let budget = Budget::default();
//!     let backend = OpenAiBackend::new("https://api.openai.com/v1").with_api_key("sk-...");
//!     let router = Router::new(
//!         Arc::new(backend),
//!         Arc::new(QuotaScheduler::new(&budget)),
//!         budget,
//!         RouterMode::TwoTier,
//!     )?;
//!
//!     let stage = RoutedStage::new(
//!         "briefs",
//!         Arc::new(router),
//!         "You brief court opinions.",
//!         "Brief the following case:\n{query}",
//!     );
//!     let items = WorkItem::sequence(["Opinion text...", "Another opinion..."]);
//!
//!     let orchestrator = PipelineOrchestrator::new(Arc::new(JsonFileStore::new("checkpoints")));
//!     let record = orchestrator.run(&stage, &items, 0).await?;
//!     println!("{} briefs", record.results.len());
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod checkpoint;
pub mod chunker;
pub mod config;
pub mod context;
pub mod envelope;
pub mod error;
pub mod events;
pub mod pipeline;
pub mod prompt;
pub mod provenance;
pub mod reducer;
pub mod router;
pub mod scheduler;
pub mod stage;
pub mod tokens;
pub mod types;

pub use backend::{Backend, MockBackend, OpenAiBackend};
pub use checkpoint::{CheckpointStore, JsonFileStore, MemoryStore, StageRecord, StageState};
pub use chunker::{pack, split, trim_to_fit, Chunk};
pub use config::{Budget, BudgetOverrides, TierBudget};
pub use context::{ContextAssembler, Document, Retriever};
pub use envelope::RequestEnvelope;
pub use error::{PipelineError, Result};
pub use pipeline::PipelineOrchestrator;
pub use reducer::{reduce, Transform};
pub use router::{Routed, Router, RouterMode};
pub use scheduler::{QuotaScheduler, Scheduler};
pub use stage::{ItemOutput, RoutedStage, StageTask};
pub use tokens::measure;
pub use types::{Tier, WorkItem};
