//! Demo: run a two-tier stage against MockBackend, with a forced failure and resume.
//!
//! Run with: `cargo run --example mock_stage`

use restatement::backend::MockBackend;
use restatement::checkpoint::MemoryStore;
use restatement::events::{Event, FnEventHandler};
use restatement::pipeline::PipelineOrchestrator;
use restatement::router::{Router, RouterMode};
use restatement::scheduler::NoPacing;
use restatement::stage::RoutedStage;
use restatement::types::WorkItem;
use restatement::{Budget, PipelineError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Small ceilings so the long item has to be condensed.
    let mut budget = Budget::default();
    budget.cheap.max_tokens = 200;
    budget.cheap.chunk_size = 100;
    budget.expensive.max_tokens = 400;
    budget.expensive.chunk_size = 200;
    budget.cheap.chunk_overlap = 10;
    budget.expensive.chunk_overlap = 10;

    // The backend is "down" for the third item on the first pass.
    let outage = Arc::new(AtomicBool::new(true));
    let down = outage.clone();
    let backend = MockBackend::from_fn(move |req| {
        if req.prompt.contains("Third") && down.load(Ordering::SeqCst) {
            return Err(PipelineError::HttpError {
                status: 503,
                body: "unavailable".into(),
            });
        }
        if req.instructions.starts_with("Condense") {
            Ok(req.prompt.chars().take(120).collect())
        } else {
            Ok(format!("Brief ({} chars of input)", req.prompt.len()))
        }
    });

    let events = Arc::new(FnEventHandler(|event: Event| match event {
        Event::ItemStart { stage, index } => println!("[{}] item {}", stage, index),
        Event::Reduced { before, after, cycles } => {
            println!("  condensed {} -> {} in {} cycle(s)", before, after, cycles)
        }
        Event::Paced { tier, tokens } => println!("  {} tokens at {} tier", tokens, tier),
        _ => {}
    }));

    let router = Router::new(Arc::new(backend), Arc::new(NoPacing), budget, RouterMode::TwoTier)?
        .with_events(events.clone());
    let stage = RoutedStage::new(
        "briefs",
        Arc::new(router),
        "You brief court opinions.",
        "Brief the following case:\n{query}",
    );

    let items = WorkItem::sequence([
        "First opinion. ".repeat(10),
        "Second opinion, very long. ".repeat(120),
        "Third opinion. ".repeat(10),
        "Fourth opinion. ".repeat(10),
    ]);

    let orchestrator = PipelineOrchestrator::new(Arc::new(MemoryStore::new())).with_events(events);

    match orchestrator.run(&stage, &items, 0).await {
        Err(PipelineError::StageItemFailure { index, source, .. }) => {
            println!("aborted at item {}: {}", index, source);
            outage.store(false, Ordering::SeqCst);
            let record = orchestrator.run(&stage, &items, index).await?;
            println!("resumed and completed with {} results:", record.len());
            for (i, result) in record.results.iter().enumerate() {
                println!("  {}: {}", i, result);
            }
        }
        Err(other) => return Err(other.into()),
        Ok(record) => println!("completed first time with {} results", record.len()),
    }

    Ok(())
}
