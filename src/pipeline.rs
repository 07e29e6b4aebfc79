use std::sync::Arc;

use crate::checkpoint::{CheckpointStore, StageRecord, StageState};
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::stage::StageTask;
use crate::types::WorkItem;
use crate::PipelineError;

/// Drives one stage over an ordered item list, checkpointing after every item.
///
/// Items are processed strictly in order. The first failing item aborts the
/// stage: completed entries stay on record, the state becomes
/// [`StageState::Aborted`], and the caller resumes by running again with
/// `start_index` set to the failed index.
///
/// # Example
///
/// ```
/// use restatement::checkpoint::{MemoryStore, StageState};
/// use restatement::pipeline::PipelineOrchestrator;
/// use restatement::stage::FnStage;
/// use restatement::types::WorkItem;
/// use std::sync::Arc;
///
/// # tokio_test::block_on(async {
/// let orchestrator = PipelineOrchestrator::new(Arc::new(MemoryStore::new()));
/// let stage = FnStage::new("shout", |item: &WorkItem| Ok(item.text.to_uppercase()));
/// let items = WorkItem::sequence(["a", "b"]);
///
/// let record = orchestrator.run(&stage, &items, 0).await.unwrap();
/// assert_eq!(record.results, vec!["A", "B"]);
/// assert_eq!(record.state, StageState::Completed);
/// # });
/// ```
pub struct PipelineOrchestrator {
    store: Arc<dyn CheckpointStore>,
    events: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("has_events", &self.events.is_some())
            .finish()
    }
}

impl PipelineOrchestrator {
    pub fn new(store: Arc<dyn CheckpointStore>) -> Self {
        Self { store, events: None }
    }

    pub fn with_events(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    /// The persisted record for `stage`, if any.
    pub async fn status(&self, stage: &str) -> Result<Option<StageRecord>> {
        self.store.load(stage).await
    }

    /// Run `task` over `items` starting at `start_index`.
    ///
    /// With `start_index == 0` any prior record for the stage is discarded.
    /// Otherwise entries `[0, start_index)` are kept from the persisted
    /// record, which must hold at least that many.
    pub async fn run(
        &self,
        task: &dyn StageTask,
        items: &[WorkItem],
        start_index: usize,
    ) -> Result<StageRecord> {
        let stage = task.name().to_string();
        let mut record = self.prepare(&stage, items.len(), start_index).await?;

        record.total_items = items.len();
        record.set_state(StageState::Running);
        self.store.save(&record).await?;

        tracing::info!(
            stage = %stage,
            kind = task.kind(),
            items = items.len(),
            start_index,
            "stage started"
        );

        for (index, item) in items.iter().enumerate().skip(start_index) {
            emit(&self.events, Event::ItemStart { stage: stage.clone(), index });

            match task.run(item).await {
                Ok(output) => {
                    record.push(output);
                    if let Err(e) = self.store.save(&record).await {
                        // The item is not durable, so it is redone on resume.
                        record.truncate(index);
                        emit(&self.events, Event::ItemEnd { stage: stage.clone(), index, ok: false });
                        return Err(self.abort(record, index, e).await);
                    }
                    emit(&self.events, Event::ItemEnd { stage: stage.clone(), index, ok: true });
                    tracing::info!(stage = %stage, index, of = items.len(), "item completed");
                }
                Err(e) => {
                    emit(&self.events, Event::ItemEnd { stage: stage.clone(), index, ok: false });
                    return Err(self.abort(record, index, e).await);
                }
            }
        }

        record.set_state(StageState::Completed);
        self.store.save(&record).await?;
        emit(
            &self.events,
            Event::StageFinished {
                stage: stage.clone(),
                entries: record.len(),
                completed: true,
            },
        );
        tracing::info!(stage = %stage, entries = record.len(), "stage completed");
        Ok(record)
    }

    async fn prepare(&self, stage: &str, items: usize, start_index: usize) -> Result<StageRecord> {
        if start_index == 0 {
            self.store.clear(stage).await?;
            return Ok(StageRecord::new(stage));
        }

        let record = self.store.load(stage).await?;
        let available = record.as_ref().map_or(0, StageRecord::len);
        let mut record = match record {
            Some(r) if start_index <= r.len() && start_index <= items => r,
            _ => {
                return Err(PipelineError::InvalidResume {
                    stage: stage.to_string(),
                    requested: start_index,
                    available: available.min(items),
                })
            }
        };
        record.truncate(start_index);
        tracing::info!(stage, start_index, "resuming from checkpoint");
        Ok(record)
    }

    async fn abort(&self, mut record: StageRecord, index: usize, error: PipelineError) -> PipelineError {
        let stage = record.stage.clone();
        tracing::error!(
            stage = %stage,
            index,
            error = %error,
            "item failed; stage aborted. Rerun with start_index = {} to resume",
            index
        );

        record.set_state(StageState::Aborted { failed_index: index });
        if let Err(save_err) = self.store.save(&record).await {
            tracing::warn!(stage = %stage, error = %save_err, "could not record aborted state");
        }
        emit(
            &self.events,
            Event::StageFinished {
                stage: stage.clone(),
                entries: record.len(),
                completed: false,
            },
        );

        PipelineError::StageItemFailure {
            stage,
            index,
            source: Box::new(error),
        }
    }
}
