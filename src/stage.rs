//! Per-item stage tasks.
//!
//! A stage turns an ordered list of [`WorkItem`]s into an ordered list of
//! outputs. [`StageTask`] is the work done for one item; the
//! [`PipelineOrchestrator`](crate::pipeline::PipelineOrchestrator) drives it over the list.
//!
//! [`RoutedStage`] is the standard task: it optionally assembles retrieved
//! context, builds a [`RequestEnvelope`] from the item, and routes it.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::context::{ContextAssembler, Retriever};
use crate::envelope::RequestEnvelope;
use crate::error::Result;
use crate::provenance::RequestRecord;
use crate::router::Router;
use crate::types::WorkItem;

/// A boxed, pinned, Send future -- the return type of [`StageTask::run`].
pub type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Output for one work item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemOutput {
    pub text: String,
    /// Requests issued while producing `text`.
    #[serde(default)]
    pub requests: Vec<RequestRecord>,
}

impl ItemOutput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            requests: Vec::new(),
        }
    }
}

/// Object-safe trait for the work done per item.
pub trait StageTask: Send + Sync {
    /// Stable identifier for the task type (e.g. `"routed"`).
    fn kind(&self) -> &'static str;

    /// Stage name; also the checkpoint key.
    fn name(&self) -> &str;

    /// Process one item.
    fn run<'a>(&'a self, item: &'a WorkItem) -> BoxFut<'a, Result<ItemOutput>>;
}

/// Where a [`RoutedStage`] gets supporting documents.
pub struct ContextSource {
    pub retriever: Arc<dyn Retriever>,
    pub assembler: ContextAssembler,
}

impl ContextSource {
    pub fn new(retriever: Arc<dyn Retriever>, assembler: ContextAssembler) -> Self {
        Self { retriever, assembler }
    }
}

/// Routes each item through the [`Router`] with fixed instructions and framing.
///
/// The framing may hold `{query}` for the item text and `{context}` for
/// retrieved documents; see [`RequestEnvelope::render_prompt`].
pub struct RoutedStage {
    name: String,
    router: Arc<Router>,
    instructions: String,
    framing: String,
    condense_instructions: String,
    context: Option<ContextSource>,
}

/// Used when no condense instructions are given.
pub const DEFAULT_CONDENSE_INSTRUCTIONS: &str =
    "Condense the following text. Keep every holding, rule and citation; drop repetition.";

impl RoutedStage {
    pub fn new(
        name: impl Into<String>,
        router: Arc<Router>,
        instructions: impl Into<String>,
        framing: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            router,
            instructions: instructions.into(),
            framing: framing.into(),
            condense_instructions: DEFAULT_CONDENSE_INSTRUCTIONS.to_string(),
            context: None,
        }
    }

    pub fn with_condense_instructions(mut self, instructions: impl Into<String>) -> Self {
        self.condense_instructions = instructions.into();
        self
    }

    pub fn with_context(mut self, source: ContextSource) -> Self {
        self.context = Some(source);
        self
    }

    /// Retrieved documents for `item`, joined; empty without a context source.
    async fn context_for(&self, item: &WorkItem) -> String {
        let Some(source) = &self.context else {
            return String::new();
        };
        source
            .assembler
            .assemble(
                &item.text,
                source.retriever.as_ref(),
                &[self.instructions.as_str(), self.framing.as_str(), item.text.as_str()],
            )
            .await
            .joined()
    }
}

impl StageTask for RoutedStage {
    fn kind(&self) -> &'static str {
        "routed"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, item: &'a WorkItem) -> BoxFut<'a, Result<ItemOutput>> {
        async move {
            let context = self.context_for(item).await;
            let envelope = RequestEnvelope::new(self.instructions.as_str(), self.framing.as_str(), item.text.as_str())
                .with_context(context);
            let routed = self.router.route(&envelope, &self.condense_instructions).await?;
            tracing::debug!(
                stage = %self.name,
                index = item.index,
                tier = %routed.tier,
                requests = routed.requests.len(),
                "item routed"
            );
            Ok(ItemOutput {
                text: routed.output,
                requests: routed.requests,
            })
        }
        .boxed()
    }
}

/// A [`StageTask`] backed by a synchronous closure, for local transforms.
pub struct FnStage<F>
where
    F: Fn(&WorkItem) -> Result<String> + Send + Sync,
{
    name: String,
    f: F,
}

impl<F> FnStage<F>
where
    F: Fn(&WorkItem) -> Result<String> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> StageTask for FnStage<F>
where
    F: Fn(&WorkItem) -> Result<String> + Send + Sync,
{
    fn kind(&self) -> &'static str {
        "fn"
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn run<'a>(&'a self, item: &'a WorkItem) -> BoxFut<'a, Result<ItemOutput>> {
        let result = (self.f)(item).map(ItemOutput::text);
        async move { result }.boxed()
    }
}
