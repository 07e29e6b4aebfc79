//! Adaptive retrieval of supporting documents.
//!
//! [`ContextAssembler::assemble`] asks a [`Retriever`] for the `k` nearest
//! documents with `k = 1, 2, ...` and keeps the largest set that, together
//! with the fixed prompt fields, stays within the budget.
//!
//! Each fetch is a trial: the candidate set at `k` is measured before it is
//! adopted, and a candidate that would overflow the budget is discarded in
//! favour of the set accepted at `k - 1`. The only exception is the first
//! fetch, which is always returned even when one document alone is over
//! budget. Retrieval failures never propagate: the stage continues with no
//! supporting context.

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::tokens::{measure, measure_parts};
use crate::PipelineError;

/// Separator used when documents are joined into a prompt field.
pub const DOCUMENT_SEPARATOR: &str = "\n\n";

/// A retrieved supporting document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
}

impl Document {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

/// Join document contents the way they are placed into a prompt.
pub fn join_documents(documents: &[Document]) -> String {
    documents
        .iter()
        .map(|d| d.content.as_str())
        .collect::<Vec<_>>()
        .join(DOCUMENT_SEPARATOR)
}

/// A nearest-neighbour document store.
///
/// Implementations return at most `k` documents, nearest first on a
/// best-effort basis. An unavailable store should return
/// [`PipelineError::RetrievalUnavailable`] or an empty list.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>>;
}

/// A retriever over an in-memory corpus, ranked by shared-term overlap.
///
/// Useful for local runs and tests; ties keep corpus order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRetriever {
    documents: Vec<Document>,
}

impl InMemoryRetriever {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Load a JSON array of documents (`[{"id": "...", "content": "..."}]`).
    pub async fn from_json_file(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            PipelineError::RetrievalUnavailable(format!("{}: {}", path.display(), e))
        })?;
        let documents: Vec<Document> = serde_json::from_str(&raw)?;
        tracing::info!(path = %path.display(), documents = documents.len(), "loaded retrieval corpus");
        Ok(Self::new(documents))
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

fn terms(text: &str) -> std::collections::HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() > 2)
        .map(str::to_lowercase)
        .collect()
}

#[async_trait]
impl Retriever for InMemoryRetriever {
    async fn similarity_search(&self, query: &str, k: usize) -> Result<Vec<Document>> {
        let query_terms = terms(query);
        let mut scored: Vec<(usize, &Document)> = self
            .documents
            .iter()
            .map(|doc| {
                let overlap = terms(&doc.content).intersection(&query_terms).count();
                (overlap, doc)
            })
            .collect();
        // Stable sort keeps corpus order among equal scores.
        scored.sort_by(|a, b| b.0.cmp(&a.0));
        Ok(scored.into_iter().take(k).map(|(_, d)| d.clone()).collect())
    }
}

/// Why assembly stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The next candidate set would have exceeded the budget.
    BudgetReached,
    /// `k` reached `k_max`.
    KMax,
    /// The store returned no more documents than already accepted.
    Exhausted,
    /// The store failed; no context is returned.
    RetrievalFailed,
}

/// Output of [`ContextAssembler::assemble`].
#[derive(Debug, Clone)]
pub struct AssembledContext {
    pub documents: Vec<Document>,
    /// Fixed fields plus the joined documents.
    pub estimated_size: usize,
    /// Number of retrieval calls made.
    pub fetches: u32,
    pub stop: StopReason,
}

impl AssembledContext {
    /// The documents joined for insertion into a prompt.
    pub fn joined(&self) -> String {
        join_documents(&self.documents)
    }
}

/// Grows a retrieved document set up to a size budget or count ceiling.
#[derive(Debug, Clone, Copy)]
pub struct ContextAssembler {
    budget: usize,
    k_max: usize,
}

impl ContextAssembler {
    /// `k_max` below 1 is raised to 1: at least one fetch always happens.
    pub fn new(budget: usize, k_max: usize) -> Self {
        Self {
            budget,
            k_max: k_max.max(1),
        }
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    pub fn k_max(&self) -> usize {
        self.k_max
    }

    /// Assemble supporting documents for `query`.
    ///
    /// `fixed_fields` are the other prompt parts that share the budget.
    pub async fn assemble(
        &self,
        query: &str,
        retriever: &dyn Retriever,
        fixed_fields: &[&str],
    ) -> AssembledContext {
        let fixed = measure_parts(fixed_fields.iter().copied());
        let mut accepted: Vec<Document> = Vec::new();
        let mut fetches = 0u32;
        let mut k = 1;

        let stop = loop {
            fetches += 1;
            let mut candidates = match retriever.similarity_search(query, k).await {
                Ok(docs) => docs,
                Err(e) => {
                    tracing::warn!(k, error = %e, "retrieval failed; continuing without context");
                    accepted.clear();
                    break StopReason::RetrievalFailed;
                }
            };
            candidates.truncate(k);

            if candidates.len() <= accepted.len() || candidates.is_empty() {
                break StopReason::Exhausted;
            }

            let size = fixed + measure(&join_documents(&candidates));
            if size > self.budget {
                if accepted.is_empty() {
                    tracing::debug!(size, budget = self.budget, "first document alone exceeds budget");
                    accepted = candidates;
                }
                break StopReason::BudgetReached;
            }

            accepted = candidates;
            if k >= self.k_max {
                break StopReason::KMax;
            }
            k += 1;
        };

        let estimated_size = fixed + measure(&join_documents(&accepted));
        tracing::debug!(
            documents = accepted.len(),
            estimated_size,
            fetches,
            ?stop,
            "assembled context"
        );
        AssembledContext {
            documents: accepted,
            estimated_size,
            fetches,
            stop,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns the first `k` documents of a fixed corpus.
    struct Ordered {
        corpus: Vec<Document>,
        calls: AtomicUsize,
    }

    impl Ordered {
        fn new(corpus: Vec<Document>) -> Self {
            Self {
                corpus,
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl Retriever for Ordered {
        async fn similarity_search(&self, _query: &str, k: usize) -> Result<Vec<Document>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.corpus.iter().take(k).cloned().collect())
        }
    }

    struct Unavailable;

    #[async_trait]
    impl Retriever for Unavailable {
        async fn similarity_search(&self, _query: &str, _k: usize) -> Result<Vec<Document>> {
            Err(PipelineError::RetrievalUnavailable("index offline".into()))
        }
    }

    fn docs(n: usize, units: usize) -> Vec<Document> {
        (0..n)
            .map(|i| Document::new("x".repeat(units * 4)).with_id(format!("d{i}")))
            .collect()
    }

    #[tokio::test]
    async fn test_single_document_over_budget_is_returned() {
        let retriever = Ordered::new(docs(3, 50));
        let ctx = ContextAssembler::new(20, 5).assemble("q", &retriever, &[]).await;
        assert_eq!(ctx.documents.len(), 1);
        assert_eq!(ctx.stop, StopReason::BudgetReached);
        assert_eq!(ctx.fetches, 1);
        assert!(ctx.estimated_size > 20);
    }

    #[tokio::test]
    async fn test_k_max_reached_within_budget() {
        let retriever = Ordered::new(docs(5, 2));
        let ctx = ContextAssembler::new(1000, 3).assemble("q", &retriever, &["fixed"]).await;
        assert_eq!(ctx.documents.len(), 3);
        assert_eq!(ctx.stop, StopReason::KMax);
        assert_eq!(ctx.fetches, 3);
        assert!(ctx.estimated_size <= 1000);
    }

    #[tokio::test]
    async fn test_overflowing_candidate_is_discarded() {
        let retriever = Ordered::new(docs(5, 10));
        let fixed = "q".repeat(40);
        // fixed 10 + one doc 10 = 20; two docs with separator = 31; three = 41.
        let ctx = ContextAssembler::new(35, 8)
            .assemble("q", &retriever, &[fixed.as_str()])
            .await;
        assert_eq!(ctx.documents.len(), 2);
        assert_eq!(ctx.stop, StopReason::BudgetReached);
        assert_eq!(ctx.fetches, 3);
        assert_eq!(ctx.estimated_size, 31);
        assert_eq!(ctx.documents[1].id.as_deref(), Some("d1"));
    }

    #[tokio::test]
    async fn test_store_runs_out() {
        let retriever = Ordered::new(docs(2, 1));
        let ctx = ContextAssembler::new(1000, 5).assemble("q", &retriever, &[]).await;
        assert_eq!(ctx.documents.len(), 2);
        assert_eq!(ctx.stop, StopReason::Exhausted);
        assert_eq!(retriever.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_empty_store() {
        let retriever = Ordered::new(Vec::new());
        let ctx = ContextAssembler::new(1000, 5).assemble("q", &retriever, &[]).await;
        assert!(ctx.documents.is_empty());
        assert_eq!(ctx.stop, StopReason::Exhausted);
        assert_eq!(ctx.fetches, 1);
    }

    #[tokio::test]
    async fn test_failure_degrades_to_empty() {
        let ctx = ContextAssembler::new(1000, 5).assemble("q", &Unavailable, &["f"]).await;
        assert!(ctx.documents.is_empty());
        assert_eq!(ctx.stop, StopReason::RetrievalFailed);
        assert_eq!(ctx.joined(), "");
    }

    #[tokio::test]
    async fn test_k_max_zero_still_fetches_once() {
        let retriever = Ordered::new(docs(3, 1));
        let assembler = ContextAssembler::new(1000, 0);
        assert_eq!(assembler.k_max(), 1);
        let ctx = assembler.assemble("q", &retriever, &[]).await;
        assert_eq!(ctx.documents.len(), 1);
        assert_eq!(ctx.stop, StopReason::KMax);
    }

    #[tokio::test]
    async fn test_in_memory_ranks_by_overlap() {
        let retriever = InMemoryRetriever::new(vec![
            Document::new("Contract formation requires offer and acceptance.").with_id("contracts"),
            Document::new("Negligence requires duty, breach, causation and damages.").with_id("torts"),
            Document::new("Adverse possession of land.").with_id("property"),
        ]);
        let found = retriever
            .similarity_search("duty of care and breach in negligence", 2)
            .await
            .unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[0].id.as_deref(), Some("torts"));
    }

    #[tokio::test]
    async fn test_in_memory_loads_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docs.json");
        std::fs::write(&path, r#"[{"id": "a", "content": "alpha"}, {"content": "beta"}]"#).unwrap();
        let retriever = InMemoryRetriever::from_json_file(&path).await.unwrap();
        assert_eq!(retriever.len(), 2);

        let missing = InMemoryRetriever::from_json_file(&dir.path().join("nope.json")).await;
        assert!(matches!(missing, Err(PipelineError::RetrievalUnavailable(_))));
    }
}
