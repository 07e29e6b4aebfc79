//! Recursive reduction of oversized text.
//!
//! [`reduce`] runs split, transform, recombine cycles until the text fits
//! the tier budget or the attempt ceiling is reached. Chunks are transformed
//! strictly in order, one at a time; a transform that calls the backend is
//! expected to pace itself before returning, so the next chunk is never
//! issued early.
//!
//! A text that already fits is returned untouched with zero transform calls.

use async_trait::async_trait;

use crate::chunker::{split, Chunk};
use crate::error::Result;
use crate::provenance::RequestRecord;
use crate::tokens::measure;
use crate::PipelineError;

/// Separator placed between transformed chunks when recombining.
pub const CONDENSE_SEPARATOR: &str = "\n";

/// Output of one chunk transform.
#[derive(Debug, Clone, Default)]
pub struct Transformed {
    pub text: String,
    /// Requests issued to produce `text`, if any.
    pub requests: Vec<RequestRecord>,
}

impl From<String> for Transformed {
    fn from(text: String) -> Self {
        Self {
            text,
            requests: Vec::new(),
        }
    }
}

/// Produces a shorter version of one chunk.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn transform(&self, chunk: &Chunk) -> Result<Transformed>;
}

/// A [`Transform`] backed by a synchronous closure.
///
/// # Example
///
/// ```
/// use restatement::reducer::FnTransform;
///
/// let first_line = FnTransform(|chunk: &restatement::chunker::Chunk| {
///     Ok(chunk.text.lines().next().unwrap_or_default().to_string())
/// });
/// # let _ = first_line;
/// ```
pub struct FnTransform<F>(pub F)
where
    F: Fn(&Chunk) -> Result<String> + Send + Sync;

#[async_trait]
impl<F> Transform for FnTransform<F>
where
    F: Fn(&Chunk) -> Result<String> + Send + Sync,
{
    async fn transform(&self, chunk: &Chunk) -> Result<Transformed> {
        (self.0)(chunk).map(Transformed::from)
    }
}

/// Parameters of one [`reduce`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReduceParams {
    /// Chunk size used for every cycle.
    pub chunk_size: usize,
    pub overlap: usize,
    /// The size the result must reach.
    pub budget: usize,
    /// Cycles allowed before failing with `ReductionExhausted`.
    pub max_attempts: u32,
}

/// Result of [`reduce`].
#[derive(Debug, Clone)]
pub struct Reduction {
    pub text: String,
    /// Number of condense cycles performed (0 when the input already fit).
    pub cycles: u32,
    pub requests: Vec<RequestRecord>,
}

/// One split, transform, recombine cycle.
pub async fn condense_once(
    text: &str,
    transform: &dyn Transform,
    chunk_size: usize,
    overlap: usize,
) -> Result<Transformed> {
    let chunks = split(text, chunk_size, overlap)?;
    let mut outputs = Vec::with_capacity(chunks.len());
    let mut requests = Vec::new();

    for chunk in &chunks {
        tracing::debug!(
            chunk = chunk.index,
            of = chunks.len(),
            size = chunk.size(),
            "condensing chunk"
        );
        let out = transform.transform(chunk).await?;
        outputs.push(out.text);
        requests.extend(out.requests);
    }

    Ok(Transformed {
        text: outputs.join(CONDENSE_SEPARATOR),
        requests,
    })
}

/// Shrink `text` until it measures at most `params.budget`.
///
/// Fails with [`PipelineError::ReductionExhausted`] when the text is still
/// over budget after `params.max_attempts` cycles. Transform errors are
/// returned as they are.
pub async fn reduce(text: &str, transform: &dyn Transform, params: ReduceParams) -> Result<Reduction> {
    let mut size = measure(text);
    if size <= params.budget {
        return Ok(Reduction {
            text: text.to_string(),
            cycles: 0,
            requests: Vec::new(),
        });
    }

    let mut current = text.to_string();
    let mut requests = Vec::new();
    for cycle in 1..=params.max_attempts {
        let before = size;
        let condensed = condense_once(&current, transform, params.chunk_size, params.overlap).await?;
        current = condensed.text;
        requests.extend(condensed.requests);
        size = measure(&current);

        tracing::debug!(cycle, before, after = size, budget = params.budget, "reduction cycle");
        if size <= params.budget {
            return Ok(Reduction {
                text: current,
                cycles: cycle,
                requests,
            });
        }
    }

    Err(PipelineError::ReductionExhausted {
        size,
        budget: params.budget,
        attempts: params.max_attempts,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn text_of_units(units: usize) -> String {
        (0..units * 4)
            .map(|i| char::from(b'a' + (i % 26) as u8))
            .collect()
    }

    fn params(budget: usize) -> ReduceParams {
        ReduceParams {
            chunk_size: 40,
            overlap: 5,
            budget,
            max_attempts: 3,
        }
    }

    fn counting<F>(calls: Arc<AtomicUsize>, f: F) -> FnTransform<impl Fn(&Chunk) -> Result<String> + Send + Sync>
    where
        F: Fn(&Chunk) -> String + Send + Sync,
    {
        FnTransform(move |chunk: &Chunk| {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(f(chunk))
        })
    }

    fn halve(chunk: &Chunk) -> String {
        let n = chunk.text.chars().count();
        chunk.text.chars().take(n / 2).collect()
    }

    #[tokio::test]
    async fn test_fitting_text_makes_no_calls() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transform = counting(calls.clone(), |c| c.text.clone());
        let text = text_of_units(100);

        let out = reduce(&text, &transform, params(100)).await.unwrap();
        assert_eq!(out.text, text);
        assert_eq!(out.cycles, 0);
        assert!(out.requests.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_one_cycle_when_condensed_output_fits() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transform = counting(calls.clone(), |c| c.text.chars().take(10).collect());

        let out = reduce(&text_of_units(130), &transform, params(100)).await.unwrap();
        assert_eq!(out.cycles, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(measure(&out.text) <= 100);
        assert_eq!(out.text.matches(CONDENSE_SEPARATOR).count(), 3);
    }

    #[tokio::test]
    async fn test_second_cycle_when_first_is_not_enough() {
        let calls = Arc::new(AtomicUsize::new(0));
        let transform = counting(calls.clone(), halve);

        let out = reduce(&text_of_units(130), &transform, params(50)).await.unwrap();
        assert_eq!(out.cycles, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 4 + 2);
        assert!(measure(&out.text) <= 50);
    }

    #[tokio::test]
    async fn test_exhausted_after_max_attempts() {
        let transform = FnTransform(|chunk: &Chunk| Ok(chunk.text.clone()));
        let err = reduce(&text_of_units(130), &transform, params(100))
            .await
            .unwrap_err();
        match err {
            PipelineError::ReductionExhausted { size, budget, attempts } => {
                assert!(size > 100);
                assert_eq!(budget, 100);
                assert_eq!(attempts, 3);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_transform_error_stops_reduction() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let transform = FnTransform(move |chunk: &Chunk| {
            seen.fetch_add(1, Ordering::SeqCst);
            if chunk.index == 1 {
                Err(PipelineError::Other("backend down".into()))
            } else {
                Ok(String::new())
            }
        });
        let err = reduce(&text_of_units(130), &transform, params(100))
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Other(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_chunks_are_transformed_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let log = order.clone();
        let transform = FnTransform(move |chunk: &Chunk| {
            log.lock().unwrap().push(chunk.index);
            Ok(format!("[{}]", chunk.index))
        });
        let out = condense_once(&text_of_units(130), &transform, 40, 5).await.unwrap();
        assert_eq!(out.text, "[0]\n[1]\n[2]\n[3]");
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3]);
    }
}
