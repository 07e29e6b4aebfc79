use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the budgeting core, the backends and the stage runner.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Input could not be brought under the tier ceiling within the attempt limit.
    ///
    /// Fatal: the stage runner aborts at the current item.
    #[error("Input still measures {size} tokens after {attempts} reduction attempt(s); ceiling is {budget}")]
    ReductionExhausted {
        /// Measured size after the last attempt.
        size: usize,
        /// The ceiling that had to be met.
        budget: usize,
        /// Number of reduction cycles performed.
        attempts: u32,
    },

    /// The backend refused the request because the provider quota is spent.
    ///
    /// Recoverable: the same request may be re-issued after waiting. Whether
    /// to wait is decided by a [`RateLimitPolicy`](crate::backend::RateLimitPolicy).
    #[error("Rate limit exceeded{}", .retry_after.map(|d| format!(" (retry after {}s)", d.as_secs())).unwrap_or_default())]
    RateLimitExceeded {
        /// Parsed `Retry-After` hint, if the provider sent one.
        retry_after: Option<Duration>,
    },

    /// The retrieval store could not answer. Callers degrade to empty context.
    #[error("Retrieval unavailable: {0}")]
    RetrievalUnavailable(String),

    /// Processing one work item failed; the stage aborted at `index`.
    #[error("Stage '{stage}' failed at item {index}: {source}")]
    StageItemFailure {
        stage: String,
        index: usize,
        #[source]
        source: Box<PipelineError>,
    },

    /// A prompt template file does not exist.
    #[error("Prompt template not found: {}", .path.display())]
    TemplateNotFound { path: PathBuf },

    /// Invalid configuration detected at build or load time.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// A resume index that the persisted record cannot satisfy.
    #[error("Cannot resume stage '{stage}' at index {requested}: only {available} completed item(s) on record")]
    InvalidResume {
        stage: String,
        requested: usize,
        available: usize,
    },

    /// Reading or writing a stage record failed.
    #[error("Checkpoint error: {0}")]
    Checkpoint(String),

    /// Non-success HTTP status other than 429.
    #[error("HTTP {status}: {body}")]
    HttpError { status: u16, body: String },

    /// Low-level HTTP transport failure (connection refused, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON (de)serialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(String),
}

impl PipelineError {
    /// Whether the caller may continue (after waiting, or with degraded input).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::RateLimitExceeded { .. } | PipelineError::RetrievalUnavailable(_)
        )
    }

    /// The innermost error, looking through [`PipelineError::StageItemFailure`].
    pub fn root(&self) -> &PipelineError {
        match self {
            PipelineError::StageItemFailure { source, .. } => source.root(),
            other => other,
        }
    }
}

impl From<anyhow::Error> for PipelineError {
    fn from(err: anyhow::Error) -> Self {
        PipelineError::Other(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recoverable_classification() {
        assert!(PipelineError::RateLimitExceeded { retry_after: None }.is_recoverable());
        assert!(PipelineError::RetrievalUnavailable("down".into()).is_recoverable());
        assert!(!PipelineError::ReductionExhausted {
            size: 10,
            budget: 5,
            attempts: 3
        }
        .is_recoverable());
        assert!(!PipelineError::Other("boom".into()).is_recoverable());
    }

    #[test]
    fn test_rate_limit_message_includes_hint() {
        let err = PipelineError::RateLimitExceeded {
            retry_after: Some(Duration::from_secs(30)),
        };
        assert_eq!(err.to_string(), "Rate limit exceeded (retry after 30s)");
        let bare = PipelineError::RateLimitExceeded { retry_after: None };
        assert_eq!(bare.to_string(), "Rate limit exceeded");
    }

    #[test]
    fn test_root_unwraps_item_failure() {
        let err = PipelineError::StageItemFailure {
            stage: "briefs".into(),
            index: 2,
            source: Box::new(PipelineError::ReductionExhausted {
                size: 120,
                budget: 100,
                attempts: 3,
            }),
        };
        assert!(matches!(err.root(), PipelineError::ReductionExhausted { .. }));
        assert!(err.to_string().contains("item 2"));
    }
}
