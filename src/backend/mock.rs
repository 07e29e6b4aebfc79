//! Mock backend for testing without a live provider.
//!
//! [`MockBackend`] answers from canned replies, a script of results, or a
//! closure, and records every request it receives so tests can assert on
//! call counts, tiers and prompts.
//!
//! # Example
//!
//! ```
//! use restatement::backend::MockBackend;
//!
//! let mock = MockBackend::new(vec!["Hello, world!".to_string()]);
//! assert_eq!(mock.call_count(), 0);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use super::{Backend, LlmRequest, LlmResponse};
use crate::error::Result;
use crate::PipelineError;

type Responder = Box<dyn Fn(&LlmRequest) -> Result<String> + Send + Sync>;

enum Replies {
    Cycle {
        responses: Vec<String>,
        index: AtomicUsize,
    },
    Script(Mutex<VecDeque<Result<String>>>),
    Func(Responder),
}

/// A test backend with deterministic replies.
pub struct MockBackend {
    replies: Replies,
    usage: Option<usize>,
    seen: Mutex<Vec<LlmRequest>>,
}

impl std::fmt::Debug for MockBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockBackend")
            .field("usage", &self.usage)
            .field("calls", &self.call_count())
            .finish()
    }
}

impl MockBackend {
    fn with_replies(replies: Replies) -> Self {
        Self {
            replies,
            usage: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Create a mock that returns `responses` in order, cycling when exhausted.
    pub fn new(responses: Vec<String>) -> Self {
        assert!(!responses.is_empty(), "MockBackend requires at least one response");
        Self::with_replies(Replies::Cycle {
            responses,
            index: AtomicUsize::new(0),
        })
    }

    /// Create a mock that always returns the same response.
    pub fn fixed(response: impl Into<String>) -> Self {
        Self::new(vec![response.into()])
    }

    /// Create a mock that plays back `script` once, in order.
    ///
    /// Calls past the end of the script fail with [`PipelineError::Other`].
    pub fn scripted(script: Vec<Result<String>>) -> Self {
        Self::with_replies(Replies::Script(Mutex::new(script.into())))
    }

    /// Create a mock that computes each reply from the request.
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&LlmRequest) -> Result<String> + Send + Sync + 'static,
    {
        Self::with_replies(Replies::Func(Box::new(f)))
    }

    /// Report a fixed token usage on every reply. Default: no usage reported.
    pub fn with_usage(mut self, tokens: usize) -> Self {
        self.usage = Some(tokens);
        self
    }

    /// Number of requests received so far.
    pub fn call_count(&self) -> usize {
        self.seen.lock().map(|s| s.len()).unwrap_or(0)
    }

    /// Copies of every request received so far, in order.
    pub fn requests(&self) -> Vec<LlmRequest> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }

    fn next_reply(&self, request: &LlmRequest) -> Result<String> {
        match &self.replies {
            Replies::Cycle { responses, index } => {
                let idx = index.fetch_add(1, Ordering::Relaxed) % responses.len();
                Ok(responses[idx].clone())
            }
            Replies::Script(script) => script
                .lock()
                .map_err(|_| PipelineError::Other("MockBackend script lock poisoned".into()))?
                .pop_front()
                .unwrap_or_else(|| Err(PipelineError::Other("MockBackend script exhausted".into()))),
            Replies::Func(f) => f(request),
        }
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(request.clone());
        }
        let text = self.next_reply(request)?;
        Ok(LlmResponse {
            text,
            tokens_consumed: self.usage,
            metadata: None,
        })
    }

    fn name(&self) -> &'static str {
        "mock"
    }
}
