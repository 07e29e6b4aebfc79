//! Backend trait and normalized request/response types.
//!
//! The [`Backend`] trait abstracts over generation providers, translating
//! a normalized [`LlmRequest`] into the provider's API and the reply into
//! an [`LlmResponse`]. Built-in implementations: [`OpenAiBackend`] and, for
//! tests and offline runs, [`MockBackend`].
//!
//! ## Architecture
//!
//! ```text
//! Router ──► LlmRequest ──► Backend::generate() ──► LlmResponse
//!                                  │
//!                       ┌──────────┴──────────┐
//!                 OpenAiBackend           MockBackend
//!             /v1/chat/completions      scripted replies
//! ```
//!
//! A provider quota refusal surfaces as
//! [`PipelineError::RateLimitExceeded`](crate::PipelineError::RateLimitExceeded),
//! distinct from every other failure. What happens next is decided by a
//! [`RateLimitPolicy`]; see [`generate_with_policy`].

pub mod mock;
pub mod openai;
pub mod rate_limit;

pub use mock::MockBackend;
pub use openai::OpenAiBackend;
pub use rate_limit::{GiveUp, RateLimitDecision, RateLimitPolicy, WaitRetryAfter};

use crate::error::Result;
use crate::PipelineError;
use async_trait::async_trait;

/// Sampling settings attached to every request.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationConfig {
    /// Temperature (0.0 = deterministic).
    pub temperature: f64,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: 4096,
        }
    }
}

/// A normalized, provider-agnostic generation request.
#[derive(Debug, Clone)]
pub struct LlmRequest {
    /// Model identifier (e.g. `"gpt-4"`).
    pub model: String,
    /// Fixed instructions, sent as the system message.
    pub instructions: String,
    /// Human framing with the query substituted in.
    pub prompt: String,
    pub config: GenerationConfig,
}

/// A normalized generation response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    /// The generated text.
    pub text: String,
    /// Tokens the provider reports for the call, if it reports usage.
    pub tokens_consumed: Option<usize>,
    /// Provider-specific metadata (usage, model, id), stored as raw JSON.
    pub metadata: Option<serde_json::Value>,
}

/// Abstraction over generation providers.
///
/// Implementations must return
/// [`PipelineError::RateLimitExceeded`] for quota refusals so callers can
/// tell them apart from fatal failures.
///
/// # Object Safety
///
/// This trait is object-safe and designed to be used as `Arc<dyn Backend>`.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Execute one generation call.
    async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse>;

    /// Human-readable name for logging and diagnostics.
    fn name(&self) -> &'static str;
}

/// Outcome of [`generate_with_policy`].
#[derive(Debug)]
pub struct PolicyOutcome {
    pub response: LlmResponse,
    /// How many times the request was re-issued after a rate-limit wait.
    pub waits: u32,
}

/// Issue `request`, consulting `policy` whenever the provider rate-limits it.
///
/// On [`RateLimitDecision::Wait`] the same request is re-issued after the
/// chosen delay; on [`RateLimitDecision::GiveUp`] the rate-limit error is
/// returned unchanged. Any other error is returned immediately.
pub async fn generate_with_policy(
    backend: &dyn Backend,
    request: &LlmRequest,
    policy: &dyn RateLimitPolicy,
) -> Result<PolicyOutcome> {
    let mut waits = 0u32;
    loop {
        match backend.generate(request).await {
            Ok(response) => return Ok(PolicyOutcome { response, waits }),
            Err(PipelineError::RateLimitExceeded { retry_after }) => {
                match policy.decide(waits + 1, retry_after) {
                    RateLimitDecision::Wait(delay) => {
                        waits += 1;
                        tracing::warn!(
                            backend = backend.name(),
                            model = %request.model,
                            attempt = waits,
                            delay_ms = delay.as_millis() as u64,
                            "rate limit reached; waiting before re-issuing the request"
                        );
                        tokio::time::sleep(delay).await;
                    }
                    RateLimitDecision::GiveUp => {
                        tracing::warn!(
                            backend = backend.name(),
                            model = %request.model,
                            "rate limit reached; giving up"
                        );
                        return Err(PipelineError::RateLimitExceeded { retry_after });
                    }
                }
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request() -> LlmRequest {
        LlmRequest {
            model: "test".into(),
            instructions: "sys".into(),
            prompt: "hello".into(),
            config: GenerationConfig::default(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_policy_wait_reissues_same_request() {
        let mock = MockBackend::scripted(vec![
            Err(PipelineError::RateLimitExceeded {
                retry_after: Some(Duration::from_secs(5)),
            }),
            Ok("done".into()),
        ]);
        let policy = WaitRetryAfter::new(2, Duration::from_secs(1));

        let outcome = generate_with_policy(&mock, &request(), &policy).await.unwrap();
        assert_eq!(outcome.response.text, "done");
        assert_eq!(outcome.waits, 1);
        let seen = mock.requests();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].prompt, seen[1].prompt);
    }

    #[tokio::test]
    async fn test_give_up_propagates_rate_limit() {
        let mock = MockBackend::scripted(vec![Err(PipelineError::RateLimitExceeded {
            retry_after: None,
        })]);
        let err = generate_with_policy(&mock, &request(), &GiveUp).await.unwrap_err();
        assert!(matches!(err, PipelineError::RateLimitExceeded { .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test]
    async fn test_other_errors_are_not_retried() {
        let mock = MockBackend::scripted(vec![Err(PipelineError::HttpError {
            status: 500,
            body: "boom".into(),
        })]);
        let policy = WaitRetryAfter::new(5, Duration::from_secs(1));
        let err = generate_with_policy(&mock, &request(), &policy).await.unwrap_err();
        assert!(matches!(err, PipelineError::HttpError { status: 500, .. }));
        assert_eq!(mock.call_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_budget_is_bounded() {
        let mock = MockBackend::scripted(vec![
            Err(PipelineError::RateLimitExceeded { retry_after: None }),
            Err(PipelineError::RateLimitExceeded { retry_after: None }),
            Err(PipelineError::RateLimitExceeded { retry_after: None }),
        ]);
        let policy = WaitRetryAfter::new(2, Duration::from_secs(1));
        let err = generate_with_policy(&mock, &request(), &policy).await.unwrap_err();
        assert!(matches!(err, PipelineError::RateLimitExceeded { .. }));
        assert_eq!(mock.call_count(), 3);
    }
}
