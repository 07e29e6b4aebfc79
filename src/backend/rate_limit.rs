//! Operator-directed recovery from provider rate limits.
//!
//! A rate-limit refusal is recoverable, but waiting is a decision, not a
//! reflex: a [`RateLimitPolicy`] chooses per occurrence whether to wait
//! and re-issue the same request or to give up. Built-in policies never
//! wait an unbounded number of times.

use std::time::Duration;

/// What to do about one rate-limit refusal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateLimitDecision {
    /// Sleep for the duration, then re-issue the same request.
    Wait(Duration),
    /// Propagate the rate-limit error to the caller.
    GiveUp,
}

/// Decides how to react to a rate-limit refusal.
///
/// `attempt` is 1 for the first refusal of a request, 2 for the second,
/// and so on. `retry_after` is the provider's hint, if any.
pub trait RateLimitPolicy: Send + Sync {
    fn decide(&self, attempt: u32, retry_after: Option<Duration>) -> RateLimitDecision;
}

/// Never wait. The default: the operator reruns the stage when ready.
#[derive(Debug, Clone, Copy, Default)]
pub struct GiveUp;

impl RateLimitPolicy for GiveUp {
    fn decide(&self, _attempt: u32, _retry_after: Option<Duration>) -> RateLimitDecision {
        RateLimitDecision::GiveUp
    }
}

/// Wait as the provider asks (or `fallback` without a hint), at most `max_waits` times.
///
/// # Example
///
/// ```
/// use restatement::backend::{RateLimitDecision, RateLimitPolicy, WaitRetryAfter};
/// use std::time::Duration;
///
/// let policy = WaitRetryAfter::new(1, Duration::from_secs(20));
/// assert_eq!(policy.decide(1, None), RateLimitDecision::Wait(Duration::from_secs(20)));
/// assert_eq!(policy.decide(2, None), RateLimitDecision::GiveUp);
/// ```
#[derive(Debug, Clone)]
pub struct WaitRetryAfter {
    pub max_waits: u32,
    pub fallback: Duration,
    /// Longest wait accepted from a `Retry-After` hint.
    pub max_delay: Duration,
}

impl WaitRetryAfter {
    pub fn new(max_waits: u32, fallback: Duration) -> Self {
        Self {
            max_waits,
            fallback,
            max_delay: Duration::from_secs(600),
        }
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl RateLimitPolicy for WaitRetryAfter {
    fn decide(&self, attempt: u32, retry_after: Option<Duration>) -> RateLimitDecision {
        if attempt > self.max_waits {
            return RateLimitDecision::GiveUp;
        }
        let delay = retry_after.unwrap_or(self.fallback).min(self.max_delay);
        RateLimitDecision::Wait(delay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_give_up_always() {
        assert_eq!(GiveUp.decide(1, Some(Duration::from_secs(1))), RateLimitDecision::GiveUp);
    }

    #[test]
    fn test_wait_prefers_provider_hint() {
        let policy = WaitRetryAfter::new(3, Duration::from_secs(10));
        assert_eq!(
            policy.decide(1, Some(Duration::from_secs(30))),
            RateLimitDecision::Wait(Duration::from_secs(30))
        );
        assert_eq!(
            policy.decide(2, None),
            RateLimitDecision::Wait(Duration::from_secs(10))
        );
    }

    #[test]
    fn test_wait_hint_capped() {
        let policy =
            WaitRetryAfter::new(1, Duration::from_secs(10)).with_max_delay(Duration::from_secs(60));
        assert_eq!(
            policy.decide(1, Some(Duration::from_secs(3600))),
            RateLimitDecision::Wait(Duration::from_secs(60))
        );
    }

    #[test]
    fn test_wait_bounded_by_max_waits() {
        let policy = WaitRetryAfter::new(2, Duration::from_secs(1));
        assert!(matches!(policy.decide(2, None), RateLimitDecision::Wait(_)));
        assert_eq!(policy.decide(3, None), RateLimitDecision::GiveUp);
    }

    #[test]
    fn test_zero_waits_never_waits() {
        let policy = WaitRetryAfter::new(0, Duration::from_secs(1));
        assert_eq!(policy.decide(1, None), RateLimitDecision::GiveUp);
    }
}
