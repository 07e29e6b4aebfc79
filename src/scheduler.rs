//! Pacing consecutive backend calls against a per-tier token-rate quota.
//!
//! After every dispatch the caller awaits [`Scheduler::pace`], which delays
//! for `tokens / tokens_per_minute` minutes. This is a computed sleep, not a
//! token bucket: there is no burst credit, and the delay applies even when
//! only one call is outstanding.
//!
//! One scheduler is shared by handle (`Arc<dyn Scheduler>`) across every
//! component of a session, so swapping in a synchronized bucket later does
//! not touch call sites.

use crate::config::Budget;
use crate::types::Tier;
use async_trait::async_trait;
use std::sync::Mutex;
use std::time::Duration;

/// Applies backpressure after a backend call.
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Wait long enough that `tokens` spent at `tier` stay within the tier quota.
    async fn pace(&self, tokens: usize, tier: Tier);
}

/// Counters kept by [`QuotaScheduler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaceStats {
    pub calls: u64,
    pub tokens: u64,
    pub total_delay: Duration,
}

/// Sleeps `tokens * 60 / tokens_per_minute` seconds per call.
#[derive(Debug)]
pub struct QuotaScheduler {
    cheap_tpm: u64,
    expensive_tpm: u64,
    stats: Mutex<PaceStats>,
}

impl QuotaScheduler {
    pub fn new(budget: &Budget) -> Self {
        Self {
            cheap_tpm: budget.cheap.tokens_per_minute,
            expensive_tpm: budget.expensive.tokens_per_minute,
            stats: Mutex::new(PaceStats::default()),
        }
    }

    fn quota(&self, tier: Tier) -> u64 {
        match tier {
            Tier::Cheap => self.cheap_tpm,
            Tier::Expensive => self.expensive_tpm,
        }
    }

    /// The delay owed for `tokens` at `tier`. Zero when the quota is unset.
    pub fn delay_for(&self, tokens: usize, tier: Tier) -> Duration {
        let tpm = self.quota(tier);
        if tpm == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(tokens as f64 * 60.0 / tpm as f64)
    }

    pub fn stats(&self) -> PaceStats {
        self.stats.lock().map(|s| *s).unwrap_or_default()
    }
}

#[async_trait]
impl Scheduler for QuotaScheduler {
    async fn pace(&self, tokens: usize, tier: Tier) {
        let delay = self.delay_for(tokens, tier);
        if let Ok(mut stats) = self.stats.lock() {
            stats.calls += 1;
            stats.tokens += tokens as u64;
            stats.total_delay += delay;
        }
        tracing::debug!(
            %tier,
            tokens,
            delay_ms = delay.as_millis() as u64,
            "pacing before next request"
        );
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

/// A scheduler that never waits. For tests and offline mock runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPacing;

#[async_trait]
impl Scheduler for NoPacing {
    async fn pace(&self, _tokens: usize, _tier: Tier) {}
}
