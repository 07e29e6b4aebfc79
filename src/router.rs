//! Tier routing with reduction and pacing.
//!
//! [`Router::route`] measures a [`RequestEnvelope`], condenses its query
//! while the envelope is over the upper tier's ceiling, picks the cheapest
//! tier that holds the result, and dispatches. Every dispatch, including
//! the ones spent condensing chunks, is paced through the shared
//! [`Scheduler`] before control returns, and recorded as provenance.
//!
//! ```text
//! envelope ──► size > upper ceiling? ──yes──► reduce(query) ──┐
//!                    │ no                                     │
//!                    ▼                                        ▼
//!             select_tier(size) ◄─────────────────────────────┘
//!                    │
//!                    ▼
//!     Backend::generate ──► Scheduler::pace ──► Routed
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::backend::{generate_with_policy, Backend, GenerationConfig, GiveUp, LlmRequest, RateLimitPolicy};
use crate::chunker::Chunk;
use crate::config::Budget;
use crate::envelope::RequestEnvelope;
use crate::error::Result;
use crate::events::{emit, Event, EventHandler};
use crate::provenance::{Purpose, RequestRecord};
use crate::reducer::{reduce, ReduceParams, Transform, Transformed};
use crate::scheduler::Scheduler;
use crate::tokens::measure;
use crate::types::Tier;
use crate::PipelineError;

/// Which tiers a router may dispatch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RouterMode {
    /// Cheap tier only. Anything larger is reduced to fit it.
    SingleTier,
    /// Cheap tier when the request fits, expensive tier otherwise.
    #[default]
    TwoTier,
}

impl RouterMode {
    /// The largest tier available in this mode.
    pub fn upper_tier(self) -> Tier {
        match self {
            RouterMode::SingleTier => Tier::Cheap,
            RouterMode::TwoTier => Tier::Expensive,
        }
    }
}

/// Result of one [`Router::route`] call.
#[derive(Debug, Clone)]
pub struct Routed {
    pub output: String,
    /// Tokens charged for the final dispatch.
    pub tokens: usize,
    pub tier: Tier,
    /// Condense cycles spent before dispatch.
    pub reduction_cycles: u32,
    /// Every request issued by this call, in order. The last one produced `output`.
    pub requests: Vec<RequestRecord>,
}

/// Sizes, reduces and dispatches requests.
pub struct Router {
    backend: Arc<dyn Backend>,
    scheduler: Arc<dyn Scheduler>,
    budget: Budget,
    mode: RouterMode,
    policy: Arc<dyn RateLimitPolicy>,
    events: Option<Arc<dyn EventHandler>>,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("backend", &self.backend.name())
            .field("mode", &self.mode)
            .field("budget", &self.budget)
            .field("has_events", &self.events.is_some())
            .finish()
    }
}

impl Router {
    /// Create a router. The budget is validated here.
    pub fn new(
        backend: Arc<dyn Backend>,
        scheduler: Arc<dyn Scheduler>,
        budget: Budget,
        mode: RouterMode,
    ) -> Result<Self> {
        budget.validate()?;
        Ok(Self {
            backend,
            scheduler,
            budget,
            mode,
            policy: Arc::new(GiveUp),
            events: None,
        })
    }

    /// Set the rate-limit policy. Default: [`GiveUp`].
    pub fn with_policy(mut self, policy: Arc<dyn RateLimitPolicy>) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_events(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.events = Some(handler);
        self
    }

    /// A router sharing this one's backend, scheduler, policy and events
    /// under a new budget. Used to reconfigure between stages.
    pub fn reconfigure(&self, budget: Budget) -> Result<Self> {
        budget.validate()?;
        Ok(Self {
            backend: Arc::clone(&self.backend),
            scheduler: Arc::clone(&self.scheduler),
            budget,
            mode: self.mode,
            policy: Arc::clone(&self.policy),
            events: self.events.clone(),
        })
    }

    pub fn budget(&self) -> &Budget {
        &self.budget
    }

    pub fn mode(&self) -> RouterMode {
        self.mode
    }

    /// The cheapest available tier whose ceiling holds `size`.
    pub fn select_tier(&self, size: usize) -> Option<Tier> {
        if size <= self.budget.cheap.max_tokens {
            Some(Tier::Cheap)
        } else if self.mode == RouterMode::TwoTier && size <= self.budget.expensive.max_tokens {
            Some(Tier::Expensive)
        } else {
            None
        }
    }

    /// Route `envelope` to the backend, condensing its query with
    /// `condense_instructions` if it is over the upper tier's ceiling.
    ///
    /// Condense chunks are sized so that each condense request, chunk plus
    /// `condense_instructions`, also fits the upper ceiling.
    ///
    /// Fails with [`PipelineError::ReductionExhausted`] when the envelope
    /// cannot be brought under the ceiling within `max_attempts` cycles, or
    /// immediately when the fixed parts alone exceed it or the condense
    /// instructions leave no room for a chunk.
    pub async fn route(&self, envelope: &RequestEnvelope, condense_instructions: &str) -> Result<Routed> {
        let upper = self.mode.upper_tier();
        let upper_budget = self.budget.tier(upper);
        let ceiling = upper_budget.max_tokens;

        let mut envelope = envelope.clone();
        let mut requests = Vec::new();
        let mut cycles = 0;
        let size = envelope.size();

        if size > ceiling {
            let fixed = envelope.fixed_size();
            if fixed >= ceiling {
                return Err(PipelineError::ReductionExhausted {
                    size,
                    budget: ceiling,
                    attempts: 0,
                });
            }

            // A condense request carries one chunk plus the condense
            // instructions, and must itself fit the ceiling.
            let chunk_size = upper_budget
                .chunk_size
                .min(ceiling.saturating_sub(measure(condense_instructions)));
            if chunk_size == 0 {
                return Err(PipelineError::ReductionExhausted {
                    size,
                    budget: ceiling,
                    attempts: 0,
                });
            }

            tracing::info!(size, ceiling, chunk_size, tier = %upper, "request over ceiling; condensing query");
            let transform = CondenseTransform {
                router: self,
                instructions: condense_instructions,
            };
            let params = ReduceParams {
                chunk_size,
                overlap: upper_budget.chunk_overlap.min(chunk_size - 1),
                budget: ceiling - fixed,
                max_attempts: self.budget.max_attempts,
            };
            let reduction = reduce(envelope.query(), &transform, params)
                .await
                .map_err(|e| match e {
                    PipelineError::ReductionExhausted { size, attempts, .. } => {
                        PipelineError::ReductionExhausted {
                            size: size + fixed,
                            budget: ceiling,
                            attempts,
                        }
                    }
                    other => other,
                })?;

            envelope = envelope.with_query(reduction.text);
            cycles = reduction.cycles;
            requests.extend(reduction.requests);
            emit(
                &self.events,
                Event::Reduced {
                    before: size,
                    after: envelope.size(),
                    cycles,
                },
            );
        }

        let size = envelope.size();
        let tier = self.select_tier(size).ok_or(PipelineError::ReductionExhausted {
            size,
            budget: ceiling,
            attempts: cycles,
        })?;

        let (output, record) = self.dispatch(&envelope, tier, Purpose::Generate).await?;
        let tokens = record.tokens;
        requests.push(record);

        Ok(Routed {
            output,
            tokens,
            tier,
            reduction_cycles: cycles,
            requests,
        })
    }

    /// Issue one request at `tier`, pace, and record it.
    async fn dispatch(
        &self,
        envelope: &RequestEnvelope,
        tier: Tier,
        purpose: Purpose,
    ) -> Result<(String, RequestRecord)> {
        let tier_budget = self.budget.tier(tier);
        let request = LlmRequest {
            model: tier_budget.model.clone(),
            instructions: envelope.instructions().to_string(),
            prompt: envelope.render_prompt(),
            config: GenerationConfig {
                temperature: self.budget.temperature,
                max_tokens: self.budget.max_output_tokens,
            },
        };

        let outcome = generate_with_policy(self.backend.as_ref(), &request, self.policy.as_ref()).await?;
        let text = outcome.response.text;
        let tokens = outcome
            .response
            .tokens_consumed
            .unwrap_or_else(|| envelope.size() + measure(&text));

        tracing::debug!(
            ?purpose,
            %tier,
            model = %tier_budget.model,
            tokens,
            "dispatched request"
        );
        self.scheduler.pace(tokens, tier).await;
        emit(&self.events, Event::Paced { tier, tokens });

        let record = RequestRecord {
            purpose,
            tier,
            model: tier_budget.model.clone(),
            tokens,
            prompt: envelope.transcript(),
            rate_limit_waits: outcome.waits,
        };
        Ok((text, record))
    }
}

/// Condenses one chunk through the router's backend.
struct CondenseTransform<'a> {
    router: &'a Router,
    instructions: &'a str,
}

#[async_trait]
impl<'a> Transform for CondenseTransform<'a> {
    async fn transform(&self, chunk: &Chunk) -> Result<Transformed> {
        let envelope = RequestEnvelope::new(self.instructions, "", chunk.text.as_str());
        let size = envelope.size();
        let tier = self
            .router
            .select_tier(size)
            .ok_or(PipelineError::ReductionExhausted {
                size,
                budget: self.router.budget.tier(self.router.mode.upper_tier()).max_tokens,
                attempts: 0,
            })?;
        let (text, record) = self.router.dispatch(&envelope, tier, Purpose::Condense).await?;
        Ok(Transformed {
            text,
            requests: vec![record],
        })
    }
}
