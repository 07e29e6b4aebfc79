//! Event system for stage and routing lifecycle hooks.
//!
//! Provides an optional, non-intrusive way to observe a run. The stage
//! runner emits events as items start and finish; the router emits them
//! when it reduces a query and when it paces after a dispatch. Implement
//! [`EventHandler`] to receive them for progress bars or audit logs.

use crate::types::Tier;
use std::sync::Arc;

/// Events emitted while a stage runs.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// An item is about to be processed.
    ItemStart {
        stage: String,
        index: usize,
    },
    /// An item finished, successfully or not.
    ItemEnd {
        stage: String,
        index: usize,
        ok: bool,
    },
    /// The router condensed an oversized query.
    Reduced {
        /// Envelope size before reduction.
        before: usize,
        /// Envelope size after reduction.
        after: usize,
        /// Condense cycles spent.
        cycles: u32,
    },
    /// The router paced after a dispatch.
    Paced {
        tier: Tier,
        tokens: usize,
    },
    /// A stage stopped, either completed or aborted.
    StageFinished {
        stage: String,
        /// Entries on record when the stage stopped.
        entries: usize,
        completed: bool,
    },
}

/// Handler for lifecycle events.
///
/// This is entirely optional -- stages and routers work without one.
///
/// # Example
///
/// ```
/// use restatement::events::{Event, EventHandler};
///
/// struct PrintHandler;
///
/// impl EventHandler for PrintHandler {
///     fn on_event(&self, event: Event) {
///         match event {
///             Event::ItemStart { stage, index } => println!("[{}] item {}", stage, index),
///             Event::StageFinished { stage, completed, .. } => {
///                 println!("[{}] done={}", stage, completed)
///             }
///             _ => {} // ItemEnd, Reduced, Paced
///         }
///     }
/// }
/// ```
pub trait EventHandler: Send + Sync {
    /// Called for every emitted event.
    fn on_event(&self, event: Event);
}

/// Emit an event if a handler is present. No-op otherwise.
pub(crate) fn emit(handler: &Option<Arc<dyn EventHandler>>, event: Event) {
    if let Some(ref h) = handler {
        h.on_event(event);
    }
}

/// An [`EventHandler`] backed by a closure.
///
/// # Example
///
/// ```
/// use restatement::events::{Event, FnEventHandler};
/// use std::sync::Arc;
///
/// let handler = Arc::new(FnEventHandler(|event: Event| {
///     if let Event::Paced { tier, tokens } = event {
///         println!("{} tokens at {} tier", tokens, tier);
///     }
/// }));
/// # let _ = handler;
/// ```
pub struct FnEventHandler<F: Fn(Event) + Send + Sync>(pub F);

impl<F: Fn(Event) + Send + Sync> EventHandler for FnEventHandler<F> {
    fn on_event(&self, event: Event) {
        (self.0)(event);
    }
}

/// Collects every event, for tests and post-run summaries.
#[derive(Debug, Default)]
pub struct EventLog {
    events: std::sync::Mutex<Vec<Event>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl EventHandler for EventLog {
    fn on_event(&self, event: Event) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_without_handler_is_noop() {
        emit(&None, Event::Paced { tier: Tier::Cheap, tokens: 1 });
    }

    #[test]
    fn test_event_log_collects_in_order() {
        let log = Arc::new(EventLog::new());
        let handler: Option<Arc<dyn EventHandler>> = Some(log.clone());
        emit(&handler, Event::ItemStart { stage: "briefs".into(), index: 0 });
        emit(&handler, Event::ItemEnd { stage: "briefs".into(), index: 0, ok: true });

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::ItemStart { index: 0, .. }));
        assert!(matches!(events[1], Event::ItemEnd { ok: true, .. }));
    }

    #[test]
    fn test_fn_handler() {
        let count = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = count.clone();
        let handler = FnEventHandler(move |_event: Event| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });
        handler.on_event(Event::Paced { tier: Tier::Expensive, tokens: 10 });
        assert_eq!(count.load(std::sync::atomic::Ordering::SeqCst), 1);
    }
}
