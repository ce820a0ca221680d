//! Typed lifecycle events and the subscriber registry.
//!
//! Every run publishes its progress as [`AgentEvent`]s through an
//! [`EventBus`]. Delivery is best-effort: a panicking subscriber is logged
//! and the remaining subscribers still run. Events from one run are
//! delivered in occurrence order because they are emitted inline on the
//! run's own execution context.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

/// Events emitted during a run.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
#[non_exhaustive]
pub enum AgentEvent {
    /// A run began.
    RunStarted {
        /// The agent id of the run.
        agent_id: String,
        /// The goal driving the run.
        goal: String,
    },

    /// A turn began.
    StepStarted {
        /// Zero-based turn index.
        turn_index: usize,
    },

    /// A turn finished.
    StepCompleted {
        /// Zero-based turn index.
        turn_index: usize,
        /// Whether the loop continues after this turn.
        continues: bool,
        /// Name of the tool executed this turn, if any.
        executed_tool: Option<String>,
    },

    /// A model request started.
    LlmCallStarted {
        /// Zero-based turn index.
        turn_index: usize,
    },

    /// A non-empty chunk arrived from the model stream.
    LlmChunkReceived {
        /// The chunk text.
        chunk: String,
    },

    /// A model request finished.
    LlmCallCompleted {
        /// Zero-based turn index.
        turn_index: usize,
        /// Whether a usable decision was produced.
        ok: bool,
        /// Error description when `ok` is false.
        error: Option<String>,
    },

    /// A tool invocation started.
    ToolCallStarted {
        /// Zero-based turn index.
        turn_index: usize,
        /// The tool name.
        tool: String,
    },

    /// A tool invocation finished.
    ToolCallCompleted {
        /// Zero-based turn index.
        turn_index: usize,
        /// The tool name.
        tool: String,
        /// Whether the invocation succeeded.
        success: bool,
        /// Invocation duration in milliseconds.
        duration_ms: u64,
        /// Error description when `success` is false.
        error: Option<String>,
    },

    /// Public status extracted from a decision.
    StatusUpdate {
        /// Zero-based turn index.
        turn_index: usize,
        /// Short public title.
        status_title: String,
        /// Optional longer detail line.
        status_details: Option<String>,
        /// Optional hint about the next step.
        next_step_hint: Option<String>,
        /// Optional progress in percent.
        progress_pct: Option<u8>,
    },

    /// A run reached a terminal outcome.
    RunCompleted {
        /// The agent id of the run.
        agent_id: String,
        /// Whether the run finished with a final answer.
        succeeded: bool,
        /// Number of turns taken.
        total_turns: usize,
        /// Error description when `succeeded` is false.
        error: Option<String>,
    },
}

impl AgentEvent {
    /// Returns `true` for the terminal event of a run.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::RunCompleted { .. })
    }
}

/// A subscriber receiving every event of every run on the bus.
pub trait EventSubscriber: Send + Sync {
    /// Called once per event, on the emitting run's execution context.
    /// Implementations that aggregate across runs must be thread-safe.
    fn on_event(&self, event: &AgentEvent);
}

impl<F> EventSubscriber for F
where
    F: Fn(&AgentEvent) + Send + Sync,
{
    fn on_event(&self, event: &AgentEvent) {
        self(event);
    }
}

/// Handle returned by [`EventBus::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Fan-out registry for [`AgentEvent`]s.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<(u64, Arc<dyn EventSubscriber>)>>,
    next_id: AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscriber.
    pub fn subscribe(&self, subscriber: Arc<dyn EventSubscriber>) -> SubscriptionId {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.push((id, subscriber));
        }
        SubscriptionId(id)
    }

    /// Register a closure subscriber.
    pub fn subscribe_fn<F>(&self, f: F) -> SubscriptionId
    where
        F: Fn(&AgentEvent) + Send + Sync + 'static,
    {
        self.subscribe(Arc::new(f))
    }

    /// Register a channel-backed subscriber and return the receiving end.
    ///
    /// Dropping the receiver is enough to stop delivery; sends to a closed
    /// channel are silently skipped.
    pub fn subscribe_channel(&self) -> (SubscriptionId, mpsc::UnboundedReceiver<AgentEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = self.subscribe(Arc::new(ChannelSubscriber { tx }));
        (id, rx)
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Ok(mut subscribers) = self.subscribers.write() {
            subscribers.retain(|(sub_id, _)| *sub_id != id.0);
        }
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().map_or(0, |s| s.len())
    }

    /// Deliver an event to every subscriber, isolating panics.
    pub fn emit(&self, event: &AgentEvent) {
        let snapshot: Vec<Arc<dyn EventSubscriber>> = match self.subscribers.read() {
            Ok(subscribers) => subscribers.iter().map(|(_, s)| Arc::clone(s)).collect(),
            Err(_) => return,
        };
        for subscriber in snapshot {
            if catch_unwind(AssertUnwindSafe(|| subscriber.on_event(event))).is_err() {
                warn!(event = ?event, "event subscriber panicked; continuing");
            }
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<AgentEvent>,
}

impl EventSubscriber for ChannelSubscriber {
    fn on_event(&self, event: &AgentEvent) {
        // A closed receiver just means the consumer went away.
        let _ = self.tx.send(event.clone());
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collector() -> (Arc<Mutex<Vec<String>>>, impl Fn(&AgentEvent) + Send + Sync) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let f = move |event: &AgentEvent| {
            if let AgentEvent::StepStarted { turn_index } = event {
                sink.lock().unwrap().push(format!("step {turn_index}"));
            }
        };
        (seen, f)
    }

    #[test]
    fn delivers_in_order() {
        let bus = EventBus::new();
        let (seen, f) = collector();
        bus.subscribe_fn(f);

        for turn_index in 0..3 {
            bus.emit(&AgentEvent::StepStarted { turn_index });
        }

        assert_eq!(
            *seen.lock().unwrap(),
            vec!["step 0", "step 1", "step 2"]
        );
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let (seen, f) = collector();
        let id = bus.subscribe_fn(f);
        bus.emit(&AgentEvent::StepStarted { turn_index: 0 });
        bus.unsubscribe(id);
        bus.emit(&AgentEvent::StepStarted { turn_index: 1 });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[test]
    fn panicking_subscriber_does_not_block_others() {
        let bus = EventBus::new();
        bus.subscribe_fn(|_| panic!("bad subscriber"));
        let (seen, f) = collector();
        bus.subscribe_fn(f);

        bus.emit(&AgentEvent::StepStarted { turn_index: 0 });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn channel_subscriber_receives_events() {
        let bus = EventBus::new();
        let (_id, mut rx) = bus.subscribe_channel();
        bus.emit(&AgentEvent::RunStarted {
            agent_id: "a".into(),
            goal: "g".into(),
        });
        let event = rx.recv().await.unwrap();
        assert!(matches!(event, AgentEvent::RunStarted { .. }));
    }

    #[test]
    fn dropped_channel_receiver_is_harmless() {
        let bus = EventBus::new();
        let (_id, rx) = bus.subscribe_channel();
        drop(rx);
        bus.emit(&AgentEvent::StepStarted { turn_index: 0 });
    }

    #[test]
    fn terminal_event() {
        let event = AgentEvent::RunCompleted {
            agent_id: "a".into(),
            succeeded: true,
            total_turns: 2,
            error: None,
        };
        assert!(event.is_terminal());
        assert!(!AgentEvent::StepStarted { turn_index: 0 }.is_terminal());
    }
}
