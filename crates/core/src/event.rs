//! Event bus: process-local publish/subscribe for lifecycle and domain events.
//!
//! Two ways to listen:
//!
//! - **Topic handlers** registered with [`EventBus::subscribe`] are called
//!   synchronously, in registration order, from inside [`EventBus::publish`].
//!   A handler that returns an error (or panics) is isolated: delivery
//!   continues with the next subscriber and the failure is re-published on
//!   the [`topics::ERROR`] topic.
//! - **The broadcast tap** ([`EventBus::stream`]) hands every envelope to
//!   async observers through a `tokio::sync::broadcast` channel.
//!
//! Nothing is durable. Events published while nobody listens are dropped.
//!
//! # Lifecycle
//!
//! A bus is constructed explicitly (usually once, when the swarm coordinator
//! starts) and shared by `Arc` with every tier. It lives until the last
//! `Arc` is dropped at process shutdown. There is no global instance.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{debug, warn};
use uuid::Uuid;

/// Well-known topics.
pub mod topics {
    pub const ERROR: &str = "error";

    pub const SWARM_STARTED: &str = "swarm.started";
    pub const SWARM_STATE_UPDATED: &str = "swarm.state_updated";
    pub const SWARM_ENDED: &str = "swarm.ended";

    pub const ROUTINE_STARTED: &str = "routine.started";
    pub const ROUTINE_COMPLETED: &str = "routine.completed";
    pub const ROUTINE_FAILED: &str = "routine.failed";
    pub const ROUTINE_CANCELLED: &str = "routine.cancelled";

    pub const STEP_STARTED: &str = "step.started";
    pub const STEP_RETRYING: &str = "step.retrying";
    pub const STEP_FINISHED: &str = "step.finished";

    pub const CHAT_MESSAGE: &str = "chat.message";
    pub const TOOL_EXECUTED: &str = "tool.executed";
}

/// An immutable published event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub id: String,
    pub topic: String,
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
    /// Who published it (component or swarm id).
    pub source: String,
}

/// Typed domain events. Each maps to one topic; the serialized variant is
/// the envelope payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DomainEvent {
    SwarmStarted {
        swarm_id: String,
        goal: String,
        agents: usize,
        recruitment_required: bool,
    },
    SwarmStateUpdated {
        swarm_id: String,
        version: u64,
        updated_by: String,
        keys: Vec<String>,
        subtasks: Vec<String>,
    },
    SwarmEnded {
        swarm_id: String,
        reason: String,
        credits_spent: u64,
        errors: usize,
    },
    RoutineStarted {
        swarm_id: String,
        run_id: String,
        routine_id: String,
        subtasks: usize,
    },
    RoutineCompleted {
        swarm_id: String,
        run_id: String,
        routine_id: String,
        credits: u64,
    },
    RoutineFailed {
        swarm_id: String,
        run_id: String,
        routine_id: String,
        failed: Vec<String>,
        blocked: Vec<String>,
    },
    RoutineCancelled {
        swarm_id: String,
        run_id: String,
        routine_id: String,
    },
    StepStarted {
        run_id: String,
        subroutine_id: String,
        strategy: String,
        attempt: u32,
    },
    StepRetrying {
        run_id: String,
        subroutine_id: String,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    StepFinished {
        run_id: String,
        subroutine_id: String,
        state: String,
        attempts: u32,
        credits: u64,
    },
    ChatMessage {
        swarm_id: String,
        agent_id: String,
        content_preview: String,
    },
    ToolExecuted {
        tool_name: String,
        agent_id: String,
        success: bool,
        duration_ms: u64,
    },
}

impl DomainEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            Self::SwarmStarted { .. } => topics::SWARM_STARTED,
            Self::SwarmStateUpdated { .. } => topics::SWARM_STATE_UPDATED,
            Self::SwarmEnded { .. } => topics::SWARM_ENDED,
            Self::RoutineStarted { .. } => topics::ROUTINE_STARTED,
            Self::RoutineCompleted { .. } => topics::ROUTINE_COMPLETED,
            Self::RoutineFailed { .. } => topics::ROUTINE_FAILED,
            Self::RoutineCancelled { .. } => topics::ROUTINE_CANCELLED,
            Self::StepStarted { .. } => topics::STEP_STARTED,
            Self::StepRetrying { .. } => topics::STEP_RETRYING,
            Self::StepFinished { .. } => topics::STEP_FINISHED,
            Self::ChatMessage { .. } => topics::CHAT_MESSAGE,
            Self::ToolExecuted { .. } => topics::TOOL_EXECUTED,
        }
    }
}

/// Returned by [`EventBus::subscribe`]; pass to [`EventBus::unsubscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

type Handler = Arc<dyn Fn(&EventEnvelope) -> Result<(), String> + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum TopicPattern {
    All,
    Exact(String),
    /// `swarm.*` matches `swarm.started`, `swarm.ended`, ...
    Prefix(String),
}

impl TopicPattern {
    fn parse(pattern: &str) -> Self {
        if pattern == "*" {
            Self::All
        } else if let Some(prefix) = pattern.strip_suffix(".*") {
            Self::Prefix(format!("{prefix}."))
        } else {
            Self::Exact(pattern.to_string())
        }
    }

    fn matches(&self, topic: &str) -> bool {
        match self {
            Self::All => true,
            Self::Exact(t) => t == topic,
            Self::Prefix(p) => topic.starts_with(p.as_str()),
        }
    }
}

struct Subscriber {
    token: SubscriptionToken,
    pattern: TopicPattern,
    handler: Handler,
}

/// The publish/subscribe bus.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    next_token: AtomicU64,
    tap: broadcast::Sender<Arc<EventEnvelope>>,
}

impl EventBus {
    /// Create a new event bus; `capacity` bounds the broadcast tap.
    pub fn new(capacity: usize) -> Self {
        let (tap, _) = broadcast::channel(capacity.max(1));
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_token: AtomicU64::new(1),
            tap,
        }
    }

    /// Register a handler for a topic pattern (`"routine.completed"`,
    /// `"swarm.*"` or `"*"`).
    pub fn subscribe<F>(&self, pattern: &str, handler: F) -> SubscriptionToken
    where
        F: Fn(&EventEnvelope) -> Result<(), String> + Send + Sync + 'static,
    {
        let token = SubscriptionToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().unwrap().push(Subscriber {
            token,
            pattern: TopicPattern::parse(pattern),
            handler: Arc::new(handler),
        });
        debug!(pattern, token = token.0, "Event subscriber registered");
        token
    }

    /// Remove exactly one handler. Returns `false` if the token was unknown.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        let mut subs = self.subscribers.write().unwrap();
        let before = subs.len();
        subs.retain(|s| s.token != token);
        subs.len() < before
    }

    /// Publish a raw payload on a topic.
    pub fn publish(
        &self,
        topic: &str,
        payload: serde_json::Value,
        source: &str,
    ) -> Arc<EventEnvelope> {
        let envelope = Arc::new(EventEnvelope {
            id: Uuid::new_v4().to_string(),
            topic: topic.to_string(),
            payload,
            timestamp: Utc::now(),
            source: source.to_string(),
        });
        self.deliver(&envelope);
        // No tap receivers is fine.
        let _ = self.tap.send(envelope.clone());
        envelope
    }

    /// Publish a typed domain event on its topic.
    pub fn emit(&self, source: &str, event: DomainEvent) -> Arc<EventEnvelope> {
        let payload = serde_json::to_value(&event).unwrap_or(serde_json::Value::Null);
        self.publish(event.topic(), payload, source)
    }

    /// Receive every envelope published after this call.
    pub fn stream(&self) -> broadcast::Receiver<Arc<EventEnvelope>> {
        self.tap.subscribe()
    }

    /// Number of registered topic handlers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().unwrap().len()
    }

    fn deliver(&self, envelope: &EventEnvelope) {
        // Snapshot first so handlers may (un)subscribe without deadlocking.
        let targets: Vec<(SubscriptionToken, Handler)> = self
            .subscribers
            .read()
            .unwrap()
            .iter()
            .filter(|s| s.pattern.matches(&envelope.topic))
            .map(|s| (s.token, s.handler.clone()))
            .collect();

        for (token, handler) in targets {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(envelope)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e,
                Err(panic) => panic_message(panic.as_ref()),
            };

            warn!(
                topic = %envelope.topic,
                token = token.0,
                error = %failure,
                "Event handler failed"
            );

            // Failures while delivering error events are only logged.
            if envelope.topic != topics::ERROR {
                self.publish(
                    topics::ERROR,
                    serde_json::json!({
                        "failed_topic": envelope.topic,
                        "event_id": envelope.id,
                        "subscription": token.0,
                        "error": failure,
                    }),
                    "event_bus",
                );
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".into()
    }
}
