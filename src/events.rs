//! Messaging lifecycle events.
//!
//! The core emits an event at every call state transition, for every
//! discarded duplicate reply, for every scheduled retry and for every handler
//! registration. Subscribers get them over a broadcast channel; a bounded
//! buffer keeps the most recent ones for inspection.

use crate::a2a::CallState;
use crate::config::MessagingConfig;
use crate::errors::{ErrorCode, MessagingError};
use crate::types::{duration_millis, CorrelationId, HandlerKind, UniqueId};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::broadcast;

/// Unique event identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub UniqueId);

impl EventId {
    pub fn new() -> Self {
        Self(UniqueId::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EventId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "evt_{}", self.0)
    }
}

/// Event types emitted by the messaging core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum EventType {
    /// A call moved to a new state.
    CallStateChanged {
        target_type: String,
        kind: HandlerKind,
        state: CallState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error_code: Option<ErrorCode>,
    },

    /// A handler replied more than once; the extra reply was dropped.
    DuplicateReplyDiscarded { discarded_count: usize },

    /// A retryable unit failed and will run again.
    RetryScheduled {
        unit: String,
        attempt: u32,
        error_code: ErrorCode,
        error_message: String,
        #[serde(with = "duration_millis")]
        delay: Duration,
    },

    /// Handlers were registered for a target type.
    HandlerRegistered {
        target_type: String,
        kinds: Vec<HandlerKind>,
        replaced: bool,
    },
}

impl EventType {
    /// Snake-case name of the variant, as used by [`EventFilter`].
    pub fn name(&self) -> &'static str {
        match self {
            Self::CallStateChanged { .. } => "call_state_changed",
            Self::DuplicateReplyDiscarded { .. } => "duplicate_reply_discarded",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::HandlerRegistered { .. } => "handler_registered",
        }
    }
}

/// Event emitted by the messaging core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessagingEvent {
    /// Unique event ID.
    pub id: EventId,

    /// Event type and data.
    #[serde(flatten)]
    pub event_type: EventType,

    /// Timestamp.
    pub timestamp: DateTime<Utc>,

    /// Call this event belongs to (if any).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<CorrelationId>,
}

impl MessagingEvent {
    /// Create a new event.
    pub fn new(event_type: EventType) -> Self {
        Self {
            id: EventId::new(),
            event_type,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Attach the call's correlation id.
    pub fn for_call(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn call_state_changed(
        correlation_id: CorrelationId,
        target_type: &str,
        kind: HandlerKind,
        state: CallState,
        error: Option<&MessagingError>,
    ) -> Self {
        Self::new(EventType::CallStateChanged {
            target_type: target_type.to_string(),
            kind,
            state,
            error_code: error.map(|e| e.code),
        })
        .for_call(correlation_id)
    }

    pub fn duplicate_reply_discarded(correlation_id: CorrelationId, discarded_count: usize) -> Self {
        Self::new(EventType::DuplicateReplyDiscarded { discarded_count }).for_call(correlation_id)
    }

    pub fn retry_scheduled(
        unit: &str,
        attempt: u32,
        error: &MessagingError,
        delay: Duration,
    ) -> Self {
        Self::new(EventType::RetryScheduled {
            unit: unit.to_string(),
            attempt,
            error_code: error.code,
            error_message: error.message.clone(),
            delay,
        })
    }

    pub fn handler_registered(target_type: &str, kinds: Vec<HandlerKind>, replaced: bool) -> Self {
        Self::new(EventType::HandlerRegistered {
            target_type: target_type.to_string(),
            kinds,
            replaced,
        })
    }
}

/// Filter for selecting events.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Filter by call.
    pub correlation_id: Option<CorrelationId>,

    /// Filter by event type names.
    pub event_types: Option<Vec<String>>,
}

impl EventFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn for_call(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub fn of_type(mut self, name: impl Into<String>) -> Self {
        self.event_types.get_or_insert_with(Vec::new).push(name.into());
        self
    }

    /// Check if an event matches this filter.
    pub fn matches(&self, event: &MessagingEvent) -> bool {
        if let Some(id) = &self.correlation_id {
            if event.correlation_id.as_ref() != Some(id) {
                return false;
            }
        }

        if let Some(types) = &self.event_types {
            if !types.iter().any(|t| t == event.event_type.name()) {
                return false;
            }
        }

        true
    }
}

/// Event receiver (broadcast channel).
pub type EventReceiver = broadcast::Receiver<MessagingEvent>;

/// Event sender (broadcast channel).
pub type EventSender = broadcast::Sender<MessagingEvent>;

/// Broadcasts events and keeps the most recent ones.
#[derive(Debug)]
pub struct EventManager {
    sender: EventSender,
    recent: Mutex<VecDeque<MessagingEvent>>,
    max_recent: usize,
}

impl EventManager {
    /// Create a new event manager.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            recent: Mutex::new(VecDeque::new()),
            max_recent: capacity.max(1),
        }
    }

    /// Create an event manager sized by `config.event_buffer`.
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::new(config.event_buffer)
    }

    /// Emit an event.
    pub fn emit(&self, event: MessagingEvent) {
        {
            let mut recent = self.recent.lock();
            recent.push_back(event.clone());
            while recent.len() > self.max_recent {
                recent.pop_front();
            }
        }

        // No subscribers is fine
        let _ = self.sender.send(event);
    }

    /// Subscribe to events.
    pub fn subscribe(&self) -> EventReceiver {
        self.sender.subscribe()
    }

    /// Most recent events, newest first.
    pub fn recent(&self, limit: usize) -> Vec<MessagingEvent> {
        let recent = self.recent.lock();
        recent.iter().rev().take(limit).cloned().collect()
    }

    /// Buffered events matching `filter`, oldest first.
    pub fn matching(&self, filter: &EventFilter) -> Vec<MessagingEvent> {
        let recent = self.recent.lock();
        recent.iter().filter(|e| filter.matches(e)).cloned().collect()
    }
}

impl Default for EventManager {
    fn default() -> Self {
        Self::new(256)
    }
}
