//! One-shot reply capture.
//!
//! A [`ResponseCapture`] is the slot a handler's reply lands in when the
//! handler is invoked synchronously by another unit of work. The first write
//! wins; any later write on the same capture is dropped, logged at `warn`,
//! counted, and reported as a `DuplicateReplyDiscarded` event.

use crate::events::{EventManager, MessagingEvent};
use crate::types::CorrelationId;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

/// The reply a handler wrote.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapturedReply {
    pub text: String,
    pub data: serde_json::Value,
}

/// Write-once reply slot for one request.
#[derive(Debug)]
pub struct ResponseCapture {
    correlation_id: CorrelationId,
    reply: OnceCell<CapturedReply>,
    discarded: AtomicUsize,
    events: Option<Arc<EventManager>>,
}

impl ResponseCapture {
    pub fn new(correlation_id: CorrelationId) -> Self {
        Self {
            correlation_id,
            reply: OnceCell::new(),
            discarded: AtomicUsize::new(0),
            events: None,
        }
    }

    /// Report discarded duplicates to `events`.
    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.correlation_id
    }

    /// Store the reply if none has been stored yet.
    ///
    /// Returns `false` when the write was discarded because a reply already
    /// exists. Discarding is not an error.
    pub fn write_reply(&self, text: impl Into<String>, data: serde_json::Value) -> bool {
        let reply = CapturedReply {
            text: text.into(),
            data,
        };

        match self.reply.set(reply) {
            Ok(()) => {
                debug!(correlation_id = %self.correlation_id, "Reply captured");
                true
            }
            Err(_) => {
                let discarded = self.discarded.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    correlation_id = %self.correlation_id,
                    discarded,
                    "Duplicate reply discarded; a response was already captured"
                );
                if let Some(events) = &self.events {
                    events.emit(MessagingEvent::duplicate_reply_discarded(
                        self.correlation_id,
                        discarded,
                    ));
                }
                false
            }
        }
    }

    pub fn has_response(&self) -> bool {
        self.reply.initialized()
    }

    /// The captured reply, if any.
    pub fn reply(&self) -> Option<&CapturedReply> {
        self.reply.get()
    }

    /// How many writes were dropped after the first.
    pub fn discarded_replies(&self) -> usize {
        self.discarded.load(Ordering::SeqCst)
    }
}
