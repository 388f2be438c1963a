//! Orchestration substrate interfaces.
//!
//! The durable-execution engine (replay, persistence, worker polling) lives
//! outside this crate. These traits are the narrow surface the messaging core
//! consumes from it:
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │           ContextAwareDispatcher          │
//! └──────┬─────────────────────────┬─────────┘
//!        │ InDurableUnit           │ Neither
//!        ▼                         ▼
//! OrchestrationSubstrate     SubstrateClient
//! (retryable unit primitive) (out-of-process RPC)
//! ```
//!
//! [`LocalSubstrate`] is an in-process stand-in that runs units on the
//! current task with the crate's retry loop. It keeps nothing durable.

use crate::envelope::{A2aRequest, A2aResponse};
use crate::context::ExecutionContext;
use crate::errors::MessagingResult;
use crate::events::{EventManager, MessagingEvent};
use crate::retry::{execute_with_retry, RetryPolicy};
use crate::types::HandlerKind;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Future produced by one attempt of a retryable unit.
pub type UnitFuture = BoxFuture<'static, MessagingResult<serde_json::Value>>;

/// A unit of non-deterministic work the substrate may run several times.
///
/// Results cross the substrate boundary as JSON, the same shape a real
/// engine records in its history.
pub type RetryableUnit = Arc<dyn Fn() -> UnitFuture + Send + Sync>;

/// The durable-execution engine, as seen by the messaging core.
#[async_trait]
pub trait OrchestrationSubstrate: Send + Sync {
    /// Where the current call site runs.
    fn current_execution_context(&self) -> ExecutionContext;

    /// Run `unit` as a retryable unit under `policy`.
    ///
    /// Only callable from a durable unit. The substrate owns retries,
    /// per-attempt timeouts and cancellation of the unit.
    async fn execute_retryable_unit(
        &self,
        name: &str,
        unit: RetryableUnit,
        policy: &RetryPolicy,
    ) -> MessagingResult<serde_json::Value>;
}

/// Out-of-process client, used when the caller runs outside the substrate.
#[async_trait]
pub trait SubstrateClient: Send + Sync {
    /// Deliver an A2A request to `target_type` and wait for its reply.
    async fn send_a2a(
        &self,
        target_type: &str,
        kind: HandlerKind,
        request: A2aRequest,
    ) -> MessagingResult<A2aResponse>;
}

/// In-process substrate for tests and local runs.
pub struct LocalSubstrate {
    context: ExecutionContext,
    events: Option<Arc<EventManager>>,
    units_started: AtomicU64,
    attempts: AtomicU64,
}

impl LocalSubstrate {
    /// Create a substrate that reports `context` as the current context.
    pub fn new(context: ExecutionContext) -> Self {
        Self {
            context,
            events: None,
            units_started: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
        }
    }

    /// A substrate whose callers run inside a durable unit.
    pub fn durable() -> Self {
        Self::new(ExecutionContext::InDurableUnit)
    }

    /// Emit retry events to `events`.
    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    /// Number of retryable units started so far.
    pub fn units_started(&self) -> u64 {
        self.units_started.load(Ordering::SeqCst)
    }

    /// Number of attempts made across all units.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OrchestrationSubstrate for LocalSubstrate {
    fn current_execution_context(&self) -> ExecutionContext {
        self.context
    }

    async fn execute_retryable_unit(
        &self,
        name: &str,
        unit: RetryableUnit,
        policy: &RetryPolicy,
    ) -> MessagingResult<serde_json::Value> {
        self.units_started.fetch_add(1, Ordering::SeqCst);
        debug!(unit = name, "Starting retryable unit");

        execute_with_retry(
            name,
            policy,
            |_| {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                (*unit)()
            },
            |attempt, error, delay| {
                if let Some(events) = &self.events {
                    events.emit(MessagingEvent::retry_scheduled(name, attempt, error, delay));
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{ErrorCode, MessagingError};
    use std::time::Duration;

    #[tokio::test]
    async fn test_local_substrate_runs_unit() {
        let substrate = LocalSubstrate::durable();
        let unit: RetryableUnit =
            Arc::new(|| -> UnitFuture { Box::pin(async { Ok(serde_json::json!("done")) }) });

        let out = substrate
            .execute_retryable_unit("unit", unit, &RetryPolicy::default())
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!("done"));
        assert_eq!(substrate.units_started(), 1);
        assert_eq!(substrate.attempts(), 1);
    }

    #[tokio::test]
    async fn test_local_substrate_emits_retry_events() {
        let events = Arc::new(EventManager::new(16));
        let substrate = LocalSubstrate::durable().with_events(events.clone());
        let unit: RetryableUnit =
            Arc::new(|| -> UnitFuture { Box::pin(async { Err(MessagingError::transient("down")) }) });
        let policy = RetryPolicy::default()
            .with_maximum_attempts(2)
            .with_initial_interval(Duration::from_millis(1));

        let err = substrate
            .execute_retryable_unit("unit", unit, &policy)
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::RetriesExhausted);
        assert_eq!(substrate.attempts(), 2);
        assert_eq!(events.recent(10).len(), 1);
    }
}
