//! Context-aware dispatch.
//!
//! Every cross-unit operation in this crate comes in two flavours: a durable
//! path that runs as a retryable unit of the substrate, and a direct path
//! that performs the call right away. [`ContextAwareDispatcher`] asks the
//! classifier where the caller runs and runs exactly one of them:
//!
//! | Context           | Path                                   |
//! |-------------------|----------------------------------------|
//! | `InDurableUnit`   | durable, via `execute_retryable_unit`   |
//! | `InRetryableUnit` | direct, [`DirectRoute::InProcess`]      |
//! | `Neither`         | direct, [`DirectRoute::OutOfProcess`]   |
//!
//! A retryable unit never starts another retryable unit, and code outside the
//! substrate never touches durable primitives.

use crate::config::MessagingConfig;
use crate::context::{ExecutionContext, ExecutionContextClassifier, SubstrateClassifier};
use crate::errors::{ErrorCode, MessagingError, MessagingResult};
use crate::retry::RetryPolicy;
use crate::substrate::{OrchestrationSubstrate, RetryableUnit, SubstrateClient, UnitFuture};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// How the direct path reaches its target.
#[derive(Clone)]
pub enum DirectRoute {
    /// Already inside a retryable unit: call the target in this process.
    InProcess,

    /// Outside the substrate: go through the out-of-process client.
    OutOfProcess(Arc<dyn SubstrateClient>),
}

impl DirectRoute {
    pub fn is_in_process(&self) -> bool {
        matches!(self, Self::InProcess)
    }
}

impl std::fmt::Debug for DirectRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProcess => f.write_str("InProcess"),
            Self::OutOfProcess(_) => f.write_str("OutOfProcess"),
        }
    }
}

/// Per-call dispatch options.
#[derive(Debug, Clone, Default)]
pub struct DispatchOptions {
    /// Deadline for the direct path; per-attempt deadline on the durable path.
    pub timeout: Option<Duration>,

    /// Fires to abandon the direct path. The dispatcher cancels it itself
    /// when the direct deadline passes.
    pub cancellation: Option<CancellationToken>,

    /// Overrides the dispatcher's retry policy for this call.
    pub retry_policy: Option<RetryPolicy>,
}

impl DispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    /// The caller's token, or a fresh one nobody else holds.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone().unwrap_or_default()
    }
}

/// Routes each operation to its durable or direct path.
pub struct ContextAwareDispatcher {
    classifier: Arc<dyn ExecutionContextClassifier>,
    substrate: Option<Arc<dyn OrchestrationSubstrate>>,
    client: Option<Arc<dyn SubstrateClient>>,
    retry_policy: RetryPolicy,
    direct_timeout: Option<Duration>,
}

impl ContextAwareDispatcher {
    /// Create a dispatcher with no substrate and no client.
    pub fn new(classifier: Arc<dyn ExecutionContextClassifier>) -> Self {
        Self {
            classifier,
            substrate: None,
            client: None,
            retry_policy: RetryPolicy::default(),
            direct_timeout: None,
        }
    }

    /// Create a dispatcher that classifies through `substrate` and runs its
    /// durable paths there.
    pub fn for_substrate(substrate: Arc<dyn OrchestrationSubstrate>) -> Self {
        Self::new(Arc::new(SubstrateClassifier::new(substrate.clone()))).with_substrate(substrate)
    }

    pub fn with_substrate(mut self, substrate: Arc<dyn OrchestrationSubstrate>) -> Self {
        self.substrate = Some(substrate);
        self
    }

    pub fn with_client(mut self, client: Arc<dyn SubstrateClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    pub fn with_direct_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.direct_timeout = timeout;
        self
    }

    /// Apply the retry policy and direct timeout from `config`.
    pub fn with_config(self, config: &MessagingConfig) -> Self {
        self.with_retry_policy(config.retry_policy.clone())
            .with_direct_timeout(config.direct_timeout)
    }

    pub fn classify(&self) -> ExecutionContext {
        self.classifier.classify()
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    /// Run `operation` on the path the current context calls for.
    ///
    /// `durable` may run several times under the retry policy, so it is `Fn`
    /// and its result crosses the substrate boundary as JSON. `direct` runs at
    /// most once.
    pub async fn dispatch<T, D, DFut, P, PFut>(
        &self,
        operation: &str,
        durable: D,
        direct: P,
        options: DispatchOptions,
    ) -> MessagingResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        D: Fn() -> DFut + Send + Sync + 'static,
        DFut: Future<Output = MessagingResult<T>> + Send + 'static,
        P: FnOnce(DirectRoute) -> PFut,
        PFut: Future<Output = MessagingResult<T>>,
    {
        let context = self.classifier.classify();
        debug!(operation, %context, "Dispatching operation");

        match context {
            ExecutionContext::InDurableUnit => self.run_durable(operation, durable, &options).await,
            ExecutionContext::InRetryableUnit => {
                self.run_direct(operation, direct(DirectRoute::InProcess), &options)
                    .await
            }
            ExecutionContext::Neither => {
                let client = self.client.clone().ok_or_else(|| {
                    MessagingError::context_unavailable(format!(
                        "{} called outside the substrate but no out-of-process client is configured",
                        operation
                    ))
                    .with_context("operation", operation)
                })?;
                self.run_direct(operation, direct(DirectRoute::OutOfProcess(client)), &options)
                    .await
            }
        }
    }

    /// Like [`dispatch`](Self::dispatch), for operations whose direct path
    /// brings its own client (workflow signals, queries, schedules).
    ///
    /// Outside the substrate the direct path runs without requiring an
    /// out-of-process A2A client.
    pub async fn dispatch_client_call<T, D, DFut, P, PFut>(
        &self,
        operation: &str,
        durable: D,
        direct: P,
        options: DispatchOptions,
    ) -> MessagingResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        D: Fn() -> DFut + Send + Sync + 'static,
        DFut: Future<Output = MessagingResult<T>> + Send + 'static,
        P: FnOnce() -> PFut,
        PFut: Future<Output = MessagingResult<T>>,
    {
        let context = self.classifier.classify();
        debug!(operation, %context, "Dispatching client call");

        match context {
            ExecutionContext::InDurableUnit => self.run_durable(operation, durable, &options).await,
            ExecutionContext::InRetryableUnit | ExecutionContext::Neither => {
                self.run_direct(operation, direct(), &options).await
            }
        }
    }

    async fn run_durable<T, D, DFut>(
        &self,
        operation: &str,
        durable: D,
        options: &DispatchOptions,
    ) -> MessagingResult<T>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
        D: Fn() -> DFut + Send + Sync + 'static,
        DFut: Future<Output = MessagingResult<T>> + Send + 'static,
    {
        let substrate = self.substrate.as_ref().ok_or_else(|| {
            MessagingError::context_unavailable(format!(
                "{} called from a durable unit but no substrate is configured",
                operation
            ))
            .with_context("operation", operation)
        })?;

        let mut policy = options
            .retry_policy
            .clone()
            .unwrap_or_else(|| self.retry_policy.clone());
        if options.timeout.is_some() {
            policy = policy.with_start_to_close_timeout(options.timeout);
        }

        let unit: RetryableUnit = Arc::new(move || -> UnitFuture {
            let attempt = durable();
            Box::pin(async move {
                let value = attempt.await?;
                Ok(serde_json::to_value(value)?)
            })
        });

        let value = substrate
            .execute_retryable_unit(operation, unit, &policy)
            .await?;

        serde_json::from_value(value).map_err(|e| {
            MessagingError::new(
                ErrorCode::Serialization,
                format!("{} returned a result that does not match the expected type", operation),
            )
            .with_cause(e)
        })
    }

    async fn run_direct<T>(
        &self,
        operation: &str,
        call: impl Future<Output = MessagingResult<T>>,
        options: &DispatchOptions,
    ) -> MessagingResult<T> {
        let cancellation = options.cancellation_token();
        let timeout = options.timeout.or(self.direct_timeout);

        let bounded = async {
            match timeout {
                Some(limit) => match tokio::time::timeout(limit, call).await {
                    Ok(result) => result,
                    Err(_) => {
                        debug!(operation, ?limit, "Direct call timed out");
                        cancellation.cancel();
                        Err(MessagingError::timeout(operation, limit))
                    }
                },
                None => call.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => {
                debug!(operation, "Direct call cancelled");
                Err(MessagingError::cancelled(operation))
            }
            result = bounded => result,
        }
    }
}
