//! Agent-to-agent request/response.
//!
//! One call moves through
//!
//! ```text
//! Created ──► Dispatched ──► HandlerInvoked ──┬──► ResponseCaptured
//!                                              └──► Failed
//! ```
//!
//! and never leaves a terminal state. [`A2aClient`] is the caller side: it
//! builds the correlated request, lets the dispatcher pick a path and maps
//! the outcome. [`A2aService`] is the executor side shared by the durable
//! path and the in-process direct path: it resolves the handler, binds a
//! fresh [`ResponseCapture`] to a [`MessageContext`], awaits the handler and
//! converts the captured reply.

use crate::capture::ResponseCapture;
use crate::config::MessagingConfig;
use crate::dispatcher::{ContextAwareDispatcher, DirectRoute, DispatchOptions};
use crate::envelope::{A2aRequest, A2aRequestBuilder, A2aResponse, FilePayload, A2A_SCOPE};
use crate::errors::{ErrorCategory, ErrorCode, MessagingError, MessagingResult};
use crate::events::{EventManager, MessagingEvent};
use crate::message::MessageContext;
use crate::registry::HandlerRegistry;
use crate::types::{CorrelationId, HandlerKind};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, span, warn, Instrument, Level};

/// Lifecycle state of one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CallState {
    Created,
    Dispatched,
    HandlerInvoked,
    ResponseCaptured,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::ResponseCaptured | Self::Failed)
    }

    /// Whether `next` may follow this state.
    pub fn can_transition_to(&self, next: CallState) -> bool {
        use CallState::*;
        matches!(
            (self, next),
            (Created, Dispatched)
                | (Created, Failed)
                | (Dispatched, HandlerInvoked)
                | (Dispatched, Failed)
                | (HandlerInvoked, ResponseCaptured)
                | (HandlerInvoked, Failed)
        )
    }
}

impl std::fmt::Display for CallState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Dispatched => write!(f, "dispatched"),
            Self::HandlerInvoked => write!(f, "handler_invoked"),
            Self::ResponseCaptured => write!(f, "response_captured"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Result of a send that never returns `Err`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response: Option<A2aResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<ErrorCode>,
}

impl From<MessagingResult<A2aResponse>> for SendOutcome {
    fn from(result: MessagingResult<A2aResponse>) -> Self {
        match result {
            Ok(response) => Self {
                success: true,
                response: Some(response),
                error_message: None,
                error_code: None,
            },
            Err(error) => Self {
                success: false,
                response: None,
                error_message: Some(error.to_string()),
                error_code: Some(error.code),
            },
        }
    }
}

// ═══════════════════════════════════════════════════════════════════
// EXECUTOR SIDE
// ═══════════════════════════════════════════════════════════════════

/// Invokes registered handlers in this process.
#[derive(Clone)]
pub struct A2aService {
    registry: Arc<HandlerRegistry>,
    events: Option<Arc<EventManager>>,
}

impl A2aService {
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn registry(&self) -> &Arc<HandlerRegistry> {
        &self.registry
    }

    pub fn events(&self) -> Option<&Arc<EventManager>> {
        self.events.as_ref()
    }

    /// Run the `kind` handler of `target_type` on `request` and return its
    /// single reply.
    ///
    /// The handler is resolved before anything else happens, so a missing
    /// handler fails without side effects. Terminal call states are reported
    /// by the caller, not here.
    pub async fn invoke(
        &self,
        target_type: &str,
        kind: HandlerKind,
        request: A2aRequest,
        cancellation: CancellationToken,
    ) -> MessagingResult<A2aResponse> {
        let correlation_id = request.correlation_id;
        let invoke_span = span!(
            Level::DEBUG,
            "a2a_invoke",
            correlation_id = %correlation_id,
            target_type,
            kind = %kind
        );

        async move {
            let handler = self.registry.resolve(target_type, kind)?;
            request.validate_for(kind)?;

            let mut capture = ResponseCapture::new(correlation_id);
            if let Some(events) = &self.events {
                capture = capture.with_events(events.clone());
            }
            let capture = Arc::new(capture);
            let ctx = MessageContext::new(
                target_type,
                kind,
                Arc::new(request),
                capture.clone(),
                cancellation,
            );

            self.emit(correlation_id, target_type, kind, CallState::HandlerInvoked, None);
            debug!("Invoking handler");

            if let Err(error) = handler.handle(ctx).await {
                return Err(map_handler_error(target_type, kind, error));
            }

            match capture.reply() {
                Some(reply) => A2aResponse::from_reply(correlation_id, reply.clone()),
                None => Err(MessagingError::no_response(target_type, kind)
                    .with_context("correlation_id", correlation_id)),
            }
        }
        .instrument(invoke_span)
        .await
    }

    fn emit(
        &self,
        correlation_id: CorrelationId,
        target_type: &str,
        kind: HandlerKind,
        state: CallState,
        error: Option<&MessagingError>,
    ) {
        if let Some(events) = &self.events {
            events.emit(MessagingEvent::call_state_changed(
                correlation_id,
                target_type,
                kind,
                state,
                error,
            ));
        }
    }
}

/// Infra failures raised inside a handler stay retryable; anything else the
/// handler raises is reported as a handler failure.
fn map_handler_error(target_type: &str, kind: HandlerKind, error: MessagingError) -> MessagingError {
    if error.category() == ErrorCategory::TransientInfra {
        return error;
    }
    MessagingError::handler_failed(format!(
        "{} handler for '{}' failed: {}",
        kind, target_type, error.message
    ))
    .with_cause(&error)
    .with_context("target_type", target_type)
    .with_context("kind", kind)
    .with_context("handler_error_code", error.code)
}

// ═══════════════════════════════════════════════════════════════════
// CALLER SIDE
// ═══════════════════════════════════════════════════════════════════

/// Sends A2A requests on behalf of one source.
#[derive(Clone)]
pub struct A2aClient {
    dispatcher: Arc<ContextAwareDispatcher>,
    service: A2aService,
    source_id: String,
    source_type: String,
    tenant_id: String,
    default_scope: String,
}

impl A2aClient {
    pub fn new(
        dispatcher: Arc<ContextAwareDispatcher>,
        service: A2aService,
        source_id: impl Into<String>,
        source_type: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            dispatcher,
            service,
            source_id: source_id.into(),
            source_type: source_type.into(),
            tenant_id: tenant_id.into(),
            default_scope: A2A_SCOPE.to_string(),
        }
    }

    /// Apply the default scope from `config`.
    pub fn with_config(self, config: &MessagingConfig) -> Self {
        self.with_default_scope(config.default_scope.clone())
    }

    /// Scope applied to requests that do not set one.
    pub fn with_default_scope(mut self, scope: impl Into<String>) -> Self {
        self.default_scope = scope.into();
        self
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Start a request from this client's source identity.
    pub fn request(&self) -> A2aRequestBuilder {
        A2aRequest::builder(
            self.source_id.clone(),
            self.source_type.clone(),
            self.tenant_id.clone(),
        )
    }

    /// Build `request` and send it to the `kind` handler of `target_type`.
    pub async fn send(
        &self,
        target_type: &str,
        kind: HandlerKind,
        request: A2aRequestBuilder,
        options: DispatchOptions,
    ) -> MessagingResult<A2aResponse> {
        let request = request.build_with_scope(&self.default_scope)?;
        self.send_request(target_type, kind, request, options).await
    }

    /// Send an already built request.
    pub async fn send_request(
        &self,
        target_type: &str,
        kind: HandlerKind,
        request: A2aRequest,
        options: DispatchOptions,
    ) -> MessagingResult<A2aResponse> {
        let correlation_id = request.correlation_id;
        self.service
            .emit(correlation_id, target_type, kind, CallState::Created, None);

        let target: Arc<str> = Arc::from(target_type);
        let durable_service = self.service.clone();
        let durable_target = target.clone();
        let durable_request = request.clone();
        let durable = move || {
            let service = durable_service.clone();
            let target = durable_target.clone();
            let request = durable_request.clone();
            async move {
                service
                    .invoke(&target, kind, request, CancellationToken::new())
                    .await
            }
        };

        // The handler's token is a child of the caller's, so a deadline can
        // cancel the handler without cancelling the caller.
        let cancellation = options.cancellation_token().child_token();
        let options = options.with_cancellation(cancellation.clone());

        let service = self.service.clone();
        let direct = move |route: DirectRoute| async move {
            match route {
                DirectRoute::InProcess => {
                    service.invoke(&target, kind, request, cancellation).await
                }
                DirectRoute::OutOfProcess(client) => {
                    client
                        .send_a2a(&target, kind, request)
                        .await?
                        .answering(correlation_id)
                }
            }
        };

        self.service
            .emit(correlation_id, target_type, kind, CallState::Dispatched, None);
        info!(
            correlation_id = %correlation_id,
            target_type,
            kind = %kind,
            source_id = %self.source_id,
            "Sending A2A request"
        );

        let result = self
            .dispatcher
            .dispatch("a2a_send", durable, direct, options)
            .await;

        match &result {
            Ok(_) => {
                debug!(correlation_id = %correlation_id, target_type, "A2A response captured");
                self.service.emit(
                    correlation_id,
                    target_type,
                    kind,
                    CallState::ResponseCaptured,
                    None,
                );
            }
            Err(error) => {
                warn!(
                    correlation_id = %correlation_id,
                    target_type,
                    kind = %kind,
                    code = %error.code,
                    error = %error,
                    "A2A request failed"
                );
                self.service.emit(
                    correlation_id,
                    target_type,
                    kind,
                    CallState::Failed,
                    Some(error),
                );
            }
        }
        result
    }

    /// Send, folding any error into the outcome.
    pub async fn try_send(
        &self,
        target_type: &str,
        kind: HandlerKind,
        request: A2aRequestBuilder,
        options: DispatchOptions,
    ) -> SendOutcome {
        self.send(target_type, kind, request, options).await.into()
    }

    pub async fn send_chat(
        &self,
        target_type: &str,
        text: impl Into<String>,
    ) -> MessagingResult<A2aResponse> {
        let request = self.request().text(text);
        self.send(target_type, HandlerKind::Chat, request, DispatchOptions::default())
            .await
    }

    pub async fn send_data(
        &self,
        target_type: &str,
        data: impl Serialize,
    ) -> MessagingResult<A2aResponse> {
        let request = self.request().data(data)?;
        self.send(target_type, HandlerKind::Data, request, DispatchOptions::default())
            .await
    }

    pub async fn send_file(
        &self,
        target_type: &str,
        file: &FilePayload,
    ) -> MessagingResult<A2aResponse> {
        let request = self.request().file(file)?;
        self.send(target_type, HandlerKind::File, request, DispatchOptions::default())
            .await
    }

    /// Send a data message and map the reply data into `T`.
    pub async fn send_data_as<T: DeserializeOwned>(
        &self,
        target_type: &str,
        data: impl Serialize,
    ) -> MessagingResult<T> {
        self.send_data(target_type, data).await?.data_as()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FixedClassifier;
    use crate::registry::HandlerMetadata;

    fn service() -> A2aService {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register(
                "Echo",
                HandlerMetadata::new().on_chat(|ctx: MessageContext| async move {
                    let text = format!("echo: {}", ctx.text());
                    ctx.reply(text);
                    Ok(())
                }),
            )
            .unwrap();
        A2aService::new(registry)
    }

    fn request(text: &str) -> A2aRequest {
        A2aRequest::builder("caller-1", "Caller", "tenant").text(text).build().unwrap()
    }

    #[test]
    fn test_call_state_transitions() {
        assert!(CallState::Created.can_transition_to(CallState::Dispatched));
        assert!(CallState::HandlerInvoked.can_transition_to(CallState::Failed));
        assert!(!CallState::ResponseCaptured.can_transition_to(CallState::Failed));
        assert!(!CallState::Failed.can_transition_to(CallState::Dispatched));
        assert!(CallState::Failed.is_terminal());
        assert_eq!(CallState::HandlerInvoked.to_string(), "handler_invoked");
    }

    #[tokio::test]
    async fn test_invoke_echo() {
        let response = service()
            .invoke("Echo", HandlerKind::Chat, request("hi"), CancellationToken::new())
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(response.text.as_deref(), Some("echo: hi"));
    }

    #[tokio::test]
    async fn test_invoke_validates_payload() {
        let empty = A2aRequest::builder("caller-1", "Caller", "tenant").build().unwrap();
        let err = service()
            .invoke("Echo", HandlerKind::Chat, empty, CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.category(), ErrorCategory::Validation);
    }

    #[tokio::test]
    async fn test_handler_errors_are_wrapped() {
        let registry = Arc::new(HandlerRegistry::new());
        registry
            .register(
                "Broken",
                HandlerMetadata::new()
                    .on_chat(|_ctx: MessageContext| async {
                        Err(MessagingError::validation("bad input"))
                    })
                    .on_data(|_ctx: MessageContext| async {
                        Err(MessagingError::transient("downstream unavailable"))
                    }),
            )
            .unwrap();
        let service = A2aService::new(registry);

        let err = service
            .invoke("Broken", HandlerKind::Chat, request("x"), CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.code, ErrorCode::HandlerFailed);
        assert!(err.cause.is_some());

        let data = A2aRequest::builder("caller-1", "Caller", "tenant")
            .data(serde_json::json!({"k": 1}))
            .unwrap()
            .build()
            .unwrap();
        let err = service
            .invoke("Broken", HandlerKind::Data, data, CancellationToken::new())
            .await
            .unwrap_err();
        assert!(err.is_retryable());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_reaches_the_handler() {
        let seen: Arc<parking_lot::Mutex<Option<CancellationToken>>> = Arc::default();
        let registry = Arc::new(HandlerRegistry::new());
        let slot = seen.clone();
        registry
            .register(
                "Stuck",
                HandlerMetadata::new().on_chat(move |ctx: MessageContext| {
                    let slot = slot.clone();
                    async move {
                        *slot.lock() = Some(ctx.cancellation().clone());
                        std::future::pending::<()>().await;
                        Ok(())
                    }
                }),
            )
            .unwrap();
        let dispatcher = Arc::new(
            ContextAwareDispatcher::new(Arc::new(FixedClassifier::retryable()))
                .with_direct_timeout(Some(std::time::Duration::from_millis(50))),
        );
        let client = A2aClient::new(dispatcher, A2aService::new(registry), "caller-1", "Caller", "tenant");
        let caller_token = CancellationToken::new();

        let err = client
            .send(
                "Stuck",
                HandlerKind::Chat,
                client.request().text("hi"),
                DispatchOptions::new().with_cancellation(caller_token.clone()),
            )
            .await
            .unwrap_err();

        assert_eq!(err.code, ErrorCode::Timeout);
        let handler_token = seen.lock().clone().unwrap();
        assert!(handler_token.is_cancelled());
        assert!(!caller_token.is_cancelled());
    }

    #[test]
    fn test_client_takes_scope_from_config() {
        let dispatcher = Arc::new(ContextAwareDispatcher::new(Arc::new(
            FixedClassifier::retryable(),
        )));
        let config = MessagingConfig::new().with_default_scope("support");
        let client = A2aClient::new(dispatcher, service(), "caller-1", "Caller", "tenant")
            .with_config(&config);

        let request = client
            .request()
            .text("hi")
            .build_with_scope(&client.default_scope)
            .unwrap();
        assert_eq!(request.scope(), "support");
    }

    #[tokio::test]
    async fn test_try_send_folds_errors() {
        let dispatcher = Arc::new(ContextAwareDispatcher::new(Arc::new(
            FixedClassifier::retryable(),
        )));
        let client = A2aClient::new(dispatcher, service(), "caller-1", "Caller", "tenant");

        let outcome = client
            .try_send(
                "Missing",
                HandlerKind::Chat,
                client.request().text("hi"),
                DispatchOptions::default(),
            )
            .await;
        assert!(!outcome.success);
        assert!(outcome.response.is_none());
        assert_eq!(outcome.error_code, Some(ErrorCode::TargetNotFound));

        let outcome = client
            .try_send(
                "Echo",
                HandlerKind::Chat,
                client.request().text("hi"),
                DispatchOptions::default(),
            )
            .await;
        assert!(outcome.success);
        assert!(outcome.error_message.is_none());
    }
}
