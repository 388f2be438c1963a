//! The context handed to a handler.
//!
//! A [`MessageContext`] is bound to exactly one request and one
//! [`ResponseCapture`]. Its reply operations look like an ordinary reply to
//! the handler, but instead of sending anything they write into the capture,
//! where the waiting caller picks the reply up.

use crate::capture::ResponseCapture;
use crate::envelope::{A2aRequest, FilePayload};
use crate::errors::{MessagingError, MessagingResult};
use crate::types::{CorrelationId, HandlerKind};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Capture-backed message context for one handler invocation.
#[derive(Debug, Clone)]
pub struct MessageContext {
    target_type: Arc<str>,
    kind: HandlerKind,
    request: Arc<A2aRequest>,
    capture: Arc<ResponseCapture>,
    cancellation: CancellationToken,
}

impl MessageContext {
    pub fn new(
        target_type: &str,
        kind: HandlerKind,
        request: Arc<A2aRequest>,
        capture: Arc<ResponseCapture>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            target_type: Arc::from(target_type),
            kind,
            request,
            capture,
            cancellation,
        }
    }

    // ═══════════════════════════════════════════════════════
    // REQUEST ACCESS
    // ═══════════════════════════════════════════════════════

    pub fn request(&self) -> &A2aRequest {
        &self.request
    }

    pub fn correlation_id(&self) -> CorrelationId {
        self.request.correlation_id
    }

    /// Target type this handler was registered under.
    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn kind(&self) -> HandlerKind {
        self.kind
    }

    pub fn text(&self) -> &str {
        &self.request.text
    }

    pub fn data(&self) -> &serde_json::Value {
        &self.request.data
    }

    /// Deserialize the request data into a handler-side type.
    pub fn data_as<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        serde_json::from_value(self.request.data.clone()).map_err(|e| {
            MessagingError::validation("request data does not match the expected shape")
                .with_cause(e)
                .with_context("correlation_id", self.request.correlation_id)
        })
    }

    /// Decode the file carried by a `File` message.
    pub fn file(&self) -> MessagingResult<FilePayload> {
        self.data_as()
    }

    pub fn source_id(&self) -> &str {
        &self.request.source_id
    }

    pub fn source_type(&self) -> &str {
        &self.request.source_type
    }

    pub fn tenant_id(&self) -> &str {
        &self.request.tenant_id
    }

    pub fn metadata(&self, key: &str) -> Option<&str> {
        self.request.metadata.get(key).map(String::as_str)
    }

    pub fn authorization(&self) -> Option<&str> {
        self.request.authorization.as_deref()
    }

    pub fn hint(&self) -> Option<&str> {
        self.request.hint.as_deref()
    }

    pub fn scope(&self) -> &str {
        self.request.scope()
    }

    pub fn thread_id(&self) -> &str {
        self.request.thread_id()
    }

    pub fn participant_id(&self) -> &str {
        self.request.participant_id()
    }

    // ═══════════════════════════════════════════════════════
    // REPLY
    // ═══════════════════════════════════════════════════════

    /// Reply with text. Returns `false` if an earlier reply already won.
    pub fn reply(&self, text: impl Into<String>) -> bool {
        self.capture.write_reply(text, serde_json::Value::Null)
    }

    /// Reply with a data payload.
    pub fn reply_data(&self, data: impl Serialize) -> MessagingResult<bool> {
        let data = serde_json::to_value(data)?;
        Ok(self.capture.write_reply(String::new(), data))
    }

    /// Reply with both text and data.
    pub fn reply_with(&self, text: impl Into<String>, data: impl Serialize) -> MessagingResult<bool> {
        let data = serde_json::to_value(data)?;
        Ok(self.capture.write_reply(text, data))
    }

    pub fn has_replied(&self) -> bool {
        self.capture.has_response()
    }

    // ═══════════════════════════════════════════════════════
    // CANCELLATION
    // ═══════════════════════════════════════════════════════

    /// Token fired when the caller gives up on this request.
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    fn context(request: A2aRequest) -> (MessageContext, Arc<ResponseCapture>) {
        let capture = Arc::new(ResponseCapture::new(request.correlation_id));
        let ctx = MessageContext::new(
            "Echo",
            HandlerKind::Chat,
            Arc::new(request),
            capture.clone(),
            CancellationToken::new(),
        );
        (ctx, capture)
    }

    #[test]
    fn test_reply_writes_into_capture() {
        let req = A2aRequest::builder("a", "Caller", "t").text("hi").build().unwrap();
        let (ctx, capture) = context(req);

        assert!(ctx.reply("hello back"));
        assert!(ctx.has_replied());
        assert!(!ctx.reply("again"));
        assert_eq!(capture.reply().unwrap().text, "hello back");
        assert_eq!(capture.discarded_replies(), 1);
    }

    #[test]
    fn test_request_accessors() {
        let req = A2aRequest::builder("agent-a", "Caller", "tenant-1")
            .text("hi")
            .metadata("lang", "en")
            .authorization("Bearer x")
            .build()
            .unwrap();
        let (ctx, _) = context(req);

        assert_eq!(ctx.target_type(), "Echo");
        assert_eq!(ctx.source_id(), "agent-a");
        assert_eq!(ctx.tenant_id(), "tenant-1");
        assert_eq!(ctx.metadata("lang"), Some("en"));
        assert_eq!(ctx.authorization(), Some("Bearer x"));
        assert_eq!(ctx.participant_id(), "agent-a");
        assert!(!ctx.is_cancelled());
    }

    #[test]
    fn test_data_as_reports_shape_mismatch() {
        #[derive(Debug, Deserialize)]
        #[allow(dead_code)]
        struct Order {
            id: u64,
        }

        let req = A2aRequest::builder("a", "Caller", "t")
            .data(serde_json::json!({"id": "not-a-number"}))
            .unwrap()
            .build()
            .unwrap();
        let (ctx, _) = context(req);

        let err = ctx.data_as::<Order>().unwrap_err();
        assert!(err.cause.is_some());
    }

    #[test]
    fn test_reply_data() {
        let req = A2aRequest::builder("a", "Caller", "t").text("q").build().unwrap();
        let (ctx, capture) = context(req);

        assert!(ctx.reply_data(serde_json::json!({"answer": 42})).unwrap());
        assert_eq!(capture.reply().unwrap().data["answer"], 42);
    }
}
