//! A2A request and response envelopes.
//!
//! Both are plain serde records so they can cross a process boundary
//! unchanged. Requests are built through [`A2aRequestBuilder`], which
//! validates required fields and fills the routing hints a handler relies
//! on.

use crate::capture::CapturedReply;
use crate::errors::{ErrorCode, MessagingError, MessagingResult};
use crate::types::{CorrelationId, HandlerKind, Metadata};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// Scope applied when the caller leaves it empty.
pub const A2A_SCOPE: &str = "A2A";

/// Metadata key carrying the error code of a failed response.
pub const ERROR_CODE_KEY: &str = "error_code";

/// An inbound request for another target's handler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aRequest {
    pub correlation_id: CorrelationId,
    pub source_id: String,
    pub source_type: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub data: serde_json::Value,
    pub tenant_id: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authorization: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl A2aRequest {
    /// Start building a request from `source_id` (of type `source_type`)
    /// on behalf of `tenant_id`.
    pub fn builder(
        source_id: impl Into<String>,
        source_type: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> A2aRequestBuilder {
        A2aRequestBuilder::new(source_id, source_type, tenant_id)
    }

    /// Check the payload fits the handler kind it is sent to.
    pub fn validate_for(&self, kind: HandlerKind) -> MessagingResult<()> {
        match kind {
            HandlerKind::Chat => {
                if self.text.trim().is_empty() {
                    return Err(MessagingError::validation("chat request requires non-empty text")
                        .with_context("correlation_id", self.correlation_id));
                }
            }
            HandlerKind::Data => {
                if self.data.is_null() {
                    return Err(MessagingError::validation("data request requires a data payload")
                        .with_context("correlation_id", self.correlation_id));
                }
            }
            HandlerKind::File => {
                let file: FilePayload = serde_json::from_value(self.data.clone()).map_err(|e| {
                    MessagingError::validation("file request requires a file payload")
                        .with_cause(e)
                        .with_context("correlation_id", self.correlation_id)
                })?;
                if !file.verify() {
                    return Err(MessagingError::validation(format!(
                        "file '{}' failed checksum verification",
                        file.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Routing hints are always populated after `build`; these read them back.
    pub fn scope(&self) -> &str {
        self.scope.as_deref().unwrap_or(A2A_SCOPE)
    }

    pub fn thread_id(&self) -> &str {
        self.thread_id.as_deref().unwrap_or(&self.source_id)
    }

    pub fn participant_id(&self) -> &str {
        self.participant_id.as_deref().unwrap_or(&self.source_id)
    }
}

/// Builder for [`A2aRequest`].
#[derive(Debug, Clone)]
pub struct A2aRequestBuilder {
    source_id: String,
    source_type: String,
    tenant_id: String,
    text: String,
    data: serde_json::Value,
    metadata: Metadata,
    authorization: Option<String>,
    participant_id: Option<String>,
    request_id: Option<String>,
    scope: Option<String>,
    hint: Option<String>,
    thread_id: Option<String>,
}

impl A2aRequestBuilder {
    pub fn new(
        source_id: impl Into<String>,
        source_type: impl Into<String>,
        tenant_id: impl Into<String>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            source_type: source_type.into(),
            tenant_id: tenant_id.into(),
            text: String::new(),
            data: serde_json::Value::Null,
            metadata: Metadata::new(),
            authorization: None,
            participant_id: None,
            request_id: None,
            scope: None,
            hint: None,
            thread_id: None,
        }
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the data payload from any serializable value.
    pub fn data(mut self, data: impl Serialize) -> MessagingResult<Self> {
        self.data = serde_json::to_value(data)?;
        Ok(self)
    }

    /// Set the data payload from an already-encoded JSON value.
    pub fn data_value(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Attach a file as the data payload.
    pub fn file(self, file: &FilePayload) -> MessagingResult<Self> {
        self.data(file)
    }

    pub fn metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn authorization(mut self, token: impl Into<String>) -> Self {
        self.authorization = Some(token.into());
        self
    }

    pub fn participant_id(mut self, id: impl Into<String>) -> Self {
        self.participant_id = Some(id.into());
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        self.scope = Some(scope.into());
        self
    }

    pub fn hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn thread_id(mut self, id: impl Into<String>) -> Self {
        self.thread_id = Some(id.into());
        self
    }

    /// Validate and build with the standard scope sentinel.
    pub fn build(self) -> MessagingResult<A2aRequest> {
        self.build_with_scope(A2A_SCOPE)
    }

    /// Validate and build, filling an empty scope with `default_scope`.
    ///
    /// A fresh correlation id is generated here. Empty routing hints fall
    /// back so the handler never sees them blank: participant → source id,
    /// request and thread → correlation id.
    pub fn build_with_scope(self, default_scope: &str) -> MessagingResult<A2aRequest> {
        for (field, value) in [
            ("source_id", &self.source_id),
            ("source_type", &self.source_type),
            ("tenant_id", &self.tenant_id),
        ] {
            if value.trim().is_empty() {
                return Err(MessagingError::validation(format!("{} must not be empty", field))
                    .with_context("field", field));
            }
        }

        let correlation_id = CorrelationId::new();
        let correlation = correlation_id.to_string();

        Ok(A2aRequest {
            correlation_id,
            participant_id: non_empty(self.participant_id).or_else(|| Some(self.source_id.clone())),
            request_id: non_empty(self.request_id).or_else(|| Some(correlation.clone())),
            thread_id: non_empty(self.thread_id).or_else(|| Some(correlation.clone())),
            scope: non_empty(self.scope).or_else(|| Some(default_scope.to_string())),
            hint: non_empty(self.hint),
            authorization: non_empty(self.authorization),
            source_id: self.source_id,
            source_type: self.source_type,
            text: self.text,
            data: self.data,
            tenant_id: self.tenant_id,
            metadata: self.metadata,
            created_at: Utc::now(),
        })
    }
}

fn is_empty_reply(text: Option<&str>, data: Option<&serde_json::Value>) -> bool {
    text.map_or(true, str::is_empty) && data.map_or(true, serde_json::Value::is_null)
}

fn empty_response(correlation_id: CorrelationId, message: &str) -> MessagingError {
    MessagingError::new(ErrorCode::EmptyResponse, message).with_context("correlation_id", correlation_id)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// The single reply to an [`A2aRequest`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct A2aResponse {
    pub correlation_id: CorrelationId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    pub created_at: DateTime<Utc>,
}

impl A2aResponse {
    /// Build a successful response from a captured reply.
    ///
    /// A reply with neither text nor data is a contract violation; a
    /// successful response always carries something.
    pub fn from_reply(correlation_id: CorrelationId, reply: CapturedReply) -> MessagingResult<Self> {
        let text = Some(reply.text).filter(|t| !t.is_empty());
        let data = Some(reply.data).filter(|d| !d.is_null());
        if is_empty_reply(text.as_deref(), data.as_ref()) {
            return Err(empty_response(correlation_id, "handler replied with neither text nor data"));
        }

        Ok(Self {
            correlation_id,
            text,
            data,
            success: true,
            error_message: None,
            metadata: None,
            created_at: Utc::now(),
        })
    }

    /// Encode a failure for transport across a process boundary.
    pub fn failure(correlation_id: CorrelationId, error: &MessagingError) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert(ERROR_CODE_KEY.to_string(), error.code.to_string());
        Self {
            correlation_id,
            text: None,
            data: None,
            success: false,
            error_message: Some(error.message.clone()),
            metadata: Some(metadata),
            created_at: Utc::now(),
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata
            .get_or_insert_with(Metadata::new)
            .insert(key.into(), value.into());
        self
    }

    /// Turn a transported failure back into an error.
    pub fn into_result(self) -> MessagingResult<Self> {
        if self.success {
            return Ok(self);
        }
        let code = self
            .metadata
            .as_ref()
            .and_then(|m| m.get(ERROR_CODE_KEY))
            .and_then(|c| serde_json::from_value(serde_json::Value::String(c.clone())).ok())
            .unwrap_or(ErrorCode::HandlerFailed);
        let message = self
            .error_message
            .unwrap_or_else(|| "remote call failed without an error message".to_string());
        Err(MessagingError::new(code, message).with_context("correlation_id", self.correlation_id))
    }

    /// Accept a response received from another process as the answer to the
    /// request with `correlation_id`.
    ///
    /// A response for a different call is an internal error. A transported
    /// failure becomes its error, and a success with neither text nor data is
    /// rejected like an empty local reply.
    pub fn answering(self, correlation_id: CorrelationId) -> MessagingResult<Self> {
        if self.correlation_id != correlation_id {
            return Err(MessagingError::internal(
                "remote response does not answer the request that was sent",
            )
            .with_context("expected_correlation_id", correlation_id)
            .with_context("received_correlation_id", self.correlation_id));
        }
        let response = self.into_result()?;
        if is_empty_reply(response.text.as_deref(), response.data.as_ref()) {
            return Err(empty_response(
                correlation_id,
                "remote response claims success but carries neither text nor data",
            ));
        }
        Ok(response)
    }

    /// Deserialize the reply data into the caller's type.
    pub fn data_as<T: DeserializeOwned>(&self) -> MessagingResult<T> {
        let data = self.data.clone().ok_or_else(|| {
            MessagingError::new(ErrorCode::Serialization, "response carries no data")
                .with_context("correlation_id", self.correlation_id)
        })?;
        Ok(serde_json::from_value(data)?)
    }
}

/// A file sent as the payload of a `File` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilePayload {
    pub name: String,
    pub content_type: String,

    /// File content
    #[serde(with = "base64_serde")]
    pub bytes: Vec<u8>,

    /// Checksum of the content (BLAKE3)
    #[serde(with = "hex_serde")]
    pub checksum: [u8; 32],
}

impl FilePayload {
    pub fn new(name: impl Into<String>, content_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        let checksum = *blake3::hash(&bytes).as_bytes();
        Self {
            name: name.into(),
            content_type: content_type.into(),
            bytes,
            checksum,
        }
    }

    /// Verify the checksum
    pub fn verify(&self) -> bool {
        let computed = blake3::hash(&self.bytes);
        computed.as_bytes() == &self.checksum
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

// Base64 serialization for binary data
mod base64_serde {
    use base64::{engine::general_purpose::STANDARD, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

// Hex serialization for checksums
mod hex_serde {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(bytes: &[u8; 32], serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<[u8; 32], D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(serde::de::Error::custom)?;
        bytes
            .try_into()
            .map_err(|_| serde::de::Error::custom("invalid checksum length"))
    }
}
