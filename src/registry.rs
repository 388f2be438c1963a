//! Handler registry.
//!
//! Maps a target's type name to the handlers it registered during setup.
//! Registration happens once per target type before anything dispatches to
//! it; afterwards the registry is read concurrently from every caller.
//!
//! ## Usage
//!
//! ```rust
//! use agentic_a2a::prelude::*;
//!
//! let registry = HandlerRegistry::new();
//! registry
//!     .register(
//!         "Echo",
//!         HandlerMetadata::new().on_chat(|ctx: MessageContext| async move {
//!             let text = ctx.text().to_string();
//!             ctx.reply(text);
//!             Ok(())
//!         }),
//!     )
//!     .unwrap();
//!
//! assert!(registry.resolve("Echo", HandlerKind::Chat).is_ok());
//! assert!(registry.resolve("Echo", HandlerKind::Data).err().unwrap().is_not_found());
//! ```

use crate::config::MessagingConfig;
use crate::errors::{MessagingError, MessagingResult};
use crate::events::{EventManager, MessagingEvent};
use crate::message::MessageContext;
use crate::types::HandlerKind;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, warn};

/// A function from a message context to a reply-producing effect.
///
/// The handler replies through the context; returning without a reply is a
/// contract violation reported to the caller.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, ctx: MessageContext) -> MessagingResult<()>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    async fn handle(&self, ctx: MessageContext) -> MessagingResult<()> {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = MessagingResult<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

/// Handlers one target type registered, keyed by kind.
#[derive(Clone, Default)]
pub struct HandlerMetadata {
    handlers: HashMap<HandlerKind, Arc<dyn MessageHandler>>,
}

impl HandlerMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `kind`, replacing any earlier one.
    pub fn with_handler(mut self, kind: HandlerKind, handler: Arc<dyn MessageHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn on_chat<F, Fut>(self, f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MessagingResult<()>> + Send + 'static,
    {
        self.with_handler(HandlerKind::Chat, handler_fn(f))
    }

    pub fn on_data<F, Fut>(self, f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MessagingResult<()>> + Send + 'static,
    {
        self.with_handler(HandlerKind::Data, handler_fn(f))
    }

    pub fn on_file<F, Fut>(self, f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = MessagingResult<()>> + Send + 'static,
    {
        self.with_handler(HandlerKind::File, handler_fn(f))
    }

    pub fn handler(&self, kind: HandlerKind) -> Option<Arc<dyn MessageHandler>> {
        self.handlers.get(&kind).cloned()
    }

    pub fn supports(&self, kind: HandlerKind) -> bool {
        self.handlers.contains_key(&kind)
    }

    /// Registered kinds, in [`HandlerKind::ALL`] order.
    pub fn kinds(&self) -> Vec<HandlerKind> {
        HandlerKind::ALL
            .into_iter()
            .filter(|k| self.handlers.contains_key(k))
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerMetadata")
            .field("kinds", &self.kinds())
            .finish()
    }
}

/// What happens when a target type registers twice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistrationPolicy {
    /// Last write wins; the replacement is logged.
    #[default]
    Overwrite,

    /// Second registration fails with `AlreadyExists`.
    RejectDuplicates,
}

/// Counts of registered targets and handlers.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryStats {
    pub total_targets: usize,
    pub chat_handlers: usize,
    pub data_handlers: usize,
    pub file_handlers: usize,
}

/// Process-wide map from target type to its handlers.
pub struct HandlerRegistry {
    targets: DashMap<String, Arc<HandlerMetadata>>,
    policy: RegistrationPolicy,
    events: Option<Arc<EventManager>>,
}

impl HandlerRegistry {
    /// Create a registry with the overwrite policy.
    pub fn new() -> Self {
        Self::with_policy(RegistrationPolicy::Overwrite)
    }

    pub fn with_policy(policy: RegistrationPolicy) -> Self {
        Self {
            targets: DashMap::new(),
            policy,
            events: None,
        }
    }

    /// Create a registry with the registration policy from `config`.
    pub fn from_config(config: &MessagingConfig) -> Self {
        Self::with_policy(config.registration_policy)
    }

    /// Emit registration events to `events`.
    pub fn with_events(mut self, events: Arc<EventManager>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn policy(&self) -> RegistrationPolicy {
        self.policy
    }

    /// Register the handlers of `target_type` under the registry's policy.
    pub fn register(&self, target_type: &str, metadata: HandlerMetadata) -> MessagingResult<()> {
        self.insert(target_type, metadata, self.policy)
    }

    /// Register, failing if `target_type` is already present whatever the
    /// registry's policy.
    pub fn try_register(&self, target_type: &str, metadata: HandlerMetadata) -> MessagingResult<()> {
        self.insert(target_type, metadata, RegistrationPolicy::RejectDuplicates)
    }

    fn insert(
        &self,
        target_type: &str,
        metadata: HandlerMetadata,
        policy: RegistrationPolicy,
    ) -> MessagingResult<()> {
        if target_type.trim().is_empty() {
            return Err(MessagingError::validation("target type must not be empty"));
        }
        if metadata.is_empty() {
            return Err(MessagingError::validation(format!(
                "target type '{}' registered without any handler",
                target_type
            ))
            .with_context("target_type", target_type));
        }

        let kinds = metadata.kinds();
        let replaced = match self.targets.entry(target_type.to_string()) {
            Entry::Occupied(mut existing) => {
                if policy == RegistrationPolicy::RejectDuplicates {
                    return Err(MessagingError::already_registered(target_type));
                }
                existing.insert(Arc::new(metadata));
                true
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(metadata));
                false
            }
        };

        if replaced {
            warn!(target_type, ?kinds, "Handlers already registered, replacing");
        } else {
            info!(target_type, ?kinds, "Registered handlers");
        }
        if let Some(events) = &self.events {
            events.emit(MessagingEvent::handler_registered(target_type, kinds, replaced));
        }
        Ok(())
    }

    /// All handlers of `target_type`.
    pub fn lookup(&self, target_type: &str) -> MessagingResult<Arc<HandlerMetadata>> {
        self.targets
            .get(target_type)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| MessagingError::target_not_found(target_type))
    }

    /// The `kind` handler of `target_type`.
    ///
    /// Unknown type and missing kind are both `NotFound`, with distinct
    /// codes.
    pub fn resolve(
        &self,
        target_type: &str,
        kind: HandlerKind,
    ) -> MessagingResult<Arc<dyn MessageHandler>> {
        let metadata = self.lookup(target_type)?;
        metadata
            .handler(kind)
            .ok_or_else(|| MessagingError::handler_kind_not_found(target_type, kind, &metadata.kinds()))
    }

    pub fn contains(&self, target_type: &str) -> bool {
        self.targets.contains_key(target_type)
    }

    /// Registered target types, sorted.
    pub fn target_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.targets.iter().map(|e| e.key().clone()).collect();
        types.sort();
        types
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_targets: self.targets.len(),
            ..Default::default()
        };
        for entry in self.targets.iter() {
            for kind in entry.value().kinds() {
                match kind {
                    HandlerKind::Chat => stats.chat_handlers += 1,
                    HandlerKind::Data => stats.data_handlers += 1,
                    HandlerKind::File => stats.file_handlers += 1,
                }
            }
        }
        stats
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    fn echo() -> HandlerMetadata {
        HandlerMetadata::new().on_chat(|ctx: MessageContext| async move {
            let text = ctx.text().to_string();
            ctx.reply(text);
            Ok(())
        })
    }

    #[test]
    fn test_register_and_resolve() {
        let registry = HandlerRegistry::new();
        registry.register("Echo", echo()).unwrap();

        assert!(registry.contains("Echo"));
        assert!(registry.resolve("Echo", HandlerKind::Chat).is_ok());
        assert_eq!(registry.lookup("Echo").unwrap().kinds(), vec![HandlerKind::Chat]);
    }

    #[test]
    fn test_policy_from_config() {
        let config = MessagingConfig::new().with_registration_policy(RegistrationPolicy::RejectDuplicates);
        let registry = HandlerRegistry::from_config(&config);
        registry.register("Echo", echo()).unwrap();

        let err = registry.register("Echo", echo()).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);
        assert_eq!(
            HandlerRegistry::from_config(&MessagingConfig::default()).policy(),
            RegistrationPolicy::Overwrite
        );
    }

    #[test]
    fn test_unknown_type_vs_missing_kind() {
        let registry = HandlerRegistry::new();
        registry.register("Echo", echo()).unwrap();

        let err = registry.resolve("Nope", HandlerKind::Chat).err().unwrap();
        assert_eq!(err.code, ErrorCode::TargetNotFound);

        let err = registry.resolve("Echo", HandlerKind::File).err().unwrap();
        assert_eq!(err.code, ErrorCode::HandlerKindNotFound);
        assert_eq!(
            err.context_value("available_kinds"),
            Some(&serde_json::json!(["chat"]))
        );
    }

    #[test]
    fn test_overwrite_policy_replaces() {
        let events = Arc::new(EventManager::new(8));
        let registry = HandlerRegistry::new().with_events(events.clone());
        registry.register("Echo", echo()).unwrap();
        registry
            .register(
                "Echo",
                HandlerMetadata::new().on_data(|_ctx: MessageContext| async { Ok(()) }),
            )
            .unwrap();

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.lookup("Echo").unwrap().kinds(), vec![HandlerKind::Data]);
        assert_eq!(events.recent(10).len(), 2);
    }

    #[test]
    fn test_reject_duplicates_policy() {
        let registry = HandlerRegistry::with_policy(RegistrationPolicy::RejectDuplicates);
        registry.register("Echo", echo()).unwrap();
        let err = registry.register("Echo", echo()).unwrap_err();
        assert_eq!(err.code, ErrorCode::AlreadyExists);

        let overwriting = HandlerRegistry::new();
        overwriting.register("Echo", echo()).unwrap();
        assert!(overwriting.try_register("Echo", echo()).is_err());
    }

    #[test]
    fn test_register_validation() {
        let registry = HandlerRegistry::new();
        assert_eq!(
            registry.register(" ", echo()).unwrap_err().code,
            ErrorCode::InvalidRequest
        );
        assert_eq!(
            registry.register("Empty", HandlerMetadata::new()).unwrap_err().code,
            ErrorCode::InvalidRequest
        );
        assert!(registry.is_empty());
    }

    #[test]
    fn test_stats() {
        let registry = HandlerRegistry::new();
        registry.register("Echo", echo()).unwrap();
        registry
            .register(
                "Files",
                HandlerMetadata::new()
                    .on_file(|_ctx: MessageContext| async { Ok(()) })
                    .on_data(|_ctx: MessageContext| async { Ok(()) }),
            )
            .unwrap();

        let stats = registry.stats();
        assert_eq!(stats.total_targets, 2);
        assert_eq!(stats.chat_handlers, 1);
        assert_eq!(stats.data_handlers, 1);
        assert_eq!(stats.file_handlers, 1);
        assert_eq!(registry.target_types(), vec!["Echo", "Files"]);
    }
}
