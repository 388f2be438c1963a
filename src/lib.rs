//! # Agentic A2A
//!
//! Context-aware synchronous messaging for durable agent workflows.
//!
//! One unit of work invokes a handler living in another unit of work and
//! gets back exactly one reply. How the call is carried out depends on where
//! the caller runs:
//!
//! - **Inside a durable unit**: the whole request runs as one retryable unit
//!   of the orchestration substrate, under a [`RetryPolicy`].
//! - **Inside a retryable unit**: the handler is invoked in-process.
//! - **Outside the substrate**: the request goes through an out-of-process
//!   [`SubstrateClient`].
//!
//! The same dispatch rule covers agent-to-agent chat, data and file messages
//! ([`A2aClient`]), and cross-workflow signals, queries, updates and
//! schedules ([`WorkflowCalls`]).
//!
//! ## Usage
//!
//! ```rust
//! use agentic_a2a::prelude::*;
//! use std::sync::Arc;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> MessagingResult<()> {
//! let registry = Arc::new(HandlerRegistry::new());
//! registry.register(
//!     "Echo",
//!     HandlerMetadata::new().on_chat(|ctx: MessageContext| async move {
//!         let text = format!("echo: {}", ctx.text());
//!         ctx.reply(text);
//!         Ok(())
//!     }),
//! )?;
//!
//! let dispatcher = Arc::new(ContextAwareDispatcher::new(Arc::new(FixedClassifier::retryable())));
//! let client = A2aClient::new(dispatcher, A2aService::new(registry), "agent-1", "Planner", "tenant");
//!
//! let response = client.send_chat("Echo", "hello").await?;
//! assert_eq!(response.text.as_deref(), Some("echo: hello"));
//! # Ok(())
//! # }
//! ```
//!
//! ## Guarantees
//!
//! - One correlation id, one handler invocation, at most one captured reply.
//!   Later replies are discarded and reported, never surfaced.
//! - A missing handler fails before anything is dispatched.
//! - A handler that returns without replying is an error, not an empty
//!   response.

pub mod a2a;
pub mod capture;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod envelope;
pub mod errors;
pub mod events;
pub mod logging;
pub mod message;
pub mod registry;
pub mod retry;
pub mod substrate;
pub mod types;
pub mod workflow;

// Re-export everything in prelude for convenience
pub mod prelude {
    pub use crate::a2a::*;
    pub use crate::capture::*;
    pub use crate::config::*;
    pub use crate::context::*;
    pub use crate::dispatcher::*;
    pub use crate::envelope::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::logging::*;
    pub use crate::message::*;
    pub use crate::registry::*;
    pub use crate::retry::*;
    pub use crate::substrate::*;
    pub use crate::types::*;
    pub use crate::workflow::*;
}

// Also re-export at crate root
pub use prelude::*;
