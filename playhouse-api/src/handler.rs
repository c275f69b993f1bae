//! The `msg_id -> handler` table built at bootstrap.

// Layer 1: Standard library imports
use std::future::Future;
use std::sync::Arc;

// Layer 2: Third-party crate imports
use dashmap::DashMap;
use futures::future::BoxFuture;

// Layer 3: Internal module imports
use crate::error::ApiError;
use crate::sender::ApiSender;
use playhouse_comm::packet::Packet;

/// One registered api handler.
pub type ApiHandler =
    Arc<dyn Fn(Packet, ApiSender) -> BoxFuture<'static, Result<(), ApiError>> + Send + Sync>;

/// Explicit handler table; there is no reflection and no scanning. What
/// is registered here is the api surface.
///
/// # Examples
///
/// ```rust,ignore
/// let registry = HandlerRegistry::new().register("EchoRequest", |packet, sender| async move {
///     sender.reply(Packet::with_payload("EchoReply", packet.payload().clone())).await?;
///     Ok(())
/// });
/// ```
pub struct HandlerRegistry {
    handlers: DashMap<String, ApiHandler>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Register a handler for `msg_id`, replacing any previous one.
    pub fn register<F, Fut>(self, msg_id: impl Into<String>, handler: F) -> Self
    where
        F: Fn(Packet, ApiSender) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ApiError>> + Send + 'static,
    {
        self.handlers.insert(
            msg_id.into(),
            Arc::new(move |packet, sender| Box::pin(handler(packet, sender))),
        );
        self
    }

    pub fn get(&self, msg_id: &str) -> Option<ApiHandler> {
        self.handlers.get(msg_id).map(|h| Arc::clone(&h))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}
