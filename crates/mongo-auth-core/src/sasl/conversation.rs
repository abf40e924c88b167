//! Conversation scope for one authentication attempt.
//!
//! Mechanisms that acquire external resources mid-conversation (native
//! security contexts, token handles) register them here instead of managing
//! lifetimes themselves. The conversation releases everything in reverse
//! registration order when the attempt ends, on every exit path - success,
//! step failure, or cancellation of the authenticate future.

use std::any::Any;

use tracing::debug;

/// Scoped context spanning every round trip of one authentication attempt.
///
/// Owned by the authenticator for the duration of one `authenticate` call
/// and destroyed when that call returns.
pub struct SaslConversation {
    connection_id: i64,
    endpoint: String,
    resources: Vec<Box<dyn Any + Send>>,
}

impl SaslConversation {
    /// Create a conversation bound to a connection.
    #[must_use]
    pub fn new(connection_id: i64, endpoint: impl Into<String>) -> Self {
        Self {
            connection_id,
            endpoint: endpoint.into(),
            resources: Vec::new(),
        }
    }

    /// Create the short-lived scope used while executing a speculative first
    /// step during handshake customization, before a connection exists.
    #[must_use]
    pub fn speculative() -> Self {
        Self::new(0, String::new())
    }

    /// Identifier of the connection this conversation authenticates.
    #[must_use]
    pub fn connection_id(&self) -> i64 {
        self.connection_id
    }

    /// Remote endpoint, for mechanisms that bind crypto material to the
    /// specific connection (channel binding).
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Register a resource to be dropped when the conversation ends.
    ///
    /// Resources are released last-registered-first.
    pub fn register_for_disposal<T: Send + 'static>(&mut self, resource: T) {
        self.resources.push(Box::new(resource));
    }

    /// Release all registered resources now, in reverse registration order.
    ///
    /// Idempotent; `Drop` calls this as well, so explicit disposal is only
    /// needed when resources must go away before the conversation value does.
    pub fn dispose(&mut self) {
        if !self.resources.is_empty() {
            debug!(
                connection_id = self.connection_id,
                resources = self.resources.len(),
                "disposing conversation resources"
            );
        }
        while let Some(resource) = self.resources.pop() {
            drop(resource);
        }
    }
}

impl Drop for SaslConversation {
    fn drop(&mut self) {
        self.dispose();
    }
}
