//! SASL conversation engine.
//!
//! A mechanism describes one authentication scheme as a chain of
//! [`SaslStep`]s. Each step is a pure state transition: given the bytes the
//! server sent last, it produces the bytes to send next and the step that
//! handles the following server response. All network I/O stays in the
//! [`SaslAuthenticator`](authenticator::SaslAuthenticator); steps only
//! suspend on mechanism-internal work such as key derivation or token
//! acquisition.

pub mod authenticator;
pub mod conversation;
pub mod plain;
pub mod registry;
pub mod scram;

pub use authenticator::SaslAuthenticator;
pub use conversation::SaslConversation;
pub use registry::SaslMechanismRegistry;

use std::collections::HashMap;

use async_trait::async_trait;
use bson::Document;

use crate::connection::ConnectionDescription;
use crate::credential::Credential;
use crate::error::{AuthError, CommandError, Result};

/// Read-only bundle handed to mechanism factories for one authentication
/// attempt. Discarded once the mechanism is constructed.
pub struct SaslContext<'a> {
    /// Mechanism name being constructed.
    pub mechanism_name: &'a str,
    /// Remote endpoint, when known at construction time.
    pub endpoint: &'a str,
    /// The identity authenticating.
    pub credential: &'a Credential,
    /// Mechanism-specific properties (keys unique, order irrelevant).
    pub properties: &'a HashMap<String, String>,
}

/// Outcome of executing one step.
pub struct StepTransition {
    /// Bytes to send to the server. `None` means the transition was purely
    /// local and no round trip happens; an empty payload is still sent
    /// unless the server already signaled completion.
    pub to_send: Option<Vec<u8>>,
    /// The step that handles the next server response. `None` means the
    /// mechanism is finished from its point of view.
    pub next: Option<Box<dyn SaslStep>>,
}

impl StepTransition {
    /// Send bytes and continue with a next step.
    #[must_use]
    pub fn send(bytes: Vec<u8>, next: Box<dyn SaslStep>) -> Self {
        Self {
            to_send: Some(bytes),
            next: Some(next),
        }
    }

    /// Send bytes; the mechanism has nothing further to say.
    #[must_use]
    pub fn send_final(bytes: Vec<u8>) -> Self {
        Self {
            to_send: Some(bytes),
            next: None,
        }
    }

    /// Advance to the next step without a network round trip.
    #[must_use]
    pub fn local(next: Box<dyn SaslStep>) -> Self {
        Self {
            to_send: None,
            next: Some(next),
        }
    }
}

impl std::fmt::Debug for StepTransition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepTransition")
            .field("to_send", &self.to_send)
            .field("has_next", &self.next.is_some())
            .finish()
    }
}

/// One node of a mechanism's state machine.
///
/// Steps are consumed by execution: the transition takes the step by value
/// and hands back the next one, so exactly one step is ever active per
/// conversation.
#[async_trait]
pub trait SaslStep: Send {
    /// Perform the state transition for the latest server payload.
    ///
    /// `server_payload` is `None` only for the very first transition of a
    /// conversation, before anything was received.
    ///
    /// # Errors
    ///
    /// A step that cannot proceed (malformed input, crypto mismatch) must
    /// fail rather than return a stay-in-place transition; the driver loop
    /// has no other guard against a mechanism spinning forever.
    async fn execute(
        self: Box<Self>,
        conversation: &mut SaslConversation,
        server_payload: Option<&[u8]>,
    ) -> Result<StepTransition>;
}

/// Terminal step marking a conversation the mechanism considers complete.
///
/// Reaching this step means any further server challenge is a protocol
/// violation and fails loudly instead of being silently accepted. An empty
/// trailing payload is tolerated so the final empty exchange of servers
/// that do not support `skipEmptyExchange` still succeeds.
pub struct SaslCompletionStep;

#[async_trait]
impl SaslStep for SaslCompletionStep {
    async fn execute(
        self: Box<Self>,
        _conversation: &mut SaslConversation,
        server_payload: Option<&[u8]>,
    ) -> Result<StepTransition> {
        match server_payload {
            Some(bytes) if !bytes.is_empty() => Err(AuthError::Protocol(
                "server sent an additional challenge after the SASL conversation completed"
                    .to_string(),
            )),
            _ => Ok(StepTransition::send_final(Vec::new())),
        }
    }
}

/// One authentication scheme, pluggable into the conversation driver.
///
/// A mechanism instance lives for one authentication attempt. Cross-attempt
/// state (e.g. a derived-key cache) must live in an injected external cache
/// that synchronizes itself.
#[async_trait]
pub trait SaslMechanism: std::fmt::Debug + Send + Sync {
    /// Wire-level mechanism name, e.g. `SCRAM-SHA-256`.
    fn name(&self) -> &'static str;

    /// Database the `saslStart` command is issued against.
    fn database_name(&self) -> &str;

    /// Build the first step of a fresh conversation. Must not perform
    /// network I/O - that is the authenticator's job.
    async fn initialize(
        &self,
        conversation: &mut SaslConversation,
        description: &ConnectionDescription,
    ) -> Result<Box<dyn SaslStep>>;

    /// A first step usable before the handshake completes, for folding the
    /// opening round trip into the handshake command. Mechanisms that need
    /// server-announced state first return `None`.
    fn create_speculative_step(&self) -> Option<Box<dyn SaslStep>> {
        None
    }

    /// Add mechanism-specific fields to the outgoing `saslStart` command.
    fn customize_sasl_start_command(&self, command: Document) -> Document {
        command
    }

    /// Invalidate cached credential state so the next attempt fetches fresh
    /// evidence.
    fn on_reauthentication_required(&self) {}

    /// One chance to recover from a server-reported error by substituting a
    /// replacement step; `Ok(None)` propagates the error.
    fn try_handle_authentication_error(
        &self,
        error: &CommandError,
        conversation: &mut SaslConversation,
        description: &ConnectionDescription,
    ) -> Result<Option<Box<dyn SaslStep>>> {
        let _ = (error, conversation, description);
        Ok(None)
    }
}
