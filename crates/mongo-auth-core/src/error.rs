//! Domain error types for the authentication core.
//!
//! Uses `thiserror` for ergonomic error definitions with proper context.
//!
//! The taxonomy separates four failure classes with different handling:
//! - Configuration errors fail fast before any network use.
//! - Protocol violations are always fatal and never retried.
//! - Server-reported command failures may carry the recoverable
//!   re-authentication code; everything else is wrapped and surfaced.
//! - Connection errors (transport, timeout) belong to the caller's retry
//!   policy, not this layer's.

use std::fmt;

use thiserror::Error;

/// Server error code signaling that credentials or session state must be
/// refreshed and the conversation restarted.
pub const REAUTHENTICATION_REQUIRED_CODE: i32 = 391;

/// A command failure reported by the server.
///
/// Produced by the connection layer when a command round trip completes but
/// the server rejects the command (`ok: 0`). The message is the server's
/// `errmsg` only; command payloads are never echoed into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandError {
    /// Numeric server error code.
    pub code: i32,
    /// Symbolic code name, when the server reported one.
    pub code_name: Option<String>,
    /// Server-provided error message.
    pub message: String,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command failed with code {}", self.code)?;
        if let Some(code_name) = &self.code_name {
            write!(f, " ({code_name})")?;
        }
        write!(f, ": {}", self.message)
    }
}

impl std::error::Error for CommandError {}

impl CommandError {
    /// Create a command error from a bare code and message.
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            code_name: None,
            message: message.into(),
        }
    }

    /// Returns `true` if this is the recoverable re-authentication signal.
    #[must_use]
    pub fn is_reauthentication_required(&self) -> bool {
        self.code == REAUTHENTICATION_REQUIRED_CODE
    }
}

/// Error type for all authentication operations.
#[derive(Error, Debug)]
pub enum AuthError {
    /// Invalid credential/mechanism combination, detected before any network
    /// use.
    #[error("authentication configuration error: {0}")]
    Configuration(String),

    /// No mechanism factory registered for the requested name.
    #[error("no SASL mechanism registered for '{0}'")]
    MechanismNotFound(String),

    /// The conversation violated the SASL exchange rules - e.g. the loop
    /// exited without the server signaling completion, or the server sent
    /// a challenge after the mechanism finished.
    #[error("SASL protocol violation: {0}")]
    Protocol(String),

    /// Raw server command failure, as produced by the connection layer.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// Terminal authentication failure, wrapped with the mechanism name and
    /// a redacted description.
    #[error("authentication using mechanism {mechanism} failed: {message}")]
    AuthenticationFailed {
        /// Mechanism that was being used when authentication failed.
        mechanism: String,
        /// Redacted description of the failure.
        message: String,
    },

    /// Transport-level error (network, timeout).
    #[error("connection error: {0}")]
    Connection(String),
}

impl AuthError {
    /// Returns `true` if this is a configuration error.
    #[inline]
    pub fn is_configuration(&self) -> bool {
        matches!(self, AuthError::Configuration(_))
    }

    /// Returns `true` if this is a protocol violation.
    #[inline]
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, AuthError::Protocol(_))
    }

    /// Returns `true` if this error carries the recoverable
    /// re-authentication code.
    pub fn is_reauthentication_required(&self) -> bool {
        matches!(self, AuthError::Command(e) if e.is_reauthentication_required())
    }

    /// Wrap a terminal failure with the mechanism name, keeping only the
    /// server's message so command payloads never leak into error text.
    pub fn authentication_failed(mechanism: &str, error: &CommandError) -> Self {
        AuthError::AuthenticationFailed {
            mechanism: mechanism.to_string(),
            message: error.message.clone(),
        }
    }
}

// Manual From impl since io::Error isn't Clone and the transport detail
// doesn't matter to callers of this layer.
impl From<std::io::Error> for AuthError {
    fn from(err: std::io::Error) -> Self {
        AuthError::Connection(err.to_string())
    }
}

/// Result type alias for authentication operations.
pub type Result<T> = std::result::Result<T, AuthError>;
