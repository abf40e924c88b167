//! Connection-facing contracts consumed by the authenticators.
//!
//! The wire layer (framing, compression, TLS) lives outside this crate; the
//! authenticators only need a command round trip plus a snapshot of what the
//! handshake learned about the server. Dropping an in-flight `send_command`
//! future is the cancellation signal - implementations must not require a
//! further call to clean up.

use async_trait::async_trait;
use bson::Document;

use crate::error::Result;

/// First wire version that understands `saslSupportedMechs` negotiation
/// (and with it the stronger SCRAM hash).
pub const SASL_SUPPORTED_MECHS_WIRE_VERSION: i32 = 7;

/// A connection capable of executing command round trips.
///
/// One authentication attempt runs sequentially on one connection; the trait
/// therefore takes `&mut self` and implementations need no internal locking
/// for the command path.
#[async_trait]
pub trait AuthConnection: Send {
    /// Opaque connection identifier, used to bind conversation state (e.g.
    /// channel-binding material) to this specific connection.
    fn id(&self) -> i64;

    /// Remote endpoint in `host:port` form.
    fn endpoint(&self) -> &str;

    /// Execute a command against a database and return the server response.
    ///
    /// # Errors
    ///
    /// Server-rejected commands surface as [`AuthError::Command`]; transport
    /// failures as [`AuthError::Connection`].
    ///
    /// [`AuthError::Command`]: crate::error::AuthError::Command
    /// [`AuthError::Connection`]: crate::error::AuthError::Connection
    async fn send_command(&mut self, database: &str, command: Document) -> Result<Document>;
}

/// Capability snapshot taken from the connection handshake.
///
/// The default authenticator may enrich this snapshot (merging a negotiated
/// mechanism list), which is why authenticators receive it mutably.
#[derive(Debug, Clone)]
pub struct ConnectionDescription {
    /// Opaque connection identifier.
    pub connection_id: i64,
    /// Remote endpoint in `host:port` form.
    pub endpoint: String,
    /// Negotiated maximum wire version.
    pub max_wire_version: i32,
    /// Mechanisms the server advertised for the credential named in the
    /// handshake, if it advertised any.
    pub sasl_supported_mechs: Option<Vec<String>>,
    /// The `speculativeAuthenticate` reply embedded in the handshake
    /// response, when the server accepted the speculative payload.
    pub speculative_authenticate: Option<Document>,
    /// True once a non-handshake round trip has completed on the connection.
    /// A settled description can no longer seed authentication from the
    /// speculative handshake result.
    pub settled: bool,
}

impl ConnectionDescription {
    /// Create a description fresh from the handshake.
    #[must_use]
    pub fn new(connection_id: i64, endpoint: impl Into<String>, max_wire_version: i32) -> Self {
        Self {
            connection_id,
            endpoint: endpoint.into(),
            max_wire_version,
            sasl_supported_mechs: None,
            speculative_authenticate: None,
            settled: false,
        }
    }

    /// The speculative handshake result, if it is still usable: present and
    /// not invalidated by a prior real round trip.
    #[must_use]
    pub fn usable_speculative_result(&self) -> Option<&Document> {
        if self.settled {
            None
        } else {
            self.speculative_authenticate.as_ref()
        }
    }

    /// Whether the server version understands mechanism negotiation.
    #[must_use]
    pub fn supports_sasl_negotiation(&self) -> bool {
        self.max_wire_version >= SASL_SUPPORTED_MECHS_WIRE_VERSION
    }
}
