//! The top-level authenticator contract.

use async_trait::async_trait;
use bson::Document;

use crate::connection::{AuthConnection, ConnectionDescription};
use crate::error::Result;

/// Field added to the handshake command when an authenticator can fold its
/// first exchange into the handshake round trip.
pub const SPECULATIVE_AUTHENTICATE_FIELD: &str = "speculativeAuthenticate";

/// Drives one complete authentication of one connection.
///
/// Implementations are constructed per connection attempt. The two methods
/// are called in order: `customize_initial_hello_command` while the
/// handshake command is being built, then `authenticate` once the connection
/// is open. Either call may be skipped - a handshake builder that does not
/// support speculative authentication goes straight to `authenticate`, and a
/// successful speculative exchange can make `authenticate` a no-op.
#[async_trait]
pub trait Authenticator: std::fmt::Debug + Send + Sync {
    /// Mechanism name this authenticator negotiates, for diagnostics.
    fn name(&self) -> &str;

    /// Augment the outgoing handshake command, typically by embedding a
    /// speculative first authentication payload. Pure with respect to the
    /// command value; no network I/O.
    async fn customize_initial_hello_command(&self, hello: Document) -> Result<Document>;

    /// Run the authentication to completion on the given connection.
    ///
    /// On failure the connection must be treated as unusable; partial
    /// authentication is never observable.
    async fn authenticate(
        &self,
        connection: &mut dyn AuthConnection,
        description: &mut ConnectionDescription,
    ) -> Result<()>;
}
