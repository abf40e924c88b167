//! Connection-authentication core for a MongoDB wire-protocol client driver.
//!
//! This library negotiates and executes credential-based authentication
//! against a server using exchangeable mechanisms, including the
//! handshake-time speculative optimization that folds the first exchange
//! into the connection handshake.
//!
//! # Architecture
//!
//! - [`credential`] - Immutable identity/evidence value objects
//! - [`connection`] - Contracts consumed from the wire layer
//! - [`sasl`] - Conversation engine: steps, conversation scope, the
//!   `saslStart`/`saslContinue` driver, mechanism registry, and the SCRAM
//!   and PLAIN mechanisms
//! - [`default_authenticator`] - Server-driven mechanism negotiation
//! - [`x509`], [`challenge_response`] - Fixed-shape non-SASL authenticators
//! - [`error`] - Domain error types
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use mongo_auth_core::{create_authenticator, Credential, SaslMechanismRegistry};
//!
//! let registry = Arc::new(SaslMechanismRegistry::default());
//! let credential = Credential::password("admin", "alice", "secret");
//! let authenticator = create_authenticator(&registry, None, &credential, &Default::default())?;
//!
//! // During handshake construction:
//! let hello = authenticator.customize_initial_hello_command(hello).await?;
//! // Once the connection is open:
//! authenticator.authenticate(&mut connection, &mut description).await?;
//! ```

#![forbid(unsafe_code)]

pub mod authenticator;
pub mod challenge_response;
pub mod connection;
pub mod credential;
pub mod default_authenticator;
pub mod error;
pub mod sasl;
pub mod x509;

mod digest;

/// Test utilities (mock connection, canned responses).
///
/// This module is only available when compiling tests or when the `testing`
/// feature is enabled.
#[cfg(any(test, feature = "testing"))]
pub mod testing;

// Re-export commonly used types
pub use authenticator::{Authenticator, SPECULATIVE_AUTHENTICATE_FIELD};
pub use challenge_response::ChallengeResponseAuthenticator;
pub use connection::{AuthConnection, ConnectionDescription, SASL_SUPPORTED_MECHS_WIRE_VERSION};
pub use credential::{Credential, Evidence, EXTERNAL_SOURCE};
pub use default_authenticator::DefaultAuthenticator;
pub use error::{AuthError, CommandError, Result, REAUTHENTICATION_REQUIRED_CODE};
pub use sasl::registry::create_authenticator;
pub use sasl::{
    SaslAuthenticator, SaslCompletionStep, SaslContext, SaslConversation, SaslMechanism,
    SaslMechanismRegistry, SaslStep, StepTransition,
};
pub use x509::X509Authenticator;
