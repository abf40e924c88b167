//! SASL/PLAIN client mechanism (RFC 4616).
//!
//! Used for proxy authentication against an external directory (LDAP). The
//! whole exchange is one message, `\0<user>\0<password>`, so the step chain
//! is a single producer followed by the completion guard. PLAIN never
//! speculates: the payload carries the raw password, and the mechanism is
//! only selected explicitly, never as a handshake-time guess.

use async_trait::async_trait;

use crate::connection::ConnectionDescription;
use crate::error::{AuthError, Result};
use crate::sasl::conversation::SaslConversation;
use crate::sasl::{SaslCompletionStep, SaslContext, SaslMechanism, SaslStep, StepTransition};

/// PLAIN client mechanism.
#[derive(Debug)]
pub struct PlainMechanism {
    username: String,
    password: String,
    database: String,
}

impl PlainMechanism {
    /// Wire-level mechanism name.
    pub const MECHANISM_NAME: &'static str = "PLAIN";

    /// Construct the mechanism from an authentication context.
    ///
    /// # Errors
    ///
    /// Fails fast when the credential lacks a username or password.
    pub fn from_context(context: &SaslContext<'_>) -> Result<Self> {
        let username = context
            .credential
            .username
            .clone()
            .ok_or_else(|| AuthError::Configuration("PLAIN requires a username".to_string()))?;
        let password = context
            .credential
            .password_evidence()
            .ok_or_else(|| {
                AuthError::Configuration("PLAIN requires a password credential".to_string())
            })?
            .to_string();

        Ok(Self {
            username,
            password,
            database: context.credential.source.clone(),
        })
    }
}

#[async_trait]
impl SaslMechanism for PlainMechanism {
    fn name(&self) -> &'static str {
        Self::MECHANISM_NAME
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn initialize(
        &self,
        _conversation: &mut SaslConversation,
        _description: &ConnectionDescription,
    ) -> Result<Box<dyn SaslStep>> {
        Ok(Box::new(PlainStep {
            auth_bytes: format!("\0{}\0{}", self.username, self.password).into_bytes(),
        }))
    }
}

/// The single PLAIN exchange.
struct PlainStep {
    auth_bytes: Vec<u8>,
}

#[async_trait]
impl SaslStep for PlainStep {
    async fn execute(
        self: Box<Self>,
        _conversation: &mut SaslConversation,
        _server_payload: Option<&[u8]>,
    ) -> Result<StepTransition> {
        Ok(StepTransition::send(
            self.auth_bytes,
            Box::new(SaslCompletionStep),
        ))
    }
}
