//! MONGODB-X509 certificate-identity authenticator.
//!
//! The identity is proven by the client certificate presented during the
//! TLS handshake, so the exchange is a single `authenticate` command against
//! `$external` - no step machine involved. The command embeds cleanly into
//! the connection handshake, and a successful speculative result makes the
//! dedicated round trip unnecessary.

use async_trait::async_trait;
use bson::{doc, Document};
use tracing::{debug, instrument};

use crate::authenticator::{Authenticator, SPECULATIVE_AUTHENTICATE_FIELD};
use crate::connection::{AuthConnection, ConnectionDescription};
use crate::credential::{Credential, Evidence, EXTERNAL_SOURCE};
use crate::error::{AuthError, Result};

/// Authenticates with the identity of the connection's client certificate.
#[derive(Debug)]
pub struct X509Authenticator {
    /// Certificate subject. Optional - servers derive the subject from the
    /// certificate itself when it is omitted.
    username: Option<String>,
}

impl X509Authenticator {
    /// Wire-level mechanism name.
    pub const MECHANISM_NAME: &'static str = "MONGODB-X509";

    /// Create the authenticator, validating the credential shape.
    ///
    /// # Errors
    ///
    /// The credential must target `$external` and carry no password.
    pub fn new(credential: &Credential) -> Result<Self> {
        if !credential.is_external() {
            return Err(AuthError::Configuration(format!(
                "{} authentication may only use the {} source",
                Self::MECHANISM_NAME,
                EXTERNAL_SOURCE
            )));
        }
        if matches!(credential.evidence, Evidence::Password(_)) {
            return Err(AuthError::Configuration(format!(
                "{} authentication does not take a password",
                Self::MECHANISM_NAME
            )));
        }
        Ok(Self {
            username: credential.username.clone(),
        })
    }

    fn authenticate_command(&self) -> Document {
        let mut command = doc! {
            "authenticate": 1,
            "mechanism": Self::MECHANISM_NAME,
        };
        if let Some(username) = &self.username {
            command.insert("user", username);
        }
        command
    }
}

#[async_trait]
impl Authenticator for X509Authenticator {
    fn name(&self) -> &str {
        Self::MECHANISM_NAME
    }

    async fn customize_initial_hello_command(&self, mut hello: Document) -> Result<Document> {
        let mut command = self.authenticate_command();
        command.insert("db", EXTERNAL_SOURCE);
        hello.insert(SPECULATIVE_AUTHENTICATE_FIELD, command);
        Ok(hello)
    }

    #[instrument(skip_all, fields(mechanism = Self::MECHANISM_NAME))]
    async fn authenticate(
        &self,
        connection: &mut dyn AuthConnection,
        description: &mut ConnectionDescription,
    ) -> Result<()> {
        if description.usable_speculative_result().is_some() {
            debug!("speculative handshake result accepted, skipping authenticate round trip");
            return Ok(());
        }

        match connection
            .send_command(EXTERNAL_SOURCE, self.authenticate_command())
            .await
        {
            Ok(_) => Ok(()),
            Err(AuthError::Command(command_error)) => Err(AuthError::authentication_failed(
                Self::MECHANISM_NAME,
                &command_error,
            )),
            Err(other) => Err(other),
        }
    }
}
