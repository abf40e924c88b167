//! Legacy MONGODB-CR challenge/response authenticator.
//!
//! Predates SASL in the wire protocol: fetch a server nonce, answer with a
//! keyed digest, done. Kept for servers old enough to lack SCRAM. The
//! exchange also predates speculative authentication, so the handshake
//! command is left untouched.

use async_trait::async_trait;
use bson::{doc, Document};
use md5::{Digest, Md5};
use tracing::instrument;

use crate::authenticator::Authenticator;
use crate::connection::{AuthConnection, ConnectionDescription};
use crate::credential::Credential;
use crate::digest::{hex, password_digest};
use crate::error::{AuthError, Result};

/// Legacy nonce/digest authenticator.
#[derive(Debug)]
pub struct ChallengeResponseAuthenticator {
    username: String,
    password_digest: String,
    database: String,
}

impl ChallengeResponseAuthenticator {
    /// Wire-level mechanism name.
    pub const MECHANISM_NAME: &'static str = "MONGODB-CR";

    /// Create the authenticator, validating the credential shape.
    ///
    /// # Errors
    ///
    /// The credential must carry a username and a password.
    pub fn new(credential: &Credential) -> Result<Self> {
        let username = credential.username.clone().ok_or_else(|| {
            AuthError::Configuration(format!(
                "{} requires a username",
                Self::MECHANISM_NAME
            ))
        })?;
        let password = credential.password_evidence().ok_or_else(|| {
            AuthError::Configuration(format!(
                "{} requires a password credential",
                Self::MECHANISM_NAME
            ))
        })?;

        Ok(Self {
            password_digest: password_digest(&username, password),
            username,
            database: credential.source.clone(),
        })
    }
}

/// Compute the `key` field of the legacy `authenticate` command:
/// `md5hex(nonce + username + passwordDigest)`.
#[must_use]
pub fn authentication_key(nonce: &str, username: &str, password_digest: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(nonce.as_bytes());
    hasher.update(username.as_bytes());
    hasher.update(password_digest.as_bytes());
    hex(&hasher.finalize())
}

#[async_trait]
impl Authenticator for ChallengeResponseAuthenticator {
    fn name(&self) -> &str {
        Self::MECHANISM_NAME
    }

    async fn customize_initial_hello_command(&self, hello: Document) -> Result<Document> {
        Ok(hello)
    }

    #[instrument(skip_all, fields(mechanism = Self::MECHANISM_NAME))]
    async fn authenticate(
        &self,
        connection: &mut dyn AuthConnection,
        _description: &mut ConnectionDescription,
    ) -> Result<()> {
        let nonce_response = match connection
            .send_command(&self.database, doc! { "getnonce": 1 })
            .await
        {
            Ok(response) => response,
            Err(AuthError::Command(command_error)) => {
                return Err(AuthError::authentication_failed(
                    Self::MECHANISM_NAME,
                    &command_error,
                ));
            }
            Err(other) => return Err(other),
        };
        let nonce = nonce_response
            .get_str("nonce")
            .map_err(|_| {
                AuthError::Protocol("getnonce response is missing the nonce".to_string())
            })?
            .to_string();

        let command = doc! {
            "authenticate": 1,
            "user": &self.username,
            "nonce": &nonce,
            "key": authentication_key(&nonce, &self.username, &self.password_digest),
        };
        match connection.send_command(&self.database, command).await {
            Ok(_) => Ok(()),
            Err(AuthError::Command(command_error)) => Err(AuthError::authentication_failed(
                Self::MECHANISM_NAME,
                &command_error,
            )),
            Err(other) => Err(other),
        }
    }
}
