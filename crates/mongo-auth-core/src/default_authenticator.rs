//! Mechanism negotiation for callers that did not pin a mechanism.
//!
//! The choice is made once per connection from the handshake response:
//! prefer the stronger SCRAM hash when the server advertises it, fall back
//! to SCRAM-SHA-1 otherwise - deliberately even when the advertised list
//! omits it, to stay compatible with servers that mis-report. Servers new
//! enough to negotiate but whose handshake carried no mechanism list are
//! asked explicitly with one extra hello round trip.
//!
//! At handshake time the negotiation outcome is unknown, so the speculative
//! payload is built for the strong-hash guess; if negotiation lands
//! elsewhere the speculative result is discarded and a fresh authenticator
//! runs the full conversation.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bson::{doc, Bson, Document};
use tracing::{debug, instrument};

use crate::authenticator::Authenticator;
use crate::connection::{AuthConnection, ConnectionDescription};
use crate::credential::Credential;
use crate::error::Result;
use crate::sasl::registry::SaslMechanismRegistry;
use crate::sasl::{SaslAuthenticator, SaslContext};

/// Default mechanism when the server offers nothing better.
const WEAK_DEFAULT_MECHANISM: &str = "SCRAM-SHA-1";

/// Preferred mechanism when advertised.
const STRONG_MECHANISM: &str = "SCRAM-SHA-256";

/// Chooses and runs a concrete mechanism based on server capabilities.
pub struct DefaultAuthenticator {
    credential: Credential,
    registry: Arc<SaslMechanismRegistry>,
    speculative: Mutex<Option<SaslAuthenticator>>,
}

impl std::fmt::Debug for DefaultAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultAuthenticator").finish_non_exhaustive()
    }
}

impl DefaultAuthenticator {
    /// Create a default authenticator for a credential.
    #[must_use]
    pub fn new(credential: Credential, registry: Arc<SaslMechanismRegistry>) -> Self {
        Self {
            credential,
            registry,
            speculative: Mutex::new(None),
        }
    }

    /// `<source>.<username>` as sent in the `saslSupportedMechs` hello field.
    fn supported_mechs_subject(&self) -> Option<String> {
        self.credential
            .username
            .as_ref()
            .map(|username| format!("{}.{}", self.credential.source, username))
    }

    fn build_sasl_authenticator(&self, mechanism_name: &str) -> Result<SaslAuthenticator> {
        let properties = HashMap::new();
        let context = SaslContext {
            mechanism_name,
            endpoint: "",
            credential: &self.credential,
            properties: &properties,
        };
        let mechanism = self.registry.create(mechanism_name, &context)?;
        Ok(SaslAuthenticator::new(mechanism))
    }
}

/// Apply the negotiation rule to an advertised mechanism list.
fn choose_mechanism(supported: Option<&[String]>) -> &'static str {
    match supported {
        Some(mechanisms) if mechanisms.iter().any(|m| m == STRONG_MECHANISM) => STRONG_MECHANISM,
        // The weak default is chosen even when it is absent from the list;
        // servers exist that advertise an incomplete set.
        _ => WEAK_DEFAULT_MECHANISM,
    }
}

fn extract_supported_mechs(response: &Document) -> Vec<String> {
    match response.get("saslSupportedMechs") {
        Some(Bson::Array(values)) => values
            .iter()
            .filter_map(Bson::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

#[async_trait]
impl Authenticator for DefaultAuthenticator {
    fn name(&self) -> &str {
        "DEFAULT"
    }

    async fn customize_initial_hello_command(&self, mut hello: Document) -> Result<Document> {
        let Some(subject) = self.supported_mechs_subject() else {
            return Ok(hello);
        };
        hello.insert("saslSupportedMechs", subject);

        // Guess the strong hash for the speculative payload; the guess only
        // costs a discarded handshake field when negotiation disagrees.
        if self.credential.password_evidence().is_some() {
            let speculative = self.build_sasl_authenticator(STRONG_MECHANISM)?;
            hello = speculative.customize_initial_hello_command(hello).await?;
            *self.speculative.lock().unwrap() = Some(speculative);
        }
        Ok(hello)
    }

    #[instrument(skip_all, fields(connection_id = description.connection_id))]
    async fn authenticate(
        &self,
        connection: &mut dyn AuthConnection,
        description: &mut ConnectionDescription,
    ) -> Result<()> {
        // Servers that can negotiate but whose handshake carried no list are
        // asked explicitly before deciding.
        if description.sasl_supported_mechs.is_none() && description.supports_sasl_negotiation() {
            if let Some(subject) = self.supported_mechs_subject() {
                let command = doc! { "hello": 1, "saslSupportedMechs": subject };
                let response = connection.send_command("admin", command).await?;
                description.sasl_supported_mechs = Some(extract_supported_mechs(&response));
                // That round trip settles the connection; any speculative
                // handshake result is stale now.
                description.settled = true;
            }
        }

        let chosen = choose_mechanism(description.sasl_supported_mechs.as_deref());
        debug!(mechanism = chosen, "negotiated authentication mechanism");

        let speculative = self.speculative.lock().unwrap().take();
        let authenticator = match speculative {
            Some(authenticator) if authenticator.name() == chosen => authenticator,
            _ => self.build_sasl_authenticator(chosen)?,
        };
        authenticator.authenticate(connection, description).await
    }
}
