//! Mechanism registry and authenticator construction.
//!
//! The registry maps mechanism names to factories producing configured
//! [`SaslMechanism`] instances. It is populated once at configuration time
//! and shared read-only behind an `Arc` afterwards, so concurrent lookups
//! need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use crate::authenticator::Authenticator;
use crate::challenge_response::ChallengeResponseAuthenticator;
use crate::credential::Credential;
use crate::default_authenticator::DefaultAuthenticator;
use crate::error::{AuthError, Result};
use crate::sasl::plain::PlainMechanism;
use crate::sasl::scram::{ScramCache, ScramMechanism, ScramSha1, ScramSha256};
use crate::sasl::{SaslAuthenticator, SaslContext, SaslMechanism};
use crate::x509::X509Authenticator;

/// Factory producing a configured mechanism from an attempt's context.
pub type MechanismFactory =
    Arc<dyn Fn(&SaslContext<'_>) -> Result<Box<dyn SaslMechanism>> + Send + Sync>;

/// Name-to-factory mapping for SASL mechanisms.
pub struct SaslMechanismRegistry {
    factories: HashMap<String, MechanismFactory>,
}

impl SaslMechanismRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            factories: HashMap::new(),
        }
    }

    /// Register a factory under a mechanism name. Registration happens at
    /// startup, before the registry is shared.
    pub fn register(&mut self, name: impl Into<String>, factory: MechanismFactory) {
        self.factories.insert(name.into().to_ascii_uppercase(), factory);
    }

    /// Returns `true` if a factory is registered under the name.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(&name.to_ascii_uppercase())
    }

    /// Registered mechanism names.
    #[must_use]
    pub fn mechanism_names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Resolve a mechanism name and context into a configured mechanism.
    ///
    /// # Errors
    ///
    /// [`AuthError::MechanismNotFound`] when no factory is registered, or
    /// whatever configuration error the factory reports.
    pub fn create(&self, name: &str, context: &SaslContext<'_>) -> Result<Box<dyn SaslMechanism>> {
        let factory = self
            .factories
            .get(&name.to_ascii_uppercase())
            .ok_or_else(|| AuthError::MechanismNotFound(name.to_string()))?;
        factory(context)
    }
}

impl Default for SaslMechanismRegistry {
    /// The built-in mechanisms. Each SCRAM factory owns a derived-key cache
    /// shared by every attempt made through this registry.
    fn default() -> Self {
        let mut registry = Self::empty();

        let sha1_cache = Arc::new(ScramCache::new());
        registry.register(
            "SCRAM-SHA-1",
            Arc::new(move |context: &SaslContext<'_>| {
                Ok(Box::new(ScramMechanism::<ScramSha1>::from_context(
                    context,
                    Arc::clone(&sha1_cache),
                )?) as Box<dyn SaslMechanism>)
            }),
        );

        let sha256_cache = Arc::new(ScramCache::new());
        registry.register(
            "SCRAM-SHA-256",
            Arc::new(move |context: &SaslContext<'_>| {
                Ok(Box::new(ScramMechanism::<ScramSha256>::from_context(
                    context,
                    Arc::clone(&sha256_cache),
                )?) as Box<dyn SaslMechanism>)
            }),
        );

        registry.register(
            "PLAIN",
            Arc::new(|context: &SaslContext<'_>| {
                Ok(Box::new(PlainMechanism::from_context(context)?) as Box<dyn SaslMechanism>)
            }),
        );

        registry
    }
}

/// Resolve a configured mechanism choice into a ready authenticator.
///
/// `None` defers the choice to server negotiation via
/// [`DefaultAuthenticator`]; the two non-SASL mechanisms are dispatched by
/// name; everything else is looked up in the registry.
///
/// # Errors
///
/// Configuration errors from the mechanism constructors, or
/// [`AuthError::MechanismNotFound`] for unknown names.
pub fn create_authenticator(
    registry: &Arc<SaslMechanismRegistry>,
    mechanism_name: Option<&str>,
    credential: &Credential,
    properties: &HashMap<String, String>,
) -> Result<Box<dyn Authenticator>> {
    let Some(name) = mechanism_name else {
        return Ok(Box::new(DefaultAuthenticator::new(
            credential.clone(),
            Arc::clone(registry),
        )));
    };

    match name.to_ascii_uppercase().as_str() {
        X509Authenticator::MECHANISM_NAME => {
            Ok(Box::new(X509Authenticator::new(credential)?))
        }
        ChallengeResponseAuthenticator::MECHANISM_NAME => {
            Ok(Box::new(ChallengeResponseAuthenticator::new(credential)?))
        }
        _ => {
            let context = SaslContext {
                mechanism_name: name,
                endpoint: "",
                credential,
                properties,
            };
            let mechanism = registry.create(name, &context)?;
            Ok(Box::new(SaslAuthenticator::new(mechanism)))
        }
    }
}
