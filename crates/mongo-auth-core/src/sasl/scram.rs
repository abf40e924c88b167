//! SCRAM client mechanisms (RFC 5802 / RFC 7677).
//!
//! SCRAM (Salted Challenge Response Authentication Mechanism) authenticates
//! a password without transmitting it and lets the client verify the server
//! in return. MongoDB ships two variants that differ in the hash function
//! and in password preparation: SCRAM-SHA-1 salts the legacy
//! `md5("<user>:mongo:<password>")` digest, SCRAM-SHA-256 salts the password
//! as given.
//!
//! The exchange is three client-visible transitions:
//!
//! 1. client-first-message: `n,,n=<user>,r=<client-nonce>`
//! 2. client-final-message: `c=biws,r=<combined-nonce>,p=<proof>` computed
//!    from the server's salt/iteration challenge
//! 3. verification of the server signature in the server-final-message
//!
//! Key derivation is PBKDF2, which is expensive; a one-entry cache keyed by
//! (password, salt, iterations) skips it when a client reconnects with
//! unchanged credentials.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bson::{doc, Document};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::Rng;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::connection::ConnectionDescription;
use crate::digest::password_digest;
use crate::error::{AuthError, Result};
use crate::sasl::conversation::SaslConversation;
use crate::sasl::{SaslCompletionStep, SaslContext, SaslMechanism, SaslStep, StepTransition};

/// Client nonce length in bytes, before base64 encoding.
const NONCE_LENGTH: usize = 24;

/// Minimum acceptable PBKDF2 iteration count (RFC 7677).
const MIN_ITERATIONS: u32 = 4096;

/// GS2 header for "no channel binding, no authzid".
const GS2_HEADER: &str = "n,,";

/// base64("n,,") - the channel-binding field of the client-final-message.
const CHANNEL_BINDING: &str = "biws";

/// Hash-algorithm plug for the two SCRAM variants.
pub trait ScramVariant: Send + Sync + 'static {
    /// Wire-level mechanism name.
    fn name() -> &'static str;
    /// Compute HMAC.
    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8>;
    /// Compute the hash function H.
    fn h(data: &[u8]) -> Vec<u8>;
    /// Derive the salted password with PBKDF2.
    fn derive(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8>;
    /// MongoDB-specific password preparation.
    fn prepare_password(username: &str, password: &str) -> String;
}

/// SHA-1 variant. Key material is the legacy md5 password digest.
pub struct ScramSha1;

impl ScramVariant for ScramSha1 {
    fn name() -> &'static str {
        "SCRAM-SHA-1"
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha1>::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn h(data: &[u8]) -> Vec<u8> {
        Sha1::digest(data).to_vec()
    }

    fn derive(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut output = vec![0u8; 20];
        pbkdf2_hmac::<Sha1>(password, salt, iterations, &mut output);
        output
    }

    fn prepare_password(username: &str, password: &str) -> String {
        password_digest(username, password)
    }
}

/// SHA-256 variant (RFC 7677). The password is salted as given.
pub struct ScramSha256;

impl ScramVariant for ScramSha256 {
    fn name() -> &'static str {
        "SCRAM-SHA-256"
    }

    fn hmac(key: &[u8], data: &[u8]) -> Vec<u8> {
        let mut mac = Hmac::<Sha256>::new_from_slice(key).expect("HMAC can take key of any size");
        mac.update(data);
        mac.finalize().into_bytes().to_vec()
    }

    fn h(data: &[u8]) -> Vec<u8> {
        Sha256::digest(data).to_vec()
    }

    fn derive(password: &[u8], salt: &[u8], iterations: u32) -> Vec<u8> {
        let mut output = vec![0u8; 32];
        pbkdf2_hmac::<Sha256>(password, salt, iterations, &mut output);
        output
    }

    fn prepare_password(_username: &str, password: &str) -> String {
        password.to_string()
    }
}

/// One-entry salted-password cache shared across authentication attempts.
///
/// The cache is injected into mechanism instances by the registry factory
/// and synchronizes itself; mechanism instances do not outlive an attempt.
#[derive(Default)]
pub struct ScramCache {
    entry: Mutex<Option<CacheEntry>>,
}

struct CacheEntry {
    prepared_password: String,
    salt: Vec<u8>,
    iterations: u32,
    salted_password: Vec<u8>,
}

impl ScramCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, prepared_password: &str, salt: &[u8], iterations: u32) -> Option<Vec<u8>> {
        let entry = self.entry.lock().unwrap();
        entry
            .as_ref()
            .filter(|e| {
                e.prepared_password == prepared_password
                    && e.salt == salt
                    && e.iterations == iterations
            })
            .map(|e| e.salted_password.clone())
    }

    fn store(&self, prepared_password: &str, salt: &[u8], iterations: u32, salted: &[u8]) {
        *self.entry.lock().unwrap() = Some(CacheEntry {
            prepared_password: prepared_password.to_string(),
            salt: salt.to_vec(),
            iterations,
            salted_password: salted.to_vec(),
        });
    }

    /// Drop the cached derivation.
    pub fn invalidate(&self) {
        *self.entry.lock().unwrap() = None;
    }
}

/// SCRAM client mechanism, generic over the hash variant.
pub struct ScramMechanism<H: ScramVariant> {
    username: String,
    prepared_password: String,
    database: String,
    cache: Arc<ScramCache>,
    _variant: PhantomData<fn() -> H>,
}

impl<H: ScramVariant> std::fmt::Debug for ScramMechanism<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScramMechanism")
            .field("name", &H::name())
            .field("username", &self.username)
            .field("database", &self.database)
            .finish_non_exhaustive()
    }
}

impl<H: ScramVariant> ScramMechanism<H> {
    /// Construct the mechanism from an authentication context.
    ///
    /// # Errors
    ///
    /// Fails fast when the credential lacks a username or password.
    pub fn from_context(context: &SaslContext<'_>, cache: Arc<ScramCache>) -> Result<Self> {
        let username = context.credential.username.clone().ok_or_else(|| {
            AuthError::Configuration(format!("{} requires a username", H::name()))
        })?;
        let password = context.credential.password_evidence().ok_or_else(|| {
            AuthError::Configuration(format!("{} requires a password credential", H::name()))
        })?;

        Ok(Self {
            prepared_password: H::prepare_password(&username, password),
            username,
            database: context.credential.source.clone(),
            cache,
            _variant: PhantomData,
        })
    }

    fn first_step(&self) -> Box<dyn SaslStep> {
        Box::new(ClientFirstStep::<H>::new(
            self.username.clone(),
            self.prepared_password.clone(),
            Arc::clone(&self.cache),
        ))
    }
}

#[async_trait]
impl<H: ScramVariant> SaslMechanism for ScramMechanism<H> {
    fn name(&self) -> &'static str {
        H::name()
    }

    fn database_name(&self) -> &str {
        &self.database
    }

    async fn initialize(
        &self,
        _conversation: &mut SaslConversation,
        _description: &ConnectionDescription,
    ) -> Result<Box<dyn SaslStep>> {
        Ok(self.first_step())
    }

    fn create_speculative_step(&self) -> Option<Box<dyn SaslStep>> {
        // SCRAM needs nothing from the server to open, so the first round
        // trip can ride along with the handshake.
        Some(self.first_step())
    }

    fn customize_sasl_start_command(&self, mut command: Document) -> Document {
        // Asks servers that support it to fold the trailing empty exchange
        // into the server-final response.
        command.insert("options", doc! { "skipEmptyExchange": true });
        command
    }

    fn on_reauthentication_required(&self) {
        self.cache.invalidate();
    }
}

/// Produces the client-first-message.
struct ClientFirstStep<H: ScramVariant> {
    username: String,
    prepared_password: String,
    cache: Arc<ScramCache>,
    client_nonce: String,
    _variant: PhantomData<fn() -> H>,
}

impl<H: ScramVariant> ClientFirstStep<H> {
    fn new(username: String, prepared_password: String, cache: Arc<ScramCache>) -> Self {
        let nonce: [u8; NONCE_LENGTH] = rand::thread_rng().gen();
        Self::with_nonce(username, prepared_password, cache, BASE64.encode(nonce))
    }

    fn with_nonce(
        username: String,
        prepared_password: String,
        cache: Arc<ScramCache>,
        client_nonce: String,
    ) -> Self {
        Self {
            username,
            prepared_password,
            cache,
            client_nonce,
            _variant: PhantomData,
        }
    }
}

#[async_trait]
impl<H: ScramVariant> SaslStep for ClientFirstStep<H> {
    async fn execute(
        self: Box<Self>,
        _conversation: &mut SaslConversation,
        _server_payload: Option<&[u8]>,
    ) -> Result<StepTransition> {
        let client_first_bare = format!(
            "n={},r={}",
            sasl_escape_username(&self.username),
            self.client_nonce
        );
        let client_first = format!("{GS2_HEADER}{client_first_bare}");

        let next = ClientFinalStep::<H> {
            prepared_password: self.prepared_password,
            cache: self.cache,
            client_nonce: self.client_nonce,
            client_first_bare,
            _variant: PhantomData,
        };
        Ok(StepTransition::send(
            client_first.into_bytes(),
            Box::new(next),
        ))
    }
}

/// Consumes the server-first-message and produces the client proof.
struct ClientFinalStep<H: ScramVariant> {
    prepared_password: String,
    cache: Arc<ScramCache>,
    client_nonce: String,
    client_first_bare: String,
    _variant: PhantomData<fn() -> H>,
}

#[async_trait]
impl<H: ScramVariant> SaslStep for ClientFinalStep<H> {
    async fn execute(
        self: Box<Self>,
        _conversation: &mut SaslConversation,
        server_payload: Option<&[u8]>,
    ) -> Result<StepTransition> {
        let server_first = utf8_payload::<H>(server_payload)?;
        let (combined_nonce, salt, iterations) = parse_server_first::<H>(&server_first)?;

        if !combined_nonce.starts_with(&self.client_nonce) {
            return Err(scram_error::<H>(
                "server nonce does not extend the client nonce",
            ));
        }
        if iterations < MIN_ITERATIONS {
            return Err(scram_error::<H>(&format!(
                "iteration count {iterations} is below the minimum of {MIN_ITERATIONS}"
            )));
        }

        let salted_password = match self.cache.get(&self.prepared_password, &salt, iterations) {
            Some(cached) => cached,
            None => {
                let derived = H::derive(self.prepared_password.as_bytes(), &salt, iterations);
                self.cache
                    .store(&self.prepared_password, &salt, iterations, &derived);
                derived
            }
        };

        let client_final_without_proof = format!("c={CHANNEL_BINDING},r={combined_nonce}");
        let auth_message = format!(
            "{},{},{}",
            self.client_first_bare, server_first, client_final_without_proof
        );

        let client_key = H::hmac(&salted_password, b"Client Key");
        let stored_key = H::h(&client_key);
        let client_signature = H::hmac(&stored_key, auth_message.as_bytes());
        let proof = xor_bytes(&client_key, &client_signature);

        let client_final = format!("{client_final_without_proof},p={}", BASE64.encode(proof));
        debug!(mechanism = H::name(), iterations, "computed client proof");

        let next = ServerFinalStep::<H> {
            salted_password,
            auth_message,
            _variant: PhantomData,
        };
        Ok(StepTransition::send(
            client_final.into_bytes(),
            Box::new(next),
        ))
    }
}

/// Verifies the server signature; a purely local check that proves the
/// server also knows the password.
struct ServerFinalStep<H: ScramVariant> {
    salted_password: Vec<u8>,
    auth_message: String,
    _variant: PhantomData<fn() -> H>,
}

#[async_trait]
impl<H: ScramVariant> SaslStep for ServerFinalStep<H> {
    async fn execute(
        self: Box<Self>,
        _conversation: &mut SaslConversation,
        server_payload: Option<&[u8]>,
    ) -> Result<StepTransition> {
        let server_final = utf8_payload::<H>(server_payload)?;

        if let Some(error) = server_final.split(',').find_map(|p| p.strip_prefix("e=")) {
            return Err(scram_error::<H>(&format!("server rejected proof: {error}")));
        }

        let verifier = server_final
            .split(',')
            .find_map(|p| p.strip_prefix("v="))
            .ok_or_else(|| scram_error::<H>("server-final-message is missing the signature"))?;
        let server_signature = BASE64
            .decode(verifier.trim().as_bytes())
            .map_err(|e| scram_error::<H>(&format!("invalid server signature base64: {e}")))?;

        let server_key = H::hmac(&self.salted_password, b"Server Key");
        let expected = H::hmac(&server_key, self.auth_message.as_bytes());

        if !constant_time_eq(&server_signature, &expected) {
            return Err(scram_error::<H>(
                "server signature mismatch: server may not know the password",
            ));
        }

        // Anything the server sends past this point is a protocol violation,
        // except the empty exchange older servers need to finish with.
        Ok(StepTransition::send(
            Vec::new(),
            Box::new(SaslCompletionStep),
        ))
    }
}

/// SASL-escape a username per RFC 5802: `=` as `=3D`, `,` as `=2C`.
fn sasl_escape_username(username: &str) -> String {
    username.replace('=', "=3D").replace(',', "=2C")
}

fn utf8_payload<H: ScramVariant>(payload: Option<&[u8]>) -> Result<String> {
    let bytes =
        payload.ok_or_else(|| scram_error::<H>("expected a server challenge, got none"))?;
    String::from_utf8(bytes.to_vec())
        .map_err(|_| scram_error::<H>("server challenge is not valid UTF-8"))
}

/// Parse the server-first-message into (combined nonce, salt, iterations).
fn parse_server_first<H: ScramVariant>(message: &str) -> Result<(String, Vec<u8>, u32)> {
    let mut combined_nonce = None;
    let mut salt = None;
    let mut iterations = None;

    for part in message.split(',') {
        if let Some(value) = part.strip_prefix("r=") {
            combined_nonce = Some(value.to_string());
        } else if let Some(value) = part.strip_prefix("s=") {
            salt = Some(
                BASE64
                    .decode(value)
                    .map_err(|e| scram_error::<H>(&format!("invalid salt base64: {e}")))?,
            );
        } else if let Some(value) = part.strip_prefix("i=") {
            iterations = Some(
                value
                    .parse::<u32>()
                    .map_err(|_| scram_error::<H>("invalid iteration count"))?,
            );
        }
    }

    Ok((
        combined_nonce
            .ok_or_else(|| scram_error::<H>("server-first-message is missing the nonce (r=)"))?,
        salt.ok_or_else(|| scram_error::<H>("server-first-message is missing the salt (s=)"))?,
        iterations.ok_or_else(|| {
            scram_error::<H>("server-first-message is missing the iteration count (i=)")
        })?,
    ))
}

fn scram_error<H: ScramVariant>(message: &str) -> AuthError {
    AuthError::AuthenticationFailed {
        mechanism: H::name().to_string(),
        message: message.to_string(),
    }
}

/// XOR two byte slices of equal length.
fn xor_bytes(a: &[u8], b: &[u8]) -> Vec<u8> {
    debug_assert_eq!(a.len(), b.len(), "XOR operands must have equal length");
    a.iter().zip(b.iter()).map(|(x, y)| x ^ y).collect()
}

/// Constant-time byte slice comparison, to keep the signature check free of
/// timing side channels.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter()
        .zip(b.iter())
        .fold(0u8, |acc, (x, y)| acc | (x ^ y))
        == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Credential;
    use std::collections::HashMap;

    fn mechanism<H: ScramVariant>(username: &str, password: &str) -> ScramMechanism<H> {
        let credential = Credential::password("admin", username, password);
        let properties = HashMap::new();
        let context = SaslContext {
            mechanism_name: H::name(),
            endpoint: "db.example.com:27017",
            credential: &credential,
            properties: &properties,
        };
        ScramMechanism::from_context(&context, Arc::new(ScramCache::new())).unwrap()
    }

    fn conversation() -> SaslConversation {
        SaslConversation::new(1, "db.example.com:27017")
    }

    fn first_step_with_nonce<H: ScramVariant>(
        username: &str,
        password: &str,
        nonce: &str,
        cache: Arc<ScramCache>,
    ) -> Box<dyn SaslStep> {
        Box::new(ClientFirstStep::<H>::with_nonce(
            username.to_string(),
            H::prepare_password(username, password),
            cache,
            nonce.to_string(),
        ))
    }

    // ==================== RFC exchange vectors ====================

    /// The published RFC 7677 example exchange, end to end through the step
    /// chain (SCRAM-SHA-256 uses the password as given, so the vector
    /// applies directly).
    #[tokio::test]
    async fn test_sha256_rfc7677_vector() {
        let mut conversation = conversation();
        let step = first_step_with_nonce::<ScramSha256>(
            "user",
            "pencil",
            "rOprNGfwEbeRWgbNEkqO",
            Arc::new(ScramCache::new()),
        );

        let t1 = step.execute(&mut conversation, None).await.unwrap();
        assert_eq!(
            t1.to_send.as_deref(),
            Some("n,,n=user,r=rOprNGfwEbeRWgbNEkqO".as_bytes())
        );

        let server_first = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                            s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let t2 = t1
            .next
            .unwrap()
            .execute(&mut conversation, Some(server_first.as_bytes()))
            .await
            .unwrap();
        assert_eq!(
            t2.to_send.as_deref(),
            Some(
                "c=biws,r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                 p=dHzbZapWIk4jUhN+Ute9ytag9zjfMHgsqmmiz7AndVQ="
                    .as_bytes()
            )
        );

        let server_final = "v=6rriTRBi23WpRR/wtup+mMhUZUn/dB5nLTJRsjl95G4=";
        let t3 = t2
            .next
            .unwrap()
            .execute(&mut conversation, Some(server_final.as_bytes()))
            .await
            .unwrap();
        assert_eq!(t3.to_send.as_deref(), Some(&[][..]));
        assert!(t3.next.is_some());
    }

    /// The RFC 5802 example, exercised at the primitive level because the
    /// mechanism's SHA-1 password preparation (md5 digest) diverges from the
    /// RFC's raw password.
    #[test]
    fn test_sha1_rfc5802_vector() {
        let salt = BASE64.decode("QSXCR+Q6sek8bf92").unwrap();
        let salted_password = ScramSha1::derive(b"pencil", &salt, 4096);

        let auth_message = "n=user,r=fyko+d2lbbFgONRv9qkxdawL,\
                            r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j,s=QSXCR+Q6sek8bf92,i=4096,\
                            c=biws,r=fyko+d2lbbFgONRv9qkxdawL3rfcNHYJY1ZVvWVs7j";

        let client_key = ScramSha1::hmac(&salted_password, b"Client Key");
        let stored_key = ScramSha1::h(&client_key);
        let client_signature = ScramSha1::hmac(&stored_key, auth_message.as_bytes());
        let proof = xor_bytes(&client_key, &client_signature);
        assert_eq!(BASE64.encode(&proof), "v0X8v3Bz2T0CJGbJQyF0X+HI4Ts=");

        let server_key = ScramSha1::hmac(&salted_password, b"Server Key");
        let server_signature = ScramSha1::hmac(&server_key, auth_message.as_bytes());
        assert_eq!(
            BASE64.encode(&server_signature),
            "rmF9pqV8S7suAoZWja4dJRkFsKQ="
        );
    }

    // ==================== step failure cases ====================

    #[tokio::test]
    async fn test_rejects_nonce_that_does_not_extend_client_nonce() {
        let mut conversation = conversation();
        let step = first_step_with_nonce::<ScramSha256>(
            "user",
            "pencil",
            "clientnonce",
            Arc::new(ScramCache::new()),
        );
        let t1 = step.execute(&mut conversation, None).await.unwrap();

        let server_first = "r=unrelatednonce,s=c2FsdA==,i=4096";
        let err = t1
            .next
            .unwrap()
            .execute(&mut conversation, Some(server_first.as_bytes()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("client nonce"));
    }

    #[tokio::test]
    async fn test_rejects_low_iteration_count() {
        let mut conversation = conversation();
        let step = first_step_with_nonce::<ScramSha256>(
            "user",
            "pencil",
            "abc",
            Arc::new(ScramCache::new()),
        );
        let t1 = step.execute(&mut conversation, None).await.unwrap();

        let server_first = "r=abcdef,s=c2FsdA==,i=1024";
        let err = t1
            .next
            .unwrap()
            .execute(&mut conversation, Some(server_first.as_bytes()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("iteration count"));
    }

    #[tokio::test]
    async fn test_rejects_tampered_server_signature() {
        let mut conversation = conversation();
        let step = first_step_with_nonce::<ScramSha256>(
            "user",
            "pencil",
            "rOprNGfwEbeRWgbNEkqO",
            Arc::new(ScramCache::new()),
        );
        let t1 = step.execute(&mut conversation, None).await.unwrap();
        let server_first = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                            s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let t2 = t1
            .next
            .unwrap()
            .execute(&mut conversation, Some(server_first.as_bytes()))
            .await
            .unwrap();

        let err = t2
            .next
            .unwrap()
            .execute(
                &mut conversation,
                Some(b"v=AAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAAA=".as_slice()),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("signature mismatch"));
    }

    #[tokio::test]
    async fn test_surfaces_server_side_error_field() {
        let mut conversation = conversation();
        let step = first_step_with_nonce::<ScramSha256>(
            "user",
            "pencil",
            "rOprNGfwEbeRWgbNEkqO",
            Arc::new(ScramCache::new()),
        );
        let t1 = step.execute(&mut conversation, None).await.unwrap();
        let server_first = "r=rOprNGfwEbeRWgbNEkqO%hvYDpWUa2RaTCAfuxFIlj)hNlF$k0,\
                            s=W22ZaJ0SNY7soEsUEjb6gQ==,i=4096";
        let t2 = t1
            .next
            .unwrap()
            .execute(&mut conversation, Some(server_first.as_bytes()))
            .await
            .unwrap();

        let err = t2
            .next
            .unwrap()
            .execute(&mut conversation, Some(b"e=invalid-proof".as_slice()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("invalid-proof"));
    }

    // ==================== parsing ====================

    #[test]
    fn test_parse_server_first_field_order_irrelevant() {
        let (nonce, salt, iterations) =
            parse_server_first::<ScramSha256>("i=4096,s=c2FsdA==,r=xyz").unwrap();
        assert_eq!(nonce, "xyz");
        assert_eq!(salt, b"salt");
        assert_eq!(iterations, 4096);
    }

    #[test]
    fn test_parse_server_first_ignores_extensions() {
        let result = parse_server_first::<ScramSha256>("r=n,s=c2FsdA==,i=4096,x=future");
        assert!(result.is_ok());
    }

    #[test]
    fn test_parse_server_first_missing_fields() {
        for (message, needle) in [
            ("s=c2FsdA==,i=4096", "nonce"),
            ("r=n,i=4096", "salt"),
            ("r=n,s=c2FsdA==", "iteration"),
            ("r=n,s=c2FsdA==,i=soon", "iteration"),
            ("r=n,s=!!!,i=4096", "base64"),
        ] {
            let err = parse_server_first::<ScramSha256>(message).unwrap_err();
            assert!(
                err.to_string().contains(needle),
                "{message}: {err}"
            );
        }
    }

    #[test]
    fn test_escape_username() {
        assert_eq!(sasl_escape_username("a=b,c"), "a=3Db=2Cc");
        assert_eq!(sasl_escape_username("plain_user"), "plain_user");
    }

    // ==================== mechanism surface ====================

    #[test]
    fn test_customize_start_command_requests_skip_empty_exchange() {
        let mechanism = mechanism::<ScramSha256>("user", "pencil");
        let command = mechanism.customize_sasl_start_command(doc! { "saslStart": 1 });
        assert_eq!(
            command.get_document("options").unwrap(),
            &doc! { "skipEmptyExchange": true }
        );
    }

    #[test]
    fn test_mechanism_requires_username_and_password() {
        let credential = Credential::external(None);
        let properties = HashMap::new();
        let context = SaslContext {
            mechanism_name: "SCRAM-SHA-256",
            endpoint: "",
            credential: &credential,
            properties: &properties,
        };
        let err = ScramMechanism::<ScramSha256>::from_context(&context, Arc::new(ScramCache::new()))
            .unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_speculative_step_is_available() {
        let mechanism = mechanism::<ScramSha1>("user", "pencil");
        assert!(mechanism.create_speculative_step().is_some());
    }

    // ==================== cache ====================

    #[test]
    fn test_cache_round_trip_and_invalidation() {
        let cache = ScramCache::new();
        assert!(cache.get("prepared", b"salt", 4096).is_none());

        cache.store("prepared", b"salt", 4096, b"derived");
        assert_eq!(cache.get("prepared", b"salt", 4096).unwrap(), b"derived");

        // Any key component change misses.
        assert!(cache.get("other", b"salt", 4096).is_none());
        assert!(cache.get("prepared", b"pepper", 4096).is_none());
        assert!(cache.get("prepared", b"salt", 8192).is_none());

        cache.invalidate();
        assert!(cache.get("prepared", b"salt", 4096).is_none());
    }

    #[tokio::test]
    async fn test_first_attempt_populates_cache_for_reuse() {
        let cache = Arc::new(ScramCache::new());
        let server_first = "r=nonceA-server,s=c2FsdA==,i=4096";

        // First attempt populates the cache.
        let mut conversation = conversation();
        let step = first_step_with_nonce::<ScramSha256>(
            "user",
            "pencil",
            "nonceA",
            Arc::clone(&cache),
        );
        let t1 = step.execute(&mut conversation, None).await.unwrap();
        t1.next
            .unwrap()
            .execute(&mut conversation, Some(server_first.as_bytes()))
            .await
            .unwrap();

        let cached = cache
            .get(&ScramSha256::prepare_password("user", "pencil"), b"salt", 4096)
            .expect("first attempt should populate the cache");
        assert_eq!(cached, ScramSha256::derive(b"pencil", b"salt", 4096));
    }

    #[test]
    fn test_on_reauthentication_required_invalidates_cache() {
        let credential = Credential::password("admin", "user", "pencil");
        let properties = HashMap::new();
        let context = SaslContext {
            mechanism_name: "SCRAM-SHA-256",
            endpoint: "",
            credential: &credential,
            properties: &properties,
        };
        let cache = Arc::new(ScramCache::new());
        cache.store("pencil", b"salt", 4096, b"derived");

        let mechanism =
            ScramMechanism::<ScramSha256>::from_context(&context, Arc::clone(&cache)).unwrap();
        mechanism.on_reauthentication_required();
        assert!(cache.get("pencil", b"salt", 4096).is_none());
    }

    // ==================== helpers ====================

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(constant_time_eq(&[], &[]));
        assert!(!constant_time_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!constant_time_eq(&[1, 2], &[1, 2, 3]));
    }

    #[test]
    fn test_xor_bytes() {
        assert_eq!(xor_bytes(&[0xFF, 0x00], &[0x0F, 0xF0]), vec![0xF0, 0xF0]);
    }

    #[test]
    fn test_sha1_prepares_password_via_md5_digest() {
        let prepared = ScramSha1::prepare_password("user", "pencil");
        assert_eq!(prepared.len(), 32);
        assert_ne!(prepared, "pencil");
        assert_eq!(
            ScramSha256::prepare_password("user", "pencil"),
            "pencil"
        );
    }
}
