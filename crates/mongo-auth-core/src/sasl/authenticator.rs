//! Conversation driver for SASL mechanisms.
//!
//! Runs the `saslStart`/`saslContinue` loop over a connection, threading
//! server payloads through the mechanism's step chain until the server
//! signals completion. Also owns the handshake-time speculative fast path:
//! the mechanism's first step can be executed locally while the handshake
//! command is being built, its payload embedded under
//! `speculativeAuthenticate`, and the continuation step replayed against the
//! handshake response instead of paying a dedicated round trip.

use std::sync::Mutex;

use async_trait::async_trait;
use bson::spec::BinarySubtype;
use bson::{doc, Binary, Bson, Document};
use tracing::{debug, instrument, warn};

use crate::authenticator::{Authenticator, SPECULATIVE_AUTHENTICATE_FIELD};
use crate::connection::{AuthConnection, ConnectionDescription};
use crate::error::{AuthError, Result};
use crate::sasl::conversation::SaslConversation;
use crate::sasl::{SaslMechanism, SaslStep};

/// Drives one SASL authentication of one connection.
///
/// Instances are built per connection attempt; the retained speculative
/// continuation step is consumed at most once, by the first `authenticate`
/// call after handshake customization.
pub struct SaslAuthenticator {
    mechanism: Box<dyn SaslMechanism>,
    speculative_continue_step: Mutex<Option<Box<dyn SaslStep>>>,
}

impl std::fmt::Debug for SaslAuthenticator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaslAuthenticator")
            .field("mechanism", &self.mechanism)
            .finish_non_exhaustive()
    }
}

impl SaslAuthenticator {
    /// Create an authenticator driving the given mechanism.
    #[must_use]
    pub fn new(mechanism: Box<dyn SaslMechanism>) -> Self {
        Self {
            mechanism,
            speculative_continue_step: Mutex::new(None),
        }
    }

    /// The mechanism this authenticator drives.
    #[must_use]
    pub fn mechanism(&self) -> &dyn SaslMechanism {
        self.mechanism.as_ref()
    }

    fn start_command(&self, payload: Vec<u8>) -> Document {
        let command = doc! {
            "saslStart": 1,
            "mechanism": self.mechanism.name(),
            "payload": Binary { subtype: BinarySubtype::Generic, bytes: payload },
        };
        self.mechanism.customize_sasl_start_command(command)
    }

    fn continue_command(conversation_id: i32, payload: Vec<u8>) -> Document {
        doc! {
            "saslContinue": 1,
            "conversationId": conversation_id,
            "payload": Binary { subtype: BinarySubtype::Generic, bytes: payload },
        }
    }
}

#[async_trait]
impl Authenticator for SaslAuthenticator {
    fn name(&self) -> &str {
        self.mechanism.name()
    }

    async fn customize_initial_hello_command(&self, mut hello: Document) -> Result<Document> {
        let Some(first_step) = self.mechanism.create_speculative_step() else {
            return Ok(hello);
        };

        // The speculative first step runs in its own short-lived scope; no
        // server input exists yet.
        let mut conversation = SaslConversation::speculative();
        let transition = first_step.execute(&mut conversation, None).await?;

        let mut start = self.start_command(transition.to_send.unwrap_or_default());
        start.insert("db", self.mechanism.database_name());
        hello.insert(SPECULATIVE_AUTHENTICATE_FIELD, start);

        *self.speculative_continue_step.lock().unwrap() = transition.next;
        debug!(
            mechanism = self.mechanism.name(),
            "embedded speculative authentication payload into handshake command"
        );
        Ok(hello)
    }

    #[instrument(
        skip_all,
        fields(
            mechanism = self.mechanism.name(),
            connection_id = description.connection_id,
        )
    )]
    async fn authenticate(
        &self,
        connection: &mut dyn AuthConnection,
        description: &mut ConnectionDescription,
    ) -> Result<()> {
        let mut conversation =
            SaslConversation::new(description.connection_id, description.endpoint.clone());

        let retained_step = self.speculative_continue_step.lock().unwrap().take();

        let mut current: Option<Box<dyn SaslStep>>;
        let mut last_payload: Option<Vec<u8>>;
        let mut conversation_id: Option<i32>;
        let mut server_done: bool;

        // The speculative handshake result is usable only on the first use
        // of the description and only when the server actually replied to
        // the embedded payload; otherwise the retained step is discarded and
        // the conversation starts fresh.
        match (description.usable_speculative_result(), retained_step) {
            (Some(result), Some(step)) => {
                let result = result.clone();
                debug!("continuing conversation from speculative handshake result");
                conversation_id = response_conversation_id(&result);
                server_done = response_done(&result);
                last_payload = Some(response_payload(&result)?);
                current = Some(step);
            }
            _ => {
                current = Some(
                    self.mechanism
                        .initialize(&mut conversation, description)
                        .await?,
                );
                last_payload = None;
                conversation_id = None;
                server_done = false;
            }
        }

        // Exactly one mechanism-substituted retry is accepted per attempt.
        let mut substitution_used = false;

        while let Some(step) = current.take() {
            let transition = step
                .execute(&mut conversation, last_payload.as_deref())
                .await?;

            let Some(payload) = transition.to_send else {
                // Purely local transition, e.g. verifying a server
                // signature; no round trip is consumed.
                current = transition.next;
                continue;
            };

            if payload.is_empty() && server_done {
                // The mechanism has nothing left to add and the server
                // already closed the negotiation.
                break;
            }

            let command = match conversation_id {
                Some(id) => Self::continue_command(id, payload),
                None => self.start_command(payload),
            };
            let database = self.mechanism.database_name().to_string();

            let response = match connection.send_command(&database, command).await {
                Ok(response) => response,
                Err(AuthError::Command(command_error)) => {
                    if !substitution_used {
                        if let Some(replacement) = self.mechanism.try_handle_authentication_error(
                            &command_error,
                            &mut conversation,
                            description,
                        )? {
                            warn!(
                                code = command_error.code,
                                "restarting SASL conversation after recoverable server error"
                            );
                            substitution_used = true;
                            conversation_id = None;
                            last_payload = None;
                            server_done = false;
                            current = Some(replacement);
                            continue;
                        }
                    }
                    return Err(AuthError::authentication_failed(
                        self.mechanism.name(),
                        &command_error,
                    ));
                }
                Err(other) => return Err(other),
            };

            if conversation_id.is_none() {
                conversation_id = response_conversation_id(&response);
            }
            server_done = response_done(&response);
            last_payload = Some(response_payload(&response)?);
            current = transition.next;
        }

        if !server_done {
            return Err(AuthError::Protocol(
                "the conversation ended before the server signaled completion".to_string(),
            ));
        }

        debug!("SASL authentication completed");
        Ok(())
    }
}

fn response_conversation_id(response: &Document) -> Option<i32> {
    match response.get("conversationId") {
        Some(Bson::Int32(id)) => Some(*id),
        Some(Bson::Int64(id)) => Some(*id as i32),
        Some(Bson::Double(id)) => Some(*id as i32),
        _ => None,
    }
}

fn response_done(response: &Document) -> bool {
    response.get_bool("done").unwrap_or(false)
}

fn response_payload(response: &Document) -> Result<Vec<u8>> {
    match response.get("payload") {
        Some(Bson::Binary(binary)) => Ok(binary.bytes.clone()),
        None => Ok(Vec::new()),
        Some(other) => Err(AuthError::Protocol(format!(
            "SASL response payload has unexpected type {:?}",
            other.element_type()
        ))),
    }
}
