//! Scripted connection for integration testing.
//!
//! A lightweight stand-in for the wire layer that:
//! - Records every command sent, with its target database
//! - Returns pre-queued responses (or server errors) in order

use std::collections::VecDeque;

use async_trait::async_trait;
use bson::Document;

use crate::connection::AuthConnection;
use crate::error::{AuthError, CommandError, Result};

/// A recorded command round trip.
#[derive(Debug, Clone)]
pub struct SentCommand {
    /// Database the command was issued against.
    pub database: String,
    /// The command document.
    pub command: Document,
}

/// Scripted [`AuthConnection`] for tests.
pub struct MockConnection {
    id: i64,
    endpoint: String,
    responses: VecDeque<std::result::Result<Document, CommandError>>,
    sent: Vec<SentCommand>,
}

impl MockConnection {
    /// Create a mock connection with a fixed identity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_identity(1, "db.example.com:27017")
    }

    /// Create a mock connection with the given identity.
    #[must_use]
    pub fn with_identity(id: i64, endpoint: impl Into<String>) -> Self {
        Self {
            id,
            endpoint: endpoint.into(),
            responses: VecDeque::new(),
            sent: Vec::new(),
        }
    }

    /// Queue a successful response.
    pub fn enqueue_response(&mut self, response: Document) {
        self.responses.push_back(Ok(response));
    }

    /// Queue a server-reported command failure.
    pub fn enqueue_command_error(&mut self, error: CommandError) {
        self.responses.push_back(Err(error));
    }

    /// Commands sent so far, in order.
    #[must_use]
    pub fn sent(&self) -> &[SentCommand] {
        &self.sent
    }
}

impl Default for MockConnection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthConnection for MockConnection {
    fn id(&self) -> i64 {
        self.id
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    async fn send_command(&mut self, database: &str, command: Document) -> Result<Document> {
        self.sent.push(SentCommand {
            database: database.to_string(),
            command,
        });
        match self.responses.pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(error)) => Err(AuthError::Command(error)),
            None => Err(AuthError::Connection(
                "mock connection has no scripted response left".to_string(),
            )),
        }
    }
}
