//! Test utilities for driving authenticators without a server.
//!
//! This module is only available when compiling tests or when the `testing`
//! feature is enabled.

mod mock_connection;

pub use mock_connection::{MockConnection, SentCommand};

use bson::spec::BinarySubtype;
use bson::{doc, Binary, Document};

/// Build a SASL command response the way a server would shape it.
#[must_use]
pub fn sasl_response(conversation_id: i32, payload: &[u8], done: bool) -> Document {
    doc! {
        "conversationId": conversation_id,
        "payload": Binary { subtype: BinarySubtype::Generic, bytes: payload.to_vec() },
        "done": done,
        "ok": 1,
    }
}
