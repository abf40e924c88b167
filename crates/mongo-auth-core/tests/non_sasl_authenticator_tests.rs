//! Integration tests for the fixed-shape (non-SASL) authenticators.

use bson::doc;
use md5::{Digest, Md5};
use mongo_auth_core::challenge_response::authentication_key;
use mongo_auth_core::testing::MockConnection;
use mongo_auth_core::{
    AuthError, Authenticator, ChallengeResponseAuthenticator, CommandError, ConnectionDescription,
    Credential, X509Authenticator,
};

fn description() -> ConnectionDescription {
    ConnectionDescription::new(1, "db.example.com:27017", 17)
}

fn md5_hex(input: &str) -> String {
    Md5::digest(input.as_bytes())
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

#[tokio::test]
async fn x509_sends_single_authenticate_command() {
    let authenticator =
        X509Authenticator::new(&Credential::external(Some("CN=alice".to_string()))).unwrap();

    let mut connection = MockConnection::new();
    connection.enqueue_response(doc! { "dbname": "$external", "user": "CN=alice", "ok": 1 });

    authenticator
        .authenticate(&mut connection, &mut description())
        .await
        .unwrap();

    let sent = connection.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].database, "$external");
    assert_eq!(
        sent[0].command,
        doc! { "authenticate": 1, "mechanism": "MONGODB-X509", "user": "CN=alice" }
    );
}

#[tokio::test]
async fn x509_skips_round_trip_after_successful_speculation() {
    let authenticator =
        X509Authenticator::new(&Credential::external(Some("CN=alice".to_string()))).unwrap();

    let mut description = description();
    description.speculative_authenticate =
        Some(doc! { "dbname": "$external", "user": "CN=alice", "ok": 1 });

    let mut connection = MockConnection::new();
    authenticator
        .authenticate(&mut connection, &mut description)
        .await
        .unwrap();
    assert!(connection.sent().is_empty());
}

#[tokio::test]
async fn x509_wraps_server_failures() {
    let authenticator = X509Authenticator::new(&Credential::external(None)).unwrap();

    let mut connection = MockConnection::new();
    connection.enqueue_command_error(CommandError::new(18, "no verified subject name"));

    let err = authenticator
        .authenticate(&mut connection, &mut description())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AuthenticationFailed { .. }));
    assert!(err.to_string().contains("MONGODB-X509"));
}

#[tokio::test]
async fn challenge_response_runs_nonce_then_digest() {
    let authenticator = ChallengeResponseAuthenticator::new(&Credential::password(
        "admin", "alice", "secret",
    ))
    .unwrap();

    let mut connection = MockConnection::new();
    connection.enqueue_response(doc! { "nonce": "7268c504683936e1", "ok": 1 });
    connection.enqueue_response(doc! { "ok": 1 });

    authenticator
        .authenticate(&mut connection, &mut description())
        .await
        .unwrap();

    let sent = connection.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].database, "admin");
    assert_eq!(sent[0].command, doc! { "getnonce": 1 });

    let expected_key = authentication_key(
        "7268c504683936e1",
        "alice",
        &md5_hex("alice:mongo:secret"),
    );
    assert_eq!(
        sent[1].command,
        doc! {
            "authenticate": 1,
            "user": "alice",
            "nonce": "7268c504683936e1",
            "key": expected_key,
        }
    );
}

#[tokio::test]
async fn challenge_response_requires_a_nonce() {
    let authenticator = ChallengeResponseAuthenticator::new(&Credential::password(
        "admin", "alice", "secret",
    ))
    .unwrap();

    let mut connection = MockConnection::new();
    connection.enqueue_response(doc! { "ok": 1 });

    let err = authenticator
        .authenticate(&mut connection, &mut description())
        .await
        .unwrap_err();
    assert!(err.is_protocol_violation());
}

#[tokio::test]
async fn challenge_response_wraps_rejected_digests() {
    let authenticator = ChallengeResponseAuthenticator::new(&Credential::password(
        "admin", "alice", "wrong",
    ))
    .unwrap();

    let mut connection = MockConnection::new();
    connection.enqueue_response(doc! { "nonce": "7268c504683936e1", "ok": 1 });
    connection.enqueue_command_error(CommandError::new(18, "auth fails"));

    let err = authenticator
        .authenticate(&mut connection, &mut description())
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::AuthenticationFailed { .. }));
    assert!(err.to_string().contains("MONGODB-CR"));
}
