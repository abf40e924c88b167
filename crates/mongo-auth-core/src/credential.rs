//! Credential and identity value objects.
//!
//! A [`Credential`] is an immutable description of who is authenticating and
//! with what evidence. It is created once per client configuration, never
//! mutated, and compared by value. Validation of the credential against a
//! concrete mechanism happens in the mechanism constructors, not here.

use std::fmt;

/// The source database that defers identity to an external authority
/// (client certificates, LDAP, and similar).
pub const EXTERNAL_SOURCE: &str = "$external";

/// Evidence supporting an identity claim.
#[derive(Clone, PartialEq, Eq)]
pub enum Evidence {
    /// A password supplied by the caller.
    Password(String),
    /// Identity is proven externally - e.g. by the client certificate
    /// presented during the TLS handshake or a token held elsewhere.
    External,
    /// No evidence; some mechanisms derive everything from the connection.
    None,
}

impl Evidence {
    /// Returns the password when this evidence is a password.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        match self {
            Evidence::Password(password) => Some(password),
            _ => None,
        }
    }
}

// Passwords never appear in Debug output; errors and traces derive from it.
impl fmt::Debug for Evidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Evidence::Password(_) => f.write_str("Password(<redacted>)"),
            Evidence::External => f.write_str("External"),
            Evidence::None => f.write_str("None"),
        }
    }
}

/// An immutable authentication identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// Source database (realm) the identity is defined in.
    pub source: String,
    /// Principal name. Optional - some mechanisms are anonymous or derive
    /// the principal from a client certificate.
    pub username: Option<String>,
    /// Evidence supporting the identity claim.
    pub evidence: Evidence,
}

impl Credential {
    /// Create a username/password credential against a source database.
    pub fn password(
        source: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            username: Some(username.into()),
            evidence: Evidence::Password(password.into()),
        }
    }

    /// Create an externally-evidenced credential (e.g. X.509).
    pub fn external(username: Option<String>) -> Self {
        Self {
            source: EXTERNAL_SOURCE.to_string(),
            username,
            evidence: Evidence::External,
        }
    }

    /// Returns the password when the evidence is a password.
    #[must_use]
    pub fn password_evidence(&self) -> Option<&str> {
        self.evidence.password()
    }

    /// Returns `true` if this credential targets the external source.
    #[must_use]
    pub fn is_external(&self) -> bool {
        self.source == EXTERNAL_SOURCE
    }
}
