//! Legacy MongoDB password digest.
//!
//! Both SCRAM-SHA-1 and the challenge/response authenticator derive their
//! key material from `md5("<username>:mongo:<password>")` rather than from
//! the raw password. SCRAM-SHA-256 does not use this preparation.

use md5::{Digest, Md5};

/// Lower-case hex encoding.
pub(crate) fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push_str(&format!("{byte:02x}"));
    }
    out
}

/// Compute the hex-encoded MongoDB password digest.
pub(crate) fn password_digest(username: &str, password: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(b":mongo:");
    hasher.update(password.as_bytes());
    hex(&hasher.finalize())
}
