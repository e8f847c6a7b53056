use thiserror::Error;

/// Failure parsing or checking attestation material.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid {what}: expected {expected} hex characters, found {found}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("invalid {what}: {reason}")]
    InvalidHex { what: &'static str, reason: String },

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("signature does not verify against the public key")]
    BadSignature,

    #[error("payload could not be serialized for hashing: {0}")]
    Serialization(String),

    #[error("system entropy unavailable: {0}")]
    Entropy(String),
}
