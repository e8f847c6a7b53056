//! Attestation primitives behind the traceability chain: digests, Ed25519 keys, hash links.
//!
//! - [`Sha256Digest`]: SHA-256 fingerprints of canonical JSON payloads
//! - [`KeyPair`], [`PublicKey`], [`SecretKey`]: Ed25519 actor identities
//! - [`Signature`]: detached signatures over a digest
//! - [`chain`]: hash-linking of successive records and chain verification
//!
//! Everything here is pure except [`KeyPair::generate`], which draws entropy
//! from the operating system.

pub mod chain;
pub mod digest;
pub mod error;
pub mod keys;
pub mod signature;

pub use chain::{ChainBreak, ChainBreakKind, ChainLink, ChainReport, verify_chain};
pub use digest::{Sha256Digest, canonical_json};
pub use error::CryptoError;
pub use keys::{KeyPair, PublicKey, SecretKey};
pub use signature::Signature;

/// Decode a fixed-length hex string, reporting `what` on failure.
pub(crate) fn decode_hex_array<const N: usize>(
    input: &str,
    what: &'static str,
) -> Result<[u8; N], CryptoError> {
    let trimmed = input.trim();
    if trimmed.len() != N * 2 {
        return Err(CryptoError::InvalidLength {
            what,
            expected: N * 2,
            found: trimmed.len(),
        });
    }
    let mut out = [0u8; N];
    hex::decode_to_slice(trimmed, &mut out).map_err(|e| CryptoError::InvalidHex {
        what,
        reason: e.to_string(),
    })?;
    Ok(out)
}
