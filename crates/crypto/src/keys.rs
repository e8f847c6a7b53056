//! Ed25519 actor identities.
//!
//! The secret half of a [`KeyPair`] is handed to the actor exactly once (at
//! KYC time) and never persisted by the service. Its `Debug` output is
//! redacted so it cannot end up in logs by accident.

use core::str::FromStr;

use ed25519_dalek::{Signer as _, SigningKey, VerifyingKey};
use rand_core::{OsRng, RngCore as _};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use zeroize::Zeroize as _;

use crate::digest::Sha256Digest;
use crate::error::CryptoError;
use crate::signature::Signature;

/// Ed25519 signing key (32-byte seed).
#[derive(Clone)]
pub struct SecretKey(SigningKey);

impl SecretKey {
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self(SigningKey::from_bytes(seed))
    }

    /// Parse a 64-character hex seed, as handed out by [`KeyPair::generate`].
    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let seed = crate::decode_hex_array::<32>(input, "private key")?;
        Ok(Self::from_seed(&seed))
    }

    /// Hex encoding of the seed. This is the only way key material leaves
    /// the type.
    pub fn expose_hex(&self) -> String {
        hex::encode(self.0.to_bytes())
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey(self.0.verifying_key())
    }

    /// Sign the raw 32 bytes of `digest`.
    pub fn sign(&self, digest: &Sha256Digest) -> Signature {
        Signature::from_dalek(self.0.sign(digest.as_bytes()))
    }
}

impl core::fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SecretKey")
            .field("public_key", &self.public_key())
            .finish_non_exhaustive()
    }
}

/// Ed25519 verifying key, rendered as 64 lowercase hex characters.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PublicKey(VerifyingKey);

impl PublicKey {
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self, CryptoError> {
        VerifyingKey::from_bytes(bytes)
            .map(Self)
            .map_err(|e| CryptoError::InvalidPublicKey(e.to_string()))
    }

    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let bytes = crate::decode_hex_array::<32>(input, "public key")?;
        Self::from_bytes(&bytes)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0.as_bytes())
    }

    /// Check `signature` over the raw bytes of `digest`.
    ///
    /// Uses strict verification (rejects small-order keys and
    /// non-canonical signatures).
    pub fn verify(&self, digest: &Sha256Digest, signature: &Signature) -> Result<(), CryptoError> {
        self.0
            .verify_strict(digest.as_bytes(), signature.as_dalek())
            .map_err(|_| CryptoError::BadSignature)
    }
}

impl core::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl core::fmt::Display for PublicKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for PublicKey {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

/// A freshly issued identity.
#[derive(Debug, Clone)]
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a new keypair from operating-system entropy.
    pub fn generate() -> Result<Self, CryptoError> {
        let mut seed = [0u8; 32];
        OsRng
            .try_fill_bytes(&mut seed)
            .map_err(|e| CryptoError::Entropy(e.to_string()))?;
        let pair = Self::from_seed(&seed);
        seed.zeroize();
        Ok(pair)
    }

    /// Deterministic keypair from a seed (tests, fixtures).
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        let secret = SecretKey::from_seed(seed);
        let public = secret.public_key();
        Self { secret, public }
    }

    pub fn secret(&self) -> &SecretKey {
        &self.secret
    }

    pub fn public(&self) -> PublicKey {
        self.public
    }

    pub fn into_parts(self) -> (SecretKey, PublicKey) {
        (self.secret, self.public)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = KeyPair::generate().unwrap();
        let b = KeyPair::generate().unwrap();
        assert_ne!(a.public(), b.public());
    }

    #[test]
    fn secret_hex_reloads_to_the_same_identity() {
        let pair = KeyPair::generate().unwrap();
        let hex_seed = pair.secret().expose_hex();
        assert_eq!(hex_seed.len(), 64);

        let reloaded = SecretKey::from_hex(&hex_seed).unwrap();
        assert_eq!(reloaded.public_key(), pair.public());
    }

    #[test]
    fn public_key_parses_from_its_hex() {
        let pair = KeyPair::from_seed(&[7u8; 32]);
        let parsed: PublicKey = pair.public().to_hex().parse().unwrap();
        assert_eq!(parsed, pair.public());
    }

    #[test]
    fn debug_does_not_leak_secret_material() {
        let pair = KeyPair::from_seed(&[42u8; 32]);
        let rendered = format!("{pair:?}");
        assert!(rendered.contains("public_key"));
        assert!(!rendered.contains(&pair.secret().expose_hex()));
        assert!(!rendered.contains("2a2a2a"));
    }

    #[test]
    fn wrong_length_private_key_is_rejected() {
        let err = SecretKey::from_hex("00ff").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidLength { what: "private key", .. }));
    }
}
