use core::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CryptoError;

/// Detached Ed25519 signature (64 bytes, 128 hex characters).
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct Signature(ed25519_dalek::Signature);

impl Signature {
    pub(crate) fn from_dalek(inner: ed25519_dalek::Signature) -> Self {
        Self(inner)
    }

    pub(crate) fn as_dalek(&self) -> &ed25519_dalek::Signature {
        &self.0
    }

    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self(ed25519_dalek::Signature::from_bytes(bytes))
    }

    pub fn to_bytes(&self) -> [u8; 64] {
        self.0.to_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_hex(input: &str) -> Result<Self, CryptoError> {
        let bytes = crate::decode_hex_array::<64>(input, "signature")?;
        Ok(Self::from_bytes(&bytes))
    }
}

impl core::fmt::Debug for Signature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Signature({})", self.to_hex())
    }
}

impl core::fmt::Display for Signature {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl FromStr for Signature {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::from_hex(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use crate::{KeyPair, Sha256Digest};

    use super::*;

    #[test]
    fn signature_verifies_against_its_own_key_only() {
        let signer = KeyPair::from_seed(&[1u8; 32]);
        let other = KeyPair::from_seed(&[2u8; 32]);
        let digest = Sha256Digest::hash_text("batch CP-9901");

        let sig = signer.secret().sign(&digest);
        assert!(signer.public().verify(&digest, &sig).is_ok());
        assert_eq!(other.public().verify(&digest, &sig), Err(CryptoError::BadSignature));
    }

    #[test]
    fn signature_does_not_cover_other_digests() {
        let signer = KeyPair::from_seed(&[3u8; 32]);
        let sig = signer.secret().sign(&Sha256Digest::hash_text("a"));
        assert!(signer.public().verify(&Sha256Digest::hash_text("b"), &sig).is_err());
    }

    #[test]
    fn ed25519_signatures_are_deterministic() {
        let signer = KeyPair::from_seed(&[4u8; 32]);
        let digest = Sha256Digest::hash_text("same");
        assert_eq!(signer.secret().sign(&digest), signer.secret().sign(&digest));
    }

    #[test]
    fn hex_form_reloads() {
        let signer = KeyPair::from_seed(&[5u8; 32]);
        let digest = Sha256Digest::hash_text("x");
        let sig = signer.secret().sign(&digest);
        let reloaded = Signature::from_hex(&sig.to_hex()).unwrap();
        assert!(signer.public().verify(&digest, &reloaded).is_ok());
    }
}
