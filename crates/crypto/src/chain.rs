//! Hash-linking of successive records.
//!
//! Each record carries the digest of its own payload (`data_hash`), the
//! `chain_hash` of the record before it (`previous_hash`), and its own
//! `chain_hash = SHA-256(previous_hash || data_hash)`. The first record of a
//! chain links to an optional genesis digest; when there is none the chain
//! hash is `SHA-256(data_hash)`.
//!
//! Rewriting any record changes its chain hash, which breaks every record
//! after it.

use serde::{Deserialize, Serialize};

use crate::digest::Sha256Digest;

/// Compute the chain hash for `data` appended after `previous`.
pub fn link(previous: Option<&Sha256Digest>, data: &Sha256Digest) -> Sha256Digest {
    match previous {
        Some(prev) => {
            let mut buf = [0u8; 64];
            buf[..32].copy_from_slice(prev.as_bytes());
            buf[32..].copy_from_slice(data.as_bytes());
            Sha256Digest::hash_bytes(&buf)
        }
        None => Sha256Digest::hash_bytes(data.as_bytes()),
    }
}

/// The hashes stored alongside one chained record.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainLink {
    pub data_hash: Sha256Digest,
    pub previous_hash: Option<Sha256Digest>,
    pub chain_hash: Sha256Digest,
}

impl ChainLink {
    /// Build the link for `data_hash` appended after `previous`.
    pub fn extend(previous: Option<Sha256Digest>, data_hash: Sha256Digest) -> Self {
        Self {
            data_hash,
            previous_hash: previous,
            chain_hash: link(previous.as_ref(), &data_hash),
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainBreakKind {
    /// The stored data hash does not match the record's payload.
    DataHashMismatch,
    /// The record does not point at the chain hash of its predecessor.
    PreviousHashMismatch,
    /// The stored chain hash was not derived from the stored inputs.
    ChainHashMismatch,
}

/// First position at which a chain fails verification.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    /// Zero-based position of the offending record.
    pub index: usize,
    pub kind: ChainBreakKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainReport {
    pub intact: bool,
    /// Number of records checked successfully before the first break.
    pub verified_links: usize,
    pub first_break: Option<ChainBreak>,
}

/// Walk `links` in order, starting from `genesis`.
///
/// Each item pairs the stored link with the data hash recomputed from the
/// record's current payload. Verification stops at the first break.
pub fn verify_chain<I>(genesis: Option<Sha256Digest>, links: I) -> ChainReport
where
    I: IntoIterator<Item = (ChainLink, Sha256Digest)>,
{
    let mut expected_previous = genesis;
    let mut verified = 0usize;

    for (index, (stored, recomputed)) in links.into_iter().enumerate() {
        let kind = if stored.data_hash != recomputed {
            Some(ChainBreakKind::DataHashMismatch)
        } else if stored.previous_hash != expected_previous {
            Some(ChainBreakKind::PreviousHashMismatch)
        } else if stored.chain_hash != link(stored.previous_hash.as_ref(), &stored.data_hash) {
            Some(ChainBreakKind::ChainHashMismatch)
        } else {
            None
        };

        if let Some(kind) = kind {
            return ChainReport {
                intact: false,
                verified_links: verified,
                first_break: Some(ChainBreak { index, kind }),
            };
        }

        expected_previous = Some(stored.chain_hash);
        verified += 1;
    }

    ChainReport {
        intact: true,
        verified_links: verified,
        first_break: None,
    }
}
