use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};

use clearpath_actors::ActorId;
use clearpath_core::{Aggregate, AggregateRoot, DomainError};
use clearpath_crypto::{ChainLink, ChainReport, PublicKey, Sha256Digest, Signature, verify_chain};
use clearpath_events::Event;
use clearpath_products::ProductId;

/// Digest of a passport entry's payload.
pub fn entry_data_hash(
    product_id: ProductId,
    event_type: &str,
    data: &JsonValue,
) -> Result<Sha256Digest, DomainError> {
    Sha256Digest::of_json(&json!({
        "product_id": product_id.to_string(),
        "event_type": event_type,
        "data": data,
    }))
    .map_err(|e| DomainError::invariant(e.to_string()))
}

/// A single recorded passport entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassportEntry {
    /// 1-based position in the passport.
    pub sequence: u64,
    pub event_type: String,
    pub actor_id: ActorId,
    pub location: Option<String>,
    pub data: JsonValue,
    pub link: ChainLink,
    pub signature: Option<Signature>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PassportVerification {
    pub product_id: ProductId,
    pub entries: usize,
    pub chain_intact: bool,
    pub chain: ChainReport,
    pub signed_entries: usize,
    /// Sequence numbers of signed entries whose signature does not verify.
    pub invalid_signatures: Vec<u64>,
    pub authentic: bool,
}

/// Aggregate root: Passport (one per product).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Passport {
    id: ProductId,
    entries: Vec<PassportEntry>,
    version: u64,
}

impl Passport {
    pub const AGGREGATE_TYPE: &'static str = "passport.passport";

    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            entries: Vec::new(),
            version: 0,
        }
    }

    pub fn product_id(&self) -> ProductId {
        self.id
    }

    pub fn entries(&self) -> &[PassportEntry] {
        &self.entries
    }

    pub fn chain_head(&self) -> Option<Sha256Digest> {
        self.entries.last().map(|e| e.link.chain_hash)
    }

    /// Walk the chain and check every signature against the key `key_for`
    /// returns for the entry's actor.
    pub fn verify<F>(&self, key_for: F) -> Result<PassportVerification, DomainError>
    where
        F: Fn(ActorId) -> Option<PublicKey>,
    {
        let mut links = Vec::with_capacity(self.entries.len());
        let mut signed_entries = 0;
        let mut invalid_signatures = Vec::new();

        for entry in &self.entries {
            let recomputed = entry_data_hash(self.id, &entry.event_type, &entry.data)?;
            links.push((entry.link, recomputed));

            if let Some(sig) = &entry.signature {
                signed_entries += 1;
                let ok = key_for(entry.actor_id)
                    .map(|key| key.verify(&entry.link.data_hash, sig).is_ok())
                    .unwrap_or(false);
                if !ok {
                    invalid_signatures.push(entry.sequence);
                }
            }
        }

        let chain = verify_chain(None, links);
        let chain_intact = chain.intact;
        Ok(PassportVerification {
            product_id: self.id,
            entries: self.entries.len(),
            chain_intact,
            chain,
            signed_entries,
            authentic: chain_intact && invalid_signatures.is_empty(),
            invalid_signatures,
        })
    }
}

impl AggregateRoot for Passport {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RecordEntry.
///
/// When `signature` is present it must verify over the entry's data hash
/// against `signer_key`, the actor's registered key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEntry {
    pub product_id: ProductId,
    pub actor_id: ActorId,
    pub event_type: String,
    pub location: Option<String>,
    pub data: JsonValue,
    pub signer_key: Option<PublicKey>,
    pub signature: Option<Signature>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassportCommand {
    RecordEntry(RecordEntry),
}

/// Event: EntryRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryRecorded {
    pub product_id: ProductId,
    pub sequence: u64,
    pub actor_id: ActorId,
    pub event_type: String,
    pub location: Option<String>,
    pub data: JsonValue,
    pub data_hash: Sha256Digest,
    pub previous_hash: Option<Sha256Digest>,
    pub chain_hash: Sha256Digest,
    pub signature: Option<Signature>,
    pub occurred_at: DateTime<Utc>,
}

impl EntryRecorded {
    pub fn link(&self) -> ChainLink {
        ChainLink {
            data_hash: self.data_hash,
            previous_hash: self.previous_hash,
            chain_hash: self.chain_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PassportEvent {
    EntryRecorded(EntryRecorded),
}

impl Event for PassportEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PassportEvent::EntryRecorded(_) => "passport.entry.recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PassportEvent::EntryRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Passport {
    type Command = PassportCommand;
    type Event = PassportEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PassportEvent::EntryRecorded(e) => {
                self.id = e.product_id;
                self.entries.push(PassportEntry {
                    sequence: e.sequence,
                    event_type: e.event_type.clone(),
                    actor_id: e.actor_id,
                    location: e.location.clone(),
                    data: e.data.clone(),
                    link: e.link(),
                    signature: e.signature,
                    recorded_at: e.occurred_at,
                });
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PassportCommand::RecordEntry(cmd) => self.handle_record(cmd),
        }
    }
}

impl Passport {
    fn handle_record(&self, cmd: &RecordEntry) -> Result<Vec<PassportEvent>, DomainError> {
        if self.id != cmd.product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }

        let event_type = cmd.event_type.trim();
        if event_type.is_empty() {
            return Err(DomainError::validation("event_type cannot be empty"));
        }

        let data_hash = entry_data_hash(cmd.product_id, event_type, &cmd.data)?;

        if let Some(sig) = &cmd.signature {
            let key = cmd
                .signer_key
                .ok_or_else(|| DomainError::unauthorized("signed entries require a registered key"))?;
            key.verify(&data_hash, sig)
                .map_err(|_| DomainError::unauthorized("signature does not match the actor's registered key"))?;
        }

        let link = ChainLink::extend(self.chain_head(), data_hash);
        let location = cmd
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string);

        Ok(vec![PassportEvent::EntryRecorded(EntryRecorded {
            product_id: cmd.product_id,
            sequence: self.entries.len() as u64 + 1,
            actor_id: cmd.actor_id,
            event_type: event_type.to_string(),
            location,
            data: cmd.data.clone(),
            data_hash: link.data_hash,
            previous_hash: link.previous_hash,
            chain_hash: link.chain_hash,
            signature: cmd.signature,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearpath_core::AggregateId;
    use clearpath_crypto::KeyPair;
    use proptest::prelude::*;

    fn test_product_id() -> ProductId {
        ProductId::new(AggregateId::new())
    }

    fn test_actor_id() -> ActorId {
        ActorId::new(AggregateId::new())
    }

    fn entry(product_id: ProductId, actor_id: ActorId, event_type: &str, data: JsonValue) -> RecordEntry {
        RecordEntry {
            product_id,
            actor_id,
            event_type: event_type.to_string(),
            location: Some("Coorg Estate".to_string()),
            data,
            signer_key: None,
            signature: None,
            occurred_at: Utc::now(),
        }
    }

    fn record(passport: &mut Passport, cmd: RecordEntry) -> EntryRecorded {
        let events = passport.handle(&PassportCommand::RecordEntry(cmd)).unwrap();
        passport.apply(&events[0]);
        match events.into_iter().next() {
            Some(PassportEvent::EntryRecorded(e)) => e,
            None => panic!("Expected EntryRecorded event"),
        }
    }

    #[test]
    fn first_entry_has_no_previous_hash() {
        let product_id = test_product_id();
        let mut passport = Passport::empty(product_id);
        let data = json!({ "weight_kg": 120, "grade": "AA" });

        let e = record(&mut passport, entry(product_id, test_actor_id(), "HARVEST", data.clone()));

        assert_eq!(e.sequence, 1);
        assert_eq!(e.previous_hash, None);
        assert_eq!(e.data_hash, entry_data_hash(product_id, "HARVEST", &data).unwrap());
        assert_eq!(e.chain_hash, clearpath_crypto::chain::link(None, &e.data_hash));
    }

    #[test]
    fn entries_chain_onto_each_other() {
        let product_id = test_product_id();
        let mut passport = Passport::empty(product_id);
        let actor = test_actor_id();

        let a = record(&mut passport, entry(product_id, actor, "HARVEST", json!({})));
        let b = record(&mut passport, entry(product_id, actor, "QUALITY_CHECK", json!({ "moisture": 11 })));

        assert_eq!(b.sequence, 2);
        assert_eq!(b.previous_hash, Some(a.chain_hash));
        assert_eq!(passport.version(), 2);
    }

    #[test]
    fn data_hash_ignores_key_order() {
        let p = test_product_id();
        let a = entry_data_hash(p, "SHIP", &json!({ "vessel": "MV Kaveri", "port": "Kochi" })).unwrap();
        let b = entry_data_hash(p, "SHIP", &json!({ "port": "Kochi", "vessel": "MV Kaveri" })).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn blank_event_type_is_rejected() {
        let product_id = test_product_id();
        let passport = Passport::empty(product_id);
        let err = passport
            .handle(&PassportCommand::RecordEntry(entry(product_id, test_actor_id(), "  ", json!({}))))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn signed_entry_must_match_the_registered_key() {
        let product_id = test_product_id();
        let passport = Passport::empty(product_id);
        let registered = KeyPair::from_seed(&[5u8; 32]);
        let other = KeyPair::from_seed(&[6u8; 32]);

        let mut cmd = entry(product_id, test_actor_id(), "CUSTOMS_CLEARED", json!({ "port": "Kochi" }));
        let data_hash = entry_data_hash(product_id, "CUSTOMS_CLEARED", &cmd.data).unwrap();
        cmd.signer_key = Some(registered.public());
        cmd.signature = Some(other.secret().sign(&data_hash));

        let err = passport.handle(&PassportCommand::RecordEntry(cmd.clone())).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));

        cmd.signature = Some(registered.secret().sign(&data_hash));
        assert!(passport.handle(&PassportCommand::RecordEntry(cmd)).is_ok());
    }

    #[test]
    fn signature_without_key_is_rejected() {
        let product_id = test_product_id();
        let passport = Passport::empty(product_id);
        let mut cmd = entry(product_id, test_actor_id(), "HARVEST", json!({}));
        cmd.signature = Some(KeyPair::from_seed(&[1u8; 32]).secret().sign(&Sha256Digest::hash_text("x")));

        let err = passport.handle(&PassportCommand::RecordEntry(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Unauthorized(_)));
    }

    #[test]
    fn verification_reports_signatures_and_chain() {
        let product_id = test_product_id();
        let mut passport = Passport::empty(product_id);
        let actor = test_actor_id();
        let keys = KeyPair::from_seed(&[8u8; 32]);

        record(&mut passport, entry(product_id, actor, "HARVEST", json!({ "kg": 10 })));
        let mut signed = entry(product_id, actor, "PROCESSED", json!({ "kg": 9 }));
        signed.signer_key = Some(keys.public());
        signed.signature = Some(keys.secret().sign(&entry_data_hash(product_id, "PROCESSED", &signed.data).unwrap()));
        record(&mut passport, signed);

        let report = passport.verify(|_| Some(keys.public())).unwrap();
        assert!(report.authentic);
        assert_eq!(report.entries, 2);
        assert_eq!(report.signed_entries, 1);

        let rotated = KeyPair::from_seed(&[9u8; 32]);
        let report = passport.verify(|_| Some(rotated.public())).unwrap();
        assert!(report.chain_intact);
        assert_eq!(report.invalid_signatures, vec![2]);
        assert!(!report.authentic);
    }

    #[test]
    fn tampered_entry_data_breaks_the_chain() {
        let product_id = test_product_id();
        let mut passport = Passport::empty(product_id);
        let actor = test_actor_id();
        let first = record(&mut passport, entry(product_id, actor, "HARVEST", json!({ "kg": 10 })));
        let mut second = record(&mut passport, entry(product_id, actor, "SHIP", json!({ "kg": 10 })));

        // Replay the stream with the second payload altered after the fact.
        second.data = json!({ "kg": 1000 });
        let mut replayed = Passport::empty(product_id);
        replayed.apply(&PassportEvent::EntryRecorded(first));
        replayed.apply(&PassportEvent::EntryRecorded(second));

        let report = replayed.verify(|_| None).unwrap();
        assert!(!report.chain_intact);
        assert_eq!(report.chain.verified_links, 1);
        assert_eq!(report.chain.first_break.map(|b| b.index), Some(1));
    }

    proptest! {
        #[test]
        fn honest_passports_always_verify(kgs in prop::collection::vec(0u32..10_000, 0..20)) {
            let product_id = test_product_id();
            let actor = test_actor_id();
            let mut passport = Passport::empty(product_id);
            for kg in &kgs {
                record(&mut passport, entry(product_id, actor, "WEIGH", json!({ "kg": kg })));
            }
            let report = passport.verify(|_| None).unwrap();
            prop_assert!(report.authentic);
            prop_assert_eq!(report.chain.verified_links, kgs.len());
        }
    }
}
