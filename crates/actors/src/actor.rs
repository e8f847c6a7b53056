use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use clearpath_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use clearpath_crypto::{PublicKey, Sha256Digest};
use clearpath_events::Event;

/// Actor identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub AggregateId);

impl ActorId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ActorId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Role an actor plays in the supply chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Farmer,
    Collector,
    Processor,
    Logistics,
    CustomsAgent,
    Shipping,
    TestingLab,
    Manufacturer,
    Distributor,
    Retailer,
}

impl ActorRole {
    pub const ALL: [ActorRole; 10] = [
        ActorRole::Farmer,
        ActorRole::Collector,
        ActorRole::Processor,
        ActorRole::Logistics,
        ActorRole::CustomsAgent,
        ActorRole::Shipping,
        ActorRole::TestingLab,
        ActorRole::Manufacturer,
        ActorRole::Distributor,
        ActorRole::Retailer,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ActorRole::Farmer => "farmer",
            ActorRole::Collector => "collector",
            ActorRole::Processor => "processor",
            ActorRole::Logistics => "logistics",
            ActorRole::CustomsAgent => "customs_agent",
            ActorRole::Shipping => "shipping",
            ActorRole::TestingLab => "testing_lab",
            ActorRole::Manufacturer => "manufacturer",
            ActorRole::Distributor => "distributor",
            ActorRole::Retailer => "retailer",
        }
    }
}

impl core::fmt::Display for ActorRole {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accepts `customs_agent`, `Customs Agent` and `customs-agent` alike.
impl core::str::FromStr for ActorRole {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_lowercase(),
            })
            .collect();
        ActorRole::ALL
            .into_iter()
            .find(|r| r.as_str() == normalized)
            .ok_or_else(|| DomainError::validation(format!("unknown role: {s}")))
    }
}

/// A 12-digit Aadhaar number. Only its SHA-256 hash ever leaves this type.
#[derive(Clone, PartialEq, Eq)]
pub struct AadhaarNumber(String);

impl AadhaarNumber {
    pub fn parse(input: &str) -> Result<Self, DomainError> {
        let trimmed = input.trim();
        if trimmed.len() != 12 || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::validation("Invalid Aadhaar: must be exactly 12 digits"));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn hash(&self) -> Sha256Digest {
        Sha256Digest::hash_text(&self.0)
    }
}

impl core::fmt::Debug for AadhaarNumber {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Last four digits only, as printed on masked Aadhaar cards.
        write!(f, "AadhaarNumber(XXXXXXXX{})", &self.0[8..])
    }
}

/// Aggregate root: Actor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    id: ActorId,
    name: String,
    phone_number: String,
    organization: String,
    role: ActorRole,
    public_key: Option<PublicKey>,
    aadhaar_hash: Option<Sha256Digest>,
    verified: bool,
    active: bool,
    otp_requested_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Actor {
    /// Stream type under which actor events are stored.
    pub const AGGREGATE_TYPE: &'static str = "actors.actor";

    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: ActorId) -> Self {
        Self {
            id,
            name: String::new(),
            phone_number: String::new(),
            organization: String::new(),
            role: ActorRole::Farmer,
            public_key: None,
            aadhaar_hash: None,
            verified: false,
            active: true,
            otp_requested_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ActorId {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn organization(&self) -> &str {
        &self.organization
    }

    pub fn role(&self) -> ActorRole {
        self.role
    }

    pub fn public_key(&self) -> Option<PublicKey> {
        self.public_key
    }

    pub fn aadhaar_hash(&self) -> Option<Sha256Digest> {
        self.aadhaar_hash
    }

    pub fn is_verified(&self) -> bool {
        self.verified
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn otp_requested_at(&self) -> Option<DateTime<Utc>> {
        self.otp_requested_at
    }

    /// Invariant helper: only verified, active actors may sign.
    pub fn can_sign(&self) -> bool {
        self.created && self.verified && self.active && self.public_key.is_some()
    }

    /// The key this actor signs with, or why it may not sign.
    pub fn signing_key(&self) -> Result<PublicKey, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if !self.active {
            return Err(DomainError::unauthorized("Actor is deactivated"));
        }
        match (self.verified, self.public_key) {
            (true, Some(key)) => Ok(key),
            _ => Err(DomainError::unauthorized("Unverified Actor")),
        }
    }
}

impl AggregateRoot for Actor {
    type Id = ActorId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterActor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterActor {
    pub actor_id: ActorId,
    pub name: String,
    pub phone_number: String,
    pub organization: String,
    pub role: ActorRole,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordOtpRequest (the code itself is never stored).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOtpRequest {
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteKyc.
///
/// Issued after the OTP has been checked and a keypair generated; carries
/// only the Aadhaar hash and the public half of the key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteKyc {
    pub actor_id: ActorId,
    pub aadhaar_hash: Sha256Digest,
    pub public_key: PublicKey,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeactivateActor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeactivateActor {
    pub actor_id: ActorId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorCommand {
    RegisterActor(RegisterActor),
    RecordOtpRequest(RecordOtpRequest),
    CompleteKyc(CompleteKyc),
    DeactivateActor(DeactivateActor),
}

/// Event: ActorRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorRegistered {
    pub actor_id: ActorId,
    pub name: String,
    pub phone_number: String,
    pub organization: String,
    pub role: ActorRole,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OtpRequested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OtpRequested {
    pub actor_id: ActorId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: KycCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KycCompleted {
    pub actor_id: ActorId,
    pub aadhaar_hash: Sha256Digest,
    pub public_key: PublicKey,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ActorDeactivated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorDeactivated {
    pub actor_id: ActorId,
    pub reason: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActorEvent {
    ActorRegistered(ActorRegistered),
    OtpRequested(OtpRequested),
    KycCompleted(KycCompleted),
    ActorDeactivated(ActorDeactivated),
}

impl Event for ActorEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ActorEvent::ActorRegistered(_) => "actors.actor.registered",
            ActorEvent::OtpRequested(_) => "actors.actor.otp_requested",
            ActorEvent::KycCompleted(_) => "actors.actor.kyc_completed",
            ActorEvent::ActorDeactivated(_) => "actors.actor.deactivated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ActorEvent::ActorRegistered(e) => e.occurred_at,
            ActorEvent::OtpRequested(e) => e.occurred_at,
            ActorEvent::KycCompleted(e) => e.occurred_at,
            ActorEvent::ActorDeactivated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Actor {
    type Command = ActorCommand;
    type Event = ActorEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ActorEvent::ActorRegistered(e) => {
                self.id = e.actor_id;
                self.name = e.name.clone();
                self.phone_number = e.phone_number.clone();
                self.organization = e.organization.clone();
                self.role = e.role;
                self.verified = false;
                self.active = true;
                self.created = true;
            }
            ActorEvent::OtpRequested(e) => {
                self.otp_requested_at = Some(e.occurred_at);
            }
            ActorEvent::KycCompleted(e) => {
                self.aadhaar_hash = Some(e.aadhaar_hash);
                self.public_key = Some(e.public_key);
                self.verified = true;
            }
            ActorEvent::ActorDeactivated(_) => {
                self.active = false;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ActorCommand::RegisterActor(cmd) => self.handle_register(cmd),
            ActorCommand::RecordOtpRequest(cmd) => self.handle_otp_request(cmd),
            ActorCommand::CompleteKyc(cmd) => self.handle_complete_kyc(cmd),
            ActorCommand::DeactivateActor(cmd) => self.handle_deactivate(cmd),
        }
    }
}

impl Actor {
    fn ensure_actor_id(&self, actor_id: ActorId) -> Result<(), DomainError> {
        if self.id != actor_id {
            return Err(DomainError::invariant("actor_id mismatch"));
        }
        Ok(())
    }

    fn ensure_registered(&self, actor_id: ActorId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_actor_id(actor_id)
    }

    fn handle_register(&self, cmd: &RegisterActor) -> Result<Vec<ActorEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("actor already exists"));
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let phone_number = cmd.phone_number.trim();
        if phone_number.is_empty() {
            return Err(DomainError::validation("phone_number cannot be empty"));
        }
        let organization = cmd.organization.trim();
        if organization.is_empty() {
            return Err(DomainError::validation("organization cannot be empty"));
        }

        Ok(vec![ActorEvent::ActorRegistered(ActorRegistered {
            actor_id: cmd.actor_id,
            name: name.to_string(),
            phone_number: phone_number.to_string(),
            organization: organization.to_string(),
            role: cmd.role,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_otp_request(&self, cmd: &RecordOtpRequest) -> Result<Vec<ActorEvent>, DomainError> {
        self.ensure_registered(cmd.actor_id)?;

        Ok(vec![ActorEvent::OtpRequested(OtpRequested {
            actor_id: cmd.actor_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete_kyc(&self, cmd: &CompleteKyc) -> Result<Vec<ActorEvent>, DomainError> {
        self.ensure_registered(cmd.actor_id)?;

        if self.verified {
            return Err(DomainError::conflict("Actor already verified"));
        }
        if !self.active {
            return Err(DomainError::invariant("deactivated actors cannot complete KYC"));
        }

        Ok(vec![ActorEvent::KycCompleted(KycCompleted {
            actor_id: cmd.actor_id,
            aadhaar_hash: cmd.aadhaar_hash,
            public_key: cmd.public_key,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_deactivate(&self, cmd: &DeactivateActor) -> Result<Vec<ActorEvent>, DomainError> {
        self.ensure_registered(cmd.actor_id)?;

        if !self.active {
            return Err(DomainError::conflict("actor is already deactivated"));
        }

        Ok(vec![ActorEvent::ActorDeactivated(ActorDeactivated {
            actor_id: cmd.actor_id,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clearpath_crypto::KeyPair;
    use proptest::prelude::*;

    fn test_actor_id() -> ActorId {
        ActorId::new(AggregateId::new())
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn register_cmd(actor_id: ActorId) -> RegisterActor {
        RegisterActor {
            actor_id,
            name: "Ravi Kumar".to_string(),
            phone_number: "9876543210".to_string(),
            organization: "Kumar Farms".to_string(),
            role: ActorRole::Farmer,
            occurred_at: test_time(),
        }
    }

    fn registered(actor_id: ActorId) -> Actor {
        let mut actor = Actor::empty(actor_id);
        let events = actor
            .handle(&ActorCommand::RegisterActor(register_cmd(actor_id)))
            .unwrap();
        actor.apply(&events[0]);
        actor
    }

    fn kyc_cmd(actor_id: ActorId) -> CompleteKyc {
        CompleteKyc {
            actor_id,
            aadhaar_hash: AadhaarNumber::parse("123412341234").unwrap().hash(),
            public_key: KeyPair::from_seed(&[11u8; 32]).public(),
            occurred_at: test_time(),
        }
    }

    #[test]
    fn register_actor_emits_actor_registered_event() {
        let actor_id = test_actor_id();
        let actor = Actor::empty(actor_id);

        let events = actor
            .handle(&ActorCommand::RegisterActor(register_cmd(actor_id)))
            .unwrap();
        assert_eq!(events.len(), 1);

        match &events[0] {
            ActorEvent::ActorRegistered(e) => {
                assert_eq!(e.actor_id, actor_id);
                assert_eq!(e.name, "Ravi Kumar");
                assert_eq!(e.role, ActorRole::Farmer);
                assert_eq!(e.organization, "Kumar Farms");
            }
            _ => panic!("Expected ActorRegistered event"),
        }
    }

    #[test]
    fn registered_actor_starts_unverified_and_active() {
        let actor = registered(test_actor_id());
        assert!(!actor.is_verified());
        assert!(actor.is_active());
        assert!(!actor.can_sign());
        assert_eq!(actor.signing_key(), Err(DomainError::unauthorized("Unverified Actor")));
    }

    #[test]
    fn register_rejects_blank_fields() {
        let actor_id = test_actor_id();
        let actor = Actor::empty(actor_id);

        let mut cmd = register_cmd(actor_id);
        cmd.name = "  ".to_string();
        let err = actor.handle(&ActorCommand::RegisterActor(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut cmd = register_cmd(actor_id);
        cmd.phone_number = String::new();
        let err = actor.handle(&ActorCommand::RegisterActor(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        let mut cmd = register_cmd(actor_id);
        cmd.organization = " \t".to_string();
        let err = actor.handle(&ActorCommand::RegisterActor(cmd)).unwrap_err();
        assert_eq!(err, DomainError::validation("organization cannot be empty"));
    }

    #[test]
    fn register_rejects_duplicate_creation() {
        let actor_id = test_actor_id();
        let actor = registered(actor_id);
        let err = actor
            .handle(&ActorCommand::RegisterActor(register_cmd(actor_id)))
            .unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn otp_request_requires_registration() {
        let actor_id = test_actor_id();
        let actor = Actor::empty(actor_id);
        let err = actor
            .handle(&ActorCommand::RecordOtpRequest(RecordOtpRequest {
                actor_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn otp_request_is_recorded() {
        let actor_id = test_actor_id();
        let mut actor = registered(actor_id);
        let at = test_time();
        let events = actor
            .handle(&ActorCommand::RecordOtpRequest(RecordOtpRequest { actor_id, occurred_at: at }))
            .unwrap();
        actor.apply(&events[0]);
        assert_eq!(actor.otp_requested_at(), Some(at));
    }

    #[test]
    fn kyc_verifies_actor_and_stores_public_key() {
        let actor_id = test_actor_id();
        let mut actor = registered(actor_id);
        let cmd = kyc_cmd(actor_id);

        let events = actor.handle(&ActorCommand::CompleteKyc(cmd.clone())).unwrap();
        actor.apply(&events[0]);

        assert!(actor.is_verified());
        assert!(actor.can_sign());
        assert_eq!(actor.public_key(), Some(cmd.public_key));
        assert_eq!(actor.signing_key(), Ok(cmd.public_key));
        assert_eq!(actor.aadhaar_hash(), Some(cmd.aadhaar_hash));
    }

    #[test]
    fn kyc_happens_at_most_once() {
        let actor_id = test_actor_id();
        let mut actor = registered(actor_id);
        let events = actor.handle(&ActorCommand::CompleteKyc(kyc_cmd(actor_id))).unwrap();
        actor.apply(&events[0]);

        let err = actor.handle(&ActorCommand::CompleteKyc(kyc_cmd(actor_id))).unwrap_err();
        assert_eq!(err, DomainError::conflict("Actor already verified"));
    }

    #[test]
    fn kyc_rejects_unknown_actor() {
        let actor_id = test_actor_id();
        let actor = Actor::empty(actor_id);
        let err = actor.handle(&ActorCommand::CompleteKyc(kyc_cmd(actor_id))).unwrap_err();
        assert_eq!(err, DomainError::NotFound);
    }

    #[test]
    fn deactivated_actor_cannot_sign() {
        let actor_id = test_actor_id();
        let mut actor = registered(actor_id);
        let events = actor.handle(&ActorCommand::CompleteKyc(kyc_cmd(actor_id))).unwrap();
        actor.apply(&events[0]);

        let events = actor
            .handle(&ActorCommand::DeactivateActor(DeactivateActor {
                actor_id,
                reason: Some("licence revoked".to_string()),
                occurred_at: test_time(),
            }))
            .unwrap();
        actor.apply(&events[0]);

        assert!(!actor.is_active());
        assert!(!actor.can_sign());
        assert!(matches!(actor.signing_key(), Err(DomainError::Unauthorized(_))));
    }

    #[test]
    fn deactivate_twice_is_a_conflict() {
        let actor_id = test_actor_id();
        let mut actor = registered(actor_id);
        let cmd = DeactivateActor { actor_id, reason: None, occurred_at: test_time() };
        let events = actor.handle(&ActorCommand::DeactivateActor(cmd.clone())).unwrap();
        actor.apply(&events[0]);

        let err = actor.handle(&ActorCommand::DeactivateActor(cmd)).unwrap_err();
        assert!(matches!(err, DomainError::Conflict(_)));
    }

    #[test]
    fn version_increments_on_apply() {
        let actor_id = test_actor_id();
        let mut actor = registered(actor_id);
        assert_eq!(actor.version(), 1);

        let events = actor.handle(&ActorCommand::CompleteKyc(kyc_cmd(actor_id))).unwrap();
        actor.apply(&events[0]);
        assert_eq!(actor.version(), 2);
    }

    #[test]
    fn handle_does_not_mutate_state() {
        let actor_id = test_actor_id();
        let actor = registered(actor_id);
        let before = actor.clone();

        let cmd = ActorCommand::CompleteKyc(kyc_cmd(actor_id));
        let events1 = actor.handle(&cmd).unwrap();
        let events2 = actor.handle(&cmd).unwrap();

        assert_eq!(actor, before);
        assert_eq!(events1, events2);
    }

    #[test]
    fn role_parsing_is_lenient_about_case_and_separators() {
        assert_eq!("customs_agent".parse::<ActorRole>().unwrap(), ActorRole::CustomsAgent);
        assert_eq!("Customs Agent".parse::<ActorRole>().unwrap(), ActorRole::CustomsAgent);
        assert_eq!("testing-lab".parse::<ActorRole>().unwrap(), ActorRole::TestingLab);
        assert_eq!(" MANUFACTURER ".parse::<ActorRole>().unwrap(), ActorRole::Manufacturer);
        assert!("astronaut".parse::<ActorRole>().is_err());
    }

    #[test]
    fn role_serde_matches_display() {
        for role in ActorRole::ALL {
            let json = serde_json::to_string(&role).unwrap();
            assert_eq!(json, format!("\"{role}\""));
        }
    }

    #[test]
    fn aadhaar_must_be_twelve_digits() {
        assert!(AadhaarNumber::parse("123412341234").is_ok());
        assert!(AadhaarNumber::parse(" 123412341234 ").is_ok());
        assert!(AadhaarNumber::parse("12341234123").is_err());
        assert!(AadhaarNumber::parse("1234123412345").is_err());
        assert!(AadhaarNumber::parse("12341234123a").is_err());
        assert!(AadhaarNumber::parse("").is_err());
    }

    #[test]
    fn aadhaar_debug_is_masked() {
        let a = AadhaarNumber::parse("123412349876").unwrap();
        let rendered = format!("{a:?}");
        assert!(rendered.ends_with("9876)"));
        assert!(!rendered.contains("12341234"));
    }

    #[test]
    fn aadhaar_hash_is_plain_sha256_of_the_digits() {
        let a = AadhaarNumber::parse("123412341234").unwrap();
        assert_eq!(a.hash(), Sha256Digest::hash_text("123412341234"));
    }

    proptest! {
        #[test]
        fn any_twelve_digit_string_is_accepted(digits in "[0-9]{12}") {
            prop_assert!(AadhaarNumber::parse(&digits).is_ok());
        }

        #[test]
        fn other_lengths_are_rejected(digits in "[0-9]{0,11}|[0-9]{13,20}") {
            prop_assert!(AadhaarNumber::parse(&digits).is_err());
        }
    }
}
