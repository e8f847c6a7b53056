use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use clearpath_actors::ActorId;
use clearpath_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use clearpath_crypto::{ChainLink, ChainReport, PublicKey, Sha256Digest, Signature, verify_chain};
use clearpath_events::Event;

/// Where a freshly onboarded product is assumed to be.
pub const DEFAULT_LOCATION: &str = "Factory";

/// Product (batch) identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(pub AggregateId);

impl ProductId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ProductId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Product status lifecycle. `Recalled` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProductStatus {
    Manufactured,
    InTransit,
    Delivered,
    Recalled,
}

impl ProductStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ProductStatus::Manufactured => "MANUFACTURED",
            ProductStatus::InTransit => "IN_TRANSIT",
            ProductStatus::Delivered => "DELIVERED",
            ProductStatus::Recalled => "RECALLED",
        }
    }

    pub fn is_terminal(self) -> bool {
        self == ProductStatus::Recalled
    }
}

impl core::fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for ProductStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .trim()
            .chars()
            .map(|c| match c {
                ' ' | '-' => '_',
                c => c.to_ascii_uppercase(),
            })
            .collect();
        match normalized.as_str() {
            "MANUFACTURED" => Ok(ProductStatus::Manufactured),
            "IN_TRANSIT" => Ok(ProductStatus::InTransit),
            "DELIVERED" => Ok(ProductStatus::Delivered),
            "RECALLED" => Ok(ProductStatus::Recalled),
            _ => Err(DomainError::validation(format!("unknown status: {s}"))),
        }
    }
}

/// Fingerprint of a product's identity fields.
pub fn product_fingerprint(
    name: &str,
    batch_number: &str,
    manufacturer_id: ActorId,
) -> Result<Sha256Digest, DomainError> {
    Sha256Digest::of_json(&json!({
        "name": name,
        "batch_number": batch_number,
        "manufacturer_id": manufacturer_id.to_string(),
    }))
    .map_err(|e| DomainError::invariant(e.to_string()))
}

/// Digest of a single status record; `time` is epoch milliseconds.
pub fn status_record_hash(
    product_id: ProductId,
    location: &str,
    status: ProductStatus,
    at: DateTime<Utc>,
) -> Result<Sha256Digest, DomainError> {
    Sha256Digest::of_json(&json!({
        "product_id": product_id.to_string(),
        "location": location,
        "status": status,
        "time": at.timestamp_millis(),
    }))
    .map_err(|e| DomainError::invariant(e.to_string()))
}

/// One entry of a product's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecord {
    /// 1-based position in the history.
    pub sequence: u64,
    pub actor_id: ActorId,
    pub location: String,
    pub status: ProductStatus,
    pub link: ChainLink,
    pub recorded_at: DateTime<Utc>,
}

/// Outcome of re-checking a product's attestation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductVerification {
    pub product_id: ProductId,
    pub product_hash: Sha256Digest,
    pub recomputed_hash: Sha256Digest,
    pub fingerprint_matches: bool,
    pub signature_valid: bool,
    pub chain_intact: bool,
    pub chain: ChainReport,
    pub authentic: bool,
}

/// Aggregate root: Product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Product {
    id: ProductId,
    name: String,
    batch_number: String,
    manufacturer_id: Option<ActorId>,
    manufactured_at: Option<DateTime<Utc>>,
    expiry_date: Option<DateTime<Utc>>,
    current_location: String,
    status: ProductStatus,
    product_hash: Option<Sha256Digest>,
    signature: Option<Signature>,
    history: Vec<StatusRecord>,
    version: u64,
    created: bool,
}

impl Product {
    pub const AGGREGATE_TYPE: &'static str = "products.product";

    /// Create an empty, not-yet-onboarded aggregate instance for rehydration.
    pub fn empty(id: ProductId) -> Self {
        Self {
            id,
            name: String::new(),
            batch_number: String::new(),
            manufacturer_id: None,
            manufactured_at: None,
            expiry_date: None,
            current_location: DEFAULT_LOCATION.to_string(),
            status: ProductStatus::Manufactured,
            product_hash: None,
            signature: None,
            history: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ProductId {
        self.id
    }

    pub fn is_onboarded(&self) -> bool {
        self.created
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn batch_number(&self) -> &str {
        &self.batch_number
    }

    pub fn manufacturer_id(&self) -> Option<ActorId> {
        self.manufacturer_id
    }

    pub fn manufactured_at(&self) -> Option<DateTime<Utc>> {
        self.manufactured_at
    }

    pub fn expiry_date(&self) -> Option<DateTime<Utc>> {
        self.expiry_date
    }

    pub fn current_location(&self) -> &str {
        &self.current_location
    }

    pub fn status(&self) -> ProductStatus {
        self.status
    }

    pub fn product_hash(&self) -> Option<Sha256Digest> {
        self.product_hash
    }

    pub fn signature(&self) -> Option<Signature> {
        self.signature
    }

    pub fn history(&self) -> &[StatusRecord] {
        &self.history
    }

    /// The digest the next status record links to.
    pub fn chain_head(&self) -> Option<Sha256Digest> {
        self.history
            .last()
            .map(|r| r.link.chain_hash)
            .or(self.product_hash)
    }

    /// Re-derive the fingerprint, check the manufacturer seal against
    /// `manufacturer_key`, and walk the history chain.
    pub fn verify(&self, manufacturer_key: Option<PublicKey>) -> Result<ProductVerification, DomainError> {
        let (Some(manufacturer_id), Some(product_hash)) = (self.manufacturer_id, self.product_hash) else {
            return Err(DomainError::not_found());
        };

        let recomputed_hash = product_fingerprint(&self.name, &self.batch_number, manufacturer_id)?;
        let fingerprint_matches = recomputed_hash == product_hash;

        let signature_valid = match (manufacturer_key, self.signature) {
            (Some(key), Some(sig)) => key.verify(&product_hash, &sig).is_ok(),
            _ => false,
        };

        let mut links = Vec::with_capacity(self.history.len());
        for record in &self.history {
            let recomputed = status_record_hash(self.id, &record.location, record.status, record.recorded_at)?;
            links.push((record.link, recomputed));
        }
        let chain = verify_chain(Some(product_hash), links);
        let chain_intact = chain.intact;

        Ok(ProductVerification {
            product_id: self.id,
            product_hash,
            recomputed_hash,
            fingerprint_matches,
            signature_valid,
            chain_intact,
            chain,
            authentic: fingerprint_matches && signature_valid && chain_intact,
        })
    }
}

impl AggregateRoot for Product {
    type Id = ProductId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OnboardProduct.
///
/// `manufacturer_key` is the manufacturer's registered public key; the
/// signature over the fingerprint must verify against it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnboardProduct {
    pub product_id: ProductId,
    pub name: String,
    pub batch_number: String,
    pub manufacturer_id: ActorId,
    pub manufacturer_key: PublicKey,
    pub signature: Signature,
    pub manufactured_at: Option<DateTime<Utc>>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateStatus {
    pub product_id: ProductId,
    pub actor_id: ActorId,
    pub location: String,
    pub status: ProductStatus,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductCommand {
    OnboardProduct(OnboardProduct),
    UpdateStatus(UpdateStatus),
}

/// Event: ProductOnboarded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductOnboarded {
    pub product_id: ProductId,
    pub name: String,
    pub batch_number: String,
    pub manufacturer_id: ActorId,
    pub manufactured_at: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub location: String,
    pub product_hash: Sha256Digest,
    pub signature: Signature,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StatusUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdated {
    pub product_id: ProductId,
    pub sequence: u64,
    pub actor_id: ActorId,
    pub location: String,
    pub status: ProductStatus,
    pub data_hash: Sha256Digest,
    pub previous_hash: Option<Sha256Digest>,
    pub chain_hash: Sha256Digest,
    pub occurred_at: DateTime<Utc>,
}

impl StatusUpdated {
    pub fn link(&self) -> ChainLink {
        ChainLink {
            data_hash: self.data_hash,
            previous_hash: self.previous_hash,
            chain_hash: self.chain_hash,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProductEvent {
    ProductOnboarded(ProductOnboarded),
    StatusUpdated(StatusUpdated),
}

impl Event for ProductEvent {
    fn event_type(&self) -> &'static str {
        match self {
            ProductEvent::ProductOnboarded(_) => "products.product.onboarded",
            ProductEvent::StatusUpdated(_) => "products.product.status_updated",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            ProductEvent::ProductOnboarded(e) => e.occurred_at,
            ProductEvent::StatusUpdated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for Product {
    type Command = ProductCommand;
    type Event = ProductEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            ProductEvent::ProductOnboarded(e) => {
                self.id = e.product_id;
                self.name = e.name.clone();
                self.batch_number = e.batch_number.clone();
                self.manufacturer_id = Some(e.manufacturer_id);
                self.manufactured_at = Some(e.manufactured_at);
                self.expiry_date = e.expiry_date;
                self.current_location = e.location.clone();
                self.status = ProductStatus::Manufactured;
                self.product_hash = Some(e.product_hash);
                self.signature = Some(e.signature);
                self.created = true;
            }
            ProductEvent::StatusUpdated(e) => {
                self.current_location = e.location.clone();
                self.status = e.status;
                self.history.push(StatusRecord {
                    sequence: e.sequence,
                    actor_id: e.actor_id,
                    location: e.location.clone(),
                    status: e.status,
                    link: e.link(),
                    recorded_at: e.occurred_at,
                });
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            ProductCommand::OnboardProduct(cmd) => self.handle_onboard(cmd),
            ProductCommand::UpdateStatus(cmd) => self.handle_update_status(cmd),
        }
    }
}

impl Product {
    fn ensure_product_id(&self, product_id: ProductId) -> Result<(), DomainError> {
        if self.id != product_id {
            return Err(DomainError::invariant("product_id mismatch"));
        }
        Ok(())
    }

    fn handle_onboard(&self, cmd: &OnboardProduct) -> Result<Vec<ProductEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("product already exists"));
        }

        let name = cmd.name.trim();
        if name.is_empty() {
            return Err(DomainError::validation("name cannot be empty"));
        }
        let batch_number = cmd.batch_number.trim();
        if batch_number.is_empty() {
            return Err(DomainError::validation("batch_number cannot be empty"));
        }

        let manufactured_at = cmd.manufactured_at.unwrap_or(cmd.occurred_at);
        if let Some(expiry) = cmd.expiry_date {
            if expiry < manufactured_at {
                return Err(DomainError::validation(
                    "expiry_date cannot precede the manufacturing date",
                ));
            }
        }

        let location = cmd
            .location
            .as_deref()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .unwrap_or(DEFAULT_LOCATION)
            .to_string();

        let product_hash = product_fingerprint(name, batch_number, cmd.manufacturer_id)?;
        cmd.manufacturer_key
            .verify(&product_hash, &cmd.signature)
            .map_err(|_| DomainError::unauthorized("signature does not match the manufacturer's registered key"))?;

        Ok(vec![ProductEvent::ProductOnboarded(ProductOnboarded {
            product_id: cmd.product_id,
            name: name.to_string(),
            batch_number: batch_number.to_string(),
            manufacturer_id: cmd.manufacturer_id,
            manufactured_at,
            expiry_date: cmd.expiry_date,
            location,
            product_hash,
            signature: cmd.signature,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_status(&self, cmd: &UpdateStatus) -> Result<Vec<ProductEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_product_id(cmd.product_id)?;

        if self.status.is_terminal() {
            return Err(DomainError::invariant("product has been recalled; no further updates are accepted"));
        }

        let location = cmd.location.trim();
        if location.is_empty() {
            return Err(DomainError::validation("location cannot be empty"));
        }

        let data_hash = status_record_hash(cmd.product_id, location, cmd.status, cmd.occurred_at)?;
        let link = ChainLink::extend(self.chain_head(), data_hash);

        Ok(vec![ProductEvent::StatusUpdated(StatusUpdated {
            product_id: cmd.product_id,
            sequence: self.history.len() as u64 + 1,
            actor_id: cmd.actor_id,
            location: location.to_string(),
            status: cmd.status,
            data_hash: link.data_hash,
            previous_hash: link.previous_hash,
            chain_hash: link.chain_hash,
            occurred_at: cmd.occurred_at,
        })])
    }
}
