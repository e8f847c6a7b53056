//! Service wiring (event store, bus, projections) and the use cases the
//! routes call.
//!
//! Writes go through the [`CommandDispatcher`]; checks that span aggregates
//! (signer must be a verified actor, unique phone and batch numbers) are made
//! here against rehydrated aggregates, never against the eventually
//! consistent read models.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{debug, info, instrument, warn};

use clearpath_actors::{
    AadhaarNumber, Actor, ActorCommand, ActorEvent, ActorId, ActorRole, CompleteKyc,
    DeactivateActor, RecordOtpRequest, RegisterActor,
};
use clearpath_core::AggregateId;
use clearpath_crypto::{KeyPair, PublicKey, SecretKey, Sha256Digest, Signature};
use clearpath_events::{EventBus, EventEnvelope, InMemoryEventBus, Subscription};
use clearpath_infra::{
    command_dispatcher::{CommandDispatcher, DispatchError},
    config::{AppConfig, StoreBackend},
    event_store::{EventStore, InMemoryEventStore, StoredEvent},
    external::{MockOtpGateway, OtpGateway},
    projections::{
        ActorDirectoryProjection, ActorReadModel, PassportLedgerProjection, PassportReadModel,
        ProductCatalogProjection, ProductReadModel, Projection, UniquenessProjection,
    },
    read_model::{InMemoryReadStore, UniqueIndex},
    replay::replay_all,
};
use clearpath_passport::{
    EntryRecorded, Passport, PassportCommand, PassportEvent, PassportVerification, RecordEntry,
    entry_data_hash,
};
use clearpath_products::{
    OnboardProduct, Product, ProductCommand, ProductEvent, ProductId, ProductStatus,
    ProductVerification, StatusUpdated, UpdateStatus, product_fingerprint,
};

#[cfg(feature = "postgres")]
use clearpath_infra::event_store::PostgresEventStore;

use crate::app::dto;
use crate::app::errors::AppError;

pub type SharedStore = Arc<dyn EventStore>;
pub type SharedBus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
type Dispatcher = CommandDispatcher<SharedStore, SharedBus>;

type ActorDirectory = ActorDirectoryProjection<InMemoryReadStore<ActorId, ActorReadModel>>;
type ProductCatalog = ProductCatalogProjection<InMemoryReadStore<ProductId, ProductReadModel>>;
type PassportLedger = PassportLedgerProjection<InMemoryReadStore<ProductId, PassportReadModel>>;

/// Realtime message broadcast via SSE.
#[derive(Debug, Clone, Serialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub payload: JsonValue,
}

/// Result of a successful KYC. The secret half is handed out exactly once.
pub struct KycOutcome {
    pub actor_name: String,
    pub keys: KeyPair,
}

pub struct AppServices {
    dispatcher: Dispatcher,
    actors: Arc<ActorDirectory>,
    products: Arc<ProductCatalog>,
    passports: Arc<PassportLedger>,
    phones: Arc<UniqueIndex>,
    batches: Arc<UniqueIndex>,
    otp: Arc<dyn OtpGateway>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
}

/// Open the configured event store and wire everything on top of it.
pub async fn build_services(config: &AppConfig) -> anyhow::Result<AppServices> {
    let store = open_store(&config.store).await?;
    let otp: Arc<dyn OtpGateway> = Arc::new(MockOtpGateway::new(config.mock_otp.clone()));
    AppServices::new(store, otp)
}

async fn open_store(backend: &StoreBackend) -> anyhow::Result<SharedStore> {
    match backend {
        StoreBackend::InMemory => {
            info!("using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
        #[cfg(feature = "postgres")]
        StoreBackend::Postgres { database_url } => {
            let store = PostgresEventStore::connect(database_url)
                .await
                .context("failed to open Postgres event store")?;
            info!("using Postgres event store");
            Ok(Arc::new(store))
        }
        #[cfg(not(feature = "postgres"))]
        StoreBackend::Postgres { .. } => {
            anyhow::bail!("USE_PERSISTENT_STORES=true requires a build with the `postgres` feature")
        }
    }
}

impl AppServices {
    /// Rebuild the read side from `store`, then start the projection worker.
    pub fn new(store: SharedStore, otp: Arc<dyn OtpGateway>) -> anyhow::Result<Self> {
        let bus: SharedBus = Arc::new(InMemoryEventBus::new());

        let actors = Arc::new(ActorDirectoryProjection::new(InMemoryReadStore::new()));
        let products = Arc::new(ProductCatalogProjection::new(InMemoryReadStore::new()));
        let passports = Arc::new(PassportLedgerProjection::new(InMemoryReadStore::new()));
        let phones = Arc::new(UniqueIndex::new("phone_number"));
        let batches = Arc::new(UniqueIndex::new("batch_number"));
        let uniqueness = Arc::new(UniquenessProjection::new(phones.clone(), batches.clone()));

        let projections: Vec<Arc<dyn Projection>> = vec![
            actors.clone() as Arc<dyn Projection>,
            products.clone(),
            passports.clone(),
            uniqueness,
        ];

        let refs: Vec<&dyn Projection> = projections.iter().map(|p| p.as_ref()).collect();
        replay_all(store.as_ref(), &refs).context("startup replay failed")?;

        // Realtime channel (SSE): lossy broadcast.
        let (realtime_tx, _realtime_rx) = broadcast::channel::<RealtimeMessage>(256);

        // Subscribe before the first command can publish.
        spawn_projection_worker(bus.subscribe(), projections, realtime_tx.clone())
            .context("failed to start projection worker")?;

        Ok(Self {
            dispatcher: CommandDispatcher::new(store, bus),
            actors,
            products,
            passports,
            phones,
            batches,
            otp,
            realtime_tx,
        })
    }

    pub fn realtime_tx(&self) -> &broadcast::Sender<RealtimeMessage> {
        &self.realtime_tx
    }

    // Actors

    #[instrument(skip(self, req), fields(role = %req.role))]
    pub fn register_actor(&self, req: dto::RegisterActorRequest) -> Result<ActorReadModel, AppError> {
        let role: ActorRole = req.role.parse().map_err(DispatchError::from)?;
        let actor_id = ActorId::new(AggregateId::new());
        let phone = req.phone_number.trim().to_string();

        // Blank numbers are rejected by the aggregate.
        if !phone.is_empty() {
            self.phones.reserve(&phone, actor_id.0)?;
        }

        let result = self.dispatcher.dispatch(
            actor_id.0,
            Actor::AGGREGATE_TYPE,
            ActorCommand::RegisterActor(RegisterActor {
                actor_id,
                name: req.name,
                phone_number: phone.clone(),
                organization: req.organization,
                role,
                occurred_at: Utc::now(),
            }),
            |id| Actor::empty(ActorId::new(id)),
        );
        let committed =
            result.inspect_err(|e| self.phones.release_unless_committed(&phone, actor_id.0, e))?;

        match committed_event::<ActorEvent>(&committed)? {
            ActorEvent::ActorRegistered(e) => {
                info!(%actor_id, "actor registered");
                Ok(ActorReadModel::from(e))
            }
            _ => Err(unexpected_event(Actor::AGGREGATE_TYPE)),
        }
    }

    pub fn list_actors(&self) -> Vec<ActorReadModel> {
        self.actors.list()
    }

    pub fn get_actor(&self, raw_id: &str) -> Result<ActorReadModel, AppError> {
        let actor_id = ActorId::new(parse_id(raw_id, "actor")?);
        self.actors.get(&actor_id).ok_or(AppError::NotFound("Actor"))
    }

    #[instrument(skip(self))]
    pub fn request_otp(&self, raw_id: &str) -> Result<(), AppError> {
        let actor_id = ActorId::new(parse_id(raw_id, "actor")?);
        let actor = self.load_actor(actor_id)?;

        self.dispatcher.dispatch(
            actor_id.0,
            Actor::AGGREGATE_TYPE,
            ActorCommand::RecordOtpRequest(RecordOtpRequest {
                actor_id,
                occurred_at: Utc::now(),
            }),
            |id| Actor::empty(ActorId::new(id)),
        )?;
        self.otp.send(actor_id, actor.phone_number())?;
        Ok(())
    }

    /// Check OTP and Aadhaar, then issue the actor's signing keypair.
    #[instrument(skip(self, req), fields(actor_id = %req.actor_id))]
    pub fn verify_kyc(&self, req: dto::VerifyKycRequest) -> Result<KycOutcome, AppError> {
        let actor_id = ActorId::new(parse_id(&req.actor_id, "actor")?);
        self.otp.verify(actor_id, &req.otp)?;
        let aadhaar = AadhaarNumber::parse(&req.aadhaar_number).map_err(DispatchError::from)?;

        let actor = self.load_actor(actor_id)?;
        if actor.is_verified() {
            return Err(DispatchError::Conflict("Actor already verified".to_string()).into());
        }

        let keys = KeyPair::generate().map_err(AppError::KeyGeneration)?;
        self.dispatcher.dispatch(
            actor_id.0,
            Actor::AGGREGATE_TYPE,
            ActorCommand::CompleteKyc(CompleteKyc {
                actor_id,
                aadhaar_hash: aadhaar.hash(),
                public_key: keys.public(),
                occurred_at: Utc::now(),
            }),
            |id| Actor::empty(ActorId::new(id)),
        )?;

        info!(%actor_id, public_key = %keys.public(), "KYC completed; keypair issued");
        Ok(KycOutcome {
            actor_name: actor.name().to_string(),
            keys,
        })
    }

    #[instrument(skip(self, reason))]
    pub fn deactivate_actor(&self, raw_id: &str, reason: Option<String>) -> Result<(), AppError> {
        let actor_id = ActorId::new(parse_id(raw_id, "actor")?);
        self.load_actor(actor_id)?;

        self.dispatcher.dispatch(
            actor_id.0,
            Actor::AGGREGATE_TYPE,
            ActorCommand::DeactivateActor(DeactivateActor {
                actor_id,
                reason,
                occurred_at: Utc::now(),
            }),
            |id| Actor::empty(ActorId::new(id)),
        )?;
        info!(%actor_id, "actor deactivated");
        Ok(())
    }

    // Products

    #[instrument(skip(self, req), fields(batch_number = %req.batch_number))]
    pub fn onboard_product(&self, req: dto::OnboardProductRequest) -> Result<ProductReadModel, AppError> {
        let manufacturer_id = ActorId::new(parse_id(&req.manufacturer_id, "manufacturer")?);
        let manufacturer_key = match self.signer_key(manufacturer_id) {
            Err(AppError::NotFound(_)) => {
                return Err(DispatchError::Unauthorized("Unverified Actor".to_string()).into());
            }
            other => other?,
        };

        let manufactured_at = optional_timestamp("manufactured_at", req.manufactured_at.as_deref())?;
        let expiry_date = optional_timestamp("expiry_date", req.expiry_date.as_deref())?;

        let name = req.name.trim();
        let batch_number = req.batch_number.trim().to_string();
        let fingerprint =
            product_fingerprint(name, &batch_number, manufacturer_id).map_err(DispatchError::from)?;
        let signature = resolve_signature(
            manufacturer_key,
            &fingerprint,
            req.private_key.as_deref(),
            req.signature.as_deref(),
        )?
        .ok_or_else(|| AppError::BadRequest("private_key or signature is required".to_string()))?;

        let product_id = ProductId::new(AggregateId::new());
        if !batch_number.is_empty() {
            self.batches.reserve(&batch_number, product_id.0)?;
        }

        let result = self.dispatcher.dispatch(
            product_id.0,
            Product::AGGREGATE_TYPE,
            ProductCommand::OnboardProduct(OnboardProduct {
                product_id,
                name: name.to_string(),
                batch_number: batch_number.clone(),
                manufacturer_id,
                manufacturer_key,
                signature,
                manufactured_at,
                expiry_date,
                location: req.location,
                occurred_at: Utc::now(),
            }),
            |id| Product::empty(ProductId::new(id)),
        );
        let committed = result.inspect_err(|e| {
            self.batches.release_unless_committed(&batch_number, product_id.0, e)
        })?;

        match committed_event::<ProductEvent>(&committed)? {
            ProductEvent::ProductOnboarded(e) => {
                info!(%product_id, %manufacturer_id, "product onboarded");
                Ok(ProductReadModel::from(e))
            }
            _ => Err(unexpected_event(Product::AGGREGATE_TYPE)),
        }
    }

    /// Move a product and append a hash-chained record to its history.
    #[instrument(skip(self, req), fields(product_id = %req.product_id, status = %req.status))]
    pub fn update_status(&self, req: dto::UpdateStatusRequest) -> Result<StatusUpdated, AppError> {
        let product_id = ProductId::new(parse_id(&req.product_id, "product")?);
        let actor_id = ActorId::new(parse_id(&req.actor_id, "actor")?);
        let status: ProductStatus = req.status.parse().map_err(DispatchError::from)?;
        self.signer_key(actor_id)?;

        let committed = self
            .dispatcher
            .dispatch(
                product_id.0,
                Product::AGGREGATE_TYPE,
                ProductCommand::UpdateStatus(UpdateStatus {
                    product_id,
                    actor_id,
                    location: req.location,
                    status,
                    occurred_at: Utc::now(),
                }),
                |id| Product::empty(ProductId::new(id)),
            )
            .map_err(|e| not_found_as(e, "Product"))?;

        match committed_event::<ProductEvent>(&committed)? {
            ProductEvent::StatusUpdated(e) => Ok(e),
            _ => Err(unexpected_event(Product::AGGREGATE_TYPE)),
        }
    }

    pub fn list_products(&self) -> Vec<ProductReadModel> {
        self.products.list()
    }

    pub fn product_details(&self, raw_id: &str) -> Result<dto::ProductDetails, AppError> {
        let product_id = ProductId::new(parse_id(raw_id, "product")?);
        let product = self.products.get(&product_id).ok_or(AppError::NotFound("Product"))?;
        let manufacturer = self
            .actors
            .get(&product.manufacturer_id)
            .map(|a| dto::ManufacturerSummary::from(&a));
        Ok(dto::ProductDetails { product, manufacturer })
    }

    /// Recompute the fingerprint, check the signature and walk the history chain.
    #[instrument(skip(self))]
    pub fn verify_product(&self, raw_id: &str) -> Result<ProductVerification, AppError> {
        let product_id = ProductId::new(parse_id(raw_id, "product")?);
        let product = self.load_product(product_id)?;
        let key = product
            .manufacturer_id()
            .and_then(|id| self.registered_key(id));

        let report = product.verify(key).map_err(DispatchError::from)?;
        if !report.authentic {
            warn!(%product_id, "product failed verification");
        }
        Ok(report)
    }

    // Passport (event log)

    #[instrument(skip(self, req), fields(product_id = %req.product_id, event_type = %req.event_type))]
    pub fn log_event(&self, req: dto::LogEventRequest) -> Result<EntryRecorded, AppError> {
        let product_id = ProductId::new(parse_id(&req.product_id, "product")?);
        let actor_id = ActorId::new(parse_id(&req.actor_id, "actor")?);
        self.load_product(product_id)?;
        let signer_key = self.signer_key(actor_id)?;

        let event_type = req.event_type.trim().to_string();
        let data_hash =
            entry_data_hash(product_id, &event_type, &req.data).map_err(DispatchError::from)?;
        let signature = resolve_signature(
            signer_key,
            &data_hash,
            req.private_key.as_deref(),
            req.signature.as_deref(),
        )?;

        let committed = self.dispatcher.dispatch(
            product_id.0,
            Passport::AGGREGATE_TYPE,
            PassportCommand::RecordEntry(RecordEntry {
                product_id,
                actor_id,
                event_type,
                location: req.location,
                data: req.data,
                signer_key: signature.map(|_| signer_key),
                signature,
                occurred_at: Utc::now(),
            }),
            |id| Passport::empty(ProductId::new(id)),
        )?;

        match committed_event::<PassportEvent>(&committed)? {
            PassportEvent::EntryRecorded(e) => Ok(e),
        }
    }

    pub fn passport(&self, raw_id: &str) -> Result<PassportReadModel, AppError> {
        let product_id = ProductId::new(parse_id(raw_id, "product")?);
        if let Some(rm) = self.passports.get(&product_id) {
            return Ok(rm);
        }
        self.load_product(product_id)?;
        Ok(PassportReadModel {
            product_id,
            entries: Vec::new(),
        })
    }

    #[instrument(skip(self))]
    pub fn verify_passport(&self, raw_id: &str) -> Result<PassportVerification, AppError> {
        let product_id = ProductId::new(parse_id(raw_id, "product")?);
        self.load_product(product_id)?;

        let passport = self.dispatcher.load(product_id.0, Passport::AGGREGATE_TYPE, |id| {
            Passport::empty(ProductId::new(id))
        })?;
        let report = passport
            .verify(|actor_id| self.registered_key(actor_id))
            .map_err(DispatchError::from)?;
        if !report.authentic {
            warn!(%product_id, "passport failed verification");
        }
        Ok(report)
    }

    // Helpers

    fn load_actor(&self, actor_id: ActorId) -> Result<Actor, AppError> {
        let actor = self
            .dispatcher
            .load(actor_id.0, Actor::AGGREGATE_TYPE, |id| Actor::empty(ActorId::new(id)))?;
        if !actor.is_registered() {
            return Err(AppError::NotFound("Actor"));
        }
        Ok(actor)
    }

    fn load_product(&self, product_id: ProductId) -> Result<Product, AppError> {
        let product = self.dispatcher.load(product_id.0, Product::AGGREGATE_TYPE, |id| {
            Product::empty(ProductId::new(id))
        })?;
        if !product.is_onboarded() {
            return Err(AppError::NotFound("Product"));
        }
        Ok(product)
    }

    /// Key of a verified, active actor.
    fn signer_key(&self, actor_id: ActorId) -> Result<PublicKey, AppError> {
        let actor = self.load_actor(actor_id)?;
        Ok(actor.signing_key().map_err(DispatchError::from)?)
    }

    /// Registered key regardless of current status, for verifying old signatures.
    fn registered_key(&self, actor_id: ActorId) -> Option<PublicKey> {
        self.load_actor(actor_id).ok().and_then(|a| a.public_key())
    }
}

/// Stream every realtime message as an SSE event named after its topic.
pub fn sse_stream(
    services: Arc<AppServices>,
) -> Sse<impl tokio_stream::Stream<Item = Result<SseEvent, Infallible>>> {
    let rx = services.realtime_tx().subscribe();
    let stream = BroadcastStream::new(rx).filter_map(|msg| match msg {
        Ok(m) => {
            let data = serde_json::to_string(&m.payload).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(SseEvent::default().event(m.topic).data(data)))
        }
        // Lagged receivers skip what they missed.
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}

fn spawn_projection_worker(
    sub: Subscription<EventEnvelope<JsonValue>>,
    projections: Vec<Arc<dyn Projection>>,
    realtime_tx: broadcast::Sender<RealtimeMessage>,
) -> std::io::Result<()> {
    std::thread::Builder::new()
        .name("clearpath-projections".to_string())
        .spawn(move || {
            while let Ok(env) = sub.recv() {
                let mut applied = true;
                for p in &projections {
                    if let Err(e) = p.apply_envelope(&env) {
                        warn!(projection = p.name(), error = %e, "projection apply failed");
                        applied = false;
                    }
                }
                if !applied {
                    continue;
                }

                // Lossy; no backpressure on the write path.
                let at = env.aggregate_type();
                let _ = realtime_tx.send(RealtimeMessage {
                    topic: format!("{at}.projection_updated"),
                    payload: json!({
                        "kind": "projection_update",
                        "aggregate_type": at,
                        "aggregate_id": env.aggregate_id().to_string(),
                        "event_type": env.event_type(),
                        "sequence_number": env.sequence_number(),
                    }),
                });
            }
            debug!("event bus closed; projection worker stopped");
        })?;
    Ok(())
}

fn parse_id(raw: &str, what: &'static str) -> Result<AggregateId, AppError> {
    raw.trim().parse().map_err(|_| AppError::InvalidId(what))
}

fn optional_timestamp(
    field: &'static str,
    raw: Option<&str>,
) -> Result<Option<chrono::DateTime<Utc>>, AppError> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => dto::parse_timestamp(field, s).map(Some).map_err(AppError::BadRequest),
        None => Ok(None),
    }
}

/// Sign `digest` with a supplied private key, or accept a precomputed signature.
///
/// A private key must belong to `registered`; a precomputed signature is
/// checked by the aggregate.
fn resolve_signature(
    registered: PublicKey,
    digest: &Sha256Digest,
    private_key: Option<&str>,
    signature: Option<&str>,
) -> Result<Option<Signature>, AppError> {
    fn non_empty(s: Option<&str>) -> Option<&str> {
        s.map(str::trim).filter(|s| !s.is_empty())
    }

    if let Some(hex) = non_empty(private_key) {
        let secret = SecretKey::from_hex(hex).map_err(AppError::crypto("private_key"))?;
        if secret.public_key() != registered {
            return Err(DispatchError::Unauthorized(
                "private key does not match the actor's registered public key".to_string(),
            )
            .into());
        }
        return Ok(Some(secret.sign(digest)));
    }

    match non_empty(signature) {
        Some(hex) => Ok(Some(Signature::from_hex(hex).map_err(AppError::crypto("signature"))?)),
        None => Ok(None),
    }
}

/// Every command here emits exactly one event.
fn committed_event<E: DeserializeOwned>(committed: &[StoredEvent]) -> Result<E, AppError> {
    let stored = committed
        .first()
        .ok_or_else(|| DispatchError::Deserialize("command produced no events".to_string()))?;
    serde_json::from_value(stored.payload.clone())
        .map_err(|e| DispatchError::Deserialize(e.to_string()).into())
}

fn unexpected_event(aggregate_type: &str) -> AppError {
    DispatchError::Deserialize(format!("unexpected {aggregate_type} event")).into()
}

fn not_found_as(err: DispatchError, what: &'static str) -> AppError {
    match err {
        DispatchError::NotFound => AppError::NotFound(what),
        other => other.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_signature_rejects_foreign_private_key() {
        let registered = KeyPair::from_seed(&[1u8; 32]);
        let other = KeyPair::from_seed(&[2u8; 32]);
        let digest = Sha256Digest::hash_text("payload");

        let err = resolve_signature(registered.public(), &digest, Some(&other.secret().expose_hex()), None)
            .unwrap_err();
        assert!(matches!(err, AppError::Dispatch(DispatchError::Unauthorized(_))));

        let sig = resolve_signature(registered.public(), &digest, Some(&registered.secret().expose_hex()), None)
            .unwrap()
            .unwrap();
        assert!(registered.public().verify(&digest, &sig).is_ok());
    }

    #[test]
    fn resolve_signature_accepts_precomputed_or_nothing() {
        let pair = KeyPair::from_seed(&[3u8; 32]);
        let digest = Sha256Digest::hash_text("payload");
        let sig = pair.secret().sign(&digest);

        let resolved = resolve_signature(pair.public(), &digest, Some("  "), Some(&sig.to_hex())).unwrap();
        assert_eq!(resolved, Some(sig));
        assert_eq!(resolve_signature(pair.public(), &digest, None, None).unwrap(), None);
        assert!(matches!(
            resolve_signature(pair.public(), &digest, None, Some("zz")),
            Err(AppError::InvalidCrypto { field: "signature", .. })
        ));
    }

    #[test]
    fn ids_are_validated() {
        assert!(matches!(parse_id("nope", "actor"), Err(AppError::InvalidId("actor"))));
        let id = AggregateId::new();
        assert_eq!(parse_id(&format!(" {id} "), "actor").unwrap(), id);
    }
}
