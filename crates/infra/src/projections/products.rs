use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use clearpath_actors::ActorId;
use clearpath_crypto::{Sha256Digest, Signature};
use clearpath_events::EventEnvelope;
use clearpath_products::{Product, ProductEvent, ProductId, ProductOnboarded, ProductStatus};

use super::{CursorStep, Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};
use crate::read_model::ReadStore;

/// One entry of a product's status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryRecord {
    /// Id of the event that recorded this update.
    pub record_id: Uuid,
    pub sequence: u64,
    pub actor_id: ActorId,
    pub location: String,
    pub status: ProductStatus,
    pub data_hash: Sha256Digest,
    pub previous_hash: Option<Sha256Digest>,
    pub chain_hash: Sha256Digest,
    pub recorded_at: DateTime<Utc>,
}

/// Live dashboard view of a product.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProductReadModel {
    pub product_id: ProductId,
    pub name: String,
    pub batch_number: String,
    pub manufacturer_id: ActorId,
    pub manufactured_at: DateTime<Utc>,
    pub expiry_date: Option<DateTime<Utc>>,
    pub current_location: String,
    pub status: ProductStatus,
    pub product_hash: Sha256Digest,
    pub signature: Signature,
    pub history: Vec<HistoryRecord>,
    pub onboarded_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<ProductOnboarded> for ProductReadModel {
    fn from(e: ProductOnboarded) -> Self {
        Self {
            product_id: e.product_id,
            name: e.name,
            batch_number: e.batch_number,
            manufacturer_id: e.manufacturer_id,
            manufactured_at: e.manufactured_at,
            expiry_date: e.expiry_date,
            current_location: e.location,
            status: ProductStatus::Manufactured,
            product_hash: e.product_hash,
            signature: e.signature,
            history: Vec::new(),
            onboarded_at: e.occurred_at,
            updated_at: e.occurred_at,
        }
    }
}

#[derive(Debug)]
pub struct ProductCatalogProjection<S>
where
    S: ReadStore<ProductId, ProductReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ProductCatalogProjection<S>
where
    S: ReadStore<ProductId, ProductReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, product_id: &ProductId) -> Option<ProductReadModel> {
        self.store.get(product_id)
    }

    /// All products, most recently onboarded first.
    pub fn list(&self) -> Vec<ProductReadModel> {
        let mut products = self.store.list();
        products.sort_by(|a, b| {
            b.onboarded_at
                .cmp(&a.onboarded_at)
                .then_with(|| b.product_id.0.cmp(&a.product_id.0))
        });
        products
    }
}

impl<S> Projection for ProductCatalogProjection<S>
where
    S: ReadStore<ProductId, ProductReadModel>,
{
    fn name(&self) -> &'static str {
        "products.catalog"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Product::AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(aggregate_id, seq)? == CursorStep::Duplicate {
            return Ok(());
        }

        let ev: ProductEvent = decode(Product::AGGREGATE_TYPE, envelope)?;
        let product_id = match &ev {
            ProductEvent::ProductOnboarded(e) => e.product_id,
            ProductEvent::StatusUpdated(e) => e.product_id,
        };
        ensure_same_stream(envelope, product_id.0)?;

        match ev {
            ProductEvent::ProductOnboarded(e) => {
                self.store.upsert(e.product_id, ProductReadModel::from(e));
            }
            ProductEvent::StatusUpdated(e) => {
                if let Some(mut rm) = self.store.get(&e.product_id) {
                    rm.current_location = e.location.clone();
                    rm.status = e.status;
                    rm.updated_at = e.occurred_at;
                    rm.history.push(HistoryRecord {
                        record_id: envelope.event_id(),
                        sequence: e.sequence,
                        actor_id: e.actor_id,
                        location: e.location,
                        status: e.status,
                        data_hash: e.data_hash,
                        previous_hash: e.previous_hash,
                        chain_hash: e.chain_hash,
                        recorded_at: e.occurred_at,
                    });
                    self.store.upsert(e.product_id, rm);
                }
            }
        }

        self.cursors.advance(aggregate_id, seq);
        Ok(())
    }

    fn reset(&self) {
        self.store.clear();
        self.cursors.clear();
    }
}
