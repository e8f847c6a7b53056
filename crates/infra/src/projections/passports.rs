use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use clearpath_actors::ActorId;
use clearpath_crypto::{Sha256Digest, Signature};
use clearpath_events::EventEnvelope;
use clearpath_passport::{Passport, PassportEvent};
use clearpath_products::ProductId;

use super::{CursorStep, Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};
use crate::read_model::ReadStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassportEntryView {
    pub entry_id: Uuid,
    pub sequence: u64,
    pub event_type: String,
    pub actor_id: ActorId,
    pub location: Option<String>,
    pub data: JsonValue,
    pub data_hash: Sha256Digest,
    pub previous_hash: Option<Sha256Digest>,
    pub chain_hash: Sha256Digest,
    pub signature: Option<Signature>,
    pub recorded_at: DateTime<Utc>,
}

/// A product's Digital Product Passport as served to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PassportReadModel {
    pub product_id: ProductId,
    pub entries: Vec<PassportEntryView>,
}

#[derive(Debug)]
pub struct PassportLedgerProjection<S>
where
    S: ReadStore<ProductId, PassportReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> PassportLedgerProjection<S>
where
    S: ReadStore<ProductId, PassportReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, product_id: &ProductId) -> Option<PassportReadModel> {
        self.store.get(product_id)
    }
}

impl<S> Projection for PassportLedgerProjection<S>
where
    S: ReadStore<ProductId, PassportReadModel>,
{
    fn name(&self) -> &'static str {
        "passport.ledger"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Passport::AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(aggregate_id, seq)? == CursorStep::Duplicate {
            return Ok(());
        }

        let ev: PassportEvent = decode(Passport::AGGREGATE_TYPE, envelope)?;
        match ev {
            PassportEvent::EntryRecorded(e) => {
                ensure_same_stream(envelope, e.product_id.0)?;

                let mut rm = self.store.get(&e.product_id).unwrap_or_else(|| PassportReadModel {
                    product_id: e.product_id,
                    entries: Vec::new(),
                });
                rm.entries.push(PassportEntryView {
                    entry_id: envelope.event_id(),
                    sequence: e.sequence,
                    event_type: e.event_type,
                    actor_id: e.actor_id,
                    location: e.location,
                    data: e.data,
                    data_hash: e.data_hash,
                    previous_hash: e.previous_hash,
                    chain_hash: e.chain_hash,
                    signature: e.signature,
                    recorded_at: e.occurred_at,
                });
                self.store.upsert(e.product_id, rm);
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
