//! Feeds the phone and batch number indexes from committed events, so the
//! indexes survive restarts through replay.

use std::sync::Arc;

use serde_json::Value as JsonValue;

use clearpath_actors::{Actor, ActorEvent};
use clearpath_events::EventEnvelope;
use clearpath_products::{Product, ProductEvent};

use super::{Projection, ProjectionError, decode};
use crate::read_model::UniqueIndex;

#[derive(Debug, Clone)]
pub struct UniquenessProjection {
    phones: Arc<UniqueIndex>,
    batches: Arc<UniqueIndex>,
}

impl UniquenessProjection {
    pub fn new(phones: Arc<UniqueIndex>, batches: Arc<UniqueIndex>) -> Self {
        Self { phones, batches }
    }
}

impl Projection for UniquenessProjection {
    fn name(&self) -> &'static str {
        "uniqueness"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        // Recording is idempotent, so no cursor is needed.
        match envelope.aggregate_type() {
            t if t == Actor::AGGREGATE_TYPE => {
                if let ActorEvent::ActorRegistered(e) = decode(Actor::AGGREGATE_TYPE, envelope)? {
                    self.phones.record(&e.phone_number, e.actor_id.0);
                }
            }
            t if t == Product::AGGREGATE_TYPE => {
                if let ProductEvent::ProductOnboarded(e) = decode(Product::AGGREGATE_TYPE, envelope)? {
                    self.batches.record(&e.batch_number, e.product_id.0);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn reset(&self) {
        self.phones.clear();
        self.batches.clear();
    }
}
