//! Projections: read models built from published event envelopes.
//!
//! All projections are:
//! - **Rebuildable**: reset and replayed from the event store at startup
//! - **Idempotent**: per-stream cursors make redelivery harmless
//! - **Filtered**: each ignores aggregate types it does not own

use serde_json::Value as JsonValue;
use thiserror::Error;

use clearpath_events::EventEnvelope;

pub mod actors;
pub mod cursor;
pub mod passports;
pub mod products;
pub mod uniqueness;

pub use actors::{ActorDirectoryProjection, ActorReadModel};
pub use cursor::{CursorStep, StreamCursors};
pub use passports::{PassportEntryView, PassportLedgerProjection, PassportReadModel};
pub use products::{HistoryRecord, ProductCatalogProjection, ProductReadModel};
pub use uniqueness::UniquenessProjection;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("failed to deserialize {aggregate_type} event: {reason}")]
    Deserialize {
        aggregate_type: &'static str,
        reason: String,
    },

    /// The payload names a different aggregate than its envelope.
    #[error("stream mismatch: {0}")]
    StreamMismatch(String),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// A read model fed from the bus and rebuildable from the store.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop all state, cursors included.
    fn reset(&self);

    /// Reset, then apply `envelopes` in stream order.
    fn rebuild_from_scratch(
        &self,
        envelopes: impl IntoIterator<Item = EventEnvelope<JsonValue>>,
    ) -> Result<(), ProjectionError>
    where
        Self: Sized,
    {
        self.reset();

        let mut envs: Vec<_> = envelopes.into_iter().collect();
        envs.sort_by(|a, b| {
            (a.aggregate_type(), a.aggregate_id(), a.sequence_number()).cmp(&(
                b.aggregate_type(),
                b.aggregate_id(),
                b.sequence_number(),
            ))
        });

        for env in &envs {
            self.apply_envelope(env)?;
        }
        Ok(())
    }
}

/// Decode an envelope's payload into a domain event enum.
pub(crate) fn decode<E: serde::de::DeserializeOwned>(
    aggregate_type: &'static str,
    envelope: &EventEnvelope<JsonValue>,
) -> Result<E, ProjectionError> {
    serde_json::from_value(envelope.payload().clone()).map_err(|e| ProjectionError::Deserialize {
        aggregate_type,
        reason: e.to_string(),
    })
}

pub(crate) fn ensure_same_stream(
    envelope: &EventEnvelope<JsonValue>,
    payload_id: clearpath_core::AggregateId,
) -> Result<(), ProjectionError> {
    if payload_id != envelope.aggregate_id() {
        return Err(ProjectionError::StreamMismatch(format!(
            "payload id {payload_id} does not match envelope aggregate_id {}",
            envelope.aggregate_id()
        )));
    }
    Ok(())
}
