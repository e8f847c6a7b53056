use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;

use clearpath_actors::{Actor, ActorEvent, ActorId, ActorRegistered, ActorRole};
use clearpath_crypto::PublicKey;
use clearpath_events::EventEnvelope;

use super::{CursorStep, Projection, ProjectionError, StreamCursors, decode, ensure_same_stream};
use crate::read_model::ReadStore;

/// Actor directory entry.
///
/// The Aadhaar hash stays in the event stream and is never projected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActorReadModel {
    pub actor_id: ActorId,
    pub name: String,
    pub phone_number: String,
    pub organization: String,
    pub role: ActorRole,
    pub public_key: Option<PublicKey>,
    pub verified: bool,
    pub active: bool,
    pub otp_requested_at: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub verified_at: Option<DateTime<Utc>>,
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl From<ActorRegistered> for ActorReadModel {
    fn from(e: ActorRegistered) -> Self {
        Self {
            actor_id: e.actor_id,
            name: e.name,
            phone_number: e.phone_number,
            organization: e.organization,
            role: e.role,
            public_key: None,
            verified: false,
            active: true,
            otp_requested_at: None,
            registered_at: e.occurred_at,
            verified_at: None,
            deactivated_at: None,
        }
    }
}

#[derive(Debug)]
pub struct ActorDirectoryProjection<S>
where
    S: ReadStore<ActorId, ActorReadModel>,
{
    store: S,
    cursors: StreamCursors,
}

impl<S> ActorDirectoryProjection<S>
where
    S: ReadStore<ActorId, ActorReadModel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: StreamCursors::new(),
        }
    }

    pub fn get(&self, actor_id: &ActorId) -> Option<ActorReadModel> {
        self.store.get(actor_id)
    }

    /// All actors, oldest registration first.
    pub fn list(&self) -> Vec<ActorReadModel> {
        let mut actors = self.store.list();
        actors.sort_by(|a, b| {
            a.registered_at
                .cmp(&b.registered_at)
                .then_with(|| a.actor_id.0.cmp(&b.actor_id.0))
        });
        actors
    }

    fn update(&self, actor_id: ActorId, f: impl FnOnce(&mut ActorReadModel)) {
        // Events after registration only arrive for registered actors.
        if let Some(mut rm) = self.store.get(&actor_id) {
            f(&mut rm);
            self.store.upsert(actor_id, rm);
        }
    }
}

impl<S> Projection for ActorDirectoryProjection<S>
where
    S: ReadStore<ActorId, ActorReadModel>,
{
    fn name(&self) -> &'static str {
        "actors.directory"
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        if envelope.aggregate_type() != Actor::AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();
        if self.cursors.check(aggregate_id, seq)? == CursorStep::Duplicate {
            return Ok(());
        }

        let ev: ActorEvent = decode(Actor::AGGREGATE_TYPE, envelope)?;
        let actor_id = match &ev {
            ActorEvent::ActorRegistered(e) => e.actor_id,
            ActorEvent::OtpRequested(e) => e.actor_id,
            ActorEvent::KycCompleted(e) => e.actor_id,
            ActorEvent::ActorDeactivated(e) => e.actor_id,
        };
        ensure_same_stream(envelope, actor_id.0)?;

        match ev {
            ActorEvent::ActorRegistered(e) => {
                self.store.upsert(e.actor_id, ActorReadModel::from(e));
            }
            ActorEvent::OtpRequested(e) => {
                self.update(e.actor_id, |rm| rm.otp_requested_at = Some(e.occurred_at));
            }
            ActorEvent::KycCompleted(e) => {
                self.update(e.actor_id, |rm| {
                    rm.public_key = Some(e.public_key);
                    rm.verified = true;
                    rm.verified_at = Some(e.occurred_at);
                });
            }
            ActorEvent::ActorDeactivated(e) => {
                self.update(e.actor_id, |rm| {
                    rm.active = false;
                    rm.deactivated_at = Some(e.occurred_at);
                });
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
