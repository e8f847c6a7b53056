//! Startup replay: rebuild every read model from the event store.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::event_store::{EventStore, EventStoreError};
use crate::projections::{Projection, ProjectionError};

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error("event store error: {0}")]
    EventStore(#[from] EventStoreError),

    #[error("projection {projection} failed: {source}")]
    Projection {
        projection: &'static str,
        #[source]
        source: ProjectionError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub events: usize,
    pub streams: usize,
    pub projections: Vec<&'static str>,
    #[serde(skip)]
    pub elapsed: Duration,
}

/// Reset `projections` and feed them every stored event in commit order.
///
/// Commit order preserves per-stream sequence order, which is all the
/// projections' cursors require.
pub fn replay_all<S>(store: &S, projections: &[&dyn Projection]) -> Result<ReplayReport, ReplayError>
where
    S: EventStore + ?Sized,
{
    let started = Instant::now();
    let events = store.load_all()?;

    for p in projections {
        p.reset();
    }

    let mut streams = HashSet::new();
    for stored in &events {
        streams.insert((stored.aggregate_type.as_str(), stored.aggregate_id));
        let envelope = stored.to_envelope();
        for p in projections {
            p.apply_envelope(&envelope).map_err(|source| ReplayError::Projection {
                projection: p.name(),
                source,
            })?;
        }
    }

    let report = ReplayReport {
        events: events.len(),
        streams: streams.len(),
        projections: projections.iter().map(|p| p.name()).collect(),
        elapsed: started.elapsed(),
    };
    info!(
        events = report.events,
        streams = report.streams,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "read models rebuilt from event store"
    );
    Ok(report)
}
