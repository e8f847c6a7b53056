//! Per-stream projection cursors.
//!
//! A cursor tracks the last sequence number a projection applied for each
//! aggregate stream, which makes projections idempotent under at-least-once
//! delivery: redelivered events (`seq <= cursor`) are skipped, gaps are errors.

use std::collections::HashMap;
use std::sync::RwLock;

use clearpath_core::AggregateId;

use super::ProjectionError;

/// What a projection should do with an incoming event.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CursorStep {
    Apply,
    /// Already applied; skip.
    Duplicate,
}

#[derive(Debug, Default)]
pub struct StreamCursors {
    inner: RwLock<HashMap<AggregateId, u64>>,
}

impl StreamCursors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, aggregate_id: AggregateId) -> u64 {
        match self.inner.read() {
            Ok(cursors) => cursors.get(&aggregate_id).copied().unwrap_or(0),
            Err(_) => 0,
        }
    }

    /// Decide whether `seq` is the next event for the stream.
    pub fn check(&self, aggregate_id: AggregateId, seq: u64) -> Result<CursorStep, ProjectionError> {
        let last = self.get(aggregate_id);
        if seq == 0 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            return Ok(CursorStep::Duplicate);
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence { last, found: seq });
        }
        Ok(CursorStep::Apply)
    }

    pub fn advance(&self, aggregate_id: AggregateId, seq: u64) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.insert(aggregate_id, seq);
        }
    }

    pub fn clear(&self) {
        if let Ok(mut cursors) = self.inner.write() {
            cursors.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicates_are_skipped_and_gaps_rejected() {
        let cursors = StreamCursors::new();
        let id = AggregateId::new();

        assert_eq!(cursors.check(id, 1).unwrap(), CursorStep::Apply);
        cursors.advance(id, 1);
        assert_eq!(cursors.check(id, 1).unwrap(), CursorStep::Duplicate);
        assert_eq!(cursors.check(id, 2).unwrap(), CursorStep::Apply);

        let err = cursors.check(id, 3).unwrap_err();
        assert!(matches!(err, ProjectionError::NonMonotonicSequence { last: 1, found: 3 }));
    }

    #[test]
    fn stream_must_start_at_one() {
        let cursors = StreamCursors::new();
        assert!(cursors.check(AggregateId::new(), 2).is_err());
        assert!(cursors.check(AggregateId::new(), 0).is_err());
    }
}
