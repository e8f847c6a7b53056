//! Uniqueness reservations for values the domain requires to be unique
//! across aggregates (actor phone numbers, product batch numbers).
//!
//! Aggregates only see their own stream, so a value is reserved here before
//! its command is dispatched and released again if the dispatch is rejected
//! before anything is appended. The index is rebuilt from the event store at
//! startup.

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;

use clearpath_core::AggregateId;

use crate::command_dispatcher::DispatchError;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{index} '{value}' is already registered")]
pub struct UniqueViolation {
    pub index: &'static str,
    pub value: String,
    pub owner: AggregateId,
}

impl From<UniqueViolation> for DispatchError {
    fn from(value: UniqueViolation) -> Self {
        DispatchError::Conflict(value.to_string())
    }
}

/// Outcome of a successful reservation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Reservation {
    /// The value was free and now belongs to the caller.
    Reserved,
    /// The caller already owned the value.
    AlreadyOwned,
}

#[derive(Debug)]
pub struct UniqueIndex {
    name: &'static str,
    owners: RwLock<HashMap<String, AggregateId>>,
}

impl UniqueIndex {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            owners: RwLock::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    fn normalize(value: &str) -> String {
        value.trim().to_string()
    }

    /// Claim `value` for `owner`. Fails if another aggregate holds it.
    pub fn reserve(&self, value: &str, owner: AggregateId) -> Result<Reservation, UniqueViolation> {
        let key = Self::normalize(value);
        let mut owners = match self.owners.write() {
            Ok(o) => o,
            Err(poisoned) => poisoned.into_inner(),
        };

        match owners.get(&key) {
            Some(existing) if *existing == owner => Ok(Reservation::AlreadyOwned),
            Some(existing) => Err(UniqueViolation {
                index: self.name,
                value: key,
                owner: *existing,
            }),
            None => {
                owners.insert(key, owner);
                Ok(Reservation::Reserved)
            }
        }
    }

    /// Give a value back, but only if `owner` still holds it.
    pub fn release(&self, value: &str, owner: AggregateId) {
        let key = Self::normalize(value);
        if let Ok(mut owners) = self.owners.write() {
            if owners.get(&key) == Some(&owner) {
                owners.remove(&key);
            }
        }
    }

    /// Release after a failed dispatch, unless the failure came after the
    /// events were appended; the value is then taken.
    pub fn release_unless_committed(&self, value: &str, owner: AggregateId, err: &DispatchError) {
        if !err.events_committed() {
            self.release(value, owner);
        }
    }

    /// Record an ownership taken from the event history (replay).
    pub fn record(&self, value: &str, owner: AggregateId) {
        if let Ok(mut owners) = self.owners.write() {
            owners.insert(Self::normalize(value), owner);
        }
    }

    pub fn owner_of(&self, value: &str) -> Option<AggregateId> {
        let owners = self.owners.read().ok()?;
        owners.get(&Self::normalize(value)).copied()
    }

    pub fn clear(&self) {
        if let Ok(mut owners) = self.owners.write() {
            owners.clear();
        }
    }

    pub fn len(&self) -> usize {
        self.owners.read().map(|o| o.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
