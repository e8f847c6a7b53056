//! Append-only event store boundary.
//!
//! Streams are keyed by `(aggregate_type, aggregate_id)`. The in-memory store
//! backs tests and the default profile; Postgres is available behind the
//! `postgres` feature.

pub mod in_memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod r#trait;

pub use in_memory::InMemoryEventStore;
#[cfg(feature = "postgres")]
pub use postgres::PostgresEventStore;
pub use r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};
