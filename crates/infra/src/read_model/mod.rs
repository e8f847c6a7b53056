//! Disposable read model storage and uniqueness reservations.

pub mod store;
pub mod unique_index;

pub use store::{InMemoryReadStore, ReadStore};
pub use unique_index::{Reservation, UniqueIndex, UniqueViolation};
