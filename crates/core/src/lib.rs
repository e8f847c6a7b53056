//! Domain building blocks shared by every aggregate crate.
//!
//! This crate contains **pure domain** primitives shared by the actor, product
//! and passport modules (no infrastructure concerns).

pub mod aggregate;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use error::{DomainError, DomainResult};
pub use id::AggregateId;
