//! Products domain module (batches and their journey, event-sourced).
//!
//! A product is onboarded with a manufacturer-signed fingerprint of its
//! identity fields. Every status update appends a hash-chained record to its
//! history, anchored at that fingerprint. All logic here is deterministic
//! (no IO, no HTTP, no storage).

pub mod product;

pub use product::{
    DEFAULT_LOCATION, OnboardProduct, Product, ProductCommand, ProductEvent, ProductId,
    ProductOnboarded, ProductStatus, ProductVerification, StatusRecord, StatusUpdated,
    UpdateStatus, product_fingerprint, status_record_hash,
};
