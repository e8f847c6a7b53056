//! Digital Product Passport: the append-only, hash-chained event log kept
//! per product (harvests, quality checks, shipments, customs clearance...).
//!
//! One passport stream exists per product and shares the product's id.

pub mod passport;

pub use passport::{
    EntryRecorded, Passport, PassportCommand, PassportEntry, PassportEvent, PassportVerification,
    RecordEntry, entry_data_hash,
};
