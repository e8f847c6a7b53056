//! Actors domain module (supply-chain participants, event-sourced).
//!
//! Registration, mock OTP bookkeeping, KYC completion and deactivation are
//! implemented as deterministic domain logic (no IO, no HTTP, no storage).
//! Key generation and OTP checking happen outside; the aggregate only records
//! the verified outcome.

pub mod actor;

pub use actor::{
    AadhaarNumber, Actor, ActorCommand, ActorDeactivated, ActorEvent, ActorId, ActorRegistered,
    ActorRole, CompleteKyc, DeactivateActor, KycCompleted, OtpRequested, RecordOtpRequest,
    RegisterActor,
};
