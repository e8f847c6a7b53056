//! Infrastructure layer: event storage, command dispatch, read models,
//! configuration and external service adapters.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod external;
pub mod projections;
pub mod read_model;
pub mod replay;
