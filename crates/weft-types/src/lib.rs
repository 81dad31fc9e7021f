//! Shared domain types for Weft.
//!
//! This crate contains the serde types exchanged between the engine, its
//! adapters and callers: workflow definitions, run records, run events and
//! engine configuration.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono.

pub mod config;
pub mod event;
pub mod workflow;
