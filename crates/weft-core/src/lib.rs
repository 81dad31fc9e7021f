//! Core engine for Weft.
//!
//! Holds definition loading and validation, template resolution, the step
//! registry with its built-in executors, and the scheduler that drives a run
//! to a sealed `RunRecord`. Storage and network adapters live in `weft-infra`.

pub mod event;
pub mod workflow;
