//! Observability setup for Weft binaries.

pub mod tracing_setup;
