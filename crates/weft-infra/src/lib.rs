//! Infrastructure adapters for Weft.
//!
//! Provides the `http.request` step executor, the TOML config loader, a
//! filesystem `WorkflowSource`, a JSON-lines `RunRecordSink`, and data
//! directory resolution.

pub mod config;
pub mod filesystem;
pub mod workflow;
