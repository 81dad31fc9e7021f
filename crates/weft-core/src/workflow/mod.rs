//! Workflow engine: definitions, graph analysis, resolution and execution.

pub mod clock;
pub mod context;
pub mod dag;
pub mod definition;
pub mod executor;
pub mod expression;
pub mod registry;
pub mod retry;
pub mod sink;
pub mod source;
pub mod steps;
