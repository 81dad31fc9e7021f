//! Built-in step executors with no external I/O.
//!
//! `http.request` lives in `weft-infra` next to the reqwest client.

pub mod condition;
pub mod delay;
pub mod transform;

pub use condition::ConditionStep;
pub use delay::DelayStep;
pub use transform::TransformStep;
