//! Workflow engine
//!
//! Runs declarative workflows for one tenant at a time, strictly step by step.
//! Every step is keyed in the idempotency ledger before its operation runs, so
//! re-dispatching a failed run replays completed side effects from the ledger
//! instead of repeating them.

pub mod engine;
pub mod error;
mod step;

pub use engine::{EngineBuilder, EngineOptions, WorkflowEngine};
pub use error::{RuntimeError, RuntimeResult};
