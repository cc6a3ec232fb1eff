//! Operation registry
//!
//! Operations are registered once per (name, version) at startup and resolved
//! by exact match. Each descriptor carries a compiled input schema and the
//! handler that performs the external side effect.

pub mod context;
pub mod error;
pub mod handler;
pub mod registry;

pub use context::TenantContext;
pub use error::{OperationError, RegistryError, RegistryResult, Violation};
pub use handler::{handler_fn, OperationHandler};
pub use registry::{OperationDescriptor, OperationRegistry};
