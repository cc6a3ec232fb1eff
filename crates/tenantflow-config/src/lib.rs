pub mod env_resolver;
pub mod error;
pub mod loader;
pub mod settings;

pub use env_resolver::{EnvResolver, EnvResolverError};
pub use error::{ConfigError, ConfigResult};
pub use loader::{validate_workflow, FileFormat, WorkflowLoader};
pub use settings::Settings;
