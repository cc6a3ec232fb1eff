use tenantflow_core::{CoreError, RunStatus};
use thiserror::Error;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    #[error("Workflow '{0}' is already registered")]
    DuplicateWorkflow(String),

    #[error("Run not found: {0}")]
    RunNotFound(String),

    #[error("Run {run_id} is {status} and cannot be {action}")]
    InvalidState { run_id: String, status: RunStatus, action: &'static str },

    #[error("Workflow '{workflow}' no longer matches the steps of run {run_id}")]
    DefinitionChanged { run_id: String, workflow: String },

    #[error("Invalid workflow: {0}")]
    Config(#[from] tenantflow_config::ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] CoreError),
}

impl RuntimeError {
    pub(crate) fn invalid_state(run_id: &str, status: RunStatus, action: &'static str) -> Self {
        Self::InvalidState { run_id: run_id.to_string(), status, action }
    }
}
