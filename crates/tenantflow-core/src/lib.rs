pub mod canonical;
pub mod error;
pub mod sanitization;
pub mod store;
pub mod template;
pub mod types;

// Re-export commonly used types
pub use canonical::{canonical_json, IdempotencyKey};
pub use error::{CoreError, CoreResult};
pub use sanitization::{create_debug_string, is_sensitive_field, sanitize_json_value};
pub use store::{CredentialRepository, IdempotencyStore, RunStore};
pub use template::{render_template, template_references, TemplateError, TemplateRef, TemplateScope};
pub use types::{
    CredentialDraft, CredentialRecord, IdempotencyEntry, IdempotencyState, ReserveOutcome,
    RunStatus, SealedSecret, StepError, StepErrorKind, StepState, StepStatus, WorkflowDefinition,
    WorkflowRun, WorkflowStep,
};
