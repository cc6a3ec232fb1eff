//! Execution of a single workflow step against the ledger and registry

use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use tenantflow_core::{
    create_debug_string, render_template, IdempotencyKey, StepError, StepErrorKind, TemplateScope, WorkflowStep,
};
use tenantflow_registry::{OperationDescriptor, OperationError, RegistryResult, TenantContext};
use tenantflow_store::{CredentialError, Reservation};
use tracing::{debug, error, info, warn, Instrument};

use crate::engine::EngineInner;

pub(crate) struct StepSuccess {
    pub key: String,
    pub output: JsonValue,
    pub from_ledger: bool,
}

pub(crate) struct StepFailure {
    /// Set once the input rendered and a key could be derived
    pub key: Option<String>,
    pub error: StepError,
}

impl StepFailure {
    fn new(key: Option<&IdempotencyKey>, error: StepError) -> Self {
        Self { key: key.map(|k| k.as_str().to_string()), error }
    }
}

impl EngineInner {
    /// Render, reserve, execute, then complete or release
    pub(crate) async fn run_step(
        &self,
        tenant_id: &str,
        run_id: &str,
        step: &WorkflowStep,
        scope: TemplateScope<'_>,
    ) -> Result<StepSuccess, StepFailure> {
        let input = render_template(&step.input, &scope).map_err(|e| {
            StepFailure::new(None, StepError::new(StepErrorKind::Template, e.to_string(), false))
        })?;
        let key = IdempotencyKey::derive(tenant_id, &step.operation, &input);
        debug!(idempotency_key = %key, "{}", create_debug_string("rendered input", &input));

        let descriptor = self.registry.resolve(&step.operation, step.version);
        let timeout = step
            .timeout_ms
            .map(Duration::from_millis)
            .or_else(|| descriptor.as_ref().ok().and_then(|d| d.timeout()))
            .unwrap_or(self.options.default_step_timeout);

        let lease = timeout + self.options.lease_margin;
        let token = match self.ledger.check_and_reserve_with_lease(&key, lease).await {
            Ok(Reservation::Fresh(token)) => token,
            Ok(Reservation::Duplicate(output)) => {
                info!(idempotency_key = %key, "step result replayed from ledger");
                return Ok(StepSuccess { key: key.into_string(), output, from_ledger: true });
            }
            Ok(Reservation::InFlight { retry_after }) => {
                let message = format!("another execution holds this step until {}", retry_after);
                return Err(StepFailure::new(
                    Some(&key),
                    StepError::new(StepErrorKind::InFlight, message, true),
                ));
            }
            Err(e) => {
                return Err(StepFailure::new(
                    Some(&key),
                    StepError::new(StepErrorKind::Ledger, e.to_string(), true),
                ));
            }
        };

        match self.execute_reserved(tenant_id, run_id, step, descriptor, input, timeout).await {
            Ok(output) => {
                // The side effect happened; a failed write only loses replay
                if let Err(e) = self.ledger.complete(&key, &token, &output).await {
                    warn!(idempotency_key = %key, error = %e, "failed to record step result");
                }
                Ok(StepSuccess { key: key.into_string(), output, from_ledger: false })
            }
            Err(step_error) => {
                match self.ledger.release(&key, &token).await {
                    Ok(true) => {}
                    Ok(false) => warn!(idempotency_key = %key, "reservation was reclaimed before release"),
                    Err(e) => warn!(idempotency_key = %key, error = %e, "failed to release reservation"),
                }
                Err(StepFailure::new(Some(&key), step_error))
            }
        }
    }

    async fn execute_reserved(
        &self,
        tenant_id: &str,
        run_id: &str,
        step: &WorkflowStep,
        descriptor: RegistryResult<Arc<OperationDescriptor>>,
        input: JsonValue,
        timeout: Duration,
    ) -> Result<JsonValue, StepError> {
        let descriptor = descriptor
            .map_err(|e| StepError::new(StepErrorKind::OperationNotFound, e.to_string(), false))?;
        let input = self
            .registry
            .validate_input(&descriptor, &input)
            .map_err(|e| StepError::new(StepErrorKind::Validation, e.to_string(), false))?;

        let mut ctx = TenantContext::new(tenant_id, run_id, step.name.as_str());
        if let Some(credentials) = &self.credentials {
            ctx = ctx.with_credentials(credentials.clone());
        }

        debug!(timeout_ms = timeout.as_millis() as u64, "executing operation");
        // Handlers run in their own task so a panic surfaces as a JoinError
        let handler = descriptor.handler();
        let mut task =
            tokio::spawn(async move { handler.execute(input, &ctx).await }.in_current_span());
        match tokio::time::timeout(timeout, &mut task).await {
            Ok(Ok(Ok(output))) => Ok(output),
            Ok(Ok(Err(err))) => Err(classify(&err)),
            Ok(Err(join_error)) => {
                error!(error = %join_error, "operation handler panicked");
                Err(StepError::new(
                    StepErrorKind::Operation,
                    format!("operation handler panicked: {}", join_error),
                    true,
                ))
            }
            Err(_) => {
                task.abort();
                Err(StepError::new(
                    StepErrorKind::Timeout,
                    format!("operation did not finish within {}ms", timeout.as_millis()),
                    true,
                ))
            }
        }
    }
}

fn classify(err: &OperationError) -> StepError {
    let kind = match err {
        OperationError::Credential(CredentialError::Expired { .. }) => StepErrorKind::CredentialExpired,
        OperationError::Credential(CredentialError::NotFound { .. }) => StepErrorKind::CredentialMissing,
        OperationError::Credential(CredentialError::Cipher(_)) => StepErrorKind::Cipher,
        _ => StepErrorKind::Operation,
    };
    if kind == StepErrorKind::Cipher {
        error!(error = %err, "credential could not be unsealed");
    }
    StepError::new(kind, err.to_string(), err.is_retryable())
}
