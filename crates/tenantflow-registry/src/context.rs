use std::fmt;
use tenantflow_store::{CredentialStore, Secret};

use crate::error::OperationError;

/// Per-invocation context handed to operation handlers
#[derive(Clone)]
pub struct TenantContext {
    tenant_id: String,
    run_id: String,
    step_name: String,
    credentials: Option<CredentialStore>,
}

impl TenantContext {
    pub fn new(
        tenant_id: impl Into<String>,
        run_id: impl Into<String>,
        step_name: impl Into<String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            run_id: run_id.into(),
            step_name: step_name.into(),
            credentials: None,
        }
    }

    pub fn with_credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn step_name(&self) -> &str {
        &self.step_name
    }

    /// Unsealed credential of this tenant for `provider`.
    ///
    /// Expiry is checked on every call, so a credential that lapses between
    /// steps is reported as expired rather than served.
    pub async fn credential(&self, provider: &str) -> Result<Secret, OperationError> {
        let store = self.credentials.as_ref().ok_or_else(|| {
            OperationError::permanent(format!(
                "no credential store available to step '{}'",
                self.step_name
            ))
        })?;
        Ok(store.get(&self.tenant_id, provider).await?)
    }
}

impl fmt::Debug for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TenantContext")
            .field("tenant_id", &self.tenant_id)
            .field("run_id", &self.run_id)
            .field("step_name", &self.step_name)
            .field("credentials", &self.credentials.is_some())
            .finish()
    }
}
