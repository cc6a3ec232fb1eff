use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::future::Future;
use std::sync::Arc;

use crate::context::TenantContext;
use crate::error::OperationError;

/// Performs one external side effect for a tenant
#[async_trait]
pub trait OperationHandler: Send + Sync {
    /// Execute with input that already passed schema validation
    async fn execute(
        &self,
        input: JsonValue,
        ctx: &TenantContext,
    ) -> Result<JsonValue, OperationError>;
}

struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> OperationHandler for FnHandler<F>
where
    F: Fn(JsonValue, TenantContext) -> Fut + Send + Sync,
    Fut: Future<Output = Result<JsonValue, OperationError>> + Send,
{
    async fn execute(
        &self,
        input: JsonValue,
        ctx: &TenantContext,
    ) -> Result<JsonValue, OperationError> {
        (self.0)(input, ctx.clone()).await
    }
}

/// Wrap an async closure as a handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn OperationHandler>
where
    F: Fn(JsonValue, TenantContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<JsonValue, OperationError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}
