use crate::error::CoreResult;
use crate::types::{CredentialDraft, CredentialRecord, IdempotencyEntry, ReserveOutcome, WorkflowRun};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;

/// Async trait for persisting sealed tenant credentials
#[async_trait]
pub trait CredentialRepository: Send + Sync {
    /// Insert or replace the record for (tenant, provider) in one atomic step.
    /// The stored rotation version is the previous one plus one, or 1 for a new pair.
    async fn put_rotating(&self, draft: CredentialDraft) -> CoreResult<CredentialRecord>;
    /// Get the record for a tenant/provider pair
    async fn get(&self, tenant_id: &str, provider: &str) -> CoreResult<Option<CredentialRecord>>;
    /// Delete a record, returns true if one existed
    async fn delete(&self, tenant_id: &str, provider: &str) -> CoreResult<bool>;
    /// Delete every record of a tenant, returns the number removed
    async fn delete_tenant(&self, tenant_id: &str) -> CoreResult<u64>;
    /// List records of a tenant ordered by provider
    async fn list_for_tenant(&self, tenant_id: &str) -> CoreResult<Vec<CredentialRecord>>;
    /// Remove records whose expiry has passed
    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<u64>;
}

/// Async trait backing the idempotency ledger
///
/// A reservation is owned by the `holder` token passed to `try_reserve`. Only
/// that holder may complete or release it, so a holder whose lease was
/// reclaimed cannot touch the new owner's entry.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Atomically reserve `key` for `holder` unless a live entry exists.
    ///
    /// Must be a single conditional write: two concurrent callers can never both
    /// observe [`ReserveOutcome::Reserved`] for the same key.
    async fn try_reserve(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> CoreResult<ReserveOutcome>;
    /// Transition `holder`'s running reservation to completed; false if `holder`
    /// does not own a running entry for `key`
    async fn complete(
        &self,
        key: &str,
        holder: &str,
        result: &JsonValue,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> CoreResult<bool>;
    /// Drop `holder`'s running reservation; completed entries and other
    /// holders' reservations are left alone
    async fn release(&self, key: &str, holder: &str) -> CoreResult<bool>;
    /// Fetch an entry as stored
    async fn get(&self, key: &str) -> CoreResult<Option<IdempotencyEntry>>;
    /// Evict completed entries past their ttl
    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<u64>;
}

/// Async trait for storing workflow run snapshots
#[async_trait]
pub trait RunStore: Send + Sync {
    /// Store or replace a run snapshot
    async fn put(&self, run: &WorkflowRun) -> CoreResult<()>;
    /// Get a run by ID
    async fn get(&self, run_id: &str) -> CoreResult<Option<WorkflowRun>>;
    /// List runs of a tenant, most recent first
    async fn list_for_tenant(&self, tenant_id: &str) -> CoreResult<Vec<WorkflowRun>>;
}
