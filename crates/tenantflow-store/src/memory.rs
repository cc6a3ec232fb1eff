use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use tenantflow_core::{
    CoreResult, CredentialDraft, CredentialRecord, CredentialRepository, IdempotencyEntry,
    IdempotencyState, IdempotencyStore, ReserveOutcome, RunStore, WorkflowRun,
};
use tokio::sync::RwLock;

/// In-memory implementation of CredentialRepository for testing
#[derive(Debug, Clone)]
pub struct MemoryCredentialRepository {
    data: Arc<RwLock<HashMap<(String, String), CredentialRecord>>>,
}

impl MemoryCredentialRepository {
    pub fn new() -> Self {
        Self { data: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl Default for MemoryCredentialRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CredentialRepository for MemoryCredentialRepository {
    async fn put_rotating(&self, draft: CredentialDraft) -> CoreResult<CredentialRecord> {
        let mut data = self.data.write().await;
        let key = (draft.tenant_id.clone(), draft.provider.clone());
        let rotation_version = data.get(&key).map(|r| r.rotation_version + 1).unwrap_or(1);
        let record = draft.into_record(rotation_version);
        data.insert(key, record.clone());
        Ok(record)
    }

    async fn get(&self, tenant_id: &str, provider: &str) -> CoreResult<Option<CredentialRecord>> {
        let data = self.data.read().await;
        Ok(data.get(&(tenant_id.to_string(), provider.to_string())).cloned())
    }

    async fn delete(&self, tenant_id: &str, provider: &str) -> CoreResult<bool> {
        let mut data = self.data.write().await;
        Ok(data.remove(&(tenant_id.to_string(), provider.to_string())).is_some())
    }

    async fn delete_tenant(&self, tenant_id: &str) -> CoreResult<u64> {
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|(tenant, _), _| tenant != tenant_id);
        Ok((before - data.len()) as u64)
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> CoreResult<Vec<CredentialRecord>> {
        let data = self.data.read().await;
        let mut records: Vec<CredentialRecord> =
            data.values().filter(|r| r.tenant_id == tenant_id).cloned().collect();
        records.sort_by(|a, b| a.provider.cmp(&b.provider));
        Ok(records)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|_, record| !record.is_expired_at(now));
        Ok((before - data.len()) as u64)
    }
}

/// In-memory implementation of IdempotencyStore
///
/// Reservation is check-and-set under a single write lock.
#[derive(Debug, Clone)]
pub struct MemoryIdempotencyStore {
    data: Arc<RwLock<HashMap<String, IdempotencyEntry>>>,
}

impl MemoryIdempotencyStore {
    pub fn new() -> Self {
        Self { data: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl Default for MemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn try_reserve(
        &self,
        key: &str,
        holder: &str,
        now: DateTime<Utc>,
        lease: Duration,
    ) -> CoreResult<ReserveOutcome> {
        let mut data = self.data.write().await;

        if let Some(existing) = data.get(key) {
            if !existing.is_reclaimable_at(now) {
                return Ok(match existing.state {
                    IdempotencyState::Completed => ReserveOutcome::Completed(
                        existing.result_snapshot.clone().unwrap_or(JsonValue::Null),
                    ),
                    IdempotencyState::Running => {
                        ReserveOutcome::InFlight { reserved_until: existing.reserved_until }
                    }
                });
            }
        }

        data.insert(key.to_string(), IdempotencyEntry::running(key, holder, now, lease));
        Ok(ReserveOutcome::Reserved)
    }

    async fn complete(
        &self,
        key: &str,
        holder: &str,
        result: &JsonValue,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> CoreResult<bool> {
        let mut data = self.data.write().await;
        match data.get_mut(key) {
            Some(entry) if entry.is_held_by(holder) => {
                entry.state = IdempotencyState::Completed;
                entry.result_snapshot = Some(result.clone());
                entry.ttl_seconds = Some(ttl.num_seconds());
                entry.expires_at = Some(now + ttl);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release(&self, key: &str, holder: &str) -> CoreResult<bool> {
        let mut data = self.data.write().await;
        match data.get(key) {
            Some(entry) if entry.is_held_by(holder) => {
                data.remove(key);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get(&self, key: &str) -> CoreResult<Option<IdempotencyEntry>> {
        let data = self.data.read().await;
        Ok(data.get(key).cloned())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> CoreResult<u64> {
        let mut data = self.data.write().await;
        let before = data.len();
        data.retain(|_, entry| {
            !(entry.state == IdempotencyState::Completed && entry.is_reclaimable_at(now))
        });
        Ok((before - data.len()) as u64)
    }
}

/// In-memory implementation of RunStore
#[derive(Debug, Clone)]
pub struct MemoryRunStore {
    data: Arc<RwLock<HashMap<String, WorkflowRun>>>,
}

impl MemoryRunStore {
    pub fn new() -> Self {
        Self { data: Arc::new(RwLock::new(HashMap::new())) }
    }
}

impl Default for MemoryRunStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RunStore for MemoryRunStore {
    async fn put(&self, run: &WorkflowRun) -> CoreResult<()> {
        let mut data = self.data.write().await;
        data.insert(run.run_id.clone(), run.clone());
        Ok(())
    }

    async fn get(&self, run_id: &str) -> CoreResult<Option<WorkflowRun>> {
        let data = self.data.read().await;
        Ok(data.get(run_id).cloned())
    }

    async fn list_for_tenant(&self, tenant_id: &str) -> CoreResult<Vec<WorkflowRun>> {
        let data = self.data.read().await;
        let mut runs: Vec<WorkflowRun> =
            data.values().filter(|run| run.tenant_id == tenant_id).cloned().collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then_with(|| b.run_id.cmp(&a.run_id)));
        Ok(runs)
    }
}
