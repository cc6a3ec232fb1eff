//! Tenant credential store
//!
//! Seals provider secrets per (tenant, provider) and hands them back only while
//! they are unexpired. Every sealed payload is bound to its owning pair, so a
//! record copied to another tenant fails to unseal.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tenantflow_core::{CoreError, CredentialDraft, CredentialRecord, CredentialRepository};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cipher::{CipherError, SecretCipher};

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no credential stored for tenant '{tenant_id}' and provider '{provider}'")]
    NotFound { tenant_id: String, provider: String },

    #[error(
        "credential for tenant '{tenant_id}' and provider '{provider}' expired at {expired_at}; re-authentication required"
    )]
    Expired { tenant_id: String, provider: String, expired_at: DateTime<Utc> },

    #[error("credential cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("credential storage error: {0}")]
    Store(#[from] CoreError),

    #[error("invalid credential request: {0}")]
    Invalid(String),
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// Plaintext secret returned to operation handlers. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(***)")
    }
}

/// Credential metadata without secret material
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CredentialStatus {
    pub tenant_id: String,
    pub provider: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotation_version: i64,
    pub key_version: u32,
    pub expired: bool,
}

impl CredentialStatus {
    fn from_record(record: &CredentialRecord, now: DateTime<Utc>) -> Self {
        Self {
            tenant_id: record.tenant_id.clone(),
            provider: record.provider.clone(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            rotation_version: record.rotation_version,
            key_version: record.sealed_payload.key_version,
            expired: record.is_expired_at(now),
        }
    }
}

#[derive(Clone)]
pub struct CredentialStore {
    repository: Arc<dyn CredentialRepository>,
    cipher: SecretCipher,
}

impl CredentialStore {
    pub fn new(repository: Arc<dyn CredentialRepository>, cipher: SecretCipher) -> Self {
        Self { repository, cipher }
    }

    /// Seal and store a secret, replacing any previous one for the pair.
    pub async fn put(
        &self,
        tenant_id: &str,
        provider: &str,
        plaintext_secret: &str,
        ttl: Duration,
    ) -> CredentialResult<CredentialRecord> {
        validate_identity(tenant_id, provider)?;

        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| CredentialError::Invalid("ttl is out of range".to_string()))?;
        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(ttl)
            .ok_or_else(|| CredentialError::Invalid("ttl is out of range".to_string()))?;

        let sealed_payload =
            self.cipher.seal_bound(plaintext_secret.as_bytes(), &binding(tenant_id, provider))?;

        let record = self
            .repository
            .put_rotating(CredentialDraft {
                tenant_id: tenant_id.to_string(),
                provider: provider.to_string(),
                sealed_payload,
                created_at: now,
                expires_at,
            })
            .await?;

        info!(
            tenant_id = %tenant_id,
            provider = %provider,
            rotation_version = record.rotation_version,
            expires_at = %record.expires_at,
            "credential stored"
        );
        Ok(record)
    }

    /// Unseal the current secret for the pair.
    pub async fn get(&self, tenant_id: &str, provider: &str) -> CredentialResult<Secret> {
        let record = self.repository.get(tenant_id, provider).await?.ok_or_else(|| {
            CredentialError::NotFound { tenant_id: tenant_id.to_string(), provider: provider.to_string() }
        })?;

        if record.is_expired_at(Utc::now()) {
            warn!(
                tenant_id = %tenant_id,
                provider = %provider,
                expired_at = %record.expires_at,
                "credential expired"
            );
            return Err(CredentialError::Expired {
                tenant_id: tenant_id.to_string(),
                provider: provider.to_string(),
                expired_at: record.expires_at,
            });
        }

        let plaintext =
            self.cipher.unseal_bound(&record.sealed_payload, &binding(tenant_id, provider))?;
        let secret = String::from_utf8(plaintext).map_err(|_| {
            CredentialError::Cipher(CipherError::MalformedPayload("secret is not valid UTF-8".to_string()))
        })?;

        debug!(tenant_id = %tenant_id, provider = %provider, "credential unsealed");
        Ok(Secret(secret))
    }

    /// Remove the credential for a pair; true if one existed
    pub async fn revoke(&self, tenant_id: &str, provider: &str) -> CredentialResult<bool> {
        let removed = self.repository.delete(tenant_id, provider).await?;
        if removed {
            info!(tenant_id = %tenant_id, provider = %provider, "credential revoked");
        }
        Ok(removed)
    }

    /// Remove every credential a tenant holds
    pub async fn revoke_tenant(&self, tenant_id: &str) -> CredentialResult<u64> {
        let removed = self.repository.delete_tenant(tenant_id).await?;
        info!(tenant_id = %tenant_id, removed, "tenant credentials revoked");
        Ok(removed)
    }

    pub async fn describe(
        &self,
        tenant_id: &str,
        provider: &str,
    ) -> CredentialResult<Option<CredentialStatus>> {
        let now = Utc::now();
        Ok(self
            .repository
            .get(tenant_id, provider)
            .await?
            .map(|record| CredentialStatus::from_record(&record, now)))
    }

    pub async fn list_for_tenant(&self, tenant_id: &str) -> CredentialResult<Vec<CredentialStatus>> {
        let now = Utc::now();
        Ok(self
            .repository
            .list_for_tenant(tenant_id)
            .await?
            .iter()
            .map(|record| CredentialStatus::from_record(record, now))
            .collect())
    }

    /// Delete every expired record
    pub async fn purge_expired(&self) -> CredentialResult<u64> {
        let purged = self.repository.purge_expired(Utc::now()).await?;
        if purged > 0 {
            info!(purged, "expired credentials purged");
        }
        Ok(purged)
    }
}

impl fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialStore").field("cipher", &self.cipher).finish_non_exhaustive()
    }
}

fn validate_identity(tenant_id: &str, provider: &str) -> CredentialResult<()> {
    if tenant_id.trim().is_empty() {
        return Err(CredentialError::Invalid("tenant_id must not be empty".to_string()));
    }
    if provider.trim().is_empty() {
        return Err(CredentialError::Invalid("provider must not be empty".to_string()));
    }
    Ok(())
}

/// Associated data binding a sealed payload to its owner. Length prefixes keep
/// ("a/b", "c") and ("a", "b/c") distinct.
fn binding(tenant_id: &str, provider: &str) -> Vec<u8> {
    format!("credential:{}:{}:{}:{}", tenant_id.len(), tenant_id, provider.len(), provider).into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryCredentialRepository;

    fn store() -> (CredentialStore, MemoryCredentialRepository) {
        let repo = MemoryCredentialRepository::new();
        let cipher = SecretCipher::new(&SecretCipher::generate_master_key(), 1).unwrap();
        (CredentialStore::new(Arc::new(repo.clone()), cipher), repo)
    }

    #[tokio::test]
    async fn put_then_get_returns_plaintext() {
        let (store, _) = store();
        store.put("acme", "google_ads", "1//refresh", Duration::from_secs(3600)).await.unwrap();
        assert_eq!(store.get("acme", "google_ads").await.unwrap().expose(), "1//refresh");
    }

    #[tokio::test]
    async fn stored_payload_is_sealed() {
        let (store, repo) = store();
        store.put("acme", "google_ads", "1//refresh", Duration::from_secs(3600)).await.unwrap();
        let record = repo.get("acme", "google_ads").await.unwrap().unwrap();
        assert!(!record.sealed_payload.data.contains("1//refresh"));
    }

    #[tokio::test]
    async fn rotation_replaces_secret_and_bumps_version() {
        let (store, _) = store();
        let first = store.put("acme", "google_ads", "old", Duration::from_secs(3600)).await.unwrap();
        let second = store.put("acme", "google_ads", "new", Duration::from_secs(3600)).await.unwrap();

        assert_eq!(first.rotation_version, 1);
        assert_eq!(second.rotation_version, 2);
        assert_eq!(store.get("acme", "google_ads").await.unwrap().expose(), "new");
    }

    #[tokio::test]
    async fn zero_ttl_is_immediately_expired() {
        let (store, _) = store();
        store.put("acme", "google_ads", "tok", Duration::ZERO).await.unwrap();
        let err = store.get("acme", "google_ads").await.unwrap_err();
        assert!(matches!(err, CredentialError::Expired { .. }));
    }

    #[tokio::test]
    async fn missing_and_revoked_credentials_are_not_found() {
        let (store, _) = store();
        assert!(matches!(
            store.get("acme", "google_ads").await.unwrap_err(),
            CredentialError::NotFound { .. }
        ));

        store.put("acme", "google_ads", "tok", Duration::from_secs(60)).await.unwrap();
        assert!(store.revoke("acme", "google_ads").await.unwrap());
        assert!(!store.revoke("acme", "google_ads").await.unwrap());
        assert!(matches!(
            store.get("acme", "google_ads").await.unwrap_err(),
            CredentialError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn tenants_are_isolated() {
        let (store, _) = store();
        store.put("acme", "google_ads", "acme-secret", Duration::from_secs(60)).await.unwrap();
        assert!(matches!(
            store.get("globex", "google_ads").await.unwrap_err(),
            CredentialError::NotFound { .. }
        ));
    }

    #[tokio::test]
    async fn record_moved_to_another_tenant_fails_to_unseal() {
        let (store, repo) = store();
        store.put("acme", "google_ads", "acme-secret", Duration::from_secs(60)).await.unwrap();
        let record = repo.get("acme", "google_ads").await.unwrap().unwrap();

        repo.put_rotating(CredentialDraft {
            tenant_id: "globex".to_string(),
            provider: "google_ads".to_string(),
            sealed_payload: record.sealed_payload,
            created_at: record.created_at,
            expires_at: record.expires_at,
        })
        .await
        .unwrap();

        assert!(matches!(
            store.get("globex", "google_ads").await.unwrap_err(),
            CredentialError::Cipher(CipherError::IntegrityFailure)
        ));
    }

    #[tokio::test]
    async fn describe_and_purge() {
        let (store, _) = store();
        store.put("acme", "google_ads", "a", Duration::from_secs(60)).await.unwrap();
        store.put("acme", "meta_ads", "b", Duration::ZERO).await.unwrap();

        let status = store.describe("acme", "meta_ads").await.unwrap().unwrap();
        assert!(status.expired);
        assert_eq!(store.list_for_tenant("acme").await.unwrap().len(), 2);

        assert_eq!(store.purge_expired().await.unwrap(), 1);
        assert!(store.describe("acme", "meta_ads").await.unwrap().is_none());
        assert_eq!(store.revoke_tenant("acme").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn empty_identity_is_rejected() {
        let (store, _) = store();
        assert!(matches!(
            store.put("", "google_ads", "x", Duration::from_secs(1)).await.unwrap_err(),
            CredentialError::Invalid(_)
        ));
    }

    #[test]
    fn secret_debug_is_redacted() {
        assert_eq!(format!("{:?}", Secret::new("hunter2")), "Secret(***)");
    }
}
