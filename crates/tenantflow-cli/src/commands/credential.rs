//! Credential administration

use crate::{
    cli::{CredentialAction, OutputFormat},
    error::{CliError, CliResult},
    utils::{format_timestamp, open_store, read_secret_from, ColoredOutput},
};
use std::sync::Arc;
use std::time::Duration;
use tenantflow_config::Settings;
use tenantflow_store::{CredentialStatus, CredentialStore, SecretCipher};
use tracing::debug;

pub struct CredentialCommand;

impl CredentialCommand {
    /// Every credential command needs the master key, even those that never unseal
    pub async fn run(settings: &Settings, action: CredentialAction) -> CliResult<()> {
        let cipher = SecretCipher::from_env()?;
        let store = open_store(settings).await?;
        let credentials = CredentialStore::new(Arc::new(store), cipher);
        Self::execute(&credentials, action).await
    }

    pub async fn execute(credentials: &CredentialStore, action: CredentialAction) -> CliResult<()> {
        match action {
            CredentialAction::Put { tenant, provider, secret, ttl_secs } => {
                let secret = match secret {
                    Some(secret) => secret,
                    None => read_secret_from(std::io::stdin().lock())?,
                };
                if ttl_secs == 0 {
                    return Err(CliError::InvalidArgument("--ttl-secs must be greater than zero".to_string()));
                }
                let record =
                    credentials.put(&tenant, &provider, &secret, Duration::from_secs(ttl_secs)).await?;
                println!(
                    "{} {}/{} (rotation {}, expires {})",
                    ColoredOutput::success("✓ Stored credential"),
                    tenant,
                    provider,
                    record.rotation_version,
                    format_timestamp(record.expires_at)
                );
            }
            CredentialAction::Status { tenant, provider, format } => {
                let statuses = match provider {
                    Some(provider) => credentials.describe(&tenant, &provider).await?.into_iter().collect(),
                    None => credentials.list_for_tenant(&tenant).await?,
                };
                debug!(tenant_id = %tenant, count = statuses.len(), "credential status");
                if format == OutputFormat::Table {
                    display_status_table(&tenant, &statuses);
                } else {
                    println!("{}", format.format_json(&serde_json::to_value(&statuses)?)?);
                }
            }
            CredentialAction::Revoke { tenant, provider } => {
                if credentials.revoke(&tenant, &provider).await? {
                    println!("{} {}/{}", ColoredOutput::success("✓ Revoked"), tenant, provider);
                } else {
                    println!("{} no credential for {}/{}", ColoredOutput::warning("!"), tenant, provider);
                }
            }
            CredentialAction::RevokeTenant { tenant } => {
                let removed = credentials.revoke_tenant(&tenant).await?;
                println!("{} {} credential(s) of {}", ColoredOutput::success("✓ Revoked"), removed, tenant);
            }
            CredentialAction::Purge => {
                let purged = credentials.purge_expired().await?;
                println!("{} {} expired credential(s)", ColoredOutput::success("✓ Purged"), purged);
            }
        }
        Ok(())
    }
}

fn display_status_table(tenant: &str, statuses: &[CredentialStatus]) {
    if statuses.is_empty() {
        println!("{}", ColoredOutput::dim(&format!("No credentials for tenant {}", tenant)));
        return;
    }

    println!(
        "{:<24} {:<10} {:<6} {:<24} {}",
        ColoredOutput::highlight("PROVIDER"),
        ColoredOutput::highlight("ROTATION"),
        ColoredOutput::highlight("KEY"),
        ColoredOutput::highlight("EXPIRES"),
        ColoredOutput::highlight("STATE"),
    );
    for status in statuses {
        let state = if status.expired {
            ColoredOutput::error("expired")
        } else {
            ColoredOutput::success("valid")
        };
        println!(
            "{:<24} {:<10} {:<6} {:<24} {}",
            status.provider,
            status.rotation_version,
            status.key_version,
            format_timestamp(status.expires_at),
            state
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantflow_store::{CredentialError, MemoryCredentialRepository};

    fn memory_store() -> CredentialStore {
        let cipher = SecretCipher::new(&SecretCipher::generate_master_key(), 1).unwrap();
        CredentialStore::new(Arc::new(MemoryCredentialRepository::new()), cipher)
    }

    fn put(tenant: &str, provider: &str, secret: &str) -> CredentialAction {
        CredentialAction::Put {
            tenant: tenant.to_string(),
            provider: provider.to_string(),
            secret: Some(secret.to_string()),
            ttl_secs: 3600,
        }
    }

    #[tokio::test]
    async fn test_put_status_and_revoke() {
        let store = memory_store();
        CredentialCommand::execute(&store, put("acme", "google_ads", "tok-1")).await.unwrap();
        CredentialCommand::execute(&store, put("acme", "google_ads", "tok-2")).await.unwrap();
        assert_eq!(store.get("acme", "google_ads").await.unwrap().expose(), "tok-2");
        assert_eq!(store.describe("acme", "google_ads").await.unwrap().unwrap().rotation_version, 2);

        CredentialCommand::execute(
            &store,
            CredentialAction::Status { tenant: "acme".to_string(), provider: None, format: OutputFormat::Json },
        )
        .await
        .unwrap();

        CredentialCommand::execute(
            &store,
            CredentialAction::Revoke { tenant: "acme".to_string(), provider: "google_ads".to_string() },
        )
        .await
        .unwrap();
        assert!(matches!(store.get("acme", "google_ads").await, Err(CredentialError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_zero_ttl_is_rejected() {
        let store = memory_store();
        let action = CredentialAction::Put {
            tenant: "acme".to_string(),
            provider: "meta_ads".to_string(),
            secret: Some("tok".to_string()),
            ttl_secs: 0,
        };
        assert!(matches!(
            CredentialCommand::execute(&store, action).await,
            Err(CliError::InvalidArgument(_))
        ));
    }
}
