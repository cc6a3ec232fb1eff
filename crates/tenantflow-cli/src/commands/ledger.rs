//! Idempotency ledger maintenance

use crate::{
    cli::LedgerAction,
    error::CliResult,
    utils::{open_store, ColoredOutput},
};
use std::sync::Arc;
use tenantflow_config::Settings;
use tenantflow_store::{IdempotencyLedger, LedgerConfig};

pub struct LedgerCommand;

impl LedgerCommand {
    pub async fn run(settings: &Settings, action: LedgerAction) -> CliResult<()> {
        let store = open_store(settings).await?;
        let ledger = IdempotencyLedger::new(
            Arc::new(store),
            LedgerConfig { ttl: settings.idempotency_ttl(), reservation_lease: settings.reservation_lease() },
        );

        match action {
            LedgerAction::Purge => {
                let purged = ledger.purge_expired().await?;
                println!("{} {} expired ledger entries", ColoredOutput::success("✓ Purged"), purged);
            }
        }
        Ok(())
    }
}
