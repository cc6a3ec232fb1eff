//! Database migration command

use crate::{error::CliResult, utils::{open_store, ColoredOutput}};
use tenantflow_config::Settings;
use tenantflow_store::sql_store::MigrationRunner;
use tracing::info;

pub struct MigrateCommand;

impl MigrateCommand {
    pub async fn run(settings: &Settings) -> CliResult<()> {
        info!(database_url = %settings.database_url, "initializing database");

        // Opening the store applies pending migrations
        let store = open_store(settings).await?;
        let versions = MigrationRunner::new(store.pool().clone()).applied_versions().await?;

        println!("{}", ColoredOutput::success("✓ Database initialized successfully"));
        println!("Database: {}", ColoredOutput::highlight(&settings.database_url));
        println!("Schema versions: {:?}", versions);

        Ok(())
    }
}
