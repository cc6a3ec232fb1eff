//! TenantFlow CLI main entry point

use clap::Parser;
use tenantflow_cli::{
    cli::{Cli, Commands},
    commands::{
        CredentialCommand, KeygenCommand, LedgerCommand, MigrateCommand, RunCommand, WorkflowCommand,
    },
    error::CliResult,
    utils::{init_tracing, ColoredOutput},
};
use tenantflow_config::Settings;
use tracing::debug;

#[tokio::main]
async fn main() {
    let exit_code = match run().await {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("{} {}", ColoredOutput::error("Error:"), e);
            1
        }
    };

    std::process::exit(exit_code);
}

async fn run() -> CliResult<()> {
    let cli = Cli::parse();

    if cli.no_color {
        colored::control::set_override(false);
    }

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(db_url) = cli.db_url {
        settings.database_url = db_url;
    }

    let filter = if cli.verbose { "debug" } else { settings.log_filter.as_str() };
    init_tracing(filter)?;
    debug!("TenantFlow CLI v{}", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Keygen => KeygenCommand::run(),
        Commands::Migrate => MigrateCommand::run(&settings).await,
        Commands::Credential { action } => CredentialCommand::run(&settings, action).await,
        Commands::Workflow { action } => WorkflowCommand::run(&settings, action),
        Commands::Run { action } => RunCommand::run(&settings, action).await,
        Commands::Ledger { action } => LedgerCommand::run(&settings, action).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tenantflow_cli::cli::{CredentialAction, OutputFormat, RunAction};

    #[test]
    fn test_cli_parsing() {
        let cli = Cli::try_parse_from(["tenantflow", "--db-url", "sqlite:///tmp/test.db", "migrate"]).unwrap();

        assert_eq!(cli.db_url.as_deref(), Some("sqlite:///tmp/test.db"));
        assert!(matches!(cli.command, Commands::Migrate));
    }

    #[test]
    fn test_credential_put_parsing() {
        let cli = Cli::try_parse_from([
            "tenantflow",
            "credential",
            "put",
            "acme",
            "google_ads",
            "--ttl-secs",
            "600",
        ])
        .unwrap();

        if let Commands::Credential { action: CredentialAction::Put { tenant, provider, secret, ttl_secs } } =
            cli.command
        {
            assert_eq!(tenant, "acme");
            assert_eq!(provider, "google_ads");
            assert_eq!(secret, None);
            assert_eq!(ttl_secs, 600);
        } else {
            panic!("Expected credential put command");
        }
    }

    #[test]
    fn test_run_list_parsing() {
        let cli =
            Cli::try_parse_from(["tenantflow", "run", "list", "--tenant", "acme", "--format", "json"]).unwrap();

        if let Commands::Run { action: RunAction::List { tenant, limit, format } } = cli.command {
            assert_eq!(tenant, "acme");
            assert_eq!(limit, None);
            assert_eq!(format, OutputFormat::Json);
        } else {
            panic!("Expected run list command");
        }
    }

    #[test]
    fn test_revoke_tenant_is_kebab_case() {
        let cli = Cli::try_parse_from(["tenantflow", "credential", "revoke-tenant", "acme"]).unwrap();
        assert!(matches!(
            cli.command,
            Commands::Credential { action: CredentialAction::RevokeTenant { .. } }
        ));
        assert!(Cli::try_parse_from(["tenantflow", "workflow", "validate"]).is_ok());
    }
}
