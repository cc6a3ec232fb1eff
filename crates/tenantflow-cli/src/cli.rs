//! CLI argument definitions using clap

use clap::{Parser, Subcommand};
use serde_json::Value as JsonValue;
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "tenantflow",
    about = "TenantFlow - tenant credentials, idempotency ledger and workflow runs",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Database URL, overrides the settings file
    #[arg(long, env = "TENANTFLOW_DATABASE_URL", help = "SQLite database URL (sqlite://path)")]
    pub db_url: Option<String>,

    /// Settings file
    #[arg(long, env = "TENANTFLOW_CONFIG", help = "Path to a TOML settings file")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, help = "Enable verbose output")]
    pub verbose: bool,

    /// Disable colored output
    #[arg(long, help = "Disable colored output")]
    pub no_color: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Generate a master key for TENANTFLOW_MASTER_KEY
    Keygen,

    /// Initialize database and run migrations
    Migrate,

    /// Manage tenant credentials
    Credential {
        #[command(subcommand)]
        action: CredentialAction,
    },

    /// Workflow definition tools
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },

    /// Inspect workflow runs
    Run {
        #[command(subcommand)]
        action: RunAction,
    },

    /// Idempotency ledger maintenance
    Ledger {
        #[command(subcommand)]
        action: LedgerAction,
    },
}

#[derive(Subcommand)]
pub enum CredentialAction {
    /// Store or rotate a credential
    Put {
        tenant: String,
        provider: String,

        /// Secret value; read from stdin when omitted
        #[arg(long, help = "Secret value (prefer stdin to keep it out of shell history)")]
        secret: Option<String>,

        /// Lifetime of the credential in seconds
        #[arg(long, default_value = "3600", help = "Seconds until the credential expires")]
        ttl_secs: u64,
    },

    /// Show credential metadata (never the secret)
    Status {
        tenant: String,

        /// Limit to one provider
        provider: Option<String>,

        #[arg(long, value_enum, default_value = "table", help = "Output format")]
        format: OutputFormat,
    },

    /// Delete one credential
    Revoke { tenant: String, provider: String },

    /// Delete every credential of a tenant
    RevokeTenant { tenant: String },

    /// Delete expired credentials
    Purge,
}

#[derive(Subcommand)]
pub enum WorkflowAction {
    /// Load and validate workflow documents
    Validate {
        #[arg(help = "Workflow files (YAML or JSON); defaults to the configured workflow_paths")]
        files: Vec<PathBuf>,

        /// Skip ${VAR} resolution
        #[arg(long, help = "Do not resolve ${VAR} placeholders")]
        no_env: bool,
    },
}

#[derive(Subcommand)]
pub enum RunAction {
    /// Show one run with its steps
    Show {
        run_id: String,

        #[arg(long, value_enum, default_value = "table", help = "Output format")]
        format: OutputFormat,
    },

    /// List runs of a tenant, most recent first
    List {
        #[arg(long, help = "Tenant id")]
        tenant: String,

        #[arg(long, help = "Only show the newest N runs")]
        limit: Option<usize>,

        #[arg(long, value_enum, default_value = "table", help = "Output format")]
        format: OutputFormat,
    },
}

#[derive(Subcommand)]
pub enum LedgerAction {
    /// Delete idempotency entries whose ttl has passed
    Purge,
}

#[derive(clap::ValueEnum, Clone, Debug, PartialEq)]
pub enum OutputFormat {
    /// Human-readable table format
    Table,
    /// Pretty-printed JSON
    Pretty,
    /// Compact JSON
    Json,
    /// YAML format
    Yaml,
}

impl OutputFormat {
    /// Format a JSON value according to the output format
    pub fn format_json(&self, value: &JsonValue) -> Result<String, serde_json::Error> {
        match self {
            Self::Table | Self::Pretty => serde_json::to_string_pretty(value),
            Self::Json => serde_json::to_string(value),
            Self::Yaml => serde_yaml::to_string(value).map_err(|e| {
                serde_json::Error::io(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("YAML serialization error: {}", e),
                ))
            }),
        }
    }
}
