//! Utility functions for the CLI

use crate::error::{CliError, CliResult};
use anyhow::Context;
use chrono::{DateTime, Utc};
use colored::{ColoredString, Colorize};
use std::io::Read;
use std::path::Path;
use tenantflow_config::Settings;
use tenantflow_store::SqlStore;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

/// Initialize tracing; `RUST_LOG` wins over the configured default filter
pub fn init_tracing(default_filter: &str) -> CliResult<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(default_filter)).map_err(|e| {
            CliError::InvalidArgument(format!("Invalid log filter '{}': {}", default_filter, e))
        })?;

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| CliError::General(format!("Failed to set tracing subscriber: {}", e)))?;

    Ok(())
}

/// Utility for colored console output
pub struct ColoredOutput;

impl ColoredOutput {
    pub fn success(msg: &str) -> ColoredString {
        msg.green().bold()
    }

    pub fn error(msg: &str) -> ColoredString {
        msg.red().bold()
    }

    pub fn warning(msg: &str) -> ColoredString {
        msg.yellow().bold()
    }

    pub fn dim(msg: &str) -> ColoredString {
        msg.dimmed()
    }

    pub fn highlight(msg: &str) -> ColoredString {
        msg.cyan().bold()
    }

    /// Color a run or step status by outcome
    pub fn status(status: &str) -> ColoredString {
        match status {
            "succeeded" => status.green(),
            "failed" | "cancelled" => status.red(),
            "partially_failed" | "skipped" => status.yellow(),
            _ => status.blue(),
        }
    }
}

/// Open the configured database, creating parent directories for file URLs
pub async fn open_store(settings: &Settings) -> CliResult<SqlStore> {
    if let Some(path) = settings.database_url.strip_prefix("sqlite://") {
        ensure_parent_dir(Path::new(path))?;
    }
    Ok(SqlStore::new(&settings.database_url).await?)
}

/// Create parent directories if they don't exist
pub fn ensure_parent_dir(path: &Path) -> CliResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Read a secret from stdin, dropping the trailing newline
pub fn read_secret_from(mut reader: impl Read) -> CliResult<String> {
    let mut secret = String::new();
    reader.read_to_string(&mut secret).context("failed to read secret from stdin")?;
    let secret = secret.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        return Err(CliError::InvalidArgument("secret must not be empty".to_string()));
    }
    Ok(secret)
}

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

/// Truncate text to a maximum length with ellipsis
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}
