//! Runtime settings: defaults, then an optional TOML file, then `TENANTFLOW_*`
//! environment variables. The master key is read from the environment only and
//! never appears here.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub database_url: String,
    /// How long completed idempotency results are replayed
    pub idempotency_ttl_secs: u64,
    /// Lease on a running reservation before it may be reclaimed
    pub reservation_lease_secs: u64,
    /// Step timeout when neither the step nor the operation sets one
    pub default_step_timeout_ms: u64,
    /// `tracing_subscriber::EnvFilter` directive used when `RUST_LOG` is unset
    pub log_filter: String,
    /// Workflow documents loaded at startup
    pub workflow_paths: Vec<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            database_url: "sqlite://tenantflow.db".to_string(),
            idempotency_ttl_secs: 24 * 60 * 60,
            reservation_lease_secs: 300,
            default_step_timeout_ms: 30_000,
            log_filter: "info".to_string(),
            workflow_paths: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from an optional file plus the process environment
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        Self::load_with(path, |key| std::env::var(key).ok())
    }

    pub fn load_with<F>(path: Option<&Path>, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                debug!(path = %path.display(), "loading settings file");
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        settings.apply_env(lookup)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_toml(content: &str) -> ConfigResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Override fields from `TENANTFLOW_*` variables
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("TENANTFLOW_DATABASE_URL") {
            self.database_url = url;
        }
        if let Some(raw) = lookup("TENANTFLOW_IDEMPOTENCY_TTL_SECS") {
            self.idempotency_ttl_secs = parse_u64("TENANTFLOW_IDEMPOTENCY_TTL_SECS", &raw)?;
        }
        if let Some(raw) = lookup("TENANTFLOW_RESERVATION_LEASE_SECS") {
            self.reservation_lease_secs = parse_u64("TENANTFLOW_RESERVATION_LEASE_SECS", &raw)?;
        }
        if let Some(raw) = lookup("TENANTFLOW_DEFAULT_STEP_TIMEOUT_MS") {
            self.default_step_timeout_ms = parse_u64("TENANTFLOW_DEFAULT_STEP_TIMEOUT_MS", &raw)?;
        }
        if let Some(filter) = lookup("TENANTFLOW_LOG") {
            self.log_filter = filter;
        }
        if let Some(paths) = lookup("TENANTFLOW_WORKFLOW_PATHS") {
            self.workflow_paths =
                paths.split(',').map(str::trim).filter(|p| !p.is_empty()).map(PathBuf::from).collect();
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database_url.trim().is_empty() {
            return Err(invalid("database_url", "must not be empty"));
        }
        if self.reservation_lease_secs == 0 {
            return Err(invalid("reservation_lease_secs", "must be greater than zero"));
        }
        if self.default_step_timeout_ms == 0 {
            return Err(invalid("default_step_timeout_ms", "must be greater than zero"));
        }
        Ok(())
    }

    pub fn idempotency_ttl(&self) -> Duration {
        Duration::from_secs(self.idempotency_ttl_secs)
    }

    pub fn reservation_lease(&self) -> Duration {
        Duration::from_secs(self.reservation_lease_secs)
    }

    pub fn default_step_timeout(&self) -> Duration {
        Duration::from_millis(self.default_step_timeout_ms)
    }
}

fn parse_u64(key: &str, raw: &str) -> ConfigResult<u64> {
    raw.trim()
        .parse()
        .map_err(|_| invalid(key, &format!("expected a non-negative integer, got '{}'", raw)))
}

fn invalid(key: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidSetting { key: key.to_string(), reason: reason.to_string() }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let settings = Settings::load_with(None, |_| None).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.reservation_lease(), Duration::from_secs(300));
    }

    #[test]
    fn test_file_then_env_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
database_url = "sqlite:///var/lib/tenantflow/db.sqlite"
idempotency_ttl_secs = 3600
workflow_paths = ["workflows/launch.yaml"]
"#
        )
        .unwrap();

        let env: HashMap<&str, &str> =
            [("TENANTFLOW_IDEMPOTENCY_TTL_SECS", "60"), ("TENANTFLOW_LOG", "tenantflow=debug")].into();
        let settings =
            Settings::load_with(Some(file.path()), |k| env.get(k).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.database_url, "sqlite:///var/lib/tenantflow/db.sqlite");
        assert_eq!(settings.idempotency_ttl(), Duration::from_secs(60));
        assert_eq!(settings.log_filter, "tenantflow=debug");
        assert_eq!(settings.workflow_paths, vec![PathBuf::from("workflows/launch.yaml")]);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = Settings::load_with(None, |k| {
            (k == "TENANTFLOW_RESERVATION_LEASE_SECS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));

        let err = Settings::from_toml("reservation_lease_secs = 0").unwrap().validate().unwrap_err();
        assert!(matches!(err, ConfigError::InvalidSetting { .. }));

        assert!(matches!(Settings::from_toml("unknown_key = 1"), Err(ConfigError::Toml(_))));
    }
}
