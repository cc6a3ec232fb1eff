//! `${VAR}` / `${VAR:default}` substitution in workflow documents, limited to
//! whitelisted variable prefixes

use once_cell::sync::Lazy;
use regex::{Captures, Regex};
use serde_json::Value as JsonValue;
use std::env;
use thiserror::Error;

static ENV_VAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::([^}]*))?\}").expect("env var pattern"));

#[derive(Debug, Error)]
pub enum EnvResolverError {
    #[error("Environment variable '{0}' not found and no default provided")]
    VarNotFound(String),

    #[error("Environment variable '{0}' is not in whitelist. Allowed prefixes: {1:?}")]
    VarNotWhitelisted(String, Vec<String>),
}

#[derive(Debug, Clone)]
pub struct EnvResolver {
    /// Empty means every variable is allowed
    allowed_prefixes: Vec<String>,
}

impl Default for EnvResolver {
    fn default() -> Self {
        Self { allowed_prefixes: vec!["TENANTFLOW_".to_string(), "APP_".to_string()] }
    }
}

impl EnvResolver {
    pub fn new(allowed_prefixes: Vec<String>) -> Self {
        Self { allowed_prefixes }
    }

    pub fn unrestricted() -> Self {
        Self { allowed_prefixes: vec![] }
    }

    /// Resolve variables in every string of `value`
    pub fn resolve(&self, value: &JsonValue) -> Result<JsonValue, EnvResolverError> {
        self.resolve_with(value, &|name| env::var(name).ok())
    }

    /// Resolve using a custom variable source
    pub fn resolve_with(
        &self,
        value: &JsonValue,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<JsonValue, EnvResolverError> {
        match value {
            JsonValue::String(s) => self.resolve_string(s, lookup),
            JsonValue::Array(items) => Ok(JsonValue::Array(
                items.iter().map(|item| self.resolve_with(item, lookup)).collect::<Result<_, _>>()?,
            )),
            JsonValue::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, val) in map {
                    resolved.insert(key.clone(), self.resolve_with(val, lookup)?);
                }
                Ok(JsonValue::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn resolve_string(
        &self,
        input: &str,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<JsonValue, EnvResolverError> {
        if !input.contains("${") {
            return Ok(JsonValue::String(input.to_string()));
        }

        let mut failure = None;
        let replaced = ENV_VAR.replace_all(input, |caps: &Captures| {
            match self.lookup_var(&caps[1], caps.get(2).map(|m| m.as_str()), lookup) {
                Ok(value) => value,
                Err(e) => {
                    failure.get_or_insert(e);
                    String::new()
                }
            }
        });
        if let Some(err) = failure {
            return Err(err);
        }

        // A lone variable takes the type of its value
        let whole = ENV_VAR.find(input).map(|m| m.as_str().len()) == Some(input.len());
        if whole {
            Ok(coerce(&replaced))
        } else {
            Ok(JsonValue::String(replaced.into_owned()))
        }
    }

    fn lookup_var(
        &self,
        name: &str,
        default: Option<&str>,
        lookup: &dyn Fn(&str) -> Option<String>,
    ) -> Result<String, EnvResolverError> {
        if !self.allowed_prefixes.is_empty()
            && !self.allowed_prefixes.iter().any(|prefix| name.starts_with(prefix.as_str()))
        {
            return Err(EnvResolverError::VarNotWhitelisted(
                name.to_string(),
                self.allowed_prefixes.clone(),
            ));
        }

        match (lookup(name), default) {
            (Some(value), _) => Ok(value),
            (None, Some(default)) => Ok(default.to_string()),
            (None, None) => Err(EnvResolverError::VarNotFound(name.to_string())),
        }
    }
}

fn coerce(raw: &str) -> JsonValue {
    if raw.starts_with('{') || raw.starts_with('[') {
        if let Ok(parsed) = serde_json::from_str(raw) {
            return parsed;
        }
    }
    if let Ok(b) = raw.parse::<bool>() {
        return JsonValue::Bool(b);
    }
    if let Ok(i) = raw.parse::<i64>() {
        return JsonValue::from(i);
    }
    if let Some(n) = raw.parse::<f64>().ok().and_then(serde_json::Number::from_f64) {
        return JsonValue::Number(n);
    }
    JsonValue::String(raw.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    #[test]
    fn test_basic_resolution_and_defaults() {
        let env = vars(&[("TENANTFLOW_REGION", "eu-west")]);
        let resolver = EnvResolver::default();
        let result = resolver
            .resolve_with(
                &json!({"region": "${TENANTFLOW_REGION}", "limit": "${TENANTFLOW_LIMIT:25}"}),
                &|k| env.get(k).cloned(),
            )
            .unwrap();
        assert_eq!(result, json!({"region": "eu-west", "limit": 25}));
    }

    #[test]
    fn test_embedded_variables_stay_strings() {
        let env = vars(&[("TENANTFLOW_PORT", "8080")]);
        let result = EnvResolver::default()
            .resolve_with(&json!("http://localhost:${TENANTFLOW_PORT}/api"), &|k| env.get(k).cloned())
            .unwrap();
        assert_eq!(result, json!("http://localhost:8080/api"));
    }

    #[test]
    fn test_missing_variable_error() {
        let result = EnvResolver::default().resolve_with(&json!("${TENANTFLOW_MISSING}"), &|_| None);
        assert!(matches!(result, Err(EnvResolverError::VarNotFound(_))));
    }

    #[test]
    fn test_whitelist_validation() {
        let result = EnvResolver::default().resolve_with(&json!("${HOME}"), &|_| Some("/root".into()));
        assert!(matches!(result, Err(EnvResolverError::VarNotWhitelisted(_, _))));

        let result = EnvResolver::unrestricted().resolve_with(&json!("${HOME}"), &|_| Some("/root".into()));
        assert_eq!(result.unwrap(), json!("/root"));
    }

    #[test]
    fn test_step_templates_are_untouched() {
        let result = EnvResolver::default()
            .resolve_with(&json!("{{ steps.create.output.id }}"), &|_| None)
            .unwrap();
        assert_eq!(result, json!("{{ steps.create.output.id }}"));
    }

    #[test]
    fn test_json_values_are_parsed() {
        let env = vars(&[("TENANTFLOW_GEO", r#"["US","CA"]"#)]);
        let result = EnvResolver::default().resolve_with(&json!("${TENANTFLOW_GEO}"), &|k| env.get(k).cloned());
        assert_eq!(result.unwrap(), json!(["US", "CA"]));
    }
}
