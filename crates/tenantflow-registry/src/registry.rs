use jsonschema::JSONSchema;
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult, Violation};
use crate::handler::OperationHandler;

/// A registered operation. Immutable once built.
pub struct OperationDescriptor {
    name: String,
    version: u32,
    description: Option<String>,
    timeout: Option<Duration>,
    input_schema: JsonValue,
    compiled_schema: Arc<JSONSchema>,
    handler: Arc<dyn OperationHandler>,
}

impl OperationDescriptor {
    /// Build a descriptor, compiling `input_schema` up front
    pub fn new(
        name: impl Into<String>,
        version: u32,
        input_schema: JsonValue,
        handler: Arc<dyn OperationHandler>,
    ) -> RegistryResult<Self> {
        let name = name.into();
        let compiled = JSONSchema::compile(&input_schema).map_err(|e| RegistryError::InvalidSchema {
            name: name.clone(),
            version,
            reason: e.to_string(),
        })?;

        Ok(Self {
            name,
            version,
            description: None,
            timeout: None,
            input_schema,
            compiled_schema: Arc::new(compiled),
            handler,
        })
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Default execution timeout; a workflow step may override it
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn input_schema(&self) -> &JsonValue {
        &self.input_schema
    }

    pub fn handler(&self) -> Arc<dyn OperationHandler> {
        Arc::clone(&self.handler)
    }

    /// Check `input` against the compiled schema, collecting every violation
    pub fn validate(&self, input: &JsonValue) -> RegistryResult<()> {
        if let Err(errors) = self.compiled_schema.validate(input) {
            let violations: Vec<Violation> = errors
                .map(|e| Violation { path: e.instance_path.to_string(), message: e.to_string() })
                .collect();
            return Err(RegistryError::Validation { operation: self.name.clone(), violations });
        }
        Ok(())
    }
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("description", &self.description)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Registry of operations keyed by exact (name, version)
#[derive(Default)]
pub struct OperationRegistry {
    operations: HashMap<(String, u32), Arc<OperationDescriptor>>,
}

impl OperationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor. A (name, version) pair can only be registered once.
    pub fn register(&mut self, descriptor: OperationDescriptor) -> RegistryResult<Arc<OperationDescriptor>> {
        let key = (descriptor.name.clone(), descriptor.version);
        if self.operations.contains_key(&key) {
            return Err(RegistryError::DuplicateOperation { name: key.0, version: key.1 });
        }

        let descriptor = Arc::new(descriptor);
        info!(operation = %key.0, version = key.1, "registered operation");
        self.operations.insert(key, Arc::clone(&descriptor));
        Ok(descriptor)
    }

    /// Look up an operation by exact version; there is no "latest" fallback
    pub fn resolve(&self, name: &str, version: u32) -> RegistryResult<Arc<OperationDescriptor>> {
        self.operations.get(&(name.to_string(), version)).cloned().ok_or_else(|| {
            debug!(operation = %name, version, "operation not found");
            RegistryError::OperationNotFound { name: name.to_string(), version }
        })
    }

    /// Validate input for a resolved operation, returning it unchanged when it conforms
    pub fn validate_input(
        &self,
        descriptor: &OperationDescriptor,
        input: &JsonValue,
    ) -> RegistryResult<JsonValue> {
        descriptor.validate(input)?;
        Ok(input.clone())
    }

    pub fn contains(&self, name: &str, version: u32) -> bool {
        self.operations.contains_key(&(name.to_string(), version))
    }

    /// All registered (name, version) pairs, sorted
    pub fn list(&self) -> Vec<(String, u32)> {
        let mut keys: Vec<(String, u32)> = self.operations.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Registered versions of one operation, ascending
    pub fn versions(&self, name: &str) -> Vec<u32> {
        let mut versions: Vec<u32> =
            self.operations.keys().filter(|(n, _)| n == name).map(|(_, v)| *v).collect();
        versions.sort_unstable();
        versions
    }

    /// Descriptors grouped by name, for listings
    pub fn descriptors(&self) -> BTreeMap<String, Vec<Arc<OperationDescriptor>>> {
        let mut grouped: BTreeMap<String, Vec<Arc<OperationDescriptor>>> = BTreeMap::new();
        for descriptor in self.operations.values() {
            grouped.entry(descriptor.name.clone()).or_default().push(Arc::clone(descriptor));
        }
        for list in grouped.values_mut() {
            list.sort_by_key(|d| d.version);
        }
        grouped
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

impl fmt::Debug for OperationRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationRegistry").field("operations", &self.list()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use serde_json::json;

    fn noop() -> Arc<dyn OperationHandler> {
        handler_fn(|input, _ctx| async move { Ok(input) })
    }

    fn descriptor(name: &str, version: u32, schema: JsonValue) -> OperationDescriptor {
        OperationDescriptor::new(name, version, schema, noop()).unwrap()
    }

    #[test]
    fn test_register_and_resolve_exact_version() {
        let mut registry = OperationRegistry::new();
        registry.register(descriptor("send_campaign", 1, json!({}))).unwrap();
        registry.register(descriptor("send_campaign", 2, json!({}))).unwrap();

        assert_eq!(registry.resolve("send_campaign", 2).unwrap().version(), 2);
        assert!(matches!(
            registry.resolve("send_campaign", 3),
            Err(RegistryError::OperationNotFound { version: 3, .. })
        ));
        assert!(matches!(
            registry.resolve("pause_campaign", 1),
            Err(RegistryError::OperationNotFound { .. })
        ));
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = OperationRegistry::new();
        registry.register(descriptor("send_campaign", 1, json!({}))).unwrap();
        let err = registry.register(descriptor("send_campaign", 1, json!({}))).unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateOperation { version: 1, .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_invalid_schema_is_rejected_at_build() {
        let err = OperationDescriptor::new("bad", 1, json!({"type": "not-a-type"}), noop()).unwrap_err();
        assert!(matches!(err, RegistryError::InvalidSchema { .. }));
    }

    #[test]
    fn test_validation_reports_all_violations() {
        let mut registry = OperationRegistry::new();
        let op = registry
            .register(descriptor(
                "send_campaign",
                1,
                json!({
                    "type": "object",
                    "required": ["campaign", "budget"],
                    "properties": {
                        "campaign": {"type": "string"},
                        "budget": {"type": "number", "minimum": 0}
                    }
                }),
            ))
            .unwrap();

        let ok = json!({"campaign": "spring", "budget": 10});
        assert_eq!(registry.validate_input(&op, &ok).unwrap(), ok);

        match registry.validate_input(&op, &json!({"campaign": 5, "budget": -1})).unwrap_err() {
            RegistryError::Validation { operation, violations } => {
                assert_eq!(operation, "send_campaign");
                assert_eq!(violations.len(), 2);
                let paths: Vec<&str> = violations.iter().map(|v| v.path.as_str()).collect();
                assert!(paths.contains(&"/campaign"));
                assert!(paths.contains(&"/budget"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_list_and_versions() {
        let mut registry = OperationRegistry::new();
        registry.register(descriptor("send_campaign", 2, json!({}))).unwrap();
        registry.register(descriptor("send_campaign", 1, json!({}))).unwrap();
        registry.register(descriptor("create_audience", 1, json!({}))).unwrap();

        assert_eq!(
            registry.list(),
            vec![
                ("create_audience".to_string(), 1),
                ("send_campaign".to_string(), 1),
                ("send_campaign".to_string(), 2)
            ]
        );
        assert_eq!(registry.versions("send_campaign"), vec![1, 2]);
        assert!(registry.versions("missing").is_empty());
        assert_eq!(registry.descriptors()["send_campaign"].len(), 2);
    }

    #[test]
    fn test_descriptor_metadata() {
        let op = descriptor("send_campaign", 1, json!({"type": "object"}))
            .with_description("Send a campaign")
            .with_timeout(Duration::from_secs(5));
        assert_eq!(op.description(), Some("Send a campaign"));
        assert_eq!(op.timeout(), Some(Duration::from_secs(5)));
        assert_eq!(op.input_schema(), &json!({"type": "object"}));
        assert!(format!("{:?}", op).contains("send_campaign"));
    }
}
