use serde::Deserialize;
use serde_json::Value as JsonValue;
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use tenantflow_core::{template_references, TemplateRef, WorkflowDefinition};
use tracing::{debug, info};

use crate::env_resolver::EnvResolver;
use crate::error::{ConfigError, ConfigResult};

/// Supported file formats for workflow documents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Yaml,
    Json,
}

impl FileFormat {
    /// Detect file format from extension
    pub fn from_path<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();
        match path.extension().and_then(|s| s.to_str()) {
            Some("yaml") | Some("yml") => Ok(FileFormat::Yaml),
            Some("json") => Ok(FileFormat::Json),
            Some(ext) => Err(ConfigError::UnsupportedFormat(ext.to_string())),
            None => Err(ConfigError::UnsupportedFormat("no extension".to_string())),
        }
    }
}

#[derive(Deserialize)]
struct WorkflowDocument {
    workflows: Vec<WorkflowDefinition>,
}

/// Loads and validates workflow definitions from YAML or JSON documents
#[derive(Debug, Clone, Default)]
pub struct WorkflowLoader {
    env_resolver: Option<EnvResolver>,
}

impl WorkflowLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `${VAR}` placeholders before parsing
    pub fn with_env_resolver(mut self, resolver: EnvResolver) -> Self {
        self.env_resolver = Some(resolver);
        self
    }

    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> ConfigResult<Vec<WorkflowDefinition>> {
        let path = path.as_ref();
        let format = FileFormat::from_path(path)?;
        let content = fs::read_to_string(path)?;
        let workflows = self.parse_content(&content, format)?;
        info!(path = %path.display(), count = workflows.len(), "loaded workflow definitions");
        Ok(workflows)
    }

    /// Load several files, rejecting a workflow name defined twice
    pub fn load_files<P: AsRef<Path>>(&self, paths: &[P]) -> ConfigResult<Vec<WorkflowDefinition>> {
        let mut all = Vec::new();
        for path in paths {
            all.extend(self.load_file(path)?);
        }
        ensure_unique_names(&all)?;
        Ok(all)
    }

    /// Parse a document holding either `workflows: [...]` or a single workflow
    pub fn parse_content(&self, content: &str, format: FileFormat) -> ConfigResult<Vec<WorkflowDefinition>> {
        let mut root: JsonValue = match format {
            FileFormat::Yaml => serde_yaml::from_str(content)?,
            FileFormat::Json => serde_json::from_str(content)?,
        };

        if let Some(resolver) = &self.env_resolver {
            root = resolver.resolve(&root)?;
        }

        let workflows = if root.get("workflows").is_some() {
            serde_json::from_value::<WorkflowDocument>(root)?.workflows
        } else {
            vec![serde_json::from_value::<WorkflowDefinition>(root)?]
        };

        for workflow in &workflows {
            validate_workflow(workflow)?;
        }
        ensure_unique_names(&workflows)?;
        debug!(count = workflows.len(), "parsed workflow document");
        Ok(workflows)
    }
}

fn ensure_unique_names(workflows: &[WorkflowDefinition]) -> ConfigResult<()> {
    let mut seen = HashSet::new();
    for workflow in workflows {
        if !seen.insert(workflow.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "workflow '{}' is defined more than once",
                workflow.name
            )));
        }
    }
    Ok(())
}

/// Structural checks: unique step names, pinned versions, and templates that
/// only reference steps declared earlier.
pub fn validate_workflow(workflow: &WorkflowDefinition) -> ConfigResult<()> {
    if workflow.name.trim().is_empty() {
        return Err(ConfigError::Validation("workflow name must not be empty".to_string()));
    }
    if workflow.steps.is_empty() {
        return Err(ConfigError::Validation(format!("workflow '{}' has no steps", workflow.name)));
    }

    let mut earlier: HashSet<&str> = HashSet::new();
    for step in &workflow.steps {
        let fail = |reason: String| {
            ConfigError::Validation(format!("workflow '{}', step '{}': {}", workflow.name, step.name, reason))
        };

        if step.name.trim().is_empty() {
            return Err(ConfigError::Validation(format!(
                "workflow '{}' has a step without a name",
                workflow.name
            )));
        }
        if earlier.contains(step.name.as_str()) {
            return Err(fail("duplicate step name".to_string()));
        }
        if step.operation.trim().is_empty() {
            return Err(fail("operation must not be empty".to_string()));
        }
        if step.version == 0 {
            return Err(fail("operation version must be 1 or greater".to_string()));
        }
        if step.timeout_ms == Some(0) {
            return Err(fail("timeout_ms must be greater than zero".to_string()));
        }

        let references = template_references(&step.input).map_err(|source| ConfigError::Template {
            workflow: workflow.name.clone(),
            step: step.name.clone(),
            source,
        })?;
        for reference in references {
            if let TemplateRef::StepOutput { step: target, .. } = reference {
                if !earlier.contains(target.as_str()) {
                    return Err(fail(format!(
                        "input references step '{}', which does not run before this step",
                        target
                    )));
                }
            }
        }

        earlier.insert(step.name.as_str());
    }
    Ok(())
}
