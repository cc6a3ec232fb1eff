//! Workflow document validation

use crate::{
    cli::WorkflowAction,
    error::{CliError, CliResult},
    utils::ColoredOutput,
};
use tenantflow_config::{EnvResolver, Settings, WorkflowLoader};

pub struct WorkflowCommand;

impl WorkflowCommand {
    pub fn run(settings: &Settings, action: WorkflowAction) -> CliResult<()> {
        match action {
            WorkflowAction::Validate { files, no_env } => {
                let mut loader = WorkflowLoader::new();
                if !no_env {
                    loader = loader.with_env_resolver(EnvResolver::default());
                }

                let files = if files.is_empty() { settings.workflow_paths.clone() } else { files };
                if files.is_empty() {
                    return Err(CliError::InvalidArgument(
                        "no workflow files given and workflow_paths is not configured".to_string(),
                    ));
                }

                let workflows = loader.load_files(&files)?;
                for workflow in &workflows {
                    println!(
                        "{} {} ({} step(s))",
                        ColoredOutput::success("✓"),
                        ColoredOutput::highlight(&workflow.name),
                        workflow.steps.len()
                    );
                    for step in &workflow.steps {
                        let optional = if step.optional { " optional" } else { "" };
                        println!(
                            "    {} -> {}@v{}{}",
                            step.name,
                            step.operation,
                            step.version,
                            ColoredOutput::dim(optional)
                        );
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_validate_reports_invalid_documents() {
        let dir = tempdir().unwrap();
        let good = dir.path().join("good.yaml");
        let bad = dir.path().join("bad.yaml");
        std::fs::write(
            &good,
            "name: pause\nsteps:\n  - {name: pause, operation: pause_campaign, version: 1}\n",
        )
        .unwrap();
        std::fs::write(&bad, "name: empty\nsteps: []\n").unwrap();

        let settings = Settings::default();
        assert!(WorkflowCommand::run(
            &settings,
            WorkflowAction::Validate { files: vec![good.clone()], no_env: true }
        )
        .is_ok());
        assert!(matches!(
            WorkflowCommand::run(&settings, WorkflowAction::Validate { files: vec![good, bad], no_env: true }),
            Err(CliError::Config(_))
        ));
    }

    #[test]
    fn test_validate_defaults_to_configured_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("launch.yaml");
        std::fs::write(&path, "name: launch\nsteps:\n  - {name: create, operation: create_campaign, version: 1}\n")
            .unwrap();

        let settings = Settings { workflow_paths: vec![path], ..Settings::default() };
        assert!(WorkflowCommand::run(&settings, WorkflowAction::Validate { files: vec![], no_env: true }).is_ok());

        assert!(matches!(
            WorkflowCommand::run(&Settings::default(), WorkflowAction::Validate { files: vec![], no_env: true }),
            Err(CliError::InvalidArgument(_))
        ));
    }
}
