//! Run inspection. Snapshots are printed with secret-looking fields redacted.

use crate::{
    cli::{OutputFormat, RunAction},
    error::{CliError, CliResult},
    utils::{format_timestamp, open_store, truncate_text, ColoredOutput},
};
use tenantflow_config::Settings;
use tenantflow_core::{sanitize_json_value, RunStore, WorkflowRun};

pub struct RunCommand;

impl RunCommand {
    pub async fn run(settings: &Settings, action: RunAction) -> CliResult<()> {
        let store = open_store(settings).await?;
        Self::execute(&store, action).await
    }

    pub async fn execute(store: &dyn RunStore, action: RunAction) -> CliResult<()> {
        match action {
            RunAction::Show { run_id, format } => {
                let run = store.get(&run_id).await?.ok_or_else(|| CliError::RunNotFound(run_id.clone()))?;
                if format == OutputFormat::Table {
                    display_run(&run);
                } else {
                    println!("{}", format.format_json(&sanitize_json_value(&serde_json::to_value(&run)?))?);
                }
            }
            RunAction::List { tenant, limit, format } => {
                let mut runs = store.list_for_tenant(&tenant).await?;
                if let Some(limit) = limit {
                    runs.truncate(limit);
                }
                if format == OutputFormat::Table {
                    display_runs_table(&tenant, &runs);
                } else {
                    println!("{}", format.format_json(&sanitize_json_value(&serde_json::to_value(&runs)?))?);
                }
            }
        }
        Ok(())
    }
}

fn display_run(run: &WorkflowRun) {
    println!("Run:       {}", ColoredOutput::highlight(&run.run_id));
    println!("Tenant:    {}", run.tenant_id);
    println!("Workflow:  {}", run.workflow_name);
    println!("Status:    {}", ColoredOutput::status(run.status.as_str()));
    println!("Attempt:   {}", run.attempt);
    println!("Started:   {}", format_timestamp(run.started_at));
    if let Some(finished) = run.finished_at {
        println!("Finished:  {}", format_timestamp(finished));
    }
    println!();

    for step in &run.steps {
        let replayed = if step.from_ledger { " (ledger)" } else { "" };
        println!(
            "  {:<20} {:<18} {}@v{}{}",
            step.step_name,
            ColoredOutput::status(step.status.as_str()),
            step.operation,
            step.version,
            ColoredOutput::dim(replayed)
        );
        if let Some(error) = &step.error {
            let retry = if error.retryable { "retryable" } else { "permanent" };
            println!(
                "      {} {} [{}]",
                ColoredOutput::error("error:"),
                truncate_text(&error.message, 100),
                retry
            );
        }
    }
}

fn display_runs_table(tenant: &str, runs: &[WorkflowRun]) {
    if runs.is_empty() {
        println!("{}", ColoredOutput::dim(&format!("No runs for tenant {}", tenant)));
        return;
    }

    println!(
        "{:<38} {:<24} {:<18} {:<8} {}",
        ColoredOutput::highlight("RUN"),
        ColoredOutput::highlight("WORKFLOW"),
        ColoredOutput::highlight("STATUS"),
        ColoredOutput::highlight("ATTEMPT"),
        ColoredOutput::highlight("STARTED"),
    );
    for run in runs {
        println!(
            "{:<38} {:<24} {:<18} {:<8} {}",
            run.run_id,
            truncate_text(&run.workflow_name, 24),
            ColoredOutput::status(run.status.as_str()),
            run.attempt,
            format_timestamp(run.started_at)
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tenantflow_core::WorkflowDefinition;
    use tenantflow_store::MemoryRunStore;

    #[tokio::test]
    async fn test_show_and_list() {
        let store = MemoryRunStore::new();
        let definition: WorkflowDefinition = serde_json::from_value(json!({
            "name": "pause",
            "steps": [{"name": "pause", "operation": "pause_campaign", "version": 1}]
        }))
        .unwrap();
        let run = WorkflowRun::new("run-1".to_string(), "acme", &definition, json!({}), Utc::now());
        store.put(&run).await.unwrap();

        let show = RunAction::Show { run_id: "run-1".to_string(), format: OutputFormat::Table };
        RunCommand::execute(&store, show).await.unwrap();

        let list = RunAction::List { tenant: "acme".to_string(), limit: Some(5), format: OutputFormat::Json };
        RunCommand::execute(&store, list).await.unwrap();

        let missing = RunAction::Show { run_id: "nope".to_string(), format: OutputFormat::Json };
        assert!(matches!(RunCommand::execute(&store, missing).await, Err(CliError::RunNotFound(_))));
    }
}
