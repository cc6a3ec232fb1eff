use chrono::Utc;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tenantflow_config::{validate_workflow, Settings, WorkflowLoader};
use tenantflow_core::{
    canonical_json, RunStatus, RunStore, StepError, StepErrorKind, StepStatus, TemplateScope,
    WorkflowDefinition, WorkflowRun,
};
use tenantflow_registry::OperationRegistry;
use tenantflow_store::{CredentialStore, IdempotencyLedger};
use tokio::sync::{watch, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn, Instrument};
use uuid::Uuid;

use crate::error::{RuntimeError, RuntimeResult};
use crate::step::StepFailure;

/// Engine-wide execution options
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Used when neither the step nor the operation declares a timeout
    pub default_step_timeout: Duration,
    /// Added to a step's timeout to form its ledger reservation lease
    pub lease_margin: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { default_step_timeout: Duration::from_secs(30), lease_margin: Duration::from_secs(5) }
    }
}

impl EngineOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self { default_step_timeout: settings.default_step_timeout(), ..Self::default() }
    }
}

pub struct EngineBuilder {
    registry: Arc<OperationRegistry>,
    ledger: IdempotencyLedger,
    runs: Arc<dyn RunStore>,
    credentials: Option<CredentialStore>,
    options: EngineOptions,
}

impl EngineBuilder {
    pub fn new(registry: Arc<OperationRegistry>, ledger: IdempotencyLedger, runs: Arc<dyn RunStore>) -> Self {
        Self { registry, ledger, runs, credentials: None, options: EngineOptions::default() }
    }

    /// Credential store exposed to handlers through `TenantContext::credential`
    pub fn credentials(mut self, credentials: CredentialStore) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> WorkflowEngine {
        WorkflowEngine {
            inner: Arc::new(EngineInner {
                registry: self.registry,
                ledger: self.ledger,
                runs: self.runs,
                credentials: self.credentials,
                options: self.options,
                workflows: RwLock::new(HashMap::new()),
                active: Mutex::new(HashMap::new()),
                in_flight: Mutex::new(HashMap::new()),
            }),
        }
    }
}

/// (tenant, workflow, canonical context) of a dispatched run
type TriggerKey = (String, String, String);

struct RunHandle {
    cancel: CancellationToken,
    finished: watch::Receiver<bool>,
}

pub(crate) struct EngineInner {
    pub(crate) registry: Arc<OperationRegistry>,
    pub(crate) ledger: IdempotencyLedger,
    pub(crate) runs: Arc<dyn RunStore>,
    pub(crate) credentials: Option<CredentialStore>,
    pub(crate) options: EngineOptions,
    workflows: RwLock<HashMap<String, Arc<WorkflowDefinition>>>,
    // Lock order: `in_flight` before `active`
    active: Mutex<HashMap<String, RunHandle>>,
    in_flight: Mutex<HashMap<TriggerKey, String>>,
}

/// Executes registered workflows as background runs
///
/// Cloning is cheap; clones share registered workflows and active runs.
#[derive(Clone)]
pub struct WorkflowEngine {
    inner: Arc<EngineInner>,
}

impl WorkflowEngine {
    pub fn builder(
        registry: Arc<OperationRegistry>,
        ledger: IdempotencyLedger,
        runs: Arc<dyn RunStore>,
    ) -> EngineBuilder {
        EngineBuilder::new(registry, ledger, runs)
    }

    /// Register a workflow definition after structural validation.
    ///
    /// Steps naming an operation version the registry does not know are
    /// accepted with a warning and fail when they run.
    pub async fn register_workflow(&self, definition: WorkflowDefinition) -> RuntimeResult<()> {
        validate_workflow(&definition)?;

        for step in &definition.steps {
            if !self.inner.registry.contains(&step.operation, step.version) {
                warn!(
                    workflow = %definition.name,
                    step = %step.name,
                    operation = %step.operation,
                    version = step.version,
                    "workflow references an unregistered operation"
                );
            }
        }

        let mut workflows = self.inner.workflows.write().await;
        if workflows.contains_key(&definition.name) {
            return Err(RuntimeError::DuplicateWorkflow(definition.name));
        }
        info!(workflow = %definition.name, steps = definition.steps.len(), "registered workflow");
        workflows.insert(definition.name.clone(), Arc::new(definition));
        Ok(())
    }

    pub async fn register_workflows<I>(&self, definitions: I) -> RuntimeResult<()>
    where
        I: IntoIterator<Item = WorkflowDefinition>,
    {
        for definition in definitions {
            self.register_workflow(definition).await?;
        }
        Ok(())
    }

    /// Load and register the workflow documents listed in `workflow_paths`,
    /// returning how many workflows were registered
    pub async fn register_configured(&self, settings: &Settings) -> RuntimeResult<usize> {
        let definitions = WorkflowLoader::new().load_files(&settings.workflow_paths)?;
        let count = definitions.len();
        self.register_workflows(definitions).await?;
        Ok(count)
    }

    pub async fn workflow(&self, name: &str) -> RuntimeResult<Arc<WorkflowDefinition>> {
        self.inner
            .workflows
            .read()
            .await
            .get(name)
            .cloned()
            .ok_or_else(|| RuntimeError::WorkflowNotFound(name.to_string()))
    }

    /// Names of registered workflows, sorted
    pub async fn workflows(&self) -> Vec<String> {
        let mut names: Vec<String> = self.inner.workflows.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Start a run in the background and return its id.
    ///
    /// While a run for the same tenant, workflow and context is still in
    /// flight, its id is returned instead of starting another.
    pub async fn dispatch(
        &self,
        tenant_id: &str,
        workflow_name: &str,
        context: JsonValue,
    ) -> RuntimeResult<String> {
        let definition = self.workflow(workflow_name).await?;
        let trigger = (tenant_id.to_string(), workflow_name.to_string(), canonical_json(&context));

        let run = WorkflowRun::new(Uuid::new_v4().to_string(), tenant_id, &definition, context, Utc::now());
        let run_id = run.run_id.clone();

        // Claim the trigger and the handle, then persist outside the locks
        let (cancel, finished_tx) = {
            let mut in_flight = self.inner.in_flight.lock().await;
            if let Some(existing) = in_flight.get(&trigger) {
                info!(tenant_id, workflow = workflow_name, run_id = %existing, "run already in flight");
                return Ok(existing.clone());
            }
            let mut active = self.inner.active.lock().await;
            in_flight.insert(trigger.clone(), run_id.clone());
            register_handle(&mut active, &run_id)
        };

        if let Err(e) = self.inner.runs.put(&run).await {
            self.inner.finish(&run_id, Some(&trigger)).await;
            let _ = finished_tx.send(true);
            return Err(e.into());
        }
        info!(tenant_id, workflow = workflow_name, run_id = %run_id, "dispatched workflow run");

        self.spawn_run(run, definition, Some(trigger), cancel, finished_tx);
        Ok(run_id)
    }

    /// Dispatch and wait for the run to finish
    pub async fn execute(
        &self,
        tenant_id: &str,
        workflow_name: &str,
        context: JsonValue,
    ) -> RuntimeResult<WorkflowRun> {
        let run_id = self.dispatch(tenant_id, workflow_name, context).await?;
        self.wait(&run_id).await
    }

    /// Re-run a run that did not succeed.
    ///
    /// Succeeded steps keep their outputs; every other step runs again, and
    /// steps whose side effect already completed are answered by the ledger.
    /// A run left `pending` or `running` with no task driving it, e.g. after
    /// the process stopped, can be retried as well.
    pub async fn retry(&self, run_id: &str) -> RuntimeResult<()> {
        let claimed = {
            let mut active = self.inner.active.lock().await;
            (!active.contains_key(run_id)).then(|| register_handle(&mut active, run_id))
        };
        let (cancel, finished_tx) = match claimed {
            Some(handle) => handle,
            None => {
                let status = self.get_run_status(run_id).await?.status;
                return Err(RuntimeError::invalid_state(run_id, status, "retried"));
            }
        };

        match self.prepare_retry(run_id).await {
            Ok((run, definition)) => {
                self.spawn_run(run, definition, None, cancel, finished_tx);
                Ok(())
            }
            Err(e) => {
                self.inner.finish(run_id, None).await;
                let _ = finished_tx.send(true);
                Err(e)
            }
        }
    }

    async fn prepare_retry(&self, run_id: &str) -> RuntimeResult<(WorkflowRun, Arc<WorkflowDefinition>)> {
        let mut run = self.get_run_status(run_id).await?;
        if run.status == RunStatus::Succeeded {
            return Err(RuntimeError::invalid_state(run_id, run.status, "retried"));
        }

        let definition = self.workflow(&run.workflow_name).await?;
        let same_steps = definition.steps.len() == run.steps.len()
            && definition.steps.iter().zip(&run.steps).all(|(d, s)| d.name == s.step_name);
        if !same_steps {
            return Err(RuntimeError::DefinitionChanged {
                run_id: run_id.to_string(),
                workflow: run.workflow_name,
            });
        }

        if !run.status.is_terminal() {
            warn!(run_id, status = %run.status, "retrying a run that was left unfinished");
        }
        for step in run.steps.iter_mut().filter(|s| s.status != StepStatus::Succeeded) {
            step.reset();
        }
        run.attempt += 1;
        run.status = RunStatus::Pending;
        run.finished_at = None;
        self.inner.runs.put(&run).await?;
        info!(run_id, attempt = run.attempt, "retrying workflow run");
        Ok((run, definition))
    }

    /// Request cancellation of an active run.
    ///
    /// The step currently executing finishes first; all later steps are
    /// skipped. Returns `false` when the run has already finished.
    pub async fn cancel(&self, run_id: &str) -> RuntimeResult<bool> {
        if let Some(handle) = self.inner.active.lock().await.get(run_id) {
            info!(run_id, "cancellation requested");
            handle.cancel.cancel();
            return Ok(true);
        }
        self.get_run_status(run_id).await?;
        Ok(false)
    }

    /// Latest persisted snapshot of a run
    pub async fn get_run_status(&self, run_id: &str) -> RuntimeResult<WorkflowRun> {
        self.inner.runs.get(run_id).await?.ok_or_else(|| RuntimeError::RunNotFound(run_id.to_string()))
    }

    /// Wait for a run to reach a terminal status and return its snapshot
    pub async fn wait(&self, run_id: &str) -> RuntimeResult<WorkflowRun> {
        let finished = self.inner.active.lock().await.get(run_id).map(|h| h.finished.clone());
        if let Some(mut finished) = finished {
            loop {
                let done = *finished.borrow();
                if done || finished.changed().await.is_err() {
                    break;
                }
            }
        }
        self.get_run_status(run_id).await
    }

    /// Runs of a tenant, most recent first
    pub async fn list_runs(&self, tenant_id: &str) -> RuntimeResult<Vec<WorkflowRun>> {
        Ok(self.inner.runs.list_for_tenant(tenant_id).await?)
    }

    pub async fn is_active(&self, run_id: &str) -> bool {
        self.inner.active.lock().await.contains_key(run_id)
    }

    fn spawn_run(
        &self,
        run: WorkflowRun,
        definition: Arc<WorkflowDefinition>,
        trigger: Option<TriggerKey>,
        cancel: CancellationToken,
        finished_tx: watch::Sender<bool>,
    ) {
        let inner = self.inner.clone();
        let span = tracing::info_span!(
            "workflow_run",
            run_id = %run.run_id,
            tenant_id = %run.tenant_id,
            workflow = %run.workflow_name
        );
        tokio::spawn(
            async move {
                let run_id = run.run_id.clone();
                // Drive in a child task so a panic still reaches the cleanup below
                let driver = {
                    let inner = inner.clone();
                    tokio::spawn(
                        async move {
                            let mut run = run;
                            let result = inner.drive(&mut run, definition, cancel).await;
                            (run, result)
                        }
                        .in_current_span(),
                    )
                };

                match driver.await {
                    Ok((_, Ok(()))) => {}
                    Ok((run, Err(e))) => {
                        error!(error = %e, "workflow run aborted");
                        inner.abandon(run, &e.to_string()).await;
                    }
                    Err(join_error) => {
                        error!(error = %join_error, "workflow run panicked");
                        match inner.runs.get(&run_id).await {
                            Ok(Some(run)) => inner.abandon(run, &join_error.to_string()).await,
                            Ok(None) => {}
                            Err(e) => error!(error = %e, "could not load aborted run"),
                        }
                    }
                }

                inner.finish(&run_id, trigger.as_ref()).await;
                let _ = finished_tx.send(true);
            }
            .instrument(span),
        );
    }
}

fn register_handle(
    active: &mut HashMap<String, RunHandle>,
    run_id: &str,
) -> (CancellationToken, watch::Sender<bool>) {
    let cancel = CancellationToken::new();
    let (finished_tx, finished_rx) = watch::channel(false);
    active.insert(run_id.to_string(), RunHandle { cancel: cancel.clone(), finished: finished_rx });
    (cancel, finished_tx)
}

impl EngineInner {
    /// Drop the bookkeeping of a run that is no longer driven
    async fn finish(&self, run_id: &str, trigger: Option<&TriggerKey>) {
        if let Some(trigger) = trigger {
            self.in_flight.lock().await.remove(trigger);
        }
        self.active.lock().await.remove(run_id);
    }

    /// Best-effort terminal write for a run whose driver stopped early
    async fn abandon(&self, mut run: WorkflowRun, reason: &str) {
        let now = Utc::now();
        for state in &mut run.steps {
            match state.status {
                StepStatus::Running => {
                    state.status = StepStatus::Failed;
                    state.finished_at = Some(now);
                    state.error = Some(StepError::new(
                        StepErrorKind::Operation,
                        format!("run aborted: {}", reason),
                        true,
                    ));
                }
                StepStatus::Pending => state.status = StepStatus::Skipped,
                _ => {}
            }
        }
        if !run.status.is_terminal() {
            run.status = RunStatus::Failed;
        }
        run.finished_at = run.finished_at.or(Some(now));
        if let Err(e) = self.runs.put(&run).await {
            error!(error = %e, "could not record aborted run; it can still be retried");
        }
    }

    async fn drive(
        &self,
        run: &mut WorkflowRun,
        definition: Arc<WorkflowDefinition>,
        cancel: CancellationToken,
    ) -> RuntimeResult<()> {
        run.status = RunStatus::Running;
        self.runs.put(run).await?;
        info!(attempt = run.attempt, "workflow run started");

        // Outputs of steps that succeeded on an earlier attempt
        let mut outputs: HashMap<String, JsonValue> = run
            .steps
            .iter()
            .filter(|s| s.status == StepStatus::Succeeded)
            .filter_map(|s| s.output.clone().map(|output| (s.step_name.clone(), output)))
            .collect();

        let mut halted = false;
        let mut cancelled = false;

        for (index, step) in definition.steps.iter().enumerate() {
            if run.steps[index].status == StepStatus::Succeeded {
                continue;
            }
            if !halted && !cancelled && cancel.is_cancelled() {
                info!(step = %step.name, "run cancelled, skipping remaining steps");
                cancelled = true;
            }
            if halted || cancelled {
                run.steps[index].status = StepStatus::Skipped;
                continue;
            }

            run.steps[index].status = StepStatus::Running;
            run.steps[index].started_at = Some(Utc::now());
            self.runs.put(run).await?;

            let span = tracing::info_span!(
                "step",
                step = %step.name,
                operation = %step.operation,
                version = step.version
            );
            let scope = TemplateScope { context: &run.context, step_outputs: &outputs };
            let result = self.run_step(&run.tenant_id, &run.run_id, step, scope).instrument(span).await;

            let state = &mut run.steps[index];
            state.finished_at = Some(Utc::now());
            match result {
                Ok(done) => {
                    state.status = StepStatus::Succeeded;
                    state.idempotency_key = Some(done.key);
                    state.output = Some(done.output.clone());
                    state.from_ledger = done.from_ledger;
                    outputs.insert(step.name.clone(), done.output);
                }
                Err(StepFailure { key, error }) => {
                    warn!(
                        step = %step.name,
                        optional = step.optional,
                        kind = ?error.kind,
                        retryable = error.retryable,
                        "step failed: {}",
                        error.message
                    );
                    state.status = StepStatus::Failed;
                    state.idempotency_key = key;
                    state.error = Some(error);
                    halted = !step.optional;
                }
            }
            self.runs.put(run).await?;
        }

        run.status = if cancelled {
            RunStatus::Cancelled
        } else if halted {
            RunStatus::Failed
        } else if run.steps.iter().any(|s| s.status == StepStatus::Failed) {
            RunStatus::PartiallyFailed
        } else {
            RunStatus::Succeeded
        };
        run.finished_at = Some(Utc::now());
        self.runs.put(run).await?;
        info!(status = %run.status, "workflow run finished");
        Ok(())
    }
}
