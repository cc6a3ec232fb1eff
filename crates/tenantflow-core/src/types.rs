use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::fmt;
use std::str::FromStr;

/// Ciphertext produced by the secret cipher. All fields are base64 except the key version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedSecret {
    /// Base64 encoded ciphertext including the authentication tag
    pub data: String,
    /// Base64 encoded 96-bit nonce
    pub nonce: String,
    /// Version of the master key that sealed this payload
    pub key_version: u32,
}

/// Sealed credential for one (tenant, provider) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialRecord {
    pub tenant_id: String,
    pub provider: String,
    pub sealed_payload: SealedSecret,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub rotation_version: i64,
}

impl CredentialRecord {
    /// A record is unusable from the instant `expires_at` is reached.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Input to [`crate::store::CredentialRepository::put_rotating`]; the repository assigns the rotation version.
#[derive(Debug, Clone)]
pub struct CredentialDraft {
    pub tenant_id: String,
    pub provider: String,
    pub sealed_payload: SealedSecret,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CredentialDraft {
    pub fn into_record(self, rotation_version: i64) -> CredentialRecord {
        CredentialRecord {
            tenant_id: self.tenant_id,
            provider: self.provider,
            sealed_payload: self.sealed_payload,
            created_at: self.created_at,
            expires_at: self.expires_at,
            rotation_version,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyState {
    Running,
    Completed,
}

impl IdempotencyState {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdempotencyState::Running => "running",
            IdempotencyState::Completed => "completed",
        }
    }
}

impl FromStr for IdempotencyState {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(IdempotencyState::Running),
            "completed" => Ok(IdempotencyState::Completed),
            _ => Err("unknown idempotency state"),
        }
    }
}

/// Ledger entry keyed by a derived idempotency key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyEntry {
    pub idempotency_key: String,
    pub state: IdempotencyState,
    pub first_seen_at: DateTime<Utc>,
    /// Lease of a running reservation; after it passes the key can be reclaimed.
    pub reserved_until: DateTime<Utc>,
    /// Token of the caller that reserved the entry
    #[serde(skip_serializing_if = "Option::is_none")]
    pub holder: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_snapshot: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_seconds: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl IdempotencyEntry {
    pub fn running(key: &str, holder: &str, now: DateTime<Utc>, lease: chrono::Duration) -> Self {
        Self {
            idempotency_key: key.to_string(),
            state: IdempotencyState::Running,
            first_seen_at: now,
            reserved_until: now + lease,
            holder: Some(holder.to_string()),
            result_snapshot: None,
            ttl_seconds: None,
            expires_at: None,
        }
    }

    /// Whether `holder` owns this entry's running reservation
    pub fn is_held_by(&self, holder: &str) -> bool {
        self.state == IdempotencyState::Running && self.holder.as_deref() == Some(holder)
    }

    /// Whether a new reservation may replace this entry at `now`.
    pub fn is_reclaimable_at(&self, now: DateTime<Utc>) -> bool {
        match self.state {
            IdempotencyState::Running => now >= self.reserved_until,
            IdempotencyState::Completed => self.expires_at.map(|exp| now >= exp).unwrap_or(false),
        }
    }
}

/// Result of an atomic reservation attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum ReserveOutcome {
    /// The caller owns the key and must `complete` or `release` it.
    Reserved,
    /// A completed entry is still inside its ttl.
    Completed(JsonValue),
    /// Another caller holds a running reservation.
    InFlight { reserved_until: DateTime<Utc> },
}

/// One step of a declarative workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub name: String,
    pub operation: String,
    pub version: u32,
    /// Input template; placeholders reference the run context and earlier step outputs.
    #[serde(default)]
    pub input: JsonValue,
    #[serde(default)]
    pub optional: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
}

impl WorkflowDefinition {
    pub fn step(&self, name: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.name == name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    PartiallyFailed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::PartiallyFailed => "partially_failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, RunStatus::Pending | RunStatus::Running)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(RunStatus::Pending),
            "running" => Ok(RunStatus::Running),
            "succeeded" => Ok(RunStatus::Succeeded),
            "failed" => Ok(RunStatus::Failed),
            "partially_failed" => Ok(RunStatus::PartiallyFailed),
            "cancelled" => Ok(RunStatus::Cancelled),
            _ => Err("unknown run status"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of a step failure, kept on the run for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    Template,
    OperationNotFound,
    Validation,
    Operation,
    CredentialExpired,
    CredentialMissing,
    Cipher,
    Timeout,
    InFlight,
    Ledger,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepError {
    pub kind: StepErrorKind,
    pub message: String,
    pub retryable: bool,
}

impl StepError {
    pub fn new(kind: StepErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self { kind, message: message.into(), retryable }
    }
}

impl fmt::Display for StepError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepState {
    pub step_name: String,
    pub operation: String,
    pub version: u32,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepError>,
    /// Output was served from the idempotency ledger without invoking the handler.
    #[serde(default)]
    pub from_ledger: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepState {
    pub fn pending(step: &WorkflowStep) -> Self {
        Self {
            step_name: step.name.clone(),
            operation: step.operation.clone(),
            version: step.version,
            status: StepStatus::Pending,
            idempotency_key: None,
            output: None,
            error: None,
            from_ledger: false,
            started_at: None,
            finished_at: None,
        }
    }

    /// Clear everything but identity so the step can run again.
    pub fn reset(&mut self) {
        self.status = StepStatus::Pending;
        self.idempotency_key = None;
        self.output = None;
        self.error = None;
        self.from_ledger = false;
        self.started_at = None;
        self.finished_at = None;
    }
}

/// One execution of a workflow for a tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub run_id: String,
    pub tenant_id: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub context: JsonValue,
    /// Step states in declaration order.
    pub steps: Vec<StepState>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Incremented each time the run is retried in place.
    pub attempt: u32,
}

impl WorkflowRun {
    pub fn new(
        run_id: String,
        tenant_id: &str,
        definition: &WorkflowDefinition,
        context: JsonValue,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            run_id,
            tenant_id: tenant_id.to_string(),
            workflow_name: definition.name.clone(),
            status: RunStatus::Pending,
            context,
            steps: definition.steps.iter().map(StepState::pending).collect(),
            started_at: now,
            finished_at: None,
            attempt: 1,
        }
    }

    pub fn step(&self, name: &str) -> Option<&StepState> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut StepState> {
        self.steps.iter_mut().find(|s| s.step_name == name)
    }

    /// Ordered (step name, status) pairs.
    pub fn step_statuses(&self) -> Vec<(&str, StepStatus)> {
        self.steps.iter().map(|s| (s.step_name.as_str(), s.status)).collect()
    }
}
