//! Run and step records
//!
//! The durable shape of workflow execution. Terminal run states are final;
//! terminal runs stay in the store for history queries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Run state machine: pending → running → (completed | failed | cancelled).
/// `running` may re-enter `running` across restarts via replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// One workflow invocation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunRecord {
    pub run_id: String,
    pub workflow_id: String,
    /// Definition version this run executed against
    pub workflow_version: u32,
    pub input: Value,
    pub status: RunStatus,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl RunRecord {
    pub fn new(run_id: String, workflow_id: String, workflow_version: u32, input: Value) -> Self {
        Self {
            run_id,
            workflow_id,
            workflow_version,
            input,
            status: RunStatus::Pending,
            output: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Running,
    Succeeded,
    Failed,
}

/// One attempt of one named step. Identity is (run, step, attempt); the
/// store keys the file by exactly that.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StepRecord {
    pub run_id: String,
    pub step: String,
    pub attempt: u32,
    pub status: StepStatus,
    pub input: Value,
    pub output: Option<Value>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepRecord {
    pub fn started(run_id: &str, step: &str, attempt: u32, input: Value) -> Self {
        Self {
            run_id: run_id.to_string(),
            step: step.to_string(),
            attempt,
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    pub fn succeed(mut self, output: Value) -> Self {
        self.status = StepStatus::Succeeded;
        self.output = Some(output);
        self.ended_at = Some(Utc::now());
        self
    }

    pub fn fail(mut self, error: String) -> Self {
        self.status = StepStatus::Failed;
        self.error = Some(error);
        self.ended_at = Some(Utc::now());
        self
    }
}

/// Cancellation marker persisted under `hooks/` so a cancel survives a
/// crash between request and observation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelHook {
    pub run_id: String,
    pub requested_at: DateTime<Utc>,
}
