//! Workflow execution context
//!
//! The handler's view of a run. `step` is the durability boundary: first
//! execution runs the thunk and persists its output under (run, step name)
//! before returning; any replay of the same run returns the persisted
//! output without running the thunk. Side-effecting steps therefore run
//! at least once per run, not exactly once, and must be written
//! idempotently by the author.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, WeaverError};

use super::state::StepRecord;
use super::store::RunStore;

/// Shared step machinery for one run
pub(super) struct StepRunner {
    pub store: Arc<RunStore>,
    pub cancel: CancellationToken,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    /// Replay cache: step name → persisted output
    pub outputs: Mutex<HashMap<String, Value>>,
    /// Highest persisted attempt per step (numbering continues on replay)
    pub attempts: Mutex<HashMap<String, u32>>,
}

/// Handler-facing context for one workflow run
#[derive(Clone)]
pub struct WorkflowContext {
    pub run_id: String,
    pub workflow_id: String,
    pub input: Value,
    pub config: Value,
    pub(super) runner: Arc<StepRunner>,
}

impl WorkflowContext {
    /// Run (or replay) a named step. See the module docs for the contract.
    pub async fn step<F, Fut>(&self, name: &str, thunk: F) -> Result<Value>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value>> + Send,
    {
        self.step_with_input(name, Value::Null, thunk).await
    }

    /// Like [`step`](Self::step), recording an input value on the step
    /// record for observability.
    pub async fn step_with_input<F, Fut>(&self, name: &str, input: Value, thunk: F) -> Result<Value>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<Value>> + Send,
    {
        // A cancel requested at any earlier point is observed here, at the
        // step boundary.
        self.check_cancelled()?;

        if let Some(output) = self.runner.outputs.lock().get(name) {
            tracing::debug!(run_id = %self.run_id, step = name, "replaying persisted step output");
            return Ok(output.clone());
        }

        let mut tries = 0u32;
        loop {
            let attempt = {
                let mut attempts = self.runner.attempts.lock();
                let counter = attempts.entry(name.to_string()).or_insert(0);
                *counter += 1;
                *counter
            };
            tries += 1;

            let record = StepRecord::started(&self.run_id, name, attempt, input.clone());
            self.runner.store.save_step(&record)?;

            match thunk().await {
                Ok(output) => {
                    // Persist before returning: a crash after this write
                    // replays the output instead of the thunk.
                    self.runner
                        .store
                        .save_step(&record.succeed(output.clone()))?;
                    self.runner
                        .outputs
                        .lock()
                        .insert(name.to_string(), output.clone());
                    return Ok(output);
                }
                Err(e) => {
                    self.runner.store.save_step(&record.fail(e.to_string()))?;
                    if matches!(e, WeaverError::Cancelled { .. }) {
                        return Err(e);
                    }
                    if tries >= self.runner.max_attempts {
                        tracing::warn!(
                            run_id = %self.run_id,
                            step = name,
                            attempts = tries,
                            error = %e,
                            "step retry budget exhausted"
                        );
                        return Err(e);
                    }
                    let delay = self.backoff_delay(tries - 1);
                    tokio::select! {
                        _ = self.runner.cancel.cancelled() => {
                            return Err(self.cancelled_error());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                    // Cancellation short-circuits the retry schedule.
                    self.check_cancelled()?;
                }
            }
        }
    }

    /// Whether a cancel has been requested for this run.
    pub fn is_cancelled(&self) -> bool {
        self.runner.cancel.is_cancelled() || self.runner.store.has_cancel_hook(&self.run_id)
    }

    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(self.cancelled_error())
        } else {
            Ok(())
        }
    }

    fn cancelled_error(&self) -> WeaverError {
        WeaverError::Cancelled {
            operation: format!("workflow run {}", self.run_id),
        }
    }

    /// The run's cancellation token, for forwarding into LLM calls and
    /// other cancellable operations inside step thunks.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.runner.cancel.clone()
    }

    fn backoff_delay(&self, retry_index: u32) -> Duration {
        let base = self.runner.backoff_base.as_millis() as f64;
        let raw = base * 2f64.powi(retry_index.min(8) as i32);
        let capped = raw.min(8_000.0);
        let jitter = capped * 0.1 * rand::random::<f64>();
        Duration::from_millis((capped + jitter) as u64)
    }
}
