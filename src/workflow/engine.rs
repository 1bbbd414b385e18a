//! Workflow engine
//!
//! In-process durable-step orchestrator. Runs interleave on the tokio
//! runtime up to a configured concurrency; each run is independent and a
//! failure in one never touches another. Every step start and end is
//! written to the run store, so a process restart replays `running` runs
//! from their logs with completed steps skipped.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{watch, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::WorkflowConfig;
use crate::error::{Result, WeaverError};

use super::context::{StepRunner, WorkflowContext};
use super::definition::{WorkflowDefinition, WorkflowSnapshot};
use super::state::{CancelHook, RunRecord, RunStatus};
use super::store::RunStore;

/// History query filters
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    pub workflow_id: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

struct Registered {
    definition: WorkflowDefinition,
    version: u32,
}

struct LiveRun {
    cancel: CancellationToken,
    done: watch::Receiver<bool>,
}

/// The engine. Shared as a process-wide singleton behind an `Arc`.
pub struct WorkflowEngine {
    definitions: DashMap<String, Registered>,
    store: Arc<RunStore>,
    semaphore: Arc<Semaphore>,
    live: Arc<DashMap<String, LiveRun>>,
    root_cancel: CancellationToken,
    step_max_attempts: u32,
    step_backoff: Duration,
}

impl WorkflowEngine {
    pub fn open(
        store_path: &std::path::Path,
        config: &WorkflowConfig,
        root_cancel: &CancellationToken,
    ) -> Result<Self> {
        Ok(Self {
            definitions: DashMap::new(),
            store: Arc::new(RunStore::open(store_path)?),
            semaphore: Arc::new(Semaphore::new(config.concurrency.max(1))),
            live: Arc::new(DashMap::new()),
            root_cancel: root_cancel.child_token(),
            step_max_attempts: config.step_max_attempts.max(1),
            step_backoff: Duration::from_millis(200),
        })
    }

    /// Tighten or loosen the retry backoff base (tests mostly).
    pub fn with_step_backoff(mut self, base: Duration) -> Self {
        self.step_backoff = base;
        self
    }

    // ═══════════════════════════════════════════════════════════════
    // Registry
    // ═══════════════════════════════════════════════════════════════

    /// Register a definition. Replacing an id creates a new version; runs
    /// already in flight keep the handler they started with.
    pub fn register(&self, definition: WorkflowDefinition) -> Result<u32> {
        let id = definition.id.clone();
        let prior = self
            .definitions
            .get(&id)
            .map(|r| r.version)
            .or(self.store.load_snapshot(&id)?.map(|s| s.version))
            .unwrap_or(0);
        let version = prior + 1;

        self.store
            .save_snapshot(&WorkflowSnapshot::of(&definition, version))?;
        self.definitions
            .insert(id.clone(), Registered { definition, version });
        tracing::info!(workflow = %id, version, "workflow registered");
        Ok(version)
    }

    /// Registered workflows, optionally filtered by enabled flag.
    pub fn list(&self, enabled: Option<bool>) -> Vec<WorkflowSnapshot> {
        let mut snapshots: Vec<WorkflowSnapshot> = self
            .definitions
            .iter()
            .filter(|entry| enabled.is_none_or(|want| entry.definition.enabled == want))
            .map(|entry| WorkflowSnapshot::of(&entry.definition, entry.version))
            .collect();
        snapshots.sort_by(|a, b| a.id.cmp(&b.id));
        snapshots
    }

    /// Workflow ids whose triggers include the given event kind and that
    /// are enabled.
    pub fn triggered_by(&self, kind: crate::event::EventKind) -> Vec<String> {
        let mut ids: Vec<String> = self
            .definitions
            .iter()
            .filter(|e| e.definition.enabled && e.definition.triggers.contains(&kind))
            .map(|e| e.definition.id.clone())
            .collect();
        ids.sort();
        ids
    }

    // ═══════════════════════════════════════════════════════════════
    // Run lifecycle
    // ═══════════════════════════════════════════════════════════════

    /// Create a run and schedule it. Returns the generated run id.
    pub fn start(&self, workflow_id: &str, input: Value) -> Result<String> {
        let entry = self
            .definitions
            .get(workflow_id)
            .ok_or_else(|| WeaverError::NotFound {
                what: "workflow",
                id: workflow_id.to_string(),
            })?;
        if !entry.definition.enabled {
            return Err(WeaverError::validation(format!(
                "workflow '{}' is disabled",
                workflow_id
            )));
        }

        let run_id = Uuid::new_v4().to_string();
        let record = RunRecord::new(
            run_id.clone(),
            workflow_id.to_string(),
            entry.version,
            input,
        );
        self.store.save_run(&record)?;

        self.spawn_run(record, entry.definition.clone(), HashMap::new(), HashMap::new());
        Ok(run_id)
    }

    /// Replay every run persisted as pending/running. Call after all
    /// definitions are registered at startup.
    pub fn recover(&self) -> Result<usize> {
        let mut recovered = 0;
        for run in self.store.load_all_runs()? {
            if run.status.is_terminal() {
                continue;
            }
            if self.live.contains_key(&run.run_id) {
                continue;
            }
            if self.store.has_cancel_hook(&run.run_id) {
                self.finalize_orphan(run, RunStatus::Cancelled, Some("cancelled before restart"))?;
                continue;
            }
            let Some(entry) = self.definitions.get(&run.workflow_id) else {
                self.finalize_orphan(run, RunStatus::Failed, Some("workflow no longer registered"))?;
                continue;
            };

            let outputs = self.store.load_step_outputs(&run.run_id)?;
            let attempts = self.store.load_attempt_counts(&run.run_id)?;
            tracing::info!(
                run_id = %run.run_id,
                workflow = %run.workflow_id,
                replayed_steps = outputs.len(),
                "replaying run after restart"
            );
            self.spawn_run(run, entry.definition.clone(), outputs, attempts);
            recovered += 1;
        }
        Ok(recovered)
    }

    fn finalize_orphan(
        &self,
        mut run: RunRecord,
        status: RunStatus,
        error: Option<&str>,
    ) -> Result<()> {
        run.status = status;
        run.error = error.map(str::to_string);
        run.ended_at = Some(Utc::now());
        self.store.save_run(&run)
    }

    fn spawn_run(
        &self,
        record: RunRecord,
        definition: WorkflowDefinition,
        outputs: HashMap<String, Value>,
        attempts: HashMap<String, u32>,
    ) {
        let run_id = record.run_id.clone();
        let cancel = self.root_cancel.child_token();
        let (done_tx, done_rx) = watch::channel(false);
        self.live.insert(
            run_id.clone(),
            LiveRun {
                cancel: cancel.clone(),
                done: done_rx,
            },
        );

        let store = Arc::clone(&self.store);
        let semaphore = Arc::clone(&self.semaphore);
        let live = Arc::clone(&self.live);
        let step_max_attempts = self.step_max_attempts;
        let step_backoff = self.step_backoff;

        tokio::spawn(async move {
            execute_run(
                record,
                definition,
                outputs,
                attempts,
                store,
                semaphore,
                cancel,
                step_max_attempts,
                step_backoff,
            )
            .await;
            live.remove(&run_id);
            let _ = done_tx.send(true);
        });
    }

    /// Await a run's terminal state and return its output.
    pub async fn return_value(&self, run_id: &str) -> Result<Value> {
        if let Some(entry) = self.live.get(run_id) {
            let mut done = entry.done.clone();
            drop(entry);
            loop {
                if *done.borrow_and_update() {
                    break;
                }
                if done.changed().await.is_err() {
                    break;
                }
            }
        }

        let run = self.status(run_id)?;
        match run.status {
            RunStatus::Completed => Ok(run.output.unwrap_or(Value::Null)),
            RunStatus::Failed => Err(WeaverError::WorkflowFailed {
                run_id: run_id.to_string(),
                reason: run.error.unwrap_or_else(|| "unknown".to_string()),
            }),
            RunStatus::Cancelled => Err(WeaverError::Cancelled {
                operation: format!("workflow run {}", run_id),
            }),
            RunStatus::Pending | RunStatus::Running => Err(WeaverError::Conflict {
                reason: format!("run '{}' has no executor", run_id),
            }),
        }
    }

    pub fn status(&self, run_id: &str) -> Result<RunRecord> {
        self.store
            .load_run(run_id)?
            .ok_or_else(|| WeaverError::NotFound {
                what: "workflow run",
                id: run_id.to_string(),
            })
    }

    /// Request cancellation. The run observes the flag at its next step
    /// boundary; a run with no executor is finalized directly.
    pub fn cancel(&self, run_id: &str) -> Result<()> {
        let run = self.status(run_id)?;
        if run.status.is_terminal() {
            return Ok(());
        }
        self.store.save_cancel_hook(&CancelHook {
            run_id: run_id.to_string(),
            requested_at: Utc::now(),
        })?;
        match self.live.get(run_id) {
            Some(entry) => entry.cancel.cancel(),
            None => self.finalize_orphan(run, RunStatus::Cancelled, Some("cancelled while idle"))?,
        }
        Ok(())
    }

    /// Terminal and in-flight runs, newest first.
    pub fn history(&self, query: &HistoryQuery) -> Result<Vec<RunRecord>> {
        let mut runs = self.store.load_all_runs()?;
        if let Some(workflow_id) = &query.workflow_id {
            runs.retain(|r| &r.workflow_id == workflow_id);
        }
        runs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        let offset = query.offset.unwrap_or(0);
        let limit = query.limit.unwrap_or(50);
        Ok(runs.into_iter().skip(offset).take(limit).collect())
    }

    pub fn active_runs(&self) -> usize {
        self.live.len()
    }

    /// Wait until no runs are live. Callers bound this with a timeout.
    pub async fn drain(&self) {
        while !self.live.is_empty() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn execute_run(
    mut record: RunRecord,
    definition: WorkflowDefinition,
    outputs: HashMap<String, Value>,
    attempts: HashMap<String, u32>,
    store: Arc<RunStore>,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    step_max_attempts: u32,
    step_backoff: Duration,
) {
    let _permit = match semaphore.acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    record.status = RunStatus::Running;
    record.started_at.get_or_insert_with(Utc::now);
    if let Err(e) = store.save_run(&record) {
        tracing::error!(run_id = %record.run_id, error = %e, "failed to persist run start");
        return;
    }

    let runner = Arc::new(StepRunner {
        store: Arc::clone(&store),
        cancel: cancel.clone(),
        max_attempts: step_max_attempts,
        backoff_base: step_backoff,
        outputs: Mutex::new(outputs),
        attempts: Mutex::new(attempts),
    });
    let ctx = WorkflowContext {
        run_id: record.run_id.clone(),
        workflow_id: record.workflow_id.clone(),
        input: record.input.clone(),
        config: definition.config.clone(),
        runner,
    };

    let result = (definition.handler)(ctx).await;

    record.ended_at = Some(Utc::now());
    match result {
        Ok(output) => {
            record.status = RunStatus::Completed;
            record.output = Some(output);
            tracing::info!(run_id = %record.run_id, workflow = %record.workflow_id, "run completed");
        }
        Err(WeaverError::Cancelled { .. }) => {
            record.status = RunStatus::Cancelled;
            tracing::info!(run_id = %record.run_id, "run cancelled");
        }
        Err(e) => {
            record.status = RunStatus::Failed;
            record.error = Some(e.to_string());
            tracing::warn!(run_id = %record.run_id, error = %e, "run failed");
        }
    }
    if let Err(e) = store.save_run(&record) {
        tracing::error!(run_id = %record.run_id, error = %e, "failed to persist terminal state");
    }
}
