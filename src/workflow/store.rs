//! Durable run store
//!
//! One JSON document per entry, filename is the id:
//!
//! ```text
//! <store>/runs/<run_id>.json
//! <store>/steps/<run_id>__<step>__<attempt>.json
//! <store>/hooks/<run_id>.cancel.json
//! <store>/metadata/<workflow_id>.json
//! ```
//!
//! No two runs share a file, so concurrent run creation is safe by id
//! uniqueness alone. Writes go through a temp file + rename so a crash
//! never leaves a half-written record behind.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{Result, WeaverError};

use super::definition::WorkflowSnapshot;
use super::state::{CancelHook, RunRecord, StepRecord, StepStatus};

pub struct RunStore {
    runs_dir: PathBuf,
    steps_dir: PathBuf,
    hooks_dir: PathBuf,
    metadata_dir: PathBuf,
}

impl RunStore {
    pub fn open(root: &Path) -> Result<Self> {
        let store = Self {
            runs_dir: root.join("runs"),
            steps_dir: root.join("steps"),
            hooks_dir: root.join("hooks"),
            metadata_dir: root.join("metadata"),
        };
        for dir in [
            &store.runs_dir,
            &store.steps_dir,
            &store.hooks_dir,
            &store.metadata_dir,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(store)
    }

    // ═══════════════════════════════════════════════════════════════
    // Runs
    // ═══════════════════════════════════════════════════════════════

    pub fn save_run(&self, run: &RunRecord) -> Result<()> {
        write_json(&self.runs_dir.join(format!("{}.json", run.run_id)), run)
    }

    pub fn load_run(&self, run_id: &str) -> Result<Option<RunRecord>> {
        read_json(&self.runs_dir.join(format!("{}.json", sanitize(run_id))))
    }

    /// Every persisted run, unsorted. Callers filter and order.
    pub fn load_all_runs(&self) -> Result<Vec<RunRecord>> {
        let mut runs = Vec::new();
        for entry in std::fs::read_dir(&self.runs_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_json::<RunRecord>(&path)? {
                Some(run) => runs.push(run),
                None => continue,
            }
        }
        Ok(runs)
    }

    // ═══════════════════════════════════════════════════════════════
    // Steps
    // ═══════════════════════════════════════════════════════════════

    pub fn save_step(&self, step: &StepRecord) -> Result<()> {
        write_json(&self.step_path(&step.run_id, &step.step, step.attempt), step)
    }

    fn step_path(&self, run_id: &str, step: &str, attempt: u32) -> PathBuf {
        self.steps_dir.join(format!(
            "{}__{}__{}.json",
            sanitize(run_id),
            sanitize(step),
            attempt
        ))
    }

    /// All persisted attempts for one run, ordered by (step, attempt).
    pub fn load_steps(&self, run_id: &str) -> Result<Vec<StepRecord>> {
        let prefix = format!("{}__", sanitize(run_id));
        let mut steps = Vec::new();
        for entry in std::fs::read_dir(&self.steps_dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if !name.starts_with(&prefix) || !name.ends_with(".json") {
                continue;
            }
            if let Some(step) = read_json::<StepRecord>(&path)? {
                steps.push(step);
            }
        }
        steps.sort_by(|a, b| a.step.cmp(&b.step).then(a.attempt.cmp(&b.attempt)));
        Ok(steps)
    }

    /// The replay cache: step name → persisted output of its succeeded
    /// attempt.
    pub fn load_step_outputs(&self, run_id: &str) -> Result<HashMap<String, Value>> {
        let mut outputs = HashMap::new();
        for step in self.load_steps(run_id)? {
            if step.status == StepStatus::Succeeded {
                if let Some(output) = step.output {
                    outputs.insert(step.step, output);
                }
            }
        }
        Ok(outputs)
    }

    /// Attempts already burned for each step of a run (replay restarts
    /// counting after the highest persisted attempt).
    pub fn load_attempt_counts(&self, run_id: &str) -> Result<HashMap<String, u32>> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for step in self.load_steps(run_id)? {
            let entry = counts.entry(step.step).or_default();
            *entry = (*entry).max(step.attempt);
        }
        Ok(counts)
    }

    // ═══════════════════════════════════════════════════════════════
    // Hooks and metadata
    // ═══════════════════════════════════════════════════════════════

    pub fn save_cancel_hook(&self, hook: &CancelHook) -> Result<()> {
        write_json(
            &self
                .hooks_dir
                .join(format!("{}.cancel.json", sanitize(&hook.run_id))),
            hook,
        )
    }

    pub fn has_cancel_hook(&self, run_id: &str) -> bool {
        self.hooks_dir
            .join(format!("{}.cancel.json", sanitize(run_id)))
            .exists()
    }

    pub fn clear_cancel_hook(&self, run_id: &str) -> Result<()> {
        let path = self
            .hooks_dir
            .join(format!("{}.cancel.json", sanitize(run_id)));
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }

    pub fn save_snapshot(&self, snapshot: &WorkflowSnapshot) -> Result<()> {
        write_json(
            &self
                .metadata_dir
                .join(format!("{}.json", sanitize(&snapshot.id))),
            snapshot,
        )
    }

    pub fn load_snapshot(&self, workflow_id: &str) -> Result<Option<WorkflowSnapshot>> {
        read_json(
            &self
                .metadata_dir
                .join(format!("{}.json", sanitize(workflow_id))),
        )
    }
}

/// Step and run ids become filenames; anything outside `[A-Za-z0-9._-]`
/// flattens to `-`.
fn sanitize(id: &str) -> String {
    id.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let tmp = path.with_extension("json.tmp");
    let body = serde_json::to_vec_pretty(value)?;
    std::fs::write(&tmp, body)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let body = std::fs::read_to_string(path)?;
    serde_json::from_str(&body).map(Some).map_err(|e| {
        WeaverError::database(format!("corrupt store entry {}: {}", path.display(), e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::state::RunStatus;
    use serde_json::json;
    use tempfile::TempDir;

    fn store() -> (TempDir, RunStore) {
        let dir = TempDir::new().unwrap();
        let store = RunStore::open(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn open_creates_layout() {
        let (dir, _store) = store();
        for sub in ["runs", "steps", "hooks", "metadata"] {
            assert!(dir.path().join(sub).is_dir());
        }
    }

    #[test]
    fn run_roundtrip() {
        let (_dir, store) = store();
        let mut run = RunRecord::new("r1".into(), "wf".into(), 1, json!({"k": 1}));
        store.save_run(&run).unwrap();

        run.status = RunStatus::Running;
        store.save_run(&run).unwrap();

        let loaded = store.load_run("r1").unwrap().unwrap();
        assert_eq!(loaded.status, RunStatus::Running);
        assert_eq!(loaded.input, json!({"k": 1}));
        assert!(store.load_run("nope").unwrap().is_none());
    }

    #[test]
    fn step_outputs_keyed_by_name() {
        let (_dir, store) = store();
        store
            .save_step(&StepRecord::started("r1", "one", 1, json!(null)).fail("x".into()))
            .unwrap();
        store
            .save_step(&StepRecord::started("r1", "one", 2, json!(null)).succeed(json!(10)))
            .unwrap();
        store
            .save_step(&StepRecord::started("r1", "two", 1, json!(null)).succeed(json!(20)))
            .unwrap();
        // Different run, ignored.
        store
            .save_step(&StepRecord::started("r2", "one", 1, json!(null)).succeed(json!(99)))
            .unwrap();

        let outputs = store.load_step_outputs("r1").unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs["one"], json!(10));
        assert_eq!(outputs["two"], json!(20));

        let attempts = store.load_attempt_counts("r1").unwrap();
        assert_eq!(attempts["one"], 2);
        assert_eq!(attempts["two"], 1);
    }

    #[test]
    fn cancel_hook_roundtrip() {
        let (_dir, store) = store();
        assert!(!store.has_cancel_hook("r1"));
        store
            .save_cancel_hook(&CancelHook {
                run_id: "r1".into(),
                requested_at: chrono::Utc::now(),
            })
            .unwrap();
        assert!(store.has_cancel_hook("r1"));
        store.clear_cancel_hook("r1").unwrap();
        assert!(!store.has_cancel_hook("r1"));
    }

    #[test]
    fn sanitize_flattens_separators() {
        assert_eq!(sanitize("auto-tag"), "auto-tag");
        assert_eq!(sanitize("read file"), "read-file");
        assert_eq!(sanitize("a/b\\c"), "a-b-c");
    }

    #[test]
    fn load_all_runs_sees_every_record() {
        let (_dir, store) = store();
        for i in 0..3 {
            store
                .save_run(&RunRecord::new(format!("r{i}"), "wf".into(), 1, json!(i)))
                .unwrap();
        }
        assert_eq!(store.load_all_runs().unwrap().len(), 3);
    }
}
