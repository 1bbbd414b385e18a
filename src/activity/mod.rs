//! Activity logger
//!
//! Append-only audit trail, one markdown file per session. Producers never
//! block: `record` pushes into a bounded in-memory ring and returns; a
//! background task drains the ring on a fixed cadence. When the ring is
//! full the oldest unflushed entries are dropped and counted.
//!
//! This is the audit sink, deliberately separate from `tracing`: tracing is
//! for operators, the activity log is a readable narrative of what the
//! agent did to the vault.

use std::collections::VecDeque;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::Result;

/// One structured audit record
#[derive(Debug, Clone)]
pub enum ActivityRecord {
    SessionStart {
        session_id: String,
    },
    SessionEnd {
        session_id: String,
        dropped_entries: u64,
    },
    Prompt {
        text: String,
    },
    ToolCall {
        name: String,
        params: Value,
        result_summary: String,
        duration_ms: u64,
        success: bool,
    },
    LlmInteraction {
        model: String,
        label: String,
        prompt_excerpt: String,
        response_excerpt: String,
        duration_ms: u64,
    },
    WorkflowEvent {
        run_id: String,
        workflow_id: String,
        status: String,
    },
    Error {
        message: String,
        /// Cause chain / stack rendering; captured here only, never in
        /// response envelopes
        detail: Option<String>,
    },
}

struct Entry {
    at: DateTime<Utc>,
    record: ActivityRecord,
}

/// Buffered, non-blocking session logger
pub struct ActivityLogger {
    session_id: String,
    /// None disables persistence (tests, library embedding)
    path: Option<PathBuf>,
    capacity: usize,
    buffer: Mutex<VecDeque<Entry>>,
    dropped: AtomicU64,
}

impl ActivityLogger {
    /// Open a new session file under `dir`.
    pub fn open(dir: &Path, capacity: usize) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        let session_id = Uuid::new_v4().to_string();
        let filename = format!(
            "{}-{}.md",
            Utc::now().format("%Y%m%d-%H%M%S"),
            &session_id[..8]
        );
        let path = dir.join(filename);
        std::fs::write(
            &path,
            format!(
                "# Weaver session {}\n\nStarted: {}\n\n",
                session_id,
                Utc::now().to_rfc3339()
            ),
        )?;

        let logger = Self {
            session_id: session_id.clone(),
            path: Some(path),
            capacity: capacity.max(1),
            buffer: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        };
        logger.record(ActivityRecord::SessionStart { session_id });
        Ok(logger)
    }

    /// A logger that keeps the ring but never writes a file.
    pub fn disabled() -> Self {
        Self {
            session_id: "disabled".to_string(),
            path: None,
            capacity: 64,
            buffer: Mutex::new(VecDeque::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn dropped_count(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Append a record. Never blocks; a full ring drops the oldest
    /// unflushed entry.
    pub fn record(&self, record: ActivityRecord) {
        let mut buffer = self.buffer.lock();
        if buffer.len() >= self.capacity {
            buffer.pop_front();
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
        buffer.push_back(Entry {
            at: Utc::now(),
            record,
        });
    }

    // Convenience constructors used across the crate.

    pub fn tool_call(
        &self,
        name: &str,
        params: &Value,
        result_summary: impl Into<String>,
        duration_ms: u64,
        success: bool,
    ) {
        self.record(ActivityRecord::ToolCall {
            name: name.to_string(),
            params: params.clone(),
            result_summary: result_summary.into(),
            duration_ms,
            success,
        });
    }

    pub fn llm_interaction(
        &self,
        model: &str,
        label: &str,
        prompt: &str,
        response: &str,
        duration_ms: u64,
    ) {
        self.record(ActivityRecord::LlmInteraction {
            model: model.to_string(),
            label: label.to_string(),
            prompt_excerpt: excerpt(prompt),
            response_excerpt: excerpt(response),
            duration_ms,
        });
    }

    pub fn workflow_event(&self, run_id: &str, workflow_id: &str, status: &str) {
        self.record(ActivityRecord::WorkflowEvent {
            run_id: run_id.to_string(),
            workflow_id: workflow_id.to_string(),
            status: status.to_string(),
        });
    }

    pub fn error(&self, message: &str, detail: Option<String>) {
        self.record(ActivityRecord::Error {
            message: message.to_string(),
            detail,
        });
    }

    /// Drain the ring to the session file.
    pub fn flush(&self) -> Result<()> {
        let entries: Vec<Entry> = {
            let mut buffer = self.buffer.lock();
            buffer.drain(..).collect()
        };
        if entries.is_empty() {
            return Ok(());
        }
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut body = String::new();
        for entry in &entries {
            body.push_str(&render_entry(entry));
        }
        let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
        file.write_all(body.as_bytes())?;
        Ok(())
    }

    /// Periodic flusher; drains once more when the token fires.
    pub fn spawn_flusher(
        self: Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        let logger = self;
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {
                        if let Err(e) = logger.flush() {
                            tracing::warn!(error = %e, "activity flush failed");
                        }
                    }
                }
            }
            let _ = logger.flush();
        })
    }

    /// Final drain: session end marker plus everything still buffered.
    pub fn shutdown(&self) -> Result<()> {
        self.record(ActivityRecord::SessionEnd {
            session_id: self.session_id.clone(),
            dropped_entries: self.dropped_count(),
        });
        self.flush()
    }

    #[cfg(test)]
    fn buffered(&self) -> usize {
        self.buffer.lock().len()
    }
}

fn render_entry(entry: &Entry) -> String {
    let ts = entry.at.format("%H:%M:%S%.3f");
    match &entry.record {
        ActivityRecord::SessionStart { session_id } => {
            format!("- **{ts}** session started (`{session_id}`)\n")
        }
        ActivityRecord::SessionEnd {
            session_id,
            dropped_entries,
        } => format!(
            "- **{ts}** session ended (`{session_id}`, {dropped_entries} dropped entries)\n"
        ),
        ActivityRecord::Prompt { text } => {
            format!("- **{ts}** prompt: {}\n", excerpt(text))
        }
        ActivityRecord::ToolCall {
            name,
            params,
            result_summary,
            duration_ms,
            success,
        } => {
            let marker = if *success { "ok" } else { "failed" };
            format!(
                "- **{ts}** tool `{name}` ({duration_ms} ms, {marker}) params `{}` → {}\n",
                excerpt(&params.to_string()),
                excerpt(result_summary)
            )
        }
        ActivityRecord::LlmInteraction {
            model,
            label,
            prompt_excerpt,
            response_excerpt,
            duration_ms,
        } => format!(
            "- **{ts}** llm [{label}] model `{model}` ({duration_ms} ms)\n  - prompt: {prompt_excerpt}\n  - response: {response_excerpt}\n"
        ),
        ActivityRecord::WorkflowEvent {
            run_id,
            workflow_id,
            status,
        } => format!("- **{ts}** workflow `{workflow_id}` run `{run_id}` → {status}\n"),
        ActivityRecord::Error { message, detail } => match detail {
            Some(detail) => format!(
                "- **{ts}** error: {}\n  - detail: {}\n",
                excerpt(message),
                excerpt(detail)
            ),
            None => format!("- **{ts}** error: {}\n", excerpt(message)),
        },
    }
}

/// Bounded excerpt for log lines; newlines flattened.
fn excerpt(text: &str) -> String {
    let flat = text.replace(['\n', '\r'], " ");
    let trimmed = flat.trim();
    if trimmed.len() <= 200 {
        return trimmed.to_string();
    }
    let mut end = 200;
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &trimmed[..end])
}
