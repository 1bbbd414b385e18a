//! Rule execution log
//!
//! Bounded ring of execution entries: a `started` entry when a rule is
//! scheduled and exactly one terminal entry (`success`, `failed`,
//! `skipped`) when it finishes. Overflow trims the oldest; entries past
//! the retention window are trimmed lazily on access.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::event::EventKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Started,
    Success,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Started)
    }
}

/// One timeline entry
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    pub id: u64,
    pub rule_id: String,
    pub event: EventKind,
    pub status: ExecutionStatus,
    pub at: DateTime<Utc>,
    /// Completion entries carry the measured duration
    pub duration_ms: Option<u64>,
    /// `failed` entries carry the error's string form
    pub error: Option<String>,
}

/// Filters for log queries
#[derive(Debug, Clone, Default)]
pub struct LogQuery {
    pub rule_id: Option<String>,
    pub status: Option<ExecutionStatus>,
    pub since: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

pub struct ExecutionLog {
    capacity: usize,
    retention: Duration,
    entries: Mutex<VecDeque<ExecutionRecord>>,
    seq: AtomicU64,
}

impl ExecutionLog {
    pub fn new(capacity: usize, retention: Duration) -> Self {
        Self {
            capacity: capacity.max(1),
            retention,
            entries: Mutex::new(VecDeque::new()),
            seq: AtomicU64::new(0),
        }
    }

    pub fn record_started(&self, rule_id: &str, event: EventKind) -> u64 {
        self.push(ExecutionRecord {
            id: 0,
            rule_id: rule_id.to_string(),
            event,
            status: ExecutionStatus::Started,
            at: Utc::now(),
            duration_ms: None,
            error: None,
        })
    }

    pub fn record_terminal(
        &self,
        rule_id: &str,
        event: EventKind,
        status: ExecutionStatus,
        duration_ms: u64,
        error: Option<String>,
    ) -> u64 {
        debug_assert!(status.is_terminal());
        self.push(ExecutionRecord {
            id: 0,
            rule_id: rule_id.to_string(),
            event,
            status,
            at: Utc::now(),
            duration_ms: Some(duration_ms),
            error,
        })
    }

    fn push(&self, mut record: ExecutionRecord) -> u64 {
        let id = self.seq.fetch_add(1, Ordering::SeqCst);
        record.id = id;
        let mut entries = self.entries.lock();
        Self::trim_expired(&mut entries, self.retention);
        while entries.len() >= self.capacity {
            entries.pop_front();
        }
        entries.push_back(record);
        id
    }

    /// Matching entries, oldest first.
    pub fn query(&self, query: &LogQuery) -> Vec<ExecutionRecord> {
        let mut entries = self.entries.lock();
        Self::trim_expired(&mut entries, self.retention);

        let iter = entries.iter().filter(|record| {
            query
                .rule_id
                .as_ref()
                .is_none_or(|id| &record.rule_id == id)
                && query.status.is_none_or(|s| record.status == s)
                && query.since.is_none_or(|since| record.at >= since)
        });
        match query.limit {
            Some(limit) => {
                // Keep the most recent `limit`, still oldest-first.
                let matched: Vec<_> = iter.cloned().collect();
                let skip = matched.len().saturating_sub(limit);
                matched.into_iter().skip(skip).collect()
            }
            None => iter.cloned().collect(),
        }
    }

    /// Durations of completed (success/failed) entries, for percentiles.
    pub fn completed_durations(&self) -> Vec<u64> {
        let entries = self.entries.lock();
        entries
            .iter()
            .filter(|r| matches!(r.status, ExecutionStatus::Success | ExecutionStatus::Failed))
            .filter_map(|r| r.duration_ms)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    fn trim_expired(entries: &mut VecDeque<ExecutionRecord>, retention: Duration) {
        let Ok(retention) = chrono::Duration::from_std(retention) else {
            return;
        };
        let cutoff = Utc::now() - retention;
        while entries.front().is_some_and(|r| r.at < cutoff) {
            entries.pop_front();
        }
    }
}
