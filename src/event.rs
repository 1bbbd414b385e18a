//! Vault events
//!
//! The currency between the watcher, the rule engine, and workflow
//! triggers. A `VaultEvent` is a watch event promoted with metadata, or a
//! synthetic scheduled/manual trigger.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::watcher::{WatchEvent, WatchKind};

/// Trigger taxonomy shared by rules and workflow definitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    #[serde(rename = "file:add")]
    FileAdd,
    #[serde(rename = "file:change")]
    FileChange,
    #[serde(rename = "file:unlink")]
    FileUnlink,
    #[serde(rename = "scheduled")]
    Scheduled,
    #[serde(rename = "manual")]
    Manual,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FileAdd => "file:add",
            Self::FileChange => "file:change",
            Self::FileUnlink => "file:unlink",
            Self::Scheduled => "scheduled",
            Self::Manual => "manual",
        }
    }
}

impl From<WatchKind> for EventKind {
    fn from(kind: WatchKind) -> Self {
        match kind {
            WatchKind::Add => Self::FileAdd,
            WatchKind::Change => Self::FileChange,
            WatchKind::Unlink => Self::FileUnlink,
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One event flowing through the rule engine
#[derive(Debug, Clone, PartialEq)]
pub struct VaultEvent {
    pub kind: EventKind,
    /// Vault-relative path for file events
    pub path: Option<String>,
    pub absolute_path: Option<PathBuf>,
    /// Arbitrary event metadata surfaced to guards and actions
    pub metadata: Value,
}

impl VaultEvent {
    pub fn from_watch(event: &WatchEvent) -> Self {
        Self {
            kind: event.kind.into(),
            path: Some(event.relative_path.clone()),
            absolute_path: Some(event.absolute_path.clone()),
            metadata: Value::Null,
        }
    }

    pub fn scheduled(metadata: Value) -> Self {
        Self {
            kind: EventKind::Scheduled,
            path: None,
            absolute_path: None,
            metadata,
        }
    }

    pub fn manual(metadata: Value) -> Self {
        Self {
            kind: EventKind::Manual,
            path: None,
            absolute_path: None,
            metadata,
        }
    }
}
