//! Weaver - always-on agent for Markdown knowledge vaults
//!
//! Watches a vault, maintains a queryable SQLite index of files, tags, and
//! links, and drives event-triggered automations (auto-tag, auto-link,
//! daily rollups, meeting-note extraction, git commits) through a rule
//! engine backed by an LLM.
//!
//! ## Module Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        DOMAIN MODEL                          │
//! │  parser/    note text → frontmatter, tags, links, tasks      │
//! │  event      trigger taxonomy shared by rules and workflows   │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                      APPLICATION LAYER                       │
//! │  workflow/  durable-step runs (replay, retry, cancel)        │
//! │  rules/     event dispatch, guards, isolation, admin view    │
//! │  surface/   tool registry + request pipeline (MCP surface)   │
//! └──────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────────────────────────────────────────┐
//! │                    INFRASTRUCTURE LAYER                      │
//! │  cache/     SQLite shadow index (WAL, FTS5)                  │
//! │  watcher/   debounced coalescing change events (notify)      │
//! │  llm/       resilient model client (limiter→breaker→retry)   │
//! │  resilience/ circuit breaker, token bucket, backoff          │
//! │  activity/  append-only session audit log                    │
//! │  vcs/       debounced git auto-commit                        │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Responsibilities
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`parser`] | Pure extraction from note text |
//! | [`cache`] | Persist and query file metadata and the link graph |
//! | [`watcher`] | Emit debounced, coalesced filesystem events |
//! | [`llm`] | Bounded, resilient remote model access |
//! | [`workflow`] | Durable-step execution with replay |
//! | [`rules`] | Event→rule dispatch with error isolation |
//! | [`surface`] | Uniform tool request/response layer |
//! | [`activity`] | Append-only audit trail |
//! | [`vcs`] | Batch commits of vault mutations |
//! | [`daemon`] | Singleton wiring, startup and drain |

// ═══════════════════════════════════════════════════════════════
// DOMAIN MODEL
// ═══════════════════════════════════════════════════════════════
pub mod event;
pub mod parser;

// ═══════════════════════════════════════════════════════════════
// APPLICATION LAYER
// ═══════════════════════════════════════════════════════════════
pub mod rules;
pub mod surface;
pub mod workflow;

// ═══════════════════════════════════════════════════════════════
// INFRASTRUCTURE LAYER
// ═══════════════════════════════════════════════════════════════
pub mod activity;
pub mod cache;
pub mod llm;
pub mod resilience;
pub mod vcs;
pub mod watcher;

// ═══════════════════════════════════════════════════════════════
// CROSS-CUTTING
// ═══════════════════════════════════════════════════════════════
pub mod config;
pub mod daemon;
pub mod error;

// ═══════════════════════════════════════════════════════════════
// PUBLIC API RE-EXPORTS
// ═══════════════════════════════════════════════════════════════

pub use config::WeaverConfig;
pub use daemon::Weaver;
pub use error::{ErrorKind, Result, WeaverError};

pub use cache::{FileQuery, FileRecord, ShadowCache, SyncReport, VaultStats};
pub use event::{EventKind, VaultEvent};
pub use llm::{LlmClient, LlmRequest, ResponseFormat};
pub use rules::{Rule, RuleContext, RuleEngine};
pub use surface::{Dispatcher, ToolRequest, ToolResponse};
pub use watcher::{VaultWatcher, WatchEvent, WatchKind};
pub use workflow::{WorkflowDefinition, WorkflowEngine};
