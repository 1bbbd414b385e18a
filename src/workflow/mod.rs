//! Workflow engine
//!
//! Durable-step execution with at-least-once semantics, per-step retry,
//! and deterministic replay. Module layout:
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `definition` | `WorkflowDefinition`, builder, serializable snapshot |
//! | `state` | Run and step records, status state machines |
//! | `store` | JSON file store (`runs/`, `steps/`, `hooks/`, `metadata/`) |
//! | `context` | `WorkflowContext::step`, the memoized durability boundary |
//! | `engine` | Registry, scheduling, replay, cancellation, history |

mod context;
mod definition;
mod engine;
mod state;
mod store;

pub use context::WorkflowContext;
pub use definition::{WorkflowDefinition, WorkflowDefinitionBuilder, WorkflowHandler, WorkflowSnapshot};
pub use engine::{HistoryQuery, WorkflowEngine};
pub use state::{CancelHook, RunRecord, RunStatus, StepRecord, StepStatus};
pub use store::RunStore;
