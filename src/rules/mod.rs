//! Rule engine
//!
//! Event-driven automation: registry, guarded concurrent dispatch with
//! error isolation, bounded execution log, statistics, and the admin view.
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | `types` | `Rule`, builder, `RuleContext`, statistics |
//! | `log` | Ring-buffered execution timeline |
//! | `engine` | Dispatch, isolation, registry |
//! | `admin` | Overview, percentiles, health score |
//! | [`builtin`] | Auto-tag, auto-link, daily note, meeting note |

mod admin;
pub mod builtin;
mod engine;
mod log;
mod types;

pub use admin::{AdminOverview, AdminSnapshot, Health, Percentiles};
pub use engine::{RuleEngine, RuleSummary};
pub use log::{ExecutionLog, ExecutionRecord, ExecutionStatus, LogQuery};
pub use types::{ActionFn, ExecutionSummary, GuardFn, Rule, RuleBuilder, RuleContext, RuleStats};
