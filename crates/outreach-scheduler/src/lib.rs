//! # Outreach Scheduler
//!
//! The scheduled step execution engine. Each invocation is a fresh, stateless
//! run; the SQLite store's conditional update is the only coordination point
//! between overlapping runs.
//!
//! ## Architecture
//! ```text
//! BatchRunner::run
//!   ├── CadenceDb::select_due        (read-only)
//!   └── for each schedule, sequentially, with a random delay
//!         ├── CadenceDb::claim       (scheduled → processing, CAS)
//!         ├── dedup checks           (in-batch set, sent instance, executed sibling)
//!         ├── ContentResolver        (pre-rendered → AI prompt → template → auto)
//!         ├── ActionDispatcher       (step type → channel endpoint)
//!         ├── CadenceDb::finish      (executed | failed | skipped)
//!         └── CadenceAdvancer        (next step, timezone-aware schedule)
//! ```

pub mod advance;
pub mod automation;
pub mod content;
pub mod dispatch;
pub mod engine;
pub mod persistence;
pub mod timezone;

#[cfg(test)]
mod testkit;

pub use advance::{Advancement, CadenceAdvancer};
pub use automation::CadenceAutomation;
pub use content::{ContentResolver, ContentSettings, ContentSource, ResolvedContent};
pub use dispatch::ActionDispatcher;
pub use engine::{BatchRunner, ItemResult, ProcessQueueRequest, ProcessQueueResponse};
pub use persistence::CadenceDb;
