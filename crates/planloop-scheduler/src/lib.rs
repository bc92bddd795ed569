//! # Planloop Scheduler
//!
//! Recurring-job scheduler core: named plans pair a recurrence rule with a
//! callback, and a single-threaded polling worker fires whichever plans
//! are due on each tick.
//!
//! ## Design Principles
//! - One thread of control — plans run sequentially, never concurrently
//! - A misbehaving plan (error or panic) can never take the worker down
//! - A rule slot is matched at most once; missed slots are skipped, not
//!   backfilled
//! - No persistence — the compact rule expression is the only wire format
//!
//! ## Architecture
//! ```text
//! PlanWorker (tokio task)
//!   ├── startup pass: every Startup plan, once, in registry order
//!   ├── poll loop: registry.due(now) → Plan::execute → rule advance
//!   │     └── cancellable interval sleep between ticks
//!   └── shutdown pass: every Shutdown plan, once → Stopped
//!
//! Plan::execute
//!   ├── re-entrancy guard (running flag)
//!   ├── callback under catch_unwind → PlanFailed on fault
//!   └── TimePlan::mark_executed → next_time recomputed
//! ```

pub mod events;
pub mod plan;
pub mod registry;
pub mod sets;
pub mod timeplan;
pub mod worker;

pub use events::PlanEvent;
pub use plan::{Plan, PlanAction};
pub use registry::PlanRegistry;
pub use sets::{MonthDaySet, MonthSet, WeekNoSet, WeekdaySet};
pub use timeplan::{PlanKind, TimePlan};
pub use worker::{PlanWorker, WorkerState};

pub use planloop_core::{PlanError, Result, WorkerConfig};
