//! Worker-level notifications, fanned out over a broadcast channel.
//! Fire-and-forget: a send with no subscribers is simply dropped.

use serde::Serialize;

/// Events published by a [`crate::PlanWorker`] and the plans it owns.
#[derive(Debug, Clone, Serialize)]
pub enum PlanEvent {
    /// The worker finished its startup pass and entered the poll loop.
    Started,
    /// The worker finished its shutdown pass and stopped.
    Stopped,
    /// A plan began executing.
    PlanStarted { name: String },
    /// A plan finished executing (successfully or not).
    PlanFinished { name: String },
    /// A plan's callback returned an error or panicked.
    PlanFailed { name: String, error: String },
}
