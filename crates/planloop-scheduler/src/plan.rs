//! Plans — a named callback bound to a recurrence rule.
//!
//! `execute` is the only entry point: it guards against re-entry, keeps
//! any callback fault (error return or panic) inside the plan, and
//! advances the rule afterwards so a failing job cannot re-fire on every
//! poll tick.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::NaiveDateTime;
use planloop_core::Result;
use tokio::sync::broadcast;

use crate::events::PlanEvent;
use crate::timeplan::{PlanKind, TimePlan};

/// The callback bound to a plan. The plan-argument form receives the
/// plan itself, so a job can inspect its own rule or disable itself.
pub enum PlanAction {
    Bare(Box<dyn Fn() -> anyhow::Result<()> + Send + Sync>),
    WithPlan(Box<dyn Fn(&Plan) -> anyhow::Result<()> + Send + Sync>),
}

impl fmt::Debug for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanAction::Bare(_) => write!(f, "PlanAction::Bare"),
            PlanAction::WithPlan(_) => write!(f, "PlanAction::WithPlan"),
        }
    }
}

/// A named, schedulable unit: recurrence rule + callback + flags.
#[derive(Debug)]
pub struct Plan {
    name: String,
    rule: TimePlan,
    enabled: AtomicBool,
    running: bool,
    action: PlanAction,
    events: Option<broadcast::Sender<PlanEvent>>,
}

impl Plan {
    pub fn new(name: impl Into<String>, rule: TimePlan, action: PlanAction) -> Self {
        Self {
            name: name.into(),
            rule,
            enabled: AtomicBool::new(true),
            running: false,
            action,
            events: None,
        }
    }

    /// Build a plan from a rule expression.
    pub fn from_expression(
        name: impl Into<String>,
        expression: &str,
        action: PlanAction,
    ) -> Result<Self> {
        Ok(Self::new(name, TimePlan::parse(expression)?, action))
    }

    /// Convenience constructor for a zero-argument callback.
    pub fn bare<F>(name: impl Into<String>, rule: TimePlan, f: F) -> Self
    where
        F: Fn() -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(name, rule, PlanAction::Bare(Box::new(f)))
    }

    /// Convenience constructor for a callback that receives the plan.
    pub fn with_plan<F>(name: impl Into<String>, rule: TimePlan, f: F) -> Self
    where
        F: Fn(&Plan) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        Self::new(name, rule, PlanAction::WithPlan(Box::new(f)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn rule(&self) -> &TimePlan {
        &self.rule
    }

    pub fn kind(&self) -> PlanKind {
        self.rule.kind()
    }

    pub fn enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Enable or disable the plan. Takes `&self` so a plan-argument
    /// callback can disable its own plan mid-execution.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub(crate) fn bind_events(&mut self, tx: broadcast::Sender<PlanEvent>) {
        self.events = Some(tx);
    }

    pub(crate) fn unbind_events(&mut self) {
        self.events = None;
    }

    #[cfg(test)]
    pub(crate) fn force_running(&mut self, running: bool) {
        self.running = running;
    }

    /// Execute the plan's callback once.
    ///
    /// No-op while an execution is already in flight. Faults never
    /// escape: an `Err` or a panic becomes a `PlanFailed` event. The
    /// rule advances after every attempt of a periodic plan, success or
    /// fault alike; startup/shutdown markers never advance.
    pub fn execute(&mut self, now: NaiveDateTime) {
        if self.running {
            return;
        }
        self.running = true;
        self.emit(PlanEvent::PlanStarted {
            name: self.name.clone(),
        });

        let this: &Plan = &*self;
        let outcome = catch_unwind(AssertUnwindSafe(|| match &this.action {
            PlanAction::Bare(f) => f(),
            PlanAction::WithPlan(f) => f(this),
        }));
        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(panic_message(payload)),
        };
        if let Some(error) = fault {
            tracing::warn!("⚠️ Plan '{}' failed: {error}", self.name);
            self.emit(PlanEvent::PlanFailed {
                name: self.name.clone(),
                error,
            });
        }

        if self.rule.kind().is_periodic() {
            self.rule.mark_executed(now);
        }
        self.running = false;
        self.emit(PlanEvent::PlanFinished {
            name: self.name.clone(),
        });
    }

    fn emit(&self, event: PlanEvent) {
        if let Some(tx) = &self.events {
            let _ = tx.send(event);
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic in plan callback".to_string()
    }
}
