//! Plan registry — an insertion-ordered, name-keyed collection.
//!
//! Queries are recomputed by filtering on demand. Registries are small
//! and polls are infrequent; correctness beats cached indices here.

use chrono::NaiveDateTime;
use indexmap::IndexMap;
use planloop_core::{PlanError, Result};

use crate::plan::Plan;
use crate::timeplan::PlanKind;

/// Owns every registered plan, keyed by unique name.
#[derive(Debug, Default)]
pub struct PlanRegistry {
    plans: IndexMap<String, Plan>,
}

impl PlanRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a plan. Fails with `DuplicatePlan` if the name is taken;
    /// the registry is left unchanged in that case.
    pub fn add(&mut self, plan: Plan) -> Result<()> {
        if self.plans.contains_key(plan.name()) {
            return Err(PlanError::DuplicatePlan(plan.name().to_string()));
        }
        self.plans.insert(plan.name().to_string(), plan);
        Ok(())
    }

    /// Remove a plan by name. Silently succeeds when the name is absent.
    pub fn remove(&mut self, name: &str) -> Option<Plan> {
        self.plans.shift_remove(name)
    }

    pub fn clear(&mut self) {
        self.plans.clear();
    }

    pub fn len(&self) -> usize {
        self.plans.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plans.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.plans.contains_key(name)
    }

    pub fn find(&self, name: &str) -> Option<&Plan> {
        self.plans.get(name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Plan> {
        self.plans.get_mut(name)
    }

    /// Every plan, in registration order.
    pub fn plans(&self) -> impl Iterator<Item = &Plan> {
        self.plans.values()
    }

    /// Every plan of one recurrence kind, in registration order.
    pub fn plans_of(&self, kind: PlanKind) -> impl Iterator<Item = &Plan> {
        self.plans.values().filter(move |p| p.kind() == kind)
    }

    /// Enabled plans.
    pub fn enabled(&self) -> Vec<&Plan> {
        self.plans.values().filter(|p| p.enabled()).collect()
    }

    /// Enabled plans of one recurrence kind.
    pub fn enabled_of(&self, kind: PlanKind) -> Vec<&Plan> {
        self.plans
            .values()
            .filter(|p| p.enabled() && p.kind() == kind)
            .collect()
    }

    /// Plans due at `now`: enabled, not already running, and inside
    /// their rule's acceptance window.
    pub fn due(&self, now: NaiveDateTime) -> Vec<&Plan> {
        self.plans
            .values()
            .filter(|p| p.enabled() && !p.is_running() && p.rule().is_due(now))
            .collect()
    }

    /// Due plans of one recurrence kind.
    pub fn due_of(&self, kind: PlanKind, now: NaiveDateTime) -> Vec<&Plan> {
        self.plans
            .values()
            .filter(|p| {
                p.enabled() && p.kind() == kind && !p.is_running() && p.rule().is_due(now)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeplan::TimePlan;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn noop(name: &str, rule: TimePlan) -> Plan {
        Plan::bare(name, rule, || Ok(()))
    }

    #[test]
    fn test_duplicate_add_keeps_original() {
        let mut registry = PlanRegistry::new();
        registry
            .add(noop("backup", TimePlan::once(dt(2023, 1, 1, 2))))
            .unwrap();

        let err = registry
            .add(noop("backup", TimePlan::startup()))
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicatePlan(name) if name == "backup"));

        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.find("backup").unwrap().kind(),
            crate::timeplan::PlanKind::Once
        );
    }

    #[test]
    fn test_remove_is_silent_when_absent() {
        let mut registry = PlanRegistry::new();
        assert!(registry.remove("ghost").is_none());
        registry.add(noop("real", TimePlan::startup())).unwrap();
        assert!(registry.remove("real").is_some());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_registration_order_is_preserved() {
        let mut registry = PlanRegistry::new();
        for name in ["c", "a", "b"] {
            registry.add(noop(name, TimePlan::startup())).unwrap();
        }
        let names: Vec<&str> = registry.plans().map(|p| p.name()).collect();
        assert_eq!(names, ["c", "a", "b"]);

        // Removal keeps the remaining order intact.
        registry.remove("a");
        let names: Vec<&str> = registry.plans().map(|p| p.name()).collect();
        assert_eq!(names, ["c", "b"]);
    }

    #[test]
    fn test_kind_filtered_views() {
        let mut registry = PlanRegistry::new();
        registry.add(noop("boot", TimePlan::startup())).unwrap();
        registry.add(noop("bye", TimePlan::shutdown())).unwrap();
        registry
            .add(noop("daily", TimePlan::every_days(dt(2023, 1, 1, 2), 1).unwrap()))
            .unwrap();

        assert_eq!(registry.plans_of(PlanKind::Startup).count(), 1);
        assert_eq!(registry.plans_of(PlanKind::Shutdown).count(), 1);
        assert_eq!(registry.plans_of(PlanKind::EveryDays).count(), 1);
        assert_eq!(registry.plans_of(PlanKind::Once).count(), 0);
    }

    #[test]
    fn test_due_requires_enabled_idle_and_on_time() {
        let mut registry = PlanRegistry::new();
        let now = dt(2023, 1, 6, 2);

        registry
            .add(noop("on-time", TimePlan::every_days(dt(2023, 1, 1, 2), 5).unwrap()))
            .unwrap();
        registry
            .add(noop("early", TimePlan::every_days(dt(2023, 3, 1, 2), 5).unwrap()))
            .unwrap();
        registry.add(noop("boot", TimePlan::startup())).unwrap();

        let due: Vec<&str> = registry.due(now).iter().map(|p| p.name()).collect();
        assert_eq!(due, ["on-time"]);

        // Disabled plans drop out of the due view.
        registry.find("on-time").unwrap().set_enabled(false);
        assert!(registry.due(now).is_empty());
        assert_eq!(registry.enabled().len(), 2);

        // So do plans still running from a previous tick.
        registry.find("on-time").unwrap().set_enabled(true);
        registry.find_mut("on-time").unwrap().force_running(true);
        assert!(registry.due(now).is_empty());
    }

    #[test]
    fn test_startup_plans_never_poll_due() {
        let mut registry = PlanRegistry::new();
        registry.add(noop("boot", TimePlan::startup())).unwrap();
        assert!(registry.due(dt(2023, 1, 1, 0)).is_empty());
        assert_eq!(registry.plans_of(PlanKind::Startup).count(), 1);
    }
}
