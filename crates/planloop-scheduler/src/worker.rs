//! The scheduler worker — a single-threaded poll loop over a plan
//! registry.
//!
//! Lifecycle: `Idle → Starting → Running → Stopping → Stopped`, driven
//! by one call to [`PlanWorker::run`]. Startup plans fire once before
//! the loop, shutdown plans once after it; cancellation is cooperative
//! and always lets the current tick finish. `Stopped` is terminal.

use std::sync::Arc;
use std::time::Duration;

use chrono::Local;
use planloop_core::{PlanError, Result, WorkerConfig};
use serde::Serialize;
use tokio::sync::{Mutex, broadcast, watch};

use crate::events::PlanEvent;
use crate::plan::Plan;
use crate::registry::PlanRegistry;
use crate::timeplan::PlanKind;

/// Worker lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

/// Drives the poll loop that owns a [`PlanRegistry`].
pub struct PlanWorker {
    registry: Arc<Mutex<PlanRegistry>>,
    config: WorkerConfig,
    events: broadcast::Sender<PlanEvent>,
    state_tx: watch::Sender<WorkerState>,
    cancel_tx: watch::Sender<bool>,
}

impl PlanWorker {
    pub fn new(config: WorkerConfig) -> Self {
        Self::with_registry(config, PlanRegistry::new())
    }

    pub fn with_registry(config: WorkerConfig, registry: PlanRegistry) -> Self {
        let (events, _) = broadcast::channel(64);
        let (state_tx, _) = watch::channel(WorkerState::Idle);
        let (cancel_tx, _) = watch::channel(false);
        Self {
            registry: Arc::new(Mutex::new(registry)),
            config,
            events,
            state_tx,
            cancel_tx,
        }
    }

    /// Subscribe to worker-level notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<PlanEvent> {
        self.events.subscribe()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        *self.state_tx.borrow()
    }

    /// Watch lifecycle transitions.
    pub fn state_rx(&self) -> watch::Receiver<WorkerState> {
        self.state_tx.subscribe()
    }

    /// Shared handle to the registry, for host-side inspection.
    pub fn registry(&self) -> Arc<Mutex<PlanRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Register a plan: it is wired to the worker's event channel, then
    /// inserted. A duplicate name leaves the registry unchanged.
    pub async fn append_plan(&self, mut plan: Plan) -> Result<()> {
        plan.bind_events(self.events.clone());
        let mut registry = self.registry.lock().await;
        registry.add(plan)
    }

    /// Unregister a plan by name. Silent when absent.
    pub async fn remove_plan(&self, name: &str) {
        let mut registry = self.registry.lock().await;
        if let Some(mut plan) = registry.remove(name) {
            plan.unbind_events();
        }
    }

    /// Request cancellation without waiting.
    pub fn shutdown(&self) {
        // send_modify updates and notifies even with no receivers alive.
        self.cancel_tx.send_modify(|cancelled| *cancelled = true);
    }

    /// Request cancellation and wait up to `grace` for the worker to
    /// reach `Stopped`. Returns whether it wound down in time.
    pub async fn stop(&self, grace: Duration) -> bool {
        if self.state() == WorkerState::Idle {
            // Never started: nothing to wind down.
            self.state_tx.send_modify(|state| *state = WorkerState::Stopped);
            return true;
        }
        self.shutdown();
        let mut state_rx = self.state_tx.subscribe();
        tokio::time::timeout(grace, async {
            loop {
                if *state_rx.borrow_and_update() == WorkerState::Stopped {
                    return;
                }
                if state_rx.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
        .is_ok()
    }

    /// Run the worker lifecycle to completion on the calling task.
    /// Errors unless the worker is in its initial `Idle` state; a
    /// stopped worker never restarts.
    pub async fn run(&self) -> Result<()> {
        let started = self.state_tx.send_if_modified(|state| {
            if *state == WorkerState::Idle {
                *state = WorkerState::Starting;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(PlanError::worker("worker already started"));
        }

        let mut cancel_rx = self.cancel_tx.subscribe();
        tracing::debug!("worker starting...");

        if self.config.delay > 0
            && !self
                .sleep_cancellable(Duration::from_secs(self.config.delay), &mut cancel_rx)
                .await
        {
            // Cancelled during the startup delay: shutdown plans still
            // run before the worker reports stopped.
            return self.wind_down().await;
        }

        self.run_marker_pass(PlanKind::Startup).await;
        let _ = self.events.send(PlanEvent::Started);
        self.state_tx.send_modify(|state| *state = WorkerState::Running);
        tracing::info!("⏰ Plan worker started (poll every {}s)", self.config.interval);

        while !*cancel_rx.borrow() {
            self.run_due_pass(&cancel_rx).await;
            if !self
                .sleep_cancellable(Duration::from_secs(self.config.interval), &mut cancel_rx)
                .await
            {
                break;
            }
        }

        self.wind_down().await
    }

    async fn wind_down(&self) -> Result<()> {
        self.state_tx.send_modify(|state| *state = WorkerState::Stopping);
        tracing::debug!("worker stopping...");
        self.run_marker_pass(PlanKind::Shutdown).await;
        let _ = self.events.send(PlanEvent::Stopped);
        self.state_tx.send_modify(|state| *state = WorkerState::Stopped);
        tracing::info!("🛑 Plan worker stopped");
        Ok(())
    }

    /// Execute every plan of a marker kind once, in registration order.
    async fn run_marker_pass(&self, kind: PlanKind) {
        let now = Local::now().naive_local();
        let mut registry = self.registry.lock().await;
        let names: Vec<String> = registry
            .plans_of(kind)
            .map(|p| p.name().to_string())
            .collect();
        for name in names {
            if let Some(plan) = registry.find_mut(&name) {
                tracing::debug!("Executing plan: {name}");
                plan.execute(now);
            }
        }
    }

    /// One poll tick: sample the clock once, execute every due plan
    /// sequentially. Cancellation is checked between plans, never
    /// mid-plan.
    async fn run_due_pass(&self, cancel_rx: &watch::Receiver<bool>) {
        let now = Local::now().naive_local();
        let mut registry = self.registry.lock().await;
        let due: Vec<String> = registry
            .due(now)
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        for name in due {
            if *cancel_rx.borrow() {
                break;
            }
            if let Some(plan) = registry.find_mut(&name) {
                tracing::debug!("Executing plan: {name}");
                plan.execute(now);
            }
        }
    }

    /// Sleep that wakes immediately on cancellation. Returns `false`
    /// when cancelled.
    async fn sleep_cancellable(
        &self,
        duration: Duration,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        if *cancel_rx.borrow() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = cancel_rx.changed() => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeplan::TimePlan;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn worker(delay: u64, interval: u64) -> Arc<PlanWorker> {
        Arc::new(PlanWorker::new(WorkerConfig {
            delay,
            interval,
            auto_bind: true,
        }))
    }

    fn counter() -> (Arc<AtomicUsize>, impl Fn() -> anyhow::Result<()> + Send + Sync + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let c = count.clone();
        (count, move || {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_startup_plan_runs_exactly_once() {
        let worker = worker(0, 1);
        let (count, tick) = counter();
        worker
            .append_plan(Plan::bare("boot", TimePlan::startup(), tick))
            .await
            .unwrap();

        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run().await });

        // Let several poll ticks elapse; the startup plan must not
        // re-fire through the due scan.
        tokio::time::sleep(Duration::from_secs(5)).await;
        worker.shutdown();
        handle.await.unwrap().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_plan_runs_on_stop() {
        let worker = worker(0, 1);
        let (count, tick) = counter();
        worker
            .append_plan(Plan::bare("bye", TimePlan::shutdown(), tick))
            .await
            .unwrap();

        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert!(worker.stop(Duration::from_secs(10)).await);
        handle.await.unwrap().unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_due_plan_fires_through_poll_loop() {
        let worker = worker(0, 1);
        let (count, tick) = counter();
        // A once-plan anchored at the current wall clock is due on the
        // first tick.
        let rule = TimePlan::once(Local::now().naive_local());
        worker.append_plan(Plan::bare("now", rule, tick)).await.unwrap();

        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_secs(3)).await;
        worker.shutdown();
        handle.await.unwrap().unwrap();

        // Fired once and never re-matched: the slot is spent.
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_events_are_published() {
        let worker = worker(0, 1);
        let (_count, tick) = counter();
        worker
            .append_plan(Plan::bare("boot", TimePlan::startup(), tick))
            .await
            .unwrap();
        let mut events = worker.subscribe();

        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_secs(2)).await;
        worker.shutdown();
        handle.await.unwrap().unwrap();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert!(matches!(seen[0], PlanEvent::PlanStarted { .. }));
        assert!(matches!(seen[1], PlanEvent::PlanFinished { .. }));
        assert!(matches!(seen[2], PlanEvent::Started));
        assert!(matches!(seen.last(), Some(PlanEvent::Stopped)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_worker_does_not_restart() {
        let worker = worker(0, 1);
        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        worker.shutdown();
        handle.await.unwrap().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);

        let err = worker.run().await.unwrap_err();
        assert!(matches!(err, PlanError::Worker(_)));
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_run_while_running_errors() {
        let worker = worker(0, 1);
        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert!(worker.run().await.is_err());
        worker.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_startup_delay_still_runs_shutdown_plans() {
        let worker = worker(3600, 1);
        let (count, tick) = counter();
        worker
            .append_plan(Plan::bare("bye", TimePlan::shutdown(), tick))
            .await
            .unwrap();

        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;
        worker.shutdown();
        handle.await.unwrap().unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_append_and_remove_while_running() {
        let worker = worker(0, 1);
        let runner = worker.clone();
        let handle = tokio::spawn(async move { runner.run().await });
        tokio::time::sleep(Duration::from_secs(1)).await;

        let (_count, tick) = counter();
        worker
            .append_plan(Plan::bare("late", TimePlan::startup(), tick))
            .await
            .unwrap();
        {
            let registry = worker.registry();
            let registry = registry.lock().await;
            assert!(registry.contains("late"));
        }
        worker.remove_plan("late").await;
        {
            let registry = worker.registry();
            let registry = registry.lock().await;
            assert!(!registry.contains("late"));
        }

        worker.shutdown();
        handle.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_idle_worker_is_clean() {
        let worker = worker(0, 1);
        assert!(worker.stop(Duration::from_secs(1)).await);
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_append_is_rejected() {
        let worker = worker(0, 1);
        let (_c1, t1) = counter();
        let (_c2, t2) = counter();
        worker
            .append_plan(Plan::bare("job", TimePlan::startup(), t1))
            .await
            .unwrap();
        let err = worker
            .append_plan(Plan::bare("job", TimePlan::startup(), t2))
            .await
            .unwrap_err();
        assert!(matches!(err, PlanError::DuplicatePlan(_)));
    }
}
