//! Task status reconciliation.
//!
//! After (re)registration the scheduler cannot trust its stored statuses:
//! tasks may have changed state while it was away. The reconciler asks the
//! cluster manager for the status of every stored task and waits until each
//! has answered. It then sends one implicit request (an empty task list),
//! which makes the cluster manager report tasks the store does not know.
//!
//! ## Backoff
//!
//! Explicit requests are repeated while tasks stay unanswered, with an
//! exponential delay between repeats. After `timeout` the reconciler gives
//! up and reports itself reconciled so the scheduler can make progress.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use ksched_id::TaskId;
use tracing::{debug, info, warn};

use crate::driver::SchedulerDriver;
use crate::model::TaskStatus;
use crate::store::TaskStore;

/// Reconciler timing.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Delay before the first repeat of an explicit request.
    pub base_backoff: Duration,

    /// Upper bound on the delay between repeats.
    pub max_backoff: Duration,

    /// Give up waiting for answers after this long.
    pub timeout: Duration,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            base_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(30),
            timeout: Duration::from_secs(600),
        }
    }
}

/// Converges stored task statuses with the cluster manager's view.
pub struct Reconciler {
    store: Arc<dyn TaskStore>,
    config: ReconcilerConfig,

    /// Tasks that have not answered since the last start, by task ID.
    unreconciled: BTreeMap<TaskId, TaskStatus>,

    /// Stored statuses still need to be loaded.
    needs_load: bool,

    in_progress: bool,
    started_at: Option<Instant>,
    last_request: Option<Instant>,
    backoff: Duration,
}

impl Reconciler {
    /// Create a reconciler. It starts out unreconciled.
    pub fn new(store: Arc<dyn TaskStore>, config: ReconcilerConfig) -> Self {
        let backoff = config.base_backoff;
        Self {
            store,
            config,
            unreconciled: BTreeMap::new(),
            needs_load: true,
            in_progress: true,
            started_at: None,
            last_request: None,
            backoff,
        }
    }

    /// Restart reconciliation from scratch.
    ///
    /// Called on every (re)registration.
    pub fn start(&mut self) {
        info!("Starting task reconciliation");
        self.unreconciled.clear();
        self.needs_load = true;
        self.in_progress = true;
        self.started_at = None;
        self.last_request = None;
        self.backoff = self.config.base_backoff;
    }

    /// Advance reconciliation. No-op once reconciled.
    pub fn reconcile(&mut self, driver: &mut dyn SchedulerDriver) {
        self.reconcile_at(driver, Instant::now());
    }

    pub(crate) fn reconcile_at(&mut self, driver: &mut dyn SchedulerDriver, now: Instant) {
        if !self.in_progress {
            return;
        }

        if self.needs_load && !self.load() {
            return;
        }

        let started_at = *self.started_at.get_or_insert(now);
        if now.saturating_duration_since(started_at) >= self.config.timeout {
            warn!(
                remaining = self.unreconciled.len(),
                timeout_secs = self.config.timeout.as_secs(),
                "Reconciliation timed out, giving up on unanswered tasks"
            );
            self.finish(driver);
            return;
        }

        if self.unreconciled.is_empty() {
            self.finish(driver);
            return;
        }

        let due = self
            .last_request
            .map_or(true, |last| now.saturating_duration_since(last) >= self.backoff);
        if !due {
            debug!(
                remaining = self.unreconciled.len(),
                "Waiting for reconciliation answers"
            );
            return;
        }

        let statuses: Vec<TaskStatus> = self.unreconciled.values().cloned().collect();
        info!(tasks = statuses.len(), "Requesting explicit reconciliation");
        driver.reconcile_tasks(&statuses);

        if self.last_request.is_some() {
            self.backoff = (self.backoff * 2).min(self.config.max_backoff);
        }
        self.last_request = Some(now);
    }

    /// Record a status update. Any status counts as an answer.
    pub fn update(&mut self, status: &TaskStatus) {
        if self.in_progress && self.unreconciled.remove(&status.task_id).is_some() {
            debug!(
                task_id = %status.task_id,
                remaining = self.unreconciled.len(),
                "Task reconciled"
            );
        }
    }

    pub fn is_reconciled(&self) -> bool {
        !self.in_progress
    }

    /// Task IDs still waiting for an answer.
    pub fn remaining(&self) -> Vec<TaskId> {
        self.unreconciled.keys().cloned().collect()
    }

    fn load(&mut self) -> bool {
        match self.store.fetch_statuses() {
            Ok(statuses) => {
                self.unreconciled = statuses
                    .into_iter()
                    .map(|s| (s.task_id.clone(), s))
                    .collect();
                self.needs_load = false;
                info!(
                    tasks = self.unreconciled.len(),
                    "Loaded stored statuses for reconciliation"
                );
                true
            }
            Err(e) => {
                warn!(error = %e, "Failed to load statuses for reconciliation");
                false
            }
        }
    }

    fn finish(&mut self, driver: &mut dyn SchedulerDriver) {
        info!("Requesting implicit reconciliation");
        driver.reconcile_tasks(&[]);
        self.unreconciled.clear();
        self.in_progress = false;
        info!("Reconciliation complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::MockDriver;
    use crate::model::{CommandInfo, TaskInfo, TaskState};
    use crate::store::MemoryTaskStore;

    fn store_with_running(names: &[&str]) -> (Arc<dyn TaskStore>, Vec<TaskId>) {
        let store = Arc::new(MemoryTaskStore::new());
        let mut ids = Vec::new();
        for name in names {
            let task = TaskInfo {
                name: name.to_string(),
                task_id: TaskId::generate(name),
                agent_id: None,
                hostname: None,
                resources: vec![],
                executor: None,
                command: CommandInfo::default(),
                labels: Default::default(),
            };
            store.store_tasks(&[task.clone()]).unwrap();
            store
                .store_status(&TaskStatus::new(task.task_id.clone(), TaskState::Running))
                .unwrap();
            ids.push(task.task_id);
        }
        (store, ids)
    }

    #[test]
    fn test_empty_store_sends_single_implicit_request() {
        let (store, _) = store_with_running(&[]);
        let mut reconciler = Reconciler::new(store, ReconcilerConfig::default());
        let mut driver = MockDriver::new();

        assert!(!reconciler.is_reconciled());
        reconciler.reconcile(&mut driver);
        reconciler.reconcile(&mut driver);

        assert!(reconciler.is_reconciled());
        assert_eq!(driver.reconcile_requests(), vec![&[] as &[TaskStatus]]);
    }

    #[test]
    fn test_repeated_reconcile_does_not_duplicate_requests() {
        let (store, _) = store_with_running(&["broker-0", "broker-1"]);
        let mut reconciler = Reconciler::new(store, ReconcilerConfig::default());
        let mut driver = MockDriver::new();
        let now = Instant::now();

        reconciler.reconcile_at(&mut driver, now);
        reconciler.reconcile_at(&mut driver, now);

        let requests = driver.reconcile_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].len(), 2);
        assert!(!reconciler.is_reconciled());
    }

    #[test]
    fn test_backoff_grows_between_repeats() {
        let (store, _) = store_with_running(&["broker-0"]);
        let config = ReconcilerConfig {
            base_backoff: Duration::from_secs(4),
            max_backoff: Duration::from_secs(10),
            timeout: Duration::from_secs(600),
        };
        let mut reconciler = Reconciler::new(store, config);
        let mut driver = MockDriver::new();
        let start = Instant::now();

        reconciler.reconcile_at(&mut driver, start); // first request
        reconciler.reconcile_at(&mut driver, start + Duration::from_secs(3));
        assert_eq!(driver.reconcile_requests().len(), 1);

        reconciler.reconcile_at(&mut driver, start + Duration::from_secs(4)); // after 4s
        assert_eq!(driver.reconcile_requests().len(), 2);

        reconciler.reconcile_at(&mut driver, start + Duration::from_secs(11));
        assert_eq!(driver.reconcile_requests().len(), 2); // backoff is now 8s

        reconciler.reconcile_at(&mut driver, start + Duration::from_secs(12));
        assert_eq!(driver.reconcile_requests().len(), 3);

        reconciler.reconcile_at(&mut driver, start + Duration::from_secs(22)); // capped at 10s
        assert_eq!(driver.reconcile_requests().len(), 4);
    }

    #[test]
    fn test_answers_complete_reconciliation() {
        let (store, ids) = store_with_running(&["broker-0", "broker-1"]);
        let mut reconciler = Reconciler::new(store, ReconcilerConfig::default());
        let mut driver = MockDriver::new();

        reconciler.reconcile(&mut driver);
        reconciler.update(&TaskStatus::new(ids[0].clone(), TaskState::Running));
        assert_eq!(reconciler.remaining(), vec![ids[1].clone()]);

        // Unrelated task IDs are ignored.
        reconciler.update(&TaskStatus::new(TaskId::generate("broker-9"), TaskState::Lost));
        reconciler.reconcile(&mut driver);
        assert!(!reconciler.is_reconciled());

        reconciler.update(&TaskStatus::new(ids[1].clone(), TaskState::Lost));
        reconciler.reconcile(&mut driver);
        assert!(reconciler.is_reconciled());

        let requests = driver.reconcile_requests();
        assert!(requests.last().unwrap().is_empty());
    }

    #[test]
    fn test_timeout_gives_up() {
        let (store, _) = store_with_running(&["broker-0"]);
        let config = ReconcilerConfig {
            timeout: Duration::from_secs(60),
            ..ReconcilerConfig::default()
        };
        let mut reconciler = Reconciler::new(store, config);
        let mut driver = MockDriver::new();
        let start = Instant::now();

        reconciler.reconcile_at(&mut driver, start);
        reconciler.reconcile_at(&mut driver, start + Duration::from_secs(61));
        assert!(reconciler.is_reconciled());
    }

    #[test]
    fn test_restart_resets_progress() {
        let (store, ids) = store_with_running(&["broker-0"]);
        let mut reconciler = Reconciler::new(store, ReconcilerConfig::default());
        let mut driver = MockDriver::new();

        reconciler.reconcile(&mut driver);
        reconciler.update(&TaskStatus::new(ids[0].clone(), TaskState::Running));
        reconciler.reconcile(&mut driver);
        assert!(reconciler.is_reconciled());

        reconciler.start();
        assert!(!reconciler.is_reconciled());
        reconciler.reconcile(&mut driver);
        assert_eq!(reconciler.remaining(), ids);
    }
}
