//! Application state shared across request handlers.

use std::sync::Arc;

use tokio::sync::watch;

use crate::operator::OperatorRequests;
use crate::plan::PlanStatus;
use crate::recovery::RecoveryStatus;
use crate::store::TaskStore;

/// Shared application state.
///
/// The API never touches the control loop directly: it reads the task
/// store and published snapshots, and writes only to the operator queues.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: Arc<dyn TaskStore>,
    requests: OperatorRequests,
    plan: watch::Receiver<Arc<PlanStatus>>,
    recovery: watch::Receiver<Arc<RecoveryStatus>>,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        store: Arc<dyn TaskStore>,
        requests: OperatorRequests,
        plan: watch::Receiver<Arc<PlanStatus>>,
        recovery: watch::Receiver<Arc<RecoveryStatus>>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                store,
                requests,
                plan,
                recovery,
            }),
        }
    }

    pub fn store(&self) -> &dyn TaskStore {
        self.inner.store.as_ref()
    }

    pub fn requests(&self) -> &OperatorRequests {
        &self.inner.requests
    }

    /// Latest published plan status.
    pub fn plan_status(&self) -> Arc<PlanStatus> {
        self.inner.plan.borrow().clone()
    }

    /// Latest published recovery status.
    pub fn recovery_status(&self) -> Arc<RecoveryStatus> {
        self.inner.recovery.borrow().clone()
    }
}
