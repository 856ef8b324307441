//! Operator restart and replace requests.
//!
//! Requests are appended from the admin API (or a deployment block) at any
//! time and drained by the control loop at the start of each offer batch.
//! Each queue has its own lock, held only to append or to swap the queue
//! out, so every request is acted on exactly once.

use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{info, warn};

use crate::model::TaskInfo;

#[derive(Debug, Default)]
struct Queue(Mutex<Vec<TaskInfo>>);

impl Queue {
    fn lock(&self) -> MutexGuard<'_, Vec<TaskInfo>> {
        // A poisoned queue still holds valid task descriptors.
        self.0.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn push(&self, task: TaskInfo) {
        self.lock().push(task);
    }

    fn drain(&self) -> Vec<TaskInfo> {
        std::mem::take(&mut *self.lock())
    }
}

/// Cloneable handle to the operator queues.
#[derive(Debug, Clone, Default)]
pub struct OperatorRequests {
    restarts: Arc<Queue>,
    replacements: Arc<Queue>,
}

impl OperatorRequests {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that a task be killed and relaunched in place.
    pub fn restart(&self, task: Option<TaskInfo>) {
        let Some(task) = task else {
            warn!("Asked to restart a missing task, ignoring");
            return;
        };
        info!(task_id = %task.task_id, "Queued task restart");
        self.restarts.push(task);
    }

    /// Request that a task be killed and relaunched elsewhere.
    pub fn replace(&self, task: Option<TaskInfo>) {
        let Some(task) = task else {
            warn!("Asked to replace a missing task, ignoring");
            return;
        };
        info!(task_id = %task.task_id, "Queued task replacement");
        self.replacements.push(task);
    }

    pub(crate) fn drain_restarts(&self) -> Vec<TaskInfo> {
        self.restarts.drain()
    }

    pub(crate) fn drain_replacements(&self) -> Vec<TaskInfo> {
        self.replacements.drain()
    }
}
