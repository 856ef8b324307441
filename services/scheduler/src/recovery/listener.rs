use std::sync::Arc;

use ksched_id::TaskId;
use tracing::{info, warn};

use crate::model::PERMANENTLY_FAILED_LABEL;
use crate::store::TaskStore;

/// Marks tasks the operator wants replaced as permanently failed.
///
/// The mark is persisted on the task record, so it survives a scheduler
/// restart between the request and the resulting kill.
pub struct TaskFailureListener {
    store: Arc<dyn TaskStore>,
}

impl TaskFailureListener {
    pub fn new(store: Arc<dyn TaskStore>) -> Self {
        Self { store }
    }

    pub fn task_failed(&self, task_id: &TaskId) {
        let name = match task_id.task_name() {
            Ok(name) => name,
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Cannot mark foreign task as failed");
                return;
            }
        };

        let mut task = match self.store.fetch_task(name) {
            Ok(Some(task)) if task.task_id == *task_id => task,
            Ok(_) => {
                warn!(task_id = %task_id, "Task to mark as failed is not the stored task");
                return;
            }
            Err(e) => {
                warn!(task_id = %task_id, error = %e, "Failed to fetch task to mark as failed");
                return;
            }
        };

        task.labels
            .insert(PERMANENTLY_FAILED_LABEL.to_string(), "true".to_string());
        match self.store.store_tasks(std::slice::from_ref(&task)) {
            Ok(()) => info!(task_id = %task_id, "Marked task as permanently failed"),
            Err(e) => warn!(task_id = %task_id, error = %e, "Failed to mark task as failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CommandInfo, TaskInfo};
    use crate::store::MemoryTaskStore;

    #[test]
    fn test_marks_only_the_stored_task() {
        let store = Arc::new(MemoryTaskStore::new());
        let task = TaskInfo {
            name: "broker-0".to_string(),
            task_id: TaskId::generate("broker-0"),
            agent_id: None,
            hostname: None,
            resources: vec![],
            executor: None,
            command: CommandInfo::default(),
            labels: Default::default(),
        };
        store.store_tasks(&[task.clone()]).unwrap();
        let listener = TaskFailureListener::new(store.clone());

        listener.task_failed(&TaskId::generate("broker-0")); // stale ID
        assert!(!store.fetch_task("broker-0").unwrap().unwrap().is_permanently_failed());

        listener.task_failed(&task.task_id);
        assert!(store.fetch_task("broker-0").unwrap().unwrap().is_permanently_failed());
    }
}
