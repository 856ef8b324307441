//! Durable task record store.
//!
//! Maps a logical task name (`broker-<n>`) to the last task descriptor
//! launched under that name and the last status received for it. The two
//! are written independently: storing a relaunched task with a fresh task
//! ID leaves the previous status behind, so correlated lookups
//! ([`TaskStore::fetch_record`]) only report a status whose task ID matches
//! the stored task.

mod error;
mod memory;
mod sqlite;

pub use error::{StoreError, StoreResult};
pub use memory::MemoryTaskStore;
pub use sqlite::SqliteTaskStore;

use std::collections::BTreeMap;

use ksched_id::FrameworkId;

use crate::model::{TaskInfo, TaskStatus};

/// A stored task together with its current status, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRecord {
    pub info: TaskInfo,
    /// Last status for this exact task ID.
    pub status: Option<TaskStatus>,
}

impl TaskRecord {
    pub fn is_running(&self) -> bool {
        self.status
            .as_ref()
            .is_some_and(|s| s.state == crate::model::TaskState::Running)
    }

    pub fn is_terminated(&self) -> bool {
        self.status.as_ref().is_some_and(|s| s.state.is_terminal())
    }
}

/// Persistent store of task descriptors and statuses.
pub trait TaskStore: Send + Sync {
    /// Stores task descriptors, replacing any previous task with the same name.
    fn store_tasks(&self, tasks: &[TaskInfo]) -> StoreResult<()>;

    /// Stores a status under the task name derived from its task ID.
    ///
    /// Fails with [`StoreError::NotFound`] if no task with that name exists,
    /// and with [`StoreError::StaleStatus`] if that task has since been
    /// relaunched under another ID.
    fn store_status(&self, status: &TaskStatus) -> StoreResult<()>;

    fn fetch_task(&self, name: &str) -> StoreResult<Option<TaskInfo>>;

    fn fetch_status(&self, name: &str) -> StoreResult<Option<TaskStatus>>;

    /// All stored tasks, ordered by name.
    fn fetch_tasks(&self) -> StoreResult<Vec<TaskInfo>>;

    /// All stored statuses, ordered by task name.
    fn fetch_statuses(&self) -> StoreResult<Vec<TaskStatus>>;

    fn task_names(&self) -> StoreResult<Vec<String>>;

    fn framework_id(&self) -> StoreResult<Option<FrameworkId>>;

    fn set_framework_id(&self, id: &FrameworkId) -> StoreResult<()>;

    fn set_suppressed(&self, suppressed: bool) -> StoreResult<()>;

    fn is_suppressed(&self) -> StoreResult<bool>;

    /// Fetches a task and its status, dropping a status left over from a
    /// previous task ID.
    fn fetch_record(&self, name: &str) -> StoreResult<Option<TaskRecord>> {
        let Some(info) = self.fetch_task(name)? else {
            return Ok(None);
        };
        let status = self
            .fetch_status(name)?
            .filter(|s| s.task_id == info.task_id);
        Ok(Some(TaskRecord { info, status }))
    }

    /// All tasks with their current statuses, ordered by name.
    fn fetch_records(&self) -> StoreResult<Vec<TaskRecord>> {
        let mut statuses: BTreeMap<_, _> = self
            .fetch_statuses()?
            .into_iter()
            .map(|s| (s.task_id.clone(), s))
            .collect();

        Ok(self
            .fetch_tasks()?
            .into_iter()
            .map(|info| {
                let status = statuses.remove(&info.task_id);
                TaskRecord { info, status }
            })
            .collect())
    }
}

/// Task name a status belongs to.
fn status_task_name(status: &TaskStatus) -> StoreResult<&str> {
    Ok(status.task_id.task_name()?)
}
