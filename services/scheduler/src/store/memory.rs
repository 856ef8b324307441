//! In-memory task store for dev mode and tests.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use ksched_id::FrameworkId;

use super::{status_task_name, StoreError, StoreResult, TaskStore};
use crate::model::{TaskInfo, TaskStatus};

#[derive(Debug, Default)]
struct Inner {
    tasks: BTreeMap<String, TaskInfo>,
    statuses: BTreeMap<String, TaskStatus>,
    framework_id: Option<FrameworkId>,
    suppressed: bool,
}

/// Task store backed by process memory. Contents are lost on restart.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    inner: Mutex<Inner>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl TaskStore for MemoryTaskStore {
    fn store_tasks(&self, tasks: &[TaskInfo]) -> StoreResult<()> {
        let mut inner = self.lock()?;
        for task in tasks {
            inner.tasks.insert(task.name.clone(), task.clone());
        }
        Ok(())
    }

    fn store_status(&self, status: &TaskStatus) -> StoreResult<()> {
        let name = status_task_name(status)?;
        let mut inner = self.lock()?;
        let Some(task) = inner.tasks.get(name) else {
            return Err(StoreError::NotFound(name.to_string()));
        };
        if task.task_id != status.task_id {
            return Err(StoreError::StaleStatus {
                name: name.to_string(),
                task_id: status.task_id.to_string(),
            });
        }
        inner.statuses.insert(name.to_string(), status.clone());
        Ok(())
    }

    fn fetch_task(&self, name: &str) -> StoreResult<Option<TaskInfo>> {
        Ok(self.lock()?.tasks.get(name).cloned())
    }

    fn fetch_status(&self, name: &str) -> StoreResult<Option<TaskStatus>> {
        Ok(self.lock()?.statuses.get(name).cloned())
    }

    fn fetch_tasks(&self) -> StoreResult<Vec<TaskInfo>> {
        Ok(self.lock()?.tasks.values().cloned().collect())
    }

    fn fetch_statuses(&self) -> StoreResult<Vec<TaskStatus>> {
        Ok(self.lock()?.statuses.values().cloned().collect())
    }

    fn task_names(&self) -> StoreResult<Vec<String>> {
        Ok(self.lock()?.tasks.keys().cloned().collect())
    }

    fn framework_id(&self) -> StoreResult<Option<FrameworkId>> {
        Ok(self.lock()?.framework_id.clone())
    }

    fn set_framework_id(&self, id: &FrameworkId) -> StoreResult<()> {
        self.lock()?.framework_id = Some(id.clone());
        Ok(())
    }

    fn set_suppressed(&self, suppressed: bool) -> StoreResult<()> {
        self.lock()?.suppressed = suppressed;
        Ok(())
    }

    fn is_suppressed(&self) -> StoreResult<bool> {
        Ok(self.lock()?.suppressed)
    }
}
