//! Per-broker deployment block.

use std::sync::Arc;

use ksched_id::{broker_task_name, BlockId, TaskId};
use ksched_reconcile::SpecHash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::model::{Operation, TaskState, TaskStatus};
use crate::offer::{OfferRequirement, OfferRequirementProvider, RequirementResult};
use crate::operator::OperatorRequests;
use crate::store::{TaskRecord, TaskStore};

/// Lifecycle of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BlockStatus {
    Pending,
    InProgress,
    Complete,
}

/// Brings one broker to the target configuration.
///
/// ```text
/// Pending --start/offer accepted--> InProgress --running--> Complete
///    ^                                  |
///    +---- no operations / terminal ----+
/// ```
pub struct BrokerBlock {
    id: BlockId,
    broker_index: u32,
    name: String,
    target: SpecHash,
    store: Arc<dyn TaskStore>,
    provider: Arc<dyn OfferRequirementProvider>,
    requests: OperatorRequests,
    status: BlockStatus,
    pending_tasks: Vec<TaskId>,
}

impl BrokerBlock {
    pub fn new(
        broker_index: u32,
        target: SpecHash,
        store: Arc<dyn TaskStore>,
        provider: Arc<dyn OfferRequirementProvider>,
        requests: OperatorRequests,
    ) -> Self {
        let mut block = Self {
            id: BlockId::new(),
            broker_index,
            name: broker_task_name(broker_index),
            target,
            store,
            provider,
            requests,
            status: BlockStatus::Pending,
            pending_tasks: Vec::new(),
        };

        match block.store.fetch_record(&block.name) {
            Ok(Some(record)) if block.is_converged(&record) => {
                block.status = BlockStatus::Complete;
            }
            Ok(_) => {}
            Err(e) => warn!(block = %block.name, error = %e, "Failed to read task record"),
        }
        block
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn broker_index(&self) -> u32 {
        self.broker_index
    }

    pub fn status(&self) -> BlockStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == BlockStatus::Complete
    }

    /// Task IDs this block is waiting on.
    pub fn pending_tasks(&self) -> &[TaskId] {
        &self.pending_tasks
    }

    /// Requirement for the next launch, or `None` when there is nothing to
    /// request. Only a pending block requests anything.
    pub fn start(&mut self) -> Option<OfferRequirement> {
        if self.status != BlockStatus::Pending {
            debug!(block = %self.name, status = ?self.status, "Block is not pending");
            return None;
        }

        match self.requirement() {
            Ok(requirement) => requirement,
            Err(e) => {
                warn!(block = %self.name, error = %e, "Failed to build offer requirement");
                None
            }
        }
    }

    /// Record the operations sent for the requirement returned by `start`.
    pub fn update_offer_status(&mut self, operations: Option<&[Operation]>) {
        let launched: Vec<TaskId> = operations
            .unwrap_or_default()
            .iter()
            .flat_map(Operation::launched_tasks)
            .map(|t| t.task_id.clone())
            .collect();

        if launched.is_empty() {
            self.pending_tasks.clear();
            self.status = BlockStatus::Pending;
        } else {
            info!(block = %self.name, tasks = ?launched, "Block in progress");
            self.pending_tasks = launched;
            self.status = BlockStatus::InProgress;
        }
    }

    /// Apply a status update.
    pub fn update(&mut self, status: &TaskStatus) {
        if self.status != BlockStatus::InProgress || !self.pending_tasks.contains(&status.task_id)
        {
            return;
        }
        if status.is_reconciliation() {
            debug!(block = %self.name, task_id = %status.task_id, "Ignoring reconciliation status");
            return;
        }

        if status.state == TaskState::Running {
            info!(block = %self.name, task_id = %status.task_id, "Block complete");
            self.pending_tasks.clear();
            self.status = BlockStatus::Complete;
        } else if status.state.is_terminal() {
            warn!(
                block = %self.name,
                task_id = %status.task_id,
                state = ?status.state,
                "Launch failed, block back to pending"
            );
            self.pending_tasks.clear();
            self.status = BlockStatus::Pending;
        }
    }

    /// Back to pending, forgetting any outstanding launch.
    pub fn restart(&mut self) {
        self.pending_tasks.clear();
        self.status = BlockStatus::Pending;
    }

    fn is_converged(&self, record: &TaskRecord) -> bool {
        record.info.config_target() == Some(self.target.as_str()) && record.is_running()
    }

    fn requirement(&mut self) -> RequirementResult<Option<OfferRequirement>> {
        let Some(record) = self.store.fetch_record(&self.name)? else {
            return self
                .provider
                .new_requirement(&self.target, self.broker_index)
                .map(Some);
        };

        if self.is_converged(&record) {
            info!(block = %self.name, "Broker already runs the target configuration");
            self.status = BlockStatus::Complete;
            return Ok(None);
        }

        let Some(status) = &record.status else {
            // Recorded but never reported: the launch did not reach the
            // cluster manager, so its reservations may not exist either.
            return self
                .provider
                .new_requirement(&self.target, self.broker_index)
                .map(Some);
        };

        if !status.state.is_terminal() {
            if record.info.config_target() == Some(self.target.as_str()) {
                // Launched by an earlier run; wait for it to come up.
                self.pending_tasks = vec![record.info.task_id.clone()];
                self.status = BlockStatus::InProgress;
            } else {
                // The old task holds the reservations the update needs.
                self.requests.restart(Some(record.info.clone()));
            }
            return Ok(None);
        }

        self.provider
            .update_requirement(&self.target, &record.info)
            .map(Some)
    }
}

impl std::fmt::Debug for BrokerBlock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerBlock")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("status", &self.status)
            .field("pending_tasks", &self.pending_tasks)
            .finish()
    }
}
