//! Cluster manager driver interface and mock implementation.
//!
//! The driver is the scheduler's only outbound channel to the cluster
//! manager. Every call is fire-and-forget: results arrive later as status
//! updates or new offers, never as return values.
//!
//! A mock implementation is provided for testing and development.

use ksched_id::{OfferId, TaskId};
use tracing::{debug, info};

use crate::model::{Operation, TaskStatus};

/// Outbound calls to the cluster manager.
pub trait SchedulerDriver: Send {
    /// Accept offers, applying the operations in order.
    fn accept_offers(&mut self, offer_ids: &[OfferId], operations: &[Operation]);

    fn decline_offer(&mut self, offer_id: &OfferId);

    /// Ask the cluster manager to resume sending offers.
    fn revive_offers(&mut self);

    /// Ask the cluster manager to stop sending offers.
    fn suppress_offers(&mut self);

    fn kill_task(&mut self, task_id: &TaskId);

    /// Request status for the listed tasks, or for all known tasks when empty.
    fn reconcile_tasks(&mut self, statuses: &[TaskStatus]);
}

/// A recorded driver call.
#[derive(Debug, Clone, PartialEq)]
pub enum DriverCall {
    AcceptOffers {
        offer_ids: Vec<OfferId>,
        operations: Vec<Operation>,
    },
    DeclineOffer(OfferId),
    ReviveOffers,
    SuppressOffers,
    KillTask(TaskId),
    ReconcileTasks(Vec<TaskStatus>),
}

/// Mock driver for testing and development.
#[derive(Debug)]
pub struct MockDriver {
    /// Whether calls are kept for inspection.
    record: bool,

    calls: Vec<DriverCall>,
}

impl MockDriver {
    /// Create a mock driver that records every call.
    pub fn new() -> Self {
        Self {
            record: true,
            calls: Vec::new(),
        }
    }

    /// Create a mock driver that only logs.
    pub fn logging_only() -> Self {
        Self {
            record: false,
            calls: Vec::new(),
        }
    }

    pub fn calls(&self) -> &[DriverCall] {
        &self.calls
    }

    /// Forget recorded calls.
    pub fn clear(&mut self) {
        self.calls.clear();
    }

    pub fn count<F>(&self, predicate: F) -> usize
    where
        F: Fn(&DriverCall) -> bool,
    {
        self.calls.iter().filter(|c| predicate(c)).count()
    }

    /// Operations from every accept call, in order.
    pub fn accepted_operations(&self) -> Vec<&Operation> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::AcceptOffers { operations, .. } => Some(operations),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn accepted_offers(&self) -> Vec<&OfferId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::AcceptOffers { offer_ids, .. } => Some(offer_ids),
                _ => None,
            })
            .flatten()
            .collect()
    }

    pub fn declined_offers(&self) -> Vec<&OfferId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::DeclineOffer(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn killed_tasks(&self) -> Vec<&TaskId> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::KillTask(id) => Some(id),
                _ => None,
            })
            .collect()
    }

    pub fn reconcile_requests(&self) -> Vec<&[TaskStatus]> {
        self.calls
            .iter()
            .filter_map(|c| match c {
                DriverCall::ReconcileTasks(statuses) => Some(statuses.as_slice()),
                _ => None,
            })
            .collect()
    }

    pub fn revive_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::ReviveOffers))
    }

    pub fn suppress_count(&self) -> usize {
        self.count(|c| matches!(c, DriverCall::SuppressOffers))
    }

    fn push(&mut self, call: DriverCall) {
        if self.record {
            self.calls.push(call);
        }
    }
}

impl Default for MockDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerDriver for MockDriver {
    fn accept_offers(&mut self, offer_ids: &[OfferId], operations: &[Operation]) {
        info!(
            offers = offer_ids.len(),
            operations = operations.len(),
            "[MOCK] Accepting offers"
        );
        self.push(DriverCall::AcceptOffers {
            offer_ids: offer_ids.to_vec(),
            operations: operations.to_vec(),
        });
    }

    fn decline_offer(&mut self, offer_id: &OfferId) {
        debug!(offer_id = %offer_id, "[MOCK] Declining offer");
        self.push(DriverCall::DeclineOffer(offer_id.clone()));
    }

    fn revive_offers(&mut self) {
        info!("[MOCK] Reviving offers");
        self.push(DriverCall::ReviveOffers);
    }

    fn suppress_offers(&mut self) {
        info!("[MOCK] Suppressing offers");
        self.push(DriverCall::SuppressOffers);
    }

    fn kill_task(&mut self, task_id: &TaskId) {
        info!(task_id = %task_id, "[MOCK] Killing task");
        self.push(DriverCall::KillTask(task_id.clone()));
    }

    fn reconcile_tasks(&mut self, statuses: &[TaskStatus]) {
        debug!(tasks = statuses.len(), "[MOCK] Reconciling tasks");
        self.push(DriverCall::ReconcileTasks(statuses.to_vec()));
    }
}
