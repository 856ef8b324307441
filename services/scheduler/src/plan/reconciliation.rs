//! Reconciliation as a plan block.

use ksched_id::BlockId;

use crate::driver::SchedulerDriver;
use crate::model::TaskStatus;
use crate::plan::BlockStatus;
use crate::reconciler::Reconciler;

/// Holds the plan at its start until task statuses are reconciled.
pub struct ReconciliationBlock {
    id: BlockId,
    reconciler: Reconciler,
}

impl ReconciliationBlock {
    pub const NAME: &'static str = "Reconciliation";

    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            id: BlockId::new(),
            reconciler,
        }
    }

    pub fn id(&self) -> BlockId {
        self.id
    }

    pub fn status(&self) -> BlockStatus {
        if self.reconciler.is_reconciled() {
            BlockStatus::Complete
        } else {
            BlockStatus::InProgress
        }
    }

    pub fn is_reconciled(&self) -> bool {
        self.reconciler.is_reconciled()
    }

    pub fn reconcile(&mut self, driver: &mut dyn SchedulerDriver) {
        self.reconciler.reconcile(driver);
    }

    pub fn update(&mut self, status: &TaskStatus) {
        self.reconciler.update(status);
    }

    /// Start over, e.g. after re-registration.
    pub fn restart(&mut self) {
        self.reconciler.start();
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }
}
